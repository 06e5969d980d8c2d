//! Repository matcher
//!
//! Resolves an enriched event to exactly one registered repository, or a
//! distinct no-match / ambiguous-match outcome. Matching is a pure
//! function of the normalized URL; scheme and host compare
//! case-insensitively and trailing slashes never matter.

use url::Url;

use sluice_core::domain::event::Event;
use sluice_core::domain::repository::Repository;
use sluice_core::error::OrchestrationError;

/// Normalizes a repository URL into its matching key.
///
/// Scheme and host are lowercased, default ports and trailing slashes
/// are dropped. Unparseable inputs fall back to trailing-slash trimming
/// so the lookup still gets a stable key.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    match Url::parse(trimmed) {
        Ok(url) => {
            let host = url.host_str().unwrap_or_default();
            let mut key = format!("{}://{}", url.scheme(), host);
            if let Some(port) = url.port() {
                key.push_str(&format!(":{}", port));
            }
            key.push_str(url.path().trim_end_matches('/'));
            key
        }
        Err(_) => trimmed.to_string(),
    }
}

/// Selects the single repository registered for the event's URL.
///
/// Zero matches is an "unregistered repository" outcome (the caller
/// drops the delivery). More than one match is a configuration error;
/// the error names every conflicting candidate rather than silently
/// picking one.
pub fn match_repository<'a>(
    repositories: &'a [Repository],
    event: &Event,
) -> Result<&'a Repository, OrchestrationError> {
    let key = normalize_url(&event.url);

    let candidates: Vec<&Repository> = repositories
        .iter()
        .filter(|repo| normalize_url(&repo.url) == key)
        .collect();

    match candidates.as_slice() {
        [] => Err(OrchestrationError::UnregisteredRepository(event.url.clone())),
        [repository] => {
            if !repository.settings.accepts(event.event_type) {
                return Err(OrchestrationError::UnregisteredRepository(format!(
                    "{} does not accept {} events",
                    repository.key(),
                    event.event_type
                )));
            }
            Ok(repository)
        }
        many => Err(OrchestrationError::AmbiguousRepository {
            url: event.url.clone(),
            candidates: many.iter().map(|r| r.key()).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::domain::event::EventType;
    use sluice_core::domain::repository::RepositorySettings;

    fn repository(name: &str, url: &str) -> Repository {
        Repository {
            name: name.to_string(),
            namespace: "ci".to_string(),
            url: url.to_string(),
            concurrency_limit: None,
            secret_ref: None,
            settings: RepositorySettings::default(),
        }
    }

    fn push_event(url: &str) -> Event {
        let mut event = Event::new(EventType::Push);
        event.url = url.to_string();
        event
    }

    #[test]
    fn test_normalize_url_is_case_and_slash_insensitive() {
        assert_eq!(
            normalize_url("HTTPS://Forge.Example.COM/acme/website/"),
            normalize_url("https://forge.example.com/acme/website")
        );
    }

    #[test]
    fn test_normalize_url_preserves_path_case() {
        assert_eq!(
            normalize_url("https://forge.example.com/Acme/Website"),
            "https://forge.example.com/Acme/Website"
        );
    }

    #[test]
    fn test_differently_cased_urls_match_same_repository() {
        let repos = vec![repository("website", "https://forge.example.com/acme/website")];
        let event = push_event("HTTPS://FORGE.EXAMPLE.COM/acme/website/");
        let matched = match_repository(&repos, &event).unwrap();
        assert_eq!(matched.name, "website");
    }

    #[test]
    fn test_unregistered_repository_is_distinct_outcome() {
        let repos = vec![repository("website", "https://forge.example.com/acme/website")];
        let event = push_event("https://forge.example.com/acme/other");
        let err = match_repository(&repos, &event).unwrap_err();
        assert!(matches!(err, OrchestrationError::UnregisteredRepository(_)));
        assert!(err.is_dropped_delivery());
    }

    #[test]
    fn test_ambiguous_match_names_all_candidates() {
        let repos = vec![
            repository("website", "https://forge.example.com/acme/website"),
            repository("website-legacy", "https://forge.example.com/acme/website/"),
        ];
        let event = push_event("https://forge.example.com/acme/website");
        let err = match_repository(&repos, &event).unwrap_err();
        match err {
            OrchestrationError::AmbiguousRepository { candidates, .. } => {
                assert_eq!(candidates, vec!["ci/website", "ci/website-legacy"]);
            }
            other => panic!("expected ambiguous match, got {:?}", other),
        }
    }

    #[test]
    fn test_event_policy_is_enforced() {
        let mut repo = repository("website", "https://forge.example.com/acme/website");
        repo.settings = RepositorySettings {
            accepted_events: vec![EventType::Push],
        };
        let repos = vec![repo];

        assert!(match_repository(&repos, &push_event("https://forge.example.com/acme/website")).is_ok());

        let mut comment = push_event("https://forge.example.com/acme/website");
        comment.event_type = EventType::Comment;
        let err = match_repository(&repos, &comment).unwrap_err();
        assert!(err.is_dropped_delivery());
    }
}
