//! Event-derived parameter substitution
//!
//! Replaces `{{name}}` placeholders in a resolved definition with values
//! taken from the triggering event, and exposes the standard parameter
//! set to the run itself.

use sluice_core::domain::event::Event;
use sluice_core::domain::pipeline::{Param, PipelineDefinition};

/// Standard parameters every run can reference
pub fn standard_params(event: &Event) -> Vec<(String, String)> {
    let repo_name = event
        .url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();

    vec![
        ("sha".to_string(), event.sha.clone()),
        ("repo_url".to_string(), event.url.clone()),
        ("repo_name".to_string(), repo_name),
        ("source_branch".to_string(), event.source_branch.clone()),
        ("target_branch".to_string(), event.target_branch.clone()),
        (
            "pull_request_number".to_string(),
            event
                .pull_request_number
                .map(|nr| nr.to_string())
                .unwrap_or_default(),
        ),
        (
            "trigger_comment".to_string(),
            event.trigger_comment.clone().unwrap_or_default(),
        ),
    ]
}

/// Substitutes event parameters throughout a definition.
///
/// Placeholders appear in param values and step images/scripts. Standard
/// params are appended to the definition's parameter set afterwards,
/// without overriding ones the definition declares itself.
pub fn substitute(definition: &mut PipelineDefinition, event: &Event) {
    let params = standard_params(event);

    for param in &mut definition.params {
        param.value = apply(&param.value, &params);
    }
    for task in &mut definition.tasks {
        for step in &mut task.steps {
            step.image = apply(&step.image, &params);
            step.script = apply(&step.script, &params);
        }
    }

    for (name, value) in params {
        if !definition.params.iter().any(|p| p.name == name) {
            definition.params.push(Param { name, value });
        }
    }
}

fn apply(text: &str, params: &[(String, String)]) -> String {
    let mut out = text.to_string();
    for (name, value) in params {
        let placeholder = format!("{{{{{}}}}}", name);
        if out.contains(&placeholder) {
            out = out.replace(&placeholder, value);
        }
    }
    out
}
