use std::collections::HashMap;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sluice_providers::Provider;
use sluice_providers::bitbucket::BitbucketProvider;
use sluice_providers::github::GithubProvider;
use sluice_providers::gitlab::GitlabProvider;
use sluice_providers::incoming::IncomingProvider;

pub mod api;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod matcher;
pub mod reporter;
pub mod resolver;
pub mod sink;

#[cfg(test)]
pub(crate) mod testutil;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sluice_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Sluice Orchestrator...");

    let config = config::Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("falling back to default configuration: {}", e);
        config::Config::default()
    });
    config.validate().expect("Invalid configuration");

    let cluster = Arc::new(cluster::HttpClusterClient::new(
        config.cluster_api_url.clone(),
        config.watch_interval,
    ));

    let mut github = GithubProvider::new();
    if let Some(token) = &config.github_token {
        github = github.with_token(token);
    }
    let mut gitlab = GitlabProvider::new();
    if let Some(token) = &config.gitlab_token {
        gitlab = gitlab.with_token(token);
    }
    let mut bitbucket = BitbucketProvider::new();
    if let Some(token) = &config.bitbucket_token {
        bitbucket = bitbucket.with_token(token);
    }

    let mut providers: HashMap<&'static str, Arc<dyn Provider>> = HashMap::new();
    providers.insert("github", Arc::new(github));
    providers.insert("gitlab", Arc::new(gitlab));
    providers.insert("bitbucket", Arc::new(bitbucket));
    providers.insert("incoming", Arc::new(IncomingProvider::new()));
    let providers = Arc::new(providers);

    let reporter = Arc::new(reporter::StatusReporter::new(&config));
    let controller = Arc::new(controller::RunController::new(
        cluster.clone(),
        reporter.clone(),
        &config,
    ));
    let sink = Arc::new(sink::EventSink::new(
        cluster.clone(),
        controller.clone(),
        providers.clone(),
        config.clone(),
    ));

    // Run condition watcher feeds terminal statuses back to the providers
    {
        let cluster = cluster.clone();
        let controller = controller.clone();
        let reporter = reporter.clone();
        tokio::spawn(async move {
            if let Err(e) = reporter::watch_loop(cluster, controller, reporter).await {
                tracing::error!("run watcher stopped: {}", e);
            }
        });
    }

    let app = api::create_router(api::AppState { sink, providers });

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
