//! Explicit application container (§9 "Global singletons"). Built once at
//! startup and threaded through axum `State`, replacing the source's
//! module-wide service singletons.

use std::sync::Arc;

use crate::config::Config;
use crate::driver::{ContainerDriver, ContainerSettings};
use crate::error::Result;
use crate::events::EventBus;
use crate::git_artifacts::GitArtifactPublisher;
use crate::metrics::Metrics;
use crate::reaper::Reaper;
use crate::registry::Registry;
use crate::storage::ArtifactStore;

pub struct AppContext {
    pub config: Config,
    pub driver: Arc<ContainerDriver>,
    pub storage: Arc<ArtifactStore>,
    pub registry: Arc<Registry>,
    pub reaper: Arc<Reaper>,
    pub events: Arc<EventBus>,
    pub git: Arc<GitArtifactPublisher>,
    pub metrics: Arc<Metrics>,
}

impl AppContext {
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let driver = Arc::new(ContainerDriver::connect_from_env(ContainerSettings {
            network_name: config.docker_network.clone(),
            sandbox_domain: config.sandbox_domain.clone(),
        })?);
        let storage = Arc::new(
            ArtifactStore::new(&config.artifacts_db, config.artifacts_dir.clone()).await?,
        );
        let registry = Arc::new(Registry::new());
        let reaper = Arc::new(Reaper::new(
            driver.clone(),
            registry.clone(),
            config.container_prefix.clone(),
        ));
        let events = Arc::new(EventBus::new());
        let git = Arc::new(GitArtifactPublisher::new(
            config.github_token.clone(),
            config.git_user_name.clone(),
            config.git_user_email.clone(),
        ));
        let metrics = Arc::new(Metrics::new());

        Ok(Arc::new(Self {
            config,
            driver,
            storage,
            registry,
            reaper,
            events,
            git,
            metrics,
        }))
    }
}
