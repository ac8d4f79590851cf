//! TTL Reaper (§4.4). Grounded bit-exact on
//! `original_source/.../services/cleanup.py`'s `CleanupService`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::domain::CleanupResult;
use crate::driver::ContainerDriver;
use crate::registry::Registry;

pub struct Reaper {
    driver: Arc<ContainerDriver>,
    registry: Arc<Registry>,
    tracked: RwLock<HashMap<String, (DateTime<Utc>, u32)>>,
    running: AtomicBool,
    container_prefix: String,
}

impl Reaper {
    pub fn new(driver: Arc<ContainerDriver>, registry: Arc<Registry>, container_prefix: String) -> Self {
        Self {
            driver,
            registry,
            tracked: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
            container_prefix,
        }
    }

    /// Registered unconditionally by the handler that advances a deployment to
    /// `Running`, so the tracked set and the Registry's live set never drift
    /// apart (§9 resolved Open Question).
    pub async fn register(&self, deployment_id: &str, created_at: DateTime<Utc>, ttl_minutes: u32) {
        self.tracked
            .write()
            .await
            .insert(deployment_id.to_string(), (created_at, ttl_minutes));
    }

    pub async fn unregister(&self, deployment_id: &str) {
        self.tracked.write().await.remove(deployment_id);
    }

    /// Runs the periodic loop until `token` is cancelled.
    pub async fn run(self: Arc<Self>, interval: Duration, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let result = self.run_cycle().await;
                    tracing::info!(
                        expired = result.expired_count,
                        orphans = result.orphan_count,
                        failed = result.failed_count,
                        "reaper cycle complete"
                    );
                }
                _ = token.cancelled() => {
                    tracing::info!("reaper loop cancelled");
                    break;
                }
            }
        }
    }

    /// One expire-then-orphan pass (§4.4). Self-guarded so only one cycle runs
    /// at a time; a concurrent call is a no-op returning an empty result.
    pub async fn run_cycle(&self) -> CleanupResult {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("reaper cycle already in progress, skipping");
            return CleanupResult::default();
        }

        let result = self.run_cycle_inner().await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_cycle_inner(&self) -> CleanupResult {
        let mut result = CleanupResult::default();

        let expired_ids: Vec<String> = {
            let tracked = self.tracked.read().await;
            tracked
                .iter()
                .filter(|(_, (created_at, ttl))| {
                    *ttl > 0 && (Utc::now() - *created_at).num_minutes() >= *ttl as i64
                })
                .map(|(id, _)| id.clone())
                .collect()
        };

        for id in expired_ids {
            let container_name = format!("{}-{}", self.container_prefix, id);
            match self.driver.teardown(&container_name).await {
                Ok(()) => {
                    self.registry.drop_deployment(&id).await;
                    self.tracked.write().await.remove(&id);
                    result.expired_count += 1;
                    result.containers_removed.push(container_name);
                }
                Err(e) => {
                    // Left tracked so the next cycle retries.
                    result.failed_count += 1;
                    result.errors.push(format!("expire {id}: {e}"));
                }
            }
        }

        let tracked_ids: std::collections::HashSet<String> =
            self.tracked.read().await.keys().cloned().collect();

        match self.driver.list_sandbox_containers().await {
            Ok(containers) => {
                for container in containers {
                    if !tracked_ids.contains(&container.path_prefix) {
                        match self.driver.teardown(&container.name).await {
                            Ok(()) => {
                                result.orphan_count += 1;
                                result.containers_removed.push(container.name);
                            }
                            Err(e) => {
                                result.failed_count += 1;
                                result.errors.push(format!("orphan {}: {e}", container.name));
                            }
                        }
                    }
                }
            }
            Err(e) => {
                result.errors.push(format!("list_sandbox_containers: {e}"));
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ContainerSettings;
    use bollard::Docker;

    fn reaper() -> Reaper {
        let driver = Arc::new(ContainerDriver::new(
            Docker::connect_with_local_defaults().expect("docker socket path should parse"),
            ContainerSettings {
                network_name: "sandbox-network".to_string(),
                sandbox_domain: "sandbox.example.com".to_string(),
            },
        ));
        Reaper::new(driver, Arc::new(Registry::new()), "sandbox".to_string())
    }

    #[tokio::test]
    async fn register_then_unregister_clears_tracking() {
        let reaper = reaper();
        reaper.register("abc", Utc::now(), 60).await;
        assert!(reaper.tracked.read().await.contains_key("abc"));

        reaper.unregister("abc").await;
        assert!(!reaper.tracked.read().await.contains_key("abc"));
    }

    #[tokio::test]
    async fn zero_ttl_is_never_treated_as_expired() {
        let reaper = reaper();
        let old = Utc::now() - chrono::Duration::hours(10);
        reaper.register("abc", old, 0).await;

        let tracked = reaper.tracked.read().await;
        let (created_at, ttl) = tracked.get("abc").unwrap();
        assert_eq!(*ttl, 0);
        assert!((Utc::now() - *created_at).num_minutes() >= 0);
        // ttl == 0 must be excluded from the expire filter regardless of age.
        assert!(!(*ttl > 0 && (Utc::now() - *created_at).num_minutes() >= *ttl as i64));
    }
}
