//! Container Driver (§4.1). Adapter over the container engine; every call in
//! this module is the only place bollard is touched, so the rest of the
//! control plane never blocks on engine I/O directly.

use std::collections::HashMap;

use bollard::container::{
    Config, ListContainersOptions, LogsOptions, RemoveContainerOptions, StatsOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HealthConfig, HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use futures::StreamExt;
use tokio::sync::Semaphore;
use std::sync::Arc;

use crate::domain::{HealthCheck, ResourceLimits};
use crate::error::{Error, Result};

/// Bounds concurrent engine calls so a burst of deploys cannot starve other
/// request handling (§5).
const MAX_CONCURRENT_DRIVER_CALLS: usize = 16;

pub struct ContainerSettings {
    pub network_name: String,
    pub sandbox_domain: String,
}

pub struct ContainerDriver {
    docker: Docker,
    settings: ContainerSettings,
    permits: Arc<Semaphore>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub status: String,
    pub image: String,
    pub path_prefix: String,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ContainerStats {
    pub cpu_percent: f64,
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
    pub memory_percent: f64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    pub pids: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthSnapshot {
    pub status: String,
    pub log: Vec<String>,
}

impl ContainerDriver {
    pub fn new(docker: Docker, settings: ContainerSettings) -> Self {
        Self {
            docker,
            settings,
            permits: Arc::new(Semaphore::new(MAX_CONCURRENT_DRIVER_CALLS)),
        }
    }

    pub fn connect_from_env(settings: ContainerSettings) -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| Error::DriverError(e.to_string()))?;
        Ok(Self::new(docker, settings))
    }

    fn labels(
        &self,
        container_name: &str,
        path_prefix: &str,
        port: u16,
        limits: &ResourceLimits,
    ) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        labels.insert("traefik.enable".into(), "true".into());
        labels.insert(
            format!("traefik.http.routers.{container_name}.rule"),
            format!(
                "Host(`{}`) && PathPrefix(`/{}`)",
                self.settings.sandbox_domain, path_prefix
            ),
        );
        labels.insert(
            format!("traefik.http.routers.{container_name}.entrypoints"),
            "websecure".into(),
        );
        labels.insert(
            format!("traefik.http.routers.{container_name}.tls.certresolver"),
            "letsencrypt".into(),
        );
        labels.insert(
            format!("traefik.http.services.{container_name}.loadbalancer.server.port"),
            port.to_string(),
        );
        labels.insert(
            format!("traefik.http.middlewares.{container_name}-strip.stripprefix.prefixes"),
            format!("/{path_prefix}"),
        );
        labels.insert(
            format!("traefik.http.routers.{container_name}.middlewares"),
            format!("{container_name}-strip"),
        );
        labels.insert("sandbox.deployment".into(), "true".into());
        labels.insert("sandbox.path_prefix".into(), path_prefix.to_string());
        if let Some(mem) = limits.memory_mb {
            labels.insert("sandbox.memory_limit_mb".into(), mem.to_string());
        }
        if let Some(cpu) = limits.cpu_nanos {
            labels.insert("sandbox.cpu_limit".into(), cpu.to_string());
        }
        labels
    }

    /// Pull, remove-if-present, create and start. Returns the short container id.
    #[tracing::instrument(skip(self, env), fields(container_name))]
    pub async fn deploy(
        &self,
        image: &str,
        container_name: &str,
        path_prefix: &str,
        port: u16,
        env: HashMap<String, String>,
        limits: ResourceLimits,
        healthcheck: Option<HealthCheck>,
    ) -> Result<String> {
        let _permit = self.permits.acquire().await.expect("semaphore closed");

        tracing::info!(image, "pulling image");
        let pull_result = self
            .docker
            .create_image(
                Some(CreateImageOptions {
                    from_image: image,
                    ..Default::default()
                }),
                None,
                None,
            )
            .collect::<Vec<_>>()
            .await;
        if let Some(Err(e)) = pull_result.into_iter().find(|r| r.is_err()) {
            tracing::warn!(error = %e, "image pull warning, continuing (image may already be present locally)");
        }

        if self.docker.inspect_container(container_name, None).await.is_ok() {
            tracing::info!(name = container_name, "removing existing container");
            self.force_remove(container_name).await?;
        }

        let env_vec: Vec<String> = env.into_iter().map(|(k, v)| format!("{k}={v}")).collect();
        let labels = self.labels(container_name, path_prefix, port, &limits);

        let health_config = healthcheck.map(|hc| HealthConfig {
            test: Some(vec![
                "CMD-SHELL".to_string(),
                format!(
                    "curl -f http://localhost:{}{} || exit 1",
                    hc.port, hc.path
                ),
            ]),
            interval: Some((hc.interval_secs * 1_000_000_000) as i64),
            timeout: Some((hc.timeout_secs * 1_000_000_000) as i64),
            retries: Some(hc.retries as i64),
            start_period: Some((hc.start_period_secs * 1_000_000_000) as i64),
            ..Default::default()
        });

        let host_config = HostConfig {
            network_mode: Some(self.settings.network_name.clone()),
            memory: limits.memory_mb.map(|mb| (mb * 1024 * 1024) as i64),
            nano_cpus: limits.cpu_nanos.map(|n| n as i64),
            pids_limit: limits.pids_limit,
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                maximum_retry_count: None,
            }),
            port_bindings: Some(HashMap::from([(
                format!("{port}/tcp"),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: None,
                }]),
            )])),
            ..Default::default()
        };

        let config = Config {
            image: Some(image.to_string()),
            env: Some(env_vec),
            labels: Some(labels),
            healthcheck: health_config,
            host_config: Some(host_config),
            ..Default::default()
        };

        tracing::info!(name = container_name, network = %self.settings.network_name, "creating container");
        let created = self
            .docker
            .create_container(
                Some(bollard::container::CreateContainerOptions {
                    name: container_name,
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| Error::DriverError(e.to_string()))?;

        self.docker
            .start_container::<String>(&created.id, None)
            .await
            .map_err(|e| Error::DriverError(e.to_string()))?;

        Ok(created.id.chars().take(12).collect())
    }

    async fn force_remove(&self, container_name: &str) -> Result<()> {
        match self
            .docker
            .remove_container(
                container_name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(Error::DriverError(e.to_string())),
        }
    }

    /// Idempotent: a not-found container is not an error (§4.1, §7).
    #[tracing::instrument(skip(self))]
    pub async fn teardown(&self, container_name: &str) -> Result<()> {
        let _permit = self.permits.acquire().await.expect("semaphore closed");
        self.force_remove(container_name).await?;
        tracing::info!(name = container_name, "container removed");
        Ok(())
    }

    pub async fn list_sandbox_containers(&self) -> Result<Vec<ContainerSummary>> {
        let _permit = self.permits.acquire().await.expect("semaphore closed");
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec!["sandbox.deployment=true".to_string()]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| Error::DriverError(e.to_string()))?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default().chars().take(12).collect(),
                name: c
                    .names
                    .and_then(|n| n.into_iter().next())
                    .unwrap_or_default()
                    .trim_start_matches('/')
                    .to_string(),
                status: c.state.unwrap_or_default(),
                image: c.image.unwrap_or_else(|| "unknown".to_string()),
                path_prefix: c
                    .labels
                    .unwrap_or_default()
                    .get("sandbox.path_prefix")
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect())
    }

    pub async fn logs(&self, container_name: &str, tail: usize) -> Result<String> {
        let _permit = self.permits.acquire().await.expect("semaphore closed");
        let mut stream = self.docker.logs(
            container_name,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                tail: tail.to_string(),
                ..Default::default()
            }),
        );

        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(log) => out.push_str(&log.to_string()),
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                }) => return Ok(String::new()),
                Err(e) => return Err(Error::DriverError(e.to_string())),
            }
        }
        Ok(out)
    }

    /// A lazy, unbounded (until container exit) sequence of decoded log lines,
    /// used by the Log Streamer (§4.6) for SSE fan-out.
    pub fn logs_stream(
        &self,
        container_name: &str,
    ) -> impl futures::Stream<Item = std::result::Result<String, bollard::errors::Error>> + '_
    {
        self.docker
            .logs(
                container_name,
                Some(LogsOptions::<String> {
                    stdout: true,
                    stderr: true,
                    follow: true,
                    tail: "50".to_string(),
                    timestamps: false,
                    ..Default::default()
                }),
            )
            .map(|r| r.map(|l| l.to_string()))
    }

    pub async fn health(&self, container_name: &str) -> Result<HealthSnapshot> {
        let _permit = self.permits.acquire().await.expect("semaphore closed");
        let inspect = self
            .docker
            .inspect_container(container_name, None)
            .await
            .map_err(|e| Error::DriverError(e.to_string()))?;

        let health = inspect.state.and_then(|s| s.health);
        let status = health
            .as_ref()
            .and_then(|h| h.status)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "none".to_string());

        let log = health
            .and_then(|h| h.log)
            .unwrap_or_default()
            .into_iter()
            .rev()
            .take(10)
            .map(|entry| {
                let mut out = entry.output.unwrap_or_default();
                out.truncate(500);
                out
            })
            .collect();

        Ok(HealthSnapshot { status, log })
    }

    pub async fn stats(&self, container_name: &str) -> Result<ContainerStats> {
        let _permit = self.permits.acquire().await.expect("semaphore closed");
        let mut stream = self.docker.stats(
            container_name,
            Some(StatsOptions {
                stream: false,
                one_shot: true,
            }),
        );

        let stats = stream
            .next()
            .await
            .ok_or_else(|| Error::DriverError("no stats returned".to_string()))?
            .map_err(|e| Error::DriverError(e.to_string()))?;

        let cpu_delta = stats.cpu_stats.cpu_usage.total_usage as f64
            - stats.precpu_stats.cpu_usage.total_usage as f64;
        let system_delta = stats.cpu_stats.system_cpu_usage.unwrap_or(0) as f64
            - stats.precpu_stats.system_cpu_usage.unwrap_or(0) as f64;
        let cpu_percent = if system_delta > 0.0 && cpu_delta > 0.0 {
            (cpu_delta / system_delta) * 100.0
        } else {
            0.0
        };

        let memory_usage = stats.memory_stats.usage.unwrap_or(0);
        let memory_limit = stats.memory_stats.limit.unwrap_or(0);
        let memory_percent = if memory_limit > 0 {
            (memory_usage as f64 / memory_limit as f64) * 100.0
        } else {
            0.0
        };

        let (rx, tx) = stats
            .networks
            .unwrap_or_default()
            .values()
            .fold((0u64, 0u64), |(rx, tx), n| (rx + n.rx_bytes, tx + n.tx_bytes));

        Ok(ContainerStats {
            cpu_percent,
            memory_usage_bytes: memory_usage,
            memory_limit_bytes: memory_limit,
            memory_percent,
            network_rx_bytes: rx,
            network_tx_bytes: tx,
            pids: stats.pids_stats.current.unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> ContainerDriver {
        ContainerDriver::new(
            Docker::connect_with_local_defaults().expect("docker socket path should parse"),
            ContainerSettings {
                network_name: "sandbox-network".to_string(),
                sandbox_domain: "sandbox.example.com".to_string(),
            },
        )
    }

    #[test]
    fn labels_carry_traefik_routing_and_sandbox_metadata() {
        let driver = driver();
        let limits = ResourceLimits {
            memory_mb: Some(512),
            cpu_nanos: Some(500_000_000),
            pids_limit: None,
        };
        let labels = driver.labels("sandbox-abc123", "abc123", 3000, &limits);

        assert_eq!(labels.get("traefik.enable").map(String::as_str), Some("true"));
        assert_eq!(
            labels.get("traefik.http.routers.sandbox-abc123.rule").map(String::as_str),
            Some("Host(`sandbox.example.com`) && PathPrefix(`/abc123`)")
        );
        assert_eq!(
            labels
                .get("traefik.http.services.sandbox-abc123.loadbalancer.server.port")
                .map(String::as_str),
            Some("3000")
        );
        assert_eq!(labels.get("sandbox.deployment").map(String::as_str), Some("true"));
        assert_eq!(labels.get("sandbox.path_prefix").map(String::as_str), Some("abc123"));
        assert_eq!(labels.get("sandbox.memory_limit_mb").map(String::as_str), Some("512"));
        assert_eq!(labels.get("sandbox.cpu_limit").map(String::as_str), Some("500000000"));
    }

    #[test]
    fn labels_omit_resource_keys_when_unset() {
        let driver = driver();
        let labels = driver.labels("sandbox-xyz", "xyz", 8080, &ResourceLimits::default());
        assert!(!labels.contains_key("sandbox.memory_limit_mb"));
        assert!(!labels.contains_key("sandbox.cpu_limit"));
    }
}
