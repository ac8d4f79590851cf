//! Prometheus metric registration glue (ambient stack, carried regardless of
//! the source Non-goals — see SPEC_FULL.md §1). Metric names grounded on
//! `original_source/.../api/metrics.py`.

use prometheus::{
    CounterVec, Encoder, Gauge, Histogram, HistogramOpts, IntCounter, Opts, Registry,
    TextEncoder,
};

pub struct Metrics {
    registry: Registry,
    pub deployments_total: CounterVec,
    pub artifacts_total: IntCounter,
    pub artifact_commits_total: CounterVec,
    pub deployments_active: Gauge,
    pub containers_running: Gauge,
    pub artifacts_storage_bytes: Gauge,
    pub deployment_duration_seconds: Histogram,
    pub artifact_upload_bytes: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let deployments_total = CounterVec::new(
            Opts::new("sandbox_deployments_total", "Total number of deployments"),
            &["status"],
        )
        .unwrap();
        let artifacts_total = IntCounter::new(
            "sandbox_artifacts_total",
            "Total number of artifacts uploaded",
        )
        .unwrap();
        let artifact_commits_total = CounterVec::new(
            Opts::new(
                "sandbox_artifact_commits_total",
                "Total number of artifact commits to git",
            ),
            &["status"],
        )
        .unwrap();
        let deployments_active = Gauge::new(
            "sandbox_deployments_active",
            "Number of currently active deployments",
        )
        .unwrap();
        let containers_running = Gauge::new(
            "sandbox_containers_running",
            "Number of running containers",
        )
        .unwrap();
        let artifacts_storage_bytes = Gauge::new(
            "sandbox_artifacts_storage_bytes",
            "Total bytes of stored artifacts",
        )
        .unwrap();
        let deployment_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "sandbox_deployment_duration_seconds",
                "Time to deploy a container",
            )
            .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )
        .unwrap();
        let artifact_upload_bytes = Histogram::with_opts(
            HistogramOpts::new("sandbox_artifact_upload_bytes", "Size of uploaded artifacts")
                .buckets(vec![
                    1024.0, 10240.0, 102400.0, 1048576.0, 10485760.0, 104857600.0,
                ]),
        )
        .unwrap();

        registry.register(Box::new(deployments_total.clone())).unwrap();
        registry.register(Box::new(artifacts_total.clone())).unwrap();
        registry
            .register(Box::new(artifact_commits_total.clone()))
            .unwrap();
        registry.register(Box::new(deployments_active.clone())).unwrap();
        registry.register(Box::new(containers_running.clone())).unwrap();
        registry
            .register(Box::new(artifacts_storage_bytes.clone()))
            .unwrap();
        registry
            .register(Box::new(deployment_duration_seconds.clone()))
            .unwrap();
        registry.register(Box::new(artifact_upload_bytes.clone())).unwrap();

        Self {
            registry,
            deployments_total,
            artifacts_total,
            artifact_commits_total,
            deployments_active,
            containers_running,
            artifacts_storage_bytes,
            deployment_duration_seconds,
            artifact_upload_bytes,
        }
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
