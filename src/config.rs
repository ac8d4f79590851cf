use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Sandbox deployment controller.
#[derive(Parser, Debug)]
#[command(name = "sandbox-gateway")]
pub struct Args {
    #[command(flatten)]
    pub config: Config,
}

#[derive(Parser, Debug, Clone)]
pub struct Config {
    /// Address the control API binds to.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8000")]
    pub bind_addr: SocketAddr,

    /// Shared secret required on POST/DELETE deploy endpoints. Empty disables the check.
    #[arg(long, env = "WEBHOOK_SECRET", default_value = "")]
    pub webhook_secret: String,

    #[arg(long, env = "DOCKER_NETWORK", default_value = "sandbox-network")]
    pub docker_network: String,

    #[arg(long, env = "CONTAINER_PREFIX", default_value = "sandbox")]
    pub container_prefix: String,

    #[arg(long, env = "SANDBOX_DOMAIN", default_value = "sandbox.nanoswarm.example.com")]
    pub sandbox_domain: String,

    /// Comma-separated list of permitted CORS origins.
    #[arg(long, env = "CORS_ORIGINS", default_value = "", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    #[arg(long, env = "ARTIFACTS_DIR", default_value = "./artifacts")]
    pub artifacts_dir: PathBuf,

    #[arg(long, env = "ARTIFACTS_DB", default_value = "./artifacts.sqlite")]
    pub artifacts_db: PathBuf,

    #[arg(long, env = "GITHUB_TOKEN")]
    pub github_token: Option<String>,

    #[arg(long, env = "GIT_USER_NAME", default_value = "sandbox-gateway")]
    pub git_user_name: String,

    #[arg(long, env = "GIT_USER_EMAIL", default_value = "sandbox-gateway@localhost")]
    pub git_user_email: String,

    #[arg(long, env = "REAPER_CHECK_INTERVAL_SECS", default_value_t = 300)]
    pub reaper_check_interval_secs: u64,

    #[arg(long, env = "REAPER_DEFAULT_TTL_MINUTES", default_value_t = 60)]
    pub reaper_default_ttl_minutes: u32,
}

impl Config {
    pub fn webhook_secret(&self) -> Option<&str> {
        if self.webhook_secret.is_empty() {
            None
        } else {
            Some(&self.webhook_secret)
        }
    }

    pub fn reaper_check_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_check_interval_secs)
    }
}
