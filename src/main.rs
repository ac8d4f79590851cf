use std::time::Duration;

use clap::Parser;
use sandbox_gateway::api::build_router;
use sandbox_gateway::config::Args;
use sandbox_gateway::context::AppContext;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter_layer = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info")).unwrap();
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer())
        .init();

    let config = args.config;
    info!(bind_addr = %config.bind_addr, "starting sandbox deployment controller");

    let context = AppContext::new(config).await?;

    let reaper_token = CancellationToken::new();
    let reaper_handle = tokio::spawn(
        context
            .reaper
            .clone()
            .run(context.config.reaper_check_interval(), reaper_token.clone()),
    );

    let router = build_router(context.clone());

    let shutdown_token = reaper_token.clone();
    let server = axum::Server::bind(&context.config.bind_addr)
        .serve(router.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            shutdown_token.cancel();
        });

    if let Err(e) = server.await {
        error!(error = %e, "server error");
    }

    reaper_token.cancel();
    let _ = reaper_handle.await;

    Ok(())
}
