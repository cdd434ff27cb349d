//! # switchboard
//!
//! Server binary: loads settings, wires the handler registry, tracker and
//! connection registry together and serves WebSocket clients until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use switchboard_core::logging::{LogFormat, init_subscriber};
use switchboard_server::handlers::echo::EchoComponent;
use switchboard_server::{
    Backoff, HandlerRegistry, ServerConfig, SwitchboardServer, TimeoutPolicy, TrackerConfig,
};
use switchboard_settings::{BackoffMode, SwitchboardSettings, load_settings_from_path, settings_path};

/// Switchboard message routing server.
#[derive(Parser, Debug)]
#[command(name = "switchboard", about = "Switchboard message routing server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `~/.switchboard/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,

    /// Skip the built-in `echo` component.
    #[arg(long)]
    no_echo: bool,
}

/// Listener and connection tunables from settings, with CLI overrides.
fn server_config(settings: &SwitchboardSettings, cli: &Cli) -> ServerConfig {
    ServerConfig {
        host: cli.host.clone().unwrap_or_else(|| settings.server.host.clone()),
        port: cli.port.unwrap_or(settings.server.port),
        max_message_size: settings.server.max_message_size,
        ping_interval_secs: settings.server.ping_interval_secs,
        pong_timeout_secs: settings.server.pong_timeout_secs,
        outbound_buffer: settings.server.outbound_buffer,
        max_queued_per_client: settings.connections.max_queued_per_client,
        prune_interval_secs: settings.connections.prune_interval_secs,
        stale_after_secs: settings.connections.stale_after_secs,
    }
}

fn tracker_config(settings: &SwitchboardSettings) -> TrackerConfig {
    let t = &settings.tracker;
    TrackerConfig {
        default_timeout: Duration::from_millis(t.default_timeout_ms),
        max_attempts: t.max_attempts,
        sweep_interval: Duration::from_millis(t.sweep_interval_ms),
        timeout_policy: if t.cancel_on_timeout {
            TimeoutPolicy::Cancel
        } else {
            TimeoutPolicy::Detach
        },
        backoff: match t.backoff {
            BackoffMode::Fixed => Backoff::Fixed,
            BackoffMode::Exponential => Backoff::Exponential {
                initial: Duration::from_millis(t.backoff_initial_ms),
                max: Duration::from_millis(t.backoff_max_ms),
            },
        },
        retention: Duration::from_secs(t.retention_secs),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let path = args.settings.clone().unwrap_or_else(settings_path);
    let settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;

    let level = args.log_level.as_deref().unwrap_or(&settings.logging.level);
    let format = if args.log_json {
        LogFormat::Json
    } else {
        settings.logging.format
    };
    init_subscriber(level, format);

    let mut handlers = HandlerRegistry::new();
    if !args.no_echo {
        handlers.install(&EchoComponent);
    }
    let action_count = handlers.actions().len();

    let metrics_handle = switchboard_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let server = SwitchboardServer::new(server_config(&settings, &args), handlers, tracker_config(&settings))
        .with_metrics(metrics_handle);
    server.start_background();

    let listener = server.bind().await.context("Failed to bind server")?;
    let addr = listener.local_addr().context("Failed to read bound address")?;
    tracing::info!("Switchboard listening on http://{addr} ({action_count} actions registered)");

    let serving = server.serve(listener);
    tokio::pin!(serving);
    tokio::select! {
        res = &mut serving => res.context("Server stopped unexpectedly")?,
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for ctrl-c")?;
            tracing::info!("Shutting down...");
            let aborted = server.shutdown_gracefully(None).await;
            if aborted > 0 {
                tracing::warn!(aborted, "background tasks aborted during shutdown");
            }
            serving.await.context("Server failed while draining")?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
