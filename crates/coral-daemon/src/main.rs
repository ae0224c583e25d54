//! Coral Daemon - Main entry point
//!
//! Runs the pose engine, serves the HTTP/WebSocket API, and opens the viewer
//! unless started headless.

mod api;
mod config;
mod server;
mod state;
mod ws;

use anyhow::Result;
use clap::Parser;
use coral_core::SpawnRequest;
use coral_scene::ViewerSettings;
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "coral")]
#[command(about = "Link hierarchy and pose synchronization viewer")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "coral.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run without the viewer window
    #[arg(long)]
    headless: bool,

    /// World description file spawned at startup
    #[arg(short, long)]
    world: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Coral v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;
    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }
    if args.headless {
        config.gui.headless = true;
    }

    info!(
        period_ms = config.engine.pose_period_ms,
        camera_frame = %config.engine.camera_frame,
        headless = config.gui.headless,
        "Configuration loaded"
    );

    let state = state::AppState::new(config.clone());
    let (refresh, discovery) = state.engine.start();

    if let Some(world) = &args.world {
        let outcome = state
            .engine
            .spawn(&SpawnRequest::world(world.display().to_string()))
            .await?;
        info!(path = %world.display(), ?outcome, "World spawned");
    }

    if config.gui.headless {
        server::run(state, config.daemon.bind.clone()).await?;
    } else {
        let server = tokio::spawn({
            let state = state.clone();
            let bind = config.daemon.bind.clone();
            async move {
                if let Err(e) = server::run(state, bind).await {
                    error!(error = %e, "Web server failed");
                }
            }
        });

        let settings = ViewerSettings {
            width: config.gui.width,
            height: config.gui.height,
            camera: config.gui.camera,
            ..Default::default()
        };
        let scene = state.engine.scene();
        // The renderer owns this thread until its window closes
        tokio::task::block_in_place(move || coral_scene::run_viewer(scene, settings));

        info!("Viewer closed, shutting down");
        server.abort();
    }

    refresh.abort();
    if let Some(discovery) = discovery {
        discovery.cancel();
    }
    Ok(())
}
