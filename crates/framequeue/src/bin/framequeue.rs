//! # FRAMEQUEUE Demo Binary
//!
//! ```bash
//! # Defaults: 300 frames at 60 FPS, 5000 cubes
//! framequeue
//!
//! # From a config file, with barrier arrivals logged
//! RUST_LOG=framequeue_core=debug framequeue demo.toml
//! ```

use std::process::ExitCode;

use framequeue::{run, DemoConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let config = match std::env::args_os().nth(1) {
        Some(path) => match DemoConfig::load(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("framequeue: {err}");
                return ExitCode::from(2);
            }
        },
        None => DemoConfig::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .init();

    match run(&config) {
        Ok(summary) => {
            info!(
                frames = summary.frames,
                logic_ticks = summary.logic_ticks,
                physics_ticks = summary.physics_ticks,
                avg_frame_ms = summary.avg_frame_ms,
                "done"
            );
            for line in &summary.last_hud {
                info!("{line}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
