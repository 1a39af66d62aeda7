//! MCU Link - Main Entry Point
//!
//! Sets up logging, loads configuration, starts the acquisition core on a
//! tokio runtime and runs the viewer on the main thread.

use anyhow::Context;
use mcu_link::{
    config::{self, AppConfig, AppState},
    Acquisition, McuLinkApp, Transport,
};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install stderr logging plus a daily log file when the data dir is usable.
///
/// The returned guard flushes the file writer and must live until exit.
fn init_logging() -> Option<WorkerGuard> {
    let appender = config::log_dir().and_then(|dir| {
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("mcu-link")
            .filename_suffix("log")
            .build(dir)
            .map_err(|e| eprintln!("File logging disabled: {}", e))
            .ok()
    });
    let (file_layer, guard) = match appender {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mcu_link=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}

fn run_viewer<T: Transport>(
    runtime: &tokio::runtime::Runtime,
    transport: T,
    config: AppConfig,
    app_state: AppState,
) -> anyhow::Result<()> {
    let acquisition = Arc::new(Acquisition::new(transport, &config.acquisition));
    {
        let _enter = runtime.enter();
        acquisition.start();
    }

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 800.0])
            .with_min_inner_size([800.0, 600.0])
            .with_title("MCU Link"),
        ..Default::default()
    };

    let handle = runtime.handle().clone();
    let app_acquisition = Arc::clone(&acquisition);
    let result = eframe::run_native(
        "MCU Link",
        native_options,
        Box::new(move |cc| {
            Ok(Box::new(McuLinkApp::new(
                cc,
                app_acquisition,
                handle,
                config,
                app_state,
            )))
        }),
    );

    tracing::info!("Shutting down...");
    acquisition.shutdown();
    if acquisition.session().is_some() {
        if let Err(e) = runtime.block_on(acquisition.disconnect()) {
            tracing::warn!("Disconnect on exit failed: {}", e);
        }
    }

    result.map_err(|e| anyhow::anyhow!("Viewer failed: {}", e))
}

fn main() -> anyhow::Result<()> {
    let _log_guard = init_logging();
    tracing::info!("Starting MCU Link");

    let config = AppConfig::load_or_default();
    let app_state = AppState::load_or_default();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("mcu-link-acq")
        .build()
        .context("Failed to start async runtime")?;

    #[cfg(feature = "mock-probe")]
    let transport = {
        tracing::info!("Using simulated probe");
        mcu_link::MockTransport::demo()
    };
    #[cfg(not(feature = "mock-probe"))]
    let transport = mcu_link::ProbeRsTransport::new(config.probe.clone());

    run_viewer(&runtime, transport, config, app_state)
}
