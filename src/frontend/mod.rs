//! Frontend module for egui UI
//!
//! A thin viewer over the acquisition core. It subscribes to the core's
//! event bus, keeps a [`ViewState`] up to date from those events, and turns
//! panel interactions into tasks on the tokio runtime. Plots read the
//! polling engine's buffers only through the window projection.
//!
//! # Layout
//!
//! - Top: probe selection, connect/disconnect, target selection
//! - Left: variables grouped by category
//! - Center: rate/pause/window controls and one plot per polled variable
//! - Bottom: RTT status and error log

mod panels;
mod plot;
pub mod state;

pub use panels::*;
pub use plot::PlotView;
pub use state::{AppAction, ViewState};

use crate::acquisition::{drain, Acquisition, AcquisitionEvent, ConnectRequest};
use crate::backend::{recommended_targets, Transport};
use crate::config::{AppConfig, AppState};
use crate::error::Result;
use crate::types::{AvailableTargets, Session};
use crossbeam_channel::{bounded, Receiver};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Repaint cadence while nothing is streaming
const IDLE_REPAINT: Duration = Duration::from_millis(250);

/// Main application state implementing [`eframe::App`]
pub struct McuLinkApp<T: Transport> {
    acquisition: Arc<Acquisition<T>>,
    runtime: tokio::runtime::Handle,
    events: Receiver<AcquisitionEvent>,
    view: ViewState,
    plot: PlotView,
    config: AppConfig,
    app_state: AppState,
    targets_rx: Option<Receiver<AvailableTargets>>,
}

impl<T: Transport> McuLinkApp<T> {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        acquisition: Arc<Acquisition<T>>,
        runtime: tokio::runtime::Handle,
        config: AppConfig,
        app_state: AppState,
    ) -> Self {
        if app_state.dark_mode {
            cc.egui_ctx.set_visuals(egui::Visuals::dark());
        } else {
            cc.egui_ctx.set_visuals(egui::Visuals::light());
        }

        let events = acquisition.subscribe();
        let mut view = ViewState::new(config.acquisition.poll_interval_ms, config.display.window);
        view.selected_target = app_state.last_target_chip.clone();

        let mut app = Self {
            acquisition,
            runtime,
            events,
            view,
            plot: PlotView::from_config(&config.display),
            config,
            app_state,
            targets_rx: None,
        };
        // Startup detection makes the one automatic connect attempt
        app.handle_action(AppAction::RefreshProbes);
        app
    }

    /// Run an acquisition call on the runtime; failures were already
    /// published as events, so they are only traced here
    fn spawn<F, Fut>(&self, operation: &'static str, f: F)
    where
        F: FnOnce(Arc<Acquisition<T>>) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let task = f(Arc::clone(&self.acquisition));
        self.runtime.spawn(async move {
            if let Err(e) = task.await {
                tracing::debug!(operation, "UI action failed: {}", e);
            }
        });
    }

    fn handle_action(&mut self, action: AppAction) {
        tracing::trace!(?action, "Handling UI action");
        match action {
            AppAction::RefreshProbes => self.spawn("detect", |acq| async move {
                acq.detect_probes().await.map(|_| ())
            }),
            AppAction::Connect {
                probe_index,
                target,
            } => {
                let mut request = ConnectRequest::new(probe_index).manual(true);
                request.target = target;
                self.spawn("connect", |acq| async move {
                    acq.connect(request).await.map(|_| ())
                });
            }
            AppAction::Disconnect => {
                self.spawn("disconnect", |acq| async move { acq.disconnect().await })
            }
            AppAction::Discover => {
                let address = self.config.acquisition.descriptor_address;
                self.spawn("discover", move |acq| async move {
                    acq.discover(address).await.map(|_| ())
                });
            }
            AppAction::LoadTargets => self.load_targets(),
            AppAction::Write { address, value } => {
                self.spawn("write", move |acq| async move { acq.write(address, value).await })
            }
            AppAction::SetRate(interval_ms) => self.acquisition.poller().set_rate(interval_ms),
            AppAction::Pause => self.acquisition.poller().pause(),
            AppAction::Resume => self.acquisition.poller().resume(),
            AppAction::ClearBuffers => self.acquisition.poller().clear_buffers(),
            AppAction::SetWindow(window) => {
                self.view.window = window;
                self.config.display.window = window;
            }
            AppAction::ClearErrors => self.view.errors.clear(),
        }
    }

    fn load_targets(&mut self) {
        if self.targets_rx.is_some() {
            return;
        }
        let (tx, rx) = bounded(1);
        self.targets_rx = Some(rx);
        self.spawn("available_targets", move |acq| async move {
            let mut targets = acq.transport().available_targets().await?;
            if targets.recommended.is_empty() {
                targets.recommended = recommended_targets(&targets.families);
            }
            let _ = tx.send(targets);
            Ok(())
        });
    }

    fn process_events(&mut self) -> bool {
        let events = drain(&self.events);
        let had_events = !events.is_empty();
        for event in events {
            if let AcquisitionEvent::ConnectionChanged(Some(session)) = &event {
                self.remember_connection(session);
            }
            self.view.apply(event);
        }

        if let Some(rx) = &self.targets_rx {
            match rx.try_recv() {
                Ok(targets) => {
                    self.view.targets = Some(targets);
                    self.targets_rx = None;
                }
                Err(crossbeam_channel::TryRecvError::Disconnected) => self.targets_rx = None,
                Err(crossbeam_channel::TryRecvError::Empty) => {}
            }
        }
        had_events
    }

    fn remember_connection(&mut self, session: &Session) {
        let serial = self
            .view
            .probes
            .get(self.view.selected_probe)
            .and_then(|p| p.serial_number.clone());
        self.app_state
            .update_last_connection(&session.target_name, serial.as_deref());
        if let Err(e) = self.app_state.save() {
            tracing::warn!("Failed to save app state: {}", e);
        }
    }

    fn render_plots(ui: &mut egui::Ui, acquisition: &Acquisition<T>, view: &ViewState, plot: &PlotView) {
        let now = Instant::now();
        let mut plotted = 0;
        egui::ScrollArea::vertical().show(ui, |ui| {
            for (index, var) in view.plotted_variables().enumerate() {
                let samples = acquisition.poller().project(var.address, &view.window, now);
                plot.render_variable(ui, index, var, &samples, &view.window, now);
                plotted += 1;
            }
        });
        if plotted == 0 {
            ui.centered_and_justified(|ui| {
                ui.label("Connect and discover variables to start plotting");
            });
        }
    }
}

impl<T: Transport> eframe::App for McuLinkApp<T> {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let had_events = self.process_events();
        let detecting = self.acquisition.connection().is_detecting();
        let values = self.acquisition.registry().values();
        let mut actions = Vec::new();

        egui::TopBottomPanel::top("connection_bar").show(ctx, |ui| {
            ConnectionPanel::render(ui, &mut self.view, detecting, &mut actions);
        });

        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            StatusPanel::render(ui, &self.view, &mut actions);
        });

        egui::SidePanel::left("variables")
            .default_width(280.0)
            .show(ctx, |ui| {
                VariablePanel::render(ui, &mut self.view, &values, &mut actions);
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            AcquisitionControlPanel::render(ui, &mut self.view, &mut actions);
            ui.separator();
            Self::render_plots(ui, &self.acquisition, &self.view, &self.plot);
        });

        for action in actions {
            self.handle_action(action);
        }

        if (self.view.is_connected() && !self.view.paused) || had_events {
            ctx.request_repaint();
        } else {
            ctx.request_repaint_after(IDLE_REPAINT);
        }
    }
}
