//! Panel components for the frontend UI
//!
//! Each panel renders from a [`ViewState`] and pushes [`AppAction`]s
//! instead of calling into the acquisition core.
//!
//! # Panels
//!
//! - [`ConnectionPanel`] - Probe list, connect/disconnect, manual target selection
//! - [`VariablePanel`] - Discovered variables grouped by category, sliders for RW variables
//! - [`AcquisitionControlPanel`] - Poll rate, pause/resume and window selection
//! - [`StatusPanel`] - RTT diagnostics and the error log

use super::state::{AppAction, ViewState};
use crate::acquisition::WindowSpec;
use crate::config::POLL_RATE_CHOICES_MS;
use crate::types::{ConnectionState, VariableDescriptor, DEFAULT_CATEGORY};
use egui::{Color32, RichText, Ui};
use std::collections::{BTreeMap, HashMap};

/// Renders the connection status and probe controls
pub struct ConnectionPanel;

impl ConnectionPanel {
    pub fn render(ui: &mut Ui, view: &mut ViewState, detecting: bool, actions: &mut Vec<AppAction>) {
        ui.horizontal(|ui| {
            let status_color = match view.connection {
                ConnectionState::Idle => Color32::GRAY,
                ConnectionState::Connecting | ConnectionState::Disconnecting => Color32::YELLOW,
                ConnectionState::Connected => Color32::GREEN,
            };
            ui.colored_label(status_color, format!("● {}", view.connection));
            ui.separator();

            let selected_text = view
                .probes
                .get(view.selected_probe)
                .map(|p| p.to_string())
                .unwrap_or_else(|| "No probes detected".to_string());
            egui::ComboBox::from_id_salt("probe_select")
                .selected_text(selected_text)
                .width(220.0)
                .show_ui(ui, |ui| {
                    for (index, probe) in view.probes.iter().enumerate() {
                        ui.selectable_value(&mut view.selected_probe, index, probe.to_string());
                    }
                });

            let refresh = ui.add_enabled(!detecting, egui::Button::new("🔄 Refresh"));
            if refresh.clicked() {
                actions.push(AppAction::RefreshProbes);
            }

            match view.connection {
                ConnectionState::Idle => {
                    let can_connect = !view.probes.is_empty();
                    if ui
                        .add_enabled(can_connect, egui::Button::new("🔌 Connect"))
                        .clicked()
                    {
                        actions.push(AppAction::Connect {
                            probe_index: view.selected_probe,
                            target: view.selected_target.clone(),
                        });
                    }
                }
                ConnectionState::Connecting => {
                    ui.add_enabled(false, egui::Button::new("⏳ Connecting..."));
                }
                ConnectionState::Connected => {
                    if ui.button("🔌 Disconnect").clicked() {
                        actions.push(AppAction::Disconnect);
                    }
                }
                ConnectionState::Disconnecting => {
                    ui.add_enabled(false, egui::Button::new("⏳ Disconnecting..."));
                }
            }

            ui.separator();
            Self::render_target_selector(ui, view, actions);

            if let Some(session) = &view.session {
                ui.separator();
                ui.label(format!("{} ({:?})", session.target_name, session.transport));
                if let Some(verification) = &session.chip_verification {
                    if !verification.matched {
                        ui.colored_label(
                            Color32::YELLOW,
                            format!("⚠ detected {}", verification.detected),
                        );
                    }
                }
            }
        });
    }

    fn render_target_selector(ui: &mut Ui, view: &mut ViewState, actions: &mut Vec<AppAction>) {
        let Some(targets) = &view.targets else {
            if ui.button("Select target...").clicked() {
                actions.push(AppAction::LoadTargets);
            }
            return;
        };

        let selected_text = view
            .selected_target
            .clone()
            .unwrap_or_else(|| "Configured target".to_string());
        let mut selected = view.selected_target.clone();
        egui::ComboBox::from_id_salt("target_select")
            .selected_text(selected_text)
            .width(180.0)
            .show_ui(ui, |ui| {
                ui.selectable_value(&mut selected, None, "Configured target");
                if !targets.recommended.is_empty() {
                    ui.label(RichText::new("Recommended").small().weak());
                    for name in &targets.recommended {
                        ui.selectable_value(&mut selected, Some(name.clone()), name.as_str());
                    }
                    ui.separator();
                }
                for family in &targets.families {
                    ui.menu_button(family.name.as_str(), |ui| {
                        for name in &family.variants {
                            ui.selectable_value(&mut selected, Some(name.clone()), name.as_str());
                        }
                    });
                }
            });
        view.selected_target = selected;
    }
}

/// Discovered variables grouped by category
pub struct VariablePanel;

impl VariablePanel {
    pub fn render(
        ui: &mut Ui,
        view: &mut ViewState,
        values: &HashMap<u64, f64>,
        actions: &mut Vec<AppAction>,
    ) {
        ui.horizontal(|ui| {
            ui.heading("Variables");
            if ui
                .add_enabled(view.is_connected(), egui::Button::new("🔍 Discover"))
                .clicked()
            {
                actions.push(AppAction::Discover);
            }
        });
        ui.separator();

        if view.variables.is_empty() {
            ui.colored_label(Color32::GRAY, "No variables discovered");
            return;
        }

        let mut groups: BTreeMap<&str, Vec<&VariableDescriptor>> = BTreeMap::new();
        for var in &view.variables {
            groups.entry(var.category_label()).or_default().push(var);
        }

        egui::ScrollArea::vertical().show(ui, |ui| {
            for (category, vars) in groups {
                let open = category != DEFAULT_CATEGORY;
                egui::CollapsingHeader::new(category)
                    .default_open(open)
                    .show(ui, |ui| {
                        for var in vars {
                            Self::render_variable(ui, var, values, &mut view.pending_writes, actions);
                        }
                    });
            }
        });
    }

    fn render_variable(
        ui: &mut Ui,
        var: &VariableDescriptor,
        values: &HashMap<u64, f64>,
        pending: &mut HashMap<u64, f64>,
        actions: &mut Vec<AppAction>,
    ) {
        ui.horizontal(|ui| {
            ui.label(RichText::new(&var.name).strong());
            ui.label(RichText::new(format!("{} {}", var.var_type, var.access)).small().weak());
        });

        let current = values.get(&var.address).copied();
        if !var.is_writable() {
            let text = current.map_or_else(|| "---".to_string(), |v| format!("{:.3}", v));
            ui.monospace(text);
            return;
        }

        let (min, max) = var
            .bounds
            .map(|b| (b.min, b.max))
            .unwrap_or((0.0, 100.0));
        let slot = pending
            .entry(var.address)
            .or_insert_with(|| current.unwrap_or(min));
        let response = ui.add(egui::Slider::new(slot, min..=max));
        if response.drag_stopped() || (response.changed() && !response.dragged()) {
            actions.push(AppAction::Write {
                address: var.address,
                value: *slot,
            });
        }
    }
}

/// Rate, pause and window controls
pub struct AcquisitionControlPanel;

impl AcquisitionControlPanel {
    pub fn render(ui: &mut Ui, view: &mut ViewState, actions: &mut Vec<AppAction>) {
        ui.horizontal(|ui| {
            ui.label("Rate:");
            let mut interval = view.interval_ms;
            egui::ComboBox::from_id_salt("poll_rate")
                .selected_text(rate_label(interval))
                .show_ui(ui, |ui| {
                    for choice in POLL_RATE_CHOICES_MS {
                        ui.selectable_value(&mut interval, choice, rate_label(choice));
                    }
                });
            if interval != view.interval_ms {
                actions.push(AppAction::SetRate(interval));
            }

            if view.paused {
                if ui.button("▶ Resume").clicked() {
                    actions.push(AppAction::Resume);
                }
                ui.colored_label(Color32::YELLOW, "⏸ Paused");
            } else if ui.button("⏸ Pause").clicked() {
                actions.push(AppAction::Pause);
            }

            if ui.button("🗑 Clear").clicked() {
                actions.push(AppAction::ClearBuffers);
            }

            ui.separator();
            let mut window = view.window;
            let is_time = matches!(window, WindowSpec::TimeSpan { .. });
            if ui.selectable_label(is_time, "Time").clicked() && !is_time {
                window = WindowSpec::default();
            }
            if ui.selectable_label(!is_time, "Count").clicked() && is_time {
                window = WindowSpec::count(500);
            }
            match &mut window {
                WindowSpec::TimeSpan { seconds } => {
                    ui.add(
                        egui::Slider::new(seconds, 0.5..=120.0)
                            .suffix(" s")
                            .logarithmic(true),
                    );
                }
                WindowSpec::Count { samples } => {
                    ui.add(egui::Slider::new(samples, 10..=10_000).logarithmic(true));
                }
            }
            if window != view.window {
                actions.push(AppAction::SetWindow(window));
            }
        });
    }
}

fn rate_label(interval_ms: u64) -> String {
    match interval_ms {
        0 => "Max".to_string(),
        ms => format!("{} ms", ms),
    }
}

/// RTT diagnostics and the error log
pub struct StatusPanel;

impl StatusPanel {
    pub fn render(ui: &mut Ui, view: &ViewState, actions: &mut Vec<AppAction>) {
        ui.horizontal(|ui| {
            match &view.rtt {
                Some(rtt) if rtt.enabled => {
                    ui.colored_label(Color32::GREEN, "RTT");
                    ui.label(format!(
                        "{} channel(s), up {}, down {}",
                        rtt.channels_found,
                        yes_no(rtt.up_channel_available),
                        yes_no(rtt.down_channel_available)
                    ));
                    if let Some(addr) = rtt.control_block_addr {
                        ui.monospace(format!("@0x{:08X}", addr));
                    }
                    ui.label(format!("rx {} B / tx {} B", rtt.bytes_read, rtt.bytes_written));
                }
                Some(_) => {
                    ui.colored_label(Color32::GRAY, "RTT not found");
                }
                None => {
                    ui.colored_label(Color32::GRAY, "RTT unavailable");
                }
            }

            if !view.errors.is_empty() {
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if ui.small_button("Clear").clicked() {
                        actions.push(AppAction::ClearErrors);
                    }
                    ui.colored_label(Color32::RED, format!("⚠ {} error(s)", view.errors.len()));
                });
            }
        });

        if !view.errors.is_empty() {
            egui::CollapsingHeader::new("Error log")
                .default_open(false)
                .show(ui, |ui| {
                    egui::ScrollArea::vertical().max_height(120.0).show(ui, |ui| {
                        for error in view.errors.iter().rev() {
                            ui.colored_label(Color32::LIGHT_RED, error.to_string());
                        }
                    });
                });
        }
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_label() {
        assert_eq!(rate_label(0), "Max");
        assert_eq!(rate_label(100), "100 ms");
    }
}
