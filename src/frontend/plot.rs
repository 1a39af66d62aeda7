//! Plot rendering module using egui_plot
//!
//! One small plot per polled variable. Points come from the window
//! projection of that variable's buffer; x is seconds relative to now
//! (negative into the past), y the sample value.

use crate::acquisition::{to_plot_points, WindowSpec};
use crate::config::DisplayConfig;
use crate::types::{Sample, VariableDescriptor};
use egui::{Color32, Ui};
use egui_plot::{Corner, Legend, Line, Plot, PlotPoints};
use std::time::Instant;

/// Line colors cycled across variables
const PALETTE: [Color32; 6] = [
    Color32::from_rgb(100, 180, 255),
    Color32::from_rgb(255, 140, 90),
    Color32::from_rgb(120, 220, 120),
    Color32::from_rgb(230, 110, 200),
    Color32::from_rgb(240, 210, 90),
    Color32::from_rgb(150, 150, 255),
];

/// Plot configuration shared by every variable plot
#[derive(Debug, Clone)]
pub struct PlotView {
    pub height: f32,
    pub show_legend: bool,
    pub line_width: f32,
}

impl Default for PlotView {
    fn default() -> Self {
        Self {
            height: 160.0,
            show_legend: true,
            line_width: 1.5,
        }
    }
}

impl PlotView {
    pub fn from_config(config: &DisplayConfig) -> Self {
        Self {
            height: config.plot_height,
            show_legend: config.show_legend,
            ..Default::default()
        }
    }

    /// Render one variable's projected samples
    pub fn render_variable(
        &self,
        ui: &mut Ui,
        index: usize,
        var: &VariableDescriptor,
        samples: &[Sample],
        window: &WindowSpec,
        now: Instant,
    ) {
        let points = to_plot_points(samples, now);

        let mut plot = Plot::new(("variable_plot", var.address))
            .height(self.height)
            .allow_scroll(false)
            .show_axes(true)
            .x_axis_label("Time (s)");
        if self.show_legend {
            plot = plot.legend(Legend::default().position(Corner::LeftTop));
        }
        if let WindowSpec::TimeSpan { seconds } = window {
            plot = plot.include_x(-*seconds).include_x(0.0);
        }

        let color = PALETTE[index % PALETTE.len()];
        let label = series_label(var, samples.last());
        plot.show(ui, |plot_ui| {
            if points.is_empty() {
                return;
            }
            let line = Line::new(label, PlotPoints::from(points))
                .color(color)
                .width(self.line_width);
            plot_ui.line(line);
        });
    }
}

/// Legend text: name plus the most recent value
fn series_label(var: &VariableDescriptor, latest: Option<&Sample>) -> String {
    match latest {
        Some(sample) => format!("{} = {:.3}", var.name, sample.value),
        None => var.name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccessMode, VarType};

    #[test]
    fn test_series_label() {
        let var = VariableDescriptor::new("temp", 0x2000_0000, VarType::F32, AccessMode::ReadOnly);
        assert_eq!(series_label(&var, None), "temp");
        let sample = Sample::new(Instant::now(), 21.25);
        assert_eq!(series_label(&var, Some(&sample)), "temp = 21.250");
    }

    #[test]
    fn test_plot_view_from_config() {
        let config = DisplayConfig {
            plot_height: 240.0,
            show_legend: false,
            ..Default::default()
        };
        let view = PlotView::from_config(&config);
        assert_eq!(view.height, 240.0);
        assert!(!view.show_legend);
    }
}
