mod egui_integration;
mod stats_window;

pub use egui;
pub use egui_integration::{EguiOverlay, EguiUiCallback};
pub use stats_window::{FrameSample, FrameStatsHandle, FrameStatsHistory, StatsWindow};
