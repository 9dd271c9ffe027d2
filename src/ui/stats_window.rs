use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use egui::{pos2, vec2, Color32, CornerRadius, Shape, Stroke, StrokeKind};

use crate::renderer::RendererStats;

const DEFAULT_HISTORY_SECONDS: f32 = 5.0;

#[derive(Clone, Copy, Debug, Default)]
pub struct FrameSample {
    pub timestamp: f32,
    pub frame_time: f32,
    pub renderer: RendererStats,
}

/// Rolling window of frame timings.
#[derive(Clone, Debug)]
pub struct FrameStatsHistory {
    samples: VecDeque<FrameSample>,
    total_elapsed: f32,
    max_history: f32,
}

pub type FrameStatsHandle = Arc<Mutex<FrameStatsHistory>>;

impl FrameStatsHistory {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::new(),
            total_elapsed: 0.0,
            max_history: DEFAULT_HISTORY_SECONDS,
        }
    }

    pub fn handle() -> FrameStatsHandle {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn record(&mut self, dt_seconds: f32, renderer: RendererStats) {
        self.total_elapsed += dt_seconds.max(0.0);
        self.samples.push_back(FrameSample {
            timestamp: self.total_elapsed,
            frame_time: dt_seconds,
            renderer,
        });

        let oldest = self.total_elapsed - self.max_history;
        while self
            .samples
            .front()
            .is_some_and(|sample| sample.timestamp < oldest)
        {
            self.samples.pop_front();
        }
    }

    pub fn latest(&self) -> Option<FrameSample> {
        self.samples.back().copied()
    }

    pub fn average_fps(&self) -> f32 {
        let total: f32 = self.samples.iter().map(|s| s.frame_time).sum();
        if total > 0.0 {
            self.samples.len() as f32 / total
        } else {
            0.0
        }
    }

    pub fn frame_times_ms(&self) -> Vec<f32> {
        self.samples.iter().map(|s| s.frame_time * 1000.0).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl Default for FrameStatsHistory {
    fn default() -> Self {
        Self::new()
    }
}

pub struct StatsWindow {
    stats: FrameStatsHandle,
    // Grows fast and shrinks slowly so the plot does not jump
    smoothed_max_ms: f32,
}

impl StatsWindow {
    pub fn new(stats: FrameStatsHandle) -> Self {
        Self {
            stats,
            smoothed_max_ms: 16.67,
        }
    }

    pub fn show(&mut self, ctx: &egui::Context, open: Option<&mut bool>) {
        let (latest, average_fps, frame_times) = match self.stats.lock() {
            Ok(history) => (
                history.latest(),
                history.average_fps(),
                history.frame_times_ms(),
            ),
            Err(_) => (None, 0.0, Vec::new()),
        };

        let mut window = egui::Window::new("Stats").default_width(280.0);
        if let Some(open) = open {
            window = window.open(open);
        }

        window.show(ctx, |ui| {
            let Some(latest) = latest else {
                ui.label("Waiting for frames...");
                return;
            };

            ui.label(format!("Frame time: {:.2} ms", latest.frame_time * 1000.0));
            ui.label(format!("Average FPS: {average_fps:.1}"));
            self.draw_frame_times(ui, &frame_times);

            ui.separator();
            ui.heading("Sprites");
            ui.label(format!("Frame: {}", latest.renderer.frame_index));
            ui.label(format!("Sprites: {}", latest.renderer.sprites));
            ui.label(format!("Batches: {}", latest.renderer.batches));
            ui.label(format!("Draw calls: {}", latest.renderer.draw_calls));
        });
    }

    fn draw_frame_times(&mut self, ui: &mut egui::Ui, frame_times: &[f32]) {
        if frame_times.len() < 2 {
            return;
        }

        let (response, painter) =
            ui.allocate_painter(vec2(ui.available_width(), 80.0), egui::Sense::hover());
        let rect = response.rect;
        painter.rect_filled(rect, CornerRadius::same(4), Color32::from_gray(25));
        painter.rect_stroke(
            rect,
            CornerRadius::same(4),
            Stroke::new(1.0, Color32::from_gray(60)),
            StrokeKind::Middle,
        );

        let current_max = frame_times.iter().copied().fold(0.001_f32, f32::max);
        let factor = if current_max > self.smoothed_max_ms {
            0.5
        } else {
            0.02
        };
        self.smoothed_max_ms = self.smoothed_max_ms * (1.0 - factor) + current_max * factor;
        let max_ms = self.smoothed_max_ms.max(1.0);

        let step = rect.width() / (frame_times.len() - 1) as f32;
        let points = frame_times
            .iter()
            .enumerate()
            .map(|(i, ms)| {
                let value = (ms / max_ms).clamp(0.0, 1.0);
                pos2(rect.left() + i as f32 * step, rect.bottom() - value * rect.height())
            })
            .collect();
        painter.add(Shape::line(
            points,
            Stroke::new(2.0, Color32::from_rgb(100, 180, 255)),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn old_samples_fall_out_of_the_window() {
        let mut history = FrameStatsHistory::new();
        for _ in 0..10 {
            history.record(1.0, RendererStats::default());
        }

        assert_eq!(history.len(), 6);
        assert_eq!(history.average_fps(), 1.0);
    }
}
