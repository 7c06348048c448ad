//! Per-frame context and frame-rate bookkeeping.

/// Context for the frame about to be drawn.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    /// Delta time since last frame in seconds.
    pub dt: f32,
    /// Number of frames presented so far.
    pub frame_number: u64,
    /// Current framebuffer width in pixels.
    pub width: u32,
    /// Current framebuffer height in pixels.
    pub height: u32,
}

impl FrameContext {
    pub(crate) const fn new(dt: f32, frame_number: u64, width: u32, height: u32) -> Self {
        Self {
            dt,
            frame_number,
            width,
            height,
        }
    }

    /// Width over height, or 1.0 for a zero-height framebuffer.
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// Min/max/average frame rate over a run.
#[derive(Debug, Clone, Copy)]
pub struct FrameStats {
    min_fps: f64,
    max_fps: f64,
    fps_sum: f64,
    samples: u64,
}

impl Default for FrameStats {
    fn default() -> Self {
        Self {
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
            samples: 0,
        }
    }
}

impl FrameStats {
    /// Record one frame that took `dt` seconds. Zero-length frames are
    /// ignored.
    pub fn record(&mut self, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        let fps = 1.0 / dt;
        self.min_fps = self.min_fps.min(fps);
        self.max_fps = self.max_fps.max(fps);
        self.fps_sum += fps;
        self.samples += 1;
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn min_fps(&self) -> Option<f64> {
        (self.samples > 0).then_some(self.min_fps)
    }

    pub fn max_fps(&self) -> Option<f64> {
        (self.samples > 0).then_some(self.max_fps)
    }

    pub fn avg_fps(&self) -> Option<f64> {
        (self.samples > 0).then(|| self.fps_sum / self.samples as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn empty_stats_report_nothing() {
        let stats = FrameStats::default();
        assert_eq!(stats.samples(), 0);
        assert!(stats.min_fps().is_none());
        assert!(stats.avg_fps().is_none());
    }

    #[test]
    fn stats_track_min_max_avg() {
        let mut stats = FrameStats::default();
        stats.record(1.0 / 30.0);
        stats.record(1.0 / 60.0);
        stats.record(0.0);

        assert_eq!(stats.samples(), 2);
        assert_relative_eq!(stats.min_fps().unwrap(), 30.0, epsilon = 1e-9);
        assert_relative_eq!(stats.max_fps().unwrap(), 60.0, epsilon = 1e-9);
        assert_relative_eq!(stats.avg_fps().unwrap(), 45.0, epsilon = 1e-9);
    }

    #[test]
    fn aspect_ratio_handles_zero_height() {
        assert_relative_eq!(FrameContext::new(0.0, 0, 800, 600).aspect_ratio(), 800.0 / 600.0);
        assert_relative_eq!(FrameContext::new(0.0, 0, 800, 0).aspect_ratio(), 1.0);
    }
}
