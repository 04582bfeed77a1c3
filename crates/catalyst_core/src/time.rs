use std::time::{Duration, Instant};

pub struct Time {
    last_update: Instant,
    delta: Duration,
    frame_count: u64,
}

impl Default for Time {
    fn default() -> Self {
        Self {
            last_update: Instant::now(),
            delta: Duration::ZERO,
            frame_count: 0,
        }
    }
}

impl Time {
    /// Called by the engine loop once per frame
    pub fn update(&mut self) {
        let now = Instant::now();
        self.delta = now - self.last_update;
        self.last_update = now;
        self.frame_count += 1;
    }

    /// Returns time in seconds since last frame (e.g., 0.016 for 60fps)
    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_counts_frames() {
        let mut time = Time::default();
        time.update();
        time.update();
        assert_eq!(time.frame_count(), 2);
        assert!(time.delta_seconds() >= 0.0);
    }
}
