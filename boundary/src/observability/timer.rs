use std::time::Instant;

/// Measures one stage attempt sequence.
#[derive(Debug)]
pub struct StageTimer {
    start: Instant,
    stage: String,
}

impl StageTimer {
    /// Starts timing `stage`.
    #[must_use]
    pub fn start(stage: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            stage: stage.into(),
        }
    }

    /// Elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// The timed stage.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Logs the duration and returns it.
    pub fn finish(self, succeeded: bool) -> f64 {
        let duration_ms = self.elapsed_ms();
        tracing::debug!(stage = %self.stage, duration_ms, succeeded, "Stage finished");
        duration_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_timer() {
        let timer = StageTimer::start("snapshot");
        assert_eq!(timer.stage(), "snapshot");
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(timer.finish(true) >= 10.0);
    }
}
