use std::time::Duration;

/// Timing and size counters collected over one `step_simulation` call.
#[derive(Debug, Default, Clone, Copy)]
pub struct StepProfile {
    pub broad_phase_time: Duration,
    pub narrow_phase_time: Duration,
    pub island_time: Duration,
    pub solver_time: Duration,
    pub integrator_time: Duration,
    pub total_step_time: Duration,

    pub sub_steps: usize,
    pub body_count: usize,
    pub pair_count: usize,
    pub manifold_count: usize,
    pub contact_count: usize,
    pub awake_island_count: usize,
}

impl StepProfile {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn share(part: Duration, total_us: f32) -> f32 {
        part.as_micros() as f32 / total_us * 100.0
    }

    /// Writes the profile through `log::debug!`.
    pub fn report(&self) {
        let total_us = self.total_step_time.as_micros() as f32;
        if total_us < 1.0 {
            return;
        }

        log::debug!(
            "step: {:.2} ms, {} sub-steps, {} bodies, {} pairs, {} manifolds, {} contacts, {} awake islands",
            self.total_step_time.as_secs_f32() * 1000.0,
            self.sub_steps,
            self.body_count,
            self.pair_count,
            self.manifold_count,
            self.contact_count,
            self.awake_island_count
        );
        log::debug!(
            "  broad {:.1}% | narrow {:.1}% | islands {:.1}% | solver {:.1}% | integrate {:.1}%",
            Self::share(self.broad_phase_time, total_us),
            Self::share(self.narrow_phase_time, total_us),
            Self::share(self.island_time, total_us),
            Self::share(self.solver_time, total_us),
            Self::share(self.integrator_time, total_us),
        );
    }
}
