use std::time::Duration;

/// Per-step timing and count data, attached to the world and reset each step.
#[derive(Debug, Default, Clone, Copy)]
pub struct StepProfile {
    pub commit_time: Duration,
    pub broad_phase_time: Duration,
    pub narrow_phase_time: Duration,
    pub island_time: Duration,
    pub solver_time: Duration,
    pub integrator_time: Duration,
    pub total_step_time: Duration,

    pub body_count: usize,
    pub contact_count: usize,
    pub joint_count: usize,
    pub island_count: usize,
    pub awake_island_count: usize,
}

impl StepProfile {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn log_report(&self) {
        let total_us = self.total_step_time.as_micros() as f32;
        if total_us < 1.0 {
            return;
        }

        let ms = |d: Duration| d.as_secs_f32() * 1000.0;
        let pct = |d: Duration| (d.as_micros() as f32 / total_us) * 100.0;

        log::debug!(
            "step {:.2} ms: bodies={} contacts={} joints={} islands={} (awake {})",
            ms(self.total_step_time),
            self.body_count,
            self.contact_count,
            self.joint_count,
            self.island_count,
            self.awake_island_count,
        );
        log::debug!(
            "  commit {:.2} ms ({:.1}%)  broad {:.2} ms ({:.1}%)  narrow {:.2} ms ({:.1}%)",
            ms(self.commit_time),
            pct(self.commit_time),
            ms(self.broad_phase_time),
            pct(self.broad_phase_time),
            ms(self.narrow_phase_time),
            pct(self.narrow_phase_time),
        );
        log::debug!(
            "  islands {:.2} ms ({:.1}%)  solver {:.2} ms ({:.1}%)  integrate {:.2} ms ({:.1}%)",
            ms(self.island_time),
            pct(self.island_time),
            ms(self.solver_time),
            pct(self.solver_time),
            ms(self.integrator_time),
            pct(self.integrator_time),
        );
    }
}
