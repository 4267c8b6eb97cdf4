use std::f64::consts::PI;

/// A learning rate that ramps up linearly from zero, plateaus and then eases down to zero
/// following half a cosine.
///
/// Computed in `f64` so the same progress always yields the same rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampSchedule {
    initial_lr: f64,
    rampdown_length: f64,
    rampup_length: f64,
}

impl RampSchedule {
    pub const RAMPDOWN_LENGTH: f64 = 0.4;
    pub const RAMPUP_LENGTH: f64 = 0.1;

    /// Creates a schedule with the default ramp lengths.
    pub fn new(initial_lr: f64) -> Self {
        Self::with_lengths(initial_lr, Self::RAMPDOWN_LENGTH, Self::RAMPUP_LENGTH)
    }

    /// # Arguments
    /// * `initial_lr` - The plateau learning rate.
    /// * `rampdown_length` - The fraction of training spent ramping down.
    /// * `rampup_length` - The fraction of training spent ramping up.
    pub fn with_lengths(initial_lr: f64, rampdown_length: f64, rampup_length: f64) -> Self {
        Self {
            initial_lr,
            rampdown_length,
            rampup_length,
        }
    }

    pub fn initial_lr(&self) -> f64 {
        self.initial_lr
    }

    /// Returns the learning rate at training progress `t`, in `[0, 1)`.
    pub fn lr_at(&self, t: f64) -> f64 {
        let mut ramp = ((1.0 - t) / self.rampdown_length).min(1.0);
        ramp = 0.5 - 0.5 * (ramp * PI).cos();
        ramp *= (t / self.rampup_length).min(1.0);

        self.initial_lr * ramp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        assert_eq!(RampSchedule::new(0.01).lr_at(0.0), 0.0);
    }

    #[test]
    fn plateau_is_the_initial_lr() {
        let schedule = RampSchedule::new(0.01);

        assert_eq!(schedule.lr_at(0.2), 0.01);
        assert_eq!(schedule.lr_at(0.6), 0.01);
    }

    #[test]
    fn ramps_down_towards_zero() {
        let schedule = RampSchedule::new(0.01);
        let end = schedule.lr_at(1.0 - 1e-6);

        assert!(end > 0.0);
        assert!(end < 1e-9);
        assert!(schedule.lr_at(0.8) < schedule.lr_at(0.7));
    }

    #[test]
    fn ramps_up_linearly() {
        let schedule = RampSchedule::new(1.0);

        assert!((schedule.lr_at(0.05) - 0.5).abs() < 1e-12);
    }
}
