//! Per-device RSSI smoothing.
//!
//! A scalar Kalman filter: the state is the "true" RSSI, assumed constant
//! between samples apart from a small process-noise drift.  Each device owns
//! its own [`SignalSmoother`]; sharing one across devices mixes their
//! estimates together.

/// Filter parameters.
#[derive(Debug, Clone, Copy)]
pub struct SmootherConfig {
    /// Process-noise variance (how fast the true RSSI is allowed to drift).
    pub process_noise: f64,
    /// Measurement-noise variance of a single RSSI sample.
    pub measurement_noise: f64,
    /// Error covariance right after the first sample seeds the estimate.
    pub initial_error: f64,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            process_noise: 0.125,
            measurement_noise: 4.0,
            initial_error: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignalSmoother {
    cfg: SmootherConfig,
    estimate: Option<f64>,
    error: f64,
}

impl SignalSmoother {
    pub fn new(cfg: SmootherConfig) -> Self {
        Self {
            cfg,
            estimate: None,
            error: cfg.initial_error,
        }
    }

    /// Feed one raw sample, returning the updated estimate.
    ///
    /// The first sample seeds the estimate directly; there is nothing to
    /// correct toward yet.
    pub fn update(&mut self, raw: i16) -> f64 {
        let z = raw as f64;
        let x = match self.estimate {
            None => {
                self.error = self.cfg.initial_error;
                z
            }
            Some(x) => {
                // predict
                let p = self.error + self.cfg.process_noise;
                // update
                let gain = p / (p + self.cfg.measurement_noise);
                self.error = (1.0 - gain) * p;
                x + gain * (z - x)
            }
        };
        self.estimate = Some(x);
        x
    }

    /// Current estimate, `None` until the first sample arrives.
    pub fn estimate(&self) -> Option<f64> {
        self.estimate
    }

    #[cfg(test)]
    pub fn error_covariance(&self) -> f64 {
        self.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_seeds_estimate() {
        let mut s = SignalSmoother::new(SmootherConfig::default());
        assert_eq!(s.estimate(), None);
        assert_eq!(s.update(-70), -70.0);
        assert_eq!(s.estimate(), Some(-70.0));
    }

    #[test]
    fn test_moves_toward_sample() {
        let mut s = SignalSmoother::new(SmootherConfig::default());
        s.update(-70);
        let x = s.update(-60);
        assert!(x > -70.0 && x < -60.0, "estimate {x} not between samples");
    }

    #[test]
    fn test_gain_formula() {
        let cfg = SmootherConfig {
            process_noise: 1.0,
            measurement_noise: 2.0,
            initial_error: 1.0,
        };
        let mut s = SignalSmoother::new(cfg);
        s.update(-80);
        // p = 1 + 1 = 2, k = 2 / (2 + 2) = 0.5
        let x = s.update(-60);
        assert!((x - -70.0).abs() < 1e-9);
        assert!((s.error_covariance() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_stays_within_sample_bounds() {
        let samples: [i16; 12] = [-55, -90, -62, -71, -48, -88, -60, -60, -99, -40, -75, -66];
        let cfg = SmootherConfig::default();
        let mut s = SignalSmoother::new(cfg);
        let mut lo = f64::MAX;
        let mut hi = f64::MIN;
        for &raw in &samples {
            lo = lo.min(raw as f64);
            hi = hi.max(raw as f64);
            let x = s.update(raw);
            assert!(
                x >= lo - cfg.measurement_noise && x <= hi + cfg.measurement_noise,
                "estimate {x} escaped [{lo}, {hi}]"
            );
        }
    }

    #[test]
    fn test_uncertainty_shrinks_on_constant_input() {
        let mut s = SignalSmoother::new(SmootherConfig::default());
        s.update(-65);
        let first = {
            s.update(-65);
            s.error_covariance()
        };
        for _ in 0..20 {
            s.update(-65);
        }
        assert!(s.error_covariance() <= first);
        assert_eq!(s.estimate(), Some(-65.0));
    }

    #[test]
    fn test_instances_are_independent() {
        let cfg = SmootherConfig::default();
        let mut a = SignalSmoother::new(cfg);
        let mut b = SignalSmoother::new(cfg);
        a.update(-40);
        a.update(-42);
        assert_eq!(b.update(-90), -90.0);
    }
}
