//! RSSI → distance models.
//!
//! Two interchangeable models are supported, picked on the command line:
//!
//! * **Log-distance path loss**
//!
//!   RSSI = tx_power − 10 · n · log₁₀(d)
//!   ⟹  d = 10^((tx_power − RSSI) / (10 · n))
//!
//! * **Piecewise power fit** (the curve popularised by AltBeacon), driven by
//!   `ratio = RSSI / tx_power`: `ratio^10` below 1, otherwise
//!   `0.89976 · ratio^7.7095 + 0.111`.
//!
//! Both return metres.  An RSSI of exactly 0 means "unknown" and always maps
//! to [`UNKNOWN_DISTANCE`].

use clap::ValueEnum;

/// Distance reported when the signal strength is unknown.
pub const UNKNOWN_DISTANCE: f64 = -1.0;

/// Typical BLE beacon power at 1 m (dBm).
pub const DEFAULT_TX_POWER: f64 = -59.0;

/// Free-space path-loss exponent.
pub const DEFAULT_PATH_LOSS_EXP: f64 = 2.0;

/// An RSSI-to-distance model.
pub trait DistanceModel: Send {
    /// Raw model formula.  Never called with the unknown sentinel.
    fn model(&self, signal: f64) -> f64;

    /// Estimate distance in metres, short-circuiting the unknown sentinel.
    fn estimate(&self, signal: f64) -> f64 {
        if signal == 0.0 {
            return UNKNOWN_DISTANCE;
        }
        self.model(signal)
    }
}

/// Model selection for the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModelKind {
    /// Log-distance path-loss model.
    LogDistance,
    /// Piecewise power fit against the 1 m reference.
    Piecewise,
}

#[derive(Debug, Clone, Copy)]
pub struct LogDistanceModel {
    pub tx_power: f64,
    pub path_loss_exp: f64,
}

impl Default for LogDistanceModel {
    fn default() -> Self {
        Self {
            tx_power: DEFAULT_TX_POWER,
            path_loss_exp: DEFAULT_PATH_LOSS_EXP,
        }
    }
}

impl DistanceModel for LogDistanceModel {
    fn model(&self, signal: f64) -> f64 {
        let exponent = (self.tx_power - signal) / (10.0 * self.path_loss_exp);
        10.0_f64.powf(exponent)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PiecewiseModel {
    pub tx_power: f64,
}

impl Default for PiecewiseModel {
    fn default() -> Self {
        Self {
            tx_power: DEFAULT_TX_POWER,
        }
    }
}

impl DistanceModel for PiecewiseModel {
    fn model(&self, signal: f64) -> f64 {
        let ratio = signal / self.tx_power;
        if ratio < 1.0 {
            ratio.powi(10)
        } else {
            0.89976 * ratio.powf(7.7095) + 0.111
        }
    }
}

/// Build the configured model.
pub fn build_model(kind: ModelKind, tx_power: f64, path_loss_exp: f64) -> Box<dyn DistanceModel> {
    match kind {
        ModelKind::LogDistance => Box::new(LogDistanceModel {
            tx_power,
            path_loss_exp,
        }),
        ModelKind::Piecewise => Box::new(PiecewiseModel { tx_power }),
    }
}
