//! Machine-unit time base.
//!
//! Every timestamp on the real-time timeline is an integer count of
//! machine units (mu). One mu is one period of the controller's reference
//! clock; the period is fixed for a session but configurable.

use crate::error::{RtioError, RtioResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timestamp or duration in machine units.
pub type Mu = i64;

/// Conversion between machine units and real time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBase {
    ref_period_ns: u64,
}

impl Default for TimeBase {
    fn default() -> Self {
        Self { ref_period_ns: 1 }
    }
}

impl TimeBase {
    /// Create a time base from the reference clock period.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the period is below one nanosecond.
    pub fn new(ref_period: Duration) -> RtioResult<Self> {
        let ref_period_ns = u64::try_from(ref_period.as_nanos()).unwrap_or(u64::MAX);
        if ref_period_ns == 0 {
            return Err(RtioError::Config(
                "reference period must be at least 1ns".into(),
            ));
        }
        Ok(Self { ref_period_ns })
    }

    /// Reference clock period.
    #[must_use]
    pub fn ref_period(&self) -> Duration {
        Duration::from_nanos(self.ref_period_ns)
    }

    /// Convert seconds to machine units, rounding to the nearest mu.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn seconds_to_mu(&self, seconds: f64) -> Mu {
        (seconds * 1e9 / self.ref_period_ns as f64).round() as Mu
    }

    /// Convert machine units to seconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mu_to_seconds(&self, mu: Mu) -> f64 {
        mu as f64 * self.ref_period_ns as f64 * 1e-9
    }

    /// Convert a duration to machine units (truncating, saturating at `Mu::MAX`).
    #[must_use]
    pub fn duration_to_mu(&self, duration: Duration) -> Mu {
        let mu = duration.as_nanos() / u128::from(self.ref_period_ns);
        Mu::try_from(mu).unwrap_or(Mu::MAX)
    }

    /// Convert machine units to a duration. Negative values clamp to zero.
    #[must_use]
    pub fn mu_to_duration(&self, mu: Mu) -> Duration {
        let mu = u64::try_from(mu).unwrap_or(0);
        Duration::from_nanos(mu.saturating_mul(self.ref_period_ns))
    }
}
