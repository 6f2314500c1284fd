//! Single-diode solar cell model.
//!
//! ```text
//! I = Iph - I0·(exp((V + I·Rs) / (n·Vt)) - 1) - (V + I·Rs) / Rsh
//! ```
//!
//! `I` follows the generator convention (positive while the cell delivers
//! power). The implicit equation is solved by bisection on a bracket that is
//! widened until it contains the root; the residual is monotonic in `I`, so
//! the root is unique.

/// Thermal voltage kT/q at 300 K.
pub const THERMAL_VOLTAGE_300K: f64 = 0.025852;

const BRACKET_EXPANSIONS: usize = 64;
const BISECTION_STEPS: usize = 200;

/// Lumped single-diode parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarCell {
    /// Light-generated current (A).
    pub photocurrent: f64,
    /// Diode saturation current (A).
    pub saturation_current: f64,
    /// Diode ideality factor.
    pub ideality: f64,
    /// Thermal voltage (V).
    pub thermal_voltage: f64,
    /// Series resistance (Ω).
    pub series_resistance: f64,
    /// Shunt resistance (Ω).
    pub shunt_resistance: f64,
}

impl Default for SolarCell {
    fn default() -> Self {
        Self {
            photocurrent: 0.02,
            saturation_current: 1e-10,
            ideality: 1.5,
            thermal_voltage: THERMAL_VOLTAGE_300K,
            series_resistance: 5.0,
            shunt_resistance: 5000.0,
        }
    }
}

impl SolarCell {
    /// Same cell without illumination.
    pub fn dark(self) -> Self {
        Self {
            photocurrent: 0.0,
            ..self
        }
    }

    fn residual(&self, voltage: f64, current: f64) -> f64 {
        let junction = voltage + current * self.series_resistance;
        let diode = self.saturation_current
            * ((junction / (self.ideality * self.thermal_voltage)).exp() - 1.0);
        let shunt = if self.shunt_resistance > 0.0 {
            junction / self.shunt_resistance
        } else {
            0.0
        };
        self.photocurrent - diode - shunt - current
    }

    /// Terminal current at `voltage`.
    pub fn current_at(&self, voltage: f64) -> f64 {
        let (mut lo, mut hi) = (-1.0_f64, 1.0_f64);
        for _ in 0..BRACKET_EXPANSIONS {
            if self.residual(voltage, lo) > 0.0 {
                break;
            }
            lo *= 2.0;
        }
        for _ in 0..BRACKET_EXPANSIONS {
            if self.residual(voltage, hi) < 0.0 {
                break;
            }
            hi *= 2.0;
        }
        bisect(lo, hi, |current| self.residual(voltage, current))
    }

    /// Terminal voltage that drives `current`, limited to `±limit`.
    pub fn voltage_at(&self, current: f64, limit: f64) -> f64 {
        let limit = limit.abs();
        // current_at decreases with voltage
        if self.current_at(limit) >= current {
            return limit;
        }
        if self.current_at(-limit) <= current {
            return -limit;
        }
        bisect(-limit, limit, |voltage| self.current_at(voltage) - current)
    }

    /// Open-circuit voltage.
    pub fn open_circuit_voltage(&self) -> f64 {
        self.voltage_at(0.0, 100.0)
    }
}

/// Root of a decreasing function on `[lo, hi]`.
fn bisect(mut lo: f64, mut hi: f64, f: impl Fn(f64) -> f64) -> f64 {
    for _ in 0..BISECTION_STEPS {
        let mid = 0.5 * (lo + hi);
        if mid <= lo || mid >= hi {
            break;
        }
        if f(mid) > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}
