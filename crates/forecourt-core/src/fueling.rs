// ── Delivery pacing ──
//
// Tank and price validation, the synthetic delivery rate, the running
// gallon counter, and fixed-point display formatting. Pure functions,
// no I/O.

use crate::error::AbortCode;

/// Smallest price the pump will sell at.
pub const MIN_PRICE: f64 = 0.01;

/// Gallons the tank can still take, after checking the hose's readings.
pub fn validate_tank(capacity: f64, current: f64) -> Result<f64, AbortCode> {
    // NaN fails both comparisons.
    if !(capacity >= 0.0 && current >= 0.0) {
        return Err(AbortCode::BadTank);
    }
    if current > capacity {
        return Err(AbortCode::Overfill);
    }
    Ok((capacity - current).max(0.0))
}

pub fn validate_price(price: f64) -> Result<f64, AbortCode> {
    if price.is_nan() {
        return Err(AbortCode::BadPrice);
    }
    if price < 0.0 {
        return Err(AbortCode::NegPrice);
    }
    if price < MIN_PRICE {
        return Err(AbortCode::BadPrice);
    }
    Ok(price)
}

/// Fill level as a step in `0..=10`: `floor(current / capacity * 11)`,
/// clamped. An empty-capacity tank counts as full.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::as_conversions)]
pub fn fill_step(capacity: f64, current: f64) -> u8 {
    if !(capacity > 0.0) {
        return 10;
    }
    let step = (current / capacity * 11.0).floor();
    if step.is_nan() {
        return 10;
    }
    step.clamp(0.0, 10.0) as u8
}

/// Simulated seconds the delivery is paced to take.
pub fn frames_remaining(capacity: f64, current: f64) -> u8 {
    10u8.saturating_sub(fill_step(capacity, current)).max(1)
}

/// Gallons per simulated second.
pub fn delivery_rate(remaining: f64, capacity: f64, current: f64) -> f64 {
    remaining / f64::from(frames_remaining(capacity, current))
}

/// Running total for one delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    target: f64,
    rate: f64,
    dispensed: f64,
    full: bool,
}

impl Delivery {
    pub fn new(target: f64, rate: f64) -> Self {
        Self {
            target,
            rate,
            dispensed: 0.0,
            full: target <= 0.0,
        }
    }

    /// Pace a delivery for a tank at `current` of `capacity` gallons.
    pub fn for_tank(capacity: f64, current: f64) -> Result<Self, AbortCode> {
        let remaining = validate_tank(capacity, current)?;
        Ok(Self::new(remaining, delivery_rate(remaining, capacity, current)))
    }

    /// Accumulate `dt` simulated seconds of flow, stopping at the target.
    pub fn advance(&mut self, dt: f64) -> Result<(), AbortCode> {
        if self.full {
            return Ok(());
        }
        let next = self.dispensed + self.rate * dt;
        if !(next >= 0.0) {
            return Err(AbortCode::NegGal);
        }
        if next >= self.target {
            self.dispensed = self.target;
            self.full = true;
        } else {
            self.dispensed = next;
        }
        Ok(())
    }

    /// The device says the tank is full; stop where we are.
    pub fn mark_full(&mut self) {
        self.full = true;
    }

    pub fn dispensed(&self) -> f64 {
        self.dispensed
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn is_full(&self) -> bool {
        self.full
    }
}

pub fn cost(gallons: f64, price: f64) -> f64 {
    gallons * price
}

/// Three decimals, `.` separator.
pub fn format_gallons(gallons: f64) -> String {
    format!("{gallons:.3}")
}

/// Two decimals, `.` separator, no currency sign.
pub fn format_usd(dollars: f64) -> String {
    format!("{dollars:.2}")
}
