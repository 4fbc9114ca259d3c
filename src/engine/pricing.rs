use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::config::FareConfig;

/// Fare quote for a trip between two location descriptors.
pub trait Pricing: Send + Sync {
    fn quote(&self, start: &str, end: &str) -> Decimal;
}

/// Uniform placeholder fare in `[min, max]`, to two decimal places.
pub struct RandomFare {
    min_cents: i64,
    max_cents: i64,
}

impl RandomFare {
    pub fn new(min: Decimal, max: Decimal) -> Self {
        Self {
            min_cents: to_cents(min),
            max_cents: to_cents(max).max(to_cents(min)),
        }
    }
}

impl Pricing for RandomFare {
    fn quote(&self, _start: &str, _end: &str) -> Decimal {
        let cents = rand::thread_rng().gen_range(self.min_cents..=self.max_cents);
        Decimal::new(cents, 2)
    }
}

pub struct FixedFare(pub Decimal);

impl Pricing for FixedFare {
    fn quote(&self, _start: &str, _end: &str) -> Decimal {
        self.0.round_dp(2)
    }
}

pub fn from_config(config: &FareConfig) -> Box<dyn Pricing> {
    match config {
        FareConfig::Random { min, max } => Box::new(RandomFare::new(*min, *max)),
        FareConfig::Fixed(amount) => Box::new(FixedFare(*amount)),
    }
}

fn to_cents(amount: Decimal) -> i64 {
    let cents = (amount.round_dp(2) * Decimal::ONE_HUNDRED).trunc();
    cents.to_i64().unwrap_or(i64::MAX)
}
