//! Indicator value source
//!
//! The real computation engine is not wired in yet. `RandomIndicatorSource`
//! produces placeholder series in plausible ranges so the rest of the
//! pipeline can run end to end.

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

/// Indicator codes in generation order
pub const INDICATOR_CODES: [&str; 19] = [
    // returns
    "twr", "mwr", "twt", "mwt",
    // volatility
    "mdd", "mhw", "psd", "dsd", "usd", "rtd", "rdd", "rud",
    // modern portfolio theory
    "sor", "shr", "rrr", "ifr", "trr", "alf", "bet",
];

/// Pull interface for indicator values
///
/// `generate(len)` returns one series per code, each exactly `len` long.
pub trait IndicatorSource {
    fn codes(&self) -> Vec<String>;

    fn generate(&mut self, len: usize) -> BTreeMap<String, Vec<f64>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Shape {
    Normal { mean: f64, std_dev: f64 },
    Uniform { low: f64, high: f64 },
}

fn shape_for(code: &str) -> Shape {
    match code {
        "twr" => Shape::Normal { mean: 0.001, std_dev: 0.01 },
        "mwr" => Shape::Normal { mean: 0.001, std_dev: 0.015 },
        "twt" | "mwt" => Shape::Uniform { low: 0.0, high: 1.0 },
        "mdd" => Shape::Uniform { low: -0.5, high: 0.0 },
        "mhw" => Shape::Uniform { low: 100.0, high: 200.0 },
        "psd" => Shape::Uniform { low: 0.01, high: 0.05 },
        "dsd" | "usd" => Shape::Uniform { low: 0.005, high: 0.03 },
        "rtd" | "rdd" | "rud" => Shape::Uniform { low: 0.0, high: 0.1 },
        "sor" | "shr" | "trr" => Shape::Uniform { low: 0.0, high: 3.0 },
        "rrr" => Shape::Uniform { low: 0.0, high: 10.0 },
        "ifr" => Shape::Uniform { low: -1.0, high: 1.0 },
        "alf" => Shape::Uniform { low: -0.05, high: 0.05 },
        "bet" => Shape::Uniform { low: 0.5, high: 2.0 },
        _ => Shape::Uniform { low: 0.0, high: 1.0 },
    }
}

/// Placeholder generator for all [`INDICATOR_CODES`]
#[derive(Debug, Clone)]
pub struct RandomIndicatorSource {
    rng: StdRng,
}

impl RandomIndicatorSource {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn series(&mut self, shape: Shape, len: usize) -> Vec<f64> {
        match shape {
            Shape::Uniform { low, high } => {
                let dist = Uniform::new(low, high);
                (0..len).map(|_| dist.sample(&mut self.rng)).collect()
            }
            Shape::Normal { mean, std_dev } => (0..len)
                .map(|_| mean + std_dev * standard_normal(&mut self.rng))
                .collect(),
        }
    }
}

impl Default for RandomIndicatorSource {
    fn default() -> Self {
        Self::new()
    }
}

impl IndicatorSource for RandomIndicatorSource {
    fn codes(&self) -> Vec<String> {
        INDICATOR_CODES.iter().map(|c| c.to_string()).collect()
    }

    fn generate(&mut self, len: usize) -> BTreeMap<String, Vec<f64>> {
        INDICATOR_CODES
            .iter()
            .map(|code| (code.to_string(), self.series(shape_for(code), len)))
            .collect()
    }
}

/// Box-Muller draw from N(0, 1)
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
