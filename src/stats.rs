//! Small numeric helpers shared by the estimator and the simulator.

use std::collections::BTreeMap;
use std::f64::consts::TAU;

use rand::Rng;

use crate::types::HistogramBin;

pub const HISTOGRAM_BIN_WIDTH: i64 = 2;

/// Rounds to the nearest integer with halves going up (2.5 -> 3, -2.5 -> -2).
pub fn round_half_up(x: f64) -> i64 {
    (x + 0.5).floor() as i64
}

/// One standard-normal deviate via Box-Muller from two uniform draws.
pub fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    // gen() is in [0, 1); flip it so ln() never sees zero
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
}

pub fn normal_sample<R: Rng + ?Sized>(rng: &mut R, mean: f64, std_dev: f64) -> f64 {
    mean + std_dev * standard_normal(rng)
}

/// Order statistic `sorted[floor(n * f)]`, no interpolation.
pub fn order_statistic(sorted: &[i64], fraction: f64) -> Option<i64> {
    if sorted.is_empty() {
        return None;
    }
    let idx = ((sorted.len() as f64) * fraction).floor() as usize;
    sorted.get(idx.min(sorted.len() - 1)).copied()
}

pub fn bin_of(value: i64) -> i64 {
    value.div_euclid(HISTOGRAM_BIN_WIDTH) * HISTOGRAM_BIN_WIDTH
}

/// Sparse histogram, ascending by bin; empty bins are omitted.
pub fn histogram(values: &[i64]) -> Vec<HistogramBin> {
    let mut counts: BTreeMap<i64, u32> = BTreeMap::new();
    for v in values {
        *counts.entry(bin_of(*v)).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(bin, count)| HistogramBin { bin, count })
        .collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Population standard deviation.
#[cfg(test)]
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / values.len() as f64).sqrt()
}
