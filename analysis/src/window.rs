//! Analysis window functions.
//!
//! Window tables are expensive enough to be worth caching: they are computed
//! once per `(type, size)` pair and shared behind an `Arc` afterwards.

use std::{
    collections::HashMap,
    f32::consts::PI,
    sync::{Arc, Mutex},
};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::errors::{AnalysisError, AnalysisResult};

/// Supported analysis window shapes.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WindowType {
    #[default]
    Hanning,
    Hamming,
    Blackman,
    Kaiser,
    Rectangular,
}

/// Default shape parameter for the Kaiser window.
pub const KAISER_BETA: f32 = 8.6;

static WINDOW_CACHE: Lazy<Mutex<HashMap<(WindowType, usize), Arc<[f32]>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Get the (cached) window table for the given shape and size.
///
/// Windows are symmetric; `Rectangular` is all ones.
///
/// # Errors
///
/// Returns `InvalidParameter` if `size` is zero.
///
/// # Panics
///
/// Panics if the cache mutex was poisoned by a panicking thread.
#[allow(clippy::missing_inline_in_public_items)]
pub fn window(kind: WindowType, size: usize) -> AnalysisResult<Arc<[f32]>> {
    if size == 0 {
        return Err(AnalysisError::InvalidParameter(
            "window size must be at least 1".into(),
        ));
    }

    let mut cache = WINDOW_CACHE.lock().unwrap();
    if let Some(table) = cache.get(&(kind, size)) {
        return Ok(Arc::clone(table));
    }

    let table: Arc<[f32]> = compute(kind, size).into();
    cache.insert((kind, size), Arc::clone(&table));
    Ok(table)
}

/// Multiply `samples` in place by the window table for `kind`.
///
/// `Rectangular` leaves the input untouched.
///
/// # Errors
///
/// Returns `InvalidParameter` if `samples` is empty.
#[allow(clippy::missing_inline_in_public_items)]
pub fn apply(kind: WindowType, samples: &mut [f32]) -> AnalysisResult<()> {
    if kind == WindowType::Rectangular {
        if samples.is_empty() {
            return Err(AnalysisError::InvalidParameter(
                "window size must be at least 1".into(),
            ));
        }
        return Ok(());
    }

    let table = window(kind, samples.len())?;
    for (sample, coefficient) in samples.iter_mut().zip(table.iter()) {
        *sample *= coefficient;
    }
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn compute(kind: WindowType, size: usize) -> Vec<f32> {
    if size == 1 {
        return vec![1.];
    }

    let m = (size - 1) as f32;
    (0..size)
        .map(|i| {
            let n = i as f32;
            match kind {
                WindowType::Hanning => 0.5f32.mul_add(-f32::cos(2. * PI * n / m), 0.5),
                WindowType::Hamming => 0.46f32.mul_add(-f32::cos(2. * PI * n / m), 0.54),
                WindowType::Blackman => {
                    let x = 2. * PI * n / m;
                    0.08f32.mul_add(f32::cos(2. * x), 0.42 - 0.5 * f32::cos(x))
                }
                WindowType::Kaiser => {
                    let ratio = 2. * n / m - 1.;
                    bessel_i0(KAISER_BETA * (1. - ratio * ratio).max(0.).sqrt())
                        / bessel_i0(KAISER_BETA)
                }
                WindowType::Rectangular => 1.,
            }
        })
        .collect()
}

/// Zeroth-order modified Bessel function of the first kind, by power series.
fn bessel_i0(x: f32) -> f32 {
    let half = f64::from(x) / 2.;
    let mut term = 1.0f64;
    let mut sum = 1.0f64;
    for k in 1..64 {
        term *= (half / f64::from(k)) * (half / f64::from(k));
        sum += term;
        if term < sum * 1e-12 {
            break;
        }
    }
    #[allow(clippy::cast_possible_truncation)]
    let result = sum as f32;
    result
}
