//! Target-quantile lens: tracks a moving estimate of a chosen quantile via a
//! cheap probabilistic adjustment rather than any sort or reservoir.

use crate::header::{payload, LensHeader, LensType};
use crate::LensResult;
use std::sync::atomic::{AtomicI64, Ordering};

#[repr(C)]
pub struct QuantilePayload {
    /// Target quantile in `(0, 1)`, fixed at allocation time.
    target_quantile: f64,
    /// The estimate's value when `multiplier` was zero.
    original_estimate: f64,
    /// Step size each unit of `multiplier` contributes to the estimate.
    adjustment_value: f64,
    multiplier: AtomicI64,
}

impl QuantilePayload {
    pub const PAYLOAD_LEN: usize = std::mem::size_of::<QuantilePayload>();
}

/// Writes the fixed parameters at allocation time, before the lens is
/// linked into any list a reader could traverse.
pub fn init(
    header: *mut LensHeader,
    target_quantile: f64,
    initial_estimate: f64,
    adjustment_value: f64,
) -> LensResult<()> {
    let ptr = payload::<QuantilePayload>(header, LensType::Quantile)?;
    // SAFETY: `payload` validated the type tag; this runs once, before the
    // lens is visible to any reader.
    unsafe {
        (*ptr).target_quantile = target_quantile;
        (*ptr).original_estimate = initial_estimate;
        (*ptr).adjustment_value = adjustment_value;
        (*ptr).multiplier.store(0, Ordering::Relaxed);
    }
    Ok(())
}

fn estimate(original_estimate: f64, adjustment_value: f64, multiplier: i64) -> f64 {
    original_estimate + (multiplier as f64) * adjustment_value
}

/// Nudges the running estimate toward `value`: draws a coin biased by the
/// target quantile, and walks the multiplier up or down by one depending on
/// which side of the current estimate `value` landed on.
///
/// Unlike `Distribution`, this never sorts or samples: the estimate drifts
/// toward the true quantile over many updates, trading exactness for O(1)
/// memory and a single atomic per write.
pub fn update(header: *mut LensHeader, value: f64) -> LensResult<()> {
    let ptr = payload::<QuantilePayload>(header, LensType::Quantile)?;
    // SAFETY: validated above.
    let (target_quantile, original_estimate, adjustment_value) =
        unsafe { ((*ptr).target_quantile, (*ptr).original_estimate, (*ptr).adjustment_value) };

    let multiplier = unsafe { (*ptr).multiplier.load(Ordering::Relaxed) };
    let current = estimate(original_estimate, adjustment_value, multiplier);

    let smaller_than_quantile = optics_support::gen_prob(target_quantile);
    if value < current && !smaller_than_quantile {
        unsafe { (*ptr).multiplier.fetch_sub(1, Ordering::Release) };
    } else if smaller_than_quantile {
        unsafe { (*ptr).multiplier.fetch_add(1, Ordering::Release) };
    }

    Ok(())
}

/// Reads the current estimate without perturbing `multiplier`.
pub fn read(header: *mut LensHeader) -> LensResult<f64> {
    let ptr = payload::<QuantilePayload>(header, LensType::Quantile)?;
    // SAFETY: validated above.
    let (original_estimate, adjustment_value, multiplier) = unsafe {
        ((*ptr).original_estimate, (*ptr).adjustment_value, (*ptr).multiplier.load(Ordering::Acquire))
    };
    Ok(estimate(original_estimate, adjustment_value, multiplier))
}
