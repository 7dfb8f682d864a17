// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Numeric primitives in the generic 64-bit float reference semantics.
//!
//! A linear fractional value (`Lfract`) lives in [-1, 1]. Operations named
//! `sat_*` or `shl_*` clamp their result to that range, which is what the
//! fixed-point backends do when an accumulator overflows. Everything else is
//! plain float arithmetic.

use num_traits::Float;

/// A linear fractional sample or coefficient.
pub type Lfract = f64;

pub const LFRACT_MAX: Lfract = 1.0;
pub const LFRACT_MIN: Lfract = -1.0;

/// Headroom reported for an exact zero. Matches a 64-bit accumulator.
pub const NORM_MAX: u32 = 63;

/// 20 * log10(2): the dB weight of one bit of amplitude.
pub const DB_PER_BIT: f64 = 6.020599913279624;

/// One unit of the loudness/headroom log domain: 48 power bits.
pub const DB_PER_LOG_UNIT: f64 = 144.49439791871097;

/// Bits spanned by one log-domain unit.
pub const LOG_UNIT_BITS: f64 = 48.0;

pub fn clip(x: Lfract) -> Lfract {
    x.clamp(LFRACT_MIN, LFRACT_MAX)
}

pub fn sat_add(a: Lfract, b: Lfract) -> Lfract {
    clip(a + b)
}

pub fn sat_sub(a: Lfract, b: Lfract) -> Lfract {
    clip(a - b)
}

pub fn mpy(a: Lfract, b: Lfract) -> Lfract {
    a * b
}

/// Multiply-accumulate without saturation. Accumulators carry headroom.
pub fn mac(acc: f64, a: Lfract, b: Lfract) -> f64 {
    acc + a * b
}

/// Arithmetic left shift with limit clamping.
pub fn shl_limit(x: f64, shift: i32) -> Lfract {
    clip(x * 2_f64.powi(shift))
}

/// Arithmetic right shift. Never saturates.
pub fn shr(x: f64, shift: i32) -> f64 {
    x * 2_f64.powi(-shift)
}

/// Splits `x` into a mantissa in [0.5, 1) and a power-of-two exponent such
/// that `x = mantissa * 2^exponent`. Zero yields (0, 0).
pub fn frexp(x: f64) -> (f64, i32) {
    if x == 0. || !x.is_finite() {
        return (x, 0);
    }
    let (man, exp, sign) = Float::integer_decode(x);
    // `man` has its leading one at bit 52 for normal numbers; subnormals
    // are shorter.
    let bits = 64 - man.leading_zeros() as i32;
    let e = exp as i32 + bits;
    (sign as f64 * man as f64 * 2_f64.powi(-bits), e)
}

/// Number of left shifts `x` survives before its magnitude reaches 1.
pub fn norm(x: f64) -> u32 {
    if x == 0. {
        return NORM_MAX;
    }
    let (_, e) = frexp(x);
    (-e).clamp(0, NORM_MAX as i32) as u32
}

// Quadratic fit of -log2(m) on m in [0.5, 1), exact at both ends and at
// the midpoint.
const LOG2_C0: f64 = 2.6797000057692495;
const LOG2_C1: f64 = 4.0391000173077485;
const LOG2_C2: f64 = 1.359400011538499;

/// Approximates -log2(x) for x > 0: normalise, evaluate a polynomial on the
/// mantissa, and add the exponent as a linear term. Returns +inf for x <= 0.
pub fn neg_log2(x: f64) -> f64 {
    if x <= 0. {
        return f64::INFINITY;
    }
    let (m, e) = frexp(x);
    LOG2_C0 - LOG2_C1 * m + LOG2_C2 * m * m - e as f64
}

/// Converts a power quantity (mean square or squared peak) to the log domain
/// used by the compressor: -log2(x) / 48, clamped to [0, 1]. Silence is 1.0.
pub fn power_to_log_unit(x: f64) -> f64 {
    (neg_log2(x) / LOG_UNIT_BITS).clamp(0., 1.)
}

pub fn log_unit_to_db(level: f64) -> f64 {
    -level * DB_PER_LOG_UNIT
}

pub fn db_to_linear(db: f64) -> f64 {
    10_f64.powf(db / 20.)
}

pub fn linear_to_db(linear: f64) -> f64 {
    if linear <= 0. {
        return -1000.;
    }
    20. * linear.log10()
}
