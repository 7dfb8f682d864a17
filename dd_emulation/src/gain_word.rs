// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! DD bitstream gain words.
//!
//! Both formats store `gain = 2^X * (1 + Y / 2^m)` with a signed exponent X
//! in the high bits and an unsigned mantissa Y in the low bits:
//!
//! ```text
//!   dynrng (DRC):  XXXYYYYY   X in [-4, 3], Y in [0, 31]
//!   compr:         XXXXYYYY   X in [-8, 7], Y in [0, 15]
//! ```

use serde::Deserialize;
use serde::Serialize;

use crate::dlb_math::DB_PER_BIT;

/// The word for 0 dB in both formats.
pub const DD_GAIN_UNITY: u8 = 0x00;

/// Gains this close to 0 dB encode as [`DD_GAIN_UNITY`].
pub const UNITY_TOLERANCE_DB: f64 = 1e-6;

/// Slack for float noise when comparing a residual against the table.
const MANTISSA_TOLERANCE_DB: f64 = 1e-9;

/// 20 * log10(1 + k / 32) for k in 0..32.
const MANTISSA_DB: [f64; 32] = [
    0.0,
    0.26727923115963004,
    0.5265787744469829,
    0.7783613206073932,
    1.0230504489476258,
    1.2610349149417805,
    1.4926723659380836,
    1.7182925741318644,
    1.9382002601611283,
    2.1526775679965904,
    2.36198624155989,
    2.5663695451936115,
    2.7660539633256285,
    2.9612507091087537,
    3.152157067233362,
    3.3389575923162296,
    3.5218251811136247,
    3.700922034172154,
    3.8764005203222567,
    4.048403955560608,
    4.217067306297864,
    4.382517825617661,
    4.5448756300612505,
    4.704254223486758,
    4.860760973725888,
    5.014497547051708,
    5.165560304860626,
    5.314040666444765,
    5.460025441274753,
    5.603597133817221,
    5.744834223566958,
    5.883811422673515,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GainWordFormat {
    /// Per-block dynrng word.
    Drc,
    /// Per-frame compr word.
    Compr,
}

impl GainWordFormat {
    fn exponent_bits(self) -> u32 {
        match self {
            GainWordFormat::Drc => 3,
            GainWordFormat::Compr => 4,
        }
    }

    fn mantissa_bits(self) -> u32 {
        8 - self.exponent_bits()
    }

    pub fn min_exponent(self) -> i32 {
        -(1 << (self.exponent_bits() - 1))
    }

    pub fn max_exponent(self) -> i32 {
        (1 << (self.exponent_bits() - 1)) - 1
    }

    fn max_mantissa(self) -> usize {
        (1 << self.mantissa_bits()) - 1
    }

    /// Distance between consecutive mantissas in [`MANTISSA_DB`] entries.
    fn mantissa_step(self) -> usize {
        MANTISSA_DB.len() >> self.mantissa_bits()
    }

    fn pack(self, exponent: i32, mantissa: usize) -> u8 {
        let x = (exponent as u8) & ((1 << self.exponent_bits()) - 1);
        (x << self.mantissa_bits()) | mantissa as u8
    }

    fn unpack(self, word: u8) -> (i32, usize) {
        let shift = self.mantissa_bits();
        // Sign-extend the exponent field.
        let x = (word as i8 >> shift) as i32;
        let y = (word & ((1 << shift) - 1)) as usize;
        (x, y)
    }

    /// Largest mantissa whose dB value does not exceed `residual_db`.
    fn search_mantissa(self, residual_db: f64) -> usize {
        let step = self.mantissa_step();
        let limit = residual_db + MANTISSA_TOLERANCE_DB;
        let (mut lo, mut hi) = (0, self.max_mantissa());
        if MANTISSA_DB[hi * step] <= limit {
            return hi;
        }
        // MANTISSA_DB[lo] <= limit < MANTISSA_DB[hi]
        while hi - lo > 1 {
            let mid = (lo + hi) / 2;
            if MANTISSA_DB[mid * step] <= limit {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        lo
    }
}

/// Quantizes a gain in dB to a gain word that never decodes above it.
///
/// Gains below the format's range saturate to the smallest encodable gain,
/// gains above it to the largest.
pub fn encode(gain_db: f64, format: GainWordFormat) -> u8 {
    if gain_db.abs() < UNITY_TOLERANCE_DB || gain_db.is_nan() {
        return DD_GAIN_UNITY;
    }
    let mut x = (gain_db / DB_PER_BIT).floor() as i32;
    if gain_db - (x + 1) as f64 * DB_PER_BIT >= -MANTISSA_TOLERANCE_DB {
        x += 1;
    } else if gain_db - x as f64 * DB_PER_BIT < -MANTISSA_TOLERANCE_DB {
        x -= 1;
    }
    if x < format.min_exponent() {
        return format.pack(format.min_exponent(), 0);
    }
    let x = x.min(format.max_exponent());
    let residual = gain_db - x as f64 * DB_PER_BIT;
    format.pack(x, format.search_mantissa(residual))
}

/// Gain of `word` in dB.
pub fn decode_db(word: u8, format: GainWordFormat) -> f64 {
    let (x, y) = format.unpack(word);
    x as f64 * DB_PER_BIT + MANTISSA_DB[y * format.mantissa_step()]
}

/// Linear gain of `word`.
pub fn decode_linear(word: u8, format: GainWordFormat) -> f64 {
    let (x, y) = format.unpack(word);
    let scale = (1u32 << format.mantissa_bits()) as f64;
    2_f64.powi(x) * (1. + y as f64 / scale)
}
