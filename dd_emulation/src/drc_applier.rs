// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use serde::Deserialize;
use serde::Serialize;

use crate::channel::channel_samples_mut;
use crate::dlb_math::clip;
use crate::dlb_math::db_to_linear;
use crate::dlb_math::mpy;
use crate::gain_word::decode_db;
use crate::gain_word::decode_linear;
use crate::gain_word::GainWordFormat;

/// Dialnorm the decoder normalizes to, in dB below full scale.
pub const DIALNORM_REFERENCE: u32 = 31;

/// Which word a decoder applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrcType {
    Dynrng,
    Compr,
}

impl DrcType {
    fn format(self) -> GainWordFormat {
        match self {
            DrcType::Dynrng => GainWordFormat::Drc,
            DrcType::Compr => GainWordFormat::Compr,
        }
    }
}

pub fn dynrng_to_gain(word: u8) -> f64 {
    decode_linear(word, GainWordFormat::Drc)
}

pub fn compr_to_gain(word: u8) -> f64 {
    decode_linear(word, GainWordFormat::Compr)
}

/// Attenuation that brings dialogue at `dialnorm` to the reference level.
pub fn dialnorm_gain_db(dialnorm: u32) -> f64 {
    -(DIALNORM_REFERENCE.saturating_sub(dialnorm) as f64)
}

/// Scale factors for the boost and cut parts of a dynrng gain, both in
/// [0, 1].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomBoostCut {
    pub boost: f64,
    pub cut: f64,
}

impl Default for CustomBoostCut {
    fn default() -> Self {
        Self { boost: 1., cut: 1. }
    }
}

/// Everything that makes up the gain of one block.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlockGain {
    pub drc_type: DrcType,
    pub word: u8,
    pub dialnorm_db: f64,
    /// Fixed mode gain on top of the word, e.g. the RF-mode boost.
    pub offset_db: f64,
    pub custom: Option<CustomBoostCut>,
}

impl BlockGain {
    /// A block that passes audio through unchanged.
    pub fn unity() -> Self {
        Self {
            drc_type: DrcType::Dynrng,
            word: 0,
            dialnorm_db: 0.,
            offset_db: 0.,
            custom: None,
        }
    }

    pub fn gain_db(&self) -> f64 {
        let mut word_db = decode_db(self.word, self.drc_type.format());
        if let Some(custom) = self.custom {
            word_db *= if word_db > 0. {
                custom.boost
            } else {
                custom.cut
            };
        }
        word_db + self.offset_db + self.dialnorm_db
    }

    pub fn linear(&self) -> f64 {
        match self.custom {
            Some(_) => db_to_linear(self.gain_db()),
            None => {
                decode_linear(self.word, self.drc_type.format())
                    * db_to_linear(self.offset_db + self.dialnorm_db)
            }
        }
    }
}

/// Applies block gains to one output, ramping linearly from the previous
/// block's gain so that gain changes do not click.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GainApplier {
    last_gain: Option<f64>,
}

impl GainApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.last_gain = None;
    }

    /// Linear gain reached at the end of the last block, if any.
    pub fn last_gain(&self) -> Option<f64> {
        self.last_gain
    }

    /// Multiplies `len` samples of each of `channels` in the interleaved
    /// `pcm` by a gain ramping towards `gain`. The first block after a reset
    /// starts at `gain`.
    pub fn apply_block(
        &mut self,
        gain: f64,
        pcm: &mut [f64],
        stride: usize,
        channels: &[usize],
        len: usize,
    ) {
        let start = self.last_gain.unwrap_or(gain);
        let step = (gain - start) / len as f64;
        for &ch in channels {
            for (n, x) in channel_samples_mut(pcm, ch, stride).take(len).enumerate() {
                let g = start + step * (n + 1) as f64;
                *x = clip(mpy(*x, g));
            }
        }
        self.last_gain = Some(gain);
    }

    /// Applies the last gain unchanged to `len` samples. Used for samples
    /// after the last full block.
    pub fn apply_hold(&self, pcm: &mut [f64], stride: usize, channels: &[usize], len: usize) {
        let gain = self.last_gain.unwrap_or(1.);
        for &ch in channels {
            for x in channel_samples_mut(pcm, ch, stride).take(len) {
                *x = clip(mpy(*x, gain));
            }
        }
    }
}
