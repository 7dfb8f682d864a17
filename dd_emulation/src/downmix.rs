// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Worst-case stereo downmix peak estimation.
//!
//! A decoder may fold a multichannel program down to two channels with any of
//! five matrices. The compressor has to keep every one of them below full
//! scale, so each block is mixed through all active matrices and the largest
//! resulting sample is reported.

use bitflags::bitflags;
use serde::Deserialize;
use serde::Serialize;

use crate::channel::MixRole;
use crate::channel::Side;
use crate::dlb_math::db_to_linear;
use crate::dlb_math::mac;

bitflags! {
    /// Which downmix matrices take part in the worst-case estimation.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DownmixFlags: u32 {
        const LORO_CUSTOM = 1 << 0;
        const LTRT_DEFAULT = 1 << 1;
        const LTRT_CUSTOM = 1 << 2;
        const PLII_DEFAULT = 1 << 3;
        const ITU = 1 << 4;
    }
}

impl Default for DownmixFlags {
    fn default() -> Self {
        DownmixFlags::all()
    }
}

pub const NUM_DOWNMIXES: usize = 5;

/// +1 dB, rolled into every coefficient to match the reference decoder
/// calibration.
pub const DOWNMIX_COMPENSATION: f64 = 1.1220184543019633;

/// Gain of the estimation accumulators. With mix levels at or below 0 dB no
/// matrix sums to 8 at full scale, so every descriptor peak stays below 1.
/// [`Downmixer::block_peak`] divides it back out.
pub const DOWNMIX_GLOBAL_GAIN: f64 = 0.125;

/// Split of a single surround channel to both sides.
const MONO_SURROUND_SPLIT: f64 = 0.7071067811865476;

const MINUS_3DB: f64 = 0.7071067811865476;

/// Caller-selected mix levels of a custom downmix, in dB.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownmixLevels {
    pub center_db: f64,
    pub surround_db: f64,
}

impl Default for DownmixLevels {
    fn default() -> Self {
        Self {
            center_db: -3.,
            surround_db: -3.,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DownmixDescriptor {
    pub flag: DownmixFlags,
    /// The surround contribution to the left output is subtracted (matrix
    /// surround encoding).
    pub phase_invert_left: bool,
    pub center: f64,
    /// Surround gain into the output on the same side.
    pub surr_own: f64,
    /// Surround gain into the output on the opposite side.
    pub surr_opp: f64,
    /// Largest absolute downmix sample of the last processed block, scaled
    /// by [`DOWNMIX_GLOBAL_GAIN`].
    pub peak: f64,
}

impl DownmixDescriptor {
    const fn new(
        flag: DownmixFlags,
        phase_invert_left: bool,
        center: f64,
        surr_own: f64,
        surr_opp: f64,
    ) -> Self {
        Self {
            flag,
            phase_invert_left,
            center,
            surr_own,
            surr_opp,
            peak: 0.,
        }
    }

    /// Effective coefficients with `scale` and the compensation applied.
    fn gains(&self, scale: f64) -> MixGains {
        let scale = scale * DOWNMIX_COMPENSATION;
        let left_sign = if self.phase_invert_left { -1. } else { 1. };
        MixGains {
            direct: scale,
            center: self.center * scale,
            own: self.surr_own * scale,
            opp: self.surr_opp * scale,
            left_sign,
        }
    }

    /// Folds one frame down to the (left, right) pair a decoder would play.
    /// `roles` maps frame slots to mix roles. The result is not clamped.
    pub fn mix(&self, roles: &[(usize, MixRole)], frame: &[f64]) -> (f64, f64) {
        Self::mix_with(&self.gains(1.), roles, frame)
    }

    fn mix_with(g: &MixGains, roles: &[(usize, MixRole)], frame: &[f64]) -> (f64, f64) {
        let mut l = 0.;
        let mut r = 0.;
        for &(ch, role) in roles {
            let x = frame[ch];
            match role {
                MixRole::Left => l = mac(l, g.direct, x),
                MixRole::Right => r = mac(r, g.direct, x),
                MixRole::Center => {
                    l = mac(l, g.center, x);
                    r = mac(r, g.center, x);
                }
                MixRole::Surround(Side::Left) => {
                    l = mac(l, g.left_sign * g.own, x);
                    r = mac(r, g.opp, x);
                }
                MixRole::Surround(Side::Right) => {
                    l = mac(l, g.left_sign * g.opp, x);
                    r = mac(r, g.own, x);
                }
                MixRole::SurrMono => {
                    let s = g.own * MONO_SURROUND_SPLIT;
                    l = mac(l, g.left_sign * s, x);
                    r = mac(r, s, x);
                }
                MixRole::None => {}
            }
        }
        (l, r)
    }

    /// Peak of this matrix over `frames`, each holding one sample per entry
    /// of `roles`, at the global gain.
    fn mix_peak<'a, I>(&self, roles: &[(usize, MixRole)], frames: I) -> f64
    where
        I: IntoIterator<Item = &'a [f64]>,
    {
        let g = self.gains(DOWNMIX_GLOBAL_GAIN);
        frames.into_iter().fold(0., |peak: f64, frame| {
            let (l, r) = Self::mix_with(&g, roles, frame);
            peak.max(l.abs()).max(r.abs())
        })
    }
}

struct MixGains {
    direct: f64,
    center: f64,
    own: f64,
    opp: f64,
    left_sign: f64,
}

use DownmixFlags as F;

// flag, invert left, center, own-side surround, opposite-side surround
const LORO_CUSTOM: DownmixDescriptor =
    DownmixDescriptor::new(F::LORO_CUSTOM, false, MINUS_3DB, MINUS_3DB, 0.);
const LTRT_DEFAULT: DownmixDescriptor =
    DownmixDescriptor::new(F::LTRT_DEFAULT, true, MINUS_3DB, MINUS_3DB, MINUS_3DB);
const LTRT_CUSTOM: DownmixDescriptor =
    DownmixDescriptor::new(F::LTRT_CUSTOM, true, MINUS_3DB, MINUS_3DB, MINUS_3DB);
const PLII_DEFAULT: DownmixDescriptor =
    DownmixDescriptor::new(F::PLII_DEFAULT, true, MINUS_3DB, 0.8718, 0.4899);
const ITU: DownmixDescriptor = DownmixDescriptor::new(F::ITU, false, MINUS_3DB, MINUS_3DB, 0.);

/// The five downmix descriptors of one compressor and the downmix peak
/// carried over from the previous block.
#[derive(Clone, Debug, PartialEq)]
pub struct Downmixer {
    descriptors: [DownmixDescriptor; NUM_DOWNMIXES],
    last_peak: f64,
}

impl Default for Downmixer {
    fn default() -> Self {
        Self {
            descriptors: [LORO_CUSTOM, LTRT_DEFAULT, LTRT_CUSTOM, PLII_DEFAULT, ITU],
            last_peak: 0.,
        }
    }
}

impl Downmixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears peaks. Custom levels are kept.
    pub fn reset(&mut self) {
        for d in self.descriptors.iter_mut() {
            d.peak = 0.;
        }
        self.last_peak = 0.;
    }

    pub fn descriptors(&self) -> &[DownmixDescriptor; NUM_DOWNMIXES] {
        &self.descriptors
    }

    pub fn last_peak(&self) -> f64 {
        self.last_peak
    }

    /// Overrides the custom LoRo and LtRt levels. `None` restores the
    /// defaults.
    pub fn set_custom_levels(
        &mut self,
        loro: Option<DownmixLevels>,
        ltrt: Option<DownmixLevels>,
    ) {
        let mut loro_desc = LORO_CUSTOM;
        if let Some(levels) = loro {
            loro_desc.center = db_to_linear(levels.center_db);
            loro_desc.surr_own = db_to_linear(levels.surround_db);
        }
        let mut ltrt_desc = LTRT_CUSTOM;
        if let Some(levels) = ltrt {
            ltrt_desc.center = db_to_linear(levels.center_db);
            ltrt_desc.surr_own = db_to_linear(levels.surround_db);
            ltrt_desc.surr_opp = ltrt_desc.surr_own;
        }
        self.descriptors[0] = DownmixDescriptor {
            peak: self.descriptors[0].peak,
            ..loro_desc
        };
        self.descriptors[2] = DownmixDescriptor {
            peak: self.descriptors[2].peak,
            ..ltrt_desc
        };
    }

    /// Mixes one block through every matrix enabled in `flags` and returns
    /// max(current peak, previous block's peak) in full scale units, above 1
    /// when a downmix overflows. `frames` yields one interleaved frame per
    /// sample; `roles` maps frame slots to mix roles.
    pub fn block_peak<'a, I>(
        &mut self,
        flags: DownmixFlags,
        roles: &[(usize, MixRole)],
        frames: I,
    ) -> f64
    where
        I: IntoIterator<Item = &'a [f64]>,
        I::IntoIter: Clone,
    {
        let frames = frames.into_iter();
        let mut peak: f64 = 0.;
        for d in self.descriptors.iter_mut() {
            d.peak = if flags.contains(d.flag) {
                d.mix_peak(roles, frames.clone())
            } else {
                0.
            };
            peak = peak.max(d.peak);
        }
        let peak = peak / DOWNMIX_GLOBAL_GAIN;
        let worst = peak.max(self.last_peak);
        self.last_peak = peak;
        worst
    }
}
