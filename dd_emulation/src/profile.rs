// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use serde::Deserialize;
use serde::Serialize;

use crate::channel::SampleRate;
use crate::channel::EMU_BLOCK_SIZE;
use crate::Error;

/// Maximum number of breakpoints of a loudness -> gain curve.
pub const MAX_BREAKPOINTS: usize = 7;

/// The DD compression presets. `None` disables the loudness-driven gain; only
/// clip protection remains.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionProfile {
    #[default]
    None,
    FilmStandard,
    FilmLight,
    MusicStandard,
    MusicLight,
    Speech,
}

impl TryFrom<u32> for CompressionProfile {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Error> {
        match value {
            0 => Ok(CompressionProfile::None),
            1 => Ok(CompressionProfile::FilmStandard),
            2 => Ok(CompressionProfile::FilmLight),
            3 => Ok(CompressionProfile::MusicStandard),
            4 => Ok(CompressionProfile::MusicLight),
            5 => Ok(CompressionProfile::Speech),
            _ => Err(Error::InvalidProfile(value)),
        }
    }
}

/// One point of the loudness -> gain curve. `level_db` is relative to the
/// dialogue level, `gain_db` is the gain applied at that level.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Breakpoint {
    pub level_db: f64,
    pub gain_db: f64,
}

const fn bp(level_db: f64, gain_db: f64) -> Breakpoint {
    Breakpoint { level_db, gain_db }
}

/// Static description of a profile. Time constants are in milliseconds and
/// are turned into per-block smoothing coefficients for a given sample rate
/// by [`ProfileParams::coefficients`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProfileParams {
    /// Breakpoints ordered by rising level. Gain never rises with level.
    pub breakpoints: &'static [Breakpoint],
    pub fast_attack_ms: f64,
    pub slow_attack_ms: f64,
    pub fast_decay_ms: f64,
    pub slow_decay_ms: f64,
    /// Smoothing used while decaying below `low_level_threshold_db`.
    pub low_level_ms: f64,
    /// A rise larger than this many dB takes the fast attack.
    pub attack_threshold_db: f64,
    /// A fall larger than this many dB takes the fast decay.
    pub decay_threshold_db: f64,
    pub low_level_threshold_db: f64,
    /// Blocks a falling level is held before the tracker may decay.
    pub holdoff: u32,
}

const FILM_STANDARD_CURVE: [Breakpoint; 5] = [
    bp(-12., 6.),
    bp(0., 0.),
    bp(5., 0.),
    bp(15., -5.),
    bp(35., -24.),
];

const FILM_LIGHT_CURVE: [Breakpoint; 5] = [
    bp(-22., 6.),
    bp(-10., 0.),
    bp(10., 0.),
    bp(20., -5.),
    bp(35., -19.25),
];

const MUSIC_STANDARD_CURVE: [Breakpoint; 5] = [
    bp(-24., 12.),
    bp(0., 0.),
    bp(5., 0.),
    bp(15., -5.),
    bp(35., -24.),
];

const MUSIC_LIGHT_CURVE: [Breakpoint; 4] = [
    bp(-34., 12.),
    bp(-10., 0.),
    bp(10., 0.),
    bp(40., -15.),
];

const SPEECH_CURVE: [Breakpoint; 5] = [
    bp(-19., 15.),
    bp(0., 0.),
    bp(5., 0.),
    bp(15., -5.),
    bp(35., -24.),
];

const fn params(
    breakpoints: &'static [Breakpoint],
    slow_decay_ms: f64,
    holdoff: u32,
) -> ProfileParams {
    ProfileParams {
        breakpoints,
        fast_attack_ms: 10.,
        slow_attack_ms: 100.,
        fast_decay_ms: 1000.,
        slow_decay_ms,
        low_level_ms: 6000.,
        attack_threshold_db: 15.,
        decay_threshold_db: 20.,
        low_level_threshold_db: -30.,
        holdoff,
    }
}

const FILM_STANDARD: ProfileParams = params(&FILM_STANDARD_CURVE, 3000., 35);
const FILM_LIGHT: ProfileParams = params(&FILM_LIGHT_CURVE, 3000., 35);
const MUSIC_STANDARD: ProfileParams = params(&MUSIC_STANDARD_CURVE, 3000., 35);
const MUSIC_LIGHT: ProfileParams = params(&MUSIC_LIGHT_CURVE, 10000., 35);
const SPEECH: ProfileParams = params(&SPEECH_CURVE, 1000., 20);

impl CompressionProfile {
    /// Preset parameters, `None` for the disabled profile.
    pub fn params(self) -> Option<&'static ProfileParams> {
        match self {
            CompressionProfile::None => None,
            CompressionProfile::FilmStandard => Some(&FILM_STANDARD),
            CompressionProfile::FilmLight => Some(&FILM_LIGHT),
            CompressionProfile::MusicStandard => Some(&MUSIC_STANDARD),
            CompressionProfile::MusicLight => Some(&MUSIC_LIGHT),
            CompressionProfile::Speech => Some(&SPEECH),
        }
    }
}

/// Per-block single-pole coefficient for a time constant at `rate`.
pub fn smoothing_coef(time_ms: f64, rate: SampleRate) -> f64 {
    let block_seconds = EMU_BLOCK_SIZE as f64 / rate.hz() as f64;
    1. - (-block_seconds * 1000. / time_ms).exp()
}

/// Profile time constants resolved for one sample rate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SmoothingCoefs {
    pub fast_attack: f64,
    pub slow_attack: f64,
    pub fast_decay: f64,
    pub slow_decay: f64,
    pub low_level: f64,
}

impl ProfileParams {
    pub fn coefficients(&self, rate: SampleRate) -> SmoothingCoefs {
        SmoothingCoefs {
            fast_attack: smoothing_coef(self.fast_attack_ms, rate),
            slow_attack: smoothing_coef(self.slow_attack_ms, rate),
            fast_decay: smoothing_coef(self.fast_decay_ms, rate),
            slow_decay: smoothing_coef(self.slow_decay_ms, rate),
            low_level: smoothing_coef(self.low_level_ms, rate),
        }
    }

    /// Gain in dB for a loudness `level_db` relative to dialogue level.
    /// Linear between the bracketing breakpoints, flat outside them.
    pub fn gain_db(&self, level_db: f64) -> f64 {
        let points = self.breakpoints;
        let (first, last) = match (points.first(), points.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return 0.,
        };
        if level_db <= first.level_db {
            return first.gain_db;
        }
        if level_db >= last.level_db {
            return last.gain_db;
        }
        for pair in points.windows(2) {
            let (lo, hi) = (&pair[0], &pair[1]);
            if level_db <= hi.level_db {
                let t = (level_db - lo.level_db) / (hi.level_db - lo.level_db);
                return lo.gain_db + t * (hi.gain_db - lo.gain_db);
            }
        }
        last.gain_db
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use float_cmp::assert_approx_eq;

    use super::*;

    const ALL: [CompressionProfile; 6] = [
        CompressionProfile::None,
        CompressionProfile::FilmStandard,
        CompressionProfile::FilmLight,
        CompressionProfile::MusicStandard,
        CompressionProfile::MusicLight,
        CompressionProfile::Speech,
    ];

    #[test]
    fn try_from_u32() {
        for (i, profile) in ALL.iter().enumerate() {
            assert_eq!(CompressionProfile::try_from(i as u32).unwrap(), *profile);
        }
        assert_matches!(CompressionProfile::try_from(6), Err(Error::InvalidProfile(6)));
    }

    #[test]
    fn curves_are_monotonic() {
        for profile in ALL.iter().filter_map(|p| p.params()) {
            assert!(profile.breakpoints.len() <= MAX_BREAKPOINTS);
            for pair in profile.breakpoints.windows(2) {
                assert!(pair[0].level_db < pair[1].level_db);
                assert!(pair[0].gain_db >= pair[1].gain_db);
            }
            let mut last = f64::INFINITY;
            for level in -60..60 {
                let gain = profile.gain_db(level as f64);
                assert!(gain <= last);
                last = gain;
            }
        }
    }

    #[test]
    fn film_standard_curve() {
        let film = CompressionProfile::FilmStandard.params().unwrap();
        assert_eq!(film.gain_db(-40.), 6.);
        assert_eq!(film.gain_db(-6.), 3.);
        assert_eq!(film.gain_db(0.), 0.);
        assert_eq!(film.gain_db(3.), 0.);
        assert_eq!(film.gain_db(10.), -2.5);
        assert_approx_eq!(f64, film.gain_db(25.), -14.5, epsilon = 1e-12);
        assert_eq!(film.gain_db(60.), -24.);
        assert!(CompressionProfile::None.params().is_none());
    }

    #[test]
    fn coefficients_at_48k() {
        let c = CompressionProfile::MusicLight
            .params()
            .unwrap()
            .coefficients(SampleRate::Hz48000);
        assert_approx_eq!(f64, c.fast_attack, 0.4133537804899682, epsilon = 1e-12);
        assert_approx_eq!(f64, c.slow_attack, 0.05193606150660446, epsilon = 1e-12);
        assert_approx_eq!(f64, c.fast_decay, 0.005319136361385701, epsilon = 1e-12);
        assert_approx_eq!(f64, c.slow_decay, 0.0005331911363917197, epsilon = 1e-12);
        assert_approx_eq!(f64, c.low_level, 0.0008884939441897721, epsilon = 1e-12);
        // Longer blocks at lower rates move further per block.
        assert!(smoothing_coef(100., SampleRate::Hz32000) > c.slow_attack);
    }
}
