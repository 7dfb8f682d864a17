// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Loudness-weighted compressor.
//!
//! For each frame of up to eight 256-sample blocks the compressor measures
//! the weighted loudness of every block, estimates the worst-case peak over
//! the source channels and all active stereo downmixes, and derives:
//!
//! * one DRC (dynrng) gain per block, tracking loudness through the
//!   profile's curve with attack/decay smoothing and a holdoff, never above
//!   the block's clip-protection ceiling;
//! * one Compr gain for the whole frame, the smallest of its per-block gains
//!   against a frame-level ceiling that also covers the RF-mode boost.
//!
//! Gains are in dB and are quantized to DD gain words with
//! [`gain_word::encode`](crate::gain_word::encode).

use std::mem::size_of;

use itertools::izip;

use crate::channel::channel_samples;
use crate::channel::BlocksPerFrame;
use crate::channel::ChannelMode;
use crate::channel::ChannelPosition;
use crate::channel::MixRole;
use crate::channel::SampleRate;
use crate::channel::EMU_BLOCK_SIZE;
use crate::channel::MAX_BLOCKS;
use crate::channel::MAX_CHANNELS;
use crate::dlb_math::log_unit_to_db;
use crate::dlb_math::neg_log2;
use crate::dlb_math::power_to_log_unit;
use crate::dlb_math::DB_PER_LOG_UNIT;
use crate::dlb_math::LOG_UNIT_BITS;
use crate::downmix::DownmixFlags;
use crate::downmix::DownmixLevels;
use crate::downmix::Downmixer;
use crate::emul_filters::loudness_filter;
use crate::emul_filters::CascadeState;
use crate::gain_word::encode;
use crate::gain_word::GainWordFormat;
use crate::profile::CompressionProfile;
use crate::profile::ProfileParams;
use crate::profile::SmoothingCoefs;
use crate::Error;
use crate::Result;

/// Loudness of digital silence in log units.
const SILENCE: f64 = 1.;

/// Output boost of RF mode. The Compr ceiling leaves room for it.
pub const RF_MODE_BOOST_DB: f64 = 11.;

/// Clip-protection constants of one gain path.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClipParams {
    /// Safety margin below the measured headroom.
    pub bias_db: f64,
    /// Relaxation per call once the holdoff has run out.
    pub increment_db: f64,
    /// Calls the ceiling is held after a new peak.
    pub holdoff: u32,
    /// Highest ceiling, also the initial one.
    pub max_db: f64,
    /// Added to the headroom before the bias.
    pub offset_db: f64,
}

/// Per-block DRC clip protection.
pub const DRC_CLIP: ClipParams = ClipParams {
    bias_db: 0.5,
    increment_db: 0.2,
    holdoff: 20,
    max_db: 24.,
    offset_db: 0.,
};

/// Per-frame Compr clip protection. The increment is per DD-sized frame of
/// six blocks; see [`compr_clip_params`].
pub const COMPR_CLIP: ClipParams = ClipParams {
    bias_db: 1.,
    increment_db: 1.2,
    holdoff: 4,
    max_db: 48.,
    offset_db: -RF_MODE_BOOST_DB,
};

/// Compr clip constants for a frame size. Relaxation per second is the same
/// for AAC, DD and SBR sized frames.
pub fn compr_clip_params(blocks_per_frame: BlocksPerFrame) -> ClipParams {
    ClipParams {
        increment_db: COMPR_CLIP.increment_db * blocks_per_frame.count() as f64 / 6.,
        ..COMPR_CLIP
    }
}

/// The configuration a compressor instance is opened for. Any change needs
/// a new instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CompressorSettings {
    pub channel_mode: ChannelMode,
    pub lfe_on: bool,
    pub sample_rate: SampleRate,
    pub blocks_per_frame: BlocksPerFrame,
}

impl CompressorSettings {
    /// Builds settings from raw bitstream values, failing on unsupported
    /// channel modes, sample rates or frame sizes.
    pub fn from_raw(
        channel_mode: u32,
        lfe_on: bool,
        sample_rate_hz: u32,
        blocks_per_frame: u32,
    ) -> Result<Self> {
        Ok(Self {
            channel_mode: ChannelMode::try_from(channel_mode)?,
            lfe_on,
            sample_rate: SampleRate::try_from(sample_rate_hz)?,
            blocks_per_frame: BlocksPerFrame::try_from(blocks_per_frame)?,
        })
    }
}

/// Memory an instance needs, split into the fixed part and the part that
/// scales with channels and blocks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryRequirements {
    pub static_bytes: usize,
    pub dynamic_bytes: usize,
}

impl std::ops::Add for MemoryRequirements {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            static_bytes: self.static_bytes + other.static_bytes,
            dynamic_bytes: self.dynamic_bytes + other.dynamic_bytes,
        }
    }
}

/// Per-frame inputs that may change on every call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameParams {
    pub drc_profile: CompressionProfile,
    pub compr_profile: CompressionProfile,
    /// Dialogue level in dB below full scale, 1..=31.
    pub dialnorm: u32,
    pub downmix: DownmixFlags,
    pub loro_levels: Option<DownmixLevels>,
    pub ltrt_levels: Option<DownmixLevels>,
}

impl Default for FrameParams {
    fn default() -> Self {
        Self {
            drc_profile: CompressionProfile::FilmStandard,
            compr_profile: CompressionProfile::FilmStandard,
            dialnorm: 31,
            downmix: DownmixFlags::all(),
            loro_levels: None,
            ltrt_levels: None,
        }
    }
}

pub fn validate_dialnorm(dialnorm: u32) -> Result<()> {
    if !(1..=31).contains(&dialnorm) {
        return Err(Error::InvalidParameter(format!(
            "dialnorm {dialnorm} not in 1..=31"
        )));
    }
    Ok(())
}

/// Result of one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameGains {
    pub num_blocks: usize,
    pub drc_gain_db: [f64; MAX_BLOCKS],
    pub drc_words: [u8; MAX_BLOCKS],
    pub compr_gain_db: f64,
    pub compr_word: u8,
    /// Block loudness in log units, 1.0 for silence.
    pub loudness: [f64; MAX_BLOCKS],
    /// Worst-case peak of each block.
    pub peak: [f64; MAX_BLOCKS],
}

impl FrameGains {
    fn new(num_blocks: usize) -> Self {
        Self {
            num_blocks,
            drc_gain_db: [0.; MAX_BLOCKS],
            drc_words: [0; MAX_BLOCKS],
            compr_gain_db: 0.,
            compr_word: 0,
            loudness: [SILENCE; MAX_BLOCKS],
            peak: [0.; MAX_BLOCKS],
        }
    }

    pub fn drc_words(&self) -> &[u8] {
        &self.drc_words[..self.num_blocks]
    }

    pub fn drc_gains_db(&self) -> &[f64] {
        &self.drc_gain_db[..self.num_blocks]
    }
}

/// Smoothing state of one loudness-driven gain path.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DrcGainState {
    /// Tracked loudness, dB relative to dialogue level.
    pub level_db: f64,
    /// Curve gain at `level_db`.
    pub target_db: f64,
    /// Smoothed gain.
    pub gain_db: f64,
    pub holdoff: u32,
}

/// Ceiling state of one clip-protection path.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClipState {
    pub gain_db: f64,
    pub holdoff: u32,
}

impl ClipState {
    fn new(params: &ClipParams) -> Self {
        Self {
            gain_db: params.max_db,
            holdoff: 0,
        }
    }
}

struct ActiveProfile {
    params: &'static ProfileParams,
    coefs: SmoothingCoefs,
}

fn resolve(profile: CompressionProfile, rate: SampleRate) -> Option<ActiveProfile> {
    profile.params().map(|params| ActiveProfile {
        params,
        coefs: params.coefficients(rate),
    })
}

/// Headroom of a peak magnitude in dB, through the same log domain as the
/// loudness. Negative for a peak above full scale. Silence is capped at one
/// log unit.
pub fn peak_headroom_db(peak: f64) -> f64 {
    (neg_log2(peak * peak) / LOG_UNIT_BITS).min(1.) * DB_PER_LOG_UNIT
}

/// Frame-level headroom: the smallest block headroom, which belongs to the
/// loudest block peak.
pub fn calc_rf_lev(peaks: &[f64]) -> f64 {
    peaks
        .iter()
        .map(|p| peak_headroom_db(*p))
        .fold(f64::INFINITY, f64::min)
}

/// Updates a clip ceiling with a new headroom value and returns it.
pub fn calc_clip_gain(state: &mut ClipState, params: &ClipParams, headroom_db: f64) -> f64 {
    let new = headroom_db - params.bias_db + params.offset_db;
    if new < state.gain_db + params.increment_db {
        state.gain_db = new;
        state.holdoff = params.holdoff;
    } else if state.holdoff > 0 {
        state.holdoff -= 1;
    } else {
        state.gain_db += params.increment_db;
    }
    state.gain_db = state.gain_db.min(params.max_db);
    state.gain_db
}

/// Advances a loudness-driven gain by one block and returns the gain capped
/// at `ceiling_db`.
fn calc_drc_gain(
    state: &mut DrcGainState,
    profile: Option<&ActiveProfile>,
    loudness: f64,
    dialnorm: u32,
    ceiling_db: f64,
) -> f64 {
    let profile = match profile {
        Some(p) => p,
        None => return ceiling_db.min(0.),
    };
    // Silence carries no loudness information.
    if loudness >= SILENCE {
        return state.gain_db.min(ceiling_db);
    }
    let (p, c) = (profile.params, &profile.coefs);
    let input_db = log_unit_to_db(loudness) + dialnorm as f64;
    let delta = input_db - state.level_db;

    let coef = if delta >= 0. {
        state.holdoff = p.holdoff;
        if delta > p.attack_threshold_db {
            c.fast_attack
        } else {
            c.slow_attack
        }
    } else if state.holdoff > 0 {
        state.holdoff -= 1;
        state.gain_db += c.slow_decay * (state.target_db - state.gain_db);
        return state.gain_db.min(ceiling_db);
    } else if input_db < p.low_level_threshold_db {
        c.low_level
    } else if -delta > p.decay_threshold_db {
        c.fast_decay
    } else {
        c.slow_decay
    };

    state.level_db += coef * delta;
    state.target_db = p.gain_db(state.level_db);
    state.gain_db += coef * (state.target_db - state.gain_db);
    state.gain_db.min(ceiling_db)
}

/// Compressor instance for one channel configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct Compressor {
    settings: CompressorSettings,
    loudness_filter: [CascadeState<1>; MAX_CHANNELS],
    last_peak: [f64; MAX_CHANNELS],
    downmixer: Downmixer,
    block_loudness: [f64; MAX_BLOCKS],
    block_peak: [f64; MAX_BLOCKS],
    drc: DrcGainState,
    compr: DrcGainState,
    drc_clip: ClipState,
    compr_clip: ClipState,
    compr_clip_params: ClipParams,
}

impl Compressor {
    /// Memory needed for a configuration.
    pub fn query_memory(
        channel_mode: ChannelMode,
        blocks_per_frame: BlocksPerFrame,
    ) -> MemoryRequirements {
        let channels = channel_mode.total_channels(true);
        let per_channel = size_of::<CascadeState<1>>() + size_of::<f64>();
        let per_block = 2 * size_of::<f64>();
        MemoryRequirements {
            static_bytes: size_of::<Compressor>()
                - MAX_CHANNELS * per_channel
                - MAX_BLOCKS * per_block,
            dynamic_bytes: channels * per_channel + blocks_per_frame.count() * per_block,
        }
    }

    pub fn open(settings: CompressorSettings) -> Self {
        log::info!(
            "Opening compressor: {:?}, lfe {}, {} Hz, {} blocks per frame",
            settings.channel_mode,
            settings.lfe_on,
            settings.sample_rate.hz(),
            settings.blocks_per_frame.count()
        );
        let compr_clip_params = compr_clip_params(settings.blocks_per_frame);
        Self {
            settings,
            loudness_filter: Default::default(),
            last_peak: [0.; MAX_CHANNELS],
            downmixer: Downmixer::new(),
            block_loudness: [SILENCE; MAX_BLOCKS],
            block_peak: [0.; MAX_BLOCKS],
            drc: DrcGainState::default(),
            compr: DrcGainState::default(),
            drc_clip: ClipState::new(&DRC_CLIP),
            compr_clip: ClipState::new(&compr_clip_params),
            compr_clip_params,
        }
    }

    /// Clears all filter and gain state. Settings and custom downmix levels
    /// are kept.
    pub fn reset(&mut self) {
        self.loudness_filter = Default::default();
        self.last_peak = [0.; MAX_CHANNELS];
        self.downmixer.reset();
        self.block_loudness = [SILENCE; MAX_BLOCKS];
        self.block_peak = [0.; MAX_BLOCKS];
        self.drc = DrcGainState::default();
        self.compr = DrcGainState::default();
        self.drc_clip = ClipState::new(&DRC_CLIP);
        self.compr_clip = ClipState::new(&self.compr_clip_params);
    }

    pub fn settings(&self) -> &CompressorSettings {
        &self.settings
    }

    pub fn drc_state(&self) -> &DrcGainState {
        &self.drc
    }

    pub fn compr_state(&self) -> &DrcGainState {
        &self.compr
    }

    pub fn drc_clip_state(&self) -> &ClipState {
        &self.drc_clip
    }

    pub fn compr_clip_state(&self) -> &ClipState {
        &self.compr_clip
    }

    pub fn downmixer(&self) -> &Downmixer {
        &self.downmixer
    }

    /// Physical channels that take part in loudness and peak measurement,
    /// with their downmix roles: mapped to a position of the channel mode,
    /// LFE excluded. Only the first `len` entries are valid.
    fn measured_channels(
        &self,
        channel_map: &[ChannelPosition; MAX_CHANNELS],
    ) -> ([(usize, MixRole); MAX_CHANNELS], usize) {
        let mode = self.settings.channel_mode;
        let mut channels = [(0, MixRole::None); MAX_CHANNELS];
        let mut len = 0;
        for (ch, pos) in channel_map.iter().enumerate() {
            if *pos != ChannelPosition::Lfe && mode.contains(*pos, false) {
                channels[len] = (ch, mode.mix_role(*pos));
                len += 1;
            }
        }
        (channels, len)
    }

    /// Measures one block: returns its loudness in log units and its
    /// worst-case peak.
    fn measure_block(
        &mut self,
        block: &[f64],
        stride: usize,
        channels: &[(usize, MixRole)],
        downmix: DownmixFlags,
    ) -> (f64, f64) {
        let coefs = loudness_filter(self.settings.sample_rate);
        let mut power = 0.;
        let mut worst: f64 = 0.;
        for &(ch, _) in channels {
            let filter = &mut self.loudness_filter[ch];
            let mut sum = 0.;
            let mut peak: f64 = 0.;
            for x in channel_samples(block, ch, stride) {
                let y = filter.tick(coefs, *x);
                sum += y * y;
                peak = peak.max(x.abs());
            }
            power += sum / EMU_BLOCK_SIZE as f64;
            // The filter delays the signal, so the previous block's peak
            // still counts.
            worst = worst.max(peak).max(self.last_peak[ch]);
            self.last_peak[ch] = peak;
        }
        if self.settings.channel_mode.downmix_enabled() {
            let dmx_peak = self
                .downmixer
                .block_peak(downmix, channels, block.chunks_exact(stride));
            worst = worst.max(dmx_peak);
        }
        (power_to_log_unit(power), worst)
    }

    /// Runs the compressor over `num_blocks` blocks of interleaved `pcm`.
    pub fn process(
        &mut self,
        pcm: &[f64],
        stride: usize,
        channel_map: &[ChannelPosition; MAX_CHANNELS],
        num_blocks: usize,
        params: &FrameParams,
    ) -> Result<FrameGains> {
        let max_blocks = self.settings.blocks_per_frame.count();
        if num_blocks == 0 || num_blocks > max_blocks {
            return Err(Error::InvalidParameter(format!(
                "{num_blocks} blocks, expected 1..={max_blocks}"
            )));
        }
        if stride == 0 {
            return Err(Error::InvalidParameter("sample offset 0".to_string()));
        }
        let want = num_blocks * EMU_BLOCK_SIZE * stride;
        if pcm.len() < want {
            return Err(Error::BufferTooSmall {
                want,
                got: pcm.len(),
            });
        }
        validate_dialnorm(params.dialnorm)?;
        let (channels, len) = self.measured_channels(channel_map);
        let channels = &channels[..len];
        if let Some((ch, _)) = channels.iter().find(|(ch, _)| *ch >= stride) {
            return Err(Error::InvalidParameter(format!(
                "channel {ch} outside sample offset {stride}"
            )));
        }

        self.downmixer
            .set_custom_levels(params.loro_levels, params.ltrt_levels);

        let block_len = EMU_BLOCK_SIZE * stride;
        for (b, block) in pcm[..want].chunks_exact(block_len).enumerate() {
            let (loudness, peak) = self.measure_block(block, stride, channels, params.downmix);
            self.block_loudness[b] = loudness;
            self.block_peak[b] = peak;
        }

        let rate = self.settings.sample_rate;
        let drc_profile = resolve(params.drc_profile, rate);
        let compr_profile = resolve(params.compr_profile, rate);
        let mut gains = FrameGains::new(num_blocks);

        for (gain, word, loudness, peak) in izip!(
            &mut gains.drc_gain_db,
            &mut gains.drc_words,
            &self.block_loudness,
            &self.block_peak
        )
        .take(num_blocks)
        {
            let ceiling = calc_clip_gain(&mut self.drc_clip, &DRC_CLIP, peak_headroom_db(*peak));
            *gain = calc_drc_gain(
                &mut self.drc,
                drc_profile.as_ref(),
                *loudness,
                params.dialnorm,
                ceiling,
            );
            *word = encode(*gain, GainWordFormat::Drc);
        }

        let compr_ceiling = calc_clip_gain(
            &mut self.compr_clip,
            &self.compr_clip_params,
            calc_rf_lev(&self.block_peak[..num_blocks]),
        );
        gains.compr_gain_db = self.block_loudness[..num_blocks]
            .iter()
            .map(|loudness| {
                calc_drc_gain(
                    &mut self.compr,
                    compr_profile.as_ref(),
                    *loudness,
                    params.dialnorm,
                    compr_ceiling,
                )
            })
            .fold(f64::INFINITY, f64::min);
        gains.compr_word = encode(gains.compr_gain_db, GainWordFormat::Compr);

        gains.loudness[..num_blocks].copy_from_slice(&self.block_loudness[..num_blocks]);
        gains.peak[..num_blocks].copy_from_slice(&self.block_peak[..num_blocks]);
        Ok(gains)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use float_cmp::assert_approx_eq;

    use super::*;
    use crate::channel::DEFAULT_CHANNEL_MAP;
    use crate::dlb_math::db_to_linear;
    use crate::gain_word::decode_linear;
    use crate::gain_word::DD_GAIN_UNITY;

    fn settings(channel_mode: ChannelMode) -> CompressorSettings {
        CompressorSettings {
            channel_mode,
            lfe_on: true,
            sample_rate: SampleRate::Hz48000,
            blocks_per_frame: BlocksPerFrame::Six,
        }
    }

    fn film() -> ActiveProfile {
        resolve(CompressionProfile::FilmStandard, SampleRate::Hz48000).unwrap()
    }

    // Loudness in log units of a block `db` dB relative to a dialnorm of 31.
    fn loudness_at(db: f64) -> f64 {
        -(db - 31.) / DB_PER_LOG_UNIT
    }

    #[test]
    fn settings_from_raw() {
        let s = CompressorSettings::from_raw(7, true, 48000, 6).unwrap();
        assert_eq!(s, settings(ChannelMode::Mode32));
        assert_matches!(
            CompressorSettings::from_raw(9, true, 48000, 6),
            Err(Error::InvalidChannelMode(9))
        );
        assert_matches!(
            CompressorSettings::from_raw(7, true, 22050, 6),
            Err(Error::InvalidSampleRate(22050))
        );
    }

    #[test]
    fn query_memory_scales() {
        let small = Compressor::query_memory(ChannelMode::Mono, BlocksPerFrame::Four);
        let large = Compressor::query_memory(ChannelMode::Mode34, BlocksPerFrame::Eight);
        assert_eq!(small.static_bytes, large.static_bytes);
        assert!(small.dynamic_bytes < large.dynamic_bytes);
        assert_eq!(
            Compressor::query_memory(ChannelMode::Mode32, BlocksPerFrame::Six),
            Compressor::query_memory(ChannelMode::Mode32, BlocksPerFrame::Six)
        );
    }

    #[test]
    fn silence_gives_unity_for_every_mode() {
        for value in 0..9 {
            let mode = ChannelMode::try_from(value).unwrap();
            for profile in [CompressionProfile::None, CompressionProfile::FilmStandard] {
                let mut comp = Compressor::open(settings(mode));
                let pcm = vec![0.; 6 * EMU_BLOCK_SIZE * MAX_CHANNELS];
                let params = FrameParams {
                    drc_profile: profile,
                    compr_profile: profile,
                    dialnorm: 27,
                    ..Default::default()
                };
                let gains = comp
                    .process(&pcm, MAX_CHANNELS, &DEFAULT_CHANNEL_MAP, 6, &params)
                    .unwrap();
                assert!(gains.drc_words().iter().all(|w| *w == DD_GAIN_UNITY), "{mode:?}");
                assert_eq!(gains.compr_word, DD_GAIN_UNITY, "{mode:?}");
                assert!(gains.loudness[..6].iter().all(|l| *l == 1.));
            }
        }
    }

    #[test]
    fn clip_gain_snaps_holds_and_relaxes() {
        let p = DRC_CLIP;
        let mut state = ClipState::new(&p);
        assert_eq!(calc_clip_gain(&mut state, &p, 100.), p.max_db);

        // A loud peak snaps the ceiling down immediately.
        let snapped = calc_clip_gain(&mut state, &p, 3.);
        assert_approx_eq!(f64, snapped, 3. - p.bias_db);
        assert_eq!(state.holdoff, p.holdoff);

        // An even louder one never raises it.
        let louder = calc_clip_gain(&mut state, &p, 1.);
        assert!(louder <= snapped);

        // Quiet blocks: held for the holdoff, then one increment per block.
        let mut last = louder;
        for _ in 0..p.holdoff {
            assert_eq!(calc_clip_gain(&mut state, &p, 100.), last);
        }
        for _ in 0..10 {
            let g = calc_clip_gain(&mut state, &p, 100.);
            assert_approx_eq!(f64, g - last, p.increment_db, epsilon = 1e-12);
            last = g;
        }
    }

    #[test]
    fn clip_gain_is_monotonic_in_peak() {
        let p = DRC_CLIP;
        for peak in [0.1, 0.3, 0.5, 0.9, 1.0] {
            let mut quiet = ClipState::new(&p);
            let mut loud = ClipState::new(&p);
            calc_clip_gain(&mut quiet, &p, peak_headroom_db(peak));
            calc_clip_gain(&mut loud, &p, peak_headroom_db(peak * 1.05));
            assert!(loud.gain_db <= quiet.gain_db);
        }
        assert_approx_eq!(f64, peak_headroom_db(0.5), 6.0206, epsilon = 0.01);
        assert_eq!(peak_headroom_db(1.), 0.);
        assert_approx_eq!(f64, peak_headroom_db(2.), -6.0206, epsilon = 0.01);
        assert_approx_eq!(f64, peak_headroom_db(0.), DB_PER_LOG_UNIT);
    }

    #[test]
    fn compr_clip_scales_with_frame_size() {
        let four = compr_clip_params(BlocksPerFrame::Four);
        let six = compr_clip_params(BlocksPerFrame::Six);
        let eight = compr_clip_params(BlocksPerFrame::Eight);
        assert_approx_eq!(f64, six.increment_db, COMPR_CLIP.increment_db);
        assert_approx_eq!(f64, four.increment_db / 4., eight.increment_db / 8.);
        assert_eq!(four.holdoff, eight.holdoff);
    }

    #[test]
    fn rf_level_is_loudest_block() {
        assert_eq!(calc_rf_lev(&[0.1, 1.0, 0.2]), 0.);
        assert_approx_eq!(f64, calc_rf_lev(&[0.25, 0.5]), 6.0206, epsilon = 0.01);
    }

    #[test]
    fn no_profile_follows_ceiling() {
        let mut state = DrcGainState::default();
        assert_eq!(calc_drc_gain(&mut state, None, 0.1, 27, 12.), 0.);
        assert_eq!(calc_drc_gain(&mut state, None, 0.1, 27, -3.), -3.);
        assert_eq!(state, DrcGainState::default());
    }

    #[test]
    fn silence_is_gated() {
        let film = film();
        let mut state = DrcGainState::default();
        calc_drc_gain(&mut state, Some(&film), loudness_at(20.), 31, 24.);
        let before = state;
        let gain = calc_drc_gain(&mut state, Some(&film), SILENCE, 31, 24.);
        assert_eq!(state, before);
        assert_eq!(gain, before.gain_db);
        // The ceiling still applies.
        assert_eq!(calc_drc_gain(&mut state, Some(&film), SILENCE, 31, -30.), -30.);
    }

    #[test]
    fn attack_is_immediate_and_fast_for_large_steps() {
        let film = film();
        let mut state = DrcGainState::default();
        let gain = calc_drc_gain(&mut state, Some(&film), loudness_at(25.), 31, 24.);
        assert!(gain < 0.);
        assert_eq!(state.holdoff, film.params.holdoff);
        assert_approx_eq!(f64, state.level_db, 25. * film.coefs.fast_attack, epsilon = 1e-9);

        let mut slow = DrcGainState::default();
        calc_drc_gain(&mut slow, Some(&film), loudness_at(10.), 31, 24.);
        assert_approx_eq!(f64, slow.level_db, 10. * film.coefs.slow_attack, epsilon = 1e-9);
    }

    #[test]
    fn decay_waits_for_holdoff() {
        let film = film();
        let mut state = DrcGainState::default();
        for _ in 0..50 {
            calc_drc_gain(&mut state, Some(&film), loudness_at(25.), 31, 24.);
        }
        let held = state.level_db;
        assert!(held > 20.);
        let holdoff = film.params.holdoff;
        for block in 0..holdoff {
            let gain = calc_drc_gain(&mut state, Some(&film), loudness_at(10.), 31, 24.);
            assert_eq!(state.level_db, held, "block {block}");
            assert_eq!(state.holdoff, holdoff - block - 1);
            // The gain keeps converging on the held target.
            assert!(gain <= 0.);
        }
        calc_drc_gain(&mut state, Some(&film), loudness_at(10.), 31, 24.);
        assert!(state.level_db < held);

        // Any rise re-arms the holdoff right away.
        calc_drc_gain(&mut state, Some(&film), loudness_at(30.), 31, 24.);
        assert_eq!(state.holdoff, holdoff);
    }

    #[test]
    fn gain_never_exceeds_ceiling() {
        let film = film();
        let mut state = DrcGainState::default();
        for _ in 0..20000 {
            let gain = calc_drc_gain(&mut state, Some(&film), loudness_at(-40.), 31, 2.);
            assert!(gain <= 2.);
        }
        // Left alone the boost would reach the curve's +6 dB.
        assert!(state.gain_db > 2.);
    }

    fn sine_on(channels: &[usize], amplitude: f64) -> Vec<f64> {
        let stride = MAX_CHANNELS;
        let mut pcm = vec![0.; 6 * EMU_BLOCK_SIZE * stride];
        for (n, frame) in pcm.chunks_exact_mut(stride).enumerate() {
            let x = amplitude * (2. * std::f64::consts::PI * 1000. * n as f64 / 48000.).sin();
            for ch in channels {
                frame[*ch] = x;
            }
        }
        pcm
    }

    #[test]
    fn loud_stereo_sine_is_cut() {
        let mut comp = Compressor::open(settings(ChannelMode::Mode32));
        let pcm = sine_on(&[0, 1], 0.9);
        let params = FrameParams {
            downmix: DownmixFlags::LORO_CUSTOM,
            ..Default::default()
        };
        let mut last = None;
        for _ in 0..20 {
            let gains = comp
                .process(&pcm, MAX_CHANNELS, &DEFAULT_CHANNEL_MAP, 6, &params)
                .unwrap();
            // Lo = 1.122 * 0.9 is just over full scale.
            assert!(gains.peak[..6].iter().all(|p| *p > 1.));
            last = Some(gains);
        }
        let gains = last.unwrap();
        // Dialogue level is -31 dBFS, the sine is far above it.
        assert!(gains.drc_gains_db().iter().all(|g| *g < -10.));
        assert!(comp.drc_clip_state().gain_db < -DRC_CLIP.bias_db);
        assert!(gains.compr_gain_db < -RF_MODE_BOOST_DB - COMPR_CLIP.bias_db);
    }

    #[test]
    fn overflowing_downmix_sets_a_negative_ceiling() {
        let mut comp = Compressor::open(settings(ChannelMode::Mode32));
        let pcm = sine_on(&[0, 1, 2, 4, 5], 0.9);
        let params = FrameParams {
            drc_profile: CompressionProfile::None,
            compr_profile: CompressionProfile::None,
            downmix: DownmixFlags::LTRT_DEFAULT,
            ..Default::default()
        };
        let roles: Vec<(usize, MixRole)> = DEFAULT_CHANNEL_MAP
            .iter()
            .enumerate()
            .map(|(ch, pos)| (ch, ChannelMode::Mode32.mix_role(*pos)))
            .collect();
        let ltrt = comp.downmixer.descriptors()[1];
        for _ in 0..5 {
            let gains = comp
                .process(&pcm, MAX_CHANNELS, &DEFAULT_CHANNEL_MAP, 6, &params)
                .unwrap();
            for (b, block) in pcm.chunks_exact(EMU_BLOCK_SIZE * MAX_CHANNELS).enumerate() {
                let dmx_peak = block
                    .chunks_exact(MAX_CHANNELS)
                    .map(|frame| ltrt.mix(&roles, frame))
                    .fold(0., |m: f64, (l, r)| m.max(l.abs()).max(r.abs()));
                // Rt = 0.9 * 1.122 * (1 + 3 * 0.707)
                assert!(dmx_peak > 3.);
                assert!(gains.peak[b] >= dmx_peak - 1e-12);

                let drc = decode_linear(gains.drc_words[b], GainWordFormat::Drc);
                assert!(drc * dmx_peak <= 1., "block {b}: {drc} * {dmx_peak}");
                let rf = decode_linear(gains.compr_word, GainWordFormat::Compr)
                    * db_to_linear(RF_MODE_BOOST_DB);
                assert!(rf * dmx_peak <= 1., "block {b}: {rf} * {dmx_peak}");
            }
        }
    }

    #[test]
    fn invalid_frames() {
        let mut comp = Compressor::open(settings(ChannelMode::Stereo));
        let pcm = vec![0.; 4 * EMU_BLOCK_SIZE * 2];
        let params = FrameParams::default();
        assert_matches!(
            comp.process(&pcm, 2, &DEFAULT_CHANNEL_MAP, 7, &params),
            Err(Error::InvalidParameter(_))
        );
        assert_matches!(
            comp.process(&pcm, 2, &DEFAULT_CHANNEL_MAP, 5, &params),
            Err(Error::BufferTooSmall { .. })
        );
        assert_matches!(
            comp.process(&pcm, 2, &DEFAULT_CHANNEL_MAP, 4, &FrameParams { dialnorm: 0, ..params }),
            Err(Error::InvalidParameter(_))
        );
        // Center is not part of 2/0, so a stride of 2 is enough.
        assert!(comp.process(&pcm, 2, &DEFAULT_CHANNEL_MAP, 4, &params).is_ok());
        assert_matches!(
            comp.process(&pcm, 1, &DEFAULT_CHANNEL_MAP, 4, &params),
            Err(Error::InvalidParameter(_))
        );
    }

    #[test]
    fn reset_restores_open_state() {
        let s = settings(ChannelMode::Mode30);
        let mut comp = Compressor::open(s);
        let pcm = vec![0.5; 6 * EMU_BLOCK_SIZE * 3];
        comp.process(&pcm, 3, &DEFAULT_CHANNEL_MAP, 6, &FrameParams::default())
            .unwrap();
        assert_ne!(comp, Compressor::open(s));
        comp.reset();
        assert_eq!(comp, Compressor::open(s));
    }
}
