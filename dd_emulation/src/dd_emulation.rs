// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Frame-by-frame emulation of a DD encoder followed by a DD decoder.
//!
//! ```text
//!   PCM ──> zero unsignaled channels ──> encoder filters ──┬──> main output
//!                                                          └──> aux output
//!                        (loudness, DRC and Compr words) ──┴──> gain applier
//!                                                                per output
//! ```

use std::mem::size_of;

use bitflags::bitflags;
use serde::Deserialize;
use serde::Serialize;

use crate::channel::channel_samples;
use crate::channel::channel_samples_mut;
use crate::channel::BlocksPerFrame;
use crate::channel::ChannelMode;
use crate::channel::ChannelPosition;
use crate::channel::SampleRate;
use crate::channel::DEFAULT_CHANNEL_MAP;
use crate::channel::EMU_BLOCK_SIZE;
use crate::channel::MAX_BLOCKS;
use crate::channel::MAX_CHANNELS;
use crate::dlb_math::clip;
use crate::dlb_math::mpy;
use crate::drc_applier::dialnorm_gain_db;
use crate::drc_applier::BlockGain;
use crate::drc_applier::CustomBoostCut;
use crate::drc_applier::DrcType;
use crate::drc_applier::GainApplier;
use crate::emul_filters::bw_lpf;
use crate::emul_filters::emul_zero;
use crate::emul_filters::lfe_lpf;
use crate::emul_filters::phase_shift;
use crate::emul_filters::EncoderFilterBank;
use crate::emul_filters::SURROUND_ATTENUATION;
use crate::gain_word::DD_GAIN_UNITY;
use crate::md_compr::validate_dialnorm;
use crate::md_compr::Compressor;
use crate::md_compr::CompressorSettings;
use crate::md_compr::FrameGains;
use crate::md_compr::FrameParams;
use crate::md_compr::MemoryRequirements;
use crate::md_compr::RF_MODE_BOOST_DB;
use crate::profile::CompressionProfile;
use crate::Error;
use crate::Result;

/// Main and auxiliary output.
pub const NUM_OUTPUTS: usize = 2;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ControlFlags: u32 {
        /// Run the encoder-side filters.
        const ENCODER = 1 << 0;
        /// Apply gain words to the outputs.
        const DECODER = 1 << 1;
        /// Compute DRC and Compr words from the audio.
        const DRC_CALC = 1 << 2;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct EncoderFilters: u32 {
        /// -3 dB on surround channels.
        const SURROUND_ATTEN = 1 << 0;
        /// DC-blocking highpass.
        const HPF = 1 << 1;
        /// Bandwidth lowpass on full-bandwidth channels.
        const BW_LPF = 1 << 2;
        /// 120 Hz lowpass on the LFE channel.
        const LFE_LPF = 1 << 3;
        /// 90 degree phase shift between surround and front channels.
        const PHASE_SHIFT = 1 << 4;
    }
}

impl Default for EncoderFilters {
    fn default() -> Self {
        EncoderFilters::HPF
            | EncoderFilters::BW_LPF
            | EncoderFilters::LFE_LPF
            | EncoderFilters::PHASE_SHIFT
    }
}

/// Decoder compression mode of one output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionMode {
    /// No gain at all.
    None,
    /// Dialnorm only.
    DialnormOnly,
    /// Dynrng words and dialnorm.
    #[default]
    Line,
    /// Compr word, dialnorm and the 11 dB RF boost.
    Rf,
    /// Dynrng words scaled by the custom boost and cut, and dialnorm.
    Custom,
}

impl TryFrom<u32> for CompressionMode {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(CompressionMode::None),
            1 => Ok(CompressionMode::DialnormOnly),
            2 => Ok(CompressionMode::Line),
            3 => Ok(CompressionMode::Rf),
            4 => Ok(CompressionMode::Custom),
            _ => Err(Error::InvalidParameter(format!(
                "compression mode {value} not in 0..=4"
            ))),
        }
    }
}

/// Gain words taken from an existing bitstream instead of the computed ones.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitstreamWords {
    pub dynrng: [u8; MAX_BLOCKS],
    pub compr: u8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct OutputConfig {
    pub mode: CompressionMode,
    /// Only used in [`CompressionMode::Custom`].
    pub custom: CustomBoostCut,
    pub use_bitstream_gainwords: bool,
    pub bitstream: BitstreamWords,
}

impl OutputConfig {
    fn validate(&self) -> Result<()> {
        if self.mode == CompressionMode::Custom {
            for (name, value) in [("boost", self.custom.boost), ("cut", self.custom.cut)] {
                if !(0. ..=1.).contains(&value) {
                    return Err(Error::InvalidParameter(format!(
                        "custom {name} {value} not in [0, 1]"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Gain of block `block`. `primary` marks the main output.
    fn block_gain(
        &self,
        primary: bool,
        block: usize,
        gains: Option<&FrameGains>,
        frame: &FrameParams,
    ) -> BlockGain {
        let dialnorm_db = dialnorm_gain_db(frame.dialnorm);
        match self.mode {
            CompressionMode::None => BlockGain::unity(),
            CompressionMode::DialnormOnly => BlockGain {
                dialnorm_db,
                ..BlockGain::unity()
            },
            CompressionMode::Line | CompressionMode::Custom => {
                let word = if primary && frame.drc_profile == CompressionProfile::None {
                    DD_GAIN_UNITY
                } else if self.use_bitstream_gainwords {
                    self.bitstream.dynrng[block]
                } else {
                    gains.map_or(DD_GAIN_UNITY, |g| g.drc_words[block])
                };
                BlockGain {
                    drc_type: DrcType::Dynrng,
                    word,
                    dialnorm_db,
                    offset_db: 0.,
                    custom: (self.mode == CompressionMode::Custom).then_some(self.custom),
                }
            }
            CompressionMode::Rf => {
                let word = if self.use_bitstream_gainwords {
                    self.bitstream.compr
                } else {
                    gains.map_or(DD_GAIN_UNITY, |g| g.compr_word)
                };
                BlockGain {
                    drc_type: DrcType::Compr,
                    word,
                    dialnorm_db,
                    offset_db: RF_MODE_BOOST_DB,
                    custom: None,
                }
            }
        }
    }
}

/// Per-call configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProcessConfig {
    /// Position of each physical channel of the interleaved buffers.
    pub channel_map: [ChannelPosition; MAX_CHANNELS],
    pub channel_mode: ChannelMode,
    /// Channel mode as signaled upstream. Channels outside it are silenced.
    pub signaled_mode: ChannelMode,
    pub lfe_on: bool,
    pub sample_rate: SampleRate,
    pub blocks_per_frame: BlocksPerFrame,
    /// Interleave stride of both buffers.
    pub sample_offset: usize,
    pub control: ControlFlags,
    pub encoder_filters: EncoderFilters,
    pub frame: FrameParams,
    pub outputs: [OutputConfig; NUM_OUTPUTS],
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            channel_map: DEFAULT_CHANNEL_MAP,
            channel_mode: ChannelMode::Mode32,
            signaled_mode: ChannelMode::Mode32,
            lfe_on: true,
            sample_rate: SampleRate::Hz48000,
            blocks_per_frame: BlocksPerFrame::Six,
            sample_offset: MAX_CHANNELS,
            control: ControlFlags::all(),
            encoder_filters: EncoderFilters::default(),
            frame: FrameParams::default(),
            outputs: Default::default(),
        }
    }
}

impl ProcessConfig {
    pub fn compressor_settings(&self) -> CompressorSettings {
        CompressorSettings {
            channel_mode: self.channel_mode,
            lfe_on: self.lfe_on,
            sample_rate: self.sample_rate,
            blocks_per_frame: self.blocks_per_frame,
        }
    }

    /// Physical channels carrying a position of the channel mode.
    fn active_channels(&self) -> impl Iterator<Item = (usize, ChannelPosition)> + '_ {
        self.channel_map
            .iter()
            .enumerate()
            .filter(|(_, pos)| self.channel_mode.contains(**pos, self.lfe_on))
            .map(|(ch, pos)| (ch, *pos))
    }

    /// Checks everything that does not depend on instance state and returns
    /// the number of whole blocks in `num_samples`.
    fn validate(&self, num_samples: usize, lens: &[usize]) -> Result<usize> {
        let stride = self.sample_offset;
        if stride == 0 || stride > MAX_CHANNELS {
            return Err(Error::InvalidParameter(format!(
                "sample offset {stride} not in 1..={MAX_CHANNELS}"
            )));
        }
        if let Some(ch) = self
            .channel_map
            .iter()
            .enumerate()
            .position(|(ch, pos)| *pos != ChannelPosition::None && ch >= stride)
        {
            return Err(Error::InvalidParameter(format!(
                "channel {ch} outside sample offset {stride}"
            )));
        }
        let want = num_samples * stride;
        for &got in lens {
            if got < want {
                return Err(Error::BufferTooSmall { want, got });
            }
        }
        let blocks = num_samples / EMU_BLOCK_SIZE;
        let max_blocks = self.blocks_per_frame.count();
        if blocks > max_blocks {
            return Err(Error::InvalidParameter(format!(
                "{num_samples} samples is more than {max_blocks} blocks"
            )));
        }
        validate_dialnorm(self.frame.dialnorm)?;
        for output in &self.outputs {
            output.validate()?;
            // The 11 dB RF boost needs a compr word to offset it.
            if output.mode == CompressionMode::Rf
                && !output.use_bitstream_gainwords
                && self.control.contains(ControlFlags::DECODER)
                && !self.control.contains(ControlFlags::DRC_CALC)
            {
                return Err(Error::InvalidParameter(
                    "RF mode without DRC_CALC needs bitstream gain words".to_string(),
                ));
            }
        }
        Ok(blocks)
    }
}

/// What one call to [`DdEmulation::process`] computed.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameReport {
    /// The compressor was reopened for a new configuration.
    pub reopened: bool,
    pub num_blocks: usize,
    /// Computed gains, present when `DRC_CALC` is set.
    pub gains: Option<FrameGains>,
}

/// An encoder/decoder emulation instance for one stream.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DdEmulation {
    closed: bool,
    compressor: Option<Compressor>,
    filters: EncoderFilterBank,
    appliers: [GainApplier; NUM_OUTPUTS],
}

impl DdEmulation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Memory needed by an instance for `settings`.
    pub fn query_memory(settings: &CompressorSettings) -> MemoryRequirements {
        let compressor =
            Compressor::query_memory(settings.channel_mode, settings.blocks_per_frame);
        let own = MemoryRequirements {
            static_bytes: size_of::<DdEmulation>() - size_of::<Option<Compressor>>(),
            dynamic_bytes: 0,
        };
        compressor + own
    }

    pub fn compressor(&self) -> Option<&Compressor> {
        self.compressor.as_ref()
    }

    /// Opens the compressor for `settings` unless it is already open with
    /// the same settings. Returns whether it was (re)opened.
    pub fn configure(&mut self, settings: &CompressorSettings) -> Result<bool> {
        if self.closed {
            return Err(Error::InvalidHandle);
        }
        if let Some(compressor) = &self.compressor {
            if compressor.settings() == settings {
                return Ok(false);
            }
            log::info!(
                "Reopening compressor: {:?} -> {:?}",
                compressor.settings(),
                settings
            );
        }
        self.compressor = Some(Compressor::open(*settings));
        Ok(true)
    }

    /// Clears compressor, filter and gain state.
    pub fn reset(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidHandle);
        }
        if let Some(compressor) = &mut self.compressor {
            compressor.reset();
        }
        self.filters.reset();
        for applier in self.appliers.iter_mut() {
            applier.reset();
        }
        Ok(())
    }

    /// Releases all state. Every later call fails with
    /// [`Error::InvalidHandle`].
    pub fn close(&mut self) {
        *self = Self {
            closed: true,
            ..Default::default()
        };
    }

    /// Processes one frame of `num_samples` interleaved samples in `main`
    /// and, if given, produces an independently decoded copy in `aux`.
    pub fn process(
        &mut self,
        config: &ProcessConfig,
        num_samples: usize,
        main: &mut [f64],
        mut aux: Option<&mut [f64]>,
    ) -> Result<FrameReport> {
        if self.closed {
            return Err(Error::InvalidHandle);
        }
        if num_samples < EMU_BLOCK_SIZE {
            return Err(Error::InvalidParameter(format!(
                "{num_samples} samples, need at least {EMU_BLOCK_SIZE}"
            )));
        }
        let reopened = self.configure(&config.compressor_settings())?;

        let mut lens = vec![main.len()];
        lens.extend(aux.as_ref().map(|a| a.len()));
        let num_blocks = config.validate(num_samples, &lens)?;
        let stride = config.sample_offset;
        let len = num_samples * stride;
        let main = &mut main[..len];

        if config
            .control
            .intersects(ControlFlags::ENCODER | ControlFlags::DECODER)
        {
            self.zero_unsignaled(config, main, num_samples);
        }
        if config.control.contains(ControlFlags::ENCODER) {
            self.encode(config, main, num_samples);
        }
        if let Some(aux) = aux.as_deref_mut() {
            for (ch, _) in config.active_channels() {
                let src = channel_samples(main, ch, stride);
                for (dst, x) in channel_samples_mut(&mut aux[..len], ch, stride).zip(src) {
                    *dst = *x;
                }
            }
        }

        let gains = if config.control.contains(ControlFlags::DRC_CALC) {
            let compressor = self.compressor.as_mut().ok_or(Error::InvalidHandle)?;
            let gains = compressor
                .process(main, stride, &config.channel_map, num_blocks, &config.frame)
                .map_err(|e| Error::Emulation(Box::new(e)))?;
            log::debug!(
                "frame: {} blocks, dynrng {:02x?}, compr {:02x}",
                num_blocks,
                gains.drc_words(),
                gains.compr_word
            );
            Some(gains)
        } else {
            None
        };

        if config.control.contains(ControlFlags::DECODER) {
            let remainder = num_samples - num_blocks * EMU_BLOCK_SIZE;
            if remainder > 0 {
                log::warn!("{remainder} trailing samples keep the last gain");
            }
            self.decode(config, 0, main, num_blocks, remainder, gains.as_ref());
            if let Some(aux) = aux {
                self.decode(config, 1, &mut aux[..len], num_blocks, remainder, gains.as_ref());
            }
        }

        Ok(FrameReport {
            reopened,
            num_blocks,
            gains,
        })
    }

    /// Silences channels the signaled mode does not carry.
    fn zero_unsignaled(&self, config: &ProcessConfig, pcm: &mut [f64], num_samples: usize) {
        for (ch, pos) in config.channel_map.iter().enumerate() {
            if *pos != ChannelPosition::None
                && !config.signaled_mode.contains(*pos, config.lfe_on)
            {
                emul_zero(pcm, ch, config.sample_offset, num_samples);
            }
        }
    }

    fn encode(&mut self, config: &ProcessConfig, pcm: &mut [f64], num_samples: usize) {
        let stride = config.sample_offset;
        let rate = config.sample_rate;
        let flags = config.encoder_filters;
        let attenuate = flags.contains(EncoderFilters::SURROUND_ATTEN)
            && config.channel_mode.has_surround();
        for (ch, pos) in config.active_channels() {
            if attenuate && pos.is_surround() {
                for x in channel_samples_mut(pcm, ch, stride).take(num_samples) {
                    *x = clip(mpy(*x, SURROUND_ATTENUATION));
                }
            }
            let filters = &mut self.filters;
            if flags.contains(EncoderFilters::HPF) {
                let samples = channel_samples_mut(pcm, ch, stride).take(num_samples);
                filters.hpf[ch].process(rate, samples);
            }
            if pos == ChannelPosition::Lfe {
                if flags.contains(EncoderFilters::LFE_LPF) {
                    let samples = channel_samples_mut(pcm, ch, stride).take(num_samples);
                    filters.lfe_lpf[ch].process(lfe_lpf(rate), samples);
                }
            } else if flags.contains(EncoderFilters::BW_LPF) {
                let samples = channel_samples_mut(pcm, ch, stride).take(num_samples);
                filters.bw_lpf[ch].process(bw_lpf(rate), samples);
            }
            if flags.contains(EncoderFilters::PHASE_SHIFT) {
                let samples = channel_samples_mut(pcm, ch, stride).take(num_samples);
                filters.phase[ch].process(phase_shift(pos), samples);
            }
        }
    }

    /// Applies the gains of output `index` to `pcm`.
    fn decode(
        &mut self,
        config: &ProcessConfig,
        index: usize,
        pcm: &mut [f64],
        num_blocks: usize,
        remainder: usize,
        gains: Option<&FrameGains>,
    ) {
        let stride = config.sample_offset;
        let output = &config.outputs[index];
        let mut channels = [0; MAX_CHANNELS];
        let mut count = 0;
        for (ch, _) in config.active_channels() {
            channels[count] = ch;
            count += 1;
        }
        let channels = &channels[..count];
        let applier = &mut self.appliers[index];
        let block_len = EMU_BLOCK_SIZE * stride;
        for (b, block) in pcm.chunks_exact_mut(block_len).take(num_blocks).enumerate() {
            let gain = output.block_gain(index == 0, b, gains, &config.frame);
            applier.apply_block(gain.linear(), block, stride, channels, EMU_BLOCK_SIZE);
        }
        if remainder > 0 {
            applier.apply_hold(&mut pcm[num_blocks * block_len..], stride, channels, remainder);
        }
    }
}
