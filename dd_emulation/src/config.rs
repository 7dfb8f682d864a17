// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use serde::Deserialize;
use serde::Serialize;

use crate::channel::BlocksPerFrame;
use crate::channel::ChannelMode;
use crate::channel::ChannelPosition;
use crate::channel::SampleRate;
use crate::channel::DEFAULT_CHANNEL_MAP;
use crate::channel::MAX_CHANNELS;
use crate::dd_emulation::CompressionMode;
use crate::dd_emulation::ControlFlags;
use crate::dd_emulation::EncoderFilters;
use crate::dd_emulation::OutputConfig;
use crate::dd_emulation::ProcessConfig;
use crate::dd_emulation::NUM_OUTPUTS;
use crate::downmix::DownmixFlags;
use crate::downmix::DownmixLevels;
use crate::drc_applier::CustomBoostCut;
use crate::md_compr::validate_dialnorm;
use crate::md_compr::FrameParams;
use crate::profile::CompressionProfile;
use crate::Error;
use crate::Result;

/// Decoder settings of one output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSettings {
    pub mode: CompressionMode,
    pub boost: f64,
    pub cut: f64,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            mode: CompressionMode::Line,
            boost: 1.,
            cut: 1.,
        }
    }
}

/// `EmulationSettings` describes one stream: its layout, the metadata an
/// encoder would signal and how each output is decoded. Every field has a
/// default, so `{}` is a valid 3/2 + LFE, 48 kHz, film standard setup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmulationSettings {
    pub channel_mode: ChannelMode,
    /// Upstream channel mode. Defaults to `channel_mode`.
    pub signaled_channel_mode: Option<ChannelMode>,
    pub lfe_on: bool,
    /// In Hz.
    pub sample_rate: u32,
    pub blocks_per_frame: u32,
    /// Position of each interleaved channel. Defaults to the channels of
    /// `channel_mode` in L, R, C, LFE, Ls, Rs, Lb, Rb order.
    pub channel_map: Option<Vec<ChannelPosition>>,
    pub control: ControlFlags,
    pub encoder_filters: EncoderFilters,
    pub dialnorm: u32,
    pub drc_profile: CompressionProfile,
    pub compr_profile: CompressionProfile,
    pub downmix: DownmixFlags,
    pub loro_levels: Option<DownmixLevels>,
    pub ltrt_levels: Option<DownmixLevels>,
    /// Main output first. At most two.
    pub outputs: Vec<OutputSettings>,
}

impl Default for EmulationSettings {
    fn default() -> Self {
        let frame = FrameParams::default();
        Self {
            channel_mode: ChannelMode::Mode32,
            signaled_channel_mode: None,
            lfe_on: true,
            sample_rate: 48000,
            blocks_per_frame: 6,
            channel_map: None,
            control: ControlFlags::all(),
            encoder_filters: EncoderFilters::default(),
            dialnorm: frame.dialnorm,
            drc_profile: frame.drc_profile,
            compr_profile: frame.compr_profile,
            downmix: frame.downmix,
            loro_levels: None,
            ltrt_levels: None,
            outputs: vec![OutputSettings::default()],
        }
    }
}

impl EmulationSettings {
    /// Creates `EmulationSettings` from a JSON str.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::InvalidParameter(format!("EmulationSettings: {e}")))
    }

    /// The interleaved channel layout, explicit or derived from the mode.
    pub fn channel_map(&self) -> Vec<ChannelPosition> {
        match &self.channel_map {
            Some(map) => map.clone(),
            None => DEFAULT_CHANNEL_MAP
                .iter()
                .copied()
                .filter(|pos| self.channel_mode.contains(*pos, self.lfe_on))
                .collect(),
        }
    }

    /// Number of outputs to decode, at least one.
    pub fn num_outputs(&self) -> usize {
        self.outputs.len().clamp(1, NUM_OUTPUTS)
    }

    pub fn to_process_config(&self) -> Result<ProcessConfig> {
        let map = self.channel_map();
        if map.is_empty() || map.len() > MAX_CHANNELS {
            return Err(Error::InvalidParameter(format!(
                "{} channels, expected 1..={MAX_CHANNELS}",
                map.len()
            )));
        }
        if self.outputs.len() > NUM_OUTPUTS {
            return Err(Error::InvalidParameter(format!(
                "{} outputs, at most {NUM_OUTPUTS}",
                self.outputs.len()
            )));
        }
        validate_dialnorm(self.dialnorm)?;

        let mut channel_map = [ChannelPosition::None; MAX_CHANNELS];
        channel_map[..map.len()].copy_from_slice(&map);
        let mut outputs = [OutputConfig::default(); NUM_OUTPUTS];
        for (config, settings) in outputs.iter_mut().zip(&self.outputs) {
            config.mode = settings.mode;
            config.custom = CustomBoostCut {
                boost: settings.boost,
                cut: settings.cut,
            };
        }

        Ok(ProcessConfig {
            channel_map,
            channel_mode: self.channel_mode,
            signaled_mode: self.signaled_channel_mode.unwrap_or(self.channel_mode),
            lfe_on: self.lfe_on,
            sample_rate: SampleRate::try_from(self.sample_rate)?,
            blocks_per_frame: BlocksPerFrame::try_from(self.blocks_per_frame)?,
            sample_offset: map.len(),
            control: self.control,
            encoder_filters: self.encoder_filters,
            frame: FrameParams {
                drc_profile: self.drc_profile,
                compr_profile: self.compr_profile,
                dialnorm: self.dialnorm,
                downmix: self.downmix,
                loro_levels: self.loro_levels,
                ltrt_levels: self.ltrt_levels,
            },
            outputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn empty_json_is_default() {
        let settings = EmulationSettings::from_json_str("{}").unwrap();
        assert_eq!(settings, EmulationSettings::default());
        let config = settings.to_process_config().unwrap();
        assert_eq!(config.sample_offset, 6);
        assert_eq!(config.channel_map[..6], DEFAULT_CHANNEL_MAP[..6]);
        assert_eq!(config.channel_map[6..], [ChannelPosition::None; 2]);
        assert_eq!(config.signaled_mode, ChannelMode::Mode32);
        assert_eq!(config.frame, FrameParams::default());
    }

    #[test]
    fn parse_full_settings() {
        let json = r#"{
            "channel_mode": "stereo",
            "signaled_channel_mode": "mono",
            "lfe_on": false,
            "sample_rate": 44100,
            "blocks_per_frame": 8,
            "control": "DECODER | DRC_CALC",
            "encoder_filters": "HPF",
            "dialnorm": 24,
            "drc_profile": "music_light",
            "compr_profile": "speech",
            "loro_levels": { "center_db": -4.5, "surround_db": -6.0 },
            "outputs": [
                { "mode": "rf" },
                { "mode": "custom", "boost": 0.5, "cut": 0.25 }
            ]
        }"#;
        let config = EmulationSettings::from_json_str(json)
            .unwrap()
            .to_process_config()
            .unwrap();
        assert_eq!(config.sample_offset, 2);
        assert_eq!(config.signaled_mode, ChannelMode::Mono);
        assert_eq!(config.sample_rate, SampleRate::Hz44100);
        assert_eq!(config.blocks_per_frame, BlocksPerFrame::Eight);
        assert_eq!(config.control, ControlFlags::DECODER | ControlFlags::DRC_CALC);
        assert_eq!(config.encoder_filters, EncoderFilters::HPF);
        assert_eq!(config.frame.dialnorm, 24);
        assert_eq!(config.frame.drc_profile, CompressionProfile::MusicLight);
        assert_eq!(config.frame.compr_profile, CompressionProfile::Speech);
        assert_eq!(config.frame.loro_levels.unwrap().center_db, -4.5);
        assert_eq!(config.frame.ltrt_levels, None);
        assert_eq!(config.outputs[0].mode, CompressionMode::Rf);
        assert_eq!(config.outputs[1].mode, CompressionMode::Custom);
        assert_eq!(config.outputs[1].custom.cut, 0.25);
    }

    #[test]
    fn mode_derived_channel_maps() {
        let mono = EmulationSettings {
            channel_mode: ChannelMode::Mono,
            lfe_on: false,
            ..Default::default()
        };
        assert_eq!(mono.channel_map(), vec![ChannelPosition::Center]);
        let surround = EmulationSettings {
            channel_mode: ChannelMode::Mode34,
            ..Default::default()
        };
        assert_eq!(surround.channel_map(), DEFAULT_CHANNEL_MAP.to_vec());
    }

    #[test]
    fn invalid_settings() {
        assert_matches!(
            EmulationSettings::from_json_str(r#"{ "dialnorn": 27 }"#),
            Err(Error::InvalidParameter(_))
        );
        let bad_rate = EmulationSettings {
            sample_rate: 22050,
            ..Default::default()
        };
        assert_matches!(bad_rate.to_process_config(), Err(Error::InvalidSampleRate(22050)));
        let bad_blocks = EmulationSettings {
            blocks_per_frame: 5,
            ..Default::default()
        };
        assert_matches!(bad_blocks.to_process_config(), Err(Error::InvalidParameter(_)));
        let bad_dialnorm = EmulationSettings {
            dialnorm: 0,
            ..Default::default()
        };
        assert_matches!(bad_dialnorm.to_process_config(), Err(Error::InvalidParameter(_)));
        let three_outputs = EmulationSettings {
            outputs: vec![OutputSettings::default(); 3],
            ..Default::default()
        };
        assert_matches!(three_outputs.to_process_config(), Err(Error::InvalidParameter(_)));
        let no_channels = EmulationSettings {
            channel_map: Some(vec![]),
            ..Default::default()
        };
        assert_matches!(no_channels.to_process_config(), Err(Error::InvalidParameter(_)));
    }
}
