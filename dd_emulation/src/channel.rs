// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use serde::Deserialize;
use serde::Serialize;

use crate::Error;

/// Maximum number of physical channels in an interleaved PCM buffer.
pub const MAX_CHANNELS: usize = 8;

/// Samples per emulation block. Matches a DD audio block.
pub const EMU_BLOCK_SIZE: usize = 256;

/// Maximum number of blocks in one frame.
pub const MAX_BLOCKS: usize = 8;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPosition {
    Left,
    Right,
    Center,
    Lfe,
    LeftSurround,
    RightSurround,
    LeftBack,
    RightBack,
    #[default]
    None,
}

impl ChannelPosition {
    pub fn is_surround(self) -> bool {
        matches!(
            self,
            ChannelPosition::LeftSurround | ChannelPosition::RightSurround
        )
    }
}

use ChannelPosition as P;

/// Physical slot order used by the channel tab: L, R, C, LFE, Ls, Rs, Lb, Rb.
pub const DEFAULT_CHANNEL_MAP: [ChannelPosition; MAX_CHANNELS] = [
    P::Left,
    P::Right,
    P::Center,
    P::Lfe,
    P::LeftSurround,
    P::RightSurround,
    P::LeftBack,
    P::RightBack,
];

/// Audio coding mode. The name reads front/surround channel counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMode {
    /// 1+1: two independent mono programs.
    DualMono,
    /// 1/0
    Mono,
    /// 2/0
    Stereo,
    /// 3/0
    Mode30,
    /// 2/1
    Mode21,
    /// 3/1
    Mode31,
    /// 2/2
    Mode22,
    /// 3/2
    Mode32,
    /// 3/4
    Mode34,
}

// Slot index -> position, LFE included. The LFE slot is only used when the
// stream carries LFE.
const CHANNEL_TAB: [[ChannelPosition; MAX_CHANNELS]; 9] = [
    [P::Left, P::Right, P::None, P::Lfe, P::None, P::None, P::None, P::None],
    [P::None, P::None, P::Center, P::Lfe, P::None, P::None, P::None, P::None],
    [P::Left, P::Right, P::None, P::Lfe, P::None, P::None, P::None, P::None],
    [P::Left, P::Right, P::Center, P::Lfe, P::None, P::None, P::None, P::None],
    [P::Left, P::Right, P::None, P::Lfe, P::LeftSurround, P::None, P::None, P::None],
    [P::Left, P::Right, P::Center, P::Lfe, P::LeftSurround, P::None, P::None, P::None],
    [P::Left, P::Right, P::None, P::Lfe, P::LeftSurround, P::RightSurround, P::None, P::None],
    [P::Left, P::Right, P::Center, P::Lfe, P::LeftSurround, P::RightSurround, P::None, P::None],
    [
        P::Left,
        P::Right,
        P::Center,
        P::Lfe,
        P::LeftSurround,
        P::RightSurround,
        P::LeftBack,
        P::RightBack,
    ],
];

const NUM_FULL_BANDWIDTH: [usize; 9] = [2, 1, 2, 3, 3, 4, 4, 5, 7];

impl ChannelMode {
    fn index(self) -> usize {
        self as usize
    }

    /// Slot index -> position table of this mode.
    pub fn channel_tab(self) -> &'static [ChannelPosition; MAX_CHANNELS] {
        &CHANNEL_TAB[self.index()]
    }

    /// Number of full-bandwidth channels.
    pub fn full_bandwidth_channels(self) -> usize {
        NUM_FULL_BANDWIDTH[self.index()]
    }

    /// Number of channels including LFE when `lfe_on`.
    pub fn total_channels(self, lfe_on: bool) -> usize {
        self.full_bandwidth_channels() + lfe_on as usize
    }

    /// Returns true if `position` is carried by this mode.
    pub fn contains(self, position: ChannelPosition, lfe_on: bool) -> bool {
        match position {
            P::None => false,
            P::Lfe => lfe_on,
            _ => self.channel_tab().contains(&position),
        }
    }

    pub fn has_surround(self) -> bool {
        self.channel_tab().iter().any(|p| p.is_surround())
    }

    /// True for 2/1 and 3/1, where LeftSurround carries the mono surround.
    pub fn has_mono_surround(self) -> bool {
        matches!(self, ChannelMode::Mode21 | ChannelMode::Mode31)
    }

    /// Worst-case downmix estimation only runs for 3+ channel layouts.
    pub fn downmix_enabled(self) -> bool {
        self.full_bandwidth_channels() >= 3
    }

    /// Mixing role of `position` in this mode, used by the downmix matrices.
    pub fn mix_role(self, position: ChannelPosition) -> MixRole {
        if !self.contains(position, false) {
            return MixRole::None;
        }
        match position {
            P::Left => MixRole::Left,
            P::Right => MixRole::Right,
            P::Center => MixRole::Center,
            P::LeftSurround if self.has_mono_surround() => MixRole::SurrMono,
            P::LeftSurround | P::LeftBack => MixRole::Surround(Side::Left),
            P::RightSurround | P::RightBack => MixRole::Surround(Side::Right),
            P::Lfe | P::None => MixRole::None,
        }
    }
}

impl TryFrom<u32> for ChannelMode {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Error> {
        match value {
            0 => Ok(ChannelMode::DualMono),
            1 => Ok(ChannelMode::Mono),
            2 => Ok(ChannelMode::Stereo),
            3 => Ok(ChannelMode::Mode30),
            4 => Ok(ChannelMode::Mode21),
            5 => Ok(ChannelMode::Mode31),
            6 => Ok(ChannelMode::Mode22),
            7 => Ok(ChannelMode::Mode32),
            8 => Ok(ChannelMode::Mode34),
            _ => Err(Error::InvalidChannelMode(value)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// How a channel feeds a stereo downmix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MixRole {
    Left,
    Right,
    Center,
    /// A surround channel belonging to one side.
    Surround(Side),
    /// The single surround of a 2/1 or 3/1 layout, split to both sides.
    SurrMono,
    None,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleRate {
    #[serde(rename = "48000")]
    Hz48000,
    #[serde(rename = "44100")]
    Hz44100,
    #[serde(rename = "32000")]
    Hz32000,
}

impl SampleRate {
    /// Index into the per-rate coefficient tables.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn hz(self) -> u32 {
        match self {
            SampleRate::Hz48000 => 48000,
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz32000 => 32000,
        }
    }
}

impl TryFrom<u32> for SampleRate {
    type Error = Error;

    fn try_from(hz: u32) -> Result<Self, Error> {
        match hz {
            48000 => Ok(SampleRate::Hz48000),
            44100 => Ok(SampleRate::Hz44100),
            32000 => Ok(SampleRate::Hz32000),
            _ => Err(Error::InvalidSampleRate(hz)),
        }
    }
}

/// Number of 256-sample blocks per codec frame: 4 for AAC, 6 for DD, 8 for
/// SBR-sized frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlocksPerFrame {
    #[serde(rename = "4")]
    Four,
    #[serde(rename = "6")]
    Six,
    #[serde(rename = "8")]
    Eight,
}

impl BlocksPerFrame {
    pub fn count(self) -> usize {
        match self {
            BlocksPerFrame::Four => 4,
            BlocksPerFrame::Six => 6,
            BlocksPerFrame::Eight => 8,
        }
    }
}

impl TryFrom<u32> for BlocksPerFrame {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Error> {
        match value {
            4 => Ok(BlocksPerFrame::Four),
            6 => Ok(BlocksPerFrame::Six),
            8 => Ok(BlocksPerFrame::Eight),
            _ => Err(Error::InvalidParameter(format!(
                "blocks per frame {value} not in {{4, 6, 8}}"
            ))),
        }
    }
}

/// Iterates over one channel of an interleaved buffer.
pub fn channel_samples(
    pcm: &[f64],
    channel: usize,
    stride: usize,
) -> impl Iterator<Item = &f64> + '_ {
    pcm.iter().skip(channel).step_by(stride)
}

/// Mutable counterpart of [`channel_samples`].
pub fn channel_samples_mut(
    pcm: &mut [f64],
    channel: usize,
    stride: usize,
) -> impl Iterator<Item = &mut f64> + '_ {
    pcm.iter_mut().skip(channel).step_by(stride)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn channel_counts() {
        for value in 0..9 {
            let mode = ChannelMode::try_from(value).unwrap();
            let mapped = mode
                .channel_tab()
                .iter()
                .filter(|p| !matches!(p, P::Lfe | P::None))
                .count();
            assert_eq!(mapped, mode.full_bandwidth_channels(), "{mode:?}");
            assert_eq!(
                mode.total_channels(true),
                mode.full_bandwidth_channels() + 1
            );
        }
        assert_eq!(ChannelMode::Mode32.total_channels(true), 6);
        assert_eq!(ChannelMode::Mode34.total_channels(true), 8);
    }

    #[test]
    fn invalid_values() {
        assert_matches!(ChannelMode::try_from(9), Err(Error::InvalidChannelMode(9)));
        assert_matches!(
            SampleRate::try_from(96000),
            Err(Error::InvalidSampleRate(96000))
        );
        assert_matches!(
            BlocksPerFrame::try_from(5),
            Err(Error::InvalidParameter(_))
        );
    }

    #[test]
    fn mix_roles() {
        let m = ChannelMode::Mode32;
        assert_eq!(m.mix_role(P::Left), MixRole::Left);
        assert_eq!(m.mix_role(P::Center), MixRole::Center);
        assert_eq!(m.mix_role(P::Lfe), MixRole::None);
        assert_eq!(m.mix_role(P::RightSurround), MixRole::Surround(Side::Right));
        assert_eq!(m.mix_role(P::LeftBack), MixRole::None);
        assert_eq!(ChannelMode::Mode21.mix_role(P::LeftSurround), MixRole::SurrMono);
        assert_eq!(ChannelMode::Stereo.mix_role(P::Center), MixRole::None);
        assert_eq!(
            ChannelMode::Mode34.mix_role(P::LeftBack),
            MixRole::Surround(Side::Left)
        );
    }

    #[test]
    fn contains_lfe() {
        assert!(ChannelMode::Mode32.contains(P::Lfe, true));
        assert!(!ChannelMode::Mode32.contains(P::Lfe, false));
        assert!(!ChannelMode::Stereo.contains(P::Center, true));
        assert!(!ChannelMode::Mode34.contains(P::None, true));
        assert_eq!(ChannelPosition::default(), P::None);
        assert!(!ChannelMode::Mono.downmix_enabled());
        assert!(ChannelMode::Mode30.downmix_enabled());
    }

    #[test]
    fn strided_access() {
        let mut pcm = vec![0., 1., 2., 10., 11., 12.];
        let ch1: Vec<f64> = channel_samples(&pcm, 1, 3).copied().collect();
        assert_eq!(ch1, [1., 11.]);
        for x in channel_samples_mut(&mut pcm, 2, 3) {
            *x = -*x;
        }
        assert_eq!(pcm, [0., 1., -2., 10., 11., -12.]);
    }
}
