// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod channel;
pub mod config;
mod dd_emulation;
pub mod dlb_math;
pub mod downmix;
pub mod drc_applier;
pub mod emul_filters;
mod error;
pub mod gain_word;
pub mod md_compr;
pub mod profile;

pub use crate::dd_emulation::*;
pub use error::*;

pub use channel::BlocksPerFrame;
pub use channel::ChannelMode;
pub use channel::ChannelPosition;
pub use channel::SampleRate;
pub use config::EmulationSettings;
pub use md_compr::Compressor;
pub use md_compr::FrameGains;
pub use md_compr::FrameParams;
pub use profile::CompressionProfile;
