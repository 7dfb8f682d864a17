// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("invalid handle")]
    /// The instance was closed or never opened.
    InvalidHandle,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("unsupported channel mode {0}")]
    InvalidChannelMode(u32),

    #[error("unsupported sample rate {0}")]
    InvalidSampleRate(u32),

    #[error("invalid compression profile {0}")]
    InvalidProfile(u32),

    #[error("buffer too small: want {want} samples, got {got}")]
    BufferTooSmall { want: usize, got: usize },

    #[error("emulation: {0}")]
    /// The DRC calculation pass failed.
    Emulation(Box<Error>),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn error_display() {
        assert_eq!(Error::InvalidHandle.to_string(), "invalid handle");
        assert_eq!(
            Error::InvalidParameter("dialnorm 0 not in 1..=31".to_string()).to_string(),
            "invalid parameter: dialnorm 0 not in 1..=31"
        );
        assert_eq!(
            Error::BufferTooSmall { want: 12, got: 6 }.to_string(),
            "buffer too small: want 12 samples, got 6"
        );
        assert_eq!(
            Error::Emulation(Box::new(Error::InvalidProfile(9))).to_string(),
            "emulation: invalid compression profile 9"
        );
    }
}
