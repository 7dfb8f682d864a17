// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Stateful encoder-side filters: loudness weighting, DC blocking, bandwidth
//! and LFE lowpass, and the 90 degree phase-shift all-pass pair.
//!
//! Coefficients are fixed data. Each section stores its coefficients divided
//! by `2^shift`; the accumulator is shifted back left with limit clamping,
//! the way the fixed-point backends keep |a1| below one.

use crate::channel::channel_samples_mut;
use crate::channel::ChannelPosition;
use crate::channel::SampleRate;
use crate::channel::MAX_CHANNELS;
use crate::dlb_math::mac;
use crate::dlb_math::mpy;
use crate::dlb_math::sat_add;
use crate::dlb_math::sat_sub;
use crate::dlb_math::shl_limit;

const NUM_RATES: usize = 3;
pub const BW_LPF_STAGES: usize = 3;
pub const LFE_LPF_STAGES: usize = 4;
pub const PHASE_STAGES: usize = 2;

/// Previous two inputs and outputs of a section: x1, x2, y1, y2.
pub const TAPS_PER_STAGE: usize = 4;

/// -3 dB surround attenuation.
pub const SURROUND_ATTENUATION: f64 = 0.7071067811865476;

/// One second-order section with its coefficients pre-scaled by `2^-shift`.
/// The transfer function is
/// H(z) = (b0 + b1 * z^(-1) + b2 * z^(-2)) / (1 + a1 * z^(-1) + a2 * z^(-2)).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Biquad {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
    pub shift: i32,
}

// Leq(RLB) weighting highpass, one section per sample rate.
const LOUDNESS_FILTER: [Biquad; NUM_RATES] = [
    Biquad {
        b0: 0.5,
        b1: -1.0,
        b2: 0.5,
        a1: -0.9950237274169899,
        a2: 0.49503612518310497,
        shift: 1,
    },
    Biquad {
        b0: 0.5,
        b1: -1.0,
        b2: 0.5,
        a1: -0.994584836814898,
        a2: 0.49459951789351964,
        shift: 1,
    },
    Biquad {
        b0: 0.5,
        b1: -1.0,
        b2: 0.5,
        a1: -0.9925448344943442,
        a2: 0.49257266033477576,
        shift: 1,
    },
];

// 6th order Butterworth lowpass at 20.3 kHz, 20 kHz and 14 kHz.
const BW_LPF: [[Biquad; BW_LPF_STAGES]; NUM_RATES] = [
    [
        Biquad {
            b0: 0.4205646974090459,
            b1: 0.8411293948180918,
            b2: 0.4205646974090459,
            a1: 0.7898079553695494,
            a2: 0.39245083426663435,
            shift: 1,
        },
        Biquad {
            b0: 0.35452378682144414,
            b1: 0.7090475736428883,
            b2: 0.35452378682144414,
            a1: 0.6657850954308181,
            a2: 0.2523100518549585,
            shift: 1,
        },
        Biquad {
            b0: 0.32505411627859576,
            b1: 0.6501082325571915,
            b2: 0.32505411627859576,
            a1: 0.6104419332960671,
            a2: 0.18977453181831594,
            shift: 1,
        },
    ],
    [
        Biquad {
            b0: 0.4554685273391526,
            b1: 0.9109370546783052,
            b2: 0.4554685273391526,
            a1: 0.8912298795230154,
            a2: 0.430644229833595,
            shift: 1,
        },
        Biquad {
            b0: 0.406621959381289,
            b1: 0.813243918762578,
            b2: 0.406621959381289,
            a1: 0.7956502329324542,
            a2: 0.3308376045927018,
            shift: 1,
        },
        Biquad {
            b0: 0.38291286257875634,
            b1: 0.7658257251575127,
            b2: 0.38291286257875634,
            a1: 0.7492578825973747,
            a2: 0.2823935677176507,
            shift: 1,
        },
    ],
    [
        Biquad {
            b0: 0.4376249837776916,
            b1: 0.8752499675553832,
            b2: 0.4376249837776916,
            a1: 0.8406197136471094,
            a2: 0.4098802214636569,
            shift: 1,
        },
        Biquad {
            b0: 0.37853818766694236,
            b1: 0.7570763753338847,
            b2: 0.37853818766694236,
            a1: 0.7271217931257923,
            a2: 0.28703095754197727,
            shift: 1,
        },
        Biquad {
            b0: 0.3511642073657612,
            b1: 0.7023284147315224,
            b2: 0.3511642073657612,
            a1: 0.6745399974441958,
            a2: 0.23011683201884894,
            shift: 1,
        },
    ],
];

// 8th order Butterworth lowpass at 120 Hz. The last section has the
// highest Q; it is scaled by 1/4 and shifted left by 2 to stay stable.
const LFE_LPF: [[Biquad; LFE_LPF_STAGES]; NUM_RATES] = [
    [
        Biquad {
            b0: 3.0747658134173836e-05,
            b1: 6.149531626834767e-05,
            b2: 3.0747658134173836e-05,
            a1: -0.9968220253020462,
            a2: 0.496945015934583,
            shift: 1,
        },
        Biquad {
            b0: 3.0575065725313766e-05,
            b1: 6.115013145062753e-05,
            b2: 3.0575065725313766e-05,
            a1: -0.9912266751195736,
            a2: 0.4913489753824749,
            shift: 1,
        },
        Biquad {
            b0: 3.0444272603813487e-05,
            b1: 6.0888545207626974e-05,
            b2: 3.0444272603813487e-05,
            a1: -0.986986434653111,
            a2: 0.48710821174352625,
            shift: 1,
        },
        Biquad {
            b0: 1.5186976737043467e-05,
            b1: 3.0373953474086935e-05,
            b2: 1.5186976737043467e-05,
            a1: -0.49235336373176103,
            a2: 0.2424141116387092,
            shift: 2,
        },
    ],
    [
        Biquad {
            b0: 3.641651518130668e-05,
            b1: 7.283303036261336e-05,
            b2: 3.641651518130668e-05,
            a1: -0.9965301044890145,
            a2: 0.4966757705497398,
            shift: 1,
        },
        Biquad {
            b0: 3.6194196847790536e-05,
            b1: 7.238839369558107e-05,
            b2: 3.6194196847790536e-05,
            a1: -0.9904464111145757,
            a2: 0.4905911879019669,
            shift: 1,
        },
        Biquad {
            b0: 3.6025867053672385e-05,
            b1: 7.205173410734477e-05,
            b2: 3.6025867053672385e-05,
            a1: -0.98584010250745,
            a2: 0.4859842059756647,
            shift: 1,
        },
        Biquad {
            b0: 1.7967709479869795e-05,
            b1: 3.593541895973959e-05,
            b2: 1.7967709479869795e-05,
            a1: -0.4916825049364988,
            a2: 0.24175437577441827,
            shift: 2,
        },
    ],
    [
        Biquad {
            b0: 6.907495750855234e-05,
            b1: 0.00013814991501710468,
            b2: 6.907495750855234e-05,
            a1: -0.995148447215248,
            a2: 0.49542474704528217,
            shift: 1,
        },
        Biquad {
            b0: 6.849589559619218e-05,
            b1: 0.00013699179119238436,
            b2: 6.849589559619218e-05,
            a1: -0.9868060235104579,
            a2: 0.4870800070928426,
            shift: 1,
        },
        Biquad {
            b0: 6.805921792618583e-05,
            b1: 0.00013611843585237165,
            b2: 6.805921792618583e-05,
            a1: -0.9805148997672897,
            a2: 0.48078713663899453,
            shift: 1,
        },
        Biquad {
            b0: 3.3912601865792884e-05,
            b1: 6.782520373158577e-05,
            b2: 3.3912601865792884e-05,
            a1: -0.4885717531363559,
            a2: 0.2387074035438191,
            shift: 2,
        },
    ],
];

const PHASE_MAIN: [Biquad; PHASE_STAGES] = [
    Biquad {
        b0: 0.4878619970862652,
        b1: -0.9878373197021282,
        b2: 0.5,
        a1: -0.9878373197021282,
        a2: 0.4878619970862652,
        shift: 1,
    },
    Biquad {
        b0: 0.05356496326154582,
        b1: -0.8804977399881108,
        b2: 1.0,
        a1: -0.8804977399881108,
        a2: 0.05356496326154582,
        shift: 0,
    },
];

const PHASE_SURROUND: [Biquad; PHASE_STAGES] = [
    Biquad {
        b0: 0.46397960386432063,
        b1: -0.9637058441635638,
        b2: 0.5,
        a1: -0.9637058441635638,
        a2: 0.46397960386432063,
        shift: 1,
    },
    Biquad {
        b0: -0.3266239223780714,
        b1: 0.042656730306219526,
        b2: 1.0,
        a1: 0.042656730306219526,
        a2: -0.3266239223780714,
        shift: 0,
    },
];

// Pole offset of the one-word DC blocker, about 3 Hz.
const DC_BLOCK_COEF: [f64; NUM_RATES] = [0.00039262198550649163, 0.0004273362377656964, 0.0005888751674677506];

/// Delay line of an `N` stage cascade for one channel, indexed by
/// (stage, tap).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CascadeState<const N: usize> {
    taps: [[f64; TAPS_PER_STAGE]; N],
}

impl<const N: usize> Default for CascadeState<N> {
    fn default() -> Self {
        Self {
            taps: [[0.; TAPS_PER_STAGE]; N],
        }
    }
}

impl<const N: usize> CascadeState<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn taps(&self, stage: usize) -> &[f64; TAPS_PER_STAGE] {
        &self.taps[stage]
    }

    /// Runs one sample through all stages.
    pub fn tick(&mut self, coefs: &[Biquad; N], x: f64) -> f64 {
        let mut v = x;
        for (stage, q) in self.taps.iter_mut().zip(coefs) {
            let [x1, x2, y1, y2] = *stage;
            let mut acc = mpy(q.b0, v);
            acc = mac(acc, q.b1, x1);
            acc = mac(acc, q.b2, x2);
            acc = mac(acc, -q.a1, y1);
            acc = mac(acc, -q.a2, y2);
            let y = shl_limit(acc, q.shift);
            *stage = [v, x1, y, y1];
            v = y;
        }
        v
    }

    /// Filters `samples` in place.
    pub fn process<'a, I>(&mut self, coefs: &[Biquad; N], samples: I)
    where
        I: IntoIterator<Item = &'a mut f64>,
    {
        for x in samples {
            *x = self.tick(coefs, *x);
        }
    }
}

/// Single-pole DC-blocking highpass holding one word of state: the running
/// DC estimate.
/// H(z) = (1 - z^(-1)) / (1 - (1 - k) * z^(-1))
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DcBlock {
    dc: f64,
}

impl DcBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.dc = 0.;
    }

    pub fn process<'a, I>(&mut self, rate: SampleRate, samples: I)
    where
        I: IntoIterator<Item = &'a mut f64>,
    {
        let k = DC_BLOCK_COEF[rate.index()];
        let mut dc = self.dc;
        for x in samples {
            let y = sat_sub(*x, dc);
            dc = sat_add(dc, mpy(k, y));
            *x = y;
        }
        self.dc = dc;
    }
}

pub fn loudness_filter(rate: SampleRate) -> &'static [Biquad; 1] {
    std::array::from_ref(&LOUDNESS_FILTER[rate.index()])
}

pub fn bw_lpf(rate: SampleRate) -> &'static [Biquad; BW_LPF_STAGES] {
    &BW_LPF[rate.index()]
}

pub fn lfe_lpf(rate: SampleRate) -> &'static [Biquad; LFE_LPF_STAGES] {
    &LFE_LPF[rate.index()]
}

/// Surround channels take the surround branch of the all-pass pair, every
/// other channel the main branch. The branches differ by about 90 degrees
/// from 100 Hz to 18 kHz at 48 kHz.
pub fn phase_shift(position: ChannelPosition) -> &'static [Biquad; PHASE_STAGES] {
    if position.is_surround() {
        &PHASE_SURROUND
    } else {
        &PHASE_MAIN
    }
}

/// Zeroes `num_samples` samples of one channel of an interleaved buffer.
pub fn emul_zero(pcm: &mut [f64], channel: usize, stride: usize, num_samples: usize) {
    for x in channel_samples_mut(pcm, channel, stride).take(num_samples) {
        *x = 0.;
    }
}

/// Per-channel state of every encoder-emulation filter, keyed by physical
/// channel index. Nothing is shared across channels.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EncoderFilterBank {
    pub hpf: [DcBlock; MAX_CHANNELS],
    pub bw_lpf: [CascadeState<BW_LPF_STAGES>; MAX_CHANNELS],
    pub lfe_lpf: [CascadeState<LFE_LPF_STAGES>; MAX_CHANNELS],
    pub phase: [CascadeState<PHASE_STAGES>; MAX_CHANNELS],
}

impl EncoderFilterBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
