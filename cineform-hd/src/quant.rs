// Cineform
// Copyright (c) 2025 The Project Cineform Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `quant` module implements band quantization and magnitude companding.
//!
//! Quantization divides each highpass coefficient by the band divisor with symmetric
//! rounding. Companding then compresses the quantized magnitude into the bounded index
//! range of the VLC codebook: the decoder side expands through a fixed curve, the encoder
//! side inverts the curve through a cached lookup table.

use once_cell::sync::OnceCell;

/// Largest value the expansion curves produce, and the largest quantized magnitude the
/// encoder feeds the compander.
pub const EXPAND_RANGE: u32 = 1023;

/// Divide a coefficient by the band divisor with symmetric rounding.
#[inline(always)]
pub fn quantize(value: i32, divisor: u16) -> i32 {
    if divisor <= 1 {
        return value;
    }
    let divisor = i32::from(divisor);
    let magnitude = (value.abs() + divisor / 2) / divisor;
    if value < 0 {
        -magnitude
    }
    else {
        magnitude
    }
}

#[inline(always)]
pub fn dequantize(value: i32, divisor: u16) -> i32 {
    value * i32::from(divisor)
}

/// Companding curve applied to quantized magnitudes before VLC lookup. The curve in use is
/// signalled with the codebook in the sample header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CompandingCurve {
    None = 0,
    Cubic = 1,
    Piecewise = 2,
}

impl CompandingCurve {
    pub fn from_u8(value: u8) -> Option<CompandingCurve> {
        match value {
            0 => Some(CompandingCurve::None),
            1 => Some(CompandingCurve::Cubic),
            2 => Some(CompandingCurve::Piecewise),
            _ => None,
        }
    }

    /// Decoder-side expansion of a companded magnitude.
    #[inline(always)]
    pub fn expand(self, companded: u32) -> u32 {
        match self {
            CompandingCurve::None => companded,
            CompandingCurve::Cubic => cubic_expand(companded.min(255)),
            CompandingCurve::Piecewise => piecewise_expand(companded),
        }
    }

    /// Encoder-side companding of a quantized magnitude. The result fits the expansion
    /// domain of the curve; saturation to the codebook maximum is the band coder's job.
    #[inline(always)]
    pub fn compand(self, magnitude: u32) -> u32 {
        match self {
            CompandingCurve::None => magnitude,
            CompandingCurve::Cubic => cubic_compand_table()[magnitude.min(EXPAND_RANGE) as usize],
            CompandingCurve::Piecewise => magnitude,
        }
    }
}

/// The cubic expansion curve: `m + (m^3 * 768) / 255^3`, mapping [0, 255] onto [0, 1023].
#[inline(always)]
fn cubic_expand(companded: u32) -> u32 {
    let c = u64::from(companded);
    let expanded = c + (c * c * c * 768) / (255 * 255 * 255);
    (expanded as u32).min(EXPAND_RANGE)
}

/// The piecewise curve used for lossless coding. Its only segment is the identity over the
/// codebook range; magnitudes beyond it are routed through the raw escape by the band
/// coder, so the table never needs to compress.
const PIECEWISE_SEGMENTS: [(u32, u32); 1] = [(EXPAND_RANGE, 1)];

#[inline(always)]
fn piecewise_expand(companded: u32) -> u32 {
    let mut value = companded;
    for &(limit, step) in &PIECEWISE_SEGMENTS {
        value = (value * step).min(limit);
    }
    value
}

/// Inverse of [`cubic_expand`], built once: for every target magnitude the largest companded
/// value whose expansion does not exceed it.
fn cubic_compand_table() -> &'static [u32; 1024] {
    static TABLE: OnceCell<[u32; 1024]> = OnceCell::new();
    TABLE.get_or_init(|| {
        let mut table = [0u32; 1024];
        let mut next = 0usize;
        for c in 0..=255u32 {
            let expanded = cubic_expand(c) as usize;
            while next <= expanded.min(1023) {
                table[next] = c.saturating_sub(if next < expanded { 1 } else { 0 });
                next += 1;
            }
        }
        while next <= 1023 {
            table[next] = 255;
            next += 1;
        }
        table
    })
}
