// Cineform
// Copyright (c) 2025 The Project Cineform Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `wavelet` module implements the 2-6 biorthogonal wavelet transform: the 1-D and 2-D
//! analysis/synthesis filters, the temporal pair transform, and the multi-level pyramid.

pub mod spatial;
pub mod temporal;

use cineform_core::plane::Plane16;

use crate::common::PrescalePolicy;

pub const BAND_LL: u8 = 0;
pub const BAND_LH: u8 = 1;
pub const BAND_HL: u8 = 2;
pub const BAND_HH: u8 = 3;

/// One coded subband: a coefficient plane plus its position in the pyramid and its
/// quantization divisor.
#[derive(Clone, Debug)]
pub struct Subband {
    pub band: u8,
    pub level: u8,
    pub quant: u16,
    pub plane: Plane16,
}

/// The wavelet decomposition of one channel: the deepest-level lowpass plus the highpass
/// bands of every level, together with the parent channel dimensions.
#[derive(Clone, Debug)]
pub struct WaveletPyramid {
    pub width: usize,
    pub height: usize,
    pub levels: u8,
    /// The LL band at the deepest level. Never quantized; coded as raw 16-bit values.
    pub lowpass: Plane16,
    /// Highpass bands in ascending level order, LH, HL, HH within each level.
    pub bands: Vec<Subband>,
}

impl WaveletPyramid {
    /// Dimensions of a band at the given level: ceil(w / 2^level) x ceil(h / 2^level).
    pub fn band_dimensions(&self, level: u8) -> (usize, usize) {
        band_dimensions(self.width, self.height, level)
    }

    pub fn find_band(&self, level: u8, band: u8) -> Option<&Subband> {
        self.bands.iter().find(|sb| sb.level == level && sb.band == band)
    }
}

pub fn band_dimensions(width: usize, height: usize, level: u8) -> (usize, usize) {
    let div = 1usize << level;
    ((width + div - 1) / div, (height + div - 1) / div)
}

fn shift_right(plane: &mut Plane16, shift: u8) {
    for y in 0..plane.height() {
        for value in plane.row_mut(y) {
            *value >>= shift;
        }
    }
}

fn shift_left(plane: &mut Plane16, shift: u8) {
    for y in 0..plane.height() {
        for value in plane.row_mut(y) {
            *value = (i32::from(*value) << shift).clamp(-32768, 32767) as i16;
        }
    }
}

/// Run the forward transform for `levels` levels, stacking on the LL branch. Quantization
/// divisors in the returned subbands are left at 1; the encoder fills them from the
/// schedule before quantizing.
pub fn forward(plane: &Plane16, levels: u8, prescale: PrescalePolicy) -> WaveletPyramid {
    let width = plane.width();
    let height = plane.height();

    let mut current = plane.clone();
    let mut bands = Vec::with_capacity(usize::from(levels) * 3);

    for level in 1..=levels {
        if level > 1 && prescale.spatial_prescale > 0 {
            shift_right(&mut current, prescale.spatial_prescale);
        }

        let [ll, lh, hl, hh] = spatial::forward_spatial(&current);

        bands.push(Subband { band: BAND_LH, level, quant: 1, plane: lh });
        bands.push(Subband { band: BAND_HL, level, quant: 1, plane: hl });
        bands.push(Subband { band: BAND_HH, level, quant: 1, plane: hh });

        current = ll;
    }

    WaveletPyramid { width, height, levels, lowpass: current, bands }
}

/// Run the inverse transform, stopping `skip_levels` levels early (0 = full synthesis).
/// Returns the reconstructed plane, or the lowpass at the stop level for partial synthesis.
///
/// Returns `None` when a required band is missing from the pyramid.
pub fn inverse(pyramid: &WaveletPyramid, skip_levels: u8, prescale: PrescalePolicy) -> Option<Plane16> {
    let mut current = pyramid.lowpass.clone();

    for level in (skip_levels + 1..=pyramid.levels).rev() {
        let lh = pyramid.find_band(level, BAND_LH)?;
        let hl = pyramid.find_band(level, BAND_HL)?;
        let hh = pyramid.find_band(level, BAND_HH)?;

        // The synthesis output at level k is the analysis input of level k, which has the
        // dimensions of a band at level k-1.
        let (out_w, out_h) = pyramid.band_dimensions(level - 1);

        current =
            spatial::inverse_spatial([&current, &lh.plane, &hl.plane, &hh.plane], out_w, out_h);

        if level > 1
            && prescale.spatial_prescale > 0
            && prescale.inverse_descale
            && !prescale.inverse_unscaled
        {
            shift_left(&mut current, prescale.spatial_prescale);
        }
    }

    Some(current)
}
