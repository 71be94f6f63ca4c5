// Cineform
// Copyright (c) 2025 The Project Cineform Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `common` module defines the pixel/encoded format enumerations, quality tiers, and
//! the quantization schedule shared by the encoder and decoder.

use cineform_core::errors::{config_error, Result};

/// Host-side pixel formats accepted at the conversion seam.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 8-bit RGB, 3 bytes per pixel.
    Rgb24,
    /// Packed 8-bit BGRA, 4 bytes per pixel.
    Bgra32,
    /// Packed 8-bit 4:2:2, Y0 U Y1 V byte order.
    Yuy2,
    /// 16-bit Bayer mosaic, RGGB phase, little-endian.
    Bayer16,
    /// Native planar 16-bit signed channels, width-tight, in encoded-channel order.
    Planar16,
}

/// In-sample channel layouts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EncodedFormat {
    Yuv422 = 1,
    Rgb444 = 2,
    Rgba4444 = 3,
    BayerRggb = 4,
}

impl EncodedFormat {
    pub fn from_u8(value: u8) -> Option<EncodedFormat> {
        match value {
            1 => Some(EncodedFormat::Yuv422),
            2 => Some(EncodedFormat::Rgb444),
            3 => Some(EncodedFormat::Rgba4444),
            4 => Some(EncodedFormat::BayerRggb),
            _ => None,
        }
    }

    pub fn channel_count(self) -> usize {
        match self {
            EncodedFormat::Yuv422 => 3,
            EncodedFormat::Rgb444 => 3,
            EncodedFormat::Rgba4444 => 4,
            EncodedFormat::BayerRggb => 4,
        }
    }

    /// Dimensions of one channel for a frame of `width` x `height`.
    pub fn channel_dimensions(self, width: usize, height: usize, channel: usize) -> (usize, usize) {
        match self {
            EncodedFormat::Yuv422 if channel > 0 => (width / 2, height),
            EncodedFormat::BayerRggb => (width / 2, height / 2),
            _ => (width, height),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    Progressive = 0,
    Interlaced = 1,
}

impl FieldType {
    pub fn from_u8(value: u8) -> Option<FieldType> {
        match value {
            0 => Some(FieldType::Progressive),
            1 => Some(FieldType::Interlaced),
            _ => None,
        }
    }
}

/// Encoding quality tiers. Higher tiers use smaller quantization divisors across the board
/// and therefore produce larger samples. `Lossless` pins every divisor to 1, uses the
/// identity companding curve, and routes out-of-range magnitudes through the raw escape.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Quality {
    Fixed = 0,
    Low = 1,
    Medium = 2,
    High = 3,
    FilmScan1 = 4,
    FilmScan2 = 5,
    FilmScan3 = 6,
    Keying = 7,
    Lossless = 8,
}

impl Quality {
    pub fn from_u8(value: u8) -> Option<Quality> {
        match value {
            0 => Some(Quality::Fixed),
            1 => Some(Quality::Low),
            2 => Some(Quality::Medium),
            3 => Some(Quality::High),
            4 => Some(Quality::FilmScan1),
            5 => Some(Quality::FilmScan2),
            6 => Some(Quality::FilmScan3),
            7 => Some(Quality::Keying),
            8 => Some(Quality::Lossless),
            _ => None,
        }
    }

    pub fn is_lossless(self) -> bool {
        self == Quality::Lossless
    }
}

/// Output resolution selected at decoder prepare. `Half` and `Quarter` stop synthesis one or
/// two levels early and return the rescaled lowpass at that scale.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DecodedResolution {
    Full,
    Half,
    Quarter,
}

impl DecodedResolution {
    /// Number of synthesis levels skipped.
    pub fn levels_skipped(self) -> u8 {
        match self {
            DecodedResolution::Full => 0,
            DecodedResolution::Half => 1,
            DecodedResolution::Quarter => 2,
        }
    }
}

/// Lowpass scaling policy, fixed at prepare time.
///
/// `spatial_prescale` is a right-shift applied to each lowpass band before it feeds the next
/// transform level, keeping deep-bit-depth sources inside 16-bit range on the LL branch.
/// `inverse_descale` controls whether synthesis re-applies the shift; when
/// `inverse_unscaled` is set the synthesis input is taken as already unscaled.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PrescalePolicy {
    pub spatial_prescale: u8,
    pub inverse_descale: bool,
    pub inverse_unscaled: bool,
}

impl PrescalePolicy {
    pub const NONE: PrescalePolicy =
        PrescalePolicy { spatial_prescale: 0, inverse_descale: false, inverse_unscaled: false };

    pub const LOWPASS2: PrescalePolicy =
        PrescalePolicy { spatial_prescale: 2, inverse_descale: true, inverse_unscaled: false };

    /// The policy an encode configuration calls for. Three levels of lowpass gain add six
    /// bits, so 8-bit sources stay inside 16-bit range without prescaling; deeper sources
    /// shift. Lossless coding pins the shift to zero and bounds the source range instead.
    pub fn for_source(bit_depth: u32, quality: Quality) -> PrescalePolicy {
        if quality.is_lossless() || bit_depth <= 8 {
            PrescalePolicy::NONE
        }
        else {
            PrescalePolicy::LOWPASS2
        }
    }
}

/// Number of transform levels for a quality tier.
pub fn transform_levels(quality: Quality) -> u8 {
    // All current tiers use the standard three-level pyramid.
    let _ = quality;
    3
}

/// The band-wise quantization schedule, keyed by quality, encoded format, level, and band.
///
/// Level 1 is the first (finest) transform level; detail there tolerates the most
/// quantization. The HH band quantizes harder than LH/HL at the same level. The deepest LL
/// is never quantized.
pub struct QuantSchedule;

impl QuantSchedule {
    /// Base divisors for level 1, as (LH, HL, HH).
    fn base(quality: Quality) -> (u32, u32, u32) {
        match quality {
            Quality::Fixed => (12, 12, 16),
            Quality::Low => (24, 24, 32),
            Quality::Medium => (12, 12, 16),
            Quality::High => (6, 6, 8),
            Quality::FilmScan1 => (4, 4, 6),
            Quality::FilmScan2 => (2, 2, 3),
            Quality::FilmScan3 => (2, 2, 2),
            Quality::Keying => (3, 3, 4),
            Quality::Lossless => (1, 1, 1),
        }
    }

    /// The divisor for one subband. `band` uses the container band indices
    /// (0 = LL, 1 = LH, 2 = HL, 3 = HH).
    pub fn divisor(quality: Quality, format: EncodedFormat, level: u8, band: u8) -> u16 {
        if band == 0 {
            return 1;
        }

        let (lh, hl, hh) = Self::base(quality);
        let base = match band {
            1 => lh,
            2 => hl,
            _ => hh,
        };

        // Chroma difference channels tolerate no extra quantization in 4:2:2; the schedule
        // is shared across channels, so the format only steepens the level falloff for the
        // Bayer layout where each channel is quarter resolution.
        let falloff = match format {
            EncodedFormat::BayerRggb => 1,
            _ => 2,
        };

        let shift = u32::from(level.saturating_sub(1)) * falloff / 2;
        ((base >> shift).max(1)) as u16
    }

    /// The quant table written into the sample: one entry per band of one channel, in
    /// (level, band) order with the deepest LL first.
    pub fn table(quality: Quality, format: EncodedFormat, levels: u8) -> Vec<u16> {
        let mut table = vec![1];
        for level in (1..=levels).rev() {
            for band in 1..=3 {
                table.push(Self::divisor(quality, format, level, band));
            }
        }
        table
    }
}

/// Validate and normalize an encode configuration.
pub fn validate_encode_config(
    width: usize,
    height: usize,
    pixel_format: PixelFormat,
    encoded_format: EncodedFormat,
    quality: Quality,
) -> Result<()> {
    if width < 8 || height < 8 || width > u16::MAX as usize || height > u16::MAX as usize {
        return config_error("frame dimensions out of range");
    }

    match encoded_format {
        EncodedFormat::Yuv422 if width % 2 != 0 => {
            return config_error("4:2:2 requires even width");
        }
        EncodedFormat::BayerRggb if width % 2 != 0 || height % 2 != 0 => {
            return config_error("bayer requires even dimensions");
        }
        _ => (),
    }

    let supported = matches!(
        (pixel_format, encoded_format),
        (PixelFormat::Rgb24, EncodedFormat::Rgb444)
            | (PixelFormat::Bgra32, EncodedFormat::Rgba4444)
            | (PixelFormat::Yuy2, EncodedFormat::Yuv422)
            | (PixelFormat::Bayer16, EncodedFormat::BayerRggb)
            | (PixelFormat::Planar16, _)
    );

    if !supported {
        return config_error("no conversion between pixel format and encoded format");
    }

    let _ = quality;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_quality_orders_divisors() {
        for band in 1..=3 {
            for level in 1..=3 {
                let low = QuantSchedule::divisor(Quality::Low, EncodedFormat::Yuv422, level, band);
                let high =
                    QuantSchedule::divisor(Quality::High, EncodedFormat::Yuv422, level, band);
                let fs3 =
                    QuantSchedule::divisor(Quality::FilmScan3, EncodedFormat::Yuv422, level, band);
                assert!(low >= high);
                assert!(high >= fs3);
            }
        }
    }

    #[test]
    fn verify_lowpass_is_never_quantized() {
        for level in 1..=3 {
            assert_eq!(QuantSchedule::divisor(Quality::Low, EncodedFormat::Rgb444, level, 0), 1);
        }
    }

    #[test]
    fn verify_lossless_divisors_are_unity() {
        let table = QuantSchedule::table(Quality::Lossless, EncodedFormat::Rgb444, 3);
        assert!(table.iter().all(|&q| q == 1));
    }

    #[test]
    fn verify_deeper_levels_quantize_less() {
        let l1 = QuantSchedule::divisor(Quality::Low, EncodedFormat::Yuv422, 1, 3);
        let l3 = QuantSchedule::divisor(Quality::Low, EncodedFormat::Yuv422, 3, 3);
        assert!(l3 <= l1);
    }

    #[test]
    fn verify_config_validation() {
        assert!(validate_encode_config(
            640,
            480,
            PixelFormat::Rgb24,
            EncodedFormat::Rgb444,
            Quality::High
        )
        .is_ok());

        assert!(validate_encode_config(
            641,
            480,
            PixelFormat::Yuy2,
            EncodedFormat::Yuv422,
            Quality::High
        )
        .is_err());

        assert!(validate_encode_config(
            640,
            480,
            PixelFormat::Rgb24,
            EncodedFormat::Yuv422,
            Quality::High
        )
        .is_err());
    }
}
