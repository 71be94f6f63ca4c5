// Cineform
// Copyright (c) 2025 The Project Cineform Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `decoder` module is the decode-side coordinator: container parsing, the metadata
//! overlay refresh, FSM band decoding, inverse transform, and output conversion.
//!
//! A failed decode never poisons the instance: all mutable state is either replaced
//! wholesale on success or only advanced by the overlay engine, so a subsequent call with
//! an intact sample succeeds.

use log::debug;

use cineform_core::errors::{config_error, corrupt_error, Result};
use cineform_core::plane::Plane16;
use cineform_core::sample::{ParsedChannel, ParsedSample, SampleFlags, SampleParser};

use cineform_metadata::overlay::{OverlayEngine, OverlayPaths};
use cineform_metadata::record::CfhdData;

use crate::band;
use crate::common::{DecodedResolution, EncodedFormat, PixelFormat, PrescalePolicy, Quality};
use crate::convert;
use crate::pool::fan_out;
use crate::quant::CompandingCurve;
use crate::wavelet::{self, band_dimensions, Subband, WaveletPyramid};

#[derive(Copy, Clone, Debug)]
pub struct DecodeParams {
    pub width: usize,
    pub height: usize,
    pub pixel_format: PixelFormat,
    pub resolution: DecodedResolution,
}

pub struct Decoder {
    params: Option<DecodeParams>,
    overlay: OverlayEngine,
    threads: usize,
    /// Set when a worker count was picked automatically and may be capped by metadata.
    threads_are_default: bool,
    /// Temporal lowpass planes retained from the last key sample of a 2-frame GOP.
    temporal_low: Option<Vec<Plane16>>,
    /// The frame colorspace after any overlay override.
    colorspace: Option<u32>,
}

impl Decoder {
    pub fn new() -> Self {
        let threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Decoder {
            params: None,
            overlay: OverlayEngine::new(OverlayPaths::default()),
            threads,
            threads_are_default: true,
            temporal_low: None,
            colorspace: None,
        }
    }

    /// Point the overlay engine at the persisted database directories.
    pub fn with_overlay_paths(mut self, paths: OverlayPaths) -> Self {
        self.overlay = OverlayEngine::new(paths);
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self.threads_are_default = false;
        self
    }

    /// Output pixel formats in preference order.
    pub fn output_formats() -> &'static [PixelFormat] {
        &[
            PixelFormat::Planar16,
            PixelFormat::Yuy2,
            PixelFormat::Rgb24,
            PixelFormat::Bgra32,
            PixelFormat::Bayer16,
        ]
    }

    /// Negotiate the decode configuration.
    pub fn prepare(
        &mut self,
        width: usize,
        height: usize,
        pixel_format: PixelFormat,
        resolution: DecodedResolution,
    ) -> Result<DecodeParams> {
        if width == 0 || height == 0 {
            return config_error("invalid output dimensions");
        }

        let params = DecodeParams { width, height, pixel_format, resolution };
        self.params = Some(params);
        Ok(params)
    }

    /// Install the SDK metadata override applied at `Override` priority before each decode.
    pub fn set_active_metadata(&mut self, chunk: Vec<u8>) {
        self.overlay.set_sdk_override(chunk);
    }

    pub fn clear_active_metadata(&mut self) {
        self.overlay.clear_sdk_override();
    }

    /// The frame colorspace after the last decode's overlay merge.
    pub fn colorspace(&self) -> Option<u32> {
        self.colorspace
    }

    /// Decode one sample into the caller's output buffer.
    pub fn decode_sample(&mut self, sample: &[u8], out: &mut [u8], pitch: usize) -> Result<()> {
        let params = match self.params {
            Some(params) => params,
            None => return config_error("decoder not prepared"),
        };

        let parsed = SampleParser::parse(sample)?;
        let layout = SampleLayout::from_header(&parsed)?;

        if layout.width != params.width || layout.height != params.height {
            return config_error("sample does not match prepared dimensions");
        }

        let record = self.refresh_overlay(&parsed, &layout);
        let threads = self.effective_threads(&record);

        if layout.gop_position == 2 {
            // P sample: temporal highpass only; combine with the retained lowpass.
            let highs = self.decode_channels(&parsed, &layout, threads, 0)?;
            let lows = match self.temporal_low.as_ref() {
                Some(lows) if lows.len() == highs.len() => lows,
                _ => return corrupt_error("P sample without a preceding key sample"),
            };

            let mut seconds = Vec::with_capacity(highs.len());
            for (low, high) in lows.iter().zip(&highs) {
                if low.width() != high.width() || low.height() != high.height() {
                    return corrupt_error("temporal band dimensions mismatch");
                }
                let (_, second) = wavelet::temporal::inverse_temporal(low, high);
                seconds.push(second);
            }

            // P samples always decode at full resolution; the retained lowpass is only
            // held at the scale the key sample was synthesized at.
            return self.export(&params, &layout, seconds, layout.width, layout.height, out, pitch);
        }

        let skip = layout.skip_levels(params.resolution);
        let mut planes = self.decode_channels(&parsed, &layout, threads, skip)?;

        if layout.gop_position == 1 {
            // Key sample of a pair: what was synthesized is the temporal lowpass. Retain
            // it for the P sample and output the pair average.
            self.temporal_low = Some(planes.clone());
            for plane in &mut planes {
                for y in 0..plane.height() {
                    for value in plane.row_mut(y) {
                        *value >>= 1;
                    }
                }
            }
        }
        else {
            self.temporal_low = None;
        }

        let (out_w, out_h) = band_dimensions(layout.width, layout.height, skip);
        self.export(&params, &layout, planes, out_w, out_h, out, pitch)
    }

    /// Extract the thumbnail without running synthesis: the embedded thumbnail chunk when
    /// present, otherwise the deepest lowpass bands repacked as 10-bit RGB.
    pub fn thumbnail(&self, sample: &[u8]) -> Result<(u16, u16, Vec<u32>)> {
        let parsed = SampleParser::parse(sample)?;

        if let Some(thumb) = &parsed.thumbnail {
            let packed = thumb
                .data
                .chunks_exact(4)
                .map(|w| u32::from_be_bytes(w.try_into().expect("sized chunks")))
                .collect();
            return Ok((thumb.width, thumb.height, packed));
        }

        let layout = SampleLayout::from_header(&parsed)?;

        let mut lowpass = Vec::new();
        for channel in &parsed.channels {
            let raw = match &channel.lowpass {
                Some(raw) => raw,
                None => return corrupt_error("sample has no lowpass band"),
            };
            lowpass.push(band::decode_lowpass_raw(
                raw.data,
                usize::from(raw.width),
                usize::from(raw.height),
            )?);
        }

        if lowpass.is_empty() {
            return corrupt_error("sample has no channels");
        }

        let first = &lowpass[0];
        let same_dims = lowpass.len() >= 3
            && lowpass[1..3]
                .iter()
                .all(|p| p.width() == first.width() && p.height() == first.height());

        let planes =
            if same_dims { [first, &lowpass[1], &lowpass[2]] } else { [first, first, first] };

        // Assume an 8-bit source when rescaling; the embedded thumbnail covers the rest.
        let gain_bits = 2 * u32::from(layout.levels)
            - u32::from(layout.prescale.spatial_prescale) * u32::from(layout.levels - 1);
        let shift = (gain_bits as i32 - 2).max(0) as u32;

        let (width, height, packed) = convert::pack_thumbnail(planes, shift);
        Ok((width, height, packed))
    }

    fn refresh_overlay(&mut self, parsed: &ParsedSample<'_>, layout: &SampleLayout) -> CfhdData {
        let record = self.overlay.refresh(parsed.metadata);

        // The merged record's colorspace overrides the frame's.
        self.colorspace = Some(record.colorspace.unwrap_or_else(|| layout.default_colorspace()));

        record
    }

    fn effective_threads(&self, record: &CfhdData) -> usize {
        match record.cpu_limit {
            // The metadata CPU limit only applies when the thread controller is default.
            Some(limit) if self.threads_are_default && limit >= 1 => {
                self.threads.min(limit as usize)
            }
            _ => self.threads,
        }
    }

    /// Decode every band of every channel (one fan-out stage), then synthesize each
    /// channel (a second stage).
    fn decode_channels(
        &self,
        parsed: &ParsedSample<'_>,
        layout: &SampleLayout,
        threads: usize,
        skip_levels: u8,
    ) -> Result<Vec<Plane16>> {
        if parsed.channels.len() != layout.encoded_format.channel_count() {
            return corrupt_error("channel count does not match encoded format");
        }

        let pyramids: Result<Vec<WaveletPyramid>> = fan_out(
            threads,
            parsed.channels.iter().enumerate().collect(),
            |(channel, parsed_channel): (usize, &ParsedChannel<'_>)| {
                let (w, h) =
                    layout.encoded_format.channel_dimensions(layout.width, layout.height, channel);
                rebuild_pyramid(parsed_channel, w, h, layout)
            },
        )
        .into_iter()
        .collect();
        let pyramids = pyramids?;

        let prescale = layout.prescale;
        let synthesized: Result<Vec<Plane16>> =
            fan_out(threads, pyramids, move |pyramid: WaveletPyramid| {
                match wavelet::inverse(&pyramid, skip_levels, prescale) {
                    Some(plane) => Ok(plane),
                    None => corrupt_error("missing subband for synthesis"),
                }
            })
            .into_iter()
            .collect();
        let mut planes = synthesized?;

        if skip_levels > 0 {
            // Partial synthesis leaves the lowpass gain of the skipped levels in place.
            let gain = 2 * u32::from(skip_levels)
                - u32::from(prescale.spatial_prescale) * u32::from(skip_levels.saturating_sub(1));
            for plane in &mut planes {
                scale_down(plane, gain);
            }
        }

        Ok(planes)
    }

    fn export(
        &self,
        params: &DecodeParams,
        layout: &SampleLayout,
        planes: Vec<Plane16>,
        out_w: usize,
        out_h: usize,
        out: &mut [u8],
        pitch: usize,
    ) -> Result<()> {
        debug!("decoded {}x{} sample to {}x{}", layout.width, layout.height, out_w, out_h);

        convert::export_frame(
            params.pixel_format,
            layout.encoded_format,
            &planes,
            out_w,
            out_h,
            out,
            pitch,
        )
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Decoder::new()
    }
}

/// Header-derived decode geometry shared by the decode stages.
struct SampleLayout {
    width: usize,
    height: usize,
    encoded_format: EncodedFormat,
    levels: u8,
    curve: CompandingCurve,
    prescale: PrescalePolicy,
    gop_position: u8,
}

impl SampleLayout {
    fn from_header(parsed: &ParsedSample<'_>) -> Result<SampleLayout> {
        let header = &parsed.header;

        let encoded_format = match EncodedFormat::from_u8(header.encoded_format) {
            Some(format) => format,
            None => return corrupt_error("unknown encoded format"),
        };
        if Quality::from_u8(header.quality).is_none() {
            return corrupt_error("unknown quality tier");
        }
        let curve = match CompandingCurve::from_u8(header.encode_curve) {
            Some(curve) => curve,
            None => return corrupt_error("unknown companding curve"),
        };

        if header.transform_levels == 0 || header.transform_levels > 8 {
            return corrupt_error("transform level count out of range");
        }

        let prescale = if header.flags.contains(SampleFlags::PRESCALE_LOWPASS) {
            PrescalePolicy::LOWPASS2
        }
        else {
            PrescalePolicy::NONE
        };

        Ok(SampleLayout {
            width: usize::from(header.width),
            height: usize::from(header.height),
            encoded_format,
            levels: header.transform_levels,
            curve,
            prescale,
            gop_position: header.gop_position,
        })
    }

    fn skip_levels(&self, resolution: DecodedResolution) -> u8 {
        resolution.levels_skipped().min(self.levels)
    }

    fn default_colorspace(&self) -> u32 {
        match self.encoded_format {
            EncodedFormat::Yuv422 => 1,
            _ => 2,
        }
    }
}

fn rebuild_pyramid(
    channel: &ParsedChannel<'_>,
    width: usize,
    height: usize,
    layout: &SampleLayout,
) -> Result<WaveletPyramid> {
    let raw = match &channel.lowpass {
        Some(raw) => raw,
        None => return corrupt_error("channel missing lowpass band"),
    };

    let (low_w, low_h) = band_dimensions(width, height, layout.levels);
    if usize::from(raw.width) != low_w || usize::from(raw.height) != low_h {
        return corrupt_error("lowpass dimensions do not match header");
    }
    let lowpass = band::decode_lowpass_raw(raw.data, low_w, low_h)?;

    let mut bands = Vec::with_capacity(channel.subbands.len());
    for subband in &channel.subbands {
        if subband.level == 0 || subband.level > layout.levels || subband.band > 3 {
            return corrupt_error("subband position out of range");
        }

        let (band_w, band_h) = band_dimensions(width, height, subband.level);
        let mut plane = band::decode_band(subband.data, band_w, band_h, layout.curve)?;
        band::dequantize_plane(&mut plane, subband.quant);

        bands.push(Subband {
            band: subband.band,
            level: subband.level,
            quant: subband.quant,
            plane,
        });
    }

    let pyramid =
        WaveletPyramid { width, height, levels: layout.levels, lowpass, bands };

    // Synthesis needs the full highpass complement; verify before fan-in.
    for level in 1..=layout.levels {
        for band_index in 1..=3 {
            if pyramid.find_band(level, band_index).is_none() {
                return corrupt_error("required subband missing");
            }
        }
    }

    Ok(pyramid)
}

/// Remove residual lowpass gain after partial synthesis, with rounding.
fn scale_down(plane: &mut Plane16, bits: u32) {
    if bits == 0 {
        return;
    }
    let round = 1i32 << (bits - 1);
    for y in 0..plane.height() {
        for value in plane.row_mut(y) {
            *value = ((i32::from(*value) + round) >> bits) as i16;
        }
    }
}
