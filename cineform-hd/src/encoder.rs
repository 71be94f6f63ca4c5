// Cineform
// Copyright (c) 2025 The Project Cineform Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `encoder` module is the encode-side coordinator: conversion, forward transform,
//! quantized band coding, and container serialization, with the per-stage work fanned out
//! across worker threads.

use bitflags::bitflags;
use log::debug;

use cineform_core::errors::{config_error, Result};
use cineform_core::plane::Plane16;
use cineform_core::sample::{SampleFlags, SampleHeader, SampleWriter};

use crate::band;
use crate::common::{
    transform_levels, validate_encode_config, EncodedFormat, FieldType, PixelFormat,
    PrescalePolicy, Quality, QuantSchedule,
};
use crate::convert;
use crate::pool::fan_out;
use crate::quant::CompandingCurve;
use crate::wavelet::{self, WaveletPyramid};

bitflags! {
    /// Encoder configuration flags passed to prepare.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct EncoderFlags: u32 {
        /// Encode frame pairs through the temporal transform (key + P samples).
        const TWO_FRAME_GOP = 0x0001;
        /// The source is interlaced; fields are tagged in the sample header.
        const INTERLACED_SOURCE = 0x0002;
    }
}

/// The negotiated encode configuration, returned by prepare.
#[derive(Copy, Clone, Debug)]
pub struct EncodeParams {
    pub width: usize,
    pub height: usize,
    pub pixel_format: PixelFormat,
    pub encoded_format: EncodedFormat,
    pub quality: Quality,
    pub flags: EncoderFlags,
    pub levels: u8,
    pub prescale: PrescalePolicy,
    pub curve: CompandingCurve,
    pub bit_depth: u32,
}

pub struct Encoder {
    params: Option<EncodeParams>,
    pending_metadata: Option<Vec<u8>>,
    sample: Vec<u8>,
    threads: usize,
    frame_number: u32,
}

impl Encoder {
    pub fn new() -> Self {
        let threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Encoder { params: None, pending_metadata: None, sample: Vec::new(), threads, frame_number: 0 }
    }

    /// Bound the worker fan-out; 1 disables threading.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Input pixel formats in preference order.
    pub fn input_formats() -> &'static [PixelFormat] {
        &[
            PixelFormat::Planar16,
            PixelFormat::Yuy2,
            PixelFormat::Rgb24,
            PixelFormat::Bgra32,
            PixelFormat::Bayer16,
        ]
    }

    /// Negotiate the encode configuration. Returns the parameters actually chosen.
    pub fn prepare(
        &mut self,
        width: usize,
        height: usize,
        pixel_format: PixelFormat,
        encoded_format: EncodedFormat,
        flags: EncoderFlags,
        quality: Quality,
    ) -> Result<EncodeParams> {
        validate_encode_config(width, height, pixel_format, encoded_format, quality)?;

        let bit_depth = convert::source_bit_depth(pixel_format);
        let curve = if quality.is_lossless() {
            CompandingCurve::Piecewise
        }
        else {
            CompandingCurve::Cubic
        };

        let params = EncodeParams {
            width,
            height,
            pixel_format,
            encoded_format,
            quality,
            flags,
            levels: transform_levels(quality),
            prescale: PrescalePolicy::for_source(bit_depth, quality),
            curve,
            bit_depth,
        };

        debug!(
            "prepared encoder: {}x{} {:?} -> {:?} at {:?}",
            width, height, pixel_format, encoded_format, quality
        );

        self.params = Some(params);
        self.frame_number = 0;
        Ok(params)
    }

    /// Bind a metadata chunk to the next encoded sample.
    pub fn attach_metadata(&mut self, chunk: Vec<u8>) {
        self.pending_metadata = Some(chunk);
    }

    /// Encode one frame into an intra sample. The result is retrieved with
    /// [`Encoder::sample_data`].
    pub fn encode_sample(&mut self, frame: &[u8], pitch: usize) -> Result<()> {
        let params = match self.params {
            Some(params) => params,
            None => return config_error("encoder not prepared"),
        };

        let planes = convert::import_frame(
            params.pixel_format,
            params.encoded_format,
            params.width,
            params.height,
            frame,
            pitch,
        )?;

        let pyramids = self.transform_stage(&params, planes, params.levels);

        let frame_number = self.frame_number;
        self.frame_number += 1;

        self.sample = self.serialize_sample(&params, &pyramids, frame_number, 0, true)?;
        Ok(())
    }

    /// The encoded bytes of the most recent sample.
    pub fn sample_data(&self) -> &[u8] {
        &self.sample
    }

    /// Encode a frame pair through the temporal transform, returning the key sample and
    /// the P sample. The P sample carries only the temporal-highpass bands.
    pub fn encode_frame_pair(
        &mut self,
        first: &[u8],
        second: &[u8],
        pitch: usize,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let params = match self.params {
            Some(params) if params.flags.contains(EncoderFlags::TWO_FRAME_GOP) => params,
            Some(_) => return config_error("encoder not prepared for 2-frame GOP"),
            None => return config_error("encoder not prepared"),
        };

        let import = |frame| {
            convert::import_frame(
                params.pixel_format,
                params.encoded_format,
                params.width,
                params.height,
                frame,
                pitch,
            )
        };

        let first_planes = import(first)?;
        let second_planes = import(second)?;

        let mut low_planes = Vec::with_capacity(first_planes.len());
        let mut high_planes = Vec::with_capacity(first_planes.len());
        for (a, b) in first_planes.iter().zip(&second_planes) {
            let (low, high) = wavelet::temporal::forward_temporal(a, b);
            low_planes.push(low);
            high_planes.push(high);
        }

        // The temporal lowpass gets the full spatial pyramid; the highpass gets a single
        // spatial level to keep the P sample compact.
        let low_pyramids = self.transform_stage(&params, low_planes, params.levels);
        let high_pyramids = self.transform_stage(&params, high_planes, 1);

        let frame_number = self.frame_number & !1;
        self.frame_number = frame_number + 2;

        let key = self.serialize_sample(&params, &low_pyramids, frame_number, 1, true)?;
        let p = self.serialize_sample(&params, &high_pyramids, frame_number + 1, 2, false)?;
        Ok((key, p))
    }

    fn transform_stage(
        &self,
        params: &EncodeParams,
        planes: Vec<Plane16>,
        levels: u8,
    ) -> Vec<WaveletPyramid> {
        let prescale = params.prescale;
        fan_out(self.threads, planes, move |plane| wavelet::forward(&plane, levels, prescale))
    }

    fn serialize_sample(
        &mut self,
        params: &EncodeParams,
        pyramids: &[WaveletPyramid],
        frame_number: u32,
        gop_position: u8,
        key_frame: bool,
    ) -> Result<Vec<u8>> {
        let levels = pyramids[0].levels;

        let mut flags = SampleFlags::empty();
        if key_frame {
            flags |= SampleFlags::KEY_FRAME;
        }
        if params.flags.contains(EncoderFlags::INTERLACED_SOURCE) {
            flags |= SampleFlags::INTERLACED;
        }
        if params.prescale.spatial_prescale > 0 {
            flags |= SampleFlags::PRESCALE_LOWPASS;
        }

        let field_type = if params.flags.contains(EncoderFlags::INTERLACED_SOURCE) {
            FieldType::Interlaced
        }
        else {
            FieldType::Progressive
        };

        // Entropy-code every band of every channel in one fan-out stage.
        let jobs: Vec<(usize, u8, u8, u16, &Plane16)> = pyramids
            .iter()
            .enumerate()
            .flat_map(|(channel, pyramid)| {
                pyramid.bands.iter().map(move |sb| {
                    let quant = QuantSchedule::divisor(
                        params.quality,
                        params.encoded_format,
                        sb.level,
                        sb.band,
                    );
                    (channel, sb.band, sb.level, quant, &sb.plane)
                })
            })
            .collect();

        let curve = params.curve;
        let lossless = params.quality.is_lossless();
        let coded = fan_out(self.threads, jobs, move |(channel, band_index, level, quant, plane)| {
            let payload = band::encode_band(plane, quant, curve, lossless);
            (channel, band_index, level, quant, payload)
        });

        let mut sw = SampleWriter::new();

        sw.write_header(&SampleHeader {
            width: params.width as u16,
            height: params.height as u16,
            encoded_format: params.encoded_format as u8,
            field_type: field_type as u8,
            quality: params.quality as u8,
            transform_levels: levels,
            flags,
            gop_position,
            encode_curve: params.curve as u8,
            frame_number,
        });

        sw.write_quant_table(&QuantSchedule::table(params.quality, params.encoded_format, levels));

        for (channel, pyramid) in pyramids.iter().enumerate() {
            sw.begin_channel();

            let lowpass = &pyramid.lowpass;
            sw.write_lowpass_raw(
                lowpass.width() as u16,
                lowpass.height() as u16,
                &mut (0..lowpass.height()).map(|y| lowpass.row(y)),
            );

            for (chan, band_index, level, quant, payload) in &coded {
                if *chan == channel {
                    sw.write_subband(*band_index, *level, *quant, payload);
                }
            }

            sw.end_channel();
        }

        if let Some(chunk) = self.pending_metadata.take() {
            sw.write_metadata(&chunk);
        }

        if key_frame {
            if let Some((width, height, packed)) = self.build_thumbnail(params, pyramids) {
                sw.write_thumbnail(width, height, &packed);
            }
        }

        Ok(sw.finish())
    }

    /// Pack the deepest lowpass bands as a 10-bit RGB preview. Channels that do not share
    /// the first channel's dimensions (chroma in 4:2:2) fall back to a gray preview.
    fn build_thumbnail(
        &self,
        params: &EncodeParams,
        pyramids: &[WaveletPyramid],
    ) -> Option<(u16, u16, Vec<u32>)> {
        let first = &pyramids[0].lowpass;

        let gain_bits = 2 * u32::from(pyramids[0].levels)
            - u32::from(params.prescale.spatial_prescale)
                * u32::from(pyramids[0].levels.saturating_sub(1));
        let shift = (gain_bits as i32 + params.bit_depth as i32 - 10).max(0) as u32;

        let same_dims = pyramids.len() >= 3
            && pyramids[1..3].iter().all(|p| {
                p.lowpass.width() == first.width() && p.lowpass.height() == first.height()
            });

        let planes = if same_dims {
            [first, &pyramids[1].lowpass, &pyramids[2].lowpass]
        }
        else {
            [first, first, first]
        };

        Some(convert::pack_thumbnail(planes, shift))
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Encoder::new()
    }
}
