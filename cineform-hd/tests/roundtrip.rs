// Cineform
// Copyright (c) 2025 The Project Cineform Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Whole-sample round trips through the encoder and decoder.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use cineform_core::errors::Error;
use cineform_core::sample::{SampleFlags, SampleParser};
use cineform_hd::common::{DecodedResolution, EncodedFormat, PixelFormat, Quality};
use cineform_hd::encoder::EncoderFlags;
use cineform_hd::{Decoder, Encoder};
use cineform_metadata::tags::{MetadataWriter, TAG_CLIP_GUID, TAG_COLORSPACE};

/// Planar 10-bit-range channels packed as little-endian i16, channels consecutive.
fn random_planar16(width: usize, height: usize, channels: usize, rng: &mut SmallRng) -> Vec<u8> {
    let mut data = Vec::with_capacity(width * height * channels * 2);
    for _ in 0..width * height * channels {
        let value: i16 = rng.gen_range(-400..400);
        data.extend_from_slice(&value.to_le_bytes());
    }
    data
}

fn gradient_rgb24(width: usize, height: usize) -> Vec<u8> {
    let mut frame = vec![0u8; width * height * 3];
    for y in 0..height {
        for x in 0..width {
            let at = (y * width + x) * 3;
            frame[at] = (x * 255 / width) as u8;
            frame[at + 1] = (y * 255 / height) as u8;
            frame[at + 2] = ((x * 255 / width + y * 255 / height) / 2) as u8;
        }
    }
    frame
}

fn psnr_8bit(a: &[u8], b: &[u8]) -> f64 {
    assert_eq!(a.len(), b.len());
    let mse: f64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = f64::from(x) - f64::from(y);
            d * d
        })
        .sum::<f64>()
        / a.len() as f64;
    if mse == 0.0 {
        return f64::INFINITY;
    }
    10.0 * (255.0f64 * 255.0 / mse).log10()
}

#[test]
fn lossless_sample_roundtrip_is_bit_exact() {
    let width = 64;
    let height = 48;
    let mut rng = SmallRng::seed_from_u64(0x10556);

    let frame = random_planar16(width, height, 3, &mut rng);

    let mut encoder = Encoder::new();
    encoder
        .prepare(
            width,
            height,
            PixelFormat::Planar16,
            EncodedFormat::Rgb444,
            EncoderFlags::empty(),
            Quality::Lossless,
        )
        .unwrap();

    let mut metadata = MetadataWriter::new();
    metadata.add_guid(TAG_CLIP_GUID, [0xab; 16]).add_u32(TAG_COLORSPACE, 2);
    let chunk = metadata.finish();

    encoder.attach_metadata(chunk.clone());
    encoder.encode_sample(&frame, width * 2).unwrap();
    let sample = encoder.sample_data().to_vec();

    // The attached metadata chunk is recoverable byte for byte.
    let parsed = SampleParser::parse(&sample).unwrap();
    assert_eq!(parsed.metadata, Some(chunk.as_slice()));

    let mut decoder = Decoder::new();
    decoder.prepare(width, height, PixelFormat::Planar16, DecodedResolution::Full).unwrap();

    let mut out = vec![0u8; frame.len()];
    decoder.decode_sample(&sample, &mut out, width * 2).unwrap();

    assert_eq!(frame, out);
}

#[test]
fn lossy_gradient_meets_quality_floor() {
    let width = 320;
    let height = 240;
    let frame = gradient_rgb24(width, height);

    let mut encoder = Encoder::new();
    encoder
        .prepare(
            width,
            height,
            PixelFormat::Rgb24,
            EncodedFormat::Rgb444,
            EncoderFlags::empty(),
            Quality::FilmScan1,
        )
        .unwrap();
    encoder.encode_sample(&frame, width * 3).unwrap();
    let sample = encoder.sample_data().to_vec();

    // The smooth gradient compresses far below the raw size.
    assert!(sample.len() < frame.len() / 2);

    let mut decoder = Decoder::new();
    decoder.prepare(width, height, PixelFormat::Rgb24, DecodedResolution::Full).unwrap();

    let mut out = vec![0u8; frame.len()];
    decoder.decode_sample(&sample, &mut out, width * 3).unwrap();

    let max_error =
        frame.iter().zip(&out).map(|(&a, &b)| (i16::from(a) - i16::from(b)).abs()).max().unwrap();
    assert!(max_error <= 4, "max error {}", max_error);

    let psnr = psnr_8bit(&frame, &out);
    assert!(psnr >= 38.0, "psnr {:.2}", psnr);
}

#[test]
fn truncated_sample_fails_then_decoder_recovers() {
    let width = 64;
    let height = 32;
    let frame = gradient_rgb24(width, height);

    let mut encoder = Encoder::new();
    encoder
        .prepare(
            width,
            height,
            PixelFormat::Rgb24,
            EncodedFormat::Rgb444,
            EncoderFlags::empty(),
            Quality::Medium,
        )
        .unwrap();
    encoder.encode_sample(&frame, width * 3).unwrap();
    let sample = encoder.sample_data().to_vec();

    let mut decoder = Decoder::new();
    decoder.prepare(width, height, PixelFormat::Rgb24, DecodedResolution::Full).unwrap();

    let mut out = vec![0u8; frame.len()];

    let cut = &sample[..sample.len() * 9 / 10];
    match decoder.decode_sample(cut, &mut out, width * 3) {
        Err(Error::Truncated { .. }) | Err(Error::Corrupt(_)) => (),
        other => panic!("expected truncation failure, got {:?}", other),
    }

    // The same decoder instance must decode the intact sample afterwards.
    decoder.decode_sample(&sample, &mut out, width * 3).unwrap();
}

#[test]
fn gop_pair_second_frame_is_exact_in_lossless() {
    let width = 32;
    let height = 16;
    let mut rng = SmallRng::seed_from_u64(0x60f);

    // Bound the range so temporal sums stay inside lossless transform headroom.
    let mut first = Vec::new();
    let mut second = Vec::new();
    for _ in 0..width * height * 3 {
        first.extend_from_slice(&rng.gen_range(-200i16..200).to_le_bytes());
        second.extend_from_slice(&rng.gen_range(-200i16..200).to_le_bytes());
    }

    let mut encoder = Encoder::new();
    encoder
        .prepare(
            width,
            height,
            PixelFormat::Planar16,
            EncodedFormat::Rgb444,
            EncoderFlags::TWO_FRAME_GOP,
            Quality::Lossless,
        )
        .unwrap();

    let (key, p) = encoder.encode_frame_pair(&first, &second, width * 2).unwrap();

    let mut decoder = Decoder::new();
    decoder.prepare(width, height, PixelFormat::Planar16, DecodedResolution::Full).unwrap();

    let mut out = vec![0u8; first.len()];

    // The key sample yields the pair average; the P sample then reconstructs the second
    // frame exactly from the retained temporal lowpass.
    decoder.decode_sample(&key, &mut out, width * 2).unwrap();
    decoder.decode_sample(&p, &mut out, width * 2).unwrap();

    assert_eq!(second, out);
}

#[test]
fn p_sample_without_key_is_rejected() {
    let width = 32;
    let height = 16;
    let frame = vec![0u8; width * height * 3 * 2];

    let mut encoder = Encoder::new();
    encoder
        .prepare(
            width,
            height,
            PixelFormat::Planar16,
            EncodedFormat::Rgb444,
            EncoderFlags::TWO_FRAME_GOP,
            Quality::High,
        )
        .unwrap();
    let (_, p) = encoder.encode_frame_pair(&frame, &frame, width * 2).unwrap();

    let mut decoder = Decoder::new();
    decoder.prepare(width, height, PixelFormat::Planar16, DecodedResolution::Full).unwrap();

    let mut out = vec![0u8; frame.len()];
    match decoder.decode_sample(&p, &mut out, width * 2) {
        Err(Error::Corrupt(_)) => (),
        other => panic!("expected corrupt, got {:?}", other),
    }
}

#[test]
fn half_resolution_decode() {
    let width = 64;
    let height = 64;
    let frame = gradient_rgb24(width, height);

    let mut encoder = Encoder::new();
    encoder
        .prepare(
            width,
            height,
            PixelFormat::Rgb24,
            EncodedFormat::Rgb444,
            EncoderFlags::empty(),
            Quality::High,
        )
        .unwrap();
    encoder.encode_sample(&frame, width * 3).unwrap();
    let sample = encoder.sample_data().to_vec();

    let mut decoder = Decoder::new();
    decoder.prepare(width, height, PixelFormat::Rgb24, DecodedResolution::Half).unwrap();

    let mut out = vec![0u8; (width / 2) * (height / 2) * 3];
    decoder.decode_sample(&sample, &mut out, (width / 2) * 3).unwrap();

    // The half-resolution output tracks the source gradient.
    let center = &out[((height / 4) * (width / 2) + width / 4) * 3..][..3];
    let source = &frame[((height / 2) * width + width / 2) * 3..][..3];
    for (a, b) in center.iter().zip(source) {
        assert!((i16::from(*a) - i16::from(*b)).abs() <= 8, "{} vs {}", a, b);
    }
}

#[test]
fn half_resolution_decode_with_prescaled_lowpass() {
    let width = 64;
    let height = 32;

    // Planar16 sources are deeper than 8 bits, so the encoder prescales the lowpass
    // branch; partial synthesis has to fold that shift into its final rescale.
    let mut frame = Vec::with_capacity(width * height * 3 * 2);
    for channel in 0..3i16 {
        for y in 0..height as i16 {
            for x in 0..width as i16 {
                let value = 4 * x + 4 * y + 16 * channel;
                frame.extend_from_slice(&value.to_le_bytes());
            }
        }
    }

    let mut encoder = Encoder::new();
    encoder
        .prepare(
            width,
            height,
            PixelFormat::Planar16,
            EncodedFormat::Rgb444,
            EncoderFlags::empty(),
            Quality::High,
        )
        .unwrap();
    encoder.encode_sample(&frame, width * 2).unwrap();
    let sample = encoder.sample_data().to_vec();

    let parsed = SampleParser::parse(&sample).unwrap();
    assert!(parsed.header.flags.contains(SampleFlags::PRESCALE_LOWPASS));

    let mut decoder = Decoder::new();
    decoder.prepare(width, height, PixelFormat::Planar16, DecodedResolution::Half).unwrap();

    let half_w = width / 2;
    let half_h = height / 2;
    let mut out = vec![0u8; half_w * half_h * 3 * 2];
    decoder.decode_sample(&sample, &mut out, half_w * 2).unwrap();

    // Each half-resolution sample tracks the mean of its 2x2 source block.
    for channel in 0..3usize {
        for y2 in 0..half_h {
            for x2 in 0..half_w {
                let at = (channel * half_w * half_h + y2 * half_w + x2) * 2;
                let got = i32::from(i16::from_le_bytes([out[at], out[at + 1]]));
                let expect = 8 * x2 as i32 + 8 * y2 as i32 + 4 + 16 * channel as i32;
                assert!(
                    (got - expect).abs() <= 8,
                    "channel {} ({}, {}): got {} expected {}",
                    channel,
                    x2,
                    y2,
                    got,
                    expect
                );
            }
        }
    }
}

#[test]
fn thumbnail_without_synthesis() {
    let width = 128;
    let height = 64;
    let frame = gradient_rgb24(width, height);

    let mut encoder = Encoder::new();
    encoder
        .prepare(
            width,
            height,
            PixelFormat::Rgb24,
            EncodedFormat::Rgb444,
            EncoderFlags::empty(),
            Quality::High,
        )
        .unwrap();
    encoder.encode_sample(&frame, width * 3).unwrap();

    let decoder = Decoder::new();
    let (thumb_w, thumb_h, packed) = decoder.thumbnail(encoder.sample_data()).unwrap();

    assert_eq!((thumb_w, thumb_h), (16, 8));
    assert_eq!(packed.len(), 16 * 8);

    // 10-bit components; the red channel ramps with x like the source does.
    let red = |word: u32| (word >> 20) & 0x3ff;
    assert!(red(packed[0]) < red(packed[15]));
    assert!(packed.iter().all(|&word| word >> 30 == 0));
}

#[test]
fn output_too_small_is_reported() {
    let width = 32;
    let height = 32;
    let frame = gradient_rgb24(width, height);

    let mut encoder = Encoder::new();
    encoder
        .prepare(
            width,
            height,
            PixelFormat::Rgb24,
            EncodedFormat::Rgb444,
            EncoderFlags::empty(),
            Quality::Medium,
        )
        .unwrap();
    encoder.encode_sample(&frame, width * 3).unwrap();

    let mut decoder = Decoder::new();
    decoder.prepare(width, height, PixelFormat::Rgb24, DecodedResolution::Full).unwrap();

    let mut out = vec![0u8; 16];
    match decoder.decode_sample(encoder.sample_data(), &mut out, width * 3) {
        Err(Error::OutputTooSmall { required }) => assert_eq!(required, width * height * 3),
        other => panic!("expected OutputTooSmall, got {:?}", other),
    }
}
