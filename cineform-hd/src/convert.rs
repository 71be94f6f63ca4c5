// Cineform
// Copyright (c) 2025 The Project Cineform Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `convert` module is the pixel-format seam between host frame buffers and the planar
//! 16-bit channels the transform operates on.
//!
//! Packed 8-bit formats are carried at their native depth (the transform headroom covers
//! three levels of lowpass gain without prescaling); the 16-bit Bayer container is assumed
//! to hold 12-bit sensor data; `Planar16` passes channels through verbatim and expects the
//! caller to respect 10-bit range. No color-space math happens here: Y'CbCr sources stay
//! Y'CbCr and RGB sources stay RGB.

use cineform_core::errors::{config_error, Error, Result};
use cineform_core::plane::Plane16;

use crate::common::{EncodedFormat, PixelFormat};

/// Source bit depth a pixel format delivers to the transform.
pub fn source_bit_depth(format: PixelFormat) -> u32 {
    match format {
        PixelFormat::Rgb24 | PixelFormat::Bgra32 | PixelFormat::Yuy2 => 8,
        PixelFormat::Bayer16 => 12,
        PixelFormat::Planar16 => 10,
    }
}

fn packed_row_bytes(format: PixelFormat, width: usize) -> usize {
    match format {
        PixelFormat::Rgb24 => width * 3,
        PixelFormat::Bgra32 => width * 4,
        PixelFormat::Yuy2 => width * 2,
        PixelFormat::Bayer16 => width * 2,
        PixelFormat::Planar16 => width * 2,
    }
}

/// Byte size an output buffer must have for a decode into the given format.
pub fn required_frame_size(
    format: PixelFormat,
    encoded: EncodedFormat,
    width: usize,
    height: usize,
    pitch: usize,
) -> usize {
    match format {
        PixelFormat::Planar16 => {
            let mut total = 0;
            for channel in 0..encoded.channel_count() {
                let (w, h) = encoded.channel_dimensions(width, height, channel);
                total += w * h * 2;
            }
            total
        }
        _ => pitch * (height - 1) + packed_row_bytes(format, width),
    }
}

/// Convert one host frame into planar channels in encoded-format order.
pub fn import_frame(
    format: PixelFormat,
    encoded: EncodedFormat,
    width: usize,
    height: usize,
    data: &[u8],
    pitch: usize,
) -> Result<Vec<Plane16>> {
    if data.len() < required_frame_size(format, encoded, width, height, pitch) {
        return config_error("frame buffer smaller than the prepared dimensions");
    }

    let mut planes: Vec<Plane16> = (0..encoded.channel_count())
        .map(|channel| {
            let (w, h) = encoded.channel_dimensions(width, height, channel);
            Plane16::new(w, h)
        })
        .collect();

    match (format, encoded) {
        (PixelFormat::Rgb24, EncodedFormat::Rgb444) => {
            for y in 0..height {
                let row = &data[y * pitch..y * pitch + width * 3];
                for (x, px) in row.chunks_exact(3).enumerate() {
                    planes[0].set(x, y, i16::from(px[0]));
                    planes[1].set(x, y, i16::from(px[1]));
                    planes[2].set(x, y, i16::from(px[2]));
                }
            }
        }
        (PixelFormat::Bgra32, EncodedFormat::Rgba4444) => {
            for y in 0..height {
                let row = &data[y * pitch..y * pitch + width * 4];
                for (x, px) in row.chunks_exact(4).enumerate() {
                    planes[0].set(x, y, i16::from(px[2]));
                    planes[1].set(x, y, i16::from(px[1]));
                    planes[2].set(x, y, i16::from(px[0]));
                    planes[3].set(x, y, i16::from(px[3]));
                }
            }
        }
        (PixelFormat::Yuy2, EncodedFormat::Yuv422) => {
            for y in 0..height {
                let row = &data[y * pitch..y * pitch + width * 2];
                for (x2, quad) in row.chunks_exact(4).enumerate() {
                    planes[0].set(2 * x2, y, i16::from(quad[0]));
                    planes[1].set(x2, y, i16::from(quad[1]));
                    planes[0].set(2 * x2 + 1, y, i16::from(quad[2]));
                    planes[2].set(x2, y, i16::from(quad[3]));
                }
            }
        }
        (PixelFormat::Bayer16, EncodedFormat::BayerRggb) => {
            // RGGB quad to four quarter-resolution channels, 16-bit container holding
            // 12-bit samples.
            for y2 in 0..height / 2 {
                let top = &data[(2 * y2) * pitch..];
                let bottom = &data[(2 * y2 + 1) * pitch..];
                for x2 in 0..width / 2 {
                    let r = u16::from_le_bytes([top[4 * x2], top[4 * x2 + 1]]);
                    let g1 = u16::from_le_bytes([top[4 * x2 + 2], top[4 * x2 + 3]]);
                    let g2 = u16::from_le_bytes([bottom[4 * x2], bottom[4 * x2 + 1]]);
                    let b = u16::from_le_bytes([bottom[4 * x2 + 2], bottom[4 * x2 + 3]]);
                    planes[0].set(x2, y2, (r >> 4) as i16);
                    planes[1].set(x2, y2, (g1 >> 4) as i16);
                    planes[2].set(x2, y2, (g2 >> 4) as i16);
                    planes[3].set(x2, y2, (b >> 4) as i16);
                }
            }
        }
        (PixelFormat::Planar16, _) => {
            let mut offset = 0;
            for (channel, plane) in planes.iter_mut().enumerate() {
                let (w, h) = encoded.channel_dimensions(width, height, channel);
                for y in 0..h {
                    for x in 0..w {
                        let at = offset + (y * w + x) * 2;
                        plane.set(x, y, i16::from_le_bytes([data[at], data[at + 1]]));
                    }
                }
                offset += w * h * 2;
            }
        }
        _ => return config_error("no conversion between pixel format and encoded format"),
    }

    Ok(planes)
}

#[inline(always)]
fn to_u8(value: i16) -> u8 {
    i32::from(value).clamp(0, 255) as u8
}

/// Convert planar channels back into a host frame buffer.
pub fn export_frame(
    format: PixelFormat,
    encoded: EncodedFormat,
    planes: &[Plane16],
    width: usize,
    height: usize,
    out: &mut [u8],
    pitch: usize,
) -> Result<()> {
    let required = required_frame_size(format, encoded, width, height, pitch);
    if out.len() < required {
        return Err(Error::OutputTooSmall { required });
    }

    match (format, encoded) {
        (PixelFormat::Rgb24, EncodedFormat::Rgb444) => {
            for y in 0..height {
                let row = &mut out[y * pitch..y * pitch + width * 3];
                for (x, px) in row.chunks_exact_mut(3).enumerate() {
                    px[0] = to_u8(planes[0].get(x, y));
                    px[1] = to_u8(planes[1].get(x, y));
                    px[2] = to_u8(planes[2].get(x, y));
                }
            }
        }
        (PixelFormat::Bgra32, EncodedFormat::Rgba4444) => {
            for y in 0..height {
                let row = &mut out[y * pitch..y * pitch + width * 4];
                for (x, px) in row.chunks_exact_mut(4).enumerate() {
                    px[0] = to_u8(planes[2].get(x, y));
                    px[1] = to_u8(planes[1].get(x, y));
                    px[2] = to_u8(planes[0].get(x, y));
                    px[3] = to_u8(planes[3].get(x, y));
                }
            }
        }
        (PixelFormat::Yuy2, EncodedFormat::Yuv422) => {
            for y in 0..height {
                let row = &mut out[y * pitch..y * pitch + width * 2];
                for (x2, quad) in row.chunks_exact_mut(4).enumerate() {
                    quad[0] = to_u8(planes[0].get(2 * x2, y));
                    quad[1] = to_u8(planes[1].get(x2, y));
                    quad[2] = to_u8(planes[0].get(2 * x2 + 1, y));
                    quad[3] = to_u8(planes[2].get(x2, y));
                }
            }
        }
        (PixelFormat::Bayer16, EncodedFormat::BayerRggb) => {
            for y2 in 0..height / 2 {
                for x2 in 0..width / 2 {
                    let r = (planes[0].get(x2, y2).clamp(0, 4095) as u16) << 4;
                    let g1 = (planes[1].get(x2, y2).clamp(0, 4095) as u16) << 4;
                    let g2 = (planes[2].get(x2, y2).clamp(0, 4095) as u16) << 4;
                    let b = (planes[3].get(x2, y2).clamp(0, 4095) as u16) << 4;

                    let top = (2 * y2) * pitch + 4 * x2;
                    out[top..top + 2].copy_from_slice(&r.to_le_bytes());
                    out[top + 2..top + 4].copy_from_slice(&g1.to_le_bytes());

                    let bottom = (2 * y2 + 1) * pitch + 4 * x2;
                    out[bottom..bottom + 2].copy_from_slice(&g2.to_le_bytes());
                    out[bottom + 2..bottom + 4].copy_from_slice(&b.to_le_bytes());
                }
            }
        }
        (PixelFormat::Planar16, _) => {
            let mut offset = 0;
            for (channel, plane) in planes.iter().enumerate() {
                let (w, h) = encoded.channel_dimensions(width, height, channel);
                for y in 0..h {
                    for x in 0..w {
                        let at = offset + (y * w + x) * 2;
                        out[at..at + 2].copy_from_slice(&plane.get(x, y).to_le_bytes());
                    }
                }
                offset += w * h * 2;
            }
        }
        _ => return config_error("no conversion between pixel format and encoded format"),
    }

    Ok(())
}

/// Pack three planes into 10-bit RGB words, `(r << 20) | (g << 10) | b`, scaling each
/// value down by `shift` bits. Used for the embedded thumbnail.
pub fn pack_thumbnail(planes: [&Plane16; 3], shift: u32) -> (u16, u16, Vec<u32>) {
    let width = planes[0].width();
    let height = planes[0].height();

    let component = |plane: &Plane16, x: usize, y: usize| -> u32 {
        let value = i32::from(plane.get(x.min(plane.width() - 1), y.min(plane.height() - 1)));
        ((value >> shift).clamp(0, 1023)) as u32
    };

    let mut packed = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            let r = component(planes[0], x, y);
            let g = component(planes[1], x, y);
            let b = component(planes[2], x, y);
            packed.push((r << 20) | (g << 10) | b);
        }
    }

    (width as u16, height as u16, packed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_rgb24_roundtrip() {
        let width = 4;
        let height = 2;
        let pitch = width * 3 + 2;

        let mut frame = vec![0u8; pitch * height];
        for y in 0..height {
            for x in 0..width {
                frame[y * pitch + 3 * x] = (x * 40) as u8;
                frame[y * pitch + 3 * x + 1] = (y * 100) as u8;
                frame[y * pitch + 3 * x + 2] = 200;
            }
        }

        let planes =
            import_frame(PixelFormat::Rgb24, EncodedFormat::Rgb444, width, height, &frame, pitch)
                .unwrap();

        assert_eq!(planes.len(), 3);
        assert_eq!(planes[0].get(2, 1), 80);
        assert_eq!(planes[1].get(0, 1), 100);
        assert_eq!(planes[2].get(3, 0), 200);

        let mut out = vec![0u8; pitch * height];
        export_frame(
            PixelFormat::Rgb24,
            EncodedFormat::Rgb444,
            &planes,
            width,
            height,
            &mut out,
            pitch,
        )
        .unwrap();

        for y in 0..height {
            let a = &frame[y * pitch..y * pitch + width * 3];
            let b = &out[y * pitch..y * pitch + width * 3];
            assert_eq!(a, b);
        }
    }

    #[test]
    fn verify_yuy2_plane_dimensions() {
        let width = 8;
        let height = 2;
        let frame = vec![128u8; width * 2 * height];

        let planes =
            import_frame(PixelFormat::Yuy2, EncodedFormat::Yuv422, width, height, &frame, width * 2)
                .unwrap();

        assert_eq!((planes[0].width(), planes[0].height()), (8, 2));
        assert_eq!((planes[1].width(), planes[1].height()), (4, 2));
        assert_eq!((planes[2].width(), planes[2].height()), (4, 2));
    }

    #[test]
    fn verify_bayer_roundtrip() {
        let width = 4;
        let height = 4;
        let pitch = width * 2;

        let mut frame = vec![0u8; pitch * height];
        for y in 0..height {
            for x in 0..width {
                let value = ((x + y * width) as u16) << 4;
                frame[y * pitch + 2 * x..y * pitch + 2 * x + 2]
                    .copy_from_slice(&value.to_le_bytes());
            }
        }

        let planes =
            import_frame(PixelFormat::Bayer16, EncodedFormat::BayerRggb, width, height, &frame, pitch)
                .unwrap();
        assert_eq!(planes.len(), 4);
        assert_eq!((planes[0].width(), planes[0].height()), (2, 2));

        let mut out = vec![0u8; pitch * height];
        export_frame(
            PixelFormat::Bayer16,
            EncodedFormat::BayerRggb,
            &planes,
            width,
            height,
            &mut out,
            pitch,
        )
        .unwrap();

        assert_eq!(frame, out);
    }

    #[test]
    fn verify_undersized_output_fails() {
        let planes = vec![Plane16::new(4, 2); 3];
        let mut out = vec![0u8; 10];

        match export_frame(
            PixelFormat::Rgb24,
            EncodedFormat::Rgb444,
            &planes,
            4,
            2,
            &mut out,
            12,
        ) {
            Err(Error::OutputTooSmall { required }) => assert_eq!(required, 24),
            other => panic!("expected OutputTooSmall, got {:?}", other),
        }
    }
}
