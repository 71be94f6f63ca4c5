// Cineform
// Copyright (c) 2025 The Project Cineform Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `band` module encodes and decodes one highpass subband.
//!
//! Encoding scans the quantized band in row-major order, emitting run codes for zero
//! stretches and magnitude+sign codes for coefficients, then the band-end marker, then
//! byte padding. Decoding drives the chunked state machine until the band-end entry,
//! bounds-checked against the band area. The deepest lowpass band bypasses all of this and
//! is stored as raw big-endian 16-bit values.

use cineform_core::errors::{corrupt_error, Result};
use cineform_core::io::{BitReader, BitWriter};
use cineform_core::plane::Plane16;

use crate::fsm::{Fsm, CHUNK_BITS, STATE_BAND_END, STATE_ESCAPE, STATE_INVALID};
use crate::quant::{dequantize, quantize, CompandingCurve};
use crate::vlc::{Codebook, MAX_MAGNITUDE};

/// Quantize and entropy-code one highpass band.
pub fn encode_band(
    plane: &Plane16,
    divisor: u16,
    curve: CompandingCurve,
    lossless: bool,
) -> Vec<u8> {
    let book = Codebook::get();
    let mut bw = BitWriter::with_capacity(plane.width() * plane.height() / 4);

    let mut run = 0u32;

    for y in 0..plane.height() {
        for &value in plane.row(y) {
            let quantized = quantize(i32::from(value), divisor);

            if quantized == 0 {
                run += 1;
                continue;
            }

            if run > 0 {
                book.write_run(&mut bw, run);
                run = 0;
            }

            let negative = quantized < 0;
            let magnitude = quantized.unsigned_abs();
            let companded = curve.compand(magnitude);

            if lossless && (companded > MAX_MAGNITUDE || curve.expand(companded) != magnitude) {
                book.write_escape(&mut bw, magnitude as u16, negative);
            }
            else {
                // Saturate to the top of the codebook in lossy modes.
                book.write_value(&mut bw, companded.min(MAX_MAGNITUDE), negative);
            }
        }
    }

    if run > 0 {
        book.write_run(&mut bw, run);
    }

    book.write_band_end(&mut bw);
    bw.into_bytes()
}

/// Decode one band payload into a quantized-domain plane of the given dimensions.
pub fn decode_band(
    data: &[u8],
    width: usize,
    height: usize,
    curve: CompandingCurve,
) -> Result<Plane16> {
    let fsm = Fsm::get()?;
    let total = width * height;

    let mut plane = Plane16::new(width, height);
    let mut emitted = 0usize;
    let mut state = 0u16;
    let mut br = BitReader::new(data);

    let mut put = |plane: &mut Plane16, index: usize, value: i32| -> Result<()> {
        if index >= total {
            return corrupt_error("coefficient outside band area");
        }
        plane.set(index % width, index / width, value.clamp(-32768, 32767) as i16);
        Ok(())
    };

    loop {
        let chunk = br.peek_bits(CHUNK_BITS);
        let entry = *fsm.entry(state, chunk);

        if entry.next_state == STATE_INVALID {
            return corrupt_error("undefined decoder transition");
        }

        br.skip_bits(u32::from(entry.bits_used))?;

        emitted += usize::from(entry.pre_zeros);

        if entry.value0 != 0 {
            let signed = i32::from(entry.value0);
            put(&mut plane, emitted, signed.signum() * curve.expand(signed.unsigned_abs()) as i32)?;
            emitted += 1;
        }
        if entry.value1 != 0 {
            let signed = i32::from(entry.value1);
            put(&mut plane, emitted, signed.signum() * curve.expand(signed.unsigned_abs()) as i32)?;
            emitted += 1;
        }

        emitted += usize::from(entry.post_zeros);

        if emitted > total {
            return corrupt_error("zero run outside band area");
        }

        match entry.next_state {
            STATE_BAND_END => break,
            STATE_ESCAPE => {
                // Escaped coefficients carry the quantized magnitude verbatim; no
                // expansion applies.
                let magnitude = br.get_bits(16)? as i32;
                let negative = br.get_bit()?;
                put(&mut plane, emitted, if negative { -magnitude } else { magnitude })?;
                emitted += 1;
                state = 0;
            }
            next => state = next,
        }
    }

    if emitted != total {
        return corrupt_error("band ended before area was covered");
    }

    Ok(plane)
}

/// Undo the band divisor in place.
pub fn dequantize_plane(plane: &mut Plane16, divisor: u16) {
    if divisor <= 1 {
        return;
    }
    for y in 0..plane.height() {
        for value in plane.row_mut(y) {
            *value = dequantize(i32::from(*value), divisor).clamp(-32768, 32767) as i16;
        }
    }
}

/// Parse a raw big-endian 16-bit lowpass payload.
pub fn decode_lowpass_raw(data: &[u8], width: usize, height: usize) -> Result<Plane16> {
    if data.len() != width * height * 2 {
        return corrupt_error("lowpass payload size mismatch");
    }

    let mut plane = Plane16::new(width, height);
    let mut words = data.chunks_exact(2);

    for y in 0..height {
        for x in 0..width {
            let pair = words.next().expect("sized above");
            plane.set(x, y, i16::from_be_bytes([pair[0], pair[1]]));
        }
    }

    Ok(plane)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cineform_core::errors::Error;

    #[test]
    fn verify_zero_band_payload_shape() {
        // An 8x8 zero plane codes as exactly one maximum-run code and the end marker:
        // 00110 (run of 64) ++ 11111111 ++ 000 pad = 0x37 0xf8.
        let plane = Plane16::new(8, 8);

        let payload = encode_band(&plane, 4, CompandingCurve::None, false);
        assert_eq!(payload, &[0x37, 0xf8]);

        let decoded = decode_band(&payload, 8, 8, CompandingCurve::None).unwrap();
        assert!(decoded.is_same_content(&plane));
    }

    #[test]
    fn verify_single_coefficient_band() {
        let mut plane = Plane16::new(8, 8);
        plane.set(5, 3, 100);

        let payload = encode_band(&plane, 1, CompandingCurve::None, false);
        let decoded = decode_band(&payload, 8, 8, CompandingCurve::None).unwrap();

        assert!(decoded.is_same_content(&plane));

        // Token structure: runs spanning the 29 leading zeros, the magnitude with a
        // positive sign bit, runs spanning the 34 trailing zeros, then the end marker.
        use crate::vlc::{naive_decode_symbol, Codebook, Symbol};
        let book = Codebook::get();
        let mut br = BitReader::new(&payload);

        let mut leading = 0u32;
        let value = loop {
            match naive_decode_symbol(book, &mut br).unwrap() {
                Symbol::Run(count) => leading += u32::from(count),
                Symbol::Value(value) => break value,
                other => panic!("unexpected {:?}", other),
            }
        };
        assert_eq!(leading, 29);
        assert_eq!(value, 100);

        let mut trailing = 0u32;
        loop {
            match naive_decode_symbol(book, &mut br).unwrap() {
                Symbol::Run(count) => trailing += u32::from(count),
                Symbol::BandEnd => break,
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(trailing, 34);
    }

    #[test]
    fn verify_quantized_roundtrip_error_bound() {
        use rand::rngs::SmallRng;
        use rand::{Rng, SeedableRng};

        let mut rng = SmallRng::seed_from_u64(0xabcd);
        let samples: Vec<i16> = (0..16 * 16).map(|_| rng.gen_range(-200..200)).collect();
        let plane = Plane16::from_samples(16, 16, &samples);

        let divisor = 6;
        let payload = encode_band(&plane, divisor, CompandingCurve::Cubic, false);
        let mut decoded = decode_band(&payload, 16, 16, CompandingCurve::Cubic).unwrap();
        dequantize_plane(&mut decoded, divisor);

        // Quantization contributes up to half a step; the cubic curve can skip one more.
        for y in 0..16 {
            for x in 0..16 {
                let error = (i32::from(decoded.get(x, y)) - i32::from(plane.get(x, y))).abs();
                assert!(error <= 2 * i32::from(divisor), "error {} at ({}, {})", error, x, y);
            }
        }
    }

    #[test]
    fn verify_lossless_roundtrip_with_escapes() {
        let mut plane = Plane16::new(4, 4);
        plane.set(0, 0, 12000);
        plane.set(1, 0, -255);
        plane.set(2, 2, 254);
        plane.set(3, 3, -32000);

        let payload = encode_band(&plane, 1, CompandingCurve::Piecewise, true);
        let decoded = decode_band(&payload, 4, 4, CompandingCurve::Piecewise).unwrap();

        assert!(decoded.is_same_content(&plane));
    }

    #[test]
    fn verify_truncated_payload_fails() {
        let mut plane = Plane16::new(8, 8);
        for x in 0..8 {
            plane.set(x, 4, 50);
        }

        let payload = encode_band(&plane, 1, CompandingCurve::None, false);
        let cut = &payload[..payload.len() - 1];

        match decode_band(cut, 8, 8, CompandingCurve::None) {
            Err(Error::Truncated { .. }) | Err(Error::Corrupt(_)) => (),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn verify_oversized_run_fails() {
        // A payload announcing more zeros than the band holds must be rejected.
        let book = Codebook::get();
        let mut bw = BitWriter::new();
        book.write_run(&mut bw, 128);
        book.write_band_end(&mut bw);
        let payload = bw.into_bytes();

        match decode_band(&payload, 8, 8, CompandingCurve::None) {
            Err(Error::Corrupt(_)) => (),
            other => panic!("expected corrupt, got {:?}", other),
        }
    }

    #[test]
    fn verify_lowpass_raw_roundtrip() {
        let plane = Plane16::from_samples(3, 2, &[100, -200, 300, -400, 500, -600]);

        let mut bytes = Vec::new();
        for y in 0..2 {
            for &value in plane.row(y) {
                bytes.extend_from_slice(&(value as u16).to_be_bytes());
            }
        }

        let decoded = decode_lowpass_raw(&bytes, 3, 2).unwrap();
        assert!(decoded.is_same_content(&plane));
    }
}
