// Cineform
// Copyright (c) 2025 The Project Cineform Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `spatial` module implements the 1-D and 2-D 2-6 analysis and synthesis filters.
//!
//! The lowpass output is the plain pair sum; the highpass output is the pair difference
//! plus an eighth of the neighboring pair-sum gradient. The first and last highpass
//! positions use dedicated border polynomials whose synthesis duals reconstruct the border
//! pairs exactly. With the shared rounding constant the transform is exactly invertible on
//! integer data: every rounding term the synthesis filters apply is a function of the
//! transmitted lowpass band alone, so analysis and synthesis always agree on it.
//!
//! Odd-length inputs are extended by duplicating the final sample, giving both half-bands
//! ceil(N/2) outputs; axes shorter than 6 samples degenerate to the Haar pair.

use cineform_core::plane::Plane16;

/// Rounding term shared by the analysis and synthesis highpass filters.
const ROUNDING: i32 = 4;

#[inline(always)]
fn clamp16(value: i32) -> i16 {
    value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

/// One 2-6 analysis pass. `low` and `high` must each hold ceil(input.len() / 2) samples.
pub fn forward_1d(input: &[i16], low: &mut [i16], high: &mut [i16]) {
    let n = (input.len() + 1) / 2;
    debug_assert!(!input.is_empty());
    debug_assert_eq!(low.len(), n);
    debug_assert_eq!(high.len(), n);

    // Duplicate the final sample for odd-length inputs.
    let x = |i: usize| -> i32 { i32::from(input[i.min(input.len() - 1)]) };

    for (i, value) in low.iter_mut().enumerate() {
        *value = clamp16(x(2 * i) + x(2 * i + 1));
    }

    if n < 3 {
        // Too short for the 6-tap kernel.
        for (i, value) in high.iter_mut().enumerate() {
            *value = clamp16(x(2 * i) - x(2 * i + 1));
        }
        return;
    }

    high[0] = clamp16(
        (5 * x(0) - 11 * x(1) + 4 * x(2) + 4 * x(3) - x(4) - x(5) + ROUNDING) >> 3,
    );

    for i in 1..n - 1 {
        let diff = x(2 * i) - x(2 * i + 1);
        let grad = (-x(2 * i - 2) - x(2 * i - 1) + x(2 * i + 2) + x(2 * i + 3) + ROUNDING) >> 3;
        high[i] = clamp16(diff + grad);
    }

    let m = 2 * n;
    high[n - 1] = clamp16(
        (11 * x(m - 2) - 5 * x(m - 1) - 4 * x(m - 3) - 4 * x(m - 4) + x(m - 5) + x(m - 6)
            + ROUNDING)
            >> 3,
    );
}

/// One 2-6 synthesis pass. `output.len()` must be `2 * low.len()` or one less (odd case).
pub fn inverse_1d(low: &[i16], high: &[i16], output: &mut [i16]) {
    let n = low.len();
    debug_assert_eq!(high.len(), n);
    debug_assert!(output.len() == 2 * n || output.len() == 2 * n - 1);

    let out_len = output.len();
    let l = |i: usize| -> i32 { i32::from(low[i]) };
    let h = |i: usize| -> i32 { i32::from(high[i]) };

    let mut put = |output: &mut [i16], index: usize, value: i32| {
        if index < out_len {
            output[index] = clamp16(value);
        }
    };

    if n < 3 {
        for i in 0..n {
            put(output, 2 * i, (l(i) + h(i)) >> 1);
            put(output, 2 * i + 1, (l(i) - h(i)) >> 1);
        }
        return;
    }

    let even = ((11 * l(0) - 4 * l(1) + l(2) + ROUNDING) >> 3) + h(0);
    let odd = ((5 * l(0) + 4 * l(1) - l(2) + ROUNDING) >> 3) - h(0);
    put(output, 0, even >> 1);
    put(output, 1, odd >> 1);

    for i in 1..n - 1 {
        let even = ((l(i - 1) - l(i + 1) + ROUNDING) >> 3) + l(i) + h(i);
        let odd = ((l(i + 1) - l(i - 1) + ROUNDING) >> 3) + l(i) - h(i);
        put(output, 2 * i, even >> 1);
        put(output, 2 * i + 1, odd >> 1);
    }

    let even = ((5 * l(n - 1) + 4 * l(n - 2) - l(n - 3) + ROUNDING) >> 3) + h(n - 1);
    let odd = ((11 * l(n - 1) - 4 * l(n - 2) + l(n - 3) + ROUNDING) >> 3) - h(n - 1);
    put(output, 2 * n - 2, even >> 1);
    put(output, 2 * n - 1, odd >> 1);
}

/// One 2-D analysis level: rows then columns. Returns [LL, LH, HL, HH], each
/// ceil(w/2) x ceil(h/2).
pub fn forward_spatial(plane: &Plane16) -> [Plane16; 4] {
    let w = plane.width();
    let h = plane.height();
    let half_w = (w + 1) / 2;
    let half_h = (h + 1) / 2;

    // Horizontal pass over every row.
    let mut row_low = Plane16::new(half_w, h);
    let mut row_high = Plane16::new(half_w, h);

    for y in 0..h {
        // Split-borrow the two destination rows through separate planes.
        forward_1d(plane.row(y), row_low.row_mut(y), row_high.row_mut(y));
    }

    // Vertical pass over every column of both intermediates.
    let mut ll = Plane16::new(half_w, half_h);
    let mut lh = Plane16::new(half_w, half_h);
    let mut hl = Plane16::new(half_w, half_h);
    let mut hh = Plane16::new(half_w, half_h);

    let mut column = Vec::with_capacity(h);
    let mut col_low = vec![0i16; half_h];
    let mut col_high = vec![0i16; half_h];

    for x in 0..half_w {
        row_low.read_column(x, &mut column);
        forward_1d(&column, &mut col_low, &mut col_high);
        ll.write_column(x, &col_low);
        lh.write_column(x, &col_high);

        row_high.read_column(x, &mut column);
        forward_1d(&column, &mut col_low, &mut col_high);
        hl.write_column(x, &col_low);
        hh.write_column(x, &col_high);
    }

    [ll, lh, hl, hh]
}

/// One 2-D synthesis level, reversing [`forward_spatial`]. `bands` is [LL, LH, HL, HH].
pub fn inverse_spatial(bands: [&Plane16; 4], out_w: usize, out_h: usize) -> Plane16 {
    let [ll, lh, hl, hh] = bands;
    let half_w = (out_w + 1) / 2;

    debug_assert_eq!(ll.width(), half_w);
    debug_assert_eq!(ll.height(), (out_h + 1) / 2);

    // Vertical synthesis back to the row-pass intermediates.
    let mut row_low = Plane16::new(half_w, out_h);
    let mut row_high = Plane16::new(half_w, out_h);

    let mut col_low = Vec::new();
    let mut col_high = Vec::new();
    let mut column = vec![0i16; out_h];

    for x in 0..half_w {
        ll.read_column(x, &mut col_low);
        lh.read_column(x, &mut col_high);
        inverse_1d(&col_low, &col_high, &mut column);
        row_low.write_column(x, &column);

        hl.read_column(x, &mut col_low);
        hh.read_column(x, &mut col_high);
        inverse_1d(&col_low, &col_high, &mut column);
        row_high.write_column(x, &column);
    }

    // Horizontal synthesis back to the full plane.
    let mut out = Plane16::new(out_w, out_h);
    for y in 0..out_h {
        inverse_1d(row_low.row(y), row_high.row(y), out.row_mut(y));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn roundtrip_1d(input: &[i16]) {
        let n = (input.len() + 1) / 2;
        let mut low = vec![0i16; n];
        let mut high = vec![0i16; n];
        forward_1d(input, &mut low, &mut high);

        let mut output = vec![0i16; input.len()];
        inverse_1d(&low, &high, &mut output);

        assert_eq!(input, &output[..], "length {}", input.len());
    }

    #[test]
    fn verify_1d_roundtrip_all_lengths() {
        let mut rng = SmallRng::seed_from_u64(0xc0de);

        for len in 1..64 {
            let input: Vec<i16> = (0..len).map(|_| rng.gen_range(-1024..1024)).collect();
            roundtrip_1d(&input);
        }
    }

    #[test]
    fn verify_1d_roundtrip_extremes() {
        // Step edges and constants stress the border polynomials.
        roundtrip_1d(&[1000; 12]);
        roundtrip_1d(&[-1000, 1000, -1000, 1000, -1000, 1000, -1000, 1000]);
        roundtrip_1d(&[0, 0, 0, 0, 0, 0, 1000, 1000]);
        roundtrip_1d(&[7]);
        roundtrip_1d(&[3, -3]);
        roundtrip_1d(&[1, 2, 3, 4, 5]);
    }

    #[test]
    fn verify_lowpass_is_pair_sum() {
        let input = [10i16, 20, 30, 40, 50, 60, 70, 80];
        let mut low = vec![0i16; 4];
        let mut high = vec![0i16; 4];
        forward_1d(&input, &mut low, &mut high);

        assert_eq!(low, &[30, 70, 110, 150]);
    }

    #[test]
    fn verify_constant_signal_has_zero_detail() {
        let input = [25i16; 16];
        let mut low = vec![0i16; 8];
        let mut high = vec![0i16; 8];
        forward_1d(&input, &mut low, &mut high);

        assert!(high.iter().all(|&value| value == 0));
    }

    #[test]
    fn verify_2d_roundtrip() {
        let mut rng = SmallRng::seed_from_u64(0xbeef);

        for &(w, h) in &[(16, 16), (15, 9), (2, 2), (7, 3), (33, 2)] {
            let samples: Vec<i16> = (0..w * h).map(|_| rng.gen_range(-2048..2048)).collect();
            let plane = Plane16::from_samples(w, h, &samples);

            let [ll, lh, hl, hh] = forward_spatial(&plane);
            let restored = inverse_spatial([&ll, &lh, &hl, &hh], w, h);

            assert!(restored.is_same_content(&plane), "{}x{} roundtrip failed", w, h);
        }
    }
}
