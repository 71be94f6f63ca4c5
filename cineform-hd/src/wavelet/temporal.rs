// Cineform
// Copyright (c) 2025 The Project Cineform Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `temporal` module implements the transform across a frame or field pair.
//!
//! With only two samples along the time axis the 2-6 filter reduces to its 2-tap case:
//! sum and difference. The temporal lowpass feeds the key sample's spatial pyramid; the
//! temporal highpass is coded into the P sample of the 2-frame GOP.

use cineform_core::plane::Plane16;

/// Forward transform over a frame pair: elementwise (sum, difference).
pub fn forward_temporal(first: &Plane16, second: &Plane16) -> (Plane16, Plane16) {
    debug_assert_eq!(first.width(), second.width());
    debug_assert_eq!(first.height(), second.height());

    let mut low = Plane16::new(first.width(), first.height());
    let mut high = Plane16::new(first.width(), first.height());

    for y in 0..first.height() {
        let a = first.row(y);
        let b = second.row(y);
        let low_row = low.row_mut(y);
        for x in 0..a.len() {
            low_row[x] = a[x].saturating_add(b[x]);
        }
        let high_row = high.row_mut(y);
        for x in 0..a.len() {
            high_row[x] = a[x].saturating_sub(b[x]);
        }
    }

    (low, high)
}

/// Inverse of [`forward_temporal`]. Exact on integer data.
pub fn inverse_temporal(low: &Plane16, high: &Plane16) -> (Plane16, Plane16) {
    debug_assert_eq!(low.width(), high.width());
    debug_assert_eq!(low.height(), high.height());

    let mut first = Plane16::new(low.width(), low.height());
    let mut second = Plane16::new(low.width(), low.height());

    for y in 0..low.height() {
        let l = low.row(y);
        let h = high.row(y);
        let a = first.row_mut(y);
        for x in 0..l.len() {
            a[x] = ((i32::from(l[x]) + i32::from(h[x])) >> 1) as i16;
        }
        let b = second.row_mut(y);
        for x in 0..l.len() {
            b[x] = ((i32::from(l[x]) - i32::from(h[x])) >> 1) as i16;
        }
    }

    (first, second)
}
