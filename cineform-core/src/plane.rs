// Cineform
// Copyright (c) 2025 The Project Cineform Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `plane` module defines the 16-bit coefficient plane all transform and coding stages
//! operate on.

/// Number of `i16` elements per 16-byte alignment unit.
const ALIGN_ELEMS: usize = 8;

/// A 2-D grid of 16-bit signed coefficients with an explicit row stride.
///
/// The stride is measured in elements and is rounded up so that every row start is 16-byte
/// aligned. Strides need not be width-tight.
#[derive(Clone, Debug)]
pub struct Plane16 {
    width: usize,
    height: usize,
    stride: usize,
    data: Vec<i16>,
}

impl Plane16 {
    /// Allocate a zero-filled plane of the given dimensions.
    pub fn new(width: usize, height: usize) -> Self {
        let stride = (width + ALIGN_ELEMS - 1) & !(ALIGN_ELEMS - 1);
        Plane16 { width, height, stride, data: vec![0; stride * height] }
    }

    /// Build a plane from row-major width-tight samples.
    pub fn from_samples(width: usize, height: usize, samples: &[i16]) -> Self {
        assert_eq!(samples.len(), width * height);

        let mut plane = Plane16::new(width, height);
        for (y, row) in samples.chunks_exact(width).enumerate() {
            plane.row_mut(y).copy_from_slice(row);
        }
        plane
    }

    #[inline(always)]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline(always)]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Row stride in elements.
    #[inline(always)]
    pub fn stride(&self) -> usize {
        self.stride
    }

    #[inline(always)]
    pub fn row(&self, y: usize) -> &[i16] {
        let start = y * self.stride;
        &self.data[start..start + self.width]
    }

    #[inline(always)]
    pub fn row_mut(&mut self, y: usize) -> &mut [i16] {
        let start = y * self.stride;
        &mut self.data[start..start + self.width]
    }

    #[inline(always)]
    pub fn get(&self, x: usize, y: usize) -> i16 {
        self.data[y * self.stride + x]
    }

    #[inline(always)]
    pub fn set(&mut self, x: usize, y: usize, value: i16) {
        self.data[y * self.stride + x] = value;
    }

    pub fn fill(&mut self, value: i16) {
        self.data.fill(value);
    }

    /// Copy a column into a scratch buffer. The transform runs its vertical passes through
    /// this to keep the filter kernels one-dimensional.
    pub fn read_column(&self, x: usize, out: &mut Vec<i16>) {
        out.clear();
        out.extend((0..self.height).map(|y| self.data[y * self.stride + x]));
    }

    pub fn write_column(&mut self, x: usize, column: &[i16]) {
        debug_assert_eq!(column.len(), self.height);
        for (y, &value) in column.iter().enumerate() {
            self.data[y * self.stride + x] = value;
        }
    }

    /// True when the visible (width x height) content of both planes is identical, ignoring
    /// stride padding.
    pub fn is_same_content(&self, other: &Plane16) -> bool {
        self.width == other.width
            && self.height == other.height
            && (0..self.height).all(|y| self.row(y) == other.row(y))
    }
}
