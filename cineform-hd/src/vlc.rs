// Cineform
// Copyright (c) 2025 The Project Cineform Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `vlc` module defines the combined run/magnitude codebook.
//!
//! Every entry of the book is a (count, value) pair: zero-run entries carry a count and a
//! zero value, magnitude entries carry a count of one and a non-zero value. The book also
//! holds the raw-magnitude escape and the band-end terminator. The code space (MSB first):
//!
//! | pattern            | symbol                                   | length |
//! |--------------------|------------------------------------------|--------|
//! | `00` + 3 bits      | zero run, counts 1,2,4,8,16,32,64,128    | 5      |
//! | `01`               | magnitude 1                              | 2      |
//! | `10` + 2 bits      | magnitudes 2..=5                         | 4      |
//! | `110` + 3 bits     | magnitudes 6..=13                        | 6      |
//! | `1110` + 4 bits    | magnitudes 14..=29                       | 8      |
//! | `11110` + 5 bits   | magnitudes 30..=61                       | 10     |
//! | `111110` + 6 bits  | magnitudes 62..=125                      | 12     |
//! | `1111110` + 7 bits | magnitudes 126..=253                     | 14     |
//! | `111111100`        | magnitude 254                            | 9      |
//! | `111111101`        | escape, 16 raw magnitude bits follow     | 9      |
//! | `11111111`         | band end                                 | 8      |
//!
//! Every magnitude codeword is followed by one sign bit (0 positive, 1 negative); the
//! escape payload is 16 verbatim magnitude bits and a sign bit. The code is prefix-free and
//! complete, and the band-end codeword prefixes no other symbol.
//!
//! The compiled book is generated once on first use and never mutated afterwards. For
//! decoding, the table folds each magnitude code and its sign bit into a pair of signed
//! leaves; the chunked state machine in `fsm` is built over that signed tree.

use std::collections::{HashMap, HashSet};

use once_cell::sync::OnceCell;

use cineform_core::io::BitWriter;

/// Largest companded magnitude representable without the escape.
pub const MAX_MAGNITUDE: u32 = 254;

/// Run-length counts in codeword slot order.
pub const RUN_COUNTS: [u16; 8] = [1, 2, 4, 8, 16, 32, 64, 128];

/// One codeword: the code bits (right-aligned) and the code length.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Code {
    pub bits: u32,
    pub len: u8,
}

/// A decoded token from the combined book.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Symbol {
    /// A run of zero coefficients.
    Run(u16),
    /// A signed companded magnitude.
    Value(i16),
    /// The next 17 bits are a verbatim 16-bit magnitude and a sign bit.
    Escape,
    /// End of the band payload.
    BandEnd,
}

/// The compiled combined codebook.
pub struct Codebook {
    /// Magnitude codewords indexed by magnitude; index 0 is unused.
    mag: [Code; 255],
    /// Run codewords in descending count order for greedy emission.
    runs: [(u16, Code); 8],
    escape: Code,
    band_end: Code,
    /// Signed codeword lookup: (bits, len) of a complete codeword, with magnitude codes
    /// extended by their sign bit.
    codes: HashMap<(u32, u8), Symbol>,
    /// Every proper prefix of a signed codeword.
    prefixes: HashSet<(u32, u8)>,
    max_len: u8,
}

static CODEBOOK: OnceCell<Codebook> = OnceCell::new();

impl Codebook {
    /// The process-wide codebook, generated on first use.
    pub fn get() -> &'static Codebook {
        CODEBOOK.get_or_init(Codebook::generate)
    }

    fn generate() -> Codebook {
        let mut mag = [Code::default(); 255];

        mag[1] = Code { bits: 0b01, len: 2 };

        // Magnitude classes: (first magnitude, class prefix, prefix length, field bits).
        const CLASSES: [(u32, u32, u8, u8); 6] = [
            (2, 0b10, 2, 2),
            (6, 0b110, 3, 3),
            (14, 0b1110, 4, 4),
            (30, 0b11110, 5, 5),
            (62, 0b111110, 6, 6),
            (126, 0b1111110, 7, 7),
        ];

        for &(first, prefix, prefix_len, field) in &CLASSES {
            for offset in 0..(1u32 << field) {
                let m = first + offset;
                mag[m as usize] =
                    Code { bits: (prefix << field) | offset, len: prefix_len + field };
            }
        }

        mag[254] = Code { bits: 0b1111_1110_0, len: 9 };

        let escape = Code { bits: 0b1111_1110_1, len: 9 };
        let band_end = Code { bits: 0b1111_1111, len: 8 };

        let mut runs = [(0u16, Code::default()); 8];
        for (slot, &count) in RUN_COUNTS.iter().enumerate() {
            // Run codes occupy the `00` prefix: the slot index in the low three bits.
            runs[7 - slot] = (count, Code { bits: slot as u32, len: 5 });
        }

        // Build the signed decode tables.
        let mut codes = HashMap::new();
        for (count, code) in runs {
            codes.insert((code.bits, code.len), Symbol::Run(count));
        }
        for m in 1..=MAX_MAGNITUDE {
            let code = mag[m as usize];
            codes.insert(((code.bits << 1) | 0, code.len + 1), Symbol::Value(m as i16));
            codes.insert(((code.bits << 1) | 1, code.len + 1), Symbol::Value(-(m as i16)));
        }
        codes.insert((escape.bits, escape.len), Symbol::Escape);
        codes.insert((band_end.bits, band_end.len), Symbol::BandEnd);

        let mut prefixes = HashSet::new();
        let mut max_len = 0;
        for &(bits, len) in codes.keys() {
            max_len = max_len.max(len);
            for cut in 1..len {
                prefixes.insert((bits >> (len - cut), cut));
            }
        }
        prefixes.insert((0, 0));

        Codebook { mag, runs, escape, band_end, codes, prefixes, max_len }
    }

    #[inline(always)]
    pub fn magnitude_code(&self, magnitude: u32) -> Code {
        debug_assert!(magnitude >= 1 && magnitude <= MAX_MAGNITUDE);
        self.mag[magnitude as usize]
    }

    /// Run codewords in descending count order.
    #[inline(always)]
    pub fn run_codes(&self) -> &[(u16, Code)] {
        &self.runs
    }

    #[inline(always)]
    pub fn band_end_code(&self) -> Code {
        self.band_end
    }

    pub fn max_code_len(&self) -> u8 {
        self.max_len
    }

    /// Look up a complete signed codeword.
    #[inline(always)]
    pub fn lookup(&self, bits: u32, len: u8) -> Option<Symbol> {
        self.codes.get(&(bits, len)).copied()
    }

    /// True when (bits, len) is a proper prefix of at least one signed codeword.
    #[inline(always)]
    pub fn is_prefix(&self, bits: u32, len: u8) -> bool {
        self.prefixes.contains(&(bits, len))
    }

    /// Emit run codes covering `count` zeros, longest-first.
    pub fn write_run(&self, bw: &mut BitWriter, mut count: u32) {
        while count > 0 {
            // The smallest run code covers a single zero, so the greedy walk terminates.
            for &(run, code) in &self.runs {
                if u32::from(run) <= count {
                    bw.put_bits(code.bits, u32::from(code.len));
                    count -= u32::from(run);
                    break;
                }
            }
        }
    }

    /// Emit one companded magnitude and its sign bit.
    pub fn write_value(&self, bw: &mut BitWriter, magnitude: u32, negative: bool) {
        let code = self.magnitude_code(magnitude);
        bw.put_bits(code.bits, u32::from(code.len));
        bw.put_bit(negative);
    }

    /// Emit the escape codeword, a verbatim 16-bit magnitude, and the sign bit.
    pub fn write_escape(&self, bw: &mut BitWriter, magnitude: u16, negative: bool) {
        bw.put_bits(self.escape.bits, u32::from(self.escape.len));
        bw.put_bits(u32::from(magnitude), 16);
        bw.put_bit(negative);
    }

    pub fn write_band_end(&self, bw: &mut BitWriter) {
        bw.put_bits(self.band_end.bits, u32::from(self.band_end.len));
    }
}

/// Bit-by-bit reference decoder over the signed code tree. The table-driven state machine
/// in `fsm` must produce exactly the token sequence this decoder produces; it exists as the
/// verification oracle for that equivalence.
pub fn naive_decode_symbol(book: &Codebook, br: &mut cineform_core::io::BitReader<'_>) -> Option<Symbol> {
    let mut bits = 0u32;
    let mut len = 0u8;
    loop {
        bits = (bits << 1) | u32::from(br.get_bit().ok()?);
        len += 1;
        if let Some(symbol) = book.lookup(bits, len) {
            return Some(symbol);
        }
        if !book.is_prefix(bits, len) {
            return None;
        }
    }
}
