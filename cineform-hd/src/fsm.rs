// Cineform
// Copyright (c) 2025 The Project Cineform Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `fsm` module builds and holds the finite-state-machine decoder for highpass bands.
//!
//! A state is a partial path through the signed code tree (magnitude codewords fused with
//! their sign bit). Each state holds 16 entries, one per 4-bit chunk of bitstream. An entry
//! records everything decoding that chunk from that state produces: up to two signed
//! values, zero runs before and after them, the number of chunk bits actually consumed, and
//! the next state. Completing the escape or band-end codeword cuts the chunk short and is
//! signalled through a sentinel next-state, since the bits that follow are raw payload or
//! padding rather than code bits.
//!
//! The machine is built once from the compiled codebook, under a once guard, and never
//! mutated afterwards. Construction refuses a codebook whose reachable-state count exceeds
//! the fixed budget.

use std::collections::HashMap;

use once_cell::sync::OnceCell;

use cineform_core::errors::{internal_error, Result};

use crate::vlc::{Codebook, Symbol};

/// Hard ceiling on the number of states the machine may occupy.
pub const MAX_STATES: usize = 518;

pub const CHUNK_BITS: u32 = 4;

/// Sentinel next-states.
pub const STATE_BAND_END: u16 = u16::MAX;
pub const STATE_ESCAPE: u16 = u16::MAX - 1;
pub const STATE_INVALID: u16 = u16::MAX - 2;

/// One 4-bit lookup slot. `value0`/`value1` of zero mean no value was decoded.
#[derive(Copy, Clone, Debug)]
pub struct FsmEntry {
    pub value0: i16,
    pub value1: i16,
    pub pre_zeros: u16,
    pub post_zeros: u16,
    pub bits_used: u8,
    pub next_state: u16,
}

const INVALID_ENTRY: FsmEntry = FsmEntry {
    value0: 0,
    value1: 0,
    pre_zeros: 0,
    post_zeros: 0,
    bits_used: 0,
    next_state: STATE_INVALID,
};

pub struct Fsm {
    states: Vec<[FsmEntry; 16]>,
}

static FSM: OnceCell<Fsm> = OnceCell::new();

impl Fsm {
    /// The process-wide decoder machine, built on first use from the compiled codebook.
    pub fn get() -> Result<&'static Fsm> {
        FSM.get_or_try_init(|| Fsm::build(Codebook::get()))
    }

    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    /// State 0 is the initial (root) state.
    #[inline(always)]
    pub fn entry(&self, state: u16, chunk: u32) -> &FsmEntry {
        &self.states[state as usize][chunk as usize]
    }

    fn build(book: &Codebook) -> Result<Fsm> {
        // Breadth-first walk over the partial paths reachable at chunk boundaries.
        let mut index: HashMap<(u32, u8), u16> = HashMap::new();
        let mut nodes: Vec<(u32, u8)> = vec![(0, 0)];
        index.insert((0, 0), 0);

        let mut states = Vec::new();
        let mut cursor = 0;

        while cursor < nodes.len() {
            let node = nodes[cursor];
            cursor += 1;

            let mut entries = [INVALID_ENTRY; 16];

            for (chunk, slot) in entries.iter_mut().enumerate() {
                *slot = Self::simulate(book, node, chunk as u32, &mut |target| {
                    match index.get(&target) {
                        Some(&id) => id,
                        None => {
                            let id = nodes.len() as u16;
                            index.insert(target, id);
                            nodes.push(target);
                            id
                        }
                    }
                })?;
            }

            states.push(entries);

            if nodes.len() > MAX_STATES {
                return internal_error("codebook exceeds decoder state budget");
            }
        }

        Ok(Fsm { states })
    }

    /// Decode one 4-bit chunk starting from `node`, allocating the landing state through
    /// `state_of`.
    fn simulate(
        book: &Codebook,
        node: (u32, u8),
        chunk: u32,
        state_of: &mut dyn FnMut((u32, u8)) -> u16,
    ) -> Result<FsmEntry> {
        let (mut bits, mut len) = node;

        let mut pre_zeros = 0u32;
        let mut post_zeros = 0u32;
        let mut values = [0i16; 2];
        let mut num_values = 0usize;

        for i in 0..CHUNK_BITS {
            let bit = (chunk >> (CHUNK_BITS - 1 - i)) & 1;
            bits = (bits << 1) | bit;
            len += 1;

            if let Some(symbol) = book.lookup(bits, len) {
                match symbol {
                    Symbol::Run(count) => {
                        if num_values == 0 {
                            pre_zeros += u32::from(count);
                        }
                        else {
                            post_zeros += u32::from(count);
                        }
                    }
                    Symbol::Value(value) => {
                        if num_values == 2 || post_zeros > 0 {
                            // The shortest signed codewords cannot pack a third symbol, or
                            // a value after a trailing run, into four bits.
                            return internal_error("fsm chunk symbol overflow");
                        }
                        values[num_values] = value;
                        num_values += 1;
                    }
                    Symbol::Escape | Symbol::BandEnd => {
                        let next_state = if symbol == Symbol::Escape {
                            STATE_ESCAPE
                        }
                        else {
                            STATE_BAND_END
                        };
                        return Ok(FsmEntry {
                            value0: values[0],
                            value1: values[1],
                            pre_zeros: pre_zeros as u16,
                            post_zeros: post_zeros as u16,
                            bits_used: (i + 1) as u8,
                            next_state,
                        });
                    }
                }
                bits = 0;
                len = 0;
            }
            else if !book.is_prefix(bits, len) {
                // Only reachable through code space no codeword occupies.
                return Ok(INVALID_ENTRY);
            }
        }

        Ok(FsmEntry {
            value0: values[0],
            value1: values[1],
            pre_zeros: pre_zeros as u16,
            post_zeros: post_zeros as u16,
            bits_used: CHUNK_BITS as u8,
            next_state: state_of((bits, len)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cineform_core::io::{BitReader, BitWriter};

    use crate::vlc::naive_decode_symbol;

    /// Decode a payload with the state machine, returning the emitted coefficient tokens
    /// as (zeros are expanded) a flat value list.
    fn replay_fsm(data: &[u8], limit: usize) -> Vec<i16> {
        let fsm = Fsm::get().unwrap();
        let mut br = BitReader::new(data);
        let mut out = Vec::new();
        let mut state = 0u16;

        while out.len() <= limit {
            let chunk = br.peek_bits(CHUNK_BITS);
            let entry = *fsm.entry(state, chunk);
            assert_ne!(entry.next_state, STATE_INVALID);

            br.skip_bits(u32::from(entry.bits_used)).unwrap();

            out.extend(std::iter::repeat(0).take(usize::from(entry.pre_zeros)));
            if entry.value0 != 0 {
                out.push(entry.value0);
            }
            if entry.value1 != 0 {
                out.push(entry.value1);
            }
            out.extend(std::iter::repeat(0).take(usize::from(entry.post_zeros)));

            match entry.next_state {
                STATE_BAND_END => return out,
                STATE_ESCAPE => {
                    let magnitude = br.get_bits(16).unwrap() as i16;
                    let negative = br.get_bit().unwrap();
                    out.push(if negative { -magnitude } else { magnitude });
                    state = 0;
                }
                next => state = next,
            }
        }
        panic!("band end not reached within {} tokens", limit);
    }

    /// The same decode through the bit-by-bit reference decoder.
    fn replay_naive(data: &[u8], limit: usize) -> Vec<i16> {
        let book = crate::vlc::Codebook::get();
        let mut br = BitReader::new(data);
        let mut out = Vec::new();

        while out.len() <= limit {
            match naive_decode_symbol(book, &mut br).expect("valid symbol") {
                crate::vlc::Symbol::Run(count) => {
                    out.extend(std::iter::repeat(0).take(usize::from(count)));
                }
                crate::vlc::Symbol::Value(value) => out.push(value),
                crate::vlc::Symbol::Escape => {
                    let magnitude = br.get_bits(16).unwrap() as i16;
                    let negative = br.get_bit().unwrap();
                    out.push(if negative { -magnitude } else { magnitude });
                }
                crate::vlc::Symbol::BandEnd => return out,
            }
        }
        panic!("band end not reached within {} tokens", limit);
    }

    #[test]
    fn verify_state_budget() {
        let fsm = Fsm::get().unwrap();
        assert!(fsm.num_states() <= MAX_STATES, "{} states", fsm.num_states());
        // The signed tree is dense; almost every internal node is reachable.
        assert!(fsm.num_states() > 400, "{} states", fsm.num_states());
    }

    #[test]
    fn verify_fsm_matches_naive_decoder() {
        use rand::rngs::SmallRng;
        use rand::{Rng, SeedableRng};

        let book = crate::vlc::Codebook::get();
        let mut rng = SmallRng::seed_from_u64(0xf5a5);

        for _ in 0..50 {
            let mut bw = BitWriter::new();
            let mut expect_len = 0usize;

            for _ in 0..rng.gen_range(1..40) {
                match rng.gen_range(0..10) {
                    0..=3 => {
                        let run = rng.gen_range(1..300);
                        book.write_run(&mut bw, run);
                        expect_len += run as usize;
                    }
                    4..=8 => {
                        let magnitude = rng.gen_range(1..=254);
                        book.write_value(&mut bw, magnitude, rng.gen_bool(0.5));
                        expect_len += 1;
                    }
                    _ => {
                        book.write_escape(&mut bw, rng.gen_range(255..20000), rng.gen_bool(0.5));
                        expect_len += 1;
                    }
                }
            }
            book.write_band_end(&mut bw);
            let bytes = bw.into_bytes();

            let naive = replay_naive(&bytes, expect_len + 16);
            let table = replay_fsm(&bytes, expect_len + 16);

            assert_eq!(naive, table);
        }
    }

    #[test]
    fn verify_unoccupied_code_space_is_invalid() {
        // No codeword or prefix starts a chunk that cannot continue; the machine only
        // reports invalid entries for dead code space, which this codebook does not have.
        let fsm = Fsm::get().unwrap();
        let chunk_invalid = (0..fsm.num_states() as u16)
            .flat_map(|s| (0..16).map(move |c| (s, c)))
            .filter(|&(s, c)| fsm.entry(s, c).next_state == STATE_INVALID)
            .count();
        assert_eq!(chunk_invalid, 0);
    }
}
