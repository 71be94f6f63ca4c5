// Cineform
// Copyright (c) 2025 The Project Cineform Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `tags` module reads and writes the metadata tag stream.
//!
//! A metadata chunk is a sequence of entries, each a FOURCC code, a type/size word (type code
//! in the high byte, payload byte size in the low 24 bits), and a payload padded to 4 bytes.
//! The same format is used for the in-sample metadata chunk and the persisted `.colr` overlay
//! files. Readers skip malformed entries rather than failing: a damaged overlay must never
//! take down a decode.

use log::warn;
use smallvec::SmallVec;

/// Builds a FOURCC code from its ASCII name.
pub const fn fourcc(name: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*name)
}

// Tag codes understood by the parameter record. Unknown codes are carried but ignored.
pub const TAG_CLIP_GUID: u32 = fourcc(b"GUID");
pub const TAG_COLORSPACE: u32 = fourcc(b"CSPC");
pub const TAG_ENCODE_CURVE: u32 = fourcc(b"CURV");
pub const TAG_WHITE_BALANCE: u32 = fourcc(b"WBAL");
pub const TAG_GAIN: u32 = fourcc(b"GAIN");
pub const TAG_LIFT: u32 = fourcc(b"LIFT");
pub const TAG_GAMMA: u32 = fourcc(b"GAMA");
pub const TAG_FRAMING: u32 = fourcc(b"FRAM");
pub const TAG_PROCESS_PATH: u32 = fourcc(b"PFLG");
pub const TAG_PROCESS_PATH_MASK: u32 = fourcc(b"PFLM");
pub const TAG_CPU_LIMIT: u32 = fourcc(b"CPUL");
pub const TAG_CPU_AFFINITY: u32 = fourcc(b"CPUA");
pub const TAG_IGNORE_DATABASE: u32 = fourcc(b"IDDB");
pub const TAG_UPDATE_LAST_USED: u32 = fourcc(b"ULST");
pub const TAG_TIMECODE: u32 = fourcc(b"TIMC");
pub const TAG_UNIQUE_FRAME: u32 = fourcc(b"UFRM");

/// Payload type codes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TagType {
    U32 = b'L',
    I32 = b'l',
    F32 = b'f',
    Guid = b'G',
    Str = b'c',
    F32Vec = b'v',
}

impl TagType {
    fn from_code(code: u8) -> Option<TagType> {
        match code {
            b'L' => Some(TagType::U32),
            b'l' => Some(TagType::I32),
            b'f' => Some(TagType::F32),
            b'G' => Some(TagType::Guid),
            b'c' => Some(TagType::Str),
            b'v' => Some(TagType::F32Vec),
            _ => None,
        }
    }
}

/// A decoded metadata value.
#[derive(Clone, Debug, PartialEq)]
pub enum TagValue {
    U32(u32),
    I32(i32),
    F32(f32),
    Guid([u8; 16]),
    Str(String),
    F32Vec(SmallVec<[f32; 4]>),
}

impl TagValue {
    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            TagValue::U32(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_guid(&self) -> Option<[u8; 16]> {
        match *self {
            TagValue::Guid(guid) => Some(guid),
            _ => None,
        }
    }
}

/// Iterates the entries of a metadata chunk, skipping entries it cannot decode.
pub struct MetadataReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> MetadataReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        MetadataReader { data, pos: 0 }
    }

    fn read_word(&mut self) -> Option<u32> {
        let bytes = self.data.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn decode(kind: TagType, payload: &[u8]) -> Option<TagValue> {
        match kind {
            TagType::U32 if payload.len() == 4 => {
                Some(TagValue::U32(u32::from_be_bytes(payload.try_into().unwrap())))
            }
            TagType::I32 if payload.len() == 4 => {
                Some(TagValue::I32(i32::from_be_bytes(payload.try_into().unwrap())))
            }
            TagType::F32 if payload.len() == 4 => {
                Some(TagValue::F32(f32::from_bits(u32::from_be_bytes(
                    payload.try_into().unwrap(),
                ))))
            }
            TagType::Guid if payload.len() == 16 => {
                let mut guid = [0u8; 16];
                guid.copy_from_slice(payload);
                Some(TagValue::Guid(guid))
            }
            TagType::Str => {
                let text = std::str::from_utf8(payload).ok()?;
                Some(TagValue::Str(text.trim_end_matches('\0').to_string()))
            }
            TagType::F32Vec if payload.len() % 4 == 0 => {
                let floats = payload
                    .chunks_exact(4)
                    .map(|c| f32::from_bits(u32::from_be_bytes(c.try_into().unwrap())))
                    .collect();
                Some(TagValue::F32Vec(floats))
            }
            _ => None,
        }
    }
}

impl<'a> Iterator for MetadataReader<'a> {
    type Item = (u32, TagValue);

    fn next(&mut self) -> Option<(u32, TagValue)> {
        while self.pos < self.data.len() {
            let code = self.read_word()?;
            let type_size = self.read_word()?;

            let size = (type_size & 0x00ff_ffff) as usize;
            let padded = (size + 3) & !3;

            let payload = match self.data.get(self.pos..self.pos + size) {
                Some(payload) => payload,
                None => {
                    warn!("metadata entry {:#010x} overruns chunk, stopping", code);
                    return None;
                }
            };
            self.pos += padded;

            let kind = match TagType::from_code((type_size >> 24) as u8) {
                Some(kind) => kind,
                None => {
                    warn!("metadata entry {:#010x} has unknown type, skipping", code);
                    continue;
                }
            };

            match Self::decode(kind, payload) {
                Some(value) => return Some((code, value)),
                None => {
                    warn!("metadata entry {:#010x} is malformed, skipping", code);
                    continue;
                }
            }
        }
        None
    }
}

/// Accumulates tag entries into a metadata chunk. Mirrors the SDK's metadata
/// open/add/close sequence: create, add entries, then take the finished bytes.
#[derive(Default)]
pub struct MetadataWriter {
    buf: Vec<u8>,
}

impl MetadataWriter {
    pub fn new() -> Self {
        MetadataWriter { buf: Vec::new() }
    }

    fn add_entry(&mut self, code: u32, kind: TagType, payload: &[u8]) {
        debug_assert!(payload.len() < 1 << 24);
        self.buf.extend_from_slice(&code.to_be_bytes());
        let type_size = ((kind as u32) << 24) | payload.len() as u32;
        self.buf.extend_from_slice(&type_size.to_be_bytes());
        self.buf.extend_from_slice(payload);
        while self.buf.len() % 4 != 0 {
            self.buf.push(0);
        }
    }

    pub fn add_u32(&mut self, code: u32, value: u32) -> &mut Self {
        self.add_entry(code, TagType::U32, &value.to_be_bytes());
        self
    }

    pub fn add_i32(&mut self, code: u32, value: i32) -> &mut Self {
        self.add_entry(code, TagType::I32, &value.to_be_bytes());
        self
    }

    pub fn add_f32(&mut self, code: u32, value: f32) -> &mut Self {
        self.add_entry(code, TagType::F32, &value.to_bits().to_be_bytes());
        self
    }

    pub fn add_guid(&mut self, code: u32, guid: [u8; 16]) -> &mut Self {
        self.add_entry(code, TagType::Guid, &guid);
        self
    }

    pub fn add_str(&mut self, code: u32, text: &str) -> &mut Self {
        self.add_entry(code, TagType::Str, text.as_bytes());
        self
    }

    pub fn add_f32_vec(&mut self, code: u32, values: &[f32]) -> &mut Self {
        let mut payload = Vec::with_capacity(values.len() * 4);
        for &value in values {
            payload.extend_from_slice(&value.to_bits().to_be_bytes());
        }
        self.add_entry(code, TagType::F32Vec, &payload);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_writer_reader_roundtrip() {
        let mut mw = MetadataWriter::new();
        mw.add_u32(TAG_COLORSPACE, 2)
            .add_f32_vec(TAG_WHITE_BALANCE, &[1.0, 1.25, 0.75, 1.0])
            .add_guid(TAG_CLIP_GUID, [7; 16])
            .add_str(TAG_TIMECODE, "01:02:03:04");
        let chunk = mw.finish();

        let entries: Vec<_> = MetadataReader::new(&chunk).collect();

        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0], (TAG_COLORSPACE, TagValue::U32(2)));
        assert_eq!(entries[2], (TAG_CLIP_GUID, TagValue::Guid([7; 16])));
        assert_eq!(entries[3], (TAG_TIMECODE, TagValue::Str("01:02:03:04".into())));

        match &entries[1].1 {
            TagValue::F32Vec(values) => assert_eq!(values.as_slice(), &[1.0, 1.25, 0.75, 1.0]),
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn verify_malformed_entry_is_skipped() {
        let mut mw = MetadataWriter::new();
        mw.add_u32(TAG_CPU_LIMIT, 8);
        let mut chunk = mw.finish();

        // Append an entry with an unknown type code, then one more valid entry.
        chunk.extend_from_slice(&fourcc(b"JUNK").to_be_bytes());
        chunk.extend_from_slice(&((b'?' as u32) << 24 | 4).to_be_bytes());
        chunk.extend_from_slice(&[0; 4]);

        let mut mw = MetadataWriter::new();
        mw.add_u32(TAG_CPU_AFFINITY, 3);
        chunk.extend_from_slice(&mw.finish());

        let entries: Vec<_> = MetadataReader::new(&chunk).collect();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, TAG_CPU_LIMIT);
        assert_eq!(entries[1].0, TAG_CPU_AFFINITY);
    }

    #[test]
    fn verify_overrun_entry_stops_iteration() {
        let mut chunk = Vec::new();
        chunk.extend_from_slice(&TAG_GAIN.to_be_bytes());
        chunk.extend_from_slice(&((b'v' as u32) << 24 | 64).to_be_bytes());
        chunk.extend_from_slice(&[0; 8]);

        assert_eq!(MetadataReader::new(&chunk).count(), 0);
    }
}
