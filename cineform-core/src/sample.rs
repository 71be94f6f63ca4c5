// Cineform
// Copyright (c) 2025 The Project Cineform Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `sample` module implements the self-describing sample container.
//!
//! A sample is a sequence of chunks, each introduced by a pair of 32-bit big-endian words:
//! a tag code and a value. For payload-carrying chunks the value is the payload byte length;
//! payloads are padded to the next 4-byte boundary so that every tag sits on one. Tag codes
//! with bit 31 set are required-to-understand: a parser must reject a sample containing an
//! unknown required tag, and must skip unknown optional tags by their declared length.

use bitflags::bitflags;
use log::debug;

use crate::errors::{corrupt_error, Error, Result};
use crate::io::{BitReader, BitWriter, Marker};

/// Tag codes with this bit set must be understood by the parser.
pub const TAG_REQUIRED: u32 = 0x8000_0000;

/// Sample header: dimensions, formats, quality, flags, GOP position, frame number.
pub const TAG_SAMPLE_HEADER: u32 = TAG_REQUIRED | 0x0001;
/// Quantizer vector, one 16-bit divisor per subband.
pub const TAG_QUANT_TABLE: u32 = TAG_REQUIRED | 0x0002;
/// Channel block nesting the channel's subband chunks.
pub const TAG_CHANNEL: u32 = TAG_REQUIRED | 0x0003;
/// One coded highpass subband.
pub const TAG_SUBBAND: u32 = TAG_REQUIRED | 0x0004;
/// Deepest-level lowpass band, coded as raw 16-bit values.
pub const TAG_LOWPASS_RAW: u32 = TAG_REQUIRED | 0x0005;
/// End of sample; the value is the byte offset of this tag for self-checking.
pub const TAG_SAMPLE_END: u32 = TAG_REQUIRED | 0x0006;
/// Nested metadata tag stream, opaque at this layer.
pub const TAG_METADATA: u32 = 0x0007;
/// 1/8-scale preview packed as 10-bit RGB.
pub const TAG_THUMBNAIL: u32 = 0x0008;

bitflags! {
    /// Per-sample flag word carried in the sample header.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct SampleFlags: u16 {
        /// Sample carries all lowpass and highpass bands. When clear, the sample is the
        /// P-frame of a 2-frame GOP and carries only temporal-highpass bands.
        const KEY_FRAME = 0x0001;
        /// Source fields were interlaced.
        const INTERLACED = 0x0002;
        /// Lowpass bands were right-shifted by two between transform levels; synthesis
        /// must re-apply the shift.
        const PRESCALE_LOWPASS = 0x0004;
    }
}

/// Fixed-size header chunk present in every sample.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleHeader {
    pub width: u16,
    pub height: u16,
    pub encoded_format: u8,
    pub field_type: u8,
    pub quality: u8,
    pub transform_levels: u8,
    pub flags: SampleFlags,
    pub gop_position: u8,
    pub encode_curve: u8,
    pub frame_number: u32,
}

impl SampleHeader {
    const BYTE_LEN: u32 = 16;

    pub fn is_key_frame(&self) -> bool {
        self.flags.contains(SampleFlags::KEY_FRAME)
    }
}

/// Serializes one sample. The codec layer drives this in container order: header, quant
/// table, channels (subbands nested), then optional metadata and thumbnail chunks.
pub struct SampleWriter {
    bw: BitWriter,
    channel_mark: Option<(Marker, usize)>,
}

impl SampleWriter {
    pub fn new() -> Self {
        SampleWriter { bw: BitWriter::with_capacity(4096), channel_mark: None }
    }

    pub fn write_header(&mut self, header: &SampleHeader) {
        self.bw.put_tag(TAG_SAMPLE_HEADER, SampleHeader::BYTE_LEN);
        self.bw.put_u16_be(header.width);
        self.bw.put_u16_be(header.height);
        self.bw.put_bytes(&[
            header.encoded_format,
            header.field_type,
            header.quality,
            header.transform_levels,
        ]);
        self.bw.put_u16_be(header.flags.bits());
        self.bw.put_bytes(&[header.gop_position, header.encode_curve]);
        self.bw.put_u32_be(header.frame_number);
    }

    pub fn write_quant_table(&mut self, divisors: &[u16]) {
        self.bw.put_tag(TAG_QUANT_TABLE, divisors.len() as u32);
        for &q in divisors {
            self.bw.put_u16_be(q);
        }
        self.bw.pad_to_tag();
    }

    /// Open a channel block. The byte length of the nested content is patched in when the
    /// channel is closed.
    pub fn begin_channel(&mut self) {
        debug_assert!(self.channel_mark.is_none());
        self.bw.pad_to_tag();
        self.bw.put_u32_be(TAG_CHANNEL);
        let mark = self.bw.mark_u32();
        self.channel_mark = Some((mark, self.bw.byte_len()));
    }

    pub fn end_channel(&mut self) {
        let (mark, start) = self.channel_mark.take().expect("channel not open");
        self.bw.pad_to_tag();
        let len = (self.bw.byte_len() - start) as u32;
        self.bw.patch_u32(mark, len);
    }

    pub fn write_subband(&mut self, band: u8, level: u8, quant: u16, payload: &[u8]) {
        self.bw.put_tag(TAG_SUBBAND, 8 + payload.len() as u32);
        self.bw.put_bytes(&[band, level]);
        self.bw.put_u16_be(quant);
        self.bw.put_u32_be(payload.len() as u32);
        self.bw.put_bytes(payload);
        self.bw.pad_to_tag();
    }

    /// Write the deepest-level lowpass band verbatim as big-endian 16-bit values.
    pub fn write_lowpass_raw(&mut self, width: u16, height: u16, rows: &mut dyn Iterator<Item = &[i16]>) {
        let len = 4 + 2 * u32::from(width) * u32::from(height);
        self.bw.put_tag(TAG_LOWPASS_RAW, len);
        self.bw.put_u16_be(width);
        self.bw.put_u16_be(height);
        for row in rows {
            debug_assert_eq!(row.len(), width as usize);
            for &value in row {
                self.bw.put_u16_be(value as u16);
            }
        }
        self.bw.pad_to_tag();
    }

    pub fn write_metadata(&mut self, chunk: &[u8]) {
        self.bw.put_tag(TAG_METADATA, chunk.len() as u32);
        self.bw.put_bytes(chunk);
        self.bw.pad_to_tag();
    }

    /// Thumbnail payload: dimensions followed by one packed 10-bit RGB word per pixel.
    pub fn write_thumbnail(&mut self, width: u16, height: u16, packed: &[u32]) {
        debug_assert_eq!(packed.len(), usize::from(width) * usize::from(height));
        let len = 4 + 4 * packed.len() as u32;
        self.bw.put_tag(TAG_THUMBNAIL, len);
        self.bw.put_u16_be(width);
        self.bw.put_u16_be(height);
        for &word in packed {
            self.bw.put_u32_be(word);
        }
        self.bw.pad_to_tag();
    }

    pub fn finish(mut self) -> Vec<u8> {
        debug_assert!(self.channel_mark.is_none());
        self.bw.pad_to_tag();
        let end_pos = self.bw.byte_len() as u32;
        self.bw.put_tag(TAG_SAMPLE_END, end_pos);
        self.bw.into_bytes()
    }
}

impl Default for SampleWriter {
    fn default() -> Self {
        SampleWriter::new()
    }
}

/// One coded subband borrowed from a parsed sample.
#[derive(Clone, Debug)]
pub struct ParsedSubband<'a> {
    pub band: u8,
    pub level: u8,
    pub quant: u16,
    pub data: &'a [u8],
}

/// The deepest-level lowpass band of one channel.
#[derive(Clone, Debug)]
pub struct ParsedLowpass<'a> {
    pub width: u16,
    pub height: u16,
    /// Big-endian 16-bit values, row-major, width-tight.
    pub data: &'a [u8],
}

#[derive(Clone, Debug, Default)]
pub struct ParsedChannel<'a> {
    pub subbands: Vec<ParsedSubband<'a>>,
    pub lowpass: Option<ParsedLowpass<'a>>,
}

#[derive(Clone, Debug)]
pub struct ParsedThumbnail<'a> {
    pub width: u16,
    pub height: u16,
    /// Big-endian packed 10-bit RGB words.
    pub data: &'a [u8],
}

/// A fully parsed sample. All payloads borrow from the input buffer.
#[derive(Debug)]
pub struct ParsedSample<'a> {
    pub header: SampleHeader,
    pub quant_table: Vec<u16>,
    pub channels: Vec<ParsedChannel<'a>>,
    pub metadata: Option<&'a [u8]>,
    pub thumbnail: Option<ParsedThumbnail<'a>>,
}

/// Parses the tag-value chunk structure of one sample.
pub struct SampleParser;

impl SampleParser {
    pub fn parse(data: &[u8]) -> Result<ParsedSample<'_>> {
        let mut br = BitReader::new(data);

        let mut header = None;
        let mut quant_table = Vec::new();
        let mut channels: Vec<ParsedChannel<'_>> = Vec::new();
        let mut metadata = None;
        let mut thumbnail = None;

        loop {
            let tag_offset = {
                br.skip_to_next_tag();
                br.byte_pos()
            };

            let (tag, value) = match br.read_tag() {
                Ok(pair) => pair,
                Err(Error::Truncated { .. }) => {
                    return corrupt_error("sample ended without end tag");
                }
                Err(err) => return Err(err),
            };

            match tag {
                TAG_SAMPLE_HEADER => {
                    if value != SampleHeader::BYTE_LEN {
                        return corrupt_error("bad sample header length");
                    }
                    header = Some(Self::parse_header(&mut br)?);
                }
                TAG_QUANT_TABLE => {
                    quant_table.clear();
                    for _ in 0..value {
                        quant_table.push(br.read_u16_be()?);
                    }
                }
                TAG_CHANNEL => {
                    let content = br.read_bytes(value as usize)?;
                    channels.push(Self::parse_channel(content)?);
                }
                TAG_SUBBAND | TAG_LOWPASS_RAW => {
                    return corrupt_error("subband chunk outside channel block");
                }
                TAG_METADATA => {
                    metadata = Some(br.read_bytes(value as usize)?);
                }
                TAG_THUMBNAIL => {
                    let payload = br.read_bytes(value as usize)?;
                    if payload.len() < 4 {
                        return corrupt_error("short thumbnail chunk");
                    }
                    let width = u16::from_be_bytes([payload[0], payload[1]]);
                    let height = u16::from_be_bytes([payload[2], payload[3]]);
                    let expect = 4 + 4 * usize::from(width) * usize::from(height);
                    if payload.len() != expect {
                        return corrupt_error("thumbnail length mismatch");
                    }
                    thumbnail = Some(ParsedThumbnail { width, height, data: &payload[4..] });
                }
                TAG_SAMPLE_END => {
                    // Self-check: the declared end offset must match the position the
                    // structural walk arrived at.
                    if value as usize != tag_offset {
                        return corrupt_error("sample length self-check failed");
                    }
                    break;
                }
                unknown if unknown & TAG_REQUIRED != 0 => {
                    return corrupt_error("unknown required tag");
                }
                unknown => {
                    debug!("skipping unknown optional tag {:#010x} ({} bytes)", unknown, value);
                    br.read_bytes(value as usize)?;
                }
            }
        }

        let header = match header {
            Some(header) => header,
            None => return corrupt_error("missing sample header"),
        };

        Ok(ParsedSample { header, quant_table, channels, metadata, thumbnail })
    }

    fn parse_header(br: &mut BitReader<'_>) -> Result<SampleHeader> {
        let width = br.read_u16_be()?;
        let height = br.read_u16_be()?;
        let encoded_format = br.get_bits(8)? as u8;
        let field_type = br.get_bits(8)? as u8;
        let quality = br.get_bits(8)? as u8;
        let transform_levels = br.get_bits(8)? as u8;
        let flags = br.read_u16_be()?;
        let gop_position = br.get_bits(8)? as u8;
        let encode_curve = br.get_bits(8)? as u8;
        let frame_number = br.read_u32_be()?;

        let flags = match SampleFlags::from_bits(flags) {
            Some(flags) => flags,
            None => return corrupt_error("unknown sample flag bits"),
        };

        if width == 0 || height == 0 {
            return corrupt_error("zero sample dimensions");
        }

        Ok(SampleHeader {
            width,
            height,
            encoded_format,
            field_type,
            quality,
            transform_levels,
            flags,
            gop_position,
            encode_curve,
            frame_number,
        })
    }

    fn parse_channel(content: &[u8]) -> Result<ParsedChannel<'_>> {
        let mut br = BitReader::new(content);
        let mut channel = ParsedChannel::default();

        loop {
            br.skip_to_next_tag();
            if br.bits_left() < 64 {
                break;
            }

            let (tag, value) = br.read_tag()?;

            match tag {
                TAG_SUBBAND => {
                    if value < 8 {
                        return corrupt_error("short subband chunk");
                    }
                    let band = br.get_bits(8)? as u8;
                    let level = br.get_bits(8)? as u8;
                    let quant = br.read_u16_be()?;
                    let data_len = br.read_u32_be()? as usize;
                    if data_len != value as usize - 8 {
                        return corrupt_error("subband length mismatch");
                    }
                    let data = br.read_bytes(data_len)?;
                    channel.subbands.push(ParsedSubband { band, level, quant, data });
                }
                TAG_LOWPASS_RAW => {
                    if value < 4 {
                        return corrupt_error("short lowpass chunk");
                    }
                    let width = br.read_u16_be()?;
                    let height = br.read_u16_be()?;
                    let expect = 2 * usize::from(width) * usize::from(height);
                    if expect != value as usize - 4 {
                        return corrupt_error("lowpass length mismatch");
                    }
                    let data = br.read_bytes(expect)?;
                    channel.lowpass = Some(ParsedLowpass { width, height, data });
                }
                unknown if unknown & TAG_REQUIRED != 0 => {
                    return corrupt_error("unknown required tag in channel");
                }
                unknown => {
                    debug!("skipping unknown channel tag {:#010x}", unknown);
                    br.read_bytes(value as usize)?;
                }
            }
        }

        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_header() -> SampleHeader {
        SampleHeader {
            width: 64,
            height: 32,
            encoded_format: 1,
            field_type: 0,
            quality: 4,
            transform_levels: 3,
            flags: SampleFlags::KEY_FRAME,
            gop_position: 0,
            encode_curve: 1,
            frame_number: 12,
        }
    }

    fn build_sample(metadata: Option<&[u8]>) -> Vec<u8> {
        let mut sw = SampleWriter::new();
        sw.write_header(&test_header());
        sw.write_quant_table(&[1, 4, 4, 8]);

        sw.begin_channel();
        let lowpass = [1i16, -2, 3, -4];
        sw.write_lowpass_raw(2, 2, &mut lowpass.chunks_exact(2));
        sw.write_subband(1, 1, 4, &[0xde, 0xad, 0xbe]);
        sw.end_channel();

        if let Some(chunk) = metadata {
            sw.write_metadata(chunk);
        }

        sw.finish()
    }

    #[test]
    fn verify_sample_roundtrip() {
        let bytes = build_sample(Some(&[9, 8, 7, 6]));
        let parsed = SampleParser::parse(&bytes).unwrap();

        assert_eq!(parsed.header, test_header());
        assert_eq!(parsed.quant_table, &[1, 4, 4, 8]);
        assert_eq!(parsed.channels.len(), 1);
        assert_eq!(parsed.metadata, Some(&[9u8, 8, 7, 6][..]));

        let channel = &parsed.channels[0];
        assert_eq!(channel.subbands.len(), 1);
        assert_eq!(channel.subbands[0].band, 1);
        assert_eq!(channel.subbands[0].quant, 4);
        assert_eq!(channel.subbands[0].data, &[0xde, 0xad, 0xbe]);

        let lowpass = channel.lowpass.as_ref().unwrap();
        assert_eq!((lowpass.width, lowpass.height), (2, 2));
        assert_eq!(lowpass.data, &[0, 1, 0xff, 0xfe, 0, 3, 0xff, 0xfc]);
    }

    #[test]
    fn verify_unknown_optional_tag_is_skipped() {
        let mut sw = SampleWriter::new();
        sw.write_header(&test_header());
        sw.write_quant_table(&[1]);
        // Unknown optional tag with a 4-byte payload.
        sw.bw.put_tag(0x0042, 4);
        sw.bw.put_u32_be(0xdead_beef);
        let bytes = sw.finish();

        assert!(SampleParser::parse(&bytes).is_ok());
    }

    #[test]
    fn verify_unknown_required_tag_is_rejected() {
        let mut sw = SampleWriter::new();
        sw.write_header(&test_header());
        sw.bw.put_tag(TAG_REQUIRED | 0x0042, 0);
        let bytes = sw.finish();

        match SampleParser::parse(&bytes) {
            Err(Error::Corrupt(_)) => (),
            other => panic!("expected corrupt error, got {:?}", other),
        }
    }

    #[test]
    fn verify_truncated_sample_is_rejected() {
        let bytes = build_sample(None);
        let cut = &bytes[..bytes.len() * 9 / 10];

        assert!(SampleParser::parse(cut).is_err());
    }

    #[test]
    fn verify_end_tag_self_check() {
        let mut bytes = build_sample(None);
        // Corrupt the declared end offset (last chunk is the end tag).
        let n = bytes.len();
        bytes[n - 1] ^= 0xff;

        match SampleParser::parse(&bytes) {
            Err(Error::Corrupt(_)) => (),
            other => panic!("expected corrupt error, got {:?}", other),
        }
    }
}
