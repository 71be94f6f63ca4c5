// Cineform
// Copyright (c) 2025 The Project Cineform Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `record` module defines the canonical decoder parameter record produced by the
//! overlay merge.

use bitflags::bitflags;

use crate::tags::{self, TagValue};

bitflags! {
    /// Color-processing stages the decoder is asked to run.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct ProcessPath: u32 {
        const WHITE_BALANCE = 0x0001;
        const COLOR_MATRIX  = 0x0002;
        const GAMMA_TWEAKS  = 0x0004;
        const FRAMING       = 0x0008;
        const LOOKUP_TABLE  = 0x0010;
    }
}

/// Per-channel (per-eye) grading parameters. Channel 0 is the base record; channels 1 and 2
/// hold the second-channel deltas applied by the `_1`/`_2` overlay priorities.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelParams {
    pub white_balance: [f32; 4],
    pub gain: [f32; 4],
    pub lift: [f32; 4],
    pub gamma: [f32; 4],
    /// Framing: offset x, offset y, scale x, scale y.
    pub framing: [f32; 4],
}

impl Default for ChannelParams {
    fn default() -> Self {
        ChannelParams {
            white_balance: [1.0; 4],
            gain: [1.0; 4],
            lift: [0.0; 4],
            gamma: [1.0; 4],
            framing: [0.0, 0.0, 1.0, 1.0],
        }
    }
}

/// The merged decoder parameter record.
///
/// The record is a pure function of the ordered overlay inputs: merging the same buffers in
/// the same priority order always reproduces the identical record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CfhdData {
    pub clip_guid: Option<[u8; 16]>,
    pub colorspace: Option<u32>,
    pub encode_curve: Option<u32>,
    pub channels: [ChannelParams; 3],
    pub process_path_flags: ProcessPath,
    pub process_path_flags_mask: u32,
    pub cpu_limit: Option<u32>,
    pub cpu_affinity: Option<u32>,
    pub ignore_disk_database: bool,
    pub update_last_used: bool,
    pub timecode: Option<String>,
    pub unique_frame: Option<u32>,
}

impl CfhdData {
    /// Apply one metadata entry at the given delta channel. Per-channel tags land in
    /// `channels[delta]`; global tags ignore the delta. Unknown tags are ignored.
    pub fn apply_tag(&mut self, code: u32, value: &TagValue, delta: usize) {
        debug_assert!(delta < 3);

        fn vec4(value: &TagValue) -> Option<[f32; 4]> {
            match value {
                TagValue::F32Vec(values) if values.len() == 4 => {
                    Some([values[0], values[1], values[2], values[3]])
                }
                _ => None,
            }
        }

        match code {
            tags::TAG_CLIP_GUID => {
                if let Some(guid) = value.as_guid() {
                    self.clip_guid = Some(guid);
                }
            }
            tags::TAG_COLORSPACE => self.colorspace = value.as_u32(),
            tags::TAG_ENCODE_CURVE => self.encode_curve = value.as_u32(),
            tags::TAG_WHITE_BALANCE => {
                if let Some(values) = vec4(value) {
                    self.channels[delta].white_balance = values;
                }
            }
            tags::TAG_GAIN => {
                if let Some(values) = vec4(value) {
                    self.channels[delta].gain = values;
                }
            }
            tags::TAG_LIFT => {
                if let Some(values) = vec4(value) {
                    self.channels[delta].lift = values;
                }
            }
            tags::TAG_GAMMA => {
                if let Some(values) = vec4(value) {
                    self.channels[delta].gamma = values;
                }
            }
            tags::TAG_FRAMING => {
                if let Some(values) = vec4(value) {
                    self.channels[delta].framing = values;
                }
            }
            tags::TAG_PROCESS_PATH => {
                if let Some(bits) = value.as_u32() {
                    self.process_path_flags = ProcessPath::from_bits_truncate(bits);
                }
            }
            tags::TAG_PROCESS_PATH_MASK => {
                if let Some(mask) = value.as_u32() {
                    self.process_path_flags_mask = mask;
                }
            }
            tags::TAG_CPU_LIMIT => self.cpu_limit = value.as_u32(),
            tags::TAG_CPU_AFFINITY => self.cpu_affinity = value.as_u32(),
            tags::TAG_IGNORE_DATABASE => {
                if let Some(flag) = value.as_u32() {
                    self.ignore_disk_database = flag != 0;
                }
            }
            tags::TAG_UPDATE_LAST_USED => {
                if let Some(flag) = value.as_u32() {
                    self.update_last_used = flag != 0;
                }
            }
            tags::TAG_TIMECODE => {
                if let TagValue::Str(text) = value {
                    self.timecode = Some(text.clone());
                }
            }
            tags::TAG_UNIQUE_FRAME => self.unique_frame = value.as_u32(),
            _ => (),
        }
    }

    /// Restrict the active process path to the stages allowed by the mask. Run both before
    /// and after the overlay merge; see the overlay engine.
    pub fn recompute_process_path_mask(&mut self) {
        if self.process_path_flags_mask != 0 {
            let masked = self.process_path_flags.bits() & self.process_path_flags_mask;
            self.process_path_flags = ProcessPath::from_bits_truncate(masked);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn verify_defaults_are_unity() {
        let record = CfhdData::default();

        for channel in &record.channels {
            assert_eq!(channel.white_balance, [1.0; 4]);
            assert_eq!(channel.gain, [1.0; 4]);
            assert_eq!(channel.lift, [0.0; 4]);
            assert_eq!(channel.gamma, [1.0; 4]);
            assert_eq!(channel.framing, [0.0, 0.0, 1.0, 1.0]);
        }
        assert!(record.colorspace.is_none());
        assert!(!record.ignore_disk_database);
    }

    #[test]
    fn verify_delta_channel_routing() {
        let mut record = CfhdData::default();
        let wb = TagValue::F32Vec(smallvec![1.2, 1.0, 1.0, 1.0]);

        record.apply_tag(tags::TAG_WHITE_BALANCE, &wb, 1);

        assert_eq!(record.channels[0].white_balance, [1.0; 4]);
        assert_eq!(record.channels[1].white_balance, [1.2, 1.0, 1.0, 1.0]);
        assert_eq!(record.channels[2].white_balance, [1.0; 4]);
    }

    #[test]
    fn verify_mask_restricts_flags() {
        let mut record = CfhdData::default();

        record.apply_tag(tags::TAG_PROCESS_PATH, &TagValue::U32(0x1f), 0);
        record.apply_tag(tags::TAG_PROCESS_PATH_MASK, &TagValue::U32(0x03), 0);
        record.recompute_process_path_mask();

        assert_eq!(
            record.process_path_flags,
            ProcessPath::WHITE_BALANCE | ProcessPath::COLOR_MATRIX
        );
    }
}
