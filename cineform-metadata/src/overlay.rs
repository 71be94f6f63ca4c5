// Cineform
// Copyright (c) 2025 The Project Cineform Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `overlay` module merges active metadata from multiple prioritized sources into the
//! decoder parameter record.
//!
//! Sources are held in ten priority slots. The in-sample frame chunk occupies the `Frame`
//! slots, per-clip database files the `Database` slots, and the user override files and the
//! SDK-supplied buffer the `Override` slots. Each decode re-merges the populated slots in
//! ascending priority; a value written at a higher priority always wins for its tag and
//! delta channel. The merge is a pure function of the slot contents, so repeating it with
//! unchanged inputs reproduces the identical record.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::record::CfhdData;
use crate::tags::{MetadataReader, TAG_CLIP_GUID};

/// Overlay priorities, low to high. The `_1`/`_2` suffixes address delta channels 1 and 2
/// (second/third eye) on top of channel 0.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum Priority {
    Base = 0,
    Frame,
    Frame1,
    Frame2,
    Database,
    Database1,
    Database2,
    Override,
    Override1,
    Override2,
}

pub const NUM_PRIORITIES: usize = 10;

impl Priority {
    pub const ALL: [Priority; NUM_PRIORITIES] = [
        Priority::Base,
        Priority::Frame,
        Priority::Frame1,
        Priority::Frame2,
        Priority::Database,
        Priority::Database1,
        Priority::Database2,
        Priority::Override,
        Priority::Override1,
        Priority::Override2,
    ];

    /// The delta channel this priority writes to.
    pub fn delta(self) -> usize {
        match self {
            Priority::Frame1 | Priority::Database1 | Priority::Override1 => 1,
            Priority::Frame2 | Priority::Database2 | Priority::Override2 => 2,
            _ => 0,
        }
    }
}

/// Filesystem locations of the persisted overlay databases.
#[derive(Clone, Debug, Default)]
pub struct OverlayPaths {
    /// Directory holding `override.colr` / `.col1` / `.col2`.
    pub override_path: PathBuf,
    /// Root of the LUT directory tree.
    pub lut_path: PathBuf,
    /// Database subdirectory under the LUT root holding per-GUID `.colr` files.
    pub database_name: String,
    /// Preference store file for the persisted last-used record.
    pub prefs_path: PathBuf,
}

/// Format a clip GUID the way the database filenames expect:
/// `%08X-%04X-%04X-%02X%02X-%02X%02X%02X%02X%02X%02X` over the eight GUID fields.
pub fn format_guid(guid: &[u8; 16]) -> String {
    format!(
        "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        u32::from_be_bytes([guid[0], guid[1], guid[2], guid[3]]),
        u16::from_be_bytes([guid[4], guid[5]]),
        u16::from_be_bytes([guid[6], guid[7]]),
        guid[8],
        guid[9],
        guid[10],
        guid[11],
        guid[12],
        guid[13],
        guid[14],
        guid[15],
    )
}

/// True when every entry header and payload of a metadata chunk lies within the buffer.
/// A file that fails this was caught mid-write (or cut short) and may be retried.
fn chunk_is_complete(data: &[u8]) -> bool {
    let mut pos = 0;
    while pos < data.len() {
        if pos + 8 > data.len() {
            return false;
        }
        let type_size =
            u32::from_be_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]]);
        let size = (type_size & 0x00ff_ffff) as usize;
        let padded = (size + 3) & !3;
        pos += 8 + padded;
        if pos > data.len() {
            return false;
        }
    }
    true
}

/// The active-metadata overlay engine. One per decoder instance.
pub struct OverlayEngine {
    paths: OverlayPaths,
    refresh_interval: Duration,
    slots: [Option<Vec<u8>>; NUM_PRIORITIES],
    /// Whether a disk load for this slot ever succeeded. Gates the single-retry policy.
    had_file: [bool; NUM_PRIORITIES],
    sdk_override: Option<Vec<u8>>,
    defaults_initialized: bool,
    ignore_disk_database: bool,
    last_guid: Option<[u8; 16]>,
    last_check: Option<Instant>,
}

impl OverlayEngine {
    pub fn new(paths: OverlayPaths) -> Self {
        OverlayEngine {
            paths,
            refresh_interval: Duration::from_secs(1),
            slots: Default::default(),
            had_file: [false; NUM_PRIORITIES],
            sdk_override: None,
            defaults_initialized: false,
            ignore_disk_database: false,
            last_guid: None,
            last_check: None,
        }
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Install or replace the SDK override buffer, merged at `Override` priority.
    pub fn set_sdk_override(&mut self, chunk: Vec<u8>) {
        self.sdk_override = Some(chunk);
    }

    pub fn clear_sdk_override(&mut self) {
        self.sdk_override = None;
    }

    /// Directly install a buffer into a priority slot. This is the in-memory equivalent of
    /// the disk databases and is also what the disk loader feeds.
    pub fn set_buffer(&mut self, priority: Priority, chunk: Option<Vec<u8>>) {
        self.slots[priority as usize] = chunk;
    }

    /// Run the per-decode overlay workflow for one sample and return the merged record.
    ///
    /// `frame_metadata` is the sample's metadata chunk, copied verbatim into the `Frame`
    /// slot. Disk databases are reloaded when the refresh interval has elapsed or the clip
    /// GUID changed since the previous sample.
    pub fn refresh(&mut self, frame_metadata: Option<&[u8]>) -> CfhdData {
        let guid = frame_metadata.and_then(extract_clip_guid);

        let now = Instant::now();
        let interval_elapsed = match self.last_check {
            Some(last) => now.duration_since(last) >= self.refresh_interval,
            None => true,
        };
        let checkdiskinfo = interval_elapsed || guid != self.last_guid;

        if !self.defaults_initialized {
            // The canonical defaults are CfhdData::default(), applied implicitly because
            // every merge starts from a default record. Only the flag is latched here.
            self.defaults_initialized = true;
        }

        self.slots[Priority::Frame as usize] = frame_metadata.map(<[u8]>::to_vec);

        if checkdiskinfo {
            self.last_check = Some(now);
            if !self.ignore_disk_database {
                self.reload_disk_database(guid.as_ref());
            }
        }

        let record = self.merge();

        self.ignore_disk_database = record.ignore_disk_database;
        self.last_guid = guid.or(record.clip_guid);

        if record.update_last_used {
            self.persist_last_used(&record);
        }

        record
    }

    /// Merge the populated slots in ascending priority order.
    pub fn merge(&self) -> CfhdData {
        let mut record = CfhdData::default();

        // The process path mask is applied both before and after the overlay merge. The
        // pre-pass looks redundant against a default record but is kept to match the
        // reference decoder's observable behavior.
        record.recompute_process_path_mask();

        for priority in Priority::ALL {
            let delta = priority.delta();

            if self.slots[priority as usize].is_some() {
                // Seed the delta channel from channel 0 so unspecified fields inherit the
                // base eye. Done for the frame layer only: the database layer deliberately
                // skips seeding, matching the reference decoder.
                match priority {
                    Priority::Frame1 => record.channels[1] = record.channels[0].clone(),
                    Priority::Frame2 => record.channels[2] = record.channels[0].clone(),
                    _ => (),
                }
            }

            if let Some(chunk) = &self.slots[priority as usize] {
                apply_chunk(&mut record, chunk, delta);
            }

            if priority == Priority::Override {
                if let Some(chunk) = &self.sdk_override {
                    apply_chunk(&mut record, chunk, 0);
                }
            }
        }

        record.recompute_process_path_mask();
        record
    }

    fn reload_disk_database(&mut self, guid: Option<&[u8; 16]>) {
        let base = self.paths.lut_path.join(&self.paths.database_name).join("defaults.colr");
        self.load_slot(Priority::Base, &base);

        if let Some(guid) = guid {
            let name = format_guid(guid);
            let dir = self.paths.lut_path.join(&self.paths.database_name);
            self.load_slot(Priority::Database, &dir.join(format!("{}.colr", name)));
            self.load_slot(Priority::Database1, &dir.join(format!("{}.col1", name)));
            self.load_slot(Priority::Database2, &dir.join(format!("{}.col2", name)));
        }

        let dir = self.paths.override_path.clone();
        self.load_slot(Priority::Override, &dir.join("override.colr"));
        self.load_slot(Priority::Override1, &dir.join("override.col1"));
        self.load_slot(Priority::Override2, &dir.join("override.col2"));
    }

    fn load_slot(&mut self, priority: Priority, path: &Path) {
        let index = priority as usize;
        match read_overlay_file(path, self.had_file[index]) {
            Some(chunk) => {
                self.had_file[index] = true;
                self.slots[index] = Some(chunk);
            }
            None => {
                self.slots[index] = None;
            }
        }
    }

    fn persist_last_used(&self, record: &CfhdData) {
        let guid = record.clip_guid.as_ref().map(format_guid).unwrap_or_default();
        let frame = record.unique_frame.unwrap_or(0);
        let timecode = record.timecode.as_deref().unwrap_or("00:00:00:00");
        let text = format!("{}\n{}\n{}\n", guid, frame, timecode);

        if let Err(err) = fs::write(&self.paths.prefs_path, text) {
            warn!("failed to persist last-used record: {}", err);
        }
    }
}

fn extract_clip_guid(chunk: &[u8]) -> Option<[u8; 16]> {
    MetadataReader::new(chunk)
        .find(|(code, _)| *code == TAG_CLIP_GUID)
        .and_then(|(_, value)| value.as_guid())
}

fn apply_chunk(record: &mut CfhdData, chunk: &[u8], delta: usize) {
    for (code, value) in MetadataReader::new(chunk) {
        record.apply_tag(code, &value, delta);
    }
}

/// Read one overlay file. Missing files are skipped silently; a file that fails the
/// completeness scan is retried once after a 1 ms pause, and only when a previous load of
/// this slot had succeeded (a slot that never loaded is assumed to simply not exist yet).
fn read_overlay_file(path: &Path, had_file: bool) -> Option<Vec<u8>> {
    let first = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == ErrorKind::NotFound => return None,
        Err(err) => {
            warn!("failed to read overlay file {}: {}", path.display(), err);
            return None;
        }
    };

    if chunk_is_complete(&first) {
        return Some(first);
    }

    if had_file {
        // A concurrent writer may have been caught mid-update.
        std::thread::sleep(Duration::from_millis(1));
        if let Ok(second) = fs::read(path) {
            if chunk_is_complete(&second) {
                debug!("overlay file {} retried successfully", path.display());
                return Some(second);
            }
        }
    }

    warn!("overlay file {} is truncated, skipping", path.display());
    None
}
