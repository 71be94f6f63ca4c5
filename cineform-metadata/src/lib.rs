// Cineform
// Copyright (c) 2025 The Project Cineform Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Active metadata support: the FOURCC tag stream carried inside samples and overlay files,
//! the canonical decoder parameter record, and the priority-ordered overlay engine that
//! merges metadata from multiple sources before every decode.

pub mod overlay;
pub mod record;
pub mod tags;
