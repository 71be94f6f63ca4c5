// Cineform
// Copyright (c) 2025 The Project Cineform Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type.

use std::error::Error as StdError;
use std::fmt;
use std::result;

/// `Error` provides an enumeration of all possible errors reported by Cineform.
#[derive(Debug)]
pub enum Error {
    /// The requested pixel format, encoded format, dimensions, or quality cannot be serviced.
    /// Surfaced immediately from prepare.
    ConfigError(&'static str),
    /// Ran off the end of the input bitstream. Carries the byte offset at which the underrun
    /// occurred.
    Truncated { offset: usize },
    /// The sample contained malformed data: a required tag was missing, a declared length was
    /// inconsistent, the decoder reached an undefined state, or an end-of-band marker was not
    /// found within the band area.
    Corrupt(&'static str),
    /// The caller-supplied output buffer is too small. Carries the required byte count.
    OutputTooSmall { required: usize },
    /// An asynchronous operation was drained during shutdown.
    Cancelled,
    /// An IO error occurred while reading an external metadata overlay file. Overlay IO errors
    /// are never fatal; the overlay engine logs and skips them.
    IoError(std::io::Error),
    /// An internal invariant was violated.
    Internal(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::ConfigError(msg) => {
                write!(f, "configuration not supported: {}", msg)
            }
            Error::Truncated { offset } => {
                write!(f, "bitstream truncated at byte offset {}", offset)
            }
            Error::Corrupt(msg) => {
                write!(f, "malformed sample: {}", msg)
            }
            Error::OutputTooSmall { required } => {
                write!(f, "output buffer too small: {} bytes required", required)
            }
            Error::Cancelled => {
                write!(f, "operation cancelled")
            }
            Error::IoError(ref err) => {
                write!(f, "io error: {}", err)
            }
            Error::Internal(msg) => {
                write!(f, "internal error: {}", msg)
            }
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match *self {
            Error::IoError(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Convenience function to create a configuration error.
pub fn config_error<T>(msg: &'static str) -> Result<T> {
    Err(Error::ConfigError(msg))
}

/// Convenience function to create a truncation error at the given byte offset.
pub fn truncated_error<T>(offset: usize) -> Result<T> {
    Err(Error::Truncated { offset })
}

/// Convenience function to create a corrupt sample error.
pub fn corrupt_error<T>(msg: &'static str) -> Result<T> {
    Err(Error::Corrupt(msg))
}

/// Convenience function to create an internal error.
pub fn internal_error<T>(msg: &'static str) -> Result<T> {
    Err(Error::Internal(msg))
}
