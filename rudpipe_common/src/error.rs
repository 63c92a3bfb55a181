// rudpipe_common is the main rudpipe library implementing the shared bridge logic.
// Copyright (C) 2026  Himbeer <himbeerserverde@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::io;

use thiserror::Error;

/// UDT error code raised when an established connection is lost.
/// Mapped to end-of-stream rather than reported as a failure.
const ECONNLOST: i32 = 2001;

/// The byte queue has been closed. Remaining buffered bytes stay readable;
/// any further write is rejected with this error.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
#[error("Byte queue is closed")]
pub struct QueueClosed;

/// A `NetworkError` indicates an error condition on a transport connection
/// or a proxied session.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Address resolution yielded no usable socket addresses.
    #[error("No usable socket addresses")]
    NoAddrs,
    /// The remote peer went away mid-session.
    /// Drives graceful teardown and is not logged as an error.
    #[error("Connection to remote peer lost")]
    Disconnected,
    /// The stream ended before the expected byte count arrived.
    #[error("Stream ended before the expected byte count")]
    UnexpectedEof,
    /// A UDT library call failed.
    #[error("UDT error {code}: {message}")]
    Udt { code: i32, message: String },

    /// A `std::io::Error` I/O error occured.
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl From<udt::UdtError> for NetworkError {
    fn from(e: udt::UdtError) -> Self {
        if e.err_code == ECONNLOST {
            Self::Disconnected
        } else {
            Self::Udt {
                code: e.err_code,
                message: e.err_msg,
            }
        }
    }
}

/// A `LocalConfigError` indicates a failure loading or saving
/// the daemon configuration file.
#[derive(Debug, Error)]
pub enum LocalConfigError {
    /// The permissions on the configuration file are insecure.
    #[error("Insecure config permissions (limit access to root user!)")]
    InsecurePerms,

    /// A `std::io::Error` I/O error occured.
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    /// A `toml::ser::Error` TOML serialization error occured.
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    /// A `toml::de::Error` TOML deserialization error occured.
    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}
