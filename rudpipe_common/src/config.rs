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

use crate::cipher::DEFAULT_CIPHER_THREADS;
use crate::LocalConfigError;

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

use serde::{Deserialize, Serialize};

/// Which transport faces local clients.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProxyMode {
    /// Accept UDT clients, forward each session to a remote TCP endpoint.
    Udt2tcp,
    /// Accept TCP clients, forward each session to a remote UDT endpoint.
    Tcp2udt,
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udt2tcp => write!(f, "udt2tcp"),
            Self::Tcp2udt => write!(f, "tcp2udt"),
        }
    }
}

/// A `ProxyConfig` describes the proxy direction served by `rudpiped`
/// as well as the optional tunnel encryption secret.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// The proxy direction to run.
    pub mode: ProxyMode,
    /// The local address the listener binds to.
    pub bind_addr: SocketAddr,
    /// The host name or address the sessions are forwarded to.
    pub remote_host: String,
    /// The port the sessions are forwarded to.
    pub remote_port: u16,
    /// The tunnel encryption passphrase. Omitting it disables encryption.
    ///
    /// **Both bridge endpoints must be configured with the same passphrase.**
    pub passphrase: Option<String>,
    /// The number of cipher bank contexts per direction.
    #[serde(default = "default_cipher_threads")]
    pub cipher_threads: usize,
}

fn default_cipher_threads() -> usize {
    DEFAULT_CIPHER_THREADS
}

impl ProxyConfig {
    pub const PATH: &'static str = "/etc/rudpipe.conf";

    /// Loads the configuration file of the current machine.
    pub fn load() -> Result<Self, LocalConfigError> {
        let mut f = File::open(Self::PATH)?;

        if f.metadata()?.permissions().mode() & 0o7077 > 0 {
            return Err(LocalConfigError::InsecurePerms);
        }

        let mut s = String::new();
        f.read_to_string(&mut s)?;

        Ok(toml::from_str(&s)?)
    }

    /// Saves the configuration to the configuration file on the current machine.
    pub fn save(&self) -> Result<(), LocalConfigError> {
        let s = toml::to_string_pretty(self)?;

        let mut f = OpenOptions::new()
            .create(true)
            .read(false)
            .write(true)
            .append(false)
            .truncate(true)
            .mode(0o0600)
            .open(Self::PATH)?;

        write!(f, "{}", s)?;
        Ok(())
    }
}
