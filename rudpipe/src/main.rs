// rudpipe is a bidirectional proxy bridging UDT and TCP transports.
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

mod error;
use error::*;

use rudpipe_common::bridge::{self, SessionCrypto};
use rudpipe_common::cipher::{self, Direction, ThreadedCipher, DEFAULT_CIPHER_THREADS};
use rudpipe_common::conn::{self, UdtConn};
use rudpipe_common::receiver::{FileReceiver, DEFAULT_BLOCK_SIZE};

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept UDT clients and forward each session to a remote TCP endpoint.
    Udt2tcp {
        /// The local address to listen on.
        local_addr: SocketAddr,
        /// The host name or address of the remote TCP endpoint.
        remote_host: String,
        /// The port of the remote TCP endpoint.
        remote_port: u16,
        /// Encrypt the UDT side of the tunnel using this passphrase.
        #[arg(long)]
        passphrase: Option<String>,
        /// The number of cipher bank contexts per direction.
        #[arg(long, default_value_t = DEFAULT_CIPHER_THREADS)]
        cipher_threads: usize,
    },
    /// Accept TCP clients and forward each session to a remote UDT endpoint.
    Tcp2udt {
        /// The local address to listen on.
        local_addr: SocketAddr,
        /// The host name or address of the remote UDT endpoint.
        remote_host: String,
        /// The port of the remote UDT endpoint.
        remote_port: u16,
        /// Encrypt the UDT side of the tunnel using this passphrase.
        #[arg(long)]
        passphrase: Option<String>,
        /// The number of cipher bank contexts per direction.
        #[arg(long, default_value_t = DEFAULT_CIPHER_THREADS)]
        cipher_threads: usize,
    },
    /// Receive a file of known size from a remote UDT sender.
    Recv {
        /// The host name or address of the remote UDT sender.
        remote_host: String,
        /// The port of the remote UDT sender.
        remote_port: u16,
        /// The path to write the received file to. An existing file is truncated.
        output: PathBuf,
        /// The exact number of bytes to receive.
        size: u64,
        /// The transfer block size in bytes.
        #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
        block_size: usize,
        /// Decrypt the stream using this passphrase.
        #[arg(long)]
        passphrase: Option<String>,
        /// The number of cipher bank contexts.
        #[arg(long, default_value_t = DEFAULT_CIPHER_THREADS)]
        cipher_threads: usize,
        /// Print transfer progress to stderr.
        #[arg(long)]
        stats: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    match run(cli) {
        Ok(_) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Udt2tcp {
            local_addr,
            remote_host,
            remote_port,
            passphrase,
            cipher_threads,
        } => {
            let crypto = session_crypto(passphrase.as_deref(), cipher_threads);
            bridge::start_udt2tcp(local_addr, &remote_host, remote_port, crypto)?;
        }
        Commands::Tcp2udt {
            local_addr,
            remote_host,
            remote_port,
            passphrase,
            cipher_threads,
        } => {
            let crypto = session_crypto(passphrase.as_deref(), cipher_threads);
            bridge::start_tcp2udt(local_addr, &remote_host, remote_port, crypto)?;
        }
        Commands::Recv {
            remote_host,
            remote_port,
            output,
            size,
            block_size,
            passphrase,
            cipher_threads,
            stats,
        } => {
            let addr = conn::resolve(&remote_host, remote_port)?;
            let client = UdtConn::connect(addr)?;

            let decryptor = passphrase.as_deref().map(|passphrase| {
                ThreadedCipher::new(
                    Direction::Decrypt,
                    &cipher::derive_key(passphrase),
                    cipher_threads,
                )
            });

            let receiver = FileReceiver::new(client, decryptor);
            let received = receiver.recv_to_path(&output, size, block_size, stats)?;
            client.close();

            eprintln!("[info] received {} bytes to {}", received, output.display());
        }
    }

    Ok(())
}

fn session_crypto(passphrase: Option<&str>, cipher_threads: usize) -> Option<SessionCrypto> {
    passphrase.map(|passphrase| SessionCrypto::new(cipher::derive_key(passphrase), cipher_threads))
}
