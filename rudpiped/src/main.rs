// rudpiped is a rudpipe proxy server daemon.
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
use rudpipe_common::cipher;
use rudpipe_common::config::{ProxyConfig, ProxyMode};

use std::path::PathBuf;
use std::process;

use clap::Parser;
use daemonizr::{Daemonizr, DaemonizrError, Stderr, Stdout};

const PWD: &str = "/";
const PIDFILE: &str = "/run/rudpiped.pid";
const LOGFILE_STDOUT: &str = "/var/log/rudpiped.out";
const LOGFILE_STDERR: &str = "/var/log/rudpiped.err";

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
/// Background process running the configured proxy direction.
struct Args {
    /// Stay attached to the terminal instead of daemonizing.
    #[arg(short, long)]
    debug: bool,
}

fn main() {
    let args = Args::parse();

    if !args.debug {
        match Daemonizr::new()
            .work_dir(PathBuf::from(PWD))
            .expect("invalid workdir")
            .pidfile(PathBuf::from(PIDFILE))
            .stdout(Stdout::Redirect(PathBuf::from(LOGFILE_STDOUT)))
            .stderr(Stderr::Redirect(PathBuf::from(LOGFILE_STDERR)))
            .umask(0o027)
            .expect("invalid umask")
            .spawn()
        {
            Ok(_) => {}
            Err(DaemonizrError::AlreadyRunning) => {
                match Daemonizr::new()
                    .work_dir(PathBuf::from(PWD))
                    .unwrap()
                    .pidfile(PathBuf::from(PIDFILE))
                    .search()
                {
                    Ok(pid) => {
                        eprintln!("Another daemon with PID {} is already running", pid);
                        process::exit(1);
                    }
                    Err(e) => eprintln!("Daemonization PID search error: {}", e),
                }
            }
            Err(e) => {
                eprintln!("Daemonization error: {}", e);
                process::exit(1);
            }
        }
    }

    match serve() {
        Ok(_) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn serve() -> Result<()> {
    ctrlc::set_handler(|| {
        eprintln!(
            "[info] Caught SIGINT, SIGTERM or SIGHUP, exiting with {} active sessions",
            bridge::active_sessions()
        );
        process::exit(0);
    })?;

    let config = ProxyConfig::load()?;

    let crypto = config.passphrase.as_deref().map(|passphrase| {
        SessionCrypto::new(cipher::derive_key(passphrase), config.cipher_threads)
    });

    eprintln!(
        "[info] <{}> Serving {} to {}:{}",
        config.bind_addr, config.mode, config.remote_host, config.remote_port
    );

    match config.mode {
        ProxyMode::Udt2tcp => {
            bridge::start_udt2tcp(config.bind_addr, &config.remote_host, config.remote_port, crypto)?
        }
        ProxyMode::Tcp2udt => {
            bridge::start_tcp2udt(config.bind_addr, &config.remote_host, config.remote_port, crypto)?
        }
    }

    Ok(())
}
