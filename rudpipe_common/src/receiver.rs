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

use crate::cipher::ThreadedCipher;
use crate::conn::UdtConn;
use crate::NetworkError;

use std::cmp;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Default transfer block size (1 MiB).
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

const STATS_INTERVAL: Duration = Duration::from_secs(1);

/// A cloneable observation handle onto a running transfer.
#[derive(Clone)]
pub struct TransferMonitor {
    downloaded: Arc<AtomicU64>,
    live: Arc<AtomicBool>,
}

impl TransferMonitor {
    fn new() -> Self {
        Self {
            downloaded: Arc::new(AtomicU64::new(0)),
            live: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Total bytes written to the output file so far.
    /// Monotonically non-decreasing.
    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    /// Whether the transfer is currently in progress.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Relaxed)
    }
}

/// A `FileReceiver` consumes a stream of known length from a connected
/// UDT sender block by block, optionally decrypting each block in place,
/// and appends it to a local file.
pub struct FileReceiver {
    conn: UdtConn,
    decryptor: Option<ThreadedCipher>,
    monitor: TransferMonitor,
}

impl FileReceiver {
    pub fn new(conn: UdtConn, decryptor: Option<ThreadedCipher>) -> Self {
        Self {
            conn,
            decryptor,
            monitor: TransferMonitor::new(),
        }
    }

    /// Returns an observation handle for an external monitor thread.
    pub fn monitor(&self) -> TransferMonitor {
        self.monitor.clone()
    }

    /// Receives exactly `size` bytes into the file at `path`,
    /// in blocks of at most `block_size` bytes. An existing file is
    /// truncated. With `print_stats`, progress goes to stderr once
    /// a second until the transfer ends.
    ///
    /// Returns the total number of bytes written.
    pub fn recv_to_path(
        &self,
        path: &Path,
        size: u64,
        block_size: usize,
        print_stats: bool,
    ) -> Result<u64, NetworkError> {
        let mut file = File::create(path)?;
        let mut buf = vec![0; cmp::max(block_size, 1)];

        self.monitor.live.store(true, Ordering::Relaxed);

        thread::scope(|s| {
            if print_stats {
                let monitor = self.monitor();
                s.spawn(move || report_progress(&monitor, size));
            }

            let result = self.receive_blocks(&mut file, &mut buf, size);

            // Clear the flag inside the scope so the stats thread exits.
            self.monitor.live.store(false, Ordering::Relaxed);
            result
        })
    }

    fn receive_blocks(
        &self,
        file: &mut File,
        buf: &mut [u8],
        size: u64,
    ) -> Result<u64, NetworkError> {
        let mut received = 0;

        while received < size {
            let want = cmp::min(buf.len() as u64, size - received) as usize;
            let block = &mut buf[..want];

            self.read_block(block)?;
            if let Some(cipher) = &self.decryptor {
                cipher.transform(block);
            }
            file.write_all(block)?;

            received += want as u64;
            self.monitor.downloaded.store(received, Ordering::Relaxed);
        }

        Ok(received)
    }

    // Fills the whole block, offsetting by the running total.
    fn read_block(&self, buf: &mut [u8]) -> Result<(), NetworkError> {
        let mut total = 0;

        while total < buf.len() {
            match self.conn.recv(&mut buf[total..])? {
                0 => return Err(NetworkError::UnexpectedEof),
                n => total += n,
            }
        }

        Ok(())
    }
}

fn report_progress(monitor: &TransferMonitor, size: u64) {
    while monitor.is_live() {
        let done = monitor.downloaded();
        let percent = if size == 0 {
            100.0
        } else {
            done as f64 * 100.0 / size as f64
        };
        eprintln!("[info] received {} of {} bytes ({:.1}%)", done, size, percent);

        thread::sleep(STATS_INTERVAL);
    }
}
