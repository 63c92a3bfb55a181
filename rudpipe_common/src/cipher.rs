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

use std::cmp;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

use aes::Aes128;
use cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Upper bound on the number of cipher bank contexts.
pub const MAX_CIPHER_THREADS: usize = 32;
/// Bank size used by the binaries unless overridden.
pub const DEFAULT_CIPHER_THREADS: usize = 4;

/// Buffers at or below this size are transformed on the calling thread;
/// fanning out costs more than it saves.
const DISPATCH_BLOCK: usize = 64 * 1024;

/// Domain separation tag for passphrase-based key derivation.
const KEY_DOMAIN: &[u8] = b"rudpipe stream key v1";

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Whether a cipher turns plaintext into ciphertext or back.
///
/// The counter mode transform is symmetric; the direction records intent
/// so misconfigured tunnels are diagnosable.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// A `ThreadedCipher` is a bank of AES-128-CTR contexts sharing one key
/// and IV, transforming byte streams in place.
///
/// Every call to [`Self::transform`] covers a contiguous run of the
/// session stream. Each context seeks to the absolute stream offset of the
/// piece it is handed, so the output is byte-exact with a single
/// continuous CTR stream no matter how calls are partitioned or which
/// context serves them. Large buffers are split across the bank and
/// transformed on parallel worker threads scoped to the call.
pub struct ThreadedCipher {
    direction: Direction,
    contexts: Vec<Mutex<Aes128Ctr>>,
    next: AtomicUsize,
    offset: AtomicU64,
}

impl ThreadedCipher {
    /// Constructs a cipher bank with the all-zero IV.
    pub fn new(direction: Direction, key: &[u8; 16], threads: usize) -> Self {
        Self::with_iv(direction, key, &[0; 16], threads)
    }

    /// Constructs a cipher bank with an explicit IV.
    /// The bank size is clamped to `1..=MAX_CIPHER_THREADS`.
    pub fn with_iv(direction: Direction, key: &[u8; 16], iv: &[u8; 16], threads: usize) -> Self {
        let threads = threads.clamp(1, MAX_CIPHER_THREADS);
        let contexts = (0..threads)
            .map(|_| Mutex::new(Aes128Ctr::new(key.into(), iv.into())))
            .collect();

        Self {
            direction,
            contexts,
            next: AtomicUsize::new(0),
            offset: AtomicU64::new(0),
        }
    }

    /// The configured transform direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The number of independent cipher contexts in the bank.
    pub fn contexts(&self) -> usize {
        self.contexts.len()
    }

    /// Transforms `buf` in place and returns the number of bytes
    /// transformed, which always equals `buf.len()`.
    pub fn transform(&self, buf: &mut [u8]) -> usize {
        let len = buf.len();
        if len == 0 {
            return 0;
        }

        let base = self.offset.fetch_add(len as u64, Ordering::Relaxed);

        if self.contexts.len() == 1 || len <= DISPATCH_BLOCK {
            self.apply(base, buf);
            return len;
        }

        let chunk = len.div_ceil(self.contexts.len());
        thread::scope(|s| {
            let mut offset = base;
            for piece in buf.chunks_mut(chunk) {
                let piece_offset = offset;
                offset += piece.len() as u64;
                s.spawn(move || self.apply(piece_offset, piece));
            }
        });

        len
    }

    fn apply(&self, offset: u64, buf: &mut [u8]) {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.contexts.len();
        let mut ctx = self.contexts[i].lock().unwrap();

        ctx.seek(offset);
        ctx.apply_keystream(buf);
    }
}

/// Derives the 128-bit tunnel key from a shared passphrase
/// using HMAC-SHA256 under a fixed domain separation tag.
pub fn derive_key<P: AsRef<[u8]>>(passphrase: P) -> [u8; 16] {
    let mut mac: Hmac<Sha256> =
        Hmac::new_from_slice(KEY_DOMAIN).expect("HMAC can take key of any size");
    mac.update(passphrase.as_ref());
    let digest = mac.finalize().into_bytes();

    let mut key = [0; 16];
    key.copy_from_slice(&digest[..16]);
    key
}
