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

use crate::QueueClosed;

use std::cmp;
use std::sync::{Condvar, Mutex};

/// A `CircularBuffer` is a fixed-capacity blocking byte queue decoupling
/// one producer thread from one consumer thread.
///
/// Writers block while the queue is full, readers block while it is empty.
/// Closing the queue wakes both sides: writes are rejected from then on
/// while reads drain the remaining bytes before signalling end-of-stream.
pub struct CircularBuffer {
    ring: Mutex<Ring>,
    data_avail: Condvar,
    space_avail: Condvar,
    capacity: usize,
}

struct Ring {
    data: Box<[u8]>,
    begin: usize,
    size: usize,
    closed: bool,
}

impl Ring {
    fn free(&self) -> usize {
        self.data.len() - self.size
    }

    // One slot stays reserved so a full queue is distinguishable from an
    // empty one by the blocking gate.
    fn has_space(&self) -> bool {
        self.free() > 1
    }

    fn copy_in(&mut self, src: &[u8]) -> usize {
        let cap = self.data.len();
        let n = cmp::min(src.len(), self.free());
        if n == 0 {
            return 0;
        }

        let end = (self.begin + self.size) % cap;
        let tail = cmp::min(n, cap - end);
        self.data[end..end + tail].copy_from_slice(&src[..tail]);
        self.data[..n - tail].copy_from_slice(&src[tail..n]);

        self.size += n;
        n
    }

    fn copy_out(&mut self, dst: &mut [u8]) -> usize {
        let cap = self.data.len();
        let n = cmp::min(dst.len(), self.size);
        if n == 0 {
            return 0;
        }

        let tail = cmp::min(n, cap - self.begin);
        dst[..tail].copy_from_slice(&self.data[self.begin..self.begin + tail]);
        dst[tail..n].copy_from_slice(&self.data[..n - tail]);

        self.begin = (self.begin + n) % cap;
        self.size -= n;
        n
    }
}

impl CircularBuffer {
    /// Constructs an open queue of the given capacity in bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` does not exceed the reserved slot.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 1, "capacity must exceed the reserved slot");

        Self {
            ring: Mutex::new(Ring {
                data: vec![0; capacity].into_boxed_slice(),
                begin: 0,
                size: 0,
                closed: false,
            }),
            data_avail: Condvar::new(),
            space_avail: Condvar::new(),
            capacity,
        }
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes currently buffered.
    pub fn size(&self) -> usize {
        self.ring.lock().unwrap().size
    }

    /// Whether a writer may currently transfer bytes without blocking.
    pub fn has_space(&self) -> bool {
        self.ring.lock().unwrap().has_space()
    }

    /// Whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.ring.lock().unwrap().closed
    }

    /// Closes the queue, waking any blocked reader and writer. Idempotent.
    pub fn close(&self) {
        let mut ring = self.ring.lock().unwrap();
        ring.closed = true;

        self.data_avail.notify_all();
        self.space_avail.notify_all();
    }

    /// Writes all of `data`, blocking whenever the queue is full.
    ///
    /// Returns the number of bytes written, which equals `data.len()`
    /// unless the queue is closed before completion.
    pub fn write(&self, data: &[u8]) -> Result<usize, QueueClosed> {
        if data.is_empty() {
            return Ok(0);
        }

        let mut ring = self.ring.lock().unwrap();
        let mut written = 0;

        while written < data.len() {
            if ring.closed {
                return Err(QueueClosed);
            }
            if !ring.has_space() {
                ring = self.space_avail.wait(ring).unwrap();
                continue;
            }

            written += ring.copy_in(&data[written..]);
            self.data_avail.notify_one();
        }

        Ok(written)
    }

    /// Reads between 1 and `buf.len()` bytes, blocking while the queue
    /// is empty. Returns 0 only once the queue is closed and drained.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        let mut ring = self.ring.lock().unwrap();

        loop {
            if ring.size > 0 {
                let n = ring.copy_out(buf);
                self.space_avail.notify_one();
                return n;
            }
            if ring.closed {
                return 0;
            }

            ring = self.data_avail.wait(ring).unwrap();
        }
    }

    /// Writes as many bytes as currently fit, returning immediately.
    pub fn write_nonblocking(&self, data: &[u8]) -> Result<usize, QueueClosed> {
        if data.is_empty() {
            return Ok(0);
        }

        let mut ring = self.ring.lock().unwrap();
        if ring.closed {
            return Err(QueueClosed);
        }

        let n = ring.copy_in(data);
        if n > 0 {
            self.data_avail.notify_one();
        }

        Ok(n)
    }

    /// Reads as many bytes as currently available, returning immediately.
    /// A return of 0 means end-of-stream only if [`Self::is_closed`] is true.
    pub fn read_nonblocking(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        let mut ring = self.ring.lock().unwrap();
        let n = ring.copy_out(buf);
        if n > 0 {
            self.space_avail.notify_one();
        }

        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cmp;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use rand::rngs::StdRng;
    use rand::{Rng, RngCore, SeedableRng};

    #[test]
    fn preserves_byte_order_across_threads() {
        let queue = Arc::new(CircularBuffer::new(4096));
        let mut payload = vec![0u8; 1 << 20];
        StdRng::seed_from_u64(7).fill_bytes(&mut payload);

        let expected = payload.clone();
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(11);
                let mut sent = 0;
                while sent < payload.len() {
                    let n = cmp::min(rng.gen_range(1..=8192), payload.len() - sent);
                    queue.write(&payload[sent..sent + n]).unwrap();
                    sent += n;
                }
                queue.close();
            })
        };

        let mut rng = StdRng::seed_from_u64(13);
        let mut received = Vec::with_capacity(expected.len());
        let mut buf = vec![0u8; 8192];
        loop {
            let want = rng.gen_range(1..=buf.len());
            let n = queue.read(&mut buf[..want]);
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }

        producer.join().unwrap();
        assert_eq!(received, expected);
    }

    #[test]
    fn close_rejects_writes_and_drains_reads() {
        let queue = CircularBuffer::new(64);

        assert_eq!(queue.write(b"pending"), Ok(7));
        queue.close();
        queue.close();

        assert_eq!(queue.write(b"more"), Err(QueueClosed));
        assert_eq!(queue.write_nonblocking(b"more"), Err(QueueClosed));

        let mut buf = [0u8; 16];
        assert_eq!(queue.read(&mut buf), 7);
        assert_eq!(&buf[..7], b"pending");
        assert_eq!(queue.read(&mut buf), 0);
        assert_eq!(queue.read(&mut buf), 0);
    }

    #[test]
    fn close_unblocks_waiting_writer() {
        let queue = Arc::new(CircularBuffer::new(16));
        queue.write(&[0u8; 15]).unwrap();
        assert!(!queue.has_space());

        let writer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.write(&[1u8; 8]))
        };

        thread::sleep(Duration::from_millis(50));
        queue.close();
        assert_eq!(writer.join().unwrap(), Err(QueueClosed));
    }

    #[test]
    fn blocks_at_reserved_slot_until_read() {
        let queue = Arc::new(CircularBuffer::new(16));
        queue.write(&[7u8; 15]).unwrap();
        assert!(!queue.has_space());
        assert_eq!(queue.size(), 15);

        let (done_tx, done_rx) = mpsc::channel();
        let writer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let written = queue.write(&[9u8; 4]);
                done_tx.send(()).unwrap();
                written
            })
        };

        // Writer must stay blocked while the queue is at the reserved slot.
        assert!(done_rx
            .recv_timeout(Duration::from_millis(100))
            .is_err());

        let mut buf = [0u8; 8];
        assert_eq!(queue.read(&mut buf), 8);
        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("writer not unblocked by read");
        assert_eq!(writer.join().unwrap(), Ok(4));
        assert_eq!(queue.size(), 11);
    }

    #[test]
    fn nonblocking_ops_return_immediately() {
        let queue = CircularBuffer::new(8);
        let mut buf = [0u8; 8];

        assert_eq!(queue.read_nonblocking(&mut buf), 0);
        assert!(!queue.is_closed());

        assert_eq!(queue.write_nonblocking(&[1u8; 12]), Ok(8));
        assert_eq!(queue.write_nonblocking(&[2u8; 4]), Ok(0));
        assert_eq!(queue.read_nonblocking(&mut buf), 8);
        assert_eq!(buf, [1u8; 8]);
    }

    #[test]
    fn backpressure_without_loss() {
        let queue = Arc::new(CircularBuffer::new(4096));
        let mut payload = vec![0u8; 128 * 1024];
        StdRng::seed_from_u64(0xC0FFEE).fill_bytes(&mut payload);

        let expected = payload.clone();
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut sent = 0;
                while sent < payload.len() {
                    let n = cmp::min(16 * 1024, payload.len() - sent);
                    queue.write(&payload[sent..sent + n]).unwrap();
                    sent += n;
                }
                queue.close();
            })
        };

        let mut received = Vec::with_capacity(expected.len());
        let mut buf = vec![0u8; 4096];
        loop {
            let n = queue.read(&mut buf);
            if n == 0 {
                break;
            }
            // The producer outpaces this by far; it must block, not drop.
            assert!(queue.size() <= queue.capacity());
            received.extend_from_slice(&buf[..n]);
            thread::sleep(Duration::from_millis(1));
        }

        producer.join().unwrap();
        assert_eq!(received, expected);
    }
}
