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

use crate::cbuf::CircularBuffer;
use crate::cipher::{Direction, ThreadedCipher};
use crate::conn::{self, TcpConn, UdtConn, UdtListener, BUFF_SIZE};
use crate::NetworkError;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// Capacity of each per-direction byte queue (4x the transport buffers).
pub const QUEUE_CAPACITY: usize = 4 * BUFF_SIZE;

static ACTIVE_SESSIONS: AtomicUsize = AtomicUsize::new(0);

/// The number of bridge sessions currently forwarding traffic.
pub fn active_sessions() -> usize {
    ACTIVE_SESSIONS.load(Ordering::Relaxed)
}

/// Key material for an encrypted tunnel. Both bridge endpoints must agree
/// on the key and IV; the UDT side then carries ciphertext only.
#[derive(Clone)]
pub struct SessionCrypto {
    /// The 128-bit tunnel key.
    pub key: [u8; 16],
    /// The initialization vector, fixed for the session.
    pub iv: [u8; 16],
    /// The number of cipher bank contexts per direction.
    pub threads: usize,
}

impl SessionCrypto {
    /// Constructs tunnel key material with the all-zero IV.
    pub fn new(key: [u8; 16], threads: usize) -> Self {
        Self {
            key,
            iv: [0; 16],
            threads,
        }
    }
}

/// One proxied client connection: a UDT endpoint and a TCP endpoint glued
/// together by a byte queue per forwarding direction.
///
/// With encryption enabled, bytes received from UDT are decrypted before
/// they are enqueued and bytes dequeued toward UDT are encrypted right
/// before transmission. Plaintext only ever sits in the internal queues,
/// never on the UDT wire.
pub struct Session {
    udt: UdtConn,
    tcp: TcpConn,
    encryptor: Option<ThreadedCipher>,
    decryptor: Option<ThreadedCipher>,
}

impl Session {
    /// Pairs the two transport endpoints,
    /// deriving per-session cipher banks from `crypto` if present.
    pub fn new(udt: UdtConn, tcp: TcpConn, crypto: Option<&SessionCrypto>) -> Self {
        let encryptor =
            crypto.map(|c| ThreadedCipher::with_iv(Direction::Encrypt, &c.key, &c.iv, c.threads));
        let decryptor =
            crypto.map(|c| ThreadedCipher::with_iv(Direction::Decrypt, &c.key, &c.iv, c.threads));

        Self {
            udt,
            tcp,
            encryptor,
            decryptor,
        }
    }

    /// Runs both forwarding pipelines to completion.
    ///
    /// Returns once each direction has observed end-of-stream and drained
    /// its queue; the sockets are closed by then.
    pub fn run(self) -> Result<(), NetworkError> {
        let udt_to_tcp = CircularBuffer::new(QUEUE_CAPACITY);
        let tcp_to_udt = CircularBuffer::new(QUEUE_CAPACITY);

        let mut tcp_rx = self.tcp.try_clone()?;
        let mut tcp_tx = self.tcp.try_clone()?;

        ACTIVE_SESSIONS.fetch_add(1, Ordering::Relaxed);

        thread::scope(|s| {
            s.spawn(|| udt_to_queue(&self.udt, self.decryptor.as_ref(), &udt_to_tcp));
            s.spawn(|| queue_to_tcp(&udt_to_tcp, &mut tcp_tx));
            s.spawn(|| tcp_to_queue(&mut tcp_rx, &tcp_to_udt));
            s.spawn(|| queue_to_udt(&tcp_to_udt, &self.udt, self.encryptor.as_ref()));
        });

        ACTIVE_SESSIONS.fetch_sub(1, Ordering::Relaxed);

        Ok(())
    }
}

fn udt_to_queue(conn: &UdtConn, decryptor: Option<&ThreadedCipher>, queue: &CircularBuffer) {
    let mut buf = vec![0; BUFF_SIZE];

    loop {
        let n = match conn.recv(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                // Stay quiet if the session is already tearing down.
                if !queue.is_closed() {
                    eprintln!("[warn] UDT receive error: {}", e);
                }
                break;
            }
        };

        if let Some(cipher) = decryptor {
            cipher.transform(&mut buf[..n]);
        }

        if queue.write(&buf[..n]).is_err() {
            break;
        }
    }

    queue.close();
}

fn queue_to_tcp(queue: &CircularBuffer, tcp: &mut TcpConn) {
    let mut buf = vec![0; BUFF_SIZE];

    loop {
        let n = queue.read(&mut buf);
        if n == 0 {
            break;
        }

        if let Err(e) = tcp.send_all(&buf[..n]) {
            eprintln!("[warn] TCP send error: {}", e);
            queue.close();
            break;
        }
    }

    tcp.shutdown_send();
}

fn tcp_to_queue(tcp: &mut TcpConn, queue: &CircularBuffer) {
    let mut buf = vec![0; BUFF_SIZE];

    loop {
        let n = match tcp.recv(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                if !queue.is_closed() {
                    eprintln!("[warn] TCP receive error: {}", e);
                }
                break;
            }
        };

        if queue.write(&buf[..n]).is_err() {
            break;
        }
    }

    queue.close();
}

fn queue_to_udt(queue: &CircularBuffer, conn: &UdtConn, encryptor: Option<&ThreadedCipher>) {
    let mut buf = vec![0; BUFF_SIZE];

    loop {
        let n = queue.read(&mut buf);
        if n == 0 {
            break;
        }

        if let Some(cipher) = encryptor {
            cipher.transform(&mut buf[..n]);
        }

        match conn.send_all(&buf[..n]) {
            Ok(()) => {}
            Err(NetworkError::Disconnected) => {
                queue.close();
                break;
            }
            Err(e) => {
                eprintln!("[warn] UDT send error: {}", e);
                queue.close();
                break;
            }
        }
    }

    conn.close();
}

/// Listens for UDT clients on `local_addr` and forwards each session
/// to the TCP endpoint `remote_host:remote_port`.
///
/// Every accepted client gets its own session thread. Accept errors are
/// logged and the loop continues; only binding the listener can fail.
pub fn start_udt2tcp(
    local_addr: SocketAddr,
    remote_host: &str,
    remote_port: u16,
    crypto: Option<SessionCrypto>,
) -> Result<(), NetworkError> {
    let listener = UdtListener::bind(local_addr)?;
    eprintln!("[info] <{}> Listening for UDT clients", local_addr);

    loop {
        let (client, peer_addr) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                eprintln!("[warn] UDT accept error: {}", e);
                continue;
            }
        };

        eprintln!("[info] <{}> New UDT client", peer_addr);

        let remote_host = remote_host.to_owned();
        let crypto = crypto.clone();
        thread::spawn(move || {
            let result = conn::resolve(&remote_host, remote_port)
                .and_then(TcpConn::connect)
                .and_then(|tcp| Session::new(client, tcp, crypto.as_ref()).run());

            match result {
                Ok(()) => eprintln!("[info] <{}> Disconnected", peer_addr),
                Err(e) => {
                    client.close();
                    eprintln!("[warn] <{}> Cannot bridge client: {}", peer_addr, e);
                }
            }
        });
    }
}

/// Listens for TCP clients on `local_addr` and forwards each session
/// to the UDT endpoint `remote_host:remote_port`.
pub fn start_tcp2udt(
    local_addr: SocketAddr,
    remote_host: &str,
    remote_port: u16,
    crypto: Option<SessionCrypto>,
) -> Result<(), NetworkError> {
    let listener = conn::tcp_listener(local_addr)?;
    eprintln!("[info] <{}> Listening for TCP clients", local_addr);

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                eprintln!("[warn] TCP accept error: {}", e);
                continue;
            }
        };
        let peer_addr = match stream.peer_addr() {
            Ok(peer_addr) => peer_addr,
            Err(e) => {
                eprintln!("[warn] TCP accept error: {}", e);
                continue;
            }
        };

        eprintln!("[info] <{}> New TCP client", peer_addr);

        let remote_host = remote_host.to_owned();
        let crypto = crypto.clone();
        thread::spawn(move || {
            let result = conn::resolve(&remote_host, remote_port)
                .and_then(UdtConn::connect)
                .and_then(|udt| Session::new(udt, stream.into(), crypto.as_ref()).run());

            match result {
                Ok(()) => eprintln!("[info] <{}> Disconnected", peer_addr),
                Err(e) => eprintln!("[warn] <{}> Cannot bridge client: {}", peer_addr, e),
            }
        });
    }

    Ok(())
}
