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

use rudpipe_common::bridge::{self, SessionCrypto};
use rudpipe_common::cipher::{Direction, ThreadedCipher};
use rudpipe_common::conn::{UdtConn, UdtListener};
use rudpipe_common::receiver::FileReceiver;

use std::cmp;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

const KEY: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];

fn local(port: u16) -> SocketAddr {
    format!("127.0.0.1:{}", port).parse().unwrap()
}

// Spawns a single-connection TCP echo server on an ephemeral port.
fn tcp_echo_server() -> SocketAddr {
    let listener = TcpListener::bind(local(0)).unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = vec![0u8; 8192];
        loop {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            stream.write_all(&buf[..n]).unwrap();
        }
    });

    addr
}

// The bridge listener comes up asynchronously.
fn connect_udt_with_retry(addr: SocketAddr) -> UdtConn {
    for _ in 0..50 {
        if let Ok(conn) = UdtConn::connect(addr) {
            return conn;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("UDT endpoint {} never came up", addr);
}

fn connect_tcp_with_retry(addr: SocketAddr) -> TcpStream {
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(addr) {
            return stream;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("TCP endpoint {} never came up", addr);
}

fn recv_exact(conn: &UdtConn, buf: &mut [u8]) {
    let mut total = 0;
    while total < buf.len() {
        let n = conn.recv(&mut buf[total..]).unwrap();
        assert_ne!(n, 0, "stream ended early at {} bytes", total);
        total += n;
    }
}

fn payload(len: usize, seed: u64) -> Vec<u8> {
    let mut data = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill_bytes(&mut data);
    data
}

#[test]
fn udt2tcp_forwards_echo_round_trip() {
    let echo_addr = tcp_echo_server();
    let bridge_addr = local(47801);

    thread::spawn(move || {
        bridge::start_udt2tcp(bridge_addr, "127.0.0.1", echo_addr.port(), None).unwrap();
    });

    let client = connect_udt_with_retry(bridge_addr);
    client.send_all(b"hello world").unwrap();

    let mut buf = [0u8; 11];
    recv_exact(&client, &mut buf);
    assert_eq!(&buf, b"hello world");

    client.close();
}

#[test]
fn udt2tcp_preserves_large_stream_order() {
    let echo_addr = tcp_echo_server();
    let bridge_addr = local(47811);

    thread::spawn(move || {
        bridge::start_udt2tcp(bridge_addr, "127.0.0.1", echo_addr.port(), None).unwrap();
    });

    let sent = payload(8 * 1024 * 1024, 0xC0FFEE);

    let client = connect_udt_with_retry(bridge_addr);
    let writer = {
        let sent = sent.clone();
        thread::spawn(move || {
            client.send_all(&sent).unwrap();
            client
        })
    };

    let client = writer.join().unwrap();
    let mut received = vec![0u8; sent.len()];
    let mut total = 0;
    let mut chunk = vec![0u8; 64 * 1024];
    while total < received.len() {
        let want = cmp::min(chunk.len(), received.len() - total);
        let n = client.recv(&mut chunk[..want]).unwrap();
        assert_ne!(n, 0, "echo stream ended early at {} bytes", total);
        received[total..total + n].copy_from_slice(&chunk[..n]);
        total += n;
    }

    assert_eq!(received, sent);
    client.close();
}

#[test]
fn tcp2udt_carries_ciphertext_only() {
    let udt_addr = local(47821);
    let bridge_addr = local(47822);

    let listener = UdtListener::bind(udt_addr).unwrap();
    let (wire_tx, wire_rx) = mpsc::channel();
    thread::spawn(move || {
        let (peer, _) = listener.accept().unwrap();
        let mut buf = [0u8; 11];
        recv_exact(&peer, &mut buf);
        wire_tx.send(buf).unwrap();
        peer.close();
    });

    thread::spawn(move || {
        let crypto = SessionCrypto::new(KEY, 2);
        bridge::start_tcp2udt(bridge_addr, "127.0.0.1", udt_addr.port(), Some(crypto)).unwrap();
    });

    let mut client = connect_tcp_with_retry(bridge_addr);
    client.write_all(b"hello world").unwrap();

    let mut wire = wire_rx.recv_timeout(Duration::from_secs(30)).unwrap();
    assert_ne!(&wire, b"hello world", "tunnel leaked plaintext");

    let decryptor = ThreadedCipher::new(Direction::Decrypt, &KEY, 1);
    assert_eq!(decryptor.transform(&mut wire), 11);
    assert_eq!(&wire, b"hello world");
}

#[test]
fn tcp2udt_forwards_eos_both_ways() {
    let udt_addr = local(47831);
    let bridge_addr = local(47832);

    let listener = UdtListener::bind(udt_addr).unwrap();
    let (count_tx, count_rx) = mpsc::channel();
    thread::spawn(move || {
        let (peer, _) = listener.accept().unwrap();

        let mut request = vec![0u8; 1024];
        recv_exact(&peer, &mut request);
        peer.send_all(&[7u8; 64]).unwrap();

        // The client half-closes once it has the response; the bridge
        // turns that into a connection close on the UDT side.
        let mut buf = [0u8; 64];
        let trailing = peer.recv(&mut buf).unwrap_or(0);
        count_tx.send((request, trailing)).unwrap();
        peer.close();
    });

    thread::spawn(move || {
        bridge::start_tcp2udt(bridge_addr, "127.0.0.1", udt_addr.port(), None).unwrap();
    });

    let mut client = connect_tcp_with_retry(bridge_addr);
    let sent = payload(1024, 42);
    client.write_all(&sent).unwrap();

    let mut response = [0u8; 64];
    client.read_exact(&mut response).unwrap();
    assert_eq!(response, [7u8; 64]);

    client.shutdown(Shutdown::Write).unwrap();

    let (request, trailing) = count_rx.recv_timeout(Duration::from_secs(30)).unwrap();
    assert_eq!(request, sent);
    assert_eq!(trailing, 0, "receive side not closed after drain");

    // The UDT peer closed after responding; the bridge propagates that
    // as end-of-stream on the TCP side.
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
}

#[test]
fn receives_file_and_publishes_progress() {
    let udt_addr = local(47841);
    let size = 2 * 1024 * 1024;
    let plaintext = payload(size, 99);

    let listener = UdtListener::bind(udt_addr).unwrap();
    let sender = {
        let plaintext = plaintext.clone();
        thread::spawn(move || {
            let (peer, _) = listener.accept().unwrap();

            let encryptor = ThreadedCipher::new(Direction::Encrypt, &KEY, 4);
            let mut ciphertext = plaintext;
            encryptor.transform(&mut ciphertext);

            peer.send_all(&ciphertext).unwrap();
            peer.close();
        })
    };

    let client = connect_udt_with_retry(udt_addr);
    let decryptor = ThreadedCipher::new(Direction::Decrypt, &KEY, 2);
    let receiver = FileReceiver::new(client, Some(decryptor));
    let monitor = receiver.monitor();

    let path = std::env::temp_dir().join("rudpipe_recv_test.bin");
    let received = receiver
        .recv_to_path(&path, size as u64, 256 * 1024, false)
        .unwrap();
    client.close();
    sender.join().unwrap();

    assert_eq!(received, size as u64);
    assert_eq!(monitor.downloaded(), size as u64);
    assert!(!monitor.is_live());

    let written = std::fs::read(&path).unwrap();
    assert_eq!(written, plaintext);

    std::fs::remove_file(&path).ok();
}
