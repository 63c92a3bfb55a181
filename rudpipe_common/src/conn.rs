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

use crate::NetworkError;

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Once;
use std::time::Duration;

use socket2::{Domain, Socket, Type};
use udt::{SocketFamily, SocketType, UdtOpts, UdtSocket};

/// Maximum segment size configured on every UDT socket.
pub const MSS: i32 = 8400;
/// Send and receive buffer size of the UDT layer and its UDP substrate (64 MiB).
pub const BUFF_SIZE: usize = 67_108_864;
/// Listen backlog shared by the UDT and TCP listeners.
pub const BACKLOG: i32 = 10;

/// TCP connect timeout. Connection attempt is aborted if remote doesn't respond.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

static UDT_STARTUP: Once = Once::new();

// The UDT library keeps process-wide state that must be initialized before
// the first socket is created. Scoped to the process lifetime.
fn startup() {
    UDT_STARTUP.call_once(udt::init);
}

/// Resolves a host name and port to the first usable socket address.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr, NetworkError> {
    let mut addrs = (host, port).to_socket_addrs()?;
    addrs.next().ok_or(NetworkError::NoAddrs)
}

fn new_configured(addr: SocketAddr) -> Result<UdtSocket, NetworkError> {
    let family = match addr {
        SocketAddr::V4(_) => SocketFamily::AFInet,
        SocketAddr::V6(_) => SocketFamily::AFInet6,
    };

    let socket = UdtSocket::new(family, SocketType::Stream)?;
    socket.setsockopt(UdtOpts::UDT_MSS, MSS)?;
    socket.setsockopt(UdtOpts::UDT_SNDBUF, BUFF_SIZE as i32)?;
    socket.setsockopt(UdtOpts::UDT_RCVBUF, BUFF_SIZE as i32)?;
    socket.setsockopt(UdtOpts::UDP_SNDBUF, BUFF_SIZE as i32)?;
    socket.setsockopt(UdtOpts::UDP_RCVBUF, BUFF_SIZE as i32)?;

    Ok(socket)
}

/// A connected UDT socket with uniform receive and send-all semantics.
///
/// The handle is cheap to copy; all copies refer to the same connection.
#[derive(Clone, Copy, Debug)]
pub struct UdtConn {
    socket: UdtSocket,
}

impl UdtConn {
    /// Connects to a remote UDT endpoint,
    /// applying the transport tunables to the socket first.
    pub fn connect(addr: SocketAddr) -> Result<Self, NetworkError> {
        startup();

        let socket = new_configured(addr)?;
        socket.connect(addr)?;

        Ok(Self { socket })
    }

    /// Receives up to `buf.len()` bytes, blocking until at least one byte
    /// is available. Returns 0 on end-of-stream, including when the peer
    /// drops the connection.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize, NetworkError> {
        let len = buf.len();
        match self.socket.recv(buf, len) {
            Ok(n) => Ok(n.max(0) as usize),
            Err(e) => match NetworkError::from(e) {
                NetworkError::Disconnected => Ok(0),
                e => Err(e),
            },
        }
    }

    /// Sends all of `buf`, looping until the transport has accepted
    /// every byte.
    pub fn send_all(&self, mut buf: &[u8]) -> Result<(), NetworkError> {
        while !buf.is_empty() {
            let sent = self.socket.send(buf)?.max(0) as usize;
            if sent == 0 {
                return Err(NetworkError::Disconnected);
            }
            buf = &buf[sent..];
        }

        Ok(())
    }

    /// Closes the connection. UDT has no directional shutdown,
    /// so this ends both directions.
    pub fn close(&self) {
        let _ = self.socket.close();
    }
}

/// A listening UDT socket accepting bridge clients.
pub struct UdtListener {
    socket: UdtSocket,
}

impl UdtListener {
    /// Binds a configured UDT socket to `addr` and starts listening.
    pub fn bind(addr: SocketAddr) -> Result<Self, NetworkError> {
        startup();

        let socket = new_configured(addr)?;
        socket.bind(addr)?;
        socket.listen(BACKLOG)?;

        Ok(Self { socket })
    }

    /// Waits for the next client connection.
    pub fn accept(&self) -> Result<(UdtConn, SocketAddr), NetworkError> {
        let (socket, peer_addr) = self.socket.accept()?;
        Ok((UdtConn { socket }, peer_addr))
    }

    /// The local address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(self.socket.getsockname()?)
    }

    /// Stops listening.
    pub fn close(&self) {
        let _ = self.socket.close();
    }
}

/// A connected TCP stream with the same adapter surface as [`UdtConn`].
/// Socket options are left at kernel defaults.
#[derive(Debug)]
pub struct TcpConn {
    stream: TcpStream,
}

impl TcpConn {
    /// Shorthand for `TcpStream::connect_timeout(addr, CONNECT_TIMEOUT)`.
    pub fn connect(addr: SocketAddr) -> Result<Self, NetworkError> {
        Ok(TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?.into())
    }

    /// Receives up to `buf.len()` bytes. Returns 0 on orderly close.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, NetworkError> {
        Ok(self.stream.read(buf)?)
    }

    /// Sends all of `buf`.
    pub fn send_all(&mut self, buf: &[u8]) -> Result<(), NetworkError> {
        Ok(self.stream.write_all(buf)?)
    }

    /// Half-closes the stream: no more data will be sent,
    /// the receive direction stays open.
    pub fn shutdown_send(&self) {
        let _ = self.stream.shutdown(Shutdown::Write);
    }

    /// Clones the handle for use by a second thread.
    /// Both handles refer to the same connection.
    pub fn try_clone(&self) -> Result<Self, NetworkError> {
        Ok(Self {
            stream: self.stream.try_clone()?,
        })
    }
}

impl From<TcpStream> for TcpConn {
    fn from(stream: TcpStream) -> Self {
        Self { stream }
    }
}

/// Builds a TCP listener on `addr` with the same accept backlog
/// as the UDT listener.
pub fn tcp_listener(addr: SocketAddr) -> Result<TcpListener, NetworkError> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}
