use std::cmp;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};

use crate::sys::Socket;
use crate::{Interest, Ready};

/// Chunk size of a single `recv`.
pub const READ_SIZE: usize = 1024;
/// Cap on the inbound buffer. Filling it up terminates the conversation
/// normally; it is not an error.
pub const MAX_BUF_SIZE: usize = 4096;

/// Outcome of driving a probe one event forward.
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    /// Not finished. `Some(interest)` asks the reactor for a new direction,
    /// `None` keeps the current registration.
    Continue(Option<Interest>),
    /// The conversation reached its terminal state.
    Done,
}

/// A successful probe result, as rendered into the log sink.
#[derive(Debug, PartialEq, Eq)]
pub enum Response<'a> {
    /// The TCP handshake completed; there is no payload.
    Connected,
    /// Bytes collected from the peer.
    Payload(&'a [u8]),
}

/// The protocol conversation driving one connection.
///
/// A probe owns its buffers and its own small state machine; the socket stays
/// with the connection and is lent to the probe per event. Readiness bits a
/// probe is not waiting for are ignored.
pub trait Probe {
    /// Called exactly once, after the non-blocking connect has been issued.
    /// Returns the initial interest, which is always [`Interest::Writable`]:
    /// the first writable event signals the connect concluded.
    fn initialise(&mut self) -> Interest;

    /// Advances the conversation. An `Err` is a connection-local I/O failure;
    /// the caller destroys the connection and tallies an error.
    fn on_event(&mut self, socket: &Socket, readiness: Ready) -> io::Result<Step>;

    /// Called once, when the connection is overdue. Returns true iff the
    /// partial progress still counts as a success.
    fn on_timeout(&mut self) -> bool;

    /// The collected result, if the probe got far enough to have one.
    fn response(&self) -> Option<Response<'_>>;
}

/// Probe selection, as exposed on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Kind {
    #[value(name = "HTTP")]
    Http,
    #[value(name = "CONNECT")]
    Connect,
    #[value(name = "BANNER_GRAB")]
    BannerGrab,
}

impl Kind {
    /// Constructs a fresh probe for one connection to `remote`.
    pub fn probe(&self, remote: SocketAddrV4) -> Box<dyn Probe> {
        match self {
            Kind::Http => Box::new(HttpProbe::new(*remote.ip())),
            Kind::Connect => Box::new(ConnectProbe::new()),
            Kind::BannerGrab => Box::new(BannerProbe::new()),
        }
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

// One bounded read. Shared receive rule of the banner and http probes: a zero
// read is an orderly peer close, overflowing MAX_BUF_SIZE truncates the
// conversation; both are terminal.
fn recv_bounded(socket: &Socket, inbuf: &mut Vec<u8>) -> io::Result<Step> {
    let mut buf = [0; READ_SIZE];

    let n = match socket.recv(&mut buf) {
        Ok(n) => n,
        Err(ref e) if is_transient(e) => return Ok(Step::Continue(None)),
        Err(e) => return Err(e),
    };

    if n == 0 {
        return Ok(Step::Done);
    }

    let take = cmp::min(n, MAX_BUF_SIZE - inbuf.len());
    inbuf.extend_from_slice(&buf[..take]);

    if take < n || inbuf.len() == MAX_BUF_SIZE {
        return Ok(Step::Done);
    }

    Ok(Step::Continue(None))
}

/// Success on the completed TCP handshake alone.
pub struct ConnectProbe {
    connected: bool,
}

impl ConnectProbe {
    pub fn new() -> ConnectProbe {
        ConnectProbe { connected: false }
    }
}

impl Default for ConnectProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl Probe for ConnectProbe {
    fn initialise(&mut self) -> Interest {
        Interest::Writable
    }

    fn on_event(&mut self, socket: &Socket, readiness: Ready) -> io::Result<Step> {
        assert!(!self.connected, "connect probe driven past completion");

        if readiness.writable {
            // Writable alone does not prove the handshake succeeded; a failed
            // connect parks its error on the socket.
            if let Some(err) = socket.take_error()? {
                return Err(err);
            }

            self.connected = true;
            return Ok(Step::Done);
        }

        Ok(Step::Continue(None))
    }

    fn on_timeout(&mut self) -> bool {
        self.connected
    }

    fn response(&self) -> Option<Response<'_>> {
        self.connected.then_some(Response::Connected)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum BannerState {
    AwaitConnect,
    Receive,
}

/// Collects whatever the peer volunteers after the handshake.
pub struct BannerProbe {
    state: BannerState,
    inbuf: Vec<u8>,
}

impl BannerProbe {
    pub fn new() -> BannerProbe {
        BannerProbe {
            state: BannerState::AwaitConnect,
            inbuf: Vec::new(),
        }
    }
}

impl Default for BannerProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl Probe for BannerProbe {
    fn initialise(&mut self) -> Interest {
        Interest::Writable
    }

    fn on_event(&mut self, socket: &Socket, readiness: Ready) -> io::Result<Step> {
        match self.state {
            BannerState::AwaitConnect => {
                if readiness.writable {
                    self.state = BannerState::Receive;
                    return Ok(Step::Continue(Some(Interest::Readable)));
                }

                Ok(Step::Continue(None))
            }
            BannerState::Receive => {
                if readiness.readable {
                    return recv_bounded(socket, &mut self.inbuf);
                }

                Ok(Step::Continue(None))
            }
        }
    }

    fn on_timeout(&mut self) -> bool {
        self.response().is_some()
    }

    fn response(&self) -> Option<Response<'_>> {
        match self.state {
            BannerState::Receive if !self.inbuf.is_empty() => {
                Some(Response::Payload(&self.inbuf))
            }
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum HttpState {
    Send,
    Receive,
}

/// Sends a fixed request and collects the reply.
pub struct HttpProbe {
    state: HttpState,
    outbuf: Vec<u8>,
    outoff: usize,
    inbuf: Vec<u8>,
}

impl HttpProbe {
    pub fn new(ip: Ipv4Addr) -> HttpProbe {
        let request = format!("GET / HTTP/1.1\r\nHost: {}\r\nConnection: Close\r\n\r\n", ip);

        HttpProbe {
            state: HttpState::Send,
            outbuf: request.into_bytes(),
            outoff: 0,
            inbuf: Vec::new(),
        }
    }
}

impl Probe for HttpProbe {
    fn initialise(&mut self) -> Interest {
        Interest::Writable
    }

    fn on_event(&mut self, socket: &Socket, readiness: Ready) -> io::Result<Step> {
        match self.state {
            HttpState::Send => {
                if readiness.writable {
                    // Partial writes advance the offset and resume on the
                    // next writable event.
                    let sent = match socket.send(&self.outbuf[self.outoff..]) {
                        Ok(sent) => sent,
                        Err(ref e) if is_transient(e) => return Ok(Step::Continue(None)),
                        Err(e) => return Err(e),
                    };

                    self.outoff += sent;
                    if self.outoff == self.outbuf.len() {
                        self.state = HttpState::Receive;
                        return Ok(Step::Continue(Some(Interest::Readable)));
                    }
                }

                Ok(Step::Continue(None))
            }
            HttpState::Receive => {
                if readiness.readable {
                    return recv_bounded(socket, &mut self.inbuf);
                }

                Ok(Step::Continue(None))
            }
        }
    }

    fn on_timeout(&mut self) -> bool {
        self.response().is_some()
    }

    fn response(&self) -> Option<Response<'_>> {
        match self.state {
            HttpState::Receive if !self.inbuf.is_empty() => Some(Response::Payload(&self.inbuf)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writable() -> Ready {
        Ready {
            writable: true,
            ..Ready::default()
        }
    }

    fn readable() -> Ready {
        Ready {
            readable: true,
            ..Ready::default()
        }
    }

    fn drive(probe: &mut dyn Probe, socket: &Socket, readiness: Ready) -> Step {
        probe.on_event(socket, readiness).unwrap()
    }

    #[test]
    fn connect_succeeds_on_first_writable() {
        let (a, _b) = Socket::pair().unwrap();
        let mut probe = ConnectProbe::new();

        assert_eq!(probe.initialise(), Interest::Writable);
        assert_eq!(drive(&mut probe, &a, writable()), Step::Done);
        assert_eq!(probe.response(), Some(Response::Connected));
        assert!(probe.on_timeout());
    }

    #[test]
    fn connect_ignores_unrelated_readiness() {
        let (a, _b) = Socket::pair().unwrap();
        let mut probe = ConnectProbe::new();
        probe.initialise();

        assert_eq!(drive(&mut probe, &a, readable()), Step::Continue(None));
        assert_eq!(probe.response(), None);
        assert!(!probe.on_timeout());
    }

    #[test]
    fn banner_collects_bytes_until_peer_close() {
        let (a, b) = Socket::pair().unwrap();
        let mut probe = BannerProbe::new();
        probe.initialise();

        assert_eq!(
            drive(&mut probe, &a, writable()),
            Step::Continue(Some(Interest::Readable))
        );

        b.send(b"hello").unwrap();
        assert_eq!(drive(&mut probe, &a, readable()), Step::Continue(None));
        drop(b);
        assert_eq!(drive(&mut probe, &a, readable()), Step::Done);

        assert_eq!(probe.response(), Some(Response::Payload(b"hello")));
        assert!(probe.on_timeout());
    }

    #[test]
    fn banner_without_bytes_has_no_response() {
        let (a, b) = Socket::pair().unwrap();
        let mut probe = BannerProbe::new();
        probe.initialise();

        drive(&mut probe, &a, writable());
        drop(b);
        assert_eq!(drive(&mut probe, &a, readable()), Step::Done);

        assert_eq!(probe.response(), None);
        assert!(!probe.on_timeout());
    }

    #[test]
    fn banner_truncates_at_buffer_cap() {
        let (a, b) = Socket::pair().unwrap();
        let mut probe = BannerProbe::new();
        probe.initialise();
        drive(&mut probe, &a, writable());

        let blob = vec![0x41u8; MAX_BUF_SIZE + 512];
        let mut off = 0;
        while off < blob.len() {
            off += b.send(&blob[off..]).unwrap();
        }

        loop {
            match drive(&mut probe, &a, readable()) {
                Step::Continue(_) => continue,
                Step::Done => break,
            }
        }

        match probe.response() {
            Some(Response::Payload(payload)) => assert_eq!(payload.len(), MAX_BUF_SIZE),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn http_sends_exact_request_then_reads() {
        let (a, b) = Socket::pair().unwrap();
        let mut probe = HttpProbe::new(Ipv4Addr::new(192, 0, 2, 7));
        probe.initialise();

        assert_eq!(
            drive(&mut probe, &a, writable()),
            Step::Continue(Some(Interest::Readable))
        );

        let mut buf = [0; 256];
        let n = b.recv(&mut buf).unwrap();
        assert_eq!(
            &buf[..n],
            b"GET / HTTP/1.1\r\nHost: 192.0.2.7\r\nConnection: Close\r\n\r\n"
        );

        b.send(b"HTTP/1.1 200 OK\r\n\r\n").unwrap();
        drop(b);

        assert_eq!(drive(&mut probe, &a, readable()), Step::Continue(None));
        assert_eq!(drive(&mut probe, &a, readable()), Step::Done);

        match probe.response() {
            Some(Response::Payload(payload)) => {
                assert!(payload.starts_with(b"HTTP/1.1 200 OK"))
            }
            other => panic!("unexpected response: {:?}", other),
        }
        assert!(probe.on_timeout());
    }

    #[test]
    fn http_silent_timeout_is_not_a_success() {
        let (a, _b) = Socket::pair().unwrap();
        let mut probe = HttpProbe::new(Ipv4Addr::new(192, 0, 2, 7));
        probe.initialise();
        drive(&mut probe, &a, writable());

        assert_eq!(probe.response(), None);
        assert!(!probe.on_timeout());
    }
}
