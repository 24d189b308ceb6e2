//! Minimal blocking Server List Ping client.
//!
//! Implements the modern Minecraft Java Edition status exchange: handshake,
//! status request, JSON response, then a ping round-trip for latency. Used by
//! the `trawler-status` companion binary; the scan engine itself never calls
//! into here.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

/// Refuse to read status payloads larger than this. Status JSON with a
/// favicon stays well under it.
const MAX_STATUS_LEN: usize = 1 << 21;

const STATUS_PACKET: i32 = 0x00;
const PING_PACKET: i32 = 0x01;

/// What a server reports about itself.
#[derive(Debug, Clone)]
pub struct Status {
    /// The "message of the day" text.
    pub description: String,
    /// Players currently online.
    pub players: u64,
    /// Measured ping round-trip.
    pub ping: Duration,
}

/// Queries the status of the server at `host:port`.
///
/// `host` may be a name or an address literal; the first resolved address is
/// used. `timeout` bounds the connect and every read and write individually.
pub fn query(host: &str, port: u16, timeout: Duration) -> io::Result<Status> {
    let addr = resolve(host, port)?;

    let mut stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    send_handshake(&mut stream, host, port)?;
    send_packet(&mut stream, STATUS_PACKET, &[])?;

    let raw = read_packet(&mut stream, STATUS_PACKET)?;
    let (description, players) = parse_status(&raw)?;

    let ping = measure_ping(&mut stream)?;

    Ok(Status {
        description,
        players,
        ping,
    })
}

fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host did not resolve"))
}

fn send_handshake(stream: &mut TcpStream, host: &str, port: u16) -> io::Result<()> {
    let mut body = Vec::with_capacity(host.len() + 16);

    // Protocol version -1 marks a plain status query.
    write_varint(&mut body, -1);
    write_varint(&mut body, host.len() as i32);
    body.extend_from_slice(host.as_bytes());
    body.extend_from_slice(&port.to_be_bytes());
    write_varint(&mut body, 1);

    send_packet(stream, 0x00, &body)
}

fn measure_ping(stream: &mut TcpStream) -> io::Result<Duration> {
    let token: i64 = 0x7472_6177;
    let started = Instant::now();

    send_packet(stream, PING_PACKET, &token.to_be_bytes())?;
    let pong = read_packet(stream, PING_PACKET)?;

    let payload: [u8; 8] = pong
        .as_slice()
        .try_into()
        .map_err(|_| invalid("pong payload mismatch"))?;
    if i64::from_be_bytes(payload) != token {
        return Err(invalid("pong payload mismatch"));
    }

    Ok(started.elapsed())
}

fn parse_status(raw: &[u8]) -> io::Result<(String, u64)> {
    let mut cursor = raw;

    let len = read_varint(&mut cursor)? as usize;
    if len > cursor.len() {
        return Err(invalid("status string overruns packet"));
    }

    let value: serde_json::Value = serde_json::from_slice(&cursor[..len])
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let description = match value.get("description") {
        Some(serde_json::Value::String(text)) => text.clone(),
        Some(chat @ serde_json::Value::Object(fields)) => match fields.get("text") {
            Some(serde_json::Value::String(text)) => text.clone(),
            _ => chat.to_string(),
        },
        Some(other) => other.to_string(),
        None => String::new(),
    };

    let players = value
        .get("players")
        .and_then(|p| p.get("online"))
        .and_then(|n| n.as_u64())
        .unwrap_or(0);

    Ok((description, players))
}

fn send_packet(stream: &mut TcpStream, id: i32, body: &[u8]) -> io::Result<()> {
    let mut payload = Vec::with_capacity(body.len() + 5);
    write_varint(&mut payload, id);
    payload.extend_from_slice(body);

    let mut frame = Vec::with_capacity(payload.len() + 5);
    write_varint(&mut frame, payload.len() as i32);
    frame.extend_from_slice(&payload);

    stream.write_all(&frame)
}

/// Reads one framed packet and checks its id, returning the body.
fn read_packet(stream: &mut TcpStream, want_id: i32) -> io::Result<Vec<u8>> {
    let len = read_varint_from(stream)? as usize;
    if len == 0 || len > MAX_STATUS_LEN {
        return Err(invalid("unreasonable packet length"));
    }

    let mut payload = vec![0; len];
    stream.read_exact(&mut payload)?;

    let mut cursor = payload.as_slice();
    let id = read_varint(&mut cursor)?;
    if id != want_id {
        return Err(invalid("unexpected packet id"));
    }

    Ok(cursor.to_vec())
}

fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut rest = value as u32;

    loop {
        let byte = (rest & 0x7f) as u8;
        rest >>= 7;

        if rest == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn read_varint(cursor: &mut &[u8]) -> io::Result<i32> {
    let mut value: u32 = 0;

    for shift in 0..5 {
        let Some((&byte, rest)) = cursor.split_first() else {
            return Err(invalid("truncated varint"));
        };
        *cursor = rest;

        value |= ((byte & 0x7f) as u32) << (7 * shift);
        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }

    Err(invalid("varint too long"))
}

fn read_varint_from(stream: &mut TcpStream) -> io::Result<i32> {
    let mut value: u32 = 0;

    for shift in 0..5 {
        let mut byte = [0];
        stream.read_exact(&mut byte)?;

        value |= ((byte[0] & 0x7f) as u32) << (7 * shift);
        if byte[0] & 0x80 == 0 {
            return Ok(value as i32);
        }
    }

    Err(invalid("varint too long"))
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: i32) -> i32 {
        let mut buf = Vec::new();
        write_varint(&mut buf, value);
        read_varint(&mut buf.as_slice()).unwrap()
    }

    #[test]
    fn varint_roundtrips() {
        for value in [0, 1, 127, 128, 255, 300, 25565, i32::MAX, -1, i32::MIN] {
            assert_eq!(roundtrip(value), value);
        }
    }

    #[test]
    fn varint_minus_one_is_five_bytes() {
        let mut buf = Vec::new();
        write_varint(&mut buf, -1);
        assert_eq!(buf, [0xff, 0xff, 0xff, 0xff, 0x0f]);
    }

    #[test]
    fn truncated_varint_is_rejected() {
        let err = read_varint(&mut [0x80u8].as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn status_json_fields_are_extracted() {
        let json = br#"{"description":{"text":"A server"},"players":{"online":7,"max":20}}"#;
        let mut raw = Vec::new();
        write_varint(&mut raw, json.len() as i32);
        raw.extend_from_slice(json);

        let (description, players) = parse_status(&raw).unwrap();
        assert_eq!(description, "A server");
        assert_eq!(players, 7);
    }

    #[test]
    fn plain_string_description() {
        let json = br#"{"description":"hi","players":{"online":0}}"#;
        let mut raw = Vec::new();
        write_varint(&mut raw, json.len() as i32);
        raw.extend_from_slice(json);

        let (description, players) = parse_status(&raw).unwrap();
        assert_eq!(description, "hi");
        assert_eq!(players, 0);
    }
}
