use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::conn::Connection;
use crate::probe::Response;

/// Size of the log sink's write buffer. Large so that success records cost a
/// memcpy on the hot path; housekeeping flushes it once per second.
const LOG_BUFFER_SIZE: usize = 1024 * 1024;

/// How many payload bytes a success record renders at most.
const PAYLOAD_PREVIEW: usize = 100;

/// The scan's result sink: success records go to a buffered log file, the
/// once-per-second status line goes to stdout.
pub struct Report {
    log: BufWriter<File>,
}

impl Report {
    /// Opens (and truncates) the log file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Report> {
        let file = File::create(path)?;

        Ok(Report {
            log: BufWriter::with_capacity(LOG_BUFFER_SIZE, file),
        })
    }

    /// Appends one success record for a finished connection.
    pub fn success(&mut self, conn: &Connection) -> io::Result<()> {
        writeln!(
            self.log,
            "[+] Success {} -> {}",
            conn.remote(),
            render(conn.response())
        )
    }

    /// Emits the periodic status line.
    pub fn status(&mut self, conns: usize, submitted: u64, successes: u64, errors: u64) {
        println!(
            "[?] STATUS conns: {}, submitted: {}, successes: {}, errors: {}",
            conns, submitted, successes, errors
        );
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.log.flush()
    }
}

fn render(response: Option<Response<'_>>) -> String {
    match response {
        Some(Response::Connected) => "true".to_owned(),
        Some(Response::Payload(bytes)) => {
            let preview = &bytes[..bytes.len().min(PAYLOAD_PREVIEW)];
            preview.escape_ascii().to_string()
        }
        None => "none".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_renders_as_true() {
        assert_eq!(render(Some(Response::Connected)), "true");
    }

    #[test]
    fn missing_response_renders_as_none() {
        assert_eq!(render(None), "none");
    }

    #[test]
    fn payload_is_escaped_and_truncated() {
        assert_eq!(render(Some(Response::Payload(b"SSH-2.0\r\n"))), "SSH-2.0\\r\\n");

        let long = vec![b'x'; 300];
        assert_eq!(render(Some(Response::Payload(&long))).len(), 100);
    }
}
