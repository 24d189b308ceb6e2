use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::Path;
use std::vec;

use rand::rngs::ThreadRng;
use rand::seq::SliceRandom;
use rand::Rng;

/// Default port of file-sourced entries with no explicit port.
pub const DEFAULT_FILE_PORT: u16 = 25565;

/// Uniform random IPv4 addresses paired with a fixed port.
///
/// The whole 32-bit space is drawn from; reserved ranges are not filtered
/// out, the scan tolerates the resulting unreachable targets. Finite: emits
/// at most the configured number of addresses.
pub struct RandomV4 {
    port: u16,
    remaining: u64,
    rng: ThreadRng,
}

impl RandomV4 {
    pub fn new(port: u16, total: u64) -> RandomV4 {
        RandomV4 {
            port,
            remaining: total,
            rng: rand::thread_rng(),
        }
    }
}

impl Iterator for RandomV4 {
    type Item = SocketAddrV4;

    fn next(&mut self) -> Option<SocketAddrV4> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let ip = Ipv4Addr::from(self.rng.gen::<u32>());
        Some(SocketAddrV4::new(ip, self.port))
    }
}

/// Newline-delimited `host[:port]` entries, shuffled once into memory.
///
/// Hosts are kept as strings so that names, not only address literals, pass
/// through to the resolver of whoever consumes them. Blank lines are
/// skipped.
#[derive(Debug)]
pub struct FileList {
    entries: vec::IntoIter<(String, u16)>,
}

impl FileList {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<FileList> {
        let file = File::open(path)?;
        let mut entries = Vec::new();

        for line in BufReader::new(file).lines() {
            let line = line?;
            let entry = line.trim();
            if entry.is_empty() {
                continue;
            }

            let (host, port) = match entry.rsplit_once(':') {
                Some((host, port)) => {
                    let port = port.parse::<u16>().map_err(|_| {
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("bad port in entry: {}", entry),
                        )
                    })?;
                    (host.to_owned(), port)
                }
                None => (entry.to_owned(), DEFAULT_FILE_PORT),
            };

            entries.push((host, port));
        }

        entries.shuffle(&mut rand::thread_rng());

        Ok(FileList {
            entries: entries.into_iter(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() == 0
    }
}

impl Iterator for FileList {
    type Item = (String, u16);

    fn next(&mut self) -> Option<(String, u16)> {
        self.entries.next()
    }
}
