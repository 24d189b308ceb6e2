use std::io;

use thiserror::Error;

/// Scan-level errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The network (or host) is unreachable from here. Raised synchronously
    /// by `connect`; discarded at admission without consuming budget.
    #[error("network unreachable")]
    Unreachable,
    /// Any other I/O failure. Fatal to the scan.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}
