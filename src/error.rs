//! Error kinds, following spec §7.
use scroll;
use std::error;
use std::fmt::{self, Display};
use std::io;

/// The five error kinds from spec §7, plus the parser's own wrapped
/// errors. `NotFound` and `AnalysisPrecondition` are non-fatal: callers
/// are expected to match on them and continue (the virtual machine
/// tries the next loader on `NotFound`; an analysis pass skips the
/// offending instruction on `AnalysisPrecondition`).
#[derive(Debug)]
pub enum Error {
    /// Lookup by handle or by (loader, descriptor) failed and
    /// `try_load` was false, or loading also failed.
    NotFound(String),
    /// Magic mismatch, out-of-range index, invalid try-catch block,
    /// inconsistent code-item size. Fatal for the parsing call.
    MalformedDex(String),
    /// An inherited vtable entry refers to a method vertex that cannot
    /// be found. Fatal for class loading.
    InconsistentVtable(String),
    /// Handle points to a nonexistent loader/file/class/method/field.
    /// Fatal for the call.
    InvalidHandle(String),
    /// Data-flow, call-graph, or points-to invoked on a method whose
    /// referenced classes/fields cannot be resolved. The offending
    /// instruction is skipped; the analysis continues.
    AnalysisPrecondition(String),
    /// Index out of the bounds of an ID table, or a byte offset outside
    /// the file.
    InvalidId(String),
    Io(io::Error),
    Scroll(scroll::Error),
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Scroll(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<scroll::Error> for Error {
    fn from(err: scroll::Error) -> Error {
        Error::Scroll(err)
    }
}

impl Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(fmt, "{}", err),
            Error::Scroll(err) => write!(fmt, "{}", err),
            Error::NotFound(msg) => write!(fmt, "not found: {}", msg),
            Error::MalformedDex(msg) => write!(fmt, "malformed dex: {}", msg),
            Error::InconsistentVtable(msg) => write!(fmt, "inconsistent vtable: {}", msg),
            Error::InvalidHandle(msg) => write!(fmt, "invalid handle: {}", msg),
            Error::AnalysisPrecondition(msg) => write!(fmt, "analysis precondition failed: {}", msg),
            Error::InvalidId(msg) => write!(fmt, "invalid id: {}", msg),
        }
    }
}

impl Error {
    /// True for the two kinds spec §7 says are non-fatal to the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::AnalysisPrecondition(_))
    }
}
