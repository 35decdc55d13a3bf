use std::fmt;
use std::io;
use std::net;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub type NetResult<T> = Result<T, Error>;

// Poisoning is not an error condition here: a panicking handler has already
// been reported through the reactor, the protected state stays usable.
#[inline]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[inline]
pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[inline]
pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Why a connection went away. Disconnect-class conditions are surfaced to
/// the disconnected handler, never to the error handler.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Reason {
    /// The peer closed the connection (EOF on read).
    Closed,
    Aborted,
    Refused,
    Reset,
    /// The operation was cancelled locally (disconnect or reactor stop).
    Cancelled,
}

#[derive(Debug, Eq, PartialEq)]
pub enum Error {
    /// The operation cannot make progress yet. Not a failure.
    Wait,
    /// Disconnect-class condition.
    Disconnected(Reason),
    /// Any other socket or system error.
    Io(io::ErrorKind),
    /// Malformed input on a wire protocol.
    Protocol(&'static str),
    AddrParse,
}

impl From<io::Error> for Error {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Error::Wait,
            io::ErrorKind::ConnectionAborted => Error::Disconnected(Reason::Aborted),
            io::ErrorKind::ConnectionRefused => Error::Disconnected(Reason::Refused),
            io::ErrorKind::ConnectionReset => Error::Disconnected(Reason::Reset),
            io::ErrorKind::BrokenPipe => Error::Disconnected(Reason::Reset),
            io::ErrorKind::UnexpectedEof => Error::Disconnected(Reason::Closed),
            kind => Error::Io(kind),
        }
    }
}

impl From<net::AddrParseError> for Error {
    #[inline]
    fn from(_: net::AddrParseError) -> Self {
        Error::AddrParse
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Wait => write!(f, "operation would block"),
            Error::Disconnected(reason) => write!(f, "disconnected: {:?}", reason),
            Error::Io(kind) => write!(f, "io error: {:?}", kind),
            Error::Protocol(message) => write!(f, "protocol error: {}", message),
            Error::AddrParse => write!(f, "malformed address"),
        }
    }
}

pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for NetResult<T> {
    fn has_failed(&self) -> bool {
        match self {
            Ok(_) => false,
            Err(Error::Wait) => false,
            _ => true,
        }
    }
}
