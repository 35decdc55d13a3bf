use rand::Rng;
use std::fmt;

/// Opaque 128 bit identifier assigned to every client and session at
/// construction. Used as the registry key on the server side.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct ConnectionId {
    id: u128,
}

impl ConnectionId {
    /// Generates a fresh random identifier.
    #[inline]
    pub fn generate() -> ConnectionId {
        ConnectionId {
            id: rand::thread_rng().gen(),
        }
    }

    /// The identifier with all bits zero. Never produced by `generate`
    /// in practice, useful as a sentinel in tests.
    #[inline]
    pub fn nil() -> ConnectionId {
        ConnectionId { id: 0 }
    }
}

impl fmt::Display for ConnectionId {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:032x}", self.id)
    }
}

impl slog::Value for ConnectionId {
    fn serialize(
        &self,
        _record: &slog::Record,
        key: slog::Key,
        serializer: &mut dyn slog::Serializer,
    ) -> slog::Result {
        serializer.emit_arguments(key, &format_args!("{}", self))
    }
}
