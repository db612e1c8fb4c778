//! Crate-wide error type.

use core::fmt;

/// Failure kinds produced by any operation in the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InetError {
    /// Malformed input: short PDU, wrong version, bad flags.
    Invalid,
    /// Payload exceeds a field's representable range.
    Overflow,
    /// No address object or static route matches the destination.
    NoRoute,
    /// Neighbour translation timed out, or an id/name lookup missed.
    NotFound,
    /// Name collides within the same scope.
    Duplicate,
    /// Operation intentionally not implemented.
    NotSupported,
    /// Allocation failure.
    NoMemory,
    /// The IPLink returned an error.
    LinkFailure,
    /// Ingress packet's destination is not locally owned.
    NotForUs,
    /// Discovery saw a link service ID that is already open.
    AddressTaken,
}

impl fmt::Display for InetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InetError::Invalid => "invalid input",
            InetError::Overflow => "value out of representable range",
            InetError::NoRoute => "no route to destination",
            InetError::NotFound => "not found",
            InetError::Duplicate => "duplicate name",
            InetError::NotSupported => "operation not supported",
            InetError::NoMemory => "out of memory",
            InetError::LinkFailure => "link failure",
            InetError::NotForUs => "packet not addressed to a local address",
            InetError::AddressTaken => "link already open",
        };
        f.write_str(s)
    }
}

pub type Result<T> = core::result::Result<T, InetError>;
