//! Client side JPIP cache: databins filled out of order from a JPP-stream, and trackers that
//! report how many quality layers of a region can be decoded from what arrived so far.

use std::error;
use std::fmt;
use std::io;

use jpc::{CodestreamError, PacketError};

mod cache;
mod databin;
mod message;
mod precincts;
mod session;
mod tracker;

pub use cache::{ArrivalOutcome, DatabinCache};
pub use databin::{
    ByteRange, CopyRange, Databin, DatabinClass, DatabinExtensions, DatabinId, ExtensionKind,
};
pub use message::{EndOfResponseReason, Message, MessageDecoder};
pub use precincts::{precinct_in_class_id, PrecinctIterator, PrecinctPosition, Region};
pub use session::{
    Arrival, DatabinStatus, DispatchReport, Session, SessionConfig, TrackerFailure,
};
pub use tracker::{ProgressCallback, QualityLayers, Tracker, TrackerId};

/// An arrival that does not fit what the databin already holds. The databin is left untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabinError {
    LengthRedeclared {
        id: DatabinId,
        declared: u64,
        redeclared: u64,
    },
    BeyondDeclaredLength {
        id: DatabinId,
        declared: u64,
        end: u64,
    },
    IdentityMismatch {
        expected: DatabinId,
        actual: DatabinId,
    },
}

impl error::Error for DatabinError {}
impl fmt::Display for DatabinError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DatabinError::LengthRedeclared {
                id,
                declared,
                redeclared,
            } => {
                write!(
                    f,
                    "databin {} declared {} bytes long, then {}",
                    id, declared, redeclared
                )
            }
            DatabinError::BeyondDeclaredLength { id, declared, end } => {
                write!(
                    f,
                    "databin {} is {} bytes long, got bytes up to {}",
                    id, declared, end
                )
            }
            DatabinError::IdentityMismatch { expected, actual } => {
                write!(f, "expected databin {}, got {}", expected, actual)
            }
        }
    }
}

#[derive(Debug)]
pub enum SessionError {
    Databin(DatabinError),
    Packet(PacketError),
    Codestream(CodestreamError),
    /// A main or tile header databin could not be decoded.
    InvalidHeader {
        id: DatabinId,
        reason: String,
    },
    UnsupportedCodestream {
        index: u64,
    },
    UnknownClass {
        class_id: u64,
    },
    MalformedMessage {
        offset: u64,
        reason: &'static str,
    },
    MissingMainHeader,
    UnknownTracker {
        tracker: TrackerId,
    },
    Io(io::Error),
}

impl SessionError {
    /// Whether the error only concerns malformed or unsupported data, as opposed to misuse.
    pub fn is_malformed_data(&self) -> bool {
        match self {
            SessionError::Databin(DatabinError::IdentityMismatch { .. }) => false,
            SessionError::Packet(e) => !matches!(e, PacketError::Usage { .. }),
            SessionError::MissingMainHeader
            | SessionError::UnknownTracker { .. }
            | SessionError::Io(_) => false,
            _ => true,
        }
    }
}

impl error::Error for SessionError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            SessionError::Databin(e) => Some(e),
            SessionError::Packet(e) => Some(e),
            SessionError::Codestream(e) => Some(e),
            SessionError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SessionError::Databin(e) => write!(f, "{}", e),
            SessionError::Packet(e) => write!(f, "{}", e),
            SessionError::Codestream(e) => write!(f, "{}", e),
            SessionError::InvalidHeader { id, reason } => {
                write!(f, "invalid header in databin {}: {}", id, reason)
            }
            SessionError::UnsupportedCodestream { index } => {
                write!(f, "codestream {} requested, only codestream 0 is supported", index)
            }
            SessionError::UnknownClass { class_id } => {
                write!(f, "unknown databin class {}", class_id)
            }
            SessionError::MalformedMessage { offset, reason } => {
                write!(f, "malformed message at byte offset {}: {}", offset, reason)
            }
            SessionError::MissingMainHeader => write!(f, "main header not loaded yet"),
            SessionError::UnknownTracker { tracker } => write!(f, "no tracker {}", tracker),
            SessionError::Io(e) => write!(f, "{}", e),
        }
    }
}

impl From<DatabinError> for SessionError {
    fn from(e: DatabinError) -> Self {
        SessionError::Databin(e)
    }
}

impl From<PacketError> for SessionError {
    fn from(e: PacketError) -> Self {
        SessionError::Packet(e)
    }
}

impl From<CodestreamError> for SessionError {
    fn from(e: CodestreamError) -> Self {
        SessionError::Codestream(e)
    }
}

impl From<io::Error> for SessionError {
    fn from(e: io::Error) -> Self {
        SessionError::Io(e)
    }
}
