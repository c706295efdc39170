//! Wire formats for nlbench.
//!
//! Everything on the wire is a netlink message: a 16 byte [`Header`] followed by a payload that
//! is padded to [`ALIGNTO`] bytes. Control requests carry their parameters as TLV attributes,
//! which are decoded with [`Attributes`]. All integers are native endian.
#![doc(issue_tracker_base_url = "https://github.com/chainbound/msg-rs/issues/")]

use nix::errno::Errno;
use thiserror::Error;

mod ack;
mod attr;
mod builder;
mod codec;
mod control;
mod header;

pub use ack::*;
pub use attr::*;
pub use builder::*;
pub use codec::*;
pub use control::*;
pub use header::*;

/// The netlink unit the generator listens on.
pub const NETLINK_BENCHMARK: u32 = 25;

/// Alignment of messages and attributes.
pub const ALIGNTO: usize = 4;

/// Largest payload the generator builds by default: a page-sized buffer minus allocator overhead.
pub const NLMSG_GOODSIZE: u32 = 3776;

/// No group.
pub const GRP_NONE: u32 = 0;
/// The benchmark multicast group.
pub const GRP: u32 = 1;
/// Highest group number a port can join.
pub const GRP_MAX: u32 = 32;

/// Rounds `len` up to the next multiple of [`ALIGNTO`].
#[inline]
pub const fn align(len: usize) -> usize {
    (len + ALIGNTO - 1) & !(ALIGNTO - 1)
}

/// Errors produced while decoding or validating wire data.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("Frame too short: {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },
    #[error("Malformed attribute at offset {offset}")]
    Malformed { offset: usize },
    #[error("Frame of {len} bytes exceeds maximum of {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("Missing required attribute {0:?}")]
    MissingAttribute(AttrId),
    #[error("Attribute {0:?} is too short for its type")]
    ShortValue(AttrId),
    #[error("Unsupported message type {0}")]
    Unsupported(u16),
}

impl Error {
    /// Returns the errno reported to a requester for this error.
    pub const fn errno(&self) -> Errno {
        match self {
            Self::Io(_) => Errno::EIO,
            Self::TooShort { .. }
            | Self::Malformed { .. }
            | Self::MissingAttribute(_)
            | Self::ShortValue(_) => Errno::EINVAL,
            Self::FrameTooLarge { .. } => Errno::EMSGSIZE,
            Self::Unsupported(_) => Errno::EOPNOTSUPP,
        }
    }
}
