use bytes::Bytes;
use nix::errno::Errno;
use thiserror::Error;

use crate::{Header, Message};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    #[error("Out of memory allocating a {size} byte message")]
    OutOfMemory { size: u32 },
}

impl BuildError {
    pub const fn errno(&self) -> Errno {
        match self {
            Self::OutOfMemory { .. } => Errno::ENOMEM,
        }
    }
}

/// Produces the synthetic messages sent by the generator.
///
/// The returned message must be stamped with `msg_type` and declare a payload capacity of exactly
/// `size` bytes. The payload contents are unspecified.
pub trait Builder: Send + Sync + 'static {
    fn build(&self, msg_type: u16, size: u32) -> Result<Message, BuildError>;
}

/// The default [`Builder`]: a zero-filled payload, allocated fallibly.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageBuilder;

impl Builder for MessageBuilder {
    fn build(&self, msg_type: u16, size: u32) -> Result<Message, BuildError> {
        let mut payload = Vec::new();
        payload.try_reserve_exact(size as usize).map_err(|_| BuildError::OutOfMemory { size })?;
        payload.resize(size as usize, 0);

        let header = Header::new(msg_type, 0, size);
        Ok(Message::from_parts(header, Bytes::from(payload)))
    }
}
