use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{align, Error};

/// Nothing, ignored by the receiver.
pub const NLMSG_NOOP: u16 = 0x1;
/// Error or acknowledgement record, see [`ErrorMessage`](crate::ErrorMessage).
pub const NLMSG_ERROR: u16 = 0x2;
/// End of a multipart message.
pub const NLMSG_DONE: u16 = 0x3;
/// Data lost.
pub const NLMSG_OVERRUN: u16 = 0x4;
/// Joins the multicast group carried in the payload.
pub const NLMSG_JOIN_GROUP: u16 = 0x8;
/// Leaves the multicast group carried in the payload.
pub const NLMSG_LEAVE_GROUP: u16 = 0x9;
/// Types below this value are reserved for control messages.
pub const NLMSG_MIN_TYPE: u16 = 0x10;

/// It is a request message.
pub const NLM_F_REQUEST: u16 = 0x1;
/// Reply with an acknowledgement, on success or error.
pub const NLM_F_ACK: u16 = 0x4;
/// The error record does not echo the request payload.
pub const NLM_F_CAPPED: u16 = 0x100;

/// Netlink message header.
///
/// ```text
/// ┌──────────────────────────────────────────┐
/// │  Length (4 bytes, header included)       │
/// ├─────────────────────┬────────────────────┤
/// │  Type (2 bytes)     │  Flags (2 bytes)   │
/// ├─────────────────────┴────────────────────┤
/// │  Sequence number (4 bytes)               │
/// ├──────────────────────────────────────────┤
/// │  Port ID (4 bytes)                       │
/// └──────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header {
    /// Length of the message including this header, excluding trailing padding.
    pub len: u32,
    /// Message type.
    pub msg_type: u16,
    /// Message flags.
    pub flags: u16,
    /// Sequence number, echoed in replies.
    pub seq: u32,
    /// Port ID of the sender, or of the requester in replies.
    pub pid: u32,
}

impl Header {
    /// Length of the header in bytes.
    pub const LEN: usize = 16;

    /// Creates a header for a message with `payload_len` bytes of payload.
    pub fn new(msg_type: u16, flags: u16, payload_len: u32) -> Self {
        Self { len: Self::LEN as u32 + payload_len, msg_type, flags, seq: 0, pid: 0 }
    }

    /// Reads a header from the start of `src`, without consuming it.
    pub fn peek(src: &[u8]) -> Result<Self, Error> {
        if src.len() < Self::LEN {
            return Err(Error::TooShort { len: src.len(), min: Self::LEN });
        }

        let mut buf = &src[..Self::LEN];
        Ok(Self {
            len: buf.get_u32_ne(),
            msg_type: buf.get_u16_ne(),
            flags: buf.get_u16_ne(),
            seq: buf.get_u32_ne(),
            pid: buf.get_u32_ne(),
        })
    }

    /// Writes the header to `dst`.
    pub fn put(&self, dst: &mut impl BufMut) {
        dst.put_u32_ne(self.len);
        dst.put_u16_ne(self.msg_type);
        dst.put_u16_ne(self.flags);
        dst.put_u32_ne(self.seq);
        dst.put_u32_ne(self.pid);
    }

    /// Returns the payload capacity declared by this header.
    #[inline]
    pub const fn payload_len(&self) -> u32 {
        self.len.saturating_sub(Self::LEN as u32)
    }

    /// Returns true if all of the given flag bits are set.
    #[inline]
    pub const fn has_flags(&self, flags: u16) -> bool {
        self.flags & flags == flags
    }
}

/// A complete netlink message: header and payload.
///
/// Cloning is cheap, the payload is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    header: Header,
    /// The message payload, without padding.
    payload: Bytes,
}

impl Message {
    /// Creates a message of the given type. The header length is derived from the payload.
    pub fn new(msg_type: u16, flags: u16, payload: Bytes) -> Self {
        Self { header: Header::new(msg_type, flags, payload.len() as u32), payload }
    }

    /// Creates a message from its parts. The caller is responsible for `header.len`.
    pub const fn from_parts(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Sets the sequence number.
    pub fn with_seq(mut self, seq: u32) -> Self {
        self.header.seq = seq;
        self
    }

    /// Sets the port ID.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.header.pid = pid;
        self
    }

    #[inline]
    pub const fn header(&self) -> &Header {
        &self.header
    }

    #[inline]
    pub const fn msg_type(&self) -> u16 {
        self.header.msg_type
    }

    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[inline]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Returns the size of the message on the wire, padding included.
    #[inline]
    pub fn size(&self) -> usize {
        align(Header::LEN + self.payload.len())
    }

    /// Appends the message, padded to alignment, to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        let size = self.size();
        dst.reserve(size);
        self.header.put(dst);
        dst.put_slice(&self.payload);
        dst.put_bytes(0, size - Header::LEN - self.payload.len());
    }

    /// Returns the encoded message as a contiguous buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size());
        self.encode(&mut buf);
        buf.freeze()
    }
}
