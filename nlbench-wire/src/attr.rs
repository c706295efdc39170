//! TLV attributes.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Length (2 bytes) │  Type (2 bytes)     │  <- attribute header (4 bytes)
//! ├─────────────────────────────────────────┤
//! │  Value (variable length, padded to 4)   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Attribute lengths come from the other side of a trust boundary. [`Attributes::parse`] checks
//! each one against the bytes actually left in the buffer before using it.

use bytes::BufMut;

use crate::{align, Error, Header};

/// Length of the attribute header.
pub const NLA_HDRLEN: usize = 4;
/// Nested attribute flag, masked off the type.
pub const NLA_F_NESTED: u16 = 1 << 15;
/// Network byte order flag, masked off the type.
pub const NLA_F_NET_BYTEORDER: u16 = 1 << 14;
/// Mask selecting the attribute type.
pub const NLA_TYPE_MASK: u16 = !(NLA_F_NESTED | NLA_F_NET_BYTEORDER);

/// Highest attribute ID understood by the generator.
pub const ATTR_MAX: usize = 4;

/// Attributes of a control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum AttrId {
    /// Size of each generated message.
    Size = 1,
    /// Number of messages.
    Num = 2,
    /// Size of the random distribution of deferred sends, in seconds.
    Random = 3,
    /// Destination port ID for unicast.
    Pid = 4,
}

impl TryFrom<u16> for AttrId {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Size),
            2 => Ok(Self::Num),
            3 => Ok(Self::Random),
            4 => Ok(Self::Pid),
            _ => Err(value),
        }
    }
}

/// A bounded lookup from attribute ID to attribute value, borrowed from the request buffer.
#[derive(Debug, Default, Clone, Copy)]
pub struct Attributes<'a> {
    slots: [Option<&'a [u8]>; ATTR_MAX + 1],
}

impl<'a> Attributes<'a> {
    /// Decodes the attributes of a whole netlink message (header included).
    ///
    /// The declared header length must cover at least the header and must not exceed `frame`.
    pub fn parse(frame: &'a [u8]) -> Result<Self, Error> {
        let header = Header::peek(frame)?;
        let len = header.len as usize;
        if len < Header::LEN {
            return Err(Error::TooShort { len, min: Header::LEN });
        }
        if len > frame.len() {
            return Err(Error::TooShort { len: frame.len(), min: len });
        }

        Self::parse_payload(&frame[align(Header::LEN)..len], align(Header::LEN))
    }

    /// Decodes a bare attribute stream. `base` is only used to report error offsets.
    pub fn parse_payload(mut buf: &'a [u8], base: usize) -> Result<Self, Error> {
        let mut attrs = Self::default();
        let mut offset = base;

        while !buf.is_empty() {
            // Leftover bytes too short for an attribute header are not an error.
            if buf.len() < NLA_HDRLEN {
                tracing::debug!(offset, remaining = buf.len(), "ignoring trailing bytes");
                break;
            }

            let nla_len = u16::from_ne_bytes([buf[0], buf[1]]) as usize;
            let nla_type = u16::from_ne_bytes([buf[2], buf[3]]) & NLA_TYPE_MASK;

            if nla_len < NLA_HDRLEN || nla_len > buf.len() {
                tracing::trace!(offset, nla_len, remaining = buf.len(), "malformed attribute");
                return Err(Error::Malformed { offset });
            }

            // Unknown IDs are skipped, the last occurrence of a known ID wins.
            if nla_type > 0 && (nla_type as usize) <= ATTR_MAX {
                attrs.slots[nla_type as usize] = Some(&buf[NLA_HDRLEN..nla_len]);
            }

            let step = align(nla_len).min(buf.len());
            buf = &buf[step..];
            offset += step;
        }

        Ok(attrs)
    }

    /// Returns the raw value of an attribute.
    #[inline]
    pub fn get(&self, id: AttrId) -> Option<&'a [u8]> {
        self.slots[id as usize]
    }

    /// Returns true if the attribute is present.
    #[inline]
    pub fn contains(&self, id: AttrId) -> bool {
        self.slots[id as usize].is_some()
    }

    /// Reads an attribute as a native-endian `u32`.
    pub fn get_u32(&self, id: AttrId) -> Result<Option<u32>, Error> {
        match self.get(id) {
            None => Ok(None),
            Some(value) if value.len() < 4 => Err(Error::ShortValue(id)),
            Some(value) => Ok(Some(u32::from_ne_bytes([value[0], value[1], value[2], value[3]]))),
        }
    }

    /// Reads a required `u32` attribute.
    pub fn require_u32(&self, id: AttrId) -> Result<u32, Error> {
        self.get_u32(id)?.ok_or(Error::MissingAttribute(id))
    }
}

/// Appends a `u32` attribute to `dst`, padded to alignment.
pub fn put_attr_u32(dst: &mut impl BufMut, id: AttrId, value: u32) {
    put_attr(dst, id as u16, &value.to_ne_bytes());
}

/// Appends a raw attribute to `dst`, padded to alignment.
///
/// # Panics
/// Panics if the value does not fit a 16 bit attribute length.
pub fn put_attr(dst: &mut impl BufMut, nla_type: u16, value: &[u8]) {
    let nla_len = NLA_HDRLEN + value.len();
    let nla_len_u16 = u16::try_from(nla_len).expect("attribute too large, max 65535 bytes");

    dst.put_u16_ne(nla_len_u16);
    dst.put_u16_ne(nla_type);
    dst.put_slice(value);
    dst.put_bytes(0, align(nla_len) - nla_len);
}
