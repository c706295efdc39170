use bytes::BytesMut;

use crate::{put_attr_u32, AttrId, Attributes, Error, Message, GRP, NLM_F_ACK, NLM_F_REQUEST};

/// First generator message type. Never sent.
pub const NLBENCH_MSG_BASE: u16 = 16;

/// The four request subtypes understood by the generator.
///
/// The same codes stamp the generated messages, so a receiver can tell which mode produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MsgType {
    /// Unicast, generated inside the request handler.
    UnicastProcess = NLBENCH_MSG_BASE + 1,
    /// Unicast, generated from timers.
    UnicastInterrupt = NLBENCH_MSG_BASE + 2,
    /// Multicast, generated inside the request handler.
    MulticastProcess = NLBENCH_MSG_BASE + 3,
    /// Multicast, generated from timers.
    MulticastInterrupt = NLBENCH_MSG_BASE + 4,
}

impl MsgType {
    /// All subtypes in wire order.
    pub const ALL: [Self; 4] = [
        Self::UnicastProcess,
        Self::UnicastInterrupt,
        Self::MulticastProcess,
        Self::MulticastInterrupt,
    ];

    /// The attributes a request of this subtype must carry.
    pub const fn required(&self) -> &'static [AttrId] {
        match self {
            Self::UnicastInterrupt => &[AttrId::Num, AttrId::Size, AttrId::Random, AttrId::Pid],
            Self::MulticastInterrupt => &[AttrId::Num, AttrId::Size, AttrId::Random],
            Self::UnicastProcess => &[AttrId::Num, AttrId::Size, AttrId::Pid],
            Self::MulticastProcess => &[AttrId::Num, AttrId::Size],
        }
    }

    #[inline]
    pub const fn is_unicast(&self) -> bool {
        matches!(self, Self::UnicastProcess | Self::UnicastInterrupt)
    }

    #[inline]
    pub const fn is_deferred(&self) -> bool {
        matches!(self, Self::UnicastInterrupt | Self::MulticastInterrupt)
    }

    /// The name used by the command line tools, e.g. `unicast-process`.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::UnicastProcess => "unicast-process",
            Self::UnicastInterrupt => "unicast-interrupt",
            Self::MulticastProcess => "multicast-process",
            Self::MulticastInterrupt => "multicast-interrupt",
        }
    }
}

impl TryFrom<u16> for MsgType {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::ALL.into_iter().find(|t| *t as u16 == value).ok_or(Error::Unsupported(value))
    }
}

impl std::str::FromStr for MsgType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|t| t.name() == s).ok_or_else(|| format!("unknown type `{s}'"))
    }
}

/// Where generated messages go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A single port.
    Unicast { pid: u32 },
    /// Every member of a group.
    Multicast { group: u32 },
}

/// A decoded and validated control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    /// The request subtype.
    pub subtype: MsgType,
    /// Number of messages to generate.
    pub count: u32,
    /// Payload capacity of each message.
    pub size: u32,
    /// Jitter window in seconds. Present for deferred subtypes.
    pub window: Option<u32>,
    /// Destination port. Present for unicast subtypes.
    pub destination: Option<u32>,
}

impl ControlRequest {
    /// Immediate unicast of `count` messages of `size` bytes to `pid`.
    pub const fn unicast_process(count: u32, size: u32, pid: u32) -> Self {
        Self {
            subtype: MsgType::UnicastProcess,
            count,
            size,
            window: None,
            destination: Some(pid),
        }
    }

    /// Deferred unicast, spread over `window` seconds.
    pub const fn unicast_interrupt(count: u32, size: u32, window: u32, pid: u32) -> Self {
        Self {
            subtype: MsgType::UnicastInterrupt,
            count,
            size,
            window: Some(window),
            destination: Some(pid),
        }
    }

    /// Immediate multicast to the benchmark group.
    pub const fn multicast_process(count: u32, size: u32) -> Self {
        Self { subtype: MsgType::MulticastProcess, count, size, window: None, destination: None }
    }

    /// Deferred multicast to the benchmark group, spread over `window` seconds.
    pub const fn multicast_interrupt(count: u32, size: u32, window: u32) -> Self {
        Self {
            subtype: MsgType::MulticastInterrupt,
            count,
            size,
            window: Some(window),
            destination: None,
        }
    }

    /// Builds a request from decoded attributes, checking the required set for `subtype`.
    /// Attributes that the subtype does not use are ignored.
    pub fn from_attrs(subtype: MsgType, attrs: &Attributes<'_>) -> Result<Self, Error> {
        if let Some(missing) = subtype.required().iter().find(|id| !attrs.contains(**id)) {
            return Err(Error::MissingAttribute(*missing));
        }

        Ok(Self {
            subtype,
            count: attrs.require_u32(AttrId::Num)?,
            size: attrs.require_u32(AttrId::Size)?,
            window: if subtype.is_deferred() { attrs.get_u32(AttrId::Random)? } else { None },
            destination: if subtype.is_unicast() { attrs.get_u32(AttrId::Pid)? } else { None },
        })
    }

    /// Checks that the optional fields match the subtype.
    pub fn validate(&self) -> Result<(), Error> {
        if self.subtype.is_deferred() && self.window.is_none() {
            return Err(Error::MissingAttribute(AttrId::Random));
        }
        if self.subtype.is_unicast() && self.destination.is_none() {
            return Err(Error::MissingAttribute(AttrId::Pid));
        }

        Ok(())
    }

    /// Returns where the generated messages go.
    pub fn target(&self) -> Target {
        match self.destination {
            Some(pid) if self.subtype.is_unicast() => Target::Unicast { pid },
            _ => Target::Multicast { group: GRP },
        }
    }

    /// Encodes the request as a netlink message asking for an acknowledgement.
    pub fn to_message(&self, seq: u32) -> Message {
        let mut attrs = BytesMut::with_capacity(32);
        put_attr_u32(&mut attrs, AttrId::Num, self.count);
        put_attr_u32(&mut attrs, AttrId::Size, self.size);
        if let Some(window) = self.window {
            put_attr_u32(&mut attrs, AttrId::Random, window);
        }
        if let Some(pid) = self.destination {
            put_attr_u32(&mut attrs, AttrId::Pid, pid);
        }

        Message::new(self.subtype as u16, NLM_F_REQUEST | NLM_F_ACK, attrs.freeze()).with_seq(seq)
    }
}
