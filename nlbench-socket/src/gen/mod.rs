use std::{fmt, sync::Arc};

use bytes::Bytes;
use nix::errno::Errno;
use parking_lot::Mutex;
use rand::{rngs::StdRng, SeedableRng};
use thiserror::Error;
use tracing::{debug, trace, warn};

use nlbench_wire::{
    Attributes, Builder, ControlRequest, ErrorMessage, Header, Message, MessageBuilder, MsgType,
    NLMSG_GOODSIZE, NLMSG_MIN_TYPE, NLM_F_ACK, NLM_F_REQUEST,
};

use crate::Delivery;

mod deferred;
mod immediate;
mod stats;
#[cfg(test)]
pub(crate) mod testing;

pub use deferred::jitter;
use deferred::TimerBudget;
pub use immediate::BatchReport;
pub use stats::GeneratorStats;

/// Default timer resolution, in ticks per second.
pub const DEFAULT_HZ: u32 = 1000;

/// Default number of deferred sends that may be pending at once.
pub const DEFAULT_MAX_PENDING_TIMERS: usize = 65536;

/// Errors that reject a request. Each maps to the errno carried in its reply.
#[derive(Debug, Error)]
pub enum GenError {
    #[error(transparent)]
    Wire(#[from] nlbench_wire::Error),
    #[error("Message size {size} exceeds maximum of {max}")]
    TooLarge { size: u32, max: u32 },
    #[error("Out of memory after scheduling {scheduled} deferred send(s)")]
    OutOfMemory { scheduled: u32 },
    #[error("No tokio runtime to run deferred sends on")]
    NoRuntime,
}

impl GenError {
    pub const fn errno(&self) -> Errno {
        match self {
            Self::Wire(e) => e.errno(),
            Self::TooLarge { .. } => Errno::E2BIG,
            Self::OutOfMemory { .. } => Errno::ENOMEM,
            Self::NoRuntime => Errno::EAGAIN,
        }
    }
}

/// How often an immediate multicast batch notifies the group about lost messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LossNotification {
    /// Once for every message that could not be built.
    #[default]
    PerFailure,
    /// At most once per batch.
    PerBatch,
}

/// Generator options.
#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    /// Largest payload a request may ask for.
    max_message_size: u32,
    /// Timer resolution in ticks per second. Jitter is drawn in whole ticks.
    hz: u32,
    /// Maximum number of deferred sends pending at once.
    max_pending_timers: usize,
    loss_notification: LossNotification,
    /// RNG seed for the jitter. `None` seeds from entropy.
    seed: Option<u64>,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            max_message_size: NLMSG_GOODSIZE,
            hz: DEFAULT_HZ,
            max_pending_timers: DEFAULT_MAX_PENDING_TIMERS,
            loss_notification: LossNotification::default(),
            seed: None,
        }
    }
}

impl GeneratorOptions {
    /// Sets the largest payload a request may ask for.
    pub fn max_message_size(mut self, size: u32) -> Self {
        self.max_message_size = size;
        self
    }

    /// Sets the timer resolution in ticks per second. Must be at least 1.
    pub fn hz(mut self, hz: u32) -> Self {
        self.hz = hz.max(1);
        self
    }

    /// Sets the maximum number of pending deferred sends. Scheduling beyond it fails with
    /// `ENOMEM`.
    pub fn max_pending_timers(mut self, max: usize) -> Self {
        self.max_pending_timers = max;
        self
    }

    pub fn loss_notification(mut self, mode: LossNotification) -> Self {
        self.loss_notification = mode;
        self
    }

    /// Seeds the jitter RNG, making delays reproducible.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// The result of an accepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// An immediate batch ran to completion.
    Sent(BatchReport),
    /// This many deferred sends were registered.
    Scheduled(u32),
}

/// State shared between the generator and its timer tasks.
pub(crate) struct Shared {
    pub(crate) delivery: Box<dyn Delivery>,
    pub(crate) builder: Box<dyn Builder>,
    pub(crate) stats: GeneratorStats,
}

/// The traffic generator.
///
/// Requests come in through [`Generator::receive`] (raw datagrams) or
/// [`Generator::handle_message`] (framed messages), are parsed and routed to one of four
/// handlers, and produce messages through a [`Builder`] and a [`Delivery`].
///
/// Deferred handlers spawn tokio tasks on the current runtime. Off a runtime they are rejected
/// with `EAGAIN`, immediate handlers still work.
pub struct Generator {
    shared: Arc<Shared>,
    options: GeneratorOptions,
    rng: Mutex<StdRng>,
    timers: Arc<TimerBudget>,
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator")
            .field("options", &self.options)
            .field("stats", &self.shared.stats)
            .field("pending_timers", &self.timers.pending())
            .finish_non_exhaustive()
    }
}

impl Generator {
    /// Creates a generator with the default [`MessageBuilder`] and options.
    pub fn new(delivery: impl Delivery) -> Self {
        Self::with_options(delivery, GeneratorOptions::default())
    }

    pub fn with_options(delivery: impl Delivery, options: GeneratorOptions) -> Self {
        Self::with_builder(delivery, MessageBuilder, options)
    }

    /// Creates a generator that builds its messages with `builder`.
    pub fn with_builder(
        delivery: impl Delivery,
        builder: impl Builder,
        options: GeneratorOptions,
    ) -> Self {
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            shared: Arc::new(Shared {
                delivery: Box::new(delivery),
                builder: Box::new(builder),
                stats: GeneratorStats::default(),
            }),
            timers: TimerBudget::new(options.max_pending_timers),
            rng: Mutex::new(rng),
            options,
        }
    }

    pub fn options(&self) -> &GeneratorOptions {
        &self.options
    }

    pub fn stats(&self) -> &GeneratorStats {
        &self.shared.stats
    }

    /// Returns the number of deferred sends that have not fired yet.
    pub fn pending_timers(&self) -> usize {
        self.timers.pending()
    }

    /// Handles every netlink message in a datagram received from `port`, returning the replies.
    ///
    /// Walking stops at the first header that is truncated or declares a length that does not
    /// fit. Requests are acknowledged when they ask for it, and always when they fail.
    pub fn receive(&self, raw: &[u8], port: u32) -> Vec<Message> {
        let mut replies = Vec::new();
        let mut buf = raw;

        while buf.len() >= Header::LEN {
            let Ok(header) = Header::peek(buf) else { break };
            let len = header.len as usize;
            if len < Header::LEN || len > buf.len() {
                debug!(len, remaining = buf.len(), "truncated message, dropping rest of datagram");
                break;
            }

            let msg = Message::from_parts(header, Bytes::copy_from_slice(&buf[Header::LEN..len]));
            replies.extend(self.handle_message(&msg, port));

            buf = &buf[nlbench_wire::align(len).min(buf.len())..];
        }

        replies
    }

    /// Handles one framed message from `port`, returning the reply if one is due.
    pub fn handle_message(&self, msg: &Message, port: u32) -> Option<Message> {
        let header = msg.header();

        let status = if !header.has_flags(NLM_F_REQUEST) || header.msg_type < NLMSG_MIN_TYPE {
            trace!(msg_type = header.msg_type, "not a request, skipping");
            0
        } else {
            match self.handle(msg) {
                Ok(outcome) => {
                    trace!(seq = header.seq, port, ?outcome, "request accepted");
                    0
                }
                Err(e) => {
                    warn!(seq = header.seq, port, err = %e, "request rejected");
                    self.shared.stats.increment_rejected();
                    -(e.errno() as i32)
                }
            }
        };

        (header.has_flags(NLM_F_ACK) || status != 0)
            .then(|| ErrorMessage::reply(msg, status).into_message(port))
    }

    /// Parses and executes a request message.
    pub fn handle(&self, msg: &Message) -> Result<Outcome, GenError> {
        let len = msg.header().len as usize;
        if len < Header::LEN {
            return Err(nlbench_wire::Error::TooShort { len, min: Header::LEN }.into());
        }

        let attrs = Attributes::parse_payload(msg.payload(), Header::LEN)?;
        self.dispatch(msg.msg_type(), &attrs)
    }

    /// Routes a request by its subtype code.
    pub fn dispatch(&self, msg_type: u16, attrs: &Attributes<'_>) -> Result<Outcome, GenError> {
        let subtype = MsgType::try_from(msg_type)?;
        let request = ControlRequest::from_attrs(subtype, attrs)?;
        self.execute(&request)
    }

    /// Executes a decoded request.
    pub fn execute(&self, request: &ControlRequest) -> Result<Outcome, GenError> {
        request.validate()?;

        let ControlRequest { subtype, count, size, window, destination } = *request;
        // `validate` guarantees these for the subtypes that use them.
        let (window, pid) = (window.unwrap_or_default(), destination.unwrap_or_default());

        let outcome = match subtype {
            MsgType::UnicastProcess => Outcome::Sent(self.unicast_process(count, size, pid)?),
            MsgType::MulticastProcess => Outcome::Sent(self.multicast_process(count, size)?),
            MsgType::UnicastInterrupt => {
                Outcome::Scheduled(self.unicast_interrupt(count, size, window, pid)?)
            }
            MsgType::MulticastInterrupt => {
                Outcome::Scheduled(self.multicast_interrupt(count, size, window)?)
            }
        };

        self.shared.stats.increment_requests();
        debug!(subtype = subtype.name(), count, size, ?outcome, "request executed");

        Ok(outcome)
    }

    #[inline]
    fn check_size(&self, size: u32) -> Result<(), GenError> {
        if size > self.options.max_message_size {
            return Err(GenError::TooLarge { size, max: self.options.max_message_size });
        }

        Ok(())
    }
}
