//! Test doubles for the generator.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use nix::errno::Errno;
use parking_lot::Mutex;
use tokio::time::Instant;

use nlbench_wire::{BuildError, Builder, Message, MessageBuilder, Target};

use crate::{Delivery, DeliveryError};

#[derive(Debug, Clone)]
pub(crate) struct Delivered {
    pub(crate) at: Instant,
    pub(crate) target: Target,
    pub(crate) msg: Message,
}

#[derive(Debug, Default)]
struct Log {
    deliveries: Vec<Delivered>,
    losses: Vec<(u32, Errno)>,
}

/// A [`Delivery`] that accepts everything and records it.
#[derive(Debug, Clone, Default)]
pub(crate) struct Recorder {
    log: Arc<Mutex<Log>>,
}

impl Recorder {
    pub(crate) fn deliveries(&self) -> Vec<Delivered> {
        self.log.lock().deliveries.clone()
    }

    pub(crate) fn losses(&self) -> Vec<(u32, Errno)> {
        self.log.lock().losses.clone()
    }

    fn record(&self, msg: Message, target: Target) {
        self.log.lock().deliveries.push(Delivered { at: Instant::now(), target, msg });
    }
}

impl Delivery for Recorder {
    fn deliver_to_one(&self, msg: Message, pid: u32) -> Result<(), DeliveryError> {
        self.record(msg, Target::Unicast { pid });
        Ok(())
    }

    fn deliver_to_group(&self, msg: Message, group: u32) -> Result<usize, DeliveryError> {
        self.record(msg, Target::Multicast { group });
        Ok(1)
    }

    fn notify_group_loss(&self, group: u32, reason: Errno) {
        self.log.lock().losses.push((group, reason));
    }
}

/// A [`Builder`] that fails every `nth` call, counting calls.
#[derive(Debug, Clone)]
pub(crate) struct FlakyBuilder {
    nth: u32,
    calls: Arc<AtomicU32>,
}

impl FlakyBuilder {
    pub(crate) fn failing_every(nth: u32) -> Self {
        Self { nth, calls: Arc::default() }
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Builder for FlakyBuilder {
    fn build(&self, msg_type: u16, size: u32) -> Result<Message, BuildError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if self.nth != 0 && call % self.nth == 0 {
            return Err(BuildError::OutOfMemory { size });
        }

        MessageBuilder.build(msg_type, size)
    }
}
