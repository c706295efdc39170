use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicI32, AtomicU32, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

use futures::{task::AtomicWaker, Stream};
use nix::errno::Errno;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use nlbench_wire::Message;

use super::{check_group, Bus, DeliveryError};

/// The sending half of a port, owned by the bus.
#[derive(Debug)]
pub(super) struct PortShared {
    id: u32,
    tx: mpsc::Sender<Message>,
    /// Group membership bitmask, bit `n - 1` for group `n`.
    groups: AtomicU32,
    /// Latched errno, `0` if none.
    error: AtomicI32,
    waker: AtomicWaker,
}

impl PortShared {
    pub(super) fn new(id: u32, tx: mpsc::Sender<Message>) -> Self {
        Self {
            id,
            tx,
            groups: AtomicU32::new(0),
            error: AtomicI32::new(0),
            waker: AtomicWaker::new(),
        }
    }

    /// Queues `msg` without blocking. A full queue latches `ENOBUFS`.
    pub(super) fn push(&self, msg: Message) -> Result<(), DeliveryError> {
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.set_error(Errno::ENOBUFS);
                Err(DeliveryError::Overrun(self.id))
            }
            Err(TrySendError::Closed(_)) => Err(DeliveryError::Unreachable(self.id)),
        }
    }

    pub(super) fn set_error(&self, errno: Errno) {
        self.error.store(errno as i32, Ordering::Release);
        self.waker.wake();
    }

    #[inline]
    pub(super) fn is_member(&self, group: u32) -> bool {
        group_bit(group).is_some_and(|bit| self.groups.load(Ordering::Acquire) & bit != 0)
    }
}

#[inline]
fn group_bit(group: u32) -> Option<u32> {
    check_group(group).ok().map(|_| 1 << (group - 1))
}

/// A bound port: the receiving end of the bus.
///
/// Yields queued messages, and `Err(errno)` once for every latched error. Dropping the port
/// unbinds it.
#[derive(Debug)]
pub struct Port {
    shared: Arc<PortShared>,
    rx: mpsc::Receiver<Message>,
    bus: Bus,
}

impl Port {
    pub(super) fn new(shared: Arc<PortShared>, rx: mpsc::Receiver<Message>, bus: Bus) -> Self {
        Self { shared, rx, bus }
    }

    /// The port ID.
    #[inline]
    pub fn id(&self) -> u32 {
        self.shared.id
    }

    /// Joins `group`. Joining twice is a no-op.
    pub fn join(&self, group: u32) -> Result<(), DeliveryError> {
        let bit = group_bit(group).ok_or(DeliveryError::InvalidGroup(group))?;
        self.shared.groups.fetch_or(bit, Ordering::AcqRel);
        debug!(port = self.id(), group, "joined group");
        Ok(())
    }

    /// Leaves `group`. Leaving a group the port is not in is a no-op.
    pub fn leave(&self, group: u32) -> Result<(), DeliveryError> {
        let bit = group_bit(group).ok_or(DeliveryError::InvalidGroup(group))?;
        self.shared.groups.fetch_and(!bit, Ordering::AcqRel);
        debug!(port = self.id(), group, "left group");
        Ok(())
    }

    pub fn is_member(&self, group: u32) -> bool {
        self.shared.is_member(group)
    }

    /// Returns true if an error is latched and will be yielded next.
    pub fn has_pending_error(&self) -> bool {
        self.shared.error.load(Ordering::Acquire) != 0
    }

    /// Receives the next message or latched error.
    pub async fn recv(&mut self) -> Result<Message, Errno> {
        futures::future::poll_fn(|cx| self.poll_recv(cx)).await
    }

    /// Takes the next message or latched error without waiting.
    pub fn try_recv(&mut self) -> Option<Result<Message, Errno>> {
        let errno = self.shared.error.swap(0, Ordering::AcqRel);
        if errno != 0 {
            return Some(Err(Errno::from_raw(errno)));
        }

        self.rx.try_recv().ok().map(Ok)
    }

    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Result<Message, Errno>> {
        self.shared.waker.register(cx.waker());

        let errno = self.shared.error.swap(0, Ordering::AcqRel);
        if errno != 0 {
            return Poll::Ready(Err(Errno::from_raw(errno)));
        }

        // The bus holds a sender for as long as the port lives, so the queue never closes.
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(msg)) => Poll::Ready(Ok(msg)),
            Poll::Ready(None) | Poll::Pending => Poll::Pending,
        }
    }
}

impl Stream for Port {
    type Item = Result<Message, Errno>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_recv(cx).map(Some)
    }
}

impl Drop for Port {
    fn drop(&mut self) {
        self.bus.unbind(self.shared.id);
    }
}
