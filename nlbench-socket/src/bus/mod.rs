use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use nix::errno::Errno;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use nlbench_wire::{Message, Target, GRP_MAX};

mod port;
mod stats;

pub use port::Port;
use port::PortShared;
pub use stats::BusStats;

use crate::DEFAULT_PORT_BUFFER_SIZE;

/// Errors returned when handing a message to its destination.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("No port bound to {0}")]
    Unreachable(u32),
    #[error("Receive queue of port {0} is full")]
    Overrun(u32),
    #[error("{dropped} member(s) of group {group} dropped the message")]
    Dropped { group: u32, dropped: usize },
    #[error("No listeners in group {0}")]
    NoListeners(u32),
    #[error("Port {0} is already bound")]
    AddrInUse(u32),
    #[error("Invalid group {0}")]
    InvalidGroup(u32),
}

impl DeliveryError {
    pub const fn errno(&self) -> Errno {
        match self {
            Self::Unreachable(_) => Errno::ECONNREFUSED,
            Self::Overrun(_) | Self::Dropped { .. } => Errno::ENOBUFS,
            Self::NoListeners(_) => Errno::ESRCH,
            Self::AddrInUse(_) => Errno::EADDRINUSE,
            Self::InvalidGroup(_) => Errno::EINVAL,
        }
    }
}

/// Where the generator hands its messages. Delivery failures are reported to the caller, who
/// counts and otherwise ignores them.
pub trait Delivery: Send + Sync + 'static {
    /// Queues `msg` on the port bound to `pid`. Never blocks.
    fn deliver_to_one(&self, msg: Message, pid: u32) -> Result<(), DeliveryError>;

    /// Queues a copy of `msg` on every member of `group`, returning the number of members
    /// reached.
    fn deliver_to_group(&self, msg: Message, group: u32) -> Result<usize, DeliveryError>;

    /// Tells every member of `group` that output meant for it was lost.
    fn notify_group_loss(&self, group: u32, reason: Errno);
}

/// Delivers `msg` to `target`.
pub(crate) fn deliver(
    delivery: &dyn Delivery,
    msg: Message,
    target: Target,
) -> Result<(), DeliveryError> {
    match target {
        Target::Unicast { pid } => delivery.deliver_to_one(msg, pid),
        Target::Multicast { group } => delivery.deliver_to_group(msg, group).map(|_| ()),
    }
}

/// Bus options.
#[derive(Debug, Clone)]
pub struct BusOptions {
    /// Receive queue capacity of every port, in messages.
    port_buffer_size: usize,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self { port_buffer_size: DEFAULT_PORT_BUFFER_SIZE }
    }
}

impl BusOptions {
    /// Sets the receive queue capacity of new ports. Must be at least 1.
    pub fn port_buffer_size(mut self, size: usize) -> Self {
        self.port_buffer_size = size.max(1);
        self
    }
}

#[derive(Debug)]
struct BusInner {
    ports: RwLock<FxHashMap<u32, Arc<PortShared>>>,
    next_id: AtomicU32,
    options: BusOptions,
    stats: BusStats,
}

/// An in-process netlink bus.
///
/// Ports are bound by ID and own a bounded receive queue. Messages that find a full queue are
/// dropped and the port latches an `ENOBUFS` overrun, reported once on its next read. Groups
/// `1..=32` can be joined by any port.
#[derive(Debug, Clone, Default)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Default for BusInner {
    fn default() -> Self {
        Self::new(BusOptions::default())
    }
}

impl BusInner {
    fn new(options: BusOptions) -> Self {
        Self {
            ports: RwLock::new(FxHashMap::default()),
            next_id: AtomicU32::new(1),
            options,
            stats: BusStats::default(),
        }
    }
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: BusOptions) -> Self {
        Self { inner: Arc::new(BusInner::new(options)) }
    }

    /// Binds a new port. With `None`, a free ID is picked, starting at 1.
    pub fn bind(&self, id: Option<u32>) -> Result<Port, DeliveryError> {
        self.bind_with_capacity(id, self.inner.options.port_buffer_size)
    }

    /// Binds a new port with a receive queue of `capacity` messages.
    pub fn bind_with_capacity(
        &self,
        id: Option<u32>,
        capacity: usize,
    ) -> Result<Port, DeliveryError> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mut ports = self.inner.ports.write();

        let id = match id {
            Some(id) if id == 0 || ports.contains_key(&id) => {
                return Err(DeliveryError::AddrInUse(id))
            }
            Some(id) => id,
            None => loop {
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                if id != 0 && !ports.contains_key(&id) {
                    break id;
                }
            },
        };

        let shared = Arc::new(PortShared::new(id, tx));
        ports.insert(id, Arc::clone(&shared));
        debug!(port = id, capacity, "bound port");

        Ok(Port::new(shared, rx, self.clone()))
    }

    /// Returns the number of bound ports.
    pub fn port_count(&self) -> usize {
        self.inner.ports.read().len()
    }

    /// Returns the number of ports in `group`.
    pub fn group_size(&self, group: u32) -> usize {
        self.inner.ports.read().values().filter(|p| p.is_member(group)).count()
    }

    pub fn stats(&self) -> &BusStats {
        &self.inner.stats
    }

    pub(crate) fn unbind(&self, id: u32) {
        if self.inner.ports.write().remove(&id).is_some() {
            debug!(port = id, "unbound port");
        }
    }
}

pub(crate) const fn check_group(group: u32) -> Result<(), DeliveryError> {
    if group == 0 || group > GRP_MAX {
        return Err(DeliveryError::InvalidGroup(group));
    }

    Ok(())
}

impl Delivery for Bus {
    fn deliver_to_one(&self, msg: Message, pid: u32) -> Result<(), DeliveryError> {
        let ports = self.inner.ports.read();
        let Some(port) = ports.get(&pid) else {
            trace!(pid, "no such port");
            self.inner.stats.increment_unreachable();
            return Err(DeliveryError::Unreachable(pid));
        };

        match port.push(msg) {
            Ok(()) => {
                self.inner.stats.increment_delivered();
                Ok(())
            }
            Err(e) => {
                self.inner.stats.increment_overruns();
                Err(e)
            }
        }
    }

    fn deliver_to_group(&self, msg: Message, group: u32) -> Result<usize, DeliveryError> {
        check_group(group)?;

        let ports = self.inner.ports.read();
        let (mut delivered, mut dropped) = (0, 0);

        for port in ports.values().filter(|p| p.is_member(group)) {
            match port.push(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => dropped += 1,
            }
        }

        self.inner.stats.add_delivered(delivered);
        self.inner.stats.add_overruns(dropped);

        if dropped > 0 {
            return Err(DeliveryError::Dropped { group, dropped });
        }
        if delivered == 0 {
            return Err(DeliveryError::NoListeners(group));
        }

        Ok(delivered)
    }

    fn notify_group_loss(&self, group: u32, reason: Errno) {
        if check_group(group).is_err() {
            return;
        }

        for port in self.inner.ports.read().values().filter(|p| p.is_member(group)) {
            port.set_error(reason);
        }

        self.inner.stats.increment_loss_notifications();
    }
}
