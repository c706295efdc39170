//! The nlbench traffic generator and its control channel.
//!
//! - [`Generator`] turns control requests into bursts of synthetic messages, either right away
//!   or spread over a jitter window with one-shot timers.
//! - [`Bus`] is the in-process [`Delivery`] fabric: ports, multicast groups and receive queues
//!   with netlink overrun semantics.
//! - [`Listener`] exposes a generator on a [`Transport`](nlbench_transport::Transport). Every
//!   accepted connection acts as one port on the bus.
//! - [`Client`] talks to a listener: it issues requests and yields the generated traffic.
#![doc(issue_tracker_base_url = "https://github.com/chainbound/msg-rs/issues/")]

mod bus;
mod client;
mod gen;
mod listener;

pub use bus::*;
pub use client::*;
pub use gen::*;
pub use listener::*;

/// Default capacity of a port's receive queue, in messages.
pub const DEFAULT_PORT_BUFFER_SIZE: usize = 1024;
