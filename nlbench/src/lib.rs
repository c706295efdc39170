//! nlbench: a traffic generator for stress-testing datagram messaging substrates.
//!
//! A [`Listener`] exposes a [`Generator`] over a transport. [`Client`]s ask it for bursts of
//! synthetic messages, unicast to one port or multicast to a group, sent right away or spread
//! over a random delay window, and measure what arrives.
#![doc(issue_tracker_base_url = "https://github.com/chainbound/msg-rs/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub use nlbench_socket::*;
pub use nlbench_transport::*;
pub use nlbench_wire as wire;
