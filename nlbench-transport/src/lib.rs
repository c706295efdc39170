//! Transports for the nlbench control channel.
//!
//! A transport hands out bidirectional byte streams. Every stream accepted by a listener acts as
//! one netlink socket: it carries requests and replies, and the messages generated for it.
#![doc(issue_tracker_base_url = "https://github.com/chainbound/msg-rs/issues/")]

use std::{
    fmt::Debug,
    hash::Hash,
    io,
    path::PathBuf,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{future::BoxFuture, Future};
use tokio::io::{AsyncRead, AsyncWrite};

pub mod ipc;
pub mod tcp;

pub use ipc::Ipc;
pub use tcp::Tcp;

/// The well-known IPC path for a netlink unit, e.g. `/tmp/nlbench-25.sock`.
pub fn well_known_path(unit: u32) -> PathBuf {
    std::env::temp_dir().join(format!("nlbench-{unit}.sock"))
}

/// A transport address.
pub trait Address: Clone + Debug + Send + Sync + Unpin + Hash + Eq + 'static {}

impl<A> Address for A where A: Clone + Debug + Send + Sync + Unpin + Hash + Eq + 'static {}

/// Returns the address of the remote end of a stream.
pub trait PeerAddress<A: Address> {
    fn peer_addr(&self) -> io::Result<A>;
}

/// A transport that can bind, accept and connect.
#[async_trait::async_trait]
pub trait Transport<A: Address>: Send + Sync + Unpin + 'static {
    /// The stream type produced by this transport.
    type Io: AsyncRead + AsyncWrite + PeerAddress<A> + Debug + Send + Unpin + 'static;

    /// The error type returned by this transport.
    type Error: std::error::Error + From<io::Error> + Send + Sync + 'static;

    /// A pending outbound connection.
    type Connect: Future<Output = Result<Self::Io, Self::Error>> + Send + Unpin + 'static;

    /// A pending inbound connection.
    type Accept: Future<Output = Result<Self::Io, Self::Error>> + Send + Unpin + 'static;

    /// Returns the local address this transport is bound to, if any.
    fn local_addr(&self) -> Option<A>;

    /// Binds to the given address.
    async fn bind(&mut self, addr: A) -> Result<(), Self::Error>;

    /// Connects to the given address.
    fn connect(&mut self, addr: A) -> Self::Connect;

    /// Polls for the next inbound connection.
    fn poll_accept(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Accept>;
}

/// Extension methods for [`Transport`]s.
pub trait TransportExt<A: Address>: Transport<A> {
    /// Waits for the next inbound connection and completes it.
    fn accept(&mut self) -> Acceptor<'_, Self, A>
    where
        Self: Sized,
    {
        Acceptor { inner: self, pending: None, _marker: std::marker::PhantomData }
    }
}

impl<A: Address, T: Transport<A>> TransportExt<A> for T {}

/// Future returned by [`TransportExt::accept`].
#[allow(missing_debug_implementations)]
pub struct Acceptor<'a, T: Transport<A>, A: Address> {
    inner: &'a mut T,
    pending: Option<T::Accept>,
    _marker: std::marker::PhantomData<A>,
}

impl<T: Transport<A>, A: Address> Future for Acceptor<'_, T, A> {
    type Output = Result<T::Io, T::Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        loop {
            if let Some(pending) = this.pending.as_mut() {
                let result = futures::ready!(Pin::new(pending).poll(cx));
                this.pending = None;
                return Poll::Ready(result);
            }

            let accept = futures::ready!(Pin::new(&mut *this.inner).poll_accept(cx));
            this.pending = Some(accept);
        }
    }
}

/// Wraps the given error in a boxed future.
pub(crate) fn async_error<E: std::error::Error + Send + 'static, T>(
    e: E,
) -> BoxFuture<'static, Result<T, E>> {
    Box::pin(async move { Err(e) })
}
