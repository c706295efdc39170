use std::{
    marker::PhantomData,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::{stream::FuturesUnordered, Future, StreamExt};
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tracing::{debug, error, warn, Instrument};

use nlbench_transport::{Address, PeerAddress, Transport};
use nlbench_wire::Codec;

use super::{session::Session, ListenerOptions, SocketState};
use crate::{Bus, DeliveryError, Generator};

pub(crate) struct ListenerDriver<T: Transport<A>, A: Address> {
    /// The server transport used to accept incoming connections.
    pub(crate) transport: T,
    /// The listener state, shared with the listener front-end.
    pub(crate) state: Arc<SocketState>,
    /// Options shared with the listener.
    pub(crate) options: Arc<ListenerOptions>,
    /// The bus that sessions bind their ports on.
    pub(crate) bus: Bus,
    /// The generator handling every session's requests.
    pub(crate) generator: Arc<Generator>,
    /// A set of pending incoming connections, represented by [`Transport::Accept`].
    pub(crate) conn_tasks: FuturesUnordered<T::Accept>,
    /// Running sessions. Dropping the driver aborts them.
    pub(crate) sessions: JoinSet<()>,
    /// The span of the driver.
    pub(crate) span: tracing::Span,
    pub(crate) _marker: PhantomData<A>,
}

impl<T, A> Future for ListenerDriver<T, A>
where
    T: Transport<A>,
    A: Address,
{
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let _span = this.span.clone().entered();

        loop {
            if let Poll::Ready(Some(result)) = this.sessions.poll_join_next(cx) {
                if let Err(e) = result {
                    if e.is_panic() {
                        error!(err = ?e, "session panicked");
                    }
                }

                continue;
            }

            if let Poll::Ready(Some(incoming)) = this.conn_tasks.poll_next_unpin(cx) {
                match incoming {
                    Ok(io) => {
                        if let Err(e) = this.on_incoming(io) {
                            error!(err = %e, "failed to start session");
                            this.state.stats.decrement_active_clients();
                        }
                    }
                    Err(e) => {
                        error!(err = ?e, "failed to accept incoming connection");

                        // Active clients have already been incremented in the initial call to
                        // `poll_accept`, so we need to decrement them here.
                        this.state.stats.decrement_active_clients();
                    }
                }

                continue;
            }

            // Finally, poll the transport for new incoming connection futures.
            if let Poll::Ready(accept) = Pin::new(&mut this.transport).poll_accept(cx) {
                if let Some(max) = this.options.max_clients {
                    if this.state.stats.active_clients() >= max {
                        warn!(max, "max clients reached, rejecting new incoming connection");
                        continue;
                    }
                }

                // Decremented again when the session ends, or if the connection fails first.
                this.state.stats.increment_active_clients();
                this.conn_tasks.push(accept);

                continue;
            }

            return Poll::Pending;
        }
    }
}

impl<T, A> ListenerDriver<T, A>
where
    T: Transport<A>,
    A: Address,
{
    /// Binds a port for the new connection and spawns its session. If this returns an error,
    /// the active clients counter should be decremented.
    fn on_incoming(&mut self, io: T::Io) -> Result<(), DeliveryError> {
        let peer = io.peer_addr().ok();
        let port = self.bus.bind_with_capacity(None, self.options.port_buffer_size)?;
        let span = tracing::info_span!(parent: &self.span, "session", port = port.id());

        span.in_scope(|| debug!(?peer, "new session"));

        let conn = Framed::new(io, Codec::new().with_max_frame_size(self.options.max_frame_size));
        let session =
            Session::new(conn, port, Arc::clone(&self.generator), Arc::clone(&self.state));
        self.sessions.spawn(session.instrument(span));

        Ok(())
    }
}
