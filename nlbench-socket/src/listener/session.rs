use std::{
    collections::VecDeque,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::Buf;
use futures::{
    future::{self, Either},
    stream::FuturesOrdered,
    Future, SinkExt, StreamExt,
};
use nix::errno::Errno;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    task::{JoinError, JoinHandle},
};
use tokio_util::codec::Framed;
use tracing::{debug, error, trace, warn};

use nlbench_wire::{
    Codec, ErrorMessage, Message, NLMSG_JOIN_GROUP, NLMSG_LEAVE_GROUP, NLM_F_ACK, NLM_F_REQUEST,
};

use super::SocketState;
use crate::{Generator, Port};

/// Generated messages are only pulled off the port while fewer than this many frames wait to be
/// written. Beyond that, the port's own queue fills up and overruns.
const MAX_EGRESS: usize = 128;

/// A reply being computed on the blocking pool, or one that is already known.
type PendingReply =
    Either<JoinHandle<Option<Message>>, future::Ready<Result<Option<Message>, JoinError>>>;

/// A single connection to the listener. It acts as one port on the bus: requests go to the
/// generator, and whatever the bus delivers to the port goes back to the peer.
pub(super) struct Session<Io> {
    /// The framed connection.
    conn: Framed<Io, Codec>,
    /// The bus port bound for this session.
    port: Port,
    /// The generator that handles requests.
    generator: Arc<Generator>,
    /// The listener state.
    state: Arc<SocketState>,
    /// Replies in request order.
    pending_replies: FuturesOrdered<PendingReply>,
    /// Frames waiting to be written to the connection.
    egress_queue: VecDeque<Message>,
    should_flush: bool,
}

impl<Io: AsyncRead + AsyncWrite + Unpin> Session<Io> {
    pub(super) fn new(
        conn: Framed<Io, Codec>,
        port: Port,
        generator: Arc<Generator>,
        state: Arc<SocketState>,
    ) -> Self {
        Self {
            conn,
            port,
            generator,
            state,
            pending_replies: FuturesOrdered::new(),
            egress_queue: VecDeque::with_capacity(MAX_EGRESS),
            should_flush: false,
        }
    }

    /// Handles a request from the peer. Membership changes are applied to the port right away,
    /// everything else is handed to the generator on the blocking pool.
    fn on_request(&mut self, msg: Message) {
        let header = *msg.header();
        trace!(seq = header.seq, msg_type = header.msg_type, "request");
        self.state.stats.increment_requests();

        let is_membership = matches!(header.msg_type, NLMSG_JOIN_GROUP | NLMSG_LEAVE_GROUP);
        if is_membership && header.has_flags(NLM_F_REQUEST) {
            let status = match self.on_membership(&msg) {
                Ok(()) => 0,
                Err(errno) => -(errno as i32),
            };

            let reply = (header.has_flags(NLM_F_ACK) || status != 0)
                .then(|| ErrorMessage::reply(&msg, status).into_message(self.port.id()));
            self.pending_replies.push_back(Either::Right(future::ready(Ok(reply))));
            return;
        }

        let generator = Arc::clone(&self.generator);
        let port = self.port.id();
        let task = tokio::task::spawn_blocking(move || generator.handle_message(&msg, port));
        self.pending_replies.push_back(Either::Left(task));
    }

    fn on_membership(&self, msg: &Message) -> Result<(), Errno> {
        let mut payload = msg.payload().clone();
        if payload.len() < 4 {
            return Err(Errno::EINVAL);
        }

        let group = payload.get_u32_ne();
        let result = if msg.msg_type() == NLMSG_JOIN_GROUP {
            self.port.join(group)
        } else {
            self.port.leave(group)
        };

        result.map_err(|e| e.errno())
    }

    fn on_reply(&mut self, reply: Result<Option<Message>, JoinError>) {
        match reply {
            Ok(Some(reply)) => {
                if ErrorMessage::from_message(&reply).is_ok_and(|r| !r.is_ack()) {
                    self.state.stats.increment_failed_requests();
                }
                self.egress_queue.push_back(reply);
            }
            Ok(None) => {}
            Err(e) => {
                error!(err = ?e, "request handler failed");
                self.state.stats.increment_failed_requests();
            }
        }
    }

    fn on_delivery(&mut self, delivery: Result<Message, Errno>) {
        match delivery {
            Ok(msg) => self.egress_queue.push_back(msg),
            Err(errno) => {
                warn!(%errno, "port overrun, reporting loss to peer");
                self.egress_queue.push_back(ErrorMessage::loss(errno).into_message(self.port.id()));
            }
        }
    }
}

impl<Io> Drop for Session<Io> {
    fn drop(&mut self) {
        self.state.stats.decrement_active_clients();
    }
}

impl<Io: AsyncRead + AsyncWrite + Unpin> Future for Session<Io> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        loop {
            // Flush any messages on the outgoing buffer
            if this.should_flush {
                match this.conn.poll_flush_unpin(cx) {
                    Poll::Ready(Ok(())) => this.should_flush = false,
                    Poll::Ready(Err(e)) => {
                        error!(err = ?e, "failed to flush connection, closing session");
                        return Poll::Ready(());
                    }
                    Poll::Pending => {}
                }
            }

            // Then, try to drain the egress queue.
            if !this.egress_queue.is_empty() {
                match this.conn.poll_ready_unpin(cx) {
                    Poll::Ready(Ok(())) => {
                        if let Some(msg) = this.egress_queue.pop_front() {
                            let msg_len = msg.size();
                            if let Err(e) = this.conn.start_send_unpin(msg) {
                                error!(err = ?e, "failed to send message, closing session");
                                return Poll::Ready(());
                            }

                            this.state.stats.increment_tx(msg_len);
                            this.should_flush = true;
                        }

                        continue;
                    }
                    Poll::Ready(Err(e)) => {
                        error!(err = ?e, "connection failed, closing session");
                        return Poll::Ready(());
                    }
                    Poll::Pending => {}
                }
            }

            if let Poll::Ready(Some(reply)) = this.pending_replies.poll_next_unpin(cx) {
                this.on_reply(reply);
                continue;
            }

            match this.conn.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(msg))) => {
                    this.state.stats.increment_rx(msg.size());
                    this.on_request(msg);
                    continue;
                }
                Poll::Ready(Some(Err(e))) => {
                    warn!(err = %e, "framing error, closing session");
                    return Poll::Ready(());
                }
                Poll::Ready(None) => {
                    debug!("peer disconnected");
                    return Poll::Ready(());
                }
                Poll::Pending => {}
            }

            if this.egress_queue.len() < MAX_EGRESS {
                if let Poll::Ready(delivery) = this.port.poll_recv(cx) {
                    this.on_delivery(delivery);
                    continue;
                }
            }

            return Poll::Pending;
        }
    }
}
