use std::{
    collections::VecDeque,
    io,
    pin::Pin,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use bytes::{BufMut, Bytes, BytesMut};
use futures::{SinkExt, Stream, StreamExt};
use nix::errno::Errno;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use nlbench_transport::{Address, Transport};
use nlbench_wire::{
    Codec, ControlRequest, ErrorMessage, Message, NLMSG_ERROR, NLMSG_JOIN_GROUP,
    NLMSG_LEAVE_GROUP, NLMSG_NOOP, NLM_F_ACK, NLM_F_REQUEST,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("IO error: {0:?}")]
    Io(#[from] io::Error),
    #[error("Wire protocol error: {0}")]
    Wire(#[from] nlbench_wire::Error),
    #[error("Request rejected: {0}")]
    Rejected(Errno),
    #[error("Connection closed")]
    Closed,
}

impl ClientError {
    /// Returns the errno matching this error.
    pub fn errno(&self) -> Errno {
        match self {
            Self::Io(e) => e.raw_os_error().map_or(Errno::EIO, Errno::from_raw),
            Self::Wire(e) => e.errno(),
            Self::Rejected(errno) => *errno,
            Self::Closed => Errno::ECONNRESET,
        }
    }
}

/// Something a client receives outside of a request/reply exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A generated message.
    Message(Message),
    /// Generated messages were lost on the way, e.g. `ENOBUFS` after an overrun.
    Loss(Errno),
}

/// A frame received from the listener.
enum Frame {
    Reply { seq: u32, pid: u32, record: ErrorMessage },
    Event(Event),
}

impl Frame {
    fn classify(msg: Message) -> Result<Self, nlbench_wire::Error> {
        if msg.msg_type() != NLMSG_ERROR {
            return Ok(Self::Event(Event::Message(msg)));
        }

        let record = ErrorMessage::from_message(&msg)?;
        // Loss records answer no request.
        if record.request.msg_type == 0 {
            let errno = record.errno().unwrap_or(Errno::ENOBUFS);
            return Ok(Self::Event(Event::Loss(errno)));
        }

        Ok(Self::Reply { seq: msg.header().seq, pid: msg.header().pid, record })
    }
}

/// A client of the control channel: the user-space side of one netlink socket.
///
/// Requests are sent one at a time and wait for their reply. Generated traffic, and loss
/// reports, are yielded by the [`Stream`] implementation. Frames that arrive while a request
/// waits for its reply are kept and yielded afterwards, in order.
#[derive(Debug)]
pub struct Client<Io> {
    conn: Framed<Io, Codec>,
    /// Sequence number of the next request. Never zero.
    seq: u32,
    /// Our port on the bus, learned from the first reply.
    port_id: Option<u32>,
    backlog: VecDeque<Event>,
}

impl<Io: AsyncRead + AsyncWrite + Unpin> Client<Io> {
    /// Connects to a listener at `addr`.
    pub async fn connect<T, A>(transport: &mut T, addr: A) -> Result<Self, ClientError>
    where
        T: Transport<A, Io = Io>,
        A: Address,
    {
        let io = transport.connect(addr.clone()).await.map_err(|e| {
            debug!(err = ?e, ?addr, "failed to connect");
            io::Error::new(io::ErrorKind::ConnectionRefused, e.to_string())
        })?;

        Ok(Self::new(io))
    }

    /// Wraps an established connection.
    pub fn new(io: Io) -> Self {
        Self {
            conn: Framed::new(io, Codec::new()),
            seq: 1,
            port_id: None,
            backlog: VecDeque::new(),
        }
    }

    /// Returns our port ID on the bus, once a reply has revealed it.
    pub const fn port_id(&self) -> Option<u32> {
        self.port_id
    }

    /// Sends a control request and waits for it to be accepted.
    pub async fn request(&mut self, request: &ControlRequest) -> Result<(), ClientError> {
        request.validate()?;
        let seq = self.next_seq();
        self.transact(request.to_message(seq)).await
    }

    /// Sends a no-op and returns the round trip time.
    pub async fn ping(&mut self) -> Result<Duration, ClientError> {
        let start = Instant::now();
        let msg = Message::new(NLMSG_NOOP, NLM_F_REQUEST | NLM_F_ACK, Bytes::new());
        let seq = self.next_seq();
        self.transact(msg.with_seq(seq)).await?;

        Ok(start.elapsed())
    }

    /// Joins a multicast group.
    pub async fn join_group(&mut self, group: u32) -> Result<(), ClientError> {
        self.membership(NLMSG_JOIN_GROUP, group).await
    }

    /// Leaves a multicast group.
    pub async fn leave_group(&mut self, group: u32) -> Result<(), ClientError> {
        self.membership(NLMSG_LEAVE_GROUP, group).await
    }

    async fn membership(&mut self, msg_type: u16, group: u32) -> Result<(), ClientError> {
        let mut payload = BytesMut::with_capacity(4);
        payload.put_u32_ne(group);

        let seq = self.next_seq();
        let msg = Message::new(msg_type, NLM_F_REQUEST | NLM_F_ACK, payload.freeze());
        self.transact(msg.with_seq(seq)).await
    }

    fn next_seq(&mut self) -> u32 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1).max(1);
        seq
    }

    /// Sends `msg` and waits for the reply with its sequence number.
    async fn transact(&mut self, msg: Message) -> Result<(), ClientError> {
        let seq = msg.header().seq;
        trace!(seq, msg_type = msg.msg_type(), "sending request");
        self.conn.send(msg).await?;

        loop {
            let msg = self.conn.next().await.ok_or(ClientError::Closed)??;

            match Frame::classify(msg)? {
                Frame::Reply { seq: reply_seq, pid, record } if reply_seq == seq => {
                    self.port_id = Some(pid);
                    return match record.errno() {
                        None => Ok(()),
                        Some(errno) => Err(ClientError::Rejected(errno)),
                    };
                }
                Frame::Reply { seq: reply_seq, .. } => {
                    trace!(seq = reply_seq, "dropping stale reply");
                }
                Frame::Event(event) => self.backlog.push_back(event),
            }
        }
    }
}

impl<Io: AsyncRead + AsyncWrite + Unpin> Stream for Client<Io> {
    type Item = Result<Event, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(event) = this.backlog.pop_front() {
            return Poll::Ready(Some(Ok(event)));
        }

        loop {
            let msg = match futures::ready!(this.conn.poll_next_unpin(cx)) {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Poll::Ready(Some(Err(e.into()))),
                None => return Poll::Ready(None),
            };

            match Frame::classify(msg) {
                Ok(Frame::Event(event)) => return Poll::Ready(Some(Ok(event))),
                Ok(Frame::Reply { seq, .. }) => trace!(seq, "dropping unsolicited reply"),
                Err(e) => return Poll::Ready(Some(Err(e.into()))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;
    use crate::{Bus, Generator};

    /// Serves one client over an in-memory pipe, the way a listener session would.
    async fn serve(io: tokio::io::DuplexStream, generator: Generator, port: u32) {
        let mut conn = Framed::new(io, Codec::new());
        while let Some(Ok(msg)) = conn.next().await {
            if let Some(reply) = generator.handle_message(&msg, port) {
                conn.send(reply).await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn request_is_acked_and_learns_port() {
        let (client, server) = duplex(4096);
        tokio::spawn(serve(server, Generator::new(Bus::new()), 17));

        let mut client = Client::new(client);
        assert_eq!(client.port_id(), None);

        client.request(&ControlRequest::multicast_process(1, 8)).await.unwrap();
        assert_eq!(client.port_id(), Some(17));
        assert!(client.ping().await.is_ok());
    }

    #[tokio::test]
    async fn rejected_request_carries_errno() {
        let (client, server) = duplex(4096);
        tokio::spawn(serve(server, Generator::new(Bus::new()), 1));

        let mut client = Client::new(client);
        let err = client.request(&ControlRequest::multicast_process(5, 5000)).await.unwrap_err();
        assert!(matches!(err, ClientError::Rejected(Errno::E2BIG)));
        assert_eq!(err.errno(), Errno::E2BIG);
    }

    #[tokio::test]
    async fn invalid_request_is_not_sent() {
        let (client, _server) = duplex(64);
        let mut client = Client::new(client);

        let mut request = ControlRequest::unicast_interrupt(1, 1, 1, 1);
        request.window = None;
        let err = client.request(&request).await.unwrap_err();
        assert_eq!(err.errno(), Errno::EINVAL);
    }

    #[tokio::test]
    async fn events_during_request_are_buffered() {
        let (client, server) = duplex(4096);
        let mut client = Client::new(client);

        tokio::spawn(async move {
            let mut conn = Framed::new(server, Codec::new());
            let request = conn.next().await.unwrap().unwrap();

            let data = Message::new(19, 0, Bytes::from_static(b"data"));
            conn.send(data).await.unwrap();
            conn.send(ErrorMessage::loss(Errno::ENOBUFS).into_message(3)).await.unwrap();
            conn.send(ErrorMessage::reply(&request, 0).into_message(3)).await.unwrap();
        });

        client.ping().await.unwrap();

        let Event::Message(msg) = client.next().await.unwrap().unwrap() else {
            panic!("expected a message first");
        };
        assert_eq!(msg.payload().as_ref(), b"data");
        assert_eq!(client.next().await.unwrap().unwrap(), Event::Loss(Errno::ENOBUFS));
        assert!(client.next().await.is_none());
    }

    #[tokio::test]
    async fn closed_connection_fails_request() {
        let (client, server) = duplex(64);
        drop(server);

        let mut client = Client::new(client);
        assert!(client.ping().await.is_err());
    }
}
