use bytes::{Buf, BufMut, Bytes, BytesMut};
use nix::errno::Errno;

use crate::{Error, Header, Message, NLMSG_ERROR, NLM_F_CAPPED};

/// The body of an [`NLMSG_ERROR`] message: a status plus the header of the request it answers.
///
/// A status of `0` is a plain acknowledgement, a negative status is `-errno`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    /// `0` or a negative errno.
    pub error: i32,
    /// Header of the original request.
    pub request: Header,
    /// Payload of the original request, echoed on errors only.
    pub echo: Bytes,
}

impl ErrorMessage {
    /// Creates the reply for `request`, echoing its payload if `error` is negative.
    pub fn reply(request: &Message, error: i32) -> Self {
        let echo = if error < 0 { request.payload().clone() } else { Bytes::new() };
        Self { error, request: *request.header(), echo }
    }

    /// Creates an error record that answers no request, used to report lost messages.
    pub fn loss(errno: Errno) -> Self {
        Self { error: -(errno as i32), request: Header::default(), echo: Bytes::new() }
    }

    /// Returns the errno carried by this record, or `None` for an acknowledgement.
    pub fn errno(&self) -> Option<Errno> {
        (self.error != 0).then(|| Errno::from_raw(-self.error))
    }

    /// Returns true if this is an acknowledgement of success.
    #[inline]
    pub const fn is_ack(&self) -> bool {
        self.error == 0
    }

    /// Wraps the record in a message addressed to `pid`, correlated by the request's sequence
    /// number.
    pub fn into_message(self, pid: u32) -> Message {
        let flags = if self.echo.is_empty() { NLM_F_CAPPED } else { 0 };
        let mut body = BytesMut::with_capacity(4 + Header::LEN + self.echo.len());
        body.put_i32_ne(self.error);
        self.request.put(&mut body);
        body.put_slice(&self.echo);

        Message::new(NLMSG_ERROR, flags, body.freeze()).with_seq(self.request.seq).with_pid(pid)
    }

    /// Decodes the record from an [`NLMSG_ERROR`] message.
    pub fn from_message(msg: &Message) -> Result<Self, Error> {
        let payload = msg.payload();
        if payload.len() < 4 + Header::LEN {
            return Err(Error::TooShort { len: payload.len(), min: 4 + Header::LEN });
        }

        let mut buf = payload.clone();
        let error = buf.get_i32_ne();
        let request = Header::peek(&buf)?;
        buf.advance(Header::LEN);

        Ok(Self { error, request, echo: buf })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ControlRequest, NLMSG_NOOP, NLM_F_ACK, NLM_F_REQUEST};

    #[test]
    fn ack_is_capped_and_correlated() {
        let req = Message::new(NLMSG_NOOP, NLM_F_REQUEST | NLM_F_ACK, Bytes::new()).with_seq(41);
        let msg = ErrorMessage::reply(&req, 0).into_message(7);

        assert_eq!(msg.msg_type(), NLMSG_ERROR);
        assert_eq!(msg.header().seq, 41);
        assert_eq!(msg.header().pid, 7);
        assert!(msg.header().has_flags(NLM_F_CAPPED));

        let decoded = ErrorMessage::from_message(&msg).unwrap();
        assert!(decoded.is_ack());
        assert_eq!(decoded.errno(), None);
        assert_eq!(decoded.request, *req.header());
    }

    #[test]
    fn error_echoes_request_payload() {
        let req = ControlRequest::multicast_process(5, 1 << 20).to_message(3);
        let msg = ErrorMessage::reply(&req, -(Errno::E2BIG as i32)).into_message(2);
        assert!(!msg.header().has_flags(NLM_F_CAPPED));

        let decoded = ErrorMessage::from_message(&msg).unwrap();
        assert_eq!(decoded.errno(), Some(Errno::E2BIG));
        assert_eq!(&decoded.echo, req.payload());
    }

    #[test]
    fn loss_record_has_no_request() {
        let msg = ErrorMessage::loss(Errno::ENOBUFS).into_message(0);
        let decoded = ErrorMessage::from_message(&msg).unwrap();
        assert_eq!(decoded.errno(), Some(Errno::ENOBUFS));
        assert_eq!(decoded.request.seq, 0);
    }
}
