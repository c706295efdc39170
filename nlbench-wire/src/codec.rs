use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{align, Error, Header, Message};

/// Default maximum frame size, padding included.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

#[derive(Debug, Default)]
enum State {
    #[default]
    Header,
    Payload(Header),
}

/// Frames netlink messages on a byte stream. Each frame is delimited by the length in its
/// header and padded to alignment.
#[derive(Debug)]
pub struct Codec {
    /// The current state of the decoder.
    state: State,
    /// Frames larger than this are rejected.
    max_frame_size: usize,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec {
    pub const fn new() -> Self {
        Self { state: State::Header, max_frame_size: DEFAULT_MAX_FRAME_SIZE }
    }

    /// Sets the maximum accepted frame size.
    pub const fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

impl Decoder for Codec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::Header => {
                    if src.len() < Header::LEN {
                        return Ok(None);
                    }

                    let header = Header::peek(src)?;
                    let len = header.len as usize;

                    // A shorter length cannot be skipped over, the stream is unusable after this.
                    if len < Header::LEN {
                        tracing::debug!(len, "frame length below header size");
                        return Err(Error::TooShort { len, min: Header::LEN });
                    }
                    if align(len) > self.max_frame_size {
                        tracing::debug!(len, max = self.max_frame_size, "frame too large");
                        return Err(Error::FrameTooLarge { len, max: self.max_frame_size });
                    }

                    src.reserve(align(len).saturating_sub(src.len()));
                    self.state = State::Payload(header);
                }
                State::Payload(header) => {
                    let len = header.len as usize;
                    if src.len() < align(len) {
                        return Ok(None);
                    }

                    src.advance(Header::LEN);
                    let payload = src.split_to(len - Header::LEN).freeze();
                    src.advance(align(len) - len);

                    self.state = State::Header;
                    return Ok(Some(Message::from_parts(header, payload)));
                }
            }
        }
    }
}

impl Encoder<Message> for Codec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst);
        Ok(())
    }
}
