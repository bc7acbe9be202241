//! Translation between raw byte streams and application messages.
//!
//! A [`Codec`] is shared by every session of an [`EventGroup`](crate::EventGroup)
//! and may be invoked from several processor threads at once, so it must not
//! keep mutable state of its own. Anything a codec needs to remember between
//! reads of one connection lives in [`Codec::State`], which the processor stores
//! next to the session's receive buffer.
//!
//! ```text
//!  socket ──read──▶ MessageBuffer ──decode──▶ Message ──▶ Listener
//!  socket ◀─write── write queue   ◀─encode─── Message ◀── Session::send
//! ```

pub mod length;
pub mod line;

pub use length::LengthFieldCodec;
pub use line::LineCodec;

use bytes::BytesMut;

use crate::{buffer::MessageBuffer, error::CodecError};

/// Outcome of a single decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<M> {
    /// A complete message was removed from the head of the buffer.
    Message(M),
    /// The buffer does not yet hold a complete message.
    NeedMore,
}

/// Bidirectional translator between bytes and messages.
///
/// `decode` is called repeatedly against a session's buffer until it returns
/// [`Decoded::NeedMore`]. It must never block and must never hand out a
/// partially built message; bytes belonging to an incomplete frame stay in the
/// buffer for the next read. Returning an error closes the session.
///
/// `encode` must be a pure function of the message.
pub trait Codec: Send + Sync + 'static {
    type Message: Send + 'static;

    /// Per-session decoder state.
    type State: Default + Send + 'static;

    fn decode(
        &self,
        state: &mut Self::State,
        buffer: &mut MessageBuffer,
    ) -> Result<Decoded<Self::Message>, CodecError>;

    fn encode(&self, message: &Self::Message, dst: &mut BytesMut) -> Result<(), CodecError>;

    /// Decodes every complete message currently in `buffer`.
    fn decode_all(
        &self,
        state: &mut Self::State,
        buffer: &mut MessageBuffer,
    ) -> Result<Vec<Self::Message>, CodecError> {
        let mut messages = Vec::new();
        while let Decoded::Message(message) = self.decode(state, buffer)? {
            messages.push(message);
        }
        Ok(messages)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Feeds `stream` to `codec` split at the given cut points.
    pub fn decode_chunked<C: Codec>(
        codec: &C,
        stream: &[u8],
        cuts: &[usize],
    ) -> Result<Vec<C::Message>, CodecError> {
        let mut state = C::State::default();
        let mut buffer = MessageBuffer::new();
        let mut messages = Vec::new();
        let mut start = 0;
        let mut points: Vec<usize> = cuts.iter().map(|c| c % (stream.len() + 1)).collect();
        points.sort_unstable();
        points.push(stream.len());
        for end in points {
            if end < start {
                continue;
            }
            buffer.extend_from_slice(&stream[start..end]);
            messages.extend(codec.decode_all(&mut state, &mut buffer)?);
            start = end;
        }
        Ok(messages)
    }

    pub fn encode_all<C: Codec>(codec: &C, messages: &[C::Message]) -> Vec<u8> {
        let mut dst = BytesMut::new();
        for message in messages {
            codec.encode(message, &mut dst).unwrap();
        }
        dst.to_vec()
    }
}
