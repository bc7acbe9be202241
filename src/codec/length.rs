use bytes::{BufMut, Bytes, BytesMut};

use super::{Codec, Decoded};
use crate::{buffer::MessageBuffer, error::CodecError};

const HEADER_LEN: usize = 4;
const MAX_HEADER_VALUE: usize = u32::MAX as usize;
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// Frames every message as a 4-byte big-endian payload length followed by
/// the payload itself.
///
/// A header announcing more than `max_frame_length` bytes is rejected as
/// soon as it is seen, without waiting for the payload. The limit never
/// exceeds what the 4-byte header can express.
#[derive(Debug, Clone)]
pub struct LengthFieldCodec {
    max_frame_length: usize,
}

impl Default for LengthFieldCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LENGTH)
    }
}

impl LengthFieldCodec {
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            max_frame_length: max_frame_length.min(MAX_HEADER_VALUE),
        }
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }
}

impl Codec for LengthFieldCodec {
    type Message = Bytes;
    type State = ();

    fn decode(
        &self,
        _state: &mut (),
        buffer: &mut MessageBuffer,
    ) -> Result<Decoded<Bytes>, CodecError> {
        let Some(len) = buffer.peek_u32(0) else {
            return Ok(Decoded::NeedMore);
        };
        let len = len as usize;
        if len > self.max_frame_length {
            return Err(CodecError::FrameTooLarge {
                len,
                max: self.max_frame_length,
            });
        }
        if buffer.len() < HEADER_LEN + len {
            return Ok(Decoded::NeedMore);
        }
        buffer.advance(HEADER_LEN);
        Ok(Decoded::Message(buffer.split_to(len)))
    }

    fn encode(&self, message: &Bytes, dst: &mut BytesMut) -> Result<(), CodecError> {
        let too_large = CodecError::FrameTooLarge {
            len: message.len(),
            max: self.max_frame_length,
        };
        if message.len() > self.max_frame_length {
            return Err(too_large);
        }
        let len = u32::try_from(message.len()).map_err(|_| too_large)?;
        dst.reserve(HEADER_LEN + message.len());
        dst.put_u32(len);
        dst.extend_from_slice(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::testing::{decode_chunked, encode_all};
    use proptest::prelude::*;

    #[test]
    fn test_need_more_until_complete() {
        let codec = LengthFieldCodec::default();
        let mut buffer = MessageBuffer::from(&[0u8, 0, 0][..]);
        assert_eq!(codec.decode(&mut (), &mut buffer), Ok(Decoded::NeedMore));

        buffer.extend_from_slice(&[2, b'B']);
        assert_eq!(codec.decode(&mut (), &mut buffer), Ok(Decoded::NeedMore));
        assert_eq!(buffer.len(), 5);

        buffer.extend_from_slice(b"B");
        assert_eq!(
            codec.decode(&mut (), &mut buffer),
            Ok(Decoded::Message(Bytes::from_static(b"BB")))
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_empty_payload() {
        let codec = LengthFieldCodec::default();
        let mut buffer = MessageBuffer::from(&[0u8, 0, 0, 0][..]);
        assert_eq!(
            codec.decode(&mut (), &mut buffer),
            Ok(Decoded::Message(Bytes::new()))
        );
    }

    #[test]
    fn test_oversized_header_rejected_early() {
        let codec = LengthFieldCodec::new(16);
        let mut buffer = MessageBuffer::from(&[0u8, 0, 0, 17][..]);
        assert_eq!(
            codec.decode(&mut (), &mut buffer),
            Err(CodecError::FrameTooLarge { len: 17, max: 16 })
        );
    }

    #[test]
    fn test_encode_layout() {
        let codec = LengthFieldCodec::default();
        let bytes = encode_all(&codec, &[Bytes::from_static(b"A"), Bytes::from_static(b"BB")]);
        assert_eq!(bytes, vec![0, 0, 0, 1, b'A', 0, 0, 0, 2, b'B', b'B']);
    }

    #[test]
    fn test_encode_rejects_oversized() {
        let codec = LengthFieldCodec::new(2);
        let mut dst = BytesMut::new();
        assert!(codec.encode(&Bytes::from_static(b"abc"), &mut dst).is_err());
        assert!(dst.is_empty());
    }

    #[test]
    fn test_limit_clamped_to_header_range() {
        let codec = LengthFieldCodec::new(usize::MAX);
        assert_eq!(codec.max_frame_length(), u32::MAX as usize);
        assert_eq!(LengthFieldCodec::new(16).max_frame_length(), 16);

        let mut buffer = MessageBuffer::from(&[0xffu8, 0xff, 0xff, 0xff][..]);
        assert_eq!(codec.decode(&mut (), &mut buffer), Ok(Decoded::NeedMore));
    }

    proptest! {
        #[test]
        fn prop_chunking_independent(
            payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 0..16),
            cuts in proptest::collection::vec(any::<usize>(), 0..12),
        ) {
            let codec = LengthFieldCodec::default();
            let messages: Vec<Bytes> = payloads.into_iter().map(Bytes::from).collect();
            let stream = encode_all(&codec, &messages);
            let whole = decode_chunked(&codec, &stream, &[]).unwrap();
            let split = decode_chunked(&codec, &stream, &cuts).unwrap();
            prop_assert_eq!(&whole, &messages);
            prop_assert_eq!(split, messages);
        }

        #[test]
        fn prop_round_trip(payload in proptest::collection::vec(any::<u8>(), 0..512)) {
            let codec = LengthFieldCodec::default();
            let message = Bytes::from(payload);
            let stream = encode_all(&codec, std::slice::from_ref(&message));
            prop_assert_eq!(decode_chunked(&codec, &stream, &[]).unwrap(), vec![message]);
        }
    }
}
