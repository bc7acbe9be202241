use bytes::BytesMut;

use super::{Codec, Decoded};
use crate::{buffer::MessageBuffer, error::CodecError};

pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Newline-delimited UTF-8 text. A trailing `\r` before the `\n` is stripped.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_line_length: usize,
}

/// Remembers how much of the buffer has already been scanned for a newline,
/// so a long line arriving in many small reads is not rescanned each time.
#[derive(Debug, Default)]
pub struct LineState {
    scanned: usize,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl LineCodec {
    pub fn new(max_line_length: usize) -> Self {
        Self { max_line_length }
    }
}

impl Codec for LineCodec {
    type Message = String;
    type State = LineState;

    fn decode(
        &self,
        state: &mut LineState,
        buffer: &mut MessageBuffer,
    ) -> Result<Decoded<String>, CodecError> {
        let Some(pos) = buffer.find_byte(state.scanned.min(buffer.len()), b'\n') else {
            state.scanned = buffer.len();
            if buffer.len() > self.max_line_length {
                return Err(CodecError::FrameTooLarge {
                    len: buffer.len(),
                    max: self.max_line_length,
                });
            }
            return Ok(Decoded::NeedMore);
        };
        if pos > self.max_line_length {
            return Err(CodecError::FrameTooLarge {
                len: pos,
                max: self.max_line_length,
            });
        }

        state.scanned = 0;
        let frame = buffer.split_to(pos + 1);
        let mut line = &frame[..pos];
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        let text = std::str::from_utf8(line).map_err(|_| CodecError::InvalidUtf8)?;
        Ok(Decoded::Message(text.to_owned()))
    }

    fn encode(&self, message: &String, dst: &mut BytesMut) -> Result<(), CodecError> {
        if message.contains('\n') {
            return Err(CodecError::Malformed("line contains a newline".into()));
        }
        if message.len() > self.max_line_length {
            return Err(CodecError::FrameTooLarge {
                len: message.len(),
                max: self.max_line_length,
            });
        }
        dst.reserve(message.len() + 1);
        dst.extend_from_slice(message.as_bytes());
        dst.extend_from_slice(b"\n");
        Ok(())
    }
}
