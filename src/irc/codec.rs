/// Line codec: frames a peer's byte stream into text lines and serializes
/// replies.
///
/// Inbound lines end in `\n` with an optional preceding `\r`. Outbound
/// messages are always terminated with `\r\n`.
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use super::message::Message;

/// Maximum inbound line length, terminator included (RFC 2812).
pub const MAX_LINE_LENGTH: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Splits inbound bytes into lines and encodes outbound [`Message`]s.
///
/// Oversized lines are dropped in full and decoding resumes at the next
/// terminator, so one bad line never ends the stream.
#[derive(Debug, Default)]
pub struct LineCodec {
    discarding: bool,
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(pos) = src.iter().position(|b| *b == b'\n') else {
                if src.len() > MAX_LINE_LENGTH {
                    if !self.discarding {
                        warn!(len = src.len(), "discarding oversized line");
                    }
                    self.discarding = true;
                    src.clear();
                }
                return Ok(None);
            };

            let frame = src.split_to(pos);
            src.advance(1);

            if self.discarding || frame.len() + 1 > MAX_LINE_LENGTH {
                self.discarding = false;
                continue;
            }

            let bytes = frame.strip_suffix(b"\r").unwrap_or(&frame[..]);
            if bytes.is_empty() {
                continue;
            }
            return Ok(Some(String::from_utf8_lossy(bytes).into_owned()));
        }
    }
}

impl Encoder<Message> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let wire = item.to_wire();
        dst.reserve(wire.len() + 2);
        dst.put_slice(wire.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut LineCodec, buf: &mut BytesMut) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = codec.decode(buf).unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn decodes_crlf_and_bare_lf() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::from("NICK bob\r\nUSER b 0 * :Bob\n");
        assert_eq!(
            decode_all(&mut codec, &mut buf),
            vec!["NICK bob", "USER b 0 * :Bob"]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_terminator() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::from("PI");
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"NG :x\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("PING :x"));
    }

    #[test]
    fn skips_blank_lines() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::from("\r\n\nPONG :x\r\n");
        assert_eq!(decode_all(&mut codec, &mut buf), vec!["PONG :x"]);
    }

    #[test]
    fn drops_oversized_line_and_resumes() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::from(vec![b'A'; MAX_LINE_LENGTH + 10].as_slice());
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());

        buf.extend_from_slice(b"AAAA\r\nNICK bob\r\n");
        assert_eq!(decode_all(&mut codec, &mut buf), vec!["NICK bob"]);
    }

    #[test]
    fn drops_complete_oversized_line() {
        let mut codec = LineCodec::default();
        let mut long = vec![b'B'; MAX_LINE_LENGTH];
        long.extend_from_slice(b"\nQUIT\n");
        let mut buf = BytesMut::from(long.as_slice());
        assert_eq!(decode_all(&mut codec, &mut buf), vec!["QUIT"]);
    }

    #[test]
    fn replaces_invalid_utf8() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::from(&b"PRIVMSG #a :caf\xe9\r\n"[..]);
        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(line, "PRIVMSG #a :caf\u{fffd}");
    }

    #[test]
    fn encode_appends_crlf() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::new();
        let msg = Message::from_server("irc.example.net", "PING", vec!["irc.example.net".into()]);
        codec.encode(msg, &mut buf).unwrap();
        assert_eq!(&buf[..], b":irc.example.net PING :irc.example.net\r\n");
    }
}
