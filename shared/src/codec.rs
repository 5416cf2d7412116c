//! Wire codec for the `<command:arguments>` frame format
//!
//! A frame is an ASCII command name and an argument string wrapped in the
//! reserved delimiters `<`, `:` and `>`. Multi-field payloads separate their
//! fields with further `:` characters inside the argument string.
//!
//! The codec does not escape payloads. A command or argument containing a
//! delimiter produces a frame the peer will split in the wrong place, so
//! callers must only hand it delimiter-free text.
//!
//! Frames may arrive concatenated or split across reads. `decode` extracts
//! exactly one leading frame and returns the unparsed remainder; when the
//! buffer does not yet hold a whole frame it reports `Incomplete` and
//! consumes nothing so the caller can accumulate more bytes and retry.

use std::fmt;
use thiserror::Error;

/// Opens a frame
pub const FRAME_START: u8 = b'<';
/// Separates the command from its arguments, and argument fields from each other
pub const FIELD_SEPARATOR: char = ':';
/// Closes a frame
pub const FRAME_END: u8 = b'>';

/// One command and its argument string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub arguments: String,
}

impl Frame {
    pub fn new(command: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            arguments: arguments.into(),
        }
    }

    /// A frame whose argument string is empty, e.g. `<newmap:>`
    pub fn bare(command: impl Into<String>) -> Self {
        Self::new(command, String::new())
    }

    /// Builds the argument string by joining `fields` with the field separator
    pub fn with_fields<I, S>(command: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut arguments = String::new();
        for (i, field) in fields.into_iter().enumerate() {
            if i > 0 {
                arguments.push(FIELD_SEPARATOR);
            }
            arguments.push_str(field.as_ref());
        }
        Self::new(command, arguments)
    }

    /// Splits the argument string into at most `n` fields; the last field
    /// keeps any further separators
    pub fn fields(&self, n: usize) -> Vec<&str> {
        self.arguments.splitn(n, FIELD_SEPARATOR).collect()
    }

    pub fn encode(&self) -> String {
        encode(&self.command, &self.arguments)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}:{}>", self.command, self.arguments)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// No complete frame in the buffer yet. Nothing was consumed.
    #[error("incomplete frame, more data needed")]
    Incomplete,
    /// The leading `skip` bytes can never form a frame and should be discarded.
    #[error("malformed frame ({reason}), discarding {skip} bytes")]
    Malformed { skip: usize, reason: &'static str },
}

/// Produces the self-delimited wire form of one frame
pub fn encode(command: &str, arguments: &str) -> String {
    format!("<{command}:{arguments}>")
}

/// Extracts the leading frame of `buffer`
///
/// Whitespace between frames is ignored, which makes the stream insensitive
/// to newlines. Returns the frame together with the bytes that follow it.
pub fn decode(buffer: &[u8]) -> Result<(Frame, &[u8]), FramingError> {
    let Some(offset) = buffer.iter().position(|b| !b.is_ascii_whitespace()) else {
        return Err(FramingError::Incomplete);
    };
    let rest = &buffer[offset..];

    if rest[0] != FRAME_START {
        let skip = rest
            .iter()
            .position(|&b| b == FRAME_START)
            .map_or(buffer.len(), |p| offset + p);
        return Err(FramingError::Malformed {
            skip,
            reason: "data outside of a frame",
        });
    }

    let Some(end) = rest.iter().position(|&b| b == FRAME_END) else {
        // A second opener before any closer means the first frame was cut short.
        if let Some(p) = rest[1..].iter().position(|&b| b == FRAME_START) {
            return Err(FramingError::Malformed {
                skip: offset + 1 + p,
                reason: "unterminated frame",
            });
        }
        return Err(FramingError::Incomplete);
    };
    let consumed = offset + end + 1;
    let body = &rest[1..end];

    let separator = body.iter().position(|&b| b == FIELD_SEPARATOR as u8);
    if let Some(p) = body[..separator.unwrap_or(body.len())]
        .iter()
        .position(|&b| b == FRAME_START)
    {
        return Err(FramingError::Malformed {
            skip: offset + 1 + p,
            reason: "unterminated frame",
        });
    }
    let Some(separator) = separator else {
        return Err(FramingError::Malformed {
            skip: consumed,
            reason: "missing command separator",
        });
    };
    if separator == 0 {
        return Err(FramingError::Malformed {
            skip: consumed,
            reason: "empty command name",
        });
    }

    let body = std::str::from_utf8(body).map_err(|_| FramingError::Malformed {
        skip: consumed,
        reason: "frame is not valid UTF-8",
    })?;
    let (command, arguments) = body.split_at(separator);

    Ok((Frame::new(command, &arguments[1..]), &buffer[consumed..]))
}

/// True when `text` can be placed in a frame without desynchronizing the peer
pub fn is_frame_safe(text: &str) -> bool {
    !text.contains(['<', ':', '>'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_destination_frame() {
        let frame = encode("animatedObjectAddDestination", "E7:10:20:0");
        assert_eq!(frame, "<animatedObjectAddDestination:E7:10:20:0>");
    }

    #[test]
    fn test_decode_single_frame() {
        let (frame, rest) = decode(b"<newturn:42>").unwrap();
        assert_eq!(frame.command, "newturn");
        assert_eq!(frame.arguments, "42");
        assert!(rest.is_empty());
    }

    #[test]
    fn test_decode_returns_remainder() {
        let buffer = b"<chat:alice:hi><newturn:3><ok:";
        let (first, rest) = decode(buffer).unwrap();
        assert_eq!(first, Frame::new("chat", "alice:hi"));

        let (second, rest) = decode(rest).unwrap();
        assert_eq!(second, Frame::new("newturn", "3"));
        assert_eq!(rest, b"<ok:");

        assert_eq!(decode(rest), Err(FramingError::Incomplete));
    }

    #[test]
    fn test_decode_empty_arguments() {
        let (frame, _) = decode(b"<picknick:>").unwrap();
        assert_eq!(frame, Frame::bare("picknick"));
    }

    #[test]
    fn test_decode_partial_frame_needs_more_data() {
        assert_eq!(decode(b"<newtu"), Err(FramingError::Incomplete));
        assert_eq!(decode(b""), Err(FramingError::Incomplete));
        assert_eq!(decode(b"\n\r\n "), Err(FramingError::Incomplete));
    }

    #[test]
    fn test_decode_ignores_newlines_between_frames() {
        let (frame, rest) = decode(b"\n<ok:addtile>\r\n").unwrap();
        assert_eq!(frame, Frame::new("ok", "addtile"));
        assert_eq!(rest, b"\r\n");
    }

    #[test]
    fn test_decode_garbage_before_frame() {
        let err = decode(b"junk<ok:>").unwrap_err();
        assert_eq!(
            err,
            FramingError::Malformed {
                skip: 4,
                reason: "data outside of a frame"
            }
        );
    }

    #[test]
    fn test_decode_garbage_without_frame() {
        match decode(b"  junk") {
            Err(FramingError::Malformed { skip, .. }) => assert_eq!(skip, 6),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_decode_missing_separator() {
        match decode(b"<hello><ok:x>") {
            Err(FramingError::Malformed { skip, reason }) => {
                assert_eq!(skip, 7);
                assert_eq!(reason, "missing command separator");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_decode_unterminated_frame_followed_by_frame() {
        match decode(b"<hel<ok:x>") {
            Err(FramingError::Malformed { skip, .. }) => assert_eq!(skip, 4),
            other => panic!("unexpected result: {:?}", other),
        }
        match decode(b"<hel<ok:x") {
            Err(FramingError::Malformed { skip, .. }) => assert_eq!(skip, 4),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_decode_empty_command() {
        assert!(matches!(
            decode(b"<:x>"),
            Err(FramingError::Malformed { skip: 4, .. })
        ));
    }

    #[test]
    fn test_roundtrip_delimiter_free_payloads() {
        let cases = [
            ("newturn", "42"),
            ("chat", "bob:hello there"),
            ("addtile", "3 4 dirt 1 0"),
            ("newmap", ""),
            ("setObjectAnimationState", "Imp_1:Walk:true"),
        ];

        for (command, arguments) in cases {
            let wire = encode(command, arguments);
            let (frame, rest) = decode(wire.as_bytes()).unwrap();
            assert_eq!(frame.command, command);
            assert_eq!(frame.arguments, arguments);
            assert!(rest.is_empty());
        }
    }

    #[test]
    fn test_frame_fields() {
        let frame = Frame::new("chat", "alice:one:two");
        assert_eq!(frame.fields(2), vec!["alice", "one:two"]);
        assert_eq!(frame.fields(3), vec!["alice", "one", "two"]);
    }

    #[test]
    fn test_with_fields_joins_arguments() {
        let frame = Frame::with_fields("creatureDrop", ["alice", "3", "4"]);
        assert_eq!(frame.encode(), "<creatureDrop:alice:3:4>");
        assert_eq!(frame.to_string(), frame.encode());
    }

    #[test]
    fn test_is_frame_safe() {
        assert!(is_frame_safe("alice"));
        assert!(!is_frame_safe("a:b"));
        assert!(!is_frame_safe("<x"));
        assert!(!is_frame_safe("y>"));
    }
}
