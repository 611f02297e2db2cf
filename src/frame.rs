// https://redis.io/docs/reference/protocol-spec

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;
use thiserror::Error as ThisError;

static CRLF: &[u8; 2] = b"\r\n";

/// Arrays may nest this deep. Requests are flat arrays, the limit only keeps a hostile
/// client from exhausting the stack.
const MAX_NESTING: usize = 64;

#[derive(Debug, ThisError, PartialEq)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("ERR Protocol error: invalid frame data type '{0}'")]
    InvalidDataType(char),
    /// Structurally invalid input: bad length, missing CRLF, non numeric integer.
    #[error("ERR Protocol error: {0}")]
    Protocol(String),
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

/// A single RESP2 value.
///
/// `Null` is the null bulk string (`$-1\r\n`) and `NullArray` the null array (`*-1\r\n`).
/// Both are kept apart from their empty counterparts so that a decoded frame is encoded
/// back to exactly the same bytes.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
    NullArray,
}

// Protocol specification: https://redis.io/docs/reference/protocol-spec/
impl Frame {
    pub fn ok() -> Frame {
        Frame::Simple("OK".to_string())
    }

    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Self::parse_nested(src, 0)
    }

    fn parse_nested(src: &mut Cursor<&[u8]>, depth: usize) -> Result<Self, Error> {
        // The first byte in an RESP-serialized payload always identifies its type.
        // Subsequent bytes constitute the type's contents.
        let first_byte = get_byte(src)?;
        let data_type = DataType::try_from(first_byte)?;

        match data_type {
            DataType::SimpleString => {
                let line = get_line(src)?;
                Ok(Frame::Simple(to_string(line)?))
            }
            DataType::SimpleError => {
                let line = get_line(src)?;
                Ok(Frame::Error(to_string(line)?))
            }
            DataType::Integer => {
                let line = get_line(src)?;
                let integer = to_string(line)?
                    .parse::<i64>()
                    .map_err(|_| Error::Protocol("invalid integer".to_string()))?;

                Ok(Frame::Integer(integer))
            }
            // $<length>\r\n<data>\r\n
            DataType::BulkString => match get_length(src, "bulk length")? {
                None => Ok(Frame::Null),
                Some(length) => {
                    let data = get_exact(src, length)?;
                    Ok(Frame::Bulk(Bytes::copy_from_slice(data)))
                }
            },
            // *<number-of-elements>\r\n<element-1>...<element-n>
            DataType::Array => match get_length(src, "multibulk length")? {
                None => Ok(Frame::NullArray),
                Some(_) if depth >= MAX_NESTING => {
                    Err(Error::Protocol("too many nested arrays".to_string()))
                }
                Some(length) => {
                    // The declared length is untrusted, do not pre-allocate more than the
                    // remaining bytes could possibly hold.
                    let mut frames = Vec::with_capacity(length.min(src.remaining()));
                    for _ in 0..length {
                        frames.push(Self::parse_nested(src, depth + 1)?);
                    }

                    Ok(Frame::Array(frames))
                }
            },
        }
    }

    /// Writes the wire representation of the frame into `dst`.
    ///
    /// Fails when a simple string or an error contains CRLF, nothing is written in that
    /// case.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), Error> {
        self.check()?;
        self.write_to(dst);
        Ok(())
    }

    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let mut bytes = BytesMut::new();
        self.encode(&mut bytes)?;
        Ok(bytes.to_vec())
    }

    fn check(&self) -> Result<(), Error> {
        match self {
            Frame::Simple(s) if contains_crlf(s) => {
                Err(Error::Encode("simple string contains CRLF".to_string()))
            }
            Frame::Error(s) if contains_crlf(s) => {
                Err(Error::Encode("error contains CRLF".to_string()))
            }
            Frame::Array(frames) => frames.iter().try_for_each(Frame::check),
            _ => Ok(()),
        }
    }

    fn write_to(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => {
                dst.put_u8(u8::from(DataType::SimpleString));
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            Frame::Error(s) => {
                dst.put_u8(u8::from(DataType::SimpleError));
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            Frame::Integer(i) => {
                dst.put_u8(u8::from(DataType::Integer));
                dst.extend_from_slice(i.to_string().as_bytes());
                dst.extend_from_slice(CRLF);
            }
            Frame::Bulk(bytes) => {
                dst.reserve(bytes.len() + 16);
                dst.put_u8(u8::from(DataType::BulkString));
                dst.extend_from_slice(bytes.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                dst.extend_from_slice(bytes);
                dst.extend_from_slice(CRLF);
            }
            Frame::Null => dst.extend_from_slice(b"$-1\r\n"),
            Frame::Array(arr) => {
                dst.put_u8(u8::from(DataType::Array));
                dst.extend_from_slice(arr.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                for frame in arr {
                    frame.write_to(dst);
                }
            }
            Frame::NullArray => dst.extend_from_slice(b"*-1\r\n"),
        }
    }
}

impl From<&str> for Frame {
    fn from(s: &str) -> Self {
        Frame::Bulk(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "+{}", s),
            Frame::Error(s) => write!(f, "-{}", s),
            Frame::Integer(i) => write!(f, ":{}", i),
            Frame::Bulk(bytes) => write!(f, "${}", String::from_utf8_lossy(bytes)),
            Frame::Null => write!(f, "$-1"),
            Frame::Array(arr) => {
                write!(f, "*{}", arr.len())?;
                for frame in arr {
                    write!(f, " {}", frame)?;
                }
                Ok(())
            }
            Frame::NullArray => write!(f, "*-1"),
        }
    }
}

fn contains_crlf(s: &str) -> bool {
    s.as_bytes().windows(2).any(|window| window == CRLF)
}

fn to_string(bytes: &[u8]) -> Result<String, Error> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| Error::Protocol("invalid UTF-8 in line".to_string()))
}

/// Reads a `<length>\r\n` header. `None` stands for the `-1` null marker.
fn get_length(src: &mut Cursor<&[u8]>, what: &str) -> Result<Option<usize>, Error> {
    let line = get_line(src)?;
    let length = std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| Error::Protocol(format!("invalid {}", what)))?;

    match length {
        -1 => Ok(None),
        n if n < -1 => Err(Error::Protocol(format!("invalid {}", what))),
        n => usize::try_from(n)
            .map(Some)
            .map_err(|_| Error::Protocol(format!("invalid {}", what))),
    }
}

/// Returns the bytes up to the next CRLF and moves the cursor past it.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let end = src.get_ref().len();

    let line_end = src.get_ref()[start..end]
        .windows(2)
        .position(|window| window == CRLF)
        .map(|index| start + index)
        .ok_or(Error::Incomplete)?;

    src.set_position((line_end + CRLF.len()) as u64);

    Ok(&src.get_ref()[start..line_end])
}

/// Takes exactly `length` payload bytes followed by CRLF. The payload is never scanned, so
/// it may contain anything, CRLF included.
fn get_exact<'a>(src: &mut Cursor<&'a [u8]>, length: usize) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let buf = *src.get_ref();

    let end = start
        .checked_add(length)
        .ok_or_else(|| Error::Protocol("invalid bulk length".to_string()))?;
    if buf.len() < end + CRLF.len() {
        return Err(Error::Incomplete);
    }
    if &buf[end..end + CRLF.len()] != CRLF {
        // Leave the cursor on the offending bytes so the reader resynchronises from there.
        src.set_position(end as u64);
        return Err(Error::Protocol(
            "bulk string is not terminated by CRLF".to_string(),
        ));
    }

    src.set_position((end + CRLF.len()) as u64);

    Ok(&buf[start..end])
}

fn get_byte(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }
    Ok(src.get_u8())
}

#[derive(Debug)]
enum DataType {
    SimpleString, // '+'
    SimpleError,  // '-'
    Integer,      // ':'
    BulkString,   // '$'
    Array,        // '*'
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'+' => Ok(Self::SimpleString),
            b'-' => Ok(Self::SimpleError),
            b':' => Ok(Self::Integer),
            b'$' => Ok(Self::BulkString),
            b'*' => Ok(Self::Array),
            _ => Err(Error::InvalidDataType(char::from(byte))),
        }
    }
}

impl From<DataType> for u8 {
    fn from(value: DataType) -> Self {
        match value {
            DataType::SimpleString => b'+',
            DataType::SimpleError => b'-',
            DataType::Integer => b':',
            DataType::BulkString => b'$',
            DataType::Array => b'*',
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(data: &[u8]) -> Result<Frame, Error> {
        let mut cursor = Cursor::new(data);
        Frame::parse(&mut cursor)
    }

    #[test]
    fn parse_simple_string_frame() {
        let frame = parse(b"+OK\r\n");

        assert!(matches!(frame, Ok(Frame::Simple(ref s)) if s == "OK"));
    }

    #[test]
    fn parse_simple_error_frame() {
        let frame = parse(b"-Error message\r\n");

        assert!(matches!(
            frame,
            Ok(Frame::Error(ref s)) if s == "Error message"
        ));
    }

    fn parse_integer_frame(data: &[u8], expected: i64) {
        let frame = parse(data);

        assert!(matches!(frame, Ok(Frame::Integer(i)) if i == expected));
    }

    #[test]
    fn parse_integer_frame_positive() {
        parse_integer_frame(b":1000\r\n", 1000);
    }

    #[test]
    fn parse_integer_frame_negative() {
        parse_integer_frame(b":-1000\r\n", -1000);
    }

    #[test]
    fn parse_integer_frame_zero() {
        parse_integer_frame(b":0\r\n", 0);
    }

    #[test]
    fn parse_integer_frame_positive_singned() {
        parse_integer_frame(b":+1000\r\n", 1000);
    }

    #[test]
    fn parse_integer_frame_not_a_number() {
        assert_eq!(
            parse(b":12a\r\n"),
            Err(Error::Protocol("invalid integer".to_string()))
        );
    }

    #[test]
    fn parse_bulk_string_frame() {
        let frame = parse(b"$6\r\nfoobar\r\n");

        assert_eq!(frame, Ok(Frame::Bulk(Bytes::from("foobar"))));
    }

    #[test]
    fn parse_bulk_string_frame_empty() {
        let frame = parse(b"$0\r\n\r\n");

        assert_eq!(frame, Ok(Frame::Bulk(Bytes::new())));
    }

    #[test]
    fn parse_bulk_string_frame_null() {
        assert_eq!(parse(b"$-1\r\n"), Ok(Frame::Null));
    }

    #[test]
    fn parse_bulk_string_frame_binary_payload() {
        // The payload is taken by length, an embedded CRLF is data.
        let frame = parse(b"$8\r\nfoo\r\nbar\r\n");

        assert_eq!(frame, Ok(Frame::Bulk(Bytes::from_static(b"foo\r\nbar"))));
    }

    #[test]
    fn parse_bulk_string_frame_bad_terminator() {
        assert_eq!(
            parse(b"$3\r\nfoobar\r\n"),
            Err(Error::Protocol(
                "bulk string is not terminated by CRLF".to_string()
            ))
        );
    }

    #[test]
    fn parse_bulk_string_frame_invalid_length() {
        assert_eq!(
            parse(b"$-2\r\n"),
            Err(Error::Protocol("invalid bulk length".to_string()))
        );
        assert_eq!(
            parse(b"$abc\r\n"),
            Err(Error::Protocol("invalid bulk length".to_string()))
        );
    }

    #[test]
    fn parse_incomplete_frames() {
        assert_eq!(parse(b""), Err(Error::Incomplete));
        assert_eq!(parse(b"+OK"), Err(Error::Incomplete));
        assert_eq!(parse(b"$6\r\nfoo"), Err(Error::Incomplete));
        assert_eq!(parse(b"$6\r\nfoobar"), Err(Error::Incomplete));
        assert_eq!(parse(b"*2\r\n$3\r\nfoo\r\n"), Err(Error::Incomplete));
    }

    #[test]
    fn parse_unknown_data_type() {
        assert_eq!(parse(b"hello\r\n"), Err(Error::InvalidDataType('h')));
    }

    #[test]
    fn parse_array_frame_empty() {
        assert_eq!(parse(b"*0\r\n"), Ok(Frame::Array(vec![])));
    }

    #[test]
    fn parse_array_frame() {
        let frame = parse(b"*2\r\n$5\r\nhello\r\n$5\r\nworld\r\n");

        assert_eq!(
            frame,
            Ok(Frame::Array(vec![
                Frame::Bulk(Bytes::from("hello")),
                Frame::Bulk(Bytes::from("world")),
            ]))
        );
    }

    #[test]
    fn parse_array_frame_nested() {
        let frame = parse(b"*2\r\n*3\r\n:1\r\n:2\r\n:3\r\n*2\r\n+Hello\r\n-World\r\n");

        assert_eq!(
            frame,
            Ok(Frame::Array(vec![
                Frame::Array(vec![
                    Frame::Integer(1),
                    Frame::Integer(2),
                    Frame::Integer(3)
                ]),
                Frame::Array(vec![
                    Frame::Simple("Hello".to_string()),
                    Frame::Error("World".to_string())
                ]),
            ]))
        );
    }

    fn nested_arrays(depth: usize) -> Vec<u8> {
        let mut data = b"*1\r\n".repeat(depth);
        data.extend_from_slice(b":1\r\n");
        data
    }

    #[test]
    fn parse_array_frame_nested_up_to_the_limit() {
        let mut frame = parse(&nested_arrays(MAX_NESTING)).unwrap();

        for _ in 0..MAX_NESTING {
            frame = match frame {
                Frame::Array(mut frames) if frames.len() == 1 => frames.remove(0),
                frame => panic!("expected a single element array, got {:?}", frame),
            };
        }
        assert_eq!(frame, Frame::Integer(1));
    }

    #[test]
    fn parse_array_frame_nested_too_deep() {
        assert_eq!(
            parse(&nested_arrays(MAX_NESTING + 1)),
            Err(Error::Protocol("too many nested arrays".to_string()))
        );
        assert_eq!(
            parse(&nested_arrays(100_000)),
            Err(Error::Protocol("too many nested arrays".to_string()))
        );
    }

    #[test]
    fn parse_array_frame_null() {
        assert_eq!(parse(b"*-1\r\n"), Ok(Frame::NullArray));
    }

    #[test]
    fn parse_array_frame_null_in_the_middle() {
        let frame = parse(b"*3\r\n$5\r\nhello\r\n$-1\r\n$5\r\nworld\r\n");

        assert_eq!(
            frame,
            Ok(Frame::Array(vec![
                Frame::Bulk(Bytes::from("hello")),
                Frame::Null,
                Frame::Bulk(Bytes::from("world")),
            ]))
        );
    }

    #[test]
    fn parse_leaves_cursor_after_frame() {
        let data = b"+OK\r\n:1\r\n";
        let mut cursor = Cursor::new(&data[..]);

        assert_eq!(Frame::parse(&mut cursor), Ok(Frame::ok()));
        assert_eq!(cursor.position(), 5);
        assert_eq!(Frame::parse(&mut cursor), Ok(Frame::Integer(1)));
    }

    #[test]
    fn encode_frames() {
        assert_eq!(Frame::ok().serialize().unwrap(), b"+OK\r\n");
        assert_eq!(
            Frame::Error("ERR oops".to_string()).serialize().unwrap(),
            b"-ERR oops\r\n"
        );
        assert_eq!(Frame::Integer(-42).serialize().unwrap(), b":-42\r\n");
        assert_eq!(Frame::from("foo").serialize().unwrap(), b"$3\r\nfoo\r\n");
        assert_eq!(Frame::Bulk(Bytes::new()).serialize().unwrap(), b"$0\r\n\r\n");
        assert_eq!(Frame::Null.serialize().unwrap(), b"$-1\r\n");
        assert_eq!(Frame::Array(vec![]).serialize().unwrap(), b"*0\r\n");
        assert_eq!(Frame::NullArray.serialize().unwrap(), b"*-1\r\n");
    }

    #[test]
    fn encode_rejects_crlf_in_lines() {
        assert!(matches!(
            Frame::Simple("a\r\nb".to_string()).serialize(),
            Err(Error::Encode(_))
        ));
        assert!(matches!(
            Frame::Error("a\r\nb".to_string()).serialize(),
            Err(Error::Encode(_))
        ));

        let nested = Frame::Array(vec![Frame::ok(), Frame::Simple("x\r\n".to_string())]);
        let mut dst = BytesMut::new();
        assert!(nested.encode(&mut dst).is_err());
        assert!(dst.is_empty());
    }

    #[test]
    fn well_formed_input_is_reencoded_verbatim() {
        let inputs: [&[u8]; 6] = [
            b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nv\r\n\r\n\r\n",
            b"*2\r\n*0\r\n*-1\r\n",
            b"*4\r\n:1\r\n$-1\r\n$0\r\n\r\n-ERR x\r\n",
            b"+PONG\r\n",
            b":-9223372036854775808\r\n",
            b"$-1\r\n",
        ];

        for input in inputs {
            let frame = parse(input).unwrap();
            assert_eq!(frame.serialize().unwrap(), input);
        }
    }
}
