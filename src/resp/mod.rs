use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::str;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum RespType {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Option<Bytes>),
    Array(Option<Vec<RespType>>),
    Map(Vec<(RespType, RespType)>),
}

/// Deepest array/map nesting accepted in a single frame.
pub const MAX_DEPTH: usize = 32;

/// Smallest encoding of any frame (`+\r\n`).
const MIN_FRAME_LEN: usize = 3;

/// Outcome of decoding from the front of a buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Frame(RespType),
    /// No complete frame yet; none can exist before the buffer holds at
    /// least `needed` bytes.
    Incomplete { needed: usize },
}

#[derive(Error, Debug)]
pub enum RespError {
    #[error("invalid frame type byte {0:#04x}")]
    InvalidType(u8),
    #[error("invalid integer {0:?}")]
    InvalidInteger(String),
    #[error("invalid length {0}")]
    InvalidLength(i64),
    #[error("bulk string is not terminated by CRLF")]
    MissingTerminator,
    #[error("empty inline command")]
    EmptyInline,
    #[error("frame nested deeper than {} levels", MAX_DEPTH)]
    TooDeep,
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

impl RespType {
    /// Parses one frame from the front of `input`.
    ///
    /// Returns `Ok(None)` without consuming anything when the buffer does not
    /// yet hold a complete frame.
    pub fn parse(input: &mut BytesMut) -> Result<Option<RespType>, RespError> {
        match RespType::decode(input)? {
            Decoded::Frame(frame) => Ok(Some(frame)),
            Decoded::Incomplete { .. } => Ok(None),
        }
    }

    /// Like [`RespType::parse`], but reports how many bytes the buffer must
    /// hold before another attempt can succeed.
    pub fn decode(input: &mut BytesMut) -> Result<Decoded, RespError> {
        match parse_value(input, 0, 0)? {
            Step::Done(value, consumed) => {
                input.advance(consumed);
                Ok(Decoded::Frame(value))
            }
            Step::Incomplete(needed) => Ok(Decoded::Incomplete { needed }),
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            RespType::SimpleString(s) => {
                dst.put_u8(b'+');
                dst.put_slice(s.as_bytes());
                dst.put_slice(b"\r\n");
            }
            RespType::Error(msg) => {
                dst.put_u8(b'-');
                dst.put_slice(msg.as_bytes());
                dst.put_slice(b"\r\n");
            }
            RespType::Integer(n) => put_header(dst, b':', *n),
            RespType::BulkString(None) => dst.put_slice(b"$-1\r\n"),
            RespType::BulkString(Some(data)) => {
                put_header(dst, b'$', data.len() as i64);
                dst.put_slice(data);
                dst.put_slice(b"\r\n");
            }
            RespType::Array(None) => dst.put_slice(b"*-1\r\n"),
            RespType::Array(Some(arr)) => {
                put_header(dst, b'*', arr.len() as i64);
                for item in arr {
                    item.encode(dst);
                }
            }
            RespType::Map(pairs) => {
                put_header(dst, b'%', pairs.len() as i64);
                for (key, value) in pairs {
                    key.encode(dst);
                    value.encode(dst);
                }
            }
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.to_vec()
    }

    pub fn ok() -> RespType {
        RespType::SimpleString("OK".to_string())
    }

    pub fn bulk(data: impl Into<Bytes>) -> RespType {
        RespType::BulkString(Some(data.into()))
    }

    /// Builds a map reply whose keys and values are simple strings.
    pub fn string_map<K, V, I>(pairs: I) -> RespType
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        RespType::Map(
            pairs
                .into_iter()
                .map(|(k, v)| {
                    (
                        RespType::SimpleString(k.into()),
                        RespType::SimpleString(v.into()),
                    )
                })
                .collect(),
        )
    }

    /// Builds a request frame: an array of bulk strings.
    pub fn command<I, T>(args: I) -> RespType
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        RespType::Array(Some(
            args.into_iter()
                .map(|arg| RespType::bulk(Bytes::copy_from_slice(arg.as_ref())))
                .collect(),
        ))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            RespType::SimpleString(_) => "simple string",
            RespType::Error(_) => "error",
            RespType::Integer(_) => "integer",
            RespType::BulkString(_) => "bulk string",
            RespType::Array(_) => "array",
            RespType::Map(_) => "map",
        }
    }
}

enum Step {
    Done(RespType, usize),
    /// Minimum total buffer length before this frame could complete.
    Incomplete(usize),
}

type Parsed = Result<Step, RespError>;

/// `Incomplete` for a line starting at `pos` whose CRLF hasn't arrived yet.
fn need_line(input: &[u8], pos: usize) -> Step {
    Step::Incomplete(input.len().max(pos) + 1)
}

fn parse_value(input: &[u8], pos: usize, depth: usize) -> Parsed {
    if depth > MAX_DEPTH {
        return Err(RespError::TooDeep);
    }
    let Some(&type_byte) = input.get(pos) else {
        return Ok(Step::Incomplete(pos + 1));
    };

    match type_byte {
        b'+' => parse_simple_string(input, pos),
        b'-' => parse_error(input, pos),
        b':' => parse_integer(input, pos),
        b'$' => parse_bulk_string(input, pos),
        b'*' => parse_array(input, pos, depth),
        b'%' => parse_map(input, pos, depth),
        // Plain text commands (telnet, redis-cli without raw mode) only make
        // sense at the top level.
        _ if depth == 0 => parse_inline(input),
        other => Err(RespError::InvalidType(other)),
    }
}

fn parse_simple_string(input: &[u8], pos: usize) -> Parsed {
    let Some((line, next)) = read_line(input, pos + 1) else {
        return Ok(need_line(input, pos));
    };
    let line = str::from_utf8(line)?.to_string();
    Ok(Step::Done(RespType::SimpleString(line), next))
}

fn parse_error(input: &[u8], pos: usize) -> Parsed {
    let Some((line, next)) = read_line(input, pos + 1) else {
        return Ok(need_line(input, pos));
    };
    let line = str::from_utf8(line)?.to_string();
    Ok(Step::Done(RespType::Error(line), next))
}

fn parse_integer(input: &[u8], pos: usize) -> Parsed {
    let Some((line, next)) = read_line(input, pos + 1) else {
        return Ok(need_line(input, pos));
    };
    Ok(Step::Done(RespType::Integer(parse_decimal(line)?), next))
}

fn parse_bulk_string(input: &[u8], pos: usize) -> Parsed {
    let Some((line, start)) = read_line(input, pos + 1) else {
        return Ok(need_line(input, pos));
    };

    let len = match parse_length(line)? {
        Some(len) => len,
        None => return Ok(Step::Done(RespType::BulkString(None), start)),
    };

    let end = start
        .checked_add(len)
        .ok_or(RespError::InvalidLength(len as i64))?;
    if input.len() < end.saturating_add(2) {
        return Ok(Step::Incomplete(end.saturating_add(2)));
    }
    if &input[end..end + 2] != b"\r\n" {
        return Err(RespError::MissingTerminator);
    }

    let data = Bytes::copy_from_slice(&input[start..end]);
    Ok(Step::Done(RespType::BulkString(Some(data)), end + 2))
}

fn parse_array(input: &[u8], pos: usize, depth: usize) -> Parsed {
    let Some((line, mut next)) = read_line(input, pos + 1) else {
        return Ok(need_line(input, pos));
    };

    let len = match parse_length(line)? {
        Some(len) => len,
        None => return Ok(Step::Done(RespType::Array(None), next)),
    };

    // Length comes from the client; cap the preallocation.
    let mut elements = Vec::with_capacity(len.min(64));
    for i in 0..len {
        match parse_value(input, next, depth + 1)? {
            Step::Done(element, end) => {
                elements.push(element);
                next = end;
            }
            Step::Incomplete(needed) => {
                let rest = (len - i - 1).saturating_mul(MIN_FRAME_LEN);
                return Ok(Step::Incomplete(needed.saturating_add(rest)));
            }
        }
    }

    Ok(Step::Done(RespType::Array(Some(elements)), next))
}

fn parse_map(input: &[u8], pos: usize, depth: usize) -> Parsed {
    let Some((line, mut next)) = read_line(input, pos + 1) else {
        return Ok(need_line(input, pos));
    };

    let len = match parse_length(line)? {
        Some(len) => len,
        None => return Err(RespError::InvalidLength(-1)),
    };

    let mut pairs = Vec::with_capacity(len.min(64));
    for i in 0..len {
        let rest = (len - i - 1).saturating_mul(2 * MIN_FRAME_LEN);
        let (key, after_key) = match parse_value(input, next, depth + 1)? {
            Step::Done(key, end) => (key, end),
            Step::Incomplete(needed) => {
                let rest = rest.saturating_add(MIN_FRAME_LEN);
                return Ok(Step::Incomplete(needed.saturating_add(rest)));
            }
        };
        let (value, after_value) = match parse_value(input, after_key, depth + 1)? {
            Step::Done(value, end) => (value, end),
            Step::Incomplete(needed) => return Ok(Step::Incomplete(needed.saturating_add(rest))),
        };
        pairs.push((key, value));
        next = after_value;
    }

    Ok(Step::Done(RespType::Map(pairs), next))
}

fn parse_inline(input: &[u8]) -> Parsed {
    let Some((line, next)) = read_line(input, 0) else {
        return Ok(need_line(input, 0));
    };

    let line = str::from_utf8(line)?;
    let parts: Vec<RespType> = line
        .split_whitespace()
        .map(|part| RespType::bulk(Bytes::copy_from_slice(part.as_bytes())))
        .collect();
    if parts.is_empty() {
        return Err(RespError::EmptyInline);
    }

    Ok(Step::Done(RespType::Array(Some(parts)), next))
}

/// Returns the line starting at `pos` (without CRLF) and the position just
/// past its terminator.
fn read_line(input: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rest = input.get(pos..)?;
    find_crlf(rest).map(|end| (&rest[..end], pos + end + 2))
}

fn parse_decimal(line: &[u8]) -> Result<i64, RespError> {
    str::from_utf8(line)?
        .parse::<i64>()
        .map_err(|_| RespError::InvalidInteger(String::from_utf8_lossy(line).into_owned()))
}

/// Parses a length header; `-1` is the null marker and yields `None`.
fn parse_length(line: &[u8]) -> Result<Option<usize>, RespError> {
    match parse_decimal(line)? {
        -1 => Ok(None),
        len => usize::try_from(len)
            .map(Some)
            .map_err(|_| RespError::InvalidLength(len)),
    }
}

fn put_header(dst: &mut BytesMut, prefix: u8, n: i64) {
    dst.put_u8(prefix);
    dst.put_slice(n.to_string().as_bytes());
    dst.put_slice(b"\r\n");
}

fn find_crlf(input: &[u8]) -> Option<usize> {
    if input.len() < 2 {
        return None;
    }

    input.windows(2).position(|window| window == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(data: &[u8]) -> BytesMut {
        BytesMut::from(data)
    }

    #[test]
    fn parses_command_array() {
        let mut input = buf(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n");
        let frame = RespType::parse(&mut input).unwrap().unwrap();
        assert_eq!(frame, RespType::command(["SET", "foo", "bar"]));
        assert!(input.is_empty());
    }

    #[test]
    fn incomplete_frame_leaves_buffer_untouched() {
        let raw: &[u8] = b"*2\r\n$3\r\nGET\r\n$3\r\nfo";
        let mut input = buf(raw);
        assert!(RespType::parse(&mut input).unwrap().is_none());
        assert_eq!(&input[..], raw);

        input.extend_from_slice(b"o\r\n");
        let frame = RespType::parse(&mut input).unwrap().unwrap();
        assert_eq!(frame, RespType::command(["GET", "foo"]));
    }

    #[test]
    fn pipelined_frames_are_read_one_at_a_time() {
        let mut input = buf(b"*1\r\n$4\r\nPING\r\n+OK\r\n");
        assert_eq!(
            RespType::parse(&mut input).unwrap(),
            Some(RespType::command(["PING"]))
        );
        assert_eq!(RespType::parse(&mut input).unwrap(), Some(RespType::ok()));
        assert!(input.is_empty());
    }

    #[test]
    fn bulk_strings_are_binary_safe() {
        let mut input = buf(b"$4\r\n\x00\r\n\xff\r\n");
        let frame = RespType::parse(&mut input).unwrap().unwrap();
        assert_eq!(frame, RespType::bulk(&b"\x00\r\n\xff"[..]));
    }

    #[test]
    fn null_bulk_and_array() {
        let mut input = buf(b"$-1\r\n*-1\r\n");
        assert_eq!(
            RespType::parse(&mut input).unwrap(),
            Some(RespType::BulkString(None))
        );
        assert_eq!(
            RespType::parse(&mut input).unwrap(),
            Some(RespType::Array(None))
        );
    }

    #[test]
    fn inline_command_becomes_array() {
        let mut input = buf(b"GET  foo\r\n");
        let frame = RespType::parse(&mut input).unwrap().unwrap();
        assert_eq!(frame, RespType::command(["GET", "foo"]));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            RespType::parse(&mut buf(b"*1\r\n!oops\r\n")),
            Err(RespError::InvalidType(b'!'))
        ));
        assert!(matches!(
            RespType::parse(&mut buf(b"$x\r\n")),
            Err(RespError::InvalidInteger(_))
        ));
        assert!(matches!(
            RespType::parse(&mut buf(b"*-5\r\n")),
            Err(RespError::InvalidLength(-5))
        ));
        assert!(matches!(
            RespType::parse(&mut buf(b"$3\r\nfooXX")),
            Err(RespError::MissingTerminator)
        ));
        assert!(matches!(
            RespType::parse(&mut buf(b"   \r\n")),
            Err(RespError::EmptyInline)
        ));
    }

    #[test]
    fn nesting_is_bounded() {
        let mut allowed = BytesMut::from(&b"*1\r\n".repeat(MAX_DEPTH)[..]);
        allowed.extend_from_slice(b"+OK\r\n");
        assert!(RespType::parse(&mut allowed).unwrap().is_some());

        let mut too_deep = BytesMut::from(&b"*1\r\n".repeat(MAX_DEPTH + 1)[..]);
        too_deep.extend_from_slice(b"+OK\r\n");
        assert!(matches!(
            RespType::parse(&mut too_deep),
            Err(RespError::TooDeep)
        ));

        // Rejected before the rest of the frame has even arrived.
        let mut hostile = BytesMut::from(&b"*1\r\n".repeat(200_000)[..]);
        assert!(matches!(
            RespType::parse(&mut hostile),
            Err(RespError::TooDeep)
        ));
    }

    #[test]
    fn incomplete_frames_report_bytes_needed() {
        let mut input = buf(b"*3\r\n$3\r\nSET\r\n$3\r\nfo");
        assert_eq!(
            RespType::decode(&mut input).unwrap(),
            Decoded::Incomplete { needed: 25 }
        );
        assert_eq!(input.len(), 19);

        let mut input = buf(b"$100\r\nabc");
        assert_eq!(
            RespType::decode(&mut input).unwrap(),
            Decoded::Incomplete { needed: 108 }
        );

        let mut input = buf(b"+OK");
        assert_eq!(
            RespType::decode(&mut input).unwrap(),
            Decoded::Incomplete { needed: 4 }
        );
    }

    #[test]
    fn encodes_replies() {
        assert_eq!(RespType::ok().serialize(), b"+OK\r\n");
        assert_eq!(RespType::bulk("bar").serialize(), b"$3\r\nbar\r\n");
        assert_eq!(RespType::BulkString(None).serialize(), b"$-1\r\n");
        assert_eq!(
            RespType::string_map([("server", "redis")]).serialize(),
            b"%1\r\n+server\r\n+redis\r\n"
        );
    }

    #[test]
    fn map_survives_reparse() {
        let reply = RespType::string_map([("server", "redis"), ("version", "1")]);
        let mut input = BytesMut::new();
        reply.encode(&mut input);
        assert_eq!(RespType::parse(&mut input).unwrap(), Some(reply));
    }
}
