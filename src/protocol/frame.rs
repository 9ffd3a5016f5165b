//! Frame encoding and decoding.
//!
//! A frame is one complete protocol message: a text header line followed by
//! length-prefixed entries and a blank terminator line:
//!
//! ```text
//! subs 1234567890\n
//! kv uri 14\n
//! scratch/topic!\n
//! ro 0.0.0.51:51 4\n
//! <4 raw bytes>\n
//! po 64.0.1.0: 11\n
//! <11 raw bytes>\n
//! \n
//! ```
//!
//! Every entry declares its content length; exactly that many raw bytes
//! follow the entry's header line, then a single `\n` delimiter. Entry
//! ordering is part of the wire contract and survives a round trip
//! bit-for-bit.

use std::fmt;

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use super::object::{ObjectType, PayloadObject, RoutingObject};
use crate::error::{BosswaveError, Result};

/// Upper bound on a single declared entry length (64 MB).
///
/// The router never emits entries anywhere near this large; a length above
/// it means a corrupt stream, and rejecting early avoids a huge allocation.
pub const MAX_ENTRY_LENGTH: usize = 64 * 1024 * 1024;

/// Protocol command mnemonics.
///
/// The four-character tokens are the compatibility surface with the router
/// and must match byte-for-byte. Commands the client never acts on (`list`,
/// `quer`) still decode, so router-originated control frames pass through
/// the dispatcher and get dropped instead of poisoning the read loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Router acknowledgment sent once after connecting.
    Hello,
    /// Publish a message to a URI.
    Publish,
    /// Publish with persistence.
    Persist,
    /// Open a standing subscription.
    Subscribe,
    /// List children of a URI.
    List,
    /// Query persisted messages.
    Query,
    /// Install the client's entity key.
    SetEntity,
    /// Terminal reply to a request.
    Response,
    /// One delivery on a standing subscription.
    Result,
}

impl Command {
    /// The wire mnemonic for this command.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Command::Hello => "helo",
            Command::Publish => "publ",
            Command::Persist => "pers",
            Command::Subscribe => "subs",
            Command::List => "list",
            Command::Query => "quer",
            Command::SetEntity => "sete",
            Command::Response => "resp",
            Command::Result => "rslt",
        }
    }

    /// Parse a wire mnemonic. Returns `None` for unknown tokens.
    pub fn from_mnemonic(token: &str) -> Option<Self> {
        match token {
            "helo" => Some(Command::Hello),
            "publ" => Some(Command::Publish),
            "pers" => Some(Command::Persist),
            "subs" => Some(Command::Subscribe),
            "list" => Some(Command::List),
            "quer" => Some(Command::Query),
            "sete" => Some(Command::SetEntity),
            "resp" => Some(Command::Response),
            "rslt" => Some(Command::Result),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Generate a caller-side sequence number for a new request.
///
/// Sequence numbers correlate a request with its asynchronous reply or
/// result stream; they carry no ordering meaning across requests.
pub fn generate_seq_no() -> u32 {
    rand::random()
}

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command mnemonic.
    pub command: Command,
    /// Correlation key chosen by the request issuer.
    pub seq_no: u32,
    /// Key-value header pairs, in wire order.
    pub kv_pairs: Vec<(String, Bytes)>,
    /// Routing objects, in wire order.
    pub routing_objects: Vec<RoutingObject>,
    /// Payload objects, in wire order.
    pub payload_objects: Vec<PayloadObject>,
}

impl Frame {
    /// Create an empty frame for a command and sequence number.
    pub fn new(command: Command, seq_no: u32) -> Self {
        Self {
            command,
            seq_no,
            kv_pairs: Vec::new(),
            routing_objects: Vec::new(),
            payload_objects: Vec::new(),
        }
    }

    /// Append a key-value header pair.
    pub fn push_kv(&mut self, key: impl Into<String>, value: impl Into<Bytes>) {
        self.kv_pairs.push((key.into(), value.into()));
    }

    /// Append a routing object.
    pub fn push_routing_object(&mut self, ro: RoutingObject) {
        self.routing_objects.push(ro);
    }

    /// Append a payload object.
    pub fn push_payload_object(&mut self, po: PayloadObject) {
        self.payload_objects.push(po);
    }

    /// First value for a header key, if any.
    pub fn first_value(&self, key: &str) -> Option<&Bytes> {
        self.kv_pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Serialize the frame to bytes.
    ///
    /// The output reproduces the supplied ordering of header pairs, routing
    /// objects, and payload objects exactly.
    pub fn encode(&self) -> Vec<u8> {
        let body_len: usize = self
            .kv_pairs
            .iter()
            .map(|(k, v)| k.len() + v.len() + 16)
            .sum::<usize>()
            + self
                .routing_objects
                .iter()
                .map(|ro| ro.content().len() + 32)
                .sum::<usize>()
            + self
                .payload_objects
                .iter()
                .map(|po| po.content().len() + 32)
                .sum::<usize>();
        let mut buf = Vec::with_capacity(body_len + 24);

        buf.extend_from_slice(
            format!("{} {}\n", self.command.mnemonic(), self.seq_no).as_bytes(),
        );
        for (key, value) in &self.kv_pairs {
            buf.extend_from_slice(format!("kv {} {}\n", key, value.len()).as_bytes());
            buf.extend_from_slice(value);
            buf.push(b'\n');
        }
        for ro in &self.routing_objects {
            buf.extend_from_slice(
                format!("ro {} {}\n", ro.object_type(), ro.content().len()).as_bytes(),
            );
            buf.extend_from_slice(ro.content());
            buf.push(b'\n');
        }
        for po in &self.payload_objects {
            buf.extend_from_slice(
                format!("po {} {}\n", po.object_type(), po.content().len()).as_bytes(),
            );
            buf.extend_from_slice(po.content());
            buf.push(b'\n');
        }
        buf.push(b'\n');
        buf
    }

    /// Read exactly one frame from a buffered stream.
    ///
    /// Never consumes bytes past the frame's terminator. A clean end of
    /// stream at a frame boundary is [`BosswaveError::ConnectionClosed`];
    /// any malformation (unknown mnemonic, non-numeric field, truncation,
    /// bad type descriptor) is [`BosswaveError::InvalidFrame`].
    pub async fn read_from<R>(reader: &mut R) -> Result<Frame>
    where
        R: AsyncBufRead + Unpin,
    {
        let header = match read_line(reader).await? {
            Some(line) => line,
            None => return Err(BosswaveError::ConnectionClosed),
        };

        let mut tokens = header.split(' ');
        let mnemonic = tokens.next().unwrap_or("");
        let command = Command::from_mnemonic(mnemonic).ok_or_else(|| {
            BosswaveError::InvalidFrame(format!("unknown command mnemonic: {:?}", mnemonic))
        })?;
        let seq_no = match (tokens.next(), tokens.next()) {
            (Some(seq), None) => seq.parse::<u32>().map_err(|_| {
                BosswaveError::InvalidFrame(format!("invalid sequence number: {:?}", seq))
            })?,
            _ => {
                return Err(BosswaveError::InvalidFrame(format!(
                    "malformed frame header: {:?}",
                    header
                )))
            }
        };

        let mut frame = Frame::new(command, seq_no);
        loop {
            let line = match read_line(reader).await? {
                Some(line) => line,
                None => {
                    return Err(BosswaveError::InvalidFrame(
                        "stream ended before frame terminator".to_string(),
                    ))
                }
            };
            if line.is_empty() {
                return Ok(frame);
            }

            let mut tokens = line.split(' ');
            let tag = tokens.next().unwrap_or("");
            let (middle, length) = match (tokens.next(), tokens.next(), tokens.next()) {
                (Some(middle), Some(len), None) => (middle, parse_length(len)?),
                _ => {
                    return Err(BosswaveError::InvalidFrame(format!(
                        "malformed entry header: {:?}",
                        line
                    )))
                }
            };
            let content = read_content(reader, length).await?;

            match tag {
                "kv" => frame.kv_pairs.push((middle.to_string(), content)),
                "ro" => {
                    let ty: ObjectType = middle.parse().map_err(invalid_type)?;
                    frame.routing_objects.push(RoutingObject::new(ty, content));
                }
                "po" => {
                    let ty: ObjectType = middle.parse().map_err(invalid_type)?;
                    frame.payload_objects.push(PayloadObject::new(ty, content));
                }
                _ => {
                    return Err(BosswaveError::InvalidFrame(format!(
                        "unknown entry tag: {:?}",
                        tag
                    )))
                }
            }
        }
    }
}

fn invalid_type(e: BosswaveError) -> BosswaveError {
    BosswaveError::InvalidFrame(e.to_string())
}

fn parse_length(token: &str) -> Result<usize> {
    let length = token.parse::<usize>().map_err(|_| {
        BosswaveError::InvalidFrame(format!("invalid entry length: {:?}", token))
    })?;
    if length > MAX_ENTRY_LENGTH {
        return Err(BosswaveError::InvalidFrame(format!(
            "entry length {} exceeds maximum {}",
            length, MAX_ENTRY_LENGTH
        )));
    }
    Ok(length)
}

/// Read one `\n`-terminated ASCII line, without the terminator.
///
/// Returns `None` on a clean end of stream before any byte of the line.
async fn read_line<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    let n = reader.read_until(b'\n', &mut raw).await?;
    if n == 0 {
        return Ok(None);
    }
    if raw.pop() != Some(b'\n') {
        return Err(BosswaveError::InvalidFrame(
            "stream ended mid-line".to_string(),
        ));
    }
    String::from_utf8(raw)
        .map(Some)
        .map_err(|_| BosswaveError::InvalidFrame("non-ASCII header line".to_string()))
}

/// Read exactly `length` content bytes plus the trailing delimiter.
async fn read_content<R>(reader: &mut R, length: usize) -> Result<Bytes>
where
    R: AsyncBufRead + Unpin,
{
    let mut content = vec![0u8; length];
    reader.read_exact(&mut content).await.map_err(truncated)?;
    let mut delim = [0u8; 1];
    reader.read_exact(&mut delim).await.map_err(truncated)?;
    if delim[0] != b'\n' {
        return Err(BosswaveError::InvalidFrame(
            "declared entry length does not match content".to_string(),
        ));
    }
    Ok(Bytes::from(content))
}

fn truncated(e: std::io::Error) -> BosswaveError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        BosswaveError::InvalidFrame("stream ended before declared bytes".to_string())
    } else {
        BosswaveError::Io(e)
    }
}
