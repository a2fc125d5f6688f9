//! Shared protocol constants and header framing for fileup uploads
//!
//! Every file travels as one header followed by its raw body:
//!
//! ```text
//! | header_len: u64 LE | filename bytes | '?' | file_size: u64 LE | body ... |
//! ```
//!
//! `header_len` counts the whole header including its own 8 bytes.

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::borrow::Cow;
use thiserror::Error;

// Width of the header length and file size fields
pub const LEN_FIELD: usize = 8;
pub const SIZE_FIELD: usize = 8;

// Separator between the filename and the file size
pub const SEPARATOR: u8 = b'?';

// Smallest header that can carry a one-byte filename
pub const MIN_HEADER_LEN: u64 = (LEN_FIELD + 1 + 1 + SIZE_FIELD) as u64;

// Filenames are capped at PATH_MAX
pub const MAX_NAME_LEN: usize = 4096;
pub const MAX_HEADER_LEN: u64 = (LEN_FIELD + MAX_NAME_LEN + 1 + SIZE_FIELD) as u64;

// Sent back on the same connection once a body has been fully stored
pub const ACK: &[u8] = b"recv file complete!\r\n";

// Random suffix inserted before the extension of every stored file
pub const TOKEN_LEN: usize = 8;

// Default per-read buffer on the server (512 KiB)
pub const RECV_BUFFER_SIZE: usize = 512 * 1024;

// Client body chunk size
pub const SEND_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("header length {0} outside [{min}, {max}]", min = MIN_HEADER_LEN, max = MAX_HEADER_LEN)]
    HeaderLength(u64),
    #[error("header separator '?' missing")]
    MissingSeparator,
    #[error("filename {0:?} has no usable final component")]
    BadFilename(String),
    #[error("filename is {0} bytes, limit is {max}", max = MAX_NAME_LEN)]
    NameTooLong(usize),
}

/// Decoded header of one file transfer. The name is kept as the raw bytes sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub name: Vec<u8>,
    pub size: u64,
}

impl FileHeader {
    pub fn new(name: impl Into<Vec<u8>>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }

    /// Name for logs; bytes that are not UTF-8 are replaced
    pub fn display_name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }

    /// Total encoded length, including the length field itself
    pub fn encoded_len(&self) -> usize {
        LEN_FIELD + self.name.len() + 1 + SIZE_FIELD
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        if self.name.is_empty() {
            return Err(ProtocolError::BadFilename(String::new()));
        }
        if self.name.len() > MAX_NAME_LEN {
            return Err(ProtocolError::NameTooLong(self.name.len()));
        }
        let len = self.encoded_len();
        let mut buf = Vec::with_capacity(len);
        buf.extend_from_slice(&(len as u64).to_le_bytes());
        buf.extend_from_slice(&self.name);
        buf.push(SEPARATOR);
        buf.extend_from_slice(&self.size.to_le_bytes());
        Ok(buf)
    }

    /// Decode a complete header; `bytes.len()` must equal the declared header length
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let len = bytes.len();
        if (len as u64) < MIN_HEADER_LEN || (len as u64) > MAX_HEADER_LEN {
            return Err(ProtocolError::HeaderLength(len as u64));
        }
        let sep = len - SIZE_FIELD - 1;
        if bytes[sep] != SEPARATOR {
            return Err(ProtocolError::MissingSeparator);
        }
        let name = bytes[LEN_FIELD..sep].to_vec();
        let mut size = [0u8; SIZE_FIELD];
        size.copy_from_slice(&bytes[sep + 1..]);
        Ok(Self {
            name,
            size: u64::from_le_bytes(size),
        })
    }
}

/// Accumulates header bytes across reads until a full header is available
#[derive(Debug, Default)]
pub struct HeaderAssembler {
    buf: Vec<u8>,
}

impl HeaderAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes buffered so far for the header in progress
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Header length once the length field has arrived
    fn expected_len(&self) -> Result<Option<usize>, ProtocolError> {
        if self.buf.len() < LEN_FIELD {
            return Ok(None);
        }
        let mut raw = [0u8; LEN_FIELD];
        raw.copy_from_slice(&self.buf[..LEN_FIELD]);
        let len = u64::from_le_bytes(raw);
        if !(MIN_HEADER_LEN..=MAX_HEADER_LEN).contains(&len) {
            return Err(ProtocolError::HeaderLength(len));
        }
        Ok(Some(len as usize))
    }

    /// Feed bytes from one read. Returns the decoded header and how many bytes of
    /// `data` it consumed, or `None` when every byte was buffered and more are needed.
    pub fn feed(&mut self, data: &[u8]) -> Result<Option<(FileHeader, usize)>, ProtocolError> {
        let mut used = 0;
        loop {
            let want = self.expected_len()?.unwrap_or(LEN_FIELD);
            if self.buf.len() < want {
                let take = (want - self.buf.len()).min(data.len() - used);
                self.buf.extend_from_slice(&data[used..used + take]);
                used += take;
                if self.buf.len() < want {
                    return Ok(None);
                }
                continue;
            }
            let header = FileHeader::decode(&self.buf);
            self.buf.clear();
            return header.map(|h| Some((h, used)));
        }
    }
}

/// Final path component of a received filename; senders may include directories.
/// Works on the raw bytes so names that are not UTF-8 are stored unchanged.
pub fn sanitize_name(name: &[u8]) -> Result<&[u8], ProtocolError> {
    let bad = || ProtocolError::BadFilename(String::from_utf8_lossy(name).into_owned());
    let end = name.iter().rposition(|&b| b != b'/').ok_or_else(bad)? + 1;
    let trimmed = &name[..end];
    let start = trimmed
        .iter()
        .rposition(|&b| b == b'/')
        .map_or(0, |i| i + 1);
    let last = &trimmed[start..];
    if last == b"." || last == b".." || last.contains(&0) {
        return Err(bad());
    }
    Ok(last)
}

/// `TOKEN_LEN` characters drawn uniformly from `[a-zA-Z0-9]`
pub fn random_token<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..TOKEN_LEN)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect()
}

/// `<stem>-<token><ext>`, split at the last `.`; without a `.` the token is appended
pub fn stored_name(name: &[u8], token: &str) -> Vec<u8> {
    let dot = name.iter().rposition(|&b| b == b'.').unwrap_or(name.len());
    let mut out = Vec::with_capacity(name.len() + 1 + token.len());
    out.extend_from_slice(&name[..dot]);
    out.push(b'-');
    out.extend_from_slice(token.as_bytes());
    out.extend_from_slice(&name[dot..]);
    out
}
