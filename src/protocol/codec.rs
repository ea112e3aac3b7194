//! Wire codec for metric sample datagrams.
//!
//! Layout, big-endian with no padding:
//!
//! | offset | size      | field                     |
//! |--------|-----------|---------------------------|
//! | 0      | 2         | aggregation kind tag (u16)|
//! | 2      | 4         | count (u32)               |
//! | 6      | remaining | metric name (raw bytes)   |
//!
//! Decoding borrows the name from the datagram so the ingest hot path only
//! allocates when a name is seen for the first time in a window.

use thiserror::Error;

use super::kind::AggregationKind;

/// Header size in bytes (kind tag + count).
pub const HEADER_LEN: usize = 6;

/// Hard upper bound on metric name length accepted by the codec.
pub const MAX_NAME_LEN: usize = 255;

/// Conventional collector port.
pub const DEFAULT_PORT: u16 = 1113;

/// One decoded metric sample. Ephemeral: consumed by the accumulator table
/// right after decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample<'a> {
    pub kind: AggregationKind,
    pub name: &'a [u8],
    pub count: u32,
}

/// Per-packet decode rejections. None of these are fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("packet too short: {size} bytes")]
    Truncated { size: usize },

    #[error("unknown aggregation kind tag: {tag}")]
    UnknownKind { tag: u16 },

    #[error("empty metric name")]
    EmptyName,

    #[error("metric name too long: {len} bytes (max {max})")]
    NameTooLong { len: usize, max: usize },
}

impl DecodeError {
    /// Stable label used for drop accounting.
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Truncated { .. } => "truncated",
            Self::UnknownKind { .. } => "unknown_kind",
            Self::EmptyName => "empty_name",
            Self::NameTooLong { .. } => "name_too_long",
        }
    }
}

/// Errors raised when building a packet on the client side.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("metric name must not be empty")]
    EmptyName,

    #[error("metric name too long: {len} bytes (max {MAX_NAME_LEN})")]
    NameTooLong { len: usize },
}

/// Decode one datagram payload into a [`Sample`].
///
/// `max_name_len` is the configured bound; it is clamped to [`MAX_NAME_LEN`].
pub fn decode(data: &[u8], max_name_len: usize) -> Result<Sample<'_>, DecodeError> {
    if data.len() < HEADER_LEN {
        return Err(DecodeError::Truncated { size: data.len() });
    }

    let tag = u16::from_be_bytes([data[0], data[1]]);
    let kind = AggregationKind::from_tag(tag).ok_or(DecodeError::UnknownKind { tag })?;
    let count = u32::from_be_bytes([data[2], data[3], data[4], data[5]]);

    let name = &data[HEADER_LEN..];
    if name.is_empty() {
        return Err(DecodeError::EmptyName);
    }

    let max = max_name_len.min(MAX_NAME_LEN);
    if name.len() > max {
        return Err(DecodeError::NameTooLong {
            len: name.len(),
            max,
        });
    }

    Ok(Sample { kind, name, count })
}

/// Encode a sample into its wire form. Exact inverse of [`decode`].
pub fn encode(kind: AggregationKind, name: &[u8], count: u32) -> Result<Vec<u8>, EncodeError> {
    if name.is_empty() {
        return Err(EncodeError::EmptyName);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EncodeError::NameTooLong { len: name.len() });
    }

    let mut buf = Vec::with_capacity(HEADER_LEN + name.len());
    buf.extend_from_slice(&kind.tag().to_be_bytes());
    buf.extend_from_slice(&count.to_be_bytes());
    buf.extend_from_slice(name);
    Ok(buf)
}
