//! SMD container header: the fixed 512-byte preamble in front of the payload.
//!
//! # Layout
//!
//! | Offset | Len   | Field         | Expected          |
//! |--------|-------|---------------|-------------------|
//! | 0x000  | 1     | `block_count` | any               |
//! | 0x001  | 1     | marker        | `0x03`            |
//! | 0x002  | 1     | `role`        | `0x00` / `0x40`   |
//! | 0x003  | 5     | zero fill A   | `0x00`            |
//! | 0x008  | 1     | signature     | `0xAA`            |
//! | 0x009  | 1     | signature     | `0xBB`            |
//! | 0x00A  | 1     | signature     | `0x06`            |
//! | 0x00B  | 0x1F5 | zero fill B   | `0x00`            |
//!
//! Every field is a single byte, so fields are decoded by explicit offset
//! from a plain byte buffer.  No struct overlay, no endianness.

use byteorder::WriteBytesExt;
use std::fmt;
use std::io::{self, Read, Write};
use std::ops::Range;
use thiserror::Error;
use tracing::debug;

use crate::block::BLOCK_SIZE;
use crate::io_stream::read_full;

pub const HEADER_SIZE: usize = 0x200;

pub const OFFSET_BLOCK_COUNT: usize = 0x000;
pub const OFFSET_MARKER:      usize = 0x001;
pub const OFFSET_ROLE:        usize = 0x002;

/// Expected value of the byte at [`OFFSET_MARKER`].
pub const MARKER: u8 = 0x03;

/// `(offset, expected)` for each signature byte.
pub const SIGNATURE: [(usize, u8); 3] = [(0x008, 0xAA), (0x009, 0xBB), (0x00A, 0x06)];

pub const ZERO_FILL_A: Range<usize> = 0x003..0x008;
pub const ZERO_FILL_B: Range<usize> = 0x00B..HEADER_SIZE;

pub const ROLE_SINGLE_OR_LAST: u8 = 0x00;
pub const ROLE_SPLIT_NON_LAST: u8 = 0x40;

// ── Strictness ───────────────────────────────────────────────────────────────

/// Whether soft anomalies (signature mismatch, dirty reserved bytes, trailing
/// data) are reported as warnings or rejected as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    #[default]
    Lenient,
    Strict,
}

impl Strictness {
    pub fn is_strict(self) -> bool {
        self == Strictness::Strict
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Short header: got {got} of 512 bytes")]
    ShortHeader { got: usize },
    #[error("Invalid role byte {0:#04x} (expected 0x00 or 0x40)")]
    InvalidRole(u8),
    #[error("Bad signature at offset {offset:#05x}: expected {expected:#04x}, found {found:#04x}")]
    BadSignature { offset: usize, expected: u8, found: u8 },
    #[error("Reserved byte at offset {offset:#05x} is {value:#04x}, expected zero")]
    ZeroFillViolation { offset: usize, value: u8 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A soft irregularity found while decoding a header.
///
/// In strict mode the first anomaly is promoted to a [`HeaderError`]; in
/// lenient mode the descriptor carries them for the caller to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderAnomaly {
    BadSignature { offset: usize, expected: u8, found: u8 },
    /// Only the first non-zero byte of each reserved region is reported.
    ZeroFillViolation { offset: usize, value: u8 },
}

impl fmt::Display for HeaderAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HeaderAnomaly::BadSignature { offset, expected, found } => write!(
                f, "signature byte at {offset:#05x} is {found:#04x}, expected {expected:#04x}"
            ),
            HeaderAnomaly::ZeroFillViolation { offset, value } => write!(
                f, "reserved header byte at {offset:#05x} is {value:#04x}, expected zero"
            ),
        }
    }
}

impl From<HeaderAnomaly> for HeaderError {
    fn from(a: HeaderAnomaly) -> Self {
        match a {
            HeaderAnomaly::BadSignature { offset, expected, found } =>
                HeaderError::BadSignature { offset, expected, found },
            HeaderAnomaly::ZeroFillViolation { offset, value } =>
                HeaderError::ZeroFillViolation { offset, value },
        }
    }
}

// ── Role ─────────────────────────────────────────────────────────────────────

/// Position of this file within a (possibly multi-part) dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// `0x00`: a standalone file, or the final part of a split dump.
    SingleOrLast,
    /// `0x40`: a non-final part of a split dump.
    SplitNonLast,
    /// Any other role byte.  Never present in a descriptor returned by
    /// [`decode_header`].
    Invalid(u8),
}

impl Role {
    pub fn from_byte(b: u8) -> Self {
        match b {
            ROLE_SINGLE_OR_LAST => Role::SingleOrLast,
            ROLE_SPLIT_NON_LAST => Role::SplitNonLast,
            other               => Role::Invalid(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Role::SingleOrLast => ROLE_SINGLE_OR_LAST,
            Role::SplitNonLast => ROLE_SPLIT_NON_LAST,
            Role::Invalid(b)   => b,
        }
    }

    /// Human-readable description (diagnostics only).
    pub fn describe(self) -> &'static str {
        match self {
            Role::SingleOrLast => "single/last file",
            Role::SplitNonLast => "split file",
            Role::Invalid(_)   => "invalid role",
        }
    }
}

// ── Descriptor ───────────────────────────────────────────────────────────────

/// Decoded container descriptor.  Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmdHeader {
    pub block_count:  u8,
    pub role:         Role,
    /// Raw byte at offset 1.  Carried for diagnostics, never validated.
    pub marker:       u8,
    pub signature_ok: bool,
    pub zero_fill_ok: bool,
    /// Soft irregularities tolerated in lenient mode, in offset order.
    pub anomalies:    Vec<HeaderAnomaly>,
}

impl SmdHeader {
    /// A well-formed header for `block_count` blocks.
    pub fn new(block_count: u8, role: Role) -> Self {
        Self {
            block_count,
            role,
            marker:       MARKER,
            signature_ok: true,
            zero_fill_ok: true,
            anomalies:    Vec::new(),
        }
    }

    /// Payload size promised by the header, in bytes.
    pub fn payload_size(&self) -> u64 {
        u64::from(self.block_count) * BLOCK_SIZE as u64
    }

    /// Classify a raw 512-byte header.
    ///
    /// Fails only on an invalid role; soft anomalies are collected into
    /// `anomalies` regardless of strictness.
    pub fn parse(buf: &[u8; HEADER_SIZE]) -> Result<Self, HeaderError> {
        let role = Role::from_byte(buf[OFFSET_ROLE]);
        if let Role::Invalid(b) = role {
            return Err(HeaderError::InvalidRole(b));
        }

        let mut anomalies = Vec::new();
        for &(offset, expected) in &SIGNATURE {
            let found = buf[offset];
            if found != expected {
                anomalies.push(HeaderAnomaly::BadSignature { offset, expected, found });
            }
        }
        let signature_ok = anomalies.is_empty();
        let signature_count = anomalies.len();

        for region in [ZERO_FILL_A, ZERO_FILL_B] {
            let start = region.start;
            if let Some(i) = buf[region].iter().position(|&b| b != 0) {
                anomalies.push(HeaderAnomaly::ZeroFillViolation {
                    offset: start + i,
                    value:  buf[start + i],
                });
            }
        }
        let zero_fill_ok = anomalies.len() == signature_count;

        Ok(Self {
            block_count: buf[OFFSET_BLOCK_COUNT],
            role,
            marker: buf[OFFSET_MARKER],
            signature_ok,
            zero_fill_ok,
            anomalies,
        })
    }

    /// Read and decode a header from `reader`.  See [`decode_header`].
    pub fn read<R: Read>(reader: R, strictness: Strictness) -> Result<Self, HeaderError> {
        decode_header(reader, strictness)
    }

    /// Serialize as a canonical header: correct signature, zeroed reserved
    /// regions, and this descriptor's block count, role and marker.
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u8(self.block_count)?;
        writer.write_u8(self.marker)?;
        writer.write_u8(self.role.to_byte())?;
        writer.write_all(&[0u8; 5])?;
        for &(_, expected) in &SIGNATURE {
            writer.write_u8(expected)?;
        }
        writer.write_all(&[0u8; HEADER_SIZE - ZERO_FILL_B.start])?;
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[OFFSET_BLOCK_COUNT] = self.block_count;
        buf[OFFSET_MARKER]      = self.marker;
        buf[OFFSET_ROLE]        = self.role.to_byte();
        for &(offset, expected) in &SIGNATURE {
            buf[offset] = expected;
        }
        buf
    }
}

/// Read exactly [`HEADER_SIZE`] bytes from `reader` and decode them.
///
/// On success the reader has advanced by exactly 512 bytes.  On failure the
/// reader position is unspecified and the stream should be discarded.
///
/// In strict mode the first soft anomaly (signature before zero fill, lower
/// offset first) fails the decode.  An invalid role always fails.
pub fn decode_header<R: Read>(mut reader: R, strictness: Strictness) -> Result<SmdHeader, HeaderError> {
    let mut buf = [0u8; HEADER_SIZE];
    let got = read_full(&mut reader, &mut buf)?;
    if got < HEADER_SIZE {
        return Err(HeaderError::ShortHeader { got });
    }

    let header = SmdHeader::parse(&buf)?;
    if strictness.is_strict() {
        if let Some(&first) = header.anomalies.first() {
            return Err(first.into());
        }
    }

    debug!(
        "SMD header [{}]: {} block(s), {}, signature {}",
        hex::encode(&buf[..ZERO_FILL_B.start]),
        header.block_count,
        header.role.describe(),
        if header.signature_ok { "ok" } else { "mismatch" },
    );
    Ok(header)
}
