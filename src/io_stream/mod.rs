//! Streaming SMD → raw conversion.
//!
//! # Reader
//! [`SmdReader`] consumes the 512-byte header up front, then yields one
//! linearised 16 KiB block per call to [`SmdReader::next_block`].  It owns a
//! single input/output buffer pair for its whole lifetime, so memory use is
//! constant regardless of the block count.
//!
//! # Driver
//! [`process`] pumps an input stream through an [`SmdReader`] into an output
//! stream.  Block `i` is fully written before block `i + 1` is read.  Writes
//! already handed to the sink are never rolled back on failure; cleaning up a
//! partial output is the caller's job (see [`crate::convert`]).
//!
//! # Strictness
//! In lenient mode, header anomalies and trailing bytes become [`Warning`]s
//! delivered to the caller's callback.  In strict mode they are errors.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{trace, warn};

use crate::block::{deinterleave_into, Block, BLOCK_SIZE};
use crate::header::{decode_header, HeaderAnomaly, HeaderError, SmdHeader, Strictness};

// ── Options ──────────────────────────────────────────────────────────────────

/// Per-call configuration for [`process`].
#[derive(Debug, Clone)]
pub struct Options {
    pub strictness:     Strictness,
    /// Drain the input after the last block to detect trailing data.
    pub check_trailing: bool,
    /// Cooperative cancellation flag, checked before each block.
    pub cancel:         Option<Arc<AtomicBool>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            strictness:     Strictness::Lenient,
            check_trailing: true,
            cancel:         None,
        }
    }
}

impl Options {
    pub fn lenient() -> Self {
        Self::default()
    }

    pub fn strict() -> Self {
        Self { strictness: Strictness::Strict, ..Self::default() }
    }

    pub fn with_trailing_check(mut self, enabled: bool) -> Self {
        self.check_trailing = enabled;
        self
    }

    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|f| f.load(Ordering::Relaxed))
    }
}

// ── Warnings ─────────────────────────────────────────────────────────────────

/// A soft anomaly tolerated in lenient mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Warning {
    Header(HeaderAnomaly),
    TrailingData { bytes: u64 },
}

impl From<HeaderAnomaly> for Warning {
    fn from(a: HeaderAnomaly) -> Self {
        Warning::Header(a)
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::Header(a) => a.fmt(f),
            Warning::TrailingData { bytes } => write!(
                f, "{bytes} byte(s) of trailing data after the last block"
            ),
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Broad class of a [`ConvertError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Header could not be accepted.
    Structural,
    /// Payload length disagrees with the header.
    Payload,
    /// The input or output stream reported a fault.
    Io,
    Cancelled,
}

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Header error: {0}")]
    Header(#[from] HeaderError),
    #[error("Truncated payload: block {block_index} has {got} of {want} bytes")]
    TruncatedPayload { block_index: usize, got: usize, want: usize },
    #[error("Trailing data: {bytes} byte(s) after the last block")]
    TrailingData { bytes: u64 },
    #[error("Input read failed at block {block_index}: {source}")]
    InputRead { block_index: usize, source: io::Error },
    #[error("Output write failed at block {block_index}: {source}")]
    OutputWrite { block_index: usize, source: io::Error },
    #[error("Cancelled before block {block_index}")]
    Cancelled { block_index: usize },
}

impl ConvertError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ConvertError::Header(HeaderError::Io(_))      => ErrorCategory::Io,
            ConvertError::Header(_)                       => ErrorCategory::Structural,
            ConvertError::TruncatedPayload { .. }
            | ConvertError::TrailingData { .. }           => ErrorCategory::Payload,
            ConvertError::InputRead { .. }
            | ConvertError::OutputWrite { .. }            => ErrorCategory::Io,
            ConvertError::Cancelled { .. }                => ErrorCategory::Cancelled,
        }
    }
}

// ── Report ───────────────────────────────────────────────────────────────────

/// Outcome of a successful [`process`] call.
#[derive(Debug, Clone)]
pub struct ConvertReport {
    pub header:         SmdHeader,
    pub blocks_written: usize,
    pub bytes_written:  u64,
    /// Every warning delivered to the callback, in order.
    pub warnings:       Vec<Warning>,
}

impl ConvertReport {
    /// Summary line for display.
    pub fn summary(&self) -> String {
        format!(
            "{} block(s), {}, {} bytes written, {} warning(s)",
            self.blocks_written,
            self.header.role.describe(),
            self.bytes_written,
            self.warnings.len(),
        )
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct SmdReader<R: Read> {
    reader:     R,
    pub header: SmdHeader,
    options:    Options,
    next_index: usize,
    in_buf:     Box<Block>,
    out_buf:    Box<Block>,
}

impl<R: Read> SmdReader<R> {
    /// Decode the header.  No payload bytes are read.
    pub fn new(mut reader: R, options: Options) -> Result<Self, ConvertError> {
        let header = decode_header(&mut reader, options.strictness)?;
        Ok(Self {
            reader,
            header,
            options,
            next_index: 0,
            in_buf:     Box::new([0u8; BLOCK_SIZE]),
            out_buf:    Box::new([0u8; BLOCK_SIZE]),
        })
    }

    pub fn block_count(&self) -> usize {
        usize::from(self.header.block_count)
    }

    pub fn blocks_remaining(&self) -> usize {
        self.block_count() - self.next_index
    }

    /// Read, de-interleave and return the next block, or `None` once
    /// `block_count` blocks have been produced.
    pub fn next_block(&mut self) -> Result<Option<&Block>, ConvertError> {
        let block_index = self.next_index;
        if block_index >= self.block_count() {
            return Ok(None);
        }
        if self.options.cancelled() {
            return Err(ConvertError::Cancelled { block_index });
        }

        let got = read_full(&mut self.reader, &mut self.in_buf[..])
            .map_err(|source| ConvertError::InputRead { block_index, source })?;
        if got < BLOCK_SIZE {
            return Err(ConvertError::TruncatedPayload { block_index, got, want: BLOCK_SIZE });
        }

        deinterleave_into(&self.in_buf, &mut self.out_buf);
        self.next_index += 1;
        trace!("block {}/{} de-interleaved", self.next_index, self.block_count());
        Ok(Some(&*self.out_buf))
    }

    /// Read the input to EOF and return how many bytes were left over.
    pub fn drain_trailing(&mut self) -> Result<u64, ConvertError> {
        let block_index = self.next_index;
        let mut total = 0u64;
        loop {
            match self.reader.read(&mut self.in_buf[..]) {
                Ok(0) => return Ok(total),
                Ok(n) => total += n as u64,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => return Err(ConvertError::InputRead { block_index, source }),
            }
        }
    }
}

// ── Driver ───────────────────────────────────────────────────────────────────

/// Convert one SMD stream to its raw ROM image.
///
/// `on_warning` receives each lenient-mode anomaly as it is found.  The same
/// warnings are returned in the report.
pub fn process<R, W, F>(
    input:          R,
    mut output:     W,
    options:        &Options,
    mut on_warning: F,
) -> Result<ConvertReport, ConvertError>
where
    R: Read,
    W: Write,
    F: FnMut(&Warning),
{
    let mut warnings = Vec::new();
    let mut emit = |w: Warning| {
        on_warning(&w);
        warnings.push(w);
    };

    let mut reader = SmdReader::new(input, options.clone())?;
    for &a in &reader.header.anomalies {
        emit(a.into());
    }

    let mut blocks_written = 0usize;
    while let Some(block) = reader.next_block()? {
        output
            .write_all(block)
            .map_err(|source| ConvertError::OutputWrite { block_index: blocks_written, source })?;
        blocks_written += 1;
    }

    if options.check_trailing {
        let bytes = reader.drain_trailing()?;
        if bytes > 0 {
            if options.strictness.is_strict() {
                return Err(ConvertError::TrailingData { bytes });
            }
            emit(Warning::TrailingData { bytes });
        }
    }

    Ok(ConvertReport {
        header: reader.header,
        blocks_written,
        bytes_written: (blocks_written * BLOCK_SIZE) as u64,
        warnings,
    })
}

/// [`process`] with warnings forwarded to `tracing::warn!`.
pub fn process_logged<R: Read, W: Write>(
    input:   R,
    output:  W,
    options: &Options,
) -> Result<ConvertReport, ConvertError> {
    process(input, output, options, |w| warn!("{w}"))
}

/// Fill `buf` from `reader`, stopping early only at EOF.  Returns the number
/// of bytes read.  `Interrupted` is retried.
pub(crate) fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
