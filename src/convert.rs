//! File-level conversion: the embedding surface for tools.
//!
//! ```no_run
//! use smd_deinterleave::convert::{convert_file, derived_output_path};
//! use smd_deinterleave::io_stream::Options;
//! use std::path::Path;
//!
//! let input  = Path::new("sonic.smd");
//! let output = derived_output_path(input);          // sonic.bin
//! let report = convert_file(input, &output, &Options::default())?;
//! println!("{}", report.summary());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! A file output is deleted if conversion fails part-way.  Stdout is never
//! rolled back.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info};

use crate::io_stream::{process_logged, ConvertError, ConvertReport, Options};

// ── Output selection ──────────────────────────────────────────────────────────

/// Where decoded ROM bytes go.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Output {
    /// Next to each input, see [`derived_output_path`].
    #[default]
    Derived,
    /// A single explicit file.  Only valid with one input.
    Path(PathBuf),
    /// Standard output; multiple inputs are written back to back.
    Stdout,
}

/// Configuration for [`convert_batch`].
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub output:  Output,
    /// Stop at the first failing input.
    pub fragile: bool,
}

/// `foo.smd` → `foo.bin`, `foo` → `foo.bin`, `foo.bin` → `foo.raw.bin`.
pub fn derived_output_path(input: &Path) -> PathBuf {
    let is_bin = input
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("bin"));
    if is_bin {
        input.with_extension("raw.bin")
    } else {
        input.with_extension("bin")
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum FileError {
    #[error("cannot open {}: {source}", .path.display())]
    OpenInput { path: PathBuf, source: io::Error },
    #[error("cannot create {}: {source}", .path.display())]
    CreateOutput { path: PathBuf, source: io::Error },
    #[error("input and output are the same file: {}", .0.display())]
    SameFile(PathBuf),
    #[error("output {} would overwrite input {}", .output.display(), .input.display())]
    OutputIsInput { output: PathBuf, input: PathBuf },
    #[error("inputs {} and {} both map to output {}", .first.display(), .second.display(), .output.display())]
    DuplicateOutput { output: PathBuf, first: PathBuf, second: PathBuf },
    #[error("an explicit output file takes exactly one input, got {0}")]
    OutputNeedsSingleInput(usize),
    #[error("flushing output failed: {0}")]
    Flush(io::Error),
    #[error(transparent)]
    Convert(#[from] ConvertError),
}

// ── Single stream ─────────────────────────────────────────────────────────────

/// Convert `reader` into `writer`, then flush `writer`.
pub fn convert_reader<R: Read, W: Write>(
    reader:  R,
    mut writer: W,
    options: &Options,
) -> Result<ConvertReport, FileError> {
    let report = process_logged(reader, &mut writer, options)?;
    writer.flush().map_err(FileError::Flush)?;
    Ok(report)
}

/// Convert the file at `input` into `writer`.
pub fn convert_to_writer<W: Write>(
    input:   &Path,
    writer:  W,
    options: &Options,
) -> Result<ConvertReport, FileError> {
    let file = open_input(input)?;
    convert_reader(file, writer, options)
}

/// Convert the file at `input` into a new file at `output`.
///
/// `output` is created (or truncated) only after `input` has been opened,
/// and is removed again if the conversion fails.
pub fn convert_file(input: &Path, output: &Path, options: &Options) -> Result<ConvertReport, FileError> {
    if same_file(input, output) {
        return Err(FileError::SameFile(output.to_owned()));
    }
    let file = open_input(input)?;
    let report = write_output_file(output, |w| convert_reader(file, w, options))?;
    debug!(
        "{}: {} block(s), {}, payload {} bytes",
        input.display(),
        report.header.block_count,
        report.header.role.describe(),
        report.header.payload_size(),
    );
    Ok(report)
}

/// Convert standard input to `output`.  [`Output::Derived`] has no input
/// name to derive from and falls back to stdout.
pub fn convert_stdin(output: &Output, options: &Options) -> Result<ConvertReport, FileError> {
    let stdin = io::stdin().lock();
    match output {
        Output::Path(path) => write_output_file(path, |w| convert_reader(stdin, w, options)),
        Output::Stdout | Output::Derived => convert_reader(stdin, io::stdout().lock(), options),
    }
}

// ── Batch ─────────────────────────────────────────────────────────────────────

/// Outcome of a multi-file run.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub converted: Vec<(PathBuf, ConvertReport)>,
    pub failed:    Vec<(PathBuf, FileError)>,
    /// Set when fragile mode stopped the batch early.
    pub aborted:   bool,
}

impl BatchSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Convert every input in order.
///
/// Per-file failures are collected in the summary; an `Err` is returned only
/// when the batch cannot start at all.
pub fn convert_batch(
    inputs:  &[PathBuf],
    batch:   &BatchOptions,
    options: &Options,
) -> Result<BatchSummary, FileError> {
    match &batch.output {
        Output::Derived => {
            check_derived_outputs(inputs)?;
            Ok(run_batch(inputs, batch.fragile, |input| {
                convert_file(input, &derived_output_path(input), options)
            }))
        }
        Output::Path(path) => {
            if inputs.len() != 1 {
                return Err(FileError::OutputNeedsSingleInput(inputs.len()));
            }
            Ok(run_batch(inputs, batch.fragile, |input| convert_file(input, path, options)))
        }
        Output::Stdout => Ok(convert_batch_into(inputs, io::stdout().lock(), batch.fragile, options)),
    }
}

/// Convert every input in order into a single shared writer.
pub fn convert_batch_into<W: Write>(
    inputs:  &[PathBuf],
    mut writer: W,
    fragile: bool,
    options: &Options,
) -> BatchSummary {
    run_batch(inputs, fragile, |input| convert_to_writer(input, &mut writer, options))
}

fn run_batch<F>(inputs: &[PathBuf], fragile: bool, mut convert_one: F) -> BatchSummary
where
    F: FnMut(&Path) -> Result<ConvertReport, FileError>,
{
    let mut summary = BatchSummary::default();
    for (i, input) in inputs.iter().enumerate() {
        match convert_one(input) {
            Ok(report) => {
                info!("{}: {}", input.display(), report.summary());
                summary.converted.push((input.clone(), report));
            }
            Err(e) => {
                error!("{}: {e}", input.display());
                summary.failed.push((input.clone(), e));
                if fragile && i + 1 < inputs.len() {
                    summary.aborted = true;
                    break;
                }
            }
        }
    }
    summary
}

// ── helpers ───────────────────────────────────────────────────────────────────

fn open_input(path: &Path) -> Result<File, FileError> {
    File::open(path).map_err(|source| FileError::OpenInput { path: path.to_owned(), source })
}

/// Reject a batch whose derived outputs would clobber one of its inputs or
/// each other.  Runs before any output is created.
fn check_derived_outputs(inputs: &[PathBuf]) -> Result<(), FileError> {
    let resolved_inputs: Vec<PathBuf> = inputs.iter().map(|p| resolve(p)).collect();
    let mut targets: HashMap<PathBuf, &PathBuf> = HashMap::with_capacity(inputs.len());

    for input in inputs {
        let output = derived_output_path(input);
        let resolved = resolve(&output);
        if let Some(pos) = resolved_inputs.iter().position(|p| *p == resolved) {
            return Err(FileError::OutputIsInput { output, input: inputs[pos].clone() });
        }
        if let Some(first) = targets.insert(resolved, input) {
            return Err(FileError::DuplicateOutput {
                output,
                first:  first.clone(),
                second: input.clone(),
            });
        }
    }
    Ok(())
}

/// Canonical form of `path`.  A path that does not exist yet is resolved
/// through its parent directory.
fn resolve(path: &Path) -> PathBuf {
    if let Ok(p) = fs::canonicalize(path) {
        return p;
    }
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    match (fs::canonicalize(parent), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_owned(),
    }
}

/// True when both paths exist and resolve to the same file.
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _              => false,
    }
}

/// Create `path`, hand a buffered writer to `f`, and delete the file again
/// if `f` fails.
fn write_output_file<F>(path: &Path, f: F) -> Result<ConvertReport, FileError>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<ConvertReport, FileError>,
{
    let file = File::create(path)
        .map_err(|source| FileError::CreateOutput { path: path.to_owned(), source })?;
    let mut writer = BufWriter::new(file);
    let result = f(&mut writer);
    drop(writer);

    if result.is_err() {
        match fs::remove_file(path) {
            Ok(())  => debug!("removed partial output {}", path.display()),
            Err(e)  => error!("could not remove partial output {}: {e}", path.display()),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BLOCK_SIZE, HALF_BLOCK};
    use crate::header::{HeaderAnomaly, Role, SmdHeader};
    use crate::io_stream::Warning;
    use tempfile::TempDir;

    fn smd_bytes(blocks: &[(u8, u8)]) -> Vec<u8> {
        let mut out = SmdHeader::new(blocks.len() as u8, Role::SingleOrLast).to_bytes().to_vec();
        for &(lo, hi) in blocks {
            out.extend(std::iter::repeat(lo).take(HALF_BLOCK));
            out.extend(std::iter::repeat(hi).take(HALF_BLOCK));
        }
        out
    }

    #[test]
    fn derived_paths() {
        assert_eq!(derived_output_path(Path::new("a/sonic.smd")), PathBuf::from("a/sonic.bin"));
        assert_eq!(derived_output_path(Path::new("sonic")), PathBuf::from("sonic.bin"));
        assert_eq!(derived_output_path(Path::new("rom.BIN")), PathBuf::from("rom.raw.bin"));
    }

    #[test]
    fn converts_file_to_file() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("game.smd");
        fs::write(&input, smd_bytes(&[(0xAA, 0xBB)])).unwrap();
        let output = derived_output_path(&input);

        let report = convert_file(&input, &output, &Options::strict()).unwrap();
        assert_eq!(report.blocks_written, 1);

        let data = fs::read(&output).unwrap();
        assert_eq!(data.len(), BLOCK_SIZE);
        assert!(data.chunks_exact(2).all(|p| p == [0xBB, 0xAA]));
    }

    #[test]
    fn failed_conversion_removes_partial_output() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("short.smd");
        let mut bytes = smd_bytes(&[(1, 2), (3, 4)]);
        bytes.truncate(bytes.len() - 100);
        fs::write(&input, bytes).unwrap();
        let output = dir.path().join("short.bin");

        let err = convert_file(&input, &output, &Options::default()).unwrap_err();
        assert!(matches!(
            err,
            FileError::Convert(ConvertError::TruncatedPayload { block_index: 1, .. })
        ));
        assert!(!output.exists());
    }

    #[test]
    fn missing_input_does_not_create_output() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.bin");
        let err = convert_file(&dir.path().join("nope.smd"), &output, &Options::default()).unwrap_err();
        assert!(matches!(err, FileError::OpenInput { .. }));
        assert!(!output.exists());
    }

    #[test]
    fn refuses_to_overwrite_input() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("game.smd");
        let bytes = smd_bytes(&[(0xAA, 0xBB)]);
        fs::write(&input, &bytes).unwrap();

        let err = convert_file(&input, &input, &Options::default()).unwrap_err();
        assert!(matches!(err, FileError::SameFile(_)));
        assert_eq!(fs::read(&input).unwrap(), bytes);
    }

    #[test]
    fn convert_reader_reports_warnings() {
        let mut bytes = smd_bytes(&[(0x01, 0x02)]);
        bytes[0x009] = 0x00;
        let mut out = Vec::new();
        let report = convert_reader(&bytes[..], &mut out, &Options::lenient()).unwrap();
        assert_eq!(report.warnings, vec![
            Warning::Header(HeaderAnomaly::BadSignature { offset: 0x009, expected: 0xBB, found: 0x00 }),
        ]);
        assert_eq!(out.len(), BLOCK_SIZE);
    }

    #[test]
    fn batch_continues_past_failures_by_default() {
        let dir = TempDir::new().unwrap();
        let good_a = dir.path().join("a.smd");
        let bad    = dir.path().join("b.smd");
        let good_c = dir.path().join("c.smd");
        fs::write(&good_a, smd_bytes(&[(1, 2)])).unwrap();
        fs::write(&bad, [0u8; 12]).unwrap();
        fs::write(&good_c, smd_bytes(&[(3, 4)])).unwrap();

        let inputs = vec![good_a, bad.clone(), good_c];
        let summary = convert_batch(&inputs, &BatchOptions::default(), &Options::default()).unwrap();
        assert_eq!(summary.converted.len(), 2);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, bad);
        assert!(!summary.aborted);
        assert!(!summary.is_success());
        assert!(dir.path().join("a.bin").exists());
        assert!(dir.path().join("c.bin").exists());
        assert!(!dir.path().join("b.bin").exists());
    }

    #[test]
    fn fragile_batch_stops_at_first_failure() {
        let dir = TempDir::new().unwrap();
        let bad  = dir.path().join("a.smd");
        let good = dir.path().join("b.smd");
        fs::write(&bad, [0u8; 12]).unwrap();
        fs::write(&good, smd_bytes(&[(1, 2)])).unwrap();

        let batch = BatchOptions { output: Output::Derived, fragile: true };
        let summary = convert_batch(&[bad, good], &batch, &Options::default()).unwrap();
        assert!(summary.aborted);
        assert!(summary.converted.is_empty());
        assert_eq!(summary.failed.len(), 1);
        assert!(!dir.path().join("b.bin").exists());
    }

    #[test]
    fn derived_output_never_overwrites_another_input() {
        let dir = TempDir::new().unwrap();
        let smd = dir.path().join("game.smd");
        let bin = dir.path().join("game.bin");
        fs::write(&smd, smd_bytes(&[(1, 2)])).unwrap();
        fs::write(&bin, b"keep me").unwrap();

        let err = convert_batch(&[smd, bin.clone()], &BatchOptions::default(), &Options::default())
            .unwrap_err();
        assert!(matches!(&err, FileError::OutputIsInput { input, .. } if *input == bin));
        assert_eq!(fs::read(&bin).unwrap(), b"keep me");
    }

    #[test]
    fn derived_outputs_must_be_distinct() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.smd");
        let b = dir.path().join("a.md");
        fs::write(&a, smd_bytes(&[(1, 2)])).unwrap();
        fs::write(&b, smd_bytes(&[(3, 4)])).unwrap();

        let err = convert_batch(&[a.clone(), b.clone()], &BatchOptions::default(), &Options::default())
            .unwrap_err();
        match err {
            FileError::DuplicateOutput { first, second, .. } => {
                assert_eq!(first, a);
                assert_eq!(second, b);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dir.path().join("a.bin").exists());
    }

    #[test]
    fn resolve_handles_missing_files() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("later.bin");
        assert_eq!(resolve(&missing), fs::canonicalize(dir.path()).unwrap().join("later.bin"));
    }

    #[test]
    fn explicit_output_requires_single_input() {
        let batch = BatchOptions { output: Output::Path(PathBuf::from("x.bin")), fragile: false };
        let inputs = vec![PathBuf::from("a.smd"), PathBuf::from("b.smd")];
        let err = convert_batch(&inputs, &batch, &Options::default()).unwrap_err();
        assert!(matches!(err, FileError::OutputNeedsSingleInput(2)));
    }

    #[test]
    fn shared_writer_receives_inputs_in_order() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.smd");
        let b = dir.path().join("b.smd");
        fs::write(&a, smd_bytes(&[(0x11, 0x22)])).unwrap();
        fs::write(&b, smd_bytes(&[(0x33, 0x44)])).unwrap();

        let mut out = Vec::new();
        let summary = convert_batch_into(&[a, b], &mut out, false, &Options::default());
        assert!(summary.is_success());
        assert_eq!(out.len(), 2 * BLOCK_SIZE);
        assert_eq!(&out[..2], &[0x22, 0x11]);
        assert_eq!(&out[BLOCK_SIZE..BLOCK_SIZE + 2], &[0x44, 0x33]);
    }
}
