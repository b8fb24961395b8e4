use clap::Parser;
use smd_deinterleave::convert::{convert_batch, convert_stdin, BatchOptions, Output};
use smd_deinterleave::io_stream::Options;
use smd_deinterleave::Strictness;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn, Level};

const LICENSE: &str = "\
deinterleave is free software; you may redistribute copies of it under the
terms of the GNU General Public License, version 2 or (at your option) any
later version.  There is NO WARRANTY, to the extent permitted by law.
";

#[derive(Parser)]
#[command(
    name = "deinterleave",
    version,
    about = "Convert interleaved SMD file(s) into raw binary ROM images",
    long_about = "Convert interleaved Super Magic Drive (SMD) dumps into raw, linear ROM images.\n\n\
                  Without --output or --stdout each INPUT is written next to itself with a .bin \
                  extension.  With no INPUT, standard input is converted."
)]
struct Cli {
    /// Write the decoded image to FILE (single input only)
    #[arg(short, long, value_name = "FILE", conflicts_with = "stdout")]
    output: Option<PathBuf>,

    /// Write decoded output to stdout
    #[arg(short = 'c', long)]
    stdout: bool,

    /// Silent mode: only report errors
    #[arg(short, long, conflicts_with = "verbose")]
    silent: bool,

    /// Verbose mode: report header details
    #[arg(short, long)]
    verbose: bool,

    /// Explicit log level (overrides --silent / --verbose)
    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,

    /// Strict mode: signature mismatches, dirty reserved bytes and trailing
    /// data are errors instead of warnings
    #[arg(short = 'S', long)]
    strict: bool,

    /// Do not read past the last block looking for trailing data
    #[arg(long)]
    no_trailing_check: bool,

    /// Fragile mode: stop at the first file that fails
    #[arg(short, long)]
    fragile: bool,

    /// Display the software license and quit
    #[arg(short = 'L', long)]
    license: bool,

    /// SMD files to convert
    #[arg(value_name = "INPUT")]
    inputs: Vec<PathBuf>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info  => Level::INFO,
            LogLevel::Warn  => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl Cli {
    fn level(&self) -> Level {
        match (self.log_level, self.silent, self.verbose) {
            (Some(l), _, _) => l.into(),
            (None, true, _) => Level::ERROR,
            (None, _, true) => Level::DEBUG,
            _               => Level::INFO,
        }
    }

    fn options(&self) -> Options {
        Options {
            strictness:     if self.strict { Strictness::Strict } else { Strictness::Lenient },
            check_trailing: !self.no_trailing_check,
            cancel:         None,
        }
    }

    fn output(&self) -> Output {
        match (&self.output, self.stdout) {
            (Some(path), _) => Output::Path(path.clone()),
            (None, true)    => Output::Stdout,
            (None, false)   => Output::Derived,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.license {
        print!("{LICENSE}");
        return ExitCode::SUCCESS;
    }

    // Logs go to stderr; stdout may carry ROM data.
    tracing_subscriber::fmt()
        .with_max_level(cli.level())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let options = cli.options();
    let output  = cli.output();

    if cli.inputs.is_empty() {
        info!("no input files, reading standard input");
        return match convert_stdin(&output, &options) {
            Ok(report) => {
                info!("<stdin>: {}", report.summary());
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("<stdin>: {e}");
                ExitCode::FAILURE
            }
        };
    }

    let batch = BatchOptions { output, fragile: cli.fragile };
    match convert_batch(&cli.inputs, &batch, &options) {
        Ok(summary) if summary.is_success() => ExitCode::SUCCESS,
        Ok(summary) => {
            if summary.aborted {
                warn!(
                    "fragile mode: stopped after {} of {} file(s)",
                    summary.converted.len() + summary.failed.len(),
                    cli.inputs.len(),
                );
            }
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{e}");
            ExitCode::from(2)
        }
    }
}
