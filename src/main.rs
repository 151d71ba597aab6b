//! xunfold CLI
//!
//! Reads a multi-document YAML manifest stream, expands package references
//! and composite resource definitions, and writes the flattened stream to
//! the output. Logs go to stderr; the output path carries only documents.
//!
//! Every flag has an environment-variable fallback (`FILE`, `OUTPUT`,
//! `WORKERS`, `FAIL_FAST`, `ALLOW_FAILURE`, `EMIT`, `LOG_LEVEL`,
//! `LOG_ENCODING`).
//!
//! # Exit Codes
//!
//! - `0`: the run completed (including swallowed errors under
//!   `--allow-failure`)
//! - `1`: the run failed
//! - `2`: invalid arguments

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;
use xunfold::{Config, EmitMode, FileSink, OutputSink, Pipeline, RegistryClient, Unpacker};

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliEmit {
    /// Emit expanded sub-documents verbatim.
    Raw,
    /// Re-render decoded sub-documents.
    Decoded,
}

impl From<CliEmit> for EmitMode {
    fn from(value: CliEmit) -> Self {
        match value {
            CliEmit::Raw => EmitMode::Raw,
            CliEmit::Decoded => EmitMode::Decoded,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogEncoding {
    Json,
    Console,
}

#[derive(Debug, Parser)]
#[command(name = "xunfold", version, about = "Flatten package and composite-definition manifests")]
struct Cli {
    /// Path to the input manifest stream.
    #[arg(short = 'f', long, env = "FILE", default_value = "/dev/stdin")]
    file: PathBuf,

    /// Path to the output stream.
    #[arg(short = 'o', long, env = "OUTPUT", default_value = "/dev/stdout")]
    output: PathBuf,

    /// Workers used to process documents (default: available parallelism).
    #[arg(long, env = "WORKERS")]
    workers: Option<usize>,

    /// Exit early if an error occurred.
    #[arg(long, env = "FAIL_FAST")]
    fail_fast: bool,

    /// Do not exit non-zero if an error occurred.
    #[arg(long, env = "ALLOW_FAILURE")]
    allow_failure: bool,

    /// How expanded sub-documents are emitted.
    #[arg(long, env = "EMIT", value_enum, default_value_t = CliEmit::Raw)]
    emit: CliEmit,

    /// Log level [trace,debug,info,warn,error].
    #[arg(short = 'l', long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format.
    #[arg(short = 'e', long, env = "LOG_ENCODING", value_enum, default_value_t = LogEncoding::Json)]
    log_encoding: LogEncoding,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "run failed");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> xunfold::Result<()> {
    let mut input = File::open(&cli.file)?;
    let sink: Arc<dyn OutputSink> = Arc::new(FileSink::from_file(open_output(&cli.output)?));

    let config = Config {
        workers: cli.workers.unwrap_or_else(|| num_cpus::get()).max(1),
        fail_fast: cli.fail_fast,
        allow_failure: cli.allow_failure,
        emit: cli.emit.into(),
    };

    let unpacker = Arc::new(Unpacker::new(Arc::new(RegistryClient::new())));
    Pipeline::new(config, unpacker, sink).run(&mut input)
}

/// Open the output for appending, creating it group-writable if missing.
fn open_output(path: &Path) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o775);
    }
    opts.open(path)
}

fn init_logging(cli: &Cli) {
    // RUST_LOG wins over --log-level when set.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    match cli.log_encoding {
        LogEncoding::Json => builder.json().init(),
        LogEncoding::Console => builder.compact().init(),
    }
}
