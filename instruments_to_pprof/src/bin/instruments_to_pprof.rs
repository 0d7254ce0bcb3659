//! Convert macOS profiler output to a pprof profile.
//!
//! Reads an Instruments Time Profiler deep copy, a `sample` report or
//! collapsed stacks and writes a gzip-compressed pprof protobuf.
//!
//! # Usage
//!
//! ```bash
//! pbpaste | instruments_to_pprof -o profile.pb.gz
//! instruments_to_pprof --format sample sample.txt
//! instruments_to_pprof --format collapsed stacks.txt --exclude-threads-from-stack
//! instruments_to_pprof deep_copy.txt --pid-tag 4711:renderer --pid-tag 4712:gpu
//! ```

use clap::{Parser, ValueEnum};
use instruments_to_pprof::{ConverterConfig, InputFormat, ProcessAnnotations, convert};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    /// Report written by the `sample` command
    Sample,
    /// Instruments Time Profiler "Deep Copy"
    Instruments,
    /// Collapsed stacks: `a;b;c <count>`
    Collapsed,
}

impl From<Format> for InputFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Sample => InputFormat::Sample,
            Format::Instruments => InputFormat::Instruments,
            Format::Collapsed => InputFormat::Collapsed,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "instruments_to_pprof")]
#[command(about = "Convert macOS profiler output to pprof")]
#[command(version)]
struct Args {
    /// Input file, `-` or absent for stdin
    input: Option<PathBuf>,

    /// Output pprof file
    #[arg(short, long, default_value = "profile.pb.gz")]
    output: PathBuf,

    /// Input format
    #[arg(short, long, value_enum, default_value = "instruments")]
    format: Format,

    /// Don't add a frame for the process to every stack
    #[arg(long)]
    exclude_process_from_stack: bool,

    /// Don't add a frame for the thread to every stack
    #[arg(long)]
    exclude_threads_from_stack: bool,

    /// Don't show pids and tids in process and thread frames
    #[arg(long)]
    exclude_ids: bool,

    /// Annotate a process frame, as <pid>:<text> (repeatable)
    #[arg(long = "pid-tag", alias = "pidTag", value_name = "PID:TEXT")]
    pid_tags: Vec<String>,

    /// Also write the parsed call tree as JSON
    #[arg(long, value_name = "PATH")]
    dump_tree: Option<PathBuf>,
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    // Bad annotations fail before any input is read
    let annotations = ProcessAnnotations::from_args(&args.pid_tags)?;
    let config = ConverterConfig {
        exclude_processes_from_stack: args.exclude_process_from_stack,
        exclude_threads_from_stack: args.exclude_threads_from_stack,
        include_ids: !args.exclude_ids,
        annotations,
    };

    let format = InputFormat::from(args.format);
    let input_name = match &args.input {
        Some(path) if path.as_os_str() != "-" => path.display().to_string(),
        _ => "<stdin>".to_string(),
    };
    let input: Box<dyn Read> = match &args.input {
        Some(path) if path.as_os_str() != "-" => Box::new(File::open(path).map_err(|e| {
            format!("Failed to open input file '{}': {}", path.display(), e)
        })?),
        _ => Box::new(io::stdin().lock()),
    };

    // Parse
    let parsed = format.parse(input)?;
    for warning in &parsed.warnings {
        log::warn!("{warning}");
    }
    eprintln!(
        "Parsed {} as {}: {} processes, {} threads, {} frames",
        input_name,
        format,
        parsed.profile.processes.len(),
        parsed.profile.thread_count(),
        parsed.profile.frame_count()
    );

    if let Some(path) = &args.dump_tree {
        let file = File::create(path).map_err(|e| {
            format!("Failed to create tree dump '{}': {}", path.display(), e)
        })?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &parsed.profile)?;
        writer.flush()?;
    }

    // Convert
    let converted = convert(&parsed.profile, &config);
    for warning in &converted.warnings {
        log::warn!("{warning}");
    }
    converted.profile.check_valid()?;

    // Encode fully before touching the output path
    let mut encoded = Vec::new();
    converted.profile.write(&mut encoded)?;
    fs::write(&args.output, encoded).map_err(|e| {
        format!(
            "Failed to write output file '{}': {}",
            args.output.display(),
            e
        )
    })?;

    eprintln!(
        "Converted '{}' -> '{}' ({} samples)",
        input_name,
        args.output.display(),
        converted.profile.samples.len()
    );

    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .init();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
