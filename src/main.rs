//! `rmagic`: prints the type of each file given on the command line.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tabwriter::TabWriter;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use magic_rules::magic::{builtin, sys};
use magic_rules::{read_bytes, scan, MagicTable, HOWMANY};

#[derive(Parser, Debug)]
#[command(name = "rmagic", version, about = "Determines file type by content")]
struct Args {
    /// Files to identify
    #[arg(required_unless_present = "check")]
    files: Vec<PathBuf>,

    /// Use these magic files or directories instead of the bundled database
    #[arg(short = 'm', long = "magic-file")]
    magic_files: Vec<PathBuf>,

    /// Keep going after the first match
    #[arg(short, long)]
    keep_going: bool,

    /// Print MIME types instead of descriptions
    #[arg(short = 'i', long)]
    mime: bool,

    /// Descend into directories
    #[arg(short, long)]
    recursive: bool,

    /// Number of worker threads (default: number of CPUs)
    #[arg(short, long)]
    jobs: Option<u32>,

    /// Only compile the magic database and report problems
    #[arg(short, long)]
    check: bool,

    /// Log debug output to stderr
    #[arg(short, long)]
    verbose: bool,
}

/// Compiles the requested databases, returning the table and one message per
/// line that had problems.
fn load_table(magic_files: &[PathBuf]) -> Result<(MagicTable, Vec<String>)> {
    if magic_files.is_empty() {
        let (table, errors) =
            magic_rules::compile(builtin::SOURCE).context("compiling bundled magic")?;
        let problems = errors.iter().map(|e| format!("builtin magic, {e}")).collect();
        return Ok((table, problems));
    }
    let (table, diagnostics) = sys::from_paths(magic_files).context("loading magic files")?;
    let problems = diagnostics
        .iter()
        .flat_map(|d| d.errors.iter().map(move |e| format!("{}, {}", d.path.display(), e)))
        .collect();
    Ok((table, problems))
}

/// Expands directories when walking recursively.
fn collect_inputs(files: &[PathBuf], recursive: bool) -> Vec<PathBuf> {
    let mut inputs = Vec::new();
    for path in files {
        if recursive && path.is_dir() {
            for entry in WalkDir::new(path).sort_by_file_name() {
                match entry {
                    Ok(e) if e.file_type().is_file() => inputs.push(e.into_path()),
                    Ok(_) => {}
                    Err(e) => tracing::warn!("{}", e),
                }
            }
        } else {
            inputs.push(path.clone());
        }
    }
    inputs
}

fn describe(table: &MagicTable, path: &Path, keep_going: bool, as_mime: bool) -> String {
    if path.is_dir() {
        return if as_mime { "inode/directory" } else { "directory" }.to_string();
    }
    let bytes = match read_bytes(path, HOWMANY) {
        Ok(b) => b,
        Err(e) => return format!("cannot open ({e})"),
    };
    if bytes.is_empty() {
        return if as_mime { "inode/x-empty" } else { "empty" }.to_string();
    }

    let report = scan(table, &bytes, keep_going);
    if as_mime {
        return report
            .and_then(|r| r.mime)
            .map_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string(), |m| m.to_string());
    }
    match report.map(|r| r.description()) {
        Some(d) if !d.is_empty() => d,
        _ => "data".to_string(),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let (table, problems) = load_table(&args.magic_files)?;
    if args.check {
        for problem in &problems {
            println!("{problem}");
        }
        println!("{} rules, {} problems", table.len(), problems.len());
        if !problems.is_empty() {
            bail!("magic database has {} problems", problems.len());
        }
        return Ok(());
    }

    let inputs = collect_inputs(&args.files, args.recursive);
    let jobs = args.jobs.unwrap_or_else(|| num_cpus::get() as u32).max(1);
    let mut pool = scoped_threadpool::Pool::new(jobs);
    let (tx, rx) = mpsc::channel();
    let table = &table;

    pool.scoped(|scope| {
        for (index, path) in inputs.iter().enumerate() {
            let tx = tx.clone();
            let (keep_going, mime) = (args.keep_going, args.mime);
            scope.execute(move || {
                let text = describe(table, path, keep_going, mime);
                // The receiver outlives the pool.
                let _ = tx.send((index, text));
            });
        }
    });
    drop(tx);

    let mut results: Vec<(usize, String)> = rx.iter().collect();
    results.sort_by_key(|(index, _)| *index);

    let stdout = std::io::stdout();
    let mut tw = TabWriter::new(stdout.lock());
    for (index, text) in results {
        writeln!(tw, "{}:\t{}", inputs[index].display(), text)?;
    }
    tw.flush()?;
    Ok(())
}
