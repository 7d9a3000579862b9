//! # rmstool
//!
//! Inspects record stores on disk without going through an application.
//!
//! ## Usage
//!
//! ```bash
//! # Every suite and store under a directory
//! rmstool ./rms list
//!
//! # Header fields of one store
//! rmstool ./rms --suite 7 stat scores
//!
//! # Every block in file order, with a payload preview
//! rmstool ./rms --suite 7 dump scores
//!
//! # Squeeze out free blocks
//! rmstool ./rms --suite 7 compact scores
//! ```
//!
//! Logging goes to stderr and follows `RUST_LOG`, e.g.
//! `RUST_LOG=rmstore=debug rmstool ./rms --suite 7 compact scores`.

use eyre::{bail, Result, WrapErr};
use std::env;
use std::fmt::Write;
use std::path::PathBuf;
use std::sync::Arc;

use rmstore::config::DEFAULT_SUITE_STORAGE_LIMIT;
use rmstore::storage::{FileManager, StorageKind, SuiteId};
use rmstore::store::{RecordStoreImpl, SharedRegistry, StoreContext};

const PREVIEW_BYTES: usize = 16;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

#[derive(Debug)]
enum Command {
    List,
    Stat(String),
    Dump(String),
    Compact(String),
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    let mut root: Option<PathBuf> = None;
    let mut suite: Option<SuiteId> = None;
    let mut words: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            "--version" | "-v" => {
                println!("rmstool {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--suite" | "-s" => {
                i += 1;
                let Some(value) = args.get(i) else {
                    bail!("--suite needs a value");
                };
                let id: i32 = value
                    .parse()
                    .wrap_err_with(|| format!("invalid suite id '{}'", value))?;
                suite = Some(SuiteId(id));
            }
            arg if arg.starts_with('-') => {
                bail!("Unknown option: {}", arg);
            }
            word => {
                if root.is_none() {
                    root = Some(PathBuf::from(word));
                } else {
                    words.push(word.to_string());
                }
            }
        }
        i += 1;
    }

    let Some(root) = root else {
        print_usage();
        return Ok(());
    };
    if !root.is_dir() {
        bail!("{} is not a directory", root.display());
    }

    let command = parse_command(&words)?;
    let ctx = StoreContext {
        files: FileManager::new(StorageKind::disk(&root))?,
        registry: Arc::new(SharedRegistry::new()),
        suite_storage_limit: DEFAULT_SUITE_STORAGE_LIMIT,
    };

    match command {
        Command::List => list(&ctx, suite),
        Command::Stat(name) => stat(&ctx, require_suite(suite)?, &name),
        Command::Dump(name) => dump(&ctx, require_suite(suite)?, &name),
        Command::Compact(name) => compact(&ctx, require_suite(suite)?, &name),
    }
}

fn parse_command(words: &[String]) -> Result<Command> {
    let store = || -> Result<String> {
        match words.get(1) {
            Some(name) => Ok(name.clone()),
            None => bail!("'{}' needs a store name", words[0]),
        }
    };
    match words.first().map(String::as_str) {
        None | Some("list") => Ok(Command::List),
        Some("stat") => Ok(Command::Stat(store()?)),
        Some("dump") => Ok(Command::Dump(store()?)),
        Some("compact") => Ok(Command::Compact(store()?)),
        Some(other) => bail!("Unknown command: {}", other),
    }
}

fn require_suite(suite: Option<SuiteId>) -> Result<SuiteId> {
    match suite {
        Some(suite) => Ok(suite),
        None => bail!("this command needs --suite <ID>"),
    }
}

fn open(ctx: &StoreContext, suite: SuiteId, name: &str) -> Result<RecordStoreImpl> {
    RecordStoreImpl::open(ctx, suite, name, false)
        .wrap_err_with(|| format!("cannot open store '{}' of suite {}", name, suite))
}

fn list(ctx: &StoreContext, suite: Option<SuiteId>) -> Result<()> {
    let suites = match suite {
        Some(suite) => vec![suite],
        None => ctx.files.list_suites()?,
    };

    let mut rows = Vec::new();
    for suite in suites {
        for name in ctx.files.list_stores(suite)? {
            let mut store = open(ctx, suite, &name)?;
            rows.push(vec![
                suite.to_string(),
                name,
                store.get_num_records()?.to_string(),
                store.get_size()?.to_string(),
                store.get_version()?.to_string(),
            ]);
        }
    }

    print!(
        "{}",
        render_table(&["suite", "store", "records", "size", "version"], &rows)
    );
    println!("{} store(s)", rows.len());
    Ok(())
}

fn stat(ctx: &StoreContext, suite: SuiteId, name: &str) -> Result<()> {
    let mut store = open(ctx, suite, name)?;
    let blocks = store.blocks()?;
    let free = blocks.iter().filter(|(_, b)| b.is_free()).count();

    println!("store:          {}", name);
    println!("suite:          {}", suite);
    println!("auth mode:      {:?}", store.get_auth_mode()?);
    println!("records:        {}", store.get_num_records()?);
    println!("next id:        {}", store.get_next_record_id()?);
    println!("version:        {}", store.get_version()?);
    println!("last modified:  {}", store.get_last_modified()?);
    println!("size:           {}", store.get_size()?);
    println!("available:      {}", store.get_size_available()?);
    println!("blocks:         {} ({} free)", blocks.len(), free);

    // Dropped without close so the file is left as found.
    drop(store);
    Ok(())
}

fn dump(ctx: &StoreContext, suite: SuiteId, name: &str) -> Result<()> {
    let mut store = open(ctx, suite, name)?;
    let blocks = store.blocks()?;

    let mut rows = Vec::with_capacity(blocks.len());
    for (offset, block) in &blocks {
        let (id, preview) = if block.is_free() {
            ("free".to_string(), String::new())
        } else {
            let data = store.get_record(block.record_id)?;
            (block.record_id.to_string(), hex_preview(&data))
        };
        rows.push(vec![
            offset.to_string(),
            id,
            block.data_len.to_string(),
            block.block_size().to_string(),
            preview,
        ]);
    }

    print!(
        "{}",
        render_table(&["offset", "id", "len", "block", "data"], &rows)
    );
    println!("{} block(s)", rows.len());
    drop(store);
    Ok(())
}

fn compact(ctx: &StoreContext, suite: SuiteId, name: &str) -> Result<()> {
    let mut store = open(ctx, suite, name)?;
    let before = store.get_size()?;
    store.compact()?;
    let after = store.get_size()?;
    store.close()?;

    println!("{}: {} -> {} bytes", name, before, after);
    Ok(())
}

fn hex_preview(data: &[u8]) -> String {
    let mut out = String::with_capacity(PREVIEW_BYTES * 2 + 3);
    for byte in data.iter().take(PREVIEW_BYTES) {
        let _ = write!(out, "{:02x}", byte);
    }
    if data.len() > PREVIEW_BYTES {
        out.push_str("...");
    }
    out
}

fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len().max(1)).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let separator = {
        let mut line = String::from("+");
        for w in &widths {
            line.push_str(&"-".repeat(w + 2));
            line.push('+');
        }
        line.push('\n');
        line
    };

    let mut out = separator.clone();
    out.push('|');
    for (h, w) in headers.iter().zip(&widths) {
        let _ = write!(out, " {:<width$} |", h, width = w);
    }
    out.push('\n');
    out.push_str(&separator);
    for row in rows {
        out.push('|');
        for (cell, w) in row.iter().zip(&widths) {
            let _ = write!(out, " {:<width$} |", cell, width = w);
        }
        out.push('\n');
    }
    if !rows.is_empty() {
        out.push_str(&separator);
    }
    out
}

fn print_usage() {
    println!("rmstool - inspect rmstore record stores");
    println!();
    println!("USAGE:");
    println!("    rmstool <RMS_DIR> [OPTIONS] [COMMAND] [STORE]");
    println!();
    println!("COMMANDS:");
    println!("    list               List suites and stores (default)");
    println!("    stat <STORE>       Show header fields of a store");
    println!("    dump <STORE>       Show every block of a store");
    println!("    compact <STORE>    Remove free blocks from a store");
    println!();
    println!("OPTIONS:");
    println!("    -s, --suite <ID>   Suite that owns the store");
    println!("    -h, --help         Print help information");
    println!("    -v, --version      Print version information");
}
