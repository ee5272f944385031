//! # CLI - Sort-Merge-Bucket Shell
//!
//! A REPL-style command-line interface over the bucketed storage engine.
//! Reads commands from stdin, executes them, and prints results to stdout.
//! Logs go to stderr, so piping commands through the shell stays scriptable.
//!
//! ## Commands
//!
//! ```text
//! PUT dataset key value           Buffer a record into the dataset's open write run
//! COMMIT dataset                  Sort, stage and publish the dataset
//! ABORT dataset                   Discard the dataset's open write run
//! JOIN inner|left|outer ds...     Merge-join published datasets by key
//! INFO dataset                    Print the dataset's bucket metadata
//! GC dataset                      Remove staging directories of abandoned runs
//! EXIT / QUIT                     Shut down (open runs are discarded)
//! ```
//!
//! ## Configuration
//!
//! ```text
//! SMB_DATA_DIR             dataset root directory        (default: "data")
//! SMB_NUM_BUCKETS          buckets per new dataset       (default: 4)
//! SMB_NUM_SHARDS           shards per new dataset        (default: 1)
//! SMB_HASH                 xxh3 | crc32                  (default: xxh3)
//! SMB_KEY_TYPE             bytes | string | int64 | uint64 (default: string)
//! SMB_KEY_ORDER            asc | desc                    (default: asc)
//! SMB_FORMAT               kv | json                     (default: kv)
//! SMB_SORT_BUFFER_RECORDS  records buffered before spill (default: 100000)
//! SMB_LOG                  tracing filter                (default: "warn")
//! ```
//!
//! ## Example
//!
//! ```text
//! $ SMB_DATA_DIR=/tmp/smb cargo run -p cli
//! smb shell started (data_dir=/tmp/smb, buckets=4, shards=1, format=kv)
//! > PUT users 1 alice
//! OK
//! > COMMIT users
//! OK (records=1, files=4)
//! > JOIN inner users
//! 1 -> [alice]
//! (1 groups)
//! > EXIT
//! bye
//! ```

mod shell;

use anyhow::Result;
use config::Config;
use fileops::{
    FileOperations, FormatKind, JsonFileOperations, JsonRecord, KvFileOperations, KvRecord,
};
use shell::{Shell, ShellRecord};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_logging(filter: &str) -> Result<()> {
    let env_filter = EnvFilter::try_new(filter)?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
    Ok(())
}

fn run_shell<R: ShellRecord>(cfg: Config, ops: Arc<dyn FileOperations<Record = R>>) -> Result<()> {
    println!(
        "smb shell started (data_dir={}, buckets={}, shards={}, format={})",
        cfg.data_dir.display(),
        cfg.num_buckets,
        cfg.num_shards,
        cfg.format
    );
    println!("Commands: PUT ds key value | COMMIT ds | ABORT ds | JOIN inner|left|outer ds...");
    println!("          INFO ds | GC ds | EXIT");

    let mut shell = Shell::new(cfg, ops);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write!(out, "> ")?;
    out.flush()?;

    for line in io::stdin().lock().lines() {
        let line = line?;
        if !shell.execute(&line, &mut out)? {
            break;
        }
        write!(out, "> ")?;
        out.flush()?;
    }

    Ok(())
}

fn main() -> Result<()> {
    let cfg = Config::from_env()?;
    init_logging(&cfg.log_filter)?;

    match cfg.format {
        FormatKind::Kv => run_shell::<KvRecord>(cfg, Arc::new(KvFileOperations)),
        FormatKind::Json => run_shell::<JsonRecord>(cfg, Arc::new(JsonFileOperations)),
    }
}
