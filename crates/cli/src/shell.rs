//! Command interpreter behind the interactive shell.
//!
//! The shell is generic over the record type of the configured format; each
//! format's record implements [`ShellRecord`] so that `PUT` arguments can be
//! turned into records and `JOIN` output can be printed.

use anyhow::{anyhow, bail, Result};
use config::Config;
use engine::{
    cleanup_stale_runs, load_published, BucketedInput, JoinMode, ShardWriter, SortedBucketSource,
    WriteOptions, WriteRun,
};
use fileops::{FileOperations, JsonRecord, KvRecord};
use metadata::{BucketMetadata, ExtractKey, KeyType};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Field every shell record is keyed on.
pub const KEY_FIELD: &str = "key";

/// A record the shell can build from `PUT` arguments and print back.
pub trait ShellRecord: ExtractKey + Send + Sized + 'static {
    fn from_input(key_type: KeyType, key: &str, value: &str) -> Result<Self>;

    /// Text shown for the record in `JOIN` output.
    fn display_value(&self) -> String;
}

impl ShellRecord for KvRecord {
    fn from_input(_key_type: KeyType, key: &str, value: &str) -> Result<Self> {
        Ok(KvRecord::new(key.as_bytes(), value.as_bytes()))
    }

    fn display_value(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}

impl ShellRecord for JsonRecord {
    fn from_input(key_type: KeyType, key: &str, value: &str) -> Result<Self> {
        let key = match key_type {
            KeyType::Int64 => Value::from(key.parse::<i64>()?),
            KeyType::UInt64 => Value::from(key.parse::<u64>()?),
            KeyType::String | KeyType::Bytes => Value::from(key),
        };
        // Values that parse as JSON are stored as such, anything else as text.
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::from(value));
        Ok(JsonRecord(serde_json::json!({ KEY_FIELD: key, "value": value })))
    }

    fn display_value(&self) -> String {
        match self.0.get("value") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}

struct PendingWrite<R> {
    run: WriteRun<R>,
    writer: ShardWriter<R>,
}

/// Shell state: configuration plus one open write run per dataset.
pub struct Shell<R> {
    cfg: Config,
    ops: Arc<dyn FileOperations<Record = R>>,
    pending: BTreeMap<String, PendingWrite<R>>,
}

impl<R: ShellRecord> Shell<R> {
    pub fn new(cfg: Config, ops: Arc<dyn FileOperations<Record = R>>) -> Self {
        Self {
            cfg,
            ops,
            pending: BTreeMap::new(),
        }
    }

    fn dataset_path(&self, name: &str) -> Result<PathBuf> {
        let separator = |c: char| c == '/' || c == '\\';
        if name.is_empty() || name.contains(separator) || name.starts_with('.') {
            bail!("invalid dataset name: {:?}", name);
        }
        Ok(self.cfg.data_dir.join(name))
    }

    /// Executes one command line, writing its output to `out`.
    ///
    /// Returns `Ok(false)` once the shell should exit. Command failures are
    /// reported on `out` as `ERR` lines; only failures of `out` itself are
    /// returned as errors.
    pub fn execute(&mut self, line: &str, out: &mut impl Write) -> Result<bool> {
        let mut parts = line.split_whitespace();
        let Some(cmd) = parts.next() else {
            return Ok(true);
        };
        let args: Vec<&str> = parts.collect();

        let result = match cmd.to_uppercase().as_str() {
            "PUT" => self.put(&args, out),
            "COMMIT" => self.commit(&args, out),
            "ABORT" => self.abort(&args, out),
            "JOIN" => self.join(&args, out),
            "INFO" => self.info(&args, out),
            "GC" => self.gc(&args, out),
            "EXIT" | "QUIT" => {
                writeln!(out, "bye")?;
                return Ok(false);
            }
            other => {
                writeln!(out, "unknown command: {}", other)?;
                return Ok(true);
            }
        };
        if let Err(e) = result {
            writeln!(out, "ERR {:#}", e)?;
        }
        Ok(true)
    }

    fn put(&mut self, args: &[&str], out: &mut impl Write) -> Result<()> {
        let [name, key, value @ ..] = args else {
            bail!("usage: PUT dataset key value");
        };
        if value.is_empty() {
            bail!("usage: PUT dataset key value");
        }
        let record = R::from_input(self.cfg.key_type, key, &value.join(" "))?;

        if !self.pending.contains_key(*name) {
            let path = self.dataset_path(name)?;
            let metadata = BucketMetadata::new(
                self.cfg.num_buckets,
                self.cfg.num_shards,
                self.cfg.key_type,
                KEY_FIELD,
                self.cfg.hash_type,
            )?
            .with_key_order(self.cfg.key_order);
            let mut run = WriteRun::open(
                path,
                metadata,
                Arc::clone(&self.ops),
                WriteOptions::from(&self.cfg),
            )?;
            let writer = run.shard_writer(0..self.cfg.num_shards)?;
            debug!(dataset = name, "started write run");
            self.pending.insert(name.to_string(), PendingWrite { run, writer });
        }

        let pending = self
            .pending
            .get_mut(*name)
            .ok_or_else(|| anyhow!("no write run for {}", name))?;
        if let Err(e) = pending.writer.write(record) {
            // A failed writer cannot continue; drop the run and its staging.
            self.pending.remove(*name);
            return Err(e.into());
        }
        writeln!(out, "OK")?;
        Ok(())
    }

    fn commit(&mut self, args: &[&str], out: &mut impl Write) -> Result<()> {
        let [name] = args else {
            bail!("usage: COMMIT dataset");
        };
        let PendingWrite { mut run, writer } = self
            .pending
            .remove(*name)
            .ok_or_else(|| anyhow!("nothing to commit for {}", name))?;
        let staged = writer.finish()?;
        let published = run.commit(vec![staged])?;
        writeln!(
            out,
            "OK (records={}, files={})",
            published.records, published.files
        )?;
        Ok(())
    }

    fn abort(&mut self, args: &[&str], out: &mut impl Write) -> Result<()> {
        let [name] = args else {
            bail!("usage: ABORT dataset");
        };
        let pending = self
            .pending
            .remove(*name)
            .ok_or_else(|| anyhow!("nothing to abort for {}", name))?;
        pending.run.abort()?;
        writeln!(out, "OK")?;
        Ok(())
    }

    fn join(&mut self, args: &[&str], out: &mut impl Write) -> Result<()> {
        let [mode, names @ ..] = args else {
            bail!("usage: JOIN inner|left|outer dataset...");
        };
        if names.is_empty() {
            bail!("usage: JOIN inner|left|outer dataset...");
        }
        let mode = match mode.to_lowercase().as_str() {
            "inner" => JoinMode::Inner,
            "left" => JoinMode::Left { primary: 0 },
            "outer" => JoinMode::FullOuter,
            other => bail!("unknown join mode: {}", other),
        };

        let inputs = names
            .iter()
            .map(|n| Ok(BucketedInput::new(self.dataset_path(n)?, Arc::clone(&self.ops))))
            .collect::<Result<Vec<_>>>()?;
        let source = SortedBucketSource::open(inputs, mode)?;
        let key_type = source.key_type();

        let mut count = 0usize;
        for group in source.iter()? {
            let group = group?;
            let rendered: Vec<String> = group
                .groups
                .iter()
                .map(|g| {
                    let vals: Vec<String> = g.iter().map(R::display_value).collect();
                    format!("[{}]", vals.join(", "))
                })
                .collect();
            writeln!(out, "{} -> {}", key_type.render(&group.key), rendered.join(" "))?;
            count += 1;
        }
        if count == 0 {
            writeln!(out, "(empty)")?;
        } else {
            writeln!(out, "({} groups)", count)?;
        }
        Ok(())
    }

    fn info(&mut self, args: &[&str], out: &mut impl Write) -> Result<()> {
        let [name] = args else {
            bail!("usage: INFO dataset");
        };
        let path = self.dataset_path(name)?;
        let md = load_published(&path)?;
        writeln!(
            out,
            "buckets={} shards={} key={}:{} order={} hash={} files={}*{}",
            md.num_buckets(),
            md.num_shards(),
            md.key_field(),
            md.key_type(),
            md.key_order(),
            md.hash_type(),
            md.filename_prefix(),
            md.filename_suffix()
        )?;
        Ok(())
    }

    fn gc(&mut self, args: &[&str], out: &mut impl Write) -> Result<()> {
        let [name] = args else {
            bail!("usage: GC dataset");
        };
        if self.pending.contains_key(*name) {
            bail!("{} has an open write run", name);
        }
        let removed = cleanup_stale_runs(&self.dataset_path(name)?)?;
        writeln!(out, "OK (removed={})", removed)?;
        Ok(())
    }
}
