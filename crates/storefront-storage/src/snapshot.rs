//! JSON-lines catalog snapshots.
//!
//! One [`SeedRecord`] per line. Paths ending in `.zst` are zstd-compressed.

use crate::mem::InMemoryCatalog;
use crate::traits::Catalog;
use serde::{Deserialize, Serialize};
use std::{
    fs::{File, OpenOptions},
    io::{self, BufRead, BufReader, Read, Write},
    path::{Path, PathBuf},
};
use storefront_core::{Product, TaxonomyKind, Term};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SeedRecord {
    Term {
        taxonomy: TaxonomyKind,
        #[serde(flatten)]
        term: Term,
    },
    Product(Product),
}

#[derive(Debug, Default)]
pub struct SnapshotContents {
    pub records: Vec<SeedRecord>,
    /// Lines that did not decode as a record.
    pub skipped: usize,
}

fn is_compressed(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some("zst")
}

enum Sink {
    Plain(io::BufWriter<File>),
    Zstd(zstd::Encoder<'static, File>),
}

impl Sink {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Sink::Plain(w) => w,
            Sink::Zstd(enc) => enc,
        }
    }
}

pub struct SnapshotWriter {
    out: Sink,
    pub path: PathBuf,
    pub records: usize,
}

impl SnapshotWriter {
    pub fn create(path: PathBuf) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        let out = if is_compressed(&path) {
            Sink::Zstd(zstd::Encoder::new(file, 3)?)
        } else {
            Sink::Plain(io::BufWriter::new(file))
        };
        Ok(Self {
            out,
            path,
            records: 0,
        })
    }

    pub fn write_record(&mut self, rec: &SeedRecord) -> io::Result<()> {
        let s = serde_json::to_string(rec)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let out = self.out.writer();
        out.write_all(s.as_bytes())?;
        out.write_all(b"\n")?;
        self.records += 1;
        Ok(())
    }

    /// Flush, write the zstd frame epilogue if compressing, and sync to disk.
    /// Returns the number of records written.
    pub fn finish(self) -> io::Result<usize> {
        let file = match self.out {
            Sink::Plain(w) => w.into_inner().map_err(|e| e.into_error())?,
            Sink::Zstd(enc) => enc.finish()?,
        };
        file.sync_all()?;
        Ok(self.records)
    }
}

pub fn read_snapshot(path: &Path) -> io::Result<SnapshotContents> {
    let fh = File::open(path)?;
    let reader: Box<dyn Read> = if is_compressed(path) {
        Box::new(zstd::Decoder::new(fh)?)
    } else {
        Box::new(fh)
    };
    let mut out = SnapshotContents::default();
    for line in BufReader::new(reader).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SeedRecord>(&line) {
            Ok(rec) => out.records.push(rec),
            Err(_) => out.skipped += 1,
        }
    }
    Ok(out)
}

impl InMemoryCatalog {
    pub fn from_records(records: impl IntoIterator<Item = SeedRecord>) -> Self {
        let catalog = Self::new();
        for rec in records {
            match rec {
                SeedRecord::Term { taxonomy, term } => catalog.replay_term(taxonomy, term),
                SeedRecord::Product(p) => {
                    catalog.replay_product(p);
                }
            }
        }
        catalog
    }

    /// Load a snapshot; the second value counts undecodable lines.
    pub fn load(path: &Path) -> io::Result<(Self, usize)> {
        let contents = read_snapshot(path)?;
        Ok((Self::from_records(contents.records), contents.skipped))
    }

    /// Terms first so a reader can resolve labels while streaming products.
    pub fn write_snapshot(&self, path: PathBuf) -> io::Result<usize> {
        let mut w = SnapshotWriter::create(path)?;
        for (taxonomy, term) in self.all_terms() {
            w.write_record(&SeedRecord::Term { taxonomy, term })?;
        }
        for p in self.all_products() {
            w.write_record(&SeedRecord::Product(p))?;
        }
        w.finish()
    }
}
