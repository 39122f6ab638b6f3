//! FASTA loading and signature encoding.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context, Result};
use parktree::Signature;
use rayon::prelude::*;
use tracing::warn;

/// One named sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub name: String,
    /// ASCII letters only; digits, spaces and punctuation are dropped.
    pub sequence: String,
}

/// Parse FASTA text.
///
/// Each `>` line starts a record named by the rest of that line. The lines
/// that follow, up to the next header, are concatenated into its sequence.
pub fn read_records<R: BufRead>(reader: R) -> Result<Vec<Record>> {
    let mut records: Vec<Record> = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading line {}", lineno + 1))?;
        if let Some(name) = line.trim_start().strip_prefix('>') {
            records.push(Record {
                name: name.trim_end().to_string(),
                sequence: String::new(),
            });
            continue;
        }
        match records.last_mut() {
            Some(record) => record
                .sequence
                .extend(line.chars().filter(char::is_ascii_alphabetic)),
            None if line.trim().is_empty() => {}
            None => bail!("line {}: sequence data before the first '>' header", lineno + 1),
        }
    }
    Ok(records)
}

/// Read every record from the FASTA file at `path`.
pub fn load(path: &Path) -> Result<Vec<Record>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let records = read_records(BufReader::new(file))
        .with_context(|| format!("failed to parse {}", path.display()))?;
    for record in records.iter().filter(|r| r.sequence.is_empty()) {
        warn!(record = %record.name, "record has no sequence data");
    }
    Ok(records)
}

/// Encode each record's sequence into a signature, in record order.
pub fn encode_records(records: &[Record]) -> Vec<Signature> {
    records
        .par_iter()
        .map(|r| Signature::encode(r.sequence.as_bytes()))
        .collect()
}
