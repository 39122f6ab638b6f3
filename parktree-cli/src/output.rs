//! Cluster assignment writers.

use std::io::{self, Write};

use tracing::info;

use crate::fasta::Record;

/// One `index,cluster` line per input, in input order.
pub fn write_csv<W: Write>(mut w: W, clusters: &[usize]) -> io::Result<()> {
    for (index, cluster) in clusters.iter().enumerate() {
        writeln!(w, "{index},{cluster}")?;
    }
    w.flush()
}

/// Each record re-emitted as FASTA with its cluster id as the header.
pub fn write_fasta<W: Write>(mut w: W, clusters: &[usize], records: &[Record]) -> io::Result<()> {
    debug_assert_eq!(clusters.len(), records.len());
    info!(records = clusters.len(), "writing records");
    for (cluster, record) in clusters.iter().zip(records) {
        writeln!(w, ">{cluster}\n{}", record.sequence)?;
    }
    w.flush()
}
