//! Ties the offset table, record scanner, and wire mapper together: for a
//! given file, emits wire payloads for only the bytes not previously read,
//! chunked into batch-sized payloads.

use std::path::Path;

use anyhow::Result;
use tracing::warn;

use crate::discovery::Producer;
use crate::offset::OffsetTable;
use crate::record;
use crate::wire::{record_to_entry, WireEntry, WirePayload};

pub struct TailResult {
    pub batches: Vec<WirePayload>,
    pub malformed_lines: u64,
}

/// The session identifier is the filename without extension (GLOSSARY
/// "Session").
pub fn session_id_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

pub fn tail_file(
    path: &Path,
    producer: Producer,
    offsets: &OffsetTable,
    batch_size: usize,
    instance_id: Option<&str>,
    machine_id: Option<&str>,
) -> Result<TailResult> {
    let session_id = session_id_of(path);
    let current_len = std::fs::metadata(path)?.len();

    let mut from_offset = offsets.get(path);
    if from_offset > current_len {
        warn!(path = %path.display(), "offset exceeds file length, file was likely truncated; resetting to 0");
        offsets.reset(path);
        from_offset = 0;
    }

    let scan = record::scan_session_file(path, from_offset)?;
    offsets.set(path, scan.new_offset);

    let entries: Vec<WireEntry> = scan.records.iter().map(record_to_entry).collect();
    let project_path = path.parent().map(|p| p.to_string_lossy().to_string());

    let batches = entries
        .chunks(batch_size.max(1))
        .map(|chunk| WirePayload {
            producer,
            session_id: session_id.clone(),
            project_path: project_path.clone(),
            instance_id: instance_id.map(str::to_string),
            machine_id: machine_id.map(str::to_string),
            metadata: None,
            entries: chunk.to_vec(),
        })
        .collect();

    Ok(TailResult { batches, malformed_lines: scan.malformed_lines })
}
