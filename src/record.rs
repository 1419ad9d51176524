//! Claude project-JSONL scanning into the tagged `Record` variant set.
//!
//! Large files are read via a memory map; smaller ones through a plain
//! buffered read. Malformed lines are skipped without halting the scan,
//! and a trailing partial line (no terminating newline yet) is left
//! unconsumed for the next scan. The tagged `Record` enum lets the mapper
//! in `wire::record_to_entry` be a total function over the variant set.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::value::RawValue;

const MMAP_THRESHOLD: u64 = 1_000_000;
const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct RawLine<'a> {
    #[serde(rename = "type")]
    kind: Option<String>,
    uuid: Option<String>,
    timestamp: Option<String>,
    #[serde(rename = "isError")]
    is_error: Option<bool>,
    #[serde(borrow)]
    message: Option<RawMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct RawMessage<'a> {
    role: Option<String>,
    model: Option<String>,
    #[serde(borrow)]
    content: Option<RawContent<'a>>,
    usage: Option<RawUsage>,
}

#[derive(Debug, Deserialize)]
struct RawUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawContent<'a> {
    Text(String),
    #[serde(borrow)]
    Blocks(Vec<ContentBlock<'a>>),
}

#[derive(Debug, Deserialize)]
struct ContentBlock<'a> {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
    thinking: Option<String>,
    name: Option<String>,
    #[allow(dead_code)]
    #[serde(borrow)]
    input: Option<&'a RawValue>,
    content: Option<String>,
}

/// A producer record after tagging, consumed by the mapper as a total
/// function over this set.
#[derive(Debug, Clone)]
pub enum Record {
    User(UserRecord),
    Assistant(AssistantRecord),
    System(SystemRecord),
    /// Default bucket for a recognized-but-unmapped `type` value.
    Unknown {
        uuid: String,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub uuid: String,
    pub timestamp: DateTime<Utc>,
    pub text: Option<String>,
    pub tool_result_for: Option<String>,
    pub is_error: bool,
}

#[derive(Debug, Clone)]
pub struct AssistantRecord {
    pub uuid: String,
    pub timestamp: DateTime<Utc>,
    pub model: Option<String>,
    pub text: Option<String>,
    pub tool_name: Option<String>,
    pub has_thinking: bool,
    pub thinking_len: usize,
    pub has_tool_use: bool,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SystemRecord {
    pub uuid: String,
    pub timestamp: DateTime<Utc>,
}

pub struct ScanResult {
    pub records: Vec<Record>,
    pub new_offset: u64,
    pub malformed_lines: u64,
}

/// Scans `path` from `from_offset` to end-of-file, returning the records
/// parsed and the new offset. A trailing partial line (no terminating `\n`)
/// is left unconsumed for the next scan.
pub fn scan_session_file(path: &Path, from_offset: u64) -> Result<ScanResult> {
    let len = std::fs::metadata(path)
        .with_context(|| format!("stat {}", path.display()))?
        .len();

    if from_offset >= len {
        return Ok(ScanResult {
            records: Vec::new(),
            new_offset: from_offset,
            malformed_lines: 0,
        });
    }

    let bytes = if len >= MMAP_THRESHOLD {
        read_via_mmap(path, from_offset, len)?
    } else {
        read_via_buffered(path, from_offset)?
    };

    Ok(parse_lines(&bytes, from_offset))
}

fn read_via_mmap(path: &Path, from_offset: u64, len: u64) -> Result<Vec<u8>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mmap = unsafe { memmap2::Mmap::map(&file) }
        .with_context(|| format!("mmapping {}", path.display()))?;
    Ok(mmap[from_offset as usize..len as usize].to_vec())
}

fn read_via_buffered(path: &Path, from_offset: u64) -> Result<Vec<u8>> {
    let mut file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    file.seek(SeekFrom::Start(from_offset))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

enum LineOutcome {
    Record(Record),
    /// A recognized type this system does not project to an entry
    /// (`summary`, `file-history-snapshot`, `progress`). Not malformed.
    Skip,
    Malformed,
}

fn parse_lines(bytes: &[u8], base_offset: u64) -> ScanResult {
    let mut records = Vec::new();
    let mut malformed = 0u64;
    let mut consumed: u64 = 0;
    let mut start = 0usize;

    for (i, b) in bytes.iter().enumerate() {
        if *b != b'\n' {
            continue;
        }
        let line = &bytes[start..i];
        start = i + 1;
        consumed = start as u64;

        if line.is_empty() {
            continue;
        }
        if line.len() > MAX_LINE_BYTES {
            malformed += 1;
            continue;
        }

        match parse_line(line) {
            LineOutcome::Record(rec) => records.push(rec),
            LineOutcome::Skip => {}
            LineOutcome::Malformed => malformed += 1,
        }
    }

    ScanResult {
        records,
        new_offset: base_offset + consumed,
        malformed_lines: malformed,
    }
}

fn parse_line(line: &[u8]) -> LineOutcome {
    let raw: RawLine = match serde_json::from_slice(line) {
        Ok(r) => r,
        Err(_) => return LineOutcome::Malformed,
    };

    let uuid = raw.uuid.clone().unwrap_or_default();
    let timestamp = raw
        .timestamp
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or_else(Utc::now);

    match raw.kind.as_deref() {
        Some("user") => LineOutcome::Record(Record::User(build_user_record(uuid, timestamp, &raw))),
        Some("assistant") => {
            LineOutcome::Record(Record::Assistant(build_assistant_record(uuid, timestamp, &raw)))
        }
        Some("system") => LineOutcome::Record(Record::System(SystemRecord { uuid, timestamp })),
        Some("summary") | Some("file-history-snapshot") | Some("progress") => LineOutcome::Skip,
        _ => LineOutcome::Record(Record::Unknown { uuid, timestamp }),
    }
}

fn build_user_record(uuid: String, timestamp: DateTime<Utc>, raw: &RawLine) -> UserRecord {
    let mut text = None;
    let mut tool_result_for = None;

    if let Some(msg) = &raw.message {
        if let Some(content) = &msg.content {
            match content {
                RawContent::Text(s) => text = Some(s.clone()),
                RawContent::Blocks(blocks) => {
                    for block in blocks {
                        match block.kind.as_str() {
                            "tool_result" => {
                                tool_result_for = block.content.clone();
                                if text.is_none() {
                                    text = block.content.clone();
                                }
                            }
                            "text" if text.is_none() => text = block.text.clone(),
                            _ => {}
                        }
                    }
                }
            }
        }
    }

    UserRecord {
        uuid,
        timestamp,
        text,
        tool_result_for,
        is_error: raw.is_error.unwrap_or(false),
    }
}

fn build_assistant_record(uuid: String, timestamp: DateTime<Utc>, raw: &RawLine) -> AssistantRecord {
    let mut text = None;
    let mut tool_name = None;
    let mut has_thinking = false;
    let mut thinking_len = 0usize;
    let mut has_tool_use = false;
    let mut input_tokens = None;
    let mut output_tokens = None;
    let mut model = None;

    if let Some(msg) = &raw.message {
        model = msg.model.clone();
        if let Some(usage) = &msg.usage {
            input_tokens = usage.input_tokens;
            output_tokens = usage.output_tokens;
        }
        if let Some(content) = &msg.content {
            match content {
                RawContent::Text(s) => text = Some(s.clone()),
                RawContent::Blocks(blocks) => {
                    for block in blocks {
                        match block.kind.as_str() {
                            "text" if text.is_none() => text = block.text.clone(),
                            "thinking" => {
                                has_thinking = true;
                                thinking_len += block.thinking.as_deref().map(str::len).unwrap_or(0);
                            }
                            "tool_use" => {
                                has_tool_use = true;
                                if tool_name.is_none() {
                                    tool_name = block.name.clone();
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
        }
    }

    AssistantRecord {
        uuid,
        timestamp,
        model,
        text,
        tool_name,
        has_thinking,
        thinking_len,
        has_tool_use,
        input_tokens,
        output_tokens,
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_lines(lines: &[&str]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        f.flush().unwrap();
        f
    }

    #[test]
    fn user_message_plain_text() {
        let f = write_lines(&[
            r#"{"type":"user","uuid":"u1","timestamp":"2026-01-01T00:00:00Z","message":{"role":"user","content":"hello there"}}"#,
        ]);
        let result = scan_session_file(f.path(), 0).unwrap();
        assert_eq!(result.malformed_lines, 0);
        assert_eq!(result.records.len(), 1);
        match &result.records[0] {
            Record::User(u) => assert_eq!(u.text.as_deref(), Some("hello there")),
            other => panic!("expected User record, got {other:?}"),
        }
    }

    #[test]
    fn assistant_text_and_tool_use_and_thinking() {
        let f = write_lines(&[
            r#"{"type":"assistant","uuid":"a1","timestamp":"2026-01-01T00:00:01Z","message":{"role":"assistant","model":"claude-x","usage":{"input_tokens":5,"output_tokens":9},"content":[{"type":"thinking","thinking":"hmm"},{"type":"text","text":"the answer"},{"type":"tool_use","name":"bash","input":{}}]}}"#,
        ]);
        let result = scan_session_file(f.path(), 0).unwrap();
        assert_eq!(result.records.len(), 1);
        match &result.records[0] {
            Record::Assistant(a) => {
                assert_eq!(a.text.as_deref(), Some("the answer"));
                assert_eq!(a.tool_name.as_deref(), Some("bash"));
                assert!(a.has_thinking);
                assert_eq!(a.thinking_len, 3);
                assert!(a.has_tool_use);
                assert_eq!(a.input_tokens, Some(5));
                assert_eq!(a.output_tokens, Some(9));
            }
            other => panic!("expected Assistant record, got {other:?}"),
        }
    }

    #[test]
    fn metadata_types_are_skipped_not_malformed() {
        let f = write_lines(&[
            r#"{"type":"summary","uuid":"s1"}"#,
            r#"{"type":"file-history-snapshot"}"#,
            r#"{"type":"progress"}"#,
        ]);
        let result = scan_session_file(f.path(), 0).unwrap();
        assert_eq!(result.records.len(), 0);
        assert_eq!(result.malformed_lines, 0);
    }

    #[test]
    fn malformed_line_is_counted_and_skipped_without_halting() {
        let f = write_lines(&[
            r#"{"type":"user","uuid":"u1","timestamp":"2026-01-01T00:00:00Z","message":{"content":"one"}}"#,
            "not valid json{{{",
            r#"{"type":"user","uuid":"u2","timestamp":"2026-01-01T00:00:02Z","message":{"content":"two"}}"#,
        ]);
        let result = scan_session_file(f.path(), 0).unwrap();
        assert_eq!(result.malformed_lines, 1);
        assert_eq!(result.records.len(), 2);
    }

    #[test]
    fn partial_trailing_line_is_not_consumed() {
        let mut f = NamedTempFile::new().unwrap();
        write!(
            f,
            r#"{{"type":"user","uuid":"u1","timestamp":"2026-01-01T00:00:00Z","message":{{"content":"one"}}}}"#
        )
        .unwrap();
        write!(f, "\n{{\"type\":\"user\"").unwrap(); // no trailing newline
        f.flush().unwrap();

        let result = scan_session_file(f.path(), 0).unwrap();
        assert_eq!(result.records.len(), 1);
        // new_offset should point just past the first complete line, not EOF
        let full_len = std::fs::metadata(f.path()).unwrap().len();
        assert!(result.new_offset < full_len);
    }

    #[test]
    fn offset_resume_only_scans_new_bytes() {
        let f = write_lines(&[
            r#"{"type":"user","uuid":"u1","timestamp":"2026-01-01T00:00:00Z","message":{"content":"one"}}"#,
        ]);
        let first = scan_session_file(f.path(), 0).unwrap();
        assert_eq!(first.records.len(), 1);

        let mut file = std::fs::OpenOptions::new().append(true).open(f.path()).unwrap();
        writeln!(
            file,
            r#"{{"type":"user","uuid":"u2","timestamp":"2026-01-01T00:00:02Z","message":{{"content":"two"}}}}"#
        )
        .unwrap();

        let second = scan_session_file(f.path(), first.new_offset).unwrap();
        assert_eq!(second.records.len(), 1);
        match &second.records[0] {
            Record::User(u) => assert_eq!(u.text.as_deref(), Some("two")),
            other => panic!("expected User record, got {other:?}"),
        }
    }
}
