//! Small shared helpers: abbreviated-count parsing, ID3 cover-art extraction,
//! and lock-guarded whole-document JSON files.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ArchiverError;

/// Parse an abbreviated engagement count as displayed by the forum.
///
/// `"1.2k"` becomes `1200`, `"3m"` becomes `3_000_000`, `"42"` stays `42`.
///
/// # Errors
///
/// Returns a parse error for empty or non-numeric input.
pub fn unabbr_number(value: &str) -> Result<u64, ArchiverError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ArchiverError::parse("count", "empty string"));
    }

    let (digits, multiplier) = match value.chars().last().map(|c| c.to_ascii_lowercase()) {
        Some('k') => (&value[..value.len() - 1], 1_000_u64),
        Some('m') => (&value[..value.len() - 1], 1_000_000),
        Some('b') => (&value[..value.len() - 1], 1_000_000_000),
        _ => (value, 1),
    };

    if multiplier == 1 {
        return digits
            .replace(',', "")
            .parse::<u64>()
            .map_err(|e| ArchiverError::parse("count", format!("'{value}': {e}")));
    }

    let number: f64 = digits
        .parse()
        .map_err(|e| ArchiverError::parse("count", format!("'{value}': {e}")))?;
    Ok((number * multiplier as f64).round() as u64)
}

/// Extract embedded cover art (an ID3v2 APIC frame) from raw audio bytes.
///
/// Returns `None` when the bytes carry no ID3v2 tag or no picture frame.
/// Only the picture payload is returned; no transcoding is performed.
#[must_use]
pub fn extract_cover(bytes: &[u8]) -> Option<Vec<u8>> {
    if bytes.len() < 10 || &bytes[0..3] != b"ID3" {
        return None;
    }
    let major = bytes[3];
    let tag_size = syncsafe_u32(&bytes[6..10])? as usize;
    let tag_end = (10 + tag_size).min(bytes.len());

    let mut pos = 10;
    while pos + 10 <= tag_end {
        let frame_id = &bytes[pos..pos + 4];
        if frame_id == [0, 0, 0, 0] {
            break;
        }
        // v2.4 frame sizes are syncsafe, v2.3 sizes are plain big-endian
        let raw_size = &bytes[pos + 4..pos + 8];
        let frame_size = if major >= 4 {
            syncsafe_u32(raw_size)? as usize
        } else {
            u32::from_be_bytes([raw_size[0], raw_size[1], raw_size[2], raw_size[3]]) as usize
        };
        let body_start = pos + 10;
        let body_end = body_start.checked_add(frame_size)?.min(tag_end);
        if frame_size == 0 || body_start >= body_end {
            break;
        }

        if frame_id == b"APIC" {
            return parse_apic_body(&bytes[body_start..body_end]);
        }
        pos = body_end;
    }
    None
}

/// Skip the APIC frame preamble (encoding, mime, picture type, description)
/// and return the remaining picture bytes.
fn parse_apic_body(body: &[u8]) -> Option<Vec<u8>> {
    let encoding = *body.first()?;
    let mut pos = 1;

    // Null-terminated latin1 mime type
    while pos < body.len() && body[pos] != 0 {
        pos += 1;
    }
    pos += 1; // terminator
    pos += 1; // picture type byte

    // Description terminator depends on the text encoding: UTF-16 variants
    // use a two-byte terminator.
    if encoding == 1 || encoding == 2 {
        while pos + 1 < body.len() && !(body[pos] == 0 && body[pos + 1] == 0) {
            pos += 2;
        }
        pos += 2;
    } else {
        while pos < body.len() && body[pos] != 0 {
            pos += 1;
        }
        pos += 1;
    }

    if pos >= body.len() {
        return None;
    }
    Some(body[pos..].to_vec())
}

fn syncsafe_u32(bytes: &[u8]) -> Option<u32> {
    if bytes.len() < 4 || bytes.iter().take(4).any(|b| b & 0x80 != 0) {
        return None;
    }
    Some(
        (u32::from(bytes[0]) << 21)
            | (u32::from(bytes[1]) << 14)
            | (u32::from(bytes[2]) << 7)
            | u32::from(bytes[3]),
    )
}

/// Read a JSON document under an exclusive file lock.
///
/// Returns `Ok(None)` when the file does not exist or is empty.
///
/// # Errors
///
/// Returns an error if the file cannot be locked, read, or parsed.
pub fn read_locked_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let mut file = match OpenOptions::new().read(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to open {}", path.display())),
    };
    file.lock_exclusive()
        .with_context(|| format!("Failed to lock {}", path.display()))?;
    let mut contents = String::new();
    let result = file.read_to_string(&mut contents);
    let _ = fs2::FileExt::unlock(&file);
    result.with_context(|| format!("Failed to read {}", path.display()))?;

    if contents.trim().is_empty() {
        return Ok(None);
    }
    let value = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(value))
}

/// Read-modify-write a JSON document as one unit under an exclusive lock.
///
/// The document is defaulted when absent, mutated in place, then written
/// back as a whole-document replace. The lock is held across the entire
/// read-then-write so concurrent external processes never observe a
/// partial write.
///
/// # Errors
///
/// Returns an error if the file cannot be locked, read, parsed, or written.
pub fn update_locked_json<T, F>(path: &Path, mutate: F) -> Result<T>
where
    T: Serialize + DeserializeOwned + Default,
    F: FnOnce(&mut T),
{
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    file.lock_exclusive()
        .with_context(|| format!("Failed to lock {}", path.display()))?;

    let result = (|| -> Result<T> {
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut value: T = if contents.trim().is_empty() {
            T::default()
        } else {
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        };
        mutate(&mut value);

        let serialized = serde_json::to_string_pretty(&value)
            .with_context(|| format!("Failed to serialize {}", path.display()))?;
        file.seek(SeekFrom::Start(0))?;
        file.set_len(0)?;
        file.write_all(serialized.as_bytes())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(value)
    })();

    let _ = fs2::FileExt::unlock(&file);
    result
}

/// Append one timestamped line to a plain-text log file.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or written.
pub fn append_log_line(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    writeln!(file, "[{}] {line}", chrono::Utc::now().to_rfc3339())
        .with_context(|| format!("Failed to append to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unabbr_number() {
        assert_eq!(unabbr_number("42").unwrap(), 42);
        assert_eq!(unabbr_number("1.2k").unwrap(), 1200);
        assert_eq!(unabbr_number("3m").unwrap(), 3_000_000);
        assert_eq!(unabbr_number("2b").unwrap(), 2_000_000_000);
        assert_eq!(unabbr_number("1,024").unwrap(), 1024);
        assert_eq!(unabbr_number(" 7K ").unwrap(), 7000);
        assert!(unabbr_number("").is_err());
        assert!(unabbr_number("abc").is_err());
    }

    #[test]
    fn test_extract_cover_from_id3v23() {
        // Minimal ID3v2.3 tag with a single APIC frame holding 4 payload bytes.
        let mime = b"image/png\0";
        let description = b"\0";
        let picture = [0xDE, 0xAD, 0xBE, 0xEF];
        let mut frame_body = vec![0u8]; // latin1 encoding
        frame_body.extend_from_slice(mime);
        frame_body.push(3); // picture type: front cover
        frame_body.extend_from_slice(description);
        frame_body.extend_from_slice(&picture);

        let mut frame = b"APIC".to_vec();
        frame.extend_from_slice(&(frame_body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&[0, 0]); // frame flags
        frame.extend_from_slice(&frame_body);

        let tag_size = frame.len() as u32;
        let mut tag = b"ID3".to_vec();
        tag.extend_from_slice(&[3, 0, 0]); // v2.3, no flags
        tag.extend_from_slice(&[
            ((tag_size >> 21) & 0x7F) as u8,
            ((tag_size >> 14) & 0x7F) as u8,
            ((tag_size >> 7) & 0x7F) as u8,
            (tag_size & 0x7F) as u8,
        ]);
        tag.extend_from_slice(&frame);

        assert_eq!(extract_cover(&tag), Some(picture.to_vec()));
    }

    #[test]
    fn test_extract_cover_absent() {
        assert_eq!(extract_cover(b"not audio at all"), None);
        assert_eq!(extract_cover(b""), None);
    }

    #[test]
    fn test_update_locked_json_round_trip() {
        #[derive(Default, serde::Serialize, serde::Deserialize)]
        struct Doc {
            count: u32,
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");

        let doc: Doc = update_locked_json(&path, |d: &mut Doc| d.count += 1).unwrap();
        assert_eq!(doc.count, 1);
        let doc: Doc = update_locked_json(&path, |d: &mut Doc| d.count += 1).unwrap();
        assert_eq!(doc.count, 2);

        let read: Option<Doc> = read_locked_json(&path).unwrap();
        assert_eq!(read.unwrap().count, 2);
    }
}
