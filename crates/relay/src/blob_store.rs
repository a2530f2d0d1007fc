//! Content-addressed blob storage for the relay (C6). Bytes are streamed to
//! a temp file while a running sha256 digest is computed, then moved
//! atomically into their final `(workspaceId, hash)` slot — the same
//! write-to-temp-then-rename shape this workspace's storage layer already
//! uses for durable writes.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::errors::{RelayError, Result};

/// Extension used when the caller's `ext` hint is absent or unusable.
const DEFAULT_EXT: &str = "bin";

fn sanitize_ext(ext: &str) -> &str {
    let ext = ext.trim_start_matches('.');
    if ext.is_empty() || ext.len() > 16 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        DEFAULT_EXT
    } else {
        ext
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut acc, byte| {
        acc.push_str(&format!("{byte:02x}"));
        acc
    })
}

fn workspace_dir(base_dir: &Path, workspace_id: &str) -> PathBuf {
    base_dir.join(workspace_id)
}

pub fn blob_path(base_dir: &Path, workspace_id: &str, hash: &str, ext: &str) -> PathBuf {
    workspace_dir(base_dir, workspace_id).join(format!("{hash}.{}", sanitize_ext(ext)))
}

/// Streams `bytes` to a temp file under `base_dir`, verifying the running
/// sha256 digest matches `claimed_hash` before moving it into place.
/// Returns the final path and byte count. Idempotent: a slot that already
/// holds bytes for this hash is left untouched (first successful upload
/// wins, per open question (c)).
pub fn write_blob(
    base_dir: &Path,
    workspace_id: &str,
    claimed_hash: &str,
    ext_hint: &str,
    bytes: &[u8],
) -> Result<(PathBuf, i64)> {
    let dir = workspace_dir(base_dir, workspace_id);
    fs::create_dir_all(&dir)?;

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let computed = hex_encode(&hasher.finalize());
    if computed != claimed_hash.to_lowercase() {
        return Err(RelayError::hash_mismatch(format!(
            "uploaded bytes hash to {computed}, caller claimed {claimed_hash}"
        )));
    }

    let final_path = blob_path(base_dir, workspace_id, claimed_hash, ext_hint);
    if final_path.exists() {
        return Ok((final_path, bytes.len() as i64));
    }

    let tmp_path = dir.join(format!(".{claimed_hash}.{}.tmp", std::process::id()));
    {
        let mut tmp_file = fs::File::create(&tmp_path)?;
        tmp_file.write_all(bytes)?;
        tmp_file.sync_all()?;
    }
    fs::rename(&tmp_path, &final_path)?;
    Ok((final_path, bytes.len() as i64))
}

pub fn read_blob(path: &Path) -> Result<Vec<u8>> {
    Ok(fs::read(path)?)
}

/// Parses a single-range `Range: bytes=start-end` header value. Returns
/// `None` for an absent/unparseable header (caller serves the full body),
/// `Some(Err(_))` for a syntactically valid but unsatisfiable range.
pub fn parse_range(header: &str, total_len: u64) -> Option<std::result::Result<(u64, u64), ()>> {
    let spec = header.strip_prefix("bytes=")?;
    let (start_str, end_str) = spec.split_once('-')?;

    if start_str.is_empty() {
        // suffix range: bytes=-N means the last N bytes
        let suffix_len: u64 = end_str.parse().ok()?;
        if suffix_len == 0 || total_len == 0 {
            return Some(Err(()));
        }
        let start = total_len.saturating_sub(suffix_len);
        return Some(Ok((start, total_len - 1)));
    }

    let start: u64 = start_str.parse().ok()?;
    let end: u64 = if end_str.is_empty() { total_len.saturating_sub(1) } else { end_str.parse().ok()? };

    if start > end || start >= total_len {
        return Some(Err(()));
    }
    Some(Ok((start, end.min(total_len.saturating_sub(1)))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_blob_rejects_hash_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_blob(dir.path(), "ws-1", "deadbeef", "txt", b"hello").unwrap_err();
        assert!(matches!(err, RelayError::Sync(e) if e.code == notewire_core::errors::SyncErrorCode::HashMismatch));
    }

    #[test]
    fn write_blob_then_read_round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut hasher = Sha256::new();
        hasher.update(b"hello world");
        let hash = hex_encode(&hasher.finalize());

        let (path, size) = write_blob(dir.path(), "ws-1", &hash, "txt", b"hello world").unwrap();
        assert_eq!(size, 11);
        assert_eq!(read_blob(&path).unwrap(), b"hello world");
    }

    #[test]
    fn write_blob_is_idempotent_on_repeat_upload() {
        let dir = tempfile::tempdir().unwrap();
        let mut hasher = Sha256::new();
        hasher.update(b"payload");
        let hash = hex_encode(&hasher.finalize());

        let (first_path, _) = write_blob(dir.path(), "ws-1", &hash, "bin", b"payload").unwrap();
        let (second_path, _) = write_blob(dir.path(), "ws-1", &hash, "bin", b"payload").unwrap();
        assert_eq!(first_path, second_path);
    }

    #[test]
    fn parse_range_handles_bounded_suffix_and_unsatisfiable_forms() {
        assert_eq!(parse_range("bytes=0-9", 100), Some(Ok((0, 9))));
        assert_eq!(parse_range("bytes=90-", 100), Some(Ok((90, 99))));
        assert_eq!(parse_range("bytes=-10", 100), Some(Ok((90, 99))));
        assert_eq!(parse_range("bytes=200-300", 100), Some(Err(())));
        assert_eq!(parse_range("not-a-range", 100), None);
    }
}
