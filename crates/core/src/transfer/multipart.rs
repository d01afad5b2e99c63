//! Multipart upload with resume
//!
//! A session left open by an interrupted upload of the same key is picked
//! up again: its committed parts are kept, only the missing part numbers
//! are sent, and completion lists every part of the payload.

use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::PathBuf;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::TaskContext;
use crate::error::{Error, Result};
use crate::traits::{PutOptions, UploadedPart};

/// Minimum part size accepted by S3 for all but the last part: 5 MiB
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum number of parts in one session (S3 limit)
pub const MAX_PARTS: u64 = 10_000;

/// Part size for a payload of `total` bytes
///
/// `chunk_size` is used as-is unless the payload would need more than
/// [`MAX_PARTS`] parts, in which case it grows just enough to fit.
pub fn part_size_for(total: u64, chunk_size: u64) -> u64 {
    if total.div_ceil(chunk_size) <= MAX_PARTS {
        chunk_size
    } else {
        total.div_ceil(MAX_PARTS)
    }
}

/// Calculate number of parts for a payload
pub fn calculate_parts(total: u64, part_size: u64) -> u32 {
    total.div_ceil(part_size) as u32
}

/// Get the byte range `[start, end)` of a part
pub fn part_byte_range(part_number: u32, part_size: u64, total: u64) -> (u64, u64) {
    let start = u64::from(part_number - 1) * part_size;
    let end = (start + part_size).min(total);
    (start, end)
}

/// Bytes being uploaded
pub(crate) enum Payload {
    /// Read from disk part by part
    File { path: PathBuf, len: u64 },
    /// Fully buffered (encrypted payloads)
    Memory(Bytes),
}

impl Payload {
    pub(crate) fn len(&self) -> u64 {
        match self {
            Payload::File { len, .. } => *len,
            Payload::Memory(data) => data.len() as u64,
        }
    }

    /// Whether a session for this payload may be resumed
    ///
    /// Encrypted bytes differ on every run (fresh nonce), so parts from an
    /// earlier session can never be reused.
    fn resumable(&self) -> bool {
        matches!(self, Payload::File { .. })
    }

    pub(crate) async fn read_range(&self, start: u64, end: u64) -> Result<Bytes> {
        match self {
            Payload::Memory(data) => Ok(data.slice(start as usize..end as usize)),
            Payload::File { path, .. } => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(SeekFrom::Start(start)).await?;
                let mut buf = vec![0u8; (end - start) as usize];
                file.read_exact(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

/// Check committed parts against the local layout, returning the reusable ETags
///
/// The remote part size is taken from part 1, or from the largest committed
/// part if part 1 is missing.
fn reusable_parts(
    parts: &[UploadedPart],
    total: u64,
    part_size: u64,
) -> Result<BTreeMap<u32, String>> {
    let Some(remote) = parts
        .iter()
        .find(|p| p.part_number == 1)
        .or_else(|| parts.iter().max_by_key(|p| p.size))
        .map(|p| p.size)
    else {
        return Ok(BTreeMap::new());
    };

    if remote != part_size {
        return Err(Error::PartSizeMismatch {
            remote,
            local: part_size,
        });
    }

    let count = calculate_parts(total, part_size);
    let mut reusable = BTreeMap::new();
    for part in parts {
        if part.part_number == 0 || part.part_number > count {
            return Err(Error::Conflict(format!(
                "session has part {} but the payload only has {count} parts",
                part.part_number
            )));
        }
        let (start, end) = part_byte_range(part.part_number, part_size, total);
        if part.size != end - start {
            return Err(Error::PartSizeMismatch {
                remote: part.size,
                local: end - start,
            });
        }
        reusable.insert(part.part_number, part.etag.clone());
    }
    Ok(reusable)
}

/// Find an open session for `key` and decide whether to resume it
///
/// Only the newest session is a resume candidate; older ones for the same
/// key are aborted. Sessions that cannot be resumed are aborted so a fresh
/// one can start from part 1.
async fn resume_session(
    ctx: &TaskContext,
    bucket: &str,
    key: &str,
    payload: &Payload,
    part_size: u64,
) -> Result<Option<(String, BTreeMap<u32, String>)>> {
    let store = ctx.store();
    let mut sessions: Vec<_> = store
        .list_multipart_uploads(bucket, key)
        .await?
        .into_iter()
        .filter(|u| u.key == key)
        .collect();
    sessions.sort_by_key(|u| u.initiated);
    let Some(session) = sessions.pop() else {
        return Ok(None);
    };
    for older in sessions {
        tracing::info!(bucket, key, upload_id = %older.upload_id, "aborting superseded multipart session");
        store
            .abort_multipart_upload(bucket, key, &older.upload_id)
            .await?;
    }

    if !payload.resumable() {
        tracing::info!(bucket, key, upload_id = %session.upload_id, "aborting stale session for encrypted upload");
        store
            .abort_multipart_upload(bucket, key, &session.upload_id)
            .await?;
        return Ok(None);
    }

    let parts = store.list_parts(bucket, key, &session.upload_id).await?;
    match reusable_parts(&parts, payload.len(), part_size) {
        Ok(reusable) => {
            tracing::info!(
                bucket,
                key,
                upload_id = %session.upload_id,
                committed = reusable.len(),
                "resuming multipart upload"
            );
            Ok(Some((session.upload_id, reusable)))
        }
        Err(e) => {
            tracing::warn!(bucket, key, upload_id = %session.upload_id, error = %e, "discarding multipart session");
            store
                .abort_multipart_upload(bucket, key, &session.upload_id)
                .await?;
            Ok(None)
        }
    }
}

/// Upload `payload` as a multipart session, resuming when possible
///
/// Cancellation is checked before each part; a cancelled upload leaves its
/// session open for a later resume.
pub(crate) async fn upload(
    ctx: &TaskContext,
    bucket: &str,
    key: &str,
    payload: &Payload,
    options: &PutOptions,
    on_bytes: &(dyn Fn(u64, u64) + Send + Sync),
) -> Result<()> {
    let store = ctx.store();
    let total = payload.len();
    let part_size = part_size_for(total, ctx.config().chunk_size);
    let count = calculate_parts(total, part_size);

    let (upload_id, mut parts) = match resume_session(ctx, bucket, key, payload, part_size).await? {
        Some(resumed) => resumed,
        None => {
            let upload_id = store.create_multipart_upload(bucket, key, options).await?;
            tracing::debug!(bucket, key, %upload_id, parts = count, "created multipart upload");
            (upload_id, BTreeMap::new())
        }
    };

    let mut done: u64 = parts
        .keys()
        .map(|n| {
            let (start, end) = part_byte_range(*n, part_size, total);
            end - start
        })
        .sum();
    on_bytes(done, total);

    for part_number in 1..=count {
        if parts.contains_key(&part_number) {
            continue;
        }
        ctx.check_cancelled()?;

        let (start, end) = part_byte_range(part_number, part_size, total);
        let data = payload.read_range(start, end).await?;
        let etag = store
            .upload_part(bucket, key, &upload_id, part_number, data)
            .await?;
        parts.insert(part_number, etag);

        done += end - start;
        on_bytes(done, total);
    }

    store
        .complete_multipart_upload(bucket, key, &upload_id, &parts)
        .await
}
