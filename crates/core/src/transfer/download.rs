//! Object and prefix downloads

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use futures::TryStreamExt;
use tokio::io::AsyncWriteExt;

use super::TaskContext;
use crate::crypto::{self, META_ENCRYPTED, META_KEY_ALIAS};
use crate::error::{Error, Result};
use crate::lister::list_all;
use crate::path::as_prefix;
use crate::traits::ByteRange;

/// Suffix of the staging file a ranged download writes into
pub const STAGING_SUFFIX: &str = ".stowpart";

/// Staging path next to `destination`
pub fn staging_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(STAGING_SUFFIX);
    destination.with_file_name(name)
}

fn lookup<'a>(metadata: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    metadata
        .get(name)
        .or_else(|| metadata.get(&format!("x-amz-meta-{name}")))
        .map(String::as_str)
}

/// Key alias an object was encrypted with, if it is tagged as encrypted
fn encryption_alias(metadata: &BTreeMap<String, String>) -> Result<Option<String>> {
    let encrypted = lookup(metadata, META_ENCRYPTED).is_some_and(|v| v.eq_ignore_ascii_case("true"));
    if !encrypted {
        return Ok(None);
    }
    match lookup(metadata, META_KEY_ALIAS) {
        Some(alias) if !alias.is_empty() => Ok(Some(alias.to_string())),
        _ => Err(Error::Encryption(
            "object is tagged as encrypted but names no key alias".into(),
        )),
    }
}

/// Download `bucket/key` to `destination`
///
/// Objects at or above the multipart threshold are fetched in ranged
/// chunks appended to a staging file. An existing staging file is resumed
/// from its length, or restarted when it is longer than the object.
pub(crate) async fn download_file(
    ctx: &TaskContext,
    bucket: &str,
    key: &str,
    destination: &Path,
    on_bytes: &(dyn Fn(u64, u64) + Send + Sync),
) -> Result<()> {
    let store = ctx.store();
    let meta = store.head_object(bucket, key).await?;
    let key_bytes = match encryption_alias(&meta.metadata)? {
        Some(alias) => Some(ctx.keys().require(&alias)?),
        None => None,
    };

    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let size = meta.size;
    if size < ctx.config().multipart_threshold {
        ctx.check_cancelled()?;
        on_bytes(0, size);
        let data = store.get_object(bucket, key, None).await?;
        match &key_bytes {
            Some(k) => tokio::fs::write(destination, crypto::decrypt(&data, k)?).await?,
            None => tokio::fs::write(destination, &data).await?,
        }
        on_bytes(size, size);
        return Ok(());
    }

    let staging = staging_path(destination);
    let mut offset = match tokio::fs::metadata(&staging).await {
        Ok(m) => m.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
        Err(e) => return Err(e.into()),
    };
    if offset > size {
        tracing::warn!(path = %staging.display(), offset, size, "staging file longer than object; restarting");
        tokio::fs::remove_file(&staging).await?;
        offset = 0;
    } else if offset > 0 {
        tracing::info!(bucket, key, offset, "resuming download");
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&staging)
        .await?;
    on_bytes(offset, size);

    let chunk = ctx.config().chunk_size;
    while offset < size {
        ctx.check_cancelled()?;
        let len = chunk.min(size - offset);
        let data = store
            .get_object(bucket, key, Some(ByteRange::from_len(offset, len)))
            .await?;
        if data.len() as u64 != len {
            return Err(Error::General(format!(
                "range request at offset {offset} returned {} bytes, expected {len}",
                data.len()
            )));
        }
        file.write_all(&data).await?;
        offset += len;
        on_bytes(offset, size);
    }
    file.flush().await?;
    drop(file);

    match &key_bytes {
        Some(k) => {
            let sealed = tokio::fs::read(&staging).await?;
            tokio::fs::write(destination, crypto::decrypt(&sealed, k)?).await?;
            tokio::fs::remove_file(&staging).await?;
        }
        None => tokio::fs::rename(&staging, destination).await?,
    }
    Ok(())
}

/// Local path for `key` relative to `prefix` under `root`
fn local_target(root: &Path, prefix: &str, key: &str) -> Result<PathBuf> {
    let relative = key.strip_prefix(prefix).unwrap_or(key);
    let mut path = root.to_path_buf();
    let mut pushed = false;
    for segment in relative.split('/').filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." {
            return Err(Error::InvalidPath(format!(
                "object key '{key}' escapes the download directory"
            )));
        }
        path.push(segment);
        pushed = true;
    }
    if !pushed {
        return Err(Error::InvalidPath(format!(
            "object key '{key}' has no file name below '{prefix}'"
        )));
    }
    Ok(path)
}

/// Download every object under `prefix` into `root`, one at a time
///
/// `prefix` is treated as a folder, so `docs` does not match `docs-old/`.
/// Folder placeholders are skipped. Progress counts files.
pub(crate) async fn download_tree(
    ctx: &TaskContext,
    bucket: &str,
    prefix: &str,
    root: &Path,
) -> Result<()> {
    let prefix = as_prefix(prefix);
    let prefix = prefix.as_str();
    let records: Vec<_> = list_all(ctx.store(), bucket, prefix)
        .try_filter(|r| futures::future::ready(!r.is_folder))
        .try_collect()
        .await?;

    let total = records.len() as u64;
    ctx.progress(0, total);

    for (index, record) in records.iter().enumerate() {
        ctx.check_cancelled()?;
        let target = local_target(root, prefix, &record.key)?;
        download_file(ctx, bucket, &record.key, &target, &|_, _| {}).await?;
        ctx.progress(index as u64 + 1, total);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_staging_path() {
        assert_eq!(
            staging_path(Path::new("/tmp/out/file.bin")),
            PathBuf::from("/tmp/out/file.bin.stowpart")
        );
    }

    #[test]
    fn test_encryption_alias_lookup() {
        assert_eq!(encryption_alias(&meta(&[])).unwrap(), None);
        assert_eq!(
            encryption_alias(&meta(&[("encrypted", "false"), ("encryption-key-alias", "k")])).unwrap(),
            None
        );
        assert_eq!(
            encryption_alias(&meta(&[("encrypted", "true"), ("encryption-key-alias", "k")])).unwrap(),
            Some("k".to_string())
        );
        assert_eq!(
            encryption_alias(&meta(&[
                ("x-amz-meta-encrypted", "TRUE"),
                ("x-amz-meta-encryption-key-alias", "legacy")
            ]))
            .unwrap(),
            Some("legacy".to_string())
        );
        assert!(encryption_alias(&meta(&[("encrypted", "true")])).is_err());
    }

    #[test]
    fn test_local_target() {
        let root = Path::new("/dl");
        assert_eq!(
            local_target(root, "docs/", "docs/a/b.txt").unwrap(),
            PathBuf::from("/dl/a/b.txt")
        );
        assert_eq!(
            local_target(root, "docs", "docs/b.txt").unwrap(),
            PathBuf::from("/dl/b.txt")
        );
        assert!(local_target(root, "docs/", "docs/../etc/passwd").is_err());
        assert!(local_target(root, "docs/", "docs/").is_err());
    }
}
