//! File and directory uploads

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use walkdir::{DirEntry, WalkDir};

use super::TaskContext;
use super::TransferOptions;
use super::multipart::{self, Payload};
use crate::crypto::{self, META_ENCRYPTED, META_KEY_ALIAS};
use crate::error::{Error, Result};
use crate::path::as_prefix;
use crate::traits::PutOptions;

/// Upload one regular file to `bucket/key`
///
/// Payloads below the multipart threshold go up in a single PUT. With an
/// encryption alias the whole file is sealed in memory first and the
/// object is tagged with the alias.
pub(crate) async fn upload_file(
    ctx: &TaskContext,
    source: &Path,
    bucket: &str,
    key: &str,
    options: &TransferOptions,
    on_bytes: &(dyn Fn(u64, u64) + Send + Sync),
) -> Result<()> {
    let meta = tokio::fs::metadata(source).await?;
    if !meta.is_file() {
        return Err(Error::InvalidPath(format!(
            "{} is not a regular file",
            source.display()
        )));
    }

    let mut put = PutOptions {
        content_type: options.content_type.clone(),
        metadata: BTreeMap::new(),
        acl: options.acl,
    };

    let payload = match &options.encryption_key {
        Some(alias) => {
            let key_bytes = ctx.keys().require(alias)?;
            let plain = tokio::fs::read(source).await?;
            let sealed = crypto::encrypt(&plain, &key_bytes)?;
            put.metadata.insert(META_ENCRYPTED.into(), "true".into());
            put.metadata.insert(META_KEY_ALIAS.into(), alias.clone());
            Payload::Memory(Bytes::from(sealed))
        }
        None => Payload::File {
            path: source.to_path_buf(),
            len: meta.len(),
        },
    };

    let total = payload.len();
    if total < ctx.config().multipart_threshold {
        ctx.check_cancelled()?;
        on_bytes(0, total);
        let data = payload.read_range(0, total).await?;
        tracing::debug!(bucket, key, size = total, "single-request upload");
        ctx.store().put_object(bucket, key, data, &put).await?;
        on_bytes(total, total);
        Ok(())
    } else {
        multipart::upload(ctx, bucket, key, &payload, &put, on_bytes).await
    }
}

/// Upload every non-hidden regular file under `root`, one at a time
///
/// Progress counts files. The first failure aborts the rest.
pub(crate) async fn upload_tree(
    ctx: &TaskContext,
    root: &Path,
    bucket: &str,
    prefix: &str,
    options: &TransferOptions,
) -> Result<()> {
    let walk_root = root.to_path_buf();
    let files = tokio::task::spawn_blocking(move || collect_files(&walk_root))
        .await
        .map_err(|e| Error::General(format!("directory walk failed: {e}")))??;

    let prefix = if prefix.is_empty() {
        String::new()
    } else {
        as_prefix(prefix)
    };
    let total = files.len() as u64;
    ctx.progress(0, total);

    for (index, (path, relative)) in files.iter().enumerate() {
        ctx.check_cancelled()?;
        let key = format!("{prefix}{relative}");
        upload_file(ctx, path, bucket, &key, options, &|_, _| {}).await?;
        ctx.progress(index as u64 + 1, total);
    }
    Ok(())
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

/// Regular files under `root` with their `/`-joined relative paths
fn collect_files(root: &Path) -> Result<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| Error::InvalidPath(entry.path().display().to_string()))?;
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((entry.path().to_path_buf(), key));
    }
    Ok(files)
}
