//! Paginated listing and recursive prefix operations
//!
//! Everything here is written against [`ObjectStore`], one request at a
//! time. The first failed per-object request aborts the remaining work;
//! progress already reported stays reported.

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::traits::{ListPage, ListRequest, ObjectRecord, ObjectStore};

/// `(completed, total)` pair reported after each per-object operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

/// Aggregate size information for a prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Stats {
    /// Number of non-folder objects
    pub objects: u64,
    /// Sum of object sizes in bytes
    pub total_size: u64,
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Fetch a single listing page
pub async fn list_page(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
    continuation_token: Option<String>,
) -> Result<ListPage> {
    let request = ListRequest {
        continuation_token,
        ..ListRequest::browse(prefix)
    };
    store.list_page(bucket, &request).await
}

/// Lazily enumerate every key under `prefix`, across pages
///
/// Requests are flat (no delimiter) and keep the prefix's own placeholder
/// object. The stream starts from the first page on every call.
pub fn list_all<'a>(
    store: &'a dyn ObjectStore,
    bucket: &'a str,
    prefix: &'a str,
) -> BoxStream<'a, Result<ObjectRecord>> {
    let pages = stream::try_unfold(Cursor::Start, move |cursor| async move {
        let token = match cursor {
            Cursor::Done => return Ok(None),
            Cursor::Start => None,
            Cursor::Next(token) => Some(token),
        };

        let request = ListRequest {
            continuation_token: token,
            ..ListRequest::recursive(prefix)
        };
        let page = store.list_page(bucket, &request).await?;

        let next = match (page.is_truncated, page.continuation_token) {
            (true, Some(token)) => Cursor::Next(token),
            (true, None) => {
                tracing::warn!(bucket, prefix, "truncated listing without continuation token");
                Cursor::Done
            }
            (false, _) => Cursor::Done,
        };

        Ok::<_, Error>(Some((page.entries, next)))
    });

    pages
        .map_ok(|entries| stream::iter(entries.into_iter().map(Ok::<_, Error>)))
        .try_flatten()
        .boxed()
}

/// Materialize `list_all` ordered longest key first
async fn collect_deepest_first(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
) -> Result<Vec<ObjectRecord>> {
    let mut records: Vec<ObjectRecord> = list_all(store, bucket, prefix).try_collect().await?;
    records.sort_by(|a, b| b.key.len().cmp(&a.key.len()).then_with(|| a.key.cmp(&b.key)));
    Ok(records)
}

/// Delete every object under `prefix`, children before their placeholders
///
/// Returns the number of listed objects deleted. A delimiter-terminated
/// prefix key is deleted last; a not-found outcome for it is tolerated.
pub async fn delete_recursive<F>(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
    cancel: &CancellationToken,
    mut on_progress: F,
) -> Result<usize>
where
    F: FnMut(Progress) + Send,
{
    let records = collect_deepest_first(store, bucket, prefix).await?;
    let total = records.len();
    on_progress(Progress { completed: 0, total });

    for (index, record) in records.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tracing::debug!(bucket, key = %record.key, "deleting");
        store.delete_object(bucket, &record.key).await?;
        on_progress(Progress {
            completed: index + 1,
            total,
        });
    }

    if prefix.ends_with('/') {
        match store.delete_object(bucket, prefix).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!(bucket, prefix, "prefix placeholder already absent");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(total)
}

/// Move every object under `old_prefix` to `new_prefix` (copy, then delete)
///
/// The destination key is `new_prefix` followed by the source key with the
/// literal `old_prefix` bytes removed. Returns the number of objects moved.
pub async fn rename_recursive<F>(
    store: &dyn ObjectStore,
    bucket: &str,
    old_prefix: &str,
    new_prefix: &str,
    cancel: &CancellationToken,
    mut on_progress: F,
) -> Result<usize>
where
    F: FnMut(Progress) + Send,
{
    if old_prefix == new_prefix {
        return Err(Error::Conflict(format!(
            "source and destination are both '{old_prefix}'"
        )));
    }

    let records: Vec<ObjectRecord> = collect_deepest_first(store, bucket, old_prefix)
        .await?
        .into_iter()
        .filter(|r| r.key.starts_with(old_prefix))
        .collect();
    let total = records.len();
    on_progress(Progress { completed: 0, total });

    for (index, record) in records.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let suffix = &record.key[old_prefix.len()..];
        let destination = format!("{new_prefix}{suffix}");

        tracing::debug!(bucket, from = %record.key, to = %destination, "renaming");
        store.copy_object(bucket, &record.key, &destination).await?;
        store.delete_object(bucket, &record.key).await?;
        on_progress(Progress {
            completed: index + 1,
            total,
        });
    }

    Ok(total)
}

/// Count non-folder objects under `prefix` and sum their sizes
pub async fn calculate_stats(store: &dyn ObjectStore, bucket: &str, prefix: &str) -> Result<Stats> {
    list_all(store, bucket, prefix)
        .try_fold(Stats::default(), |mut stats, record| async move {
            if !record.is_folder {
                stats.objects += 1;
                stats.total_size += record.size;
            }
            Ok(stats)
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, MemoryStore};

    fn store_with(keys: &[(&str, usize)]) -> MemoryStore {
        let store = MemoryStore::new().with_page_size(2);
        for (key, size) in keys {
            store.insert("b", key, vec![0u8; *size]);
        }
        store
    }

    #[tokio::test]
    async fn test_list_all_crosses_pages() {
        let store = store_with(&[("a/1", 1), ("a/2", 1), ("a/3", 1), ("a/4", 1), ("a/5", 1)]);

        let keys: Vec<String> = list_all(&store, "b", "a/")
            .map_ok(|r| r.key)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(keys, vec!["a/1", "a/2", "a/3", "a/4", "a/5"]);
        assert_eq!(store.count_calls(|c| matches!(c, Call::ListPage { .. })), 3);
    }

    #[tokio::test]
    async fn test_list_all_restarts_per_call() {
        let store = store_with(&[("a/1", 1), ("a/2", 1), ("a/3", 1)]);

        let first: Vec<_> = list_all(&store, "b", "a/").try_collect().await.unwrap();
        let second: Vec<_> = list_all(&store, "b", "a/").try_collect().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_delete_recursive_children_first() {
        let store = store_with(&[("docs/", 0), ("docs/a/", 0), ("docs/a/b.txt", 3), ("docs/c", 1)]);
        let mut reports = Vec::new();

        let deleted = delete_recursive(&store, "b", "docs/", &CancellationToken::new(), |p| {
            reports.push((p.completed, p.total))
        })
        .await
        .unwrap();

        assert_eq!(deleted, 4);
        assert_eq!(reports, vec![(0, 4), (1, 4), (2, 4), (3, 4), (4, 4)]);
        assert!(store.keys("b").is_empty());

        let order = store.deleted_keys();
        let pos = |k: &str| order.iter().position(|d| d == k).unwrap();
        assert!(pos("docs/a/b.txt") < pos("docs/a/"));
        assert!(pos("docs/a/") < pos("docs/"));
    }

    #[tokio::test]
    async fn test_delete_recursive_empty_prefix_is_noop() {
        let store = store_with(&[("other/x", 1)]);
        let mut reports = Vec::new();

        let deleted = delete_recursive(&store, "b", "docs/", &CancellationToken::new(), |p| {
            reports.push((p.completed, p.total))
        })
        .await
        .unwrap();

        assert_eq!(deleted, 0);
        assert_eq!(reports, vec![(0, 0)]);
        assert_eq!(store.keys("b"), vec!["other/x"]);
    }

    #[tokio::test]
    async fn test_delete_recursive_stops_on_first_failure() {
        let store = store_with(&[("d/1", 1), ("d/22", 1), ("d/333", 1)]);
        store.fail_delete("d/22");
        let mut reports = Vec::new();

        let err = delete_recursive(&store, "b", "d/", &CancellationToken::new(), |p| {
            reports.push(p.completed)
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Http { status: 500, .. }));
        assert_eq!(reports, vec![0, 1]);
        assert_eq!(store.keys("b"), vec!["d/1", "d/22"]);
    }

    #[tokio::test]
    async fn test_delete_recursive_honors_cancellation() {
        let store = store_with(&[("d/1", 1), ("d/2", 1)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = delete_recursive(&store, "b", "d/", &cancel, |_| {})
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(store.keys("b").len(), 2);
    }

    #[tokio::test]
    async fn test_rename_recursive_moves_tree() {
        let store = store_with(&[("docs/", 0), ("docs/a/b.txt", 3)]);
        let mut last = Progress::default();

        let moved = rename_recursive(
            &store,
            "b",
            "docs/",
            "archive/",
            &CancellationToken::new(),
            |p| last = p,
        )
        .await
        .unwrap();

        assert_eq!(moved, 2);
        assert_eq!(last, Progress { completed: 2, total: 2 });
        assert_eq!(store.keys("b"), vec!["archive/", "archive/a/b.txt"]);
        assert_eq!(store.object("b", "archive/a/b.txt").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_rename_uses_literal_prefix_removal() {
        let store = store_with(&[("docs//odd/key", 1), ("docs-old", 1)]);

        rename_recursive(&store, "b", "docs/", "new/", &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(store.keys("b"), vec!["docs-old", "new//odd/key"]);
    }

    #[tokio::test]
    async fn test_rename_to_same_prefix_is_rejected() {
        let store = store_with(&[("docs/a", 1)]);
        let err = rename_recursive(&store, "b", "docs/", "docs/", &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(store.keys("b"), vec!["docs/a"]);
    }

    #[tokio::test]
    async fn test_calculate_stats_skips_folders() {
        let store = store_with(&[("p/", 0), ("p/a", 10), ("p/b/", 0), ("p/b/c", 32)]);

        let stats = calculate_stats(&store, "b", "p/").await.unwrap();
        assert_eq!(stats, Stats { objects: 2, total_size: 42 });
    }

    #[tokio::test]
    async fn test_list_page_excludes_self() {
        let store = MemoryStore::new();
        for key in ["docs/", "docs/a.txt", "docs/sub/x"] {
            store.insert("b", key, vec![0u8; 1]);
        }

        let page = list_page(&store, "b", "docs/", None).await.unwrap();
        let keys: Vec<_> = page.entries.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["docs/a.txt", "docs/sub/"]);
    }
}
