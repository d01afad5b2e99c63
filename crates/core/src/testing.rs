//! In-memory ObjectStore used by the core's tests
//!
//! Behaves like a small S3 bucket server: delimiter-aware paginated
//! listings, multipart sessions and copy. Every call is recorded so tests
//! can assert ordering, and individual operations can be made to fail or
//! to pause at a chosen part number.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use jiff::Timestamp;
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::traits::{
    BucketInfo, ByteRange, CannedAcl, ListPage, ListRequest, MultipartUpload, ObjectMeta,
    ObjectRecord, ObjectStore, ObjectVersion, PresignMethod, PutOptions, UploadedPart,
    VersioningStatus,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListPage { prefix: String, token: Option<String> },
    Head { key: String },
    Get { key: String, range: Option<ByteRange> },
    Put { key: String },
    Delete { key: String },
    Copy { from: String, to: String },
    CreateMultipart { key: String },
    ListUploads { prefix: String },
    ListParts { upload_id: String },
    UploadPart { upload_id: String, part_number: u32 },
    Complete { upload_id: String, parts: Vec<u32> },
    Abort { upload_id: String },
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
struct Session {
    bucket: String,
    key: String,
    metadata: BTreeMap<String, String>,
    initiated: Timestamp,
    parts: BTreeMap<u32, (String, Vec<u8>)>,
}

/// Pause point at one `upload_part` or ranged `get_object` call
#[derive(Clone)]
pub struct PartGate {
    /// Notified when the gated call starts
    pub reached: Arc<Notify>,
    /// Notify to let the gated call finish
    pub release: Arc<Notify>,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<(String, String), StoredObject>,
    sessions: BTreeMap<String, Session>,
    next_upload: u64,
    calls: Vec<Call>,
    deleted: Vec<String>,
    fail_deletes: HashSet<String>,
    fail_puts: HashSet<String>,
    fail_parts: HashSet<u32>,
    gates: BTreeMap<u32, PartGate>,
    range_gates: BTreeMap<u64, PartGate>,
}

pub struct MemoryStore {
    state: Mutex<State>,
    page_size: usize,
}

fn server_error(what: &str) -> Error {
    Error::Http {
        status: 500,
        code: Some("InternalError".into()),
        message: format!("injected failure: {what}"),
    }
}

fn etag_of(data: &[u8]) -> String {
    let sum: u64 = data.iter().map(|b| u64::from(*b)).sum();
    format!("{:x}-{}", sum, data.len())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: 1000,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn insert(&self, bucket: &str, key: &str, data: Vec<u8>) {
        self.insert_with_metadata(bucket, key, data, BTreeMap::new());
    }

    pub fn insert_with_metadata(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        metadata: BTreeMap<String, String>,
    ) {
        self.state().objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject { data, metadata },
        );
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.state()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.state()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.data.clone())
    }

    pub fn metadata(&self, bucket: &str, key: &str) -> Option<BTreeMap<String, String>> {
        self.state()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.metadata.clone())
    }

    /// Open a session with the given parts already committed
    ///
    /// Each seeded session is initiated one second after the previous one.
    pub fn seed_session(&self, bucket: &str, key: &str, parts: Vec<Vec<u8>>) -> String {
        let mut state = self.state();
        state.next_upload += 1;
        let upload_id = format!("seeded-{}", state.next_upload);
        let initiated =
            Timestamp::from_second(state.next_upload as i64).unwrap_or(Timestamp::UNIX_EPOCH);
        let parts = parts
            .into_iter()
            .enumerate()
            .map(|(i, data)| ((i + 1) as u32, (etag_of(&data), data)))
            .collect();
        state.sessions.insert(
            upload_id.clone(),
            Session {
                bucket: bucket.to_string(),
                key: key.to_string(),
                metadata: BTreeMap::new(),
                initiated,
                parts,
            },
        );
        upload_id
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.state().sessions.keys().cloned().collect()
    }

    pub fn session_parts(&self, upload_id: &str) -> Vec<u32> {
        self.state()
            .sessions
            .get(upload_id)
            .map(|s| s.parts.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn fail_delete(&self, key: &str) {
        self.state().fail_deletes.insert(key.to_string());
    }

    pub fn fail_put(&self, key: &str) {
        self.state().fail_puts.insert(key.to_string());
    }

    pub fn fail_part(&self, part_number: u32) {
        self.state().fail_parts.insert(part_number);
    }

    /// Pause `upload_part` for `part_number` until the gate is released
    pub fn gate_part(&self, part_number: u32) -> PartGate {
        let gate = PartGate {
            reached: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        };
        self.state().gates.insert(part_number, gate.clone());
        gate
    }

    /// Pause the ranged `get_object` starting at `start` until the gate is released
    pub fn gate_range(&self, start: u64) -> PartGate {
        let gate = PartGate {
            reached: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        };
        self.state().range_gates.insert(start, gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn count_calls(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }

    /// Keys successfully deleted, in deletion order
    pub fn deleted_keys(&self) -> Vec<String> {
        self.state().deleted.clone()
    }

    fn record(&self, call: Call) {
        self.state().calls.push(call);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

enum Unit {
    Object(String),
    Prefix(String),
}

impl Unit {
    fn key(&self) -> &str {
        match self {
            Unit::Object(k) | Unit::Prefix(k) => k,
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        let state = self.state();
        let mut names: Vec<String> = state.objects.keys().map(|(b, _)| b.clone()).collect();
        names.dedup();
        Ok(names
            .into_iter()
            .map(|name| BucketInfo {
                name,
                created: None,
            })
            .collect())
    }

    async fn list_page(&self, bucket: &str, request: &ListRequest) -> Result<ListPage> {
        self.record(Call::ListPage {
            prefix: request.prefix.clone(),
            token: request.continuation_token.clone(),
        });
        let state = self.state();
        let prefix = request.prefix.as_str();
        let own = prefix.trim_end_matches('/');

        let mut units: Vec<Unit> = Vec::new();
        for ((b, key), _) in state.objects.iter() {
            if b != bucket || !key.starts_with(prefix) {
                continue;
            }
            let unit = match request.delimiter.as_deref() {
                Some(delim) => match key[prefix.len()..].find(delim) {
                    Some(pos) => Unit::Prefix(key[..prefix.len() + pos + delim.len()].to_string()),
                    None => Unit::Object(key.clone()),
                },
                None => Unit::Object(key.clone()),
            };
            if let (Unit::Prefix(p), Some(Unit::Prefix(last))) = (&unit, units.last()) {
                if p == last {
                    continue;
                }
            }
            if request.exclude_self && unit.key().trim_end_matches('/') == own {
                continue;
            }
            if let Some(token) = &request.continuation_token {
                if unit.key() <= token.as_str() {
                    continue;
                }
            }
            units.push(unit);
        }

        let limit = request
            .max_keys
            .map(|m| m as usize)
            .unwrap_or(self.page_size)
            .min(self.page_size);
        let is_truncated = units.len() > limit;
        units.truncate(limit);
        let continuation_token = if is_truncated {
            units.last().map(|u| u.key().to_string())
        } else {
            None
        };

        let mut entries = Vec::new();
        let mut folders = Vec::new();
        for unit in units {
            match unit {
                Unit::Object(key) => {
                    let object = &state.objects[&(bucket.to_string(), key.clone())];
                    let mut record =
                        ObjectRecord::object(key, object.data.len() as u64, Timestamp::UNIX_EPOCH);
                    record.etag = Some(etag_of(&object.data));
                    entries.push(record);
                }
                Unit::Prefix(p) => folders.push(ObjectRecord::folder(p)),
            }
        }
        entries.extend(folders);

        Ok(ListPage {
            entries,
            is_truncated,
            continuation_token,
        })
    }

    async fn list_versions(&self, bucket: &str, key: &str) -> Result<Vec<ObjectVersion>> {
        let state = self.state();
        Ok(state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| ObjectVersion {
                key: key.to_string(),
                version_id: "null".into(),
                is_latest: true,
                last_modified: Timestamp::UNIX_EPOCH,
                size: o.data.len() as u64,
                is_delete_marker: false,
            })
            .into_iter()
            .collect())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta> {
        self.record(Call::Head {
            key: key.to_string(),
        });
        let state = self.state();
        let object = state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        Ok(ObjectMeta {
            key: key.to_string(),
            size: object.data.len() as u64,
            etag: Some(etag_of(&object.data)),
            content_type: None,
            last_modified: Some(Timestamp::UNIX_EPOCH),
            metadata: object.metadata.clone(),
        })
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<Bytes> {
        self.record(Call::Get {
            key: key.to_string(),
            range,
        });
        let gate = range.and_then(|r| self.state().range_gates.remove(&r.start));
        if let Some(gate) = gate {
            gate.reached.notify_one();
            gate.release.notified().await;
        }
        let state = self.state();
        let object = state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        let data = match range {
            Some(r) => {
                let end = (r.end as usize + 1).min(object.data.len());
                object.data[r.start as usize..end].to_vec()
            }
            None => object.data.clone(),
        };
        Ok(Bytes::from(data))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> Result<Option<String>> {
        self.record(Call::Put {
            key: key.to_string(),
        });
        if self.state().fail_puts.contains(key) {
            return Err(server_error(key));
        }
        let etag = etag_of(&data);
        self.insert_with_metadata(bucket, key, data.to_vec(), options.metadata.clone());
        Ok(Some(etag))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.record(Call::Delete {
            key: key.to_string(),
        });
        let mut state = self.state();
        if state.fail_deletes.contains(key) {
            return Err(server_error(key));
        }
        match state.objects.remove(&(bucket.to_string(), key.to_string())) {
            Some(_) => {
                state.deleted.push(key.to_string());
                Ok(())
            }
            None => Err(Error::NotFound(key.to_string())),
        }
    }

    async fn copy_object(&self, bucket: &str, src_key: &str, dst_key: &str) -> Result<()> {
        self.record(Call::Copy {
            from: src_key.to_string(),
            to: dst_key.to_string(),
        });
        let mut state = self.state();
        let object = state
            .objects
            .get(&(bucket.to_string(), src_key.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound(src_key.to_string()))?;
        state
            .objects
            .insert((bucket.to_string(), dst_key.to_string()), object);
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        options: &PutOptions,
    ) -> Result<String> {
        self.record(Call::CreateMultipart {
            key: key.to_string(),
        });
        let mut state = self.state();
        state.next_upload += 1;
        let upload_id = format!("upload-{}", state.next_upload);
        state.sessions.insert(
            upload_id.clone(),
            Session {
                bucket: bucket.to_string(),
                key: key.to_string(),
                metadata: options.metadata.clone(),
                initiated: Timestamp::now(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<MultipartUpload>> {
        self.record(Call::ListUploads {
            prefix: prefix.to_string(),
        });
        Ok(self
            .state()
            .sessions
            .iter()
            .filter(|(_, s)| s.bucket == bucket && s.key.starts_with(prefix))
            .map(|(id, s)| MultipartUpload {
                key: s.key.clone(),
                upload_id: id.clone(),
                initiated: Some(s.initiated),
            })
            .collect())
    }

    async fn list_parts(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<Vec<UploadedPart>> {
        self.record(Call::ListParts {
            upload_id: upload_id.to_string(),
        });
        let state = self.state();
        let session = state
            .sessions
            .get(upload_id)
            .ok_or_else(|| Error::NotFound(upload_id.to_string()))?;
        Ok(session
            .parts
            .iter()
            .map(|(n, (etag, data))| UploadedPart {
                part_number: *n,
                etag: etag.clone(),
                size: data.len() as u64,
            })
            .collect())
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String> {
        self.record(Call::UploadPart {
            upload_id: upload_id.to_string(),
            part_number,
        });

        let gate = self.state().gates.remove(&part_number);
        if let Some(gate) = gate {
            gate.reached.notify_one();
            gate.release.notified().await;
        }

        let mut state = self.state();
        if state.fail_parts.contains(&part_number) {
            return Err(server_error("upload part"));
        }
        let session = state
            .sessions
            .get_mut(upload_id)
            .ok_or_else(|| Error::NotFound(upload_id.to_string()))?;
        let etag = etag_of(&data);
        session
            .parts
            .insert(part_number, (etag.clone(), data.to_vec()));
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        parts: &BTreeMap<u32, String>,
    ) -> Result<()> {
        self.record(Call::Complete {
            upload_id: upload_id.to_string(),
            parts: parts.keys().copied().collect(),
        });
        let mut state = self.state();
        let session = state
            .sessions
            .remove(upload_id)
            .ok_or_else(|| Error::NotFound(upload_id.to_string()))?;

        let mut data = Vec::new();
        for (number, etag) in parts {
            match session.parts.get(number) {
                Some((stored, bytes)) if stored == etag => data.extend_from_slice(bytes),
                _ => {
                    return Err(Error::Http {
                        status: 400,
                        code: Some("InvalidPart".into()),
                        message: format!("part {number} does not match"),
                    });
                }
            }
        }
        state.objects.insert(
            (session.bucket, session.key),
            StoredObject {
                data,
                metadata: session.metadata,
            },
        );
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<()> {
        self.record(Call::Abort {
            upload_id: upload_id.to_string(),
        });
        self.state().sessions.remove(upload_id);
        Ok(())
    }

    async fn set_acl(&self, _bucket: &str, _key: Option<&str>, _acl: CannedAcl) -> Result<()> {
        Ok(())
    }

    async fn get_versioning(&self, _bucket: &str) -> Result<VersioningStatus> {
        Ok(VersioningStatus::Unversioned)
    }

    async fn set_versioning(&self, _bucket: &str, _enabled: bool) -> Result<()> {
        Ok(())
    }

    async fn object_lock_enabled(&self, _bucket: &str) -> Result<bool> {
        Ok(false)
    }

    async fn set_legal_hold(&self, _bucket: &str, _key: &str, _on: bool) -> Result<()> {
        Ok(())
    }

    fn presign(
        &self,
        _method: PresignMethod,
        bucket: &str,
        key: &str,
        _expires: Duration,
    ) -> Result<String> {
        Ok(format!("memory://{bucket}/{key}"))
    }
}
