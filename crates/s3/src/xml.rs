//! Decoders for S3 XML response bodies
//!
//! [`Events`] turns a document into a pull-based stream of element opens
//! and closes, where every close carries the text accumulated inside the
//! element. Text may arrive in several fragments (entity references and
//! CDATA sections are separate reader events); fragments are concatenated,
//! never overwritten. Each decoder below is a small state machine over one
//! fresh `Events` and is not reusable across documents.

use std::collections::HashSet;

use jiff::Timestamp;
use quick_xml::Reader;
use quick_xml::events::Event;
use stow_core::{
    BucketInfo, Error, ListPage, MultipartUpload, ObjectRecord, ObjectVersion, Result,
    UploadedPart, VersioningStatus,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum XmlEvent {
    Open(String),
    Close { name: String, text: String },
}

pub(crate) struct Events<'a> {
    reader: Reader<&'a [u8]>,
    text: String,
    pending: Option<XmlEvent>,
    saw_root: bool,
}

fn resolve_entity(name: &[u8]) -> Option<char> {
    match name {
        b"amp" => Some('&'),
        b"lt" => Some('<'),
        b"gt" => Some('>'),
        b"quot" => Some('"'),
        b"apos" => Some('\''),
        [b'#', b'x' | b'X', hex @ ..] => std::str::from_utf8(hex)
            .ok()
            .and_then(|h| u32::from_str_radix(h, 16).ok())
            .and_then(char::from_u32),
        [b'#', dec @ ..] => std::str::from_utf8(dec)
            .ok()
            .and_then(|d| d.parse().ok())
            .and_then(char::from_u32),
        _ => None,
    }
}

impl<'a> Events<'a> {
    pub(crate) fn new(body: &'a [u8]) -> Self {
        Self {
            reader: Reader::from_reader(body),
            text: String::new(),
            pending: None,
            saw_root: false,
        }
    }

    /// Next open/close event, or `None` at the end of the document
    pub(crate) fn next_event(&mut self) -> Result<Option<XmlEvent>> {
        if let Some(event) = self.pending.take() {
            return Ok(Some(event));
        }
        loop {
            let event = self
                .reader
                .read_event()
                .map_err(|e| Error::Decode(format!("malformed XML: {e}")))?;
            match event {
                Event::Start(e) => {
                    self.saw_root = true;
                    self.text.clear();
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    return Ok(Some(XmlEvent::Open(name)));
                }
                Event::Empty(e) => {
                    self.saw_root = true;
                    self.text.clear();
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    self.pending = Some(XmlEvent::Close {
                        name: name.clone(),
                        text: String::new(),
                    });
                    return Ok(Some(XmlEvent::Open(name)));
                }
                Event::End(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    let text = std::mem::take(&mut self.text);
                    return Ok(Some(XmlEvent::Close { name, text }));
                }
                Event::Text(e) => {
                    self.text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
                Event::CData(e) => {
                    self.text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
                Event::GeneralRef(e) => {
                    let raw: &[u8] = &e;
                    match resolve_entity(raw) {
                        Some(c) => self.text.push(c),
                        None => {
                            self.text.push('&');
                            self.text.push_str(&String::from_utf8_lossy(raw));
                            self.text.push(';');
                        }
                    }
                }
                Event::Eof => {
                    if !self.saw_root {
                        return Err(Error::Decode("response body has no XML root element".into()));
                    }
                    return Ok(None);
                }
                _ => {}
            }
        }
    }
}

/// Parse an S3 timestamp, defaulting to now
///
/// Accepts RFC 3339 with or without fractional seconds, and a bare civil
/// datetime taken as UTC.
pub(crate) fn parse_timestamp(raw: &str) -> Timestamp {
    let raw = raw.trim();
    if let Ok(ts) = raw.parse::<Timestamp>() {
        return ts;
    }
    if let Ok(dt) = raw.trim_end_matches('Z').parse::<jiff::civil::DateTime>() {
        if let Ok(zoned) = dt.to_zoned(jiff::tz::TimeZone::UTC) {
            return zoned.timestamp();
        }
    }
    tracing::warn!(value = raw, "unparseable timestamp in response; using current time");
    Timestamp::now()
}

fn strip_quotes(etag: &str) -> String {
    etag.trim().trim_matches('"').to_string()
}

fn parse_bool(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("true")
}

fn non_empty(raw: String) -> Option<String> {
    if raw.is_empty() { None } else { Some(raw) }
}

#[derive(Default)]
struct RecordFields {
    key: String,
    size: u64,
    last_modified: Option<Timestamp>,
    etag: Option<String>,
    storage_class: Option<String>,
}

/// Reattach the queried prefix to a provider-relative key
fn absolute_key(prefix: &str, key: String) -> String {
    if prefix.is_empty() || key.starts_with(prefix) {
        key
    } else {
        format!("{prefix}{key}")
    }
}

fn is_self(prefix: &str, key: &str) -> bool {
    !prefix.is_empty() && key.trim_end_matches('/') == prefix.trim_end_matches('/')
}

/// Decode a `ListBucketResult` (ListObjectsV2) page
pub fn decode_list_objects(body: &[u8], prefix: &str, exclude_self: bool) -> Result<ListPage> {
    let mut events = Events::new(body);
    let mut page = ListPage::default();
    let mut folders: Vec<ObjectRecord> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut current: Option<RecordFields> = None;
    let mut in_prefixes = false;

    while let Some(event) = events.next_event()? {
        match event {
            XmlEvent::Open(name) => match name.as_str() {
                "Contents" => current = Some(RecordFields::default()),
                "CommonPrefixes" => in_prefixes = true,
                _ => {}
            },
            XmlEvent::Close { name, text } => {
                if let Some(fields) = current.as_mut() {
                    match name.as_str() {
                        "Key" => fields.key = text,
                        "Size" => fields.size = text.trim().parse().unwrap_or(0),
                        "LastModified" => fields.last_modified = Some(parse_timestamp(&text)),
                        "ETag" => fields.etag = non_empty(strip_quotes(&text)),
                        "StorageClass" => fields.storage_class = non_empty(text),
                        "Contents" => {
                            if let Some(fields) = current.take() {
                                let key = absolute_key(prefix, fields.key);
                                if key.is_empty() || (exclude_self && is_self(prefix, &key)) {
                                    continue;
                                }
                                let mut record = ObjectRecord::object(
                                    key,
                                    fields.size,
                                    fields.last_modified.unwrap_or_else(Timestamp::now),
                                );
                                record.etag = fields.etag;
                                record.storage_class = fields.storage_class;
                                seen.insert(record.key.clone());
                                page.entries.push(record);
                            }
                        }
                        _ => {}
                    }
                    continue;
                }

                match name.as_str() {
                    "Prefix" if in_prefixes => {
                        let key = absolute_key(prefix, text);
                        if key.is_empty() || (exclude_self && is_self(prefix, &key)) {
                            continue;
                        }
                        if seen.insert(key.clone()) {
                            folders.push(ObjectRecord::folder(key));
                        }
                    }
                    "CommonPrefixes" => in_prefixes = false,
                    "IsTruncated" => page.is_truncated = parse_bool(&text),
                    "NextContinuationToken" => page.continuation_token = non_empty(text),
                    _ => {}
                }
            }
        }
    }

    page.entries.extend(folders);
    Ok(page)
}

/// One page of a `ListVersionsResult`
#[derive(Debug, Default)]
pub struct VersionsPage {
    pub versions: Vec<ObjectVersion>,
    pub is_truncated: bool,
    pub next_key_marker: Option<String>,
    pub next_version_id_marker: Option<String>,
}

#[derive(Default)]
struct VersionFields {
    key: String,
    version_id: String,
    is_latest: bool,
    last_modified: Option<Timestamp>,
    size: u64,
}

/// Decode a `ListVersionsResult` page (versions and delete markers)
pub fn decode_versions(body: &[u8]) -> Result<VersionsPage> {
    let mut events = Events::new(body);
    let mut page = VersionsPage::default();
    let mut current: Option<(VersionFields, bool)> = None;

    while let Some(event) = events.next_event()? {
        match event {
            XmlEvent::Open(name) => match name.as_str() {
                "Version" => current = Some((VersionFields::default(), false)),
                "DeleteMarker" => current = Some((VersionFields::default(), true)),
                _ => {}
            },
            XmlEvent::Close { name, text } => {
                if let Some((fields, _)) = current.as_mut() {
                    match name.as_str() {
                        "Key" => fields.key = text,
                        "VersionId" => fields.version_id = text,
                        "IsLatest" => fields.is_latest = parse_bool(&text),
                        "LastModified" => fields.last_modified = Some(parse_timestamp(&text)),
                        "Size" => fields.size = text.trim().parse().unwrap_or(0),
                        "Version" | "DeleteMarker" => {
                            if let Some((fields, is_delete_marker)) = current.take() {
                                page.versions.push(ObjectVersion {
                                    key: fields.key,
                                    version_id: fields.version_id,
                                    is_latest: fields.is_latest,
                                    last_modified: fields
                                        .last_modified
                                        .unwrap_or_else(Timestamp::now),
                                    size: fields.size,
                                    is_delete_marker,
                                });
                            }
                        }
                        _ => {}
                    }
                    continue;
                }
                match name.as_str() {
                    "IsTruncated" => page.is_truncated = parse_bool(&text),
                    "NextKeyMarker" => page.next_key_marker = non_empty(text),
                    "NextVersionIdMarker" => page.next_version_id_marker = non_empty(text),
                    _ => {}
                }
            }
        }
    }
    Ok(page)
}

/// Extract the `UploadId` of an `InitiateMultipartUploadResult`
pub fn decode_initiate(body: &[u8]) -> Result<String> {
    let mut events = Events::new(body);
    let mut upload_id = String::new();
    while let Some(event) = events.next_event()? {
        if let XmlEvent::Close { name, text } = event {
            if name == "UploadId" {
                upload_id = text;
            }
        }
    }
    if upload_id.trim().is_empty() {
        return Err(Error::Decode("multipart initiation response has no UploadId".into()));
    }
    Ok(upload_id)
}

/// One page of a `ListMultipartUploadsResult`
#[derive(Debug, Default)]
pub struct UploadsPage {
    pub uploads: Vec<MultipartUpload>,
    pub is_truncated: bool,
    pub next_key_marker: Option<String>,
    pub next_upload_id_marker: Option<String>,
}

/// Decode a `ListMultipartUploadsResult` page
pub fn decode_uploads(body: &[u8]) -> Result<UploadsPage> {
    let mut events = Events::new(body);
    let mut page = UploadsPage::default();
    let mut current: Option<(String, String, Option<Timestamp>)> = None;

    while let Some(event) = events.next_event()? {
        match event {
            XmlEvent::Open(name) if name == "Upload" => {
                current = Some((String::new(), String::new(), None));
            }
            XmlEvent::Open(_) => {}
            XmlEvent::Close { name, text } => {
                if let Some((key, upload_id, initiated)) = current.as_mut() {
                    match name.as_str() {
                        "Key" => *key = text,
                        "UploadId" => *upload_id = text,
                        "Initiated" => *initiated = Some(parse_timestamp(&text)),
                        "Upload" => {
                            if let Some((key, upload_id, initiated)) = current.take() {
                                if !upload_id.is_empty() {
                                    page.uploads.push(MultipartUpload {
                                        key,
                                        upload_id,
                                        initiated,
                                    });
                                }
                            }
                        }
                        _ => {}
                    }
                    continue;
                }
                match name.as_str() {
                    "IsTruncated" => page.is_truncated = parse_bool(&text),
                    "NextKeyMarker" => page.next_key_marker = non_empty(text),
                    "NextUploadIdMarker" => page.next_upload_id_marker = non_empty(text),
                    _ => {}
                }
            }
        }
    }
    Ok(page)
}

/// One page of a `ListPartsResult`
#[derive(Debug, Default)]
pub struct PartsPage {
    pub parts: Vec<UploadedPart>,
    pub is_truncated: bool,
    pub next_part_number_marker: Option<String>,
}

/// Decode a `ListPartsResult` page
///
/// A part is kept only when both its number and its ETag were present.
pub fn decode_parts(body: &[u8]) -> Result<PartsPage> {
    let mut events = Events::new(body);
    let mut page = PartsPage::default();
    let mut current: Option<(Option<u32>, Option<String>, u64)> = None;

    while let Some(event) = events.next_event()? {
        match event {
            XmlEvent::Open(name) if name == "Part" => current = Some((None, None, 0)),
            XmlEvent::Open(_) => {}
            XmlEvent::Close { name, text } => {
                if let Some((number, etag, size)) = current.as_mut() {
                    match name.as_str() {
                        "PartNumber" => *number = text.trim().parse().ok(),
                        "ETag" => *etag = non_empty(strip_quotes(&text)),
                        "Size" => *size = text.trim().parse().unwrap_or(0),
                        "Part" => {
                            if let Some((Some(part_number), Some(etag), size)) = current.take() {
                                page.parts.push(UploadedPart {
                                    part_number,
                                    etag,
                                    size,
                                });
                            }
                        }
                        _ => {}
                    }
                    continue;
                }
                match name.as_str() {
                    "IsTruncated" => page.is_truncated = parse_bool(&text),
                    "NextPartNumberMarker" => page.next_part_number_marker = non_empty(text),
                    _ => {}
                }
            }
        }
    }
    Ok(page)
}

/// Decode a `ListAllMyBucketsResult`
pub fn decode_buckets(body: &[u8]) -> Result<Vec<BucketInfo>> {
    let mut events = Events::new(body);
    let mut buckets = Vec::new();
    let mut current: Option<BucketInfo> = None;

    while let Some(event) = events.next_event()? {
        match event {
            XmlEvent::Open(name) if name == "Bucket" => {
                current = Some(BucketInfo {
                    name: String::new(),
                    created: None,
                });
            }
            XmlEvent::Open(_) => {}
            XmlEvent::Close { name, text } => {
                let Some(bucket) = current.as_mut() else {
                    continue;
                };
                match name.as_str() {
                    "Name" => bucket.name = text,
                    "CreationDate" => bucket.created = Some(parse_timestamp(&text)),
                    "Bucket" => buckets.extend(current.take()),
                    _ => {}
                }
            }
        }
    }
    Ok(buckets)
}

/// Decode a `VersioningConfiguration`
pub fn decode_versioning(body: &[u8]) -> Result<VersioningStatus> {
    let mut events = Events::new(body);
    let mut status = VersioningStatus::Unversioned;
    while let Some(event) = events.next_event()? {
        if let XmlEvent::Close { name, text } = event {
            if name == "Status" {
                status = match text.trim() {
                    "Enabled" => VersioningStatus::Enabled,
                    "Suspended" => VersioningStatus::Suspended,
                    _ => VersioningStatus::Unversioned,
                };
            }
        }
    }
    Ok(status)
}

/// Whether an `ObjectLockConfiguration` reports object lock as enabled
pub fn decode_object_lock(body: &[u8]) -> Result<bool> {
    let mut events = Events::new(body);
    let mut enabled = false;
    while let Some(event) = events.next_event()? {
        if let XmlEvent::Close { name, text } = event {
            if name == "ObjectLockEnabled" {
                enabled = text.trim() == "Enabled";
            }
        }
    }
    Ok(enabled)
}

/// Code and message of an S3 `<Error>` document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDocument {
    pub code: String,
    pub message: String,
}

/// Decode an `<Error>` document; `None` when the body is not one
pub fn decode_error(body: &[u8]) -> Option<ErrorDocument> {
    let mut events = Events::new(body);
    let mut root: Option<String> = None;
    let mut code = String::new();
    let mut message = String::new();

    loop {
        match events.next_event() {
            Ok(Some(XmlEvent::Open(name))) => {
                root.get_or_insert(name);
            }
            Ok(Some(XmlEvent::Close { name, text })) => match name.as_str() {
                "Code" => code = text,
                "Message" => message = text,
                _ => {}
            },
            Ok(None) => break,
            Err(_) => return None,
        }
    }

    (root.as_deref() == Some("Error") && !code.is_empty()).then_some(ErrorDocument { code, message })
}
