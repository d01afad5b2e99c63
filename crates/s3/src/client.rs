//! S3 client implementation
//!
//! Builds path-style or virtual-hosted URLs, signs every request with
//! SigV4 and implements the ObjectStore trait from stow-core on top of an
//! [`HttpTransport`].

use std::collections::BTreeMap;
use std::fmt::Write;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use jiff::Timestamp;
use stow_core::{
    Alias, BucketInfo, BucketLookup, ByteRange, CannedAcl, Error, ListPage, ListRequest,
    MultipartUpload, ObjectMeta, ObjectStore, ObjectVersion, PresignMethod, PutOptions, Result,
    UploadedPart, VersioningStatus,
};
use url::Url;

use crate::signer::{self, Payload, RequestDescriptor, Signer};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};
use crate::xml;

const META_PREFIX: &str = "x-amz-meta-";

/// Where a request is sent: host header value and raw path
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    host: String,
    path: String,
}

/// S3 client over a signed HTTP transport
pub struct S3Client<T = ReqwestTransport> {
    transport: T,
    signer: Signer,
    scheme: String,
    host: String,
    base_path: String,
    lookup: BucketLookup,
}

impl S3Client<ReqwestTransport> {
    /// Create a new S3 client from an alias configuration
    pub fn new(alias: &Alias) -> Result<Self> {
        let transport = ReqwestTransport::new(&alias.timeout_config(), alias.insecure)?;
        Self::with_transport(alias, transport)
    }
}

fn query(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Turn a non-2xx response into an error, decoding `<Error>` documents
fn http_error(response: &HttpResponse) -> Error {
    match xml::decode_error(&response.body) {
        Some(doc) => Error::Http {
            status: response.status,
            code: Some(doc.code),
            message: doc.message,
        },
        None => {
            let text = String::from_utf8_lossy(&response.body);
            let message = text.trim();
            Error::Http {
                status: response.status,
                code: None,
                message: if message.is_empty() {
                    format!("request failed with status {}", response.status)
                } else {
                    message.chars().take(512).collect()
                },
            }
        }
    }
}

/// Fail on an `<Error>` document delivered with a 2xx status
fn check_embedded_error(response: &HttpResponse) -> Result<()> {
    match xml::decode_error(&response.body) {
        Some(doc) => Err(Error::Http {
            status: response.status,
            code: Some(doc.code),
            message: doc.message,
        }),
        None => Ok(()),
    }
}

fn put_headers(options: &PutOptions) -> Vec<(String, String)> {
    let mut headers = Vec::new();
    if let Some(content_type) = &options.content_type {
        headers.push(("content-type".to_string(), content_type.clone()));
    }
    for (name, value) in &options.metadata {
        headers.push((format!("{META_PREFIX}{}", name.to_ascii_lowercase()), value.clone()));
    }
    if let Some(acl) = options.acl {
        headers.push(("x-amz-acl".to_string(), acl.as_str().to_string()));
    }
    headers
}

fn parse_http_date(raw: &str) -> Option<Timestamp> {
    jiff::fmt::rfc2822::DateTimeParser::new()
        .parse_timestamp(raw)
        .ok()
        .or_else(|| raw.parse().ok())
}

fn complete_body(parts: &BTreeMap<u32, String>) -> String {
    let mut body = String::from("<CompleteMultipartUpload>");
    for (number, etag) in parts {
        let _ = write!(
            body,
            "<Part><PartNumber>{number}</PartNumber><ETag>\"{etag}\"</ETag></Part>"
        );
    }
    body.push_str("</CompleteMultipartUpload>");
    body
}

/// Keys with `.` or `..` segments would be rewritten by URL normalization
fn check_key(key: &str) -> Result<()> {
    if key.split('/').any(|segment| segment == "." || segment == "..") {
        return Err(Error::InvalidPath(format!(
            "object key '{key}' contains a '.' or '..' segment"
        )));
    }
    Ok(())
}

fn is_dns_compatible(bucket: &str) -> bool {
    !bucket.is_empty()
        && !bucket.contains('.')
        && bucket
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

impl<T: HttpTransport> S3Client<T> {
    /// Create a client that sends requests through `transport`
    pub fn with_transport(alias: &Alias, transport: T) -> Result<Self> {
        let endpoint = Url::parse(&alias.endpoint)?;
        let host = endpoint
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::Config(format!("endpoint '{}' has no host", alias.endpoint)))?;
        let host = match endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        Ok(Self {
            transport,
            signer: Signer::new(&alias.access_key, &alias.secret_key, &alias.region),
            scheme: endpoint.scheme().to_string(),
            host,
            base_path: endpoint.path().trim_end_matches('/').to_string(),
            lookup: alias.bucket_lookup,
        })
    }

    fn virtual_hosted(&self, bucket: &str) -> bool {
        match self.lookup {
            BucketLookup::Dns => true,
            BucketLookup::Path => false,
            BucketLookup::Auto => {
                let host = self.host.split(':').next().unwrap_or_default();
                host.ends_with("amazonaws.com") && is_dns_compatible(bucket)
            }
        }
    }

    fn target(&self, bucket: Option<&str>, key: Option<&str>) -> Target {
        let base = &self.base_path;
        match (bucket, key) {
            (None, _) => Target {
                host: self.host.clone(),
                path: format!("{base}/"),
            },
            (Some(bucket), key) if self.virtual_hosted(bucket) => Target {
                host: format!("{bucket}.{}", self.host),
                path: format!("{base}/{}", key.unwrap_or_default()),
            },
            (Some(bucket), Some(key)) => Target {
                host: self.host.clone(),
                path: format!("{base}/{bucket}/{key}"),
            },
            (Some(bucket), None) => Target {
                host: self.host.clone(),
                path: format!("{base}/{bucket}"),
            },
        }
    }

    /// Sign and send one request, failing on non-2xx statuses
    async fn execute(
        &self,
        method: Method,
        bucket: Option<&str>,
        key: Option<&str>,
        query: Vec<(String, String)>,
        mut headers: Vec<(String, String)>,
        body: Bytes,
    ) -> Result<HttpResponse> {
        if let Some(key) = key {
            check_key(key)?;
        }
        let target = self.target(bucket, key);
        let descriptor = RequestDescriptor {
            method: method.as_str(),
            host: &target.host,
            path: &target.path,
            query: &query,
            headers: &headers,
            payload: Payload::Bytes(&body),
        };
        let signed = self.signer.sign(&descriptor, Timestamp::now())?;

        let mut url = format!("{}://{}{}", self.scheme, target.host, signed.canonical_uri);
        if !signed.canonical_query.is_empty() {
            url.push('?');
            url.push_str(&signed.canonical_query);
        }
        headers.extend(
            signed
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        );

        tracing::debug!(%method, %url, "s3 request");
        let response = self
            .transport
            .send(HttpRequest {
                method,
                url,
                headers,
                body,
            })
            .await?;
        tracing::debug!(%method, status = response.status, bytes = response.body.len(), "s3 response");

        if response.is_success() {
            Ok(response)
        } else {
            Err(http_error(&response))
        }
    }

    async fn get(&self, bucket: &str, key: Option<&str>, query: Vec<(String, String)>) -> Result<HttpResponse> {
        self.execute(Method::Get, Some(bucket), key, query, Vec::new(), Bytes::new())
            .await
    }
}

#[async_trait]
impl<T: HttpTransport> ObjectStore for S3Client<T> {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        let response = self
            .execute(Method::Get, None, None, Vec::new(), Vec::new(), Bytes::new())
            .await?;
        xml::decode_buckets(&response.body)
    }

    async fn list_page(&self, bucket: &str, request: &ListRequest) -> Result<ListPage> {
        let mut params = query(&[("list-type", "2")]);
        if !request.prefix.is_empty() {
            params.push(("prefix".into(), request.prefix.clone()));
        }
        if let Some(delimiter) = &request.delimiter {
            params.push(("delimiter".into(), delimiter.clone()));
        }
        if let Some(token) = &request.continuation_token {
            params.push(("continuation-token".into(), token.clone()));
        }
        if let Some(max) = request.max_keys {
            params.push(("max-keys".into(), max.to_string()));
        }

        let response = self.get(bucket, None, params).await?;
        xml::decode_list_objects(&response.body, &request.prefix, request.exclude_self)
    }

    async fn list_versions(&self, bucket: &str, key: &str) -> Result<Vec<ObjectVersion>> {
        let mut versions = Vec::new();
        let mut markers: Option<(String, Option<String>)> = None;

        loop {
            let mut params = query(&[("versions", ""), ("prefix", key)]);
            if let Some((key_marker, version_marker)) = &markers {
                params.push(("key-marker".into(), key_marker.clone()));
                if let Some(version_marker) = version_marker {
                    params.push(("version-id-marker".into(), version_marker.clone()));
                }
            }

            let response = self.get(bucket, None, params).await?;
            let page = xml::decode_versions(&response.body)?;
            versions.extend(page.versions.into_iter().filter(|v| v.key == key));

            match (page.is_truncated, page.next_key_marker) {
                (true, Some(next)) => markers = Some((next, page.next_version_id_marker)),
                _ => break,
            }
        }
        Ok(versions)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta> {
        let response = self
            .execute(Method::Head, Some(bucket), Some(key), Vec::new(), Vec::new(), Bytes::new())
            .await?;

        let metadata = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                name.strip_prefix(META_PREFIX)
                    .map(|stripped| (stripped.to_ascii_lowercase(), value.clone()))
            })
            .collect();

        Ok(ObjectMeta {
            key: key.to_string(),
            size: response
                .header("content-length")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0),
            etag: response
                .header("etag")
                .map(|e| e.trim_matches('"').to_string()),
            content_type: response.header("content-type").map(str::to_string),
            last_modified: response.header("last-modified").and_then(parse_http_date),
            metadata,
        })
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<Bytes> {
        let headers = range
            .map(|r| vec![("range".to_string(), r.header_value())])
            .unwrap_or_default();
        let response = self
            .execute(Method::Get, Some(bucket), Some(key), Vec::new(), headers, Bytes::new())
            .await?;
        Ok(response.body)
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> Result<Option<String>> {
        let response = self
            .execute(Method::Put, Some(bucket), Some(key), Vec::new(), put_headers(options), data)
            .await?;
        Ok(response.header("etag").map(|e| e.trim_matches('"').to_string()))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.execute(Method::Delete, Some(bucket), Some(key), Vec::new(), Vec::new(), Bytes::new())
            .await?;
        Ok(())
    }

    async fn copy_object(&self, bucket: &str, src_key: &str, dst_key: &str) -> Result<()> {
        let source = signer::canonical_uri(&format!("/{bucket}/{src_key}"));
        let headers = vec![
            ("x-amz-copy-source".to_string(), source),
            ("x-amz-metadata-directive".to_string(), "COPY".to_string()),
        ];
        let response = self
            .execute(Method::Put, Some(bucket), Some(dst_key), Vec::new(), headers, Bytes::new())
            .await?;
        check_embedded_error(&response)
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        options: &PutOptions,
    ) -> Result<String> {
        let response = self
            .execute(
                Method::Post,
                Some(bucket),
                Some(key),
                query(&[("uploads", "")]),
                put_headers(options),
                Bytes::new(),
            )
            .await?;
        xml::decode_initiate(&response.body)
    }

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<MultipartUpload>> {
        let mut uploads = Vec::new();
        let mut markers: Option<(String, Option<String>)> = None;

        loop {
            let mut params = query(&[("uploads", ""), ("prefix", prefix)]);
            if let Some((key_marker, upload_marker)) = &markers {
                params.push(("key-marker".into(), key_marker.clone()));
                if let Some(upload_marker) = upload_marker {
                    params.push(("upload-id-marker".into(), upload_marker.clone()));
                }
            }

            let response = self.get(bucket, None, params).await?;
            let page = xml::decode_uploads(&response.body)?;
            uploads.extend(page.uploads);

            match (page.is_truncated, page.next_key_marker) {
                (true, Some(next)) => markers = Some((next, page.next_upload_id_marker)),
                _ => break,
            }
        }
        Ok(uploads)
    }

    async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<Vec<UploadedPart>> {
        let mut parts = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut params = query(&[("uploadId", upload_id)]);
            if let Some(marker) = &marker {
                params.push(("part-number-marker".into(), marker.clone()));
            }
            let response = self.get(bucket, Some(key), params).await?;
            let page = xml::decode_parts(&response.body)?;
            parts.extend(page.parts);

            match (page.is_truncated, page.next_part_number_marker) {
                (true, Some(next)) => marker = Some(next),
                _ => break,
            }
        }
        parts.sort_by_key(|p| p.part_number);
        Ok(parts)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String> {
        let number = part_number.to_string();
        let response = self
            .execute(
                Method::Put,
                Some(bucket),
                Some(key),
                query(&[("partNumber", number.as_str()), ("uploadId", upload_id)]),
                Vec::new(),
                data,
            )
            .await?;
        response
            .header("etag")
            .map(|e| e.trim_matches('"').to_string())
            .ok_or_else(|| Error::Decode(format!("upload of part {part_number} returned no ETag")))
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &BTreeMap<u32, String>,
    ) -> Result<()> {
        let response = self
            .execute(
                Method::Post,
                Some(bucket),
                Some(key),
                query(&[("uploadId", upload_id)]),
                vec![("content-type".to_string(), "application/xml".to_string())],
                Bytes::from(complete_body(parts)),
            )
            .await?;
        check_embedded_error(&response)
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<()> {
        self.execute(
            Method::Delete,
            Some(bucket),
            Some(key),
            query(&[("uploadId", upload_id)]),
            Vec::new(),
            Bytes::new(),
        )
        .await?;
        Ok(())
    }

    async fn set_acl(&self, bucket: &str, key: Option<&str>, acl: CannedAcl) -> Result<()> {
        self.execute(
            Method::Put,
            Some(bucket),
            key,
            query(&[("acl", "")]),
            vec![("x-amz-acl".to_string(), acl.as_str().to_string())],
            Bytes::new(),
        )
        .await?;
        Ok(())
    }

    async fn get_versioning(&self, bucket: &str) -> Result<VersioningStatus> {
        let response = self.get(bucket, None, query(&[("versioning", "")])).await?;
        xml::decode_versioning(&response.body)
    }

    async fn set_versioning(&self, bucket: &str, enabled: bool) -> Result<()> {
        let status = if enabled { "Enabled" } else { "Suspended" };
        let body = format!(
            r#"<VersioningConfiguration xmlns="http://s3.amazonaws.com/doc/2006-03-01/"><Status>{status}</Status></VersioningConfiguration>"#
        );
        self.execute(
            Method::Put,
            Some(bucket),
            None,
            query(&[("versioning", "")]),
            vec![("content-type".to_string(), "application/xml".to_string())],
            Bytes::from(body),
        )
        .await?;
        Ok(())
    }

    async fn object_lock_enabled(&self, bucket: &str) -> Result<bool> {
        match self.get(bucket, None, query(&[("object-lock", "")])).await {
            Ok(response) => xml::decode_object_lock(&response.body),
            Err(Error::Http { status: 404, .. }) => Ok(false),
            Err(Error::Http { code: Some(code), .. })
                if code == "ObjectLockConfigurationNotFoundError" =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn set_legal_hold(&self, bucket: &str, key: &str, on: bool) -> Result<()> {
        let status = if on { "ON" } else { "OFF" };
        let body = format!(
            r#"<LegalHold xmlns="http://s3.amazonaws.com/doc/2006-03-01/"><Status>{status}</Status></LegalHold>"#
        );
        self.execute(
            Method::Put,
            Some(bucket),
            Some(key),
            query(&[("legal-hold", "")]),
            vec![("content-type".to_string(), "application/xml".to_string())],
            Bytes::from(body),
        )
        .await?;
        Ok(())
    }

    fn presign(
        &self,
        method: PresignMethod,
        bucket: &str,
        key: &str,
        expires: Duration,
    ) -> Result<String> {
        let method = match method {
            PresignMethod::Get => Method::Get,
            PresignMethod::Put => Method::Put,
        };
        check_key(key)?;
        let target = self.target(Some(bucket), Some(key));
        self.signer.presign(
            method.as_str(),
            &self.scheme,
            &target.host,
            &target.path,
            &[],
            expires,
            Timestamp::now(),
        )
    }
}
