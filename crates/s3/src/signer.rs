//! AWS Signature Version 4
//!
//! Pure functions over a request descriptor: no I/O, no clock access unless
//! the caller passes `Timestamp::now()`. Signatures are computed fresh per
//! request.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::time::Duration;

use hmac::{Hmac, Mac};
use jiff::Timestamp;
use sha2::{Digest, Sha256};
use stow_core::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Payload hash sentinel for presigned URLs
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Longest expiry a presigned URL may carry: 7 days
pub const MAX_PRESIGN_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// How the body enters the signature
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    Bytes(&'a [u8]),
    Unsigned,
}

impl Payload<'_> {
    fn hash(&self) -> String {
        match self {
            Payload::Bytes(body) => hex_sha256(body),
            Payload::Unsigned => UNSIGNED_PAYLOAD.to_string(),
        }
    }
}

/// Request to be signed
///
/// `path` is the raw, unencoded path starting with `/`; `host` includes the
/// port when it is not the scheme's default.
#[derive(Debug, Clone)]
pub struct RequestDescriptor<'a> {
    pub method: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    pub query: &'a [(String, String)],
    pub headers: &'a [(String, String)],
    pub payload: Payload<'a>,
}

/// Result of signing a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub canonical_uri: String,
    pub canonical_query: String,
    pub signed_headers: String,
    pub payload_hash: String,
    pub amz_date: String,
    pub signature: String,
    pub authorization: String,
}

impl SignedRequest {
    /// Headers the transport must send in addition to the descriptor's own
    pub fn headers(&self) -> [(&'static str, &str); 3] {
        [
            ("x-amz-date", self.amz_date.as_str()),
            ("x-amz-content-sha256", self.payload_hash.as_str()),
            ("authorization", self.authorization.as_str()),
        ]
    }
}

/// Credentials and scope used for signing
#[derive(Clone)]
pub struct Signer {
    access_key: String,
    secret_key: String,
    region: String,
    service: String,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("access_key", &self.access_key)
            .field("region", &self.region)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

fn push_encoded(out: &mut String, s: &str, keep_slash: bool) {
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if keep_slash => out.push('/'),
            _ => {
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
}

/// Percent-encode everything outside the unreserved set
pub fn uri_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 3);
    push_encoded(&mut out, s, false);
    out
}

/// Canonical URI: encoded segments, `/` separators and trailing slash kept
pub fn canonical_uri(path: &str) -> String {
    let mut out = String::with_capacity(path.len() * 3 + 1);
    if !path.starts_with('/') {
        out.push('/');
    }
    push_encoded(&mut out, path, true);
    out
}

/// Canonical query string, independent of parameter order
pub fn canonical_query(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::Signing(format!("HMAC key rejected: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn is_signed_header(name: &str) -> bool {
    name.starts_with("x-amz-") || name == "content-type"
}

/// Lower-cased, trimmed, sorted headers to sign
fn canonical_headers(
    host: &str,
    amz_date: Option<&str>,
    payload_hash: Option<&str>,
    headers: &[(String, String)],
) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let name = name.trim().to_ascii_lowercase();
        if !is_signed_header(&name) {
            continue;
        }
        let value = value.trim();
        map.entry(name)
            .and_modify(|v| {
                v.push(',');
                v.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    map.insert("host".into(), host.trim().to_string());
    if let Some(date) = amz_date {
        map.insert("x-amz-date".into(), date.to_string());
    }
    if let Some(hash) = payload_hash {
        map.insert("x-amz-content-sha256".into(), hash.to_string());
    }
    map
}

/// Newline-joined canonical request
pub fn canonical_request(
    method: &str,
    canonical_uri: &str,
    canonical_query: &str,
    headers: &BTreeMap<String, String>,
    payload_hash: &str,
) -> String {
    let mut header_block = String::new();
    for (name, value) in headers {
        let _ = writeln!(header_block, "{name}:{value}");
    }
    let signed = headers.keys().cloned().collect::<Vec<_>>().join(";");
    format!("{method}\n{canonical_uri}\n{canonical_query}\n{header_block}\n{signed}\n{payload_hash}")
}

fn amz_date(time: Timestamp) -> String {
    time.strftime("%Y%m%dT%H%M%SZ").to_string()
}

impl Signer {
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: region.into(),
            service: "s3".into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn scope(&self, date: &str) -> String {
        format!("{date}/{}/{}/aws4_request", self.region, self.service)
    }

    fn signing_key(&self, date: &str) -> Result<Vec<u8>> {
        let k_date = hmac_sha256(format!("AWS4{}", self.secret_key).as_bytes(), date.as_bytes())?;
        let k_region = hmac_sha256(&k_date, self.region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, self.service.as_bytes())?;
        hmac_sha256(&k_service, b"aws4_request")
    }

    fn signature(&self, amz_date: &str, canonical: &str) -> Result<String> {
        let date = &amz_date[..8];
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{}\n{}",
            self.scope(date),
            hex_sha256(canonical.as_bytes())
        );
        tracing::trace!(%string_to_sign, "sigv4 string to sign");
        let key = self.signing_key(date)?;
        Ok(hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?))
    }

    /// Sign a request for header-based authorization
    pub fn sign(&self, request: &RequestDescriptor<'_>, time: Timestamp) -> Result<SignedRequest> {
        if request.host.trim().is_empty() {
            return Err(Error::Signing("request has no host".into()));
        }

        let amz_date = amz_date(time);
        let payload_hash = request.payload.hash();
        let canonical_uri = canonical_uri(request.path);
        let canonical_query = canonical_query(request.query);
        let headers = canonical_headers(
            request.host,
            Some(&amz_date),
            Some(&payload_hash),
            request.headers,
        );
        let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");

        let canonical = canonical_request(
            request.method,
            &canonical_uri,
            &canonical_query,
            &headers,
            &payload_hash,
        );
        tracing::trace!(%canonical, "sigv4 canonical request");
        let signature = self.signature(&amz_date, &canonical)?;

        let authorization = format!(
            "{ALGORITHM} Credential={}/{}, SignedHeaders={signed_headers}, Signature={signature}",
            self.access_key,
            self.scope(&amz_date[..8]),
        );

        Ok(SignedRequest {
            canonical_uri,
            canonical_query,
            signed_headers,
            payload_hash,
            amz_date,
            signature,
            authorization,
        })
    }

    /// Build a presigned URL signing only the `host` header
    pub fn presign(
        &self,
        method: &str,
        scheme: &str,
        host: &str,
        path: &str,
        query: &[(String, String)],
        expires: Duration,
        time: Timestamp,
    ) -> Result<String> {
        if host.trim().is_empty() {
            return Err(Error::Signing("request has no host".into()));
        }
        if expires.is_zero() || expires > MAX_PRESIGN_EXPIRY {
            return Err(Error::Signing(format!(
                "presigned URL expiry must be between 1 second and {} seconds",
                MAX_PRESIGN_EXPIRY.as_secs()
            )));
        }

        let amz_date = amz_date(time);
        let mut params = query.to_vec();
        params.extend([
            ("X-Amz-Algorithm".to_string(), ALGORITHM.to_string()),
            (
                "X-Amz-Credential".to_string(),
                format!("{}/{}", self.access_key, self.scope(&amz_date[..8])),
            ),
            ("X-Amz-Date".to_string(), amz_date.clone()),
            ("X-Amz-Expires".to_string(), expires.as_secs().to_string()),
            ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
        ]);

        let canonical_uri = canonical_uri(path);
        let canonical_query = canonical_query(&params);
        let headers = canonical_headers(host, None, None, &[]);
        let canonical = canonical_request(
            method,
            &canonical_uri,
            &canonical_query,
            &headers,
            UNSIGNED_PAYLOAD,
        );
        let signature = self.signature(&amz_date, &canonical)?;

        Ok(format!(
            "{scheme}://{host}{canonical_uri}?{canonical_query}&X-Amz-Signature={signature}"
        ))
    }
}
