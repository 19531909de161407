//! AWS Signature Version 4 request signing
//!
//! Supports both header based signing (EKS control plane calls) and query
//! string presigning (the STS request embedded in cluster bearer tokens).

use super::AwsCredentials;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// SHA-256 of an empty payload
pub const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// RFC 3986 unreserved characters stay as-is, everything else is encoded
const URI_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const PATH_ENCODE: &AsciiSet = &URI_ENCODE.remove(b'/');

/// Scope of a signature: who signs, for which region/service, at what time
#[derive(Debug, Clone)]
pub struct SigningParams<'a> {
    pub credentials: &'a AwsCredentials,
    pub region: &'a str,
    pub service: &'a str,
    pub time: DateTime<Utc>,
}

impl<'a> SigningParams<'a> {
    pub fn new(credentials: &'a AwsCredentials, region: &'a str, service: &'a str) -> Self {
        Self {
            credentials,
            region,
            service,
            time: Utc::now(),
        }
    }

    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    fn amz_date(&self) -> String {
        self.time.format("%Y%m%dT%H%M%SZ").to_string()
    }

    fn short_date(&self) -> String {
        self.time.format("%Y%m%d").to_string()
    }

    fn scope(&self) -> String {
        format!(
            "{}/{}/{}/aws4_request",
            self.short_date(),
            self.region,
            self.service
        )
    }
}

/// The parts of an HTTP request that take part in the signature
#[derive(Debug, Clone, Default)]
pub struct SignableRequest {
    pub method: String,
    pub host: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub payload_sha256: String,
}

impl SignableRequest {
    pub fn get(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            host: host.into(),
            path: path.into(),
            payload_sha256: EMPTY_PAYLOAD_SHA256.to_string(),
            ..Default::default()
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Lowercased, trimmed headers including `host`, sorted by name
    fn canonical_headers(&self) -> BTreeMap<String, String> {
        let mut headers: BTreeMap<String, String> = self
            .headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string()))
            .collect();
        headers.insert("host".to_string(), self.host.clone());
        headers
    }

    fn signed_headers(&self) -> String {
        self.canonical_headers()
            .keys()
            .cloned()
            .collect::<Vec<_>>()
            .join(";")
    }

    fn canonical_request(&self) -> String {
        let headers = self.canonical_headers();
        let header_block: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method,
            canonical_path(&self.path),
            canonical_query(&self.query),
            header_block,
            self.signed_headers(),
            self.payload_sha256
        )
    }
}

/// Percent-encode a query component per RFC 3986
pub fn uri_encode(value: &str) -> String {
    utf8_percent_encode(value, URI_ENCODE).to_string()
}

fn canonical_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    utf8_percent_encode(path, PATH_ENCODE).to_string()
}

fn canonical_query(query: &[(String, String)]) -> String {
    let mut pairs: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn hmac(key: &[u8], data: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Derive the per-day signing key
pub fn signing_key(secret: &str, short_date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), short_date);
    let k_region = hmac(&k_date, region);
    let k_service = hmac(&k_region, service);
    hmac(&k_service, "aws4_request")
}

fn signature(params: &SigningParams<'_>, request: &SignableRequest) -> String {
    let canonical = request.canonical_request();
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        params.amz_date(),
        params.scope(),
        hex::encode(Sha256::digest(canonical.as_bytes()))
    );
    let key = signing_key(
        &params.credentials.secret_access_key,
        &params.short_date(),
        params.region,
        params.service,
    );
    hex::encode(hmac(&key, &string_to_sign))
}

/// Sign a request with an `Authorization` header.
///
/// Returns the headers to attach to the outgoing request (besides `host`).
pub fn sign_headers(params: &SigningParams<'_>, request: SignableRequest) -> Vec<(String, String)> {
    let mut request = request.header("x-amz-date", params.amz_date());
    if let Some(token) = &params.credentials.session_token {
        request = request.header("x-amz-security-token", token.clone());
    }

    let signature = signature(params, &request);
    let authorization = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM,
        params.credentials.access_key_id,
        params.scope(),
        request.signed_headers(),
        signature
    );

    let mut headers: Vec<(String, String)> = request
        .headers
        .into_iter()
        .filter(|(k, _)| !k.eq_ignore_ascii_case("host"))
        .collect();
    headers.push(("authorization".to_string(), authorization));
    headers
}

/// Presign a request into a URL valid for `expires`
pub fn presign_url(
    params: &SigningParams<'_>,
    request: SignableRequest,
    expires: Duration,
) -> String {
    let mut request = request
        .query("X-Amz-Algorithm", ALGORITHM)
        .query(
            "X-Amz-Credential",
            format!("{}/{}", params.credentials.access_key_id, params.scope()),
        )
        .query("X-Amz-Date", params.amz_date())
        .query("X-Amz-Expires", expires.as_secs().to_string());
    if let Some(token) = &params.credentials.session_token {
        request = request.query("X-Amz-Security-Token", token.clone());
    }
    let signed_headers = request.signed_headers();
    request = request.query("X-Amz-SignedHeaders", signed_headers);

    let signature = signature(params, &request);
    format!(
        "https://{}{}?{}&X-Amz-Signature={}",
        request.host,
        canonical_path(&request.path),
        canonical_query(&request.query),
        signature
    )
}
