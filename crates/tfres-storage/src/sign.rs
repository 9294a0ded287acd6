use std::collections::BTreeMap;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

#[derive(Clone, Debug)]
pub(crate) struct Credentials {
    pub(crate) access_key_id:     String,
    pub(crate) secret_access_key: String,
    pub(crate) session_token:     Option<String>,
}

// ── Hashing ───────────────────────────────────────────────────────────────────

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect()
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date    = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes());
    let k_region  = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Percent-encode everything outside the RFC 3986 unreserved set.
/// `/` is kept literal in object paths and encoded in query values.
pub(crate) fn uri_encode(s: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            b => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// Sorted, encoded `k=v&k=v` query string. Used both on the wire and in the
/// canonical request so the two can never disagree.
pub(crate) fn canonical_query(params: &[(&str, &str)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (uri_encode(k, true), uri_encode(v, true)))
        .collect();
    encoded.sort();
    encoded
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Extract `host[:port]` from a URL.
pub(crate) fn url_host(url: &str) -> &str {
    let without_scheme = url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    match without_scheme.find('/') {
        Some(pos) => &without_scheme[..pos],
        None      => without_scheme,
    }
}

// ── SigV4 ─────────────────────────────────────────────────────────────────────

pub(crate) struct SigningRequest<'a> {
    pub(crate) method:       &'a str,
    pub(crate) uri_path:     &'a str,
    pub(crate) query_string: &'a str,
    /// Extra `x-amz-*` headers sent with the request (e.g. SSE).
    pub(crate) amz_headers:  &'a BTreeMap<String, String>,
    pub(crate) content_type: &'a str,
    pub(crate) body:         &'a [u8],
    pub(crate) host:         &'a str,
}

/// SigV4 headers for an S3 request. The returned map includes the `x-amz-*`
/// headers passed in, so callers add every entry to the outgoing request.
pub(crate) fn sigv4_headers(
    req:    &SigningRequest<'_>,
    creds:  &Credentials,
    region: &str,
    now:    DateTime<Utc>,
) -> BTreeMap<String, String> {
    let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date      = now.format("%Y%m%d").to_string();

    let payload_hash = sha256_hex(req.body);

    // Canonical headers (must be sorted and lowercased)
    let mut canon_hdrs: BTreeMap<String, String> = BTreeMap::new();
    canon_hdrs.insert("host".into(), req.host.into());
    canon_hdrs.insert("x-amz-content-sha256".into(), payload_hash.clone());
    canon_hdrs.insert("x-amz-date".into(), timestamp.clone());
    if let Some(ref token) = creds.session_token {
        canon_hdrs.insert("x-amz-security-token".into(), token.clone());
    }
    for (k, v) in req.amz_headers {
        canon_hdrs.insert(k.to_lowercase(), v.clone());
    }

    let signed_headers: String = canon_hdrs.keys().cloned().collect::<Vec<_>>().join(";");
    let canonical_headers: String = canon_hdrs
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        req.method, req.uri_path, req.query_string,
        canonical_headers, signed_headers, payload_hash
    );

    let scope = format!("{}/{}/s3/aws4_request", date, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        timestamp, scope, sha256_hex(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, &date, region, "s3");
    let signature   = hmac_sha256(&signing_key, string_to_sign.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>();

    let auth = format!(
        "AWS4-HMAC-SHA256 Credential={}/{},SignedHeaders={},Signature={}",
        creds.access_key_id, scope, signed_headers, signature
    );

    let mut out = BTreeMap::new();
    out.insert("Authorization".into(), auth);
    out.insert("x-amz-date".into(), timestamp);
    out.insert("x-amz-content-sha256".into(), payload_hash);
    if let Some(ref token) = creds.session_token {
        out.insert("x-amz-security-token".into(), token.clone());
    }
    for (k, v) in req.amz_headers {
        out.insert(k.to_lowercase(), v.clone());
    }
    out
}

// ── SigV2 ─────────────────────────────────────────────────────────────────────

fn sigv2_signature(secret: &str, string_to_sign: &str) -> String {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(string_to_sign.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

/// SigV2 headers for S3-compatible stores. `resource` is `/<bucket>/<key>`
/// exactly as it appears in the request path.
pub(crate) fn sigv2_headers(
    req:      &SigningRequest<'_>,
    resource: &str,
    creds:    &Credentials,
    now:      DateTime<Utc>,
) -> BTreeMap<String, String> {
    let date = now.format("%a, %d %b %Y %H:%M:%S GMT").to_string();

    let mut amz: BTreeMap<String, String> = req
        .amz_headers
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.trim().to_string()))
        .collect();
    if let Some(ref token) = creds.session_token {
        amz.insert("x-amz-security-token".into(), token.clone());
    }
    let canonical_amz: String = amz.iter().map(|(k, v)| format!("{}:{}\n", k, v)).collect();

    let string_to_sign = format!(
        "{}\n\n{}\n{}\n{}{}",
        req.method, req.content_type, date, canonical_amz, resource
    );

    let mut out = amz;
    out.insert(
        "Authorization".into(),
        format!(
            "AWS {}:{}",
            creds.access_key_id,
            sigv2_signature(&creds.secret_access_key, &string_to_sign)
        ),
    );
    out.insert("Date".into(), date);
    out
}
