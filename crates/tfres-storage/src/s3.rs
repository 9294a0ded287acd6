use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::{events::Event as XmlEvent, Reader as XmlReader};
use regex::Regex;
use reqwest::Method;
use tfres_domain::StorageConfig;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::sign::{self, Credentials, SigningRequest};
use crate::storage::{sort_versions, ObjectVersion, Storage, UploadOptions};

const DEFAULT_ATTEMPTS: u32 = 10;
const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);
const OCTET_STREAM: &str = "application/octet-stream";

// ── Driver ────────────────────────────────────────────────────────────────────

/// Path-style S3 client covering the five operations of [`Storage`].
#[derive(Clone)]
pub struct S3Storage {
    client:     reqwest::Client,
    endpoint:   String,
    bucket:     String,
    region:     String,
    creds:      Credentials,
    signing_v2: bool,
    attempts:   u32,
    backoff:    Duration,
}

/// Status, `Last-Modified` header and body of a completed request.
struct RawResponse {
    status:        u16,
    last_modified: Option<String>,
    body:          Vec<u8>,
}

struct Call<'a> {
    operation:  &'static str,
    method:     Method,
    key:        &'a str,
    path:       String,
    query:      String,
    body:       Vec<u8>,
    amz:        BTreeMap<String, String>,
}

impl S3Storage {
    pub fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        config
            .validate("storage")
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let region = config.region().to_string();
        let endpoint = match config.endpoint.as_deref().map(str::trim) {
            Some(e) if !e.is_empty() => e.trim_end_matches('/').to_string(),
            _ => format!("https://s3.{}.amazonaws.com", region),
        };

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            bucket: config.bucket.clone(),
            region,
            creds: Credentials {
                access_key_id:     config.access_key_id.clone(),
                secret_access_key: config.secret_access_key.clone(),
                session_token:     config.session_token.clone().filter(|t| !t.is_empty()),
            },
            signing_v2: config.uses_signing_v2(),
            attempts: DEFAULT_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        })
    }

    /// Override the retry budget for transient failures.
    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.backoff = backoff;
        self
    }

    pub fn with_signing_v2(mut self, v2: bool) -> Self {
        self.signing_v2 = v2;
        self
    }

    fn object_path(&self, key: &str) -> String {
        format!("/{}/{}", self.bucket, sign::uri_encode(key, false))
    }

    fn bucket_path(&self) -> String {
        format!("/{}/", self.bucket)
    }

    fn signed_headers(&self, call: &Call<'_>, content_type: &str) -> BTreeMap<String, String> {
        let host = sign::url_host(&self.endpoint);
        let req = SigningRequest {
            method:       call.method.as_str(),
            uri_path:     &call.path,
            query_string: &call.query,
            amz_headers:  &call.amz,
            content_type,
            body:         &call.body,
            host,
        };
        if self.signing_v2 {
            sign::sigv2_headers(&req, &call.path, &self.creds, Utc::now())
        } else {
            sign::sigv4_headers(&req, &self.creds, &self.region, Utc::now())
        }
    }

    /// Send a request, retrying transport errors, 5xx and 429.
    async fn send(&self, call: Call<'_>) -> Result<RawResponse, StorageError> {
        let content_type = if call.method == Method::PUT { OCTET_STREAM } else { "" };
        let url = if call.query.is_empty() {
            format!("{}{}", self.endpoint, call.path)
        } else {
            format!("{}{}?{}", self.endpoint, call.path, call.query)
        };

        let mut last_err = None;
        for attempt in 1..=self.attempts {
            if attempt > 1 {
                tokio::time::sleep(self.backoff * (attempt - 1)).await;
            }

            let mut req = self.client.request(call.method.clone(), &url);
            if !content_type.is_empty() {
                req = req.header("Content-Type", content_type);
            }
            for (k, v) in self.signed_headers(&call, content_type) {
                req = req.header(k, v);
            }
            if !call.body.is_empty() || call.method == Method::PUT {
                req = req.body(call.body.clone());
            }

            let resp = match req.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(operation = call.operation, key = call.key, attempt, error = %e, "S3 request failed");
                    last_err = Some(StorageError::Transport {
                        operation: call.operation,
                        key:       call.key.to_string(),
                        message:   e.to_string(),
                    });
                    continue;
                }
            };

            let status = resp.status().as_u16();
            let last_modified = resp
                .headers()
                .get("last-modified")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = resp.bytes().await.map(|b| b.to_vec()).unwrap_or_default();

            if status >= 500 || status == 429 {
                warn!(operation = call.operation, key = call.key, attempt, status, "S3 transient error");
                last_err = Some(http_error(call.operation, call.key, status, &body));
                continue;
            }

            debug!(operation = call.operation, key = call.key, status, "S3 response");
            return Ok(RawResponse { status, last_modified, body });
        }

        Err(last_err.unwrap_or_else(|| StorageError::Transport {
            operation: call.operation,
            key:       call.key.to_string(),
            message:   "no attempts made".into(),
        }))
    }

    fn call<'a>(&self, operation: &'static str, method: Method, key: &'a str) -> Call<'a> {
        Call {
            operation,
            method,
            key,
            path: self.object_path(key),
            query: String::new(),
            body: Vec::new(),
            amz: BTreeMap::new(),
        }
    }
}

fn http_error(operation: &'static str, key: &str, status: u16, body: &[u8]) -> StorageError {
    let text = String::from_utf8_lossy(body);
    StorageError::Http {
        operation,
        key: key.to_string(),
        status,
        code: xml_text(&text, "Code").unwrap_or_else(|| "Unknown".into()),
        message: xml_text(&text, "Message").unwrap_or_else(|| "unknown error".into()),
    }
}

fn parse_http_date(operation: &'static str, key: &str, value: Option<&str>) -> Result<DateTime<Utc>, StorageError> {
    let value = value.ok_or_else(|| StorageError::Transport {
        operation,
        key: key.to_string(),
        message: "response has no Last-Modified header".into(),
    })?;
    DateTime::parse_from_rfc2822(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Transport {
            operation,
            key: key.to_string(),
            message: format!("invalid Last-Modified '{}': {}", value, e),
        })
}

#[async_trait]
impl Storage for S3Storage {
    async fn download(&self, key: &str) -> Result<(Vec<u8>, ObjectVersion), StorageError> {
        let resp = self.send(self.call("GetObject", Method::GET, key)).await?;
        match resp.status {
            404 => Err(StorageError::NotFound(key.to_string())),
            s if s >= 400 => Err(http_error("GetObject", key, s, &resp.body)),
            _ => {
                let last_modified = parse_http_date("GetObject", key, resp.last_modified.as_deref())?;
                Ok((resp.body, ObjectVersion { key: key.to_string(), last_modified }))
            }
        }
    }

    async fn upload(&self, key: &str, body: Vec<u8>, options: &UploadOptions) -> Result<(), StorageError> {
        let mut call = self.call("PutObject", Method::PUT, key);
        call.body = body;
        if let Some(alg) = options.sse_algorithm.as_deref().filter(|a| !a.is_empty()) {
            call.amz.insert("x-amz-server-side-encryption".into(), alg.to_string());
        }
        if let Some(kms) = options.sse_kms_key_id.as_deref().filter(|k| !k.is_empty()) {
            call.amz.insert("x-amz-server-side-encryption-aws-kms-key-id".into(), kms.to_string());
        }

        let resp = self.send(call).await?;
        if resp.status >= 400 {
            return Err(http_error("PutObject", key, resp.status, &resp.body));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let resp = self.send(self.call("DeleteObject", Method::DELETE, key)).await?;
        match resp.status {
            404 => Ok(()),
            s if s >= 400 => Err(http_error("DeleteObject", key, s, &resp.body)),
            _ => Ok(()),
        }
    }

    async fn stat(&self, key: &str) -> Result<Option<ObjectVersion>, StorageError> {
        let resp = self.send(self.call("HeadObject", Method::HEAD, key)).await?;
        match resp.status {
            404 => Ok(None),
            s if s >= 400 => Err(http_error("HeadObject", key, s, &resp.body)),
            _ => {
                let last_modified = parse_http_date("HeadObject", key, resp.last_modified.as_deref())?;
                Ok(Some(ObjectVersion { key: key.to_string(), last_modified }))
            }
        }
    }

    async fn list(&self, prefix: &str, pattern: &Regex) -> Result<Vec<ObjectVersion>, StorageError> {
        let mut versions = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut params: Vec<(&str, &str)> = vec![("prefix", prefix)];
            if let Some(ref m) = marker {
                params.push(("marker", m.as_str()));
            }
            let call = Call {
                operation: "ListObjects",
                method:    Method::GET,
                key:       prefix,
                path:      self.bucket_path(),
                query:     sign::canonical_query(&params),
                body:      Vec::new(),
                amz:       BTreeMap::new(),
            };

            let resp = self.send(call).await?;
            if resp.status >= 400 {
                return Err(http_error("ListObjects", prefix, resp.status, &resp.body));
            }

            let page = parse_list_page(&String::from_utf8_lossy(&resp.body)).map_err(|message| {
                StorageError::Transport { operation: "ListObjects", key: prefix.to_string(), message }
            })?;
            versions.extend(page.objects.into_iter().filter(|v| pattern.is_match(&v.key)));

            match page.next_marker {
                Some(next) if page.truncated => marker = Some(next),
                _ => break,
            }
        }

        sort_versions(&mut versions);
        Ok(versions)
    }
}

// ── XML helpers ───────────────────────────────────────────────────────────────

/// Find the text content of the first `<tag>…</tag>` element in XML.
fn xml_text(xml: &str, tag: &str) -> Option<String> {
    let tag_bytes  = tag.as_bytes();
    let mut reader = XmlReader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut in_tag = false;

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) if e.local_name().as_ref() == tag_bytes => in_tag = true,
            Ok(XmlEvent::End(_)) if in_tag => return None,
            Ok(XmlEvent::Text(e)) if in_tag => {
                return e.unescape().ok().map(|s| s.into_owned());
            }
            Ok(XmlEvent::Eof) | Err(_) => break,
            _ => {}
        }
    }
    None
}

struct ListPage {
    objects:     Vec<ObjectVersion>,
    truncated:   bool,
    next_marker: Option<String>,
}

/// Parse one `ListBucketResult` page. The continuation marker is
/// `NextMarker` when present, otherwise the last key of the page.
fn parse_list_page(xml: &str) -> Result<ListPage, String> {
    let mut reader = XmlReader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut objects        = Vec::new();
    let mut truncated      = false;
    let mut next_marker    = None;
    let mut in_contents    = false;
    let mut current        = String::new();
    let mut key: Option<String>      = None;
    let mut modified: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "Contents" {
                    in_contents = true;
                    key = None;
                    modified = None;
                }
                current = name;
            }
            Ok(XmlEvent::Text(e)) => {
                let text = e.unescape().map_err(|e| e.to_string())?.into_owned();
                match (in_contents, current.as_str()) {
                    (true, "Key")          => key = Some(text),
                    (true, "LastModified") => modified = Some(text),
                    (false, "IsTruncated") => truncated = text == "true",
                    (false, "NextMarker")  => next_marker = Some(text),
                    _ => {}
                }
            }
            Ok(XmlEvent::End(e)) => {
                if e.local_name().as_ref() == b"Contents" {
                    in_contents = false;
                    let k = key.take().ok_or("Contents entry without Key")?;
                    let m = modified.take().ok_or_else(|| format!("{} has no LastModified", k))?;
                    let last_modified = DateTime::parse_from_rfc3339(&m)
                        .map_err(|e| format!("invalid LastModified '{}': {}", m, e))?
                        .with_timezone(&Utc);
                    objects.push(ObjectVersion { key: k, last_modified });
                }
                current.clear();
            }
            Ok(XmlEvent::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
    }

    if next_marker.is_none() {
        next_marker = objects.last().map(|o: &ObjectVersion| o.key.clone());
    }
    Ok(ListPage { objects, truncated, next_marker })
}
