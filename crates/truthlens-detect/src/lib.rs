use std::collections::BTreeMap;
use std::io::Read as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use url::Url;

pub const DEFAULT_ENDPOINT: &str =
    "https://router.huggingface.co/hf-inference/models/umm-maybe/AI-image-detector";

const CREDENTIALS_SCHEMA_VERSION: &str = "truthlens.credentials@0.1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl ImageKind {
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(Self::Jpeg);
        }
        if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
            return Some(Self::Png);
        }
        if bytes.starts_with(b"GIF8") {
            return Some(Self::Gif);
        }
        if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
            return Some(Self::Webp);
        }
        None
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageFile {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub kind: Option<ImageKind>,
}

impl ImageFile {
    pub fn read(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("read image: {}", path.display()))?;
        if bytes.is_empty() {
            anyhow::bail!("image file is empty: {}", path.display());
        }
        let kind = ImageKind::sniff(&bytes);
        Ok(Self {
            path: path.to_path_buf(),
            bytes,
            kind,
        })
    }

    /// MIME type sent with the upload. Unrecognized formats fall back to
    /// `image/jpeg`, which the endpoint accepts for any image payload.
    pub fn content_type(&self) -> &'static str {
        match self.kind {
            Some(kind) => kind.content_type(),
            None => "image/jpeg",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Prediction {
    pub label: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub label: String,
    pub ai_probability: f64,
    pub authentic: bool,
}

#[derive(Debug, Clone)]
pub struct DetectorClient {
    endpoint: Url,
    token: Option<String>,
}

impl DetectorClient {
    pub fn from_endpoint(endpoint: &str, token: Option<String>) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .with_context(|| format!("invalid endpoint url: {endpoint:?}"))?;
        match endpoint.scheme() {
            "http" | "https" => {}
            other => anyhow::bail!("unsupported url scheme {other:?} for {}", endpoint.as_str()),
        }
        Ok(Self { endpoint, token })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn classify(&self, image: &ImageFile) -> Result<Vec<Prediction>> {
        let body = self.post_image(image)?;
        parse_predictions(&body)
    }

    /// The parsed response document as-is, without interpreting it as a
    /// prediction list.
    pub fn classify_raw(&self, image: &ImageFile) -> Result<Value> {
        let body = self.post_image(image)?;
        parse_response_value(&body)
    }

    /// POST the image bytes and return the raw response body. A non-2xx
    /// status is an error carrying the status and the body text.
    pub fn post_image(&self, image: &ImageFile) -> Result<Vec<u8>> {
        let mut req = ureq::post(self.endpoint.as_str())
            .config()
            .http_status_as_error(false)
            .build()
            .header("Content-Type", image.content_type());
        if let Some(token) = self.token.as_deref() {
            req = req.header("Authorization", &format!("Bearer {token}"));
        }
        let resp = req
            .send(&image.bytes[..])
            .map_err(|e| anyhow::anyhow!("http POST {}: {e}", self.endpoint))?;
        let status: u16 = resp.status().into();
        let mut reader = resp.into_body().into_reader();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).context("read http response")?;
        if !(200..300).contains(&status) {
            anyhow::bail!(
                "HTTP {status} for POST {}: {}",
                self.endpoint,
                String::from_utf8_lossy(&buf).trim()
            );
        }
        Ok(buf)
    }
}

/// Probe the endpoint with a GET. Any HTTP response counts as reachable;
/// the status is returned for reporting.
pub fn probe_endpoint(endpoint: &str) -> Result<u16> {
    let url = Url::parse(endpoint).with_context(|| format!("invalid endpoint url: {endpoint:?}"))?;
    let resp = ureq::get(url.as_str())
        .config()
        .http_status_as_error(false)
        .build()
        .call()
        .map_err(|e| anyhow::anyhow!("http GET {url}: {e}"))?;
    Ok(resp.status().into())
}

pub fn parse_response_value(bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes)
        .with_context(|| format!("parse response JSON: {}", body_preview(bytes)))
}

pub fn parse_predictions(bytes: &[u8]) -> Result<Vec<Prediction>> {
    let doc = parse_response_value(bytes)?;
    predictions_from_value(&doc)
}

fn predictions_from_value(doc: &Value) -> Result<Vec<Prediction>> {
    if let Some(obj) = doc.as_object() {
        // The hosted model answers a cold start with
        // {"error": "...", "estimated_time": <secs>}.
        if let Some(msg) = obj.get("error").and_then(Value::as_str) {
            match obj.get("estimated_time").and_then(Value::as_f64) {
                Some(secs) => anyhow::bail!("model error: {msg} (estimated_time: {secs}s)"),
                None => anyhow::bail!("model error: {msg}"),
            }
        }
        if obj.contains_key("label") {
            let p: Prediction =
                serde_json::from_value(doc.clone()).context("parse prediction object")?;
            return Ok(vec![p]);
        }
        anyhow::bail!("unexpected response shape: {}", value_preview(doc));
    }
    if let Some(items) = doc.as_array() {
        // Batched responses arrive wrapped once more: [[{label, score}, ...]].
        if items.len() == 1 && items[0].is_array() {
            return predictions_from_value(&items[0]);
        }
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let p: Prediction = serde_json::from_value(item.clone())
                .with_context(|| format!("parse prediction entry: {}", value_preview(item)))?;
            out.push(p);
        }
        return Ok(out);
    }
    anyhow::bail!("unexpected response shape: {}", value_preview(doc));
}

/// Interpret the classifier output as an AI-generated-or-not verdict.
///
/// A label containing "ai"/"generated"/"fake" carries the AI probability
/// directly. Failing that, a "real"/"authentic" label is inverted. Failing
/// both, the top prediction decides.
pub fn analyze(predictions: &[Prediction]) -> Result<Analysis> {
    let top = predictions
        .first()
        .ok_or_else(|| anyhow::anyhow!("empty prediction list"))?;

    let ai = predictions.iter().find(|p| {
        let l = p.label.to_ascii_lowercase();
        l.contains("ai") || l.contains("generated") || l.contains("fake")
    });
    if let Some(p) = ai {
        return Ok(Analysis {
            label: p.label.clone(),
            ai_probability: p.score,
            authentic: p.score < 0.5,
        });
    }

    let real = predictions.iter().find(|p| {
        let l = p.label.to_ascii_lowercase();
        l.contains("real") || l.contains("authentic")
    });
    if let Some(p) = real {
        return Ok(Analysis {
            label: p.label.clone(),
            ai_probability: 1.0 - p.score,
            authentic: true,
        });
    }

    let l = top.label.to_ascii_lowercase();
    Ok(Analysis {
        label: top.label.clone(),
        ai_probability: top.score,
        authentic: !(l.contains("ai") || l.contains("fake")),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Flag,
    Env(&'static str),
    Credentials,
}

impl std::fmt::Display for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flag => write!(f, "flag:--token"),
            Self::Env(key) => write!(f, "env:{key}"),
            Self::Credentials => write!(f, "credentials"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedToken {
    pub token: String,
    pub source: TokenSource,
}

const TOKEN_ENV_KEYS: [&str; 3] = ["HF_TOKEN", "HF_API_KEY", "HUGGINGFACE_API_KEY"];

/// Resolve the API token: explicit flag, then the environment, then the
/// credentials file. `Ok(None)` means no token is configured anywhere.
pub fn resolve_token(flag: Option<&str>, endpoint: &str) -> Result<Option<ResolvedToken>> {
    if let Some(token) = flag {
        let token = token.trim();
        if !token.is_empty() {
            return Ok(Some(ResolvedToken {
                token: token.to_string(),
                source: TokenSource::Flag,
            }));
        }
    }
    for key in TOKEN_ENV_KEYS {
        if let Ok(v) = std::env::var(key) {
            let v = v.trim();
            if !v.is_empty() {
                return Ok(Some(ResolvedToken {
                    token: v.to_string(),
                    source: TokenSource::Env(key),
                }));
            }
        }
    }
    if let Some(token) = load_token(endpoint)? {
        return Ok(Some(ResolvedToken {
            token,
            source: TokenSource::Credentials,
        }));
    }
    Ok(None)
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
struct CredentialsFile {
    schema_version: String,
    #[serde(default)]
    tokens: BTreeMap<String, String>,
}

pub fn credentials_path() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("TRUTHLENS_HOME") {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir).join("credentials.json"));
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        return Ok(PathBuf::from(home).join(".truthlens").join("credentials.json"));
    }
    if let Ok(home) = std::env::var("USERPROFILE") {
        return Ok(PathBuf::from(home).join(".truthlens").join("credentials.json"));
    }
    anyhow::bail!("missing HOME/USERPROFILE; set TRUTHLENS_HOME to store credentials")
}

pub fn canonical_endpoint_url(endpoint: &str) -> Result<String> {
    let url = Url::parse(endpoint).with_context(|| format!("invalid endpoint url: {endpoint:?}"))?;
    Ok(url.as_str().to_string())
}

pub fn load_token(endpoint: &str) -> Result<Option<String>> {
    let key = canonical_endpoint_url(endpoint)?;
    let path = credentials_path()?;
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    let creds: CredentialsFile =
        serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))?;
    Ok(creds.tokens.get(&key).cloned())
}

pub fn store_token(endpoint: &str, token: &str) -> Result<()> {
    let token = token.trim();
    if token.is_empty() {
        anyhow::bail!("token must be non-empty");
    }
    let key = canonical_endpoint_url(endpoint)?;
    let path = credentials_path()?;
    let mut creds: CredentialsFile = match std::fs::read(&path) {
        Ok(bytes) => {
            serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))?
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => CredentialsFile {
            schema_version: CREDENTIALS_SCHEMA_VERSION.to_string(),
            tokens: BTreeMap::new(),
        },
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };

    if creds.schema_version.trim().is_empty() {
        creds.schema_version = CREDENTIALS_SCHEMA_VERSION.to_string();
    }
    creds.tokens.insert(key, token.to_string());

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create dir: {}", parent.display()))?;
    }
    let mut out = serde_json::to_vec_pretty(&creds)?;
    if out.last() != Some(&b'\n') {
        out.push(b'\n');
    }
    std::fs::write(&path, &out).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    let digest = h.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

fn body_preview(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    if trimmed.len() <= 200 {
        trimmed.to_string()
    } else {
        let mut end = 200;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    }
}

fn value_preview(doc: &Value) -> String {
    let rendered = doc.to_string();
    body_preview(rendered.as_bytes())
}
