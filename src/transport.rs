//! 協定傳輸層：送出單一 HTTP 請求，解析狀態、標頭（含 `Link`）與 JSON 內容，
//! 並在非預期狀態碼時回傳結構化錯誤。

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use reqwest::{blocking::Client, header::CONTENT_TYPE, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// 傳輸層錯誤。
#[derive(Debug, Error)]
pub enum TransportError {
    /// 傳輸本身失敗（連線、逾時等）。
    #[error("request error: {0}")]
    Http(String),
    /// 狀態碼既非預期值也不在 2xx 範圍。
    #[error("{detail}")]
    Api { code: u16, detail: String },
    /// 預期 JSON 內容但無法解析。
    #[error("malformed response from {url}: {reason}")]
    MalformedResponse { url: String, reason: String },
}

type Result<T> = std::result::Result<T, TransportError>;

/// 傳輸層回傳的原始回應。
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub code: u16,
    /// 狀態碼的標準原因短語；reqwest 不保留伺服器實際送出的短語。
    pub status: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// 建立指定狀態碼的回應，狀態文字取標準原因短語。
    pub fn new(code: u16) -> Self {
        let status = StatusCode::from_u16(code)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_string();
        Self {
            code,
            status,
            ..Default::default()
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn json(self, value: &Value) -> Self {
        self.header("Content-Type", "application/json")
            .body(value.to_string().into_bytes())
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// 執行 HTTP 請求的能力：`body` 為 `None` 時使用 GET，否則以 JSON 內容 POST。
pub trait Transport: fmt::Debug {
    fn send(&self, url: &str, body: Option<&str>) -> Result<RawResponse>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, url: &str, body: Option<&str>) -> Result<RawResponse> {
        (**self).send(url, body)
    }
}

/// 以 `reqwest` 阻塞式用戶端實作的傳輸層。
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// 建立傳輸層，`timeout` 為每次請求的上限。
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn send(&self, url: &str, body: Option<&str>) -> Result<RawResponse> {
        let request = match body {
            None => self.client.get(url),
            Some(body) => self
                .client
                .post(url)
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_owned()),
        };

        let response = request
            .send()
            .map_err(|e| TransportError::Http(format!("{}: {}", url, e)))?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_owned(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .map_err(|e| TransportError::Http(format!("{}: {}", url, e)))?
            .to_vec();

        Ok(RawResponse {
            code: status.as_u16(),
            status: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}

/// 已解析的回應標頭。名稱一律小寫，`Link` 標頭另存為 `rel → URL`。
#[derive(Debug, Clone, Default)]
pub struct Headers {
    values: HashMap<String, String>,
    links: HashMap<String, String>,
}

impl Headers {
    /// 解析標頭列表；同名標頭以最後出現者為準，格式錯誤的 `Link` 會被略過。
    pub fn parse<'a, I>(headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut parsed = Headers::default();
        for (name, value) in headers {
            let name = name.trim().to_lowercase();
            let value = value.trim();
            if name == "link" {
                parse_links(value, &mut parsed.links);
            } else {
                parsed.values.insert(name, value.to_string());
            }
        }
        parsed
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn link(&self, rel: &str) -> Option<&str> {
        self.links.get(rel).map(String::as_str)
    }

    pub fn replay_nonce(&self) -> Option<&str> {
        self.get("replay-nonce")
    }

    pub fn location(&self) -> Option<&str> {
        self.get("location")
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get("content-type")
    }
}

impl From<&RawResponse> for Headers {
    fn from(raw: &RawResponse) -> Self {
        Headers::parse(raw.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

fn parse_links(value: &str, links: &mut HashMap<String, String>) {
    let mut rest = value;
    while let Some(start) = rest.find('<') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('>') else {
            break;
        };
        let url = after[..end].trim();
        let tail = &after[end + 1..];
        let params = match tail.find('<') {
            Some(next) => &tail[..next],
            None => tail,
        };

        if let Some(rel) = rel_param(params) {
            if !url.is_empty() {
                links.insert(rel, url.to_string());
            }
        }
        rest = &tail[params.len()..];
    }
}

fn rel_param(params: &str) -> Option<String> {
    params.split(';').find_map(|param| {
        let param = param.trim().trim_end_matches(',').trim();
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("rel") {
            return None;
        }
        let value = value.trim().strip_prefix('"')?.strip_suffix('"')?;
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// 回應內容：JSON 模式下為解析後的值，原始模式下為位元組。
#[derive(Debug, Clone)]
pub enum Body {
    Json(Value),
    Raw(Vec<u8>),
}

/// 經過狀態檢查與內容解碼的回應。
#[derive(Debug, Clone)]
pub struct Response {
    pub code: u16,
    pub status: String,
    pub headers: Headers,
    pub body: Body,
}

impl Response {
    /// 檢查狀態碼並解碼內容。
    ///
    /// 狀態碼等於 `expected` 或落在 2xx 時視為成功；否則回傳
    /// [`TransportError::Api`]，訊息優先取自 JSON 內容的 `detail` 欄位。
    pub fn evaluate(
        raw: RawResponse,
        headers: Headers,
        url: &str,
        raw_mode: bool,
        expected: Option<u16>,
    ) -> Result<Self> {
        let parsed = if raw.body.is_empty() {
            Ok(Value::Null)
        } else {
            serde_json::from_slice::<Value>(&raw.body)
        };

        let accepted = expected == Some(raw.code) || (200..300).contains(&raw.code);
        if !accepted {
            let detail = parsed
                .as_ref()
                .ok()
                .and_then(|json| json.get("detail"))
                .and_then(Value::as_str)
                .map(ToString::to_string)
                .unwrap_or_else(|| {
                    format!("request failed: {} [{}]: {}", raw.code, raw.status, url)
                });
            return Err(TransportError::Api {
                code: raw.code,
                detail,
            });
        }

        let body = if raw_mode {
            Body::Raw(raw.body)
        } else {
            Body::Json(parsed.map_err(|e| TransportError::MalformedResponse {
                url: url.to_string(),
                reason: e.to_string(),
            })?)
        };

        Ok(Response {
            code: raw.code,
            status: raw.status,
            headers,
            body,
        })
    }

    /// JSON 內容；原始模式下回傳 `Null`。
    pub fn json(&self) -> &Value {
        match &self.body {
            Body::Json(value) => value,
            Body::Raw(_) => &Value::Null,
        }
    }

    /// 原始內容；JSON 模式下回傳空切片。
    pub fn bytes(&self) -> &[u8] {
        match &self.body {
            Body::Raw(bytes) => bytes,
            Body::Json(_) => &[],
        }
    }
}

/// 送出一次請求並評估回應，用於不需要 nonce 的請求。
pub fn exchange(
    transport: &dyn Transport,
    url: &str,
    body: Option<&str>,
    raw_mode: bool,
    expected: Option<u16>,
) -> Result<Response> {
    let method = if body.is_some() { "POST" } else { "GET" };
    debug!(url, method, "sending request");
    let raw = transport.send(url, body)?;
    let headers = Headers::from(&raw);
    debug!(url, code = raw.code, "received response");
    Response::evaluate(raw, headers, url, raw_mode, expected)
}
