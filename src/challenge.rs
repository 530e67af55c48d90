//! HTTP-01 挑戰引擎。
//!
//! 一次驗證的流程為：寫入挑戰檔案、通知伺服器、以指數退避輪詢挑戰狀態。
//! 挑戰檔案由 [`ChallengeFile`] 守護，無論驗證結果為何都會在離開作用域時移除。

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock},
    thread,
    time::Duration,
};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    codec::base64url,
    config::PollPolicy,
    payload::ChallengeResponsePayload,
    session::{Session, SessionError},
    transport::TransportError,
};

/// 本用戶端支援的唯一挑戰類型。
pub const HTTP_01: &str = "http-01";

/// 挑戰檔案相對於 web root 的目錄。
pub const CHALLENGE_DIR: &str = ".well-known/acme-challenge";

/// 定義與挑戰（Challenge）流程相關的錯誤類型。
#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("Filesystem error at {}: {reason}", .path.display())]
    Filesystem { path: PathBuf, reason: String },
    #[error("No {0} challenge offered by the server")]
    TypeUnavailable(String),
    #[error("Challenge rejected ({code}): {detail}")]
    Rejected { code: u16, detail: String },
    #[error("Challenge for {0} was not validated in time")]
    Timeout(String),
    #[error("Challenge for {domain} failed: {detail}")]
    Failed { domain: String, detail: String },
    #[error("Self-check failed for {domain}: {reason}")]
    SelfCheck { domain: String, reason: String },
    #[error("Authorization response parsing failed: {0}")]
    Malformed(String),
    #[error(transparent)]
    Session(#[from] SessionError),
}

type Result<T> = std::result::Result<T, ChallengeError>;

/// 表示 ACME 挑戰的狀態，用來追蹤挑戰進展。
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    #[default]
    Pending,
    Processing,
    Valid,
    Invalid,
    #[serde(other)]
    Unknown,
}

impl ChallengeStatus {
    /// 只有 `pending` 需要繼續輪詢。
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ValidationRecord {
    #[serde(rename = "addressUsed")]
    pub address_used: Option<String>,
}

/// 表示一個 ACME 驗證挑戰。
#[derive(Debug, Clone, Deserialize)]
pub struct Challenge {
    #[serde(rename = "type")]
    pub challenge_type: String,
    pub uri: String,
    pub token: String,
    #[serde(default)]
    pub status: ChallengeStatus,
}

/// `new-authz` 回傳的授權物件，只保留挑戰列表。
#[derive(Debug, Clone, Deserialize)]
pub struct Authorization {
    #[serde(default)]
    pub challenges: Vec<Challenge>,
}

impl Authorization {
    pub fn from_json(value: &Value) -> Result<Self> {
        Authorization::deserialize(value).map_err(|e| ChallengeError::Malformed(e.to_string()))
    }

    /// 找出指定類型的挑戰。
    pub fn challenge(&self, challenge_type: &str) -> Result<&Challenge> {
        self.challenges
            .iter()
            .find(|c| c.challenge_type == challenge_type)
            .ok_or_else(|| ChallengeError::TypeUnavailable(challenge_type.to_string()))
    }
}

/// 輪詢時取得的挑戰狀態。
#[derive(Debug, Deserialize)]
struct ChallengeState {
    #[serde(default = "unknown_status")]
    status: ChallengeStatus,
    #[serde(default, rename = "validationRecord")]
    validation_record: Vec<ValidationRecord>,
    #[serde(default)]
    error: Option<Value>,
}

fn unknown_status() -> ChallengeStatus {
    ChallengeStatus::Unknown
}

impl ChallengeState {
    fn failure_detail(&self) -> String {
        self.error
            .as_ref()
            .and_then(|e| e.get("detail"))
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .unwrap_or_else(|| format!("challenge status is {:?}", self.status))
    }
}

/// 輪詢結束時的結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Valid,
    Invalid(String),
    TimedOut,
}

/// web root 下的挑戰檔案，離開作用域時自動移除。
///
/// 移除檔案後，若 `.well-known/acme-challenge` 與 `.well-known` 已為空目錄也一併刪除。
/// 同一路徑可同時被多個守護物件持有，最後一個離開作用域時才移除檔案。
#[derive(Debug)]
pub struct ChallengeFile {
    webroot: PathBuf,
    path: PathBuf,
}

impl ChallengeFile {
    /// 於 `<webroot>/.well-known/acme-challenge/<token>` 寫入內容。
    ///
    /// 目錄已存在時沿用；web root 本身必須存在。
    pub fn write(webroot: &Path, token: &str, contents: &str) -> Result<Self> {
        if !is_safe_token(token) {
            return Err(ChallengeError::Filesystem {
                path: webroot.join(CHALLENGE_DIR),
                reason: format!("refusing to write token {:?}", token),
            });
        }
        if !webroot.is_dir() {
            return Err(ChallengeError::Filesystem {
                path: webroot.to_path_buf(),
                reason: "web root is not an existing directory".into(),
            });
        }

        let dir = webroot.join(CHALLENGE_DIR);
        fs::create_dir_all(&dir).map_err(|e| ChallengeError::Filesystem {
            path: dir.clone(),
            reason: e.to_string(),
        })?;

        let path = dir.join(token);
        fs::write(&path, contents).map_err(|e| ChallengeError::Filesystem {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "wrote challenge file");

        if let Ok(mut holders) = live_files().lock() {
            *holders.entry(path.clone()).or_default() += 1;
        }
        Ok(ChallengeFile {
            webroot: webroot.to_path_buf(),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ChallengeFile {
    fn drop(&mut self) {
        if !release(&self.path) {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove challenge file");
            }
        }

        let challenge_dir = self.webroot.join(CHALLENGE_DIR);
        let well_known = self.webroot.join(".well-known");
        for dir in [challenge_dir, well_known] {
            if !is_empty_dir(&dir) {
                break;
            }
            if let Err(e) = fs::remove_dir(&dir) {
                warn!(path = %dir.display(), error = %e, "failed to remove challenge directory");
                break;
            }
        }
    }
}

/// 每個挑戰檔案路徑目前的守護物件數量。
fn live_files() -> &'static Mutex<HashMap<PathBuf, usize>> {
    static LIVE: OnceLock<Mutex<HashMap<PathBuf, usize>>> = OnceLock::new();
    LIVE.get_or_init(Default::default)
}

/// 釋放一個持有者；回傳是否為最後一個。
fn release(path: &Path) -> bool {
    let Ok(mut holders) = live_files().lock() else {
        return true;
    };
    match holders.get_mut(path) {
        Some(count) if *count > 1 => {
            *count -= 1;
            false
        }
        _ => {
            holders.remove(path);
            true
        }
    }
}

fn is_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

fn is_safe_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// 輪詢間隔：從初始值開始倍增，達到上限後維持不變。
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(policy: &PollPolicy) -> Self {
        Self {
            next: policy.initial_delay,
            max: policy.max_delay,
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next.min(self.max);
        self.next = current.saturating_mul(2).min(self.max);
        Some(current)
    }
}

/// 驅動單一網域的 HTTP-01 驗證。
pub struct ChallengeEngine<'a> {
    session: &'a mut Session,
    policy: PollPolicy,
}

impl<'a> ChallengeEngine<'a> {
    pub fn new(session: &'a mut Session) -> Self {
        let policy = session.config().poll.clone();
        Self { session, policy }
    }

    /// 寫入挑戰檔案、通知伺服器並輪詢至結束。挑戰檔案在返回前移除。
    pub fn run(&mut self, domain: &str, webroot: &Path, challenge: &Challenge) -> Result<()> {
        let key_authorization = self.session.identity().key_authorization(&challenge.token);
        let _file = ChallengeFile::write(webroot, &challenge.token, &key_authorization)?;

        self.notify(challenge, &key_authorization)?;
        info!(domain, "challenge accepted, waiting for validation");

        match self.poll(&challenge.uri)? {
            PollOutcome::Valid => {
                info!(domain, "domain validated");
                Ok(())
            }
            PollOutcome::Invalid(detail) => Err(ChallengeError::Failed {
                domain: domain.to_string(),
                detail,
            }),
            PollOutcome::TimedOut => Err(ChallengeError::Timeout(domain.to_string())),
        }
    }

    /// 告知伺服器挑戰已就緒，伺服器必須回應 202。
    pub fn notify(&mut self, challenge: &Challenge, key_authorization: &str) -> Result<()> {
        let payload = ChallengeResponsePayload::new(key_authorization);
        let response = self
            .session
            .request("challenge", &payload, Some(&challenge.uri), false, Some(202))
            .map_err(|e| match e {
                SessionError::Transport(TransportError::Api { code, detail }) => {
                    ChallengeError::Rejected { code, detail }
                }
                other => ChallengeError::Session(other),
            })?;

        if response.code != 202 {
            return Err(ChallengeError::Rejected {
                code: response.code,
                detail: format!("expected 202 Accepted, got {} {}", response.code, response.status),
            });
        }
        Ok(())
    }

    /// 等待 `settle` 後以不簽署的 GET 輪詢挑戰 URI。
    ///
    /// `pending` 繼續輪詢，`valid` 成功，其他狀態（包含 `processing`）立即視為失敗。
    /// 最後一次查詢後不再等待。
    pub fn poll(&self, uri: &str) -> Result<PollOutcome> {
        thread::sleep(self.policy.settle);

        let mut delays = Backoff::new(&self.policy);
        for attempt in 1..=self.policy.max_attempts {
            let response = self.session.get(uri, false, None)?;
            let state = ChallengeState::deserialize(response.json())
                .map_err(|e| ChallengeError::Malformed(e.to_string()))?;
            debug!(uri, attempt, status = ?state.status, "polled challenge");

            if state.status == ChallengeStatus::Valid {
                if let Some(address) = state
                    .validation_record
                    .first()
                    .and_then(|r| r.address_used.as_deref())
                {
                    info!(address, "validated via address");
                }
                return Ok(PollOutcome::Valid);
            }
            if !state.status.is_in_progress() {
                return Ok(PollOutcome::Invalid(state.failure_detail()));
            }

            if attempt < self.policy.max_attempts {
                if let Some(delay) = delays.next() {
                    thread::sleep(delay);
                }
            }
        }

        Ok(PollOutcome::TimedOut)
    }
}

/// 驗證 web root 確實能經由 `http://<domain>/` 被存取。
///
/// 寫入隨機 token 的檔案後以 GET 讀回，內容必須等於 `token.thumbprint`。
pub fn self_check(session: &Session, domain: &str, webroot: &Path) -> Result<()> {
    let mut bytes = [0u8; 24];
    openssl::rand::rand_bytes(&mut bytes).map_err(|e| ChallengeError::SelfCheck {
        domain: domain.to_string(),
        reason: e.to_string(),
    })?;
    check_with_token(session, domain, webroot, &base64url(bytes))
}

fn check_with_token(session: &Session, domain: &str, webroot: &Path, token: &str) -> Result<()> {
    let expected = session.identity().key_authorization(token);
    let _file = ChallengeFile::write(webroot, token, &expected)?;

    let url = format!("http://{}/{}/{}", domain, CHALLENGE_DIR, token);
    debug!(url = %url, "self-checking web root");
    let failure = |reason: String| ChallengeError::SelfCheck {
        domain: domain.to_string(),
        reason,
    };

    let response = session
        .get(&url, true, Some(200))
        .map_err(|e| failure(e.to_string()))?;
    if response.bytes() != expected.as_bytes() {
        return Err(failure(format!("{} did not serve the expected content", url)));
    }
    Ok(())
}
