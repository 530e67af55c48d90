//! 用戶端設定。

use std::time::Duration;

/// 常用的 ACME 目錄 URL。
pub mod directories {
    /// Let's Encrypt 正式環境。
    pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v01.api.letsencrypt.org/directory";

    /// Let's Encrypt 測試環境，簽發的憑證不受信任。
    pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging.api.letsencrypt.org/directory";
}

/// 挑戰狀態輪詢策略。
///
/// 通知伺服器後先等待 `settle`，之後每次查詢間隔從 `initial_delay` 開始倍增，
/// 最多到 `max_delay`，總共查詢 `max_attempts` 次。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub settle: Duration,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(3),
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(32),
            max_attempts: 10,
        }
    }
}

impl PollPolicy {
    /// 所有等待時間皆為零的策略，測試時使用。
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            settle: Duration::ZERO,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_attempts,
        }
    }
}

/// ACME 用戶端設定，採用 builder 模式。
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// ACME 目錄 URL。
    pub directory_url: String,
    /// 單次 HTTP 請求逾時。
    pub timeout: Duration,
    /// HTTP User-Agent。
    pub user_agent: String,
    /// 挑戰輪詢策略。
    pub poll: PollPolicy,
    /// 是否在建立授權前先自我檢查 webroot。
    pub self_check: bool,
}

impl ClientConfig {
    /// 預設的請求逾時。
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(directory_url: impl Into<String>) -> Self {
        Self {
            directory_url: directory_url.into(),
            timeout: Self::DEFAULT_TIMEOUT,
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            poll: PollPolicy::default(),
            self_check: true,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self
    }

    pub fn poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn self_check(mut self, enabled: bool) -> Self {
        self.self_check = enabled;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(directories::LETS_ENCRYPT_PRODUCTION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.directory_url, directories::LETS_ENCRYPT_PRODUCTION);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.poll.max_attempts, 10);
        assert!(config.self_check);
        assert!(config.user_agent.starts_with("acmeroot/"));
    }

    #[test]
    fn test_builder_pattern() {
        let config = ClientConfig::new(directories::LETS_ENCRYPT_STAGING)
            .timeout(Duration::from_secs(5))
            .poll(PollPolicy::immediate(3))
            .self_check(false);

        assert_eq!(config.directory_url, directories::LETS_ENCRYPT_STAGING);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.poll.max_attempts, 3);
        assert!(!config.self_check);
    }
}
