use thiserror::Error;

/// 表示在取得 Nonce 時可能發生的錯誤狀況。
#[derive(Error, Debug, PartialEq, Eq)]
pub enum NonceError {
    /// 目前沒有可用的 nonce，且無法從伺服器取得新的值。
    #[error("No Replay-Nonce available, the server did not provide a fresh one")]
    Missing,
}

/// 會話持有的單次使用 nonce。
///
/// 每次簽署請求都會以 [`NonceSlot::take`] 取走目前的值，
/// 之後必須由伺服器回應中的 `Replay-Nonce` 重新填入，才能再次簽署。
#[derive(Debug, Default)]
pub struct NonceSlot {
    current: Option<String>,
}

impl NonceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取走目前的 nonce，之後槽位為空。
    pub fn take(&mut self) -> Result<String, NonceError> {
        self.current.take().ok_or(NonceError::Missing)
    }

    /// 以回應標頭中的值覆寫目前的 nonce；若回應未提供則保持原狀。
    pub fn capture(&mut self, replay_nonce: Option<&str>) {
        if let Some(nonce) = replay_nonce.filter(|n| !n.is_empty()) {
            self.current = Some(nonce.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }

    #[cfg(test)]
    pub(crate) fn peek(&self) -> Option<&str> {
        self.current.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_is_single_use() {
        let mut slot = NonceSlot::new();
        slot.capture(Some("n1"));
        assert_eq!(slot.take().unwrap(), "n1");
        assert_eq!(slot.take(), Err(NonceError::Missing));
    }

    #[test]
    fn test_capture_overwrites_and_ignores_missing() {
        let mut slot = NonceSlot::new();
        slot.capture(Some("n1"));
        slot.capture(Some("n2"));
        slot.capture(None);
        slot.capture(Some(""));
        assert_eq!(slot.peek(), Some("n2"));
        assert!(!slot.is_empty());
    }
}
