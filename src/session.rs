//! ACME 會話：延遲解析資源目錄、維護 nonce 鏈，所有簽署請求都經由此處送出。

use thiserror::Error;
use tracing::{debug, info};

use crate::{
    config::ClientConfig,
    directory::{Directory, DirectoryError},
    identity::Identity,
    jws::{Jws, JwsError},
    nonce::{NonceError, NonceSlot},
    payload::PayloadT,
    transport::{exchange, Headers, HttpTransport, Response, Transport, TransportError},
};

/// 會話操作的錯誤。
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Nonce(#[from] NonceError),
    #[error(transparent)]
    Jws(#[from] JwsError),
}

impl SessionError {
    /// 若錯誤來自非預期的 HTTP 狀態碼，回傳該狀態碼。
    pub fn api_code(&self) -> Option<u16> {
        match self {
            SessionError::Transport(TransportError::Api { code, .. }) => Some(*code),
            _ => None,
        }
    }
}

type Result<T> = std::result::Result<T, SessionError>;

/// 與單一 ACME 伺服器互動的會話。
///
/// 目錄與 nonce 由會話獨佔，呼叫端以 `&mut Session` 傳遞。
#[derive(Debug)]
pub struct Session {
    config: ClientConfig,
    identity: Identity,
    transport: Box<dyn Transport>,
    directory: Option<Directory>,
    nonce: NonceSlot,
}

impl Session {
    /// 以指定的傳輸層建立會話，此時尚未發出任何請求。
    pub fn new(config: ClientConfig, identity: Identity, transport: Box<dyn Transport>) -> Self {
        Self {
            config,
            identity,
            transport,
            directory: None,
            nonce: NonceSlot::new(),
        }
    }

    /// 以 `reqwest` 傳輸層建立會話。
    pub fn connect(config: ClientConfig, identity: Identity) -> Result<Self> {
        let transport = HttpTransport::new(config.timeout, &config.user_agent)?;
        Ok(Self::new(config, identity, Box::new(transport)))
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// 送出簽署請求。
    ///
    /// 第一次呼叫時會先讀取目錄並取得初始 nonce。請求送往 `url_override`，
    /// 未提供時送往目錄中 `resource` 對應的 URL。無論狀態碼為何，
    /// 回應中的 `Replay-Nonce` 都會在評估狀態前寫回會話。
    pub fn request<P: PayloadT>(
        &mut self,
        resource: &str,
        payload: &P,
        url_override: Option<&str>,
        raw_mode: bool,
        expected: Option<u16>,
    ) -> Result<Response> {
        let directory = self.directory()?;
        let url = match url_override {
            Some(url) => url.to_string(),
            None => directory.url(resource)?.to_string(),
        };

        let nonce = self.fresh_nonce()?;
        let body = Jws::sign(&self.identity, resource, payload, &nonce)?.to_json()?;

        debug!(resource, url = %url, "sending signed request");
        let raw = self.transport.send(&url, Some(&body))?;
        let headers = Headers::from(&raw);
        self.nonce.capture(headers.replay_nonce());
        debug!(resource, code = raw.code, "received response");

        Ok(Response::evaluate(raw, headers, &url, raw_mode, expected)?)
    }

    /// 送出不簽署的 GET 請求，不影響 nonce。
    pub fn get(&self, url: &str, raw_mode: bool, expected: Option<u16>) -> Result<Response> {
        Ok(exchange(self.transport.as_ref(), url, None, raw_mode, expected)?)
    }

    /// 取得資源目錄，必要時先向伺服器讀取。
    pub fn directory(&mut self) -> Result<&Directory> {
        if self.directory.is_none() {
            self.fetch_directory()?;
        }
        self.directory
            .as_ref()
            .ok_or_else(|| SessionError::Directory(DirectoryError::NotAnObject))
    }

    fn fetch_directory(&mut self) -> Result<()> {
        info!(url = %self.config.directory_url, "reading ACME directory");
        let response = exchange(
            self.transport.as_ref(),
            &self.config.directory_url,
            None,
            false,
            None,
        )?;
        self.nonce.capture(response.headers.replay_nonce());
        self.directory = Some(Directory::from_json(response.json())?);
        Ok(())
    }

    /// 取走目前的 nonce；若上一個回應沒有提供，重新讀取目錄以取得新值。
    fn fresh_nonce(&mut self) -> Result<String> {
        if self.nonce.is_empty() {
            debug!("no replay-nonce on hand, refreshing from directory");
            let response = exchange(
                self.transport.as_ref(),
                &self.config.directory_url,
                None,
                false,
                None,
            )?;
            self.nonce.capture(response.headers.replay_nonce());
        }
        Ok(self.nonce.take()?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{
        payload::RegistrationPayload,
        testing::{directory_response, protected_of, test_identity, MockTransport, DIRECTORY_URL},
        transport::RawResponse,
    };

    fn session_with(mock: &Arc<MockTransport>) -> Session {
        Session::new(
            ClientConfig::new(DIRECTORY_URL),
            test_identity(),
            Box::new(mock.clone()),
        )
    }

    #[test]
    fn test_nonce_chain_is_linear() {
        let mock = Arc::new(MockTransport::new());
        mock.push(directory_response("N0"));
        for i in 1..=4 {
            mock.push(
                RawResponse::new(200)
                    .header("Replay-Nonce", &format!("N{}", i))
                    .json(&json!({})),
            );
        }

        let mut session = session_with(&mock);
        for _ in 0..4 {
            session
                .request("reg", &RegistrationPayload::new(None), Some("https://ca/reg/1"), false, None)
                .unwrap();
        }

        let requests = mock.requests();
        assert_eq!(requests.len(), 5);
        assert_eq!(requests[0].url, DIRECTORY_URL);
        assert!(requests[0].body.is_none());
        for (i, request) in requests[1..].iter().enumerate() {
            assert_eq!(protected_of(request)["nonce"], format!("N{}", i));
        }
    }

    #[test]
    fn test_directory_fetched_once_and_resource_resolved() {
        let mock = Arc::new(MockTransport::new());
        mock.push(directory_response("N0"));
        mock.push(RawResponse::new(201).header("Replay-Nonce", "N1").json(&json!({})));
        mock.push(RawResponse::new(201).header("Replay-Nonce", "N2").json(&json!({})));

        let mut session = session_with(&mock);
        let payload = RegistrationPayload::new(None);
        session.request("new-reg", &payload, None, false, None).unwrap();
        session.request("new-authz", &payload, None, false, None).unwrap();

        let urls: Vec<String> = mock.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            vec![DIRECTORY_URL, "https://ca/acme/new-reg", "https://ca/acme/new-authz"]
        );
    }

    #[test]
    fn test_nonce_captured_from_error_response() {
        let mock = Arc::new(MockTransport::new());
        mock.push(directory_response("N0"));
        mock.push(
            RawResponse::new(400)
                .header("Replay-Nonce", "N1")
                .json(&json!({"detail": "JWS has invalid anti-replay nonce"})),
        );
        mock.push(RawResponse::new(201).header("Replay-Nonce", "N2").json(&json!({})));

        let mut session = session_with(&mock);
        let payload = RegistrationPayload::new(None);
        let err = session
            .request("new-reg", &payload, None, false, None)
            .unwrap_err();
        assert_eq!(err.api_code(), Some(400));
        assert_eq!(err.to_string(), "JWS has invalid anti-replay nonce");

        session.request("new-reg", &payload, None, false, None).unwrap();
        assert_eq!(protected_of(&mock.requests()[2])["nonce"], "N1");
    }

    #[test]
    fn test_missing_nonce_is_refreshed_not_reused() {
        let mock = Arc::new(MockTransport::new());
        mock.push(directory_response("N0"));
        mock.push(RawResponse::new(200).json(&json!({})));
        mock.push(directory_response("N5"));
        mock.push(RawResponse::new(200).header("Replay-Nonce", "N6").json(&json!({})));

        let mut session = session_with(&mock);
        let payload = RegistrationPayload::new(None);
        session.request("reg", &payload, Some("https://ca/reg/1"), false, None).unwrap();
        session.request("reg", &payload, Some("https://ca/reg/1"), false, None).unwrap();

        let requests = mock.requests();
        assert_eq!(requests[2].url, DIRECTORY_URL);
        assert_eq!(protected_of(&requests[1])["nonce"], "N0");
        assert_eq!(protected_of(&requests[3])["nonce"], "N5");
    }

    #[test]
    fn test_directory_failure_propagates() {
        let mock = Arc::new(MockTransport::new());
        mock.push(RawResponse::new(503));

        let mut session = session_with(&mock);
        let err = session
            .request("new-reg", &RegistrationPayload::new(None), None, false, None)
            .unwrap_err();
        assert_eq!(err.api_code(), Some(503));
        assert_eq!(mock.requests().len(), 1);
    }

    #[test]
    fn test_unknown_resource() {
        let mock = Arc::new(MockTransport::new());
        mock.push(directory_response("N0"));

        let mut session = session_with(&mock);
        assert!(matches!(
            session.request("new-order", &RegistrationPayload::new(None), None, false, None),
            Err(SessionError::Directory(DirectoryError::UnknownResource(_)))
        ));
    }

    #[test]
    fn test_unsigned_get_leaves_nonce_untouched() {
        let mock = Arc::new(MockTransport::new());
        mock.push(directory_response("N0"));
        mock.push(RawResponse::new(200).header("Replay-Nonce", "X").json(&json!({})));
        mock.push(RawResponse::new(200).header("Replay-Nonce", "N1").json(&json!({})));

        let mut session = session_with(&mock);
        session.directory().unwrap();
        session.get("https://ca/challenge/1", false, None).unwrap();
        session
            .request("reg", &RegistrationPayload::new(None), Some("https://ca/reg/1"), false, None)
            .unwrap();
        assert_eq!(protected_of(&mock.requests()[2])["nonce"], "N0");
    }
}
