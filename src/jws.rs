//! 請求簽署器：將載荷與目前的 nonce 包裝成 JWS 信封。

use serde::Serialize;
use thiserror::Error;

use crate::{
    codec::base64url,
    identity::Identity,
    payload::{PayloadError, PayloadT},
    protection::JoseHeader,
    signature::SignatureError,
};

/// 表示與 JWS 相關的錯誤。
#[derive(Error, Debug)]
pub enum JwsError {
    /// 載荷無效或無法序列化。
    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),
    /// JSON 序列化錯誤。
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// 簽名失敗，會話無法繼續。
    #[error(transparent)]
    Signature(#[from] SignatureError),
}

type Result<T> = std::result::Result<T, JwsError>;

/// 送往 ACME 伺服器的 JWS 信封。
///
/// - `header`：未受保護的 JOSE 標頭（`alg` 與 `jwk`）。
/// - `protected`：含 nonce 的受保護標頭，經 base64url 編碼。
/// - `payload`：附加 `resource` 欄位後的載荷，經 base64url 編碼。
/// - `signature`：對 `protected.payload` 的 RS256 簽名，經 base64url 編碼。
#[derive(Serialize, Debug)]
pub struct Jws {
    header: JoseHeader,
    protected: String,
    payload: String,
    signature: String,
}

impl Jws {
    /// 使用帳戶身分與 nonce 簽署載荷。
    pub fn sign<P: PayloadT + ?Sized>(
        identity: &Identity,
        resource: &str,
        payload: &P,
        nonce: &str,
    ) -> Result<Self> {
        let header = JoseHeader::new(identity.jwk());
        let protected = header.protect(nonce).to_base64url()?;
        let payload = base64url(serde_json::to_string(&payload.to_request_value(resource)?)?);

        let signing_input = format!("{}.{}", protected, payload);
        let signature = base64url(identity.sign(signing_input.as_bytes())?);

        Ok(Jws {
            header,
            protected,
            payload,
            signature,
        })
    }

    pub fn protected(&self) -> &str {
        &self.protected
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// 將信封序列化為 JSON 字串，作為 POST 內容。
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
