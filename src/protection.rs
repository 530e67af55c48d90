use serde::Serialize;

use crate::{codec::base64url, jwk::Jwk};

/// JWS 使用的簽章演算法，帳戶金鑰固定為 RSA。
pub const ALG_RS256: &str = "RS256";

/// 未受保護的 JOSE 標頭，隨信封以 `header` 欄位原樣送出。
#[derive(Debug, Clone, Serialize)]
pub struct JoseHeader {
    alg: &'static str,
    jwk: Jwk,
}

impl JoseHeader {
    pub fn new(jwk: &Jwk) -> Self {
        Self {
            alg: ALG_RS256,
            jwk: jwk.clone(),
        }
    }

    /// 加上 nonce，產生受保護標頭。
    pub fn protect(&self, nonce: impl Into<String>) -> ProtectedHeader {
        ProtectedHeader {
            alg: self.alg,
            jwk: self.jwk.clone(),
            nonce: nonce.into(),
        }
    }
}

/// 受保護標頭，欄位依序為 `alg`、`jwk`、`nonce`。
#[derive(Debug, Clone, Serialize)]
pub struct ProtectedHeader {
    alg: &'static str,
    jwk: Jwk,
    nonce: String,
}

impl ProtectedHeader {
    #[cfg(test)]
    pub(crate) fn nonce(&self) -> &str {
        &self.nonce
    }

    /// 序列化為 JSON 後進行 base64url 編碼。
    pub fn to_base64url(&self) -> Result<String, serde_json::Error> {
        Ok(base64url(serde_json::to_string(self)?))
    }
}
