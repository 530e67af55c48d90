use openssl::sha::sha256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    codec::base64url,
    key_pair::{KeyError, KeyPair},
};

/// JWK 相關操作的錯誤類型。
#[derive(Debug, Error)]
pub enum JwkError {
    /// 金鑰無法轉換成 JWK。
    #[error("Failed to convert key: {0}")]
    KeyConversion(#[from] KeyError),
    /// 序列化錯誤。
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// RSA 格式的 JSON Web Key。
///
/// 欄位宣告順序即序列化順序（`e`、`kty`、`n`），
/// 與 RFC 7638 的字典序一致，因此序列化結果可直接用於計算 thumbprint。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    e: String,
    kty: String,
    n: String,
}

impl Jwk {
    /// 根據金鑰對的 RSA 公開參數產生 JWK。
    pub fn new(key_pair: &KeyPair) -> Result<Self, JwkError> {
        let components = key_pair.rsa_components()?;

        Ok(Jwk {
            e: base64url(&components.e),
            kty: "RSA".to_string(),
            n: base64url(&components.n),
        })
    }

    /// 產生標準化的 JSON 表示（無空白、固定欄位順序）。
    pub fn to_canonical_json(&self) -> Result<String, JwkError> {
        serde_json::to_string(self).map_err(JwkError::from)
    }

    /// 計算 JWK thumbprint：`base64url(SHA-256(canonical JSON))`。
    pub fn thumbprint(&self) -> Result<String, JwkError> {
        let hash = sha256(self.to_canonical_json()?.as_bytes());
        Ok(base64url(hash))
    }
}
