//! 帳戶簽章身分：持有帳戶金鑰，並在建立時一次性推導 JWK 與 thumbprint。

use std::path::Path;

use crate::{
    jwk::{Jwk, JwkError},
    key_pair::KeyPair,
    signature::{create_signature, SignatureError},
};

/// 帳戶金鑰與其衍生資料。
///
/// `jwk` 與 `thumbprint` 在建立後不可變；金鑰在整個會話期間由此結構獨佔。
#[derive(Debug)]
pub struct Identity {
    key_pair: KeyPair,
    jwk: Jwk,
    thumbprint: String,
}

impl Identity {
    /// 從 PEM 檔案載入帳戶金鑰。
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, JwkError> {
        Self::from_key_pair(KeyPair::from_file(path)?)
    }

    /// 以既有的金鑰建立身分，並計算 JWK 與 thumbprint。
    pub fn from_key_pair(key_pair: KeyPair) -> Result<Self, JwkError> {
        let jwk = Jwk::new(&key_pair)?;
        let thumbprint = jwk.thumbprint()?;

        Ok(Self {
            key_pair,
            jwk,
            thumbprint,
        })
    }

    pub fn jwk(&self) -> &Jwk {
        &self.jwk
    }

    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    /// 產生 HTTP-01 的 key authorization：`token.thumbprint`。
    pub fn key_authorization(&self, token: &str) -> String {
        format!("{}.{}", token, self.thumbprint)
    }

    /// 以帳戶金鑰進行 RS256 簽章。
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SignatureError> {
        create_signature(data, &self.key_pair)
    }
}
