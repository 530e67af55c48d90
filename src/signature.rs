use crate::key_pair::KeyPair;
use openssl::hash::MessageDigest;
use openssl::sign::Signer;
use std::error::Error;

/// 定義簽名操作可能遇到的錯誤類型。
#[derive(Debug)]
pub enum SignatureError {
    /// 簽名過程中發生錯誤，附帶錯誤訊息。
    SigningError(String),
}

impl std::fmt::Display for SignatureError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SignatureError::SigningError(msg) => write!(f, "Failed to sign payload: {}", msg),
        }
    }
}

impl Error for SignatureError {}

/// 以 RSA-SHA256（RS256）對資料簽名，回傳原始簽名位元組。
pub fn create_signature(data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError> {
    let mut signer = Signer::new(MessageDigest::sha256(), &key_pair.pri_key)
        .map_err(|e| SignatureError::SigningError(e.to_string()))?;

    signer
        .update(data)
        .map_err(|e| SignatureError::SigningError(e.to_string()))?;

    signer
        .sign_to_vec()
        .map_err(|e| SignatureError::SigningError(e.to_string()))
}

/// 驗證 RS256 簽名。
#[cfg(test)]
pub(crate) fn verify_signature(data: &[u8], signature: &[u8], key_pair: &KeyPair) -> bool {
    openssl::sign::Verifier::new(MessageDigest::sha256(), &key_pair.pri_key)
        .and_then(|mut verifier| {
            verifier.update(data)?;
            verifier.verify(signature)
        })
        .unwrap_or(false)
}
