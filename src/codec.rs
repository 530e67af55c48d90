//! 編碼工具：URL 安全 Base64（無填充）以及憑證的 PEM/DER 轉換。

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use thiserror::Error;

/// 編碼與解碼過程中可能發生的錯誤。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Base64 內容無法解碼。
    #[error("Invalid base64: {0}")]
    InvalidBase64(String),
    /// PEM 結構不完整，至少需要起始行、內容與結束行。
    #[error("Malformed PEM: {0}")]
    MalformedPem(String),
}

type Result<T> = std::result::Result<T, CodecError>;

const PEM_LINE_WIDTH: usize = 64;
const CERT_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const CERT_END: &str = "-----END CERTIFICATE-----";

/// 將位元組以 URL 安全字母表進行 Base64 編碼，並移除 `=` 填充。
pub fn base64url<T: AsRef<[u8]>>(input: T) -> String {
    URL_SAFE_NO_PAD.encode(input)
}

/// 解碼無填充的 URL 安全 Base64 字串。
pub fn base64url_decode(input: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(input.trim_end_matches('='))
        .map_err(|e| CodecError::InvalidBase64(e.to_string()))
}

/// 將 DER 格式的憑證轉為 PEM 文字。
///
/// 內容以 64 字元換行，每行（含最後一行）皆以 `\n` 結尾，
/// 前後加上標準的 `BEGIN CERTIFICATE` / `END CERTIFICATE` 行。
pub fn der_to_pem(der: &[u8]) -> String {
    let encoded = STANDARD.encode(der);
    let mut pem = String::with_capacity(encoded.len() + encoded.len() / PEM_LINE_WIDTH + 64);

    pem.push_str(CERT_BEGIN);
    pem.push('\n');
    for chunk in encoded.as_bytes().chunks(PEM_LINE_WIDTH) {
        // Base64 輸出皆為 ASCII
        pem.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        pem.push('\n');
    }
    pem.push_str(CERT_END);
    pem.push('\n');

    pem
}

/// 將單一 PEM 區塊轉回 DER。
///
/// 會去掉首行與末行（標頭與標尾），其餘各行修剪空白後串接再進行 Base64 解碼。
///
/// # 錯誤
///
/// 行數不足三行時回傳 [`CodecError::MalformedPem`]，
/// 內容無法解碼時回傳 [`CodecError::InvalidBase64`]。
pub fn pem_to_der(pem: &str) -> Result<Vec<u8>> {
    let lines: Vec<&str> = pem.trim().lines().map(str::trim).collect();
    if lines.len() < 3 {
        return Err(CodecError::MalformedPem(format!(
            "expected header, body and footer, got {} line(s)",
            lines.len()
        )));
    }

    let body: String = lines[1..lines.len() - 1].concat();
    STANDARD
        .decode(body)
        .map_err(|e| CodecError::InvalidBase64(e.to_string()))
}
