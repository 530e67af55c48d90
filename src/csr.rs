use std::result;

use openssl::{
    hash::MessageDigest,
    stack::Stack,
    x509::{extension::SubjectAlternativeName, X509NameBuilder, X509Req},
};
use thiserror::Error;

use crate::key_pair::KeyPair;

/// 用於描述建立 CSR（證書簽名請求）過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("Openssl error: {0}")]
    OpensslError(#[from] openssl::error::ErrorStack),
    #[error("No SAN entries")]
    NoSanEntries,
}

type Result<T> = result::Result<T, CsrError>;

/// CSR 建構器：第一個加入的網域作為主體 CN，所有網域都列入主體替代名稱 (SAN)。
///
/// # 範例
///
/// ```
/// # use acmeroot::csr::CSR;
/// # use acmeroot::key_pair::KeyPair;
/// let key_pair = KeyPair::generate(Some(2048)).expect("金鑰生成失敗");
/// let csr = CSR::new()
///     .set_san("example.com")
///     .set_san("www.example.com")
///     .build(&key_pair)
///     .expect("CSR 建立失敗");
/// assert!(csr.to_pem().unwrap().starts_with("-----BEGIN CERTIFICATE REQUEST-----"));
/// ```
#[derive(Debug, Default)]
pub struct CSR {
    san_entries: Vec<String>,
}

/// 已簽署的 CSR。
pub struct SignedCsr {
    req: X509Req,
}

impl CSR {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新增一個 DNS 主體替代名稱 (SAN)，重複的名稱只保留一次。
    pub fn set_san(mut self, dns_name: &str) -> Self {
        if !self.san_entries.iter().any(|entry| entry == dns_name) {
            self.san_entries.push(dns_name.to_string());
        }
        self
    }

    /// 以網域金鑰簽署 CSR（SHA-256）。
    ///
    /// 未設定任何 SAN 項目時回傳 `CsrError::NoSanEntries`。
    pub fn build(self, key_pair: &KeyPair) -> Result<SignedCsr> {
        let common_name = self.san_entries.first().ok_or(CsrError::NoSanEntries)?;

        let mut req_builder = X509Req::builder()?;

        let mut name = X509NameBuilder::new()?;
        name.append_entry_by_text("CN", common_name)?;
        req_builder.set_subject_name(&name.build())?;

        let mut san_builder = SubjectAlternativeName::new();
        for entry in &self.san_entries {
            san_builder.dns(entry);
        }
        let san_extension = san_builder.build(&req_builder.x509v3_context(None))?;

        let mut stack = Stack::new()?;
        stack.push(san_extension)?;
        req_builder.add_extensions(&stack)?;

        req_builder.set_pubkey(&key_pair.pri_key)?;
        req_builder.sign(&key_pair.pri_key, MessageDigest::sha256())?;

        Ok(SignedCsr {
            req: req_builder.build(),
        })
    }
}

impl SignedCsr {
    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.req.to_der()?)
    }

    pub fn to_pem(&self) -> Result<String> {
        let pem = self.req.to_pem()?;
        Ok(String::from_utf8_lossy(&pem).into_owned())
    }

    /// 主體 CN。
    #[cfg(test)]
    pub(crate) fn common_name(&self) -> Option<String> {
        self.req
            .subject_name()
            .entries_by_nid(openssl::nid::Nid::COMMONNAME)
            .next()
            .and_then(|entry| String::from_utf8(entry.data().as_slice().to_vec()).ok())
    }
}
