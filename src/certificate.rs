use chrono::{DateTime, Utc};
use openssl::{asn1::Asn1Time, x509::X509};
use thiserror::Error;

use crate::codec::der_to_pem;

/// 證書相關操作可能出現的錯誤類型
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Failed to parse certificate: {0}")]
    ParseError(#[from] openssl::error::ErrorStack),
    #[error("Invalid expiration timestamp")]
    InvalidTimestamp,
}

type Result<T> = std::result::Result<T, CertificateError>;

/// X.509 證書封裝結構
pub struct Certificate {
    /// 內部使用的 X509 證書對象
    pub cert: X509,
}

impl Certificate {
    /// 從 PEM 字串解析證書。內容為完整憑證鏈時只取第一張。
    pub fn from_pem(pem: &str) -> Result<Self> {
        let cert = X509::from_pem(pem.as_bytes())?;
        Ok(Certificate { cert })
    }

    pub fn from_der(der: &[u8]) -> Result<Self> {
        let cert = X509::from_der(der)?;
        Ok(Certificate { cert })
    }

    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.cert.to_der()?)
    }

    /// 證書的到期時間（notAfter）。
    pub fn expires_at(&self) -> Result<DateTime<Utc>> {
        let epoch = Asn1Time::from_unix(0)?;
        let diff = epoch.diff(self.cert.not_after())?;
        let seconds = diff.days as i64 * 86400 + diff.secs as i64;
        DateTime::from_timestamp(seconds, 0).ok_or(CertificateError::InvalidTimestamp)
    }
}

/// 簽發結果：終端證書、選用的中繼證書與 CSR，皆為 PEM。
#[derive(Debug, Clone, Default)]
pub struct CertificateBundle {
    pub certificate: String,
    pub chain: Option<String>,
    pub csr: String,
}

impl CertificateBundle {
    /// 由伺服器回傳的 DER 證書建立。
    pub fn from_der(certificate: &[u8], csr_pem: String) -> Self {
        Self {
            certificate: der_to_pem(certificate),
            chain: None,
            csr: csr_pem,
        }
    }

    pub fn with_chain(mut self, chain_der: &[u8]) -> Self {
        self.chain = Some(der_to_pem(chain_der));
        self
    }

    /// 終端證書接上中繼證書。
    pub fn fullchain(&self) -> String {
        match &self.chain {
            Some(chain) => format!("{}{}", self.certificate, chain),
            None => self.certificate.clone(),
        }
    }
}
