//! 證書簽發與撤銷流程。
//!
//! 簽發前先確認所有輸出檔案可寫入、所有 web root 存在並通過自我檢查，
//! 之後逐一驗證網域，最後提交 CSR 並取回證書與中繼證書。

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    certificate::{Certificate, CertificateBundle, CertificateError},
    challenge::{self, Authorization, ChallengeEngine, ChallengeError, HTTP_01},
    codec::base64url,
    csr::{CsrError, CSR},
    key_pair::KeyPair,
    output::{OutputError, OutputTargets},
    payload::{AuthorizationPayload, NewCertPayload, RevokeCertPayload},
    session::{Session, SessionError},
    transport::Response,
};

/// 伺服器回傳 DER 證書時使用的內容類型。
pub const PKIX_CERT: &str = "application/pkix-cert";

#[derive(Debug, Error)]
pub enum CertError {
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error(transparent)]
    Challenge(#[from] ChallengeError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("CSR error: {0}")]
    Csr(#[from] CsrError),
    #[error(transparent)]
    Certificate(#[from] CertificateError),
    #[error("No domains given")]
    NoDomains,
    #[error("Duplicate domain: {0}")]
    DuplicateDomain(String),
    #[error("Too many domains, at most {} are allowed", DomainMap::MAX_DOMAINS)]
    TooManyDomains,
    #[error("unexpected http status code {code} for {resource}")]
    UnexpectedStatus { resource: String, code: u16 },
    #[error("unexpected content type {content_type:?} for {resource}")]
    UnexpectedContentType {
        resource: String,
        content_type: Option<String>,
    },
    #[error("Server did not link the issuer certificate")]
    MissingChainLink,
    #[error("Failed to open cert {}: {reason}", .path.display())]
    Read { path: PathBuf, reason: String },
}

type Result<T> = std::result::Result<T, CertError>;

/// 依加入順序排列的網域與其 web root。
#[derive(Debug, Clone, Default)]
pub struct DomainMap {
    entries: Vec<(String, PathBuf)>,
}

impl DomainMap {
    /// 單一證書最多可包含的網域數。
    pub const MAX_DOMAINS: usize = 100;

    pub fn new() -> Self {
        Self::default()
    }

    /// 加入網域；重複的網域（不分大小寫）會被拒絕。
    pub fn insert(&mut self, domain: &str, webroot: impl Into<PathBuf>) -> Result<()> {
        if self
            .entries
            .iter()
            .any(|(existing, _)| existing.eq_ignore_ascii_case(domain))
        {
            return Err(CertError::DuplicateDomain(domain.to_string()));
        }
        if self.entries.len() >= Self::MAX_DOMAINS {
            return Err(CertError::TooManyDomains);
        }
        self.entries.push((domain.to_string(), webroot.into()));
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.entries
            .iter()
            .map(|(domain, webroot)| (domain.as_str(), webroot.as_path()))
    }

    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|(domain, _)| domain)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 每個 web root 都必須是已存在的目錄。
    pub fn check_webroots(&self) -> Result<()> {
        for (_, webroot) in self.iter() {
            if !webroot.is_dir() {
                return Err(ChallengeError::Filesystem {
                    path: webroot.to_path_buf(),
                    reason: "web root is not an existing directory".into(),
                }
                .into());
            }
        }
        Ok(())
    }
}

/// 一次簽發所需的輸入。
#[derive(Debug)]
pub struct CertRequest {
    /// 網域金鑰，公鑰部分寫入 CSR。
    pub domain_key: KeyPair,
    pub domains: DomainMap,
    pub outputs: OutputTargets,
}

/// 簽發結果。
#[derive(Debug, Clone)]
pub struct Issued {
    pub bundle: CertificateBundle,
    /// 已寫入的檔案，依寫入順序。
    pub saved: Vec<PathBuf>,
    pub expires_at: DateTime<Utc>,
}

/// 為 `request` 中的所有網域簽發一張證書並寫出結果。
pub fn issue(session: &mut Session, request: &CertRequest) -> Result<Issued> {
    if request.domains.is_empty() {
        return Err(CertError::NoDomains);
    }
    request.outputs.check_writable()?;
    request.domains.check_webroots()?;

    if session.config().self_check {
        for (domain, webroot) in request.domains.iter() {
            info!(domain, "simulating challenge");
            challenge::self_check(session, domain, webroot)?;
        }
    } else {
        warn!("self-check skipped");
    }

    for (domain, webroot) in request.domains.iter() {
        authorize(session, domain, webroot)?;
    }

    info!("generating certificate signing request");
    let mut csr = CSR::new();
    for domain in request.domains.domains() {
        csr = csr.set_san(domain);
    }
    let csr = csr.build(&request.domain_key)?;

    info!("requesting certificate");
    let payload = NewCertPayload::new(base64url(csr.to_der()?));
    let response = session.request("new-cert", &payload, None, true, None)?;
    expect_certificate(&response, "new-cert", 201)?;

    let expires_at = Certificate::from_der(response.bytes())?.expires_at()?;
    let mut bundle = CertificateBundle::from_der(response.bytes(), csr.to_pem()?);

    if request.outputs.wants_chain() {
        let up = response
            .headers
            .link("up")
            .ok_or(CertError::MissingChainLink)?;
        info!(url = up, "requesting intermediate CA certificate");
        let chain = session.get(up, true, None)?;
        expect_certificate(&chain, "issuer certificate", 200)?;
        bundle = bundle.with_chain(chain.bytes());
    }

    let saved = request.outputs.write(&bundle)?;
    info!(%expires_at, "certificate issued");

    Ok(Issued {
        bundle,
        saved,
        expires_at,
    })
}

/// 建立單一網域的授權並完成 HTTP-01 驗證。
fn authorize(session: &mut Session, domain: &str, webroot: &Path) -> Result<()> {
    info!(domain, "validating");
    let response = session.request(
        "new-authz",
        &AuthorizationPayload::new(domain),
        None,
        false,
        None,
    )?;
    if response.code != 201 {
        return Err(CertError::UnexpectedStatus {
            resource: "new-authz".into(),
            code: response.code,
        });
    }

    let authorization = Authorization::from_json(response.json())?;
    let challenge = authorization.challenge(HTTP_01)?.clone();
    ChallengeEngine::new(session).run(domain, webroot, &challenge)?;
    Ok(())
}

fn expect_certificate(response: &Response, resource: &str, code: u16) -> Result<()> {
    if response.code != code {
        return Err(CertError::UnexpectedStatus {
            resource: resource.to_string(),
            code: response.code,
        });
    }

    let content_type = response.headers.content_type();
    let is_pkix = content_type
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(PKIX_CERT));
    if !is_pkix {
        return Err(CertError::UnexpectedContentType {
            resource: resource.to_string(),
            content_type: content_type.map(String::from),
        });
    }
    Ok(())
}

/// 撤銷證書。`cert_path` 可以是單一證書或完整憑證鏈，只撤銷第一張。
///
/// 請求以會話的金鑰簽署，帳戶金鑰或網域金鑰皆可。
pub fn revoke(session: &mut Session, cert_path: &Path) -> Result<()> {
    let pem = fs::read_to_string(cert_path).map_err(|e| CertError::Read {
        path: cert_path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let der = Certificate::from_pem(&pem)?.to_der()?;

    let response = session.request(
        "revoke-cert",
        &RevokeCertPayload::new(base64url(der)),
        None,
        false,
        None,
    )?;
    if response.code != 200 {
        return Err(CertError::UnexpectedStatus {
            resource: "revoke-cert".into(),
            code: response.code,
        });
    }
    info!(path = %cert_path.display(), "certificate revoked");
    Ok(())
}
