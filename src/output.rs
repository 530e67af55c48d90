//! 簽發結果的輸出目標：在任何網路請求前確認可寫入，簽發後依序寫出。

use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::info;

use crate::certificate::CertificateBundle;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Cannot write to {}: {reason}", .path.display())]
    NotWritable { path: PathBuf, reason: String },
    #[error("Failed to write {}: {reason}", .path.display())]
    Write { path: PathBuf, reason: String },
    #[error("At least one of the certificate or fullchain outputs is required")]
    NothingRequested,
}

type Result<T> = std::result::Result<T, OutputError>;

/// 要寫出的檔案路徑，未指定者不輸出。
#[derive(Debug, Clone, Default)]
pub struct OutputTargets {
    pub cert: Option<PathBuf>,
    pub chain: Option<PathBuf>,
    pub fullchain: Option<PathBuf>,
    pub csr: Option<PathBuf>,
}

impl OutputTargets {
    /// 是否需要向伺服器取得中繼證書。
    pub fn wants_chain(&self) -> bool {
        self.chain.is_some() || self.fullchain.is_some()
    }

    /// 確認每個輸出路徑都可寫入。
    ///
    /// 檔案已存在時以附加模式開啟測試，不改動內容；
    /// 不存在時在其所在目錄建立暫存檔測試。
    pub fn check_writable(&self) -> Result<()> {
        if self.cert.is_none() && self.fullchain.is_none() {
            return Err(OutputError::NothingRequested);
        }

        for path in self.paths().map(|(_, path)| path) {
            probe(path).map_err(|e| OutputError::NotWritable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// 依 fullchain、cert、chain、csr 的順序寫出，回傳已寫入的路徑。
    pub fn write(&self, bundle: &CertificateBundle) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for (kind, path) in self.paths() {
            let contents = match kind {
                Kind::Fullchain => bundle.fullchain(),
                Kind::Cert => bundle.certificate.clone(),
                Kind::Chain => bundle.chain.clone().ok_or_else(|| OutputError::Write {
                    path: path.to_path_buf(),
                    reason: "no intermediate certificate was retrieved".into(),
                })?,
                Kind::Csr => bundle.csr.clone(),
            };

            fs::write(path, contents).map_err(|e| OutputError::Write {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            info!(path = %path.display(), "saved {:?}", kind);
            written.push(path.to_path_buf());
        }
        Ok(written)
    }

    fn paths(&self) -> impl Iterator<Item = (Kind, &Path)> {
        [
            (Kind::Fullchain, &self.fullchain),
            (Kind::Cert, &self.cert),
            (Kind::Chain, &self.chain),
            (Kind::Csr, &self.csr),
        ]
        .into_iter()
        .filter_map(|(kind, path)| path.as_deref().map(|path| (kind, path)))
    }
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Fullchain,
    Cert,
    Chain,
    Csr,
}

fn probe(path: &Path) -> std::io::Result<()> {
    if path.exists() {
        OpenOptions::new().append(true).open(path)?;
        return Ok(());
    }

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    tempfile::NamedTempFile::new_in(parent)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle() -> CertificateBundle {
        CertificateBundle {
            certificate: "CERT\n".into(),
            chain: Some("CHAIN\n".into()),
            csr: "CSR\n".into(),
        }
    }

    #[test]
    fn test_requires_cert_or_fullchain() {
        let targets = OutputTargets {
            chain: Some("chain.pem".into()),
            ..Default::default()
        };
        assert!(matches!(
            targets.check_writable(),
            Err(OutputError::NothingRequested)
        ));
    }

    #[test]
    fn test_missing_directory_is_not_writable() {
        let dir = tempfile::tempdir().unwrap();
        let targets = OutputTargets {
            cert: Some(dir.path().join("missing/cert.pem")),
            ..Default::default()
        };
        assert!(matches!(
            targets.check_writable(),
            Err(OutputError::NotWritable { .. })
        ));
    }

    #[test]
    fn test_probe_leaves_existing_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        fs::write(&cert, "old").unwrap();

        let targets = OutputTargets {
            cert: Some(cert.clone()),
            fullchain: Some(dir.path().join("fullchain.pem")),
            ..Default::default()
        };
        targets.check_writable().unwrap();
        assert_eq!(fs::read_to_string(&cert).unwrap(), "old");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_write_all_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let targets = OutputTargets {
            cert: Some(dir.path().join("cert.pem")),
            chain: Some(dir.path().join("chain.pem")),
            fullchain: Some(dir.path().join("fullchain.pem")),
            csr: Some(dir.path().join("domain.csr")),
        };

        let written = targets.write(&bundle()).unwrap();
        assert_eq!(written[0], dir.path().join("fullchain.pem"));
        assert_eq!(written.len(), 4);
        assert_eq!(
            fs::read_to_string(dir.path().join("fullchain.pem")).unwrap(),
            "CERT\nCHAIN\n"
        );
        assert_eq!(fs::read_to_string(dir.path().join("chain.pem")).unwrap(), "CHAIN\n");
    }
}
