//! # ACME Webroot Certificate Client
//!
//! 本庫實作 ACME v01 協定（Let's Encrypt 的 `new-reg`、`new-authz`、`new-cert` 等資源），
//! 透過 web root 放置 HTTP-01 挑戰檔案完成網域驗證並簽發證書。
//!
//! - **session**: 所有簽署請求的入口，延遲讀取資源目錄並維護 nonce 鏈。
//! - **account**: 帳戶註冊、同意服務條款與停用。
//! - **challenge**: HTTP-01 挑戰檔案、通知伺服器與指數退避輪詢。
//! - **flow**: 從網域授權、CSR 提交到取回證書與中繼證書的完整流程，以及證書撤銷。
//!
//! ## 示例
//!
//! ```no_run
//! use acmeroot::{
//!     account,
//!     config::{directories, ClientConfig},
//!     flow::{self, CertRequest, DomainMap},
//!     identity::Identity,
//!     key_pair::KeyPair,
//!     output::OutputTargets,
//!     session::Session,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 1. 以帳戶金鑰建立會話
//!     let config = ClientConfig::new(directories::LETS_ENCRYPT_STAGING);
//!     let identity = Identity::load("account.pem")?;
//!     let mut session = Session::connect(config, identity)?;
//!
//!     // 2. 註冊帳戶並自動同意服務條款
//!     account::register(&mut session, Some("admin@example.com"), |_| true)?;
//!
//!     // 3. 為網域簽發證書
//!     let mut domains = DomainMap::new();
//!     domains.insert("example.com", "/var/www/html")?;
//!     let request = CertRequest {
//!         domain_key: KeyPair::from_file("domain.pem")?,
//!         domains,
//!         outputs: OutputTargets {
//!             fullchain: Some("fullchain.pem".into()),
//!             ..Default::default()
//!         },
//!     };
//!     let issued = flow::issue(&mut session, &request)?;
//!     println!("valid until {}", issued.expires_at);
//!
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod certificate;
pub mod challenge;
pub mod codec;
pub mod config;
pub mod csr;
pub mod directory;
pub mod flow;
pub mod identity;
pub mod jwk;
pub mod jws;
pub mod key_pair;
pub mod nonce;
pub mod output;
pub mod payload;
pub mod protection;
pub mod session;
pub mod signature;
pub mod transport;

#[cfg(test)]
mod testing;
