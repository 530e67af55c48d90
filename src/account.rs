//! ACME 帳戶管理：註冊、同意服務條款與停用。

use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::{
    payload::{DeactivatePayload, RegistrationPayload},
    session::{Session, SessionError},
    transport::Response,
};

/// 處理 ACME 帳戶相關操作時可能發生的錯誤。
#[derive(Debug, Error)]
pub enum AccountError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("register error: server did not report the account URL")]
    MissingLocation,
    #[error("register error: unexpected status {0}")]
    UnexpectedStatus(u16),
}

pub type Result<T> = std::result::Result<T, AccountError>;

/// 伺服器回報的帳戶資料。
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    /// 帳戶 ID。
    pub id: Option<String>,
    /// 伺服器回報的建立時間，原樣保留。
    pub created_at: Option<String>,
    pub contact: Vec<String>,
    /// 已同意的服務條款 URL。
    pub agreement: Option<String>,
    /// 帳戶 URL，停用帳戶時使用。
    pub location: String,
    /// 伺服器以 `Link: rel="terms-of-service"` 提供的服務條款。
    pub terms_of_service: Option<String>,
    /// 本次請求是否新建立了帳戶。
    pub created: bool,
}

impl Registration {
    fn from_response(response: &Response, location: &str, created: bool) -> Self {
        let body = response.json();
        let id = body.get("id").and_then(|id| match id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        let created_at = body.get("createdAt").and_then(Value::as_str).map(String::from);
        let contact = body
            .get("contact")
            .and_then(Value::as_array)
            .map(|c| c.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default();

        Self {
            id,
            created_at,
            contact,
            agreement: body.get("agreement").and_then(Value::as_str).map(String::from),
            location: location.to_string(),
            terms_of_service: response.headers.link("terms-of-service").map(String::from),
            created,
        }
    }
}

/// 註冊帳戶金鑰；帳戶已存在時改為讀取既有的帳戶資料。
///
/// 若帳戶尚未同意服務條款，會把條款 URL 交給 `agree` 決定是否同意，
/// 同意後重新送出帶有 `agreement` 的 `reg` 請求。
pub fn register<F>(session: &mut Session, email: Option<&str>, agree: F) -> Result<Registration>
where
    F: FnOnce(&str) -> bool,
{
    let payload = RegistrationPayload::new(email);
    let response = session.request("new-reg", &payload, None, false, Some(409))?;
    let location = response
        .headers
        .location()
        .ok_or(AccountError::MissingLocation)?
        .to_string();

    let mut registration = match response.code {
        409 => {
            info!(location = %location, "account already registered");
            let response = session.request("reg", &payload, Some(&location), false, None)?;
            Registration::from_response(&response, &location, false)
        }
        201 => {
            info!(location = %location, "account created");
            Registration::from_response(&response, &location, true)
        }
        code => return Err(AccountError::UnexpectedStatus(code)),
    };

    if registration.agreement.is_some() {
        return Ok(registration);
    }
    let Some(tos) = registration.terms_of_service.clone() else {
        return Ok(registration);
    };
    if !agree(&tos) {
        info!("terms of service not accepted");
        return Ok(registration);
    }

    info!(tos = %tos, "updating agreement");
    let payload = payload.with_agreement(&tos);
    let response = session.request("reg", &payload, Some(&location), false, None)?;
    let updated = Registration::from_response(&response, &location, registration.created);
    registration.agreement = updated.agreement.or(Some(tos));
    Ok(registration)
}

/// 停用帳戶，之後此帳戶金鑰無法再使用。
pub fn deactivate(session: &mut Session, account_url: &str) -> Result<()> {
    session.request("reg", &DeactivatePayload::default(), Some(account_url), false, None)?;
    info!(account_url, "account deactivated");
    Ok(())
}
