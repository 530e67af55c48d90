use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// 載荷驗證或序列化失敗時的錯誤。
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Invalid payload: {0}")]
    Invalid(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Payload must serialize to a JSON object")]
    NotAnObject,
}

/// 定義所有 API 載荷（Payload）必須實作的功能。
///
/// 載荷本身不含 `resource` 欄位，該欄位由 [`PayloadT::to_request_value`] 在簽名前附加。
pub trait PayloadT: Serialize {
    /// 驗證載荷資料是否符合預期的規範。
    fn validate(&self) -> Result<(), PayloadError> {
        Ok(())
    }

    /// 驗證並轉換成 JSON 物件，最後附加 `resource` 鑑別欄位。
    ///
    /// 若載荷已有 `resource` 欄位則以傳入的值覆蓋。
    fn to_request_value(&self, resource: &str) -> Result<Value, PayloadError> {
        self.validate()?;
        let mut map = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Err(PayloadError::NotAnObject),
        };
        map.shift_remove("resource");
        map.insert("resource".to_string(), Value::String(resource.to_string()));
        Ok(Value::Object(map))
    }
}

/// `new-reg` 與 `reg` 請求使用的載荷。
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistrationPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    contact: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    agreement: Option<String>,
}

impl RegistrationPayload {
    /// 建立註冊載荷，若提供電子郵件則自動補上 `mailto:` 前綴。
    pub fn new(email: Option<&str>) -> Self {
        let contact = email.map(|email| {
            if email.starts_with("mailto:") {
                vec![email.to_string()]
            } else {
                vec![format!("mailto:{}", email)]
            }
        });

        RegistrationPayload {
            contact,
            agreement: None,
        }
    }

    /// 附加同意的服務條款 URL。
    pub fn with_agreement(mut self, agreement: &str) -> Self {
        self.agreement = Some(agreement.to_string());
        self
    }
}

impl PayloadT for RegistrationPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if let Some(contact) = &self.contact {
            if contact.iter().any(|c| c.trim_start_matches("mailto:").is_empty()) {
                return Err(PayloadError::Invalid("Contact e-mail cannot be empty".into()));
            }
        }
        Ok(())
    }
}

/// 停用帳戶的載荷，固定為 `{"status":"deactivated"}`。
#[derive(Debug, Serialize)]
pub struct DeactivatePayload {
    status: &'static str,
}

impl Default for DeactivatePayload {
    fn default() -> Self {
        Self {
            status: "deactivated",
        }
    }
}

impl PayloadT for DeactivatePayload {}

/// 表示一個識別項，用來描述需要授權的網域。
#[derive(Debug, Clone, Serialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: String,
}

/// `new-authz` 請求的載荷。
#[derive(Debug, Serialize)]
pub struct AuthorizationPayload {
    identifier: Identifier,
}

impl AuthorizationPayload {
    /// 建立類型為 `dns` 的網域授權請求。
    pub fn new(domain: &str) -> Self {
        Self {
            identifier: Identifier {
                type_: "dns".to_string(),
                value: domain.to_string(),
            },
        }
    }
}

impl PayloadT for AuthorizationPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if self.identifier.value.is_empty() {
            return Err(PayloadError::Invalid("Identifier value cannot be empty".into()));
        }
        Ok(())
    }
}

/// 通知伺服器挑戰檔案已就緒的載荷。
#[derive(Debug, Serialize)]
pub struct ChallengeResponsePayload {
    #[serde(rename = "keyAuthorization")]
    key_authorization: String,
}

impl ChallengeResponsePayload {
    pub fn new(key_authorization: impl Into<String>) -> Self {
        Self {
            key_authorization: key_authorization.into(),
        }
    }
}

impl PayloadT for ChallengeResponsePayload {}

/// `new-cert` 請求的載荷，`csr` 為 DER 格式 CSR 的 base64url 編碼。
#[derive(Debug, Serialize)]
pub struct NewCertPayload {
    csr: String,
}

impl NewCertPayload {
    pub fn new(csr_b64url: String) -> Self {
        Self { csr: csr_b64url }
    }
}

impl PayloadT for NewCertPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if self.csr.is_empty() {
            return Err(PayloadError::Invalid("CSR cannot be empty".into()));
        }
        Ok(())
    }
}

/// `revoke-cert` 請求的載荷。
#[derive(Debug, Serialize)]
pub struct RevokeCertPayload {
    certificate: String,
}

impl RevokeCertPayload {
    pub fn new(certificate_b64url: String) -> Self {
        Self {
            certificate: certificate_b64url,
        }
    }
}

impl PayloadT for RevokeCertPayload {}

/// 允許直接以任意 JSON 物件作為載荷。
impl PayloadT for Value {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_is_appended_last() {
        let value = RegistrationPayload::new(Some("admin@example.com"))
            .to_request_value("new-reg")
            .unwrap();
        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#"{"contact":["mailto:admin@example.com"],"resource":"new-reg"}"#
        );
    }

    #[test]
    fn test_empty_registration() {
        let value = RegistrationPayload::new(None)
            .to_request_value("reg")
            .unwrap();
        assert_eq!(serde_json::to_string(&value).unwrap(), r#"{"resource":"reg"}"#);
    }

    #[test]
    fn test_mailto_not_duplicated() {
        let value = RegistrationPayload::new(Some("mailto:a@b.c"))
            .with_agreement("https://tos")
            .to_request_value("reg")
            .unwrap();
        assert_eq!(value["contact"][0], "mailto:a@b.c");
        assert_eq!(value["agreement"], "https://tos");
    }

    #[test]
    fn test_authorization_payload() {
        let value = AuthorizationPayload::new("example.com")
            .to_request_value("new-authz")
            .unwrap();
        assert_eq!(value["identifier"]["type"], "dns");
        assert_eq!(value["identifier"]["value"], "example.com");
        assert!(AuthorizationPayload::new("").to_request_value("new-authz").is_err());
    }

    #[test]
    fn test_deactivate_payload() {
        let value = DeactivatePayload::default().to_request_value("reg").unwrap();
        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#"{"status":"deactivated","resource":"reg"}"#
        );
    }

    #[test]
    fn test_existing_resource_is_overwritten() {
        let value = serde_json::json!({"resource": "old", "x": 1})
            .to_request_value("new")
            .unwrap();
        assert_eq!(value["resource"], "new");
        assert_eq!(value.as_object().unwrap().len(), 2);
    }
}

