use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

/// 表示處理目錄操作時可能發生的錯誤類型。
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// 目錄回應不是 JSON 物件。
    #[error("ACME directory is not a JSON object")]
    NotAnObject,
    /// 目錄中沒有請求的資源。
    #[error("Unknown ACME resource: {0}")]
    UnknownResource(String),
}

/// ACME 目錄：資源名稱（如 `new-reg`、`new-authz`）到絕對 URL 的對應。
///
/// 於會話中只取得一次，之後不再變更。
#[derive(Debug, Clone, Default)]
pub struct Directory {
    resources: HashMap<String, String>,
}

impl Directory {
    /// 從目錄回應的 JSON 建立，非字串的成員（例如 `meta`）會被忽略。
    pub fn from_json(value: &Value) -> Result<Self, DirectoryError> {
        let object = value.as_object().ok_or(DirectoryError::NotAnObject)?;
        let resources = object
            .iter()
            .filter_map(|(name, url)| url.as_str().map(|url| (name.clone(), url.to_string())))
            .collect();

        Ok(Self { resources })
    }

    /// 取得資源對應的 URL。
    pub fn url(&self, resource: &str) -> Result<&str, DirectoryError> {
        self.resources
            .get(resource)
            .map(String::as_str)
            .ok_or_else(|| DirectoryError::UnknownResource(resource.to_string()))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.resources.len()
    }
}
