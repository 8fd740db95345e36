//! Backend error response body

use super::codes::ErrorCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 服务端返回的错误响应格式
///
/// `code` is kept as the raw number so that codes added on the server side
/// after this client was built still deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ApiErrorBody {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            details: None,
        }
    }

    /// Body with the default message of `code`
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.message())
    }

    /// Known error code, `None` for codes this client does not recognise
    pub fn error_code(&self) -> Option<ErrorCode> {
        ErrorCode::try_from(self.code).ok()
    }
}
