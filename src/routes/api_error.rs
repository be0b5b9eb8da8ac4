use std::io::Cursor;

use rocket::{
    Request, Response,
    http::{ContentType, Status},
    response::{self, Responder},
};
use serde_json::json;

use crate::{firewall::FirewallError, logger::*};

/// Dashboard error envelope: `{"error": {"code", "message"}}`, with an
/// optional `type` field used by the gate's rejection response.
pub struct ApiError {
    status: u16,
    code: &'static str,
    message: String,
    error_type: Option<&'static str>,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: u16, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            error_type: None,
        }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(400, code, message)
    }

    pub fn forbidden(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(403, code, message)
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(404, code, message)
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(409, code, message)
    }

    pub fn internal_server_error(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(500, code, message)
    }

    pub fn with_error_type(mut self, error_type: &'static str) -> Self {
        self.error_type = Some(error_type);
        self
    }
}

impl From<FirewallError> for ApiError {
    fn from(err: FirewallError) -> Self {
        match err {
            FirewallError::Validation(message) => Self::bad_request("invalid_ip", message),
            FirewallError::AlreadyExists => Self::conflict("ip_exists", "IP address already exists"),
            FirewallError::Database(err) => {
                warn!("firewall database error: {err}");
                Self::internal_server_error("internal_error", "internal server error")
            }
        }
    }
}

impl Responder<'_, 'static> for ApiError {
    fn respond_to(self, _request: &'_ Request<'_>) -> response::Result<'static> {
        let status = Status::from_code(self.status).unwrap_or(Status::BadRequest);

        let mut error = json!({
            "code": self.code,
            "message": self.message,
        });

        if let Some(error_type) = self.error_type {
            error["type"] = json!(error_type);
        }

        let body = json!({ "error": error }).to_string();

        Response::build()
            .status(status)
            .header(ContentType::JSON)
            .sized_body(Some(body.len()), Cursor::new(body))
            .ok()
    }
}
