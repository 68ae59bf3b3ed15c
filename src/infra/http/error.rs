use aperture_api_types::{ApiErrorBody, ApiErrorMessage};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::application::content::ContentError;
use crate::application::error::ErrorReport;
use crate::cache::CacheError;

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const NOT_FOUND: &str = "not_found";
    pub const ADMIN_DISABLED: &str = "admin_disabled";
    pub const UPSTREAM: &str = "upstream_unavailable";
    pub const CACHE: &str = "cache_error";
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
    report: Option<ErrorReport>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
            report: None,
        }
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            codes::UNAUTHORIZED,
            "Revalidate secret required",
            None,
        )
    }

    pub fn admin_disabled() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::ADMIN_DISABLED,
            "Cache administration is not configured",
            Some("set admin.revalidate_secret".to_string()),
        )
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, None)
    }

    fn with_report(mut self, report: ErrorReport) -> Self {
        self.report = Some(report);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ContentError> for ApiError {
    fn from(err: ContentError) -> Self {
        const SOURCE: &str = "infra::http::content_error";
        match &err {
            ContentError::NotFound { what } => {
                ApiError::not_found("Content not found").with_report(ErrorReport::from_message(
                    SOURCE,
                    StatusCode::NOT_FOUND,
                    format!("{what} not found"),
                ))
            }
            ContentError::Cache(CacheError::Upstream { .. }) => ApiError::new(
                StatusCode::BAD_GATEWAY,
                codes::UPSTREAM,
                "Content source unavailable",
                None,
            )
            .with_report(ErrorReport::from_error(SOURCE, StatusCode::BAD_GATEWAY, &err)),
            ContentError::Cache(_) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::CACHE,
                "Cached content could not be processed",
                None,
            )
            .with_report(ErrorReport::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                &err,
            )),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let report = self.report.unwrap_or_else(|| {
            ErrorReport::from_message(
                "infra::http::api",
                self.status,
                format!(
                    "{}: {}",
                    self.code,
                    self.hint.as_deref().unwrap_or(self.message)
                ),
            )
        });
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        report.attach(&mut response);
        response
    }
}
