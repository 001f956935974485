use crate::api::ApiResponse;
use axum::{http::StatusCode, response::Json};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::Context;

/// Typed failures raised by the scheduling core.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("card has no initial state: student {student_id}, card {card_id}, context {context}")]
    MissingInitialState {
        student_id: Uuid,
        card_id: Uuid,
        context: Context,
    },

    #[error("invalid rating {0}: expected 1 (again), 2 (hard), 3 (good) or 4 (easy)")]
    InvalidRating(i32),

    #[error("invalid learning step duration '{0}': expected <digits><s|m|h|d>")]
    InvalidStepDuration(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("invalid job payload: {0}")]
    InvalidPayload(String),

    #[error("unknown job type '{0}'")]
    UnknownJobType(String),

    #[error("corrupt stored row: {0}")]
    CorruptRow(String),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

impl From<uuid::Error> for SchedulerError {
    fn from(err: uuid::Error) -> Self {
        SchedulerError::CorruptRow(format!("invalid uuid: {}", err))
    }
}

impl From<chrono::ParseError> for SchedulerError {
    fn from(err: chrono::ParseError) -> Self {
        SchedulerError::CorruptRow(format!("invalid timestamp: {}", err))
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::CorruptRow(format!("invalid json: {}", err))
    }
}

/// Errors as the HTTP layer reports them.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Integrity error: {0}")]
    IntegrityError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::MissingInitialState { .. } => ApiError::IntegrityError(err.to_string()),
            SchedulerError::InvalidRating(_)
            | SchedulerError::InvalidStepDuration(_)
            | SchedulerError::InvalidParameters(_)
            | SchedulerError::InvalidPayload(_) => ApiError::ValidationError(err.to_string()),
            SchedulerError::UnknownJobType(_) => ApiError::NotFound(err.to_string()),
            SchedulerError::Database(_) => ApiError::DatabaseError(err.to_string()),
            SchedulerError::CorruptRow(_) | SchedulerError::Task(_) => {
                ApiError::InternalError(err.to_string())
            }
        }
    }
}

#[derive(Debug)]
pub struct ErrorContext {
    pub operation: String,
    pub resource_id: Option<String>,
    pub resource_type: String,
}

impl ErrorContext {
    pub fn new(operation: &str, resource_type: &str) -> Self {
        Self {
            operation: operation.to_string(),
            resource_id: None,
            resource_type: resource_type.to_string(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::IntegrityError(_) => StatusCode::CONFLICT,
            ApiError::DatabaseError(_) | ApiError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message shown to the client. Server-side failures keep their details in the log.
    fn public_message(&self) -> String {
        match self {
            ApiError::DatabaseError(_) => "Database operation failed. Please try again.".to_string(),
            ApiError::InternalError(_) => "An internal error occurred. Please try again.".to_string(),
            _ => self.to_string(),
        }
    }

    /// Convert to an HTTP response, logging at a level that matches the status.
    pub fn to_response_with_context(
        self,
        context: ErrorContext,
    ) -> (StatusCode, Json<ApiResponse<()>>) {
        let status = self.status();

        match &self {
            ApiError::NotFound(_) => info!(
                operation = %context.operation,
                resource_type = %context.resource_type,
                resource_id = ?context.resource_id,
                error = %self,
                "Resource not found"
            ),
            ApiError::ValidationError(_) => warn!(
                operation = %context.operation,
                resource_type = %context.resource_type,
                resource_id = ?context.resource_id,
                error = %self,
                "Request rejected"
            ),
            _ => error!(
                operation = %context.operation,
                resource_type = %context.resource_type,
                resource_id = ?context.resource_id,
                status = status.as_u16(),
                error = %self,
                "Request failed"
            ),
        }

        (status, Json(ApiResponse::error(self.public_message())))
    }

    pub fn to_response(self) -> (StatusCode, Json<ApiResponse<()>>) {
        self.to_response_with_context(ErrorContext::new("unknown", "resource"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context_creation() {
        let context = ErrorContext::new("record_review", "card_state").with_id("123");

        assert_eq!(context.operation, "record_review");
        assert_eq!(context.resource_type, "card_state");
        assert_eq!(context.resource_id, Some("123".to_string()));
    }

    #[test]
    fn test_scheduler_error_classification() {
        let missing = SchedulerError::MissingInitialState {
            student_id: Uuid::nil(),
            card_id: Uuid::nil(),
            context: Context::Listening,
        };
        assert!(missing.to_string().contains("card has no initial state"));
        assert!(matches!(ApiError::from(missing), ApiError::IntegrityError(_)));

        let rating = SchedulerError::InvalidRating(9);
        assert!(matches!(ApiError::from(rating), ApiError::ValidationError(_)));

        let job = SchedulerError::UnknownJobType("reindex".to_string());
        assert!(matches!(ApiError::from(job), ApiError::NotFound(_)));
    }

    #[test]
    fn test_api_error_responses() {
        let error = ApiError::NotFound("Student not found".to_string());
        let context = ErrorContext::new("get_queue", "student").with_id("123");
        let (status, _response) = error.to_response_with_context(context);
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = ApiError::ValidationError("bad rating".to_string()).to_response();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = ApiError::IntegrityError("no state".to_string()).to_response();
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = ApiError::DatabaseError("locked".to_string()).to_response();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
