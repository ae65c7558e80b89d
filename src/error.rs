use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::moderation::{ModerationError, ModerationFailure};
use crate::repo::RepoError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("forbidden")] Forbidden,
    #[error("authorization required")] Unauthorized,
    #[error("{0}")] BadRequest(String),
    #[error("user is banned from this community")] Banned,
    #[error("user is already banned")] AlreadyBanned,
    #[error("service unavailable")] Unavailable,
    #[error("internal error")] Internal,
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound,
            RepoError::Conflict => ApiError::Conflict,
            RepoError::Forbidden => ApiError::Forbidden,
            RepoError::Unavailable(msg) => {
                log::warn!("store unavailable: {msg}");
                ApiError::Unavailable
            }
            RepoError::Internal(msg) => {
                log::error!("store error: {msg}");
                ApiError::Internal
            }
        }
    }
}

impl From<ModerationError> for ApiError {
    fn from(e: ModerationError) -> Self {
        match e {
            ModerationError::Banned => ApiError::Banned,
            ModerationError::AlreadyBanned => ApiError::AlreadyBanned,
            ModerationError::InsufficientRole => ApiError::Forbidden,
            ModerationError::DurationOutOfRange => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl From<ModerationFailure> for ApiError {
    fn from(e: ModerationFailure) -> Self {
        match e {
            ModerationFailure::Rejected(e) => e.into(),
            ModerationFailure::Store(e) => e.into(),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict | ApiError::AlreadyBanned => StatusCode::CONFLICT,
            ApiError::Forbidden | ApiError::Banned => StatusCode::FORBIDDEN,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ApiErrorBody { error: self.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn moderation_outcomes_map_to_statuses() {
        assert_eq!(ApiError::from(ModerationError::Banned).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::from(ModerationError::AlreadyBanned).status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::from(ModerationFailure::Store(RepoError::Unavailable("down".into()))).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn already_banned_message_is_user_facing() {
        assert_eq!(ApiError::AlreadyBanned.to_string(), "user is already banned");
    }
}
