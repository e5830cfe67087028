use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use deadpool_redis::{CreatePoolError, PoolError, redis::RedisError};
use std::borrow::Cow;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Bad Request: {0}")]
    BadRequest(Cow<'static, str>),
    #[error("Unauthorized: {0}")]
    Unauthorized(Cow<'static, str>),
    #[error("Forbidden: {0}")]
    Forbidden(Cow<'static, str>),
    #[error("Not Found: {0}")]
    NotFound(Cow<'static, str>),
    #[error("Conflict: {0}")]
    Conflict(Cow<'static, str>),
    #[error("Internal Server Error")]
    InternalServer,
}

#[derive(serde::Serialize)]
pub struct ErrorBody {
    pub message: Cow<'static, str>,
}

impl Error {
    pub fn bad_request(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::NotFound(msg.into())
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match *self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::InternalServer => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut res = HttpResponse::build(self.status_code());

        match self {
            Error::NotFound(msg)
            | Error::Conflict(msg)
            | Error::Unauthorized(msg)
            | Error::BadRequest(msg)
            | Error::Forbidden(msg) => res.json(ErrorBody { message: msg.clone() }),
            Error::InternalServer => {
                res.json(ErrorBody { message: "Internal Server Error".into() })
            }
        }
    }
}

/// Internal error taxonomy. Engine operations return one of the named
/// statuses with a human-readable message; infrastructure failures are
/// carried separately and collapse to a generic 500 at the HTTP boundary.
#[derive(thiserror::Error, Debug)]
pub enum SystemError {
    // infrastructure
    #[error("JWT Error")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("Database Error: {0}")]
    Database(Cow<'static, str>),
    #[error("JSON Serialization/Deserialization Error")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    PoolInit(#[from] CreatePoolError),
    #[error("Redis pool error: {0}")]
    PoolGet(#[from] PoolError),
    #[error("Redis error")]
    Redis(#[from] RedisError),
    #[error("Actor mailbox error")]
    Mailbox(#[from] actix::MailboxError),
    // operation statuses
    #[error("Invalid Parameters: {0}")]
    InvalidParameters(Cow<'static, str>),
    #[error("Unauthorized: {0}")]
    Unauthorized(Cow<'static, str>),
    #[error("Forbidden: {0}")]
    Forbidden(Cow<'static, str>),
    #[error("Not Found: {0}")]
    NotFound(Cow<'static, str>),
    #[error("Dependency Not Found: {0}")]
    DependencyNotFound(Cow<'static, str>),
    #[error("Already Exists: {0}")]
    AlreadyExists(Cow<'static, str>),
    #[error("Operation Failed: {0}")]
    Failed(Box<dyn std::error::Error + Send + Sync>),
}

impl From<SystemError> for Error {
    fn from(value: SystemError) -> Self {
        match value {
            SystemError::InvalidParameters(msg) => Error::BadRequest(msg),
            SystemError::Unauthorized(msg) => Error::Unauthorized(msg),
            SystemError::Forbidden(msg) => Error::Forbidden(msg),
            SystemError::NotFound(msg) | SystemError::DependencyNotFound(msg) => {
                Error::NotFound(msg)
            }
            SystemError::AlreadyExists(msg) => Error::Conflict(msg),
            _ => {
                log::error!("Internal Server Error: {:?}", value);
                Error::InternalServer
            }
        }
    }
}

fn duplicate_message(constraint: Option<&str>) -> Cow<'static, str> {
    let Some(constraint) = constraint else {
        return "Duplicate value".into();
    };

    let field = constraint.split('_').next_back().unwrap_or("value");

    let mut chars = field.chars();
    let field = match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => "Value".to_string(),
    };

    format!("{field} already exists").into()
}

impl From<sqlx::Error> for SystemError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            // unique_violation
            if db_err.code().as_deref() == Some("23505") {
                return SystemError::AlreadyExists(duplicate_message(db_err.constraint()));
            }
            log::error!("Unhandled DB error: {:?}", db_err);
            return SystemError::Database(db_err.message().to_string().into());
        }
        SystemError::Failed(Box::new(err))
    }
}

impl SystemError {
    pub fn invalid_parameters(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidParameters(msg.into())
    }

    pub fn unauthorized(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn dependency_not_found(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::DependencyNotFound(msg.into())
    }

    pub fn already_exists(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::AlreadyExists(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_parameters_maps_to_bad_request() {
        let err: Error = SystemError::invalid_parameters("empty id list").into();
        assert!(matches!(err, Error::BadRequest(_)));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_forbidden_maps_to_forbidden() {
        let err: Error = SystemError::forbidden("not a participant").into();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_not_found_and_dependency_not_found_both_map_to_404() {
        let not_found: Error = SystemError::not_found("message not found").into();
        let dep: Error = SystemError::dependency_not_found("conversation not found").into();
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(dep.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_already_exists_maps_to_conflict() {
        let err: Error = SystemError::already_exists("conversation exists").into();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_infrastructure_errors_collapse_to_internal_server() {
        let err: Error = SystemError::Database("connection reset".into()).into();
        assert!(matches!(err, Error::InternalServer));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_duplicate_message_derives_field_from_constraint() {
        assert_eq!(duplicate_message(Some("participants_pkey_user")), "User already exists");
        assert_eq!(duplicate_message(None), "Duplicate value");
    }
}
