use log::error;
use serde::Serialize;
use std::convert::Infallible;
use utoipa::ToSchema;
use warp::{http::StatusCode, reject::Reject, Rejection, Reply};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    Unauthenticated,
    AccountDisabled,
    Forbidden,
    NotFound,
    ReferenceNotFound,
    BadRequest,
    Conflict,
    RemoteExecution,
    Timeout,
    MongoError,
    Internal,
}

#[derive(Debug)]
pub struct AppError {
    pub err_type: ErrorType,
    pub message: String,
}

impl AppError {
    pub fn new(message: &str, err_type: ErrorType) -> AppError {
        AppError {
            message: message.to_string(),
            err_type,
        }
    }

    /// Mongo failures are logged server-side and mapped to an opaque 500.
    pub fn from_mongo(err: mongodb::error::Error, context: &str) -> AppError {
        error!("{} {:#?}", context, err);
        AppError::new("Server error", ErrorType::MongoError)
    }

    pub fn to_http_status(&self) -> StatusCode {
        match self.err_type {
            ErrorType::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorType::AccountDisabled | ErrorType::Forbidden => StatusCode::FORBIDDEN,
            ErrorType::NotFound | ErrorType::ReferenceNotFound => StatusCode::NOT_FOUND,
            ErrorType::BadRequest | ErrorType::Conflict => StatusCode::BAD_REQUEST,
            ErrorType::RemoteExecution
            | ErrorType::Timeout
            | ErrorType::MongoError
            | ErrorType::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn reject(self) -> Rejection {
        warp::reject::custom(self)
    }
}

impl Reject for AppError {}

#[derive(Serialize, ToSchema)]
pub struct ErrorMessage {
    pub message: String,
}

/// Single recovery point: every rejection becomes a `{ "message": ... }` body.
/// Stack traces and driver errors never reach the caller.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(app_err) = err.find::<AppError>() {
        (app_err.to_http_status(), app_err.message.clone())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::MissingHeader>().is_some() {
        (
            StatusCode::UNAUTHORIZED,
            "No token, authorization denied".to_string(),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed".to_string(),
        )
    } else {
        error!("unhandled rejection: {:#?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "Server error".to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorMessage { message }),
        status,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_map_to_401() {
        let err = AppError::new("Token is not valid", ErrorType::Unauthenticated);
        assert_eq!(err.to_http_status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn disabled_account_and_denied_role_map_to_403() {
        assert_eq!(
            AppError::new("Account is disabled", ErrorType::AccountDisabled).to_http_status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::new("Not authorized", ErrorType::Forbidden).to_http_status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn missing_entities_and_references_map_to_404() {
        assert_eq!(
            AppError::new("Hub not found", ErrorType::NotFound).to_http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::new("Device not found", ErrorType::ReferenceNotFound).to_http_status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn validation_and_conflicts_map_to_400() {
        assert_eq!(
            AppError::new("Invalid action", ErrorType::BadRequest).to_http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::new("User already exists", ErrorType::Conflict).to_http_status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn remote_and_internal_failures_map_to_500() {
        for t in [
            ErrorType::RemoteExecution,
            ErrorType::Timeout,
            ErrorType::MongoError,
            ErrorType::Internal,
        ] {
            assert_eq!(
                AppError::new("boom", t).to_http_status(),
                StatusCode::INTERNAL_SERVER_ERROR
            );
        }
    }
}
