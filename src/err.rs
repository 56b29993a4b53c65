use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};

pub async fn handler404(path: Uri) -> (StatusCode, String) {
    (
        StatusCode::NOT_FOUND,
        format!("File Not Found: {}", path.path()),
    )
}

#[derive(Debug, Clone)]
pub enum Error {
    NotFound { message: String },
    Forbidden { message: String },
    InternalError { kind: &'static str, message: String },
}

impl Error {
    pub fn not_found<S: Into<String>>(msg: S) -> Error {
        Error::NotFound {
            message: msg.into(),
        }
    }

    pub fn forbidden<S: Into<String>>(msg: S) -> Error {
        Error::Forbidden {
            message: msg.into(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::NotFound { message } => (StatusCode::NOT_FOUND, message).into_response(),
            Error::Forbidden { message } => (StatusCode::FORBIDDEN, message).into_response(),
            Error::InternalError { kind, message } => {
                log::error!("internal error ({kind}): {message}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(io: std::io::Error) -> Self {
        Self::InternalError {
            kind: "IOError",
            message: io.to_string(),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError {
            kind: "Unknown",
            message: err.to_string(),
        }
    }
}
