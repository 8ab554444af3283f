use rocket::Request;
use rocket::http::{ContentType, Status};
use rocket::response::{self, Responder, Response};
use serde_json::json;
use thiserror::Error;

/// One tenant connection that refused to close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFailure {
    pub db: String,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum TenancyError {
    #[error("MongoDB url is required for the plugin.")]
    MissingUrl,
    #[error("`Model` parameter is mandatory")]
    MissingModels,
    #[error("Database name must not be empty")]
    EmptyDatabaseName,
    #[error("fastify-mongoose has already registered")]
    AlreadyRegistered,
    #[error("Connection name already registered: {0}")]
    DuplicateConnectionName(String),
    #[error("Mongodb not connected")]
    NotConnected,
    #[error("Duplicate model alias: {0}")]
    DuplicateAlias(String),
    #[error("No model registered under alias: {0}")]
    UnknownModel(String),
    #[error("Error closing connections: {}", failed_dbs(.0))]
    CloseFailed(Vec<CloseFailure>),
    #[error("Plugin failed on model {model}: {reason}")]
    Plugin { model: String, reason: String },
    #[error("{kind} hook for {operation} failed: {reason}")]
    Hook {
        kind: &'static str,
        operation: String,
        reason: String,
    },
    #[error("Connection failure: {0}")]
    Connection(String),
    #[error("Invalid plugin configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Driver(#[from] mongodb::error::Error),
}

fn failed_dbs(failures: &[CloseFailure]) -> String {
    failures
        .iter()
        .map(|f| f.db.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl TenancyError {
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TenancyError::MissingUrl
                | TenancyError::MissingModels
                | TenancyError::EmptyDatabaseName
                | TenancyError::Config(_)
        )
    }

    /// Failures collected by a best-effort close, empty for every other error.
    pub fn close_failures(&self) -> &[CloseFailure] {
        match self {
            TenancyError::CloseFailed(failures) => failures,
            _ => &[],
        }
    }

    pub fn status(&self) -> Status {
        match self {
            TenancyError::EmptyDatabaseName => Status::BadRequest,
            TenancyError::UnknownModel(_) => Status::NotFound,
            TenancyError::NotConnected => Status::ServiceUnavailable,
            _ => Status::InternalServerError,
        }
    }
}

impl<'r> Responder<'r, 'static> for TenancyError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();

        let body = json!({
            "error": self.to_string(),
            "status": status.code
        })
        .to_string();

        Response::build()
            .status(status)
            .header(ContentType::JSON)
            .sized_body(body.len(), std::io::Cursor::new(body))
            .ok()
    }
}
