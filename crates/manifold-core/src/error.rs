use http::StatusCode;

/// Trait for domain errors that can be converted to HTTP responses
///
/// Implemented by each feature crate's error type. The server layer
/// converts these into actual HTTP responses, keeping domain errors
/// decoupled from axum.
pub trait HttpError: std::error::Error {
    /// HTTP status code for this error
    fn status_code(&self) -> StatusCode;

    /// Stable machine-readable error kind (e.g. `tool_not_found`)
    fn kind(&self) -> &str;

    /// Message safe to expose to downstream clients
    fn client_message(&self) -> String;
}
