mod error;
mod handlers;
mod router;
mod types;

pub use router::handle_request;
pub use types::{AppState, Request};

/// Reply for a line that never parsed into a request. The request id is
/// unknown at this point, so the envelope carries an empty one.
pub fn parse_error_reply(e: &serde_json::Error) -> serde_json::Value {
    error::err("", "bad_json", e.to_string(), None)
}
