//! Daemon side of the wire protocol: API outcomes as JSON-RPC responses

use serde_json::Value;

pub use billable_core::rpc::{Notification, Request, RequestId, Response, RpcError};

use crate::api::{self, ApiError};

impl From<&ApiError> for RpcError {
    fn from(error: &ApiError) -> Self {
        RpcError::new(error.code(), error.to_string())
    }
}

/// Reply to `id` with the outcome of an API call.
pub fn reply(id: RequestId, outcome: api::Result<Value>) -> Response {
    match outcome {
        Ok(result) => Response::success(result, id),
        Err(error) => Response::error(RpcError::from(&error), id),
    }
}

/// Reply to a line that was not a request at all. The id is unknown.
pub fn malformed(message: impl Into<String>) -> Response {
    Response::error(RpcError::parse_error(message), RequestId::Null)
}
