//! JSON-RPC protocol representations and formatting utilities
//!
//! Provides standardized mapping of internal errors to valid JSON-RPC payloads.

use rust_mcp_sdk::schema::{
    JsonrpcErrorResponse, JsonrpcResultResponse, RequestId, Result as McpResult, RpcError,
};
use serde_json::{json, Value};

use crate::errors::{AppError, DispatchError};

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

pub fn is_json_rpc_error(value: &Value) -> bool {
    value.get("error").is_some()
}

pub fn app_error_to_json_rpc(id: Option<Value>, err: AppError) -> Value {
    match err {
        AppError::BadRequest { code, message } => json_rpc_error_with_data(
            id,
            INVALID_PARAMS,
            "Invalid params",
            Some(json!({
                "code": code,
                "message": message,
                "details": {}
            })),
        ),
        AppError::NotFound { code, message } => json_rpc_error_with_data(
            id,
            METHOD_NOT_FOUND,
            "Method not found",
            Some(json!({
                "code": code,
                "message": message,
                "details": {}
            })),
        ),
        AppError::Unauthorized { code, message } => json_rpc_error_with_data(
            id,
            -32001,
            "Unauthorized",
            Some(json!({
                "code": code,
                "message": message,
                "details": {}
            })),
        ),
        AppError::Internal { .. } => json_rpc_error(id, INTERNAL_ERROR, "Internal error"),
    }
}

/// Maps a dispatch failure onto a JSON-RPC error. The message is the error's own
/// text so provider messages reach the client unchanged.
pub fn dispatch_error_to_json_rpc(id: Option<Value>, err: &DispatchError) -> Value {
    let (code, details) = match err {
        DispatchError::NotFound { address } => (METHOD_NOT_FOUND, json!({ "address": address })),
        DispatchError::MalformedRequest { address, .. } => {
            (INVALID_PARAMS, json!({ "address": address }))
        }
        DispatchError::Provider {
            provider, address, ..
        } => (
            INTERNAL_ERROR,
            json!({ "provider": provider, "address": address }),
        ),
        DispatchError::ContextUnavailable { operation } => {
            (INTERNAL_ERROR, json!({ "operation": operation }))
        }
    };
    let message = match err {
        DispatchError::Provider { message, .. } => message.clone(),
        other => other.to_string(),
    };

    json_rpc_error_with_data(
        id,
        code,
        &message,
        Some(json!({
            "code": err.code(),
            "message": err.to_string(),
            "details": details
        })),
    )
}

pub fn json_rpc_error(id: Option<Value>, code: i32, message: &str) -> Value {
    json_rpc_error_with_data(id, code, message, None)
}

pub fn json_rpc_error_with_data(
    id: Option<Value>,
    code: i32,
    message: &str,
    data: Option<Value>,
) -> Value {
    let response = JsonrpcErrorResponse::new(
        RpcError {
            code: i64::from(code),
            data,
            message: message.to_string(),
        },
        id.as_ref().and_then(value_to_request_id),
    );
    serde_json::to_value(response).expect("jsonrpc error response serialization")
}

pub fn json_rpc_result(id: Option<Value>, result: Value) -> Value {
    if let Some(request_id) = id.as_ref().and_then(value_to_request_id) {
        let extra = result.as_object().cloned();
        let response = JsonrpcResultResponse::new(request_id, McpResult { meta: None, extra });
        return serde_json::to_value(response).expect("jsonrpc result response serialization");
    }

    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

pub fn json_rpc_notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params
    })
}

pub fn value_to_request_id(value: &Value) -> Option<RequestId> {
    if let Some(string_id) = value.as_str() {
        return Some(RequestId::String(string_id.to_string()));
    }

    value.as_i64().map(RequestId::Integer)
}

pub fn request_id_to_value(id: RequestId) -> Value {
    match id {
        RequestId::String(value) => Value::String(value),
        RequestId::Integer(value) => Value::Number(value.into()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn not_found_maps_to_method_not_found_with_address() {
        let response = dispatch_error_to_json_rpc(
            Some(json!(3)),
            &DispatchError::not_found("app_unknownservice_thing"),
        );

        assert_eq!(response["id"], 3);
        assert_eq!(response["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(response["error"]["data"]["code"], "capability_not_found");
        assert_eq!(
            response["error"]["data"]["details"]["address"],
            "app_unknownservice_thing"
        );
    }

    #[test]
    fn provider_errors_carry_the_provider_message() {
        let response = dispatch_error_to_json_rpc(
            Some(json!("r-1")),
            &DispatchError::Provider {
                provider: "docs".to_string(),
                address: "app://docs/page/1".to_string(),
                message: "upstream unavailable".to_string(),
            },
        );

        assert_eq!(response["error"]["code"], INTERNAL_ERROR);
        assert_eq!(response["error"]["message"], "upstream unavailable");
        assert_eq!(response["error"]["data"]["details"]["provider"], "docs");
    }

    #[test]
    fn malformed_requests_map_to_invalid_params() {
        let response = dispatch_error_to_json_rpc(
            Some(json!(1)),
            &DispatchError::malformed("app_hello_greeting", "missing required argument: name"),
        );

        assert_eq!(response["error"]["code"], INVALID_PARAMS);
    }
}
