//! The central Model Context Protocol engine
//!
//! Provides the primary MCP JSON-RPC decoding, method execution routing, capabilities
//! negotiation (`initialize`), and the mapping of dispatcher results onto protocol
//! result shapes.

use rust_mcp_sdk::schema::{
    CallToolRequest, Implementation, InitializeRequest, InitializeResult, JsonrpcMessage,
    JsonrpcRequest, ListResourcesRequest, ListToolsRequest, PingRequest, ProtocolVersion,
    ReadResourceRequest, ServerCapabilities, ServerCapabilitiesPrompts,
    ServerCapabilitiesResources, ServerCapabilitiesTools,
};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::dispatcher::CallScope;
use crate::domain::{
    content::Content,
    descriptor::{CapabilityDescriptor, CapabilityKind},
    provider::ResourceEntry,
};
use crate::errors::{AppError, DispatchError};
use crate::mcp::rpc::{
    app_error_to_json_rpc, dispatch_error_to_json_rpc, is_json_rpc_error, json_rpc_error,
    json_rpc_result, request_id_to_value, value_to_request_id, INVALID_PARAMS, INVALID_REQUEST,
    METHOD_NOT_FOUND,
};
use crate::mcp::session::Session;

pub const SUPPORTED_PROTOCOL_VERSION: &str = "2024-11-05";

/// Handles one decoded payload, which may be a batch. Returns the message to send
/// back, if any.
pub async fn handle_json_rpc_payload(session: &Session, payload: Value) -> Option<Value> {
    let Value::Array(batch) = payload else {
        return handle_json_rpc_value(session, payload).await;
    };

    if batch.is_empty() {
        return Some(json_rpc_error(None, INVALID_REQUEST, "Invalid Request"));
    }

    let mut responses = Vec::new();
    for item in batch {
        if let Some(response) = handle_json_rpc_value(session, item).await {
            responses.push(response);
        }
    }

    if responses.is_empty() {
        None
    } else {
        Some(Value::Array(responses))
    }
}

pub async fn handle_json_rpc_value(session: &Session, payload: Value) -> Option<Value> {
    if !payload.is_object() {
        return Some(json_rpc_error(None, INVALID_REQUEST, "Invalid Request"));
    }

    let request_id = payload.get("id").cloned();
    if request_id
        .as_ref()
        .is_some_and(|id| !id.is_null() && value_to_request_id(id).is_none())
    {
        return Some(json_rpc_error(None, INVALID_REQUEST, "Invalid Request"));
    }

    let parsed: JsonrpcMessage = match serde_json::from_value(payload) {
        Ok(message) => message,
        Err(_) => return Some(json_rpc_error(request_id, INVALID_REQUEST, "Invalid Request")),
    };

    match parsed {
        JsonrpcMessage::Request(request) => {
            if let Err(error_response) = validate_request_shape(&request) {
                return Some(error_response);
            }

            let request_id = request_id_to_value(request.id);
            if request.method.trim().is_empty() {
                return Some(json_rpc_error(Some(request_id), INVALID_REQUEST, "Invalid Request"));
            }

            Some(
                handle_json_rpc_request(
                    session,
                    Some(request_id),
                    request.method,
                    request.params.map(Value::Object),
                )
                .await,
            )
        }
        JsonrpcMessage::Notification(notification) => {
            handle_notification(session, &notification.method);
            None
        }
        JsonrpcMessage::ResultResponse(_) | JsonrpcMessage::ErrorResponse(_) => {
            warn!(
                session_id = %session.id(),
                "ignoring response from client, no request outstanding"
            );
            None
        }
    }
}

pub fn validate_request_shape(request: &JsonrpcRequest) -> Result<(), Value> {
    let payload = serde_json::to_value(request).expect("jsonrpc request serialization");
    let request_id = Some(request_id_to_value(request.id.clone()));

    let valid = match request.method.as_str() {
        "tools/call" => serde_json::from_value::<CallToolRequest>(payload).is_ok(),
        "resources/read" => serde_json::from_value::<ReadResourceRequest>(payload).is_ok(),
        "tools/list" => serde_json::from_value::<ListToolsRequest>(payload).is_ok(),
        "resources/list" => serde_json::from_value::<ListResourcesRequest>(payload).is_ok(),
        "ping" => serde_json::from_value::<PingRequest>(payload).is_ok(),
        "initialize" => serde_json::from_value::<InitializeRequest>(payload).is_ok(),
        _ => true,
    };

    if valid {
        Ok(())
    } else {
        Err(json_rpc_error(request_id, INVALID_PARAMS, "Invalid params"))
    }
}

fn handle_notification(session: &Session, method: &str) {
    match method {
        "notifications/initialized" => {
            info!(session_id = %session.id(), "client initialized");
        }
        _ => debug!(session_id = %session.id(), method = %method, "notification ignored"),
    }
}

pub async fn handle_json_rpc_request(
    session: &Session,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
) -> Value {
    let audit_params = redact_audit_params(params.as_ref());
    let dispatcher = session.dispatcher();
    let scope = CallScope::session(session.notifier())
        .with_request_id(id.as_ref().map(request_id_string))
        .with_progress_token(progress_token(params.as_ref()));

    let response = match method.as_str() {
        "initialize" => {
            let protocol_version = match negotiate_protocol_version(params.as_ref()) {
                Ok(version) => version,
                Err(err) => return app_error_to_json_rpc(id, err),
            };

            let initialize_result = InitializeResult {
                server_info: Implementation {
                    name: env!("CARGO_PKG_NAME").to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    title: None,
                    description: None,
                    icons: vec![],
                    website_url: None,
                },
                capabilities: ServerCapabilities {
                    tools: Some(ServerCapabilitiesTools {
                        list_changed: Some(false),
                    }),
                    resources: Some(ServerCapabilitiesResources {
                        subscribe: Some(false),
                        list_changed: Some(false),
                    }),
                    prompts: Some(ServerCapabilitiesPrompts {
                        list_changed: Some(false),
                    }),
                    ..Default::default()
                },
                protocol_version: protocol_version.into(),
                instructions: None,
                meta: None,
            };

            json_rpc_result(
                id,
                serde_json::to_value(initialize_result).expect("initialize result serialization"),
            )
        }
        "ping" => json_rpc_result(id, json!({})),
        "tools/list" => json_rpc_result(
            id,
            json!({ "tools": tool_list(&dispatcher.list_capabilities(CapabilityKind::Tool)) }),
        ),
        "tools/call" => match named_call(params) {
            Ok((name, arguments)) => match dispatcher.call_tool(&name, arguments, scope).await {
                Ok(content) => json_rpc_result(id, call_tool_result(content, false)),
                Err(DispatchError::Provider { message, .. }) => {
                    json_rpc_result(id, call_tool_result(vec![Content::text(message)], true))
                }
                Err(err) => dispatch_error_to_json_rpc(id, &err),
            },
            Err(err) => app_error_to_json_rpc(id, err),
        },
        "resources/list" => {
            let resources = dispatcher.list_resources(scope).await;
            json_rpc_result(id, json!({ "resources": resource_list(&resources) }))
        }
        "resources/templates/list" => json_rpc_result(
            id,
            json!({
                "resourceTemplates":
                    resource_template_list(&dispatcher.list_capabilities(CapabilityKind::Resource))
            }),
        ),
        "resources/read" => match resource_uri(params.as_ref()) {
            Ok(uri) => match dispatcher.read_resource_contents(&uri, scope).await {
                Ok(contents) => json_rpc_result(id, json!({ "contents": contents })),
                Err(err) => dispatch_error_to_json_rpc(id, &err),
            },
            Err(err) => app_error_to_json_rpc(id, err),
        },
        "prompts/list" => json_rpc_result(
            id,
            json!({
                "prompts": prompt_list(&dispatcher.list_capabilities(CapabilityKind::Prompt))
            }),
        ),
        "prompts/get" => match named_call(params) {
            Ok((name, arguments)) => match dispatcher.get_prompt(&name, arguments, scope).await {
                Ok(prompt) => json_rpc_result(
                    id,
                    json!({
                        "description": prompt.description,
                        "messages": prompt
                            .contents
                            .into_iter()
                            .map(|content| json!({ "role": "user", "content": content }))
                            .collect::<Vec<_>>(),
                    }),
                ),
                Err(err) => dispatch_error_to_json_rpc(id, &err),
            },
            Err(err) => app_error_to_json_rpc(id, err),
        },
        _ => json_rpc_error(id, METHOD_NOT_FOUND, "Method not found"),
    };

    info!(
        method = %method,
        params = %audit_params,
        outcome = if is_json_rpc_error(&response) { "failure" } else { "success" },
        "mcp action audited"
    );

    response
}

/// Extracts `name` and `arguments` from `tools/call` and `prompts/get` params.
fn named_call(params: Option<Value>) -> Result<(String, Option<Value>), AppError> {
    let mut params = match params {
        Some(Value::Object(params)) => params,
        _ => return Err(AppError::bad_request("invalid_params", "params must be an object")),
    };

    let name = params
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::bad_request("invalid_params", "params.name is required"))?;

    Ok((name, params.remove("arguments")))
}

fn resource_uri(params: Option<&Value>) -> Result<String, AppError> {
    params
        .and_then(|params| params.get("uri"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AppError::bad_request("invalid_params", "params.uri is required"))
}

fn progress_token(params: Option<&Value>) -> Option<Value> {
    params?
        .get("_meta")?
        .get("progressToken")
        .filter(|token| !token.is_null())
        .cloned()
}

fn request_id_string(id: &Value) -> String {
    id.as_str()
        .map(str::to_string)
        .unwrap_or_else(|| id.to_string())
}

fn call_tool_result(content: Vec<Content>, is_error: bool) -> Value {
    json!({ "content": content, "isError": is_error })
}

pub fn input_schema(descriptor: &CapabilityDescriptor) -> Value {
    let properties: Map<String, Value> = descriptor
        .params
        .iter()
        .map(|param| {
            (
                param.name.clone(),
                json!({ "type": param.kind, "description": param.description }),
            )
        })
        .collect();
    let required: Vec<&str> = descriptor
        .required_params()
        .map(|param| param.name.as_str())
        .collect();

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

pub fn tool_list(descriptors: &[CapabilityDescriptor]) -> Vec<Value> {
    descriptors
        .iter()
        .map(|descriptor| {
            json!({
                "name": descriptor.address(),
                "description": descriptor.description,
                "inputSchema": input_schema(descriptor),
            })
        })
        .collect()
}

pub fn prompt_list(descriptors: &[CapabilityDescriptor]) -> Vec<Value> {
    descriptors
        .iter()
        .map(|descriptor| {
            let arguments: Vec<Value> = descriptor
                .params
                .iter()
                .map(|param| {
                    json!({
                        "name": param.name,
                        "description": param.description,
                        "required": param.required,
                    })
                })
                .collect();
            json!({
                "name": descriptor.address(),
                "description": descriptor.description,
                "arguments": arguments,
            })
        })
        .collect()
}

pub fn resource_template_list(descriptors: &[CapabilityDescriptor]) -> Vec<Value> {
    descriptors
        .iter()
        .map(|descriptor| {
            json!({
                "uriTemplate": descriptor.uri_template(),
                "name": descriptor.address(),
                "description": descriptor.description,
                "mimeType": descriptor.mime_type,
            })
        })
        .collect()
}

pub fn resource_list(resources: &[(CapabilityDescriptor, ResourceEntry)]) -> Vec<Value> {
    resources
        .iter()
        .map(|(descriptor, entry)| {
            let mut resource = json!({
                "uri": descriptor.resource_uri(&entry.id),
                "name": entry.name,
            });
            if let Some(description) = &entry.description {
                resource["description"] = json!(description);
            }
            if let Some(mime_type) = entry.mime_type.as_ref().or(descriptor.mime_type.as_ref()) {
                resource["mimeType"] = json!(mime_type);
            }
            resource
        })
        .collect()
}

pub fn negotiate_protocol_version(params: Option<&Value>) -> Result<ProtocolVersion, AppError> {
    let offered_version = params
        .and_then(Value::as_object)
        .and_then(|object| object.get("protocolVersion"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|version| !version.is_empty())
        .ok_or_else(|| {
            AppError::bad_request(
                "invalid_protocol_version",
                "initialize params.protocolVersion is required",
            )
        })?;

    if offered_version != SUPPORTED_PROTOCOL_VERSION {
        return Err(AppError::bad_request(
            "unsupported_protocol_version",
            "unsupported initialize protocolVersion",
        ));
    }

    Ok(ProtocolVersion::V2024_11_05)
}

pub fn redact_audit_params(params: Option<&Value>) -> Value {
    params.map(redact_audit_value).unwrap_or(Value::Null)
}

pub fn redact_audit_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), redact_audit_value(item))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_audit_value).collect()),
        _ => value.clone(),
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    matches!(
        normalized.as_str(),
        "authorization" | "bearer" | "credentials" | "credential" | "api_key" | "apikey"
    ) || normalized.contains("token")
        || normalized.contains("secret")
        || normalized.contains("password")
        || normalized.contains("credential")
}
