//! Capabilities the binary ships with.
//!
//! `echo`, `delay` and `server_status` tools, `server://info` and
//! `server://tools/{name}` resources, and a `summarize` prompt. They double
//! as worked examples of the registry traits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::concurrency::CancellationToken;
use crate::config::GlobalConfig;
use crate::protocol::RpcError;
use crate::registry::{
    CapabilityRegistry, FnTool, Prompt, PromptArgument, PromptDefinition, PromptMessage,
    Resource, ResourceContents, ResourceDefinition, ResourceFuture, ToolDefinition,
};
use crate::Result;

/// Longest sleep `delay` accepts.
const MAX_DELAY_MS: u64 = 60_000;

/// Registry holding every built-in capability.
///
/// # Errors
///
/// Returns `AppError::Registry` if a built-in collides with another.
pub fn registry(config: &GlobalConfig) -> Result<CapabilityRegistry> {
    let mut registry = CapabilityRegistry::new();
    register(&mut registry, config)?;
    Ok(registry)
}

/// Add every built-in capability to `registry`.
///
/// # Errors
///
/// Returns `AppError::Registry` if a built-in collides with an existing entry.
pub fn register(registry: &mut CapabilityRegistry, config: &GlobalConfig) -> Result<()> {
    let started_at = Utc::now();
    let server_name = config.server.name.clone();
    let server_version = config.server.version.clone();

    registry.register_tool(Arc::new(FnTool::new(
        ToolDefinition {
            name: "echo".into(),
            description: "Return the given message unchanged.".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "message": { "type": "string" } },
                "required": ["message"],
            }),
        },
        echo,
    )))?;

    registry.register_tool(Arc::new(FnTool::new(
        ToolDefinition {
            name: "delay".into(),
            description: "Sleep for the given number of milliseconds, honoring cancellation."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": { "ms": { "type": "integer" } },
                "required": ["ms"],
            }),
        },
        delay,
    )))?;

    registry.register_tool(Arc::new(FnTool::new(
        ToolDefinition {
            name: "server_status".into(),
            description: "Report server identity and uptime.".into(),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        move |_arguments: Value, _token: CancellationToken| {
            let status = status_json(&server_name, &server_version, started_at);
            async move { Ok::<_, RpcError>(status) }
        },
    )))?;

    let tool_names: Vec<String> = registry.tools().iter().map(|t| t.name.clone()).collect();
    let tool_docs: HashMap<String, Value> = registry
        .tools()
        .into_iter()
        .filter_map(|t| serde_json::to_value(t).ok().map(|v| (t.name.clone(), v)))
        .collect();

    registry.register_resource(Arc::new(ServerInfo {
        definition: ResourceDefinition {
            uri_pattern: "server://info".into(),
            name: "Server info".into(),
            description: "Server identity and registered tool names.".into(),
            mime_type: "application/json".into(),
        },
        info: json!({
            "name": config.server.name,
            "version": config.server.version,
            "protocolVersion": config.server.protocol_version,
            "tools": tool_names,
        }),
    }))?;

    registry.register_resource(Arc::new(ToolDoc {
        definition: ResourceDefinition {
            uri_pattern: "server://tools/{name}".into(),
            name: "Tool definition".into(),
            description: "Definition and input schema of one tool.".into(),
            mime_type: "application/json".into(),
        },
        docs: tool_docs,
    }))?;

    registry.register_prompt(Arc::new(Summarize {
        definition: PromptDefinition {
            name: "summarize".into(),
            description: "Summarize a text in a given style.".into(),
            arguments: vec![
                PromptArgument {
                    name: "text".into(),
                    description: "Text to summarize.".into(),
                    required: true,
                },
                PromptArgument {
                    name: "style".into(),
                    description: "Summary style, e.g. `brief` or `detailed`.".into(),
                    required: false,
                },
            ],
        },
    }))?;

    Ok(())
}

async fn echo(arguments: Value, _token: CancellationToken) -> std::result::Result<Value, RpcError> {
    Ok(json!({ "message": arguments.get("message").cloned().unwrap_or(Value::Null) }))
}

async fn delay(arguments: Value, token: CancellationToken) -> std::result::Result<Value, RpcError> {
    let ms = arguments
        .get("ms")
        .and_then(Value::as_u64)
        .ok_or_else(|| RpcError::invalid_params("ms must be a non-negative integer"))?;
    if ms > MAX_DELAY_MS {
        return Err(RpcError::invalid_params(format!(
            "ms must not exceed {MAX_DELAY_MS}"
        )));
    }
    tokio::select! {
        () = tokio::time::sleep(Duration::from_millis(ms)) => {}
        () = token.cancelled() => {}
    }
    token.check()?;
    Ok(json!({ "sleptMs": ms }))
}

fn status_json(name: &str, version: &str, started_at: DateTime<Utc>) -> Value {
    let uptime = Utc::now().signed_duration_since(started_at);
    json!({
        "name": name,
        "version": version,
        "startedAt": started_at.to_rfc3339(),
        "uptimeSeconds": uptime.num_seconds(),
    })
}

struct ServerInfo {
    definition: ResourceDefinition,
    info: Value,
}

impl Resource for ServerInfo {
    fn definition(&self) -> &ResourceDefinition {
        &self.definition
    }

    fn read(&self, _uri: String, _variables: HashMap<String, String>) -> ResourceFuture<'_> {
        Box::pin(async move {
            serde_json::to_string_pretty(&self.info)
                .map(ResourceContents::text)
                .map_err(RpcError::internal)
        })
    }
}

struct ToolDoc {
    definition: ResourceDefinition,
    docs: HashMap<String, Value>,
}

impl Resource for ToolDoc {
    fn definition(&self) -> &ResourceDefinition {
        &self.definition
    }

    fn read(&self, uri: String, variables: HashMap<String, String>) -> ResourceFuture<'_> {
        Box::pin(async move {
            let doc = variables
                .get("name")
                .and_then(|name| self.docs.get(name))
                .ok_or_else(|| RpcError::resource_not_found(&uri))?;
            serde_json::to_string_pretty(doc)
                .map(ResourceContents::text)
                .map_err(RpcError::internal)
        })
    }
}

struct Summarize {
    definition: PromptDefinition,
}

impl Prompt for Summarize {
    fn definition(&self) -> &PromptDefinition {
        &self.definition
    }

    fn render(
        &self,
        arguments: &Map<String, Value>,
    ) -> std::result::Result<Vec<PromptMessage>, RpcError> {
        let text = arguments
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("text must be a string"))?;
        let style = match arguments.get("style") {
            None | Some(Value::Null) => "brief",
            Some(Value::String(style)) => style.as_str(),
            Some(_) => return Err(RpcError::invalid_params("style must be a string")),
        };
        Ok(vec![
            PromptMessage::system(format!(
                "You write {style} summaries. Keep the author's meaning and omit nothing essential."
            )),
            PromptMessage::user(format!("Summarize the following text:\n\n{text}")),
        ])
    }
}
