//! Protocol methods and server wiring.
//!
//! [`Server`] registers the fixed MCP methods on a [`RouterBuilder`], backs
//! them with a [`CapabilityRegistry`], and runs the configured transport.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::concurrency::{RequestKey, RequestTracker};
use crate::config::{GlobalConfig, TransportKind};
use crate::middleware::{handler, HandlerResult, RequestContext};
use crate::protocol::{RequestId, RpcError};
use crate::registry::{validate_arguments, CapabilityRegistry};
use crate::router::{Router, RouterBuilder};
use crate::transport::{stdio, websocket};
use crate::Result;

/// Router plus the registry and configuration it serves.
#[derive(Debug, Clone)]
pub struct Server {
    router: Router,
    registry: Arc<CapabilityRegistry>,
    config: Arc<GlobalConfig>,
}

impl Server {
    /// Build a server with the default middleware stack.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the middleware cannot be constructed.
    pub fn new(config: GlobalConfig, registry: CapabilityRegistry) -> Result<Self> {
        let builder = RouterBuilder::new(&config).with_default_middleware()?;
        Ok(Self::with_builder(config, registry, builder))
    }

    /// Build a server on a caller-prepared builder.
    ///
    /// The protocol methods are registered on top of whatever `builder`
    /// already holds, replacing handlers with the same name.
    #[must_use]
    pub fn with_builder(
        config: GlobalConfig,
        registry: CapabilityRegistry,
        builder: RouterBuilder,
    ) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(registry);
        let router = register_protocol(builder, &config, &registry).build();
        info!(
            tools = registry.tool_count(),
            resources = registry.resources().len(),
            prompts = registry.prompts().len(),
            "server ready"
        );
        Self {
            router,
            registry,
            config,
        }
    }

    /// Dispatcher driving every connection.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Capabilities exposed by this server.
    #[must_use]
    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Serve the configured transport until `shutdown` fires or, for stdio,
    /// input ends.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the transport cannot start.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        if self.router.backpressure().is_some() {
            let router = self.router.clone();
            let drain_shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Some(queue) = router.backpressure() {
                    queue.run(drain_shutdown).await;
                }
            });
        }
        match self.config.transport.kind {
            TransportKind::Stdio => {
                stdio::serve_stdio(self.router.clone(), &self.config, shutdown).await
            }
            TransportKind::Websocket => {
                websocket::serve_websocket(self.router.clone(), &self.config, shutdown).await
            }
        }
    }
}

/// Register every protocol method and notification on `builder`.
fn register_protocol(
    builder: RouterBuilder,
    config: &Arc<GlobalConfig>,
    registry: &Arc<CapabilityRegistry>,
) -> RouterBuilder {
    let tracker = builder.tracker();
    let with_registry = |f: fn(&CapabilityRegistry, &Value) -> HandlerResult| {
        let registry = Arc::clone(registry);
        handler(move |ctx: RequestContext| {
            let outcome = f(&registry, &ctx.params);
            async move { outcome }
        })
    };

    let init_config = Arc::clone(config);
    let call_registry = Arc::clone(registry);
    let read_registry = Arc::clone(registry);

    builder
        .method(
            "initialize",
            handler(move |ctx| {
                let outcome = initialize(&init_config, &ctx.params);
                async move { outcome }
            }),
        )
        .method("ping", handler(|_ctx| async { Ok(json!({})) }))
        .method("tools/list", with_registry(tools_list))
        .method(
            "tools/call",
            handler(move |ctx| {
                let registry = Arc::clone(&call_registry);
                async move { tools_call(&registry, ctx).await }
            }),
        )
        .method("resources/list", with_registry(resources_list))
        .method(
            "resources/templates/list",
            with_registry(resource_templates_list),
        )
        .method(
            "resources/read",
            handler(move |ctx| {
                let registry = Arc::clone(&read_registry);
                async move { resources_read(&registry, ctx).await }
            }),
        )
        .method("prompts/list", with_registry(prompts_list))
        .method("prompts/get", with_registry(prompts_get))
        .notification(
            "notifications/initialized",
            handler(|ctx| async move {
                info!(connection = %ctx.connection, "client initialized");
                Ok(Value::Null)
            }),
        )
        .notification(
            "notifications/cancelled",
            handler(move |ctx| {
                let outcome = cancel_notified(&tracker, &ctx);
                async move { outcome }
            }),
        )
}

// ── Protocol methods ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeParams {
    protocol_version: Option<String>,
    #[serde(default)]
    client_info: Option<Value>,
}

/// `initialize`: echo the protocol version and describe the server.
///
/// # Errors
///
/// Returns `InvalidParams` if `params` has the wrong shape.
pub fn initialize(config: &GlobalConfig, params: &Value) -> HandlerResult {
    let params: InitializeParams = parse_params(params.clone())?;
    let protocol_version = params
        .protocol_version
        .unwrap_or_else(|| config.server.protocol_version.clone());
    info!(
        protocol_version,
        client = ?params.client_info,
        "initialize"
    );
    Ok(json!({
        "protocolVersion": protocol_version,
        "capabilities": {
            "tools": { "listChanged": false },
            "resources": { "subscribe": false, "listChanged": false },
            "prompts": { "listChanged": false },
        },
        "serverInfo": {
            "name": config.server.name,
            "version": config.server.version,
        },
    }))
}

fn tools_list(registry: &CapabilityRegistry, _params: &Value) -> HandlerResult {
    Ok(json!({ "tools": registry.tools() }))
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

async fn tools_call(registry: &CapabilityRegistry, ctx: RequestContext) -> HandlerResult {
    let params: CallToolParams = parse_params(ctx.params)?;
    let tool = registry
        .tool(&params.name)
        .ok_or_else(|| RpcError::method_not_found(&format!("tool/{}", params.name)))?;
    let arguments = match params.arguments {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(arguments) => arguments,
    };
    validate_arguments(&tool.definition().input_schema, &arguments)?;

    let result = tool.execute(arguments, ctx.token).await?;
    let is_error = result.as_object().is_some_and(|obj| obj.contains_key("error"));
    let text = serde_json::to_string(&result).map_err(RpcError::internal)?;
    Ok(json!({
        "content": [{ "type": "text", "text": text }],
        "isError": is_error,
    }))
}

fn resources_list(registry: &CapabilityRegistry, _params: &Value) -> HandlerResult {
    // Templated resources are listed by `resources/templates/list`.
    Ok(json!({ "resources": registry.concrete_resources() }))
}

fn resource_templates_list(registry: &CapabilityRegistry, _params: &Value) -> HandlerResult {
    let templates: Vec<Value> = registry
        .resource_templates()
        .into_iter()
        .map(|def| {
            json!({
                "uriTemplate": def.uri_pattern,
                "name": def.name,
                "description": def.description,
                "mimeType": def.mime_type,
            })
        })
        .collect();
    Ok(json!({ "resourceTemplates": templates }))
}

#[derive(Debug, Deserialize)]
struct ReadResourceParams {
    uri: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn resources_read(registry: &CapabilityRegistry, ctx: RequestContext) -> HandlerResult {
    let params: ReadResourceParams = parse_params(ctx.params)?;
    let resolved = registry
        .resolve_resource(&params.uri)
        .ok_or_else(|| RpcError::resource_not_found(&params.uri))?;
    ctx.token.check()?;

    let contents = resolved
        .resource
        .read(params.uri.clone(), resolved.variables)
        .await?;
    let text = slice_chars(&contents.text, params.offset, params.limit);
    let mime_type = contents
        .mime_type
        .unwrap_or_else(|| resolved.resource.definition().mime_type.clone());

    Ok(json!({
        "contents": [{
            "uri": params.uri,
            "mimeType": mime_type,
            "hash": content_hash(&text),
            "text": text,
        }],
    }))
}

fn prompts_list(registry: &CapabilityRegistry, _params: &Value) -> HandlerResult {
    Ok(json!({ "prompts": registry.prompts() }))
}

#[derive(Debug, Deserialize)]
struct GetPromptParams {
    name: String,
    #[serde(default)]
    arguments: Option<Map<String, Value>>,
}

fn prompts_get(registry: &CapabilityRegistry, params: &Value) -> HandlerResult {
    let params: GetPromptParams = parse_params(params.clone())?;
    let prompt = registry
        .prompt(&params.name)
        .ok_or_else(|| RpcError::method_not_found(&format!("prompt/{}", params.name)))?;
    let arguments = params.arguments.unwrap_or_default();
    let definition = prompt.definition();

    if let Some(missing) = definition
        .arguments
        .iter()
        .find(|arg| arg.required && !arguments.contains_key(&arg.name))
    {
        return Err(RpcError::invalid_params(format!(
            "missing required argument: {}",
            missing.name
        )));
    }

    let messages = prompt.render(&arguments)?;
    Ok(json!({
        "description": definition.description,
        "messages": messages,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelledParams {
    request_id: RequestId,
    #[serde(default)]
    reason: Option<String>,
}

/// `notifications/cancelled`: cancel the sender's request with that id.
fn cancel_notified(tracker: &RequestTracker, ctx: &RequestContext) -> HandlerResult {
    let params: CancelledParams = parse_params(ctx.params.clone())?;
    let key = RequestKey::new(ctx.connection, params.request_id);
    let found = tracker.cancel_key(&key);
    info!(request = %key, found, reason = ?params.reason, "cancellation notified");
    Ok(Value::Null)
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Deserialize `params`, mapping shape errors to `InvalidParams`.
fn parse_params<T: DeserializeOwned>(params: Value) -> std::result::Result<T, RpcError> {
    serde_json::from_value(params).map_err(RpcError::invalid_params)
}

/// Characters `[offset, offset + limit)` of `text`.
#[must_use]
pub fn slice_chars(text: &str, offset: Option<usize>, limit: Option<usize>) -> String {
    let offset = offset.unwrap_or(0);
    match limit {
        Some(limit) => text.chars().skip(offset).take(limit).collect(),
        None => text.chars().skip(offset).collect(),
    }
}

/// Lowercase hex SHA-256 of `text`.
#[must_use]
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
