//! Contracts every tool, resource and prompt implementation satisfies.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::concurrency::CancellationToken;
use crate::protocol::RpcError;

/// Boxed future returned by [`Tool::execute`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send + 'a>>;

/// Boxed future returned by [`Resource::read`].
pub type ResourceFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ResourceContents, RpcError>> + Send + 'a>>;

/// Entry in a `tools/list` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable summary.
    pub description: String,
    /// JSON Schema for `arguments`.
    pub input_schema: Value,
}

/// Entry in a `resources/list` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    /// URI or URI template the resource answers to.
    #[serde(rename = "uri")]
    pub uri_pattern: String,
    /// Human-readable name.
    pub name: String,
    /// Human-readable summary.
    pub description: String,
    /// MIME type of the contents.
    pub mime_type: String,
}

/// One declared prompt argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptArgument {
    /// Argument name.
    pub name: String,
    /// Human-readable summary.
    pub description: String,
    /// Whether `prompts/get` must supply it.
    #[serde(default)]
    pub required: bool,
}

/// Entry in a `prompts/list` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptDefinition {
    /// Unique prompt name.
    pub name: String,
    /// Human-readable summary.
    pub description: String,
    /// Declared arguments.
    pub arguments: Vec<PromptArgument>,
}

/// One role-tagged message produced by [`Prompt::render`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    /// `system`, `user` or `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
}

impl PromptMessage {
    /// `system` message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    /// `user` message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Text returned by [`Resource::read`], before any offset/limit windowing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceContents {
    /// Full text of the resource.
    pub text: String,
    /// Overrides the definition's MIME type when set.
    pub mime_type: Option<String>,
}

impl ResourceContents {
    /// Contents with the definition's MIME type.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mime_type: None,
        }
    }
}

/// Callable capability. Must tolerate concurrent calls.
pub trait Tool: Send + Sync {
    /// Listing entry, including the input schema.
    fn definition(&self) -> &ToolDefinition;

    /// Run with already-validated `arguments`.
    ///
    /// Long-running tools should call [`CancellationToken::check`] at their
    /// own checkpoints.
    fn execute(&self, arguments: Value, token: CancellationToken) -> ToolFuture<'_>;
}

/// Readable capability addressed by a URI pattern.
pub trait Resource: Send + Sync {
    /// Listing entry, including the URI pattern.
    fn definition(&self) -> &ResourceDefinition;

    /// Read the resource at `uri`; `variables` holds the template bindings.
    fn read(&self, uri: String, variables: HashMap<String, String>) -> ResourceFuture<'_>;
}

/// Renderable message template.
pub trait Prompt: Send + Sync {
    /// Listing entry, including declared arguments.
    fn definition(&self) -> &PromptDefinition;

    /// Render to ordered, role-tagged messages.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidParams` error when an argument has an unusable value.
    fn render(&self, arguments: &Map<String, Value>) -> Result<Vec<PromptMessage>, RpcError>;
}

/// [`Tool`] backed by a closure.
pub struct FnTool<F> {
    definition: ToolDefinition,
    handler: F,
}

impl<F> FnTool<F> {
    /// Pair `handler` with its listing entry.
    #[must_use]
    pub fn new(definition: ToolDefinition, handler: F) -> Self {
        Self {
            definition,
            handler,
        }
    }
}

impl<F, Fut> Tool for FnTool<F>
where
    F: Fn(Value, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
{
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    fn execute(&self, arguments: Value, token: CancellationToken) -> ToolFuture<'_> {
        Box::pin((self.handler)(arguments, token))
    }
}
