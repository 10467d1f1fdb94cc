//! Capability registry: tools, resources and prompts by name.
//!
//! Populated once at startup and read-only afterwards, so lookups need no
//! locking. Listings preserve registration order.

pub mod capability;
pub mod schema;
pub mod uri_template;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

pub use capability::{
    FnTool, Prompt, PromptArgument, PromptDefinition, PromptMessage, Resource, ResourceContents,
    ResourceDefinition, ResourceFuture, Tool, ToolDefinition, ToolFuture,
};
pub use schema::validate_arguments;
pub use uri_template::UriTemplate;

use crate::{AppError, Result};

/// A resource together with its compiled URI template.
#[derive(Clone)]
struct RegisteredResource {
    template: UriTemplate,
    resource: Arc<dyn Resource>,
}

/// Outcome of matching a URI against the registered resources.
#[derive(Clone)]
pub struct ResolvedResource {
    /// The first resource whose template matched.
    pub resource: Arc<dyn Resource>,
    /// Template bindings extracted from the URI.
    pub variables: HashMap<String, String>,
}

/// Name-keyed store of every capability the server exposes.
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    tools: Vec<Arc<dyn Tool>>,
    tool_index: HashMap<String, usize>,
    resources: Vec<RegisteredResource>,
    prompts: Vec<Arc<dyn Prompt>>,
    prompt_index: HashMap<String, usize>,
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("tools", &self.tool_index.keys().collect::<Vec<_>>())
            .field(
                "resources",
                &self
                    .resources
                    .iter()
                    .map(|r| r.template.as_str())
                    .collect::<Vec<_>>(),
            )
            .field("prompts", &self.prompt_index.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CapabilityRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Registry` if the name is already taken.
    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.definition().name.clone();
        if self.tool_index.contains_key(&name) {
            return Err(AppError::Registry(format!("duplicate tool: {name}")));
        }
        debug!(tool = %name, "registered tool");
        self.tool_index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Add a resource.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Registry` if the URI pattern is malformed or
    /// already registered.
    pub fn register_resource(&mut self, resource: Arc<dyn Resource>) -> Result<()> {
        let pattern = resource.definition().uri_pattern.clone();
        if self.resources.iter().any(|r| r.template.as_str() == pattern) {
            return Err(AppError::Registry(format!("duplicate resource: {pattern}")));
        }
        let template = UriTemplate::parse(&pattern)?;
        debug!(resource = %pattern, "registered resource");
        self.resources.push(RegisteredResource { template, resource });
        Ok(())
    }

    /// Add a prompt.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Registry` if the name is already taken.
    pub fn register_prompt(&mut self, prompt: Arc<dyn Prompt>) -> Result<()> {
        let name = prompt.definition().name.clone();
        if self.prompt_index.contains_key(&name) {
            return Err(AppError::Registry(format!("duplicate prompt: {name}")));
        }
        debug!(prompt = %name, "registered prompt");
        self.prompt_index.insert(name, self.prompts.len());
        self.prompts.push(prompt);
        Ok(())
    }

    // ── Listings ──────────────────────────────────────────────────────────────

    /// Tool definitions in registration order.
    #[must_use]
    pub fn tools(&self) -> Vec<&ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Resource definitions in registration order.
    #[must_use]
    pub fn resources(&self) -> Vec<&ResourceDefinition> {
        self.resources
            .iter()
            .map(|r| r.resource.definition())
            .collect()
    }

    /// Definitions of resources with a fixed URI, readable as listed.
    #[must_use]
    pub fn concrete_resources(&self) -> Vec<&ResourceDefinition> {
        self.resources
            .iter()
            .filter(|r| !r.template.is_template())
            .map(|r| r.resource.definition())
            .collect()
    }

    /// Definitions of resources whose pattern binds at least one variable.
    #[must_use]
    pub fn resource_templates(&self) -> Vec<&ResourceDefinition> {
        self.resources
            .iter()
            .filter(|r| r.template.is_template())
            .map(|r| r.resource.definition())
            .collect()
    }

    /// Prompt definitions in registration order.
    #[must_use]
    pub fn prompts(&self) -> Vec<&PromptDefinition> {
        self.prompts.iter().map(|p| p.definition()).collect()
    }

    // ── Resolution ────────────────────────────────────────────────────────────

    /// Tool registered under `name`.
    #[must_use]
    pub fn tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tool_index
            .get(name)
            .map(|&idx| Arc::clone(&self.tools[idx]))
    }

    /// Prompt registered under `name`.
    #[must_use]
    pub fn prompt(&self, name: &str) -> Option<Arc<dyn Prompt>> {
        self.prompt_index
            .get(name)
            .map(|&idx| Arc::clone(&self.prompts[idx]))
    }

    /// First resource, in registration order, whose template fully matches `uri`.
    #[must_use]
    pub fn resolve_resource(&self, uri: &str) -> Option<ResolvedResource> {
        self.resources.iter().find_map(|r| {
            r.template.matches(uri).map(|variables| ResolvedResource {
                resource: Arc::clone(&r.resource),
                variables,
            })
        })
    }

    /// Number of registered tools.
    #[must_use]
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }
}
