//! The [`Eko`] facade: one provider, one tool registry, one configuration.

use std::sync::Arc;

use tracing::{debug, info};

use crate::callback::WorkflowCallback;
use crate::config::EkoConfig;
use crate::error::{EkoError, Result};
use crate::generator::WorkflowGenerator;
use crate::llm::{LlmProvider, ProviderSpec};
use crate::parser::WorkflowParser;
use crate::tools::{Tool, ToolRegistry, human_tools};
use crate::workflow::{Workflow, WorkflowResult};

/// Entry point wiring the provider, registry and workflow machinery.
pub struct Eko {
    llm: Arc<dyn LlmProvider>,
    registry: ToolRegistry,
    config: EkoConfig,
    callback: Option<Arc<dyn WorkflowCallback>>,
}

impl std::fmt::Debug for Eko {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Eko")
            .field("llm", &self.llm.name())
            .field("registry", &self.registry)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl Eko {
    pub fn new(provider: ProviderSpec, config: EkoConfig) -> Result<Self> {
        let llm = provider.into_provider()?;
        info!(provider = llm.name(), "eko initialised");
        Ok(Self {
            llm,
            registry: ToolRegistry::new(),
            config,
            callback: None,
        })
    }

    /// Attach caller hooks.  The human tools the callback supports are
    /// registered.
    pub fn with_callback(mut self, callback: Arc<dyn WorkflowCallback>) -> Result<Self> {
        for tool in human_tools(callback.as_ref()) {
            let name = tool.name().to_owned();
            match self.registry.register(tool) {
                Ok(()) => debug!(tool = %name, "human tool registered"),
                Err(EkoError::DuplicateTool { .. }) => debug!(tool = %name, "human tool already registered"),
                Err(e) => return Err(e),
            }
        }
        self.callback = Some(callback);
        Ok(self)
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EkoConfig {
        &self.config
    }

    pub fn llm(&self) -> &Arc<dyn LlmProvider> {
        &self.llm
    }

    pub fn register_tool(&self, tool: Arc<dyn Tool>) -> Result<()> {
        self.registry.register(tool)
    }

    pub fn generator(&self) -> WorkflowGenerator {
        WorkflowGenerator::new(self.llm.clone(), self.registry.clone(), self.config.clone())
    }

    /// Generate a workflow for `prompt`.
    pub async fn generate(&self, prompt: &str) -> Result<Workflow> {
        self.generator().generate(prompt).await
    }

    /// Change `workflow` as `prompt` asks.
    pub async fn modify(&self, workflow: &Workflow, prompt: &str) -> Result<Workflow> {
        self.generator().modify(workflow, prompt).await
    }

    /// Build a workflow from a JSON document.
    pub fn load(&self, json: &str) -> Result<Workflow> {
        let doc = WorkflowParser::parse(json)?;
        WorkflowParser::build(&doc, &self.registry, self.llm.clone(), &self.config)
    }

    pub async fn execute(&self, workflow: &Workflow) -> Result<WorkflowResult> {
        workflow.execute(self.callback.clone()).await
    }

    /// Generate a workflow for `prompt` and execute it.
    pub async fn run(&self, prompt: &str) -> Result<WorkflowResult> {
        let workflow = self.generate(prompt).await?;
        self.execute(&workflow).await
    }

    pub fn cancel(&self, workflow: &Workflow) {
        workflow.cancel();
    }
}
