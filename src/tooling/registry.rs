use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::config::AgentConfig;
use crate::tooling::declared::DeclaredModule;
use crate::tooling::module::InstrumenterModule;

/// Modules known to the agent, in discovery order.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn InstrumenterModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: Arc<dyn InstrumenterModule>) {
        debug!(
            module = module.name(),
            order = module.order(),
            system = %module.target_system(),
            "registered instrumenter module"
        );
        self.modules.push(module);
    }

    /// Registers every module of a JSON manifest, in file order.
    pub fn register_manifest(&mut self, json: &str) -> Result<()> {
        let modules =
            DeclaredModule::parse_manifest(json).context("failed to parse module manifest")?;
        for module in modules {
            self.register(Arc::new(module));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Enabled modules sorted by order. The sort is stable so equal orders keep discovery order.
    pub fn resolve(&self, config: &AgentConfig) -> Vec<Arc<dyn InstrumenterModule>> {
        let mut enabled: Vec<Arc<dyn InstrumenterModule>> = self
            .modules
            .iter()
            .filter(|module| {
                let enabled = module.is_enabled(config);
                if !enabled {
                    debug!(module = module.name(), "instrumenter module disabled");
                }
                enabled
            })
            .cloned()
            .collect();
        enabled.sort_by_key(|module| module.order());
        enabled
    }
}
