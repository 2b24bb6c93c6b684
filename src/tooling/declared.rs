use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::tooling::module::{InstrumenterModule, TargetSystem, TypeInstrumentation};

/// Module described in a JSON manifest.
///
/// ```json
/// {
///   "name": "okhttp",
///   "aliases": ["okhttp-3"],
///   "order": 10,
///   "targetSystem": "tracing",
///   "helpers": ["com.example.okhttp.Decorator"],
///   "contextStore": {"okhttp3.Call": "com.example.State"},
///   "instrumentations": [{
///     "typeMatcher": {"kind": "named", "name": "okhttp3.RealCall"},
///     "transformations": [{"method": {"kind": "named", "name": "execute"},
///                          "advice": "com.example.okhttp.ExecuteAdvice"}]
///   }]
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclaredModule {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub order: i32,
    #[serde(default = "default_target_system")]
    pub target_system: TargetSystem,
    #[serde(default = "default_enabled")]
    pub enabled_by_default: bool,
    #[serde(default)]
    pub helpers: Vec<String>,
    #[serde(default)]
    pub context_store: BTreeMap<String, String>,
    #[serde(default)]
    pub instrumentations: Vec<TypeInstrumentation>,
    #[serde(skip)]
    names: Vec<String>,
}

fn default_target_system() -> TargetSystem {
    TargetSystem::Tracing
}

fn default_enabled() -> bool {
    true
}

impl DeclaredModule {
    pub fn new(name: &str, target_system: TargetSystem) -> Self {
        Self {
            name: name.to_string(),
            aliases: Vec::new(),
            order: 0,
            target_system,
            enabled_by_default: true,
            helpers: Vec::new(),
            context_store: BTreeMap::new(),
            instrumentations: Vec::new(),
            names: vec![name.to_string()],
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self.names.push(alias.to_string());
        self
    }

    pub fn with_instrumentation(mut self, instrumentation: TypeInstrumentation) -> Self {
        self.instrumentations.push(instrumentation);
        self
    }

    /// Parses a JSON array of modules.
    pub fn parse_manifest(json: &str) -> serde_json::Result<Vec<DeclaredModule>> {
        let modules: Vec<DeclaredModule> = serde_json::from_str(json)?;
        Ok(modules.into_iter().map(DeclaredModule::resolve_names).collect())
    }

    fn resolve_names(mut self) -> Self {
        self.names = std::iter::once(self.name.clone())
            .chain(self.aliases.iter().cloned())
            .collect();
        self
    }
}

impl InstrumenterModule for DeclaredModule {
    fn names(&self) -> &[String] {
        &self.names
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn target_system(&self) -> TargetSystem {
        self.target_system
    }

    fn default_enabled(&self) -> bool {
        self.enabled_by_default
    }

    fn type_instrumentations(&self) -> Vec<TypeInstrumentation> {
        self.instrumentations.clone()
    }

    fn helper_class_names(&self) -> Vec<String> {
        self.helpers.clone()
    }

    fn context_store(&self) -> Vec<(String, String)> {
        self.context_store
            .iter()
            .map(|(owner, value)| (owner.clone(), value.clone()))
            .collect()
    }
}
