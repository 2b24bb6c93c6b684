use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::AgentConfig;
use crate::tooling::matcher::{HierarchyMatcher, MethodMatcher, TypeMatcher};

/// Product area a module belongs to. Only modules of enabled systems are applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetSystem {
    Tracing,
    Profiling,
    CiVisibility,
    Appsec,
    Iast,
    /// Always applied.
    Common,
}

impl TargetSystem {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetSystem::Tracing => "tracing",
            TargetSystem::Profiling => "profiling",
            TargetSystem::CiVisibility => "ci-visibility",
            TargetSystem::Appsec => "appsec",
            TargetSystem::Iast => "iast",
            TargetSystem::Common => "common",
        }
    }
}

impl fmt::Display for TargetSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetSystem {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "tracing" => Ok(TargetSystem::Tracing),
            "profiling" => Ok(TargetSystem::Profiling),
            "ci-visibility" | "civisibility" => Ok(TargetSystem::CiVisibility),
            "appsec" => Ok(TargetSystem::Appsec),
            "iast" => Ok(TargetSystem::Iast),
            "common" => Ok(TargetSystem::Common),
            other => Err(format!("unknown target system `{other}`")),
        }
    }
}

/// Advice class applied to the methods selected by a matcher.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodTransformation {
    pub method: MethodMatcher,
    /// Binary name of the class declaring `onMethodEnter`/`onMethodExit`.
    pub advice: String,
}

/// Which classes to transform and how.
///
/// A class matches when either matcher accepts it. `location` narrows matches to class files
/// whose URL matches a glob, and `class_loader` to loaders accepted by the matcher (`None` is
/// the bootstrap loader).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeInstrumentation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_matcher: Option<TypeMatcher>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hierarchy_matcher: Option<HierarchyMatcher>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_loader: Option<TypeMatcher>,
    #[serde(default)]
    pub transformations: Vec<MethodTransformation>,
}

impl TypeInstrumentation {
    pub fn for_type(name: &str) -> Self {
        Self {
            type_matcher: Some(TypeMatcher::named(name)),
            hierarchy_matcher: None,
            location: None,
            class_loader: None,
            transformations: Vec::new(),
        }
    }

    pub fn for_hierarchy(matcher: HierarchyMatcher) -> Self {
        Self {
            type_matcher: None,
            hierarchy_matcher: Some(matcher),
            location: None,
            class_loader: None,
            transformations: Vec::new(),
        }
    }

    pub fn with_advice(mut self, method: MethodMatcher, advice: &str) -> Self {
        self.transformations.push(MethodTransformation {
            method,
            advice: advice.to_string(),
        });
        self
    }
}

/// A group of instrumentations enabled and ordered together.
pub trait InstrumenterModule: Send + Sync {
    /// Primary name first, then aliases. Used by the enable switches.
    fn names(&self) -> &[String];

    fn name(&self) -> &str {
        self.names().first().map(String::as_str).unwrap_or("")
    }

    /// Lower orders are applied first.
    fn order(&self) -> i32 {
        0
    }

    fn target_system(&self) -> TargetSystem;

    fn default_enabled(&self) -> bool {
        true
    }

    fn is_enabled(&self, config: &AgentConfig) -> bool {
        config.is_system_enabled(self.target_system())
            && config.is_integration_enabled(self.names(), self.default_enabled())
    }

    fn type_instrumentations(&self) -> Vec<TypeInstrumentation>;

    /// Binary names of the helper classes the advices reference, in injection order.
    fn helper_class_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Side tables requested by the advices, as (owner class, value class) pairs.
    fn context_store(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_systems_parse_loosely() {
        assert_eq!("CI_VISIBILITY".parse::<TargetSystem>(), Ok(TargetSystem::CiVisibility));
        assert_eq!(" iast ".parse::<TargetSystem>(), Ok(TargetSystem::Iast));
        assert!("metrics".parse::<TargetSystem>().is_err());
        assert_eq!(
            serde_json::to_string(&TargetSystem::CiVisibility).expect("serialize"),
            "\"ci-visibility\""
        );
    }
}
