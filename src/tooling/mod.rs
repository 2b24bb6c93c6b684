//! Instrumenter modules and the transformer that applies them.
//!
//! Modules are registered in a [`ModuleRegistry`], filtered by the agent configuration and
//! sorted by order, then compiled into one [`CombiningTransformer`]. Each type
//! instrumentation of a module gets a transformation id; a class is matched once against all
//! ids and receives the method advice of every id it matches. Classes accepted by
//! [`GlobalIgnores`] are skipped before any matching.

mod advice;
mod combining;
mod context;
mod declared;
mod ignores;
pub mod matcher;
mod module;
mod registry;
mod type_pool;

pub use advice::{
    AdviceClassVisitor, AdviceMethodVisitor, ADVICE_DESCRIPTOR, ENTER_METHOD, EXIT_METHOD,
};
pub use combining::{ClassRequest, CombiningTransformer, Transformation, BOOTSTRAP_LOADER};
pub use context::{ContextStore, ContextStoreRegistry};
pub use declared::DeclaredModule;
pub use ignores::GlobalIgnores;
pub use matcher::{HierarchyMatcher, MethodMatcher, TypeMatcher};
pub use module::{InstrumenterModule, MethodTransformation, TargetSystem, TypeInstrumentation};
pub use registry::ModuleRegistry;
pub use type_pool::TypePool;
