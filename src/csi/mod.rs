//! Call-site instrumentation.
//!
//! Call sites are declared as [`CallSiteDeclaration`]s, gathered in a [`CallSites`] registry
//! and applied by the [`CallSiteTransformer`], which hands every matching invoke instruction
//! to its advice.

mod advice;
mod call_sites;
mod pointcut;
pub mod stack;
mod transformer;

use thiserror::Error;

pub use advice::{
    AdviceMethod, AdviceType, CallSiteAdvice, DeclaredAdvice, InvokeAdvice, InvokeDynamicAdvice,
    InvokeDynamicSite, InvokeSite,
};
pub use call_sites::{Advices, CallSite, CallSiteDeclaration, CallSites};
pub use pointcut::Pointcut;
pub use transformer::{
    CallSiteClassVisitor, CallSiteMethodVisitor, CallSiteTransformation, CallSiteTransformer,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PointcutError {
    #[error("malformed pointcut `{0}`")]
    Malformed(String),
    #[error("unknown type `{0}` in pointcut")]
    InvalidType(String),
    #[error("invalid method descriptor `{0}`")]
    InvalidDescriptor(String),
    #[error("duplicate call site for {0}")]
    Duplicate(String),
    #[error("unsupported call site: {0}")]
    Unsupported(String),
}
