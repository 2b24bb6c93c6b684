//! Per-test coverage probes.
//!
//! Every method of an instrumented class reports its owner to the coverage bridge on entry,
//! and every access to a field of another included class reports that class too.

mod filter;
mod visitor;

pub use filter::CoverageInstrumentationFilter;
pub use visitor::{CoverageClassVisitor, CoverageMethodVisitor};

use tracing::debug;

use crate::bytecode::{ClassFileResult, ClassReader, ClassWriter, Constant, MethodVisitor};
use crate::opcodes;

pub const BRIDGE_OWNER: &str = "datadog/trace/api/civisibility/coverage/CoveragePerTestBridge";
pub const BRIDGE_METHOD: &str = "recordCoverage";
pub const BRIDGE_DESCRIPTOR: &str = "(Ljava/lang/Class;)V";

/// Operand stack slots the probe needs on top of the method's own usage.
pub const PROBE_STACK_SIZE: u16 = 2;

/// Emits `LDC <class>; INVOKESTATIC recordCoverage(Class)`.
pub fn insert_coverage_probe(visitor: &mut dyn MethodVisitor, class_name: &str) {
    visitor.visit_ldc_insn(&Constant::Class(class_name.to_string()));
    visitor.visit_method_insn(
        opcodes::INVOKESTATIC,
        BRIDGE_OWNER,
        BRIDGE_METHOD,
        BRIDGE_DESCRIPTOR,
        false,
    );
}

/// Adds coverage probes to `bytes`. Returns `None` when the filter excludes the class.
pub fn instrument(
    bytes: &[u8],
    filter: &CoverageInstrumentationFilter,
) -> ClassFileResult<Option<Vec<u8>>> {
    let reader = ClassReader::new(bytes)?;
    let class_name = reader.name()?;
    if !filter.test(class_name) {
        debug!(class = class_name, "class excluded from coverage");
        return Ok(None);
    }
    let mut writer = ClassWriter::from_reader(&reader, 0);
    let mut visitor = CoverageClassVisitor::new(&mut writer, filter);
    reader.accept(&mut visitor)?;
    writer.to_bytes().map(Some)
}
