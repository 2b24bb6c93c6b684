use crate::bytecode::{ClassHeader, ClassVisitor, MethodVisitor};
use crate::coverage::{insert_coverage_probe, CoverageInstrumentationFilter, PROBE_STACK_SIZE};
use crate::ir::MethodDescription;

/// Wraps every method visitor of the visited class in a [`CoverageMethodVisitor`].
pub struct CoverageClassVisitor<'f, C> {
    next: C,
    filter: &'f CoverageInstrumentationFilter,
    class_name: Option<String>,
}

impl<'f, C: ClassVisitor> CoverageClassVisitor<'f, C> {
    pub fn new(next: C, filter: &'f CoverageInstrumentationFilter) -> Self {
        Self {
            next,
            filter,
            class_name: None,
        }
    }
}

impl<C: ClassVisitor> ClassVisitor for CoverageClassVisitor<'_, C> {
    fn delegate(&mut self) -> Option<&mut dyn ClassVisitor> {
        Some(&mut self.next)
    }

    fn visit(&mut self, header: &ClassHeader) {
        self.class_name = Some(header.name.clone());
        self.next.visit(header);
    }

    fn visit_method(&mut self, method: &MethodDescription) -> Option<Box<dyn MethodVisitor + '_>> {
        debug_assert!(self.class_name.is_some(), "method visited before class header");
        let class_name = self.class_name.clone().unwrap_or_default();
        let filter = self.filter;
        let next = self.next.visit_method(method)?;
        Some(Box::new(CoverageMethodVisitor::new(next, class_name, filter)))
    }

    fn visit_end(&mut self) {
        self.next.visit_end();
        self.class_name = None;
    }
}

/// Injects a probe for the owning class at method entry and one per field access to another
/// class accepted by the filter.
pub struct CoverageMethodVisitor<'a> {
    next: Box<dyn MethodVisitor + 'a>,
    class_name: String,
    filter: &'a CoverageInstrumentationFilter,
}

impl<'a> CoverageMethodVisitor<'a> {
    pub fn new(
        next: Box<dyn MethodVisitor + 'a>,
        class_name: String,
        filter: &'a CoverageInstrumentationFilter,
    ) -> Self {
        Self {
            next,
            class_name,
            filter,
        }
    }
}

impl MethodVisitor for CoverageMethodVisitor<'_> {
    fn delegate(&mut self) -> Option<&mut dyn MethodVisitor> {
        Some(self.next.as_mut())
    }

    fn visit_code(&mut self) {
        self.next.visit_code();
        insert_coverage_probe(self.next.as_mut(), &self.class_name);
    }

    fn visit_field_insn(&mut self, opcode: u8, owner: &str, name: &str, descriptor: &str) {
        if owner != self.class_name && self.filter.test(owner) {
            insert_coverage_probe(self.next.as_mut(), owner);
        }
        self.next.visit_field_insn(opcode, owner, name, descriptor);
    }

    fn visit_maxs(&mut self, max_stack: u16, max_locals: u16) {
        self.next
            .visit_maxs(max_stack.saturating_add(PROBE_STACK_SIZE), max_locals);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::writer::tests::{class_with_method, method_events};
    use crate::coverage;
    use crate::opcodes;

    const PROBE: &str =
        "method 0xb8 datadog/trace/api/civisibility/coverage/CoveragePerTestBridge.recordCoverage(Ljava/lang/Class;)V";

    fn sample() -> Vec<u8> {
        class_with_method(
            "com/example/Service",
            MethodDescription::new(opcodes::ACC_PUBLIC, "handle", "()I"),
            |visitor| {
                visitor.visit_field_insn(
                    opcodes::GETSTATIC,
                    "com/example/Config",
                    "LIMIT",
                    "I",
                );
                visitor.visit_var_insn(opcodes::ALOAD, 0);
                visitor.visit_field_insn(opcodes::GETFIELD, "com/example/Service", "count", "I");
                visitor.visit_insn(opcodes::IADD);
                visitor.visit_field_insn(opcodes::GETSTATIC, "java/lang/Integer", "MAX_VALUE", "I");
                visitor.visit_insn(opcodes::IADD);
                visitor.visit_insn(opcodes::IRETURN);
            },
        )
    }

    #[test]
    fn probes_method_entry_and_foreign_field_access() {
        let filter = CoverageInstrumentationFilter::new(["com/example/"], Vec::<String>::new());

        let bytes = coverage::instrument(&sample(), &filter)
            .expect("instrument")
            .expect("class included");

        let events = method_events(&bytes, "handle");
        assert_eq!(
            events,
            vec![
                "code".to_string(),
                "ldc Class(\"com/example/Service\")".to_string(),
                PROBE.to_string(),
                "ldc Class(\"com/example/Config\")".to_string(),
                PROBE.to_string(),
                "field 0xb2 com/example/Config.LIMIT:I".to_string(),
                "var 0x19 0".to_string(),
                "field 0xb4 com/example/Service.count:I".to_string(),
                "insn 0x60".to_string(),
                "field 0xb2 java/lang/Integer.MAX_VALUE:I".to_string(),
                "insn 0x60".to_string(),
                "insn 0xac".to_string(),
                "maxs 4 1".to_string(),
                "end".to_string(),
            ]
        );
    }

    #[test]
    fn excluded_class_is_left_alone() {
        let filter = CoverageInstrumentationFilter::new(["org/other/"], Vec::<String>::new());
        assert_eq!(coverage::instrument(&sample(), &filter).expect("instrument"), None);
    }
}
