//! Delegating method advice: matched methods call `<advice>.onMethodEnter()` on entry and
//! `<advice>.onMethodExit()` before each return.

use crate::bytecode::{ClassVisitor, MethodVisitor};
use crate::descriptor::binary_to_internal;
use crate::ir::MethodDescription;
use crate::opcodes;
use crate::tooling::matcher::MethodMatcher;
use crate::tooling::module::MethodTransformation;

pub const ENTER_METHOD: &str = "onMethodEnter";
pub const EXIT_METHOD: &str = "onMethodExit";
pub const ADVICE_DESCRIPTOR: &str = "()V";

pub struct AdviceClassVisitor<'a, C> {
    next: C,
    transformations: &'a [MethodTransformation],
    ignore: &'a MethodMatcher,
    woven: usize,
}

impl<'a, C: ClassVisitor> AdviceClassVisitor<'a, C> {
    pub fn new(
        next: C,
        transformations: &'a [MethodTransformation],
        ignore: &'a MethodMatcher,
    ) -> Self {
        Self {
            next,
            transformations,
            ignore,
            woven: 0,
        }
    }

    /// Number of methods that received advice.
    pub fn woven(&self) -> usize {
        self.woven
    }
}

impl<C: ClassVisitor> ClassVisitor for AdviceClassVisitor<'_, C> {
    fn delegate(&mut self) -> Option<&mut dyn ClassVisitor> {
        Some(&mut self.next)
    }

    fn visit_method(&mut self, method: &MethodDescription) -> Option<Box<dyn MethodVisitor + '_>> {
        let advices: Vec<String> = if method.is_abstract() || self.ignore.matches(method) {
            Vec::new()
        } else {
            let mut advices: Vec<String> = Vec::new();
            for transformation in self.transformations {
                let advice = binary_to_internal(&transformation.advice);
                if transformation.method.matches(method) && !advices.contains(&advice) {
                    advices.push(advice);
                }
            }
            advices
        };
        let next = self.next.visit_method(method)?;
        if advices.is_empty() {
            return Some(next);
        }
        self.woven += 1;
        Some(Box::new(AdviceMethodVisitor { next, advices }))
    }
}

/// Enter advices run in declaration order, exit advices in reverse.
pub struct AdviceMethodVisitor<'a> {
    next: Box<dyn MethodVisitor + 'a>,
    advices: Vec<String>,
}

impl AdviceMethodVisitor<'_> {
    fn call(&mut self, advice: usize, method: &str) {
        self.next.visit_method_insn(
            opcodes::INVOKESTATIC,
            &self.advices[advice],
            method,
            ADVICE_DESCRIPTOR,
            false,
        );
    }
}

impl MethodVisitor for AdviceMethodVisitor<'_> {
    fn delegate(&mut self) -> Option<&mut dyn MethodVisitor> {
        Some(self.next.as_mut())
    }

    fn visit_code(&mut self) {
        self.next.visit_code();
        for advice in 0..self.advices.len() {
            self.call(advice, ENTER_METHOD);
        }
    }

    fn visit_insn(&mut self, opcode: u8) {
        if (opcodes::IRETURN..=opcodes::RETURN).contains(&opcode) {
            for advice in (0..self.advices.len()).rev() {
                self.call(advice, EXIT_METHOD);
            }
        }
        self.next.visit_insn(opcode);
    }
}
