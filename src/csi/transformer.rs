use tracing::debug;

use crate::bytecode::{
    ClassFileResult, ClassReader, ClassVisitor, ClassWriter, Constant, Handle, MethodVisitor,
};
use crate::csi::advice::{AdviceType, CallSiteAdvice, InvokeDynamicSite, InvokeSite};
use crate::csi::{Advices, CallSites};
use crate::ir::MethodDescription;
use crate::opcodes;

/// Result of rewriting one class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallSiteTransformation {
    pub bytes: Vec<u8>,
    /// Number of call sites rewritten.
    pub rewrites: usize,
    /// Helper classes needed by the advices that fired.
    pub helpers: Vec<String>,
}

/// Rewrites the call sites of a class matching the registered pointcuts.
#[derive(Clone, Debug)]
pub struct CallSiteTransformer {
    advices: Advices,
}

impl CallSiteTransformer {
    pub fn new(call_sites: &CallSites) -> Self {
        Self {
            advices: call_sites.advices(),
        }
    }

    /// Returns `None` when no call site of the class was rewritten.
    pub fn transform(&self, bytes: &[u8]) -> ClassFileResult<Option<CallSiteTransformation>> {
        let advices = self.advices.find_advices(bytes);
        if advices.is_empty() {
            return Ok(None);
        }
        let reader = ClassReader::new(bytes)?;
        let mut writer = ClassWriter::from_reader(&reader, ClassWriter::COMPUTE_MAXS);
        let mut visitor = CallSiteClassVisitor::new(&mut writer, &advices);
        reader.accept(&mut visitor)?;
        let rewrites = visitor.rewrites();
        if rewrites == 0 {
            return Ok(None);
        }
        debug!(class = reader.name()?, rewrites, "rewrote call sites");
        Ok(Some(CallSiteTransformation {
            bytes: writer.to_bytes()?,
            rewrites,
            helpers: advices.helpers(),
        }))
    }
}

pub struct CallSiteClassVisitor<'a, C> {
    next: C,
    advices: &'a Advices,
    rewrites: usize,
}

impl<'a, C: ClassVisitor> CallSiteClassVisitor<'a, C> {
    pub fn new(next: C, advices: &'a Advices) -> Self {
        Self {
            next,
            advices,
            rewrites: 0,
        }
    }

    pub fn rewrites(&self) -> usize {
        self.rewrites
    }
}

impl<C: ClassVisitor> ClassVisitor for CallSiteClassVisitor<'_, C> {
    fn delegate(&mut self) -> Option<&mut dyn ClassVisitor> {
        Some(&mut self.next)
    }

    fn visit_method(&mut self, method: &MethodDescription) -> Option<Box<dyn MethodVisitor + '_>> {
        let next = self.next.visit_method(method)?;
        Some(Box::new(CallSiteMethodVisitor {
            next,
            advices: self.advices,
            rewrites: &mut self.rewrites,
            in_constructor: method.is_constructor(),
            pending_new: 0,
        }))
    }
}

/// Hands matching invoke instructions to their advice.
///
/// Inside a constructor, an `INVOKESPECIAL <init>` with no pending `NEW` is the
/// `super(...)`/`this(...)` call; only after-advices apply there.
pub struct CallSiteMethodVisitor<'a> {
    next: Box<dyn MethodVisitor + 'a>,
    advices: &'a Advices,
    rewrites: &'a mut usize,
    in_constructor: bool,
    pending_new: usize,
}

impl MethodVisitor for CallSiteMethodVisitor<'_> {
    fn delegate(&mut self) -> Option<&mut dyn MethodVisitor> {
        Some(self.next.as_mut())
    }

    fn visit_type_insn(&mut self, opcode: u8, type_name: &str) {
        if opcode == opcodes::NEW {
            self.pending_new += 1;
        }
        self.next.visit_type_insn(opcode, type_name);
    }

    fn visit_method_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) {
        let mut super_constructor = false;
        if opcode == opcodes::INVOKESPECIAL && name == "<init>" {
            if self.pending_new == 0 {
                super_constructor = self.in_constructor;
            } else {
                self.pending_new -= 1;
            }
        }
        let site = InvokeSite {
            opcode,
            owner,
            name,
            descriptor,
            is_interface,
            super_constructor,
        };
        let call_site = self.advices.find_advice(owner, name, descriptor);
        match call_site {
            Some(call_site)
                if !(super_constructor && call_site.advice_type != AdviceType::After) =>
            {
                if let CallSiteAdvice::Invoke(advice) = &call_site.advice {
                    advice.apply(self.next.as_mut(), &site);
                    *self.rewrites += 1;
                    return;
                }
                site.emit(self.next.as_mut());
            }
            _ => site.emit(self.next.as_mut()),
        }
    }

    fn visit_invoke_dynamic_insn(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap: &Handle,
        arguments: &[Constant],
    ) {
        let site = InvokeDynamicSite {
            name,
            descriptor,
            bootstrap,
            arguments,
        };
        match self
            .advices
            .find_invoke_dynamic_advice(bootstrap)
            .map(|call_site| &call_site.advice)
        {
            Some(CallSiteAdvice::InvokeDynamic(advice)) => {
                advice.apply(self.next.as_mut(), &site);
                *self.rewrites += 1;
            }
            _ => site.emit(self.next.as_mut()),
        }
    }
}
