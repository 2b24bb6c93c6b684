use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bytecode::{Constant, Handle, MethodVisitor};
use crate::csi::stack::{self, StackDupMode};
use crate::descriptor::{self, JvmType};
use crate::opcodes;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdviceType {
    Before,
    After,
    Around,
}

/// A method invocation about to be rewritten.
#[derive(Clone, Copy, Debug)]
pub struct InvokeSite<'a> {
    pub opcode: u8,
    pub owner: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
    pub is_interface: bool,
    /// `super(...)`/`this(...)` call inside a constructor, where the receiver is the
    /// uninitialized `this` rather than the result of a `NEW`.
    pub super_constructor: bool,
}

impl InvokeSite<'_> {
    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    /// Emits the original instruction.
    pub fn emit(&self, visitor: &mut dyn MethodVisitor) {
        visitor.visit_method_insn(
            self.opcode,
            self.owner,
            self.name,
            self.descriptor,
            self.is_interface,
        );
    }
}

#[derive(Clone, Copy, Debug)]
pub struct InvokeDynamicSite<'a> {
    pub name: &'a str,
    pub descriptor: &'a str,
    pub bootstrap: &'a Handle,
    pub arguments: &'a [Constant],
}

impl InvokeDynamicSite<'_> {
    pub fn emit(&self, visitor: &mut dyn MethodVisitor) {
        visitor.visit_invoke_dynamic_insn(
            self.name,
            self.descriptor,
            self.bootstrap,
            self.arguments,
        );
    }
}

/// Rewrites `INVOKEVIRTUAL`, `INVOKESTATIC`, `INVOKEINTERFACE` and `INVOKESPECIAL` sites.
/// Implementations are stateless and emit the original call themselves when they keep it.
pub trait InvokeAdvice: Send + Sync {
    fn apply(&self, visitor: &mut dyn MethodVisitor, site: &InvokeSite<'_>);
}

/// Rewrites `INVOKEDYNAMIC` sites, matched by their bootstrap method.
pub trait InvokeDynamicAdvice: Send + Sync {
    fn apply(&self, visitor: &mut dyn MethodVisitor, site: &InvokeDynamicSite<'_>);
}

#[derive(Clone)]
pub enum CallSiteAdvice {
    Invoke(Arc<dyn InvokeAdvice>),
    InvokeDynamic(Arc<dyn InvokeDynamicAdvice>),
}

impl fmt::Debug for CallSiteAdvice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallSiteAdvice::Invoke(_) => f.write_str("CallSiteAdvice::Invoke"),
            CallSiteAdvice::InvokeDynamic(_) => f.write_str("CallSiteAdvice::InvokeDynamic"),
        }
    }
}

/// Static advice method called from the rewritten site.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdviceMethod {
    pub owner: String,
    pub name: String,
    /// Explicit descriptor, or `None` to derive it from each call site.
    pub descriptor: Option<String>,
}

/// Advice built from a declaration: calls a static method before, after or instead of the
/// original call.
#[derive(Clone, Debug)]
pub struct DeclaredAdvice {
    pub advice_type: AdviceType,
    pub method: AdviceMethod,
    /// Pass the call arguments as one `Object[]` instead of one parameter each.
    pub all_arguments: bool,
    /// Append the bootstrap constant arguments as an `Object[]` (invokedynamic only).
    pub bootstrap_arguments: bool,
}

impl DeclaredAdvice {
    fn invoke_advice(&self, visitor: &mut dyn MethodVisitor, derived: impl FnOnce() -> String) {
        let descriptor = self.method.descriptor.clone().unwrap_or_else(derived);
        visitor.visit_method_insn(
            opcodes::INVOKESTATIC,
            &self.method.owner,
            &self.method.name,
            &descriptor,
            false,
        );
    }

    fn apply_constructor(
        &self,
        visitor: &mut dyn MethodVisitor,
        site: &InvokeSite<'_>,
        arguments: &[JvmType],
    ) {
        let owner = JvmType::from_internal_name(site.owner);
        let array = JvmType::Array("[Ljava/lang/Object;".to_string());
        let advice_arguments = |this: &JvmType| -> Vec<JvmType> {
            let mut types = vec![this.clone()];
            if self.all_arguments {
                types.push(array.clone());
            } else {
                types.extend(arguments.iter().cloned());
            }
            types
        };
        match self.advice_type {
            AdviceType::Before => {
                let mode = if self.all_arguments {
                    StackDupMode::AppendArray
                } else {
                    StackDupMode::Copy
                };
                stack::dup_parameters(visitor, arguments, mode);
                self.invoke_advice(visitor, || {
                    let types = if self.all_arguments {
                        vec![array.clone()]
                    } else {
                        arguments.to_vec()
                    };
                    descriptor::method_descriptor(&types, &JvmType::Void)
                });
                site.emit(visitor);
            }
            AdviceType::After => {
                // [receiver, args] -> [array, receiver, args], the new instance copy left by
                // `DUP` stays below and is handed to the advice with the arguments.
                stack::pack_parameters(visitor, arguments);
                visitor.visit_insn(opcodes::DUP_X1);
                stack::unpack_parameters(visitor, arguments);
                visitor.visit_insn(opcodes::POP);
                site.emit(visitor);
                if site.super_constructor {
                    // [array] -> [this, array]
                    visitor.visit_var_insn(opcodes::ALOAD, 0);
                    visitor.visit_insn(opcodes::SWAP);
                }
                if !self.all_arguments {
                    stack::unpack_parameters(visitor, arguments);
                    visitor.visit_insn(opcodes::POP);
                }
                let ret = if site.super_constructor {
                    JvmType::Void
                } else {
                    owner.clone()
                };
                let explicit = self.method.descriptor.clone();
                self.invoke_advice(visitor, || {
                    descriptor::method_descriptor(&advice_arguments(&owner), &ret)
                });
                // Nothing may stay on the stack after `super(...)`.
                if site.super_constructor {
                    if let Some(explicit_return) =
                        explicit.and_then(|explicit| descriptor::return_type(&explicit).ok())
                    {
                        stack::pop_value(visitor, &explicit_return);
                    }
                }
            }
            // Rejected when the call site is registered.
            AdviceType::Around => site.emit(visitor),
        }
    }
}

impl InvokeAdvice for DeclaredAdvice {
    fn apply(&self, visitor: &mut dyn MethodVisitor, site: &InvokeSite<'_>) {
        let Ok((arguments, ret)) = descriptor::parse_method_descriptor(site.descriptor) else {
            site.emit(visitor);
            return;
        };
        if site.is_constructor() {
            self.apply_constructor(visitor, site, &arguments);
            return;
        }
        let mut parameters = Vec::with_capacity(arguments.len() + 1);
        if site.opcode != opcodes::INVOKESTATIC {
            parameters.push(JvmType::from_internal_name(site.owner));
        }
        parameters.extend(arguments);
        apply_spread(self, visitor, &parameters, &ret, &[], |visitor| site.emit(visitor));
    }
}

impl InvokeDynamicAdvice for DeclaredAdvice {
    fn apply(&self, visitor: &mut dyn MethodVisitor, site: &InvokeDynamicSite<'_>) {
        let Ok((parameters, ret)) = descriptor::parse_method_descriptor(site.descriptor) else {
            site.emit(visitor);
            return;
        };
        let constants = if self.bootstrap_arguments {
            site.arguments
        } else {
            &[]
        };
        apply_spread(self, visitor, &parameters, &ret, constants, |visitor| {
            site.emit(visitor)
        });
    }
}

/// Shared rewriting for calls whose parameters are all on the stack.
fn apply_spread(
    advice: &DeclaredAdvice,
    visitor: &mut dyn MethodVisitor,
    parameters: &[JvmType],
    ret: &JvmType,
    constants: &[Constant],
    emit: impl FnOnce(&mut dyn MethodVisitor),
) {
    let array = JvmType::Array("[Ljava/lang/Object;".to_string());
    let mut advice_parameters = if advice.all_arguments {
        vec![array.clone()]
    } else {
        parameters.to_vec()
    };
    match advice.advice_type {
        AdviceType::Before => {
            let mode = if advice.all_arguments {
                StackDupMode::AppendArray
            } else {
                StackDupMode::Copy
            };
            stack::dup_parameters(visitor, parameters, mode);
            if advice.bootstrap_arguments {
                stack::push_constant_array(visitor, constants);
                advice_parameters.push(array.clone());
            }
            advice.invoke_advice(visitor, || {
                descriptor::method_descriptor(&advice_parameters, &JvmType::Void)
            });
            emit(visitor);
        }
        AdviceType::After => {
            let mode = if advice.all_arguments {
                StackDupMode::PrependArray
            } else {
                StackDupMode::Copy
            };
            stack::dup_parameters(visitor, parameters, mode);
            emit(visitor);
            if *ret != JvmType::Void {
                advice_parameters.push(ret.clone());
            }
            if advice.bootstrap_arguments {
                stack::push_constant_array(visitor, constants);
                advice_parameters.push(array.clone());
            }
            advice.invoke_advice(visitor, || {
                descriptor::method_descriptor(&advice_parameters, ret)
            });
        }
        AdviceType::Around => {
            if advice.bootstrap_arguments {
                stack::push_constant_array(visitor, constants);
                advice_parameters.push(array.clone());
            }
            advice.invoke_advice(visitor, || {
                descriptor::method_descriptor(&advice_parameters, ret)
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::visitor::RecordingMethodVisitor;

    fn advice(advice_type: AdviceType, all_arguments: bool) -> DeclaredAdvice {
        DeclaredAdvice {
            advice_type,
            method: AdviceMethod {
                owner: "com/example/Advices".to_string(),
                name: "onCall".to_string(),
                descriptor: None,
            },
            all_arguments,
            bootstrap_arguments: false,
        }
    }

    fn concat_site() -> InvokeSite<'static> {
        InvokeSite {
            opcode: opcodes::INVOKEVIRTUAL,
            owner: "java/lang/String",
            name: "concat",
            descriptor: "(Ljava/lang/String;)Ljava/lang/String;",
            is_interface: false,
            super_constructor: false,
        }
    }

    #[test]
    fn before_copies_receiver_and_arguments() {
        let mut recorder = RecordingMethodVisitor::default();
        InvokeAdvice::apply(&advice(AdviceType::Before, false), &mut recorder, &concat_site());

        assert_eq!(
            recorder.events,
            vec![
                "insn 0x5c",
                "method 0xb8 com/example/Advices.onCall(Ljava/lang/String;Ljava/lang/String;)V",
                "method 0xb6 java/lang/String.concat(Ljava/lang/String;)Ljava/lang/String;",
            ]
        );
    }

    #[test]
    fn after_receives_parameters_and_result() {
        let mut recorder = RecordingMethodVisitor::default();
        InvokeAdvice::apply(&advice(AdviceType::After, false), &mut recorder, &concat_site());

        assert_eq!(
            recorder.events.last().map(String::as_str),
            Some(
                "method 0xb8 com/example/Advices.onCall(Ljava/lang/String;Ljava/lang/String;Ljava/lang/String;)Ljava/lang/String;"
            )
        );
    }

    #[test]
    fn around_replaces_the_call() {
        let mut recorder = RecordingMethodVisitor::default();
        InvokeAdvice::apply(&advice(AdviceType::Around, false), &mut recorder, &concat_site());

        assert_eq!(
            recorder.events,
            vec![
                "method 0xb8 com/example/Advices.onCall(Ljava/lang/String;Ljava/lang/String;)Ljava/lang/String;"
            ]
        );
    }

    #[test]
    fn static_call_has_no_receiver() {
        let site = InvokeSite {
            opcode: opcodes::INVOKESTATIC,
            owner: "java/lang/Integer",
            name: "parseInt",
            descriptor: "(Ljava/lang/String;)I",
            is_interface: false,
            super_constructor: false,
        };
        let mut recorder = RecordingMethodVisitor::default();
        InvokeAdvice::apply(&advice(AdviceType::After, true), &mut recorder, &site);

        assert_eq!(
            recorder.events.last().map(String::as_str),
            Some("method 0xb8 com/example/Advices.onCall([Ljava/lang/Object;I)I")
        );
    }

    #[test]
    fn super_constructor_after_reloads_this() {
        let site = InvokeSite {
            opcode: opcodes::INVOKESPECIAL,
            owner: "java/lang/Object",
            name: "<init>",
            descriptor: "()V",
            is_interface: false,
            super_constructor: true,
        };
        let mut recorder = RecordingMethodVisitor::default();
        InvokeAdvice::apply(&advice(AdviceType::After, false), &mut recorder, &site);

        let events = &recorder.events;
        let init = events
            .iter()
            .position(|event| event == "method 0xb7 java/lang/Object.<init>()V")
            .expect("original call");
        assert_eq!(events[init + 1], "var 0x19 0");
        assert_eq!(
            events.last().map(String::as_str),
            Some("method 0xb8 com/example/Advices.onCall(Ljava/lang/Object;)V")
        );
    }

    #[test]
    fn bootstrap_arguments_are_appended_as_array() {
        let bootstrap = Handle::new(
            opcodes::H_INVOKESTATIC,
            "java/lang/invoke/StringConcatFactory",
            "makeConcatWithConstants",
            "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;Ljava/lang/String;[Ljava/lang/Object;)Ljava/lang/invoke/CallSite;",
            false,
        );
        let arguments = [Constant::String("\u{1}-\u{1}".to_string())];
        let site = InvokeDynamicSite {
            name: "makeConcatWithConstants",
            descriptor: "(Ljava/lang/String;I)Ljava/lang/String;",
            bootstrap: &bootstrap,
            arguments: &arguments,
        };
        let mut declared = advice(AdviceType::After, true);
        declared.bootstrap_arguments = true;
        let mut recorder = RecordingMethodVisitor::default();
        InvokeDynamicAdvice::apply(&declared, &mut recorder, &site);

        assert!(recorder
            .events
            .iter()
            .any(|event| event.starts_with("indy makeConcatWithConstants")));
        assert_eq!(
            recorder.events.last().map(String::as_str),
            Some(
                "method 0xb8 com/example/Advices.onCall([Ljava/lang/Object;Ljava/lang/String;[Ljava/lang/Object;)Ljava/lang/String;"
            )
        );
    }
}
