//! Operand stack helpers for splicing advice calls around an existing call site.

use crate::bytecode::{Constant, MethodVisitor};
use crate::descriptor::JvmType;
use crate::opcodes;

const OBJECT: &str = "java/lang/Object";

/// How [`dup_parameters`] leaves the duplicated parameters on the stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackDupMode {
    /// `[p1..pn]` becomes `[p1..pn, p1..pn]`.
    Copy,
    /// `[p1..pn]` becomes `[Object[]{p1..pn}, p1..pn]`.
    PrependArray,
    /// `[p1..pn]` becomes `[p1..pn, Object[]{p1..pn}]`.
    AppendArray,
}

/// Duplicates the topmost values, described by `parameters` (bottom first).
pub fn dup_parameters(visitor: &mut dyn MethodVisitor, parameters: &[JvmType], mode: StackDupMode) {
    match mode {
        StackDupMode::Copy => {
            let slots: usize = parameters.iter().map(JvmType::size).sum();
            match (parameters.len(), slots) {
                (0, _) => {}
                (1, 1) => visitor.visit_insn(opcodes::DUP),
                (1, 2) | (2, 2) => visitor.visit_insn(opcodes::DUP2),
                _ => {
                    pack_parameters(visitor, parameters);
                    unpack_parameters(visitor, parameters);
                    unpack_parameters(visitor, parameters);
                    visitor.visit_insn(opcodes::POP);
                }
            }
        }
        StackDupMode::PrependArray => {
            pack_parameters(visitor, parameters);
            visitor.visit_insn(opcodes::DUP);
            unpack_parameters(visitor, parameters);
            visitor.visit_insn(opcodes::POP);
        }
        StackDupMode::AppendArray => {
            pack_parameters(visitor, parameters);
            unpack_parameters(visitor, parameters);
        }
    }
}

/// `[p1..pn]` becomes `[Object[]{p1..pn}]`, boxing primitives.
pub fn pack_parameters(visitor: &mut dyn MethodVisitor, parameters: &[JvmType]) {
    push_integer(visitor, parameters.len() as i32);
    visitor.visit_type_insn(opcodes::ANEWARRAY, OBJECT);
    for (index, parameter) in parameters.iter().enumerate().rev() {
        // [.., p, array] -> [.., array, array, p]
        if parameter.size() == 2 {
            visitor.visit_insn(opcodes::DUP_X2);
            visitor.visit_insn(opcodes::DUP_X2);
            visitor.visit_insn(opcodes::POP);
        } else {
            visitor.visit_insn(opcodes::DUP_X1);
            visitor.visit_insn(opcodes::SWAP);
        }
        box_value(visitor, parameter);
        push_integer(visitor, index as i32);
        visitor.visit_insn(opcodes::SWAP);
        visitor.visit_insn(opcodes::AASTORE);
    }
}

/// `[array]` becomes `[p1..pn, array]`, unboxing and casting each element.
pub fn unpack_parameters(visitor: &mut dyn MethodVisitor, parameters: &[JvmType]) {
    for (index, parameter) in parameters.iter().enumerate() {
        visitor.visit_insn(opcodes::DUP);
        push_integer(visitor, index as i32);
        visitor.visit_insn(opcodes::AALOAD);
        unbox_value(visitor, parameter);
        if parameter.size() == 2 {
            visitor.visit_insn(opcodes::DUP2_X1);
            visitor.visit_insn(opcodes::POP2);
        } else {
            visitor.visit_insn(opcodes::SWAP);
        }
    }
}

/// Pushes `value` with the shortest instruction.
pub fn push_integer(visitor: &mut dyn MethodVisitor, value: i32) {
    match value {
        -1..=5 => visitor.visit_insn((opcodes::ICONST_0 as i32 + value) as u8),
        -128..=127 => visitor.visit_int_insn(opcodes::BIPUSH, value),
        -32768..=32767 => visitor.visit_int_insn(opcodes::SIPUSH, value),
        _ => visitor.visit_ldc_insn(&Constant::Integer(value)),
    }
}

/// Pushes an `Object[]` holding `constants`, boxing primitive ones.
pub fn push_constant_array(visitor: &mut dyn MethodVisitor, constants: &[Constant]) {
    push_integer(visitor, constants.len() as i32);
    visitor.visit_type_insn(opcodes::ANEWARRAY, OBJECT);
    for (index, constant) in constants.iter().enumerate() {
        visitor.visit_insn(opcodes::DUP);
        push_integer(visitor, index as i32);
        visitor.visit_ldc_insn(constant);
        box_value(visitor, &constant_type(constant));
        visitor.visit_insn(opcodes::AASTORE);
    }
}

fn constant_type(constant: &Constant) -> JvmType {
    match constant {
        Constant::Integer(_) => JvmType::Int,
        Constant::Float(_) => JvmType::Float,
        Constant::Long(_) => JvmType::Long,
        Constant::Double(_) => JvmType::Double,
        Constant::String(_) => JvmType::object("java/lang/String"),
        Constant::Class(_) => JvmType::object("java/lang/Class"),
        Constant::MethodType(_) => JvmType::object("java/lang/invoke/MethodType"),
        Constant::MethodHandle(_) => JvmType::object("java/lang/invoke/MethodHandle"),
        Constant::Dynamic(dynamic) => {
            JvmType::from_descriptor(&dynamic.descriptor)
                .unwrap_or_else(|_| JvmType::object(OBJECT))
        }
    }
}

/// Wrapper class and unboxing method of a primitive type.
fn wrapper(ty: &JvmType) -> Option<(&'static str, &'static str)> {
    match ty {
        JvmType::Boolean => Some(("java/lang/Boolean", "booleanValue")),
        JvmType::Char => Some(("java/lang/Character", "charValue")),
        JvmType::Byte => Some(("java/lang/Byte", "byteValue")),
        JvmType::Short => Some(("java/lang/Short", "shortValue")),
        JvmType::Int => Some(("java/lang/Integer", "intValue")),
        JvmType::Float => Some(("java/lang/Float", "floatValue")),
        JvmType::Long => Some(("java/lang/Long", "longValue")),
        JvmType::Double => Some(("java/lang/Double", "doubleValue")),
        _ => None,
    }
}

/// Boxes the primitive on top of the stack. References are left alone.
pub fn box_value(visitor: &mut dyn MethodVisitor, ty: &JvmType) {
    if let Some((owner, _)) = wrapper(ty) {
        let descriptor = format!("({})L{owner};", ty.descriptor());
        visitor.visit_method_insn(opcodes::INVOKESTATIC, owner, "valueOf", &descriptor, false);
    }
}

/// Turns the `Object` on top of the stack into a value of `ty`.
pub fn unbox_value(visitor: &mut dyn MethodVisitor, ty: &JvmType) {
    match wrapper(ty) {
        Some((owner, method)) => {
            visitor.visit_type_insn(opcodes::CHECKCAST, owner);
            let descriptor = format!("(){}", ty.descriptor());
            visitor.visit_method_insn(opcodes::INVOKEVIRTUAL, owner, method, &descriptor, false);
        }
        None => {
            let name = ty.internal_name();
            if name != OBJECT {
                visitor.visit_type_insn(opcodes::CHECKCAST, &name);
            }
        }
    }
}

/// Pops a value of `ty`, if any.
pub fn pop_value(visitor: &mut dyn MethodVisitor, ty: &JvmType) {
    match ty.size() {
        0 => {}
        1 => visitor.visit_insn(opcodes::POP),
        _ => visitor.visit_insn(opcodes::POP2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::visitor::RecordingMethodVisitor;

    /// Simulates the stack effect of the recorded events on symbolic values.
    fn slot_of(value: &str) -> usize {
        value.trim_start_matches("int:").parse().expect("index")
    }

    fn array_of(value: &str) -> usize {
        value.trim_start_matches("array:").parse().expect("array")
    }

    fn simulate(initial: &[&str], events: &[String]) -> Vec<String> {
        let mut stack: Vec<String> = initial.iter().map(|value| value.to_string()).collect();
        let mut arrays: Vec<Vec<Option<String>>> = Vec::new();
        for event in events {
            let parts: Vec<&str> = event.split(' ').collect();
            match (parts[0], parts.get(1).copied()) {
                ("insn", Some(op)) => {
                    let op = u8::from_str_radix(op.trim_start_matches("0x"), 16).expect("opcode");
                    match op {
                        opcodes::ICONST_0..=opcodes::ICONST_5 => {
                            let value = (op - opcodes::ICONST_0) as i32;
                            stack.push(format!("int:{value}"));
                        }
                        opcodes::DUP => {
                            let top = stack.last().cloned().expect("dup operand");
                            stack.push(top);
                        }
                        opcodes::DUP_X1 => {
                            let a = stack.pop().expect("a");
                            let b = stack.pop().expect("b");
                            stack.extend([a.clone(), b, a]);
                        }
                        opcodes::SWAP => {
                            let a = stack.pop().expect("a");
                            let b = stack.pop().expect("b");
                            stack.extend([a, b]);
                        }
                        opcodes::POP => {
                            stack.pop();
                        }
                        opcodes::AASTORE => {
                            let value = stack.pop().expect("value");
                            let index = stack.pop().expect("index");
                            let array = stack.pop().expect("array");
                            let slot = slot_of(&index);
                            let id = array_of(&array);
                            arrays[id][slot] = Some(value);
                        }
                        opcodes::AALOAD => {
                            let index = stack.pop().expect("index");
                            let array = stack.pop().expect("array");
                            let slot = slot_of(&index);
                            let id = array_of(&array);
                            stack.push(arrays[id][slot].clone().expect("stored element"));
                        }
                        other => panic!("unexpected opcode {other:#04x}"),
                    }
                }
                ("type", Some(_)) if parts[2] == OBJECT => {
                    let length = stack.pop().expect("length");
                    let length: usize = length.trim_start_matches("int:").parse().expect("length");
                    arrays.push(vec![None; length]);
                    stack.push(format!("array:{}", arrays.len() - 1));
                }
                ("type", Some(_)) => {}
                _ => panic!("unexpected event {event}"),
            }
        }
        stack
    }

    fn references(count: usize) -> Vec<JvmType> {
        vec![JvmType::object(OBJECT); count]
    }

    #[test]
    fn copies_small_parameter_lists_with_dup() {
        let mut recorder = RecordingMethodVisitor::default();
        dup_parameters(&mut recorder, &[JvmType::Long], StackDupMode::Copy);
        dup_parameters(&mut recorder, &references(2), StackDupMode::Copy);
        dup_parameters(&mut recorder, &[], StackDupMode::Copy);

        assert_eq!(recorder.events, vec!["insn 0x5c", "insn 0x5c"]);
    }

    #[test]
    fn copies_larger_parameter_lists_through_an_array() {
        let mut recorder = RecordingMethodVisitor::default();
        dup_parameters(&mut recorder, &references(3), StackDupMode::Copy);

        let stack = simulate(&["a", "b", "c"], &recorder.events);
        assert_eq!(stack, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn array_modes_place_the_array_around_the_parameters() {
        let mut prepend = RecordingMethodVisitor::default();
        dup_parameters(&mut prepend, &references(2), StackDupMode::PrependArray);
        let stack = simulate(&["a", "b"], &prepend.events);
        assert_eq!(stack, vec!["array:0", "a", "b"]);

        let mut append = RecordingMethodVisitor::default();
        dup_parameters(&mut append, &references(2), StackDupMode::AppendArray);
        let stack = simulate(&["a", "b"], &append.events);
        assert_eq!(stack, vec!["a", "b", "array:0"]);
    }

    #[test]
    fn push_integer_picks_shortest_form() {
        let mut recorder = RecordingMethodVisitor::default();
        push_integer(&mut recorder, -1);
        push_integer(&mut recorder, 100);
        push_integer(&mut recorder, 1000);
        push_integer(&mut recorder, 100_000);

        assert_eq!(
            recorder.events,
            vec!["insn 0x02", "int 0x10 100", "int 0x11 1000", "ldc Integer(100000)"]
        );
    }

    #[test]
    fn boxes_and_unboxes_primitives() {
        let mut recorder = RecordingMethodVisitor::default();
        box_value(&mut recorder, &JvmType::Int);
        unbox_value(&mut recorder, &JvmType::Int);
        unbox_value(&mut recorder, &JvmType::object(OBJECT));
        unbox_value(&mut recorder, &JvmType::object("java/lang/String"));

        assert_eq!(
            recorder.events,
            vec![
                "method 0xb8 java/lang/Integer.valueOf(I)Ljava/lang/Integer;",
                "type 0xc0 java/lang/Integer",
                "method 0xb6 java/lang/Integer.intValue()I",
                "type 0xc0 java/lang/String",
            ]
        );
    }
}
