use std::sync::atomic::{AtomicU32, Ordering};

use crate::ir::{FieldDescription, MethodDescription};

/// Position marker inside a method body. Labels are unique per process so visitors can mint
/// new ones without coordinating with the reader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(u32);

impl Label {
    pub fn new() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(1);
        Label(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(&self) -> u32 {
        self.0
    }
}

impl Default for Label {
    fn default() -> Self {
        Label::new()
    }
}

/// Method handle constant (`CONSTANT_MethodHandle`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Handle {
    pub kind: u8,
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub is_interface: bool,
}

impl Handle {
    pub fn new(kind: u8, owner: &str, name: &str, descriptor: &str, is_interface: bool) -> Self {
        Self {
            kind,
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            is_interface,
        }
    }
}

/// Dynamically computed constant (`CONSTANT_Dynamic`).
#[derive(Clone, Debug, PartialEq)]
pub struct ConstantDynamic {
    pub name: String,
    pub descriptor: String,
    pub bootstrap: Handle,
    pub arguments: Vec<Constant>,
}

/// Loadable constant, as pushed by `LDC` or passed to a bootstrap method.
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    /// Internal name or array descriptor.
    Class(String),
    MethodType(String),
    MethodHandle(Handle),
    Dynamic(Box<ConstantDynamic>),
}

impl Constant {
    /// True when the constant takes two stack slots and needs `LDC2_W`.
    pub fn is_wide(&self) -> bool {
        match self {
            Constant::Long(_) | Constant::Double(_) => true,
            Constant::Dynamic(dynamic) => {
                dynamic.descriptor == "J" || dynamic.descriptor == "D"
            }
            _ => false,
        }
    }
}

/// Stack map verification type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    Object(String),
    /// Value created by the `NEW` instruction at the label.
    Uninitialized(Label),
}

/// Stack map frame in its compressed form. The offset delta is implied by the position the
/// frame is visited at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Same,
    SameLocals1StackItem(VerificationType),
    Chop(u8),
    Append(Vec<VerificationType>),
    Full {
        locals: Vec<VerificationType>,
        stack: Vec<VerificationType>,
    },
}

/// Class file header as seen by class visitors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassHeader {
    pub minor_version: u16,
    pub major_version: u16,
    pub access: u16,
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
}

/// Attribute passed through without interpretation. Its payload may reference constant pool
/// entries of the class it was read from, identified by `pool_fingerprint`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawAttribute {
    pub name: String,
    pub data: Vec<u8>,
    pub pool_fingerprint: u64,
}

/// Visitor over the instructions and metadata of a single method.
///
/// Every method forwards to [`MethodVisitor::delegate`] by default, so adapters only override
/// the events they rewrite.
pub trait MethodVisitor {
    fn delegate(&mut self) -> Option<&mut dyn MethodVisitor> {
        None
    }

    fn visit_attribute(&mut self, attribute: &RawAttribute) {
        if let Some(next) = self.delegate() {
            next.visit_attribute(attribute);
        }
    }

    /// Start of the method body. Not called for abstract or native methods.
    fn visit_code(&mut self) {
        if let Some(next) = self.delegate() {
            next.visit_code();
        }
    }

    fn visit_frame(&mut self, frame: &Frame) {
        if let Some(next) = self.delegate() {
            next.visit_frame(frame);
        }
    }

    fn visit_insn(&mut self, opcode: u8) {
        if let Some(next) = self.delegate() {
            next.visit_insn(opcode);
        }
    }

    /// `BIPUSH`, `SIPUSH` or `NEWARRAY`.
    fn visit_int_insn(&mut self, opcode: u8, operand: i32) {
        if let Some(next) = self.delegate() {
            next.visit_int_insn(opcode, operand);
        }
    }

    /// Load, store and `RET` instructions. Short forms such as `ALOAD_0` are reported with
    /// their long opcode.
    fn visit_var_insn(&mut self, opcode: u8, var: u16) {
        if let Some(next) = self.delegate() {
            next.visit_var_insn(opcode, var);
        }
    }

    /// `NEW`, `ANEWARRAY`, `CHECKCAST` or `INSTANCEOF`.
    fn visit_type_insn(&mut self, opcode: u8, type_name: &str) {
        if let Some(next) = self.delegate() {
            next.visit_type_insn(opcode, type_name);
        }
    }

    fn visit_field_insn(&mut self, opcode: u8, owner: &str, name: &str, descriptor: &str) {
        if let Some(next) = self.delegate() {
            next.visit_field_insn(opcode, owner, name, descriptor);
        }
    }

    fn visit_method_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) {
        if let Some(next) = self.delegate() {
            next.visit_method_insn(opcode, owner, name, descriptor, is_interface);
        }
    }

    fn visit_invoke_dynamic_insn(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap: &Handle,
        arguments: &[Constant],
    ) {
        if let Some(next) = self.delegate() {
            next.visit_invoke_dynamic_insn(name, descriptor, bootstrap, arguments);
        }
    }

    /// Branches. `GOTO_W` and `JSR_W` are reported as `GOTO` and `JSR`.
    fn visit_jump_insn(&mut self, opcode: u8, label: Label) {
        if let Some(next) = self.delegate() {
            next.visit_jump_insn(opcode, label);
        }
    }

    fn visit_label(&mut self, label: Label) {
        if let Some(next) = self.delegate() {
            next.visit_label(label);
        }
    }

    fn visit_ldc_insn(&mut self, constant: &Constant) {
        if let Some(next) = self.delegate() {
            next.visit_ldc_insn(constant);
        }
    }

    fn visit_iinc_insn(&mut self, var: u16, increment: i16) {
        if let Some(next) = self.delegate() {
            next.visit_iinc_insn(var, increment);
        }
    }

    fn visit_table_switch_insn(&mut self, min: i32, max: i32, default: Label, labels: &[Label]) {
        if let Some(next) = self.delegate() {
            next.visit_table_switch_insn(min, max, default, labels);
        }
    }

    fn visit_lookup_switch_insn(&mut self, default: Label, keys: &[i32], labels: &[Label]) {
        if let Some(next) = self.delegate() {
            next.visit_lookup_switch_insn(default, keys, labels);
        }
    }

    fn visit_multi_a_new_array_insn(&mut self, descriptor: &str, dimensions: u8) {
        if let Some(next) = self.delegate() {
            next.visit_multi_a_new_array_insn(descriptor, dimensions);
        }
    }

    /// Exception handler range. Reported right after [`MethodVisitor::visit_code`].
    fn visit_try_catch_block(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
    ) {
        if let Some(next) = self.delegate() {
            next.visit_try_catch_block(start, end, handler, catch_type);
        }
    }

    fn visit_local_variable(
        &mut self,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
        start: Label,
        end: Label,
        index: u16,
    ) {
        if let Some(next) = self.delegate() {
            next.visit_local_variable(name, descriptor, signature, start, end, index);
        }
    }

    fn visit_line_number(&mut self, line: u16, start: Label) {
        if let Some(next) = self.delegate() {
            next.visit_line_number(line, start);
        }
    }

    fn visit_maxs(&mut self, max_stack: u16, max_locals: u16) {
        if let Some(next) = self.delegate() {
            next.visit_maxs(max_stack, max_locals);
        }
    }

    fn visit_end(&mut self) {
        if let Some(next) = self.delegate() {
            next.visit_end();
        }
    }
}

/// Visitor over a class file: header, attributes, fields, then methods.
pub trait ClassVisitor {
    fn delegate(&mut self) -> Option<&mut dyn ClassVisitor> {
        None
    }

    fn visit(&mut self, header: &ClassHeader) {
        if let Some(next) = self.delegate() {
            next.visit(header);
        }
    }

    fn visit_attribute(&mut self, attribute: &RawAttribute) {
        if let Some(next) = self.delegate() {
            next.visit_attribute(attribute);
        }
    }

    fn visit_field(&mut self, field: &FieldDescription, attributes: &[RawAttribute]) {
        if let Some(next) = self.delegate() {
            next.visit_field(field, attributes);
        }
    }

    /// Returns the visitor for the method body, or `None` to drop the method.
    fn visit_method(&mut self, method: &MethodDescription) -> Option<Box<dyn MethodVisitor + '_>> {
        self.delegate().and_then(|next| next.visit_method(method))
    }

    fn visit_end(&mut self) {
        if let Some(next) = self.delegate() {
            next.visit_end();
        }
    }
}

impl<T: ClassVisitor + ?Sized> ClassVisitor for &mut T {
    fn delegate(&mut self) -> Option<&mut dyn ClassVisitor> {
        None
    }

    fn visit(&mut self, header: &ClassHeader) {
        (**self).visit(header);
    }

    fn visit_attribute(&mut self, attribute: &RawAttribute) {
        (**self).visit_attribute(attribute);
    }

    fn visit_field(&mut self, field: &FieldDescription, attributes: &[RawAttribute]) {
        (**self).visit_field(field, attributes);
    }

    fn visit_method(&mut self, method: &MethodDescription) -> Option<Box<dyn MethodVisitor + '_>> {
        (**self).visit_method(method)
    }

    fn visit_end(&mut self) {
        (**self).visit_end();
    }
}

/// Method visitor that records the events it sees, used by tests to inspect rewritten code.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingMethodVisitor {
    pub(crate) events: Vec<String>,
    /// Frames are kept apart so instruction events stay comparable across encodings.
    pub(crate) frames: Vec<Frame>,
}

#[cfg(test)]
impl MethodVisitor for RecordingMethodVisitor {
    fn visit_code(&mut self) {
        self.events.push("code".to_string());
    }

    fn visit_frame(&mut self, frame: &Frame) {
        self.frames.push(frame.clone());
    }

    fn visit_insn(&mut self, opcode: u8) {
        self.events.push(format!("insn {opcode:#04x}"));
    }

    fn visit_int_insn(&mut self, opcode: u8, operand: i32) {
        self.events.push(format!("int {opcode:#04x} {operand}"));
    }

    fn visit_var_insn(&mut self, opcode: u8, var: u16) {
        self.events.push(format!("var {opcode:#04x} {var}"));
    }

    fn visit_type_insn(&mut self, opcode: u8, type_name: &str) {
        self.events.push(format!("type {opcode:#04x} {type_name}"));
    }

    fn visit_field_insn(&mut self, opcode: u8, owner: &str, name: &str, descriptor: &str) {
        self.events
            .push(format!("field {opcode:#04x} {owner}.{name}:{descriptor}"));
    }

    fn visit_method_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
        _is_interface: bool,
    ) {
        self.events
            .push(format!("method {opcode:#04x} {owner}.{name}{descriptor}"));
    }

    fn visit_invoke_dynamic_insn(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap: &Handle,
        _arguments: &[Constant],
    ) {
        self.events.push(format!(
            "indy {name}{descriptor} {}.{}",
            bootstrap.owner, bootstrap.name
        ));
    }

    fn visit_jump_insn(&mut self, opcode: u8, _label: Label) {
        self.events.push(format!("jump {opcode:#04x}"));
    }

    fn visit_ldc_insn(&mut self, constant: &Constant) {
        self.events.push(format!("ldc {constant:?}"));
    }

    fn visit_iinc_insn(&mut self, var: u16, increment: i16) {
        self.events.push(format!("iinc {var} {increment}"));
    }

    fn visit_maxs(&mut self, max_stack: u16, max_locals: u16) {
        self.events.push(format!("maxs {max_stack} {max_locals}"));
    }

    fn visit_end(&mut self) {
        self.events.push("end".to_string());
    }
}

#[cfg(test)]
impl MethodVisitor for &mut RecordingMethodVisitor {
    fn delegate(&mut self) -> Option<&mut dyn MethodVisitor> {
        Some(&mut **self)
    }
}
