use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::bytecode::constant_pool::SymbolTable;
use crate::bytecode::reader::{switch_padding, ClassReader};
use crate::bytecode::visitor::{
    ClassHeader, ClassVisitor, Constant, Frame, Handle, Label, MethodVisitor, RawAttribute,
    VerificationType,
};
use crate::bytecode::{ClassFileError, ClassFileResult};
use crate::cfg;
use crate::descriptor::{self, JvmType};
use crate::ir::{ExceptionHandler, FieldDescription, Instruction, MethodDescription};
use crate::opcodes;

/// Interned class header.
struct HeaderIndices {
    name: String,
    minor_version: u16,
    major_version: u16,
    access: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
}

/// Terminal class visitor producing class file bytes.
///
/// Visitors are infallible, so the first error met while interning or assembling is kept and
/// reported by [`ClassWriter::to_bytes`].
pub struct ClassWriter {
    flags: u32,
    symbols: SymbolTable,
    header: Option<HeaderIndices>,
    attributes: Vec<(u16, Vec<u8>)>,
    fields: Vec<u8>,
    field_count: u16,
    methods: Vec<u8>,
    method_count: u16,
    error: Option<ClassFileError>,
}

impl ClassWriter {
    /// Recompute `max_stack` and `max_locals` instead of trusting `visit_maxs`. The larger of
    /// the visited and computed values is kept.
    pub const COMPUTE_MAXS: u32 = 1;

    pub fn new(flags: u32) -> Self {
        Self::with_symbols(flags, SymbolTable::new())
    }

    /// Starts from the reader's constant pool and bootstrap table so unchanged constants
    /// and pass-through attributes keep their indices.
    pub fn from_reader(reader: &ClassReader<'_>, flags: u32) -> Self {
        Self::with_symbols(
            flags,
            SymbolTable::from_pool(reader.constant_pool(), reader.bootstrap_methods()),
        )
    }

    fn with_symbols(flags: u32, symbols: SymbolTable) -> Self {
        Self {
            flags,
            symbols,
            header: None,
            attributes: Vec::new(),
            fields: Vec::new(),
            field_count: 0,
            methods: Vec::new(),
            method_count: 0,
            error: None,
        }
    }

    fn record_error(&mut self, error: ClassFileError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn intern(&mut self, intern: impl FnOnce(&mut SymbolTable) -> ClassFileResult<u16>) -> u16 {
        match intern(&mut self.symbols) {
            Ok(index) => index,
            Err(error) => {
                self.record_error(error);
                0
            }
        }
    }

    /// Encodes attributes that can be copied as-is, dropping those bound to another pool.
    fn encode_raw_attributes(
        &mut self,
        attributes: &[RawAttribute],
        out: &mut Vec<(u16, Vec<u8>)>,
    ) {
        for attribute in attributes {
            if self.symbols.source_fingerprint() != Some(attribute.pool_fingerprint) {
                debug!(
                    attribute = attribute.name.as_str(),
                    "dropping attribute read from a different constant pool"
                );
                continue;
            }
            let name_index = self.intern(|symbols| symbols.utf8(&attribute.name));
            out.push((name_index, attribute.data.clone()));
        }
    }

    pub fn to_bytes(mut self) -> ClassFileResult<Vec<u8>> {
        let bootstrap_attribute = if self.symbols.bootstrap_methods().is_empty() {
            None
        } else {
            let name_index = self.intern(|symbols| symbols.utf8("BootstrapMethods"));
            let methods = self.symbols.bootstrap_methods();
            let mut data = Vec::new();
            push_u16(&mut data, methods.len() as u16);
            for method in methods {
                push_u16(&mut data, method.handle_index);
                push_u16(&mut data, method.arguments.len() as u16);
                for argument in &method.arguments {
                    push_u16(&mut data, *argument);
                }
            }
            Some((name_index, data))
        };
        if let Some(error) = self.error {
            return Err(error);
        }
        let header = self.header.ok_or(ClassFileError::MissingHeader)?;

        let mut out = Vec::with_capacity(self.symbols.bytes().len() + self.methods.len() + 64);
        out.extend_from_slice(&0xcafe_babe_u32.to_be_bytes());
        push_u16(&mut out, header.minor_version);
        push_u16(&mut out, header.major_version);
        push_u16(&mut out, self.symbols.count());
        out.extend_from_slice(self.symbols.bytes());
        push_u16(&mut out, header.access);
        push_u16(&mut out, header.this_class);
        push_u16(&mut out, header.super_class);
        push_u16(&mut out, header.interfaces.len() as u16);
        for interface in &header.interfaces {
            push_u16(&mut out, *interface);
        }
        push_u16(&mut out, self.field_count);
        out.extend_from_slice(&self.fields);
        push_u16(&mut out, self.method_count);
        out.extend_from_slice(&self.methods);

        let mut attributes = self.attributes;
        attributes.extend(bootstrap_attribute);
        write_attributes(&mut out, &attributes);
        Ok(out)
    }
}

impl ClassVisitor for ClassWriter {
    fn visit(&mut self, header: &ClassHeader) {
        let this_class = self.intern(|symbols| symbols.class(&header.name));
        let super_class = match &header.super_name {
            Some(name) => self.intern(|symbols| symbols.class(name)),
            None => 0,
        };
        let interfaces = header
            .interfaces
            .iter()
            .map(|name| self.intern(|symbols| symbols.class(name)))
            .collect();
        self.header = Some(HeaderIndices {
            name: header.name.clone(),
            minor_version: header.minor_version,
            major_version: header.major_version,
            access: header.access,
            this_class,
            super_class,
            interfaces,
        });
    }

    fn visit_attribute(&mut self, attribute: &RawAttribute) {
        let mut encoded = Vec::new();
        self.encode_raw_attributes(std::slice::from_ref(attribute), &mut encoded);
        self.attributes.extend(encoded);
    }

    fn visit_field(&mut self, field: &FieldDescription, attributes: &[RawAttribute]) {
        let name_index = self.intern(|symbols| symbols.utf8(&field.name));
        let descriptor_index = self.intern(|symbols| symbols.utf8(&field.descriptor));
        let mut encoded = Vec::new();
        self.encode_raw_attributes(attributes, &mut encoded);

        push_u16(&mut self.fields, field.access);
        push_u16(&mut self.fields, name_index);
        push_u16(&mut self.fields, descriptor_index);
        write_attributes(&mut self.fields, &encoded);
        self.field_count = self.field_count.saturating_add(1);
    }

    fn visit_method(&mut self, method: &MethodDescription) -> Option<Box<dyn MethodVisitor + '_>> {
        let name_index = self.intern(|symbols| symbols.utf8(&method.name));
        let descriptor_index = self.intern(|symbols| symbols.utf8(&method.descriptor));
        Some(Box::new(MethodWriter {
            class: self,
            method: method.clone(),
            name_index,
            descriptor_index,
            attributes: Vec::new(),
            has_code: false,
            instructions: Vec::new(),
            handlers: Vec::new(),
            line_numbers: Vec::new(),
            local_variables: Vec::new(),
            max_stack: 0,
            max_locals: 0,
        }))
    }
}

struct LocalVariable {
    name_index: u16,
    descriptor_index: u16,
    signature_index: Option<u16>,
    size: u16,
    start: Label,
    end: Label,
    index: u16,
}

/// Buffers one method's code and assembles it at `visit_end`.
struct MethodWriter<'w> {
    class: &'w mut ClassWriter,
    method: MethodDescription,
    name_index: u16,
    descriptor_index: u16,
    attributes: Vec<(u16, Vec<u8>)>,
    has_code: bool,
    instructions: Vec<Instruction>,
    handlers: Vec<ExceptionHandler>,
    line_numbers: Vec<(u16, Label)>,
    local_variables: Vec<LocalVariable>,
    max_stack: u16,
    max_locals: u16,
}

impl MethodWriter<'_> {
    fn intern(&mut self, intern: impl FnOnce(&mut SymbolTable) -> ClassFileResult<u16>) -> u16 {
        self.class.intern(intern)
    }

    fn descriptor_sizes(&mut self, descriptor: &str) -> (u8, u8) {
        match descriptor::parse_method_descriptor(descriptor) {
            Ok((arguments, ret)) => (
                arguments.iter().map(JvmType::size).sum::<usize>().min(255) as u8,
                ret.size() as u8,
            ),
            Err(_) => {
                self.class
                    .record_error(ClassFileError::BadDescriptor(descriptor.to_string()));
                (0, 0)
            }
        }
    }

    fn method_id(&self) -> String {
        format!("{}{}", self.method.name, self.method.descriptor)
    }

    /// Locals of the implicit frame at method entry.
    fn initial_locals(&self) -> Vec<VerificationType> {
        let mut locals = Vec::new();
        if !self.method.is_static() {
            let owner = self
                .class
                .header
                .as_ref()
                .map(|header| header.name.clone())
                .unwrap_or_default();
            if self.method.is_constructor() && owner != "java/lang/Object" {
                locals.push(VerificationType::UninitializedThis);
            } else {
                locals.push(VerificationType::Object(owner));
            }
        }
        if let Ok(arguments) = descriptor::argument_types(&self.method.descriptor) {
            locals.extend(arguments.iter().map(verification_type));
        }
        locals
    }

    /// Routes each far conditional branch to a `GOTO_W` placed at the nearest point where
    /// code can be added without entering the normal flow: after an unconditional
    /// instruction, or at a stack map frame behind a `GOTO` jumping over it. Once a
    /// trampoline is added every frame is written in full form.
    ///
    /// Returns the trampoline labels, or `None` when a branch has no insertion point in reach
    /// or its target has no known frame.
    fn insert_trampolines(
        &mut self,
        far_branches: &[usize],
        offsets: &[usize],
        code_length: usize,
        label_index: &HashMap<Label, usize>,
    ) -> Option<Vec<Label>> {
        let initial = self.initial_locals();
        let frames = expand_frames(&initial, &self.instructions);
        let has_frames = frames.iter().any(Option::is_some);
        let points = insertion_points(&self.instructions, has_frames);
        let offset_of = |index: usize| offsets.get(index).copied().unwrap_or(code_length) as i64;

        let mut plans = Vec::with_capacity(far_branches.len());
        for &branch in far_branches {
            let Some(Instruction::Jump { target, .. }) = self.instructions.get(branch) else {
                return None;
            };
            let frame = if has_frames {
                let target_index = *label_index.get(target)?;
                Some(frame_at(&self.instructions, &frames, &initial, target_index)?)
            } else {
                None
            };
            let branch_offset = offset_of(branch);
            let distance = |point: &&InsertionPoint| (offset_of(point.index) - branch_offset).abs();
            let point = points
                .iter()
                .filter(|point| distance(point) <= TRAMPOLINE_REACH)
                .min_by_key(|point| distance(point))?;
            plans.push(Trampoline {
                branch,
                target: *target,
                label: Label::new(),
                point: *point,
                frame,
            });
        }

        for plan in &plans {
            if let Some(Instruction::Jump { target, .. }) = self.instructions.get_mut(plan.branch) {
                *target = plan.label;
            }
        }
        if has_frames {
            for (inst, expanded) in self.instructions.iter_mut().zip(&frames) {
                if let (Instruction::Frame(frame), Some((locals, stack))) = (inst, expanded) {
                    *frame = Frame::Full {
                        locals: locals.clone(),
                        stack: stack.clone(),
                    };
                }
            }
        }

        plans.sort_by_key(|plan| std::cmp::Reverse(plan.point.index));
        for plan in &plans {
            let skip = Label::new();
            let mut code = Vec::new();
            if plan.point.reachable {
                code.push(Instruction::Jump {
                    opcode: opcodes::GOTO,
                    target: skip,
                });
            }
            code.push(Instruction::Label(plan.label));
            if let Some((locals, stack)) = &plan.frame {
                code.push(Instruction::Frame(Frame::Full {
                    locals: locals.clone(),
                    stack: stack.clone(),
                }));
            }
            code.push(Instruction::Jump {
                opcode: opcodes::GOTO,
                target: plan.target,
            });
            if plan.point.reachable {
                code.push(Instruction::Label(skip));
                if has_frames && !plan.point.framed {
                    code.push(Instruction::Frame(Frame::Full {
                        locals: initial.clone(),
                        stack: Vec::new(),
                    }));
                }
            }
            self.instructions
                .splice(plan.point.index..plan.point.index, code);
        }
        Some(plans.into_iter().map(|plan| plan.label).collect())
    }

    fn assemble(&mut self) -> ClassFileResult<Vec<u8>> {
        let method_id = self.method_id();
        let mut wide_jumps: HashSet<usize> = HashSet::new();
        let mut trampolines: HashSet<Label> = HashSet::new();

        let (label_index, offsets, code_length) = loop {
            let label_index = cfg::label_positions(&self.instructions);
            let (offsets, code_length) = layout(&self.instructions, &wide_jumps);
            let mut changed = false;
            let mut far_branches = Vec::new();
            for (index, inst) in self.instructions.iter().enumerate() {
                let Instruction::Jump { opcode, target } = inst else {
                    continue;
                };
                let target_index = label_index
                    .get(target)
                    .ok_or_else(|| ClassFileError::UnresolvedLabel(method_id.clone()))?;
                let delta = offsets[*target_index] as i64 - offsets[index] as i64;
                let in_range = (i16::MIN as i64..=i16::MAX as i64).contains(&delta);
                if in_range || wide_jumps.contains(&index) {
                    continue;
                }
                if *opcode == opcodes::GOTO || *opcode == opcodes::JSR {
                    wide_jumps.insert(index);
                    changed = true;
                } else if trampolines.contains(target) {
                    return Err(ClassFileError::BranchOutOfRange(method_id));
                } else {
                    far_branches.push(index);
                }
            }
            if !far_branches.is_empty() {
                let inserted =
                    self.insert_trampolines(&far_branches, &offsets, code_length, &label_index);
                let Some(inserted) = inserted else {
                    return Err(ClassFileError::BranchOutOfRange(method_id));
                };
                debug!(
                    method = %method_id,
                    trampolines = inserted.len(),
                    "conditional branches routed through trampolines"
                );
                trampolines.extend(inserted);
                wide_jumps.clear();
                continue;
            }
            if !changed {
                break (label_index, offsets, code_length);
            }
        };
        if code_length > u16::MAX as usize {
            return Err(ClassFileError::CodeTooLarge(method_id));
        }
        let label_offset = |label: &Label| -> ClassFileResult<u32> {
            label_index
                .get(label)
                .map(|index| offsets[*index] as u32)
                .ok_or_else(|| ClassFileError::UnresolvedLabel(method_id.clone()))
        };

        let mut code = Vec::with_capacity(code_length);
        for (index, inst) in self.instructions.iter().enumerate() {
            let offset = offsets[index];
            debug_assert_eq!(code.len(), offset);
            let wide = wide_jumps.contains(&index);
            encode_instruction(&mut code, inst, offset, wide, &label_offset)?;
        }

        let mut max_stack = self.max_stack;
        let mut max_locals = self.max_locals;
        if self.class.flags & ClassWriter::COMPUTE_MAXS != 0 {
            max_stack = max_stack.max(cfg::compute_max_stack(
                &self.instructions,
                &self.handlers,
                &method_id,
            )?);
            let arguments = descriptor::arguments_size(&self.method.descriptor)
                .map_err(|_| ClassFileError::BadDescriptor(self.method.descriptor.clone()))?;
            let receiver = if self.method.is_static() { 0 } else { 1 };
            max_locals = max_locals
                .max((arguments + receiver).min(u16::MAX as usize) as u16)
                .max(cfg::compute_max_locals(&self.instructions));
            for local in &self.local_variables {
                max_locals = max_locals.max(local.index.saturating_add(local.size));
            }
        }

        let mut data = Vec::with_capacity(code.len() + 32);
        push_u16(&mut data, max_stack);
        push_u16(&mut data, max_locals);
        data.extend_from_slice(&(code.len() as u32).to_be_bytes());
        data.extend_from_slice(&code);

        push_u16(&mut data, self.handlers.len() as u16);
        for handler in &self.handlers {
            push_u16(&mut data, label_offset(&handler.start)? as u16);
            push_u16(&mut data, label_offset(&handler.end)? as u16);
            push_u16(&mut data, label_offset(&handler.handler)? as u16);
            push_u16(&mut data, handler.catch_type);
        }

        let mut attributes = Vec::new();

        let mut frames: Vec<(u32, &Frame)> = Vec::new();
        for (index, inst) in self.instructions.iter().enumerate() {
            if let Instruction::Frame(frame) = inst {
                let offset = offsets[index] as u32;
                match frames.last_mut() {
                    Some(last) if last.0 == offset => *last = (offset, frame),
                    _ => frames.push((offset, frame)),
                }
            }
        }
        if !frames.is_empty() {
            let mut table = Vec::new();
            push_u16(&mut table, frames.len() as u16);
            let mut previous: Option<u32> = None;
            let mut pending = Vec::new();
            for (offset, frame) in &frames {
                let delta = match previous {
                    None => *offset,
                    Some(previous) => offset - previous - 1,
                };
                previous = Some(*offset);
                pending.push((delta, (*frame).clone()));
            }
            for (delta, frame) in pending {
                self.encode_frame(&mut table, delta as u16, &frame, &label_offset)?;
            }
            let name_index = self.intern(|symbols| symbols.utf8("StackMapTable"));
            attributes.push((name_index, table));
        }

        if !self.line_numbers.is_empty() {
            let mut table = Vec::new();
            push_u16(&mut table, self.line_numbers.len() as u16);
            for (line, start) in &self.line_numbers {
                push_u16(&mut table, label_offset(start)? as u16);
                push_u16(&mut table, *line);
            }
            let name_index = self.intern(|symbols| symbols.utf8("LineNumberTable"));
            attributes.push((name_index, table));
        }

        if !self.local_variables.is_empty() {
            let mut table = Vec::new();
            let mut types = Vec::new();
            let mut type_count = 0u16;
            push_u16(&mut table, self.local_variables.len() as u16);
            for local in &self.local_variables {
                let start = label_offset(&local.start)?;
                let end = label_offset(&local.end)?;
                let length = end.saturating_sub(start) as u16;
                push_u16(&mut table, start as u16);
                push_u16(&mut table, length);
                push_u16(&mut table, local.name_index);
                push_u16(&mut table, local.descriptor_index);
                push_u16(&mut table, local.index);
                if let Some(signature_index) = local.signature_index {
                    push_u16(&mut types, start as u16);
                    push_u16(&mut types, length);
                    push_u16(&mut types, local.name_index);
                    push_u16(&mut types, signature_index);
                    push_u16(&mut types, local.index);
                    type_count += 1;
                }
            }
            let name_index = self.intern(|symbols| symbols.utf8("LocalVariableTable"));
            attributes.push((name_index, table));
            if type_count > 0 {
                let mut type_table = Vec::with_capacity(types.len() + 2);
                push_u16(&mut type_table, type_count);
                type_table.extend_from_slice(&types);
                let name_index = self.intern(|symbols| symbols.utf8("LocalVariableTypeTable"));
                attributes.push((name_index, type_table));
            }
        }

        write_attributes(&mut data, &attributes);
        Ok(data)
    }

    fn encode_frame(
        &mut self,
        out: &mut Vec<u8>,
        delta: u16,
        frame: &Frame,
        label_offset: &dyn Fn(&Label) -> ClassFileResult<u32>,
    ) -> ClassFileResult<()> {
        match frame {
            Frame::Same if delta < 64 => out.push(delta as u8),
            Frame::Same => {
                out.push(251);
                push_u16(out, delta);
            }
            Frame::SameLocals1StackItem(item) => {
                if delta < 64 {
                    out.push(64 + delta as u8);
                } else {
                    out.push(247);
                    push_u16(out, delta);
                }
                self.encode_verification_type(out, item, label_offset)?;
            }
            Frame::Chop(count) => {
                out.push(251 - (*count).clamp(1, 3));
                push_u16(out, delta);
            }
            Frame::Append(locals) => {
                out.push(251 + locals.len().clamp(1, 3) as u8);
                push_u16(out, delta);
                for local in locals {
                    self.encode_verification_type(out, local, label_offset)?;
                }
            }
            Frame::Full { locals, stack } => {
                out.push(255);
                push_u16(out, delta);
                push_u16(out, locals.len() as u16);
                for local in locals {
                    self.encode_verification_type(out, local, label_offset)?;
                }
                push_u16(out, stack.len() as u16);
                for item in stack {
                    self.encode_verification_type(out, item, label_offset)?;
                }
            }
        }
        Ok(())
    }

    fn encode_verification_type(
        &mut self,
        out: &mut Vec<u8>,
        ty: &VerificationType,
        label_offset: &dyn Fn(&Label) -> ClassFileResult<u32>,
    ) -> ClassFileResult<()> {
        match ty {
            VerificationType::Top => out.push(0),
            VerificationType::Integer => out.push(1),
            VerificationType::Float => out.push(2),
            VerificationType::Double => out.push(3),
            VerificationType::Long => out.push(4),
            VerificationType::Null => out.push(5),
            VerificationType::UninitializedThis => out.push(6),
            VerificationType::Object(name) => {
                out.push(7);
                let index = self.class.symbols.class(name)?;
                push_u16(out, index);
            }
            VerificationType::Uninitialized(label) => {
                out.push(8);
                push_u16(out, label_offset(label)? as u16);
            }
        }
        Ok(())
    }
}

impl MethodVisitor for MethodWriter<'_> {
    fn visit_attribute(&mut self, attribute: &RawAttribute) {
        let mut encoded = Vec::new();
        self.class
            .encode_raw_attributes(std::slice::from_ref(attribute), &mut encoded);
        self.attributes.extend(encoded);
    }

    fn visit_code(&mut self) {
        self.has_code = true;
    }

    fn visit_frame(&mut self, frame: &Frame) {
        self.instructions.push(Instruction::Frame(frame.clone()));
    }

    fn visit_insn(&mut self, opcode: u8) {
        self.instructions.push(Instruction::Simple(opcode));
    }

    fn visit_int_insn(&mut self, opcode: u8, operand: i32) {
        self.instructions.push(Instruction::Int { opcode, operand });
    }

    fn visit_var_insn(&mut self, opcode: u8, var: u16) {
        self.instructions.push(Instruction::Var { opcode, var });
    }

    fn visit_type_insn(&mut self, opcode: u8, type_name: &str) {
        let index = self.intern(|symbols| symbols.class(type_name));
        self.instructions.push(Instruction::Type { opcode, index });
    }

    fn visit_field_insn(&mut self, opcode: u8, owner: &str, name: &str, descriptor: &str) {
        let index = self.intern(|symbols| symbols.field_ref(owner, name, descriptor));
        let value_size = match JvmType::from_descriptor(descriptor) {
            Ok(ty) => ty.size() as u8,
            Err(_) => {
                self.class
                    .record_error(ClassFileError::BadDescriptor(descriptor.to_string()));
                1
            }
        };
        self.instructions.push(Instruction::Field {
            opcode,
            index,
            value_size,
        });
    }

    fn visit_method_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) {
        let index =
            self.intern(|symbols| symbols.method_ref(owner, name, descriptor, is_interface));
        let (arguments_size, return_size) = self.descriptor_sizes(descriptor);
        self.instructions.push(Instruction::Invoke {
            opcode,
            index,
            arguments_size,
            return_size,
        });
    }

    fn visit_invoke_dynamic_insn(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap: &Handle,
        arguments: &[Constant],
    ) {
        let index =
            self.intern(|symbols| symbols.invoke_dynamic(name, descriptor, bootstrap, arguments));
        let (arguments_size, return_size) = self.descriptor_sizes(descriptor);
        self.instructions.push(Instruction::InvokeDynamic {
            index,
            arguments_size,
            return_size,
        });
    }

    fn visit_jump_insn(&mut self, opcode: u8, label: Label) {
        self.instructions.push(Instruction::Jump {
            opcode,
            target: label,
        });
    }

    fn visit_label(&mut self, label: Label) {
        self.instructions.push(Instruction::Label(label));
    }

    fn visit_ldc_insn(&mut self, constant: &Constant) {
        let index = self.intern(|symbols| symbols.constant(constant));
        self.instructions.push(Instruction::Ldc {
            index,
            wide: constant.is_wide(),
        });
    }

    fn visit_iinc_insn(&mut self, var: u16, increment: i16) {
        self.instructions.push(Instruction::Iinc { var, increment });
    }

    fn visit_table_switch_insn(&mut self, min: i32, max: i32, default: Label, labels: &[Label]) {
        self.instructions.push(Instruction::TableSwitch {
            min,
            max,
            default,
            targets: labels.to_vec(),
        });
    }

    fn visit_lookup_switch_insn(&mut self, default: Label, keys: &[i32], labels: &[Label]) {
        self.instructions.push(Instruction::LookupSwitch {
            default,
            keys: keys.to_vec(),
            targets: labels.to_vec(),
        });
    }

    fn visit_multi_a_new_array_insn(&mut self, descriptor: &str, dimensions: u8) {
        let index = self.intern(|symbols| symbols.class(descriptor));
        self.instructions
            .push(Instruction::MultiANewArray { index, dimensions });
    }

    fn visit_try_catch_block(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
    ) {
        let catch_type = match catch_type {
            Some(name) => self.intern(|symbols| symbols.class(name)),
            None => 0,
        };
        self.handlers.push(ExceptionHandler {
            start,
            end,
            handler,
            catch_type,
        });
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
        let name_index = self.intern(|symbols| symbols.utf8(name));
        let descriptor_index = self.intern(|symbols| symbols.utf8(descriptor));
        let signature_index =
            signature.map(|signature| self.intern(|symbols| symbols.utf8(signature)));
        let size = JvmType::from_descriptor(descriptor)
            .map(|ty| ty.size() as u16)
            .unwrap_or(1);
        self.local_variables.push(LocalVariable {
            name_index,
            descriptor_index,
            signature_index,
            size,
            start,
            end,
            index,
        });
    }

    fn visit_line_number(&mut self, line: u16, start: Label) {
        self.line_numbers.push((line, start));
    }

    fn visit_maxs(&mut self, max_stack: u16, max_locals: u16) {
        self.max_stack = max_stack;
        self.max_locals = max_locals;
    }

    fn visit_end(&mut self) {
        let mut attributes = std::mem::take(&mut self.attributes);
        if self.has_code {
            match self.assemble() {
                Ok(code) => {
                    let name_index = self.intern(|symbols| symbols.utf8("Code"));
                    attributes.insert(0, (name_index, code));
                }
                Err(error) => self.class.record_error(error),
            }
        }

        let methods = &mut self.class.methods;
        push_u16(methods, self.method.access);
        push_u16(methods, self.name_index);
        push_u16(methods, self.descriptor_index);
        write_attributes(methods, &attributes);
        self.class.method_count = self.class.method_count.saturating_add(1);
    }
}

/// Farthest a conditional branch is sent to its trampoline, leaving room for the code the
/// same pass inserts.
const TRAMPOLINE_REACH: i64 = i16::MAX as i64 - 4096;

type FullFrame = (Vec<VerificationType>, Vec<VerificationType>);

struct Trampoline {
    branch: usize,
    target: Label,
    label: Label,
    point: InsertionPoint,
    frame: Option<FullFrame>,
}

/// Instruction index code can be inserted before. `reachable` points are entered by the
/// preceding instruction and need a `GOTO` over the inserted code; `framed` points carry a
/// stack map frame that then applies to the instruction after the jump.
#[derive(Clone, Copy, Debug)]
struct InsertionPoint {
    index: usize,
    reachable: bool,
    framed: bool,
}

fn insertion_points(instructions: &[Instruction], has_frames: bool) -> Vec<InsertionPoint> {
    let mut points = Vec::new();
    let mut previous: Option<&Instruction> = None;
    let mut index = 0;
    loop {
        let start = index;
        let mut framed = false;
        while let Some(inst @ (Instruction::Label(_) | Instruction::Frame(_))) =
            instructions.get(index)
        {
            framed |= matches!(inst, Instruction::Frame(_));
            index += 1;
        }
        let grouped = index > start;
        let reachable = previous.is_none_or(|inst| !is_unconditional(inst));
        if !reachable || start == 0 || framed || (grouped && !has_frames) {
            points.push(InsertionPoint {
                index: start,
                reachable,
                framed,
            });
        }
        match instructions.get(index) {
            Some(inst) => {
                previous = Some(inst);
                index += 1;
            }
            None => break,
        }
    }
    points
}

fn is_unconditional(inst: &Instruction) -> bool {
    match inst {
        Instruction::Simple(opcode) => {
            (opcodes::IRETURN..=opcodes::RETURN).contains(opcode) || *opcode == opcodes::ATHROW
        }
        Instruction::Jump { opcode, .. } => *opcode == opcodes::GOTO,
        Instruction::Var { opcode, .. } => *opcode == opcodes::RET,
        Instruction::TableSwitch { .. } | Instruction::LookupSwitch { .. } => true,
        _ => false,
    }
}

/// Full form of every visited frame, indexed like `instructions`.
fn expand_frames(
    initial: &[VerificationType],
    instructions: &[Instruction],
) -> Vec<Option<FullFrame>> {
    let mut locals = initial.to_vec();
    instructions
        .iter()
        .map(|inst| {
            let Instruction::Frame(frame) = inst else {
                return None;
            };
            let stack = match frame {
                Frame::Same => Vec::new(),
                Frame::SameLocals1StackItem(item) => vec![item.clone()],
                Frame::Chop(count) => {
                    locals.truncate(locals.len().saturating_sub(*count as usize));
                    Vec::new()
                }
                Frame::Append(appended) => {
                    locals.extend(appended.iter().cloned());
                    Vec::new()
                }
                Frame::Full {
                    locals: full,
                    stack,
                } => {
                    locals = full.clone();
                    stack.clone()
                }
            };
            Some((locals.clone(), stack))
        })
        .collect()
}

/// Frame in effect at the label at `label_index`: the last frame visited at the same offset,
/// or the entry frame for offset zero.
fn frame_at(
    instructions: &[Instruction],
    frames: &[Option<FullFrame>],
    initial: &[VerificationType],
    label_index: usize,
) -> Option<FullFrame> {
    let zero_size = |index: usize| {
        matches!(
            instructions.get(index),
            Some(Instruction::Label(_) | Instruction::Frame(_))
        )
    };
    let mut start = label_index;
    while start > 0 && zero_size(start - 1) {
        start -= 1;
    }
    let mut end = label_index;
    while zero_size(end) {
        end += 1;
    }
    (start..end)
        .rev()
        .find_map(|index| frames.get(index).cloned().flatten())
        .or_else(|| (start == 0).then(|| (initial.to_vec(), Vec::new())))
}

fn verification_type(ty: &JvmType) -> VerificationType {
    match ty {
        JvmType::Boolean | JvmType::Char | JvmType::Byte | JvmType::Short | JvmType::Int => {
            VerificationType::Integer
        }
        JvmType::Float => VerificationType::Float,
        JvmType::Long => VerificationType::Long,
        JvmType::Double => VerificationType::Double,
        JvmType::Object(name) | JvmType::Array(name) => VerificationType::Object(name.clone()),
        JvmType::Void => VerificationType::Top,
    }
}

/// Offsets of each instruction and the total code length for the given jump widths.
fn layout(instructions: &[Instruction], wide_jumps: &HashSet<usize>) -> (Vec<usize>, usize) {
    let mut offsets = Vec::with_capacity(instructions.len());
    let mut offset = 0usize;
    for (index, inst) in instructions.iter().enumerate() {
        offsets.push(offset);
        offset += instruction_size(inst, offset, wide_jumps.contains(&index));
    }
    (offsets, offset)
}

fn instruction_size(inst: &Instruction, offset: usize, wide_jump: bool) -> usize {
    match inst {
        Instruction::Label(_) | Instruction::Frame(_) => 0,
        Instruction::Simple(_) => 1,
        Instruction::Int { opcode, .. } => {
            if *opcode == opcodes::SIPUSH {
                3
            } else {
                2
            }
        }
        Instruction::Var { opcode, var } => {
            if *var <= 3 && *opcode != opcodes::RET {
                1
            } else if *var <= u8::MAX as u16 {
                2
            } else {
                4
            }
        }
        Instruction::Type { .. } | Instruction::Field { .. } => 3,
        Instruction::Invoke { opcode, .. } => {
            if *opcode == opcodes::INVOKEINTERFACE {
                5
            } else {
                3
            }
        }
        Instruction::InvokeDynamic { .. } => 5,
        Instruction::Jump { .. } => {
            if wide_jump {
                5
            } else {
                3
            }
        }
        Instruction::Ldc { index, wide } => {
            if *wide || *index > u8::MAX as u16 {
                3
            } else {
                2
            }
        }
        Instruction::Iinc { var, increment } => {
            if *var <= u8::MAX as u16 && i8::try_from(*increment).is_ok() {
                3
            } else {
                6
            }
        }
        Instruction::TableSwitch { targets, .. } => {
            1 + switch_padding(offset) + 12 + 4 * targets.len()
        }
        Instruction::LookupSwitch { targets, .. } => {
            1 + switch_padding(offset) + 8 + 8 * targets.len()
        }
        Instruction::MultiANewArray { .. } => 4,
    }
}

fn encode_instruction(
    code: &mut Vec<u8>,
    inst: &Instruction,
    offset: usize,
    wide_jump: bool,
    label_offset: &dyn Fn(&Label) -> ClassFileResult<u32>,
) -> ClassFileResult<()> {
    let relative = |label: &Label| -> ClassFileResult<i32> {
        Ok((label_offset(label)? as i64 - offset as i64) as i32)
    };
    match inst {
        Instruction::Label(_) | Instruction::Frame(_) => {}
        Instruction::Simple(opcode) => code.push(*opcode),
        Instruction::Int { opcode, operand } => {
            code.push(*opcode);
            if *opcode == opcodes::SIPUSH {
                push_u16(code, *operand as i16 as u16);
            } else {
                code.push(*operand as u8);
            }
        }
        Instruction::Var { opcode, var } => {
            if *var <= 3 && *opcode != opcodes::RET {
                let base = if *opcode < opcodes::ISTORE {
                    opcodes::ILOAD_0 + (*opcode - opcodes::ILOAD) * 4
                } else {
                    opcodes::ISTORE_0 + (*opcode - opcodes::ISTORE) * 4
                };
                code.push(base + *var as u8);
            } else if *var <= u8::MAX as u16 {
                code.push(*opcode);
                code.push(*var as u8);
            } else {
                code.push(opcodes::WIDE);
                code.push(*opcode);
                push_u16(code, *var);
            }
        }
        Instruction::Type { opcode, index } | Instruction::Field { opcode, index, .. } => {
            code.push(*opcode);
            push_u16(code, *index);
        }
        Instruction::Invoke {
            opcode,
            index,
            arguments_size,
            ..
        } => {
            code.push(*opcode);
            push_u16(code, *index);
            if *opcode == opcodes::INVOKEINTERFACE {
                code.push(arguments_size.saturating_add(1));
                code.push(0);
            }
        }
        Instruction::InvokeDynamic { index, .. } => {
            code.push(opcodes::INVOKEDYNAMIC);
            push_u16(code, *index);
            push_u16(code, 0);
        }
        Instruction::Jump { opcode, target } => {
            let delta = relative(target)?;
            if wide_jump {
                code.push(if *opcode == opcodes::JSR {
                    opcodes::JSR_W
                } else {
                    opcodes::GOTO_W
                });
                code.extend_from_slice(&delta.to_be_bytes());
            } else {
                code.push(*opcode);
                push_u16(code, delta as i16 as u16);
            }
        }
        Instruction::Ldc { index, wide } => {
            if *wide {
                code.push(opcodes::LDC2_W);
                push_u16(code, *index);
            } else if *index > u8::MAX as u16 {
                code.push(opcodes::LDC_W);
                push_u16(code, *index);
            } else {
                code.push(opcodes::LDC);
                code.push(*index as u8);
            }
        }
        Instruction::Iinc { var, increment } => {
            if *var <= u8::MAX as u16 && i8::try_from(*increment).is_ok() {
                code.push(opcodes::IINC);
                code.push(*var as u8);
                code.push(*increment as i8 as u8);
            } else {
                code.push(opcodes::WIDE);
                code.push(opcodes::IINC);
                push_u16(code, *var);
                push_u16(code, *increment as u16);
            }
        }
        Instruction::TableSwitch {
            min,
            max,
            default,
            targets,
        } => {
            code.push(opcodes::TABLESWITCH);
            code.extend(std::iter::repeat(0).take(switch_padding(offset)));
            code.extend_from_slice(&relative(default)?.to_be_bytes());
            code.extend_from_slice(&min.to_be_bytes());
            code.extend_from_slice(&max.to_be_bytes());
            for target in targets {
                code.extend_from_slice(&relative(target)?.to_be_bytes());
            }
        }
        Instruction::LookupSwitch {
            default,
            keys,
            targets,
        } => {
            code.push(opcodes::LOOKUPSWITCH);
            code.extend(std::iter::repeat(0).take(switch_padding(offset)));
            code.extend_from_slice(&relative(default)?.to_be_bytes());
            code.extend_from_slice(&(targets.len() as i32).to_be_bytes());
            for (key, target) in keys.iter().zip(targets) {
                code.extend_from_slice(&key.to_be_bytes());
                code.extend_from_slice(&relative(target)?.to_be_bytes());
            }
        }
        Instruction::MultiANewArray { index, dimensions } => {
            code.push(opcodes::MULTIANEWARRAY);
            push_u16(code, *index);
            code.push(*dimensions);
        }
    }
    Ok(())
}

fn push_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn write_attributes(out: &mut Vec<u8>, attributes: &[(u16, Vec<u8>)]) {
    push_u16(out, attributes.len() as u16);
    for (name_index, data) in attributes {
        push_u16(out, *name_index);
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        out.extend_from_slice(data);
    }
}

/// Identity transform helper: reads `bytes` and writes them back through `ClassWriter`.
pub fn rewrite_unchanged(bytes: &[u8]) -> ClassFileResult<Vec<u8>> {
    let reader = ClassReader::new(bytes)?;
    let mut writer = ClassWriter::from_reader(&reader, 0);
    reader.accept(&mut writer)?;
    writer.to_bytes()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bytecode::visitor::RecordingMethodVisitor;
    use crate::bytecode::ClassReader;

    /// Writes a class with a single method whose body is produced by `body`.
    pub(crate) fn class_with_method(
        name: &str,
        method: MethodDescription,
        body: impl FnOnce(&mut dyn MethodVisitor),
    ) -> Vec<u8> {
        let mut writer = ClassWriter::new(ClassWriter::COMPUTE_MAXS);
        writer.visit(&ClassHeader {
            minor_version: 0,
            major_version: 52,
            access: opcodes::ACC_PUBLIC | opcodes::ACC_SUPER,
            name: name.to_string(),
            super_name: Some("java/lang/Object".to_string()),
            interfaces: Vec::new(),
        });
        if let Some(mut visitor) = writer.visit_method(&method) {
            visitor.visit_code();
            body(visitor.as_mut());
            visitor.visit_maxs(0, 0);
            visitor.visit_end();
        }
        writer.visit_end();
        writer.to_bytes().expect("write class")
    }

    /// Writes a method-less class with the given super class and interfaces.
    pub(crate) fn class_extending(name: &str, super_name: &str, interfaces: &[&str]) -> Vec<u8> {
        let mut writer = ClassWriter::new(0);
        writer.visit(&ClassHeader {
            minor_version: 0,
            major_version: 52,
            access: opcodes::ACC_PUBLIC | opcodes::ACC_SUPER,
            name: name.to_string(),
            super_name: Some(super_name.to_string()),
            interfaces: interfaces.iter().map(|name| name.to_string()).collect(),
        });
        writer.visit_end();
        writer.to_bytes().expect("write class")
    }

    /// Collects the instruction events of the method called `name`.
    pub(crate) fn method_events(bytes: &[u8], name: &str) -> Vec<String> {
        method_recording(bytes, name).events
    }

    pub(crate) fn method_recording(bytes: &[u8], name: &str) -> RecordingMethodVisitor {
        struct Collector<'n> {
            name: &'n str,
            recorder: RecordingMethodVisitor,
        }

        impl ClassVisitor for Collector<'_> {
            fn visit_method(
                &mut self,
                method: &MethodDescription,
            ) -> Option<Box<dyn MethodVisitor + '_>> {
                if method.name == self.name {
                    Some(Box::new(&mut self.recorder))
                } else {
                    None
                }
            }
        }

        let reader = ClassReader::new(bytes).expect("read class");
        let mut collector = Collector {
            name,
            recorder: RecordingMethodVisitor::default(),
        };
        reader.accept(&mut collector).expect("accept class");
        collector.recorder
    }

    #[test]
    fn long_forward_goto_is_widened() {
        let bytes = class_with_method(
            "com/example/Jumps",
            MethodDescription::new(opcodes::ACC_STATIC, "jump", "()V"),
            |visitor| {
                let end = Label::new();
                visitor.visit_jump_insn(opcodes::GOTO, end);
                for _ in 0..40_000 {
                    visitor.visit_insn(opcodes::NOP);
                }
                visitor.visit_label(end);
                visitor.visit_insn(opcodes::RETURN);
            },
        );

        let events = method_events(&bytes, "jump");
        assert_eq!(events[1], "jump 0xa7");
        assert_eq!(events.last().map(String::as_str), Some("end"));
        assert!(bytes.windows(5).any(|window| window
            == [opcodes::GOTO_W, 0x00, 0x00, 0x9c, 0x45]));
    }

    fn far_conditional_branch_without_frames() -> Vec<u8> {
        let mut writer = ClassWriter::new(0);
        writer.visit(&ClassHeader {
            minor_version: 0,
            major_version: 52,
            access: opcodes::ACC_PUBLIC,
            name: "com/example/Branch".to_string(),
            super_name: Some("java/lang/Object".to_string()),
            interfaces: Vec::new(),
        });
        if let Some(mut visitor) = writer.visit_method(&MethodDescription::new(
            opcodes::ACC_STATIC,
            "branch",
            "(I)V",
        )) {
            let end = Label::new();
            visitor.visit_code();
            visitor.visit_var_insn(opcodes::ILOAD, 0);
            visitor.visit_jump_insn(opcodes::IFEQ, end);
            for _ in 0..40_000 {
                visitor.visit_insn(opcodes::NOP);
            }
            visitor.visit_label(end);
            visitor.visit_insn(opcodes::RETURN);
            visitor.visit_maxs(1, 1);
            visitor.visit_end();
        }
        writer.visit_end();
        writer.to_bytes().expect("write class")
    }

    #[test]
    fn long_conditional_branch_goes_through_trampoline() {
        let bytes = far_conditional_branch_without_frames();

        let events = method_events(&bytes, "branch");
        assert_eq!(
            events[..5],
            ["code", "jump 0xa7", "jump 0xa7", "var 0x15 0", "jump 0x99"]
        );
        assert!(bytes.contains(&opcodes::GOTO_W));
        // IFEQ jumps back six bytes, onto the GOTO_W behind the leading GOTO.
        assert!(bytes.windows(3).any(|window| window == [0x99, 0xff, 0xfa]));
    }

    #[test]
    fn trampolines_keep_stack_map_frames_consistent() {
        let bytes = class_with_method(
            "com/example/Branch",
            MethodDescription::new(opcodes::ACC_STATIC, "branch", "(I)V"),
            |visitor| {
                let end = Label::new();
                visitor.visit_var_insn(opcodes::ILOAD, 0);
                visitor.visit_jump_insn(opcodes::IFEQ, end);
                for _ in 0..40_000 {
                    visitor.visit_insn(opcodes::NOP);
                }
                visitor.visit_label(end);
                visitor.visit_frame(&Frame::Same);
                visitor.visit_insn(opcodes::RETURN);
            },
        );

        let recording = method_recording(&bytes, "branch");
        let full = Frame::Full {
            locals: vec![VerificationType::Integer],
            stack: Vec::new(),
        };
        assert_eq!(recording.frames, vec![full.clone(), full.clone(), full]);
        assert_eq!(recording.events[..3], ["code", "jump 0xa7", "jump 0xa7"]);
    }

    #[test]
    fn trampoline_out_of_reach_is_rejected() {
        let mut writer = ClassWriter::new(0);
        writer.visit(&ClassHeader {
            minor_version: 0,
            major_version: 52,
            access: opcodes::ACC_PUBLIC,
            name: "com/example/Branch".to_string(),
            super_name: Some("java/lang/Object".to_string()),
            interfaces: Vec::new(),
        });
        if let Some(mut visitor) = writer.visit_method(&MethodDescription::new(
            opcodes::ACC_STATIC,
            "branch",
            "(I)V",
        )) {
            let end = Label::new();
            visitor.visit_code();
            for _ in 0..40_000 {
                visitor.visit_insn(opcodes::NOP);
            }
            visitor.visit_var_insn(opcodes::ILOAD, 0);
            visitor.visit_jump_insn(opcodes::IFEQ, end);
            for _ in 0..40_000 {
                visitor.visit_insn(opcodes::NOP);
            }
            visitor.visit_label(end);
            visitor.visit_insn(opcodes::RETURN);
            visitor.visit_maxs(1, 1);
            visitor.visit_end();
        }
        writer.visit_end();

        assert!(matches!(
            writer.to_bytes(),
            Err(ClassFileError::BranchOutOfRange(_))
        ));
    }

    #[test]
    fn computes_maxs_and_uses_compact_encodings() {
        let bytes = class_with_method(
            "com/example/Maxs",
            MethodDescription::new(opcodes::ACC_STATIC, "sum", "(JI)J"),
            |visitor| {
                visitor.visit_var_insn(opcodes::LLOAD, 0);
                visitor.visit_var_insn(opcodes::ILOAD, 2);
                visitor.visit_insn(opcodes::I2L);
                visitor.visit_insn(opcodes::LADD);
                visitor.visit_iinc_insn(2, 1000);
                visitor.visit_insn(opcodes::LRETURN);
            },
        );

        let events = method_events(&bytes, "sum");
        assert!(events.contains(&"maxs 4 3".to_string()));
        assert!(events.contains(&"iinc 2 1000".to_string()));
        assert!(events.contains(&"var 0x16 0".to_string()));
    }

    #[test]
    fn round_trip_keeps_frames_lines_and_handlers() {
        let bytes = class_with_method(
            "com/example/Loop",
            MethodDescription::new(opcodes::ACC_STATIC, "loop", "(I)I"),
            |visitor| {
                let start = Label::new();
                let head = Label::new();
                let exit = Label::new();
                let handler = Label::new();
                visitor.visit_try_catch_block(start, exit, handler, Some("java/lang/Exception"));
                visitor.visit_label(start);
                visitor.visit_line_number(10, start);
                visitor.visit_label(head);
                visitor.visit_frame(&Frame::Same);
                visitor.visit_var_insn(opcodes::ILOAD, 0);
                visitor.visit_jump_insn(opcodes::IFLE, exit);
                visitor.visit_iinc_insn(0, -1);
                visitor.visit_jump_insn(opcodes::GOTO, head);
                visitor.visit_label(exit);
                visitor.visit_frame(&Frame::Same);
                visitor.visit_var_insn(opcodes::ILOAD, 0);
                visitor.visit_insn(opcodes::IRETURN);
                visitor.visit_label(handler);
                visitor.visit_frame(&Frame::SameLocals1StackItem(VerificationType::Object(
                    "java/lang/Exception".to_string(),
                )));
                visitor.visit_insn(opcodes::ATHROW);
            },
        );

        let rewritten = rewrite_unchanged(&bytes).expect("rewrite");

        assert_eq!(rewritten, bytes);
        let events = method_events(&rewritten, "loop");
        assert!(events.contains(&"maxs 1 1".to_string()));
        assert!(events.contains(&"iinc 0 -1".to_string()));
    }
}
