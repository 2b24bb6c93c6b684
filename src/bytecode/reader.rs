use std::collections::{BTreeMap, HashMap};

use crate::bytecode::constant_pool::{BootstrapMethod, ConstantPool, ConstantPoolEntry};
use crate::bytecode::visitor::{
    ClassHeader, ClassVisitor, Frame, Label, MethodVisitor, RawAttribute, VerificationType,
};
use crate::bytecode::{ClassBuffer, ClassFileError, ClassFileResult};
use crate::ir::{FieldDescription, MethodDescription, TypeDescription};
use crate::opcodes;

/// Location of an attribute payload inside the class file.
struct AttributeInfo {
    name: String,
    offset: usize,
    len: usize,
}

/// Parses a class file and replays it to a [`ClassVisitor`].
pub struct ClassReader<'class> {
    buffer: ClassBuffer<'class>,
    constant_pool: ConstantPool,
    bootstrap_methods: Vec<BootstrapMethod>,
    metadata_start: usize,
}

impl<'class> ClassReader<'class> {
    pub fn new(data: &'class [u8]) -> ClassFileResult<Self> {
        let buffer = ClassBuffer::new(data);
        if buffer.read_u32(0)? != 0xcafe_babe {
            return Err(ClassFileError::BadMagic);
        }
        let (constant_pool, metadata_start) = ConstantPool::parse(buffer, 8)?;
        let mut reader = Self {
            buffer,
            constant_pool,
            bootstrap_methods: Vec::new(),
            metadata_start,
        };
        reader.bootstrap_methods = reader.read_bootstrap_methods()?;
        Ok(reader)
    }

    pub fn constant_pool(&self) -> &ConstantPool {
        &self.constant_pool
    }

    pub fn bootstrap_methods(&self) -> &[BootstrapMethod] {
        &self.bootstrap_methods
    }

    pub fn access(&self) -> ClassFileResult<u16> {
        self.buffer.read_u16(self.metadata_start)
    }

    pub fn name(&self) -> ClassFileResult<&str> {
        self.constant_pool
            .class_name(self.buffer.read_u16(self.metadata_start + 2)?)
    }

    pub fn super_name(&self) -> ClassFileResult<Option<&str>> {
        self.constant_pool
            .optional_class_name(self.buffer.read_u16(self.metadata_start + 4)?)
    }

    pub fn interfaces(&self) -> ClassFileResult<Vec<&str>> {
        let count = self.buffer.read_u16(self.metadata_start + 6)? as usize;
        let mut interfaces = Vec::with_capacity(count);
        for index in 0..count {
            let class_index = self.buffer.read_u16(self.metadata_start + 8 + index * 2)?;
            interfaces.push(self.constant_pool.class_name(class_index)?);
        }
        Ok(interfaces)
    }

    pub fn header(&self) -> ClassFileResult<ClassHeader> {
        Ok(ClassHeader {
            minor_version: self.buffer.read_u16(4)?,
            major_version: self.buffer.read_u16(6)?,
            access: self.access()?,
            name: self.name()?.to_string(),
            super_name: self.super_name()?.map(str::to_string),
            interfaces: self
                .interfaces()?
                .into_iter()
                .map(str::to_string)
                .collect(),
        })
    }

    pub fn type_description(&self) -> ClassFileResult<TypeDescription> {
        Ok(TypeDescription::from(&self.header()?))
    }

    /// Replays the whole class to `visitor`: header, class attributes, fields, methods (each
    /// with its body), then `visit_end`.
    pub fn accept(&self, visitor: &mut dyn ClassVisitor) -> ClassFileResult<()> {
        let header = self.header()?;
        visitor.visit(&header);

        let interfaces_count = self.buffer.read_u16(self.metadata_start + 6)? as usize;
        let mut offset = self.metadata_start + 8 + interfaces_count * 2;

        let fields_count = self.buffer.read_u16(offset)?;
        offset += 2;
        let mut fields = Vec::with_capacity(fields_count as usize);
        for _ in 0..fields_count {
            let (description, attributes, next) = self.read_member(offset)?;
            fields.push((description, attributes));
            offset = next;
        }

        let methods_count = self.buffer.read_u16(offset)?;
        offset += 2;
        let mut methods = Vec::with_capacity(methods_count as usize);
        for _ in 0..methods_count {
            let (description, attributes, next) = self.read_member(offset)?;
            methods.push((description, attributes));
            offset = next;
        }

        let (class_attributes, _) = self.read_attributes(offset)?;
        for attribute in &class_attributes {
            if attribute.name == "BootstrapMethods" {
                continue;
            }
            visitor.visit_attribute(&self.raw_attribute(attribute)?);
        }

        for (description, attributes) in fields {
            let field = FieldDescription {
                access: description.access,
                name: description.name,
                descriptor: description.descriptor,
            };
            let raw = attributes
                .iter()
                .map(|attribute| self.raw_attribute(attribute))
                .collect::<ClassFileResult<Vec<_>>>()?;
            visitor.visit_field(&field, &raw);
        }

        for (method, attributes) in methods {
            let Some(mut method_visitor) = visitor.visit_method(&method) else {
                continue;
            };
            let mut code = None;
            for attribute in &attributes {
                if attribute.name == "Code" {
                    code = Some(attribute);
                } else {
                    method_visitor.visit_attribute(&self.raw_attribute(attribute)?);
                }
            }
            if let Some(code) = code {
                self.read_code(method_visitor.as_mut(), code.offset)?;
            }
            method_visitor.visit_end();
        }

        visitor.visit_end();
        Ok(())
    }

    fn read_member(
        &self,
        offset: usize,
    ) -> ClassFileResult<(MethodDescription, Vec<AttributeInfo>, usize)> {
        let access = self.buffer.read_u16(offset)?;
        let name = self.constant_pool.utf8(self.buffer.read_u16(offset + 2)?)?;
        let descriptor = self.constant_pool.utf8(self.buffer.read_u16(offset + 4)?)?;
        let (attributes, next) = self.read_attributes(offset + 6)?;
        Ok((
            MethodDescription::new(access, name, descriptor),
            attributes,
            next,
        ))
    }

    fn read_attributes(&self, offset: usize) -> ClassFileResult<(Vec<AttributeInfo>, usize)> {
        let count = self.buffer.read_u16(offset)?;
        let mut cursor = offset + 2;
        let mut attributes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name = self.constant_pool.utf8(self.buffer.read_u16(cursor)?)?;
            let len = self.buffer.read_u32(cursor + 2)? as usize;
            // Bounds check the payload up front so later reads can trust the length.
            self.buffer.read_bytes(cursor + 6, len)?;
            attributes.push(AttributeInfo {
                name: name.to_string(),
                offset: cursor + 6,
                len,
            });
            cursor += 6 + len;
        }
        Ok((attributes, cursor))
    }

    fn raw_attribute(&self, attribute: &AttributeInfo) -> ClassFileResult<RawAttribute> {
        Ok(RawAttribute {
            name: attribute.name.clone(),
            data: self
                .buffer
                .read_bytes(attribute.offset, attribute.len)?
                .to_vec(),
            pool_fingerprint: self.constant_pool.fingerprint(),
        })
    }

    fn read_bootstrap_methods(&self) -> ClassFileResult<Vec<BootstrapMethod>> {
        let interfaces_count = self.buffer.read_u16(self.metadata_start + 6)? as usize;
        let mut offset = self.metadata_start + 8 + interfaces_count * 2;
        for _ in 0..2 {
            let count = self.buffer.read_u16(offset)?;
            offset += 2;
            for _ in 0..count {
                let (_, next) = self.read_attributes(offset + 6)?;
                offset = next;
            }
        }
        let (attributes, _) = self.read_attributes(offset)?;
        let Some(attribute) = attributes
            .iter()
            .find(|attribute| attribute.name == "BootstrapMethods")
        else {
            return Ok(Vec::new());
        };

        let count = self.buffer.read_u16(attribute.offset)?;
        let mut cursor = attribute.offset + 2;
        let mut methods = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let handle_index = self.buffer.read_u16(cursor)?;
            let argument_count = self.buffer.read_u16(cursor + 2)?;
            cursor += 4;
            let mut arguments = Vec::with_capacity(argument_count as usize);
            for _ in 0..argument_count {
                arguments.push(self.buffer.read_u16(cursor)?);
                cursor += 2;
            }
            methods.push(BootstrapMethod {
                handle_index,
                arguments,
            });
        }
        Ok(methods)
    }

    fn read_code(&self, visitor: &mut dyn MethodVisitor, offset: usize) -> ClassFileResult<()> {
        let max_stack = self.buffer.read_u16(offset)?;
        let max_locals = self.buffer.read_u16(offset + 2)?;
        let code_length = self.buffer.read_u32(offset + 4)? as usize;
        let code_start = offset + 8;
        let code = ClassBuffer::new(self.buffer.read_bytes(code_start, code_length)?);

        let mut labels = Labels::default();
        let instructions = decode_instructions(code, &mut labels)?;

        let mut cursor = code_start + code_length;
        let handler_count = self.buffer.read_u16(cursor)?;
        cursor += 2;
        let mut handlers = Vec::with_capacity(handler_count as usize);
        for _ in 0..handler_count {
            let start = labels.at(self.buffer.read_u16(cursor)? as u32);
            let end = labels.at(self.buffer.read_u16(cursor + 2)? as u32);
            let handler = labels.at(self.buffer.read_u16(cursor + 4)? as u32);
            let catch_type = self
                .constant_pool
                .optional_class_name(self.buffer.read_u16(cursor + 6)?)?;
            handlers.push((start, end, handler, catch_type));
            cursor += 8;
        }

        let mut line_numbers: BTreeMap<u32, Vec<u16>> = BTreeMap::new();
        let mut local_variables = Vec::new();
        let mut local_variable_signatures: HashMap<(u16, u16), &str> = HashMap::new();
        let mut frames: BTreeMap<u32, Frame> = BTreeMap::new();
        let (attributes, _) = self.read_attributes(cursor)?;
        for attribute in &attributes {
            match attribute.name.as_str() {
                "LineNumberTable" => {
                    let count = self.buffer.read_u16(attribute.offset)?;
                    for entry in 0..count as usize {
                        let base = attribute.offset + 2 + entry * 4;
                        let start_pc = self.buffer.read_u16(base)? as u32;
                        let line = self.buffer.read_u16(base + 2)?;
                        labels.at(start_pc);
                        line_numbers.entry(start_pc).or_default().push(line);
                    }
                }
                "LocalVariableTable" => {
                    let count = self.buffer.read_u16(attribute.offset)?;
                    for entry in 0..count as usize {
                        let base = attribute.offset + 2 + entry * 10;
                        let start_pc = self.buffer.read_u16(base)?;
                        let length = self.buffer.read_u16(base + 2)?;
                        let name = self.constant_pool.utf8(self.buffer.read_u16(base + 4)?)?;
                        let descriptor =
                            self.constant_pool.utf8(self.buffer.read_u16(base + 6)?)?;
                        let index = self.buffer.read_u16(base + 8)?;
                        let start = labels.at(start_pc as u32);
                        let end = labels.at(start_pc as u32 + length as u32);
                        local_variables.push((name, descriptor, start_pc, start, end, index));
                    }
                }
                "LocalVariableTypeTable" => {
                    let count = self.buffer.read_u16(attribute.offset)?;
                    for entry in 0..count as usize {
                        let base = attribute.offset + 2 + entry * 10;
                        let start_pc = self.buffer.read_u16(base)?;
                        let signature =
                            self.constant_pool.utf8(self.buffer.read_u16(base + 6)?)?;
                        let index = self.buffer.read_u16(base + 8)?;
                        local_variable_signatures.insert((start_pc, index), signature);
                    }
                }
                "StackMapTable" => {
                    frames = self.read_frames(attribute.offset, &mut labels)?;
                }
                _ => {}
            }
        }

        visitor.visit_code();
        for (start, end, handler, catch_type) in &handlers {
            visitor.visit_try_catch_block(*start, *end, *handler, *catch_type);
        }
        for (instruction_offset, instruction) in &instructions {
            self.visit_position(
                visitor,
                *instruction_offset,
                &labels,
                &line_numbers,
                &frames,
            );
            self.visit_instruction(visitor, instruction)?;
        }
        self.visit_position(
            visitor,
            code_length as u32,
            &labels,
            &line_numbers,
            &frames,
        );
        for (name, descriptor, start_pc, start, end, index) in local_variables {
            let signature = local_variable_signatures.get(&(start_pc, index)).copied();
            visitor.visit_local_variable(name, descriptor, signature, start, end, index);
        }
        visitor.visit_maxs(max_stack, max_locals);
        Ok(())
    }

    fn visit_position(
        &self,
        visitor: &mut dyn MethodVisitor,
        offset: u32,
        labels: &Labels,
        line_numbers: &BTreeMap<u32, Vec<u16>>,
        frames: &BTreeMap<u32, Frame>,
    ) {
        let Some(label) = labels.get(offset) else {
            return;
        };
        visitor.visit_label(label);
        if let Some(lines) = line_numbers.get(&offset) {
            for line in lines {
                visitor.visit_line_number(*line, label);
            }
        }
        if let Some(frame) = frames.get(&offset) {
            visitor.visit_frame(frame);
        }
    }

    fn visit_instruction(
        &self,
        visitor: &mut dyn MethodVisitor,
        instruction: &Decoded,
    ) -> ClassFileResult<()> {
        let pool = &self.constant_pool;
        match instruction {
            Decoded::Insn(opcode) => visitor.visit_insn(*opcode),
            Decoded::Int(opcode, operand) => visitor.visit_int_insn(*opcode, *operand),
            Decoded::Var(opcode, var) => visitor.visit_var_insn(*opcode, *var),
            Decoded::Type(opcode, index) => {
                visitor.visit_type_insn(*opcode, pool.class_name(*index)?)
            }
            Decoded::Field(opcode, index) => {
                let member = pool.member_ref(*index)?;
                visitor.visit_field_insn(*opcode, member.owner, member.name, member.descriptor);
            }
            Decoded::Method(opcode, index) => {
                let member = pool.member_ref(*index)?;
                visitor.visit_method_insn(
                    *opcode,
                    member.owner,
                    member.name,
                    member.descriptor,
                    member.is_interface,
                );
            }
            Decoded::InvokeDynamic(index) => {
                let ConstantPoolEntry::InvokeDynamic {
                    bootstrap_index,
                    name_and_type_index,
                } = pool.entry(*index)?
                else {
                    return Err(ClassFileError::UnexpectedConstant(*index));
                };
                let (name, descriptor) = pool.name_and_type(*name_and_type_index)?;
                let bootstrap = self
                    .bootstrap_methods
                    .get(*bootstrap_index as usize)
                    .ok_or(ClassFileError::UnexpectedConstant(*index))?;
                let handle = pool.handle(bootstrap.handle_index)?;
                let arguments = bootstrap
                    .arguments
                    .iter()
                    .map(|argument| pool.constant(*argument, &self.bootstrap_methods))
                    .collect::<ClassFileResult<Vec<_>>>()?;
                visitor.visit_invoke_dynamic_insn(name, descriptor, &handle, &arguments);
            }
            Decoded::Jump(opcode, label) => visitor.visit_jump_insn(*opcode, *label),
            Decoded::Ldc(index) => {
                let constant = pool.constant(*index, &self.bootstrap_methods)?;
                visitor.visit_ldc_insn(&constant);
            }
            Decoded::Iinc(var, increment) => visitor.visit_iinc_insn(*var, *increment),
            Decoded::TableSwitch {
                min,
                max,
                default,
                labels,
            } => visitor.visit_table_switch_insn(*min, *max, *default, labels),
            Decoded::LookupSwitch {
                default,
                keys,
                labels,
            } => visitor.visit_lookup_switch_insn(*default, keys, labels),
            Decoded::MultiANewArray(index, dimensions) => {
                visitor.visit_multi_a_new_array_insn(pool.class_name(*index)?, *dimensions);
            }
        }
        Ok(())
    }

    fn read_frames(
        &self,
        offset: usize,
        labels: &mut Labels,
    ) -> ClassFileResult<BTreeMap<u32, Frame>> {
        let count = self.buffer.read_u16(offset)?;
        let mut cursor = offset + 2;
        let mut previous: Option<u32> = None;
        let mut frames = BTreeMap::new();
        for _ in 0..count {
            let frame_type = self.buffer.read_u8(cursor)?;
            cursor += 1;
            let (delta, frame) = match frame_type {
                0..=63 => (frame_type as u32, Frame::Same),
                64..=127 => {
                    let stack = self.read_verification_type(&mut cursor, labels)?;
                    ((frame_type - 64) as u32, Frame::SameLocals1StackItem(stack))
                }
                247 => {
                    let delta = self.buffer.read_u16(cursor)? as u32;
                    cursor += 2;
                    let stack = self.read_verification_type(&mut cursor, labels)?;
                    (delta, Frame::SameLocals1StackItem(stack))
                }
                248..=250 => {
                    let delta = self.buffer.read_u16(cursor)? as u32;
                    cursor += 2;
                    (delta, Frame::Chop(251 - frame_type))
                }
                251 => {
                    let delta = self.buffer.read_u16(cursor)? as u32;
                    cursor += 2;
                    (delta, Frame::Same)
                }
                252..=254 => {
                    let delta = self.buffer.read_u16(cursor)? as u32;
                    cursor += 2;
                    let mut locals = Vec::new();
                    for _ in 0..(frame_type - 251) {
                        locals.push(self.read_verification_type(&mut cursor, labels)?);
                    }
                    (delta, Frame::Append(locals))
                }
                255 => {
                    let delta = self.buffer.read_u16(cursor)? as u32;
                    cursor += 2;
                    let local_count = self.buffer.read_u16(cursor)?;
                    cursor += 2;
                    let mut locals = Vec::with_capacity(local_count as usize);
                    for _ in 0..local_count {
                        locals.push(self.read_verification_type(&mut cursor, labels)?);
                    }
                    let stack_count = self.buffer.read_u16(cursor)?;
                    cursor += 2;
                    let mut stack = Vec::with_capacity(stack_count as usize);
                    for _ in 0..stack_count {
                        stack.push(self.read_verification_type(&mut cursor, labels)?);
                    }
                    (delta, Frame::Full { locals, stack })
                }
                other => return Err(ClassFileError::BadFrameType(other)),
            };
            let frame_offset = match previous {
                None => delta,
                Some(previous) => previous + delta + 1,
            };
            labels.at(frame_offset);
            frames.insert(frame_offset, frame);
            previous = Some(frame_offset);
        }
        Ok(frames)
    }

    fn read_verification_type(
        &self,
        cursor: &mut usize,
        labels: &mut Labels,
    ) -> ClassFileResult<VerificationType> {
        let tag = self.buffer.read_u8(*cursor)?;
        *cursor += 1;
        let ty = match tag {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => {
                let index = self.buffer.read_u16(*cursor)?;
                *cursor += 2;
                VerificationType::Object(self.constant_pool.class_name(index)?.to_string())
            }
            8 => {
                let offset = self.buffer.read_u16(*cursor)?;
                *cursor += 2;
                VerificationType::Uninitialized(labels.at(offset as u32))
            }
            other => return Err(ClassFileError::BadVerificationType(other)),
        };
        Ok(ty)
    }
}

/// Labels created for bytecode offsets, on first reference.
#[derive(Default)]
struct Labels {
    by_offset: HashMap<u32, Label>,
}

impl Labels {
    fn at(&mut self, offset: u32) -> Label {
        *self.by_offset.entry(offset).or_default()
    }

    fn get(&self, offset: u32) -> Option<Label> {
        self.by_offset.get(&offset).copied()
    }
}

/// Instruction decoded from the code array, with constant pool operands still unresolved.
enum Decoded {
    Insn(u8),
    Int(u8, i32),
    Var(u8, u16),
    Type(u8, u16),
    Field(u8, u16),
    Method(u8, u16),
    InvokeDynamic(u16),
    Jump(u8, Label),
    Ldc(u16),
    Iinc(u16, i16),
    TableSwitch {
        min: i32,
        max: i32,
        default: Label,
        labels: Vec<Label>,
    },
    LookupSwitch {
        default: Label,
        keys: Vec<i32>,
        labels: Vec<Label>,
    },
    MultiANewArray(u16, u8),
}

fn decode_instructions(
    code: ClassBuffer<'_>,
    labels: &mut Labels,
) -> ClassFileResult<Vec<(u32, Decoded)>> {
    let mut instructions = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let opcode = code.read_u8(offset)?;
        let target = |delta: i32| (offset as i64 + delta as i64) as u32;
        let (decoded, length) = match opcode {
            opcodes::NOP..=opcodes::DCONST_1 => (Decoded::Insn(opcode), 1),
            opcodes::BIPUSH => (
                Decoded::Int(opcode, code.read_i8(offset + 1)? as i32),
                2,
            ),
            opcodes::SIPUSH => (
                Decoded::Int(opcode, code.read_i16(offset + 1)? as i32),
                3,
            ),
            opcodes::LDC => (Decoded::Ldc(code.read_u8(offset + 1)? as u16), 2),
            opcodes::LDC_W | opcodes::LDC2_W => (Decoded::Ldc(code.read_u16(offset + 1)?), 3),
            opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE | opcodes::RET => {
                (
                    Decoded::Var(opcode, code.read_u8(offset + 1)? as u16),
                    2,
                )
            }
            opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
                let relative = opcode - opcodes::ILOAD_0;
                (
                    Decoded::Var(opcodes::ILOAD + relative / 4, (relative % 4) as u16),
                    1,
                )
            }
            opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
                let relative = opcode - opcodes::ISTORE_0;
                (
                    Decoded::Var(opcodes::ISTORE + relative / 4, (relative % 4) as u16),
                    1,
                )
            }
            opcodes::IINC => (
                Decoded::Iinc(
                    code.read_u8(offset + 1)? as u16,
                    code.read_i8(offset + 2)? as i16,
                ),
                3,
            ),
            opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
                let delta = code.read_i16(offset + 1)? as i32;
                (Decoded::Jump(opcode, labels.at(target(delta))), 3)
            }
            opcodes::GOTO_W | opcodes::JSR_W => {
                let delta = code.read_i32(offset + 1)?;
                let normalized = if opcode == opcodes::GOTO_W {
                    opcodes::GOTO
                } else {
                    opcodes::JSR
                };
                (Decoded::Jump(normalized, labels.at(target(delta))), 5)
            }
            opcodes::TABLESWITCH => {
                let base = offset + 1 + switch_padding(offset);
                let default = labels.at(target(code.read_i32(base)?));
                let min = code.read_i32(base + 4)?;
                let max = code.read_i32(base + 8)?;
                if max < min {
                    return Err(ClassFileError::UnsupportedOpcode(opcode));
                }
                let count = (max as i64 - min as i64 + 1) as usize;
                let mut targets = Vec::with_capacity(count);
                for entry in 0..count {
                    targets.push(labels.at(target(code.read_i32(base + 12 + entry * 4)?)));
                }
                (
                    Decoded::TableSwitch {
                        min,
                        max,
                        default,
                        labels: targets,
                    },
                    base + 12 + count * 4 - offset,
                )
            }
            opcodes::LOOKUPSWITCH => {
                let base = offset + 1 + switch_padding(offset);
                let default = labels.at(target(code.read_i32(base)?));
                let pairs = code.read_i32(base + 4)?;
                if pairs < 0 {
                    return Err(ClassFileError::UnsupportedOpcode(opcode));
                }
                let mut keys = Vec::with_capacity(pairs as usize);
                let mut targets = Vec::with_capacity(pairs as usize);
                for entry in 0..pairs as usize {
                    keys.push(code.read_i32(base + 8 + entry * 8)?);
                    targets.push(labels.at(target(code.read_i32(base + 12 + entry * 8)?)));
                }
                (
                    Decoded::LookupSwitch {
                        default,
                        keys,
                        labels: targets,
                    },
                    base + 8 + pairs as usize * 8 - offset,
                )
            }
            opcodes::GETSTATIC..=opcodes::PUTFIELD => {
                (Decoded::Field(opcode, code.read_u16(offset + 1)?), 3)
            }
            opcodes::INVOKEVIRTUAL..=opcodes::INVOKESTATIC => {
                (Decoded::Method(opcode, code.read_u16(offset + 1)?), 3)
            }
            opcodes::INVOKEINTERFACE => (Decoded::Method(opcode, code.read_u16(offset + 1)?), 5),
            opcodes::INVOKEDYNAMIC => (Decoded::InvokeDynamic(code.read_u16(offset + 1)?), 5),
            opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF => {
                (Decoded::Type(opcode, code.read_u16(offset + 1)?), 3)
            }
            opcodes::NEWARRAY => (
                Decoded::Int(opcode, code.read_u8(offset + 1)? as i32),
                2,
            ),
            opcodes::WIDE => {
                let wide_opcode = code.read_u8(offset + 1)?;
                let var = code.read_u16(offset + 2)?;
                if wide_opcode == opcodes::IINC {
                    (Decoded::Iinc(var, code.read_i16(offset + 4)?), 6)
                } else {
                    (Decoded::Var(wide_opcode, var), 4)
                }
            }
            opcodes::MULTIANEWARRAY => (
                Decoded::MultiANewArray(code.read_u16(offset + 1)?, code.read_u8(offset + 3)?),
                4,
            ),
            opcodes::IALOAD..=opcodes::SALOAD
            | opcodes::IASTORE..=opcodes::LXOR
            | opcodes::I2L..=opcodes::DCMPG
            | opcodes::IRETURN..=opcodes::RETURN
            | opcodes::ARRAYLENGTH
            | opcodes::ATHROW
            | opcodes::MONITORENTER
            | opcodes::MONITOREXIT => (Decoded::Insn(opcode), 1),
            other => return Err(ClassFileError::UnsupportedOpcode(other)),
        };
        instructions.push((offset as u32, decoded));
        offset += length;
    }
    Ok(instructions)
}

/// Number of padding bytes after a switch opcode at `offset`.
pub(crate) fn switch_padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::visitor::RecordingMethodVisitor;
    use crate::bytecode::writer::ClassWriter;
    use crate::bytecode::Constant;
    use crate::ir::MethodDescription;

    struct MethodRecorder {
        target: String,
        recorder: RecordingMethodVisitor,
    }

    impl ClassVisitor for MethodRecorder {
        fn visit_method(
            &mut self,
            method: &MethodDescription,
        ) -> Option<Box<dyn MethodVisitor + '_>> {
            if method.name == self.target {
                Some(Box::new(&mut self.recorder))
            } else {
                None
            }
        }
    }

    fn sample_class() -> Vec<u8> {
        let mut writer = ClassWriter::new(0);
        writer.visit(&ClassHeader {
            minor_version: 0,
            major_version: 52,
            access: opcodes::ACC_PUBLIC | opcodes::ACC_SUPER,
            name: "com/example/Sample".to_string(),
            super_name: Some("java/lang/Object".to_string()),
            interfaces: vec!["java/lang/Runnable".to_string()],
        });
        {
            let mut method = writer
                .visit_method(&MethodDescription::new(opcodes::ACC_PUBLIC, "run", "()V"))
                .expect("method writer");
            method.visit_code();
            method.visit_var_insn(opcodes::ALOAD, 0);
            method.visit_ldc_insn(&Constant::String("hello".to_string()));
            method.visit_method_insn(
                opcodes::INVOKEVIRTUAL,
                "java/lang/Object",
                "equals",
                "(Ljava/lang/Object;)Z",
                false,
            );
            method.visit_insn(opcodes::POP);
            method.visit_var_insn(opcodes::ILOAD, 300);
            method.visit_insn(opcodes::POP);
            method.visit_insn(opcodes::RETURN);
            method.visit_maxs(2, 301);
            method.visit_end();
        }
        writer.visit_end();
        writer.to_bytes().expect("write class")
    }

    #[test]
    fn reads_header_fields() {
        let bytes = sample_class();
        let reader = ClassReader::new(&bytes).expect("read class");

        assert_eq!(reader.name().expect("name"), "com/example/Sample");
        assert_eq!(
            reader.super_name().expect("super name"),
            Some("java/lang/Object")
        );
        assert_eq!(
            reader.interfaces().expect("interfaces"),
            vec!["java/lang/Runnable"]
        );
        let header = reader.header().expect("header");
        assert_eq!(header.major_version, 52);
    }

    #[test]
    fn normalizes_short_and_wide_variable_forms() {
        let bytes = sample_class();
        let reader = ClassReader::new(&bytes).expect("read class");
        let mut visitor = MethodRecorder {
            target: "run".to_string(),
            recorder: RecordingMethodVisitor::default(),
        };

        reader.accept(&mut visitor).expect("accept");

        assert_eq!(
            visitor.recorder.events,
            vec![
                "code",
                "var 0x19 0",
                "ldc String(\"hello\")",
                "method 0xb6 java/lang/Object.equals(Ljava/lang/Object;)Z",
                "insn 0x57",
                "var 0x15 300",
                "insn 0x57",
                "insn 0xb1",
                "maxs 2 301",
                "end",
            ]
        );
    }

    #[test]
    fn rejects_non_class_bytes() {
        assert!(matches!(
            ClassReader::new(b"no"),
            Err(ClassFileError::OutOfBounds { .. })
        ));
        assert!(matches!(
            ClassReader::new(b"nope"),
            Err(ClassFileError::BadMagic)
        ));
    }
}
