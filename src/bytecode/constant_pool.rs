use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::bytecode::visitor::{Constant, ConstantDynamic, Handle};
use crate::bytecode::{ClassBuffer, ClassFileError, ClassFileResult};
use crate::opcodes;

const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELDREF: u8 = 9;
const TAG_METHODREF: u8 = 10;
const TAG_INTERFACE_METHODREF: u8 = 11;
const TAG_NAME_AND_TYPE: u8 = 12;
const TAG_METHOD_HANDLE: u8 = 15;
const TAG_METHOD_TYPE: u8 = 16;
const TAG_DYNAMIC: u8 = 17;
const TAG_INVOKE_DYNAMIC: u8 = 18;
const TAG_MODULE: u8 = 19;
const TAG_PACKAGE: u8 = 20;

/// Parsed constant pool entry. Index 0 and the slot after a long or double are `Unusable`.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstantPoolEntry {
    Unusable,
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class {
        name_index: u16,
    },
    String {
        string_index: u16,
    },
    FieldRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    MethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    InterfaceMethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    NameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    MethodHandle {
        kind: u8,
        reference_index: u16,
    },
    MethodType {
        descriptor_index: u16,
    },
    Dynamic {
        bootstrap_index: u16,
        name_and_type_index: u16,
    },
    InvokeDynamic {
        bootstrap_index: u16,
        name_and_type_index: u16,
    },
    Module {
        name_index: u16,
    },
    Package {
        name_index: u16,
    },
}

/// Resolved field or method reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberRef<'pool> {
    pub owner: &'pool str,
    pub name: &'pool str,
    pub descriptor: &'pool str,
    pub is_interface: bool,
}

/// Entry of the `BootstrapMethods` attribute, in constant pool indices.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BootstrapMethod {
    pub handle_index: u16,
    pub arguments: Vec<u16>,
}

/// Constant pool of a parsed class, keeping its raw bytes for verbatim copies.
#[derive(Clone, Debug)]
pub struct ConstantPool {
    entries: Vec<ConstantPoolEntry>,
    raw: Vec<u8>,
    fingerprint: u64,
}

impl ConstantPool {
    /// Parses the pool starting at the `constant_pool_count` field. Returns the pool and the
    /// offset of the first byte after it.
    pub(crate) fn parse(buffer: ClassBuffer<'_>, start: usize) -> ClassFileResult<(Self, usize)> {
        let count = buffer.read_u16(start)? as usize;
        let mut entries = Vec::with_capacity(count.max(1));
        entries.push(ConstantPoolEntry::Unusable);
        let mut offset = start + 2;
        while entries.len() < count {
            let tag = buffer.read_u8(offset)?;
            offset += 1;
            let mut wide = false;
            let entry = match tag {
                TAG_UTF8 => {
                    let len = buffer.read_u16(offset)? as usize;
                    let bytes = buffer.read_bytes(offset + 2, len)?;
                    offset += 2 + len;
                    ConstantPoolEntry::Utf8(decode_modified_utf8(bytes))
                }
                TAG_INTEGER => {
                    let value = buffer.read_i32(offset)?;
                    offset += 4;
                    ConstantPoolEntry::Integer(value)
                }
                TAG_FLOAT => {
                    let value = f32::from_bits(buffer.read_u32(offset)?);
                    offset += 4;
                    ConstantPoolEntry::Float(value)
                }
                TAG_LONG => {
                    let value = buffer.read_u64(offset)? as i64;
                    offset += 8;
                    wide = true;
                    ConstantPoolEntry::Long(value)
                }
                TAG_DOUBLE => {
                    let value = f64::from_bits(buffer.read_u64(offset)?);
                    offset += 8;
                    wide = true;
                    ConstantPoolEntry::Double(value)
                }
                TAG_CLASS => {
                    let name_index = buffer.read_u16(offset)?;
                    offset += 2;
                    ConstantPoolEntry::Class { name_index }
                }
                TAG_STRING => {
                    let string_index = buffer.read_u16(offset)?;
                    offset += 2;
                    ConstantPoolEntry::String { string_index }
                }
                TAG_FIELDREF | TAG_METHODREF | TAG_INTERFACE_METHODREF => {
                    let class_index = buffer.read_u16(offset)?;
                    let name_and_type_index = buffer.read_u16(offset + 2)?;
                    offset += 4;
                    match tag {
                        TAG_FIELDREF => ConstantPoolEntry::FieldRef {
                            class_index,
                            name_and_type_index,
                        },
                        TAG_METHODREF => ConstantPoolEntry::MethodRef {
                            class_index,
                            name_and_type_index,
                        },
                        _ => ConstantPoolEntry::InterfaceMethodRef {
                            class_index,
                            name_and_type_index,
                        },
                    }
                }
                TAG_NAME_AND_TYPE => {
                    let name_index = buffer.read_u16(offset)?;
                    let descriptor_index = buffer.read_u16(offset + 2)?;
                    offset += 4;
                    ConstantPoolEntry::NameAndType {
                        name_index,
                        descriptor_index,
                    }
                }
                TAG_METHOD_HANDLE => {
                    let kind = buffer.read_u8(offset)?;
                    let reference_index = buffer.read_u16(offset + 1)?;
                    offset += 3;
                    ConstantPoolEntry::MethodHandle {
                        kind,
                        reference_index,
                    }
                }
                TAG_METHOD_TYPE => {
                    let descriptor_index = buffer.read_u16(offset)?;
                    offset += 2;
                    ConstantPoolEntry::MethodType { descriptor_index }
                }
                TAG_DYNAMIC | TAG_INVOKE_DYNAMIC => {
                    let bootstrap_index = buffer.read_u16(offset)?;
                    let name_and_type_index = buffer.read_u16(offset + 2)?;
                    offset += 4;
                    if tag == TAG_DYNAMIC {
                        ConstantPoolEntry::Dynamic {
                            bootstrap_index,
                            name_and_type_index,
                        }
                    } else {
                        ConstantPoolEntry::InvokeDynamic {
                            bootstrap_index,
                            name_and_type_index,
                        }
                    }
                }
                TAG_MODULE | TAG_PACKAGE => {
                    let name_index = buffer.read_u16(offset)?;
                    offset += 2;
                    if tag == TAG_MODULE {
                        ConstantPoolEntry::Module { name_index }
                    } else {
                        ConstantPoolEntry::Package { name_index }
                    }
                }
                other => return Err(ClassFileError::UnknownConstantTag(other)),
            };
            entries.push(entry);
            if wide {
                entries.push(ConstantPoolEntry::Unusable);
            }
        }
        if entries.len() > count.max(1) {
            return Err(ClassFileError::BadConstantIndex(count as u16));
        }

        let raw = buffer.read_bytes(start + 2, offset - start - 2)?.to_vec();
        let mut hasher = DefaultHasher::new();
        raw.hash(&mut hasher);
        let fingerprint = hasher.finish();
        Ok((
            Self {
                entries,
                raw,
                fingerprint,
            },
            offset,
        ))
    }

    /// Number of slots, including the unused slot 0 (the `constant_pool_count` value).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Identity of this pool; attributes read from it can only be copied into writers that
    /// start from the same pool.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub(crate) fn raw_entries(&self) -> &[u8] {
        &self.raw
    }

    pub fn entries(&self) -> &[ConstantPoolEntry] {
        &self.entries
    }

    pub fn entry(&self, index: u16) -> ClassFileResult<&ConstantPoolEntry> {
        match self.entries.get(index as usize) {
            Some(ConstantPoolEntry::Unusable) | None => {
                Err(ClassFileError::BadConstantIndex(index))
            }
            Some(entry) => Ok(entry),
        }
    }

    pub fn utf8(&self, index: u16) -> ClassFileResult<&str> {
        match self.entry(index)? {
            ConstantPoolEntry::Utf8(value) => Ok(value),
            _ => Err(ClassFileError::UnexpectedConstant(index)),
        }
    }

    pub fn class_name(&self, index: u16) -> ClassFileResult<&str> {
        match self.entry(index)? {
            ConstantPoolEntry::Class { name_index } => self.utf8(*name_index),
            _ => Err(ClassFileError::UnexpectedConstant(index)),
        }
    }

    /// Class name at `index`, where index 0 means "none".
    pub fn optional_class_name(&self, index: u16) -> ClassFileResult<Option<&str>> {
        if index == 0 {
            return Ok(None);
        }
        self.class_name(index).map(Some)
    }

    pub fn name_and_type(&self, index: u16) -> ClassFileResult<(&str, &str)> {
        match self.entry(index)? {
            ConstantPoolEntry::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => Err(ClassFileError::UnexpectedConstant(index)),
        }
    }

    pub fn member_ref(&self, index: u16) -> ClassFileResult<MemberRef<'_>> {
        let (class_index, name_and_type_index, is_interface) = match self.entry(index)? {
            ConstantPoolEntry::FieldRef {
                class_index,
                name_and_type_index,
            }
            | ConstantPoolEntry::MethodRef {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index, false),
            ConstantPoolEntry::InterfaceMethodRef {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index, true),
            _ => return Err(ClassFileError::UnexpectedConstant(index)),
        };
        let owner = self.class_name(class_index)?;
        let (name, descriptor) = self.name_and_type(name_and_type_index)?;
        Ok(MemberRef {
            owner,
            name,
            descriptor,
            is_interface,
        })
    }

    pub fn handle(&self, index: u16) -> ClassFileResult<Handle> {
        match self.entry(index)? {
            ConstantPoolEntry::MethodHandle {
                kind,
                reference_index,
            } => {
                let member = self.member_ref(*reference_index)?;
                Ok(Handle::new(
                    *kind,
                    member.owner,
                    member.name,
                    member.descriptor,
                    member.is_interface,
                ))
            }
            _ => Err(ClassFileError::UnexpectedConstant(index)),
        }
    }

    /// Resolves a loadable constant. Dynamic constants need the class's bootstrap table.
    pub fn constant(
        &self,
        index: u16,
        bootstrap_methods: &[BootstrapMethod],
    ) -> ClassFileResult<Constant> {
        self.constant_at_depth(index, bootstrap_methods, 0)
    }

    fn constant_at_depth(
        &self,
        index: u16,
        bootstrap_methods: &[BootstrapMethod],
        depth: usize,
    ) -> ClassFileResult<Constant> {
        if depth > 32 {
            return Err(ClassFileError::TooDeepConstantNesting);
        }
        let constant = match self.entry(index)? {
            ConstantPoolEntry::Integer(value) => Constant::Integer(*value),
            ConstantPoolEntry::Float(value) => Constant::Float(*value),
            ConstantPoolEntry::Long(value) => Constant::Long(*value),
            ConstantPoolEntry::Double(value) => Constant::Double(*value),
            ConstantPoolEntry::String { string_index } => {
                Constant::String(self.utf8(*string_index)?.to_string())
            }
            ConstantPoolEntry::Class { name_index } => {
                Constant::Class(self.utf8(*name_index)?.to_string())
            }
            ConstantPoolEntry::MethodType { descriptor_index } => {
                Constant::MethodType(self.utf8(*descriptor_index)?.to_string())
            }
            ConstantPoolEntry::MethodHandle { .. } => Constant::MethodHandle(self.handle(index)?),
            ConstantPoolEntry::Dynamic {
                bootstrap_index,
                name_and_type_index,
            } => {
                let (name, descriptor) = self.name_and_type(*name_and_type_index)?;
                let bootstrap = bootstrap_methods
                    .get(*bootstrap_index as usize)
                    .ok_or(ClassFileError::UnexpectedConstant(index))?;
                let mut arguments = Vec::with_capacity(bootstrap.arguments.len());
                for argument in &bootstrap.arguments {
                    arguments.push(self.constant_at_depth(
                        *argument,
                        bootstrap_methods,
                        depth + 1,
                    )?);
                }
                Constant::Dynamic(Box::new(ConstantDynamic {
                    name: name.to_string(),
                    descriptor: descriptor.to_string(),
                    bootstrap: self.handle(bootstrap.handle_index)?,
                    arguments,
                }))
            }
            _ => return Err(ClassFileError::UnexpectedConstant(index)),
        };
        Ok(constant)
    }
}

/// Decodes the JVM's modified UTF-8. Malformed sequences and unpaired surrogates become
/// U+FFFD; the raw pool bytes are what gets copied, so this only affects lookups.
pub fn decode_modified_utf8(bytes: &[u8]) -> String {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        let byte = bytes[index];
        if byte & 0x80 == 0 {
            units.push(byte as u16);
            index += 1;
        } else if byte & 0xe0 == 0xc0 && index + 1 < bytes.len() {
            units.push((((byte & 0x1f) as u16) << 6) | (bytes[index + 1] & 0x3f) as u16);
            index += 2;
        } else if byte & 0xf0 == 0xe0 && index + 2 < bytes.len() {
            units.push(
                (((byte & 0x0f) as u16) << 12)
                    | (((bytes[index + 1] & 0x3f) as u16) << 6)
                    | (bytes[index + 2] & 0x3f) as u16,
            );
            index += 3;
        } else {
            units.push(0xfffd);
            index += 1;
        }
    }
    String::from_utf16_lossy(&units)
}

/// Encodes a string as modified UTF-8 (`\0` as two bytes, supplementary characters as
/// surrogate pairs).
pub fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007f => out.push(unit as u8),
            0x0000 | 0x0080..=0x07ff => {
                out.push(0xc0 | ((unit >> 6) & 0x1f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
            _ => {
                out.push(0xe0 | ((unit >> 12) & 0x0f) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
        }
    }
    out
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum SymbolKey {
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(String),
    String(String),
    Field(String, String, String),
    Method(String, String, String),
    InterfaceMethod(String, String, String),
    NameAndType(String, String),
    MethodHandle(u8, String, String, String, bool),
    MethodType(String),
    Dynamic(u16, String, String),
    InvokeDynamic(u16, String, String),
}

/// Constant pool and bootstrap table under construction by the class writer.
///
/// When seeded from a parsed pool, every existing entry keeps its index and is reused by
/// later lookups, so only genuinely new constants are appended.
#[derive(Clone, Debug)]
pub(crate) struct SymbolTable {
    bytes: Vec<u8>,
    next_index: u32,
    symbols: HashMap<SymbolKey, u16>,
    bootstrap_methods: Vec<BootstrapMethod>,
    bootstrap_lookup: HashMap<BootstrapMethod, u16>,
    source_fingerprint: Option<u64>,
}

impl SymbolTable {
    pub(crate) fn new() -> Self {
        Self {
            bytes: Vec::new(),
            next_index: 1,
            symbols: HashMap::new(),
            bootstrap_methods: Vec::new(),
            bootstrap_lookup: HashMap::new(),
            source_fingerprint: None,
        }
    }

    pub(crate) fn from_pool(pool: &ConstantPool, bootstrap_methods: &[BootstrapMethod]) -> Self {
        let mut table = Self {
            bytes: pool.raw_entries().to_vec(),
            next_index: pool.len().max(1) as u32,
            symbols: HashMap::new(),
            bootstrap_methods: bootstrap_methods.to_vec(),
            bootstrap_lookup: HashMap::new(),
            source_fingerprint: Some(pool.fingerprint()),
        };
        for index in 1..pool.len() {
            if let Some(key) = symbol_key(pool, index as u16) {
                table.symbols.entry(key).or_insert(index as u16);
            }
        }
        for (index, method) in bootstrap_methods.iter().enumerate() {
            table
                .bootstrap_lookup
                .entry(method.clone())
                .or_insert(index as u16);
        }
        table
    }

    pub(crate) fn source_fingerprint(&self) -> Option<u64> {
        self.source_fingerprint
    }

    /// Value of `constant_pool_count`.
    pub(crate) fn count(&self) -> u16 {
        self.next_index as u16
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn bootstrap_methods(&self) -> &[BootstrapMethod] {
        &self.bootstrap_methods
    }

    fn add(&mut self, key: SymbolKey, slots: u32, encoded: &[u8]) -> ClassFileResult<u16> {
        if let Some(index) = self.symbols.get(&key) {
            return Ok(*index);
        }
        if self.next_index + slots > u16::MAX as u32 {
            return Err(ClassFileError::ConstantPoolOverflow);
        }
        let index = self.next_index as u16;
        self.bytes.extend_from_slice(encoded);
        self.next_index += slots;
        self.symbols.insert(key, index);
        Ok(index)
    }

    pub(crate) fn utf8(&mut self, value: &str) -> ClassFileResult<u16> {
        if let Some(index) = self.symbols.get(&SymbolKey::Utf8(value.to_string())) {
            return Ok(*index);
        }
        let encoded = encode_modified_utf8(value);
        if encoded.len() > u16::MAX as usize {
            return Err(ClassFileError::ConstantPoolOverflow);
        }
        let mut bytes = Vec::with_capacity(encoded.len() + 3);
        bytes.push(TAG_UTF8);
        bytes.extend_from_slice(&(encoded.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&encoded);
        self.add(SymbolKey::Utf8(value.to_string()), 1, &bytes)
    }

    fn indexed(&mut self, key: SymbolKey, tag: u8, operands: &[u16]) -> ClassFileResult<u16> {
        let mut bytes = vec![tag];
        for operand in operands {
            bytes.extend_from_slice(&operand.to_be_bytes());
        }
        self.add(key, 1, &bytes)
    }

    pub(crate) fn class(&mut self, name: &str) -> ClassFileResult<u16> {
        let name_index = self.utf8(name)?;
        self.indexed(SymbolKey::Class(name.to_string()), TAG_CLASS, &[name_index])
    }

    pub(crate) fn string(&mut self, value: &str) -> ClassFileResult<u16> {
        let string_index = self.utf8(value)?;
        self.indexed(SymbolKey::String(value.to_string()), TAG_STRING, &[string_index])
    }

    pub(crate) fn integer(&mut self, value: i32) -> ClassFileResult<u16> {
        let mut bytes = vec![TAG_INTEGER];
        bytes.extend_from_slice(&value.to_be_bytes());
        self.add(SymbolKey::Integer(value), 1, &bytes)
    }

    pub(crate) fn float(&mut self, value: f32) -> ClassFileResult<u16> {
        let mut bytes = vec![TAG_FLOAT];
        bytes.extend_from_slice(&value.to_bits().to_be_bytes());
        self.add(SymbolKey::Float(value.to_bits()), 1, &bytes)
    }

    pub(crate) fn long(&mut self, value: i64) -> ClassFileResult<u16> {
        let mut bytes = vec![TAG_LONG];
        bytes.extend_from_slice(&value.to_be_bytes());
        self.add(SymbolKey::Long(value), 2, &bytes)
    }

    pub(crate) fn double(&mut self, value: f64) -> ClassFileResult<u16> {
        let mut bytes = vec![TAG_DOUBLE];
        bytes.extend_from_slice(&value.to_bits().to_be_bytes());
        self.add(SymbolKey::Double(value.to_bits()), 2, &bytes)
    }

    pub(crate) fn name_and_type(&mut self, name: &str, descriptor: &str) -> ClassFileResult<u16> {
        let name_index = self.utf8(name)?;
        let descriptor_index = self.utf8(descriptor)?;
        self.indexed(
            SymbolKey::NameAndType(name.to_string(), descriptor.to_string()),
            TAG_NAME_AND_TYPE,
            &[name_index, descriptor_index],
        )
    }

    pub(crate) fn field_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> ClassFileResult<u16> {
        let class_index = self.class(owner)?;
        let name_and_type_index = self.name_and_type(name, descriptor)?;
        self.indexed(
            SymbolKey::Field(owner.to_string(), name.to_string(), descriptor.to_string()),
            TAG_FIELDREF,
            &[class_index, name_and_type_index],
        )
    }

    pub(crate) fn method_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> ClassFileResult<u16> {
        let class_index = self.class(owner)?;
        let name_and_type_index = self.name_and_type(name, descriptor)?;
        let (key, tag) = if is_interface {
            (
                SymbolKey::InterfaceMethod(
                    owner.to_string(),
                    name.to_string(),
                    descriptor.to_string(),
                ),
                TAG_INTERFACE_METHODREF,
            )
        } else {
            (
                SymbolKey::Method(owner.to_string(), name.to_string(), descriptor.to_string()),
                TAG_METHODREF,
            )
        };
        self.indexed(key, tag, &[class_index, name_and_type_index])
    }

    pub(crate) fn method_type(&mut self, descriptor: &str) -> ClassFileResult<u16> {
        let descriptor_index = self.utf8(descriptor)?;
        self.indexed(
            SymbolKey::MethodType(descriptor.to_string()),
            TAG_METHOD_TYPE,
            &[descriptor_index],
        )
    }

    pub(crate) fn method_handle(&mut self, handle: &Handle) -> ClassFileResult<u16> {
        let reference_index = if handle.kind <= opcodes::H_PUTSTATIC {
            self.field_ref(&handle.owner, &handle.name, &handle.descriptor)?
        } else {
            self.method_ref(
                &handle.owner,
                &handle.name,
                &handle.descriptor,
                handle.is_interface,
            )?
        };
        let mut bytes = vec![TAG_METHOD_HANDLE, handle.kind];
        bytes.extend_from_slice(&reference_index.to_be_bytes());
        self.add(
            SymbolKey::MethodHandle(
                handle.kind,
                handle.owner.clone(),
                handle.name.clone(),
                handle.descriptor.clone(),
                handle.is_interface,
            ),
            1,
            &bytes,
        )
    }

    pub(crate) fn bootstrap_method(
        &mut self,
        handle: &Handle,
        arguments: &[Constant],
    ) -> ClassFileResult<u16> {
        let handle_index = self.method_handle(handle)?;
        let mut argument_indices = Vec::with_capacity(arguments.len());
        for argument in arguments {
            argument_indices.push(self.constant(argument)?);
        }
        let method = BootstrapMethod {
            handle_index,
            arguments: argument_indices,
        };
        if let Some(index) = self.bootstrap_lookup.get(&method) {
            return Ok(*index);
        }
        if self.bootstrap_methods.len() >= u16::MAX as usize {
            return Err(ClassFileError::ConstantPoolOverflow);
        }
        let index = self.bootstrap_methods.len() as u16;
        self.bootstrap_methods.push(method.clone());
        self.bootstrap_lookup.insert(method, index);
        Ok(index)
    }

    pub(crate) fn invoke_dynamic(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap: &Handle,
        arguments: &[Constant],
    ) -> ClassFileResult<u16> {
        let bootstrap_index = self.bootstrap_method(bootstrap, arguments)?;
        let name_and_type_index = self.name_and_type(name, descriptor)?;
        self.indexed(
            SymbolKey::InvokeDynamic(bootstrap_index, name.to_string(), descriptor.to_string()),
            TAG_INVOKE_DYNAMIC,
            &[bootstrap_index, name_and_type_index],
        )
    }

    pub(crate) fn dynamic(&mut self, dynamic: &ConstantDynamic) -> ClassFileResult<u16> {
        let bootstrap_index = self.bootstrap_method(&dynamic.bootstrap, &dynamic.arguments)?;
        let name_and_type_index = self.name_and_type(&dynamic.name, &dynamic.descriptor)?;
        self.indexed(
            SymbolKey::Dynamic(
                bootstrap_index,
                dynamic.name.clone(),
                dynamic.descriptor.clone(),
            ),
            TAG_DYNAMIC,
            &[bootstrap_index, name_and_type_index],
        )
    }

    pub(crate) fn constant(&mut self, constant: &Constant) -> ClassFileResult<u16> {
        match constant {
            Constant::Integer(value) => self.integer(*value),
            Constant::Float(value) => self.float(*value),
            Constant::Long(value) => self.long(*value),
            Constant::Double(value) => self.double(*value),
            Constant::String(value) => self.string(value),
            Constant::Class(name) => self.class(name),
            Constant::MethodType(descriptor) => self.method_type(descriptor),
            Constant::MethodHandle(handle) => self.method_handle(handle),
            Constant::Dynamic(dynamic) => self.dynamic(dynamic),
        }
    }
}

fn symbol_key(pool: &ConstantPool, index: u16) -> Option<SymbolKey> {
    let key = match pool.entry(index).ok()? {
        ConstantPoolEntry::Utf8(value) => SymbolKey::Utf8(value.clone()),
        ConstantPoolEntry::Integer(value) => SymbolKey::Integer(*value),
        ConstantPoolEntry::Float(value) => SymbolKey::Float(value.to_bits()),
        ConstantPoolEntry::Long(value) => SymbolKey::Long(*value),
        ConstantPoolEntry::Double(value) => SymbolKey::Double(value.to_bits()),
        ConstantPoolEntry::Class { name_index } => {
            SymbolKey::Class(pool.utf8(*name_index).ok()?.to_string())
        }
        ConstantPoolEntry::String { string_index } => {
            SymbolKey::String(pool.utf8(*string_index).ok()?.to_string())
        }
        ConstantPoolEntry::FieldRef { .. } => {
            let member = pool.member_ref(index).ok()?;
            SymbolKey::Field(
                member.owner.to_string(),
                member.name.to_string(),
                member.descriptor.to_string(),
            )
        }
        ConstantPoolEntry::MethodRef { .. } => {
            let member = pool.member_ref(index).ok()?;
            SymbolKey::Method(
                member.owner.to_string(),
                member.name.to_string(),
                member.descriptor.to_string(),
            )
        }
        ConstantPoolEntry::InterfaceMethodRef { .. } => {
            let member = pool.member_ref(index).ok()?;
            SymbolKey::InterfaceMethod(
                member.owner.to_string(),
                member.name.to_string(),
                member.descriptor.to_string(),
            )
        }
        ConstantPoolEntry::NameAndType { .. } => {
            let (name, descriptor) = pool.name_and_type(index).ok()?;
            SymbolKey::NameAndType(name.to_string(), descriptor.to_string())
        }
        ConstantPoolEntry::MethodHandle { .. } => {
            let handle = pool.handle(index).ok()?;
            SymbolKey::MethodHandle(
                handle.kind,
                handle.owner,
                handle.name,
                handle.descriptor,
                handle.is_interface,
            )
        }
        ConstantPoolEntry::MethodType { descriptor_index } => {
            SymbolKey::MethodType(pool.utf8(*descriptor_index).ok()?.to_string())
        }
        ConstantPoolEntry::Dynamic {
            bootstrap_index,
            name_and_type_index,
        } => {
            let (name, descriptor) = pool.name_and_type(*name_and_type_index).ok()?;
            SymbolKey::Dynamic(*bootstrap_index, name.to_string(), descriptor.to_string())
        }
        ConstantPoolEntry::InvokeDynamic {
            bootstrap_index,
            name_and_type_index,
        } => {
            let (name, descriptor) = pool.name_and_type(*name_and_type_index).ok()?;
            SymbolKey::InvokeDynamic(*bootstrap_index, name.to_string(), descriptor.to_string())
        }
        ConstantPoolEntry::Unusable
        | ConstantPoolEntry::Module { .. }
        | ConstantPoolEntry::Package { .. } => return None,
    };
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modified_utf8_encodes_nul_and_supplementary_characters() {
        let value = "a\0\u{1F600}é";
        let encoded = encode_modified_utf8(value);

        assert_eq!(&encoded[..3], &[b'a', 0xc0, 0x80]);
        assert!(!encoded.contains(&0));
        assert_eq!(encoded.len(), 1 + 2 + 6 + 2);
        assert_eq!(decode_modified_utf8(&encoded), value);
    }

    #[test]
    fn symbol_table_reuses_entries() {
        let mut table = SymbolTable::new();
        let first = table
            .method_ref("java/lang/String", "length", "()I", false)
            .expect("intern method");
        let second = table
            .method_ref("java/lang/String", "length", "()I", false)
            .expect("intern method again");
        let class = table.class("java/lang/String").expect("intern class");

        assert_eq!(first, second);
        assert!(class < first);
        let long = table.long(7).expect("intern long");
        let after = table.integer(1).expect("intern int");
        assert_eq!(after, long + 2);
    }
}
