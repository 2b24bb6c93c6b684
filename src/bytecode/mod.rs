//! Class file reading, visiting and writing.
//!
//! [`reader::ClassReader`] walks a class file and reports it to a chain of
//! [`visitor::ClassVisitor`]s; [`writer::ClassWriter`] sits at the end of the chain and
//! assembles the rewritten class. The writer copies the source constant pool so untouched
//! attributes and instructions keep their indices.

pub mod constant_pool;
pub mod reader;
pub mod visitor;
pub mod writer;

use thiserror::Error;

pub use reader::ClassReader;
pub use visitor::{
    ClassHeader, ClassVisitor, Constant, ConstantDynamic, Frame, Handle, Label, MethodVisitor,
    RawAttribute, VerificationType,
};
pub use writer::ClassWriter;

/// Errors raised while reading or writing class files.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClassFileError {
    #[error("not a class file (bad magic)")]
    BadMagic,
    #[error("unexpected end of class file at offset {index} (length {len})")]
    OutOfBounds { index: usize, len: usize },
    #[error("invalid constant pool index {0}")]
    BadConstantIndex(u16),
    #[error("unexpected constant pool entry at index {0}")]
    UnexpectedConstant(u16),
    #[error("unknown constant pool tag {0}")]
    UnknownConstantTag(u8),
    #[error("constant pool overflow")]
    ConstantPoolOverflow,
    #[error("unsupported opcode 0x{0:02x}")]
    UnsupportedOpcode(u8),
    #[error("invalid stack map frame type {0}")]
    BadFrameType(u8),
    #[error("invalid verification type tag {0}")]
    BadVerificationType(u8),
    #[error("too deeply nested dynamic constant")]
    TooDeepConstantNesting,
    #[error("label is not placed in method {0}")]
    UnresolvedLabel(String),
    #[error("branch offset out of range in method {0}")]
    BranchOutOfRange(String),
    #[error("method code too large: {0}")]
    CodeTooLarge(String),
    #[error("invalid descriptor in class file: {0}")]
    BadDescriptor(String),
    #[error("class header was never visited")]
    MissingHeader,
}

pub type ClassFileResult<T> = Result<T, ClassFileError>;

/// Bounds-checked big-endian view over class file bytes.
#[derive(Copy, Clone)]
pub(crate) struct ClassBuffer<'class> {
    data: &'class [u8],
}

impl<'class> ClassBuffer<'class> {
    pub(crate) fn new(data: &'class [u8]) -> Self {
        Self { data }
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn read_bytes(&self, index: usize, len: usize) -> ClassFileResult<&'class [u8]> {
        self.data
            .get(index..index + len)
            .ok_or(ClassFileError::OutOfBounds {
                index: index + len,
                len: self.data.len(),
            })
    }

    pub(crate) fn read_u8(&self, index: usize) -> ClassFileResult<u8> {
        self.read_bytes(index, 1).map(|bytes| bytes[0])
    }

    pub(crate) fn read_i8(&self, index: usize) -> ClassFileResult<i8> {
        self.read_u8(index).map(|value| value as i8)
    }

    pub(crate) fn read_u16(&self, index: usize) -> ClassFileResult<u16> {
        self.read_bytes(index, 2)
            .map(|bytes| u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn read_i16(&self, index: usize) -> ClassFileResult<i16> {
        self.read_u16(index).map(|value| value as i16)
    }

    pub(crate) fn read_u32(&self, index: usize) -> ClassFileResult<u32> {
        self.read_bytes(index, 4)
            .map(|bytes| u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn read_i32(&self, index: usize) -> ClassFileResult<i32> {
        self.read_u32(index).map(|value| value as i32)
    }

    pub(crate) fn read_u64(&self, index: usize) -> ClassFileResult<u64> {
        let high = self.read_u32(index)? as u64;
        let low = self.read_u32(index + 4)? as u64;
        Ok((high << 32) | low)
    }
}
