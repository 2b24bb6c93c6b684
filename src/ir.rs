use crate::bytecode::visitor::{ClassHeader, Frame, Label};
use crate::opcodes;

/// Type-level view of a class used by type matchers and the type pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDescription {
    /// Internal name, e.g. `java/lang/String`.
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub access: u16,
}

impl TypeDescription {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            super_name: Some("java/lang/Object".to_string()),
            interfaces: Vec::new(),
            access: opcodes::ACC_PUBLIC,
        }
    }

    /// Dotted binary name, e.g. `java.lang.String`.
    pub fn binary_name(&self) -> String {
        crate::descriptor::internal_to_binary(&self.name)
    }

    pub fn is_interface(&self) -> bool {
        self.access & opcodes::ACC_INTERFACE != 0
    }
}

impl From<&ClassHeader> for TypeDescription {
    fn from(header: &ClassHeader) -> Self {
        Self {
            name: header.name.clone(),
            super_name: header.super_name.clone(),
            interfaces: header.interfaces.clone(),
            access: header.access,
        }
    }
}

/// Method header seen by class visitors and method matchers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDescription {
    pub access: u16,
    pub name: String,
    pub descriptor: String,
}

impl MethodDescription {
    pub fn new(access: u16, name: &str, descriptor: &str) -> Self {
        Self {
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }

    pub fn is_static(&self) -> bool {
        self.access & opcodes::ACC_STATIC != 0
    }

    pub fn is_synthetic(&self) -> bool {
        self.access & opcodes::ACC_SYNTHETIC != 0
    }

    pub fn is_abstract(&self) -> bool {
        self.access & (opcodes::ACC_ABSTRACT | opcodes::ACC_NATIVE) != 0
    }

    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    pub fn is_type_initializer(&self) -> bool {
        self.name == "<clinit>"
    }
}

/// Field header seen by class visitors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDescription {
    pub access: u16,
    pub name: String,
    pub descriptor: String,
}

/// Symbolic instruction buffered by the class writer until labels are resolved. Constant
/// pool operands are already interned.
#[derive(Clone, Debug)]
pub(crate) enum Instruction {
    Label(Label),
    Frame(Frame),
    Simple(u8),
    Int {
        opcode: u8,
        operand: i32,
    },
    Var {
        opcode: u8,
        var: u16,
    },
    Type {
        opcode: u8,
        index: u16,
    },
    Field {
        opcode: u8,
        index: u16,
        value_size: u8,
    },
    Invoke {
        opcode: u8,
        index: u16,
        arguments_size: u8,
        return_size: u8,
    },
    InvokeDynamic {
        index: u16,
        arguments_size: u8,
        return_size: u8,
    },
    Jump {
        opcode: u8,
        target: Label,
    },
    Ldc {
        index: u16,
        wide: bool,
    },
    Iinc {
        var: u16,
        increment: i16,
    },
    TableSwitch {
        min: i32,
        max: i32,
        default: Label,
        targets: Vec<Label>,
    },
    LookupSwitch {
        default: Label,
        keys: Vec<i32>,
        targets: Vec<Label>,
    },
    MultiANewArray {
        index: u16,
        dimensions: u8,
    },
}

impl Instruction {
    /// Opcode of an executable instruction; `None` for labels and frames.
    pub(crate) fn opcode(&self) -> Option<u8> {
        match self {
            Instruction::Label(_) | Instruction::Frame(_) => None,
            Instruction::Simple(opcode)
            | Instruction::Int { opcode, .. }
            | Instruction::Var { opcode, .. }
            | Instruction::Type { opcode, .. }
            | Instruction::Field { opcode, .. }
            | Instruction::Invoke { opcode, .. }
            | Instruction::Jump { opcode, .. } => Some(*opcode),
            Instruction::InvokeDynamic { .. } => Some(opcodes::INVOKEDYNAMIC),
            Instruction::Ldc { wide: true, .. } => Some(opcodes::LDC2_W),
            Instruction::Ldc { .. } => Some(opcodes::LDC),
            Instruction::Iinc { .. } => Some(opcodes::IINC),
            Instruction::TableSwitch { .. } => Some(opcodes::TABLESWITCH),
            Instruction::LookupSwitch { .. } => Some(opcodes::LOOKUPSWITCH),
            Instruction::MultiANewArray { .. } => Some(opcodes::MULTIANEWARRAY),
        }
    }

    /// Branch targets of jumps and switches.
    pub(crate) fn targets(&self) -> Vec<Label> {
        match self {
            Instruction::Jump { target, .. } => vec![*target],
            Instruction::TableSwitch {
                default, targets, ..
            }
            | Instruction::LookupSwitch {
                default, targets, ..
            } => {
                let mut all = Vec::with_capacity(targets.len() + 1);
                all.push(*default);
                all.extend(targets.iter().copied());
                all
            }
            _ => Vec::new(),
        }
    }
}

/// Exception handler range in terms of labels.
#[derive(Clone, Debug)]
pub(crate) struct ExceptionHandler {
    pub(crate) start: Label,
    pub(crate) end: Label,
    pub(crate) handler: Label,
    pub(crate) catch_type: u16,
}

/// Basic block graph over a buffered instruction list.
#[derive(Clone, Debug)]
pub(crate) struct ControlFlowGraph {
    pub(crate) blocks: Vec<BasicBlock>,
    pub(crate) edges: Vec<FlowEdge>,
}

/// Basic block covering a range of instruction indices.
#[derive(Clone, Debug)]
pub(crate) struct BasicBlock {
    pub(crate) start: usize,
    pub(crate) end: usize,
}

/// Edge between basic blocks, identified by their index in `blocks`.
#[derive(Clone, Debug)]
pub(crate) struct FlowEdge {
    pub(crate) from: usize,
    pub(crate) to: usize,
    pub(crate) kind: EdgeKind,
}

/// Edge classification used for stack depth propagation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum EdgeKind {
    FallThrough,
    Branch,
    /// Jump to a subroutine; the return address is on the stack at the target.
    Subroutine,
    Exception,
}
