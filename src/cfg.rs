use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::bytecode::visitor::Label;
use crate::bytecode::{ClassFileError, ClassFileResult};
use crate::ir::{BasicBlock, ControlFlowGraph, EdgeKind, ExceptionHandler, FlowEdge, Instruction};
use crate::opcodes;

/// Build a control flow graph from buffered instructions.
pub(crate) fn build_cfg(
    instructions: &[Instruction],
    handlers: &[ExceptionHandler],
    method: &str,
) -> ClassFileResult<ControlFlowGraph> {
    let label_index = label_positions(instructions);
    let resolve = |label: &Label| {
        label_index
            .get(label)
            .copied()
            .ok_or_else(|| ClassFileError::UnresolvedLabel(method.to_string()))
    };

    let mut leaders = BTreeSet::new();
    leaders.insert(0usize);
    for handler in handlers {
        leaders.insert(resolve(&handler.handler)?);
        leaders.insert(resolve(&handler.start)?);
        leaders.insert(resolve(&handler.end)?);
    }
    for (index, inst) in instructions.iter().enumerate() {
        for target in inst.targets() {
            leaders.insert(resolve(&target)?);
        }
        if let Some(opcode) = inst.opcode() {
            if !inst.targets().is_empty() || is_exit_opcode(opcode) {
                leaders.insert(index + 1);
            }
        }
    }
    leaders.retain(|index| *index < instructions.len());

    let leader_list: Vec<usize> = leaders.into_iter().collect();
    let mut blocks = Vec::with_capacity(leader_list.len());
    for (position, start) in leader_list.iter().enumerate() {
        let end = leader_list
            .get(position + 1)
            .copied()
            .unwrap_or(instructions.len());
        blocks.push(BasicBlock { start: *start, end });
    }
    let block_of = |index: usize| {
        blocks
            .iter()
            .position(|block| block.start <= index && index < block.end)
    };

    let mut edges = Vec::new();
    for (block_index, block) in blocks.iter().enumerate() {
        let last = instructions[block.start..block.end]
            .iter()
            .rev()
            .find(|inst| inst.opcode().is_some());
        let falls_through = match last {
            Some(inst) => {
                let opcode = inst.opcode().unwrap_or(opcodes::NOP);
                for target in inst.targets() {
                    if let Some(to) = block_of(resolve(&target)?) {
                        let kind = if opcode == opcodes::JSR {
                            EdgeKind::Subroutine
                        } else {
                            EdgeKind::Branch
                        };
                        edges.push(FlowEdge {
                            from: block_index,
                            to,
                            kind,
                        });
                    }
                }
                !is_unconditional_branch(opcode) && !is_exit_opcode(opcode)
            }
            None => true,
        };
        if falls_through && block_index + 1 < blocks.len() {
            edges.push(FlowEdge {
                from: block_index,
                to: block_index + 1,
                kind: EdgeKind::FallThrough,
            });
        }
    }

    for handler in handlers {
        let start = resolve(&handler.start)?;
        let end = resolve(&handler.end)?;
        let Some(to) = block_of(resolve(&handler.handler)?) else {
            continue;
        };
        for (block_index, block) in blocks.iter().enumerate() {
            if block.start < end && start < block.end {
                edges.push(FlowEdge {
                    from: block_index,
                    to,
                    kind: EdgeKind::Exception,
                });
            }
        }
    }

    Ok(ControlFlowGraph { blocks, edges })
}

/// Computes the maximum operand stack depth by propagating entry depths through the graph.
pub(crate) fn compute_max_stack(
    instructions: &[Instruction],
    handlers: &[ExceptionHandler],
    method: &str,
) -> ClassFileResult<u16> {
    let cfg = build_cfg(instructions, handlers, method)?;
    if cfg.blocks.is_empty() {
        return Ok(0);
    }

    let mut entry_depth: Vec<Option<i32>> = vec![None; cfg.blocks.len()];
    entry_depth[0] = Some(0);
    let mut worklist = VecDeque::from([0usize]);
    let mut max = 0i32;

    while let Some(block_index) = worklist.pop_front() {
        let block = &cfg.blocks[block_index];
        let mut depth = entry_depth[block_index].unwrap_or(0);
        for inst in &instructions[block.start..block.end] {
            depth = (depth + stack_delta(inst)).max(0);
            max = max.max(depth);
        }
        for edge in cfg.edges.iter().filter(|edge| edge.from == block_index) {
            let incoming = match edge.kind {
                EdgeKind::FallThrough | EdgeKind::Branch => depth,
                EdgeKind::Subroutine => depth + 1,
                EdgeKind::Exception => 1,
            };
            max = max.max(incoming);
            if entry_depth[edge.to].is_none() {
                entry_depth[edge.to] = Some(incoming);
                worklist.push_back(edge.to);
            }
        }
    }

    Ok(max.min(u16::MAX as i32) as u16)
}

/// Highest local slot used by the instructions, plus one.
pub(crate) fn compute_max_locals(instructions: &[Instruction]) -> u16 {
    let mut max = 0u32;
    for inst in instructions {
        match inst {
            Instruction::Var { opcode, var } => {
                let size = match *opcode {
                    opcodes::LLOAD | opcodes::DLOAD | opcodes::LSTORE | opcodes::DSTORE => 2,
                    _ => 1,
                };
                max = max.max(*var as u32 + size);
            }
            Instruction::Iinc { var, .. } => max = max.max(*var as u32 + 1),
            _ => {}
        }
    }
    max.min(u16::MAX as u32) as u16
}

pub(crate) fn label_positions(instructions: &[Instruction]) -> HashMap<Label, usize> {
    instructions
        .iter()
        .enumerate()
        .filter_map(|(index, inst)| match inst {
            Instruction::Label(label) => Some((*label, index)),
            _ => None,
        })
        .collect()
}

fn stack_delta(inst: &Instruction) -> i32 {
    match inst {
        Instruction::Label(_) | Instruction::Frame(_) => 0,
        Instruction::Simple(opcode) => simple_delta(*opcode),
        Instruction::Int { opcode, .. } => {
            if *opcode == opcodes::NEWARRAY {
                0
            } else {
                1
            }
        }
        Instruction::Var { opcode, .. } => match *opcode {
            opcodes::ILOAD | opcodes::FLOAD | opcodes::ALOAD => 1,
            opcodes::LLOAD | opcodes::DLOAD => 2,
            opcodes::ISTORE | opcodes::FSTORE | opcodes::ASTORE => -1,
            opcodes::LSTORE | opcodes::DSTORE => -2,
            _ => 0,
        },
        Instruction::Type { opcode, .. } => {
            if *opcode == opcodes::NEW {
                1
            } else {
                0
            }
        }
        Instruction::Field {
            opcode, value_size, ..
        } => {
            let size = *value_size as i32;
            match *opcode {
                opcodes::GETSTATIC => size,
                opcodes::PUTSTATIC => -size,
                opcodes::GETFIELD => size - 1,
                _ => -size - 1,
            }
        }
        Instruction::Invoke {
            opcode,
            arguments_size,
            return_size,
            ..
        } => {
            let receiver = if *opcode == opcodes::INVOKESTATIC { 0 } else { 1 };
            *return_size as i32 - *arguments_size as i32 - receiver
        }
        Instruction::InvokeDynamic {
            arguments_size,
            return_size,
            ..
        } => *return_size as i32 - *arguments_size as i32,
        Instruction::Jump { opcode, .. } => match *opcode {
            opcodes::IFEQ..=opcodes::IFLE | opcodes::IFNULL | opcodes::IFNONNULL => -1,
            opcodes::IF_ICMPEQ..=opcodes::IF_ACMPNE => -2,
            _ => 0,
        },
        Instruction::Ldc { wide, .. } => {
            if *wide {
                2
            } else {
                1
            }
        }
        Instruction::Iinc { .. } => 0,
        Instruction::TableSwitch { .. } | Instruction::LookupSwitch { .. } => -1,
        Instruction::MultiANewArray { dimensions, .. } => 1 - *dimensions as i32,
    }
}

fn simple_delta(opcode: u8) -> i32 {
    match opcode {
        opcodes::NOP => 0,
        opcodes::ACONST_NULL..=opcodes::ICONST_5 => 1,
        opcodes::LCONST_0 | opcodes::LCONST_1 => 2,
        opcodes::FCONST_0..=opcodes::FCONST_2 => 1,
        opcodes::DCONST_0 | opcodes::DCONST_1 => 2,
        opcodes::LALOAD | opcodes::DALOAD => 0,
        opcodes::IALOAD..=opcodes::SALOAD => -1,
        opcodes::LASTORE | opcodes::DASTORE => -4,
        opcodes::IASTORE..=opcodes::SASTORE => -3,
        opcodes::POP => -1,
        opcodes::POP2 => -2,
        opcodes::DUP | opcodes::DUP_X1 | opcodes::DUP_X2 => 1,
        opcodes::DUP2 | opcodes::DUP2_X1 | opcodes::DUP2_X2 => 2,
        opcodes::SWAP => 0,
        opcodes::IADD..=opcodes::DREM => {
            if (opcode - opcodes::IADD) % 2 == 1 {
                -2
            } else {
                -1
            }
        }
        opcodes::INEG..=opcodes::DNEG => 0,
        opcodes::ISHL..=opcodes::LUSHR => -1,
        opcodes::IAND | opcodes::IOR | opcodes::IXOR => -1,
        opcodes::LAND | opcodes::LOR | opcodes::LXOR => -2,
        opcodes::I2L | opcodes::I2D | opcodes::F2L | opcodes::F2D => 1,
        opcodes::L2I | opcodes::L2F | opcodes::D2I | opcodes::D2F => -1,
        opcodes::I2F | opcodes::L2D | opcodes::F2I | opcodes::D2L => 0,
        opcodes::I2B | opcodes::I2C | opcodes::I2S => 0,
        opcodes::LCMP | opcodes::DCMPL | opcodes::DCMPG => -3,
        opcodes::FCMPL | opcodes::FCMPG => -1,
        opcodes::IRETURN | opcodes::FRETURN | opcodes::ARETURN => -1,
        opcodes::LRETURN | opcodes::DRETURN => -2,
        opcodes::RETURN => 0,
        opcodes::ARRAYLENGTH => 0,
        opcodes::ATHROW => -1,
        opcodes::MONITORENTER | opcodes::MONITOREXIT => -1,
        _ => 0,
    }
}

fn is_exit_opcode(opcode: u8) -> bool {
    matches!(
        opcode,
        opcodes::IRETURN
            | opcodes::LRETURN
            | opcodes::FRETURN
            | opcodes::DRETURN
            | opcodes::ARETURN
            | opcodes::RETURN
            | opcodes::ATHROW
            | opcodes::RET
    )
}

fn is_unconditional_branch(opcode: u8) -> bool {
    matches!(
        opcode,
        opcodes::GOTO | opcodes::GOTO_W | opcodes::TABLESWITCH | opcodes::LOOKUPSWITCH
    )
}
