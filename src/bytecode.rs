//! Method body editing.
//!
//! Code is decoded into [`Instruction`]s whose branch operands name the
//! *original* offset they jump to. Edits replace instructions in place; when
//! the body is assembled again every original offset is mapped to its new
//! position, and the exception table, debug tables and stack map frames are
//! rewritten through the same mapping.

use std::collections::{BTreeMap, HashMap, HashSet};

use thiserror::Error;

use crate::classfile::{
    AttributeInfo, ClassFileError, CodeAttribute, ConstantPool, StackMapFrame, VerificationTypeInfo,
};

pub mod opcodes {
    pub const NOP: u8 = 0x00;
    pub const ICONST_M1: u8 = 0x02;
    pub const ICONST_0: u8 = 0x03;
    pub const BIPUSH: u8 = 0x10;
    pub const SIPUSH: u8 = 0x11;
    pub const LDC: u8 = 0x12;
    pub const LDC_W: u8 = 0x13;
    pub const LDC2_W: u8 = 0x14;
    pub const ILOAD: u8 = 0x15;
    pub const ALOAD: u8 = 0x19;
    pub const ISTORE: u8 = 0x36;
    pub const ASTORE: u8 = 0x3a;
    pub const POP: u8 = 0x57;
    pub const DUP: u8 = 0x59;
    pub const IADD: u8 = 0x60;
    pub const IINC: u8 = 0x84;
    pub const IFEQ: u8 = 0x99;
    pub const GOTO: u8 = 0xa7;
    pub const JSR: u8 = 0xa8;
    pub const RET: u8 = 0xa9;
    pub const TABLESWITCH: u8 = 0xaa;
    pub const LOOKUPSWITCH: u8 = 0xab;
    pub const IRETURN: u8 = 0xac;
    pub const ARETURN: u8 = 0xb0;
    pub const RETURN: u8 = 0xb1;
    pub const GETSTATIC: u8 = 0xb2;
    pub const PUTSTATIC: u8 = 0xb3;
    pub const GETFIELD: u8 = 0xb4;
    pub const PUTFIELD: u8 = 0xb5;
    pub const INVOKEVIRTUAL: u8 = 0xb6;
    pub const INVOKESPECIAL: u8 = 0xb7;
    pub const INVOKESTATIC: u8 = 0xb8;
    pub const INVOKEINTERFACE: u8 = 0xb9;
    pub const INVOKEDYNAMIC: u8 = 0xba;
    pub const NEW: u8 = 0xbb;
    pub const NEWARRAY: u8 = 0xbc;
    pub const ANEWARRAY: u8 = 0xbd;
    pub const CHECKCAST: u8 = 0xc0;
    pub const INSTANCEOF: u8 = 0xc1;
    pub const WIDE: u8 = 0xc4;
    pub const MULTIANEWARRAY: u8 = 0xc5;
    pub const IFNULL: u8 = 0xc6;
    pub const IFNONNULL: u8 = 0xc7;
    pub const GOTO_W: u8 = 0xc8;
    pub const JSR_W: u8 = 0xc9;
}

use opcodes::*;

const MAX_CODE_LENGTH: usize = 65535;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("truncated instruction at offset {0}")]
    Truncated(u32),
    #[error("unknown opcode {opcode:#04x} at offset {pc}")]
    UnknownOpcode { opcode: u8, pc: u32 },
    #[error("instruction at offset {pc} jumps to {target}, which is not an instruction boundary")]
    BadBranchTarget { pc: u32, target: i64 },
    #[error("branch at offset {pc} needs offset {offset}, which does not fit in 16 bits")]
    BranchOverflow { pc: u32, offset: i64 },
    #[error("method code grew to {0} bytes")]
    CodeTooLarge(usize),
    #[error("offset {0} referenced by a code attribute is not an instruction boundary")]
    DanglingOffset(u32),
    #[error("a stack map frame still refers to the removed allocation at offset {0}")]
    UninitializedFrame(u32),
    #[error("'new {class}' at offset {pc} is not directly followed by 'dup'")]
    UnpairedNew { class: String, pc: u32 },
    #[error("no constructor call completes 'new {class}' at offset {pc}")]
    UnmatchedNew { class: String, pc: u32 },
    #[error("malformed descriptor '{0}'")]
    BadDescriptor(String),
    #[error("method returns '{0}', which is not a reference type")]
    NotAReference(String),
    #[error(transparent)]
    ClassFile(#[from] ClassFileError),
}

/// Original code offset used as a jump target.
pub type Label = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    None,
    Byte(i8),
    Short(i16),
    ConstantIndex(u16),
    Local(u16),
    Iinc { index: u16, delta: i16 },
    Branch(Label),
    TableSwitch { default: Label, low: i32, high: i32, targets: Vec<Label> },
    LookupSwitch { default: Label, pairs: Vec<(i32, Label)> },
    InvokeInterface { index: u16, count: u8 },
    InvokeDynamic { index: u16 },
    NewArray(u8),
    MultiANewArray { index: u16, dimensions: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: u8,
    pub operand: Operand,
    /// Offset in the decoded body; `None` for inserted instructions.
    pub origin: Option<u32>,
}

impl Instruction {
    pub fn simple(opcode: u8) -> Self {
        Self { opcode, operand: Operand::None, origin: None }
    }

    pub fn constant(opcode: u8, index: u16) -> Self {
        Self { opcode, operand: Operand::ConstantIndex(index), origin: None }
    }

    /// Shortest instruction pushing an `int` constant.
    pub fn push_int(value: i32, cp: &mut ConstantPool) -> Result<Self, CompileError> {
        let insn = match value {
            -1..=5 => Self::simple((ICONST_0 as i32 + value) as u8),
            v if i8::try_from(v).is_ok() => Self { opcode: BIPUSH, operand: Operand::Byte(v as i8), origin: None },
            v if i16::try_from(v).is_ok() => Self { opcode: SIPUSH, operand: Operand::Short(v as i16), origin: None },
            v => Self::constant(LDC_W, cp.add_integer(v)?),
        };
        Ok(insn)
    }

    pub fn constant_index(&self) -> Option<u16> {
        match self.operand {
            Operand::ConstantIndex(index)
            | Operand::InvokeInterface { index, .. }
            | Operand::InvokeDynamic { index }
            | Operand::MultiANewArray { index, .. } => Some(index),
            _ => None,
        }
    }

    fn encoded_len(&self, pc: usize) -> usize {
        match &self.operand {
            Operand::None => 1,
            Operand::Byte(_) | Operand::NewArray(_) => 2,
            Operand::Short(_) => 3,
            Operand::ConstantIndex(index) => {
                if self.opcode == LDC && *index <= u8::MAX as u16 {
                    2
                } else {
                    3
                }
            }
            Operand::Local(index) => {
                if *index > u8::MAX as u16 {
                    4
                } else {
                    2
                }
            }
            Operand::Iinc { index, delta } => {
                if *index > u8::MAX as u16 || i8::try_from(*delta).is_err() {
                    6
                } else {
                    3
                }
            }
            Operand::Branch(_) => {
                if matches!(self.opcode, GOTO_W | JSR_W) {
                    5
                } else {
                    3
                }
            }
            Operand::TableSwitch { targets, .. } => 1 + switch_padding(pc) + 12 + 4 * targets.len(),
            Operand::LookupSwitch { pairs, .. } => 1 + switch_padding(pc) + 8 + 8 * pairs.len(),
            Operand::InvokeInterface { .. } | Operand::InvokeDynamic { .. } => 5,
            Operand::MultiANewArray { .. } => 4,
        }
    }
}

fn switch_padding(pc: usize) -> usize {
    (4 - (pc + 1) % 4) % 4
}

struct CodeReader<'a> {
    code: &'a [u8],
    pos: usize,
    insn_pc: u32,
}

impl<'a> CodeReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CompileError> {
        if self.code.len() - self.pos < n {
            return Err(CompileError::Truncated(self.insn_pc));
        }
        let slice = &self.code[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u1(&mut self) -> Result<u8, CompileError> {
        Ok(self.take(1)?[0])
    }

    fn u2(&mut self) -> Result<u16, CompileError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn i4(&mut self) -> Result<i32, CompileError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn target(&self, relative: i64) -> Result<Label, CompileError> {
        let target = self.insn_pc as i64 + relative;
        u32::try_from(target).map_err(|_| CompileError::BadBranchTarget { pc: self.insn_pc, target })
    }
}

/// Decodes a method body and checks that every branch lands on an instruction.
pub fn decode(code: &[u8]) -> Result<Vec<Instruction>, CompileError> {
    let mut r = CodeReader { code, pos: 0, insn_pc: 0 };
    let mut instructions = Vec::new();

    while r.pos < code.len() {
        let pc = r.pos as u32;
        r.insn_pc = pc;
        let mut opcode = r.u1()?;
        let operand = match opcode {
            0x00..=0x0f | 0x1a..=0x35 | 0x3b..=0x83 | 0x85..=0x98 | 0xac..=0xb1 | 0xbe | 0xbf | 0xc2 | 0xc3 => {
                Operand::None
            }
            BIPUSH => Operand::Byte(r.u1()? as i8),
            SIPUSH => Operand::Short(r.u2()? as i16),
            LDC => Operand::ConstantIndex(r.u1()? as u16),
            LDC_W | LDC2_W => Operand::ConstantIndex(r.u2()?),
            0x15..=0x19 | 0x36..=0x3a | RET => Operand::Local(r.u1()? as u16),
            IINC => Operand::Iinc { index: r.u1()? as u16, delta: r.u1()? as i8 as i16 },
            0x99..=0xa8 | IFNULL | IFNONNULL => {
                let offset = r.u2()? as i16 as i64;
                Operand::Branch(r.target(offset)?)
            }
            GOTO_W | JSR_W => {
                let offset = r.i4()? as i64;
                Operand::Branch(r.target(offset)?)
            }
            TABLESWITCH => {
                r.take(switch_padding(pc as usize))?;
                let default = r.i4()? as i64;
                let default = r.target(default)?;
                let low = r.i4()?;
                let high = r.i4()?;
                let count = high as i64 - low as i64 + 1;
                if count <= 0 || count > (code.len() - r.pos) as i64 / 4 {
                    return Err(CompileError::Truncated(pc));
                }
                let mut targets = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let offset = r.i4()? as i64;
                    targets.push(r.target(offset)?);
                }
                Operand::TableSwitch { default, low, high, targets }
            }
            LOOKUPSWITCH => {
                r.take(switch_padding(pc as usize))?;
                let default = r.i4()? as i64;
                let default = r.target(default)?;
                let npairs = r.i4()?;
                if npairs < 0 || npairs as usize > (code.len() - r.pos) / 8 {
                    return Err(CompileError::Truncated(pc));
                }
                let mut pairs = Vec::with_capacity(npairs as usize);
                for _ in 0..npairs {
                    let key = r.i4()?;
                    let offset = r.i4()? as i64;
                    pairs.push((key, r.target(offset)?));
                }
                Operand::LookupSwitch { default, pairs }
            }
            GETSTATIC..=INVOKESTATIC | NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => Operand::ConstantIndex(r.u2()?),
            INVOKEINTERFACE => {
                let index = r.u2()?;
                let count = r.u1()?;
                r.u1()?;
                Operand::InvokeInterface { index, count }
            }
            INVOKEDYNAMIC => {
                let index = r.u2()?;
                r.u2()?;
                Operand::InvokeDynamic { index }
            }
            NEWARRAY => Operand::NewArray(r.u1()?),
            MULTIANEWARRAY => Operand::MultiANewArray { index: r.u2()?, dimensions: r.u1()? },
            WIDE => {
                opcode = r.u1()?;
                match opcode {
                    IINC => Operand::Iinc { index: r.u2()?, delta: r.u2()? as i16 },
                    0x15..=0x19 | 0x36..=0x3a | RET => Operand::Local(r.u2()?),
                    _ => return Err(CompileError::UnknownOpcode { opcode, pc }),
                }
            }
            _ => return Err(CompileError::UnknownOpcode { opcode, pc }),
        };
        instructions.push(Instruction { opcode, operand, origin: Some(pc) });
    }

    let starts: HashSet<u32> = instructions.iter().filter_map(|i| i.origin).collect();
    for insn in &instructions {
        for target in branch_targets(&insn.operand) {
            if !starts.contains(&target) {
                return Err(CompileError::BadBranchTarget { pc: insn.origin.unwrap_or(0), target: target as i64 });
            }
        }
    }
    Ok(instructions)
}

fn branch_targets(operand: &Operand) -> Vec<Label> {
    match operand {
        Operand::Branch(target) => vec![*target],
        Operand::TableSwitch { default, targets, .. } => std::iter::once(*default).chain(targets.iter().copied()).collect(),
        Operand::LookupSwitch { default, pairs } => std::iter::once(*default).chain(pairs.iter().map(|p| p.1)).collect(),
        _ => Vec::new(),
    }
}

/// Mapping from original code offsets to offsets in the assembled body.
#[derive(Debug)]
pub struct Relocation {
    offsets: HashMap<u32, u32>,
    old_length: u32,
    new_length: u32,
}

impl Relocation {
    /// Maps an original offset. The end of the old body maps to the end of the new one.
    pub fn map(&self, old: u32) -> Result<u32, CompileError> {
        if old == self.old_length {
            return Ok(self.new_length);
        }
        self.offsets.get(&old).copied().ok_or(CompileError::DanglingOffset(old))
    }

    pub fn new_length(&self) -> u32 {
        self.new_length
    }
}

/// Lays out and encodes `instructions`. `old_length` is the length of the body they were decoded from.
pub fn assemble(instructions: &[Instruction], old_length: u32) -> Result<(Vec<u8>, Relocation), CompileError> {
    let mut pcs = Vec::with_capacity(instructions.len());
    let mut offsets = HashMap::new();
    let mut pc = 0usize;
    for insn in instructions {
        pcs.push(pc);
        if let Some(origin) = insn.origin {
            offsets.entry(origin).or_insert(pc as u32);
        }
        pc += insn.encoded_len(pc);
    }
    if pc > MAX_CODE_LENGTH {
        return Err(CompileError::CodeTooLarge(pc));
    }
    let relocation = Relocation { offsets, old_length, new_length: pc as u32 };

    let mut out = Vec::with_capacity(pc);
    for (insn, &pc) in instructions.iter().zip(&pcs) {
        encode(&mut out, insn, pc, &relocation)?;
    }
    Ok((out, relocation))
}

fn encode(out: &mut Vec<u8>, insn: &Instruction, pc: usize, relocation: &Relocation) -> Result<(), CompileError> {
    let relative = |target: Label| -> Result<i64, CompileError> { Ok(relocation.map(target)? as i64 - pc as i64) };
    match &insn.operand {
        Operand::None => out.push(insn.opcode),
        Operand::Byte(v) => out.extend_from_slice(&[insn.opcode, *v as u8]),
        Operand::NewArray(atype) => out.extend_from_slice(&[insn.opcode, *atype]),
        Operand::Short(v) => {
            out.push(insn.opcode);
            out.extend_from_slice(&v.to_be_bytes());
        }
        Operand::ConstantIndex(index) => {
            if insn.opcode == LDC && *index <= u8::MAX as u16 {
                out.extend_from_slice(&[LDC, *index as u8]);
            } else {
                out.push(if insn.opcode == LDC { LDC_W } else { insn.opcode });
                out.extend_from_slice(&index.to_be_bytes());
            }
        }
        Operand::Local(index) => {
            if *index > u8::MAX as u16 {
                out.extend_from_slice(&[WIDE, insn.opcode]);
                out.extend_from_slice(&index.to_be_bytes());
            } else {
                out.extend_from_slice(&[insn.opcode, *index as u8]);
            }
        }
        Operand::Iinc { index, delta } => {
            if *index > u8::MAX as u16 || i8::try_from(*delta).is_err() {
                out.extend_from_slice(&[WIDE, IINC]);
                out.extend_from_slice(&index.to_be_bytes());
                out.extend_from_slice(&delta.to_be_bytes());
            } else {
                out.extend_from_slice(&[IINC, *index as u8, *delta as u8]);
            }
        }
        Operand::Branch(target) => {
            let offset = relative(*target)?;
            out.push(insn.opcode);
            if matches!(insn.opcode, GOTO_W | JSR_W) {
                out.extend_from_slice(&(offset as i32).to_be_bytes());
            } else {
                let short = i16::try_from(offset).map_err(|_| CompileError::BranchOverflow { pc: pc as u32, offset })?;
                out.extend_from_slice(&short.to_be_bytes());
            }
        }
        Operand::TableSwitch { default, low, high, targets } => {
            out.push(insn.opcode);
            out.resize(out.len() + switch_padding(pc), 0);
            out.extend_from_slice(&(relative(*default)? as i32).to_be_bytes());
            out.extend_from_slice(&low.to_be_bytes());
            out.extend_from_slice(&high.to_be_bytes());
            for target in targets {
                out.extend_from_slice(&(relative(*target)? as i32).to_be_bytes());
            }
        }
        Operand::LookupSwitch { default, pairs } => {
            out.push(insn.opcode);
            out.resize(out.len() + switch_padding(pc), 0);
            out.extend_from_slice(&(relative(*default)? as i32).to_be_bytes());
            out.extend_from_slice(&(pairs.len() as i32).to_be_bytes());
            for (key, target) in pairs {
                out.extend_from_slice(&key.to_be_bytes());
                out.extend_from_slice(&(relative(*target)? as i32).to_be_bytes());
            }
        }
        Operand::InvokeInterface { index, count } => {
            out.push(insn.opcode);
            out.extend_from_slice(&index.to_be_bytes());
            out.extend_from_slice(&[*count, 0]);
        }
        Operand::InvokeDynamic { index } => {
            out.push(insn.opcode);
            out.extend_from_slice(&index.to_be_bytes());
            out.extend_from_slice(&[0, 0]);
        }
        Operand::MultiANewArray { index, dimensions } => {
            out.push(insn.opcode);
            out.extend_from_slice(&index.to_be_bytes());
            out.push(*dimensions);
        }
    }
    Ok(())
}

/// Edits one method body.
///
/// Replacements are recorded against the decoded instruction index and only
/// applied by [`CodeEditor::apply`], so indices stay stable while scanning.
pub struct CodeEditor<'a> {
    constant_pool: &'a mut ConstantPool,
    instructions: Vec<Instruction>,
    replacements: BTreeMap<usize, Vec<Instruction>>,
    removed_allocations: HashSet<u32>,
    extra_stack: u16,
}

impl<'a> CodeEditor<'a> {
    pub fn new(constant_pool: &'a mut ConstantPool, code: &CodeAttribute) -> Result<Self, CompileError> {
        Ok(Self {
            constant_pool,
            instructions: decode(&code.code)?,
            replacements: BTreeMap::new(),
            removed_allocations: HashSet::new(),
            extra_stack: 0,
        })
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn constant_pool(&self) -> &ConstantPool {
        self.constant_pool
    }

    pub fn constant_pool_mut(&mut self) -> &mut ConstantPool {
        self.constant_pool
    }

    /// Replaces the instruction at `index`. Jumps to it land on the first replacement instruction.
    pub fn replace(&mut self, index: usize, mut with: Vec<Instruction>) {
        if with.is_empty() {
            with.push(Instruction::simple(NOP));
        }
        let original = &self.instructions[index];
        if original.opcode == NEW && with[0].opcode != NEW {
            if let Some(origin) = original.origin {
                self.removed_allocations.insert(origin);
            }
        }
        self.replacements.insert(index, with);
    }

    /// Inserts `code` in front of the instruction at `index`; jumps to it now run `code` first.
    pub fn insert_before(&mut self, index: usize, mut code: Vec<Instruction>) {
        let mut original = self.instructions[index].clone();
        original.origin = None;
        code.push(original);
        self.replacements.insert(index, code);
    }

    /// Raises `max_stack` by at least `extra` slots when the body is applied.
    pub fn reserve_stack(&mut self, extra: u16) {
        self.extra_stack = self.extra_stack.max(extra);
    }

    pub fn is_modified(&self) -> bool {
        !self.replacements.is_empty()
    }

    /// Writes the edited body back into `code`. Returns `false` when nothing was edited.
    pub fn apply(mut self, code: &mut CodeAttribute) -> Result<bool, CompileError> {
        if self.replacements.is_empty() {
            return Ok(false);
        }
        let mut edited = Vec::with_capacity(self.instructions.len() + self.replacements.len() * 4);
        for (index, insn) in std::mem::take(&mut self.instructions).into_iter().enumerate() {
            match self.replacements.remove(&index) {
                Some(replacement) => {
                    for (i, mut new_insn) in replacement.into_iter().enumerate() {
                        new_insn.origin = if i == 0 { insn.origin } else { None };
                        edited.push(new_insn);
                    }
                }
                None => edited.push(insn),
            }
        }
        relocate(code, &edited, &self.removed_allocations, self.extra_stack)?;
        Ok(true)
    }
}

fn relocate(
    code: &mut CodeAttribute,
    instructions: &[Instruction],
    removed_allocations: &HashSet<u32>,
    extra_stack: u16,
) -> Result<(), CompileError> {
    let (bytes, relocation) = assemble(instructions, code.code.len() as u32)?;

    for entry in &mut code.exception_table {
        entry.start_pc = relocation.map(entry.start_pc as u32)? as u16;
        entry.end_pc = relocation.map(entry.end_pc as u32)? as u16;
        entry.handler_pc = relocation.map(entry.handler_pc as u32)? as u16;
    }

    // Type annotations on code carry offsets this editor does not track.
    code.attributes.retain(|a| {
        !matches!(&a.info, AttributeInfo::Opaque { name, .. }
            if name == "RuntimeVisibleTypeAnnotations" || name == "RuntimeInvisibleTypeAnnotations")
    });

    for attribute in &mut code.attributes {
        match &mut attribute.info {
            AttributeInfo::LineNumberTable { entries } => {
                for e in entries {
                    e.start_pc = relocation.map(e.start_pc as u32)? as u16;
                }
            }
            AttributeInfo::LocalVariableTable { entries } => {
                for e in entries {
                    let (start, length) = relocate_range(&relocation, e.start_pc, e.length)?;
                    e.start_pc = start;
                    e.length = length;
                }
            }
            AttributeInfo::LocalVariableTypeTable { entries } => {
                for e in entries {
                    let (start, length) = relocate_range(&relocation, e.start_pc, e.length)?;
                    e.start_pc = start;
                    e.length = length;
                }
            }
            AttributeInfo::StackMapTable(table) => relocate_frames(&mut table.entries, &relocation, removed_allocations)?,
            _ => {}
        }
    }

    code.code = bytes;
    code.max_stack = code.max_stack.saturating_add(extra_stack);
    Ok(())
}

fn relocate_range(relocation: &Relocation, start: u16, length: u16) -> Result<(u16, u16), CompileError> {
    let new_start = relocation.map(start as u32)?;
    let new_end = relocation.map(start as u32 + length as u32)?;
    Ok((new_start as u16, (new_end - new_start) as u16))
}

fn relocate_frames(
    frames: &mut [StackMapFrame],
    relocation: &Relocation,
    removed_allocations: &HashSet<u32>,
) -> Result<(), CompileError> {
    let mut old_previous: Option<u32> = None;
    let mut new_previous: Option<u32> = None;
    for frame in frames {
        let old_offset = match old_previous {
            None => frame.offset_delta() as u32,
            Some(prev) => prev + frame.offset_delta() as u32 + 1,
        };
        let new_offset = relocation.map(old_offset)?;
        let delta = match new_previous {
            None => new_offset,
            Some(prev) => new_offset - prev - 1,
        };
        frame.set_offset_delta(delta as u16);

        for ty in frame.types_mut() {
            if let VerificationTypeInfo::Uninitialized(offset) = ty {
                if removed_allocations.contains(&(*offset as u32)) {
                    return Err(CompileError::UninitializedFrame(*offset as u32));
                }
                *offset = relocation.map(*offset as u32)? as u16;
            }
        }

        old_previous = Some(old_offset);
        new_previous = Some(new_offset);
    }
    Ok(())
}

/// Parameter descriptors and return descriptor of a method descriptor.
pub fn split_method_descriptor(descriptor: &str) -> Result<(Vec<&str>, &str), CompileError> {
    let bad = || CompileError::BadDescriptor(descriptor.to_owned());
    let inner = descriptor.strip_prefix('(').ok_or_else(bad)?;
    let close = inner.find(')').ok_or_else(bad)?;
    let (mut params, ret) = (&inner[..close], &inner[close + 1..]);
    if ret.is_empty() {
        return Err(bad());
    }
    let mut parts = Vec::new();
    while !params.is_empty() {
        let dims = params.len() - params.trim_start_matches('[').len();
        let len = match params.as_bytes().get(dims) {
            Some(b'L') => params[dims..].find(';').ok_or_else(bad)? + 1,
            Some(b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z') => 1,
            _ => return Err(bad()),
        };
        parts.push(&params[..dims + len]);
        params = &params[dims + len..];
    }
    Ok((parts, ret))
}
