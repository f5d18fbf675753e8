//! Minimal IR facade: values, instructions, basic blocks.
//!
//! The analyses in this crate consume dependence facts and CFG shape; they
//! do not interpret instruction semantics beyond the opcode predicates
//! below. Values and blocks live in arenas owned by a [`Function`] and are
//! referenced everywhere by dense ids.

use crate::utils::intern::{intern, Symbol};
use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;
use std::fmt;

/// A unique identifier for values (instructions, arguments, globals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A unique identifier for basic blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Instruction opcodes, reduced to what dependence classification needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    /// SSA phi node
    Phi,
    /// Integer addition
    Add,
    /// Integer subtraction
    Sub,
    /// Integer multiplication
    Mul,
    /// Floating-point addition
    FAdd,
    /// Floating-point multiplication
    FMul,
    /// Bitwise and
    And,
    /// Bitwise or
    Or,
    /// Bitwise xor
    Xor,
    /// Integer comparison
    ICmp,
    /// Floating-point comparison
    FCmp,
    /// Unconditional branch
    Br,
    /// Conditional branch
    CondBr,
    /// Multi-way branch
    Switch,
    /// Function return
    Ret,
    /// Address computation
    GetElementPtr,
    /// Value cast (zext, sext, bitcast, ...)
    Cast,
    /// Memory read
    Load,
    /// Memory write
    Store,
    /// Function call
    Call,
    /// Conditional select
    Select,
    /// Anything else
    Other,
}

impl Opcode {
    /// Is this a phi node?
    pub fn is_phi(self) -> bool {
        matches!(self, Opcode::Phi)
    }

    /// Phi, address computation, and casts: instructions that only
    /// re-route or re-shape a value.
    pub fn is_syntactic_sugar(self) -> bool {
        matches!(self, Opcode::Phi | Opcode::GetElementPtr | Opcode::Cast)
    }

    /// Is this a comparison?
    pub fn is_cmp(self) -> bool {
        matches!(self, Opcode::ICmp | Opcode::FCmp)
    }

    /// Does this opcode terminate a basic block?
    pub fn is_terminator(self) -> bool {
        matches!(self, Opcode::Br | Opcode::CondBr | Opcode::Switch | Opcode::Ret)
    }

    /// Is this an unconditional branch?
    pub fn is_unconditional_branch(self) -> bool {
        matches!(self, Opcode::Br)
    }

    /// Associative binary operators (reassociation-safe for integers;
    /// float variants additionally require the float-as-real flag).
    pub fn is_associative(self) -> bool {
        matches!(
            self,
            Opcode::Add | Opcode::Mul | Opcode::And | Opcode::Or | Opcode::Xor
                | Opcode::FAdd | Opcode::FMul
        )
    }

    /// Commutative binary operators.
    pub fn is_commutative(self) -> bool {
        self.is_associative()
    }

    /// Floating-point arithmetic.
    pub fn is_float_op(self) -> bool {
        matches!(self, Opcode::FAdd | Opcode::FMul | Opcode::FCmp)
    }

    /// May this instruction read or write memory?
    pub fn may_touch_memory(self) -> bool {
        matches!(self, Opcode::Load | Opcode::Store | Opcode::Call)
    }
}

/// The coarse type of a value, for float-reduction gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    /// Integer of any width
    Int,
    /// float or double
    Float,
    /// Pointer
    Pointer,
    /// Anything else
    Other,
}

/// What a value is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// An instruction inside a basic block
    Instruction {
        /// The opcode
        opcode: Opcode,
        /// The containing block
        block: BlockId,
    },
    /// A function argument
    Argument,
    /// A global variable
    Global,
}

/// One value in the function's arena.
#[derive(Debug, Clone)]
pub struct Value {
    /// Display name
    pub name: Symbol,
    /// Instruction / argument / global
    pub kind: ValueKind,
    /// Coarse type
    pub ty: TypeKind,
}

/// A per-instruction annotation: ordered key/value pairs.
pub type Annotation = BTreeMap<Symbol, i64>;

/// A basic block: ordered instructions plus CFG adjacency.
#[derive(Debug, Clone, Default)]
pub struct Block {
    /// Display name
    pub name: Option<Symbol>,
    /// Instructions in program order
    pub instructions: Vec<ValueId>,
    /// CFG predecessors (duplicates allowed, e.g. switch cases)
    pub predecessors: Vec<BlockId>,
    /// CFG successors (duplicates allowed)
    pub successors: Vec<BlockId>,
}

/// A function: value arena, block arena, CFG edges, annotations.
#[derive(Debug, Clone)]
pub struct Function {
    /// Function name
    pub name: Symbol,
    values: Vec<Value>,
    blocks: Vec<Block>,
    entry: Option<BlockId>,
    annotations: BTreeMap<ValueId, Annotation>,
}

impl Function {
    /// Create an empty function.
    pub fn new(name: &str) -> Self {
        Self {
            name: intern(name),
            values: Vec::new(),
            blocks: Vec::new(),
            entry: None,
            annotations: BTreeMap::new(),
        }
    }

    /// Append a new, empty basic block. The first block added becomes the
    /// entry.
    pub fn add_block(&mut self, name: &str) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            name: Some(intern(name)),
            ..Block::default()
        });
        if self.entry.is_none() {
            self.entry = Some(id);
        }
        id
    }

    /// Append an instruction to a block.
    pub fn add_instruction(
        &mut self,
        block: BlockId,
        name: &str,
        opcode: Opcode,
        ty: TypeKind,
    ) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(Value {
            name: intern(name),
            kind: ValueKind::Instruction { opcode, block },
            ty,
        });
        self.block_mut(block).instructions.push(id);
        id
    }

    /// Register a function argument.
    pub fn add_argument(&mut self, name: &str, ty: TypeKind) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(Value {
            name: intern(name),
            kind: ValueKind::Argument,
            ty,
        });
        id
    }

    /// Register a global.
    pub fn add_global(&mut self, name: &str, ty: TypeKind) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(Value {
            name: intern(name),
            kind: ValueKind::Global,
            ty,
        });
        id
    }

    /// Add a directed CFG edge. Parallel edges between the same block pair
    /// are kept: they carry distinct control semantics (switch cases).
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.block_mut(from).successors.push(to);
        self.block_mut(to).predecessors.push(from);
    }

    /// The entry block. Panics if the function has no blocks.
    pub fn entry(&self) -> BlockId {
        self.entry.expect("function has no blocks")
    }

    /// Override the entry block.
    pub fn set_entry(&mut self, entry: BlockId) {
        assert!((entry.0 as usize) < self.blocks.len());
        self.entry = Some(entry);
    }

    /// Fetch a value.
    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.0 as usize]
    }

    /// Fetch a block.
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    /// All block ids.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    /// All value ids.
    pub fn value_ids(&self) -> impl Iterator<Item = ValueId> {
        (0..self.values.len() as u32).map(ValueId)
    }

    /// Number of blocks.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Number of values.
    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    /// The block containing an instruction, or None for arguments/globals.
    pub fn block_of(&self, value: ValueId) -> Option<BlockId> {
        match self.value(value).kind {
            ValueKind::Instruction { block, .. } => Some(block),
            _ => None,
        }
    }

    /// The opcode of an instruction, or None for arguments/globals.
    pub fn opcode_of(&self, value: ValueId) -> Option<Opcode> {
        match self.value(value).kind {
            ValueKind::Instruction { opcode, .. } => Some(opcode),
            _ => None,
        }
    }

    /// Blocks with no successors.
    pub fn exit_blocks(&self) -> Vec<BlockId> {
        self.block_ids()
            .filter(|&b| self.block(b).successors.is_empty())
            .collect()
    }

    /// Guarantee a single exit block, appending a fresh unified exit and
    /// redirecting every exiting block to it when needed. Idempotent.
    /// Returns the unified exit.
    pub fn unify_exit_nodes(&mut self) -> BlockId {
        let exits = self.exit_blocks();
        if exits.len() == 1 {
            return exits[0];
        }
        assert!(!exits.is_empty(), "function has no exit block to unify");
        let unified = self.add_block("unified_exit");
        for exit in exits {
            self.add_edge(exit, unified);
        }
        log::debug!("unified {} exit blocks", self.block(unified).predecessors.len());
        unified
    }

    /// Split `block` immediately before `at`, moving `at` and everything
    /// after it into a fresh block. The original block's successors move to
    /// the new block; the original falls through to it. Returns the new
    /// block.
    pub fn split_block(&mut self, block: BlockId, at: ValueId) -> BlockId {
        let pos = self
            .block(block)
            .instructions
            .iter()
            .position(|&v| v == at)
            .expect("split point must be inside the block");
        assert!(pos > 0, "cannot split at the first instruction of a block");

        let new_block = self.add_block("split");
        let moved: Vec<ValueId> = self.block_mut(block).instructions.split_off(pos);
        let old_succs = std::mem::take(&mut self.block_mut(block).successors);

        for &v in &moved {
            if let ValueKind::Instruction { opcode, .. } = self.value(v).kind {
                self.values[v.0 as usize].kind = ValueKind::Instruction {
                    opcode,
                    block: new_block,
                };
            }
        }
        self.block_mut(new_block).instructions = moved;

        // Rewire successor predecessor lists to the new block.
        for succ in &old_succs {
            for pred in self.blocks[succ.0 as usize].predecessors.iter_mut() {
                if *pred == block {
                    *pred = new_block;
                }
            }
        }
        self.block_mut(new_block).successors = old_succs;
        self.add_edge(block, new_block);
        new_block
    }

    /// Attach an annotation key/value to an instruction.
    pub fn set_annotation(&mut self, value: ValueId, key: Symbol, val: i64) {
        self.annotations.entry(value).or_default().insert(key, val);
    }

    /// The annotation attached to an instruction, if any.
    pub fn annotation(&self, value: ValueId) -> Option<&Annotation> {
        self.annotations.get(&value)
    }

    /// Instructions inside `block` where the applicable annotation changes
    /// relative to the previous instruction. The first instruction and the
    /// terminator never become split points.
    pub fn collect_split_points(&self, block: BlockId) -> Vec<ValueId> {
        let instructions = &self.block(block).instructions;
        let mut points = Vec::new();
        let mut last: Option<&Annotation> = None;
        for (i, &inst) in instructions.iter().enumerate() {
            let current = self.annotation(inst);
            if i > 0 && i + 1 < instructions.len() && current != last {
                points.push(inst);
            }
            last = current;
        }
        points
    }

    /// Split every block so that each one carries a single applicable
    /// annotation. Returns the number of splits performed.
    pub fn split_at_annotation_changes(&mut self) -> usize {
        let mut splits = 0;
        let mut worklist: Vec<BlockId> = self.block_ids().collect();
        while let Some(block) = worklist.pop() {
            let points = self.collect_split_points(block);
            if let Some(&first) = points.first() {
                let new_block = self.split_block(block, first);
                splits += 1;
                // The tail may still be heterogeneous.
                worklist.push(new_block);
            }
        }
        log::debug!("annotation splitting: {} blocks split", splits);
        splits
    }

    /// The annotation shared by every annotated instruction in `block`:
    /// keys/values on which all of them agree. Unannotated instructions
    /// (terminators in particular) inherit the applicable annotation and
    /// are neutral here. Blocks are homogeneous after
    /// [`Function::split_at_annotation_changes`], in which case this is
    /// just the per-instruction annotation.
    pub fn block_annotation(&self, block: BlockId) -> Annotation {
        let mut common: Option<Annotation> = None;
        for &inst in &self.block(block).instructions {
            let Some(this) = self.annotation(inst) else { continue };
            match &mut common {
                None => common = Some(this.clone()),
                Some(acc) => acc.retain(|k, v| this.get(k) == Some(v)),
            }
        }
        common.unwrap_or_default()
    }
}
