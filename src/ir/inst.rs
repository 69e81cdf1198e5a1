//! The instruction vocabulary.
//!
//! Instructions carry their operands inline as [`Value`]s and their successor
//! blocks as [`BlockId`]s. Operand rewriting (the remap pass, use
//! replacement) and successor surgery (repipe, inline redirection) are
//! expressed as closure-driven visits over those slots, so every pass edits
//! instructions through the same two entry points.

use crate::ir::handle::{BlockId, FuncId};
use crate::ir::types::Type;
use crate::ir::value::Value;
use crate::ir::MetadataMap;

/// Integer binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl BinOp {
    pub(crate) fn mnemonic(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "sdiv",
            BinOp::Rem => "srem",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::Shl => "shl",
            BinOp::Shr => "ashr",
        }
    }
}

/// Integer comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum CmpPred {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpPred {
    pub(crate) fn mnemonic(self) -> &'static str {
        match self {
            CmpPred::Eq => "eq",
            CmpPred::Ne => "ne",
            CmpPred::Lt => "slt",
            CmpPred::Le => "sle",
            CmpPred::Gt => "sgt",
            CmpPred::Ge => "sge",
        }
    }
}

/// Cast operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum CastOp {
    Trunc,
    Zext,
    Sext,
    PtrToInt,
    IntToPtr,
    Bitcast,
}

impl CastOp {
    pub(crate) fn mnemonic(self) -> &'static str {
        match self {
            CastOp::Trunc => "trunc",
            CastOp::Zext => "zext",
            CastOp::Sext => "sext",
            CastOp::PtrToInt => "ptrtoint",
            CastOp::IntToPtr => "inttoptr",
            CastOp::Bitcast => "bitcast",
        }
    }
}

/// The target of a call or invoke.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Callee {
    /// A direct call to a known function.
    Direct(FuncId),
    /// An indirect call through a value. Rejected by kernel extraction.
    Indirect(Value),
}

/// The operation an [`Instruction`] performs.
#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    /// SSA merge of values flowing in from predecessor blocks.
    Phi {
        /// The merged type.
        ty: Type,
        /// `(value, predecessor)` pairs, one per incoming edge.
        incoming: Vec<(Value, BlockId)>,
    },
    /// An integer binary operation.
    Binary {
        /// The operator.
        op: BinOp,
        /// Left operand.
        lhs: Value,
        /// Right operand.
        rhs: Value,
    },
    /// An integer comparison producing an `i1`.
    Icmp {
        /// The predicate.
        pred: CmpPred,
        /// Left operand.
        lhs: Value,
        /// Right operand.
        rhs: Value,
    },
    /// A value select on an `i1` condition.
    Select {
        /// The condition.
        cond: Value,
        /// Value when the condition is true.
        on_true: Value,
        /// Value when the condition is false.
        on_false: Value,
    },
    /// A type cast.
    Cast {
        /// The cast operator.
        op: CastOp,
        /// The value being cast.
        value: Value,
        /// The destination type.
        to: Type,
    },
    /// Pointer arithmetic.
    Gep {
        /// The resulting pointer type.
        ty: Type,
        /// The base pointer.
        base: Value,
        /// The index operands.
        indices: Vec<Value>,
    },
    /// A memory read through a pointer.
    Load {
        /// The loaded type.
        ty: Type,
        /// The pointer operand.
        ptr: Value,
    },
    /// A memory write through a pointer.
    Store {
        /// The stored value.
        value: Value,
        /// The pointer operand.
        ptr: Value,
    },
    /// A function call.
    Call {
        /// The call target.
        callee: Callee,
        /// The actual arguments, in order.
        args: Vec<Value>,
    },
    /// A call with exception edges. Rejected by kernel extraction.
    Invoke {
        /// The call target.
        callee: Callee,
        /// The actual arguments, in order.
        args: Vec<Value>,
        /// The normal-return successor.
        normal: BlockId,
        /// The unwind successor.
        unwind: BlockId,
    },
    /// An unconditional branch.
    Br {
        /// The successor block.
        dest: BlockId,
    },
    /// A two-way conditional branch.
    CondBr {
        /// The `i1` condition.
        cond: Value,
        /// Successor when the condition is true.
        then_dest: BlockId,
        /// Successor when the condition is false.
        else_dest: BlockId,
    },
    /// A multi-way branch on an integer value.
    Switch {
        /// The scrutinee.
        value: Value,
        /// The default successor.
        default: BlockId,
        /// `(case value, successor)` pairs.
        cases: Vec<(i64, BlockId)>,
    },
    /// Function return.
    Ret {
        /// The returned value; `None` for `void` functions.
        value: Option<Value>,
    },
    /// Marks an unreachable program point.
    Unreachable,
}

impl InstKind {
    /// Returns `true` for instructions that terminate a basic block.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Invoke { .. }
                | InstKind::Br { .. }
                | InstKind::CondBr { .. }
                | InstKind::Switch { .. }
                | InstKind::Ret { .. }
                | InstKind::Unreachable
        )
    }

    /// Returns `true` for phi instructions.
    #[must_use]
    pub fn is_phi(&self) -> bool {
        matches!(self, InstKind::Phi { .. })
    }

    /// Collects the successor blocks of a terminator. Non-terminators have
    /// none.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            InstKind::Br { dest } => vec![*dest],
            InstKind::CondBr {
                then_dest,
                else_dest,
                ..
            } => vec![*then_dest, *else_dest],
            InstKind::Switch { default, cases, .. } => {
                let mut out = vec![*default];
                out.extend(cases.iter().map(|(_, b)| *b));
                out
            }
            InstKind::Invoke { normal, unwind, .. } => vec![*normal, *unwind],
            _ => Vec::new(),
        }
    }

    /// Collects every value operand, including phi incomings, call arguments
    /// and indirect callees.
    #[must_use]
    pub fn operands(&self) -> Vec<Value> {
        let mut out = Vec::new();
        self.visit_values(|v| out.push(v.clone()));
        out
    }

    /// Visits every value operand slot immutably.
    pub fn visit_values(&self, mut f: impl FnMut(&Value)) {
        match self {
            InstKind::Phi { incoming, .. } => {
                for (v, _) in incoming {
                    f(v);
                }
            }
            InstKind::Binary { lhs, rhs, .. } | InstKind::Icmp { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => {
                f(cond);
                f(on_true);
                f(on_false);
            }
            InstKind::Cast { value, .. } => f(value),
            InstKind::Gep { base, indices, .. } => {
                f(base);
                for i in indices {
                    f(i);
                }
            }
            InstKind::Load { ptr, .. } => f(ptr),
            InstKind::Store { value, ptr } => {
                f(value);
                f(ptr);
            }
            InstKind::Call { callee, args } | InstKind::Invoke { callee, args, .. } => {
                if let Callee::Indirect(v) = callee {
                    f(v);
                }
                for a in args {
                    f(a);
                }
            }
            InstKind::CondBr { cond, .. } => f(cond),
            InstKind::Switch { value, .. } => f(value),
            InstKind::Ret { value: Some(v) } => f(v),
            InstKind::Ret { value: None }
            | InstKind::Br { .. }
            | InstKind::Unreachable => {}
        }
    }

    /// Rewrites every value operand slot through `f`; slots for which `f`
    /// returns `None` are left untouched.
    pub fn map_values(&mut self, mut f: impl FnMut(&Value) -> Option<Value>) {
        let mut apply = |slot: &mut Value| {
            if let Some(nv) = f(slot) {
                *slot = nv;
            }
        };
        match self {
            InstKind::Phi { incoming, .. } => {
                for (v, _) in incoming {
                    apply(v);
                }
            }
            InstKind::Binary { lhs, rhs, .. } | InstKind::Icmp { lhs, rhs, .. } => {
                apply(lhs);
                apply(rhs);
            }
            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => {
                apply(cond);
                apply(on_true);
                apply(on_false);
            }
            InstKind::Cast { value, .. } => apply(value),
            InstKind::Gep { base, indices, .. } => {
                apply(base);
                for i in indices {
                    apply(i);
                }
            }
            InstKind::Load { ptr, .. } => apply(ptr),
            InstKind::Store { value, ptr } => {
                apply(value);
                apply(ptr);
            }
            InstKind::Call { callee, args } | InstKind::Invoke { callee, args, .. } => {
                if let Callee::Indirect(v) = callee {
                    apply(v);
                }
                for a in args {
                    apply(a);
                }
            }
            InstKind::CondBr { cond, .. } => apply(cond),
            InstKind::Switch { value, .. } => apply(value),
            InstKind::Ret { value: Some(v) } => apply(v),
            InstKind::Ret { value: None }
            | InstKind::Br { .. }
            | InstKind::Unreachable => {}
        }
    }

    /// Rewrites every block reference (successors and phi predecessors)
    /// through `f`; slots for which `f` returns `None` are left untouched.
    pub fn map_blocks(&mut self, mut f: impl FnMut(BlockId) -> Option<BlockId>) {
        let mut apply = |slot: &mut BlockId| {
            if let Some(nb) = f(*slot) {
                *slot = nb;
            }
        };
        match self {
            InstKind::Phi { incoming, .. } => {
                for (_, b) in incoming {
                    apply(b);
                }
            }
            InstKind::Br { dest } => apply(dest),
            InstKind::CondBr {
                then_dest,
                else_dest,
                ..
            } => {
                apply(then_dest);
                apply(else_dest);
            }
            InstKind::Switch { default, cases, .. } => {
                apply(default);
                for (_, b) in cases {
                    apply(b);
                }
            }
            InstKind::Invoke { normal, unwind, .. } => {
                apply(normal);
                apply(unwind);
            }
            _ => {}
        }
    }

    /// Rewrites terminator successors equal to `from` into `to`. Phi
    /// predecessors are untouched; use [`InstKind::replace_phi_pred`].
    pub fn replace_successor(&mut self, from: BlockId, to: BlockId) {
        match self {
            InstKind::Phi { .. } => {}
            _ => self.map_blocks(|b| (b == from).then_some(to)),
        }
    }

    /// Rewrites phi incoming edges whose predecessor equals `from` to come
    /// from `to` instead. Returns the number of rewritten edges.
    pub fn replace_phi_pred(&mut self, from: BlockId, to: BlockId) -> usize {
        let mut n = 0;
        if let InstKind::Phi { incoming, .. } = self {
            for (_, b) in incoming {
                if *b == from {
                    *b = to;
                    n += 1;
                }
            }
        }
        n
    }
}

/// An instruction: an [`InstKind`] plus its parent link and metadata.
#[derive(Debug, Clone)]
pub struct Instruction {
    /// The operation performed.
    pub kind: InstKind,
    /// The owning block; `None` once the instruction has been erased.
    pub(crate) block: Option<BlockId>,
    /// Attached metadata.
    pub(crate) md: MetadataMap,
}

impl Instruction {
    pub(crate) fn new(kind: InstKind) -> Self {
        Self {
            kind,
            block: None,
            md: MetadataMap::default(),
        }
    }

    /// The owning block, or `None` if the instruction was erased.
    #[must_use]
    pub fn block(&self) -> Option<BlockId> {
        self.block
    }

    /// The attached metadata table.
    #[must_use]
    pub fn metadata(&self) -> &MetadataMap {
        &self.md
    }
}
