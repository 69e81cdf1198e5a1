//! Arena storage for modules, functions, globals, blocks and instructions.
//!
//! The [`Context`] owns every IR entity of the run. Handles are stable and
//! context-unique, so entities of different modules (the source module under
//! analysis and the synthesized output module) can be related through plain
//! keyed tables. Structural queries (successors, predecessors, users) are
//! scan-based; the extractor is a batch tool and favors simplicity over
//! incremental use lists.

use rustc_hash::FxHashMap;

use crate::ir::handle::{BlockId, FuncId, GlobalId, InstId, ModuleId};
use crate::ir::inst::{Callee, InstKind, Instruction};
use crate::ir::types::{Signature, Type};
use crate::ir::value::Value;
use crate::ir::{MetaValue, MetadataMap};

/// Linkage of a global entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    /// Externally visible.
    External,
    /// Module-private.
    Internal,
}

/// A module: a named set of functions and globals.
#[derive(Debug)]
pub struct Module {
    /// The module name.
    pub name: String,
    pub(crate) functions: Vec<FuncId>,
    pub(crate) globals: Vec<GlobalId>,
}

/// A function: a signature plus an ordered list of basic blocks. A function
/// without blocks is a declaration.
#[derive(Debug)]
pub struct Function {
    /// The function name, unique within its module.
    pub name: String,
    pub(crate) module: ModuleId,
    pub(crate) sig: Signature,
    pub(crate) blocks: Vec<BlockId>,
    pub(crate) attributes: Vec<String>,
    pub(crate) md: MetadataMap,
}

impl Function {
    /// The function signature.
    #[must_use]
    pub fn sig(&self) -> &Signature {
        &self.sig
    }

    /// The blocks of the function, in layout order.
    #[must_use]
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    /// Function attributes, free-form strings preserved across export.
    #[must_use]
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// Returns `true` if this function has no body.
    #[must_use]
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Replaces the attribute list.
    pub fn set_attributes(&mut self, attrs: Vec<String>) {
        self.attributes = attrs;
    }
}

/// A module-scope global variable.
#[derive(Debug)]
pub struct GlobalVar {
    /// The variable name, unique within its module.
    pub name: String,
    pub(crate) module: ModuleId,
    /// The value type; the address of the global has type `ty*`.
    pub ty: Type,
    /// The initializer, if any.
    pub init: Option<crate::ir::Constant>,
    /// Whether the global is immutable.
    pub is_const: bool,
    /// Linkage.
    pub linkage: Linkage,
    /// Thread-local storage flag.
    pub thread_local: bool,
    /// Address space number.
    pub addr_space: u32,
    pub(crate) md: MetadataMap,
}

impl GlobalVar {
    /// Creates an external, mutable global with the given value type and
    /// optional initializer. The module link is set by
    /// [`Context::add_global`].
    #[must_use]
    pub fn new(name: impl Into<String>, ty: Type, init: Option<crate::ir::Constant>) -> Self {
        Self {
            name: name.into(),
            module: ModuleId::new(0),
            ty,
            init,
            is_const: false,
            linkage: Linkage::External,
            thread_local: false,
            addr_space: 0,
            md: MetadataMap::default(),
        }
    }
}

/// A basic block: an ordered list of instructions ending in a terminator.
#[derive(Debug)]
pub struct BasicBlock {
    /// The block label; may be empty for synthesized blocks.
    pub name: String,
    pub(crate) func: FuncId,
    pub(crate) insts: Vec<InstId>,
    pub(crate) md: MetadataMap,
}

impl BasicBlock {
    /// The instructions of the block, in order.
    #[must_use]
    pub fn insts(&self) -> &[InstId] {
        &self.insts
    }

    /// The owning function.
    #[must_use]
    pub fn func(&self) -> FuncId {
        self.func
    }
}

/// The rewrite table threaded through cloning, remapping and promotion.
///
/// Values and blocks are mapped separately: a value map entry rewrites
/// operand slots, a block map entry rewrites successor and phi-predecessor
/// slots. Both sides are handle-keyed tables, never back-pointers.
#[derive(Debug, Default, Clone)]
pub struct ValueMap {
    /// Original value to rewritten value.
    pub values: FxHashMap<Value, Value>,
    /// Original block to rewritten block.
    pub blocks: FxHashMap<BlockId, BlockId>,
}

impl ValueMap {
    /// Looks up the rewrite of a value.
    #[must_use]
    pub fn value(&self, v: &Value) -> Option<&Value> {
        self.values.get(v)
    }

    /// Looks up the rewrite of a block.
    #[must_use]
    pub fn block(&self, b: BlockId) -> Option<BlockId> {
        self.blocks.get(&b).copied()
    }

    /// Follows a replace-all-uses: every mapping whose rewrite side equals
    /// `from` is redirected to `to`, so entries keep tracking values across
    /// replacement and erasure.
    pub fn retarget(&mut self, from: &Value, to: &Value) {
        for v in self.values.values_mut() {
            if v == from {
                *v = to.clone();
            }
        }
    }
}

/// Owns all IR entities of a run.
#[derive(Debug, Default)]
pub struct Context {
    modules: Vec<Module>,
    functions: Vec<Function>,
    globals: Vec<GlobalVar>,
    blocks: Vec<BasicBlock>,
    insts: Vec<Instruction>,
}

impl Context {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Modules
    // ------------------------------------------------------------------

    /// Creates a new, empty module.
    pub fn add_module(&mut self, name: impl Into<String>) -> ModuleId {
        let id = ModuleId::new(self.modules.len());
        self.modules.push(Module {
            name: name.into(),
            functions: Vec::new(),
            globals: Vec::new(),
        });
        id
    }

    /// Returns the module behind a handle.
    #[must_use]
    pub fn module(&self, m: ModuleId) -> &Module {
        &self.modules[m.index()]
    }

    /// The functions of a module, in creation order.
    #[must_use]
    pub fn module_functions(&self, m: ModuleId) -> &[FuncId] {
        &self.modules[m.index()].functions
    }

    /// The globals of a module, in creation order.
    #[must_use]
    pub fn module_globals(&self, m: ModuleId) -> &[GlobalId] {
        &self.modules[m.index()].globals
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    /// Creates a function in `m`. The name is made unique within the module
    /// by appending a numeric suffix when taken.
    pub fn add_function(
        &mut self,
        m: ModuleId,
        name: impl Into<String>,
        sig: Signature,
    ) -> FuncId {
        let name = self.unique_function_name(m, name.into());
        self.add_function_raw(m, name, sig)
    }

    fn add_function_raw(&mut self, m: ModuleId, name: String, sig: Signature) -> FuncId {
        let id = FuncId::new(self.functions.len());
        self.functions.push(Function {
            name,
            module: m,
            sig,
            blocks: Vec::new(),
            attributes: Vec::new(),
            md: MetadataMap::default(),
        });
        self.modules[m.index()].functions.push(id);
        id
    }

    fn unique_function_name(&self, m: ModuleId, base: String) -> String {
        if self.function_by_name(m, &base).is_none() {
            return base;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{base}.{n}");
            if self.function_by_name(m, &candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }

    /// Finds a function by exact name within a module.
    #[must_use]
    pub fn function_by_name(&self, m: ModuleId, name: &str) -> Option<FuncId> {
        self.modules[m.index()]
            .functions
            .iter()
            .copied()
            .find(|f| self.functions[f.index()].name == name)
    }

    /// Finds a function by name, creating a declaration with the given
    /// signature when absent.
    pub fn get_or_insert_function(
        &mut self,
        m: ModuleId,
        name: &str,
        sig: Signature,
    ) -> FuncId {
        match self.function_by_name(m, name) {
            Some(f) => f,
            None => self.add_function_raw(m, name.to_string(), sig),
        }
    }

    /// Returns the function behind a handle.
    #[must_use]
    pub fn function(&self, f: FuncId) -> &Function {
        &self.functions[f.index()]
    }

    /// Mutable access to a function.
    pub fn function_mut(&mut self, f: FuncId) -> &mut Function {
        &mut self.functions[f.index()]
    }

    /// The module that owns `f`.
    #[must_use]
    pub fn func_module(&self, f: FuncId) -> ModuleId {
        self.functions[f.index()].module
    }

    /// The entry block of `f`, if it has a body.
    #[must_use]
    pub fn entry_block(&self, f: FuncId) -> Option<BlockId> {
        self.functions[f.index()].blocks.first().copied()
    }

    /// Detaches a function from its module. Blocks and instructions stay in
    /// the arena but the module no longer lists the function.
    pub fn remove_function(&mut self, f: FuncId) {
        let m = self.functions[f.index()].module;
        self.modules[m.index()].functions.retain(|&x| x != f);
    }

    // ------------------------------------------------------------------
    // Globals
    // ------------------------------------------------------------------

    /// Creates a global variable in `m`. Unnamed globals receive a fresh
    /// `g.N` name; named globals are uniquified like functions.
    pub fn add_global(&mut self, m: ModuleId, mut var: GlobalVar) -> GlobalId {
        let id = GlobalId::new(self.globals.len());
        if var.name.is_empty() {
            var.name = format!("g.{}", id.index());
        } else if self.global_by_name(m, &var.name).is_some() {
            var.name = format!("{}.{}", var.name, id.index());
        }
        var.module = m;
        self.globals.push(var);
        self.modules[m.index()].globals.push(id);
        id
    }

    /// Finds a global by exact name within a module.
    #[must_use]
    pub fn global_by_name(&self, m: ModuleId, name: &str) -> Option<GlobalId> {
        self.modules[m.index()]
            .globals
            .iter()
            .copied()
            .find(|g| self.globals[g.index()].name == name)
    }

    /// Returns the global behind a handle.
    #[must_use]
    pub fn global(&self, g: GlobalId) -> &GlobalVar {
        &self.globals[g.index()]
    }

    /// The module that owns `g`.
    #[must_use]
    pub fn global_module(&self, g: GlobalId) -> ModuleId {
        self.globals[g.index()].module
    }

    /// Detaches a global from its module.
    pub fn remove_global(&mut self, g: GlobalId) {
        let m = self.globals[g.index()].module;
        self.modules[m.index()].globals.retain(|&x| x != g);
    }

    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    /// Appends a new empty block to `f`.
    pub fn append_block(&mut self, f: FuncId, name: impl Into<String>) -> BlockId {
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(BasicBlock {
            name: name.into(),
            func: f,
            insts: Vec::new(),
            md: MetadataMap::default(),
        });
        self.functions[f.index()].blocks.push(id);
        id
    }

    /// Returns the block behind a handle.
    #[must_use]
    pub fn block(&self, b: BlockId) -> &BasicBlock {
        &self.blocks[b.index()]
    }

    /// The function that owns `b`.
    #[must_use]
    pub fn block_func(&self, b: BlockId) -> FuncId {
        self.blocks[b.index()].func
    }

    /// The module that owns `b`.
    #[must_use]
    pub fn block_module(&self, b: BlockId) -> ModuleId {
        self.func_module(self.block_func(b))
    }

    /// The terminator of `b`, when the block is non-empty and ends in one.
    #[must_use]
    pub fn terminator(&self, b: BlockId) -> Option<InstId> {
        let last = *self.blocks[b.index()].insts.last()?;
        self.insts[last.index()].kind.is_terminator().then_some(last)
    }

    /// The successor blocks of `b`.
    #[must_use]
    pub fn successors(&self, b: BlockId) -> Vec<BlockId> {
        self.terminator(b)
            .map(|t| self.insts[t.index()].kind.successors())
            .unwrap_or_default()
    }

    /// The predecessor blocks of `b` within its function, in layout order.
    #[must_use]
    pub fn predecessors(&self, b: BlockId) -> Vec<BlockId> {
        let f = self.block_func(b);
        self.functions[f.index()]
            .blocks
            .iter()
            .copied()
            .filter(|&p| self.successors(p).contains(&b))
            .collect()
    }

    /// The first non-phi instruction of `b`.
    #[must_use]
    pub fn first_non_phi(&self, b: BlockId) -> Option<InstId> {
        self.blocks[b.index()]
            .insts
            .iter()
            .copied()
            .find(|i| !self.insts[i.index()].kind.is_phi())
    }

    /// The phi prefix of `b`.
    #[must_use]
    pub fn phis(&self, b: BlockId) -> Vec<InstId> {
        self.blocks[b.index()]
            .insts
            .iter()
            .copied()
            .take_while(|i| self.insts[i.index()].kind.is_phi())
            .collect()
    }

    // ------------------------------------------------------------------
    // Instructions
    // ------------------------------------------------------------------

    /// Appends an instruction to the end of `b`.
    pub fn push(&mut self, b: BlockId, kind: InstKind) -> InstId {
        let id = self.alloc_inst(kind, b);
        self.blocks[b.index()].insts.push(id);
        id
    }

    /// Inserts an instruction immediately before `before`.
    ///
    /// # Panics
    ///
    /// Panics if `before` has been erased.
    pub fn insert_before(&mut self, before: InstId, kind: InstKind) -> InstId {
        let b = self.insts[before.index()].block.expect("anchor erased");
        let id = self.alloc_inst(kind, b);
        let pos = self.position(b, before);
        self.blocks[b.index()].insts.insert(pos, id);
        id
    }

    /// Inserts an instruction immediately after `after`.
    ///
    /// # Panics
    ///
    /// Panics if `after` has been erased.
    pub fn insert_after(&mut self, after: InstId, kind: InstKind) -> InstId {
        let b = self.insts[after.index()].block.expect("anchor erased");
        let id = self.alloc_inst(kind, b);
        let pos = self.position(b, after);
        self.blocks[b.index()].insts.insert(pos + 1, id);
        id
    }

    fn alloc_inst(&mut self, kind: InstKind, b: BlockId) -> InstId {
        let id = InstId::new(self.insts.len());
        let mut inst = Instruction::new(kind);
        inst.block = Some(b);
        self.insts.push(inst);
        id
    }

    fn position(&self, b: BlockId, i: InstId) -> usize {
        self.blocks[b.index()]
            .insts
            .iter()
            .position(|&x| x == i)
            .expect("instruction not in its parent block")
    }

    /// Returns the instruction behind a handle.
    #[must_use]
    pub fn inst(&self, i: InstId) -> &Instruction {
        &self.insts[i.index()]
    }

    /// Mutable access to an instruction.
    pub fn inst_mut(&mut self, i: InstId) -> &mut Instruction {
        &mut self.insts[i.index()]
    }

    /// The block owning `i`, or `None` once erased.
    #[must_use]
    pub fn inst_block(&self, i: InstId) -> Option<BlockId> {
        self.insts[i.index()].block
    }

    /// Detaches `i` from its block. Callers are responsible for replacing
    /// uses of the result first.
    pub fn erase_inst(&mut self, i: InstId) {
        if let Some(b) = self.insts[i.index()].block.take() {
            self.blocks[b.index()].insts.retain(|&x| x != i);
        }
    }

    /// Adds an incoming edge to a phi.
    ///
    /// # Panics
    ///
    /// Panics if `i` is not a phi.
    pub fn phi_add_incoming(&mut self, i: InstId, value: Value, pred: BlockId) {
        match &mut self.insts[i.index()].kind {
            InstKind::Phi { incoming, .. } => incoming.push((value, pred)),
            _ => panic!("phi_add_incoming on non-phi"),
        }
    }

    /// Adds a case to a switch.
    ///
    /// # Panics
    ///
    /// Panics if `i` is not a switch.
    pub fn switch_add_case(&mut self, i: InstId, value: i64, dest: BlockId) {
        match &mut self.insts[i.index()].kind {
            InstKind::Switch { cases, .. } => cases.push((value, dest)),
            _ => panic!("switch_add_case on non-switch"),
        }
    }

    // ------------------------------------------------------------------
    // Typing
    // ------------------------------------------------------------------

    /// The result type of an instruction; [`Type::Void`] when it has none.
    #[must_use]
    pub fn inst_type(&self, i: InstId) -> Type {
        match &self.insts[i.index()].kind {
            InstKind::Phi { ty, .. } => ty.clone(),
            InstKind::Binary { lhs, .. } => self.value_type(lhs),
            InstKind::Icmp { .. } => Type::Int(1),
            InstKind::Select { on_true, .. } => self.value_type(on_true),
            InstKind::Cast { to, .. } => to.clone(),
            InstKind::Gep { ty, .. } => ty.clone(),
            InstKind::Load { ty, .. } => ty.clone(),
            InstKind::Call { callee, .. } | InstKind::Invoke { callee, .. } => match callee {
                Callee::Direct(f) => self.functions[f.index()].sig.ret.clone(),
                Callee::Indirect(_) => Type::Void,
            },
            _ => Type::Void,
        }
    }

    /// The type of a value.
    #[must_use]
    pub fn value_type(&self, v: &Value) -> Type {
        match v {
            Value::Inst(i) => self.inst_type(*i),
            Value::Arg(f, idx) => self.functions[f.index()].sig.params[*idx as usize].clone(),
            Value::Global(g) => self.globals[g.index()].ty.clone().ptr_to(),
            Value::Func(_) => Type::Void.ptr_to(),
            Value::Const(c) => c.ty(),
        }
    }

    // ------------------------------------------------------------------
    // Uses
    // ------------------------------------------------------------------

    /// Every attached instruction, in any module, that references function
    /// `f` as a direct callee or as a value operand. Arena order.
    #[must_use]
    pub fn func_users(&self, f: FuncId) -> Vec<InstId> {
        let mut out = Vec::new();
        for (idx, inst) in self.insts.iter().enumerate() {
            if inst.block.is_none() {
                continue;
            }
            let is_callee = match &inst.kind {
                InstKind::Call { callee, .. } | InstKind::Invoke { callee, .. } => {
                    matches!(callee, Callee::Direct(cf) if *cf == f)
                }
                _ => false,
            };
            let mut is_operand = false;
            inst.kind.visit_values(|v| {
                if matches!(v, Value::Func(vf) if *vf == f) {
                    is_operand = true;
                }
            });
            if is_callee || is_operand {
                out.push(InstId::new(idx));
            }
        }
        out
    }

    /// Replaces every use of `old` with `new` inside the body of `f`.
    pub fn replace_all_uses_in_func(&mut self, f: FuncId, old: &Value, new: &Value) {
        let blocks = self.functions[f.index()].blocks.clone();
        for b in blocks {
            let insts = self.blocks[b.index()].insts.clone();
            for i in insts {
                self.insts[i.index()]
                    .kind
                    .map_values(|v| (v == old).then(|| new.clone()));
            }
        }
    }

    // ------------------------------------------------------------------
    // Block surgery
    // ------------------------------------------------------------------

    /// Splits `b` so that `first_of_tail` and everything after it move to a
    /// new block. `b` is terminated with a branch to the tail; phi
    /// predecessors in the moved terminator's successors are rewired to the
    /// tail. Returns the tail block.
    pub fn split_block(&mut self, b: BlockId, first_of_tail: InstId) -> BlockId {
        let f = self.blocks[b.index()].func;
        let tail = BlockId::new(self.blocks.len());
        self.blocks.push(BasicBlock {
            name: String::new(),
            func: f,
            insts: Vec::new(),
            md: MetadataMap::default(),
        });

        // Lay the tail out right after the original block.
        let fblocks = &mut self.functions[f.index()].blocks;
        let at = fblocks.iter().position(|&x| x == b).expect("block not in function") + 1;
        fblocks.insert(at, tail);

        let pos = self.position(b, first_of_tail);
        let moved: Vec<InstId> = self.blocks[b.index()].insts.split_off(pos);
        for &i in &moved {
            self.insts[i.index()].block = Some(tail);
        }
        self.blocks[tail.index()].insts = moved;

        self.push(b, InstKind::Br { dest: tail });

        for succ in self.successors(tail) {
            let phis = self.phis(succ);
            for p in phis {
                self.insts[p.index()].kind.replace_phi_pred(b, tail);
            }
        }
        tail
    }

    /// Clones `src` into `dst_func`, appending the clone at the end.
    /// Operands of the cloned instructions still reference the originals;
    /// `vmap` records `original -> clone` for the block and for each
    /// instruction so a later remap pass can rewrite them.
    pub fn clone_block(&mut self, src: BlockId, dst_func: FuncId, vmap: &mut ValueMap) -> BlockId {
        let name = self.blocks[src.index()].name.clone();
        let md = self.blocks[src.index()].md.clone();
        let dst = self.append_block(dst_func, name);
        self.blocks[dst.index()].md = md;

        let insts = self.blocks[src.index()].insts.clone();
        for old in insts {
            let kind = self.insts[old.index()].kind.clone();
            let inst_md = self.insts[old.index()].md.clone();
            let new = self.push(dst, kind);
            self.insts[new.index()].md = inst_md;
            vmap.values.insert(Value::Inst(old), Value::Inst(new));
        }
        vmap.blocks.insert(src, dst);
        dst
    }

    /// Rewrites the operands and block references of `i` through `vmap`.
    pub fn remap_inst(&mut self, i: InstId, vmap: &ValueMap) {
        let inst = &mut self.insts[i.index()];
        inst.kind.map_values(|v| vmap.values.get(v).cloned());
        inst.kind.map_blocks(|b| vmap.blocks.get(&b).copied());
    }

    /// Rewrites terminator successors of `b` equal to `from` into `to`.
    pub fn replace_successor(&mut self, b: BlockId, from: BlockId, to: BlockId) {
        if let Some(t) = self.terminator(b) {
            self.insts[t.index()].kind.replace_successor(from, to);
        }
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    /// Reads instruction metadata.
    #[must_use]
    pub fn inst_meta(&self, i: InstId, key: &str) -> Option<&MetaValue> {
        self.insts[i.index()].md.get(key)
    }

    /// Writes instruction metadata.
    pub fn set_inst_meta(&mut self, i: InstId, key: &str, value: MetaValue) {
        self.insts[i.index()].md.insert(key.to_string(), value);
    }

    /// Removes instruction metadata under `key`.
    pub fn remove_inst_meta(&mut self, i: InstId, key: &str) {
        self.insts[i.index()].md.remove(key);
    }

    /// Reads block metadata.
    #[must_use]
    pub fn block_meta(&self, b: BlockId, key: &str) -> Option<&MetaValue> {
        self.blocks[b.index()].md.get(key)
    }

    /// Writes block metadata.
    pub fn set_block_meta(&mut self, b: BlockId, key: &str, value: MetaValue) {
        self.blocks[b.index()].md.insert(key.to_string(), value);
    }

    /// Writes function metadata.
    pub fn set_func_meta(&mut self, f: FuncId, key: &str, value: MetaValue) {
        self.functions[f.index()].md.insert(key.to_string(), value);
    }

    /// Reads function metadata.
    #[must_use]
    pub fn func_meta(&self, f: FuncId, key: &str) -> Option<&MetaValue> {
        self.functions[f.index()].md.get(key)
    }

    /// Writes global metadata.
    pub fn set_global_meta(&mut self, g: GlobalId, key: &str, value: MetaValue) {
        self.globals[g.index()].md.insert(key.to_string(), value);
    }

    /// Reads global metadata.
    #[must_use]
    pub fn global_meta(&self, g: GlobalId, key: &str) -> Option<&MetaValue> {
        self.globals[g.index()].md.get(key)
    }
}
