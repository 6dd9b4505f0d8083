//! Expression trees.
//!
//! Nodes are reference counted and immutable while shared: every mutator goes
//! through [`Expr::node_mut`], which clones the node if it has other owners
//! and drops the cached structural hash. Kind-specific accessors panic when
//! applied to a node of another kind.

use crate::ir::access::{AccessData, AccessType};
use crate::ir::summary::FunctionSummary;
use crate::polyhedral::{Int, IntegerSet, MultiPwAff, Param, PwAff, Space, Tuple, Val};
use crate::utils::errors::ExprKindName;
use crate::utils::intern::Symbol;
use std::cell::Cell;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Operators of operation nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
    // Assignment
    /// `a = b`
    Assign,
    /// `a += b`
    AddAssign,
    /// `a -= b`
    SubAssign,
    /// `a *= b`
    MulAssign,
    /// `a /= b`
    DivAssign,
    /// `a &= b`
    AndAssign,
    /// `a ^= b`
    XorAssign,
    /// `a |= b`
    OrAssign,

    // Arithmetic
    /// `a + b`
    Add,
    /// `a - b`
    Sub,
    /// `a * b`
    Mul,
    /// `a / b`, truncating
    Div,
    /// `a % b`, sign of the dividend
    Rem,
    /// `a << b`
    Shl,
    /// `a >> b`
    Shr,
    /// Unary `-a`
    Minus,

    // Increments
    /// `a++`
    PostInc,
    /// `a--`
    PostDec,
    /// `++a`
    PreInc,
    /// `--a`
    PreDec,

    // Comparison
    /// `a == b`
    Eq,
    /// `a != b`
    Ne,
    /// `a <= b`
    Le,
    /// `a >= b`
    Ge,
    /// `a < b`
    Lt,
    /// `a > b`
    Gt,

    // Bitwise
    /// Bitwise `a & b`
    And,
    /// Bitwise `a ^ b`
    Xor,
    /// Bitwise `a | b`
    Or,
    /// Bitwise `~a`
    Not,

    // Logical
    /// Short-circuit `a && b`
    LAnd,
    /// Short-circuit `a || b`
    LOr,
    /// `!a`
    LNot,

    /// `&a`
    AddressOf,
    /// `__assume(a)`
    Assume,
    /// Kill of the accessed data
    Kill,
    /// `a ? b : c`
    Cond,
}

impl OpType {
    /// Number of arguments of the operator.
    pub fn arity(self) -> usize {
        match self {
            OpType::Minus
            | OpType::PostInc
            | OpType::PostDec
            | OpType::PreInc
            | OpType::PreDec
            | OpType::Not
            | OpType::LNot
            | OpType::AddressOf
            | OpType::Assume
            | OpType::Kill => 1,
            OpType::Cond => 3,
            _ => 2,
        }
    }

    /// Source spelling of the operator.
    pub fn symbol(self) -> &'static str {
        match self {
            OpType::Assign => "=",
            OpType::AddAssign => "+=",
            OpType::SubAssign => "-=",
            OpType::MulAssign => "*=",
            OpType::DivAssign => "/=",
            OpType::AndAssign => "&=",
            OpType::XorAssign => "^=",
            OpType::OrAssign => "|=",
            OpType::Add => "+",
            OpType::Sub => "-",
            OpType::Mul => "*",
            OpType::Div => "/",
            OpType::Rem => "%",
            OpType::Shl => "<<",
            OpType::Shr => ">>",
            OpType::Minus => "-",
            OpType::PostInc | OpType::PreInc => "++",
            OpType::PostDec | OpType::PreDec => "--",
            OpType::Eq => "==",
            OpType::Ne => "!=",
            OpType::Le => "<=",
            OpType::Ge => ">=",
            OpType::Lt => "<",
            OpType::Gt => ">",
            OpType::And => "&",
            OpType::Xor => "^",
            OpType::Or => "|",
            OpType::Not => "~",
            OpType::LAnd => "&&",
            OpType::LOr => "||",
            OpType::LNot => "!",
            OpType::AddressOf => "&",
            OpType::Assume => "assume",
            OpType::Kill => "kill",
            OpType::Cond => "?:",
        }
    }

    /// Does the operator write its first argument?
    pub fn is_assignment(self) -> bool {
        matches!(
            self,
            OpType::Assign
                | OpType::AddAssign
                | OpType::SubAssign
                | OpType::MulAssign
                | OpType::DivAssign
                | OpType::AndAssign
                | OpType::XorAssign
                | OpType::OrAssign
                | OpType::PostInc
                | OpType::PostDec
                | OpType::PreInc
                | OpType::PreDec
        )
    }

    /// Is this one of the six comparison operators?
    pub fn is_comparison(self) -> bool {
        matches!(self, OpType::Eq | OpType::Ne | OpType::Le | OpType::Ge | OpType::Lt | OpType::Gt)
    }

    /// Is this `&&`, `||` or `!`?
    pub fn is_logical(self) -> bool {
        matches!(self, OpType::LAnd | OpType::LOr | OpType::LNot)
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Payload of call nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallData {
    /// Called function
    pub name: Symbol,
    /// What the callee does with its arguments, if known
    pub summary: Option<Rc<FunctionSummary>>,
}

/// Kind and kind-specific payload of a node.
#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Access to a variable or array element
    Access(AccessData),
    /// Function call
    Call(CallData),
    /// Cast to the named type
    Cast(String),
    /// Integer literal, possibly NaN
    Int(Val),
    /// Floating point literal with its source text
    Double {
        /// Parsed value
        value: f64,
        /// Spelling in the source
        text: String,
    },
    /// Operation on the arguments of the node
    Op(OpType),
    /// Malformed input
    Error,
}

impl ExprKind {
    /// Printable name of the kind.
    pub fn name(&self) -> ExprKindName {
        match self {
            ExprKind::Access(_) => ExprKindName::Access,
            ExprKind::Call(_) => ExprKindName::Call,
            ExprKind::Cast(_) => ExprKindName::Cast,
            ExprKind::Int(_) => ExprKindName::Int,
            ExprKind::Double { .. } => ExprKindName::Double,
            ExprKind::Op(_) => ExprKindName::Op,
            ExprKind::Error => ExprKindName::Error,
        }
    }
}

impl PartialEq for ExprKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ExprKind::Access(a), ExprKind::Access(b)) => a == b,
            (ExprKind::Call(a), ExprKind::Call(b)) => a == b,
            (ExprKind::Cast(a), ExprKind::Cast(b)) => a == b,
            (ExprKind::Int(a), ExprKind::Int(b)) => a == b,
            (ExprKind::Double { value: a, text: ta }, ExprKind::Double { value: b, text: tb }) => {
                a.to_bits() == b.to_bits() && ta == tb
            }
            (ExprKind::Op(a), ExprKind::Op(b)) => a == b,
            (ExprKind::Error, ExprKind::Error) => true,
            _ => false,
        }
    }
}

impl Eq for ExprKind {}

impl Hash for ExprKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ExprKind::Access(access) => access.hash(state),
            ExprKind::Call(call) => call.name.hash(state),
            ExprKind::Cast(type_name) => type_name.hash(state),
            ExprKind::Int(v) => v.hash(state),
            ExprKind::Double { value, text } => {
                value.to_bits().hash(state);
                text.hash(state);
            }
            ExprKind::Op(op) => op.hash(state),
            ExprKind::Error => {}
        }
    }
}

/// A node of an expression tree.
#[derive(Debug, Clone)]
pub struct ExprNode {
    kind: ExprKind,
    /// Operands, or index arguments of an access
    args: Vec<Expr>,
    /// 0 if unknown, > 0 for unsigned and < 0 for signed integers of that width
    type_size: i32,
    hash: Cell<Option<u64>>,
}

/// A shared, copy-on-write expression tree.
#[derive(Debug, Clone)]
pub struct Expr(Rc<ExprNode>);

impl Expr {
    /// A node of kind `kind` with arguments `args` and unknown type.
    pub fn new(kind: ExprKind, args: Vec<Expr>) -> Self {
        Expr(Rc::new(ExprNode { kind, args, type_size: 0, hash: Cell::new(None) }))
    }

    /// A read access through `index`.
    pub fn access(index: MultiPwAff) -> Self {
        Self::new(ExprKind::Access(AccessData::new(index)), Vec::new())
    }

    /// The affine access `[D] -> [value]`, standing for a known value.
    pub fn from_pw_aff(value: PwAff) -> Self {
        Self::access(MultiPwAff::from_pw_aff(value))
    }

    /// A read of the scalar `id` within statements over `domain`.
    pub fn scalar(id: Symbol, domain: &Space) -> Self {
        Self::access(MultiPwAff::zero_dim(domain.clone(), Tuple::named(id, 0)))
    }

    /// A read of the array `id` without subscripts.
    pub fn array(id: Symbol, domain: &Space, depth: usize) -> Self {
        let mut e = Self::scalar(id, domain);
        e.set_depth(depth);
        e
    }

    /// An integer literal.
    pub fn int(value: Int) -> Self {
        Self::new(ExprKind::Int(Val::Int(value)), Vec::new())
    }

    /// The NaN integer literal.
    pub fn nan() -> Self {
        Self::new(ExprKind::Int(Val::NaN), Vec::new())
    }

    /// A floating point literal with its source text.
    pub fn double(value: f64, text: &str) -> Self {
        Self::new(ExprKind::Double { value, text: text.to_string() }, Vec::new())
    }

    /// An operation node.
    pub fn op(op: OpType, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Op(op), args)
    }

    /// An operation with one operand.
    pub fn unary(op: OpType, arg: Expr) -> Self {
        Self::op(op, vec![arg])
    }

    /// An operation with two operands.
    pub fn binary(op: OpType, lhs: Expr, rhs: Expr) -> Self {
        Self::op(op, vec![lhs, rhs])
    }

    /// `cond ? then : otherwise`.
    pub fn ternary(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        Self::op(OpType::Cond, vec![cond, then, otherwise])
    }

    /// A call of `name` without a summary.
    pub fn call(name: Symbol, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Call(CallData { name, summary: None }), args)
    }

    /// A cast of `arg` to the type `type_name`.
    pub fn cast(type_name: &str, arg: Expr) -> Self {
        Self::new(ExprKind::Cast(type_name.to_string()), vec![arg])
    }

    /// A node standing for malformed input.
    pub fn error() -> Self {
        Self::new(ExprKind::Error, Vec::new())
    }

    /// Builder form of [`Expr::set_type_size`].
    pub fn with_type_size(mut self, type_size: i32) -> Self {
        self.set_type_size(type_size);
        self
    }

    // --- queries ---

    /// Kind of the node.
    pub fn kind(&self) -> &ExprKind {
        &self.0.kind
    }

    /// Printable name of the kind of the node.
    pub fn kind_name(&self) -> ExprKindName {
        self.0.kind.name()
    }

    /// Arguments of the node.
    pub fn args(&self) -> &[Expr] {
        &self.0.args
    }

    /// Argument `pos`.
    pub fn arg(&self, pos: usize) -> &Expr {
        &self.0.args[pos]
    }

    /// Number of arguments.
    pub fn n_arg(&self) -> usize {
        self.0.args.len()
    }

    /// Integer type of the node; see [`ExprNode`].
    pub fn type_size(&self) -> i32 {
        self.0.type_size
    }

    /// Do both handles point to the same node?
    pub fn ptr_eq(a: &Expr, b: &Expr) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    /// Is this an access node?
    pub fn is_access(&self) -> bool {
        matches!(self.0.kind, ExprKind::Access(_))
    }

    /// Access payload, if this is an access node.
    pub fn as_access(&self) -> Option<&AccessData> {
        match &self.0.kind {
            ExprKind::Access(access) => Some(access),
            _ => None,
        }
    }

    /// Operator, if this is an operation node.
    pub fn as_op(&self) -> Option<OpType> {
        match self.0.kind {
            ExprKind::Op(op) => Some(op),
            _ => None,
        }
    }

    /// Call payload, if this is a call node.
    pub fn as_call(&self) -> Option<&CallData> {
        match &self.0.kind {
            ExprKind::Call(call) => Some(call),
            _ => None,
        }
    }

    /// Value, if this is an integer literal.
    pub fn as_int(&self) -> Option<Val> {
        match self.0.kind {
            ExprKind::Int(v) => Some(v),
            _ => None,
        }
    }

    /// Access payload.
    ///
    /// # Panics
    /// If the node is not an access.
    pub fn access_data(&self) -> &AccessData {
        match &self.0.kind {
            ExprKind::Access(access) => access,
            other => panic!("access payload requested from {} node", other.name()),
        }
    }

    /// Operator of an operation node; panics on other kinds.
    pub fn op_type(&self) -> OpType {
        match self.0.kind {
            ExprKind::Op(op) => op,
            ref other => panic!("operator requested from {} node", other.name()),
        }
    }

    /// Name of a called function; panics on other kinds.
    pub fn call_name(&self) -> Symbol {
        match &self.0.kind {
            ExprKind::Call(call) => call.name,
            other => panic!("callee requested from {} node", other.name()),
        }
    }

    /// Value of an integer literal; panics on other kinds.
    pub fn int_val(&self) -> Val {
        match self.0.kind {
            ExprKind::Int(v) => v,
            ref other => panic!("integer value requested from {} node", other.name()),
        }
    }

    /// Is this the NaN integer literal?
    pub fn is_nan_int(&self) -> bool {
        matches!(self.0.kind, ExprKind::Int(Val::NaN))
    }

    /// An access whose index has an unnamed range: the node stands for the
    /// value of the index rather than for a memory reference.
    pub fn is_affine(&self) -> bool {
        self.as_access().map_or(false, |a| !a.index().has_named_range())
    }

    /// A zero-dimensional access to a named variable.
    pub fn is_scalar_access(&self) -> bool {
        self.as_access().map_or(false, AccessData::is_scalar)
    }

    /// Identifier of the accessed array; panics on non-accesses.
    pub fn access_id(&self) -> Option<Symbol> {
        self.access_data().array_id()
    }

    /// Index expression of an access node.
    pub fn access_index(&self) -> &MultiPwAff {
        self.access_data().index()
    }

    /// Access relation of a kind; panics on non-accesses.
    pub fn access_relation(&self, ty: AccessType) -> IntegerSet {
        self.access_data().relation(ty)
    }

    /// Is this an access that reads?
    pub fn is_read(&self) -> bool {
        self.access_data().read
    }

    /// Is this an access that writes?
    pub fn is_write(&self) -> bool {
        self.access_data().write
    }

    // --- mutation ---

    /// Unique mutable access to the node; clears the cached hash.
    fn node_mut(&mut self) -> &mut ExprNode {
        let node = Rc::make_mut(&mut self.0);
        node.hash.set(None);
        node
    }

    /// Replace argument `pos`.
    pub fn set_arg(&mut self, pos: usize, arg: Expr) {
        self.node_mut().args[pos] = arg;
    }

    /// Replace all arguments.
    pub fn set_args(&mut self, args: Vec<Expr>) {
        self.node_mut().args = args;
    }

    /// Append an argument.
    pub fn push_arg(&mut self, arg: Expr) {
        self.node_mut().args.push(arg);
    }

    /// Remove argument `pos`.
    pub fn remove_arg(&mut self, pos: usize) -> Expr {
        self.node_mut().args.remove(pos)
    }

    /// Set the integer type of the node.
    pub fn set_type_size(&mut self, type_size: i32) {
        if self.0.type_size != type_size {
            self.node_mut().type_size = type_size;
        }
    }

    /// Mutable access payload.
    ///
    /// # Panics
    /// If the node is not an access.
    pub fn access_mut(&mut self) -> &mut AccessData {
        match &mut self.node_mut().kind {
            ExprKind::Access(access) => access,
            other => panic!("access payload modified on {} node", other.name()),
        }
    }

    /// Mark an access as reading or not.
    pub fn set_read(&mut self, read: bool) {
        self.access_mut().read = read;
    }

    /// Mark an access as writing or not.
    pub fn set_write(&mut self, write: bool) {
        self.access_mut().write = write;
    }

    /// Mark an access as a kill.
    pub fn set_kill(&mut self, kill: bool) {
        self.access_mut().kill = kill;
    }

    /// Set the reference identifier of an access.
    pub fn set_ref_id(&mut self, ref_id: Symbol) {
        self.access_mut().ref_id = Some(ref_id);
    }

    /// Change the depth of an access; panics once relations are set.
    pub fn set_depth(&mut self, depth: usize) {
        self.access_mut().set_depth(depth);
    }

    /// Set one access relation of an access explicitly.
    pub fn set_access_relation(&mut self, ty: AccessType, relation: IntegerSet) {
        self.access_mut().set_relation(ty, relation);
    }

    /// Attach a summary to a call node; panics on other kinds.
    pub fn set_call_summary(&mut self, summary: Rc<FunctionSummary>) {
        match &mut self.node_mut().kind {
            ExprKind::Call(call) => call.summary = Some(summary),
            other => panic!("summary attached to {} node", other.name()),
        }
    }

    // --- traversal ---

    /// Call `f` on every access in the tree, arguments before the node.
    pub fn foreach_access(&self, f: &mut dyn FnMut(&Expr)) {
        for arg in self.args() {
            arg.foreach_access(f);
        }
        if self.is_access() {
            f(self);
        }
    }

    /// Does `pred` hold for some node of the tree?
    pub fn any(&self, pred: &dyn Fn(&Expr) -> bool) -> bool {
        pred(self) || self.args().iter().any(|a| a.any(pred))
    }

    fn map_args(mut self, f: &mut dyn FnMut(Expr) -> Expr) -> Expr {
        for pos in 0..self.n_arg() {
            let arg = self.arg(pos).clone();
            let mapped = f(arg.clone());
            if !Expr::ptr_eq(&arg, &mapped) {
                self.set_arg(pos, mapped);
            }
        }
        self
    }

    /// Bottom-up rewrite of the nodes satisfying `pred`.
    pub fn map_bottom_up(self, pred: &dyn Fn(&Expr) -> bool, f: &mut dyn FnMut(Expr) -> Expr) -> Expr {
        let e = self.map_args(&mut |arg| arg.map_bottom_up(pred, f));
        if pred(&e) {
            f(e)
        } else {
            e
        }
    }

    /// Bottom-up rewrite of every access.
    pub fn map_access(self, f: &mut dyn FnMut(Expr) -> Expr) -> Expr {
        self.map_bottom_up(&Expr::is_access, f)
    }

    /// Bottom-up rewrite of every operation.
    pub fn map_op(self, f: &mut dyn FnMut(Expr) -> Expr) -> Expr {
        self.map_bottom_up(&|e| e.as_op().is_some(), f)
    }

    /// Bottom-up rewrite of every call.
    pub fn map_call(self, f: &mut dyn FnMut(Expr) -> Expr) -> Expr {
        self.map_bottom_up(&|e| e.as_call().is_some(), f)
    }

    /// Top-down rewrite: `f` sees each node before its arguments, and the
    /// arguments of the node it returns are rewritten next.
    pub fn map_top_down(self, f: &mut dyn FnMut(Expr) -> Expr) -> Expr {
        let e = f(self);
        e.map_args(&mut |arg| arg.map_top_down(f))
    }

    // --- nested parameters ---

    /// Does any access in the tree refer to a nested capture?
    pub fn contains_nested(&self) -> bool {
        self.any(&|e| {
            e.as_access().map_or(false, |a| {
                a.index().involves_param_where(&Param::is_nested)
                    || AccessType::ALL.iter().any(|&ty| {
                        a.explicit_relation(ty)
                            .map_or(false, |r| r.involves_param_where(&Param::is_nested))
                    })
            })
        })
    }

    /// Remove every reference to nested captures: index values involving
    /// them become NaN and relation constraints involving them are dropped.
    pub fn strip_nested(self) -> Expr {
        self.map_access(&mut |mut e| {
            let access = e.access_mut();
            let outputs = access.index().outputs.iter().map(|o| o.strip_params(&Param::is_nested)).collect();
            let index = MultiPwAff::new(access.index().space.clone(), outputs);
            access.set_index(index);
            access.map_explicit_relations(|r| r.drop_constraints_involving(&Param::is_nested));
            e
        })
    }

    fn compute_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.0.kind.hash(&mut hasher);
        self.0.type_size.hash(&mut hasher);
        for arg in &self.0.args {
            hasher.write_u64(arg.structural_hash());
        }
        hasher.finish()
    }

    /// Structural hash, memoized per node.
    pub fn structural_hash(&self) -> u64 {
        if let Some(h) = self.0.hash.get() {
            return h;
        }
        let h = self.compute_hash();
        self.0.hash.set(Some(h));
        h
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        if Expr::ptr_eq(self, other) {
            return true;
        }
        if let (Some(a), Some(b)) = (self.0.hash.get(), other.0.hash.get()) {
            if a != b {
                return false;
            }
        }
        self.0.type_size == other.0.type_size
            && self.0.kind == other.0.kind
            && self.0.args == other.0.args
    }
}

impl Eq for Expr {}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.structural_hash());
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ExprKind::Access(access) => {
                if self.is_affine() && access.index().n_out() == 1 {
                    write!(f, "{}", access.index().outputs[0])?;
                } else {
                    match access.array_id() {
                        Some(id) => write!(f, "{}", id)?,
                        None => write!(f, "{}", access.index().range_tuple())?,
                    }
                    for output in &access.index().outputs {
                        write!(f, "[{}]", output)?;
                    }
                }
                if self.n_arg() > 0 {
                    let args: Vec<String> = self.args().iter().map(|a| a.to_string()).collect();
                    write!(f, " with ({})", args.join(", "))?;
                }
                Ok(())
            }
            ExprKind::Call(call) => {
                let args: Vec<String> = self.args().iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", call.name, args.join(", "))
            }
            ExprKind::Cast(type_name) => write!(f, "({}) {}", type_name, self.arg(0)),
            ExprKind::Int(v) => write!(f, "{}", v),
            ExprKind::Double { text, .. } => write!(f, "{}", text),
            ExprKind::Op(op) => match (op, self.args()) {
                (OpType::Cond, [c, a, b]) => write!(f, "({} ? {} : {})", c, a, b),
                (OpType::PostInc | OpType::PostDec, [a]) => write!(f, "({}{})", a, op),
                (_, [a]) => write!(f, "({}{})", op, a),
                (_, [a, b]) => write!(f, "({} {} {})", a, op, b),
                _ => write!(f, "<{} with {} args>", op, self.n_arg()),
            },
            ExprKind::Error => write!(f, "<error>"),
        }
    }
}
