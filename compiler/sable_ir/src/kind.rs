//! Node catalogue.
//!
//! [`NodeClass`] is the tag of a node: it fixes the node's edge layout
//! ([`NodeClass::inputs`], [`NodeClass::successors`]) and the shape of its
//! data fields ([`NodeClass::field_kinds`]). [`NodeKind`] is the tag plus the
//! data. The codec walks these shapes instead of reflecting over node
//! instances.
//!
//! Edge slot numbering lives in [`slot`]; every class documents which slots
//! it uses.

use std::sync::Arc;

// ── Edge layout ─────────────────────────────────────────────────────

/// Number of direct edges and edge lists of one edge kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EdgeShape {
    /// Single-node edge slots.
    pub direct: usize,
    /// List-valued edge slots.
    pub lists: usize,
}

impl EdgeShape {
    pub const NONE: EdgeShape = EdgeShape::new(0, 0);

    #[inline]
    pub const fn new(direct: usize, lists: usize) -> Self {
        EdgeShape { direct, lists }
    }

    #[inline]
    const fn direct(direct: usize) -> Self {
        EdgeShape { direct, lists: 0 }
    }
}

/// Edge slot indices.
///
/// Direct and list slots are numbered independently. Classes reuse the
/// same index under different names; the class table on [`NodeClass`]
/// says which name applies.
pub mod slot {
    // Successors
    pub const NEXT: usize = 0;
    pub const TRUE_SUCCESSOR: usize = 0;
    pub const FALSE_SUCCESSOR: usize = 1;
    pub const EXCEPTION_EDGE: usize = 1;
    /// List: `IntegerSwitch` targets.
    pub const SWITCH_SUCCESSORS: usize = 0;

    // Direct inputs
    /// `If` condition, `IntegerSwitch` value, `Return` result, `Unwind`
    /// exception, `Sink` value, `ValueProxy`/`ProxyPlaceholder` value.
    pub const VALUE: usize = 0;
    pub const X: usize = 0;
    pub const Y: usize = 1;
    /// `LoopEnd` and `LoopExit`.
    pub const LOOP_BEGIN: usize = 0;
    /// `Invoke` and `InvokeWithException`.
    pub const CALL_TARGET: usize = 0;
    /// `Phi`.
    pub const PHI_MERGE: usize = 0;
    /// `FrameState`.
    pub const OUTER: usize = 0;
    /// `ValueProxy`.
    pub const PROXY_LOOP_EXIT: usize = 1;
    /// `ProxyPlaceholder`.
    pub const PROXY_POINT: usize = 1;

    // Input lists
    /// `Merge`/`LoopBegin` forward ends.
    pub const ENDS: usize = 0;
    /// `Phi` values, `FrameState` values.
    pub const VALUES: usize = 0;
    /// `CallTarget` arguments.
    pub const ARGUMENTS: usize = 0;
}

// ── Field layout ────────────────────────────────────────────────────

/// Encoding class of one data field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// Written inline as a signed varint.
    Primitive,
    /// Written as an index into the interned object table.
    Object,
}

/// A data field value, as read from or written to a node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FieldValue {
    Primitive(i64),
    Object(Object),
}

/// Non-primitive values that can appear in data fields or graph metadata.
///
/// Interned by structural equality during encoding.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Object {
    Constant(ConstValue),
    BinaryOp(BinaryOp),
    CompareOp(CompareOp),
    SwitchTable(SwitchTable),
    DeoptReason(DeoptReason),
    Method(MethodRef),
    Type(TypeRef),
    GuardsStage(GuardsStage),
}

// ── Node classes ────────────────────────────────────────────────────

/// Tag of a node.
///
/// | Class | Inputs | Successors |
/// |---|---|---|
/// | `Start` | state_after | next |
/// | `Begin` | | next |
/// | `End` | | |
/// | `Merge`, `LoopBegin` | state_after; list ends | next |
/// | `LoopEnd` | loop_begin | |
/// | `LoopExit` | loop_begin, state_after | next |
/// | `If` | condition | true, false |
/// | `IntegerSwitch` | value | list successors |
/// | `Invoke` | call_target, state_after | next |
/// | `InvokeWithException` | call_target, state_after | next, exception_edge |
/// | `Return` | result | |
/// | `Unwind` | exception | |
/// | `Deoptimize` | | |
/// | `Sink` | value | next |
/// | `Phi` | merge; list values | |
/// | `ValueProxy` | value, loop_exit | |
/// | `FrameState` | outer; list values | |
/// | `CallTarget` | list arguments | |
/// | `ProxyPlaceholder` | value, proxy_point | |
/// | `Constant`, `Parameter` | | |
/// | `Binary`, `Compare` | x, y | |
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeClass {
    Start,
    Begin,
    End,
    Merge,
    LoopBegin,
    LoopEnd,
    LoopExit,
    If,
    IntegerSwitch,
    Invoke,
    InvokeWithException,
    Return,
    Unwind,
    Deoptimize,
    /// Fixed node consuming a value for its side effect.
    Sink,
    Constant,
    Parameter,
    Binary,
    Compare,
    Phi,
    ValueProxy,
    FrameState,
    CallTarget,
    /// Decoder-internal wrapper around a loop-carried value. Never encoded.
    ProxyPlaceholder,
}

impl NodeClass {
    /// Input edge layout.
    pub const fn inputs(self) -> EdgeShape {
        match self {
            NodeClass::Begin
            | NodeClass::End
            | NodeClass::Deoptimize
            | NodeClass::Constant
            | NodeClass::Parameter => EdgeShape::NONE,
            NodeClass::Start
            | NodeClass::LoopEnd
            | NodeClass::If
            | NodeClass::IntegerSwitch
            | NodeClass::Return
            | NodeClass::Unwind
            | NodeClass::Sink => EdgeShape::direct(1),
            NodeClass::LoopExit
            | NodeClass::Invoke
            | NodeClass::InvokeWithException
            | NodeClass::Binary
            | NodeClass::Compare
            | NodeClass::ValueProxy
            | NodeClass::ProxyPlaceholder => EdgeShape::direct(2),
            NodeClass::Merge | NodeClass::LoopBegin | NodeClass::Phi | NodeClass::FrameState => {
                EdgeShape::new(1, 1)
            }
            NodeClass::CallTarget => EdgeShape::new(0, 1),
        }
    }

    /// Successor edge layout.
    pub const fn successors(self) -> EdgeShape {
        match self {
            NodeClass::Start
            | NodeClass::Begin
            | NodeClass::Merge
            | NodeClass::LoopBegin
            | NodeClass::LoopExit
            | NodeClass::Invoke
            | NodeClass::Sink => EdgeShape::direct(1),
            NodeClass::If | NodeClass::InvokeWithException => EdgeShape::direct(2),
            NodeClass::IntegerSwitch => EdgeShape::new(0, 1),
            _ => EdgeShape::NONE,
        }
    }

    /// Data field layout, in field order.
    pub const fn field_kinds(self) -> &'static [FieldKind] {
        match self {
            NodeClass::LoopEnd
            | NodeClass::If
            | NodeClass::Invoke
            | NodeClass::InvokeWithException
            | NodeClass::Parameter
            | NodeClass::FrameState => &[FieldKind::Primitive],
            NodeClass::IntegerSwitch
            | NodeClass::Deoptimize
            | NodeClass::Constant
            | NodeClass::Binary
            | NodeClass::Compare
            | NodeClass::CallTarget => &[FieldKind::Object],
            _ => &[],
        }
    }

    /// Part of the control-flow skeleton.
    pub const fn is_fixed(self) -> bool {
        !matches!(
            self,
            NodeClass::Constant
                | NodeClass::Parameter
                | NodeClass::Binary
                | NodeClass::Compare
                | NodeClass::Phi
                | NodeClass::ValueProxy
                | NodeClass::FrameState
                | NodeClass::CallTarget
                | NodeClass::ProxyPlaceholder
        )
    }

    /// Block entry: the node's `next` starts a straight-line block.
    pub const fn is_begin(self) -> bool {
        matches!(
            self,
            NodeClass::Start
                | NodeClass::Begin
                | NodeClass::Merge
                | NodeClass::LoopBegin
                | NodeClass::LoopExit
        )
    }

    pub const fn is_merge(self) -> bool {
        matches!(self, NodeClass::Merge | NodeClass::LoopBegin)
    }

    /// `End` or `LoopEnd`.
    pub const fn is_end(self) -> bool {
        matches!(self, NodeClass::End | NodeClass::LoopEnd)
    }

    pub const fn is_invoke(self) -> bool {
        matches!(self, NodeClass::Invoke | NodeClass::InvokeWithException)
    }

    /// Fixed node with more than one control successor.
    pub const fn is_control_split(self) -> bool {
        matches!(
            self,
            NodeClass::If | NodeClass::IntegerSwitch | NodeClass::InvokeWithException
        )
    }

    /// Fixed node whose single `next` successor continues the block.
    pub const fn has_next(self) -> bool {
        matches!(
            self,
            NodeClass::Start
                | NodeClass::Begin
                | NodeClass::Merge
                | NodeClass::LoopBegin
                | NodeClass::LoopExit
                | NodeClass::Invoke
                | NodeClass::InvokeWithException
                | NodeClass::Sink
        )
    }

    /// Input slot holding the node's frame state, if it has one.
    pub const fn state_after_slot(self) -> Option<usize> {
        match self {
            NodeClass::Start | NodeClass::Merge | NodeClass::LoopBegin => Some(0),
            NodeClass::LoopExit | NodeClass::Invoke | NodeClass::InvokeWithException => Some(1),
            _ => None,
        }
    }

    /// Pure nodes that may be deduplicated on insertion.
    pub const fn is_value_numberable(self) -> bool {
        matches!(
            self,
            NodeClass::Constant
                | NodeClass::Parameter
                | NodeClass::Binary
                | NodeClass::Compare
                | NodeClass::ProxyPlaceholder
        )
    }
}

// ── Data values ─────────────────────────────────────────────────────

/// Compile-time constant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConstValue {
    Int(i32),
    Long(i64),
    Bool(bool),
    Null,
}

impl ConstValue {
    /// The value as a 32-bit integer, if it is one.
    pub fn as_int(self) -> Option<i32> {
        match self {
            ConstValue::Int(v) => Some(v),
            _ => None,
        }
    }
}

/// Arithmetic operator of a [`NodeKind::Binary`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
}

impl BinaryOp {
    /// Fold two integer constants. `None` if the operands aren't both ints.
    pub fn fold(self, x: ConstValue, y: ConstValue) -> Option<ConstValue> {
        let (ConstValue::Int(x), ConstValue::Int(y)) = (x, y) else {
            return None;
        };
        let value = match self {
            BinaryOp::Add => x.wrapping_add(y),
            BinaryOp::Sub => x.wrapping_sub(y),
            BinaryOp::Mul => x.wrapping_mul(y),
            BinaryOp::And => x & y,
            BinaryOp::Or => x | y,
            BinaryOp::Xor => x ^ y,
        };
        Some(ConstValue::Int(value))
    }
}

/// Condition of a [`NodeKind::Compare`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
}

impl CompareOp {
    /// Fold two integer constants into a boolean constant.
    pub fn fold(self, x: ConstValue, y: ConstValue) -> Option<ConstValue> {
        let (ConstValue::Int(x), ConstValue::Int(y)) = (x, y) else {
            return None;
        };
        let value = match self {
            CompareOp::Eq => x == y,
            CompareOp::Ne => x != y,
            CompareOp::Lt => x < y,
            CompareOp::Le => x <= y,
        };
        Some(ConstValue::Bool(value))
    }
}

/// Branch probability, stored as `f64` bits so kinds stay `Eq + Hash`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Probability(u64);

impl Probability {
    pub fn new(value: f64) -> Self {
        Probability(value.to_bits())
    }

    pub fn from_bits(bits: u64) -> Self {
        Probability(bits)
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn value(self) -> f64 {
        f64::from_bits(self.0)
    }
}

/// Keys and targets of an [`NodeKind::IntegerSwitch`].
///
/// `key_successors` and `probabilities` have one entry per key plus a final
/// entry for the default case.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SwitchTable {
    pub keys: Vec<i32>,
    pub key_successors: Vec<u32>,
    pub probabilities: Vec<Probability>,
}

impl SwitchTable {
    /// Index of the default successor.
    pub fn default_successor(&self) -> Option<u32> {
        self.key_successors.last().copied()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeoptReason {
    UnreachedCode,
    TransferToInterpreter,
    RuntimeConstraint,
}

/// How guards are represented in a graph. Opaque to the codec.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum GuardsStage {
    #[default]
    FloatingGuards,
    FixedDeopts,
    AfterFsa,
}

/// Named type, used as the receiver context of invokes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeRef(Arc<str>);

impl TypeRef {
    pub fn new(name: &str) -> Self {
        TypeRef(Arc::from(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// Method called by a [`NodeKind::CallTarget`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub holder: TypeRef,
    pub name: Arc<str>,
}

impl MethodRef {
    pub fn new(holder: &str, name: &str) -> Self {
        MethodRef {
            holder: TypeRef::new(holder),
            name: Arc::from(name),
        }
    }
}

// ── Node kinds ──────────────────────────────────────────────────────

/// Node tag plus data fields.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Start,
    Begin,
    End,
    Merge,
    LoopBegin,
    /// `end_index` is the position among the loop begin's loop ends.
    LoopEnd {
        end_index: u32,
    },
    LoopExit,
    If {
        true_probability: Probability,
    },
    IntegerSwitch(SwitchTable),
    Invoke {
        bci: i32,
    },
    InvokeWithException {
        bci: i32,
    },
    Return,
    Unwind,
    Deoptimize(DeoptReason),
    Sink,
    Constant(ConstValue),
    Parameter {
        index: u32,
    },
    Binary(BinaryOp),
    Compare(CompareOp),
    Phi,
    ValueProxy,
    FrameState {
        bci: i32,
    },
    CallTarget(MethodRef),
    ProxyPlaceholder,
}

impl NodeKind {
    pub fn class(&self) -> NodeClass {
        match self {
            NodeKind::Start => NodeClass::Start,
            NodeKind::Begin => NodeClass::Begin,
            NodeKind::End => NodeClass::End,
            NodeKind::Merge => NodeClass::Merge,
            NodeKind::LoopBegin => NodeClass::LoopBegin,
            NodeKind::LoopEnd { .. } => NodeClass::LoopEnd,
            NodeKind::LoopExit => NodeClass::LoopExit,
            NodeKind::If { .. } => NodeClass::If,
            NodeKind::IntegerSwitch(_) => NodeClass::IntegerSwitch,
            NodeKind::Invoke { .. } => NodeClass::Invoke,
            NodeKind::InvokeWithException { .. } => NodeClass::InvokeWithException,
            NodeKind::Return => NodeClass::Return,
            NodeKind::Unwind => NodeClass::Unwind,
            NodeKind::Deoptimize(_) => NodeClass::Deoptimize,
            NodeKind::Sink => NodeClass::Sink,
            NodeKind::Constant(_) => NodeClass::Constant,
            NodeKind::Parameter { .. } => NodeClass::Parameter,
            NodeKind::Binary(_) => NodeClass::Binary,
            NodeKind::Compare(_) => NodeClass::Compare,
            NodeKind::Phi => NodeClass::Phi,
            NodeKind::ValueProxy => NodeClass::ValueProxy,
            NodeKind::FrameState { .. } => NodeClass::FrameState,
            NodeKind::CallTarget(_) => NodeClass::CallTarget,
            NodeKind::ProxyPlaceholder => NodeClass::ProxyPlaceholder,
        }
    }

    /// Kind of `class` with zeroed data, used for uninitialized stubs.
    pub fn empty(class: NodeClass) -> NodeKind {
        match class {
            NodeClass::Start => NodeKind::Start,
            NodeClass::Begin => NodeKind::Begin,
            NodeClass::End => NodeKind::End,
            NodeClass::Merge => NodeKind::Merge,
            NodeClass::LoopBegin => NodeKind::LoopBegin,
            NodeClass::LoopEnd => NodeKind::LoopEnd { end_index: 0 },
            NodeClass::LoopExit => NodeKind::LoopExit,
            NodeClass::If => NodeKind::If {
                true_probability: Probability::new(0.5),
            },
            NodeClass::IntegerSwitch => NodeKind::IntegerSwitch(SwitchTable {
                keys: Vec::new(),
                key_successors: Vec::new(),
                probabilities: Vec::new(),
            }),
            NodeClass::Invoke => NodeKind::Invoke { bci: 0 },
            NodeClass::InvokeWithException => NodeKind::InvokeWithException { bci: 0 },
            NodeClass::Return => NodeKind::Return,
            NodeClass::Unwind => NodeKind::Unwind,
            NodeClass::Deoptimize => NodeKind::Deoptimize(DeoptReason::UnreachedCode),
            NodeClass::Sink => NodeKind::Sink,
            NodeClass::Constant => NodeKind::Constant(ConstValue::Null),
            NodeClass::Parameter => NodeKind::Parameter { index: 0 },
            NodeClass::Binary => NodeKind::Binary(BinaryOp::Add),
            NodeClass::Compare => NodeKind::Compare(CompareOp::Eq),
            NodeClass::Phi => NodeKind::Phi,
            NodeClass::ValueProxy => NodeKind::ValueProxy,
            NodeClass::FrameState => NodeKind::FrameState { bci: 0 },
            NodeClass::CallTarget => NodeKind::CallTarget(MethodRef::new("", "")),
            NodeClass::ProxyPlaceholder => NodeKind::ProxyPlaceholder,
        }
    }

    /// Data fields in [`NodeClass::field_kinds`] order.
    #[expect(
        clippy::cast_possible_wrap,
        reason = "probability bits round-trip through i64 unchanged"
    )]
    pub fn fields(&self) -> Vec<FieldValue> {
        match self {
            NodeKind::LoopEnd { end_index } => vec![FieldValue::Primitive(i64::from(*end_index))],
            NodeKind::If { true_probability } => {
                vec![FieldValue::Primitive(true_probability.bits() as i64)]
            }
            NodeKind::Invoke { bci }
            | NodeKind::InvokeWithException { bci }
            | NodeKind::FrameState { bci } => vec![FieldValue::Primitive(i64::from(*bci))],
            NodeKind::Parameter { index } => vec![FieldValue::Primitive(i64::from(*index))],
            NodeKind::IntegerSwitch(table) => {
                vec![FieldValue::Object(Object::SwitchTable(table.clone()))]
            }
            NodeKind::Deoptimize(reason) => vec![FieldValue::Object(Object::DeoptReason(*reason))],
            NodeKind::Constant(value) => vec![FieldValue::Object(Object::Constant(*value))],
            NodeKind::Binary(op) => vec![FieldValue::Object(Object::BinaryOp(*op))],
            NodeKind::Compare(op) => vec![FieldValue::Object(Object::CompareOp(*op))],
            NodeKind::CallTarget(method) => vec![FieldValue::Object(Object::Method(method.clone()))],
            _ => Vec::new(),
        }
    }

    /// Rebuild a kind of `class` from its data fields.
    ///
    /// Returns `None` if the fields don't match the class layout.
    #[expect(
        clippy::cast_sign_loss,
        reason = "probability bits round-trip through i64 unchanged"
    )]
    pub fn from_fields(class: NodeClass, fields: &[FieldValue]) -> Option<NodeKind> {
        let kind = match (class, fields) {
            (NodeClass::LoopEnd, [FieldValue::Primitive(v)]) => NodeKind::LoopEnd {
                end_index: u32::try_from(*v).ok()?,
            },
            (NodeClass::If, [FieldValue::Primitive(v)]) => NodeKind::If {
                true_probability: Probability::from_bits(*v as u64),
            },
            (NodeClass::Invoke, [FieldValue::Primitive(v)]) => NodeKind::Invoke {
                bci: i32::try_from(*v).ok()?,
            },
            (NodeClass::InvokeWithException, [FieldValue::Primitive(v)]) => {
                NodeKind::InvokeWithException {
                    bci: i32::try_from(*v).ok()?,
                }
            }
            (NodeClass::FrameState, [FieldValue::Primitive(v)]) => NodeKind::FrameState {
                bci: i32::try_from(*v).ok()?,
            },
            (NodeClass::Parameter, [FieldValue::Primitive(v)]) => NodeKind::Parameter {
                index: u32::try_from(*v).ok()?,
            },
            (NodeClass::IntegerSwitch, [FieldValue::Object(Object::SwitchTable(t))]) => {
                NodeKind::IntegerSwitch(t.clone())
            }
            (NodeClass::Deoptimize, [FieldValue::Object(Object::DeoptReason(r))]) => {
                NodeKind::Deoptimize(*r)
            }
            (NodeClass::Constant, [FieldValue::Object(Object::Constant(c))]) => {
                NodeKind::Constant(*c)
            }
            (NodeClass::Binary, [FieldValue::Object(Object::BinaryOp(op))]) => {
                NodeKind::Binary(*op)
            }
            (NodeClass::Compare, [FieldValue::Object(Object::CompareOp(op))]) => {
                NodeKind::Compare(*op)
            }
            (NodeClass::CallTarget, [FieldValue::Object(Object::Method(m))]) => {
                NodeKind::CallTarget(m.clone())
            }
            (class, []) if class.field_kinds().is_empty() => NodeKind::empty(class),
            _ => return None,
        };
        Some(kind)
    }
}
