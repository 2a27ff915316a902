//! Instruction model for flow graphs
//!
//! Instructions are the graph nodes. Each instruction belongs to exactly one
//! pseudocode, references an opaque source element, and carries a
//! kind-specific payload owning the kind's outgoing-edge slots. Edge slots
//! start unresolved and are wired by the post-processing pass; consumers
//! dispatch by exhaustive `match` on [`InstructionKind`].

use indexmap::IndexSet;
use smallvec::SmallVec;

use crate::ids::{ElementId, InstructionId, LabelId, PseudocodeId, ValueId};

/// A single node of a flow graph
#[derive(Debug, Clone)]
pub struct Instruction {
    /// Unique identifier, indexing the unit-wide instruction arena
    pub id: InstructionId,

    /// Source element this instruction was emitted for
    pub element: ElementId,

    /// Kind-specific payload and outgoing-edge slots
    pub kind: InstructionKind,

    /// Pseudocode this instruction belongs to, fixed at creation
    pub(crate) owner: PseudocodeId,

    /// Instructions that target this one (reverse edges, insertion-ordered)
    pub(crate) incoming: IndexSet<InstructionId>,

    /// Set during post-processing for instructions outside the reachable set
    pub(crate) dead: bool,
}

/// The closed set of instruction kinds
///
/// Slots named `next` hold the sequential successor (the following
/// instruction in emission order); label targets are resolved into the
/// adjacent `Option`/list slots by the post-processor.
#[derive(Debug, Clone)]
pub enum InstructionKind {
    /// Read of an abstract value (variable read, constant load, receiver)
    ReadValue {
        output: ValueId,
        next: Option<InstructionId>,
    },

    /// Write of an abstract value into a target element
    WriteValue {
        input: ValueId,
        next: Option<InstructionId>,
    },

    /// Declaration of a variable or parameter
    VariableDeclaration {
        parameter: bool,
        next: Option<InstructionId>,
    },

    /// Load of the unit value (result of expressions with no value)
    LoadUnitValue { next: Option<InstructionId> },

    /// Syntax the driver could not lower; a valid, reachable node
    UnsupportedElement { next: Option<InstructionId> },

    /// Position marker with no runtime effect
    Mark { next: Option<InstructionId> },

    /// Call consuming zero or more values, optionally producing one
    Call {
        inputs: SmallVec<[ValueId; 4]>,
        output: Option<ValueId>,
        next: Option<InstructionId>,
    },

    /// Declaration of a local function or lambda owning a nested pseudocode
    ///
    /// Straight-line in the outer graph; the additional `sink` slot is a
    /// virtual edge to the owning graph's sink, so the declaration never
    /// terminates the outer flow.
    LocalFunctionDeclaration {
        body: PseudocodeId,
        next: Option<InstructionId>,
        sink: Option<InstructionId>,
    },

    /// Unconditional jump to a label
    UnconditionalJump {
        target: LabelId,
        resolved: Option<InstructionId>,
    },

    /// Conditional two-way jump
    ///
    /// `on_true` fixes which slot receives the label-resolved edge: for
    /// `on_true = true` the true-slot takes the label and the false-slot the
    /// sequential successor, and vice versa.
    ConditionalJump {
        condition: ValueId,
        on_true: bool,
        target: LabelId,
        next_on_true: Option<InstructionId>,
        next_on_false: Option<InstructionId>,
    },

    /// Jump with zero or more possible label targets plus the sequential
    /// successor (models merge points that are not mutually exclusive)
    NondeterministicJump {
        targets: SmallVec<[LabelId; 2]>,
        resolved: SmallVec<[InstructionId; 2]>,
        next: Option<InstructionId>,
    },

    /// Return carrying a value, jumping to a subroutine exit label
    ReturnValue {
        input: ValueId,
        target: LabelId,
        resolved: Option<InstructionId>,
    },

    /// Return without a value, jumping to a subroutine exit label
    ReturnNoValue {
        target: LabelId,
        resolved: Option<InstructionId>,
    },

    /// Throw of an exception value, jumping to the error exit label
    ThrowException {
        input: ValueId,
        target: LabelId,
        resolved: Option<InstructionId>,
    },

    /// Unique first instruction of every pseudocode
    SubroutineEnter { next: Option<InstructionId> },

    /// Normal or error exit; its single edge leads to the sink
    SubroutineExit {
        error: bool,
        sink: Option<InstructionId>,
    },

    /// Unique terminal instruction with no outgoing edges
    SubroutineSink,
}

impl Instruction {
    pub(crate) fn new(
        id: InstructionId,
        owner: PseudocodeId,
        element: ElementId,
        kind: InstructionKind,
    ) -> Self {
        Self {
            id,
            element,
            kind,
            owner,
            incoming: IndexSet::new(),
            dead: false,
        }
    }

    /// Pseudocode this instruction belongs to
    pub fn owner(&self) -> PseudocodeId {
        self.owner
    }

    /// Instructions targeting this one, in insertion order
    pub fn incoming(&self) -> &IndexSet<InstructionId> {
        &self.incoming
    }

    /// Whether post-processing proved this instruction unreachable
    pub fn is_dead(&self) -> bool {
        self.dead
    }

    /// Resolved outgoing edges in slot order
    pub fn successors(&self) -> SmallVec<[InstructionId; 2]> {
        self.kind.successors()
    }
}

impl InstructionKind {
    /// Stable name of this kind, used in dumps and log output
    pub fn kind_name(&self) -> &'static str {
        match self {
            InstructionKind::ReadValue { .. } => "ReadValue",
            InstructionKind::WriteValue { .. } => "WriteValue",
            InstructionKind::VariableDeclaration { parameter: true, .. } => "ParameterDeclaration",
            InstructionKind::VariableDeclaration { parameter: false, .. } => "VariableDeclaration",
            InstructionKind::LoadUnitValue { .. } => "LoadUnitValue",
            InstructionKind::UnsupportedElement { .. } => "UnsupportedElement",
            InstructionKind::Mark { .. } => "Mark",
            InstructionKind::Call { .. } => "Call",
            InstructionKind::LocalFunctionDeclaration { .. } => "LocalFunctionDeclaration",
            InstructionKind::UnconditionalJump { .. } => "UnconditionalJump",
            InstructionKind::ConditionalJump { .. } => "ConditionalJump",
            InstructionKind::NondeterministicJump { .. } => "NondeterministicJump",
            InstructionKind::ReturnValue { .. } => "ReturnValue",
            InstructionKind::ReturnNoValue { .. } => "ReturnNoValue",
            InstructionKind::ThrowException { .. } => "ThrowException",
            InstructionKind::SubroutineEnter { .. } => "SubroutineEnter",
            InstructionKind::SubroutineExit { error: false, .. } => "SubroutineExit",
            InstructionKind::SubroutineExit { error: true, .. } => "SubroutineErrorExit",
            InstructionKind::SubroutineSink => "SubroutineSink",
        }
    }

    /// Resolved outgoing edges in slot order
    pub fn successors(&self) -> SmallVec<[InstructionId; 2]> {
        let mut result = SmallVec::new();
        match self {
            InstructionKind::ReadValue { next, .. }
            | InstructionKind::WriteValue { next, .. }
            | InstructionKind::VariableDeclaration { next, .. }
            | InstructionKind::LoadUnitValue { next }
            | InstructionKind::UnsupportedElement { next }
            | InstructionKind::Mark { next }
            | InstructionKind::Call { next, .. }
            | InstructionKind::SubroutineEnter { next } => {
                result.extend(*next);
            }
            InstructionKind::LocalFunctionDeclaration { next, sink, .. } => {
                result.extend(*next);
                result.extend(*sink);
            }
            InstructionKind::UnconditionalJump { resolved, .. }
            | InstructionKind::ReturnValue { resolved, .. }
            | InstructionKind::ReturnNoValue { resolved, .. }
            | InstructionKind::ThrowException { resolved, .. } => {
                result.extend(*resolved);
            }
            InstructionKind::ConditionalJump {
                next_on_true,
                next_on_false,
                ..
            } => {
                result.extend(*next_on_true);
                result.extend(*next_on_false);
            }
            InstructionKind::NondeterministicJump { resolved, next, .. } => {
                result.extend(resolved.iter().copied());
                result.extend(*next);
            }
            InstructionKind::SubroutineExit { sink, .. } => {
                result.extend(*sink);
            }
            InstructionKind::SubroutineSink => {}
        }
        result
    }

    /// Label targets this instruction jumps to, before resolution
    pub fn jump_targets(&self) -> SmallVec<[LabelId; 2]> {
        let mut result = SmallVec::new();
        match self {
            InstructionKind::UnconditionalJump { target, .. }
            | InstructionKind::ConditionalJump { target, .. }
            | InstructionKind::ReturnValue { target, .. }
            | InstructionKind::ReturnNoValue { target, .. }
            | InstructionKind::ThrowException { target, .. } => {
                result.push(*target);
            }
            InstructionKind::NondeterministicJump { targets, .. } => {
                result.extend(targets.iter().copied());
            }
            _ => {}
        }
        result
    }

    /// Values this instruction consumes
    pub fn input_values(&self) -> SmallVec<[ValueId; 2]> {
        let mut result = SmallVec::new();
        match self {
            InstructionKind::WriteValue { input, .. }
            | InstructionKind::ReturnValue { input, .. }
            | InstructionKind::ThrowException { input, .. } => {
                result.push(*input);
            }
            InstructionKind::ConditionalJump { condition, .. } => {
                result.push(*condition);
            }
            InstructionKind::Call { inputs, .. } => {
                result.extend(inputs.iter().copied());
            }
            _ => {}
        }
        result
    }

    /// Value this instruction produces, if any
    pub fn output_value(&self) -> Option<ValueId> {
        match self {
            InstructionKind::ReadValue { output, .. } => Some(*output),
            InstructionKind::Call { output, .. } => *output,
            _ => None,
        }
    }

    /// Whether any outgoing-edge slot is still unresolved
    pub(crate) fn has_unresolved_edges(&self) -> bool {
        match self {
            InstructionKind::ReadValue { next, .. }
            | InstructionKind::WriteValue { next, .. }
            | InstructionKind::VariableDeclaration { next, .. }
            | InstructionKind::LoadUnitValue { next }
            | InstructionKind::UnsupportedElement { next }
            | InstructionKind::Mark { next }
            | InstructionKind::Call { next, .. }
            | InstructionKind::SubroutineEnter { next } => next.is_none(),
            InstructionKind::LocalFunctionDeclaration { next, sink, .. } => {
                next.is_none() || sink.is_none()
            }
            InstructionKind::UnconditionalJump { resolved, .. }
            | InstructionKind::ReturnValue { resolved, .. }
            | InstructionKind::ReturnNoValue { resolved, .. }
            | InstructionKind::ThrowException { resolved, .. } => resolved.is_none(),
            InstructionKind::ConditionalJump {
                next_on_true,
                next_on_false,
                ..
            } => next_on_true.is_none() || next_on_false.is_none(),
            InstructionKind::NondeterministicJump { targets, resolved, next } => {
                resolved.len() != targets.len() || next.is_none()
            }
            InstructionKind::SubroutineExit { sink, .. } => sink.is_none(),
            InstructionKind::SubroutineSink => false,
        }
    }
}
