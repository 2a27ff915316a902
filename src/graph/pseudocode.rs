//! Per-body flow graph container ("pseudocode")
//!
//! One pseudocode exists per function, lambda, or initializer body. It owns
//! the emission-order instruction list (including instructions later proven
//! dead), the labels created within it, the enter/exit/error/sink landmarks,
//! and the lookup maps consumers use after post-processing.

use indexmap::IndexMap;

use crate::ids::{ElementId, InstructionId, LabelId, PseudocodeId, ValueId};

/// What kind of subroutine a pseudocode was built for
///
/// Lambdas share the enclosing function's return target (a `return` inside a
/// lambda exits the enclosing named function), so the builder must be told
/// which kind it is entering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubroutineKind {
    Function,
    Lambda,
}

/// Labels allocated for one loop, recorded for `break`/`continue` lookup
/// and for later analyses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopInfo {
    /// The source loop element
    pub element: ElementId,

    /// Bound immediately when the loop is entered
    pub entry: LabelId,

    /// Bound when the loop is exited; `break` target
    pub exit: LabelId,

    /// Entry of the loop body
    pub body_entry: LabelId,

    /// Entry of the condition check; `continue` target for condition-first loops
    pub condition_entry: LabelId,
}

/// The per-body instruction graph
#[derive(Debug, Clone)]
pub struct Pseudocode {
    /// Unique identifier, indexing the unit-wide pseudocode arena
    pub id: PseudocodeId,

    /// The subroutine element this graph was built for
    pub element: ElementId,

    /// Function or lambda
    pub kind: SubroutineKind,

    /// All instructions in emission order, including dead ones
    pub(crate) emission: Vec<InstructionId>,

    /// Labels created within this pseudocode, in creation order
    pub(crate) labels: Vec<LabelId>,

    /// Landmark instructions, set as they are emitted
    pub(crate) enter: InstructionId,
    pub(crate) exit: InstructionId,
    pub(crate) error_exit: InstructionId,
    pub(crate) sink: InstructionId,

    /// Enclosing pseudocode, set during post-processing of the parent
    pub(crate) parent: Option<PseudocodeId>,

    /// First instruction emitted for each source element
    pub(crate) representative: IndexMap<ElementId, InstructionId>,

    /// Value bound to each source element via `bind_value`
    pub(crate) element_values: IndexMap<ElementId, ValueId>,

    /// Instructions consuming each value, in emission order
    pub(crate) value_usages: IndexMap<ValueId, Vec<InstructionId>>,

    /// Loop records keyed by loop element
    pub(crate) loop_infos: IndexMap<ElementId, LoopInfo>,

    /// Reachable instructions in emission order, filled by post-processing
    pub(crate) reachable: Vec<InstructionId>,

    pub(crate) post_processed: bool,
}

impl Pseudocode {
    pub(crate) fn new(id: PseudocodeId, element: ElementId, kind: SubroutineKind) -> Self {
        Self {
            id,
            element,
            kind,
            emission: Vec::new(),
            labels: Vec::new(),
            enter: InstructionId::invalid(),
            exit: InstructionId::invalid(),
            error_exit: InstructionId::invalid(),
            sink: InstructionId::invalid(),
            parent: None,
            representative: IndexMap::new(),
            element_values: IndexMap::new(),
            value_usages: IndexMap::new(),
            loop_infos: IndexMap::new(),
            reachable: Vec::new(),
            post_processed: false,
        }
    }

    /// The unique `SubroutineEnter` instruction
    pub fn enter_instruction(&self) -> InstructionId {
        self.enter
    }

    /// The normal `SubroutineExit` instruction
    pub fn exit_instruction(&self) -> InstructionId {
        self.exit
    }

    /// The error `SubroutineExit` instruction
    pub fn error_instruction(&self) -> InstructionId {
        self.error_exit
    }

    /// The unique `SubroutineSink` instruction
    pub fn sink_instruction(&self) -> InstructionId {
        self.sink
    }

    /// Enclosing pseudocode for nested local-function graphs
    pub fn parent(&self) -> Option<PseudocodeId> {
        self.parent
    }

    /// Whether `post_process` has completed for this graph
    pub fn is_post_processed(&self) -> bool {
        self.post_processed
    }

    /// All instructions in emission order, including dead ones
    pub fn instructions_including_dead(&self) -> &[InstructionId] {
        &self.emission
    }

    /// Reachable instructions in emission order.
    ///
    /// Only available after post-processing; calling this earlier is a
    /// construction-protocol violation.
    pub fn reachable_instructions(&self) -> &[InstructionId] {
        if !self.post_processed {
            panic!("{} queried for reachable instructions before post-processing", self.id);
        }
        &self.reachable
    }

    /// Reachable instructions in reverse emission order
    pub fn reversed_reachable_instructions(
        &self,
    ) -> impl Iterator<Item = InstructionId> + '_ {
        self.reachable_instructions().iter().rev().copied()
    }

    /// Labels created within this pseudocode, in creation order
    pub fn labels(&self) -> &[LabelId] {
        &self.labels
    }

    /// The first instruction emitted for the given source element
    pub fn representative_instruction(&self, element: ElementId) -> Option<InstructionId> {
        self.representative.get(&element).copied()
    }

    /// The value bound to the given element, if any
    pub fn element_value(&self, element: ElementId) -> Option<ValueId> {
        self.element_values.get(&element).copied()
    }

    /// Instructions consuming the given value, in emission order
    pub fn value_usages(&self, value: ValueId) -> &[InstructionId] {
        self.value_usages
            .get(&value)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Source elements the given value is bound to, in binding order
    pub fn value_elements(&self, value: ValueId) -> Vec<ElementId> {
        self.element_values
            .iter()
            .filter(|(_, &v)| v == value)
            .map(|(&element, _)| element)
            .collect()
    }

    /// The loop record for the given loop element, if one was registered
    pub fn loop_info(&self, element: ElementId) -> Option<&LoopInfo> {
        self.loop_infos.get(&element)
    }

    /// All loop records in registration order
    pub fn loop_infos(&self) -> impl Iterator<Item = &LoopInfo> {
        self.loop_infos.values()
    }
}
