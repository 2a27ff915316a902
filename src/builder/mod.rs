//! Flow Graph Builder
//!
//! The construction-time state machine a syntax-walking driver uses to emit
//! instructions. The driver walks the source tree top to bottom and reports
//! what it sees; the builder tracks the nesting the flat instruction list
//! cannot express:
//!
//! - a **subroutine stack** of workers, one per function or lambda body
//!   being built, where lambdas inherit the enclosing worker's return target
//!   (a `return` inside a lambda exits the enclosing named function),
//! - a **block stack** of breakable scopes (each subroutine itself, loops)
//!   and try/finally regions, shared across workers so a jump out of a
//!   lambda sees the enclosing function's blocks too, and
//! - **finally interception**: any jump whose target lies outside the
//!   current try body first re-emits the enclosing finally blocks'
//!   instructions, innermost to outermost, so early exits carry the finally
//!   code in static instruction order.
//!
//! All stack-underflow and mismatched enter/exit conditions are driver bugs
//! and abort construction immediately; they are never reported as source
//! diagnostics.

use fxhash::FxHashMap;
use log::debug;
use smallvec::SmallVec;

use crate::graph::instruction::InstructionKind;
use crate::graph::pseudocode::{LoopInfo, SubroutineKind};
use crate::graph::unit::FlowUnit;
use crate::graph::BuilderOptions;
use crate::ids::{ElementId, LabelId, PseudocodeId, ValueId};

pub use self::trace::{ConstructionTrace, NullTrace};

pub mod trace;

#[cfg(test)]
pub (crate) mod builder_test;

type FinallyTrigger = Box<dyn FnMut(&mut ControlFlowBuilder)>;

/// One entry of the shared block stack
enum BlockEntry {
    /// The subroutine itself; seeded when its worker is pushed so returns
    /// and throws always find a boundary
    Subroutine {
        element: ElementId,
        entry: LabelId,
        exit: LabelId,
    },

    /// A loop with its four referable labels
    Loop(LoopInfo),

    /// A try/finally region. The trigger re-emits the finally block's
    /// instructions; it is taken out while running so a jump inside the
    /// finally block cannot splice the block into itself.
    TryFinally { trigger: Option<FinallyTrigger> },
}

impl BlockEntry {
    /// The source element a `break`/`continue`/`return` names to reach this
    /// block, if it is a breakable one.
    fn element(&self) -> Option<ElementId> {
        match self {
            BlockEntry::Subroutine { element, .. } => Some(*element),
            BlockEntry::Loop(info) => Some(info.element),
            BlockEntry::TryFinally { .. } => None,
        }
    }

    /// Whether a jump to `target` may legally name this block as its
    /// destination scope.
    fn is_referable(&self, target: LabelId) -> bool {
        match self {
            BlockEntry::Subroutine { entry, exit, .. } => *entry == target || *exit == target,
            BlockEntry::Loop(info) => {
                info.entry == target
                    || info.exit == target
                    || info.body_entry == target
                    || info.condition_entry == target
            }
            BlockEntry::TryFinally { .. } => false,
        }
    }
}

/// Per-subroutine construction state
struct Worker {
    pseudocode: PseudocodeId,
    element: ElementId,

    /// Subroutine a `return` inside this body exits; the enclosing named
    /// function for lambdas, the subroutine itself otherwise
    return_subroutine: ElementId,

    error_label: LabelId,
    sink_label: LabelId,

    /// Index of this worker's own subroutine block in the shared block
    /// stack; everything above it belongs to this body
    block_floor: usize,
}

/// The construction-time state machine driving a [`FlowUnit`]
///
/// One builder builds all graphs of one compilation unit. Calls must arrive
/// in a single well-nested order matching a depth-first syntax walk; the
/// builder is not reentrant across units.
pub struct ControlFlowBuilder {
    unit: FlowUnit,
    workers: Vec<Worker>,

    /// Breakable scopes and try/finally regions of every open worker, in
    /// nesting order. One stack for the whole unit: a non-local return from
    /// a lambda walks past the lambda's own blocks into the enclosing
    /// function's, so its finally regions splice too.
    blocks: Vec<BlockEntry>,

    /// Element-keyed lookup into `blocks` for break/continue targets;
    /// entries mirror the live breakable blocks exactly
    element_to_block: FxHashMap<ElementId, usize>,

    /// Top-level pseudocodes completed so far, post-processed by `finish`
    roots: Vec<PseudocodeId>,

    trace: Box<dyn ConstructionTrace>,
}

impl ControlFlowBuilder {
    pub fn new(options: BuilderOptions) -> Self {
        Self::with_trace(options, Box::new(NullTrace))
    }

    /// Create a builder that reports construction events to `trace`.
    pub fn with_trace(options: BuilderOptions, trace: Box<dyn ConstructionTrace>) -> Self {
        Self {
            unit: FlowUnit::new(options),
            workers: Vec::new(),
            blocks: Vec::new(),
            element_to_block: FxHashMap::default(),
            roots: Vec::new(),
            trace,
        }
    }

    /// The unit under construction
    pub fn unit(&self) -> &FlowUnit {
        &self.unit
    }

    fn current_worker(&self) -> &Worker {
        match self.workers.last() {
            Some(worker) => worker,
            None => panic!("no active subroutine"),
        }
    }

    fn push_block(&mut self, entry: BlockEntry) {
        if let Some(element) = entry.element() {
            self.element_to_block.insert(element, self.blocks.len());
        }
        self.blocks.push(entry);
    }

    fn pop_block(&mut self) -> Option<BlockEntry> {
        let entry = self.blocks.pop();
        if let Some(element) = entry.as_ref().and_then(BlockEntry::element) {
            self.element_to_block.remove(&element);
        }
        entry
    }

    fn lookup_block(&self, element: ElementId) -> Option<&BlockEntry> {
        self.element_to_block.get(&element).map(|&index| &self.blocks[index])
    }

    /// Pseudocode of the innermost subroutine being built
    pub fn current_pseudocode(&self) -> PseudocodeId {
        self.current_worker().pseudocode
    }

    /// Element of the innermost subroutine being built
    pub fn current_subroutine(&self) -> ElementId {
        self.current_worker().element
    }

    /// Element whose exit a plain `return` targets from the current body
    pub fn return_subroutine(&self) -> ElementId {
        self.current_worker().return_subroutine
    }

    // ------------------------------------------------------------------
    // Subroutine stack

    /// Push a fresh pseudocode for `element` and emit its `SubroutineEnter`.
    ///
    /// The entry label is bound immediately. Lambdas inherit the enclosing
    /// worker's return target so non-local returns resolve to the enclosing
    /// named function's exit.
    pub fn enter_subroutine(&mut self, element: ElementId, kind: SubroutineKind) -> PseudocodeId {
        let pseudocode = self.unit.add_pseudocode(element, kind);
        let entry_label = self.unit.add_label(pseudocode, Some("subroutine entry"));
        let exit_label = self.unit.add_label(pseudocode, Some("subroutine exit"));
        let error_label = self.unit.add_label(pseudocode, Some("error exit"));
        let sink_label = self.unit.add_label(pseudocode, Some("sink"));

        let return_subroutine = match kind {
            SubroutineKind::Lambda => self
                .workers
                .last()
                .map(|worker| worker.return_subroutine)
                .unwrap_or(element),
            SubroutineKind::Function => element,
        };

        self.unit.bind_label(entry_label);
        let enter = self.unit.add_instruction(
            pseudocode,
            element,
            InstructionKind::SubroutineEnter { next: None },
        );
        self.unit.pseudocode_mut(pseudocode).enter = enter;

        let block_floor = self.blocks.len();
        self.push_block(BlockEntry::Subroutine {
            element,
            entry: entry_label,
            exit: exit_label,
        });
        self.workers.push(Worker {
            pseudocode,
            element,
            return_subroutine,
            error_label,
            sink_label,
            block_floor,
        });
        debug!("entered {:?} {} as {}", kind, element, pseudocode);
        pseudocode
    }

    /// Finish the innermost subroutine: bind the exit, error, and sink
    /// labels, emit both exits and the sink, pop the worker, and declare the
    /// completed graph in the parent (if any) as a
    /// `LocalFunctionDeclaration`.
    pub fn exit_subroutine(&mut self, element: ElementId) -> PseudocodeId {
        {
            let worker = self.current_worker();
            assert_eq!(
                worker.element, element,
                "exit_subroutine({}) does not match current subroutine {}",
                element, worker.element
            );
            assert!(
                self.blocks.len() == worker.block_floor + 1,
                "{} exited with {} unclosed blocks",
                element,
                self.blocks.len() - worker.block_floor - 1
            );
        }
        let worker = match self.workers.pop() {
            Some(worker) => worker,
            None => panic!("exit_subroutine with no active subroutine"),
        };
        let pseudocode = worker.pseudocode;
        let exit_label = match self.pop_block() {
            Some(BlockEntry::Subroutine { exit, .. }) => exit,
            _ => panic!("{} lost its subroutine block", element),
        };

        self.unit.bind_label(exit_label);
        let exit = self.unit.add_instruction(
            pseudocode,
            element,
            InstructionKind::SubroutineExit { error: false, sink: None },
        );
        self.unit.bind_label(worker.error_label);
        let error_exit = self.unit.add_instruction(
            pseudocode,
            element,
            InstructionKind::SubroutineExit { error: true, sink: None },
        );
        self.unit.bind_label(worker.sink_label);
        let sink = self.unit.add_instruction(pseudocode, element, InstructionKind::SubroutineSink);
        {
            let data = self.unit.pseudocode_mut(pseudocode);
            data.exit = exit;
            data.error_exit = error_exit;
            data.sink = sink;
        }

        if let Some(parent) = self.workers.last() {
            let parent_pseudocode = parent.pseudocode;
            self.unit.add_instruction(
                parent_pseudocode,
                element,
                InstructionKind::LocalFunctionDeclaration {
                    body: pseudocode,
                    next: None,
                    sink: None,
                },
            );
        } else {
            self.roots.push(pseudocode);
        }
        self.trace.record_pseudocode(element, pseudocode);
        debug!("exited {} ({} instructions)", pseudocode, self.unit.pseudocode(pseudocode).emission.len());
        pseudocode
    }

    // ------------------------------------------------------------------
    // Loop stack

    /// Enter a loop: bind its entry label, allocate the exit, body-entry,
    /// and condition-entry labels, and register the record for
    /// `break`/`continue` lookup.
    pub fn enter_loop(&mut self, element: ElementId) -> LoopInfo {
        let pseudocode = self.current_worker().pseudocode;
        let entry = self.unit.add_label(pseudocode, Some("loop entry point"));
        let exit = self.unit.add_label(pseudocode, Some("loop exit point"));
        let body_entry = self.unit.add_label(pseudocode, Some("body entry point"));
        let condition_entry = self.unit.add_label(pseudocode, Some("condition entry point"));
        self.unit.bind_label(entry);

        let info = LoopInfo { element, entry, exit, body_entry, condition_entry };
        self.unit.pseudocode_mut(pseudocode).loop_infos.insert(element, info);
        self.push_block(BlockEntry::Loop(info));
        self.trace.record_loop_info(&info);
        debug!("entered loop {} in {}", element, pseudocode);
        info
    }

    /// Exit the innermost loop, binding its exit label.
    pub fn exit_loop(&mut self, element: ElementId) {
        let info = match self.blocks.last() {
            Some(BlockEntry::Loop(info)) if info.element == element => *info,
            Some(_) => panic!("exit_loop({}) does not match the innermost block", element),
            None => panic!("exit_loop({}) with no enclosing block", element),
        };
        self.pop_block();
        self.unit.bind_label(info.exit);
    }

    /// Entry label of the named enclosing block (subroutine or loop)
    pub fn entry_point(&self, element: ElementId) -> LabelId {
        match self.lookup_block(element) {
            Some(BlockEntry::Subroutine { entry, .. }) => *entry,
            Some(BlockEntry::Loop(info)) => info.entry,
            _ => panic!("no enclosing block found for {}", element),
        }
    }

    /// Exit label of the named enclosing block. The lookup spans every open
    /// worker, so a lambda's non-local return finds the enclosing
    /// function's exit.
    pub fn exit_point(&self, element: ElementId) -> LabelId {
        match self.lookup_block(element) {
            Some(BlockEntry::Subroutine { exit, .. }) => *exit,
            Some(BlockEntry::Loop(info)) => info.exit,
            _ => panic!("no enclosing block found for {}", element),
        }
    }

    /// Condition-entry label of the named enclosing loop; `continue` target
    /// for condition-first loops
    pub fn condition_entry_point(&self, element: ElementId) -> LabelId {
        match self.lookup_block(element) {
            Some(BlockEntry::Loop(info)) => info.condition_entry,
            _ => panic!("no enclosing loop found for {}", element),
        }
    }

    /// The innermost open loop, if any. The scan crosses subroutine
    /// boundaries; callers deciding `break`/`continue` legality check the
    /// owning body themselves.
    pub fn current_loop(&self) -> Option<LoopInfo> {
        for block in self.blocks.iter().rev() {
            if let BlockEntry::Loop(info) = block {
                return Some(*info);
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // Try/finally stack

    /// Enter a try/finally region. The trigger re-emits the finally block's
    /// instructions through the builder it is handed; it runs once for every
    /// jump out of the region.
    pub fn enter_try_finally(
        &mut self,
        trigger: impl FnMut(&mut ControlFlowBuilder) + 'static,
    ) {
        self.push_block(BlockEntry::TryFinally {
            trigger: Some(Box::new(trigger)),
        });
    }

    /// Leave the innermost try/finally region. The normal-path finally
    /// instructions are the driver's to emit; this only pops the region.
    pub fn exit_try_finally(&mut self) {
        match self.blocks.last() {
            Some(BlockEntry::TryFinally { .. }) => {}
            Some(_) => panic!("exit_try_finally does not match the innermost block"),
            None => panic!("exit_try_finally with no enclosing block"),
        }
        self.pop_block();
    }

    /// Walk the block stack from the jump site outward and run every
    /// finally trigger between it and the boundary the target belongs to,
    /// innermost to outermost, before the caller appends the jump itself.
    ///
    /// The boundary is the first breakable block that refers to the target,
    /// or the first breakable block at all when the target is the current
    /// worker's error exit. A target matching no enclosing block is
    /// internal to the current try body and nothing runs.
    fn splice_finally_blocks(&mut self, target: LabelId) {
        let error_label = self.current_worker().error_label;
        let mut pending: SmallVec<[usize; 2]> = SmallVec::new();
        let mut boundary_found = false;
        for (index, block) in self.blocks.iter().enumerate().rev() {
            match block {
                BlockEntry::TryFinally { trigger } => {
                    if trigger.is_some() {
                        pending.push(index);
                    }
                }
                _ => {
                    if block.is_referable(target) || target == error_label {
                        boundary_found = true;
                        break;
                    }
                }
            }
        }
        if !boundary_found {
            return;
        }

        // `pending` is innermost first. A trigger may itself emit jumps;
        // entries below its index are untouched while it runs, so the
        // collected indices stay valid.
        for index in pending {
            let taken = match self.blocks.get_mut(index) {
                Some(BlockEntry::TryFinally { trigger }) => trigger.take(),
                _ => None,
            };
            if let Some(mut generate) = taken {
                generate(self);
                if self.unit.options.collect_statistics {
                    self.unit.stats.finally_splices += 1;
                }
                if let Some(BlockEntry::TryFinally { trigger }) = self.blocks.get_mut(index) {
                    *trigger = Some(generate);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Straight-line emission

    fn emit(&mut self, element: ElementId, kind: InstructionKind) {
        let pseudocode = self.current_worker().pseudocode;
        self.unit.add_instruction(pseudocode, element, kind);
    }

    /// Emit a position marker for `element`.
    pub fn mark(&mut self, element: ElementId) {
        self.emit(element, InstructionKind::Mark { next: None });
    }

    /// Emit a read of `element`, minting the value it produces.
    pub fn read(&mut self, element: ElementId) -> ValueId {
        let output = self.unit.new_value();
        self.emit(element, InstructionKind::ReadValue { output, next: None });
        output
    }

    /// Emit a write of `value` into `element`.
    pub fn write(&mut self, element: ElementId, value: ValueId) {
        self.emit(element, InstructionKind::WriteValue { input: value, next: None });
    }

    /// Emit a local-variable declaration.
    pub fn declare_variable(&mut self, element: ElementId) {
        self.emit(element, InstructionKind::VariableDeclaration { parameter: false, next: None });
    }

    /// Emit a parameter declaration.
    pub fn declare_parameter(&mut self, element: ElementId) {
        self.emit(element, InstructionKind::VariableDeclaration { parameter: true, next: None });
    }

    /// Emit a load of the unit value for expressions with no value.
    pub fn load_unit(&mut self, element: ElementId) {
        self.emit(element, InstructionKind::LoadUnitValue { next: None });
    }

    /// Emit a node for syntax the driver could not lower. The node stays
    /// reachable so downstream analyses see a complete graph.
    pub fn unsupported(&mut self, element: ElementId) {
        self.emit(element, InstructionKind::UnsupportedElement { next: None });
    }

    /// Emit a call consuming `inputs`, minting an output value when the
    /// call produces one.
    pub fn call(
        &mut self,
        element: ElementId,
        inputs: &[ValueId],
        produces_value: bool,
    ) -> Option<ValueId> {
        let output = if produces_value {
            Some(self.unit.new_value())
        } else {
            None
        };
        self.emit(
            element,
            InstructionKind::Call {
                inputs: SmallVec::from_slice(inputs),
                output,
                next: None,
            },
        );
        output
    }

    // ------------------------------------------------------------------
    // Jumps

    /// Emit an unconditional jump to `target`, splicing enclosing finally
    /// blocks first when the target leaves a try body.
    pub fn jump(&mut self, target: LabelId, element: ElementId) {
        self.splice_finally_blocks(target);
        self.emit(element, InstructionKind::UnconditionalJump { target, resolved: None });
    }

    /// Emit a jump taken when `condition` is true; falls through otherwise.
    pub fn jump_on_true(&mut self, target: LabelId, element: ElementId, condition: ValueId) {
        self.splice_finally_blocks(target);
        self.emit(
            element,
            InstructionKind::ConditionalJump {
                condition,
                on_true: true,
                target,
                next_on_true: None,
                next_on_false: None,
            },
        );
    }

    /// Emit a jump taken when `condition` is false; falls through otherwise.
    pub fn jump_on_false(&mut self, target: LabelId, element: ElementId, condition: ValueId) {
        self.splice_finally_blocks(target);
        self.emit(
            element,
            InstructionKind::ConditionalJump {
                condition,
                on_true: false,
                target,
                next_on_true: None,
                next_on_false: None,
            },
        );
    }

    /// Emit an unconditional jump to the current subroutine's error exit.
    pub fn jump_to_error(&mut self, element: ElementId) {
        let target = self.current_worker().error_label;
        self.splice_finally_blocks(target);
        self.emit(element, InstructionKind::UnconditionalJump { target, resolved: None });
    }

    /// Emit a jump that may or may not be taken, modeling merge points that
    /// are not mutually exclusive at the graph level.
    pub fn nondeterministic_jump(&mut self, target: LabelId, element: ElementId) {
        self.splice_finally_blocks(target);
        self.emit(
            element,
            InstructionKind::NondeterministicJump {
                targets: SmallVec::from_slice(&[target]),
                resolved: SmallVec::new(),
                next: None,
            },
        );
    }

    /// Emit a nondeterministic jump with several possible targets. Finally
    /// regions are not spliced here; the targets of a multi-way jump never
    /// leave the enclosing try body.
    pub fn nondeterministic_jump_to_all(&mut self, targets: &[LabelId], element: ElementId) {
        self.emit(
            element,
            InstructionKind::NondeterministicJump {
                targets: SmallVec::from_slice(targets),
                resolved: SmallVec::new(),
                next: None,
            },
        );
    }

    /// Emit a value-carrying return targeting `subroutine`'s exit.
    pub fn return_value(&mut self, element: ElementId, value: ValueId, subroutine: ElementId) {
        let target = self.exit_point(subroutine);
        self.splice_finally_blocks(target);
        self.emit(
            element,
            InstructionKind::ReturnValue { input: value, target, resolved: None },
        );
    }

    /// Emit a plain return targeting `subroutine`'s exit.
    pub fn return_no_value(&mut self, element: ElementId, subroutine: ElementId) {
        let target = self.exit_point(subroutine);
        self.splice_finally_blocks(target);
        self.emit(element, InstructionKind::ReturnNoValue { target, resolved: None });
    }

    /// Emit a throw of `value`, jumping to the current subroutine's error
    /// exit.
    pub fn throw_exception(&mut self, element: ElementId, value: ValueId) {
        let target = self.current_worker().error_label;
        self.splice_finally_blocks(target);
        self.emit(
            element,
            InstructionKind::ThrowException { input: value, target, resolved: None },
        );
    }

    // ------------------------------------------------------------------
    // Labels, values, repetition

    /// Allocate a fresh unbound label in the current pseudocode.
    pub fn create_unbound_label(&mut self) -> LabelId {
        let pseudocode = self.current_worker().pseudocode;
        self.unit.add_label(pseudocode, None)
    }

    /// Allocate a fresh unbound label with a debug hint. Hints never carry
    /// meaning; two labels sharing a hint are still distinct.
    pub fn create_unbound_label_named(&mut self, hint: &str) -> LabelId {
        let pseudocode = self.current_worker().pseudocode;
        self.unit.add_label(pseudocode, Some(hint))
    }

    /// Bind `label` to the position of the next instruction emitted.
    pub fn bind_label(&mut self, label: LabelId) {
        let current = self.current_worker().pseudocode;
        let owner = self.unit.label(label).owner;
        assert_eq!(
            owner, current,
            "{} is owned by {} and cannot be bound in {}",
            label, owner, current
        );
        self.unit.bind_label(label);
    }

    /// Duplicate the instruction range between two bound labels at the end
    /// of the current pseudocode.
    pub fn repeat_part(&mut self, start: LabelId, finish: LabelId) {
        let pseudocode = self.current_worker().pseudocode;
        self.unit.repeat_part(pseudocode, start, finish);
    }

    /// Record `value` as the value of `element` for later lookup.
    pub fn bind_value(&mut self, value: ValueId, element: ElementId) {
        let pseudocode = self.current_worker().pseudocode;
        self.unit.pseudocode_mut(pseudocode).element_values.insert(element, value);
    }

    // ------------------------------------------------------------------

    /// Finish construction: post-process every top-level graph and hand the
    /// unit over, read-only from here on.
    pub fn finish(mut self) -> FlowUnit {
        assert!(
            self.workers.is_empty(),
            "finish called with {} unclosed subroutines",
            self.workers.len()
        );
        let roots = std::mem::take(&mut self.roots);
        for root in roots {
            self.unit.post_process(root);
        }
        self.unit
    }
}

/// Lookup table from source elements to their completed graphs, filled by a
/// [`ConstructionTrace`] or directly from [`FlowUnit::pseudocodes`]
pub type PseudocodeByElement = FxHashMap<ElementId, PseudocodeId>;
