//! Per-compilation-unit arena context
//!
//! A [`FlowUnit`] owns every instruction, label, and pseudocode built for one
//! top-level compilation unit, addressed by plain index ids. Keeping the
//! arenas unit-wide (rather than per graph) lets cross-graph edges — a
//! lambda's non-local return targeting the enclosing function's exit — be
//! ordinary indices with no back-pointers. Id discriminators are the arena
//! lengths; there is no global state, so units are independent.

use fxhash::FxHashMap;
use log::trace;

use crate::graph::instruction::{Instruction, InstructionKind};
use crate::graph::label::Label;
use crate::graph::pseudocode::{Pseudocode, SubroutineKind};
use crate::graph::{BuilderOptions, ConstructionStats};
use crate::ids::{ElementId, InstructionId, LabelId, LineageId, PseudocodeId, ValueId};

/// Arena context owning all graph entities of one compilation unit
///
/// Mutable only while the builder and the post-processor run; afterwards the
/// unit is plain data, safe for concurrent read-only traversal.
#[derive(Debug, Clone)]
pub struct FlowUnit {
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) labels: Vec<Label>,
    pub(crate) pseudocodes: Vec<Pseudocode>,

    /// Copy-lineage table: instruction to lineage-group id, populated by
    /// segment repetition for originals and copies alike
    pub(crate) lineage: FxHashMap<InstructionId, LineageId>,

    /// Whether each lineage group has at least one live member, recomputed
    /// once after dead-marking
    pub(crate) lineage_alive: FxHashMap<LineageId, bool>,

    next_lineage: u32,
    next_value: u32,

    pub(crate) options: BuilderOptions,
    pub(crate) stats: ConstructionStats,
}

impl FlowUnit {
    pub(crate) fn new(options: BuilderOptions) -> Self {
        Self {
            instructions: Vec::new(),
            labels: Vec::new(),
            pseudocodes: Vec::new(),
            lineage: FxHashMap::default(),
            lineage_alive: FxHashMap::default(),
            next_lineage: 0,
            next_value: 0,
            options,
            stats: ConstructionStats::new(),
        }
    }

    /// Mint a fresh opaque value handle, unique within this unit.
    pub(crate) fn new_value(&mut self) -> ValueId {
        let id = ValueId::from_raw(self.next_value);
        self.next_value += 1;
        id
    }

    /// Options this unit was built with
    pub fn options(&self) -> &BuilderOptions {
        &self.options
    }

    /// Construction statistics (populated when `collect_statistics` is set)
    pub fn stats(&self) -> &ConstructionStats {
        &self.stats
    }

    /// Get an instruction by id
    pub fn instruction(&self, id: InstructionId) -> &Instruction {
        &self.instructions[id.index()]
    }

    pub(crate) fn instruction_mut(&mut self, id: InstructionId) -> &mut Instruction {
        &mut self.instructions[id.index()]
    }

    /// Get a label by id
    pub fn label(&self, id: LabelId) -> &Label {
        &self.labels[id.index()]
    }

    /// Get a pseudocode by id
    pub fn pseudocode(&self, id: PseudocodeId) -> &Pseudocode {
        &self.pseudocodes[id.index()]
    }

    pub(crate) fn pseudocode_mut(&mut self, id: PseudocodeId) -> &mut Pseudocode {
        &mut self.pseudocodes[id.index()]
    }

    /// All pseudocodes in creation order
    pub fn pseudocodes(&self) -> impl Iterator<Item = &Pseudocode> {
        self.pseudocodes.iter()
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn pseudocode_count(&self) -> usize {
        self.pseudocodes.len()
    }

    pub(crate) fn add_pseudocode(
        &mut self,
        element: ElementId,
        kind: SubroutineKind,
    ) -> PseudocodeId {
        let id = PseudocodeId::from_raw(self.pseudocodes.len() as u32);
        self.pseudocodes.push(Pseudocode::new(id, element, kind));
        if self.options.collect_statistics {
            self.stats.pseudocodes_built += 1;
        }
        trace!("created {} for {:?} {}", id, kind, element);
        id
    }

    pub(crate) fn add_label(&mut self, owner: PseudocodeId, hint: Option<&str>) -> LabelId {
        let id = LabelId::from_raw(self.labels.len() as u32);
        self.labels.push(Label::new(id, owner, hint));
        self.pseudocodes[owner.index()].labels.push(id);
        if self.options.collect_statistics {
            self.stats.labels_created += 1;
        }
        id
    }

    /// Append an instruction to its owner's emission order, recording the
    /// element's representative (first emission wins) and value usages.
    pub(crate) fn add_instruction(
        &mut self,
        owner: PseudocodeId,
        element: ElementId,
        kind: InstructionKind,
    ) -> InstructionId {
        let id = InstructionId::from_raw(self.instructions.len() as u32);
        let inputs = kind.input_values();
        trace!("emitting {} {} for {}", id, kind.kind_name(), element);
        self.instructions.push(Instruction::new(id, owner, element, kind));

        let pseudocode = &mut self.pseudocodes[owner.index()];
        pseudocode.emission.push(id);
        pseudocode.representative.entry(element).or_insert(id);
        for value in inputs {
            pseudocode.value_usages.entry(value).or_default().push(id);
        }
        if self.options.collect_statistics {
            self.stats.instructions_emitted += 1;
        }
        id
    }

    /// Bind a label to the position of the next instruction added to its
    /// owning pseudocode.
    pub(crate) fn bind_label(&mut self, label: LabelId) {
        let owner = self.labels[label.index()].owner;
        let position = self.pseudocodes[owner.index()].emission.len() as u32;
        self.labels[label.index()].bind(position);
        trace!("bound {} at position {}", self.labels[label.index()], position);
    }

    /// Resolve a bound label to the instruction at its position.
    ///
    /// An unbound label or a position past the owner's emission order is a
    /// construction-protocol violation.
    pub(crate) fn resolve_label(&self, label: LabelId) -> InstructionId {
        let data = &self.labels[label.index()];
        let position = match data.bound {
            Some(position) => position,
            None => panic!("{} resolved before being bound", data),
        };
        let owner = &self.pseudocodes[data.owner.index()];
        match owner.emission.get(position as usize) {
            Some(&id) => id,
            None => panic!(
                "{} bound at position {} past the end of {}",
                data, position, owner.id
            ),
        }
    }

    /// Put the copy in the original's lineage group, allocating the group if
    /// the original was never copied before.
    pub(crate) fn join_lineage(&mut self, original: InstructionId, copy: InstructionId) {
        let group = match self.lineage.get(&original) {
            Some(&group) => group,
            None => {
                let group = LineageId::from_raw(self.next_lineage);
                self.next_lineage += 1;
                self.lineage.insert(original, group);
                group
            }
        };
        self.lineage.insert(copy, group);
    }

    /// Lineage group of an instruction, if it was ever copied or is a copy
    pub fn lineage_group(&self, instruction: InstructionId) -> Option<LineageId> {
        self.lineage.get(&instruction).copied()
    }

    pub(crate) fn recompute_lineage_liveness(&mut self) {
        self.lineage_alive.clear();
        for (&instruction, &group) in &self.lineage {
            let alive = !self.instructions[instruction.index()].dead;
            *self.lineage_alive.entry(group).or_insert(false) |= alive;
        }
    }

    /// Whether an instruction is dead for reporting purposes.
    ///
    /// An instruction with segment-repetition copies counts as dead only if
    /// every member of its lineage group is individually dead; a live copy
    /// rescues the whole group.
    pub fn is_effectively_dead(&self, instruction: InstructionId) -> bool {
        if !self.instructions[instruction.index()].dead {
            return false;
        }
        match self.lineage.get(&instruction) {
            Some(group) => !self.lineage_alive.get(group).copied().unwrap_or(false),
            None => true,
        }
    }

    /// Effectively-dead instructions of a pseudocode, in emission order
    pub fn dead_instructions(&self, pseudocode: PseudocodeId) -> Vec<InstructionId> {
        self.pseudocodes[pseudocode.index()]
            .emission
            .iter()
            .copied()
            .filter(|&id| self.is_effectively_dead(id))
            .collect()
    }

    /// All `LocalFunctionDeclaration` instructions of a pseudocode,
    /// flattened recursively across nested local functions
    pub fn local_declarations(&self, pseudocode: PseudocodeId) -> Vec<InstructionId> {
        let mut result = Vec::new();
        self.collect_local_declarations(pseudocode, &mut result);
        result
    }

    fn collect_local_declarations(
        &self,
        pseudocode: PseudocodeId,
        result: &mut Vec<InstructionId>,
    ) {
        for &id in &self.pseudocodes[pseudocode.index()].emission {
            if let InstructionKind::LocalFunctionDeclaration { body, .. } =
                &self.instructions[id.index()].kind
            {
                result.push(id);
                self.collect_local_declarations(*body, result);
            }
        }
    }
}
