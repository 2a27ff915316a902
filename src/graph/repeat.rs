//! Segment repetition
//!
//! Copies a contiguous, already-emitted instruction range to the end of the
//! emission list. Used when one syntactic construct lowers into two physical
//! copies of the same control-flow segment, a `do..while` condition checked
//! both before and after the duplicated body being the typical case.
//!
//! Labels bound inside the range get fresh copy-labels bound at the copies'
//! positions, and copied jumps whose target lies inside the range are
//! retargeted to those copy-labels. Jumps out of the range keep their
//! original labels and resolve to the original instructions. Each copy joins
//! its original's lineage group so dead-code reporting can treat the set of
//! copies as one logical node.

use fxhash::FxHashMap;
use log::debug;
use smallvec::SmallVec;

use crate::graph::instruction::InstructionKind;
use crate::graph::unit::FlowUnit;
use crate::ids::{InstructionId, LabelId, PseudocodeId};

impl FlowUnit {
    /// Append a copy of the instructions between two bound labels, inclusive
    /// of the instruction at `finish`'s position.
    ///
    /// Both labels must already be bound; anything else is a
    /// construction-protocol violation.
    pub(crate) fn repeat_part(
        &mut self,
        pseudocode: PseudocodeId,
        start: LabelId,
        finish: LabelId,
    ) {
        let start_position = match self.label(start).bound {
            Some(position) => position,
            None => panic!("repeat_part start {} is unbound", self.label(start)),
        };
        let finish_position = match self.label(finish).bound {
            Some(position) => position,
            None => panic!("repeat_part finish {} is unbound", self.label(finish)),
        };
        assert!(
            start_position <= finish_position,
            "repeat_part range [{}, {}] is reversed",
            start_position,
            finish_position
        );
        let emission_len = self.pseudocode(pseudocode).emission.len();
        assert!(
            (finish_position as usize) < emission_len,
            "repeat_part finish {} bound at {} past the end of {}",
            self.label(finish),
            finish_position,
            pseudocode
        );

        // Fresh copy-labels for every label bound in the range, the two
        // boundary labels themselves excluded.
        let owned_labels = self.pseudocode(pseudocode).labels.clone();
        let mut copy_labels: FxHashMap<LabelId, LabelId> = FxHashMap::default();
        let mut originals_at_position: FxHashMap<u32, SmallVec<[LabelId; 2]>> =
            FxHashMap::default();
        for label_id in owned_labels {
            if label_id == start || label_id == finish {
                continue;
            }
            let position = match self.label(label_id).bound {
                Some(position) => position,
                None => continue,
            };
            if position < start_position || position > finish_position {
                continue;
            }
            let hint = self.label(label_id).hint.clone();
            let copy = self.add_label(pseudocode, hint.as_deref());
            copy_labels.insert(label_id, copy);
            originals_at_position.entry(position).or_default().push(label_id);
        }

        let range: Vec<InstructionId> = self.pseudocode(pseudocode).emission
            [start_position as usize..=finish_position as usize]
            .to_vec();
        for (offset, original_id) in range.iter().copied().enumerate() {
            let position = start_position + offset as u32;

            // Copy-labels bind where the copy is about to land.
            if let Some(originals) = originals_at_position.get(&position) {
                let pending: SmallVec<[LabelId; 2]> =
                    originals.iter().map(|original| copy_labels[original]).collect();
                for copy_label in pending {
                    self.bind_label(copy_label);
                }
            }

            let original = self.instruction(original_id);
            let element = original.element;
            let copied_kind = copy_kind(&original.kind, &copy_labels);
            let copy_id = self.add_instruction(pseudocode, element, copied_kind);
            self.join_lineage(original_id, copy_id);
            if self.options.collect_statistics {
                self.stats.instructions_copied += 1;
            }
        }

        debug!(
            "repeated [{}, {}] of {}: {} instructions, {} labels copied",
            start_position,
            finish_position,
            pseudocode,
            range.len(),
            copy_labels.len()
        );
    }
}

/// Clone a kind for repetition: edge slots reset to unresolved, jump targets
/// inside the range remapped to their copy-labels.
fn copy_kind(kind: &InstructionKind, copy_labels: &FxHashMap<LabelId, LabelId>) -> InstructionKind {
    let remap = |label: LabelId| copy_labels.get(&label).copied().unwrap_or(label);
    match kind {
        InstructionKind::ReadValue { output, .. } => InstructionKind::ReadValue {
            output: *output,
            next: None,
        },
        InstructionKind::WriteValue { input, .. } => InstructionKind::WriteValue {
            input: *input,
            next: None,
        },
        InstructionKind::VariableDeclaration { parameter, .. } => {
            InstructionKind::VariableDeclaration {
                parameter: *parameter,
                next: None,
            }
        }
        InstructionKind::LoadUnitValue { .. } => InstructionKind::LoadUnitValue { next: None },
        InstructionKind::UnsupportedElement { .. } => {
            InstructionKind::UnsupportedElement { next: None }
        }
        InstructionKind::Mark { .. } => InstructionKind::Mark { next: None },
        InstructionKind::Call { inputs, output, .. } => InstructionKind::Call {
            inputs: inputs.clone(),
            output: *output,
            next: None,
        },
        // The copy declares the same nested body; only the declaration node
        // is duplicated.
        InstructionKind::LocalFunctionDeclaration { body, .. } => {
            InstructionKind::LocalFunctionDeclaration {
                body: *body,
                next: None,
                sink: None,
            }
        }
        InstructionKind::UnconditionalJump { target, .. } => InstructionKind::UnconditionalJump {
            target: remap(*target),
            resolved: None,
        },
        InstructionKind::ConditionalJump {
            condition,
            on_true,
            target,
            ..
        } => InstructionKind::ConditionalJump {
            condition: *condition,
            on_true: *on_true,
            target: remap(*target),
            next_on_true: None,
            next_on_false: None,
        },
        InstructionKind::NondeterministicJump { targets, .. } => {
            InstructionKind::NondeterministicJump {
                targets: targets.iter().copied().map(remap).collect(),
                resolved: SmallVec::new(),
                next: None,
            }
        }
        InstructionKind::ReturnValue { input, target, .. } => InstructionKind::ReturnValue {
            input: *input,
            target: remap(*target),
            resolved: None,
        },
        InstructionKind::ReturnNoValue { target, .. } => InstructionKind::ReturnNoValue {
            target: remap(*target),
            resolved: None,
        },
        InstructionKind::ThrowException { input, target, .. } => InstructionKind::ThrowException {
            input: *input,
            target: remap(*target),
            resolved: None,
        },
        InstructionKind::SubroutineEnter { .. } => InstructionKind::SubroutineEnter { next: None },
        InstructionKind::SubroutineExit { error, .. } => InstructionKind::SubroutineExit {
            error: *error,
            sink: None,
        },
        InstructionKind::SubroutineSink => InstructionKind::SubroutineSink,
    }
}
