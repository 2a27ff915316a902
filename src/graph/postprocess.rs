//! Post-processing pass
//!
//! A freshly constructed pseudocode is a flat instruction list whose jumps
//! name labels and whose straight-line instructions have no successor yet.
//! This pass runs once per graph and, in order: binds the exit edges to the
//! sink, resolves every label reference into a concrete edge, and wires the
//! sequential `next` edges, recursing into nested local-function graphs when
//! their declaration instruction is reached. Only after the whole tree's
//! edges are resolved does it compute reachability, by traversal from
//! `SubroutineEnter` — first for the root, then for every nested graph —
//! marking everything outside the reachable set dead and detaching it from
//! the live graph's incoming-edge bookkeeping. A non-local return makes an
//! inner graph point at its ancestors' instructions, so reachability over a
//! half-resolved tree would miss edges.
//!
//! The pass is idempotent; the second invocation is a no-op.

use std::time::Instant;

use fxhash::FxHashSet;
use log::{debug, trace};
use smallvec::SmallVec;

use crate::graph::instruction::InstructionKind;
use crate::graph::unit::FlowUnit;
use crate::graph::validate;
use crate::ids::{InstructionId, PseudocodeId};

impl FlowUnit {
    /// Post-process the given graph and, recursively, every nested
    /// local-function graph it declares.
    ///
    /// After this returns the graphs are read-only: reachable sequences and
    /// dead marks are final, and all edge slots are resolved. Calling it
    /// again is a no-op.
    pub fn post_process(&mut self, root: PseudocodeId) {
        if self.pseudocode(root).is_post_processed() {
            return;
        }
        let started = Instant::now();
        self.resolve_graph(root);

        // Reachability runs over the fully resolved tree: the root first,
        // then every nested graph.
        let visited = self.collect_reachable(root);
        self.mark_dead_instructions(root, &visited);
        for declaration in self.local_declarations(root) {
            if let InstructionKind::LocalFunctionDeclaration { body, .. } =
                self.instruction(declaration).kind
            {
                let visited = self.collect_reachable(body);
                self.mark_dead_instructions(body, &visited);
            }
        }

        self.recompute_lineage_liveness();
        if self.options.collect_statistics {
            self.stats.postprocess_time_us += started.elapsed().as_micros() as u64;
        }
        if self.options.validate_graphs {
            if let Err(error) = validate::validate_all(self, root) {
                panic!("flow graph validation failed for {}: {}", root, error);
            }
        }
    }

    fn resolve_graph(&mut self, pseudocode: PseudocodeId) {
        if self.pseudocode(pseudocode).is_post_processed() {
            return;
        }
        self.pseudocode_mut(pseudocode).post_processed = true;
        debug!(
            "post-processing {} ({} instructions, {} labels)",
            pseudocode,
            self.pseudocode(pseudocode).emission.len(),
            self.pseudocode(pseudocode).labels.len()
        );

        self.bind_exit_edges(pseudocode);
        self.resolve_edges(pseudocode);
    }

    /// Both exits lead to the sink; everything else is wired from the
    /// emission order during edge resolution.
    fn bind_exit_edges(&mut self, pseudocode: PseudocodeId) {
        let (exit, error_exit, sink) = {
            let p = self.pseudocode(pseudocode);
            assert!(
                p.sink.is_valid(),
                "{} post-processed before its construction finished",
                pseudocode
            );
            (p.exit, p.error_exit, p.sink)
        };
        for exit_id in [exit, error_exit] {
            if let InstructionKind::SubroutineExit { sink: slot, .. } =
                &mut self.instruction_mut(exit_id).kind
            {
                *slot = Some(sink);
            }
            self.instruction_mut(sink).incoming.insert(exit_id);
        }
    }

    /// Resolve label targets and wire sequential edges for every instruction
    /// in emission order, recursing into nested graphs at their declaration.
    fn resolve_edges(&mut self, pseudocode: PseudocodeId) {
        let emission = self.pseudocode(pseudocode).emission.clone();
        for (position, &id) in emission.iter().enumerate() {
            let name = self.instruction(id).kind.kind_name();
            let following = emission.get(position + 1).copied();

            // Labels first: resolution only reads bound positions.
            let targets = self.instruction(id).kind.jump_targets();
            let mut resolved_targets: SmallVec<[InstructionId; 2]> = SmallVec::new();
            for &label in &targets {
                resolved_targets.push(self.resolve_label(label));
            }

            // Nested graphs are resolved before their declaration's edges
            // are set.
            let nested = match &self.instruction(id).kind {
                InstructionKind::LocalFunctionDeclaration { body, .. } => Some(*body),
                _ => None,
            };
            if let Some(body) = nested {
                self.pseudocode_mut(body).parent = Some(pseudocode);
                self.resolve_graph(body);
            }
            let owner_sink = self.pseudocode(pseudocode).sink;

            let mut new_edges: SmallVec<[InstructionId; 2]> = SmallVec::new();
            match &mut self.instruction_mut(id).kind {
                InstructionKind::ReadValue { next, .. }
                | InstructionKind::WriteValue { next, .. }
                | InstructionKind::VariableDeclaration { next, .. }
                | InstructionKind::LoadUnitValue { next }
                | InstructionKind::UnsupportedElement { next }
                | InstructionKind::Mark { next }
                | InstructionKind::Call { next, .. }
                | InstructionKind::SubroutineEnter { next } => {
                    let to = following_instruction(following, name, id, pseudocode);
                    *next = Some(to);
                    new_edges.push(to);
                }
                InstructionKind::LocalFunctionDeclaration { next, sink, .. } => {
                    let to = following_instruction(following, name, id, pseudocode);
                    *next = Some(to);
                    *sink = Some(owner_sink);
                    new_edges.push(to);
                    new_edges.push(owner_sink);
                }
                InstructionKind::UnconditionalJump { resolved, .. }
                | InstructionKind::ReturnValue { resolved, .. }
                | InstructionKind::ReturnNoValue { resolved, .. }
                | InstructionKind::ThrowException { resolved, .. } => {
                    let to = resolved_targets[0];
                    *resolved = Some(to);
                    new_edges.push(to);
                }
                InstructionKind::ConditionalJump {
                    on_true,
                    next_on_true,
                    next_on_false,
                    ..
                } => {
                    let labeled = resolved_targets[0];
                    let sequential = following_instruction(following, name, id, pseudocode);
                    if *on_true {
                        *next_on_true = Some(labeled);
                        *next_on_false = Some(sequential);
                    } else {
                        *next_on_true = Some(sequential);
                        *next_on_false = Some(labeled);
                    }
                    new_edges.push(labeled);
                    new_edges.push(sequential);
                }
                InstructionKind::NondeterministicJump { resolved, next, .. } => {
                    let sequential = following_instruction(following, name, id, pseudocode);
                    *resolved = resolved_targets.clone();
                    *next = Some(sequential);
                    new_edges.extend(resolved_targets.iter().copied());
                    new_edges.push(sequential);
                }
                // Exits were bound to the sink already; the sink has no
                // outgoing edges.
                InstructionKind::SubroutineExit { .. } | InstructionKind::SubroutineSink => {}
            }

            for to in new_edges {
                self.instruction_mut(to).incoming.insert(id);
            }
        }
    }

    /// Depth-first traversal from `SubroutineEnter` along resolved edges.
    ///
    /// Successors are pushed in reverse so they are visited in slot order
    /// for consistent traversal. The traversal may cross into an enclosing
    /// graph through a non-local return; the emission-order filter keeps
    /// foreign instructions out of the reachable sequence. Exits and the
    /// sink are forced into the set so downstream consumers always find
    /// them, even in always-throwing bodies.
    fn collect_reachable(&mut self, pseudocode: PseudocodeId) -> FxHashSet<InstructionId> {
        let enter = self.pseudocode(pseudocode).enter;
        let mut visited: FxHashSet<InstructionId> = FxHashSet::default();
        let mut stack = vec![enter];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let successors = self.instruction(id).successors();
            for &successor in successors.iter().rev() {
                if !visited.contains(&successor) {
                    stack.push(successor);
                }
            }
        }

        let p = self.pseudocode(pseudocode);
        visited.insert(p.exit);
        visited.insert(p.error_exit);
        visited.insert(p.sink);

        let reachable: Vec<InstructionId> = p
            .emission
            .iter()
            .copied()
            .filter(|id| visited.contains(id))
            .collect();
        trace!(
            "{}: {} of {} instructions reachable",
            pseudocode,
            reachable.len(),
            p.emission.len()
        );
        self.pseudocode_mut(pseudocode).reachable = reachable;
        visited
    }

    /// Mark everything outside the reachable set dead and remove it from its
    /// successors' incoming sets. The dead instruction keeps its own
    /// outgoing edges for introspection.
    fn mark_dead_instructions(
        &mut self,
        pseudocode: PseudocodeId,
        visited: &FxHashSet<InstructionId>,
    ) {
        let emission = self.pseudocode(pseudocode).emission.clone();
        let mut dead = 0usize;
        for id in emission {
            // A copied declaration shares its body, so a graph can come
            // through here twice; already-marked instructions are done.
            if visited.contains(&id) || self.instruction(id).is_dead() {
                continue;
            }
            self.instruction_mut(id).dead = true;
            dead += 1;
            let successors = self.instruction(id).successors();
            for successor in successors {
                self.instruction_mut(successor).incoming.shift_remove(&id);
            }
            trace!("marked {} dead", id);
        }
        if dead > 0 {
            debug!("{}: {} dead instructions", pseudocode, dead);
        }
        if self.options.collect_statistics {
            self.stats.dead_instructions += dead;
        }
    }
}

fn following_instruction(
    following: Option<InstructionId>,
    name: &'static str,
    id: InstructionId,
    owner: PseudocodeId,
) -> InstructionId {
    match following {
        Some(next) => next,
        None => panic!("{} {} has no following instruction in {}", name, id, owner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::pseudocode::SubroutineKind;
    use crate::graph::BuilderOptions;
    use crate::ids::{ElementId, ValueId};

    fn unit() -> FlowUnit {
        FlowUnit::new(BuilderOptions {
            collect_statistics: true,
            ..Default::default()
        })
    }

    fn open_graph(unit: &mut FlowUnit, element: u32) -> PseudocodeId {
        let p = unit.add_pseudocode(ElementId::from_raw(element), SubroutineKind::Function);
        let enter = unit.add_instruction(
            p,
            ElementId::from_raw(element),
            InstructionKind::SubroutineEnter { next: None },
        );
        unit.pseudocode_mut(p).enter = enter;
        p
    }

    fn seal_graph(unit: &mut FlowUnit, p: PseudocodeId, element: u32) {
        let element = ElementId::from_raw(element);
        let exit = unit.add_instruction(
            p,
            element,
            InstructionKind::SubroutineExit { error: false, sink: None },
        );
        let error_exit = unit.add_instruction(
            p,
            element,
            InstructionKind::SubroutineExit { error: true, sink: None },
        );
        let sink = unit.add_instruction(p, element, InstructionKind::SubroutineSink);
        let data = unit.pseudocode_mut(p);
        data.exit = exit;
        data.error_exit = error_exit;
        data.sink = sink;
    }

    fn mark(unit: &mut FlowUnit, p: PseudocodeId, element: u32) -> InstructionId {
        unit.add_instruction(
            p,
            ElementId::from_raw(element),
            InstructionKind::Mark { next: None },
        )
    }

    fn successors_of(unit: &FlowUnit, id: InstructionId) -> Vec<InstructionId> {
        unit.instruction(id).successors().to_vec()
    }

    #[test]
    fn test_sequential_edges_and_incoming() {
        let mut unit = unit();
        let p = open_graph(&mut unit, 0);
        let m = mark(&mut unit, p, 1);
        seal_graph(&mut unit, p, 0);
        unit.post_process(p);

        let data = unit.pseudocode(p);
        let (enter, exit, error_exit, sink) =
            (data.enter, data.exit, data.error_exit, data.sink);
        assert_eq!(successors_of(&unit, enter), vec![m]);
        assert_eq!(successors_of(&unit, m), vec![exit]);
        assert_eq!(successors_of(&unit, exit), vec![sink]);
        assert_eq!(successors_of(&unit, error_exit), vec![sink]);
        assert!(successors_of(&unit, sink).is_empty());

        assert!(unit.instruction(m).incoming().contains(&enter));
        assert!(unit.instruction(sink).incoming().contains(&exit));
        assert!(unit.instruction(sink).incoming().contains(&error_exit));

        assert_eq!(unit.pseudocode(p).reachable_instructions().len(), 5);
        assert!(unit.dead_instructions(p).is_empty());
        assert_eq!(unit.stats().dead_instructions, 0);
    }

    #[test]
    fn test_jump_resolution_and_dead_detachment() {
        let mut unit = unit();
        let p = open_graph(&mut unit, 0);
        let label = unit.add_label(p, None);
        let jump = unit.add_instruction(
            p,
            ElementId::from_raw(1),
            InstructionKind::UnconditionalJump { target: label, resolved: None },
        );
        let skipped = mark(&mut unit, p, 2);
        unit.bind_label(label);
        let landing = mark(&mut unit, p, 3);
        seal_graph(&mut unit, p, 0);
        unit.post_process(p);

        assert_eq!(successors_of(&unit, jump), vec![landing]);
        assert!(unit.instruction(skipped).is_dead());
        // Outgoing edges of the dead instruction stay intact while the live
        // side forgets it.
        assert_eq!(successors_of(&unit, skipped), vec![landing]);
        assert!(!unit.instruction(landing).incoming().contains(&skipped));
        assert!(unit.instruction(landing).incoming().contains(&jump));
        assert_eq!(unit.dead_instructions(p), vec![skipped]);
        assert_eq!(unit.stats().dead_instructions, 1);

        let reachable = unit.pseudocode(p).reachable_instructions();
        assert!(!reachable.contains(&skipped));
        assert!(reachable.contains(&landing));
    }

    #[test]
    fn test_conditional_slot_polarity() {
        for on_true in [true, false] {
            let mut unit = unit();
            let p = open_graph(&mut unit, 0);
            let label = unit.add_label(p, None);
            let jump = unit.add_instruction(
                p,
                ElementId::from_raw(1),
                InstructionKind::ConditionalJump {
                    condition: ValueId::from_raw(0),
                    on_true,
                    target: label,
                    next_on_true: None,
                    next_on_false: None,
                },
            );
            let sequential = mark(&mut unit, p, 2);
            unit.bind_label(label);
            let labeled = mark(&mut unit, p, 3);
            seal_graph(&mut unit, p, 0);
            unit.post_process(p);

            match &unit.instruction(jump).kind {
                InstructionKind::ConditionalJump { next_on_true, next_on_false, .. } => {
                    if on_true {
                        assert_eq!(*next_on_true, Some(labeled));
                        assert_eq!(*next_on_false, Some(sequential));
                    } else {
                        assert_eq!(*next_on_true, Some(sequential));
                        assert_eq!(*next_on_false, Some(labeled));
                    }
                }
                other => panic!("unexpected kind {}", other.kind_name()),
            }
        }
    }

    #[test]
    fn test_nondeterministic_jump_resolution() {
        let mut unit = unit();
        let p = open_graph(&mut unit, 0);
        let first = unit.add_label(p, None);
        let second = unit.add_label(p, None);
        let fan_out = unit.add_instruction(
            p,
            ElementId::from_raw(1),
            InstructionKind::NondeterministicJump {
                targets: SmallVec::from_slice(&[first, second]),
                resolved: SmallVec::new(),
                next: None,
            },
        );
        // Zero targets leaves only the sequential edge.
        let no_targets = unit.add_instruction(
            p,
            ElementId::from_raw(2),
            InstructionKind::NondeterministicJump {
                targets: SmallVec::new(),
                resolved: SmallVec::new(),
                next: None,
            },
        );
        unit.bind_label(first);
        let first_landing = mark(&mut unit, p, 3);
        unit.bind_label(second);
        let second_landing = mark(&mut unit, p, 4);
        seal_graph(&mut unit, p, 0);
        unit.post_process(p);

        // Resolved targets in declaration order, the sequential edge last.
        assert_eq!(
            successors_of(&unit, fan_out),
            vec![first_landing, second_landing, no_targets]
        );
        assert_eq!(successors_of(&unit, no_targets), vec![first_landing]);
        assert!(unit.instruction(first_landing).incoming().contains(&fan_out));
        assert!(unit.instruction(first_landing).incoming().contains(&no_targets));
        assert!(unit.instruction(second_landing).incoming().contains(&fan_out));
        assert!(unit.dead_instructions(p).is_empty());
    }

    #[test]
    fn test_forced_exits_in_always_throwing_body() {
        let mut unit = unit();
        let p = open_graph(&mut unit, 0);
        let error_label = unit.add_label(p, Some("error"));
        let throw = unit.add_instruction(
            p,
            ElementId::from_raw(1),
            InstructionKind::ThrowException {
                input: ValueId::from_raw(0),
                target: error_label,
                resolved: None,
            },
        );
        let element = ElementId::from_raw(0);
        let exit = unit.add_instruction(
            p,
            element,
            InstructionKind::SubroutineExit { error: false, sink: None },
        );
        unit.bind_label(error_label);
        let error_exit = unit.add_instruction(
            p,
            element,
            InstructionKind::SubroutineExit { error: true, sink: None },
        );
        let sink = unit.add_instruction(p, element, InstructionKind::SubroutineSink);
        let data = unit.pseudocode_mut(p);
        data.exit = exit;
        data.error_exit = error_exit;
        data.sink = sink;

        unit.post_process(p);

        assert_eq!(successors_of(&unit, throw), vec![error_exit]);
        let reachable = unit.pseudocode(p).reachable_instructions();
        // The normal exit is never targeted but stays in the reachable set.
        assert!(reachable.contains(&exit));
        assert!(reachable.contains(&error_exit));
        assert!(reachable.contains(&sink));
        assert!(!unit.instruction(exit).is_dead());
        assert!(unit.dead_instructions(p).is_empty());
    }

    #[test]
    fn test_post_processing_is_idempotent() {
        let mut unit = unit();
        let p = open_graph(&mut unit, 0);
        let label = unit.add_label(p, None);
        let _jump = unit.add_instruction(
            p,
            ElementId::from_raw(1),
            InstructionKind::UnconditionalJump { target: label, resolved: None },
        );
        let _skipped = mark(&mut unit, p, 2);
        unit.bind_label(label);
        let _landing = mark(&mut unit, p, 3);
        seal_graph(&mut unit, p, 0);

        unit.post_process(p);
        let reachable_first = unit.pseudocode(p).reachable_instructions().to_vec();
        let dead_first = unit.dead_instructions(p);
        let edges_first: Vec<_> = (0..unit.instruction_count())
            .map(|i| unit.instruction(InstructionId::from_raw(i as u32)).successors())
            .collect();

        unit.post_process(p);
        let edges_second: Vec<_> = (0..unit.instruction_count())
            .map(|i| unit.instruction(InstructionId::from_raw(i as u32)).successors())
            .collect();
        assert_eq!(unit.pseudocode(p).reachable_instructions(), reachable_first);
        assert_eq!(unit.dead_instructions(p), dead_first);
        assert_eq!(edges_first, edges_second);
    }

    #[test]
    fn test_nested_graph_declaration_edges() {
        let mut unit = unit();
        let outer = open_graph(&mut unit, 0);
        let inner = open_graph(&mut unit, 10);
        seal_graph(&mut unit, inner, 10);

        let declaration = unit.add_instruction(
            outer,
            ElementId::from_raw(10),
            InstructionKind::LocalFunctionDeclaration { body: inner, next: None, sink: None },
        );
        let after = mark(&mut unit, outer, 2);
        seal_graph(&mut unit, outer, 0);
        unit.post_process(outer);

        assert!(unit.pseudocode(inner).is_post_processed());
        assert_eq!(unit.pseudocode(inner).parent(), Some(outer));

        let outer_sink = unit.pseudocode(outer).sink_instruction();
        // Straight-line in the outer graph plus the virtual sink edge.
        assert_eq!(successors_of(&unit, declaration), vec![after, outer_sink]);
        assert!(unit.instruction(after).incoming().contains(&declaration));
        assert!(unit.instruction(outer_sink).incoming().contains(&declaration));
        assert!(!unit.instruction(after).is_dead());

        // The nested graph keeps its own reachable sequence.
        assert_eq!(unit.pseudocode(inner).reachable_instructions().len(), 4);
    }

    #[test]
    #[should_panic(expected = "has no following instruction")]
    fn test_straight_line_tail_is_fatal() {
        let mut unit = unit();
        let p = open_graph(&mut unit, 0);
        mark(&mut unit, p, 1);
        // No exits or sink were emitted; fake the landmarks so the exit
        // binding step passes and the tail mark is reached.
        let data = unit.pseudocode_mut(p);
        data.exit = data.enter;
        data.error_exit = data.enter;
        data.sink = data.enter;
        unit.post_process(p);
    }
}
