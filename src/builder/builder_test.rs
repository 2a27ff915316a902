//! Tests for the construction-time builder protocol
//!
//! These exercise the worker and block stacks directly: landmark emission,
//! loop label registration, non-local return targets, and finally splicing.
//! Graph wiring after post-processing is covered by the integration tests.

use super::*;
use crate::graph::instruction::InstructionKind;
use crate::graph::pseudocode::SubroutineKind;
use crate::graph::BuilderOptions;
use crate::ids::{ElementId, PseudocodeId, ValueId};

fn builder() -> ControlFlowBuilder {
    ControlFlowBuilder::new(BuilderOptions::default())
}

fn element(raw: u32) -> ElementId {
    ElementId::from_raw(raw)
}

/// Kind names of a pseudocode's emission order
fn kind_names(unit: &FlowUnit, pseudocode: PseudocodeId) -> Vec<&'static str> {
    unit.pseudocode(pseudocode)
        .instructions_including_dead()
        .iter()
        .map(|id| unit.instruction(*id).kind.kind_name())
        .collect()
}

mod subroutine_tests {
    use super::*;

    #[test]
    fn test_subroutine_landmark_shape() {
        let mut builder = builder();
        let p = builder.enter_subroutine(element(1), SubroutineKind::Function);
        builder.mark(element(2));
        builder.exit_subroutine(element(1));
        let unit = builder.finish();

        assert_eq!(
            kind_names(&unit, p),
            vec![
                "SubroutineEnter",
                "Mark",
                "SubroutineExit",
                "SubroutineErrorExit",
                "SubroutineSink",
            ]
        );
        let data = unit.pseudocode(p);
        assert!(data.is_post_processed());
        assert!(data.enter_instruction().is_valid());
        assert!(data.exit_instruction().is_valid());
        assert!(data.error_instruction().is_valid());
        assert!(data.sink_instruction().is_valid());
        assert_eq!(data.instructions_including_dead()[0], data.enter_instruction());
    }

    #[test]
    fn test_nested_body_declared_in_parent() {
        let mut builder = builder();
        let outer = builder.enter_subroutine(element(1), SubroutineKind::Function);
        builder.mark(element(2));
        let inner = builder.enter_subroutine(element(3), SubroutineKind::Lambda);
        builder.mark(element(4));
        builder.exit_subroutine(element(3));
        builder.mark(element(5));
        builder.exit_subroutine(element(1));
        let unit = builder.finish();

        let declarations = unit.local_declarations(outer);
        assert_eq!(declarations.len(), 1);
        match &unit.instruction(declarations[0]).kind {
            InstructionKind::LocalFunctionDeclaration { body, .. } => assert_eq!(*body, inner),
            other => panic!("expected a declaration, found {}", other.kind_name()),
        }
        assert_eq!(unit.pseudocode(inner).parent(), Some(outer));
        assert!(unit.pseudocode(inner).is_post_processed());
    }

    #[test]
    fn test_lambda_inherits_return_target() {
        let mut builder = builder();
        builder.enter_subroutine(element(1), SubroutineKind::Function);
        assert_eq!(builder.return_subroutine(), element(1));

        builder.enter_subroutine(element(2), SubroutineKind::Lambda);
        assert_eq!(builder.current_subroutine(), element(2));
        assert_eq!(builder.return_subroutine(), element(1));

        // A lambda inside a lambda still returns from the named function.
        builder.enter_subroutine(element(3), SubroutineKind::Lambda);
        assert_eq!(builder.return_subroutine(), element(1));

        builder.exit_subroutine(element(3));
        builder.exit_subroutine(element(2));

        // A nested named function resets the target.
        builder.enter_subroutine(element(4), SubroutineKind::Function);
        assert_eq!(builder.return_subroutine(), element(4));
        builder.exit_subroutine(element(4));

        builder.exit_subroutine(element(1));
        builder.finish();
    }

    #[test]
    fn test_non_local_return_resolves_to_outer_exit() {
        let mut builder = builder();
        let outer = builder.enter_subroutine(element(1), SubroutineKind::Function);
        let lambda = builder.enter_subroutine(element(2), SubroutineKind::Lambda);
        let target = builder.return_subroutine();
        builder.return_no_value(element(3), target);
        builder.exit_subroutine(element(2));
        builder.exit_subroutine(element(1));
        let unit = builder.finish();

        let outer_exit = unit.pseudocode(outer).exit_instruction();
        let returns: Vec<_> = unit
            .pseudocode(lambda)
            .instructions_including_dead()
            .iter()
            .filter(|id| {
                matches!(unit.instruction(**id).kind, InstructionKind::ReturnNoValue { .. })
            })
            .copied()
            .collect();
        assert_eq!(returns.len(), 1);
        assert_eq!(unit.instruction(returns[0]).successors().as_slice(), &[outer_exit]);
        assert!(unit.instruction(outer_exit).incoming().contains(&returns[0]));
    }

    #[test]
    fn test_two_roots_are_both_post_processed() {
        let mut builder = builder();
        let first = builder.enter_subroutine(element(1), SubroutineKind::Function);
        builder.exit_subroutine(element(1));
        let second = builder.enter_subroutine(element(2), SubroutineKind::Function);
        builder.exit_subroutine(element(2));
        let unit = builder.finish();

        assert!(unit.pseudocode(first).is_post_processed());
        assert!(unit.pseudocode(second).is_post_processed());
        assert_eq!(unit.pseudocode(first).parent(), None);
        assert_eq!(unit.pseudocode(second).parent(), None);
    }

    #[test]
    #[should_panic(expected = "does not match current subroutine")]
    fn test_exit_subroutine_wrong_element_panics() {
        let mut builder = builder();
        builder.enter_subroutine(element(1), SubroutineKind::Function);
        builder.exit_subroutine(element(2));
    }

    #[test]
    #[should_panic(expected = "unclosed blocks")]
    fn test_exit_subroutine_with_open_loop_panics() {
        let mut builder = builder();
        builder.enter_subroutine(element(1), SubroutineKind::Function);
        builder.enter_loop(element(2));
        builder.exit_subroutine(element(1));
    }

    #[test]
    #[should_panic(expected = "unclosed subroutines")]
    fn test_finish_with_open_subroutine_panics() {
        let mut builder = builder();
        builder.enter_subroutine(element(1), SubroutineKind::Function);
        builder.finish();
    }
}

mod loop_tests {
    use super::*;

    #[test]
    fn test_loop_labels_registered() {
        let mut builder = builder();
        let p = builder.enter_subroutine(element(1), SubroutineKind::Function);
        builder.mark(element(2));
        let info = builder.enter_loop(element(3));

        // The entry label is bound at the position following the mark.
        assert_eq!(builder.unit().label(info.entry).bound_position(), Some(2));
        assert!(!builder.unit().label(info.exit).is_bound());
        assert!(!builder.unit().label(info.body_entry).is_bound());
        assert!(!builder.unit().label(info.condition_entry).is_bound());
        assert_eq!(builder.current_loop(), Some(info));
        assert_eq!(builder.unit().pseudocode(p).loop_info(element(3)), Some(&info));

        builder.exit_loop(element(3));
        assert!(builder.unit().label(info.exit).is_bound());
        assert_eq!(builder.current_loop(), None);

        builder.exit_subroutine(element(1));
        builder.finish();
    }

    #[test]
    fn test_block_label_lookups() {
        let mut builder = builder();
        builder.enter_subroutine(element(1), SubroutineKind::Function);
        let outer_loop = builder.enter_loop(element(2));
        let inner_loop = builder.enter_loop(element(3));

        assert_eq!(builder.entry_point(element(3)), inner_loop.entry);
        assert_eq!(builder.entry_point(element(2)), outer_loop.entry);
        assert_eq!(builder.exit_point(element(2)), outer_loop.exit);
        assert_eq!(builder.condition_entry_point(element(3)), inner_loop.condition_entry);
        assert_eq!(builder.current_loop(), Some(inner_loop));

        // The subroutine itself is a referable block too.
        let subroutine_entry = builder.entry_point(element(1));
        assert_eq!(builder.unit().label(subroutine_entry).bound_position(), Some(0));

        builder.exit_loop(element(3));
        builder.exit_loop(element(2));
        builder.exit_subroutine(element(1));
        builder.finish();
    }

    #[test]
    #[should_panic(expected = "does not match the innermost block")]
    fn test_exit_loop_mismatch_panics() {
        let mut builder = builder();
        builder.enter_subroutine(element(1), SubroutineKind::Function);
        builder.enter_loop(element(2));
        builder.exit_loop(element(3));
    }

    #[test]
    #[should_panic(expected = "no enclosing loop")]
    fn test_condition_entry_without_loop_panics() {
        let mut builder = builder();
        builder.enter_subroutine(element(1), SubroutineKind::Function);
        builder.condition_entry_point(element(2));
    }
}

mod finally_tests {
    use super::*;

    #[test]
    fn test_finally_spliced_before_break() {
        let mut builder = builder();
        let p = builder.enter_subroutine(element(1), SubroutineKind::Function);
        let info = builder.enter_loop(element(2));
        builder.enter_try_finally(|b| b.mark(element(99)));

        builder.jump(info.exit, element(3));

        builder.exit_try_finally();
        builder.exit_loop(element(2));
        builder.exit_subroutine(element(1));
        let unit = builder.finish();

        let emission = unit.pseudocode(p).instructions_including_dead();
        assert_eq!(
            kind_names(&unit, p)[..3],
            ["SubroutineEnter", "Mark", "UnconditionalJump"]
        );
        assert_eq!(unit.instruction(emission[1]).element, element(99));
    }

    #[test]
    fn test_internal_jump_skips_finally() {
        let mut builder = builder();
        let p = builder.enter_subroutine(element(1), SubroutineKind::Function);
        builder.enter_try_finally(|b| b.mark(element(99)));

        // An if/else shape entirely inside the try body.
        let after = builder.create_unbound_label();
        builder.jump(after, element(2));
        builder.bind_label(after);
        builder.mark(element(3));

        builder.exit_try_finally();
        builder.exit_subroutine(element(1));
        let unit = builder.finish();

        assert!(unit.pseudocode(p).representative_instruction(element(99)).is_none());
        assert_eq!(
            kind_names(&unit, p)[..3],
            ["SubroutineEnter", "UnconditionalJump", "Mark"]
        );
    }

    #[test]
    fn test_nested_finally_runs_innermost_first() {
        let mut builder = builder();
        let p = builder.enter_subroutine(element(1), SubroutineKind::Function);
        builder.enter_try_finally(|b| b.mark(element(101)));
        builder.enter_try_finally(|b| b.mark(element(102)));

        builder.return_no_value(element(3), element(1));

        builder.exit_try_finally();
        builder.exit_try_finally();
        builder.exit_subroutine(element(1));
        let unit = builder.finish();

        let emission = unit.pseudocode(p).instructions_including_dead();
        assert_eq!(unit.instruction(emission[1]).element, element(102));
        assert_eq!(unit.instruction(emission[2]).element, element(101));
        assert!(matches!(
            unit.instruction(emission[3]).kind,
            InstructionKind::ReturnNoValue { .. }
        ));
    }

    #[test]
    fn test_throw_splices_enclosing_finally() {
        let mut builder = builder();
        let p = builder.enter_subroutine(element(1), SubroutineKind::Function);
        builder.enter_try_finally(|b| b.mark(element(99)));

        let exception = builder.read(element(2));
        builder.throw_exception(element(3), exception);

        builder.exit_try_finally();
        builder.exit_subroutine(element(1));
        let unit = builder.finish();

        assert_eq!(
            kind_names(&unit, p)[..4],
            ["SubroutineEnter", "ReadValue", "Mark", "ThrowException"]
        );
    }

    #[test]
    fn test_single_target_nondeterministic_jump_splices() {
        let mut builder = builder();
        let p = builder.enter_subroutine(element(1), SubroutineKind::Function);
        let info = builder.enter_loop(element(2));
        builder.enter_try_finally(|b| b.mark(element(99)));

        // A maybe-taken exit from the loop still leaves the try body, so the
        // finally code runs ahead of it.
        builder.nondeterministic_jump(info.exit, element(3));

        builder.exit_try_finally();
        builder.exit_loop(element(2));
        builder.exit_subroutine(element(1));
        let unit = builder.finish();

        let emission = unit.pseudocode(p).instructions_including_dead();
        assert_eq!(
            kind_names(&unit, p)[..3],
            ["SubroutineEnter", "Mark", "NondeterministicJump"]
        );
        assert_eq!(unit.instruction(emission[1]).element, element(99));
    }

    #[test]
    fn test_multi_target_nondeterministic_jump_skips_finally() {
        // Multi-way dispatch never leaves the try body, so no finally code
        // is re-emitted even though a trigger is armed.
        let mut builder = builder();
        let p = builder.enter_subroutine(element(1), SubroutineKind::Function);
        builder.enter_try_finally(|b| b.mark(element(99)));

        let first = builder.create_unbound_label();
        let second = builder.create_unbound_label();
        builder.nondeterministic_jump_to_all(&[first, second], element(2));
        builder.bind_label(first);
        builder.mark(element(3));
        builder.bind_label(second);
        builder.mark(element(4));

        builder.exit_try_finally();
        builder.exit_subroutine(element(1));
        let unit = builder.finish();

        assert!(unit.pseudocode(p).representative_instruction(element(99)).is_none());
        assert_eq!(
            kind_names(&unit, p)[..4],
            ["SubroutineEnter", "NondeterministicJump", "Mark", "Mark"]
        );
    }

    #[test]
    fn test_finally_is_not_spliced_into_itself() {
        // The finally block itself breaks out of the loop. Without the
        // in-progress guard this would recurse forever.
        let mut builder = builder();
        let p = builder.enter_subroutine(element(1), SubroutineKind::Function);
        let info = builder.enter_loop(element(2));
        let exit = info.exit;
        builder.enter_try_finally(move |b| {
            b.mark(element(103));
            b.jump(exit, element(104));
        });

        builder.jump(info.exit, element(3));

        builder.exit_try_finally();
        builder.exit_loop(element(2));
        builder.exit_subroutine(element(1));
        let unit = builder.finish();

        let marks = unit
            .pseudocode(p)
            .instructions_including_dead()
            .iter()
            .filter(|id| unit.instruction(**id).element == element(103))
            .count();
        assert_eq!(marks, 1);
    }

    #[test]
    fn test_non_local_return_splices_lambda_finally() {
        let mut builder = builder();
        builder.enter_subroutine(element(1), SubroutineKind::Function);
        let lambda = builder.enter_subroutine(element(2), SubroutineKind::Lambda);
        builder.enter_try_finally(|b| b.mark(element(104)));

        // Returning from the enclosing function leaves the lambda entirely,
        // so the lambda's own finally must run.
        let target = builder.return_subroutine();
        builder.return_no_value(element(5), target);

        builder.exit_try_finally();
        builder.exit_subroutine(element(2));
        builder.exit_subroutine(element(1));
        let unit = builder.finish();

        let emission = unit.pseudocode(lambda).instructions_including_dead();
        assert_eq!(unit.instruction(emission[1]).element, element(104));
        assert!(matches!(
            unit.instruction(emission[2]).kind,
            InstructionKind::ReturnNoValue { .. }
        ));
    }

    #[test]
    fn test_splice_counter() {
        let options = BuilderOptions {
            collect_statistics: true,
            ..BuilderOptions::default()
        };
        let mut builder = ControlFlowBuilder::new(options);
        builder.enter_subroutine(element(1), SubroutineKind::Function);
        builder.enter_try_finally(|b| b.mark(element(99)));
        builder.return_no_value(element(2), element(1));
        builder.return_no_value(element(3), element(1));
        builder.exit_try_finally();
        builder.exit_subroutine(element(1));
        let unit = builder.finish();

        assert_eq!(unit.stats().finally_splices, 2);
    }
}

mod value_tests {
    use super::*;

    #[test]
    fn test_reads_mint_distinct_values() {
        let mut builder = builder();
        builder.enter_subroutine(element(1), SubroutineKind::Function);
        let a = builder.read(element(2));
        let b = builder.read(element(3));
        assert_ne!(a, b);
        builder.exit_subroutine(element(1));
        builder.finish();
    }

    #[test]
    fn test_call_output_and_usages() {
        let mut builder = builder();
        let p = builder.enter_subroutine(element(1), SubroutineKind::Function);
        let receiver = builder.read(element(2));
        let argument = builder.read(element(3));
        let result = builder.call(element(4), &[receiver, argument], true);
        assert!(result.is_some());
        let silent = builder.call(element(5), &[], false);
        assert!(silent.is_none());
        builder.exit_subroutine(element(1));
        let unit = builder.finish();

        let data = unit.pseudocode(p);
        let call = match data.representative_instruction(element(4)) {
            Some(id) => id,
            None => panic!("call instruction not recorded"),
        };
        assert_eq!(data.value_usages(receiver), &[call]);
        assert_eq!(data.value_usages(argument), &[call]);
        assert!(data.value_usages(ValueId::from_raw(999)).is_empty());
    }

    #[test]
    fn test_bind_value_lookup() {
        let mut builder = builder();
        let p = builder.enter_subroutine(element(1), SubroutineKind::Function);
        let value = builder.read(element(2));
        builder.bind_value(value, element(3));
        builder.exit_subroutine(element(1));
        let unit = builder.finish();

        assert_eq!(unit.pseudocode(p).element_value(element(3)), Some(value));
        assert_eq!(unit.pseudocode(p).element_value(element(4)), None);
    }

    #[test]
    #[should_panic(expected = "cannot be bound in")]
    fn test_bind_foreign_label_panics() {
        let mut builder = builder();
        builder.enter_subroutine(element(1), SubroutineKind::Function);
        let foreign = builder.create_unbound_label();
        builder.exit_subroutine(element(1));
        builder.enter_subroutine(element(2), SubroutineKind::Function);
        builder.bind_label(foreign);
    }
}

mod trace_tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Recording {
        pseudocodes: Vec<(ElementId, PseudocodeId)>,
        loops: Vec<ElementId>,
    }

    struct Recorder(Rc<RefCell<Recording>>);

    impl ConstructionTrace for Recorder {
        fn record_pseudocode(&mut self, element: ElementId, pseudocode: PseudocodeId) {
            self.0.borrow_mut().pseudocodes.push((element, pseudocode));
        }

        fn record_loop_info(&mut self, info: &crate::graph::pseudocode::LoopInfo) {
            self.0.borrow_mut().loops.push(info.element);
        }
    }

    #[test]
    fn test_trace_receives_construction_events() {
        let recording = Rc::new(RefCell::new(Recording::default()));
        let mut builder = ControlFlowBuilder::with_trace(
            BuilderOptions::default(),
            Box::new(Recorder(Rc::clone(&recording))),
        );

        let outer = builder.enter_subroutine(element(1), SubroutineKind::Function);
        builder.enter_loop(element(2));
        builder.exit_loop(element(2));
        let inner = builder.enter_subroutine(element(3), SubroutineKind::Lambda);
        builder.exit_subroutine(element(3));
        builder.exit_subroutine(element(1));
        builder.finish();

        let recording = recording.borrow();
        // Inner bodies complete before their parents.
        assert_eq!(
            recording.pseudocodes,
            vec![(element(3), inner), (element(1), outer)]
        );
        assert_eq!(recording.loops, vec![element(2)]);
    }
}
