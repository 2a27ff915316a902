//! Structural validation for post-processed graphs
//!
//! Validation is a debugging aid for the construction pipeline itself: a
//! finished graph must satisfy the structural invariants downstream analyses
//! rely on (landmark counts, resolved edges, symmetric incoming/outgoing
//! bookkeeping). A failure here means a construction bug, never a problem in
//! the compiled source program.

use std::fmt;

use crate::graph::instruction::InstructionKind;
use crate::graph::unit::FlowUnit;
use crate::ids::{InstructionId, PseudocodeId};

/// Errors that can occur during graph validation
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Graph was validated before post-processing ran
    NotPostProcessed { pseudocode: PseudocodeId },

    /// `SubroutineEnter` is not the first instruction in emission order
    EnterNotFirst { instruction: InstructionId },

    /// A landmark kind does not occur exactly the expected number of times
    LandmarkCountMismatch {
        pseudocode: PseudocodeId,
        kind: &'static str,
        expected: usize,
        found: usize,
    },

    /// An instruction appears in a pseudocode it does not belong to
    ForeignInstruction {
        instruction: InstructionId,
        owner: PseudocodeId,
        found_in: PseudocodeId,
    },

    /// An instruction still has unresolved outgoing-edge slots
    UnresolvedEdge { instruction: InstructionId },

    /// Outgoing and incoming edge bookkeeping disagree
    AsymmetricEdge {
        from: InstructionId,
        to: InstructionId,
        description: String,
    },

    /// A forced landmark (exit, error exit, sink) is missing from the
    /// reachable set
    LandmarkNotReachable { instruction: InstructionId },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::NotPostProcessed { pseudocode } => {
                write!(f, "{} validated before post-processing", pseudocode)
            }
            ValidationError::EnterNotFirst { instruction } => {
                write!(f, "SubroutineEnter {} is not the first instruction", instruction)
            }
            ValidationError::LandmarkCountMismatch { pseudocode, kind, expected, found } => {
                write!(
                    f,
                    "{} has {} {} instructions, expected {}",
                    pseudocode, found, kind, expected
                )
            }
            ValidationError::ForeignInstruction { instruction, owner, found_in } => {
                write!(f, "{} belongs to {} but appears in {}", instruction, owner, found_in)
            }
            ValidationError::UnresolvedEdge { instruction } => {
                write!(f, "{} has unresolved outgoing edges", instruction)
            }
            ValidationError::AsymmetricEdge { from, to, description } => {
                write!(f, "inconsistent edge from {} to {}: {}", from, to, description)
            }
            ValidationError::LandmarkNotReachable { instruction } => {
                write!(f, "forced landmark {} missing from the reachable set", instruction)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate one graph, returning the first violation found.
pub fn validate(unit: &FlowUnit, pseudocode: PseudocodeId) -> Result<(), ValidationError> {
    let p = unit.pseudocode(pseudocode);
    if !p.is_post_processed() {
        return Err(ValidationError::NotPostProcessed { pseudocode });
    }

    let mut enters = 0usize;
    let mut exits = 0usize;
    let mut error_exits = 0usize;
    let mut sinks = 0usize;
    for (position, &id) in p.instructions_including_dead().iter().enumerate() {
        let instruction = unit.instruction(id);
        if instruction.owner() != pseudocode {
            return Err(ValidationError::ForeignInstruction {
                instruction: id,
                owner: instruction.owner(),
                found_in: pseudocode,
            });
        }
        match &instruction.kind {
            InstructionKind::SubroutineEnter { .. } => {
                enters += 1;
                if position != 0 {
                    return Err(ValidationError::EnterNotFirst { instruction: id });
                }
            }
            InstructionKind::SubroutineExit { error: false, .. } => exits += 1,
            InstructionKind::SubroutineExit { error: true, .. } => error_exits += 1,
            InstructionKind::SubroutineSink => sinks += 1,
            _ => {}
        }
        if instruction.kind.has_unresolved_edges() {
            return Err(ValidationError::UnresolvedEdge { instruction: id });
        }
    }
    for (kind, found) in [
        ("SubroutineEnter", enters),
        ("SubroutineExit", exits),
        ("SubroutineErrorExit", error_exits),
        ("SubroutineSink", sinks),
    ] {
        if found != 1 {
            return Err(ValidationError::LandmarkCountMismatch {
                pseudocode,
                kind,
                expected: 1,
                found,
            });
        }
    }

    // Exits and the sink are forced into the reachable set even when no
    // path discovers them.
    for landmark in [p.exit_instruction(), p.error_instruction(), p.sink_instruction()] {
        if !p.reachable_instructions().contains(&landmark) {
            return Err(ValidationError::LandmarkNotReachable { instruction: landmark });
        }
    }

    // Edge symmetry: live instructions appear in their successors' incoming
    // sets, dead ones were detached, and no incoming entry is stale.
    for &id in p.instructions_including_dead() {
        let instruction = unit.instruction(id);
        if instruction.is_dead() {
            for successor in instruction.successors() {
                if unit.instruction(successor).incoming().contains(&id) {
                    return Err(ValidationError::AsymmetricEdge {
                        from: id,
                        to: successor,
                        description: "dead instruction still listed as predecessor".to_string(),
                    });
                }
            }
        } else {
            for successor in instruction.successors() {
                if !unit.instruction(successor).incoming().contains(&id) {
                    return Err(ValidationError::AsymmetricEdge {
                        from: id,
                        to: successor,
                        description: "successor doesn't list instruction as predecessor"
                            .to_string(),
                    });
                }
            }
            for &predecessor in instruction.incoming() {
                let pred = unit.instruction(predecessor);
                if pred.is_dead() || !pred.successors().contains(&id) {
                    return Err(ValidationError::AsymmetricEdge {
                        from: predecessor,
                        to: id,
                        description: "stale incoming edge".to_string(),
                    });
                }
            }
        }
    }

    Ok(())
}

/// Validate a graph and every nested local-function graph it declares.
pub fn validate_all(unit: &FlowUnit, root: PseudocodeId) -> Result<(), ValidationError> {
    validate(unit, root)?;
    for declaration in unit.local_declarations(root) {
        if let InstructionKind::LocalFunctionDeclaration { body, .. } =
            &unit.instruction(declaration).kind
        {
            validate(unit, *body)?;
        }
    }
    Ok(())
}
