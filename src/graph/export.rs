//! Serializable graph dumps
//!
//! Flat, id-based snapshots of a unit's graphs for tooling: test fixtures,
//! golden files, and external graph viewers. Dumps are plain data with no
//! back-references, so they serialize with serde without custom impls. A
//! dump taken before post-processing simply has empty edge and reachable
//! lists.

use serde::{Deserialize, Serialize};

use crate::graph::instruction::InstructionKind;
use crate::graph::pseudocode::SubroutineKind;
use crate::graph::unit::FlowUnit;
use crate::ids::PseudocodeId;

/// Snapshot of every pseudocode in a unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitDump {
    pub pseudocodes: Vec<PseudocodeDump>,
}

/// Snapshot of one pseudocode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PseudocodeDump {
    pub id: u32,
    pub element: u32,
    pub kind: String,
    pub parent: Option<u32>,
    pub post_processed: bool,
    pub instructions: Vec<InstructionDump>,
    pub reachable: Vec<u32>,
    pub labels: Vec<LabelDump>,
}

/// Snapshot of one instruction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionDump {
    pub id: u32,
    pub element: u32,
    pub kind: String,
    pub dead: bool,
    pub successors: Vec<u32>,
    pub incoming: Vec<u32>,
    /// Nested pseudocode for `LocalFunctionDeclaration` instructions
    pub body: Option<u32>,
}

/// Snapshot of one label
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelDump {
    pub id: u32,
    pub name: String,
    pub position: Option<u32>,
}

/// Dump every pseudocode of the unit in creation order.
pub fn dump_unit(unit: &FlowUnit) -> UnitDump {
    UnitDump {
        pseudocodes: unit
            .pseudocodes()
            .map(|p| dump_pseudocode(unit, p.id))
            .collect(),
    }
}

/// Dump a single pseudocode.
pub fn dump_pseudocode(unit: &FlowUnit, pseudocode: PseudocodeId) -> PseudocodeDump {
    let p = unit.pseudocode(pseudocode);
    let instructions = p
        .instructions_including_dead()
        .iter()
        .map(|&id| {
            let instruction = unit.instruction(id);
            let body = match &instruction.kind {
                InstructionKind::LocalFunctionDeclaration { body, .. } => Some(body.as_raw()),
                _ => None,
            };
            InstructionDump {
                id: id.as_raw(),
                element: instruction.element.as_raw(),
                kind: instruction.kind.kind_name().to_string(),
                dead: instruction.is_dead(),
                successors: instruction.successors().iter().map(|s| s.as_raw()).collect(),
                incoming: instruction.incoming().iter().map(|i| i.as_raw()).collect(),
                body,
            }
        })
        .collect();
    let labels = p
        .labels()
        .iter()
        .map(|&id| {
            let label = unit.label(id);
            LabelDump {
                id: id.as_raw(),
                name: label.name(),
                position: label.bound_position(),
            }
        })
        .collect();
    PseudocodeDump {
        id: p.id.as_raw(),
        element: p.element.as_raw(),
        kind: match p.kind {
            SubroutineKind::Function => "Function".to_string(),
            SubroutineKind::Lambda => "Lambda".to_string(),
        },
        parent: p.parent().map(|parent| parent.as_raw()),
        post_processed: p.is_post_processed(),
        instructions,
        reachable: p.reachable.iter().map(|id| id.as_raw()).collect(),
        labels,
    }
}

/// Serialize the unit's graphs to a JSON string.
pub fn to_json(unit: &FlowUnit) -> serde_json::Result<String> {
    serde_json::to_string(&dump_unit(unit))
}

/// Serialize the unit's graphs to human-readable JSON.
pub fn to_json_pretty(unit: &FlowUnit) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&dump_unit(unit))
}
