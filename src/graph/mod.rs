//! Flow Graph Construction
//!
//! This module holds the instruction-level control flow graph ("pseudocode")
//! data model and the passes that turn a freshly emitted instruction list
//! into a finished graph.
//!
//! Architecture:
//! ```,ignore
//! driver events → ControlFlowBuilder → emission order + bound labels
//!                                    → post-processing → edges + reachability + dead marks
//! ```
//!
//! Instructions are emitted append-only into per-subroutine [`Pseudocode`]
//! lists owned by a [`FlowUnit`] arena; jumps name [`Label`]s that may bind
//! to positions not emitted yet. Post-processing resolves every label to a
//! concrete instruction, wires sequential edges, computes reachability, and
//! marks dead instructions. Until then no instruction has outgoing edges.

use std::fmt;

// Re-export all graph types for convenience
pub use self::export::*;
pub use self::instruction::*;
pub use self::label::*;
pub use self::pseudocode::*;
pub use self::unit::*;
pub use self::validate::*;

pub mod export;
pub mod instruction;
pub mod label;
pub mod pseudocode;
pub (crate) mod postprocess;
pub (crate) mod repeat;
pub mod unit;
pub mod validate;

/// Options controlling graph construction behavior
#[derive(Debug, Clone)]
pub struct BuilderOptions {
    /// Whether to collect detailed statistics for profiling
    pub collect_statistics: bool,

    /// Whether to run structural validation on every graph at the end of
    /// post-processing
    pub validate_graphs: bool,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            collect_statistics: false,
            validate_graphs: false, // Validation is for tests and debugging
        }
    }
}

/// Performance statistics for flow graph construction
#[derive(Debug, Clone, Default)]
pub struct ConstructionStats {
    /// Number of pseudocodes built (one per subroutine body, lambdas included)
    pub pseudocodes_built: usize,

    /// Total number of instructions emitted, copies included
    pub instructions_emitted: usize,

    /// Total number of labels created
    pub labels_created: usize,

    /// Number of out-jumps that had finally-block triggers spliced in front
    pub finally_splices: usize,

    /// Number of instructions produced by segment repetition
    pub instructions_copied: usize,

    /// Number of instructions marked dead during post-processing
    pub dead_instructions: usize,

    /// Time spent on post-processing (microseconds)
    pub postprocess_time_us: u64,
}

impl ConstructionStats {
    /// Create new empty statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge statistics from multiple compilation units
    pub fn merge(&mut self, other: &ConstructionStats) {
        self.pseudocodes_built += other.pseudocodes_built;
        self.instructions_emitted += other.instructions_emitted;
        self.labels_created += other.labels_created;
        self.finally_splices += other.finally_splices;
        self.instructions_copied += other.instructions_copied;
        self.dead_instructions += other.dead_instructions;
        self.postprocess_time_us += other.postprocess_time_us;
    }

    /// Get average instructions per pseudocode
    pub fn avg_instructions_per_pseudocode(&self) -> f64 {
        if self.pseudocodes_built == 0 {
            0.0
        } else {
            self.instructions_emitted as f64 / self.pseudocodes_built as f64
        }
    }
}

impl fmt::Display for ConstructionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pseudocodes, {} instructions ({} copied, {} dead), {} labels, {} splices, post-processed in {}us",
            self.pseudocodes_built,
            self.instructions_emitted,
            self.instructions_copied,
            self.dead_instructions,
            self.labels_created,
            self.finally_splices,
            self.postprocess_time_us
        )
    }
}
