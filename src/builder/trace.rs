//! Construction trace interface
//!
//! Tooling that wants a live view of construction (IDE indexers, debug
//! dumps) registers a trace with the builder and gets notified as graphs
//! and loop records are completed. The default [`NullTrace`] records
//! nothing.

use crate::graph::pseudocode::LoopInfo;
use crate::ids::{ElementId, PseudocodeId};

/// Sink for construction events
///
/// All methods have empty default bodies, so an implementation only
/// overrides what it cares about.
pub trait ConstructionTrace {
    /// A subroutine's graph finished construction.
    fn record_pseudocode(&mut self, element: ElementId, pseudocode: PseudocodeId) {
        let _ = (element, pseudocode);
    }

    /// A loop was entered and its labels allocated.
    fn record_loop_info(&mut self, info: &LoopInfo) {
        let _ = info;
    }
}

/// Trace that records nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTrace;

impl ConstructionTrace for NullTrace {}
