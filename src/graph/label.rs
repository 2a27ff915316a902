//! Jump labels
//!
//! Labels are created unbound while the target position is still unknown and
//! later bound to the position of the next instruction added to their owning
//! pseudocode. A bound position never changes; resolution to a concrete
//! instruction happens in the post-processing pass.

use std::fmt;

use crate::ids::{LabelId, PseudocodeId};

/// A named, initially-unbound placeholder for a future instruction position
///
/// The label's name is a synthetic monotonically increasing discriminator
/// (`L<n>`, where `n` is the label's arena index) plus an optional
/// human-readable hint. Hints are debug-only and never semantically
/// significant; a copy produced by segment repetition shares only the hint.
#[derive(Debug, Clone)]
pub struct Label {
    /// Unique identifier of this label (doubles as its numeric discriminator)
    pub id: LabelId,

    /// Pseudocode this label was created in
    pub owner: PseudocodeId,

    /// Optional human-readable hint, debug-only
    pub hint: Option<String>,

    /// Position in the owner's emission order, set exactly once by `bind`
    pub(crate) bound: Option<u32>,
}

impl Label {
    pub(crate) fn new(id: LabelId, owner: PseudocodeId, hint: Option<&str>) -> Self {
        Self {
            id,
            owner,
            hint: hint.map(str::to_owned),
            bound: None,
        }
    }

    /// Check whether this label has been bound to a position
    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    /// Get the bound position in the owner's emission order, if any
    pub fn bound_position(&self) -> Option<u32> {
        self.bound
    }

    /// Bind this label to a position in the owner's emission order.
    ///
    /// Binding an already-bound label is a construction-protocol violation.
    pub(crate) fn bind(&mut self, position: u32) {
        if let Some(previous) = self.bound {
            panic!(
                "label {} already bound to position {}, rebinding to {}",
                self, previous, position
            );
        }
        self.bound = Some(position);
    }

    /// The synthetic label name, e.g. `L3`
    pub fn name(&self) -> String {
        format!("L{}", self.id.as_raw())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hint {
            Some(hint) => write!(f, "L{} [{}]", self.id.as_raw(), hint),
            None => write!(f, "L{}", self.id.as_raw()),
        }
    }
}
