//! Core ID Types for the Flow Graph System
//!
//! This module provides type-safe, efficient identifier types used throughout
//! the control-flow graph layer. Each ID type is a lightweight wrapper around
//! u32 that prevents mixing up different kinds of identifiers. Graph-entity
//! IDs (instructions, labels, pseudocodes) are arena indices allocated by the
//! owning [`FlowUnit`](crate::graph::FlowUnit); there are no global counters.

use std::fmt;

/// Macro to define ID types with consistent behavior
macro_rules! define_id_type {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Create a new ID from a raw u32 value
            pub const fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            /// Get the raw u32 value of this ID
            pub const fn as_raw(self) -> u32 {
                self.0
            }

            /// Get this ID as an arena index
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            /// Check if this ID is valid (not the sentinel value)
            pub const fn is_valid(self) -> bool {
                self.0 != u32::MAX
            }

            /// Get an invalid/null sentinel value
            pub const fn invalid() -> Self {
                Self(u32::MAX)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::invalid()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_valid() {
                    write!(f, "{}({})", stringify!($name), self.0)
                } else {
                    write!(f, "{}(<invalid>)", stringify!($name))
                }
            }
        }

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                Self::from_raw(raw)
            }
        }

        impl From<$name> for u32 {
            fn from(id: $name) -> u32 {
                id.as_raw()
            }
        }
    };
}

define_id_type! {
    /// Unique identifier for instructions within a flow unit
    ///
    /// Indexes the unit-wide instruction arena. Edges between instructions
    /// are stored as `InstructionId` values, so back-edges and cross-graph
    /// edges are ordinary data.
    InstructionId
}

define_id_type! {
    /// Unique identifier for jump labels within a flow unit
    ///
    /// Labels are created unbound and later bound to a position in their
    /// owning pseudocode's emission order.
    LabelId
}

define_id_type! {
    /// Unique identifier for pseudocodes (per-body instruction graphs)
    PseudocodeId
}

define_id_type! {
    /// Opaque handle to a source element (expression, statement, declaration)
    ///
    /// Supplied by the tree-walking driver and never interpreted here;
    /// elements are compared only by identity.
    ElementId
}

define_id_type! {
    /// Opaque handle to a pre-built abstract value
    ///
    /// Values flow through instruction inputs/outputs; this layer records
    /// them without inspecting them.
    ValueId
}

define_id_type! {
    /// Identifier for a copy-lineage group (an instruction plus every
    /// segment-repetition copy of it)
    LineageId
}
