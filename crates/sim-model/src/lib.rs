//! Shared model types for the decision engine.
//!
//! This crate contains pure data structures with no simulation logic:
//! state-variable keys, concrete state vectors, probabilistic state
//! distributions, symbolic decision trees, and actions. It is a dependency
//! for the engine crate.

pub mod action;
pub mod distribution;
pub mod key;
pub mod tree;
pub mod vector;

// Re-export key types
pub use key::{KeyScope, ParseKeyError, StateKey, Tag};

// Re-export vector and distribution types
pub use distribution::VectorDistribution;
pub use vector::{MissingKeyError, StateVector};

// Re-export tree types
pub use tree::{
    Comparison, DynamicsTree, LeafKeys, LegalityTree, LinearCombo, Plane, RewardTree,
    SymbolicTree,
};

// Re-export action types
pub use action::{Action, ActionSet, JointAction};
