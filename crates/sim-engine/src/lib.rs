//! Decision-theoretic multiagent simulation engine.
//!
//! A world of agents holds a probabilistic state, agents act through
//! declared actions, and symbolic decision trees describe how actions
//! transform state. The engine's core is the dependency graph over state
//! variables, actions, and rewards: it derives a layered evaluation order
//! free of forward references, and the stepping engine applies dynamics
//! trees in that order to advance a distribution-valued state by one step.
//!
//! # Architecture
//!
//! ```text
//! declarative tables ──▶ dependency graph ──▶ evaluation order
//!        (world)              (graph)               │
//!           │                                       ▼
//!           └──────────▶ stepping engine ──▶ next distribution
//! ```
//!
//! # Modules
//!
//! - [`world`]: declarative tables, current state, lazy graph cache
//! - [`graph`]: dependency graph construction and layering
//! - [`agent`]: agent models, legality, decision scoring
//! - [`config`]: TOML-backed engine configuration
//! - [`error`]: the configuration/evaluation error taxonomy

pub mod agent;
pub mod config;
pub mod error;
pub mod graph;
mod step;
pub mod world;

// Re-export the primary surface
pub use agent::{AgentModel, Decision};
pub use config::{ConfigError, EngineConfig, TomlSerializeError};
pub use error::{EngineError, ModelError, StepError};
pub use graph::{DependencyGraph, GraphNode, NodeKey, NodeKind};
pub use world::{
    DynamicsEntry, DynamicsSelector, GenericDynamics, Prediction, VariableDefinition,
    VariableKind, World, WorldModel,
};
