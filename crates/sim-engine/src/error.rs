//! Engine Error Types
//!
//! Two fatal families: configuration errors raised while building the
//! dependency graph (the declarative model is malformed, setup must abort)
//! and evaluation errors raised while stepping (the evaluation order omitted
//! a true dependency). Weight drift is not an error; the stepping engine
//! renormalizes and logs instead.

use sim_model::{ActionSet, StateKey};
use thiserror::Error;

/// Fatal configuration errors raised at graph-construction time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// A tree references a state variable nobody declared
    #[error("graph has not accounted for key: {0}")]
    UnknownKey(StateKey),

    /// A dynamics or legality entry names an action no agent declared
    #[error("graph has not accounted for action: {0}")]
    UnknownAction(ActionSet),

    /// Layering stopped making progress; the listed nodes form or depend on
    /// a dependency cycle the pre/post split did not break
    #[error("dependency cycle: no level for {0:?}")]
    DependencyCycle(Vec<String>),

    /// An agent-scoped table entry names an agent that was never added
    #[error("no such agent: {0}")]
    UndeclaredAgent(String),

    /// A symbolic value was used without being interned first
    #[error("no such symbol: {0}")]
    UnknownSymbol(String),

    /// A variable was declared twice
    #[error("variable already defined: {0}")]
    DuplicateVariable(StateKey),
}

/// Fatal evaluation errors raised at step time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    /// A tree read a key absent from the working vector. This is an
    /// evaluation-order bug, never defaulted away.
    #[error("missing key {key} while evaluating {context}")]
    MissingKey { key: StateKey, context: String },

    /// Stepping an empty distribution
    #[error("cannot step an empty state distribution")]
    EmptyState,
}

/// Any failure surfaced by the world's public operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Step(#[from] StepError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_model::StateKey;

    #[test]
    fn test_error_messages_name_the_offender() {
        let err = ModelError::UnknownKey(StateKey::entity("alaska", "owner"));
        assert_eq!(err.to_string(), "graph has not accounted for key: alaska.owner");

        let err = StepError::MissingKey {
            key: StateKey::entity("alaska", "owner"),
            context: "alaska.occupants".to_string(),
        };
        assert!(err.to_string().contains("alaska.owner"));
        assert!(err.to_string().contains("alaska.occupants"));
    }

    #[test]
    fn test_engine_error_wraps_both_families() {
        let model: EngineError = ModelError::UndeclaredAgent("player9".into()).into();
        let step: EngineError = StepError::EmptyState.into();
        assert!(matches!(model, EngineError::Model(_)));
        assert!(matches!(step, EngineError::Step(_)));
    }
}
