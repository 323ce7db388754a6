//! Stepping Engine
//!
//! Advances a probabilistic state by one step: every support vector walks the
//! graph's evaluation order, each variable's applicable dynamics trees are
//! evaluated against the working vector, stochastic outcomes branch the
//! vector with multiplied weights, and bit-identical results merge back
//! together at the end. The engine is a pure function of its inputs and owns
//! no state of its own.

use std::collections::BTreeSet;

use sim_model::{JointAction, StateKey, StateVector, VectorDistribution};

use crate::error::StepError;
use crate::graph::{DependencyGraph, NodeKey};
use crate::world::{GenericDynamics, WorldModel};

/// Applies one step of dynamics to a distribution.
///
/// `restrict`, when given, limits evaluation to those keys (closed over their
/// post-state ancestors); everything else keeps its old value. Weights are
/// renormalized before returning; drift beyond `tolerance` is logged.
pub(crate) fn advance(
    model: &WorldModel,
    generic: Option<&dyn GenericDynamics>,
    graph: &DependencyGraph,
    actions: &JointAction,
    state: &VectorDistribution,
    restrict: Option<&BTreeSet<StateKey>>,
    tolerance: f64,
) -> Result<VectorDistribution, StepError> {
    if state.is_empty() {
        return Err(StepError::EmptyState);
    }
    let scope = restrict.map(|requested| close_restriction(graph, requested));

    let mut next = VectorDistribution::new();
    let mut branch_count = 0usize;
    for (vector, weight) in state.iter() {
        let mut frontier: Vec<(StateVector, f64)> = vec![(vector.clone(), weight)];
        for layer in graph.evaluation() {
            for key in layer {
                if let Some(scope) = &scope {
                    if !scope.contains(key) {
                        continue;
                    }
                }
                frontier = apply_key(model, generic, key, actions, frontier)?;
            }
        }
        branch_count += frontier.len();
        for (candidate, candidate_weight) in frontier {
            next.push(candidate, candidate_weight);
        }
    }

    if next.len() < branch_count {
        tracing::trace!(
            "Merged {} outcome vectors down to {}",
            branch_count,
            next.len()
        );
    }
    let total = next.normalize();
    let drift = (total - 1.0).abs();
    if drift > tolerance {
        tracing::warn!("Renormalized step output weights, drift was {}", drift);
    }
    Ok(next)
}

/// Updates one key across a set of weighted working vectors, branching on
/// stochastic outcomes.
fn apply_key(
    model: &WorldModel,
    generic: Option<&dyn GenericDynamics>,
    key: &StateKey,
    actions: &JointAction,
    frontier: Vec<(StateVector, f64)>,
) -> Result<Vec<(StateVector, f64)>, StepError> {
    let post = key.to_post();
    let mut advanced = Vec::with_capacity(frontier.len());
    for (vector, weight) in frontier {
        let trees = model.dynamics_for(&post, actions, &vector, generic);
        if trees.is_empty() {
            // No applicable dynamics: the value carries over unchanged
            advanced.push((vector, weight));
            continue;
        }
        // Several applicable trees compose sequentially; later trees observe
        // the value written by earlier ones
        let mut partial = vec![(vector, weight)];
        for tree in &trees {
            let mut branched = Vec::with_capacity(partial.len());
            for (working, working_weight) in partial {
                let outcomes =
                    tree.outcomes(&working)
                        .map_err(|e| StepError::MissingKey {
                            key: e.0,
                            context: key.to_string(),
                        })?;
                for (combo, probability) in outcomes {
                    let value = combo.evaluate(&working).map_err(|e| StepError::MissingKey {
                        key: e.0,
                        context: key.to_string(),
                    })?;
                    let mut candidate = working.clone();
                    candidate.set(key.clone(), value);
                    branched.push((candidate, working_weight * probability));
                }
            }
            partial = branched;
        }
        advanced.extend(partial);
    }
    Ok(advanced)
}

/// Expands a requested key set with the post-state ancestors of each key, so
/// a restricted evaluation never reads a stale dependency.
fn close_restriction(graph: &DependencyGraph, requested: &BTreeSet<StateKey>) -> BTreeSet<StateKey> {
    let mut scope = BTreeSet::new();
    for key in requested {
        let present = key.to_pre();
        if let Some(node) = graph.node(&NodeKey::State(present.to_post())) {
            for ancestor in &node.ancestors {
                if let NodeKey::State(candidate) = ancestor {
                    if candidate.is_post() {
                        scope.insert(candidate.to_pre());
                    }
                }
            }
        }
        scope.insert(present);
    }
    scope
}
