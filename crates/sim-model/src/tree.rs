//! Symbolic Decision Trees
//!
//! Piecewise-linear decision trees over state vectors. A tree maps a concrete
//! vector to a distribution over leaf payloads: branches compare a linear
//! combination of state variables against a threshold, stochastic nodes split
//! probability across subtrees, and leaves carry the payload.
//!
//! Dynamics trees carry a [`LinearCombo`] leaf (the next value of the target
//! variable), reward trees carry a scalar [`LinearCombo`], and legality trees
//! carry a `bool`.
//!
//! # Example
//!
//! ```
//! use sim_model::{LinearCombo, Plane, StateKey, StateVector, SymbolicTree};
//!
//! let occupants = StateKey::entity("alaska", "occupants");
//! // halve the garrison when it exceeds 10, otherwise leave it alone
//! let tree = SymbolicTree::branch(
//!     Plane::greater(LinearCombo::of_key(occupants.clone()), 10.0),
//!     SymbolicTree::leaf(LinearCombo::scale(occupants.clone(), 0.5)),
//!     SymbolicTree::leaf(LinearCombo::of_key(occupants.clone())),
//! );
//! let vector = StateVector::new().with(occupants, 16.0);
//! let outcomes = tree.outcomes(&vector).unwrap();
//! assert_eq!(outcomes.len(), 1);
//! assert_eq!(outcomes[0].0.evaluate(&vector).unwrap(), 8.0);
//! ```

use crate::key::StateKey;
use crate::vector::{MissingKeyError, StateVector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A linear combination of state variables plus a constant bias.
///
/// There is no constant pseudo-key: the bias term carries the constant
/// contribution, so the referenced-key set contains real variables only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearCombo {
    pub weights: BTreeMap<StateKey, f64>,
    pub bias: f64,
}

impl LinearCombo {
    /// A constant value, independent of state.
    pub fn constant(bias: f64) -> Self {
        Self {
            weights: BTreeMap::new(),
            bias,
        }
    }

    /// Copies the value of another variable.
    pub fn of_key(key: StateKey) -> Self {
        Self::constant(0.0).with_term(key, 1.0)
    }

    /// The variable's old value plus a constant delta.
    pub fn increment(key: StateKey, delta: f64) -> Self {
        Self::constant(delta).with_term(key, 1.0)
    }

    /// The variable's old value scaled by a constant factor.
    pub fn scale(key: StateKey, factor: f64) -> Self {
        Self::constant(0.0).with_term(key, factor)
    }

    /// Adds (or accumulates) a weighted term.
    pub fn with_term(mut self, key: StateKey, weight: f64) -> Self {
        *self.weights.entry(key).or_insert(0.0) += weight;
        self
    }

    pub fn with_bias(mut self, bias: f64) -> Self {
        self.bias = bias;
        self
    }

    /// Evaluates the combination against a concrete vector.
    pub fn evaluate(&self, vector: &StateVector) -> Result<f64, MissingKeyError> {
        let mut total = self.bias;
        for (key, weight) in &self.weights {
            total += vector.require(key)? * weight;
        }
        Ok(total)
    }

    pub fn keys(&self) -> impl Iterator<Item = &StateKey> {
        self.weights.keys()
    }
}

/// Comparison operator for branch tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Greater,
    Less,
    /// Exact equality; meant for integer-valued and symbol-valued features
    Equal,
}

/// A branch test: a linear combination compared against a threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub combo: LinearCombo,
    pub threshold: f64,
    pub comparison: Comparison,
}

impl Plane {
    pub fn greater(combo: LinearCombo, threshold: f64) -> Self {
        Self {
            combo,
            threshold,
            comparison: Comparison::Greater,
        }
    }

    pub fn less(combo: LinearCombo, threshold: f64) -> Self {
        Self {
            combo,
            threshold,
            comparison: Comparison::Less,
        }
    }

    /// Tests a single variable against an exact value.
    pub fn equals(key: StateKey, value: f64) -> Self {
        Self {
            combo: LinearCombo::of_key(key),
            threshold: value,
            comparison: Comparison::Equal,
        }
    }

    /// Evaluates the test against a concrete vector.
    pub fn test(&self, vector: &StateVector) -> Result<bool, MissingKeyError> {
        let value = self.combo.evaluate(vector)?;
        Ok(match self.comparison {
            Comparison::Greater => value > self.threshold,
            Comparison::Less => value < self.threshold,
            Comparison::Equal => value == self.threshold,
        })
    }
}

/// Leaf payloads that can report which state variables they read.
pub trait LeafKeys {
    fn referenced_keys(&self, out: &mut BTreeSet<StateKey>);
}

impl LeafKeys for LinearCombo {
    fn referenced_keys(&self, out: &mut BTreeSet<StateKey>) {
        out.extend(self.weights.keys().cloned());
    }
}

impl LeafKeys for bool {
    fn referenced_keys(&self, _out: &mut BTreeSet<StateKey>) {}
}

/// A decision-tree-valued function of a state vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SymbolicTree<L> {
    /// A single deterministic payload
    Leaf(L),
    /// A discrete distribution over subtrees; probabilities should sum to 1
    Stochastic(Vec<(SymbolicTree<L>, f64)>),
    /// A branch decided by a plane test
    Branch {
        plane: Plane,
        if_true: Box<SymbolicTree<L>>,
        if_false: Box<SymbolicTree<L>>,
    },
}

impl<L> SymbolicTree<L> {
    pub fn leaf(payload: L) -> Self {
        SymbolicTree::Leaf(payload)
    }

    pub fn branch(plane: Plane, if_true: Self, if_false: Self) -> Self {
        SymbolicTree::Branch {
            plane,
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        }
    }

    pub fn stochastic(outcomes: Vec<(Self, f64)>) -> Self {
        SymbolicTree::Stochastic(outcomes)
    }

    /// Convenience constructor for a distribution over leaf payloads.
    pub fn stochastic_leaves(outcomes: Vec<(L, f64)>) -> Self {
        SymbolicTree::Stochastic(
            outcomes
                .into_iter()
                .map(|(payload, p)| (SymbolicTree::Leaf(payload), p))
                .collect(),
        )
    }

    /// Walks the tree against a concrete vector and returns the distribution
    /// over leaf payloads it lands on.
    ///
    /// Branch tests consume the vector; stochastic nodes multiply path
    /// probabilities. A deterministic tree yields a single outcome with
    /// probability 1. A referenced key missing from the vector is an error,
    /// never a default.
    pub fn outcomes(&self, vector: &StateVector) -> Result<Vec<(&L, f64)>, MissingKeyError> {
        let mut out = Vec::new();
        self.collect_outcomes(vector, 1.0, &mut out)?;
        Ok(out)
    }

    fn collect_outcomes<'a>(
        &'a self,
        vector: &StateVector,
        probability: f64,
        out: &mut Vec<(&'a L, f64)>,
    ) -> Result<(), MissingKeyError> {
        match self {
            SymbolicTree::Leaf(payload) => {
                out.push((payload, probability));
                Ok(())
            }
            SymbolicTree::Stochastic(branches) => {
                for (subtree, p) in branches {
                    subtree.collect_outcomes(vector, probability * p, out)?;
                }
                Ok(())
            }
            SymbolicTree::Branch {
                plane,
                if_true,
                if_false,
            } => {
                let taken = if plane.test(vector)? {
                    if_true
                } else {
                    if_false
                };
                taken.collect_outcomes(vector, probability, out)
            }
        }
    }

    /// True when no stochastic node is reachable anywhere in the tree.
    pub fn is_deterministic(&self) -> bool {
        match self {
            SymbolicTree::Leaf(_) => true,
            SymbolicTree::Stochastic(branches) => branches.len() == 1
                && branches
                    .iter()
                    .all(|(subtree, _)| subtree.is_deterministic()),
            SymbolicTree::Branch {
                if_true, if_false, ..
            } => if_true.is_deterministic() && if_false.is_deterministic(),
        }
    }
}

impl<L: LeafKeys> SymbolicTree<L> {
    /// Every state variable read by any plane or leaf in the tree.
    pub fn keys_referenced(&self) -> BTreeSet<StateKey> {
        let mut out = BTreeSet::new();
        self.collect_keys(&mut out);
        out
    }

    fn collect_keys(&self, out: &mut BTreeSet<StateKey>) {
        match self {
            SymbolicTree::Leaf(payload) => payload.referenced_keys(out),
            SymbolicTree::Stochastic(branches) => {
                for (subtree, _) in branches {
                    subtree.collect_keys(out);
                }
            }
            SymbolicTree::Branch {
                plane,
                if_true,
                if_false,
            } => {
                out.extend(plane.combo.weights.keys().cloned());
                if_true.collect_keys(out);
                if_false.collect_keys(out);
            }
        }
    }
}

/// Tree describing how one action changes one state variable.
pub type DynamicsTree = SymbolicTree<LinearCombo>;

/// Tree yielding one weighted term of an agent's reward.
pub type RewardTree = SymbolicTree<LinearCombo>;

/// Tree deciding whether an action is currently legal.
pub type LegalityTree = SymbolicTree<bool>;
