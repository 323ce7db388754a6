//! Probabilistic State Distributions
//!
//! A [`VectorDistribution`] is a weighted set of alternative concrete state
//! vectors: the probabilistic world state. Weights sum to 1 and identical
//! vectors are merged by summing weight, so the support only grows when
//! genuinely distinct outcomes branch apart.

use crate::key::StateKey;
use crate::vector::StateVector;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Weighted set of alternative concrete state vectors.
///
/// The support preserves first-insertion order, which keeps sampling
/// deterministic for a fixed seed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorDistribution {
    support: Vec<(StateVector, f64)>,
}

impl VectorDistribution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a distribution concentrated on a single vector.
    pub fn certain(vector: StateVector) -> Self {
        Self {
            support: vec![(vector, 1.0)],
        }
    }

    /// Adds a weighted vector, merging with an identical existing vector.
    pub fn push(&mut self, vector: StateVector, weight: f64) {
        if let Some((_, w)) = self.support.iter_mut().find(|(v, _)| *v == vector) {
            *w += weight;
        } else {
            self.support.push((vector, weight));
        }
    }

    pub fn len(&self) -> usize {
        self.support.len()
    }

    pub fn is_empty(&self) -> bool {
        self.support.is_empty()
    }

    /// Iterates over `(vector, weight)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&StateVector, f64)> {
        self.support.iter().map(|(v, w)| (v, *w))
    }

    /// Returns the total weight across the support.
    pub fn sum_weight(&self) -> f64 {
        self.support.iter().map(|(_, w)| w).sum()
    }

    /// Collapses duplicate vectors by summing their weights, keeping
    /// first-seen order.
    pub fn merge_duplicates(&mut self) {
        if self.support.len() < 2 {
            return;
        }
        let mut seen: HashMap<StateVector, usize> = HashMap::with_capacity(self.support.len());
        let mut merged: Vec<(StateVector, f64)> = Vec::with_capacity(self.support.len());
        for (vector, weight) in self.support.drain(..) {
            if let Some(&index) = seen.get(&vector) {
                merged[index].1 += weight;
            } else {
                seen.insert(vector.clone(), merged.len());
                merged.push((vector, weight));
            }
        }
        self.support = merged;
    }

    /// Rescales weights to sum to 1. Returns the pre-normalization sum so the
    /// caller can judge drift. An all-zero distribution is left untouched.
    pub fn normalize(&mut self) -> f64 {
        let total = self.sum_weight();
        if total > 0.0 {
            for (_, w) in &mut self.support {
                *w /= total;
            }
        }
        total
    }

    /// Draws one vector at random, weighted by probability.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Option<&StateVector> {
        if self.support.is_empty() {
            return None;
        }
        let total = self.sum_weight();
        let draw: f64 = rng.gen::<f64>() * total;
        let mut cumulative = 0.0;
        for (vector, weight) in &self.support {
            cumulative += weight;
            if draw < cumulative {
                return Some(vector);
            }
        }
        // Float round-off can leave the draw past the last boundary
        self.support.last().map(|(v, _)| v)
    }

    /// Collapses the distribution to one sampled vector with weight 1.
    ///
    /// Returns the probability the chosen vector had, or `None` on an empty
    /// distribution.
    pub fn select<R: Rng>(&mut self, rng: &mut R) -> Option<f64> {
        let chosen = self.sample(rng)?.clone();
        let total = self.sum_weight();
        let weight = self
            .support
            .iter()
            .find(|(v, _)| *v == chosen)
            .map(|(_, w)| *w / total)?;
        self.support = vec![(chosen, 1.0)];
        Some(weight)
    }

    /// Expected value of one state variable across the support.
    ///
    /// Returns `None` if any support vector lacks the key.
    pub fn expectation(&self, key: &StateKey) -> Option<f64> {
        let mut total = 0.0;
        for (vector, weight) in &self.support {
            total += vector.get(key)? * weight;
        }
        Some(total)
    }

    /// Marginal distribution of one state variable: `(value, probability)`
    /// pairs with identical values merged, sorted by value.
    pub fn marginal(&self, key: &StateKey) -> Vec<(f64, f64)> {
        let mut outcomes: Vec<(f64, f64)> = Vec::new();
        for (vector, weight) in &self.support {
            let Some(value) = vector.get(key) else {
                continue;
            };
            if let Some((_, p)) = outcomes
                .iter_mut()
                .find(|(v, _)| v.to_bits() == value.to_bits())
            {
                *p += weight;
            } else {
                outcomes.push((value, *weight));
            }
        }
        outcomes.sort_by(|a, b| a.0.total_cmp(&b.0));
        outcomes
    }

    /// The single vector of a certain distribution, if there is exactly one.
    pub fn as_certain(&self) -> Option<&StateVector> {
        match self.support.as_slice() {
            [(vector, _)] => Some(vector),
            _ => None,
        }
    }
}

impl FromIterator<(StateVector, f64)> for VectorDistribution {
    fn from_iter<I: IntoIterator<Item = (StateVector, f64)>>(iter: I) -> Self {
        let mut dist = VectorDistribution::new();
        for (vector, weight) in iter {
            dist.push(vector, weight);
        }
        dist
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn key(name: &str) -> StateKey {
        StateKey::entity("region", name)
    }

    fn vector(value: f64) -> StateVector {
        StateVector::new().with(key("value"), value)
    }

    #[test]
    fn test_push_merges_identical_vectors() {
        let mut dist = VectorDistribution::new();
        dist.push(vector(1.0), 0.25);
        dist.push(vector(2.0), 0.5);
        dist.push(vector(1.0), 0.25);
        assert_eq!(dist.len(), 2);
        assert!((dist.sum_weight() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_merge_duplicates() {
        let mut dist = VectorDistribution {
            support: vec![
                (vector(1.0), 0.2),
                (vector(2.0), 0.3),
                (vector(1.0), 0.3),
                (vector(2.0), 0.2),
            ],
        };
        dist.merge_duplicates();
        assert_eq!(dist.len(), 2);
        let weights: Vec<f64> = dist.iter().map(|(_, w)| w).collect();
        assert!((weights[0] - 0.5).abs() < 1e-12);
        assert!((weights[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_normalize() {
        let mut dist = VectorDistribution::new();
        dist.push(vector(1.0), 0.2);
        dist.push(vector(2.0), 0.6);
        let before = dist.normalize();
        assert!((before - 0.8).abs() < 1e-12);
        assert!((dist.sum_weight() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_expectation_and_marginal() {
        let mut dist = VectorDistribution::new();
        dist.push(vector(1.0), 0.7);
        dist.push(vector(2.0), 0.3);
        let expected = dist.expectation(&key("value")).expect("expectation");
        assert!((expected - 1.3).abs() < 1e-12);

        let marginal = dist.marginal(&key("value"));
        assert_eq!(marginal.len(), 2);
        assert_eq!(marginal[0].0, 1.0);
        assert!((marginal[0].1 - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_select_collapses_to_one_vector() {
        let mut dist = VectorDistribution::new();
        dist.push(vector(1.0), 0.7);
        dist.push(vector(2.0), 0.3);
        let mut rng = SmallRng::seed_from_u64(7);
        let prob = dist.select(&mut rng).expect("non-empty");
        assert_eq!(dist.len(), 1);
        assert!((dist.sum_weight() - 1.0).abs() < 1e-12);
        assert!(prob == 0.7 || prob == 0.3);
    }

    #[test]
    fn test_sample_is_deterministic_for_fixed_seed() {
        let mut dist = VectorDistribution::new();
        dist.push(vector(1.0), 0.5);
        dist.push(vector(2.0), 0.5);

        let mut rng1 = SmallRng::seed_from_u64(42);
        let mut rng2 = SmallRng::seed_from_u64(42);
        let picks1: Vec<StateVector> =
            (0..20).map(|_| dist.sample(&mut rng1).unwrap().clone()).collect();
        let picks2: Vec<StateVector> =
            (0..20).map(|_| dist.sample(&mut rng2).unwrap().clone()).collect();
        assert_eq!(picks1, picks2);
    }
}
