//! Concrete State Vectors
//!
//! A [`StateVector`] is one fully-determined assignment of values to state
//! variables. Equality and hashing compare values bit for bit, so two vectors
//! that went through different arithmetic but landed on the same bits merge
//! as one outcome in a distribution.

use crate::key::StateKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Error raised when a referenced state variable is absent from a vector.
///
/// Evaluation never defaults a missing value; the caller decides whether this
/// is a configuration bug or an evaluation-order bug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingKeyError(pub StateKey);

impl fmt::Display for MissingKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state vector has no value for key '{}'", self.0)
    }
}

impl std::error::Error for MissingKeyError {}

/// A fully concrete assignment of values to state variables.
///
/// Enumerated features store the numeric index of their symbol; see the
/// engine's symbol table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateVector {
    values: BTreeMap<StateKey, f64>,
}

impl StateVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value of a variable, inserting it if absent.
    pub fn set(&mut self, key: StateKey, value: f64) {
        self.values.insert(key, value);
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, key: StateKey, value: f64) -> Self {
        self.set(key, value);
        self
    }

    /// Returns the value of a variable, if present.
    pub fn get(&self, key: &StateKey) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Returns the value of a variable, failing if it was never set.
    pub fn require(&self, key: &StateKey) -> Result<f64, MissingKeyError> {
        self.get(key).ok_or_else(|| MissingKeyError(key.clone()))
    }

    pub fn contains(&self, key: &StateKey) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&mut self, key: &StateKey) -> Option<f64> {
        self.values.remove(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&StateKey, f64)> {
        self.values.iter().map(|(k, v)| (k, *v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &StateKey> {
        self.values.keys()
    }
}

impl PartialEq for StateVector {
    fn eq(&self, other: &Self) -> bool {
        self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(other.values.iter())
                .all(|((ka, va), (kb, vb))| ka == kb && va.to_bits() == vb.to_bits())
    }
}

impl Eq for StateVector {}

impl Hash for StateVector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (key, value) in &self.values {
            key.hash(state);
            value.to_bits().hash(state);
        }
    }
}

impl fmt::Display for StateVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", key, value)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> StateKey {
        StateKey::entity("region", name)
    }

    #[test]
    fn test_set_and_get() {
        let mut vector = StateVector::new();
        vector.set(key("value"), 5.0);
        assert_eq!(vector.get(&key("value")), Some(5.0));
        assert_eq!(vector.get(&key("owner")), None);
        assert!(vector.require(&key("owner")).is_err());
    }

    #[test]
    fn test_equality_is_bitwise() {
        let a = StateVector::new().with(key("x"), 1.0).with(key("y"), 0.0);
        let b = StateVector::new().with(key("x"), 1.0).with(key("y"), 0.0);
        assert_eq!(a, b);

        // -0.0 == 0.0 numerically, but the bits differ
        let c = StateVector::new().with(key("x"), 1.0).with(key("y"), -0.0);
        assert_ne!(a, c);
    }

    #[test]
    fn test_differing_keys_are_unequal() {
        let a = StateVector::new().with(key("x"), 1.0);
        let b = StateVector::new().with(key("z"), 1.0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_agrees_with_eq() {
        use std::collections::HashSet;

        let a = StateVector::new().with(key("x"), 2.0);
        let b = StateVector::new().with(key("x"), 2.0);
        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }
}
