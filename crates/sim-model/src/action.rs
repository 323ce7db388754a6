//! Actions and Joint Actions
//!
//! An [`Action`] is one atomic choice by one agent: an actor, a verb, an
//! optional target entity, and an optional numeric parameter. The parameter
//! never participates in identity for dependency purposes; [`Action::root`]
//! strips it to the canonical atomic form the graph keys its action nodes by.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One atomic choice by an agent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Action {
    pub actor: String,
    pub verb: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
}

impl Action {
    pub fn new(actor: impl Into<String>, verb: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            verb: verb.into(),
            target: None,
            amount: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_amount(mut self, amount: i64) -> Self {
        self.amount = Some(amount);
        self
    }

    /// Canonical atomic form: the same action with parameters stripped.
    ///
    /// Parameterized variants of one action (different amounts, say) all
    /// reduce to the same root and share one graph node.
    pub fn root(&self) -> Action {
        Action {
            actor: self.actor.clone(),
            verb: self.verb.clone(),
            target: self.target.clone(),
            amount: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.amount.is_none()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.actor, self.verb)?;
        if let Some(target) = &self.target {
            write!(f, "-{}", target)?;
        }
        if let Some(amount) = self.amount {
            write!(f, "-{}", amount)?;
        }
        Ok(())
    }
}

/// The set of atomic actions one agent performs simultaneously.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActionSet(BTreeSet<Action>);

impl ActionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set containing a single atom.
    pub fn singleton(action: Action) -> Self {
        Self(BTreeSet::from([action]))
    }

    pub fn insert(&mut self, action: Action) {
        self.0.insert(action);
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, action: Action) -> Self {
        self.insert(action);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, action: &Action) -> bool {
        self.0.contains(action)
    }

    /// Canonical root form of the whole set: every atom reduced by
    /// [`Action::root`]. Distinct parameterized sets can collapse onto the
    /// same root set.
    pub fn roots(&self) -> ActionSet {
        self.0.iter().map(Action::root).collect()
    }
}

impl FromIterator<Action> for ActionSet {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ActionSet {
    type Item = &'a Action;
    type IntoIter = std::collections::btree_set::Iter<'a, Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for ActionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, action) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", action)?;
        }
        write!(f, "}}")
    }
}

/// One action choice per agent for a single step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JointAction(BTreeMap<String, ActionSet>);

impl JointAction {
    pub fn new() -> Self {
        Self::default()
    }

    /// A joint action in which a single agent acts.
    pub fn single(agent: impl Into<String>, actions: ActionSet) -> Self {
        let mut joint = Self::new();
        joint.insert(agent, actions);
        joint
    }

    pub fn insert(&mut self, agent: impl Into<String>, actions: ActionSet) {
        self.0.insert(agent.into(), actions);
    }

    pub fn get(&self, agent: &str) -> Option<&ActionSet> {
        self.0.get(agent)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ActionSet)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(ActionSet::is_empty)
    }

    /// Flattens to every atomic action across all agents.
    pub fn atoms(&self) -> impl Iterator<Item = &Action> {
        self.0.values().flat_map(ActionSet::iter)
    }

    /// Canonical roots of every atom across all agents, deduplicated.
    pub fn roots(&self) -> BTreeSet<Action> {
        self.atoms().map(Action::root).collect()
    }
}

impl FromIterator<(String, ActionSet)> for JointAction {
    fn from_iter<I: IntoIterator<Item = (String, ActionSet)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_strips_amount_only() {
        let action = Action::new("player1", "allocate")
            .with_target("alaska")
            .with_amount(5);
        let root = action.root();
        assert_eq!(root.actor, "player1");
        assert_eq!(root.verb, "allocate");
        assert_eq!(root.target.as_deref(), Some("alaska"));
        assert_eq!(root.amount, None);
        assert!(root.is_root());
    }

    #[test]
    fn test_parameterized_variants_share_a_root() {
        let a = Action::new("player1", "allocate").with_target("alaska").with_amount(2);
        let b = Action::new("player1", "allocate").with_target("alaska").with_amount(7);
        assert_ne!(a, b);
        assert_eq!(a.root(), b.root());
    }

    #[test]
    fn test_action_set_roots_collapse() {
        let set = ActionSet::new()
            .with(Action::new("player1", "allocate").with_target("alaska").with_amount(2))
            .with(Action::new("player1", "allocate").with_target("alaska").with_amount(3))
            .with(Action::new("player1", "allocate").with_target("siberia").with_amount(1));
        let roots = set.roots();
        assert_eq!(set.len(), 3);
        assert_eq!(roots.len(), 2);
    }

    #[test]
    fn test_joint_action_atoms_and_roots() {
        let joint: JointAction = [
            (
                "player1".to_string(),
                ActionSet::singleton(
                    Action::new("player1", "allocate").with_target("alaska").with_amount(4),
                ),
            ),
            (
                "player2".to_string(),
                ActionSet::singleton(
                    Action::new("player2", "allocate").with_target("alaska").with_amount(4),
                ),
            ),
        ]
        .into_iter()
        .collect();

        assert_eq!(joint.atoms().count(), 2);
        // Same verb and target, different actors: the roots stay distinct
        assert_eq!(joint.roots().len(), 2);
    }

    #[test]
    fn test_display() {
        let action = Action::new("player1", "allocate").with_target("alaska").with_amount(5);
        assert_eq!(action.to_string(), "player1-allocate-alaska-5");
    }
}
