//! Agent Models and Decision Scoring
//!
//! Each agent declares an action repertoire, legality trees gating those
//! actions, and a weighted set of reward trees. Decision scoring runs each
//! candidate action through a non-committal step of the world and ranks
//! candidates by accumulated expected reward. Enumerating candidate actions
//! in the first place is the caller's business.

use std::collections::{BTreeMap, BTreeSet};

use sim_model::{ActionSet, JointAction, LegalityTree, RewardTree, StateVector, VectorDistribution};

use crate::error::{EngineError, ModelError, StepError};
use crate::step;
use crate::world::World;

/// Declarative model of one agent.
#[derive(Debug, Clone, Default)]
pub struct AgentModel {
    name: String,
    actions: BTreeSet<ActionSet>,
    legal: BTreeMap<ActionSet, LegalityTree>,
    reward: Vec<(RewardTree, f64)>,
}

impl AgentModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds one action set to the repertoire.
    pub fn add_action(&mut self, actions: ActionSet) {
        self.actions.insert(actions);
    }

    /// Builder form of [`add_action`](Self::add_action).
    pub fn with_action(mut self, actions: ActionSet) -> Self {
        self.add_action(actions);
        self
    }

    pub fn actions(&self) -> impl Iterator<Item = &ActionSet> {
        self.actions.iter()
    }

    /// Gates an action behind a legality tree. Stored under the action's
    /// canonical root form.
    pub fn set_legal(&mut self, actions: &ActionSet, tree: LegalityTree) {
        self.legal.insert(actions.roots(), tree);
    }

    /// The legality tree for an action, if one was declared.
    pub fn legality(&self, actions: &ActionSet) -> Option<&LegalityTree> {
        self.legal.get(&actions.roots())
    }

    pub(crate) fn legality_entries(&self) -> impl Iterator<Item = (&ActionSet, &LegalityTree)> {
        self.legal.iter()
    }

    /// Adds one weighted reward term.
    pub fn add_reward(&mut self, tree: RewardTree, weight: f64) {
        self.reward.push((tree, weight));
    }

    /// Builder form of [`add_reward`](Self::add_reward).
    pub fn with_reward(mut self, tree: RewardTree, weight: f64) -> Self {
        self.add_reward(tree, weight);
        self
    }

    pub fn reward(&self) -> &[(RewardTree, f64)] {
        &self.reward
    }

    pub fn has_reward(&self) -> bool {
        !self.reward.is_empty()
    }

    /// Filters the repertoire down to the actions legal in the given vector.
    ///
    /// An action with no legality tree is always legal. A stochastic legality
    /// tree counts as legal when the weight on true leaves exceeds one half.
    pub fn legal_actions(&self, vector: &StateVector) -> Result<Vec<&ActionSet>, StepError> {
        let mut legal = Vec::new();
        for actions in &self.actions {
            match self.legality(actions) {
                None => legal.push(actions),
                Some(tree) => {
                    let outcomes = tree.outcomes(vector).map_err(|e| StepError::MissingKey {
                        key: e.0,
                        context: format!("legality of {}", actions),
                    })?;
                    let p_true: f64 = outcomes
                        .iter()
                        .filter(|(allowed, _)| **allowed)
                        .map(|(_, p)| p)
                        .sum();
                    if p_true > 0.5 {
                        legal.push(actions);
                    }
                }
            }
        }
        Ok(legal)
    }
}

/// Outcome of scoring candidate actions for one agent.
#[derive(Debug, Clone)]
pub struct Decision {
    /// The best-scoring candidate
    pub action: ActionSet,
    /// Every candidate with its accumulated expected reward, in input order
    pub scores: Vec<(ActionSet, f64)>,
}

impl World {
    /// An agent's reward in one concrete vector: the weighted sum of its
    /// reward trees.
    pub fn reward(&self, agent: &str, vector: &StateVector) -> Result<f64, EngineError> {
        let model = self
            .model()
            .agent(agent)
            .ok_or_else(|| ModelError::UndeclaredAgent(agent.to_string()))?;
        let mut total = 0.0;
        for (tree, weight) in model.reward() {
            let outcomes = tree.outcomes(vector).map_err(|e| StepError::MissingKey {
                key: e.0,
                context: format!("reward of {}", agent),
            })?;
            for (combo, p) in outcomes {
                let value = combo.evaluate(vector).map_err(|e| StepError::MissingKey {
                    key: e.0,
                    context: format!("reward of {}", agent),
                })?;
                total += weight * p * value;
            }
        }
        Ok(total)
    }

    /// An agent's expected reward across a distribution.
    pub fn expected_reward(
        &self,
        agent: &str,
        state: &VectorDistribution,
    ) -> Result<f64, EngineError> {
        let mut total = 0.0;
        for (vector, weight) in state.iter() {
            total += weight * self.reward(agent, vector)?;
        }
        Ok(total)
    }

    /// Scores candidate actions for an agent by accumulated expected reward
    /// over the configured decision horizon, without committing any state.
    ///
    /// The candidate is repeated at every horizon step. Ties break toward the
    /// earlier candidate. Returns `None` when there are no candidates.
    pub fn decide(
        &mut self,
        agent: &str,
        candidates: &[ActionSet],
    ) -> Result<Option<Decision>, EngineError> {
        if candidates.is_empty() {
            return Ok(None);
        }
        if self.model().agent(agent).is_none() {
            return Err(ModelError::UndeclaredAgent(agent.to_string()).into());
        }
        self.ensure_graph()?;

        let horizon = self.config().decision_horizon.max(1);
        let tolerance = self.config().probability_tolerance;
        let mut scores: Vec<(ActionSet, f64)> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let joint = JointAction::single(agent, candidate.clone());
            let mut dist = self.state().clone();
            let mut score = 0.0;
            for _ in 0..horizon {
                dist = step::advance(
                    self.model(),
                    self.generic_resolver(),
                    self.built_graph(),
                    &joint,
                    &dist,
                    None,
                    tolerance,
                )?;
                score += self.expected_reward(agent, &dist)?;
            }
            tracing::debug!("Scored candidate {} for {}: {}", candidate, agent, score);
            scores.push((candidate.clone(), score));
        }

        let mut best = 0;
        for (index, (_, score)) in scores.iter().enumerate() {
            if *score > scores[best].1 {
                best = index;
            }
        }
        Ok(Some(Decision {
            action: scores[best].0.clone(),
            scores,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_model::{Action, LinearCombo, Plane, StateKey, SymbolicTree};

    #[test]
    fn test_legal_actions_without_trees() {
        let agent = AgentModel::new("player1")
            .with_action(ActionSet::singleton(Action::new("player1", "wait")));
        let vector = StateVector::new();
        let legal = agent.legal_actions(&vector).expect("no trees to fail");
        assert_eq!(legal.len(), 1);
    }

    #[test]
    fn test_legality_tree_filters() {
        let resources = StateKey::entity("player1", "resources");
        let invade = ActionSet::singleton(
            Action::new("player1", "invade").with_target("alaska"),
        );
        let mut agent = AgentModel::new("player1").with_action(invade.clone());
        agent.set_legal(
            &invade,
            SymbolicTree::branch(
                Plane::greater(LinearCombo::of_key(resources.clone()), 0.0),
                SymbolicTree::leaf(true),
                SymbolicTree::leaf(false),
            ),
        );

        let broke = StateVector::new().with(resources.clone(), 0.0);
        assert!(agent.legal_actions(&broke).expect("eval").is_empty());

        let flush = StateVector::new().with(resources, 3.0);
        assert_eq!(agent.legal_actions(&flush).expect("eval").len(), 1);
    }

    #[test]
    fn test_legality_lookup_ignores_parameters() {
        let invade = ActionSet::singleton(
            Action::new("player1", "invade").with_target("alaska").with_amount(3),
        );
        let mut agent = AgentModel::new("player1");
        agent.set_legal(&invade, SymbolicTree::leaf(false));

        let other_amount = ActionSet::singleton(
            Action::new("player1", "invade").with_target("alaska").with_amount(7),
        );
        assert!(agent.legality(&other_amount).is_some());
    }

    #[test]
    fn test_legality_missing_key_is_fatal() {
        let missing = StateKey::entity("player1", "resources");
        let act = ActionSet::singleton(Action::new("player1", "invade"));
        let mut agent = AgentModel::new("player1").with_action(act.clone());
        agent.set_legal(
            &act,
            SymbolicTree::branch(
                Plane::greater(LinearCombo::of_key(missing), 0.0),
                SymbolicTree::leaf(true),
                SymbolicTree::leaf(false),
            ),
        );
        let err = agent.legal_actions(&StateVector::new()).unwrap_err();
        assert!(matches!(err, StepError::MissingKey { .. }));
    }
}
