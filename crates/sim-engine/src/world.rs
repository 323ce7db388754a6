//! World Model
//!
//! The declarative description of a scenario: state variables with their
//! kinds, binary relations, agents, dynamics, and termination conditions,
//! plus the current probabilistic state. The dependency graph derived from
//! these tables is built lazily, cached, and thrown away whole whenever any
//! structural table changes.

use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use sim_model::{
    ActionSet, DynamicsTree, JointAction, LegalityTree, RewardTree, StateKey, StateVector,
    VectorDistribution,
};

use crate::agent::AgentModel;
use crate::config::EngineConfig;
use crate::error::{EngineError, ModelError, StepError};
use crate::graph::DependencyGraph;
use crate::step;

/// Declared kind of a state variable, resolved once at declaration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VariableKind {
    /// A bounded numeric value
    Numeric { lo: f64, hi: f64 },
    /// A flag stored as 0 or 1
    Boolean,
    /// One of a fixed set of symbols, stored as the symbol's index
    Enumerated(Vec<String>),
}

impl VariableKind {
    pub fn numeric(lo: f64, hi: f64) -> Self {
        VariableKind::Numeric { lo, hi }
    }

    pub fn enumerated<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        VariableKind::Enumerated(values.into_iter().map(Into::into).collect())
    }
}

/// Declaration record for one state variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDefinition {
    pub kind: VariableKind,
}

/// Which chosen actions a declared dynamics tree applies to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum DynamicsSelector {
    /// Applies when no action-specific entry matched
    AnyAction,
    /// Applies when every atom root in the set is part of the joint action
    Action(ActionSet),
}

/// Dynamics declaration for one post-tagged state variable.
#[derive(Debug, Clone)]
pub enum DynamicsEntry {
    /// The boolean sentinel: no declared structural dependencies; the key is
    /// resolved by the generic fallback, or carried over unchanged
    Generic,
    /// Declared trees selected by action
    Tabular(BTreeMap<DynamicsSelector, DynamicsTree>),
}

/// Caller-supplied fallback for keys declared with generic dynamics.
///
/// Invoked at step time with the present-tagged key, the chosen actions, and
/// the working vector. Returning no trees means the key keeps its value.
pub trait GenericDynamics {
    fn resolve(
        &self,
        key: &StateKey,
        actions: &JointAction,
        vector: &StateVector,
    ) -> Vec<DynamicsTree>;
}

/// Explicit two-state cache around the dependency graph: built or stale.
#[derive(Debug, Default)]
struct GraphCache {
    built: Option<DependencyGraph>,
}

impl GraphCache {
    fn invalidate(&mut self) {
        if self.built.take().is_some() {
            tracing::trace!("Dependency graph cache invalidated");
        }
    }

    fn ensure_built(&mut self, model: &WorldModel) -> Result<&DependencyGraph, ModelError> {
        if self.built.is_none() {
            self.built = Some(DependencyGraph::build(model)?);
        }
        // Populated just above; the closure never runs
        Ok(self.built.get_or_insert_with(DependencyGraph::default))
    }

    fn get(&self) -> Option<&DependencyGraph> {
        self.built.as_ref()
    }
}

/// The declarative tables the dependency graph is built from.
///
/// Unary variables and relations are keyed by their pre-tagged keys; the
/// dynamics table is keyed by post-tagged keys.
#[derive(Debug, Clone, Default)]
pub struct WorldModel {
    variables: BTreeMap<StateKey, VariableDefinition>,
    relations: BTreeMap<StateKey, VariableDefinition>,
    agents: BTreeMap<String, AgentModel>,
    dynamics: BTreeMap<StateKey, DynamicsEntry>,
    dependencies: BTreeMap<StateKey, BTreeSet<StateKey>>,
    termination: Vec<LegalityTree>,
    symbols: Vec<String>,
}

impl WorldModel {
    pub fn variables(&self) -> impl Iterator<Item = (&StateKey, &VariableDefinition)> {
        self.variables.iter()
    }

    pub fn relations(&self) -> impl Iterator<Item = (&StateKey, &VariableDefinition)> {
        self.relations.iter()
    }

    pub fn agents(&self) -> impl Iterator<Item = (&String, &AgentModel)> {
        self.agents.iter()
    }

    pub fn agent(&self, name: &str) -> Option<&AgentModel> {
        self.agents.get(name)
    }

    pub fn dynamics(&self) -> impl Iterator<Item = (&StateKey, &DynamicsEntry)> {
        self.dynamics.iter()
    }

    pub fn dependencies(&self) -> impl Iterator<Item = (&StateKey, &BTreeSet<StateKey>)> {
        self.dependencies.iter()
    }

    fn is_declared(&self, key: &StateKey) -> bool {
        let pre = key.to_pre();
        self.variables.contains_key(&pre) || self.relations.contains_key(&pre)
    }

    /// The dynamics trees applicable to one post-tagged key under the chosen
    /// actions. Action-specific entries win; the any-action entry applies
    /// only when nothing matched; generic keys go through the fallback hook.
    pub(crate) fn dynamics_for(
        &self,
        post_key: &StateKey,
        actions: &JointAction,
        vector: &StateVector,
        generic: Option<&dyn GenericDynamics>,
    ) -> Vec<DynamicsTree> {
        match self.dynamics.get(post_key) {
            None => Vec::new(),
            Some(DynamicsEntry::Generic) => match generic {
                Some(hook) => hook.resolve(&post_key.to_pre(), actions, vector),
                None => Vec::new(),
            },
            Some(DynamicsEntry::Tabular(table)) => {
                let roots = actions.roots();
                let mut trees: Vec<DynamicsTree> = table
                    .iter()
                    .filter_map(|(selector, tree)| match selector {
                        DynamicsSelector::Action(set) => {
                            let applies =
                                !set.is_empty() && set.iter().all(|atom| roots.contains(atom));
                            applies.then(|| tree.clone())
                        }
                        DynamicsSelector::AnyAction => None,
                    })
                    .collect();
                if trees.is_empty() {
                    if let Some(tree) = table.get(&DynamicsSelector::AnyAction) {
                        trees.push(tree.clone());
                    }
                }
                trees
            }
        }
    }
}

/// Per-object forecast of a restricted step.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    /// The entity the prediction is about
    pub object: String,
    /// Marginal distribution of each of the object's post-step features
    pub outcomes: BTreeMap<String, Vec<(f64, f64)>>,
}

/// A scenario: declarative tables, current probabilistic state, and the
/// cached dependency graph.
pub struct World {
    model: WorldModel,
    cache: GraphCache,
    state: VectorDistribution,
    config: EngineConfig,
    rng: SmallRng,
    generic: Option<Box<dyn GenericDynamics>>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Self {
            model: WorldModel::default(),
            cache: GraphCache::default(),
            state: VectorDistribution::certain(StateVector::new()),
            config,
            rng,
            generic: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn model(&self) -> &WorldModel {
        &self.model
    }

    pub(crate) fn generic_resolver(&self) -> Option<&dyn GenericDynamics> {
        self.generic.as_deref()
    }

    /// Installs the fallback used for keys declared with generic dynamics.
    pub fn set_generic_resolver(&mut self, resolver: Box<dyn GenericDynamics>) {
        self.generic = Some(resolver);
    }

    // ---- declarations -------------------------------------------------

    /// Declares a state variable of a named entity. Every support vector
    /// gains the variable at its kind's default value.
    pub fn define_variable(
        &mut self,
        entity: impl Into<String>,
        feature: impl Into<String>,
        kind: VariableKind,
    ) -> Result<StateKey, EngineError> {
        let key = StateKey::entity(entity, feature);
        self.declare_unary(key.clone(), kind)?;
        Ok(key)
    }

    /// Declares a global world variable.
    pub fn define_world_variable(
        &mut self,
        feature: impl Into<String>,
        kind: VariableKind,
    ) -> Result<StateKey, EngineError> {
        let key = StateKey::world(feature);
        self.declare_unary(key.clone(), kind)?;
        Ok(key)
    }

    fn declare_unary(&mut self, key: StateKey, kind: VariableKind) -> Result<(), EngineError> {
        if self.model.variables.contains_key(&key) {
            return Err(ModelError::DuplicateVariable(key).into());
        }
        let default = self.default_value(&kind);
        self.model
            .variables
            .insert(key.clone(), VariableDefinition { kind });
        self.initialize_state_key(&key, default);
        self.cache.invalidate();
        Ok(())
    }

    /// Declares a binary relation between two entities.
    pub fn define_relation(
        &mut self,
        subject: impl Into<String>,
        object: impl Into<String>,
        relation: impl Into<String>,
        kind: VariableKind,
    ) -> Result<StateKey, EngineError> {
        let key = StateKey::relation(subject, object, relation);
        if self.model.relations.contains_key(&key) {
            return Err(ModelError::DuplicateVariable(key).into());
        }
        let default = self.default_value(&kind);
        self.model
            .relations
            .insert(key.clone(), VariableDefinition { kind });
        self.initialize_state_key(&key, default);
        self.cache.invalidate();
        Ok(key)
    }

    fn default_value(&mut self, kind: &VariableKind) -> f64 {
        match kind {
            VariableKind::Numeric { lo, .. } => *lo,
            VariableKind::Boolean => 0.0,
            VariableKind::Enumerated(values) => {
                let mut first = 0.0;
                for (index, value) in values.iter().enumerate() {
                    let interned = self.intern_symbol(value);
                    if index == 0 {
                        first = interned;
                    }
                }
                first
            }
        }
    }

    fn initialize_state_key(&mut self, key: &StateKey, value: f64) {
        let mut next = VectorDistribution::new();
        for (vector, weight) in self.state.iter() {
            let mut vector = vector.clone();
            vector.set(key.clone(), value);
            next.push(vector, weight);
        }
        self.state = next;
    }

    /// Adds (or replaces) an agent.
    pub fn add_agent(&mut self, agent: AgentModel) {
        self.model.agents.insert(agent.name().to_string(), agent);
        self.cache.invalidate();
    }

    /// Adds one action set to an agent's repertoire.
    pub fn add_action(&mut self, agent: &str, actions: ActionSet) -> Result<(), EngineError> {
        let model = self
            .model
            .agents
            .get_mut(agent)
            .ok_or_else(|| ModelError::UndeclaredAgent(agent.to_string()))?;
        model.add_action(actions);
        self.cache.invalidate();
        Ok(())
    }

    /// Adds one weighted reward term to an agent.
    pub fn set_reward(
        &mut self,
        agent: &str,
        tree: RewardTree,
        weight: f64,
    ) -> Result<(), EngineError> {
        let model = self
            .model
            .agents
            .get_mut(agent)
            .ok_or_else(|| ModelError::UndeclaredAgent(agent.to_string()))?;
        model.add_reward(tree, weight);
        self.cache.invalidate();
        Ok(())
    }

    /// Gates an agent's action behind a legality tree.
    pub fn set_legal(
        &mut self,
        agent: &str,
        actions: &ActionSet,
        tree: LegalityTree,
    ) -> Result<(), EngineError> {
        let model = self
            .model
            .agents
            .get_mut(agent)
            .ok_or_else(|| ModelError::UndeclaredAgent(agent.to_string()))?;
        model.set_legal(actions, tree);
        self.cache.invalidate();
        Ok(())
    }

    /// Declares how an action changes a state variable.
    ///
    /// Stored under the action's canonical root; whether the action itself
    /// exists is checked when the graph is built.
    pub fn set_dynamics(
        &mut self,
        key: &StateKey,
        actions: &ActionSet,
        tree: DynamicsTree,
    ) -> Result<(), EngineError> {
        self.insert_dynamics(key, DynamicsSelector::Action(actions.roots()), tree)
    }

    /// Declares a dynamics tree that applies when no action-specific entry
    /// matched the chosen actions.
    pub fn set_default_dynamics(
        &mut self,
        key: &StateKey,
        tree: DynamicsTree,
    ) -> Result<(), EngineError> {
        self.insert_dynamics(key, DynamicsSelector::AnyAction, tree)
    }

    fn insert_dynamics(
        &mut self,
        key: &StateKey,
        selector: DynamicsSelector,
        tree: DynamicsTree,
    ) -> Result<(), EngineError> {
        if !self.model.is_declared(key) {
            return Err(ModelError::UnknownKey(key.to_pre()).into());
        }
        let post = key.to_post();
        let entry = self
            .model
            .dynamics
            .entry(post)
            .or_insert_with(|| DynamicsEntry::Tabular(BTreeMap::new()));
        match entry {
            DynamicsEntry::Tabular(table) => {
                table.insert(selector, tree);
            }
            DynamicsEntry::Generic => {
                *entry = DynamicsEntry::Tabular(BTreeMap::from([(selector, tree)]));
            }
        }
        self.cache.invalidate();
        Ok(())
    }

    /// Marks a key as generically resolved: no declared structural
    /// dependencies; updated by the fallback hook, or carried unchanged.
    pub fn set_generic_dynamics(&mut self, key: &StateKey) -> Result<(), EngineError> {
        if !self.model.is_declared(key) {
            return Err(ModelError::UnknownKey(key.to_pre()).into());
        }
        self.model
            .dynamics
            .insert(key.to_post(), DynamicsEntry::Generic);
        self.cache.invalidate();
        Ok(())
    }

    /// Declares that `dependent` must be updated after `prerequisite` within
    /// one step, even when no tree makes the link explicit.
    pub fn add_dependency(
        &mut self,
        dependent: &StateKey,
        prerequisite: &StateKey,
    ) -> Result<(), EngineError> {
        if !self.model.is_declared(dependent) {
            return Err(ModelError::UnknownKey(dependent.to_pre()).into());
        }
        if !self.model.is_declared(prerequisite) {
            return Err(ModelError::UnknownKey(prerequisite.to_pre()).into());
        }
        self.model
            .dependencies
            .entry(dependent.to_pre())
            .or_default()
            .insert(prerequisite.to_pre());
        self.cache.invalidate();
        Ok(())
    }

    /// Adds a condition under which the scenario is over.
    pub fn add_termination(&mut self, tree: LegalityTree) {
        self.model.termination.push(tree);
    }

    // ---- symbols ------------------------------------------------------

    /// Interns a symbol, returning its numeric value.
    pub fn intern_symbol(&mut self, name: impl AsRef<str>) -> f64 {
        let name = name.as_ref();
        if let Some(index) = self.model.symbols.iter().position(|s| s == name) {
            return index as f64;
        }
        self.model.symbols.push(name.to_string());
        (self.model.symbols.len() - 1) as f64
    }

    /// The numeric value of an already-interned symbol.
    pub fn symbol_value(&self, name: &str) -> Result<f64, EngineError> {
        self.model
            .symbols
            .iter()
            .position(|s| s == name)
            .map(|index| index as f64)
            .ok_or_else(|| ModelError::UnknownSymbol(name.to_string()).into())
    }

    /// The symbol a numeric value stands for, if any.
    pub fn symbol_name(&self, value: f64) -> Option<&str> {
        if value < 0.0 || value.fract() != 0.0 {
            return None;
        }
        self.model.symbols.get(value as usize).map(String::as_str)
    }

    // ---- state accessors ----------------------------------------------

    pub fn state(&self) -> &VectorDistribution {
        &self.state
    }

    /// Replaces the current state, merging duplicates and renormalizing.
    pub fn set_state(&mut self, mut state: VectorDistribution) {
        state.merge_duplicates();
        state.normalize();
        self.state = state;
    }

    /// Sets a variable to a certain value in every support vector.
    pub fn set_value(&mut self, key: &StateKey, value: f64) -> Result<(), EngineError> {
        if !self.model.is_declared(key) {
            return Err(ModelError::UnknownKey(key.to_pre()).into());
        }
        self.initialize_state_key(&key.to_pre(), value);
        Ok(())
    }

    /// Sets an enumerated variable to a symbol's value.
    pub fn set_symbolic_value(&mut self, key: &StateKey, name: &str) -> Result<(), EngineError> {
        let value = self.symbol_value(name)?;
        self.set_value(key, value)
    }

    /// The certain value of a variable: present and bitwise identical in
    /// every support vector.
    pub fn value(&self, key: &StateKey) -> Option<f64> {
        let mut iter = self.state.iter();
        let first = iter.next().and_then(|(vector, _)| vector.get(key))?;
        for (vector, _) in iter {
            if vector.get(key)?.to_bits() != first.to_bits() {
                return None;
            }
        }
        Some(first)
    }

    /// The expected value of a variable across the support.
    pub fn expectation(&self, key: &StateKey) -> Option<f64> {
        self.state.expectation(key)
    }

    // ---- graph access --------------------------------------------------

    /// The dependency graph, built on first access and cached until the next
    /// structural mutation.
    pub fn graph(&mut self) -> Result<&DependencyGraph, ModelError> {
        self.cache.ensure_built(&self.model)
    }

    /// Whether the graph cache currently holds a built graph.
    pub fn graph_ready(&self) -> bool {
        self.cache.get().is_some()
    }

    pub(crate) fn ensure_graph(&mut self) -> Result<(), ModelError> {
        self.cache.ensure_built(&self.model).map(|_| ())
    }

    /// Only valid after `ensure_graph`; every public path builds first.
    pub(crate) fn built_graph(&self) -> &DependencyGraph {
        self.cache
            .get()
            .expect("dependency graph built before access")
    }

    // ---- stepping -------------------------------------------------------

    /// Advances the world state by one step under the chosen actions.
    ///
    /// With `select` the result is collapsed to a single sampled vector
    /// before committing; otherwise the full distribution is kept.
    pub fn step(
        &mut self,
        actions: &JointAction,
        select: bool,
    ) -> Result<VectorDistribution, EngineError> {
        self.ensure_graph()?;
        let mut next = step::advance(
            &self.model,
            self.generic.as_deref(),
            self.built_graph(),
            actions,
            &self.state,
            None,
            self.config.probability_tolerance,
        )?;
        if select {
            next.select(&mut self.rng);
        }
        tracing::trace!(
            "World stepped, support size {} (select: {})",
            next.len(),
            select
        );
        self.state = next.clone();
        Ok(next)
    }

    /// One step applied to a caller-supplied state, committing nothing.
    pub fn step_distribution(
        &mut self,
        actions: &JointAction,
        state: &VectorDistribution,
    ) -> Result<VectorDistribution, EngineError> {
        self.ensure_graph()?;
        let next = step::advance(
            &self.model,
            self.generic.as_deref(),
            self.built_graph(),
            actions,
            state,
            None,
            self.config.probability_tolerance,
        )?;
        Ok(next)
    }

    /// A restricted, non-committal step: only the given keys (and their
    /// post-state prerequisites) are evaluated.
    pub fn predict(
        &mut self,
        actions: &JointAction,
        keys: &BTreeSet<StateKey>,
    ) -> Result<VectorDistribution, EngineError> {
        self.ensure_graph()?;
        let next = step::advance(
            &self.model,
            self.generic.as_deref(),
            self.built_graph(),
            actions,
            &self.state,
            Some(keys),
            self.config.probability_tolerance,
        )?;
        Ok(next)
    }

    /// Forecasts, per entity targeted by the actions, the marginal
    /// distribution of each of its features after the step. Nothing is
    /// committed.
    pub fn predict_result(
        &mut self,
        actions: &JointAction,
    ) -> Result<BTreeMap<String, Prediction>, EngineError> {
        let targets: BTreeSet<String> = actions
            .atoms()
            .filter_map(|atom| atom.target.clone())
            .collect();
        let mut predictions = BTreeMap::new();
        for target in targets {
            let keys: BTreeSet<StateKey> = self
                .model
                .variables
                .keys()
                .filter(|key| key.owner() == Some(target.as_str()))
                .cloned()
                .collect();
            if keys.is_empty() {
                continue;
            }
            let forecast = self.predict(actions, &keys)?;
            let outcomes = keys
                .iter()
                .map(|key| (key.feature.clone(), forecast.marginal(key)))
                .collect();
            predictions.insert(
                target.clone(),
                Prediction {
                    object: target,
                    outcomes,
                },
            );
        }
        Ok(predictions)
    }

    /// Whether every support vector satisfies some termination condition.
    pub fn terminated(&self) -> Result<bool, EngineError> {
        if self.model.termination.is_empty() {
            return Ok(false);
        }
        for (vector, _) in self.state.iter() {
            let mut done = false;
            for tree in &self.model.termination {
                let outcomes = tree.outcomes(vector).map_err(|e| StepError::MissingKey {
                    key: e.0,
                    context: "termination".to_string(),
                })?;
                let p_true: f64 = outcomes
                    .iter()
                    .filter(|(over, _)| **over)
                    .map(|(_, p)| p)
                    .sum();
                if p_true > 0.5 {
                    done = true;
                    break;
                }
            }
            if !done {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
