//! Dependency Graph
//!
//! Builds, from the world's declarative tables, a directed graph of which
//! variables, actions, and utilities feed which, then derives a layered
//! evaluation order: every node sits strictly above all of its parents, and
//! the stepping engine updates state variables level by level so nothing
//! reads a value that has not been computed yet.
//!
//! Construction takes the world model as an explicit read-only snapshot; the
//! graph never reaches back into shared mutable tables.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use sim_model::{ActionSet, StateKey, Tag};

use crate::error::ModelError;
use crate::world::{DynamicsEntry, DynamicsSelector, WorldModel};

/// Identifier for one graph node.
///
/// State variables, actions, and utilities share a single node map; the sum
/// type keeps the keying explicit rather than encoding kind in strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeKey {
    /// A state variable, pre- or post-tagged
    State(StateKey),
    /// An action in canonical root form
    Action(ActionSet),
    /// An agent's utility
    Utility(String),
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::State(key) => write!(f, "{}", key),
            NodeKey::Action(actions) => write!(f, "{}", actions),
            NodeKey::Utility(agent) => write!(f, "utility({})", agent),
        }
    }
}

/// What kind of value a node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    StatePre,
    StatePost,
    Action,
    Utility,
}

/// One node with its dependency bookkeeping.
#[derive(Debug, Clone)]
pub struct GraphNode {
    /// Owning agent or entity, when there is one
    pub agent: Option<String>,
    pub kind: NodeKind,
    /// Nodes this node's value depends on
    pub parents: BTreeSet<NodeKey>,
    /// Nodes that depend on this node
    pub children: BTreeSet<NodeKey>,
    /// Transitive parent closure, filled in by layering
    pub ancestors: BTreeSet<NodeKey>,
    /// Topological layer, filled in by layering
    pub level: Option<usize>,
}

impl GraphNode {
    fn new(agent: Option<String>, kind: NodeKind) -> Self {
        Self {
            agent,
            kind,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            ancestors: BTreeSet::new(),
            level: None,
        }
    }
}

/// Dependency structure among all declared variables, actions, and rewards.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<NodeKey, GraphNode>,
    root: BTreeSet<NodeKey>,
    layers: Vec<BTreeSet<NodeKey>>,
    evaluation: Vec<Vec<StateKey>>,
}

impl DependencyGraph {
    /// Builds the graph, layers it, and derives the evaluation order.
    pub fn build(model: &WorldModel) -> Result<Self, ModelError> {
        let mut graph = DependencyGraph::default();
        graph.compute_nodes(model);
        let edges = graph.compute_edges(model)?;
        graph.compute_lineage()?;
        graph.compute_evaluation(model);
        tracing::debug!(
            "Dependency graph built: {} nodes, {} edges, {} layers",
            graph.nodes.len(),
            edges,
            graph.layers.len()
        );
        Ok(graph)
    }

    fn add_node(&mut self, key: NodeKey, agent: Option<String>, kind: NodeKind) {
        // Joint actions with the same canonical root collapse onto one node
        self.nodes.entry(key).or_insert_with(|| GraphNode::new(agent, kind));
    }

    /// Adds parent -> child, failing if either endpoint was never declared.
    fn add_edge(&mut self, parent: &NodeKey, child: &NodeKey) -> Result<(), ModelError> {
        if !self.nodes.contains_key(parent) {
            return Err(Self::missing(parent));
        }
        if !self.nodes.contains_key(child) {
            return Err(Self::missing(child));
        }
        if let Some(node) = self.nodes.get_mut(child) {
            node.parents.insert(parent.clone());
        }
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.insert(child.clone());
        }
        Ok(())
    }

    fn missing(key: &NodeKey) -> ModelError {
        match key {
            NodeKey::State(key) => ModelError::UnknownKey(key.clone()),
            NodeKey::Action(actions) => ModelError::UnknownAction(actions.clone()),
            NodeKey::Utility(agent) => ModelError::UndeclaredAgent(agent.clone()),
        }
    }

    fn compute_nodes(&mut self, model: &WorldModel) {
        // Pre and post nodes for every unary state variable
        for (key, _) in model.variables() {
            let agent = key.owner().map(str::to_string);
            self.add_node(NodeKey::State(key.clone()), agent.clone(), NodeKind::StatePre);
            self.add_node(NodeKey::State(key.to_post()), agent, NodeKind::StatePost);
        }
        // Likewise for every binary relation
        for (key, _) in model.relations() {
            let agent = key.owner().map(str::to_string);
            self.add_node(NodeKey::State(key.clone()), agent.clone(), NodeKind::StatePre);
            self.add_node(NodeKey::State(key.to_post()), agent, NodeKind::StatePost);
        }
        for (name, agent) in model.agents() {
            // One utility node per agent with a reward function
            if agent.has_reward() {
                self.add_node(
                    NodeKey::Utility(name.clone()),
                    Some(name.clone()),
                    NodeKind::Utility,
                );
            }
            // One action node per distinct canonical root
            for actions in agent.actions() {
                self.add_node(
                    NodeKey::Action(actions.roots()),
                    Some(name.clone()),
                    NodeKind::Action,
                );
            }
        }
    }

    fn compute_edges(&mut self, model: &WorldModel) -> Result<usize, ModelError> {
        let mut edges = 0;
        // Links from dynamics
        for (key, entry) in model.dynamics() {
            let post = NodeKey::State(key.clone());
            if !self.nodes.contains_key(&post) {
                return Err(ModelError::UnknownKey(key.clone()));
            }
            let table = match entry {
                // The generic sentinel declares no structural dependencies;
                // such keys resolve outside the graph-driven order
                DynamicsEntry::Generic => continue,
                DynamicsEntry::Tabular(table) => table,
            };
            for (selector, tree) in table {
                if let DynamicsSelector::Action(actions) = selector {
                    // Link from the action to this feature
                    self.add_edge(&NodeKey::Action(actions.roots()), &post)?;
                    edges += 1;
                }
                // Link from the tree's variables to this feature
                for parent in tree.keys_referenced() {
                    self.add_edge(&NodeKey::State(parent), &post)?;
                    edges += 1;
                }
            }
        }
        // Declared within-step orderings between post-tagged variables
        for (dependent, prerequisites) in model.dependencies() {
            let child = NodeKey::State(dependent.to_post());
            for prerequisite in prerequisites {
                self.add_edge(&NodeKey::State(prerequisite.to_post()), &child)?;
                edges += 1;
            }
        }
        for (name, agent) in model.agents() {
            // Links from reward: variables feed the utility node future-tagged
            let utility = NodeKey::Utility(name.clone());
            for (tree, _weight) in agent.reward() {
                for parent in tree.keys_referenced() {
                    self.add_edge(&NodeKey::State(parent.to_post()), &utility)?;
                    edges += 1;
                }
            }
            // Links from legality: prerequisite variables feed the action node
            for (actions, tree) in agent.legality_entries() {
                let action = NodeKey::Action(actions.roots());
                if !self.nodes.contains_key(&action) {
                    return Err(ModelError::UnknownAction(actions.clone()));
                }
                for parent in tree.keys_referenced() {
                    self.add_edge(&NodeKey::State(parent), &action)?;
                    edges += 1;
                }
            }
        }
        Ok(edges)
    }

    /// Assigns levels breadth-first and accumulates ancestor sets.
    ///
    /// A node joins level L+1 once it is a child of a level-L node and every
    /// one of its parents already has a level <= L. An iteration that places
    /// nothing while nodes remain unleveled means the pre/post split did not
    /// break a cycle.
    fn compute_lineage(&mut self) -> Result<(), ModelError> {
        self.root.clear();
        self.layers.clear();

        for (key, node) in &mut self.nodes {
            node.ancestors = node.parents.clone();
            if node.parents.is_empty() {
                node.level = Some(0);
                self.root.insert(key.clone());
            }
        }
        self.layers.push(self.root.clone());
        let mut placed = self.root.len();
        let mut level = 0;

        while placed < self.nodes.len() {
            let current: Vec<NodeKey> = self.layers[level].iter().cloned().collect();
            let mut layer = BTreeSet::new();
            for key in current {
                let (ancestors, children) = match self.nodes.get(&key) {
                    Some(node) => (node.ancestors.clone(), node.children.clone()),
                    None => continue,
                };
                for child in children {
                    // Update ancestors
                    if let Some(node) = self.nodes.get_mut(&child) {
                        node.ancestors.extend(ancestors.iter().cloned());
                    }
                    if layer.contains(&child) {
                        continue;
                    }
                    // Eligible once all parents sit in this layer or earlier
                    let eligible = match self.nodes.get(&child) {
                        Some(node) => node
                            .parents
                            .iter()
                            .all(|parent| match self.nodes.get(parent) {
                                Some(p) => p.level.map_or(false, |l| l <= level),
                                None => false,
                            }),
                        None => false,
                    };
                    if eligible {
                        layer.insert(child);
                    }
                }
            }
            if layer.is_empty() {
                let unplaced: Vec<String> = self
                    .nodes
                    .iter()
                    .filter(|(_, node)| node.level.is_none())
                    .map(|(key, _)| key.to_string())
                    .collect();
                return Err(ModelError::DependencyCycle(unplaced));
            }
            for key in &layer {
                if let Some(node) = self.nodes.get_mut(key) {
                    node.level = Some(level + 1);
                }
            }
            placed += layer.len();
            self.layers.push(layer);
            level += 1;
        }
        Ok(())
    }

    /// Buckets the post key of every unary state variable by its resolved
    /// level, re-tagged to present form: the order in which the stepping
    /// engine computes new values.
    fn compute_evaluation(&mut self, model: &WorldModel) {
        self.evaluation.clear();
        for (key, _) in model.variables() {
            let node = match self.nodes.get(&NodeKey::State(key.to_post())) {
                Some(node) => node,
                None => continue,
            };
            let Some(level) = node.level else { continue };
            while self.evaluation.len() <= level {
                self.evaluation.push(Vec::new());
            }
            self.evaluation[level].push(key.clone());
        }
    }

    /// Looks up one node.
    pub fn node(&self, key: &NodeKey) -> Option<&GraphNode> {
        self.nodes.get(key)
    }

    /// The level-0 nodes: exactly the parentless ones.
    pub fn root(&self) -> &BTreeSet<NodeKey> {
        &self.root
    }

    /// All layers, level 0 first.
    pub fn layers(&self) -> &[BTreeSet<NodeKey>] {
        &self.layers
    }

    /// State keys to update during a step, bucketed by level, present form.
    pub fn evaluation(&self) -> &[Vec<StateKey>] {
        &self.evaluation
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeKey, &GraphNode)> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The resolved level of a post-tagged state key, if it has one.
    pub fn level_of(&self, key: &StateKey) -> Option<usize> {
        debug_assert_eq!(key.tag, Tag::Post);
        self.nodes.get(&NodeKey::State(key.clone()))?.level
    }
}
