//! Integration tests for the engine.
//!
//! These tests build a small conquest-style scenario end to end: a region
//! with a garrison and an owner, a player with resources, an invasion action
//! gated by legality, stochastic contest dynamics, a reward over territory
//! value, prediction, decision scoring, and termination.

use std::collections::BTreeSet;

use sim_engine::{AgentModel, EngineConfig, EngineError, StepError, VariableKind, World};
use sim_model::{
    Action, ActionSet, JointAction, LinearCombo, Plane, StateKey, StateVector, SymbolicTree,
    VectorDistribution,
};

const WIN_PROBABILITY: f64 = 0.6;

struct Scenario {
    world: World,
    owner: StateKey,
    value: StateKey,
    resources: StateKey,
    invade: ActionSet,
    wait: ActionSet,
    player_symbol: f64,
    enemy_symbol: f64,
}

/// One region, one player, one contested invasion.
fn conquest_scenario(config: EngineConfig) -> Scenario {
    let mut world = World::with_config(config);

    let owner = world
        .define_variable(
            "alaska",
            "owner",
            VariableKind::enumerated(["enemy", "player1"]),
        )
        .expect("define owner");
    let value = world
        .define_variable("alaska", "value", VariableKind::numeric(0.0, 32.0))
        .expect("define value");
    let occupants = world
        .define_variable("alaska", "occupants", VariableKind::numeric(0.0, 32.0))
        .expect("define occupants");
    let resources = world
        .define_variable("player1", "resources", VariableKind::numeric(0.0, 32.0))
        .expect("define resources");

    world.set_value(&value, 5.0).expect("initial value");
    world.set_value(&occupants, 4.0).expect("initial occupants");
    world.set_value(&resources, 6.0).expect("initial resources");

    let enemy_symbol = world.symbol_value("enemy").expect("interned");
    let player_symbol = world.symbol_value("player1").expect("interned");

    let invade = ActionSet::singleton(Action::new("player1", "invade").with_target("alaska"));
    let wait = ActionSet::singleton(Action::new("player1", "wait"));

    let mut player = AgentModel::new("player1");
    player.add_action(invade.clone());
    player.add_action(wait.clone());
    world.add_agent(player);

    // Invading is legal only with resources in hand and the enemy in place
    world
        .set_legal(
            "player1",
            &invade,
            SymbolicTree::branch(
                Plane::greater(LinearCombo::of_key(resources.clone()), 0.0),
                SymbolicTree::branch(
                    Plane::equals(owner.clone(), enemy_symbol),
                    SymbolicTree::leaf(true),
                    SymbolicTree::leaf(false),
                ),
                SymbolicTree::leaf(false),
            ),
        )
        .expect("legality");

    // The contest: the invader takes the region or the owner holds it
    world
        .set_dynamics(
            &owner,
            &invade,
            SymbolicTree::stochastic_leaves(vec![
                (LinearCombo::constant(player_symbol), WIN_PROBABILITY),
                (LinearCombo::of_key(owner.clone()), 1.0 - WIN_PROBABILITY),
            ]),
        )
        .expect("owner dynamics");

    // Invading spends one resource
    world
        .set_dynamics(
            &resources,
            &invade,
            SymbolicTree::leaf(LinearCombo::increment(resources.clone(), -1.0)),
        )
        .expect("resource dynamics");

    // The player values owned territory
    world
        .set_reward(
            "player1",
            SymbolicTree::branch(
                Plane::equals(owner.clone(), player_symbol),
                SymbolicTree::leaf(LinearCombo::of_key(value.clone())),
                SymbolicTree::leaf(LinearCombo::constant(0.0)),
            ),
            1.0,
        )
        .expect("reward");

    // The scenario ends once the region falls
    world.add_termination(SymbolicTree::branch(
        Plane::equals(owner.clone(), player_symbol),
        SymbolicTree::leaf(true),
        SymbolicTree::leaf(false),
    ));

    Scenario {
        world,
        owner,
        value,
        resources,
        invade,
        wait,
        player_symbol,
        enemy_symbol,
    }
}

fn invasion(scenario: &Scenario) -> JointAction {
    JointAction::single("player1", scenario.invade.clone())
}

#[test]
fn test_graph_layers_actions_between_state_and_utility() {
    let mut scenario = conquest_scenario(EngineConfig::default());
    let owner = scenario.owner.clone();
    let graph = scenario.world.graph().expect("build");

    let owner_post = graph
        .node(&sim_engine::NodeKey::State(owner.to_post()))
        .expect("owner' node");
    let action = graph
        .node(&sim_engine::NodeKey::Action(scenario.invade.roots()))
        .expect("action node");
    let utility = graph
        .node(&sim_engine::NodeKey::Utility("player1".into()))
        .expect("utility node");

    // legality feeds the action, the action feeds owner', owner' feeds utility
    let action_level = action.level.expect("leveled");
    let owner_level = owner_post.level.expect("leveled");
    let utility_level = utility.level.expect("leveled");
    assert!(action_level < owner_level);
    assert!(owner_level < utility_level);
    assert!(utility.parents.contains(&sim_engine::NodeKey::State(owner.to_post())));
}

#[test]
fn test_invasion_branches_the_state() {
    let mut scenario = conquest_scenario(EngineConfig::default());
    let joint = invasion(&scenario);
    let result = scenario.world.step(&joint, false).expect("step");

    assert_eq!(result.len(), 2);
    let marginal = result.marginal(&scenario.owner);
    assert_eq!(marginal.len(), 2);
    let enemy_weight = marginal
        .iter()
        .find(|(v, _)| *v == scenario.enemy_symbol)
        .map(|(_, p)| *p)
        .expect("enemy outcome");
    assert!((enemy_weight - (1.0 - WIN_PROBABILITY)).abs() < 1e-9);

    // Resources are spent in every branch
    assert_eq!(scenario.world.value(&scenario.resources), Some(5.0));
    // Untouched variables keep their values in every branch
    assert_eq!(scenario.world.value(&scenario.value), Some(5.0));
}

#[test]
fn test_weights_stay_normalized_over_repeated_steps() {
    let mut scenario = conquest_scenario(EngineConfig::default());
    let joint = invasion(&scenario);
    for _ in 0..4 {
        let result = scenario.world.step(&joint, false).expect("step");
        assert!((result.sum_weight() - 1.0).abs() < 1e-9);
    }
    // owner branches recombine: the support never exceeds the two outcomes
    assert_eq!(scenario.world.state().len(), 2);
}

#[test]
fn test_legality_follows_the_state() {
    let mut scenario = conquest_scenario(EngineConfig::default());
    let state = scenario.world.state().clone();
    let vector = state.as_certain().expect("certain start");
    let legal = scenario
        .world
        .model()
        .agent("player1")
        .expect("agent")
        .legal_actions(vector)
        .expect("evaluate");
    assert_eq!(legal.len(), 2);

    // Once the player owns the region, invading is no longer legal
    scenario
        .world
        .set_value(&scenario.owner, scenario.player_symbol)
        .expect("set owner");
    let state = scenario.world.state().clone();
    let vector = state.as_certain().expect("certain");
    let legal = scenario
        .world
        .model()
        .agent("player1")
        .expect("agent")
        .legal_actions(vector)
        .expect("evaluate");
    assert_eq!(legal.len(), 1);
    assert_eq!(legal[0], &scenario.wait);
}

#[test]
fn test_prediction_forecasts_without_committing() {
    let mut scenario = conquest_scenario(EngineConfig::default());
    let joint = invasion(&scenario);
    let predictions = scenario.world.predict_result(&joint).expect("predict");

    let alaska = predictions.get("alaska").expect("targeted region");
    let owner_marginal = alaska.outcomes.get("owner").expect("owner forecast");
    let win = owner_marginal
        .iter()
        .find(|(v, _)| *v == scenario.player_symbol)
        .map(|(_, p)| *p)
        .expect("winning outcome");
    assert!((win - WIN_PROBABILITY).abs() < 1e-9);

    // The forecast committed nothing
    assert_eq!(
        scenario.world.value(&scenario.owner),
        Some(scenario.enemy_symbol)
    );
    assert_eq!(scenario.world.value(&scenario.resources), Some(6.0));

    // Prediction records serialize for the surrounding tooling
    let json = serde_json::to_string(alaska).expect("serialize prediction");
    assert!(json.contains("alaska"));
}

#[test]
fn test_decide_prefers_the_invasion() {
    let mut scenario = conquest_scenario(EngineConfig::default());
    let candidates = vec![scenario.wait.clone(), scenario.invade.clone()];
    let decision = scenario
        .world
        .decide("player1", &candidates)
        .expect("decide")
        .expect("candidates given");

    assert_eq!(decision.action, scenario.invade);
    let wait_score = decision.scores[0].1;
    let invade_score = decision.scores[1].1;
    assert!((wait_score - 0.0).abs() < 1e-9);
    // E[reward] = P(win) * value
    assert!((invade_score - WIN_PROBABILITY * 5.0).abs() < 1e-9);
}

#[test]
fn test_termination_tracks_conquest() {
    let mut scenario = conquest_scenario(EngineConfig::default());
    assert!(!scenario.world.terminated().expect("running"));

    scenario
        .world
        .set_value(&scenario.owner, scenario.player_symbol)
        .expect("set owner");
    assert!(scenario.world.terminated().expect("over"));
}

#[test]
fn test_stepping_a_vector_missing_a_dependency_is_fatal() {
    let mut scenario = conquest_scenario(EngineConfig::default());
    let joint = invasion(&scenario);

    // A vector that lacks the player's resources but has everything else
    let state = scenario.world.state().clone();
    let mut truncated = StateVector::new();
    for (key, v) in state.as_certain().expect("certain").iter() {
        if *key != scenario.resources {
            truncated.set(key.clone(), v);
        }
    }
    let err = scenario
        .world
        .step_distribution(&joint, &VectorDistribution::certain(truncated))
        .expect_err("must fail");
    match err {
        EngineError::Step(StepError::MissingKey { key, .. }) => {
            assert_eq!(key, scenario.resources);
        }
        other => panic!("expected MissingKey, got {:?}", other),
    }
}

#[test]
fn test_select_plays_a_round_to_a_concrete_outcome() {
    let mut scenario = conquest_scenario(EngineConfig {
        seed: Some(11),
        ..EngineConfig::default()
    });
    let joint = invasion(&scenario);
    let result = scenario.world.step(&joint, true).expect("step");

    assert_eq!(result.len(), 1);
    let owner = scenario.world.value(&scenario.owner).expect("certain");
    assert!(owner == scenario.player_symbol || owner == scenario.enemy_symbol);
    assert_eq!(scenario.world.value(&scenario.resources), Some(5.0));
}

#[test]
fn test_restricted_prediction_closes_over_prerequisites() {
    let mut scenario = conquest_scenario(EngineConfig::default());

    // occupants' must be computed before owner' within the step
    let occupants = StateKey::entity("alaska", "occupants");
    scenario
        .world
        .add_dependency(&scenario.owner, &occupants)
        .expect("dependency");
    scenario
        .world
        .set_dynamics(
            &occupants,
            &scenario.invade,
            SymbolicTree::leaf(LinearCombo::increment(occupants.clone(), -1.0)),
        )
        .expect("occupants dynamics");

    // Asking only about the owner still runs the occupants update first
    let joint = invasion(&scenario);
    let keys: BTreeSet<StateKey> = [scenario.owner.clone()].into();
    let forecast = scenario.world.predict(&joint, &keys).expect("predict");
    let occupants_after = forecast
        .marginal(&occupants)
        .first()
        .map(|(v, _)| *v)
        .expect("occupants present");
    assert_eq!(occupants_after, 3.0);
}
