use std::sync::Arc;

use brainstem::adapters::mock::MockCompletionClient;
use brainstem::domain::expression;
use brainstem::domain::models::{DecisionConfig, DecisionRule, Guard, TerminalConfig};
use brainstem::{BrainController, Edge, EdgeKind, Graph, MemoryStore, Node, NodeKind, RunOutcome};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

/// start -> n1 -> ... -> n{len-1} -> done
fn chain(len: usize) -> Graph {
    let mut graph = Graph::new("chain", "n0").with_terminal("done");
    graph.add_node(Node::new("done", NodeKind::Terminal(TerminalConfig::default())));
    for i in 0..len {
        graph.add_node(Node::new(format!("n{i}"), NodeKind::Merge));
        let to = if i + 1 == len { "done".to_string() } else { format!("n{}", i + 1) };
        graph.add_edge(Edge::new(format!("e{i}"), format!("n{i}"), to, EdgeKind::Standard));
    }
    graph
}

fn decision_graph() -> Graph {
    let rule = |condition: &str, target: &str| DecisionRule {
        condition: condition.to_string(),
        target: target.to_string(),
    };
    let decision = DecisionConfig {
        variable: "data.score".to_string(),
        rules: vec![rule("> 0.8", "high"), rule("> 0.5", "medium"), rule("default", "low")],
        precondition: None,
    };
    let terminal = |outcome| NodeKind::Terminal(TerminalConfig {
        outcome: Some(outcome),
        on_reach: Vec::new(),
    });

    let mut graph = Graph::new("triage", "decide").with_node(Node::new("decide", NodeKind::Decision(decision)));
    for (id, outcome) in [
        ("high", RunOutcome::Success),
        ("medium", RunOutcome::Escalated),
        ("low", RunOutcome::Failure),
    ] {
        graph.add_node(Node::new(id, terminal(outcome)));
        graph.add_edge(Edge::new(format!("to_{id}"), "decide", id, EdgeKind::Standard));
    }
    graph
}

fn run_decision(score: f64) -> (String, Vec<String>) {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    runtime.block_on(async {
        let mut controller = BrainController::new(
            decision_graph(),
            Arc::new(MemoryStore::in_memory()),
            Arc::new(MockCompletionClient::new()),
        );
        let result = controller.run("triage", Some(json!({"score": score}))).await.unwrap();
        (result.final_node, result.final_state.trail)
    })
}

proptest! {
    /// Property: every well-formed chain validates cleanly
    #[test]
    fn prop_chain_is_valid(len in 1usize..30) {
        prop_assert!(chain(len).validate().is_empty());
    }

    /// Property: dropping any edge leaves exactly its source without a way out
    #[test]
    fn prop_missing_edge_is_reported(len in 1usize..30, pick in any::<prop::sample::Index>()) {
        let mut graph = chain(len);
        let removed = graph.edges.remove(pick.index(len));
        let source = removed.from.node_id().unwrap().to_string();

        let expected = format!("'{source}' has no outgoing edges");
        let errors = graph.validate();
        prop_assert_eq!(errors.len(), 1);
        prop_assert!(errors[0].contains(&expected));
    }

    /// Property: candidates come out by ascending priority, ties in declaration order
    #[test]
    fn prop_outgoing_edges_are_ordered(priorities in prop::collection::vec(-5i32..5, 1..20)) {
        let mut graph = Graph::new("fan", "hub").with_node(Node::new("hub", NodeKind::Merge));
        for (i, priority) in priorities.iter().enumerate() {
            graph.add_node(Node::new(format!("t{i}"), NodeKind::Terminal(TerminalConfig::default())));
            graph.add_edge(Edge::new(format!("e{i}"), "hub", format!("t{i}"), EdgeKind::Standard).with_priority(*priority));
        }

        let ordered: Vec<(i32, usize)> = graph
            .outgoing_edges("hub")
            .iter()
            .map(|e| (e.priority, e.id[1..].parse::<usize>().unwrap()))
            .collect();
        let mut expected = ordered.clone();
        expected.sort_unstable();
        prop_assert_eq!(&ordered, &expected);

        let again: Vec<&str> = graph.outgoing_edges("hub").iter().map(|e| e.id.as_str()).collect();
        let first: Vec<&str> = ordered.iter().map(|(_, i)| graph.edges[*i].id.as_str()).collect();
        prop_assert_eq!(again, first);
    }

    /// Property: guard evaluation is total; garbage is simply false
    #[test]
    fn prop_guard_evaluation_never_panics(source in ".{0,40}", confidence in 0.0f64..1.0) {
        let mut context = Map::new();
        context.insert("confidence".to_string(), json!(confidence));
        let guard = Guard::new(source.clone());
        let verdict = guard.evaluate(&context);
        prop_assert_eq!(verdict, guard.evaluate(&context));
        if expression::try_condition(&source, &context).is_err() {
            prop_assert!(!verdict);
        }
    }

    /// Property: threshold guards agree with the numeric comparison
    #[test]
    fn prop_threshold_guard_matches_comparison(confidence in 0.0f64..1.0, threshold in 0.0f64..1.0) {
        let mut context = Map::new();
        context.insert("confidence".to_string(), json!(confidence));
        let guard = Guard::new(format!("confidence > {threshold}"));
        prop_assert_eq!(guard.evaluate(&context), confidence > threshold);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: the same input always routes the same way
    #[test]
    fn prop_decision_routing_is_deterministic(score in 0.0f64..1.0) {
        let expected = if score > 0.8 {
            "high"
        } else if score > 0.5 {
            "medium"
        } else {
            "low"
        };

        let (first_node, first_trail) = run_decision(score);
        let (second_node, second_trail) = run_decision(score);
        prop_assert_eq!(first_node.as_str(), expected);
        prop_assert_eq!(first_node, second_node);
        prop_assert_eq!(first_trail, second_trail);
    }
}

#[test]
fn test_empty_guard_always_passes() {
    assert!(Guard::default().evaluate(&Map::new()));
    let sum = expression::evaluate("1 + 1", &Map::<String, Value>::new()).unwrap();
    assert_eq!(sum.as_f64(), Some(2.0));
}
