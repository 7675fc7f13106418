//! Suspension, gated-action decisions, resumption, checkpoint history, and
//! the cross-run store.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use stepgraph_core::{
    CheckpointSaver, GateDecision, GraphBuilder, GraphError, InMemoryCheckpointSaver,
    InMemoryStore, NodeOutput, RunOutcome, Store,
};

fn completed_state(outcome: RunOutcome) -> Value {
    match outcome {
        RunOutcome::Completed { state } => state,
        other => panic!("expected completed run, got {other:?}"),
    }
}

/// plan -> approval -> finalize, with `approval` either gating its action
/// or committing it directly.
fn approval_builder(gated: bool) -> GraphBuilder {
    let mut builder = GraphBuilder::new();
    builder.add_node("plan", |_ctx| {
        Box::pin(async move { Ok(NodeOutput::update(json!({"plan": "ship it"}))) })
    });
    builder.add_node("approval", move |_ctx| {
        Box::pin(async move {
            let action = json!({"approved": "yes", "budget": 10});
            if gated {
                Ok(NodeOutput::gate(action))
            } else {
                Ok(NodeOutput::update(action))
            }
        })
    });
    builder.add_node("finalize", |ctx| {
        Box::pin(async move {
            let approved = ctx.state["approved"].as_str().unwrap_or("missing");
            Ok(NodeOutput::update(json!({"final": approved})))
        })
    });
    builder.set_entry("plan");
    builder.add_edge("plan", "approval");
    builder.add_edge("approval", "finalize");
    builder
}

#[tokio::test]
async fn gated_run_suspends_with_descriptor() {
    let saver = Arc::new(InMemoryCheckpointSaver::new());
    let compiled = approval_builder(true)
        .compile()
        .unwrap()
        .with_checkpointer(saver.clone());

    match compiled.start(json!({}), "run-g").await.unwrap() {
        RunOutcome::Suspended { run_id, pending } => {
            assert_eq!(run_id, "run-g");
            assert_eq!(pending.len(), 1);
            assert_eq!(pending[0].node, "approval");
            assert_eq!(pending[0].action["budget"], 10);
        }
        other => panic!("expected suspension, got {other:?}"),
    }

    // The suspension checkpoint is durable and marked as waiting.
    let checkpoint = saver.load("run-g").await.unwrap().unwrap();
    assert!(checkpoint.is_suspended());
}

#[tokio::test]
async fn approve_commits_the_proposed_action() {
    let saver = Arc::new(InMemoryCheckpointSaver::new());
    let compiled = approval_builder(true)
        .compile()
        .unwrap()
        .with_checkpointer(saver);

    let outcome = compiled.start(json!({}), "run-approve").await.unwrap();
    assert!(matches!(outcome, RunOutcome::Suspended { .. }));

    let state = completed_state(
        compiled
            .resume("run-approve", vec![GateDecision::Approve])
            .await
            .unwrap(),
    );
    assert_eq!(state["approved"], "yes");
    assert_eq!(state["budget"], 10);
    assert_eq!(state["final"], "yes");
}

#[tokio::test]
async fn suspend_resume_as_is_matches_ungated_run() {
    let saver = Arc::new(InMemoryCheckpointSaver::new());
    let gated = approval_builder(true)
        .compile()
        .unwrap()
        .with_checkpointer(saver);
    let ungated = approval_builder(false).compile().unwrap();

    let suspended = gated.start(json!({}), "run-eq").await.unwrap();
    assert!(matches!(suspended, RunOutcome::Suspended { .. }));
    let resumed_state = completed_state(
        gated
            .resume("run-eq", vec![GateDecision::Approve])
            .await
            .unwrap(),
    );

    let direct_state = completed_state(ungated.start(json!({}), "run-direct").await.unwrap());
    assert_eq!(resumed_state, direct_state);
}

#[tokio::test]
async fn modify_substitutes_the_action() {
    let saver = Arc::new(InMemoryCheckpointSaver::new());
    let compiled = approval_builder(true)
        .compile()
        .unwrap()
        .with_checkpointer(saver);

    compiled.start(json!({}), "run-modify").await.unwrap();
    let state = completed_state(
        compiled
            .resume(
                "run-modify",
                vec![GateDecision::Modify(json!({"approved": "with conditions"}))],
            )
            .await
            .unwrap(),
    );
    assert_eq!(state["approved"], "with conditions");
    assert_eq!(state["final"], "with conditions");
    // The proposed budget was replaced wholesale, not merged.
    assert!(state.get("budget").is_none());
}

#[tokio::test]
async fn reject_commits_nothing_for_the_action() {
    let saver = Arc::new(InMemoryCheckpointSaver::new());
    let compiled = approval_builder(true)
        .compile()
        .unwrap()
        .with_checkpointer(saver);

    compiled.start(json!({}), "run-reject").await.unwrap();
    let state = completed_state(
        compiled
            .resume("run-reject", vec![GateDecision::Reject])
            .await
            .unwrap(),
    );
    assert!(state.get("approved").is_none());
    assert_eq!(state["final"], "missing");
}

#[tokio::test]
async fn gate_without_saver_is_a_configuration_error() {
    let compiled = approval_builder(true).compile().unwrap();
    let err = compiled.start(json!({}), "run-nosaver").await.unwrap_err();
    assert!(matches!(err, GraphError::Configuration(_)));
}

#[tokio::test]
async fn resume_unknown_run_fails() {
    let saver = Arc::new(InMemoryCheckpointSaver::new());
    let compiled = approval_builder(true)
        .compile()
        .unwrap()
        .with_checkpointer(saver);

    let err = compiled
        .resume("never-started", vec![GateDecision::Approve])
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::Checkpoint(_)));
}

#[tokio::test]
async fn resume_with_wrong_decision_count_fails() {
    let saver = Arc::new(InMemoryCheckpointSaver::new());
    let compiled = approval_builder(true)
        .compile()
        .unwrap()
        .with_checkpointer(saver);

    compiled.start(json!({}), "run-count").await.unwrap();
    let err = compiled
        .resume(
            "run-count",
            vec![GateDecision::Approve, GateDecision::Reject],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::Configuration(_)));
}

#[tokio::test]
async fn resume_of_completed_run_fails() {
    let saver = Arc::new(InMemoryCheckpointSaver::new());
    let compiled = approval_builder(false)
        .compile()
        .unwrap()
        .with_checkpointer(saver);

    compiled.start(json!({}), "run-done").await.unwrap();
    let err = compiled
        .resume("run-done", vec![GateDecision::Approve])
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::Configuration(_)));
}

#[tokio::test]
async fn resume_continues_after_transient_failure() {
    let saver = Arc::new(InMemoryCheckpointSaver::new());
    let attempts = Arc::new(AtomicUsize::new(0));

    let mut builder = GraphBuilder::new();
    builder.add_node("a", |_ctx| {
        Box::pin(async move { Ok(NodeOutput::update(json!({"field1": "x"}))) })
    });
    let counter = attempts.clone();
    builder.add_node("b", move |_ctx| {
        let counter = counter.clone();
        Box::pin(async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err("transient backend outage".into());
            }
            Ok(NodeOutput::update(json!({"field2": "xy"})))
        })
    });
    builder.set_entry("a");
    builder.add_edge("a", "b");

    let compiled = builder.compile().unwrap().with_checkpointer(saver);

    match compiled.start(json!({}), "run-crash").await.unwrap() {
        RunOutcome::Failed { node, state, .. } => {
            assert_eq!(node, "b");
            assert_eq!(state["field1"], "x");
        }
        other => panic!("expected failed run, got {other:?}"),
    }

    // The last durable checkpoint still holds the failed task; an empty
    // decision vector picks the run back up from there.
    let state = completed_state(compiled.resume("run-crash", vec![]).await.unwrap());
    assert_eq!(state["field1"], "x");
    assert_eq!(state["field2"], "xy");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    // Once complete, nothing is left to continue.
    let err = compiled.resume("run-crash", vec![]).await.unwrap_err();
    assert!(matches!(err, GraphError::Configuration(_)));
}

#[tokio::test]
async fn checkpoints_accumulate_per_superstep() {
    let saver = Arc::new(InMemoryCheckpointSaver::new());
    let compiled = approval_builder(false)
        .compile()
        .unwrap()
        .with_checkpointer(saver.clone());

    compiled.start(json!({}), "run-history").await.unwrap();
    let history = saver.list("run-history").await.unwrap();
    // One checkpoint per committed superstep: plan, approval, finalize.
    assert_eq!(history.len(), 3);
    let steps: Vec<usize> = history.iter().map(|c| c.superstep).collect();
    assert_eq!(steps, vec![1, 2, 3]);
    assert!(!history.last().unwrap().is_suspended());
}

#[tokio::test]
async fn store_survives_across_runs() {
    let store = Arc::new(InMemoryStore::new());

    let mut builder = GraphBuilder::new();
    builder.add_node("remember", |ctx| {
        Box::pin(async move {
            let store = ctx.store.as_ref().expect("store configured");
            match store.get("memories", "greeting").await? {
                Some(value) => Ok(NodeOutput::update(json!({"recalled": value}))),
                None => {
                    store.put("memories", "greeting", json!("hello")).await?;
                    Ok(NodeOutput::update(json!({"recalled": null})))
                }
            }
        })
    });
    builder.set_entry("remember");
    let compiled = builder.compile().unwrap().with_store(store);

    let first = completed_state(compiled.start(json!({}), "run-one").await.unwrap());
    assert_eq!(first["recalled"], Value::Null);

    let second = completed_state(compiled.start(json!({}), "run-two").await.unwrap());
    assert_eq!(second["recalled"], "hello");
}
