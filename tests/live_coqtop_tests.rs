//! Tests against a real coqtop installation
//!
//! These tests require `coqtop` on `PATH` and are only run when the
//! `integration-tests` feature is enabled.
//!
//! Run with: `cargo test --features integration-tests`

#![cfg(feature = "integration-tests")]

use coqtop_codes::version::query_version;
use coqtop_codes::{AsyncEngine, CommandState, Engine, Position, Response};
use std::path::Path;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_coqtop_version() {
    let version = query_version(Path::new("coqtop"))
        .expect("Failed to run coqtop")
        .expect("Failed to parse coqtop version");
    println!("coqtop version {}", version);
}

#[test]
fn test_prove_trivial_lemma() {
    init();
    let engine = Engine::new();
    engine.restart(Vec::<String>::new()).expect("Failed to start coqtop");

    let sentences = [
        ("Lemma foo : True.", Position::new(0, 17, 17)),
        ("Proof.", Position::new(1, 6, 6)),
        ("exact I.", Position::new(2, 8, 8)),
        ("Qed.", Position::new(3, 4, 4)),
    ];
    for (text, end) in sentences {
        let response = engine.advance(text, end).expect("Add failed");
        assert!(response.is_ok(), "{} rejected: {:?}", text, response);
    }

    let goals = engine.goals(|| {}).expect("Goal failed");
    assert!(goals.is_ok());
    engine.wait_until_checked(|| {}).expect("Reading feedback failed");

    let commands = engine.commands();
    assert_eq!(engine.active_count(), 5);
    assert!(commands[..5]
        .iter()
        .all(|c| c.state == CommandState::Processed));
    engine.kill();
}

#[test]
fn test_syntax_error_is_rejected() {
    init();
    let engine = Engine::new();
    engine.restart(Vec::<String>::new()).expect("Failed to start coqtop");

    let response = engine
        .advance("Lemma foo True.", Position::new(0, 15, 15))
        .expect("Add failed");
    match response {
        Response::Err(failure) => {
            assert!(!failure.message.is_empty());
            assert!(failure.loc.is_some());
        }
        Response::Ok { .. } => panic!("malformed lemma was accepted"),
    }
    assert_eq!(engine.active_count(), 1);
    assert!(!engine.get_messages().is_empty());
    engine.kill();
}

#[test]
fn test_goals_inside_proof() {
    init();
    let engine = Engine::new();
    engine.restart(Vec::<String>::new()).expect("Failed to start coqtop");
    engine
        .advance("Lemma foo (n : nat) : n = n.", Position::new(0, 28, 28))
        .expect("Add failed");

    let goals = engine
        .goals(|| {})
        .expect("Goal failed")
        .into_value()
        .expect("Goal rejected")
        .into_goals()
        .expect("Unexpected goal payload")
        .expect("No proof open");
    assert_eq!(goals.fg.len(), 1);
    assert!(goals.fg[0].ccl.contains("n = n"));
    engine.kill();
}

#[tokio::test]
async fn test_async_query() {
    init();
    let engine = AsyncEngine::new();
    engine.restart(Vec::new()).await.expect("Failed to start coqtop");
    let response = engine.query("Check nat.").await.expect("Query failed");
    assert!(response.is_ok());
    let shown = match response {
        Response::Ok { message, .. } => {
            message.unwrap_or_default() + &engine.engine().get_messages()
        }
        Response::Err(_) => unreachable!(),
    };
    assert!(shown.contains("nat"));
    engine.kill().await.expect("kill failed");
}
