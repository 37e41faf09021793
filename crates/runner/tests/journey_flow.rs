//! End-to-end journey flow over the in-memory capabilities: fresh start,
//! value collection, branch selection, persistence, and resumption in a
//! second runner sharing the same stores.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use waypoint_core::capabilities::{
    capture_navigator, InMemoryMetaStore, InMemoryTransport, SessionTransport,
};
use waypoint_core::config::JourneySettings;
use waypoint_core::types::{Field, ModelsConfig, Session};
use waypoint_journey::types::{PathGroupConfig, PathSpec, StepDef};
use waypoint_runner::{JourneyRunner, NextOptions, RunnerConfig, SaveStepOptions, SessionHook};

fn settings() -> JourneySettings {
    serde_json::from_value(json!({
        "id": "car-quote",
        "route": "quote",
        "application": "quotes",
        "journey": "car"
    }))
    .unwrap()
}

fn steps() -> Vec<StepDef> {
    let mut vehicle = StepDef::new("vehicle", "vehicle");
    vehicle.can_load_from_session = true;
    vehicle.children = vec![Field::new("plate", json!(""))];

    let mut contact = StepDef::new("contact", "contact");
    contact.can_load_from_session = true;
    let mut email = Field::new("email", json!(""));
    email.models = Some(ModelsConfig {
        save_to: vec!["contact.email".to_string()],
        use_path: None,
    });
    contact.children = vec![email];

    let mut recap = StepDef::new("recap", "recap");
    recap.can_load_from_session = true;

    vec![vehicle, contact, recap]
}

fn resumable(id: &str, slug: &str) -> StepDef {
    let mut def = StepDef::new(id, slug);
    def.can_load_from_session = true;
    def
}

fn paths() -> Vec<PathGroupConfig> {
    vec![PathGroupConfig {
        id: "coverage".to_string(),
        paths: vec![
            PathSpec {
                id: "casco".to_string(),
                steps: vec![resumable("cascoDetails", "casco-details")],
            },
            PathSpec {
                id: "liability".to_string(),
                steps: vec![resumable("liabilityDetails", "liability-details")],
            },
        ],
    }]
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

struct StripModelsHook;

impl SessionHook for StripModelsHook {
    fn before_save(&self, mut session: Session) -> Session {
        session.data.models = json!({});
        session
    }
}

#[tokio::test]
async fn full_journey_flow_with_resumption() {
    let meta_store = Arc::new(InMemoryMetaStore::new());
    let transport = Arc::new(InMemoryTransport::new());
    let navigator = capture_navigator();

    let runner = JourneyRunner::new(
        RunnerConfig {
            settings: settings(),
            steps: steps(),
            paths: Vec::new(),
            ab: None,
        },
        meta_store.clone(),
        transport.clone(),
        navigator.clone(),
    );

    // Fresh start on the first step creates a session in the background.
    runner.init("vehicle", None).await.unwrap();
    assert_eq!(runner.current_step_id().unwrap(), "vehicle");
    wait_until(|| runner.session().is_active()).await;

    // Collect values and walk forward.
    let values = HashMap::from([("plate".to_string(), json!("ZG123AB"))]);
    runner
        .save_current_step(
            &values,
            SaveStepOptions {
                valid: true,
                save_session: false,
            },
        )
        .unwrap();

    assert!(runner.next(NextOptions::default()).unwrap());
    assert_eq!(navigator.last().unwrap(), "/quote/contact");

    let values = HashMap::from([("email".to_string(), json!("a@b.hr"))]);
    runner
        .save_current_step(
            &values,
            SaveStepOptions {
                valid: true,
                save_session: false,
            },
        )
        .unwrap();
    assert_eq!(runner.models(), json!({"contact": {"email": "a@b.hr"}}));

    assert!(runner.next(NextOptions::default()).unwrap());
    assert_eq!(runner.current_step_id().unwrap(), "recap");

    // Confirmed write lands the blob remotely.
    assert!(runner.ensure_save_session().await.unwrap());
    let session_id = runner.session().session_id().unwrap();
    let stored = transport.fetch(&session_id).await.unwrap();
    assert!(stored.data.steps["vehicle"].valid);
    assert_eq!(stored.data.steps["vehicle"].values["plate"], json!("ZG123AB"));

    // A second runner over the same stores resumes exactly where we were.
    let resumed = JourneyRunner::new(
        RunnerConfig {
            settings: settings(),
            steps: steps(),
            paths: Vec::new(),
            ab: None,
        },
        meta_store,
        transport,
        capture_navigator(),
    );
    resumed.init("recap", None).await.unwrap();

    assert_eq!(resumed.current_step_id().unwrap(), "recap");
    assert_eq!(resumed.value_by_id("plate"), Some(json!("ZG123AB")));
    assert_eq!(resumed.value_by_id("email"), Some(json!("a@b.hr")));
    assert_eq!(resumed.models(), json!({"contact": {"email": "a@b.hr"}}));
}

#[tokio::test]
async fn branch_selection_survives_resumption() {
    let meta_store = Arc::new(InMemoryMetaStore::new());
    let transport = Arc::new(InMemoryTransport::new());

    let mut fork = StepDef::new("fork", "fork");
    fork.can_load_from_session = true;
    let mut recap = StepDef::new("recap", "recap");
    recap.can_load_from_session = true;

    let runner = JourneyRunner::new(
        RunnerConfig {
            settings: settings(),
            steps: vec![fork.clone(), recap.clone()],
            paths: paths(),
            ab: None,
        },
        meta_store.clone(),
        transport.clone(),
        capture_navigator(),
    );

    runner.init("fork", None).await.unwrap();
    wait_until(|| runner.session().is_active()).await;

    runner
        .save_current_step(&HashMap::new(), SaveStepOptions { valid: true, save_session: false })
        .unwrap();
    runner
        .next(NextOptions {
            path: Some("casco".to_string()),
        })
        .unwrap();
    assert_eq!(runner.current_step_id().unwrap(), "cascoDetails");
    assert!(runner.ensure_save_session().await.unwrap());

    let resumed = JourneyRunner::new(
        RunnerConfig {
            settings: settings(),
            steps: vec![fork, recap],
            paths: paths(),
            ab: None,
        },
        meta_store,
        transport,
        capture_navigator(),
    );
    resumed.init("casco-details", None).await.unwrap();

    // The replayed branch sits between fork and recap again.
    assert_eq!(resumed.current_step_id().unwrap(), "cascoDetails");
}

#[tokio::test]
async fn session_hooks_shape_the_persisted_blob() {
    let transport = Arc::new(InMemoryTransport::new());
    let runner = JourneyRunner::new(
        RunnerConfig {
            settings: settings(),
            steps: steps(),
            paths: Vec::new(),
            ab: None,
        },
        Arc::new(InMemoryMetaStore::new()),
        transport.clone(),
        capture_navigator(),
    );
    runner.add_hook(Box::new(StripModelsHook));

    runner.init("vehicle", None).await.unwrap();
    wait_until(|| runner.session().is_active()).await;

    runner
        .save_current_step(&HashMap::new(), SaveStepOptions { valid: true, save_session: false })
        .unwrap();
    runner.next(NextOptions::default()).unwrap();

    // Saving the email projects it into the models document.
    let values = HashMap::from([("email".to_string(), json!("a@b.hr"))]);
    runner
        .save_current_step(&values, SaveStepOptions { valid: true, save_session: false })
        .unwrap();
    assert_eq!(runner.models(), json!({"contact": {"email": "a@b.hr"}}));
    assert!(runner.ensure_save_session().await.unwrap());

    // The hook stripped the models from the persisted blob only.
    let session_id = runner.session().session_id().unwrap();
    let stored = transport.fetch(&session_id).await.unwrap();
    assert_eq!(stored.data.models, json!({}));
    assert_eq!(stored.data.steps["contact"].values["email"], json!("a@b.hr"));
}
