//! Integration tests driving real child processes.

use std::time::Duration;

use stagehand_backend::{DeploymentBackend, Error};
use stagehand_backend_process::ProcessBackend;
use stagehand_plan::{LaunchSpec, ShutdownMode};

async fn wait_for_running_state(backend: &ProcessBackend, name: &str, running: bool) -> bool {
    for _ in 0..50 {
        if backend.is_running(name).await.unwrap() == running {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

#[tokio::test]
async fn spawns_and_gracefully_terminates_a_unit() {
    let backend = ProcessBackend::new([(
        "sleeper".to_string(),
        LaunchSpec::new("sleep").with_args(["30"]),
    )]);

    backend.start(&["sleeper".to_string()]).await.unwrap();
    assert!(backend.is_running("sleeper").await.unwrap());
    assert_eq!(backend.list_running().await.unwrap(), vec!["sleeper"]);

    backend
        .signal("sleeper", ShutdownMode::Graceful)
        .await
        .unwrap();
    assert!(wait_for_running_state(&backend, "sleeper", false).await);
    assert!(backend.list_running().await.unwrap().is_empty());
}

#[tokio::test]
async fn force_stop_kills_a_unit_that_ignores_sigterm() {
    let backend = ProcessBackend::new([(
        "stubborn".to_string(),
        LaunchSpec::new("sh").with_args(["-c", "trap '' TERM; sleep 30"]),
    )]);

    backend.start(&["stubborn".to_string()]).await.unwrap();
    assert!(wait_for_running_state(&backend, "stubborn", true).await);

    // Give the shell a moment to install its trap, then confirm SIGTERM
    // does not bring it down.
    tokio::time::sleep(Duration::from_millis(300)).await;
    backend
        .signal("stubborn", ShutdownMode::Graceful)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(backend.is_running("stubborn").await.unwrap());

    backend.force_stop("stubborn").await.unwrap();
    assert!(wait_for_running_state(&backend, "stubborn", false).await);
}

#[tokio::test]
async fn immediate_mode_maps_to_sigkill() {
    let backend = ProcessBackend::new([(
        "victim".to_string(),
        LaunchSpec::new("sh").with_args(["-c", "trap '' TERM; sleep 30"]),
    )]);

    backend.start(&["victim".to_string()]).await.unwrap();
    assert!(wait_for_running_state(&backend, "victim", true).await);

    backend
        .signal("victim", ShutdownMode::Immediate)
        .await
        .unwrap();
    assert!(wait_for_running_state(&backend, "victim", false).await);
}

#[tokio::test]
async fn starting_an_unknown_unit_errors() {
    let backend = ProcessBackend::new(Vec::<(String, LaunchSpec)>::new());
    let error = backend.start(&["ghost".to_string()]).await.unwrap_err();
    assert!(matches!(error, Error::UnknownUnit(name) if name == "ghost"));
}

#[tokio::test]
async fn signalling_a_never_started_unit_is_a_no_op() {
    let backend = ProcessBackend::new([(
        "idle".to_string(),
        LaunchSpec::new("sleep").with_args(["30"]),
    )]);

    backend
        .signal("idle", ShutdownMode::Graceful)
        .await
        .unwrap();
    backend.force_stop("idle").await.unwrap();
    assert!(!backend.is_running("idle").await.unwrap());
}

#[tokio::test]
async fn start_is_idempotent_for_a_running_unit() {
    let backend = ProcessBackend::new([(
        "sleeper".to_string(),
        LaunchSpec::new("sleep").with_args(["30"]),
    )]);

    backend.start(&["sleeper".to_string()]).await.unwrap();
    backend.start(&["sleeper".to_string()]).await.unwrap();
    assert_eq!(backend.list_running().await.unwrap(), vec!["sleeper"]);

    backend.force_stop("sleeper").await.unwrap();
    assert!(wait_for_running_state(&backend, "sleeper", false).await);
}
