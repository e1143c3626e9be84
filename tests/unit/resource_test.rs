//! Unit tests for the inference resource state machine

#[path = "../common/mod.rs"]
mod common;

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use tryon_serving::codec::{CANVAS_HEIGHT, CANVAS_WIDTH};
use tryon_serving::model::{Device, LoadErrorKind, LoadState, Precision};
use tryon_serving::AppError;

#[tokio::test]
async fn test_concurrent_ensure_loaded_loads_once() {
    let loader = Arc::new(
        MockLoader::new()
            .with("model-A", LoadOutcome::Succeed)
            .delay(Duration::from_millis(100)),
    );
    let resource = resource(model_config("model-A", None), loader.clone());

    let results = join_all((0..16).map(|_| {
        let resource = resource.clone();
        async move { resource.ensure_loaded().await }
    }))
    .await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(loader.calls_for("model-A"), 1);
    assert_eq!(resource.state(), LoadState::Ready);
}

#[tokio::test]
async fn test_ensure_loaded_is_idempotent() {
    let loader = Arc::new(MockLoader::new().with("model-A", LoadOutcome::Succeed));
    let resource = resource(model_config("model-A", None), loader.clone());

    resource.ensure_loaded().await.unwrap();
    resource.ensure_loaded().await.unwrap();

    assert_eq!(loader.total_calls(), 1);
}

#[tokio::test]
async fn test_missing_artifact_falls_back() {
    let loader = Arc::new(
        MockLoader::new()
            .with("model-A", LoadOutcome::Fail(LoadErrorKind::MissingArtifact))
            .with("model-B", LoadOutcome::Succeed),
    );
    let resource = resource(model_config("model-A", Some("model-B")), loader.clone());

    resource.ensure_loaded().await.unwrap();

    let status = resource.status();
    assert_eq!(status.state, LoadState::Ready);
    assert_eq!(status.model_id.as_deref(), Some("model-B"));
    assert!(status.last_error.is_none());
    assert_eq!(loader.calls_for("model-A"), 1);
    assert_eq!(loader.calls_for("model-B"), 1);
}

#[tokio::test]
async fn test_auth_failure_falls_back() {
    let loader = Arc::new(
        MockLoader::new()
            .with("model-A", LoadOutcome::Fail(LoadErrorKind::AuthFailure))
            .with("model-B", LoadOutcome::Succeed),
    );
    let resource = resource(model_config("model-A", Some("model-B")), loader.clone());

    resource.ensure_loaded().await.unwrap();
    assert_eq!(resource.status().model_id.as_deref(), Some("model-B"));
}

#[tokio::test]
async fn test_other_error_skips_fallback() {
    let loader = Arc::new(
        MockLoader::new()
            .with("model-A", LoadOutcome::Fail(LoadErrorKind::Other))
            .with("model-B", LoadOutcome::Succeed),
    );
    let resource = resource(model_config("model-A", Some("model-B")), loader.clone());

    let err = resource.ensure_loaded().await.unwrap_err();

    match err {
        AppError::ModelLoad(e) => assert_eq!(e, simulated_error(LoadErrorKind::Other, "model-A")),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(loader.calls_for("model-B"), 0);
    assert_eq!(resource.state(), LoadState::Failed);
}

#[tokio::test]
async fn test_fallback_equal_to_primary_is_not_attempted() {
    let loader = Arc::new(
        MockLoader::new().with("model-A", LoadOutcome::Fail(LoadErrorKind::MissingArtifact)),
    );
    let resource = resource(model_config("model-A", Some("model-A")), loader.clone());

    assert!(resource.ensure_loaded().await.is_err());
    assert_eq!(loader.total_calls(), 1);
}

#[tokio::test]
async fn test_empty_fallback_is_not_attempted() {
    let loader = Arc::new(
        MockLoader::new().with("model-A", LoadOutcome::Fail(LoadErrorKind::MissingArtifact)),
    );
    let resource = resource(model_config("model-A", Some("")), loader.clone());

    assert!(resource.ensure_loaded().await.is_err());
    assert_eq!(loader.total_calls(), 1);
    assert_eq!(resource.state(), LoadState::Failed);
}

#[tokio::test]
async fn test_failed_fallback_surfaces_primary_error() {
    let loader = Arc::new(
        MockLoader::new()
            .with("model-A", LoadOutcome::Fail(LoadErrorKind::MissingArtifact))
            .with("model-B", LoadOutcome::Fail(LoadErrorKind::Other)),
    );
    let resource = resource(model_config("model-A", Some("model-B")), loader.clone());

    match resource.ensure_loaded().await.unwrap_err() {
        AppError::ModelLoad(e) => {
            assert_eq!(e, simulated_error(LoadErrorKind::MissingArtifact, "model-A"))
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(loader.calls_for("model-B"), 1);
    assert!(resource.status().last_error.unwrap().contains("model-A"));
}

#[tokio::test]
async fn test_failed_state_is_terminal() {
    let loader = Arc::new(
        MockLoader::new().with("model-A", LoadOutcome::Fail(LoadErrorKind::Other)),
    );
    let resource = resource(model_config("model-A", None), loader.clone());

    assert!(resource.ensure_loaded().await.is_err());
    assert!(matches!(
        resource.ensure_loaded().await,
        Err(AppError::ModelLoad(_))
    ));
    assert!(matches!(resource.check_ready(), Err(AppError::ModelLoad(_))));
    assert_eq!(loader.total_calls(), 1);
}

#[tokio::test]
async fn test_load_timeout_skips_fallback() {
    let loader = Arc::new(
        MockLoader::new()
            .with("model-A", LoadOutcome::Hang)
            .with("model-B", LoadOutcome::Succeed),
    );
    let mut config = model_config("model-A", Some("model-B"));
    config.load_timeout_secs = 1;
    let resource = resource(config, loader.clone());

    match resource.ensure_loaded().await.unwrap_err() {
        AppError::ModelLoad(e) => assert_eq!(e.kind, LoadErrorKind::Timeout),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(loader.calls_for("model-B"), 0);
}

#[tokio::test]
async fn test_gpu_downgrades_to_cpu_without_accelerator() {
    let loader = Arc::new(MockLoader::new().with("model-A", LoadOutcome::Succeed));
    let mut config = model_config("model-A", None);
    config.device = Device::Gpu;
    let resource = resource_with(config, loader.clone(), false);

    resource.ensure_loaded().await.unwrap();

    let spec = &loader.specs()[0];
    assert_eq!(spec.device, Device::Cpu);
    assert_eq!(spec.precision, Precision::Fp32);
    assert_eq!(resource.status().device, Some(Device::Cpu));
}

#[tokio::test]
async fn test_gpu_kept_with_accelerator() {
    let loader = Arc::new(MockLoader::new().with("model-A", LoadOutcome::Succeed));
    let resource = resource_with(model_config("model-A", None), loader.clone(), true);

    resource.ensure_loaded().await.unwrap();

    let spec = &loader.specs()[0];
    assert_eq!(spec.device, Device::Gpu);
    assert_eq!(spec.precision, Precision::Fp16);
}

#[tokio::test]
async fn test_run_before_ready_never_touches_pipeline() {
    let loader = Arc::new(MockLoader::new().with("model-A", LoadOutcome::Succeed));
    let resource = resource(model_config("model-A", None), loader.clone());
    let image = sample_image(64, 64);

    assert!(matches!(
        resource.run(&image, &image).await,
        Err(AppError::NotReady(_))
    ));
    assert_eq!(loader.total_calls(), 0);
    assert_eq!(loader.runs(), 0);
}

#[tokio::test]
async fn test_run_after_failed_load_reports_load_error() {
    let loader = Arc::new(
        MockLoader::new().with("model-A", LoadOutcome::Fail(LoadErrorKind::MissingArtifact)),
    );
    let resource = resource(model_config("model-A", None), loader.clone());
    let _ = resource.ensure_loaded().await;
    let image = sample_image(64, 64);

    match resource.run(&image, &image).await {
        Err(AppError::ModelLoad(err)) => {
            assert_eq!(err.identifier, "model-A");
            assert_eq!(err.kind, LoadErrorKind::MissingArtifact);
        }
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
    assert_eq!(loader.runs(), 0);
}

#[tokio::test]
async fn test_run_normalizes_inputs_and_returns_first_candidate() {
    let loader = Arc::new(MockLoader::new().with("model-A", LoadOutcome::Succeed));
    let resource = resource(model_config("model-A", None), loader.clone());
    resource.ensure_loaded().await.unwrap();

    let person = sample_image(300, 200);
    let cloth = sample_image(1024, 1024);
    let output = resource.run(&person, &cloth).await.unwrap();

    let canvas = (CANVAS_WIDTH, CANVAS_HEIGHT);
    assert_eq!(loader.seen.lock().unwrap()[0], [canvas, canvas, canvas]);
    // Echo returns the normalized person first, then a black image
    assert_eq!(output, tryon_serving::codec::normalize(&person));
}

#[tokio::test]
async fn test_inference_failure_keeps_ready() {
    let loader = Arc::new(
        MockLoader::new()
            .with("model-A", LoadOutcome::Succeed)
            .behavior(PipelineBehavior::Fail),
    );
    let resource = resource(model_config("model-A", None), loader.clone());
    resource.ensure_loaded().await.unwrap();
    let image = sample_image(32, 48);

    match resource.run(&image, &image).await {
        Err(AppError::InferenceExecution(msg)) => assert!(msg.contains("out of memory")),
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
    assert_eq!(resource.state(), LoadState::Ready);
    assert!(resource.run(&image, &image).await.is_err());
    assert_eq!(loader.runs(), 2);
}

#[tokio::test]
async fn test_inference_panic_is_contained() {
    let loader = Arc::new(
        MockLoader::new()
            .with("model-A", LoadOutcome::Succeed)
            .behavior(PipelineBehavior::Panic),
    );
    let resource = resource(model_config("model-A", None), loader.clone());
    resource.ensure_loaded().await.unwrap();
    let image = sample_image(32, 48);

    assert!(matches!(
        resource.run(&image, &image).await,
        Err(AppError::InferenceExecution(_))
    ));
    assert_eq!(resource.state(), LoadState::Ready);
}

#[tokio::test]
async fn test_inference_timeout() {
    let loader = Arc::new(
        MockLoader::new()
            .with("model-A", LoadOutcome::Succeed)
            .behavior(PipelineBehavior::Hang),
    );
    let mut config = model_config("model-A", None);
    config.inference_timeout_secs = 1;
    let resource = resource(config, loader.clone());
    resource.ensure_loaded().await.unwrap();
    let image = sample_image(32, 48);

    match resource.run(&image, &image).await {
        Err(AppError::InferenceExecution(msg)) => assert!(msg.contains("within 1s")),
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
    assert_eq!(resource.state(), LoadState::Ready);
}

#[tokio::test]
async fn test_concurrent_runs_are_serialized() {
    let loader = Arc::new(
        MockLoader::new()
            .with("model-A", LoadOutcome::Succeed)
            .behavior(PipelineBehavior::Slow(Duration::from_millis(50))),
    );
    let resource = resource(model_config("model-A", None), loader.clone());
    resource.ensure_loaded().await.unwrap();
    let image = sample_image(32, 48);

    let results = join_all((0..4).map(|_| resource.run(&image, &image))).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(loader.runs(), 4);
    assert_eq!(loader.in_flight.peak(), 1);
}

#[tokio::test]
async fn test_concurrent_runs_respect_slot_count() {
    let loader = Arc::new(
        MockLoader::new()
            .with("model-A", LoadOutcome::Succeed)
            .behavior(PipelineBehavior::Slow(Duration::from_millis(100))),
    );
    let mut config = model_config("model-A", None);
    config.max_concurrent_inference = 2;
    let resource = resource(config, loader.clone());
    resource.ensure_loaded().await.unwrap();
    let image = sample_image(32, 48);

    let results = join_all((0..6).map(|_| resource.run(&image, &image))).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(loader.in_flight.peak(), 2);
}

#[tokio::test]
async fn test_dropped_caller_keeps_slot_until_call_finishes() {
    let loader = Arc::new(
        MockLoader::new()
            .with("model-A", LoadOutcome::Succeed)
            .behavior(PipelineBehavior::Slow(Duration::from_millis(300))),
    );
    let resource = resource(model_config("model-A", None), loader.clone());
    resource.ensure_loaded().await.unwrap();

    let first = {
        let resource = resource.clone();
        tokio::spawn(async move {
            let image = sample_image(32, 48);
            resource.run(&image, &image).await.map(|_| ())
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    first.abort();
    assert!(first.await.unwrap_err().is_cancelled());

    // The abandoned call is still executing and owns the only slot
    assert_eq!(loader.in_flight.current(), 1);

    let image = sample_image(32, 48);
    assert!(resource.run(&image, &image).await.is_ok());
    assert_eq!(loader.runs(), 2);
    assert_eq!(loader.in_flight.peak(), 1);
}

#[tokio::test]
async fn test_slot_wait_counts_toward_inference_timeout() {
    let loader = Arc::new(
        MockLoader::new()
            .with("model-A", LoadOutcome::Succeed)
            .behavior(PipelineBehavior::Slow(Duration::from_millis(700))),
    );
    let mut config = model_config("model-A", None);
    config.inference_timeout_secs = 1;
    let resource = resource(config, loader.clone());
    resource.ensure_loaded().await.unwrap();
    let image = sample_image(32, 48);

    let (a, b) = tokio::join!(resource.run(&image, &image), resource.run(&image, &image));

    let timed_out = [&a, &b]
        .iter()
        .filter(|r| matches!(r, Err(AppError::InferenceExecution(msg)) if msg.contains("within 1s")))
        .count();
    assert_eq!(timed_out, 1);
    assert!(a.is_ok() || b.is_ok());
    assert_eq!(loader.in_flight.peak(), 1);
}

#[tokio::test]
async fn test_empty_candidates_is_execution_error() {
    let loader = Arc::new(
        MockLoader::new()
            .with("model-A", LoadOutcome::Succeed)
            .behavior(PipelineBehavior::Empty),
    );
    let resource = resource(model_config("model-A", None), loader.clone());
    resource.ensure_loaded().await.unwrap();
    let image = sample_image(32, 48);

    assert!(matches!(
        resource.run(&image, &image).await,
        Err(AppError::InferenceExecution(_))
    ));
}

#[tokio::test]
async fn test_not_ready_while_loading() {
    let loader = Arc::new(
        MockLoader::new()
            .with("model-A", LoadOutcome::Succeed)
            .delay(Duration::from_millis(300)),
    );
    let resource = resource(model_config("model-A", None), loader.clone());

    let background = {
        let resource = resource.clone();
        tokio::spawn(async move { resource.ensure_loaded().await })
    };
    wait_for_loading(&resource).await;

    assert_eq!(resource.state(), LoadState::Loading);
    assert!(matches!(resource.check_ready(), Err(AppError::NotReady(None))));

    background.await.unwrap().unwrap();
    assert!(resource.check_ready().is_ok());
    assert!(resource.status().loaded_at.is_some());
}
