mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use faceverify_core::{DetectionPolicy, DistanceMetric, ModelId};
use faceverify_engine::{ConfigOverrides, ErrorKind, ModelSelection, VerificationConfig, VerifyRequest};

fn request(registered: &str, captured: &str, overrides: ConfigOverrides) -> VerifyRequest {
    VerifyRequest {
        registered_url: registered.into(),
        captured_url: captured.into(),
        overrides,
    }
}

#[tokio::test]
async fn same_person_within_threshold_matches() {
    let (engine, _) = fixture_engine();
    let result = engine.verify(ALICE_1, ALICE_2, &euclidean_config()).await;

    assert!(result.matched);
    assert_eq!(result.distance, Some(0.45));
    assert_eq!(result.error, None);
    assert_eq!(result.error_kind, None);
    assert_eq!(result.metadata.threshold, Some(0.6));
    assert_eq!(result.metadata.similarity_metric, Some(DistanceMetric::Euclidean));
    assert_eq!(result.metadata.model, Some(ModelId::ArcFace));
    assert!(result.facial_areas.registered.is_some());
    assert!(result.facial_areas.captured.is_some());
}

#[tokio::test]
async fn different_people_do_not_match() {
    let (engine, _) = fixture_engine();
    let result = engine.verify(ALICE_1, BOB, &euclidean_config()).await;

    assert!(!result.matched);
    assert_eq!(result.distance, Some(0.82));
    assert_eq!(result.error, None);
    assert!(!result.is_error());
}

#[tokio::test]
async fn identical_images_match_at_zero() {
    let (engine, _) = fixture_engine();
    let result = engine.verify(BOB, BOB, &euclidean_config()).await;
    assert!(result.matched);
    assert_eq!(result.distance, Some(0.0));
}

#[tokio::test]
async fn distance_is_symmetric() {
    let (engine, _) = fixture_engine();
    let forward = engine.verify(ALICE_2, BOB, &euclidean_config()).await;
    let backward = engine.verify(BOB, ALICE_2, &euclidean_config()).await;
    assert!(forward.distance.is_some());
    assert_eq!(forward.distance, backward.distance);
}

#[tokio::test]
async fn missing_face_in_either_image_is_a_non_match() {
    let (engine, _) = fixture_engine();

    for (registered, captured, expected) in [
        (NO_FACE, ALICE_1, "face not detected in registered image"),
        (ALICE_1, NO_FACE, "face not detected in captured image"),
        (NO_FACE, NO_FACE, "face not detected in both images"),
    ] {
        let result = engine.verify(registered, captured, &euclidean_config()).await;
        assert!(!result.matched);
        assert_eq!(result.distance, None);
        assert_eq!(result.error.as_deref(), Some(expected));
        assert_eq!(result.error_kind, Some(ErrorKind::NoFaceFound));
        assert!(!result.is_error());
    }
}

#[tokio::test]
async fn missing_face_keeps_the_other_facial_area() {
    let (engine, _) = fixture_engine();
    let result = engine.verify(NO_FACE, BOB, &euclidean_config()).await;
    assert!(result.facial_areas.registered.is_none());
    assert!(result.facial_areas.captured.is_some());
}

#[tokio::test]
async fn relaxed_policy_embeds_without_a_face() {
    let (engine, _) = fixture_engine();
    let overrides = ConfigOverrides {
        detection_policy: Some(DetectionPolicy::Relaxed),
        ..ConfigOverrides::default()
    };
    let result = engine.handle(&request(NO_FACE, ALICE_1, overrides)).await;
    assert!(result.matched);
    assert_eq!(result.distance, Some(0.0));
}

#[tokio::test]
async fn empty_reference_is_rejected_before_any_fetch() {
    let (engine, fetcher) = fixture_engine();

    for (registered, captured) in [("", ALICE_1), (ALICE_1, "   "), ("\t", "")] {
        let result = engine.verify(registered, captured, &euclidean_config()).await;
        assert!(!result.matched);
        assert_eq!(result.distance, None);
        assert_eq!(result.error_kind, Some(ErrorKind::InvalidRequest));
        assert!(result.error.is_some());
    }
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn request_without_urls_is_invalid() {
    let (engine, fetcher) = fixture_engine();
    let request: VerifyRequest = serde_json::from_str("{}").unwrap();
    let result = engine.handle(&request).await;
    assert_eq!(result.error_kind, Some(ErrorKind::InvalidRequest));
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn unsupported_scheme_is_invalid() {
    let (engine, fetcher) = fixture_engine();
    let result = engine
        .verify("ftp://img.test/alice.png", ALICE_1, &euclidean_config())
        .await;
    assert_eq!(result.error_kind, Some(ErrorKind::InvalidRequest));
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn fetch_timeout_is_an_acquisition_failure() {
    let (engine, fetcher) = fixture_engine();
    let config = VerificationConfig {
        fetch_timeout: Duration::from_millis(50),
        ..euclidean_config()
    };

    let result = engine.verify(HANGS, ALICE_1, &config).await;

    assert!(!result.matched);
    assert_eq!(result.distance, None);
    assert_eq!(result.error_kind, Some(ErrorKind::AcquisitionFailed));
    let message = result.error.unwrap_or_default();
    assert!(message.contains("registered"), "{message}");
    assert!(message.contains("timed out"), "{message}");
    assert_eq!(fetcher.in_flight(), 0);
}

#[tokio::test]
async fn failing_branch_cancels_its_sibling_fetch() {
    let (engine, fetcher) = fixture_engine();

    let result = engine.verify(FAILS_LATE, HANGS, &euclidean_config()).await;

    assert_eq!(result.error_kind, Some(ErrorKind::AcquisitionFailed));
    assert!(result.error.unwrap_or_default().contains("410"));
    assert_eq!(fetcher.calls(), 2, "both fetches should have started");
    assert_eq!(fetcher.in_flight(), 0, "the hanging fetch should have been dropped");
    assert_eq!(fetcher.completed(), 0);
    assert!(result.time_ms < 5_000);
}

#[tokio::test]
async fn unknown_image_is_an_acquisition_failure() {
    let (engine, _) = fixture_engine();
    let result = engine
        .verify(ALICE_1, "https://img.test/nobody.png", &euclidean_config())
        .await;
    assert_eq!(result.error_kind, Some(ErrorKind::AcquisitionFailed));
    assert!(result.error.unwrap_or_default().contains("captured"));
}

#[tokio::test]
async fn undecodable_bytes_are_a_decode_failure() {
    let (engine, _) = fixture_engine();
    let result = engine.verify(NOT_AN_IMAGE, ALICE_1, &euclidean_config()).await;
    assert!(!result.matched);
    assert_eq!(result.distance, None);
    assert_eq!(result.error_kind, Some(ErrorKind::DecodeFailed));
}

#[tokio::test]
async fn backend_fault_is_reported() {
    let (engine, _) = fixture_engine();
    let result = engine.verify(ALICE_1, BROKEN_MODEL, &euclidean_config()).await;
    assert!(!result.matched);
    assert_eq!(result.distance, None);
    assert_eq!(result.error_kind, Some(ErrorKind::EmbeddingBackendFault));
    assert!(result.is_error());
}

#[tokio::test]
async fn model_swap_between_images_is_rejected() {
    let (engine, fetcher) = fixture_engine();
    let overrides = ConfigOverrides {
        model: Some(ModelSelection::PerImage {
            registered: ModelId::ArcFace,
            captured: ModelId::FaceNet512,
        }),
        ..ConfigOverrides::default()
    };
    let result = engine.handle(&request(ALICE_1, ALICE_2, overrides)).await;
    assert_eq!(result.error_kind, Some(ErrorKind::InvalidRequest));
    assert!(result.error.unwrap_or_default().contains("model swap"));
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn model_not_loaded_is_rejected() {
    let (engine, fetcher) = fixture_engine();
    let overrides = ConfigOverrides {
        model: Some(ModelSelection::Single(ModelId::FaceNet512)),
        ..ConfigOverrides::default()
    };
    let result = engine.handle(&request(ALICE_1, ALICE_2, overrides)).await;
    assert_eq!(result.error_kind, Some(ErrorKind::InvalidRequest));
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn invalid_threshold_override_is_rejected() {
    let (engine, fetcher) = fixture_engine();
    let overrides = ConfigOverrides {
        threshold: Some(-0.5),
        ..ConfigOverrides::default()
    };
    let result = engine.handle(&request(ALICE_1, ALICE_2, overrides)).await;
    assert_eq!(result.error_kind, Some(ErrorKind::InvalidRequest));
    assert_eq!(result.metadata.threshold, None);
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn metric_override_uses_calibrated_threshold() {
    let (engine, _) = fixture_engine();
    let overrides = ConfigOverrides {
        metric: Some(DistanceMetric::EuclideanL2),
        ..ConfigOverrides::default()
    };
    let result = engine.handle(&request(ALICE_1, ALICE_2, overrides)).await;
    assert_eq!(result.metadata.similarity_metric, Some(DistanceMetric::EuclideanL2));
    assert_eq!(result.metadata.threshold, Some(1.13));
    assert!(result.matched);
}

#[tokio::test]
async fn threshold_override_flips_the_verdict() {
    let (engine, _) = fixture_engine();
    let overrides = ConfigOverrides {
        threshold: Some(0.45),
        ..ConfigOverrides::default()
    };
    let result = engine.handle(&request(ALICE_1, ALICE_2, overrides)).await;
    assert_eq!(result.distance, Some(0.45));
    assert!(!result.matched, "distance equal to the threshold is not a match");
}

#[tokio::test]
async fn concurrent_requests_are_independent() {
    let (engine, _) = fixture_engine();
    let engine = Arc::new(engine);

    let handles: Vec<_> = [(ALICE_1, ALICE_2, true), (ALICE_1, BOB, false), (BOB, BOB, true)]
        .into_iter()
        .map(|(registered, captured, expected)| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let result = engine.verify(registered, captured, &euclidean_config()).await;
                (result.matched, expected)
            })
        })
        .collect();

    for handle in handles {
        let (matched, expected) = handle.await.unwrap();
        assert_eq!(matched, expected);
    }
}

#[tokio::test]
async fn result_serializes_with_null_fields() {
    let (engine, _) = fixture_engine();
    let result = engine.verify(ALICE_1, BOB, &euclidean_config()).await;
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["matched"], false);
    assert!(json["error"].is_null());
    assert!(json["error_kind"].is_null());
    assert_eq!(json["similarity_metric"], "euclidean");
    assert!(json["facial_areas"]["registered"].is_object());
}
