// tests/attachments.rs
//! Integration tests for merging attachments into a unified view

mod common;

use chrono::{DateTime, TimeZone, Utc};
use common::COMPOSE_ID;
use composemd::attachment::{self, Attachment, CompletionState, PipelineState, PipelineStatus};
use composemd::convert::{self, BaseUrlMapper, UpgradeOptions};
use composemd::{Error, MetadataDocument, WireRevision};

const CDN: &str = "https://cdn.example.com/compose";

fn distributed(doc: &MetadataDocument) -> MetadataDocument {
    let mapper = BaseUrlMapper::new(CDN).unwrap();
    let options = UpgradeOptions {
        mapper: &mapper,
        ..Default::default()
    };
    convert::upgrade(doc, &options).unwrap()
}

fn base() -> MetadataDocument {
    distributed(&common::images_v1(&[("Server", b"server dvd")]))
}

fn cloud_images() -> MetadataDocument {
    distributed(&common::images_v1(&[("Cloud_Base", b"cloud qcow2")]))
}

fn status_json(pipeline: &str, status: &str, revision: u64, extra: &str) -> String {
    format!(
        r#"{{"pipeline_id": "{pipeline}", "status": "{status}", "revision": {revision},
            "started_at": "2023-11-02T10:00:00Z", "max_duration": 7200{extra}}}"#
    )
}

fn status(pipeline: &str, status: &str, revision: u64, extra: &str) -> Attachment {
    let record = PipelineStatus::from_json(&status_json(pipeline, status, revision, extra)).unwrap();
    Attachment::pipeline_status(pipeline, COMPOSE_ID, WireRevision::V2_0.version(), record)
}

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 11, 2, hour, 0, 0).unwrap()
}

#[test]
fn test_merged_view_is_a_valid_document() {
    let base = base();
    let view = attachment::merge(&base, &[Attachment::document("cloud-pipeline", cloud_images())]).unwrap();

    assert_eq!(view.document().artifact_count(), 2);
    assert_eq!(view.base(), &base);
    assert_eq!(view.contributions().count(), 1);
    assert!(view.contributions().all(|(_, origin)| origin == "cloud-pipeline"));

    let json = view.document().to_json(None).unwrap();
    let reparsed = MetadataDocument::from_json(&json).unwrap();
    reparsed.validate().unwrap();
    assert_eq!(reparsed.artifact_count(), 2);
}

#[test]
fn test_legacy_attachment_rejected_by_distributed_base() {
    let legacy = common::images_v1(&[("Cloud_Base", b"cloud qcow2")]);
    match attachment::merge(&base(), &[Attachment::document("old-tooling", legacy)]).unwrap_err() {
        Error::AttachmentMismatch(issues) => {
            assert_eq!(issues.len(), 1);
            assert_eq!(issues[0].origin, "old-tooling");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_same_artifact_from_two_pipelines_is_a_duplicate() {
    let first = Attachment::document("pipeline-a", cloud_images());
    let second = Attachment::document("pipeline-b", cloud_images());
    assert!(matches!(
        attachment::merge(&base(), &[first, second]),
        Err(Error::DuplicateArtifact(refs)) if refs.len() == 1
    ));
}

#[test]
fn test_status_stream_keeps_highest_revision() {
    let attachments = [
        status("image-build", "complete", 2, r#", "completed_at": "2023-11-02T11:00:00Z""#),
        status("image-build", "in_progress", 1, ""),
    ];
    let view = attachment::merge(&base(), &attachments).unwrap();

    let current = view.status("image-build").unwrap();
    assert_eq!(current.revision, 2);
    assert_eq!(current.effective_state(at(12)), PipelineState::Complete);
    assert_eq!(view.statuses().count(), 1);
}

#[test]
fn test_completion_waits_for_every_expected_pipeline() {
    let expected = vec!["image-build".to_string(), "openqa".to_string()];
    let mut attachments = vec![status(
        "image-build",
        "complete",
        2,
        r#", "completed_at": "2023-11-02T11:00:00Z""#,
    )];

    let view = attachment::merge(&base(), &attachments).unwrap();
    assert_eq!(
        view.completion_state(Some(expected.as_slice()), at(11)),
        CompletionState::Pending {
            waiting: vec!["openqa".to_string()]
        }
    );

    attachments.push(status("openqa", "failed", 3, r#", "failed_at": "2023-11-02T11:30:00Z""#));
    let view = attachment::merge(&base(), &attachments).unwrap();
    let state = view.completion_state(Some(expected.as_slice()), at(12));
    assert!(state.is_complete());
    assert!(state.is_degraded());
    assert_eq!(
        state,
        CompletionState::Complete {
            degraded: vec!["openqa".to_string()]
        }
    );
}

#[test]
fn test_stalled_pipeline_times_out() {
    let expected = vec!["openqa".to_string()];
    let view = attachment::merge(&base(), &[status("openqa", "in_progress", 1, "")]).unwrap();

    // max_duration is two hours after a 10:00 start
    assert!(matches!(
        view.completion_state(Some(expected.as_slice()), at(11)),
        CompletionState::Pending { .. }
    ));
    assert_eq!(
        view.completion_state(Some(expected.as_slice()), at(13)),
        CompletionState::Complete {
            degraded: vec!["openqa".to_string()]
        }
    );

    match view.completion_state(None, at(13)) {
        CompletionState::Snapshot(states) => {
            assert_eq!(states.get("openqa"), Some(&PipelineState::TimeoutFailure));
        }
        other => panic!("unexpected state: {other:?}"),
    }
}

#[test]
fn test_status_for_other_compose_is_rejected() {
    let record = PipelineStatus::from_json(&status_json("openqa", "in_progress", 1, "")).unwrap();
    let stray = Attachment::pipeline_status(
        "openqa",
        "Fedora-39-20231103.0",
        WireRevision::V2_0.version(),
        record,
    );
    assert!(matches!(
        attachment::merge(&base(), &[stray]),
        Err(Error::AttachmentMismatch(_))
    ));
}
