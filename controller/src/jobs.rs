//! Jobs builds scan Jobs for ImageScans and interprets their status.

use std::collections::BTreeMap;

use k8s_openapi::api::{
    batch::v1::{Job, JobSpec},
    core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec},
};
use kube::{Resource, ResourceExt, core::ObjectMeta};

use crate::{
    COMPONENT_LABEL, CONTROLLER_NAME, Error, IMAGE_ANNOTATION, MANAGED_BY_LABEL, Result,
    SCAN_LABEL,
};
use api::v1beta1::{ImageScan, ImageScanSpec};

static COMPONENT: &str = "scanner";

/// JobState is the coarse state of a scan Job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobState {
    /// The Job has no status yet.
    Pending,
    /// The Job is incomplete.
    Running,
    /// The Job completed successfully.
    Succeeded,
    /// The Job failed terminally.
    Failed { reason: String, message: String },
}

/// Build returns the scan Job for `obj`.
///
/// The Job shares the ImageScan's name and namespace and carries a controller owner reference
/// back to it.
pub fn build(obj: &ImageScan, default_scanner: &str) -> Result<Job> {
    let name = obj
        .meta()
        .name
        .clone()
        .ok_or(Error::MissingMetadata("name"))?;
    let namespace = obj
        .meta()
        .namespace
        .clone()
        .ok_or(Error::MissingMetadata("namespace"))?;
    let mut oref = obj
        .controller_owner_ref(&())
        .ok_or(Error::MissingMetadata("uid"))?;
    oref.block_owner_deletion = Some(true);
    let spec = &obj.spec;

    let labels = BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), CONTROLLER_NAME.to_string()),
        (COMPONENT_LABEL.to_string(), COMPONENT.to_string()),
        (SCAN_LABEL.to_string(), name.clone()),
    ]);
    let scanner = spec
        .scanner
        .clone()
        .unwrap_or_else(|| default_scanner.to_string());

    Ok(Job {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace),
            labels: Some(labels.clone()),
            annotations: Some(BTreeMap::from([(
                IMAGE_ANNOTATION.to_string(),
                spec.image.clone(),
            )])),
            owner_references: Some(vec![oref]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(spec.backoff_limit.unwrap_or(0)),
            active_deadline_seconds: spec.active_deadline_seconds,
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".into()),
                    containers: vec![Container {
                        name: COMPONENT.into(),
                        image: Some(scanner),
                        args: Some(scan_args(spec)),
                        env: Some(vec![EnvVar {
                            name: "SCAN_IMAGE".into(),
                            value: Some(spec.image.clone()),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn scan_args(spec: &ImageScanSpec) -> Vec<String> {
    let mut args = vec!["image".to_string(), "--no-progress".to_string()];
    if !spec.severities.is_empty() {
        args.push("--severity".into());
        args.push(
            spec.severities
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    if spec.ignore_unfixed.unwrap_or(false) {
        args.push("--ignore-unfixed".into());
    }
    args.push(spec.image.clone());
    args
}

/// Is_owned_by reports whether `job` is controlled by `obj`.
pub fn is_owned_by(job: &Job, obj: &ImageScan) -> bool {
    let Some(uid) = obj.meta().uid.as_deref() else {
        return false;
    };
    job.owner_references()
        .iter()
        .any(|r| r.controller.unwrap_or(false) && r.uid == uid)
}

/// Scanned_image returns the image reference `job` was created to scan.
pub fn scanned_image(job: &Job) -> Option<String> {
    job.annotations().get(IMAGE_ANNOTATION.as_str()).cloned()
}

/// Observe derives the JobState from `job`'s status.
pub fn observe(job: &Job) -> JobState {
    let Some(status) = job.status.as_ref() else {
        return JobState::Pending;
    };
    let conditions = status.conditions.as_deref().unwrap_or_default();
    let is_true = |type_: &str| {
        conditions
            .iter()
            .find(|c| c.type_ == type_ && c.status == "True")
    };

    if is_true("Complete").is_some() {
        return JobState::Succeeded;
    }
    if let Some(c) = is_true("Failed") {
        return JobState::Failed {
            reason: c.reason.clone().unwrap_or_else(|| "JobFailed".into()),
            message: c.message.clone().unwrap_or_default(),
        };
    }
    if conditions.is_empty() && status.succeeded.unwrap_or(0) > 0 {
        return JobState::Succeeded;
    }
    if status.start_time.is_none() && status.active.unwrap_or(0) == 0 && conditions.is_empty() {
        return JobState::Pending;
    }
    JobState::Running
}
