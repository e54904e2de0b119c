//! Status computes the next ImageScan status from what a reconcile pass observed.
//!
//! Everything here is pure: callers pass the time to stamp on changed conditions, so an unchanged
//! observation always produces a status equal to the previous one.

use k8s_openapi::{
    api::{batch::v1::Job, core::v1::TypedLocalObjectReference},
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
    jiff::Timestamp,
};
use kube::{Resource, ResourceExt};

use crate::{READY_CONDITION, jobs::JobState};
use api::v1beta1::{ImageScan, ImageScanStatus, ScanPhase};

/// Reason is the machine-readable reason used in conditions and events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::AsRefStr, strum::Display)]
pub enum Reason {
    JobCreated,
    ScanRunning,
    ScanSucceeded,
    ScanFailed,
    InvalidSpec,
    JobNotOwned,
}

/// For_job computes the status for `obj` given its owned `job` in `state`.
pub fn for_job(
    obj: &ImageScan,
    prev: &ImageScanStatus,
    job: &Job,
    state: &JobState,
    now: &Time,
) -> ImageScanStatus {
    let mut next = prev.clone();
    next.observed_generation = obj.meta().generation;
    next.job = Some(job_ref(job));
    next.message = None;

    let (phase, reason, ready, message) = match state {
        JobState::Pending => (
            ScanPhase::Pending,
            Reason::JobCreated,
            "False",
            format!("waiting for Job {:?} to start", job.name_any()),
        ),
        JobState::Running => (
            ScanPhase::Running,
            Reason::ScanRunning,
            "False",
            format!("Job {:?} is running", job.name_any()),
        ),
        JobState::Succeeded => {
            next.scanned_image = Some(
                crate::jobs::scanned_image(job).unwrap_or_else(|| obj.spec.image.clone()),
            );
            (
                ScanPhase::Succeeded,
                Reason::ScanSucceeded,
                "True",
                "scan completed".to_string(),
            )
        }
        JobState::Failed { reason, message } => {
            let message = if message.is_empty() {
                reason.clone()
            } else {
                format!("{reason}: {message}")
            };
            next.message = Some(message.clone());
            (ScanPhase::Failed, Reason::ScanFailed, "False", message)
        }
    };
    next.phase = Some(phase);
    next.add_condition(ready_condition(obj, reason, ready, message, now));
    next
}

/// For_error computes the status for `obj` when it can't be acted on.
///
/// The previous Job reference and scanned image are kept.
pub fn for_error(
    obj: &ImageScan,
    prev: &ImageScanStatus,
    reason: Reason,
    message: String,
    now: &Time,
) -> ImageScanStatus {
    let mut next = prev.clone();
    next.observed_generation = obj.meta().generation;
    next.phase = Some(ScanPhase::Error);
    next.message = Some(message.clone());
    next.add_condition(ready_condition(obj, reason, "False", message, now));
    next
}

fn ready_condition(
    obj: &ImageScan,
    reason: Reason,
    status: &str,
    message: String,
    now: &Time,
) -> Condition {
    Condition {
        type_: READY_CONDITION.clone(),
        status: status.into(),
        reason: reason.to_string(),
        message,
        observed_generation: obj.meta().generation,
        last_transition_time: now.clone(),
    }
}

fn job_ref(job: &Job) -> TypedLocalObjectReference {
    TypedLocalObjectReference {
        api_group: Some(Job::group(&()).to_string()),
        kind: Job::kind(&()).to_string(),
        name: job.name_any(),
    }
}

#[inline]
pub fn now() -> Time {
    Time(Timestamp::now())
}
