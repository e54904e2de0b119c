//! v1beta1 holds the ImageScan CRD.

use k8s_openapi::{api::core, apimachinery::pkg::apis::meta};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::image::ImageReference;

/// ImageScanSpec describes the desired state of an ImageScan.
#[derive(
    CustomResource, Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate, JsonSchema,
)]
#[kube(
    group = "imagescan.dev",
    version = "v1beta1",
    kind = "ImageScan",
    namespaced,
    status = "ImageScanStatus",
    derive = "PartialEq",
    shortname = "iscan",
    category = "security",
    printcolumn = r#"{"name":"ScannedImage","type":"string","jsonPath":".status.scannedImage"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ImageScanSpec {
    /// Image is the reference of the container image to scan, e.g. `nginx:latest`.
    #[validate(custom(function = "validate_image"))]
    pub image: String,
    /// Scanner is the container image that runs the scan.
    ///
    /// If not provided, the operator's default scanner image is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_image"))]
    pub scanner: Option<String>,
    /// Severities restricts the reported vulnerabilities to the listed levels.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub severities: Vec<Severity>,
    /// IgnoreUnfixed reports only vulnerabilities that have a fix available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_unfixed: Option<bool>,
    /// BackoffLimit is the number of retries for the scan Job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0, max = 10))]
    pub backoff_limit: Option<i32>,
    /// ActiveDeadlineSeconds bounds the runtime of the scan Job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1))]
    pub active_deadline_seconds: Option<i64>,
}

fn validate_image(image: &str) -> Result<(), ValidationError> {
    ImageReference::parse(image).map(|_| ()).map_err(|err| {
        let mut e = ValidationError::new("image_reference");
        e.message = Some(err.to_string().into());
        e
    })
}

/// Severity is a vulnerability severity level.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, JsonSchema, strum::Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Severity {
    /// Severity not assigned by the vulnerability source.
    Unknown,
    /// Low severity.
    Low,
    /// Medium severity.
    Medium,
    /// High severity.
    High,
    /// Critical severity.
    Critical,
}

/// ImageScanStatus describes the observed state of an ImageScan.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageScanStatus {
    /// Phase is the coarse scan state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<ScanPhase>,
    /// ScannedImage is the image reference the scan Job actually scanned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scanned_image: Option<String>,
    /// Job references the scan Job owned by this ImageScan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<core::v1::TypedLocalObjectReference>,
    /// Message is a human-readable explanation of a failure or error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// ObservedGeneration is the generation of the spec this status describes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Conditions reports k8s-style conditions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<meta::v1::Condition>,
}

impl ImageScanStatus {
    /// Add_condition sets `cnd`, replacing any condition of the same type.
    ///
    /// The previous transition time is kept if the condition's status did not change.
    pub fn add_condition(&mut self, mut cnd: meta::v1::Condition) {
        match self.conditions.iter_mut().find(|c| c.type_ == cnd.type_) {
            Some(prev) => {
                if prev.status == cnd.status {
                    cnd.last_transition_time = prev.last_transition_time.clone();
                }
                *prev = cnd;
            }
            None => self.conditions.push(cnd),
        }
    }

    /// Condition returns the condition of type `type_`, if present.
    pub fn condition(&self, type_: &str) -> Option<&meta::v1::Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

/// ScanPhase is the coarse state of an ImageScan.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize, JsonSchema, strum::Display,
)]
pub enum ScanPhase {
    /// The scan Job has been created and has not started running yet.
    #[default]
    Pending,
    /// The scan Job is running.
    Running,
    /// The scan Job completed.
    Succeeded,
    /// The scan Job failed.
    Failed,
    /// The ImageScan cannot be acted on until its spec or environment changes.
    Error,
}

impl ScanPhase {
    /// Is_terminal reports whether no further Job events can change the phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Error)
    }
}
