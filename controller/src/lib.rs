#![warn(rustdoc::missing_crate_level_docs)]
//! Controller holds the ImageScan reconciler and the machinery to run it.

use std::sync::{Arc, LazyLock};

use kube::{
    api::{PatchParams, PostParams},
    runtime::events::{Recorder, Reporter},
};

// Re-exports for everyone's easy use.
pub(crate) mod prelude {
    pub use api::v1beta1;
    pub use futures::prelude::*;
    pub use k8s_openapi::{api::*, apimachinery::pkg::apis::meta};
    pub use kube::{
        self,
        api::{Api, Patch},
        runtime::{
            controller::{Action, Controller},
            events::{Event, EventType},
            watcher,
        },
        Resource, ResourceExt,
    };
    pub use tokio_util::sync::CancellationToken;
    pub use tracing::{debug, error, info, instrument, trace, warn};

    pub use super::{Context, Error, Result, CONTROLLER_NAME};
}

pub mod config;
pub mod imagescans;
pub mod jobs;
pub mod metrics;
pub mod retry;
pub mod status;


pub use config::Config;

// NB The docs are unclear, but backtraces are unsupported on stable.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("tracing_subscriber error: {0}")]
    TracingConfig(#[from] tracing_subscriber::filter::ParseError),
    #[error("tracing error: {0}")]
    Tracing(#[from] tracing::subscriber::SetGlobalDefaultError),
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),
    #[error("kubeconfig error: {0}")]
    KubeConfig(#[from] kube::config::InferConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("tokio error: {0}")]
    Tokio(#[from] tokio::task::JoinError),
    #[error("json error: {0}")]
    JSON(#[from] serde_json::Error),
    #[error("prometheus error: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
    #[error("invalid argument: {0}")]
    Args(String),
    #[error("missing metadata for kubernetes object: {0}")]
    MissingMetadata(&'static str),
    #[error("invalid spec: {0}")]
    Invalid(String),
    #[error("job not owned: {0}")]
    NotOwned(String),
    #[error("reconcile timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl Error {
    /// Api_code reports the HTTP status code of an API server error response.
    pub fn api_code(&self) -> Option<u16> {
        match self {
            Error::Kube(kube::Error::Api(ae)) => Some(ae.code),
            _ => None,
        }
    }

    /// Is_terminal reports whether retrying without a change to the object is pointless.
    pub fn is_terminal(&self) -> bool {
        match self {
            Error::Invalid(_) | Error::NotOwned(_) | Error::MissingMetadata(_) => true,
            Error::Kube(_) => matches!(self.api_code(), Some(400 | 422)),
            _ => false,
        }
    }
}

/// Result typedef for the controller.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Context is the shared state handed to every reconcile pass.
///
/// Nothing in here is keyed by resource except the retry bookkeeping, which is only touched by
/// the error policy.
pub struct Context {
    pub client: kube::Client,
    pub recorder: Recorder,
    pub config: Config,
    pub retries: retry::Backoff,
    pub metrics: metrics::Metrics,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ctx")
    }
}

impl Context {
    /// New constructs a Context from a client and configuration.
    pub fn new(client: kube::Client, config: Config) -> Arc<Self> {
        let recorder = Recorder::new(client.clone(), REPORTER.clone());
        let retries = retry::Backoff::new(config.backoff_base, config.backoff_max);
        Arc::new(Self {
            client,
            recorder,
            retries,
            config,
            metrics: metrics::Metrics::default(),
        })
    }
}

// Condition is like keyify, but does not force lower-case.
fn condition<S: ToString, K: AsRef<str>>(space: S, key: K) -> String {
    let mut out = space.to_string();
    key.as_ref()
        .chars()
        .map(|c| match c {
            '_' | ' ' | '\t' | '\n' => '-',
            _ => c,
        })
        .for_each(|c| out.push(c));
    out
}

fn keyify<S: ToString, K: AsRef<str>>(space: S, key: K) -> String {
    let mut out = space.to_string();
    key.as_ref()
        .chars()
        .map(|c| match c {
            '_' | ' ' | '\t' | '\n' => '-',
            _ => c.to_ascii_lowercase(),
        })
        .for_each(|c| out.push(c));
    out
}

pub fn scan_condition<S: AsRef<str>>(s: S) -> String {
    condition("imagescan.dev/", s)
}

pub fn scan_label<S: AsRef<str>>(s: S) -> String {
    keyify("imagescan.dev/", s)
}

pub fn k8s_label<S: AsRef<str>>(s: S) -> String {
    keyify("app.kubernetes.io/", s)
}

/// CONTROLLER_NAME is the name used as the field manager and event reporter.
pub const CONTROLLER_NAME: &str = "imagescan-operator";

pub static REPORTER: LazyLock<Reporter> = LazyLock::new(|| Reporter {
    controller: CONTROLLER_NAME.into(),
    instance: std::env::var("POD_NAME").ok(),
});

pub static CREATE_PARAMS: LazyLock<PostParams> = LazyLock::new(|| PostParams {
    dry_run: false,
    field_manager: Some(CONTROLLER_NAME.into()),
});

pub static PATCH_PARAMS: LazyLock<PatchParams> =
    LazyLock::new(|| PatchParams::apply(CONTROLLER_NAME).force());

pub static MANAGED_BY_LABEL: LazyLock<String> = LazyLock::new(|| k8s_label("managed-by"));

pub static COMPONENT_LABEL: LazyLock<String> = LazyLock::new(|| k8s_label("component"));

pub static SCAN_LABEL: LazyLock<String> = LazyLock::new(|| scan_label("scan"));

/// IMAGE_ANNOTATION records the image reference a Job was created to scan.
pub static IMAGE_ANNOTATION: LazyLock<String> = LazyLock::new(|| scan_label("image"));

pub static READY_CONDITION: LazyLock<String> = LazyLock::new(|| scan_condition("Ready"));

/// DEFAULT_SCANNER_IMAGE is the scanner used when neither the ImageScan nor the command line name
/// one.
pub const DEFAULT_SCANNER_IMAGE: &str = "docker.io/aquasec/trivy:latest";
