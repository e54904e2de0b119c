//! Imagescans holds the controller for the "ImageScan" CRD.

use std::sync::Arc;

use kube::runtime::controller::{self, Error as CtrlErr};
use serde_json::json;
use tokio::{
    signal::unix::{SignalKind, signal},
    time::Duration,
};
use tokio_stream::wrappers::SignalStream;
use validator::Validate;

use crate::{
    CREATE_PARAMS, MANAGED_BY_LABEL, PATCH_PARAMS,
    jobs::{self, JobState},
    prelude::*,
    status::{self, Reason},
};
use self::batch::v1::Job;
use self::core::v1::ObjectReference;
use self::v1beta1::{ImageScan, ImageScanStatus};

/// ControllerFuture is the future returned by [controller].
pub type ControllerFuture = future::BoxFuture<'static, Result<()>>;

/// Controller is the ImageScan controller.
///
/// It watches ImageScans and the Jobs they own, re-running a reconcile whenever either changes.
/// An error is returned if any setup fails.
#[instrument(skip_all)]
pub fn controller(cancel: CancellationToken, ctx: Arc<Context>) -> Result<ControllerFuture> {
    let client = ctx.client.clone();
    let ctlcfg = watcher::Config::default();
    let jobcfg = ctlcfg
        .clone()
        .labels(format!("{}={CONTROLLER_NAME}", MANAGED_BY_LABEL.as_str()).as_str());
    let sig = SignalStream::new(signal(SignalKind::user_defined1())?);

    let (scans, owned) = match ctx.config.namespace.as_deref() {
        Some(ns) => (
            Api::<ImageScan>::namespaced(client.clone(), ns),
            Api::<Job>::namespaced(client, ns),
        ),
        None => (Api::<ImageScan>::all(client.clone()), Api::<Job>::all(client)),
    };
    let ctl = Controller::new(scans, ctlcfg)
        .owns(owned, jobcfg)
        .with_config(controller::Config::default().concurrency(ctx.config.concurrency))
        .reconcile_all_on(sig)
        .graceful_shutdown_on(cancel.cancelled_owned());

    Ok(async move {
        info!(
            namespace = ctx.config.namespace.as_deref().unwrap_or("*"),
            concurrency = ctx.config.concurrency,
            "spawning imagescan controller"
        );
        let state = ctx.clone();
        ctl.run(reconcile, error_policy, ctx)
            .for_each(|ret| {
                match ret {
                    Ok((objref, _)) => trace!(%objref, "reconciled"),
                    Err(err) => match err {
                        CtrlErr::ObjectNotFound(objref) => {
                            debug!(%objref, "object not found");
                            let ns = objref.namespace.as_deref().unwrap_or_default();
                            state.retries.reset(&key_of(ns, &objref.name));
                        }
                        CtrlErr::ReconcilerFailed(error, objref) => {
                            warn!(%objref, %error, "reconcile error")
                        }
                        CtrlErr::QueueError(error) => error!(%error, "queue error"),
                        CtrlErr::RunnerError(error) => error!(%error, "runner error"),
                    },
                };
                futures::future::ready(())
            })
            .await;
        debug!("imagescan controller finished");
        Ok(())
    }
    .boxed())
}

fn key(obj: &ImageScan) -> String {
    key_of(&obj.namespace().unwrap_or_default(), &obj.name_any())
}

fn key_of(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Reconcile runs one pass for the ImageScan identified by `obj` under the configured deadline.
///
/// Only the identity of `obj` is used; the object itself is re-fetched.
#[instrument(skip_all, fields(key = %key(&obj)))]
async fn reconcile(obj: Arc<ImageScan>, ctx: Arc<Context>) -> Result<Action> {
    ctx.metrics.reconcile.runs.increment(1);
    let ns = obj
        .namespace()
        .ok_or(Error::MissingMetadata("namespace"))?;
    let name = obj.name_any();
    let deadline = ctx.config.reconcile_timeout;

    let action = tokio::time::timeout(deadline, reconcile_key(&ns, &name, &ctx))
        .await
        .map_err(|_| Error::Timeout(deadline))??;
    ctx.retries.reset(&key(&obj));
    Ok(action)
}

#[instrument(skip_all, fields(key = %key(&obj)))]
fn error_policy(obj: Arc<ImageScan>, err: &Error, ctx: Arc<Context>) -> Action {
    ctx.metrics.reconcile.failures.increment(1);
    if err.is_terminal() {
        warn!(error = %err, "terminal reconcile error");
        ctx.retries.reset(&key(&obj));
        return Action::await_change();
    }
    let delay = ctx.retries.next(&key(&obj));
    debug!(error = %err, ?delay, "retrying");
    Action::requeue(delay)
}

/// Reconcile_key performs one reconciliation pass for the ImageScan `namespace/name`.
///
/// A missing ImageScan is not an error. Invalid specs and Jobs held by some other owner are
/// recorded in the ImageScan's status and reported as success, since retrying cannot help until
/// something changes.
#[instrument(skip(ctx))]
pub async fn reconcile_key(namespace: &str, name: &str, ctx: &Context) -> Result<Action> {
    trace!("start");
    let scans: Api<ImageScan> = Api::namespaced(ctx.client.clone(), namespace);
    let Some(obj) = scans.get_opt(name).await? else {
        debug!("ImageScan not found, nothing to do");
        ctx.retries.reset(&key_of(namespace, name));
        return Ok(Action::await_change());
    };
    if obj.meta().deletion_timestamp.is_some() {
        debug!("ImageScan is being deleted, nothing to do");
        ctx.retries.reset(&key_of(namespace, name));
        return Ok(Action::await_change());
    }
    let prev = obj.status.clone().unwrap_or_default();

    if let Err(errs) = obj.spec.validate() {
        let message = describe(&errs);
        debug!(message, "spec invalid");
        let next = status::for_error(
            &obj,
            &prev,
            Reason::InvalidSpec,
            message.clone(),
            &status::now(),
        );
        if publish(&scans, &obj, &prev, next).await? {
            let ev = (EventType::Warning, Reason::InvalidSpec, "ValidateSpec");
            event(ctx, &obj, ev, Some(message), None).await;
        }
        return Ok(Action::await_change());
    }

    let api: Api<Job> = Api::namespaced(ctx.client.clone(), namespace);
    let (job, created) = match api.get_opt(name).await? {
        Some(job) => (job, false),
        None => create_job(&api, &obj, ctx).await?,
    };

    if !jobs::is_owned_by(&job, &obj) {
        let message = format!(
            "Job {:?} exists and is not controlled by this ImageScan",
            job.name_any()
        );
        debug!(message, "job conflict");
        let next = status::for_error(
            &obj,
            &prev,
            Reason::JobNotOwned,
            message.clone(),
            &status::now(),
        );
        if publish(&scans, &obj, &prev, next).await? {
            let ev = (EventType::Warning, Reason::JobNotOwned, "CheckJob");
            event(ctx, &obj, ev, Some(message), None).await;
        }
        return Ok(Action::await_change());
    }

    let state = jobs::observe(&job);
    debug!(?state, created, "observed job");
    let next = status::for_job(&obj, &prev, &job, &state, &status::now());
    let phase = next.phase.unwrap_or_default();
    let changed = publish(&scans, &obj, &prev, next).await?;

    let jobref = Some(job.object_ref(&()));
    if created {
        let ev = (EventType::Normal, Reason::JobCreated, "CreateJob");
        event(ctx, &obj, ev, None, jobref.clone()).await;
    }
    if changed && prev.phase != Some(phase) {
        match &state {
            JobState::Succeeded => {
                let ev = (EventType::Normal, Reason::ScanSucceeded, "ObserveJob");
                event(ctx, &obj, ev, None, jobref).await;
            }
            JobState::Failed { reason, message } => {
                let ev = (EventType::Warning, Reason::ScanFailed, "ObserveJob");
                event(ctx, &obj, ev, Some(format!("{reason}: {message}")), jobref).await;
            }
            JobState::Pending | JobState::Running => (),
        }
    }

    trace!("done");
    if phase.is_terminal() {
        Ok(Action::await_change())
    } else {
        Ok(Action::requeue(ctx.config.resync))
    }
}

/// Create_job creates the scan Job for `obj`.
///
/// An "already exists" response means an earlier pass got there first, so the existing Job is
/// fetched and returned instead. The returned flag reports whether this call created the Job.
#[instrument(skip_all)]
async fn create_job(api: &Api<Job>, obj: &ImageScan, ctx: &Context) -> Result<(Job, bool)> {
    let new = jobs::build(obj, &ctx.config.scanner_image)?;
    trace!(name = new.name_any(), "create");
    match api.create(&CREATE_PARAMS, &new).await {
        Ok(job) => {
            ctx.metrics.reconcile.jobs_created.increment(1);
            info!(job = job.name_any(), "created scan Job");
            Ok((job, true))
        }
        Err(err) => {
            let err = Error::from(err);
            if err.api_code() != Some(409) {
                return Err(err);
            }
            debug!("job already exists, re-fetching");
            Ok((api.get(&new.name_any()).await?, false))
        }
    }
}

/// Publish writes `next` to the status subresource of `obj` if it differs from `prev`.
///
/// Reports whether a write happened.
#[instrument(skip_all)]
async fn publish(
    api: &Api<ImageScan>,
    obj: &ImageScan,
    prev: &ImageScanStatus,
    next: ImageScanStatus,
) -> Result<bool> {
    if prev == &next {
        trace!("status unchanged");
        return Ok(false);
    }
    let phase = next.phase;
    let patch = Patch::Apply(json!({
        "apiVersion": ImageScan::api_version(&()),
        "kind": ImageScan::kind(&()),
        "status": next,
    }));
    api.patch_status(&obj.name_any(), &PATCH_PARAMS, &patch)
        .await?;
    debug!(?phase, "published status");
    Ok(true)
}

/// Event publishes an event about `obj`.
///
/// Events are informational, so a failure is logged and otherwise ignored.
async fn event(
    ctx: &Context,
    obj: &ImageScan,
    (type_, reason, action): (EventType, Reason, &str),
    note: Option<String>,
    secondary: Option<ObjectReference>,
) {
    let ev = Event {
        type_,
        reason: reason.to_string(),
        note,
        action: action.into(),
        secondary,
    };
    if let Err(error) = ctx.recorder.publish(&ev, &obj.object_ref(&())).await {
        warn!(%error, %reason, "unable to publish event");
    }
}

fn describe(errs: &validator::ValidationErrors) -> String {
    let mut out = errs
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| match &e.message {
                Some(msg) => format!("{field}: {msg}"),
                None => format!("{field}: {}", e.code),
            })
        })
        .collect::<Vec<_>>();
    out.sort();
    out.join("; ")
}
