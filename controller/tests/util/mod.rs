#![allow(dead_code)]
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use api::v1beta1;
use controller::*;

pub async fn test_context() -> Arc<Context> {
    let config = kube::Config::infer()
        .await
        .expect("unable to infer kubeconfig");
    let client = kube::client::ClientBuilder::try_from(config)
        .expect("unable to create client builder")
        .build();
    let cfg = Config {
        namespace: Some("default".into()),
        resync: std::time::Duration::from_secs(5),
        ..Default::default()
    };
    Context::new(client, cfg)
}

/// TestEnv is a running ImageScan controller scoped to one test.
///
/// Dropping it stops the controller.
pub struct TestEnv {
    pub ctx: Arc<Context>,
    token: CancellationToken,
    ctrl: Option<JoinHandle<Result<()>>>,
}

impl TestEnv {
    /// Start installs the CRDs and spawns the controller.
    pub async fn start() -> Result<Self> {
        let ctx = test_context().await;
        load_crds(&ctx.client).await?;
        let token = CancellationToken::new();
        let ctrl = tokio::spawn(imagescans::controller(token.clone(), ctx.clone())?);
        Ok(Self {
            ctx,
            token,
            ctrl: Some(ctrl),
        })
    }

    /// Stop cancels the controller and waits for it to finish.
    pub async fn stop(mut self) -> Result<()> {
        self.token.cancel();
        match self.ctrl.take() {
            Some(ctrl) => ctrl.await?,
            None => Ok(()),
        }
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

macro_rules! load_each {
    ($api:ident, $($kind:ty),+) => {
        use kube::{api::PostParams, CustomResourceExt, ResourceExt};
        let params = PostParams::default();
        $({
        let crd = <$kind>::crd();
        let name = crd.name_any();
        trace!(name, "checking CRD");
        if $api.get_metadata_opt(&name).await?.is_none() {
            trace!(name, "creating CRD");
            $api.create(&params, &crd).await?;
        }
        trace!(name, "CRD ok");
        })+
    }
}

pub async fn load_crds(client: &kube::Client) -> Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::Api;
    let api: Api<CustomResourceDefinition> = Api::all(client.clone());

    load_each!(api, v1beta1::ImageScan);

    Ok(())
}

/// Wait_for polls `check` once a second until it returns true, giving up after `limit`.
pub async fn wait_for<F, Fut>(limit: std::time::Duration, mut check: F) -> Result<bool>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<bool>>,
{
    let poll = async {
        loop {
            if check().await? {
                return Ok::<_, Error>(true);
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    };
    tokio::time::timeout(limit, poll).await.unwrap_or(Ok(false))
}

pub mod prelude {
    pub use std::sync::Arc;

    pub use kube::{
        Api, ResourceExt,
        api::{DeleteParams, Patch, PatchParams, PostParams},
    };
    pub use serde_json::json;
    pub use test_log::test;
    pub use tokio::time::Duration;
}
