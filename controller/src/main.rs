use is_terminal::IsTerminal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use controller::*;

fn main() {
    use clap::{Command, crate_authors, crate_description, crate_name, crate_version};
    use std::process;
    let cmd = Command::new(crate_name!())
        .bin_name("imagescan-operator")
        .version(crate_version!())
        .author(crate_authors!())
        .about(crate_description!())
        .subcommand_required(true)
        .subcommands([config::command()]);

    if let Err(e) = match cmd.get_matches().subcommand() {
        Some(("run", m)) => Config::try_from(m).and_then(startup),
        _ => Err(Error::Args("unknown subcommand".into())),
    } {
        eprintln!("{e}");
        process::exit(1);
    }
}

fn startup(cfg: Config) -> controller::Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tokio::{runtime, signal};
    use tracing_subscriber::{filter::EnvFilter, prelude::*};

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    let collector = tracing_subscriber::Registry::default()
        .with(env_filter)
        .with(if std::io::stdout().is_terminal() {
            Some(tracing_subscriber::fmt::layer())
        } else {
            None
        })
        .with(if std::io::stdout().is_terminal() {
            None
        } else {
            Some(tracing_subscriber::fmt::layer().json())
        });
    tracing::subscriber::set_global_default(collector)?;
    let prom = PrometheusBuilder::new().with_http_listener(cfg.introspection_address);

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    let token = CancellationToken::new();
    rt.handle().spawn(async move {
        if let Err(e) = prom.install() {
            error!("error setting up prometheus endpoint: {e}");
        }
    });
    let ctlstop = token.clone();
    rt.handle().spawn(async move {
        if let Err(err) = signal::ctrl_c().await {
            error!("error reading SIGTERM: {err}");
        }
        token.cancel();
    });
    rt.block_on(run(cfg, ctlstop))
}

async fn run(cfg: Config, token: CancellationToken) -> controller::Result<()> {
    let config = kube::Config::infer().await?;
    let client = kube::client::ClientBuilder::try_from(config)?.build();

    info!(
        image = cfg.scanner_image,
        address = %cfg.introspection_address,
        "default scanner image set"
    );
    info!("setup done, starting controller");
    let ctx = Context::new(client, cfg);
    let res = tokio::spawn(imagescans::controller(token.clone(), ctx)?).await?;
    if let Err(e) = &res {
        error!("error from controller: {e}");
    }
    res
}
