//! Config holds the operator's runtime configuration.

use std::{net::SocketAddr, time::Duration};

use crate::{DEFAULT_SCANNER_IMAGE, Error, Result};

/// Config is the configuration for the ImageScan controller.
#[derive(Clone, Debug)]
pub struct Config {
    /// Namespace to watch. All namespaces are watched if unset.
    pub namespace: Option<String>,
    /// Scanner image for ImageScans that don't name one.
    pub scanner_image: String,
    /// Maximum number of concurrent reconciles.
    pub concurrency: u16,
    /// Deadline for a single reconcile pass.
    pub reconcile_timeout: Duration,
    /// Requeue interval for scans that are still in progress.
    pub resync: Duration,
    /// First retry delay after a failed pass.
    pub backoff_base: Duration,
    /// Upper bound on the retry delay.
    pub backoff_max: Duration,
    /// Address for the Prometheus listener.
    pub introspection_address: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: None,
            scanner_image: DEFAULT_SCANNER_IMAGE.to_string(),
            concurrency: 4,
            reconcile_timeout: Duration::from_secs(30),
            resync: Duration::from_secs(5 * 60),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(5 * 60),
            introspection_address: SocketAddr::from(([0u16; 8], 8089)),
        }
    }
}

impl TryFrom<&clap::ArgMatches> for Config {
    type Error = Error;

    fn try_from(m: &clap::ArgMatches) -> Result<Self> {
        let arg = |name: &str| {
            m.get_one::<String>(name)
                .cloned()
                .ok_or_else(|| Error::Args(format!("missing value for {name:?}")))
        };
        let secs = |name: &str| -> Result<Duration> {
            arg(name)?
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| Error::Args(format!("{name}: {e}")))
        };
        let nonzero_secs = |name: &str| -> Result<Duration> {
            let d = secs(name)?;
            if d.is_zero() {
                return Err(Error::Args(format!("{name} must be at least 1 second")));
            }
            Ok(d)
        };
        let concurrency = arg("concurrency")?
            .parse::<u16>()
            .map_err(|e| Error::Args(format!("concurrency: {e}")))?;
        if concurrency == 0 {
            return Err(Error::Args("concurrency must be at least 1".into()));
        }
        let introspection_address = arg("introspection_address")?
            .parse()
            .map_err(|e| Error::Args(format!("introspection-bind-address: {e}")))?;

        Ok(Self {
            namespace: m
                .get_one::<String>("namespace")
                .filter(|ns| !ns.is_empty())
                .cloned(),
            scanner_image: arg("scanner_image")?,
            concurrency,
            reconcile_timeout: nonzero_secs("reconcile_timeout")?,
            resync: nonzero_secs("resync")?,
            backoff_base: Duration::from_secs(1),
            backoff_max: secs("max_backoff")?,
            introspection_address,
        })
    }
}

/// Command returns the `run` subcommand's argument definitions.
pub fn command() -> clap::Command {
    use clap::{Arg, Command};

    Command::new("run").about("run the ImageScan controller").args([
        Arg::new("introspection_address")
            .long("introspection-bind-address")
            .help("address to bind for the HTTP introspection server")
            .default_value("[::]:8089"),
        Arg::new("namespace")
            .long("namespace")
            .env("WATCH_NAMESPACE")
            .help("namespace to watch; all namespaces if empty"),
        Arg::new("scanner_image")
            .long("scanner-image")
            .env("RELATED_IMAGE_SCANNER")
            .help("container image for scan Jobs if not specified in an ImageScan")
            .default_value(DEFAULT_SCANNER_IMAGE),
        Arg::new("concurrency")
            .long("concurrency")
            .help("maximum number of ImageScans reconciled at once")
            .default_value("4"),
        Arg::new("reconcile_timeout")
            .long("reconcile-timeout")
            .help("deadline in seconds for a single reconcile")
            .default_value("30"),
        Arg::new("resync")
            .long("resync")
            .help("seconds between checks of in-progress scans")
            .default_value("300"),
        Arg::new("max_backoff")
            .long("max-backoff")
            .help("upper bound in seconds on the retry delay after errors")
            .default_value("300"),
    ])
}
