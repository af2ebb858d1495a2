//! replset-bootstrap -- configure a database node as a replica-set member.
//!
//! Without a seed the node is initiated as the first member of a new set;
//! with a seed it is added to the set those members belong to.  Exit codes:
//! 0 converged, 1 startup failure or no convergence, 2 invalid parameters.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use replset_bootstrap::client::http::HttpConnector;
use replset_bootstrap::config::{self, Config, LoggingConfig};
use replset_bootstrap::errors::{EXIT_OK, EXIT_PARAMS, EXIT_START};
use replset_bootstrap::{Bootstrapper, Endpoint, SeedList};

/// Command-line arguments.  Anything given here overrides the
/// configuration file.
#[derive(Parser, Debug)]
#[command(
    name = "replset-bootstrap",
    version,
    about = "Configure a database node as a replica-set member"
)]
struct Cli {
    /// Node to configure, as host[:port].
    #[arg(long = "db", value_name = "HOST[:PORT]")]
    db: Option<String>,

    /// Comma separated list of existing replica set members to join
    /// through, e.g. host1:port1,host2,host3:port3.  Without a seed the
    /// node becomes the first member of a new set.
    #[arg(short, long, value_name = "LIST")]
    seed: Option<String>,

    /// Replica set name to use when initiating a new set.
    #[arg(long)]
    set_name: Option<String>,

    /// Verbose level: 1 fatal, 2 error, 3 warn, 4 info (default), 5 debug.
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=5))]
    verbose: Option<u8>,

    /// Append log lines to this file instead of standard error.
    #[arg(long, value_name = "PATH")]
    log_file: Option<String>,

    /// Status polls before giving up.
    #[arg(long)]
    attempts: Option<u32>,

    /// Seconds to wait between status polls.
    #[arg(long)]
    backoff_secs: Option<u64>,

    /// Path to a YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    std::process::exit(run(cli));
}

fn run(cli: Cli) -> i32 {
    let config = match resolve_config(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return EXIT_PARAMS;
        }
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("Error: {e:#}");
        return EXIT_PARAMS;
    }

    let Some(target) = config.target.as_deref() else {
        error!("Database to be initialized not specified.");
        return EXIT_PARAMS;
    };
    let default_port = config.client.default_port;
    let target = match Endpoint::parse(target, default_port) {
        Ok(target) => target,
        Err(e) => {
            error!("{}", e);
            return e.exit_code();
        }
    };
    let seeds = match config.seed.as_deref().map(|s| SeedList::parse(s, default_port)) {
        None => None,
        Some(Ok(seeds)) => Some(seeds),
        Some(Err(e)) => {
            error!("{}", e);
            return e.exit_code();
        }
    };

    info!("replset-bootstrap {} started", env!("CARGO_PKG_VERSION"));
    info!("Configuring database {} as replica-set node.", target);
    if let Some(seeds) = &seeds {
        info!("Using seed: {}", seeds);
    }

    let connector = match HttpConnector::new(config.client.request_timeout()) {
        Ok(connector) => connector,
        Err(e) => {
            error!("{}", e);
            return EXIT_START;
        }
    };

    // The bootstrap is strictly sequential; one thread is all it needs.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return EXIT_START;
        }
    };

    let bootstrapper = Bootstrapper::new(Arc::new(connector), target)
        .with_seeds(seeds)
        .with_set_name(config.set_name.clone())
        .with_policy(config.bootstrap.retry_policy());

    match runtime.block_on(bootstrapper.run()) {
        Ok(report) => {
            info!(
                "Node is a member of replica set '{}' after {} attempt(s).",
                report.set_name, report.attempts
            );
            EXIT_OK
        }
        Err(e) => {
            error!("{}", e);
            error!("Replica set node initialization failed.");
            e.exit_code()
        }
    }
}

/// Load the configuration file, if any, and layer the flags on top.
fn resolve_config(cli: Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };

    if cli.db.is_some() {
        config.target = cli.db;
    }
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }
    if cli.set_name.is_some() {
        config.set_name = cli.set_name;
    }
    if let Some(verbose) = cli.verbose {
        config.logging.verbose = verbose;
    }
    if cli.log_file.is_some() {
        config.logging.file = cli.log_file;
    }
    if let Some(attempts) = cli.attempts {
        config.bootstrap.max_attempts = attempts;
    }
    if let Some(backoff) = cli.backoff_secs {
        config.bootstrap.backoff_secs = backoff;
    }

    config::validate_config(&config)?;
    Ok(config)
}

/// Install the global subscriber writing plain text lines to standard
/// error or, when configured, appending to a log file.
fn init_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(logging.level_filter().to_string())
    });
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match &logging.file {
        Some(path) => {
            let file = open_log_file(path)?;
            subscriber
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => subscriber.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

/// Open `path` for appending, creating it when missing.
fn open_log_file(path: &str) -> anyhow::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("not possible to create/open log file {path}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("replset-bootstrap").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = parse(&[
            "--db", "db3:27017", "--seed", "db1,db2", "-v", "5", "--attempts", "7",
        ]);
        let config = resolve_config(cli).unwrap();
        assert_eq!(config.target.as_deref(), Some("db3:27017"));
        assert_eq!(config.seed.as_deref(), Some("db1,db2"));
        assert_eq!(config.logging.verbose, 5);
        assert_eq!(config.bootstrap.max_attempts, 7);
        assert_eq!(config.bootstrap.backoff_secs, 5);
    }

    #[test]
    fn test_verbose_out_of_range_is_a_usage_error() {
        let err = Cli::try_parse_from(["replset-bootstrap", "--db", "a", "-v", "6"]).unwrap_err();
        assert_eq!(err.exit_code(), EXIT_PARAMS);
    }

    #[test]
    fn test_zero_attempts_is_rejected() {
        let cli = parse(&["--db", "a", "--attempts", "0"]);
        assert!(resolve_config(cli).is_err());
    }

    #[test]
    fn test_flags_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replset.yaml");
        std::fs::write(&path, "target: from-file:1\nseed: s1\nlogging:\n  verbose: 2\n").unwrap();

        let cli = parse(&["--config", path.to_str().unwrap(), "--db", "from-flag:2"]);
        let config = resolve_config(cli).unwrap();
        assert_eq!(config.target.as_deref(), Some("from-flag:2"));
        assert_eq!(config.seed.as_deref(), Some("s1"));
        assert_eq!(config.logging.verbose, 2);
    }

    #[test]
    fn test_log_file_in_missing_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("replset.log");

        let err = open_log_file(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("not possible to create/open log file"));
    }

    #[test]
    fn test_unopenable_log_file_exits_with_params_code() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("replset.log");

        let cli = parse(&["--db", "db1", "--log-file", path.to_str().unwrap()]);
        assert_eq!(run(cli), EXIT_PARAMS);
    }

    #[test]
    fn test_log_file_is_appended_to() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replset.log");
        let path = path.to_str().unwrap();

        writeln!(open_log_file(path).unwrap(), "first").unwrap();
        writeln!(open_log_file(path).unwrap(), "second").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "first\nsecond\n");
    }
}
