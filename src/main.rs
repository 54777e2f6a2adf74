use anyhow::{Context, Result};
use apimonitor::config::{Config, LogFormat, OverlapPolicy};
use apimonitor::probes::{HttpProbe, Probe, TestDefinition};
use apimonitor::storage::Store;
use apimonitor::{ingest, scheduler};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "apimonitor",
    about = "Scheduled HTTP API probes with result history and Slack alerting",
    version,
    long_about = None
)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "APIMONITOR_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding apimonitor.db
    #[arg(long = "data-dir", global = true, env = "APIMONITOR_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log output format
    #[arg(long = "log-format", global = true, value_enum, env = "APIMONITOR_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (scheduler + admin API)
    Serve(ServeArgs),

    /// Manage stored test definitions
    Tests {
        #[command(subcommand)]
        action: TestsAction,
    },

    /// Show recent results of a test
    Results {
        /// Test ID
        #[arg(long)]
        test: String,

        /// Number of results to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Preview what will run in the next N hours
    DryRun {
        /// Hours to preview
        #[arg(long, default_value = "1")]
        hours: u64,

        /// Maximum firings listed per test
        #[arg(long = "per-test", default_value = "10")]
        per_test: usize,
    },

    /// Probe a URL once and print the result
    Check {
        #[arg(long)]
        url: String,

        #[arg(long, default_value = "GET")]
        method: String,

        /// Timeout in seconds
        #[arg(long, default_value = "10")]
        timeout: u64,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// Bind address
    #[arg(long, env = "APIMONITOR_BIND")]
    bind: Option<String>,

    /// Directory with *.json test files
    #[arg(long = "tests-dir", env = "APIMONITOR_TESTS_DIR")]
    tests_dir: Option<PathBuf>,

    /// Slack webhook URL
    #[arg(long = "slack-url", env = "APIMONITOR_SLACK_URL")]
    slack_url: Option<String>,

    /// Slack channel
    #[arg(long = "slack-channel", env = "APIMONITOR_SLACK_CHANNEL")]
    slack_channel: Option<String>,

    /// Slack username
    #[arg(long = "slack-user", env = "APIMONITOR_SLACK_USER")]
    slack_user: Option<String>,

    /// Probe timeout in seconds
    #[arg(long = "probe-timeout", env = "APIMONITOR_PROBE_TIMEOUT")]
    probe_timeout: Option<u64>,

    /// What to do when a test fires while its previous run is still going
    #[arg(long, value_enum, env = "APIMONITOR_OVERLAP")]
    overlap: Option<OverlapPolicy>,
}

#[derive(Subcommand)]
enum TestsAction {
    /// List stored tests
    List,

    /// Import *.json test files from a directory
    Import {
        #[arg(long)]
        dir: PathBuf,
    },
}

impl ServeArgs {
    fn apply(self, config: &mut Config) {
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(dir) = self.tests_dir {
            config.tests_dir = Some(dir);
        }
        if let Some(url) = self.slack_url {
            config.slack.webhook_url = Some(url);
        }
        if let Some(channel) = self.slack_channel {
            config.slack.channel = channel;
        }
        if let Some(user) = self.slack_user {
            config.slack.username = user;
        }
        if let Some(secs) = self.probe_timeout {
            config.probe.timeout_secs = secs;
        }
        if let Some(overlap) = self.overlap {
            config.probe.overlap = overlap;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(format) = cli.log_format {
        config.log.format = format;
    }

    match cli.command {
        Commands::Serve(args) => {
            args.apply(&mut config);
            apimonitor::init_tracing(&config.log);
            tracing::info!(bind = %config.bind, "Starting apimonitor daemon");
            apimonitor::serve(config).await?;
        }
        Commands::Tests { action } => {
            apimonitor::init_tracing(&config.log);
            let store = apimonitor::open_store(&config)?;
            match action {
                TestsAction::List => {
                    let tests = store.all_tests()?;
                    if tests.is_empty() {
                        println!("No tests found.");
                    } else {
                        println!("{:<36} | {:<20} | {:<16} | URL", "ID", "Name", "Cron");
                        println!("{:-<36}-|-{:-<20}-|-{:-<16}-|-{:-<30}", "", "", "", "");
                        for t in tests {
                            println!("{:<36} | {:<20} | {:<16} | {} {}", t.id, t.name, t.cron, t.method, t.url);
                        }
                    }
                }
                TestsAction::Import { dir } => {
                    let tests = ingest::load_dir(&dir)?;
                    let count = ingest::import(&store, tests)?;
                    println!("Imported {} test(s) from {}.", count, dir.display());
                }
            }
        }
        Commands::Results { test, limit } => {
            apimonitor::init_tracing(&config.log);
            let store = apimonitor::open_store(&config)?;
            let def = store
                .get_test(&test)?
                .with_context(|| format!("Test '{}' not found", test))?;
            let results = store.results_for(&test, limit)?;

            println!("Results for {} ({})", def.name, def.url);
            if results.is_empty() {
                println!("No results yet.");
            }
            for r in results {
                let status = r.status.map(|s| s.to_string()).unwrap_or_else(|| "---".to_string());
                println!(
                    "{} | {:>3} | {:>6} ms | {}",
                    r.timestamp.to_rfc3339(),
                    status,
                    r.duration_ms,
                    r.error.unwrap_or_default()
                );
            }
        }
        Commands::DryRun { hours, per_test } => {
            apimonitor::init_tracing(&config.log);
            let store = apimonitor::open_store(&config)?;
            let tests = store.all_tests()?;
            let now = chrono::Utc::now();
            let until = now + chrono::Duration::hours(hours as i64);
            let preview = scheduler::cadence::preview(&tests, now, until, per_test);

            if preview.is_empty() {
                println!("No runs scheduled in next {} hours.", hours);
            } else {
                println!("Upcoming runs (next {} hours):", hours);
                for u in preview {
                    println!("{} : {} ({})", u.at.to_rfc3339(), u.name, u.test_id);
                }
            }
        }
        Commands::Check { url, method, timeout } => {
            apimonitor::init_tracing(&config.log);
            let probe = HttpProbe::new(std::time::Duration::from_secs(timeout))?;
            let mut test = TestDefinition::new("adhoc", "adhoc", url, "");
            test.method = method;
            let result = probe.run(&test).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.is_success() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
