//! labrun CLI - run a test suite on a remote device lab from CI.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use labrun::client::HttpLabClient;
use labrun::config::{self, Config};
use labrun::git::collect_commit_info;
use labrun::orchestrator::{Orchestrator, RunError, TokioSleeper, abort_run};
use labrun::report::{ConsoleReporter, MultiReporter, PipelineReporter, pipeline_link_from_env};

#[derive(Parser)]
#[command(name = "labrun")]
#[command(about = "Run a mobile test suite on a remote device lab", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "labrun.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload the packages, run the suite and collect the results
    Run(RunArgs),

    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init,
}

/// Command-line overrides of the `[run]`, `[lab]` and `[report]` tables.
#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Application package, or the directory containing it
    #[arg(long)]
    app: Option<PathBuf>,

    /// Test package, or the directory containing it
    #[arg(long)]
    test_app: Option<PathBuf>,

    /// Build flavor reported with the upload
    #[arg(long)]
    flavor: Option<String>,

    /// Test suite class to run
    #[arg(short, long)]
    suite: Option<String>,

    /// Device, device group or agent selector
    #[arg(short, long)]
    device: Option<String>,

    /// Report audience
    #[arg(long)]
    audience: Option<String>,

    /// Run timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Directory receiving artifacts and the summary
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Bearer token for the lab API
    #[arg(long, env = "LABRUN_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Instrumentation argument (repeatable)
    #[arg(short, long = "instrumentation-arg", value_name = "KEY=VALUE")]
    instrumentation_args: Vec<String>,

    /// Extra top-level trigger field (repeatable)
    #[arg(short, long = "extra-arg", value_name = "KEY=VALUE")]
    extra_args: Vec<String>,
}

impl RunArgs {
    fn apply(self, config: &mut Config) -> Result<()> {
        let run = &mut config.run;
        if let Some(app) = self.app {
            run.app = Some(app);
        }
        if let Some(test_app) = self.test_app {
            run.test_app = Some(test_app);
        }
        if let Some(flavor) = self.flavor {
            run.build_flavor = flavor;
        }
        if let Some(suite) = self.suite {
            run.suite = suite;
        }
        if self.device.is_some() {
            run.device = self.device;
        }
        if self.audience.is_some() {
            run.audience = self.audience;
        }
        if let Some(timeout) = self.timeout {
            run.timeout_secs = timeout;
        }
        merge_pairs(&mut run.instrumentation_args, &self.instrumentation_args)
            .context("Invalid --instrumentation-arg")?;
        merge_pairs(&mut run.extra_args, &self.extra_args).context("Invalid --extra-arg")?;

        if let Some(output_dir) = self.output_dir {
            config.report.output_dir = output_dir;
        }
        if let Some(token) = self.token {
            config.lab.auth_token = token;
        }
        Ok(())
    }
}

fn merge_pairs(map: &mut BTreeMap<String, String>, pairs: &[String]) -> Result<()> {
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("expected KEY=VALUE, got \"{}\"", pair))?;
        if key.is_empty() {
            anyhow::bail!("empty key in \"{}\"", pair);
        }
        map.insert(key.to_string(), value.to_string());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the CI logging commands.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run(args) => run_tests(&cli.config, args, cli.verbose).await,
        Commands::Validate => validate_config(&cli.config),
        Commands::Init => init_config(&cli.config),
    }
}

async fn run_tests(config_path: &Path, args: RunArgs, verbose: bool) -> Result<()> {
    let mut config = config::load_config(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    info!("Loaded configuration from {}", config_path.display());

    // From here on every failure is announced as the build outcome.
    let reporter = create_reporter(&config, verbose);

    if let Err(e) = prepare_config(&mut config, args) {
        let err = abort_run(&reporter, RunError::InvalidInput(format!("{:#}", e))).await;
        exit_with(&err);
    }
    let client = match HttpLabClient::new(config.lab.clone()) {
        Ok(client) => client,
        Err(e) => exit_with(&abort_run(&reporter, e.into()).await),
    };
    let orchestrator = Orchestrator::new(config, client, TokioSleeper, reporter);

    let commit = match collect_commit_info(Path::new(".")).await {
        Ok(commit) => commit,
        Err(e) => exit_with(&orchestrator.abort(e.into()).await),
    };
    info!(commit = %commit.id, "Collected commit info");

    match orchestrator.run(&commit).await {
        Ok(report) => std::process::exit(report.exit_code()),
        Err(e) => exit_with(&e),
    }
}

/// Applies command-line overrides and environment defaults, then validates.
fn prepare_config(config: &mut Config, args: RunArgs) -> Result<()> {
    args.apply(config)?;
    if config.lab.pipeline_link.is_none() {
        config.lab.pipeline_link = pipeline_link_from_env();
    }
    config.validate()
}

fn exit_with(err: &RunError) -> ! {
    eprintln!("{} {}", console::style("error:").red().bold(), err);
    std::process::exit(1);
}

fn validate_config(config_path: &Path) -> Result<()> {
    let config = match config::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };

    let problems = config.problems();
    if !problems.is_empty() {
        eprintln!("Configuration error:");
        for problem in &problems {
            eprintln!("  - {}", problem);
        }
        std::process::exit(1);
    }

    println!("Configuration is valid!");
    println!();
    println!("Settings:");
    println!(
        "  Lab:          {}://{}{}",
        config.lab.scheme, config.lab.host, config.lab.context_path
    );
    println!("  Suite:        {}", config.run.suite);
    println!("  Timeout:      {}s", config.run.timeout_secs);
    if let Some(device) = &config.run.device {
        println!("  Device:       {}", device);
    }
    println!(
        "  Busy retries: {} every {}s",
        config.polling.busy_retries, config.polling.busy_retry_interval_secs
    );
    println!("  Output dir:   {}", config.report.output_dir.display());
    println!(
        "  Auth token:   {}",
        if config.lab.auth_token.is_empty() {
            "not set"
        } else {
            "set"
        }
    );

    Ok(())
}

const STARTER_CONFIG: &str = r#"# labrun configuration file

[lab]
scheme = "https"
host = "devicelab.example.com"
# Prefer the LABRUN_TOKEN environment variable in CI.
auth_token = ""
pkg_name = "com.example.app"
test_pkg_name = "com.example.app.test"

[run]
app = "app/build/outputs/apk/debug"
test_app = "app/build/outputs/apk/androidTest/debug"
build_flavor = "debug"
suite = "com.example.app.SmokeSuite"
timeout_secs = 1800

[run.instrumentation_args]

[polling]
busy_retries = 20
busy_retry_interval_secs = 30

[report]
output_dir = "test-results"
summary_file = "TestLabSummary.md"
ci_annotations = true
"#;

fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        eprintln!(
            "{} already exists. Remove it first or edit manually.",
            path.display()
        );
        std::process::exit(1);
    }

    std::fs::write(path, STARTER_CONFIG)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Created {}", path.display());
    println!();
    println!("Edit the configuration as needed, then run:");
    println!("  labrun run");

    Ok(())
}

fn create_reporter(config: &Config, verbose: bool) -> MultiReporter {
    let mut multi = MultiReporter::new();

    multi = multi.with_reporter(ConsoleReporter::new(verbose));

    if config.report.ci_annotations {
        multi = multi.with_reporter(PipelineReporter::stdout());
    }

    multi
}
