//! stagehand CLI
//!
//! Runs deployment tasks from `deploy.toml` against the host of a stage

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use eyre::WrapErr;
use stagehand_core::{DeploymentRun, HostDescriptor, Plan, Runner};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod factory;

use config::{Config, LogFormat};
use factory::DefaultExecutorFactory;

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(about = "Sequential remote deployment runner", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to deploy.toml
    #[arg(short, long, global = true, env = "STAGEHAND_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log output format
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy to a stage
    Deploy {
        /// Target stage (defaults to `default_stage`)
        stage: Option<String>,

        /// Target stage, as a flag
        #[arg(long = "stage", conflicts_with = "stage")]
        stage_flag: Option<String>,

        /// Root task to run
        #[arg(short, long, default_value = "deploy")]
        task: String,

        /// Print the steps without contacting the host
        #[arg(long)]
        dry_run: bool,
    },

    /// Run a single task against a stage
    Run {
        /// Task name
        task: String,

        /// Target stage (defaults to `default_stage`)
        stage: Option<String>,

        /// Print the steps without contacting the host
        #[arg(long)]
        dry_run: bool,
    },

    /// List tasks that can be run directly
    Tasks {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List configured hosts
    Hosts,
}

impl Commands {
    /// Stage named on the command line, if any
    fn requested_stage(&self) -> Option<&str> {
        match self {
            Commands::Deploy {
                stage, stage_flag, ..
            } => stage_flag.as_deref().or(stage.as_deref()),
            Commands::Run { stage, .. } => stage.as_deref(),
            Commands::Tasks { .. } | Commands::Hosts => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    let format = cli.log_format.unwrap_or(config.log.format);
    init_tracing(&config.log.level, cli.verbose, format)?;

    let requested = cli.command.requested_stage().map(str::to_string);

    match cli.command {
        Commands::Deploy { task, dry_run, .. } | Commands::Run { task, dry_run, .. } => {
            let stage = config.stage(requested.as_deref())?;
            execute(&config, stage, &task, dry_run, format).await
        }
        Commands::Tasks { json } => {
            list_tasks(&config, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Hosts => {
            list_hosts(&config)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Set up the subscriber; `RUST_LOG` wins over the configured level and `-v`
fn init_tracing(level: &str, verbose: u8, format: LogFormat) -> Result<()> {
    let level = match verbose {
        0 => level,
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()?,
    }

    Ok(())
}

async fn execute(
    config: &Config,
    stage: &str,
    task: &str,
    dry_run: bool,
    format: LogFormat,
) -> Result<ExitCode> {
    let registry = config.registry()?;
    let graph = config.task_graph()?;
    graph.entry_point(task)?;
    let host = registry
        .resolve(stage)
        .wrap_err_with(|| format!("configured stages: {}", registry.stages().join(", ")))?;

    let runner = Runner::new(
        graph,
        config.settings.clone(),
        Arc::new(DefaultExecutorFactory::new()),
    )?;

    if dry_run {
        let plan = runner.plan(host, task)?;
        print_plan(host, &plan);
        return Ok(ExitCode::SUCCESS);
    }

    let run = match runner.run(host, task).await {
        Ok(run) => run,
        Err(e) if e.is_construction_error() => {
            return Err(e).wrap_err_with(|| format!("{task} not started, {stage} left untouched"));
        }
        Err(e) => return Err(e.into()),
    };
    report(&run, format)?;

    Ok(if run.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_plan(host: &HostDescriptor, plan: &Plan) {
    println!(
        "{}@{} ({}), release {}",
        host.user(),
        host.address(),
        host.stage(),
        plan.release_name
    );
    let total = plan.steps.len();
    for (index, step) in plan.steps.iter().enumerate() {
        println!("  [{}/{total}] {}: {}", index + 1, step.task, step.action);
    }
    if !plan.failure_hook.is_empty() {
        println!("on failure:");
        for step in &plan.failure_hook {
            println!("  {}: {}", step.task, step.action);
        }
    }
}

fn report(run: &DeploymentRun, format: LogFormat) -> Result<()> {
    if format == LogFormat::Json {
        println!("{}", serde_json::to_string(run)?);
        return Ok(());
    }

    match run.failure_reason() {
        None => println!(
            "{} succeeded on {}: release {}, {} tasks",
            run.root_task(),
            run.stage(),
            run.release_name(),
            run.completed_tasks()
        ),
        Some(reason) => eprintln!(
            "{} failed on {} at task {}/{}: {reason}",
            run.root_task(),
            run.stage(),
            run.current_task_index() + 1,
            run.total_tasks()
        ),
    }
    Ok(())
}

fn list_tasks(config: &Config, json: bool) -> Result<()> {
    let graph = config.task_graph()?;
    let tasks = graph.public_tasks();

    if json {
        let entries: Vec<_> = tasks
            .iter()
            .map(|t| serde_json::json!({ "name": t.name, "description": t.description }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    let width = tasks.iter().map(|t| t.name.len()).max().unwrap_or(0);
    for task in tasks {
        println!(
            "{:width$}  {}",
            task.name,
            task.description.as_deref().unwrap_or_default()
        );
    }
    Ok(())
}

fn list_hosts(config: &Config) -> Result<()> {
    let registry = config.registry()?;
    for host in registry.hosts() {
        println!(
            "{}  {}@{}:{}  {}",
            host.stage(),
            host.user(),
            host.address(),
            host.port(),
            host.deploy_path_template()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::error::ErrorKind;

    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("stagehand").chain(args.iter().copied()))
    }

    #[test]
    fn test_deploy_stage_flag() {
        let cli = parse(&["deploy", "--stage=production"]).unwrap();

        assert_eq!(cli.command.requested_stage(), Some("production"));
        let Commands::Deploy { task, dry_run, .. } = &cli.command else {
            panic!("expected deploy command");
        };
        assert_eq!(task, "deploy");
        assert!(!dry_run);
    }

    #[test]
    fn test_deploy_positional_stage() {
        let cli = parse(&["deploy", "production", "--dry-run"]).unwrap();

        assert_eq!(cli.command.requested_stage(), Some("production"));
        assert!(matches!(cli.command, Commands::Deploy { dry_run: true, .. }));
    }

    #[test]
    fn test_stage_given_twice_conflicts() {
        let err = parse(&["deploy", "production", "--stage", "staging"])
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_default_stage_fallback() {
        let cli = parse(&["deploy"]).unwrap();
        assert_eq!(cli.command.requested_stage(), None);

        let config: Config = toml::from_str(
            r#"
application = "pisc"
default_stage = "production"
"#,
        )
        .unwrap();
        assert_eq!(
            config.stage(cli.command.requested_stage()).unwrap(),
            "production"
        );
    }

    #[test]
    fn test_run_and_global_flags() {
        let cli = parse(&["-vv", "run", "deploy:unlock:force", "production", "--log-format", "json"])
            .unwrap();

        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.log_format, Some(LogFormat::Json));
        assert_eq!(cli.command.requested_stage(), Some("production"));
        assert!(matches!(
            &cli.command,
            Commands::Run { task, .. } if task == "deploy:unlock:force"
        ));
    }
}
