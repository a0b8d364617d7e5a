//! Minimal software-engineering agent.
//!
//! Asks a language model for one shell command per turn, runs it, and feeds the output back
//! until the model submits its work or a step/cost limit is reached.

use std::fs;
use std::path::{Path, PathBuf};

use agent::agent::Agent;
use agent::exit_codes;
use agent::io::config::{init_config, load_config};
use agent::io::environment::LocalEnvironment;
use agent::io::model::{CommandModel, Model};
use agent::io::trajectory::{ModelStats, Trajectory, TrajectoryInfo, save_trajectory};
use agent::logging;
use agent::retrieval::RetrievalStrategy;
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::info;

const DEFAULT_CONFIG_PATH: &str = "agent.toml";

#[derive(Parser)]
#[command(
    name = "agent",
    version,
    about = "Minimal shell-driving agent loop for software engineering tasks"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the built-in configuration to disk.
    Init {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Run the agent on a task until it submits or hits a limit.
    Run {
        /// Task description.
        #[arg(long, conflicts_with = "task_file", required_unless_present = "task_file")]
        task: Option<String>,
        /// Read the task description from a file.
        #[arg(long)]
        task_file: Option<PathBuf>,
        /// Config file; built-in defaults are used if it does not exist.
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Extra template variable (`key=value`), repeatable.
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
        vars: Vec<(String, String)>,
        /// Write the trajectory JSON here.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Strategy that pre-selected files for the task (adds guidance to the system prompt).
        #[arg(long)]
        retrieval: Option<String>,
        /// Model command argument, repeatable; replaces `model.command` from the config.
        #[arg(long = "model-command", value_name = "ARG", allow_hyphen_values = true)]
        model_command: Vec<String>,
    },
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty variable name in `{raw}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { config, force } => cmd_init(&config, force),
        Command::Run {
            task,
            task_file,
            config,
            vars,
            output,
            retrieval,
            model_command,
        } => {
            let task = match (task, task_file) {
                (Some(task), _) => task,
                (None, Some(path)) => fs::read_to_string(&path)
                    .with_context(|| format!("read task file {}", path.display()))?,
                (None, None) => return Err(anyhow!("either --task or --task-file is required")),
            };
            cmd_run(RunArgs {
                task,
                config,
                vars,
                output,
                retrieval: retrieval
                    .as_deref()
                    .map(RetrievalStrategy::parse)
                    .unwrap_or_default(),
                model_command,
            })
        }
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if init_config(path, force)? {
        println!("wrote {}", path.display());
    } else {
        println!("{} already exists (use --force to overwrite)", path.display());
    }
    Ok(exit_codes::OK)
}

struct RunArgs {
    task: String,
    config: PathBuf,
    vars: Vec<(String, String)>,
    output: Option<PathBuf>,
    retrieval: RetrievalStrategy,
    model_command: Vec<String>,
}

fn cmd_run(args: RunArgs) -> Result<i32> {
    let mut config = load_config(&args.config)?;
    if !args.model_command.is_empty() {
        config.model.command = args.model_command;
    }
    config.agent.system_template = args
        .retrieval
        .apply_to_system_template(&config.agent.system_template);

    let model = CommandModel::new(config.model.clone())?;
    let env = LocalEnvironment::new(config.environment.clone())?;
    let mut agent = Agent::new(config.agent.clone(), model, env)?;

    let extras: Map<String, Value> = args
        .vars
        .into_iter()
        .map(|(key, value)| (key, Value::from(value)))
        .collect();
    info!(retrieval = %args.retrieval, extras = extras.len(), "starting run");
    let result = agent.run(&args.task, extras);

    let (exit_status, message) = match &result {
        Ok(outcome) => (outcome.exit_status.clone(), outcome.message.clone()),
        Err(err) => ("Error".to_string(), format!("{:#}", err)),
    };

    if let Some(path) = &args.output {
        let trajectory = Trajectory {
            info: TrajectoryInfo {
                exit_status: exit_status.clone(),
                submission: message.clone(),
                model_stats: ModelStats {
                    api_calls: agent.model().n_calls(),
                    instance_cost: agent.model().cost(),
                },
                config,
            },
            messages: agent.messages().to_vec(),
        };
        save_trajectory(path, &trajectory)?;
        info!(path = %path.display(), "saved trajectory");
    }

    result?;
    println!("{exit_status}");
    if !message.is_empty() {
        println!("{message}");
    }
    Ok(exit_codes::for_exit_status(&exit_status))
}
