//! `phasekit` CLI: run a goal, validate plan/action files, write a config.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;

use phasekit::core::actions::validate_actions;
use phasekit::core::order::topological_order;
use phasekit::core::plan::{check_plan, validate_plan};
use phasekit::error::{LoopGuardError, PlannerError, TaskCancelled};
use phasekit::exit_codes;
use phasekit::io::config::{AgentConfig, DEFAULT_CONFIG_PATH, load_config, write_config};
use phasekit::io::oracle::CommandOracle;
use phasekit::io::quality::ShellQualityRunner;
use phasekit::logging;
use phasekit::orchestrator::Orchestrator;

#[derive(Parser)]
#[command(
    name = "phasekit",
    version,
    about = "Plan, execute, and verify oracle-driven project generation"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one goal in a fresh task workspace and print the result as JSON.
    Run {
        #[arg(short, long)]
        goal: String,
        /// Config file (defaults apply when it does not exist).
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Validate a plan file and print its phases in execution order.
    ValidatePlan { file: PathBuf },
    /// Validate an actions file.
    ValidateActions { file: PathBuf },
    /// Write the default config.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        path: PathBuf,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { goal, config } => cmd_run(&goal, &config),
        Command::ValidatePlan { file } => cmd_validate_plan(&file),
        Command::ValidateActions { file } => cmd_validate_actions(&file),
        Command::InitConfig { force, path } => cmd_init_config(&path, force),
    }
}

fn cmd_run(goal: &str, config_path: &Path) -> Result<i32> {
    if goal.trim().is_empty() {
        bail!("goal must not be empty");
    }
    let config = load_config(config_path)?;
    let oracle = CommandOracle {
        argv: config.oracle.command.clone(),
        workdir: std::env::current_dir().context("resolve current directory")?,
        timeout: config.oracle_timeout(),
        output_limit_bytes: config.output_limit_bytes,
    };
    let quality = ShellQualityRunner {
        env: config.project.env.clone(),
        output_limit_bytes: config.output_limit_bytes,
    };
    let result = Orchestrator::new(oracle, quality, config).run_task(goal)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("serialize task result")?
    );
    Ok(if result.ok {
        exit_codes::OK
    } else {
        exit_codes::TASK_FAILED
    })
}

fn cmd_validate_plan(file: &Path) -> Result<i32> {
    let raw = read_json(file)?;
    let plan = validate_plan(&raw)?;
    let order = topological_order(&check_plan(&plan)?)?;
    for idx in order {
        println!("{}", plan.phases[idx].name);
    }
    Ok(exit_codes::OK)
}

fn cmd_validate_actions(file: &Path) -> Result<i32> {
    let raw = read_json(file)?;
    let actions = validate_actions(&raw)?;
    println!("{} action(s) valid", actions.len());
    Ok(exit_codes::OK)
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &AgentConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn read_json(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<LoopGuardError>().is_some() {
        exit_codes::LOOP_GUARD
    } else if err.downcast_ref::<PlannerError>().is_some() {
        exit_codes::PLANNER
    } else if err.downcast_ref::<TaskCancelled>().is_some() {
        exit_codes::CANCELLED
    } else {
        exit_codes::INVALID
    }
}
