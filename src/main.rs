//! lockweave - Main entry point
//!
//! Thin front end over the library: load inputs, build the registry, print
//! the plan or the result of a single evaluator.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use lockweave::cli::{Cli, Commands};
use lockweave::{
    constraint, marker, platform, BuildPlan, LockFile, PlanConfig, RegistryBuilder,
    TargetEnvironment,
};

/// Exit status of `plan --strict` when broken packages are present
const EXIT_BROKEN: u8 = 2;

/// Initialize tracing on stderr; `RUST_LOG` wins unless `--verbose` is given
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);
    debug!("CLI arguments parsed");

    match run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("✗ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Plan {
            lock,
            env,
            config,
            summary,
            strict,
            output,
        } => {
            let env = load_environment(env.as_deref())?;
            let config = match config {
                Some(path) => {
                    let config = PlanConfig::load_from_file(&path)?;
                    config
                        .validate()
                        .with_context(|| format!("Invalid plan configuration {:?}", path))?;
                    config
                }
                None => PlanConfig::default(),
            };

            info!("Planning {:?} for python {}", lock, env.python_full_version());
            let lock = LockFile::load_from_file(&lock)?;
            let registry = RegistryBuilder::new(&env)
                .config(config)
                .build(&lock.packages())
                .context("Failed to build plan")?;
            let plan = BuildPlan::from_registry(&registry, &env);

            match (summary, output) {
                (true, _) => print!("{}", plan),
                (false, Some(path)) => {
                    plan.save_to_file(&path)?;
                    info!("Plan written to {:?}", path);
                }
                (false, None) => println!("{}", plan.to_json()?),
            }

            if strict && plan.has_broken() {
                eprintln!(
                    "✗ Broken for python {}: {}",
                    plan.python_version,
                    plan.broken.join(", ")
                );
                return Ok(ExitCode::from(EXIT_BROKEN));
            }
        }
        Commands::Constraint {
            version,
            constraint: expr,
        } => {
            let satisfied = constraint::satisfies(&version, &expr)?;
            println!("{}", satisfied);
        }
        Commands::Marker {
            marker: expr,
            env,
            extras,
        } => {
            let mut env = load_environment(env.as_deref())?;
            for extra in &extras {
                env = env.with_extra(extra);
            }
            println!("{}", marker::evaluate(&expr, &env)?);
        }
        Commands::Platform { tag } => {
            let requirements = platform::resolve(&tag);
            println!(
                "{}",
                serde_json::to_string_pretty(&requirements)
                    .context("Failed to serialize platform requirements")?
            );
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn load_environment(path: Option<&Path>) -> Result<TargetEnvironment> {
    let Some(path) = path else {
        return Ok(TargetEnvironment::default());
    };

    let env = TargetEnvironment::load_from_file(path)?;
    env.validate()
        .with_context(|| format!("Invalid target environment {:?}", path))?;
    Ok(env)
}
