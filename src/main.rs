use std::path::PathBuf;

use castellan::rbac::detector::{DfsDetector, EffectConflictDetector};
use castellan::{Enforcer, EnforcerSettings};
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "castellan",
    version,
    about = "Policy-based authorization engine"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "castellan.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decide a single request, e.g. `enforce alice data1 read`
    Enforce {
        /// Model file (overrides `model_path`)
        #[arg(short, long)]
        model: Option<PathBuf>,
        /// KDL policy file or directory (overrides `policy_path`)
        #[arg(short, long)]
        policy: Option<PathBuf>,
        /// Request values in `r` order
        #[arg(required = true)]
        request: Vec<String>,
    },
    /// Load a model and policy, then run role graph and constraint checks
    Check {
        #[arg(short, long)]
        model: Option<PathBuf>,
        #[arg(short, long)]
        policy: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = EnforcerSettings::load(&cli.config)?;
    tracing::debug!(?settings, "Loaded configuration");

    match cli.command {
        Command::Enforce {
            model,
            policy,
            request,
        } => {
            let enforcer = build_enforcer(settings, model, policy)?;
            let decision = enforcer.enforce_ex(&request)?;
            if decision.allowed {
                println!("allow");
            } else {
                println!("deny");
            }
            if !decision.explain.is_empty() {
                println!("  by: {}", decision.explain.join(", "));
            }
        }
        Command::Check { model, policy } => {
            let mut enforcer = build_enforcer(settings, model, policy)?;
            enforcer.set_detectors(vec![Box::new(DfsDetector)]);
            enforcer.set_model_detectors(vec![Box::new(EffectConflictDetector)]);
            enforcer.run_detections()?;
            enforcer.model().validate_constraints()?;
            println!("ok");
        }
    }
    Ok(())
}

fn build_enforcer(
    mut settings: EnforcerSettings,
    model: Option<PathBuf>,
    policy: Option<PathBuf>,
) -> Result<Enforcer> {
    if let Some(model) = model {
        settings.model_path = Some(model);
    }
    if let Some(policy) = policy {
        settings.policy_path = Some(policy);
    }
    let enforcer = Enforcer::from_settings(settings)?;
    let rules = enforcer.get_policy().into_diagnostic()?.len();
    tracing::info!(rules, "Loaded policy");
    Ok(enforcer)
}
