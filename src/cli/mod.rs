//! CLI subcommands — init, validate, preview, up, outputs.

use std::path::{Path, PathBuf};

use clap::Subcommand;

use crate::core::config;
use crate::engine::apply::apply;
use crate::engine::provider::LocalProvider;
use crate::engine::state;
use crate::stack;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new nimbus project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate stack.yaml and the assembled graph without applying
    Validate {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,
    },

    /// Show what an apply would do against the current engine state
    Preview {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Assemble the graph and apply it through the local provider
    Up {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Regenerate persisted credentials instead of reusing them
        #[arg(long)]
        rotate_credentials: bool,
    },

    /// Show the outputs of the last successful apply
    Outputs {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },
}

/// Dispatch a CLI command.
pub async fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Preview { file, state_dir } => cmd_preview(&file, &state_dir),
        Commands::Up {
            file,
            state_dir,
            rotate_credentials,
        } => cmd_up(&file, &state_dir, rotate_credentials).await,
        Commands::Outputs { state_dir } => cmd_outputs(&state_dir),
    }
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("stack.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir).map_err(|e| format!("cannot create state dir: {}", e))?;

    let template = r#"version: "1.0"
name: my-stack
location: westeurope

# plan:
#   tier: Basic
#   size: B1
#   capacity: 1

# sql:
#   database: my-database
#   firewall:
#     start: 0.0.0.0
#     end: 0.0.0.0

# package:
#   container: deployments
#   blob: api.zip
#   source: deploy/api.zip
"#;
    std::fs::write(&config_path, template)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("initialized {}", config_path.display());
    Ok(())
}

fn load_and_check(file: &Path) -> Result<config::StackConfig, String> {
    let cfg = config::load_config(file).map_err(|e| e.to_string())?;
    let findings = config::validate_config(&cfg);
    if !findings.is_empty() {
        for finding in &findings {
            eprintln!("  - {}", finding.message);
        }
        return Err(format!("{} validation finding(s)", findings.len()));
    }
    Ok(cfg)
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let cfg = load_and_check(file)?;
    let deployment = stack::assemble(&cfg).map_err(|e| e.to_string())?;
    println!(
        "ok: {} resources, {} outputs",
        deployment.graph().len(),
        deployment.export_names().len()
    );
    Ok(())
}

fn cmd_preview(file: &Path, state_dir: &Path) -> Result<(), String> {
    let cfg = load_and_check(file)?;
    let deployment = stack::assemble(&cfg).map_err(|e| e.to_string())?;
    let known: std::collections::HashSet<String> = state::load_state(state_dir)
        .map_err(|e| e.to_string())?
        .map(|s| {
            s.physical_names
                .keys()
                .chain(s.secrets.keys())
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    let mut to_create = 0u32;
    let mut to_reuse = 0u32;
    for name in deployment.execution_order() {
        let node = match deployment.graph().get(name) {
            Some(node) => node,
            None => continue,
        };
        let action = if known.contains(name) {
            to_reuse += 1;
            "REUSE "
        } else {
            to_create += 1;
            "CREATE"
        };
        if node.depends_on.is_empty() {
            println!("  {} {} ({})", action, name, node.kind);
        } else {
            println!(
                "  {} {} ({}) <- {}",
                action,
                name,
                node.kind,
                node.depends_on.join(", ")
            );
        }
    }
    println!("plan: {} to create, {} reused", to_create, to_reuse);
    Ok(())
}

async fn cmd_up(file: &Path, state_dir: &Path, rotate_credentials: bool) -> Result<(), String> {
    let cfg = load_and_check(file)?;
    let deployment = stack::assemble(&cfg).map_err(|e| e.to_string())?;

    let mut provider = LocalProvider::open(state_dir).map_err(|e| e.to_string())?;
    if rotate_credentials {
        provider = provider.with_forced_rotation();
    }

    let outputs = apply(deployment, &provider).await.map_err(|e| e.to_string())?;
    provider.record_outputs(&outputs).map_err(|e| e.to_string())?;

    let json = serde_json::to_string_pretty(&outputs).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}

fn cmd_outputs(state_dir: &Path) -> Result<(), String> {
    let state = state::load_state(state_dir)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "no engine state found; run `nimbus up` first".to_string())?;
    if state.outputs.is_empty() {
        return Err("no outputs recorded; run `nimbus up` first".to_string());
    }
    let json = serde_json::to_string_pretty(&state.outputs).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}
