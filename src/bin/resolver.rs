//! Import Resolver CLI
//!
//! Loads an installation state directory and runs context resolution and
//! import construction against it.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use landscaper_imports::graph::{load_blueprints, load_state_directory, LoadConfig};
use landscaper_imports::{
    construct_imports, resolve_context, Blueprint, ImportStatusWriter, Installation, InstallationGraph,
    ObjectRef, ResolutionOutcome, ResolutionState, ResolverConfig,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "landscaper-imports")]
#[command(about = "Resolve installation contexts and imports from a state snapshot")]
struct Cli {
    /// Config file (landscaper.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// State directory, overrides the configured path
    #[arg(short, long)]
    state: Option<PathBuf>,

    /// Blueprint directory, overrides the configured path
    #[arg(short, long)]
    blueprints: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show parent and siblings of an installation
    Context {
        /// Installation as <namespace>/<name>
        installation: String,
    },

    /// Construct the imports of an installation
    Construct {
        /// Installation as <namespace>/<name>
        installation: String,
        /// Expand dotted keys into nested objects
        #[arg(long)]
        nested: bool,
        /// Stop at the first failing import
        #[arg(long)]
        fail_fast: bool,
    },

    /// Construct the imports of all installations, parents first
    Check {
        /// Output file (JSON)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

struct Workspace {
    config: ResolverConfig,
    graph: InstallationGraph,
    blueprints: BTreeMap<String, Blueprint>,
}

impl Workspace {
    fn open(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = ResolverConfig::load_from(cli.config.as_deref()).context("failed to load configuration")?;
        if let Some(state) = &cli.state {
            config.state.path = state.clone();
        }
        if let Some(blueprints) = &cli.blueprints {
            config.state.blueprints = Some(blueprints.clone());
        }

        let state_path = config.state_path();
        let graph = load_state_directory(&state_path, &LoadConfig::default())
            .with_context(|| format!("failed to load state from {}", state_path.display()))?;
        let blueprints = match config.blueprints_path() {
            Some(path) => load_blueprints(&path)?,
            None => BTreeMap::new(),
        };

        Ok(Self {
            config,
            graph,
            blueprints,
        })
    }

    fn installation(&self, reference: &str) -> anyhow::Result<Installation> {
        let reference = ObjectRef::parse(reference)?;
        self.graph
            .get(&reference)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("installation {} not found", reference))
    }

    fn blueprint_for(&self, installation: &Installation) -> Blueprint {
        let Some(name) = &installation.spec.blueprint else {
            return Blueprint::new();
        };
        match self.blueprints.get(name) {
            Some(blueprint) => blueprint.clone(),
            None => {
                warn!(installation = %installation.object_ref(), blueprint = %name, "blueprint not found");
                Blueprint::new()
            }
        }
    }
}

fn outcome_icon(state: ResolutionState) -> &'static str {
    match state {
        ResolutionState::Resolved => "✅",
        ResolutionState::Waiting => "⏳",
        ResolutionState::Failed => "❌",
    }
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut workspace = Workspace::open(&cli)?;

    match cli.command {
        Commands::Context { installation } => {
            let inst = workspace.installation(&installation)?;
            let context = resolve_context(&workspace.graph, &inst)?;

            let report = serde_json::json!({
                "installation": inst.object_ref().to_string(),
                "parent": context.parent.as_ref().map(|p| p.object_ref().to_string()),
                "siblings": context.siblings.iter().map(|s| s.name().to_string()).collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(0)
        }

        Commands::Construct {
            installation,
            nested,
            fail_fast,
        } => {
            let inst = workspace.installation(&installation)?;
            let loader = workspace.config.reference_loader(&workspace.blueprint_for(&inst));
            let mut options = workspace.config.constructor_options();
            options.fail_fast |= fail_fast;

            let outcome = ResolutionOutcome::from(construct_imports(&workspace.graph, &inst, loader, options));
            match outcome {
                ResolutionOutcome::Resolved(construction) => {
                    let unchanged = construction.is_unchanged_from(inst.import_status());
                    let values = if nested {
                        construction.nested_values()?
                    } else {
                        serde_json::to_value(&construction.values)?
                    };
                    let report = serde_json::json!({
                        "values": values,
                        "importStatus": construction.import_status,
                        "unchanged": unchanged,
                    });
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    Ok(0)
                }
                ResolutionOutcome::Waiting(err) => {
                    println!("⏳ {} is waiting: {}", inst.object_ref(), err);
                    Ok(2)
                }
                ResolutionOutcome::Failed(err) => {
                    println!("❌ {} failed: {}", inst.object_ref(), err);
                    Ok(1)
                }
            }
        }

        Commands::Check { output } => {
            let order = workspace.graph.resolution_order();
            println!("🔍 Resolving imports of {} installations...", order.len());

            let mut results = serde_json::Map::new();
            let mut failed = 0usize;
            let mut waiting = 0usize;

            for reference in order {
                let inst = workspace.installation(&reference.to_string())?;
                let loader = workspace.config.reference_loader(&workspace.blueprint_for(&inst));
                let options = workspace.config.constructor_options();
                let outcome = ResolutionOutcome::from(construct_imports(&workspace.graph, &inst, loader, options));

                let state = outcome.state();
                match &outcome {
                    ResolutionOutcome::Resolved(construction) => {
                        workspace.graph.record_construction(&reference, construction)?;
                        println!("  {} {} - {} imports", outcome_icon(state), reference, construction.values.len());
                    }
                    ResolutionOutcome::Waiting(err) | ResolutionOutcome::Failed(err) => {
                        if state == ResolutionState::Waiting {
                            waiting += 1;
                        } else {
                            failed += 1;
                        }
                        println!("  {} {} - {}", outcome_icon(state), reference, err);
                    }
                }

                results.insert(
                    reference.to_string(),
                    serde_json::json!({
                        "state": format!("{:?}", state),
                        "imports": outcome.construction().map(|c| c.values.len()),
                        "error": outcome.error().map(|e| e.to_string()),
                    }),
                );
            }

            let report = serde_json::json!({
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "installations": results.len(),
                "failed": failed,
                "waiting": waiting,
                "results": results,
            });

            if let Some(path) = output {
                std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;
                println!("✅ Report written to {:?}", path);
            }

            println!();
            if failed > 0 {
                println!("❌ {} installation(s) failed, {} waiting", failed, waiting);
                Ok(1)
            } else if waiting > 0 {
                println!("⏳ {} installation(s) waiting", waiting);
                Ok(0)
            } else {
                println!("✅ All imports resolved");
                Ok(0)
            }
        }
    }
}
