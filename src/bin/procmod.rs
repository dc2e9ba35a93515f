use clap::{Parser, Subcommand};
use procmod::compiler::loader;
use procmod::config::EngineConfig;
use procmod::runtime::context::SkipFlags;
use procmod::runtime::engine::ProcessEngine;
use procmod::runtime::execution::Variables;
use procmod::commands::instruction::ModificationInstruction;
use std::path::PathBuf;
use anyhow::Context;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about = "Start, inspect and modify process instance snapshots", long_about = None)]
struct Cli {
    /// Engine configuration YAML file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a process instance and write its snapshot
    Start {
        /// Path to the process YAML file
        process: PathBuf,
        /// Start before these activities instead of the start event
        #[arg(long = "activity")]
        activities: Vec<String>,
        /// Where to write the snapshot
        #[arg(long)]
        output: PathBuf,
    },
    /// Print the execution tree and activity instances of a snapshot
    Inspect {
        process: PathBuf,
        snapshot: PathBuf,
    },
    /// Apply an instruction file to a snapshot
    Modify {
        process: PathBuf,
        snapshot: PathBuf,
        /// Path to the instruction YAML file
        instructions: PathBuf,
        #[arg(long)]
        skip_custom_listeners: bool,
        #[arg(long)]
        skip_io_mappings: bool,
        /// Where to write the modified snapshot, defaults to overwriting the input
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn build_engine(config: Option<&PathBuf>, process: &PathBuf) -> anyhow::Result<(ProcessEngine, String)> {
    let config = match config {
        Some(path) => loader::load_config_from_yaml(path)?,
        None => EngineConfig::default(),
    };
    let engine = ProcessEngine::new(config);

    let process = loader::load_process_from_yaml(process)?;
    info!("Loaded process: {}", process.id);
    let definition_id = engine.deploy(process)?;
    Ok((engine, definition_id))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Start { process, activities, output } => {
            let (engine, definition_id) = build_engine(cli.config.as_ref(), process)?;

            let process_instance_id = if activities.is_empty() {
                engine.start_process_instance(&definition_id, Variables::new()).await?
            } else {
                let mut builder = engine.create_process_instance(&definition_id);
                for activity in activities {
                    builder = builder.start_before_activity(activity);
                }
                builder.execute().await?
            };
            info!("Started instance: {}", process_instance_id);

            let tree = engine.execution_tree(&process_instance_id).await?;
            loader::save_snapshot(&tree, output)?;
            println!("{}", tree.describe()?);
        }
        Commands::Inspect { process, snapshot } => {
            let (engine, _) = build_engine(cli.config.as_ref(), process)?;
            let tree = loader::load_snapshot(snapshot)?;
            let process_instance_id = engine.import_process_instance(tree).await?;

            let tree = engine.execution_tree(&process_instance_id).await?;
            println!("Execution tree:\n{}", tree.describe()?);
            match engine.get_activity_instance(&process_instance_id).await? {
                Some(activity_instance) => println!("Activity instances:\n{}", activity_instance),
                None => println!("Process instance has ended"),
            }
        }
        Commands::Modify {
            process,
            snapshot,
            instructions,
            skip_custom_listeners,
            skip_io_mappings,
            output,
        } => {
            let (engine, _) = build_engine(cli.config.as_ref(), process)?;
            let tree = loader::load_snapshot(snapshot)?;
            let process_instance_id = engine.import_process_instance(tree).await?;

            let instructions: Vec<ModificationInstruction> = loader::load_instructions_from_yaml(instructions)?;
            let flags = SkipFlags {
                skip_custom_listeners: *skip_custom_listeners,
                skip_io_mappings: *skip_io_mappings,
            };
            let outcome = engine
                .modify_process_instance(&process_instance_id, &instructions, flags, None)
                .await
                .with_context(|| format!("Failed to modify process instance {}", process_instance_id))?;
            info!("Applied {} instructions", outcome.instructions_applied);

            let target = output.as_ref().unwrap_or(snapshot);
            if outcome.terminated {
                // 实例已结束，不留下过期的快照
                if loader::remove_snapshot(target)? {
                    info!("Removed snapshot {}", target.display());
                }
                println!("Process instance {} has no work left and was deleted", process_instance_id);
                return Ok(());
            }
            let tree = engine.execution_tree(&process_instance_id).await?;
            loader::save_snapshot(&tree, target)?;
            println!("{}", tree.describe()?);
        }
    }

    Ok(())
}
