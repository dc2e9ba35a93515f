use anyhow::{Result, Context as AnyhowContext};
use std::fs;
use std::path::Path;
use crate::commands::instruction::ModificationInstruction;
use crate::config::EngineConfig;
use crate::dsl::Process;
use crate::runtime::execution::ExecutionTree;

pub fn load_process_from_yaml(file_path: impl AsRef<Path>) -> Result<Process> {
    let file_path = file_path.as_ref();
    let yaml_content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read YAML file from {}", file_path.display()))?;

    let process: Process = serde_yaml::from_str(&yaml_content)
        .with_context(|| format!("Failed to deserialize YAML content from {}", file_path.display()))?;

    Ok(process)
}

pub fn load_instructions_from_yaml(file_path: impl AsRef<Path>) -> Result<Vec<ModificationInstruction>> {
    let file_path = file_path.as_ref();
    let yaml_content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read instruction file from {}", file_path.display()))?;

    serde_yaml::from_str(&yaml_content)
        .with_context(|| format!("Failed to deserialize instructions from {}", file_path.display()))
}

pub fn load_config_from_yaml(file_path: impl AsRef<Path>) -> Result<EngineConfig> {
    let file_path = file_path.as_ref();
    let yaml_content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read config file from {}", file_path.display()))?;

    serde_yaml::from_str(&yaml_content)
        .with_context(|| format!("Failed to deserialize config from {}", file_path.display()))
}

/// Instance snapshots are plain JSON dumps of the execution tree.
pub fn load_snapshot(file_path: impl AsRef<Path>) -> Result<ExecutionTree> {
    let file_path = file_path.as_ref();
    let content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read snapshot from {}", file_path.display()))?;

    serde_json::from_str(&content)
        .with_context(|| format!("Failed to deserialize snapshot from {}", file_path.display()))
}

pub fn save_snapshot(tree: &ExecutionTree, file_path: impl AsRef<Path>) -> Result<()> {
    let file_path = file_path.as_ref();
    let content = serde_json::to_string_pretty(tree).context("Failed to serialize snapshot")?;
    fs::write(file_path, content)
        .with_context(|| format!("Failed to write snapshot to {}", file_path.display()))
}

/// Deletes the snapshot of an ended process instance. Returns whether a file was removed.
pub fn remove_snapshot(file_path: impl AsRef<Path>) -> Result<bool> {
    let file_path = file_path.as_ref();
    if !file_path.exists() {
        return Ok(false);
    }
    fs::remove_file(file_path)
        .with_context(|| format!("Failed to remove snapshot {}", file_path.display()))?;
    Ok(true)
}
