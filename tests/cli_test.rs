use std::fs;
use std::path::Path;
use std::process::Command;

fn procmod(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_procmod"))
        .args(args)
        .output()
        .expect("Failed to run procmod")
}

#[test]
fn test_modify_removes_snapshot_when_instance_ends() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let process = Path::new("dsl_examples").join("parallel_tasks.yaml");
    let process = process.to_str().expect("utf-8 path");
    let snapshot = temp_dir.path().join("instance.json");
    let snapshot = snapshot.to_str().expect("utf-8 path");

    // 1. Start at taskA only
    let started = procmod(&["start", process, "--activity", "taskA", "--output", snapshot]);
    assert!(started.status.success(), "start failed: {}", String::from_utf8_lossy(&started.stderr));
    assert!(Path::new(snapshot).exists());

    // 2. Cancel the only running activity
    let instructions = temp_dir.path().join("cancel.yaml");
    fs::write(&instructions, "- type: CancelAllForActivity\n  activity_id: taskA\n").expect("Failed to write instructions");
    let modified = procmod(&["modify", process, snapshot, instructions.to_str().expect("utf-8 path")]);
    assert!(modified.status.success(), "modify failed: {}", String::from_utf8_lossy(&modified.stderr));

    // 3. No snapshot of a live instance is left behind
    let stdout = String::from_utf8_lossy(&modified.stdout);
    assert!(stdout.contains("has no work left"), "unexpected output: {}", stdout);
    assert!(!Path::new(snapshot).exists());
}

#[test]
fn test_modify_with_output_keeps_input_snapshot() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let process = Path::new("dsl_examples").join("parallel_tasks.yaml");
    let process = process.to_str().expect("utf-8 path");
    let snapshot = temp_dir.path().join("instance.json");
    let snapshot = snapshot.to_str().expect("utf-8 path");
    let output = temp_dir.path().join("modified.json");
    let output = output.to_str().expect("utf-8 path");

    let started = procmod(&["start", process, "--activity", "taskA", "--output", snapshot]);
    assert!(started.status.success(), "start failed: {}", String::from_utf8_lossy(&started.stderr));

    // a stale result from an earlier run sits at the output path
    fs::copy(snapshot, output).expect("Failed to copy snapshot");

    let instructions = temp_dir.path().join("cancel.yaml");
    fs::write(&instructions, "- type: CancelAllForActivity\n  activity_id: taskA\n").expect("Failed to write instructions");
    let modified = procmod(&[
        "modify",
        process,
        snapshot,
        instructions.to_str().expect("utf-8 path"),
        "--output",
        output,
    ]);
    assert!(modified.status.success(), "modify failed: {}", String::from_utf8_lossy(&modified.stderr));

    assert!(Path::new(snapshot).exists());
    assert!(!Path::new(output).exists());
}
