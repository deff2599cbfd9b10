use std::process::{Command, Output};

fn run_simulation(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_traffic_graph_sim"))
        .args(args)
        .env("RUST_LOG", "warn,traffic_graph_sim=info")
        .output()
        .expect("Failed to execute simulation")
}

/// Test that the simulation runs headless and completes its tick budget
#[test]
fn test_headless_simulation_runs() {
    let output = run_simulation(&["--ticks", "60", "--fps", "0", "--seed", "7"]);

    assert!(
        output.status.success(),
        "Simulation failed to run. stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("=== SIMULATION COMPLETE ==="),
        "Simulation did not complete properly. stderr: {}",
        stderr
    );
    assert!(stderr.contains("Ticks run: 60"), "stderr: {}", stderr);
}

/// Test that the summary statistics are logged
#[test]
fn test_simulation_statistics_logged() {
    let output = run_simulation(&["--ticks", "30", "--fps", "0", "--seed", "3", "--agents", "6"]);
    assert!(output.status.success(), "Simulation failed to run");

    let stderr = String::from_utf8_lossy(&output.stderr);
    for line in [
        "Ticks run:",
        "Agents: 6",
        "Nodes: 25",
        "Roads: 40",
        "Traffic lights: 21",
        "Reroutes:",
        "Closed edges:",
    ] {
        assert!(stderr.contains(line), "Missing '{}' statistic. stderr: {}", line, stderr);
    }
}

/// Test that every generation mode runs
#[test]
fn test_all_graph_modes_run() {
    let modes = [("grid", "4"), ("small-world", "12"), ("predefined", "0"), ("ring-road", "10")];
    for (mode, size) in modes {
        let output = run_simulation(&[
            "--ticks", "20", "--fps", "0", "--seed", "5", "--mode", mode, "--size", size,
        ]);
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(output.status.success(), "Mode {} failed. stderr: {}", mode, stderr);
        assert!(stderr.contains("SIMULATION COMPLETE"), "Mode {} did not complete", mode);
    }
}

/// Test that scheduled road edits and the inspector run alongside the loop
#[test]
fn test_road_edits_with_inspector() {
    let output = run_simulation(&[
        "--ticks",
        "120",
        "--fps",
        "200",
        "--seed",
        "7",
        "--close-edge",
        "(0,0)-(0,1)@10",
        "--open-edge",
        "(0,0)-(0,1)@40",
        "--inspect",
        "--inspect-interval-ms",
        "50",
    ]);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "Simulation failed. stderr: {}", stderr);
    assert!(stderr.contains("[inspector]"), "No inspector output. stderr: {}", stderr);
    assert!(stderr.contains("SIMULATION COMPLETE"));
}

/// Test that a malformed road edit is rejected before the run starts
#[test]
fn test_malformed_edit_is_rejected() {
    let output = run_simulation(&["--ticks", "5", "--close-edge", "nonsense"]);
    assert!(!output.status.success());
}
