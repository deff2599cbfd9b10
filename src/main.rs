use anyhow::{anyhow, Context};
use clap::Parser;
use log::{error, info};
use std::time::Duration;

use traffic_graph_sim::inspector::{self, ScheduledEdit};
use traffic_graph_sim::simulation::{
    spawn_clock, Command, GraphMode, LoopConfig, SharedHandle, SimConfig, SimulationClock,
};

#[derive(Parser)]
#[command(name = "traffic_graph_sim")]
#[command(about = "Headless traffic micro-simulation on a road network graph")]
struct Cli {
    /// Number of simulation ticks to run; 0 runs until interrupted
    #[arg(long, default_value = "600")]
    ticks: u64,

    /// Time delta per tick in seconds
    #[arg(long, default_value = "0.1")]
    delta: f32,

    /// Tick rate limit per wall-clock second; 0 runs as fast as possible
    #[arg(long, default_value = "60")]
    fps: u32,

    /// Seed for a reproducible run
    #[arg(long)]
    seed: Option<u64>,

    /// Road network topology
    #[arg(long, value_enum, default_value_t = GraphMode::Grid)]
    mode: GraphMode,

    /// Grid side length or small-world node count
    #[arg(long, default_value = "5")]
    size: usize,

    /// Number of agents to spawn
    #[arg(long, default_value = "10")]
    agents: usize,

    /// Simulation speed multiplier
    #[arg(long, default_value = "1.0")]
    speed: f32,

    /// Close a road at a tick, as FROM-TO@TICK using node labels
    #[arg(long = "close-edge", value_name = "FROM-TO@TICK")]
    close_edges: Vec<String>,

    /// Reopen a road at a tick, as FROM-TO@TICK using node labels
    #[arg(long = "open-edge", value_name = "FROM-TO@TICK")]
    open_edges: Vec<String>,

    /// Log agent telemetry from an inspector thread
    #[arg(long)]
    inspect: bool,

    /// How often the inspector checks for new telemetry, in milliseconds
    #[arg(long, default_value = "250")]
    inspect_interval_ms: u64,

    /// Log a world summary every N ticks; 0 disables it
    #[arg(long, default_value = "0")]
    summary_every: u64,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        error!("{err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let edits = cli
        .close_edges
        .iter()
        .map(|text| ScheduledEdit::parse(text, false))
        .chain(cli.open_edges.iter().map(|text| ScheduledEdit::parse(text, true)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    info!(
        "Running traffic simulation: mode {:?}, size {}, {} agents, ticks {}, dt {}s",
        cli.mode, cli.size, cli.agents, cli.ticks, cli.delta
    );

    let shared = SharedHandle::new();
    shared.submit(Command::Generate {
        mode: cli.mode,
        size: cli.size,
    });
    shared.submit(Command::SpawnAgents { count: cli.agents });

    let sim_config = SimConfig {
        seed: cli.seed,
        speed: cli.speed,
    };
    let loop_config = LoopConfig {
        frame_delta: cli.delta,
        frame_rate: cli.fps,
        max_ticks: (cli.ticks > 0).then_some(cli.ticks),
        summary_every: cli.summary_every,
    };

    let clock = SimulationClock::new(shared.clone(), &sim_config);
    let simulation = spawn_clock(clock, loop_config)?;

    let mut inspectors = Vec::new();
    if cli.inspect {
        inspectors.extend(inspector::spawn_agent_inspector(
            &shared,
            Duration::from_millis(cli.inspect_interval_ms),
        )?);
    }
    if !edits.is_empty() {
        inspectors.extend(inspector::spawn_edge_editor(&shared, edits, Duration::from_millis(5))?);
    }

    let result = simulation
        .join()
        .map_err(|_| anyhow!("Simulation thread panicked"))?;

    shared.shutdown();
    for handle in inspectors {
        if handle.join().is_err() {
            error!("An inspector thread panicked");
        }
    }

    let summary = result.context("Simulation loop failed")?;
    if summary.stats.faults > 0 {
        info!("Run finished with {} simulation faults", summary.stats.faults);
    }
    Ok(())
}
