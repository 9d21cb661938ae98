//! Trial orchestration: configuration, output sinks, and the loop that
//! runs `numRuns` independent seeded trials.

pub mod config;
pub mod io;

pub use config::{ConfigError, Protocol, RunConfig};
pub use io::{ConsoleSink, FileSink, NullSink, OutputSink};

use latticebft_core::ConsensusProcess;
use latticebft_hotstuff::{HotStuffConfig, HotStuffState};
use latticebft_ibft::{IbftConfig, IbftState};
use latticebft_simulation::{trial_seed, RunnerConfig, SimulationError, SimulationRunner};
use latticebft_types::ValidatorId;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Any fatal error at the simulator boundary.
#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Simulation(#[from] SimulationError),

    #[error("cannot create output file: {0}")]
    Output(#[from] std::io::Error),
}

/// Run every configured trial. Trace lines go to a per-trial file under
/// `output_dir` when given, to the console otherwise; `quiet` suppresses
/// them entirely.
pub fn run(
    config: &RunConfig,
    output_dir: Option<&Path>,
    quiet: bool,
) -> Result<(), SimulatorError> {
    let (topology, protocol) = config.validate()?;
    let runner_config = RunnerConfig {
        num_validators: config.num_nodes as usize,
        num_consensus: config.num_consensus,
        node_processing_rate: config.node_processing_rate,
        switch_processing_rate: config.switch_processing_rate,
        topology,
        topology_params: config.network_parameters.clone(),
        wall_clock_budget: config.wall_clock_budget_secs.map(Duration::from_secs_f64),
    };

    for trial in 0..config.num_runs {
        let seed = trial_seed(config.starting_seed, config.seed_multiplier, trial);
        let mut sink = make_sink(output_dir, trial, quiet)?;
        info!(trial, seed, ?protocol, "starting trial");

        let num_validators = runner_config.num_validators;
        let base_time_limit = config.base_time_limit;
        match protocol {
            Protocol::Ibft => run_trial(
                &runner_config,
                seed,
                |id: ValidatorId| {
                    IbftState::new(
                        id,
                        IbftConfig {
                            num_validators,
                            base_time_limit,
                        },
                    )
                },
                sink.as_mut(),
            )?,
            Protocol::HotStuff => run_trial(
                &runner_config,
                seed,
                |id: ValidatorId| {
                    HotStuffState::new(
                        id,
                        HotStuffConfig {
                            num_validators,
                            base_time_limit,
                        },
                    )
                },
                sink.as_mut(),
            )?,
        }
    }
    Ok(())
}

fn run_trial<P: ConsensusProcess>(
    config: &RunnerConfig,
    seed: u64,
    make_machine: impl FnMut(ValidatorId) -> P,
    sink: &mut dyn OutputSink,
) -> Result<(), SimulatorError> {
    let mut runner = SimulationRunner::new(config, seed, make_machine)?;
    runner.run(|line| sink.line(line))?;

    sink.line("");
    sink.line("Snapshot:");
    for line in runner.snapshot().lines() {
        sink.line(line);
    }

    let summary = runner.summary();
    info!(
        events = summary.events_processed,
        messages = summary.messages_routed,
        timers = summary.timers_fired,
        final_time = %runner.now(),
        "trial complete"
    );
    Ok(())
}

fn make_sink(
    output_dir: Option<&Path>,
    trial: u32,
    quiet: bool,
) -> Result<Box<dyn OutputSink>, SimulatorError> {
    if quiet {
        return Ok(Box::new(NullSink));
    }
    match output_dir {
        Some(dir) => {
            let path = dir.join(format!("output{trial}.txt"));
            Ok(Box::new(FileSink::create(&path)?))
        }
        None => Ok(Box::new(ConsoleSink)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_run_from_json_config() {
        let config = RunConfig::from_json(
            r#"{
                "numRuns": 2,
                "numConsensus": 1,
                "startingSeed": 0,
                "seedMultiplier": 100,
                "numNodes": 4,
                "nodeProcessingRate": -1,
                "switchProcessingRate": -1,
                "baseTimeLimit": 10000.0,
                "networkType": "Clique"
            }"#,
        )
        .expect("config parses");
        run(&config, None, true).expect("both trials complete");
    }

    #[test]
    fn bad_topology_parameters_are_fatal() {
        let config = RunConfig::from_json(
            r#"{
                "numRuns": 1,
                "numConsensus": 1,
                "startingSeed": 0,
                "seedMultiplier": 100,
                "numNodes": 10,
                "nodeProcessingRate": -1,
                "switchProcessingRate": -1,
                "baseTimeLimit": 10000.0,
                "networkType": "Mesh",
                "networkParameters": [4]
            }"#,
        )
        .expect("config parses");
        let error = run(&config, None, true).expect_err("4 does not divide 10");
        assert!(matches!(error, SimulatorError::Simulation(_)));
    }
}
