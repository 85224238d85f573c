mod cli;

use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use log::{debug, error, info, warn, LevelFilter};

use common::chart::{render_graphs, SvgChartSink};
use common::port::wait_for_connection;
use common::{load_config, CollectionDiagnostics, CsvSink, MemoryStore};
use sampler::{request_stop, RunOptions, SamplingEngine};

use cli::Cli;

/// How long `--stop` stays connected so the cleared flag reaches the robot.
const STOP_LINGER: Duration = Duration::from_secs(1);

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match load_config(&cli.input_file) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Cannot use {}: {}", cli.input_file.display(), e);
            return Err(e.into());
        }
    };
    debug!("Loaded config: {:#?}", config);

    let output = cli.output_path();
    let store = MemoryStore::connect(cli.address());
    let shutdown = Arc::new(AtomicBool::new(false));
    let runtime = tokio::runtime::Runtime::new()?;

    let robot = if cli.simulate {
        info!("Starting simulated robot at {}", store.address());
        Some(runtime.spawn(sim_robot::run_robot(
            store.clone(),
            Arc::clone(&config),
            Arc::clone(&shutdown),
        )))
    } else {
        warn!(
            "No remote transport for {}; the collector waits until a device connects \
             to the in-memory store (use --simulate)",
            store.address()
        );
        None
    };

    wait_for_connection(&store)?;

    if cli.stop {
        request_stop(&store, &config.controls);
        thread::sleep(STOP_LINGER);
        shutdown.store(true, Ordering::Relaxed);
        join_robot(&runtime, robot);
        return Ok(());
    }

    {
        let shutdown = Arc::clone(&shutdown);
        runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; finishing the current run");
                shutdown.store(true, Ordering::Relaxed);
            }
        });
    }

    let diagnostics = Arc::new(CollectionDiagnostics::default());
    let sink = CsvSink::create(&output, config.field_names())?;
    info!("Writing samples to {}", output.display());

    let run = SamplingEngine::new(&config, store.clone(), sink)
        .with_shutdown(Arc::clone(&shutdown))
        .with_diagnostics(Arc::clone(&diagnostics))
        .run(RunOptions {
            mode: cli.sampling_mode(),
            write_header: cli.use_labels,
        })?;

    shutdown.store(true, Ordering::Relaxed);
    join_robot(&runtime, robot);

    if !config.graphs.is_empty() {
        let stem = output
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("robot_data")
            .to_string();
        let mut charts = SvgChartSink::new(cli.chart_dir_for(&output), stem);
        let report = render_graphs(&config.graphs, &run.table, &mut charts, Some(&diagnostics));
        info!(
            "Rendered {} of {} graphs",
            report.rendered.len(),
            config.graphs.len()
        );
    }

    info!("Stopped: {:?}; {}", run.stop_reason, diagnostics.summary());
    match run.sink_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn join_robot(runtime: &tokio::runtime::Runtime, robot: Option<tokio::task::JoinHandle<()>>) {
    if let Some(robot) = robot {
        if let Err(e) = runtime.block_on(robot) {
            warn!("Simulated robot task failed: {}", e);
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}
