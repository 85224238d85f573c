use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use eframe::egui;
use egui_plot::{Legend, Line, Plot, PlotPoints};
use log::{error, info, warn};

use common::chart::prepare_chart;
use common::config::load_config;
use common::port::wait_for_connection;
use common::{
    CollectionDiagnostics, CollectorConfig, DashboardBuffer, MemorySink, MemoryStore, SampleTable,
};
use sampler::{request_stop, EngineState, RunOptions, SamplingEngine, SamplingMode};

const BUFFER_SIZE: usize = 1000;
const DEFAULT_COUNT: usize = 100;
const DEFAULT_WINDOW: Duration = Duration::from_secs(10);
const COLORS: [egui::Color32; 4] = [
    egui::Color32::from_rgb(52, 152, 219),
    egui::Color32::from_rgb(46, 204, 113),
    egui::Color32::from_rgb(231, 76, 60),
    egui::Color32::from_rgb(155, 89, 182),
];

struct DashboardApp {
    config: Arc<CollectorConfig>,
    mode: SamplingMode,
    dashboard_buffer: DashboardBuffer,
    diagnostics: Arc<CollectionDiagnostics>,
    shutdown: Arc<AtomicBool>,
    store: MemoryStore,
    worker: Option<JoinHandle<()>>,
    start_time: Option<Instant>,
}

impl DashboardApp {
    fn new(config: CollectorConfig, mode: SamplingMode) -> Self {
        Self {
            config: Arc::new(config),
            mode,
            dashboard_buffer: DashboardBuffer::new(BUFFER_SIZE),
            diagnostics: Arc::new(CollectionDiagnostics::default()),
            shutdown: Arc::new(AtomicBool::new(false)),
            store: MemoryStore::connect("127.0.0.1"),
            worker: None,
            start_time: None,
        }
    }

    fn is_running(&self) -> bool {
        self.worker.as_ref().map_or(false, |w| !w.is_finished())
    }

    fn start_collection(&mut self) {
        self.dashboard_buffer.clear();
        self.diagnostics = Arc::new(CollectionDiagnostics::default());
        self.shutdown = Arc::new(AtomicBool::new(false));
        self.store = MemoryStore::connect("127.0.0.1");
        self.start_time = Some(Instant::now());

        let config = Arc::clone(&self.config);
        let buffer = self.dashboard_buffer.clone();
        let diagnostics = Arc::clone(&self.diagnostics);
        let shutdown = Arc::clone(&self.shutdown);
        let store = self.store.clone();
        let mode = self.mode;

        self.worker = Some(std::thread::spawn(move || {
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    error!("Cannot start runtime: {}", e);
                    return;
                }
            };
            let robot = rt.spawn(sim_robot::run_robot(
                store.clone(),
                Arc::clone(&config),
                Arc::clone(&shutdown),
            ));

            if wait_for_connection(&store).is_ok() {
                let result = SamplingEngine::new(&config, store, MemorySink::new())
                    .with_shutdown(Arc::clone(&shutdown))
                    .with_diagnostics(diagnostics)
                    .with_dashboard(buffer)
                    .run(RunOptions {
                        mode,
                        write_header: false,
                    });
                match result {
                    Ok(run) => info!("Collection stopped: {:?}", run.stop_reason),
                    Err(e) => error!("Collection failed: {}", e),
                }
            }

            shutdown.store(true, Ordering::Relaxed);
            if let Err(e) = rt.block_on(robot) {
                warn!("Simulated robot task failed: {}", e);
            }
        }));
    }

    /// A command-mode run is stopped the way the robot side expects, by
    /// clearing its run flag. Anything else is interrupted.
    fn stop_collection(&mut self) {
        let status = self.dashboard_buffer.status();
        let in_trials = status == EngineState::CommandTriggered.to_string()
            || status == EngineState::CommandSweep.to_string();
        if in_trials {
            request_stop(&self.store, &self.config.controls);
        } else {
            self.shutdown.store(true, Ordering::Relaxed);
        }
    }

    fn table(&self) -> SampleTable {
        let mut table = SampleTable::new(self.config.field_names());
        for item in self.dashboard_buffer.get_all() {
            table.append(&item.sample);
        }
        table
    }

    fn graph_panels(&self, ui: &mut egui::Ui, table: &SampleTable) {
        if self.config.graphs.is_empty() {
            // one line per numeric field against sample number
            let names = table.field_names().to_vec();
            Plot::new("fields_plot")
                .height(300.0)
                .legend(Legend::default())
                .show(ui, |plot_ui| {
                    for (i, name) in names.iter().enumerate() {
                        let Some(column) = table.column(name) else { continue };
                        let points: Vec<[f64; 2]> = column
                            .iter()
                            .enumerate()
                            .filter_map(|(row, v)| v.as_f64().map(|y| [row as f64, y]))
                            .collect();
                        plot_ui.line(
                            Line::new(PlotPoints::new(points))
                                .color(COLORS[i % COLORS.len()])
                                .name(name),
                        );
                    }
                });
            return;
        }

        for (index, spec) in self.config.graphs.iter().enumerate() {
            egui::Frame::group(ui.style())
                .inner_margin(10.0)
                .show(ui, |ui| match prepare_chart(spec, table) {
                    Ok(chart) => {
                        ui.strong(&chart.title);
                        Plot::new(format!("graph_{}", index))
                            .height(250.0)
                            .x_axis_label(chart.xlabel.clone())
                            .y_axis_label(chart.ylabel.clone())
                            .legend(Legend::default())
                            .show(ui, |plot_ui| {
                                for (i, (label, ys)) in chart.series.iter().enumerate() {
                                    let points: Vec<[f64; 2]> = chart
                                        .x
                                        .iter()
                                        .zip(ys)
                                        .filter(|(_, y)| y.is_finite())
                                        .map(|(x, y)| [*x, *y])
                                        .collect();
                                    plot_ui.line(
                                        Line::new(PlotPoints::new(points))
                                            .color(COLORS[i % COLORS.len()])
                                            .name(label),
                                    );
                                }
                            });
                    }
                    Err(e) => {
                        ui.label(format!("Graph #{}: {}", index, e));
                    }
                });
            ui.add_space(10.0);
        }
    }
}

impl eframe::App for DashboardApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint();
        let running = self.is_running();
        let table = self.table();

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::vertical()
                .auto_shrink([false; 2])
                .show(ui, |ui| {
                    ui.heading("Robot Data Collection");
                    ui.add_space(10.0);

                    // Control Panel
                    egui::Frame::group(ui.style())
                        .inner_margin(10.0)
                        .show(ui, |ui| {
                            ui.horizontal(|ui| {
                                if ui
                                    .add_enabled(!running, egui::Button::new("▶ Start"))
                                    .clicked()
                                {
                                    self.start_collection();
                                }
                                if ui
                                    .add_enabled(running, egui::Button::new("⏹ Stop"))
                                    .clicked()
                                {
                                    self.stop_collection();
                                }
                                if ui.button("🗑 Clear Data").clicked() {
                                    self.dashboard_buffer.clear();
                                }

                                ui.separator();
                                let status = self.dashboard_buffer.status();
                                let color = if running {
                                    egui::Color32::GREEN
                                } else {
                                    egui::Color32::GRAY
                                };
                                ui.label(egui::RichText::new(status).color(color));
                                if let Some(start) = self.start_time {
                                    ui.label(format!("⏱ {}s", start.elapsed().as_secs()));
                                }
                            });
                        });

                    ui.add_space(10.0);
                    ui.label(format!(
                        "Mode: {:?}    {}",
                        self.mode,
                        self.diagnostics.summary()
                    ));
                    ui.add_space(10.0);

                    // Recent samples
                    egui::Frame::group(ui.style())
                        .inner_margin(10.0)
                        .show(ui, |ui| {
                            ui.strong("Recent Samples");
                            ui.separator();
                            let names = table.field_names();
                            egui::Grid::new("samples_grid")
                                .num_columns(names.len() + 1)
                                .striped(true)
                                .show(ui, |ui| {
                                    ui.strong("#");
                                    for name in names {
                                        ui.strong(name);
                                    }
                                    ui.end_row();
                                    for item in self.dashboard_buffer.get_recent(15).iter().rev() {
                                        ui.label(item.sample.index.to_string());
                                        for name in names {
                                            let text = item
                                                .value(name)
                                                .map(|v| match v.as_f64() {
                                                    Some(x) => format!("{:.3}", x),
                                                    None => String::new(),
                                                })
                                                .unwrap_or_default();
                                            ui.label(text);
                                        }
                                        ui.end_row();
                                    }
                                });
                        });

                    ui.add_space(10.0);
                    ui.separator();
                    self.graph_panels(ui, &table);
                });
        });
    }
}

/// `count`, a bare sample count, `command`, `sweep` or `time`.
fn parse_mode(mode: &str) -> Result<SamplingMode, String> {
    match mode {
        "count" => Ok(SamplingMode::Count(DEFAULT_COUNT)),
        "command" => Ok(SamplingMode::Command),
        "sweep" => Ok(SamplingMode::CommandSweep),
        "time" => Ok(SamplingMode::TimeWindowed(DEFAULT_WINDOW)),
        other => other.parse().map(SamplingMode::Count).map_err(|_| {
            format!(
                "unknown mode `{}` (expected count, a sample count, command, sweep or time)",
                other
            )
        }),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let config_path = args
        .get(1)
        .cloned()
        .unwrap_or_else(|| "configs/stopping_distance.json".to_string());
    let mode = parse_mode(args.get(2).map(String::as_str).unwrap_or("sweep"))?;
    let config = load_config(&config_path)?;

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 900.0])
            .with_title("Robot Data Collection Dashboard"),
        ..Default::default()
    };

    eframe::run_native(
        "Robot Data Collection",
        options,
        Box::new(move |_cc| Box::new(DashboardApp::new(config, mode))),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_mode_name() {
        assert_eq!(parse_mode("count"), Ok(SamplingMode::Count(DEFAULT_COUNT)));
        assert_eq!(parse_mode("25"), Ok(SamplingMode::Count(25)));
        assert_eq!(parse_mode("command"), Ok(SamplingMode::Command));
        assert_eq!(parse_mode("sweep"), Ok(SamplingMode::CommandSweep));
        assert_eq!(
            parse_mode("time"),
            Ok(SamplingMode::TimeWindowed(DEFAULT_WINDOW))
        );
    }

    #[test]
    fn rejects_unknown_mode() {
        let err = parse_mode("sweeep").unwrap_err();
        assert!(err.contains("sweeep"));
        assert!(parse_mode("-3").is_err());
    }
}
