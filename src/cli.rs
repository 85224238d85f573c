use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};

use sampler::SamplingMode;

/// Log telemetry from the robot into a CSV file.
#[derive(Debug, Parser)]
#[command(name = "robot-data-collector", version, about = "Log data from the robot")]
pub struct Cli {
    /// File to write collected data to [default: <timestamp>_robot_data.csv]
    #[arg(short = 'o', long)]
    pub output_file: Option<PathBuf>,

    /// Document listing the entries to collect (.json or .toml)
    #[arg(short = 'i', long, default_value = "robot_nt_names.json")]
    pub input_file: PathBuf,

    #[arg(short = 'm', long, value_enum, default_value_t = Mode::Count)]
    pub mode: Mode,

    /// Number of samples to collect before exiting (count mode)
    #[arg(short = 'c', long, default_value_t = 1)]
    pub sample_count: usize,

    /// Window length for time mode
    #[arg(short = 'd', long, default_value_t = 10)]
    pub duration_secs: u64,

    /// Robot team number; the address is 10.TE.AM.2
    #[arg(short = 't', long, default_value_t = 1100)]
    pub robot_team: u32,

    /// Address of the robot, e.g. 10.11.21.2 or 127.0.0.1
    #[arg(short = 'a', long)]
    pub robot_ip: Option<String>,

    /// Insert heading labels in the CSV output file
    #[arg(short = 'l', long)]
    pub use_labels: bool,

    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Run against the built-in simulated robot
    #[arg(long)]
    pub simulate: bool,

    /// Clear the run flag of a collector sampling in command mode, then exit
    #[arg(long)]
    pub stop: bool,

    /// Where graphs are written [default: next to the output file]
    #[arg(long)]
    pub chart_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Count,
    Command,
    Sweep,
    Time,
}

impl Cli {
    pub fn address(&self) -> String {
        self.robot_ip
            .clone()
            .unwrap_or_else(|| team_address(self.robot_team))
    }

    pub fn sampling_mode(&self) -> SamplingMode {
        match self.mode {
            Mode::Count => SamplingMode::Count(self.sample_count),
            Mode::Command => SamplingMode::Command,
            Mode::Sweep => SamplingMode::CommandSweep,
            Mode::Time => SamplingMode::TimeWindowed(Duration::from_secs(self.duration_secs)),
        }
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_file.clone().unwrap_or_else(|| {
            let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");
            PathBuf::from(format!("{}_robot_data.csv", stamp))
        })
    }

    pub fn chart_dir_for(&self, output: &Path) -> PathBuf {
        match &self.chart_dir {
            Some(dir) => dir.clone(),
            None => output
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}

/// `1100` -> `10.11.0.2`, `254` -> `10.2.54.2`.
pub fn team_address(team: u32) -> String {
    format!("10.{}.{}.2", team / 100, team % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_collector_scripts() {
        let cli = Cli::parse_from(["robot-data-collector"]);
        assert_eq!(cli.input_file, PathBuf::from("robot_nt_names.json"));
        assert_eq!(cli.address(), "10.11.0.2");
        assert_eq!(cli.sampling_mode(), SamplingMode::Count(1));
        assert!(!cli.use_labels);

        let output = cli.output_path();
        let name = output.to_str().unwrap();
        assert!(name.ends_with("_robot_data.csv"));
        assert_eq!(name.len(), "20240101120000_robot_data.csv".len());
        assert_eq!(cli.chart_dir_for(&output), PathBuf::from("."));
    }

    #[test]
    fn explicit_ip_wins_over_team() {
        let cli = Cli::parse_from(["robot-data-collector", "-t", "254", "-a", "127.0.0.1"]);
        assert_eq!(cli.address(), "127.0.0.1");
        assert_eq!(team_address(254), "10.2.54.2");
    }

    #[test]
    fn sweep_mode_with_labels() {
        let cli = Cli::parse_from([
            "robot-data-collector",
            "-m",
            "sweep",
            "-l",
            "-o",
            "runs/stopping.csv",
            "--simulate",
        ]);
        assert_eq!(cli.sampling_mode(), SamplingMode::CommandSweep);
        assert!(cli.use_labels && cli.simulate);
        assert_eq!(cli.chart_dir_for(&cli.output_path()), PathBuf::from("runs"));
    }

    #[test]
    fn stop_flag_needs_no_mode() {
        let cli = Cli::parse_from(["robot-data-collector", "--stop", "-a", "127.0.0.1"]);
        assert!(cli.stop);
        assert_eq!(cli.address(), "127.0.0.1");
        assert!(!Cli::parse_from(["robot-data-collector"]).stop);
    }

    #[test]
    fn time_mode_carries_duration() {
        let cli = Cli::parse_from(["robot-data-collector", "--mode", "time", "-d", "4"]);
        assert_eq!(
            cli.sampling_mode(),
            SamplingMode::TimeWindowed(Duration::from_secs(4))
        );
    }
}
