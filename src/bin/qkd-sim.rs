//! qkd-sim: run one QKD session and print the report as JSON.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use qkd_link::telemetry::{TelemetryConfig, init_tracing};
use qkd_link::{NoiseKind, ProtocolKind, QkdError, Session, SimulationConfig};

/// Simulate a BB84 or B92 run over a lossy, noisy fibre.
#[derive(Parser, Debug)]
#[command(name = "qkd-sim")]
#[command(about = "Point-to-point QKD link simulator")]
struct Args {
    /// Protocol to run (bb84, b92)
    #[arg(short, long)]
    protocol: Option<ProtocolKind>,

    /// Number of qubits to send
    #[arg(short = 'n', long)]
    qubits: Option<usize>,

    /// Seed for a reproducible run
    #[arg(short, long)]
    seed: Option<u64>,

    /// Fibre length in km
    #[arg(long)]
    length_km: Option<f64>,

    /// Loss probability per km
    #[arg(long)]
    loss_per_km: Option<f64>,

    /// Noise model (none, bit_flip, depolarizing, amplitude_damping, phase_damping)
    #[arg(long)]
    noise: Option<NoiseKind>,

    /// Noise strength in [0, 1]
    #[arg(long)]
    noise_strength: Option<f64>,

    /// Fraction of the sifted key disclosed for error estimation
    #[arg(long)]
    check_ratio: Option<f64>,

    /// JSON configuration file (flags override its values)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Print the event log as JSON lines before the report
    #[arg(long)]
    events: bool,
}

impl Args {
    fn into_config(self) -> Result<SimulationConfig, QkdError> {
        let mut config = match &self.config {
            Some(path) => SimulationConfig::from_json_file(path)?,
            None => SimulationConfig::from_env()?,
        };

        if let Some(protocol) = self.protocol {
            config.protocol = protocol;
        }
        if let Some(qubits) = self.qubits {
            config.num_qubits = qubits;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if let Some(length_km) = self.length_km {
            config.channel.length_km = length_km;
        }
        if let Some(loss_per_km) = self.loss_per_km {
            config.channel.loss_per_km = loss_per_km;
        }
        if let Some(noise) = self.noise {
            config.channel.noise_model = noise;
        }
        if let Some(strength) = self.noise_strength {
            config.channel.noise_strength = strength;
        }
        if let Some(check_ratio) = self.check_ratio {
            config.check_ratio = check_ratio;
        }

        config.validate()?;
        Ok(config)
    }
}

async fn run(args: Args) -> Result<(), QkdError> {
    let print_events = args.events;
    let config = args.into_config()?;
    let session = Session::new(config)?;

    let result = session.run().await;

    if print_events {
        for event in session.bus().history() {
            println!("{}", event.to_json());
        }
    }

    let report = result?;
    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Failed to serialize report: {e}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut telemetry = TelemetryConfig::from_env();
    telemetry.json_logs |= args.json_logs;
    if let Err(e) = init_tracing(&telemetry) {
        eprintln!("Warning: {e}");
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("qkd-sim: {e}");
            ExitCode::FAILURE
        }
    }
}
