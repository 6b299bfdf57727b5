//! CLI for lensrate — detectable rates of lensed and unlensed gravitational-wave events.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "lensrate")]
#[command(about = "lensrate — detectable rates of lensed and unlensed gravitational-wave events")]
#[command(version = lensrate_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a detection criterion to a stored JSON batch and print its rates.
    /// Both the step-function and the pdet-weighted rate are reported.
    Rate {
        /// JSON batch written by lensrate (field name -> array)
        #[arg(long)]
        input: String,

        /// Threshold requirement THRESHOLD[:IMAGES], repeatable (e.g. --threshold 8:2)
        #[arg(long = "threshold", value_parser = commands::parse_requirement, default_value = "8")]
        thresholds: Vec<(f64, usize)>,

        /// Normalization constant C0 (intrinsic events per year)
        #[arg(long)]
        c0: f64,

        /// Signal field holding per-system or per-image SNRs
        #[arg(long, default_value = "opt_snr_net")]
        field: String,

        /// Image columns taking part in selection
        #[arg(long, default_value = "any", value_parser = ["any", "type_i", "type_ii"])]
        images: String,

        /// Per-system importance weight field (lensed samples)
        #[arg(long)]
        weights: Option<String>,

        /// Write the detectable sub-batch as JSON
        #[arg(long)]
        output: Option<String>,

        /// Replace NaN by zero in the detectable sub-batch
        #[arg(long)]
        zero_missing: bool,
    },

    /// Check the quota rejection sampler against a triangular target density.
    /// Runs a Kolmogorov-Smirnov test and prints per-round acceptance.
    Selftest {
        /// Accepted samples to draw
        #[arg(long, default_value = "10000")]
        samples: usize,

        /// RNG seed (random when omitted)
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Rate {
            input,
            thresholds,
            c0,
            field,
            images,
            weights,
            output,
            zero_missing,
        } => commands::rate::run(commands::rate::RateCommandConfig {
            input_path: &input,
            requirements: &thresholds,
            c0,
            field: &field,
            window: commands::parse_window(&images),
            weights_field: weights.as_deref(),
            output_path: output.as_deref(),
            zero_missing,
        }),
        Commands::Selftest { samples, seed } => commands::selftest::run(samples, seed),
    }
}
