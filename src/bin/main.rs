use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};

use relay_consensus::{RoundOutcome, SystemTime, TimeSource};
use relay_crypto::{merkle, Hash256};
use witnet_relay::replay::{self, ReplayError, ReplayStep, StepResult};
use witnet_relay::settings;

#[derive(Parser)]
#[command(name = "witnet-relay")]
#[command(about = "Witnet block relay tools", long_about = None)]
struct Cli {
    /// Relay configuration file (toml, yaml or json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the source chain epoch for a unix timestamp (default: now)
    Epoch {
        #[arg(long)]
        at: Option<u64>,
    },

    /// Replay a JSON list of ballots and print the resulting finalized chain
    Replay {
        #[arg(long)]
        script: PathBuf,

        /// Override the active set size, which defaults to the number of named voters
        #[arg(long)]
        active_set: Option<u64>,
    },

    /// Check a Merkle inclusion proof against a root
    Verify {
        #[arg(long)]
        root: Hash256,

        #[arg(long)]
        index: u64,

        #[arg(long)]
        leaf: Hash256,

        /// Comma separated sibling hashes, leaf level first
        #[arg(long, value_delimiter = ',')]
        proof: Vec<Hash256>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = settings::load(cli.config.as_deref()).context("loading relay configuration")?;

    match cli.command {
        Commands::Epoch { at } => {
            let clock = config.epoch_clock()?;
            let now = at.unwrap_or_else(|| SystemTime.now());
            let epoch = clock.epoch_at(now);
            let range = clock.time_range(epoch);
            println!("epoch {} [{}, {})", epoch, range.start, range.end);
        }
        Commands::Replay { script, active_set } => {
            let raw = fs::read_to_string(&script)
                .with_context(|| format!("reading replay script {}", script.display()))?;
            let steps: Vec<ReplayStep> = serde_json::from_str(&raw).context("parsing replay script")?;
            info!("Replaying {} ballots from {}", steps.len(), script.display());

            let report = match replay::run(config, &steps, active_set) {
                Ok(report) => report,
                Err(ReplayError::Fatal { index, source }) => {
                    error!("Replay aborted at step {}: {}", index, source);
                    bail!("invariant violated at step {}: {}", index, source);
                }
                Err(err) => return Err(err.into()),
            };

            for (index, result) in report.steps.iter().enumerate() {
                match result {
                    StepResult::Accepted(vote_id) => println!("step {:>3}: vote {}", index, vote_id),
                    StepResult::Rejected(reason) => println!("step {:>3}: rejected ({})", index, reason),
                }
            }
            if let Some(RoundOutcome::Skipped { votes, active_set_size, .. }) = &report.final_round {
                println!("last round closed without quorum ({}/{})", votes, active_set_size);
            }
            for (epoch, block_hash) in &report.finalized_epochs {
                println!("finalized epoch {:>6}: {}", epoch, block_hash);
            }
            match report.beacon {
                Some(beacon) => println!("beacon 0x{}", hex::encode(beacon.to_bytes())),
                None => println!("no block finalized"),
            }
        }
        Commands::Verify { root, index, leaf, proof } => {
            if !merkle::verify(&proof, &root, index, &leaf) {
                bail!("leaf {} at index {} does not prove against root {}", leaf, index, root);
            }
            println!("Proof valid: true");
        }
    }

    Ok(())
}
