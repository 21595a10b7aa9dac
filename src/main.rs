//! PUF Chip Identification CLI
//!
//! Command-line interface over the identification library. Readings come
//! from the virtual chip population; signatures given on the command line
//! are hex encoded.

use clap::{Parser, Subcommand};
use puf_identify::{
    characterize,
    ecc::{BchCode, ErrorCorrector, HelperData, KeyDeriver},
    identify::{ChipIdentifier, Classification},
    metrics::{MetricsRegistry, MetricsSnapshot},
    session::{EccOutcome, Session},
    source::{FileConfig, VirtualChips},
    RandomnessReport, Signature,
};
use std::path::PathBuf;
use tracing::{info, warn};

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Debug, Parser)]
#[command(name = "puf-identify", version, about = "PUF chip identification and characterization")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Signature database, overriding the configuration.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Signature length in bits, overriding the configuration.
    #[arg(long, global = true)]
    bits: Option<usize>,

    /// Print Prometheus metrics after the command.
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Read a virtual chip and attribute the reading.
    Measure {
        /// Virtual chip to read (v001, v002, ...).
        #[arg(long, default_value = "v001")]
        chip: String,
        /// Name to enroll under if the reading is unknown.
        #[arg(long)]
        name: Option<String>,
        /// Number of readings.
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },
    /// Match a hex signature against the database.
    Identify {
        /// Hex-encoded signature.
        signature: String,
    },
    /// Enroll a hex signature under a name, replacing any existing record.
    Enroll {
        /// Chip name.
        name: String,
        /// Hex-encoded signature.
        signature: String,
    },
    /// Enroll the noise-free reference of every virtual chip.
    EnrollVirtual,
    /// Read every virtual chip repeatedly and update the database.
    Characterize {
        /// Readings per chip, overriding the configuration.
        #[arg(short, long)]
        reads: Option<usize>,
    },
    /// Print per-chip statistics and the aliasing estimate.
    Report,
    /// Score a hex signature with the randomness tests.
    Score {
        /// Hex-encoded signature.
        signature: String,
    },
    /// Compute helper data for a signature, or recover one with it.
    Ecc {
        /// Hex-encoded signature.
        signature: String,
        /// Hex-encoded helper data from a previous enrollment.
        #[arg(long)]
        helper: Option<String>,
    },
    /// Remove every chip from the database.
    Clear,
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    info!("PUF Identify v{}", puf_identify::VERSION);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<FileConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => FileConfig::from_file(path)?,
        None => FileConfig::default(),
    };
    if let Some(db) = &cli.db {
        config.identifier.path = db.clone();
    }
    if let Some(bits) = cli.bits {
        config.identifier.n_bits = bits;
        config.ecc.bch.k = bits;
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: Cli) -> CliResult {
    let config = load_config(&cli)?;
    let n_bits = config.identifier.n_bits;

    match &cli.command {
        Command::Measure { chip, name, count } => {
            let identifier = ChipIdentifier::open(config.identifier.clone())?;
            let mut chips = VirtualChips::new(n_bits, &config.simulator)?;
            chips.select(chip)?;

            let mut session = Session::new(chips, identifier)
                .with_match_scores(config.output.match_scores)
                .with_ecc(&config.ecc)?;
            for _ in 0..*count {
                let outcome = session.measure(name.as_deref())?;
                println!(
                    "{}{}  flips: {}",
                    outcome.name,
                    if outcome.is_new { " (new)" } else { "" },
                    outcome
                        .bit_flips
                        .map_or_else(|| "-".to_string(), |f| f.to_string())
                );
                for m in &outcome.matches {
                    println!("    {:<12} {:.5}", m.name, m.distance);
                }
                match &outcome.ecc {
                    Some(EccOutcome::Enrolled { key }) => {
                        println!("    ecc: enrolled, key {}", key.to_hex())
                    }
                    Some(EccOutcome::Recovered {
                        errors,
                        matches_reference,
                        key,
                    }) => println!(
                        "    ecc: corrected {} bits, reference {}, key {}",
                        errors,
                        if *matches_reference { "ok" } else { "MISMATCH" },
                        key.to_hex()
                    ),
                    Some(EccOutcome::Failed(e)) => println!("    ecc: {}", e),
                    None => {}
                }
            }
            let identifier = session.finish()?;
            print_metrics(&cli, &config, &identifier)?;
        }
        Command::Identify { signature } => {
            let identifier = ChipIdentifier::open(config.identifier.clone())?;
            let sig = Signature::from_hex(signature)?;
            match identifier.classify(&sig)? {
                Classification::Known(best) => {
                    println!("{} ({:.5})", best.name, best.distance)
                }
                Classification::Unknown(Some(best)) => {
                    println!("unknown, closest {} ({:.5})", best.name, best.distance)
                }
                Classification::Unknown(None) => println!("unknown, database is empty"),
            }
            for m in identifier.best_matches(&sig, config.output.match_scores)? {
                println!("    {:<12} {:.5}", m.name, m.distance);
            }
        }
        Command::Enroll { name, signature } => {
            let mut identifier = ChipIdentifier::open(config.identifier.clone())?;
            identifier.add(name, Signature::from_hex(signature)?)?;
            identifier.save()?;
            println!("enrolled {}", name);
        }
        Command::EnrollVirtual => {
            let mut identifier = ChipIdentifier::open(config.identifier.clone())?;
            let chips = VirtualChips::new(n_bits, &config.simulator)?;
            chips.enroll_references(&mut identifier)?;
            identifier.save()?;
            println!("enrolled {} virtual chips", chips.len());
        }
        Command::Characterize { reads } => {
            let mut identifier = ChipIdentifier::open(config.identifier.clone())?;
            let chips = VirtualChips::new(n_bits, &config.simulator)?;
            let reads = reads.unwrap_or(config.output.reads_per_chip);
            let summary = characterize(&chips, &mut identifier, reads)?;
            identifier.save()?;
            println!(
                "measured {} chips {} times each, mean noise {:.3} %",
                summary.chips,
                reads,
                100.0 * summary.mean_noise()
            );
            print_aliasing(&identifier);
            print_metrics(&cli, &config, &identifier)?;
        }
        Command::Report => {
            let identifier = ChipIdentifier::open(config.identifier.clone())?;
            println!(
                "{:<12} {:>6} {:>9} {:>10} {:>9}",
                "chip", "meas", "unstable", "noise", "inter"
            );
            for name in identifier.names() {
                let unstable = if identifier.unstable_bits_valid(&name) {
                    identifier.num_unstable_bits(&name).to_string()
                } else {
                    "-".to_string()
                };
                println!(
                    "{:<12} {:>6} {:>9} {:>10.2} {:>9.2}",
                    name,
                    identifier.meas_count(&name),
                    unstable,
                    identifier.noise_distance_average(&name),
                    identifier.inter_chip_distance_average(&name)
                );
            }
            print_aliasing(&identifier);
            print_metrics(&cli, &config, &identifier)?;
        }
        Command::Score { signature } => {
            let sig = Signature::from_hex(signature)?;
            print!("{}", RandomnessReport::run(&sig));
        }
        Command::Ecc { signature, helper } => {
            let sig = Signature::from_hex(signature)?;
            let code = BchCode::new(config.ecc.bch)?;
            let parity_bits = code.parity_bits();
            let mut corrector = ErrorCorrector::new(code);
            let deriver = KeyDeriver::new(config.ecc.key_algorithm);
            match helper {
                None => {
                    let helper = corrector.enroll(&sig)?;
                    println!("helper {}", helper.to_hex());
                    println!("key    {}", deriver.derive(&sig).to_hex());
                }
                Some(text) => {
                    let helper = HelperData::from_hex(text, parity_bits)?;
                    let recovery = corrector.decode(&sig, &helper)?;
                    println!("corrected {} bits", recovery.errors);
                    println!("signature {}", recovery.signature.to_hex());
                    println!("key       {}", deriver.derive(&recovery.signature).to_hex());
                }
            }
        }
        Command::Clear => {
            let mut identifier = ChipIdentifier::open(config.identifier.clone())?;
            let removed = identifier.len();
            identifier.clear()?;
            println!("removed {} chips", removed);
        }
    }
    Ok(())
}

fn print_aliasing(identifier: &ChipIdentifier) {
    if !identifier.aliasing_ready() {
        warn!(
            chips = identifier.len(),
            "Not enough measurements for an aliasing estimate"
        );
        return;
    }
    match identifier.probability_of_aliasing() {
        Ok(estimate) => println!(
            "noise threshold {:.1} bits, probability of aliasing {:e}",
            estimate.threshold, estimate.probability
        ),
        Err(e) => warn!(error = %e, "Aliasing estimate failed"),
    }
}

fn print_metrics(cli: &Cli, config: &FileConfig, identifier: &ChipIdentifier) -> CliResult {
    if !(cli.metrics || config.output.print_metrics) {
        return Ok(());
    }
    let registry = MetricsRegistry::new()?;
    registry.update(&MetricsSnapshot::from_identifier(identifier));
    print!("{}", registry.encode()?);
    Ok(())
}
