use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};

use market_stats_etl::{db, meta, update};

#[derive(Parser)]
#[command(
    name = "market_stats_etl",
    about = "Tourism market statistics ETL: lodging and consumption survey tables"
)]
struct Cli {
    /// Directory holding the SQLite store and metadata sidecars
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Update the monthly lodging statistics table
    Lodging,
    /// Update the travel-consumption nights-stayed table
    Nights,
    /// Run both pipelines in sequence
    Run,
    /// Show store row counts and source provenance
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Lodging => {
            let outcome = update::lodging::run(&cli.data_dir).await?;
            outcome.report("lodging");
            Ok(())
        }
        Commands::Nights => {
            let outcome = update::nights::run(&cli.data_dir).await?;
            outcome.report("nights");
            Ok(())
        }
        Commands::Run => {
            // The pipelines are independent but both must complete (or
            // no-op) before the scheduler's publish step; the first
            // error aborts with a non-zero exit.
            let lodging = update::lodging::run(&cli.data_dir).await?;
            lodging.report("lodging");
            let nights = update::nights::run(&cli.data_dir).await?;
            nights.report("nights");
            Ok(())
        }
        Commands::Stats => {
            let conn = db::open(&cli.data_dir.join(update::DB_FILE))?;
            let s = db::get_stats(&conn)?;
            println!("Lodging rows:   {} ({} months)", s.lodging_rows, s.lodging_months);
            println!("Nights rows:    {} ({} periods)", s.nights_rows, s.nights_periods);

            print_provenance("lodging", &cli.data_dir.join(meta::LODGING_META_FILE))?;
            print_provenance("nights", &cli.data_dir.join(meta::NIGHTS_META_FILE))?;
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {:.1}s", elapsed.as_secs_f64());
    }

    result
}

fn print_provenance(pipeline: &str, path: &std::path::Path) -> anyhow::Result<()> {
    match meta::load(path)? {
        Some(m) => {
            println!("\n--- {pipeline} ---");
            println!("  fetched_at: {}", m.fetched_at);
            println!(
                "  keys:       {}..{}",
                m.min_key.as_deref().unwrap_or("-"),
                m.max_key.as_deref().unwrap_or("-")
            );
            if let Some(sha) = &m.source_sha256 {
                println!("  sha256:     {sha}");
            }
            if !m.processed_files.is_empty() {
                println!("  files:      {}", m.processed_files.len());
            }
        }
        None => println!("\n--- {pipeline} ---\n  no runs recorded"),
    }
    Ok(())
}
