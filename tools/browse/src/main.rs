//! Regional dictionary browser
//!
//! Command-line front end over the same repositories the mobile apps use.
//! Handy for checking what the API returns and how the caches behave.
//!
//! # Usage
//!
//! ```bash
//! # Everything, or one region's entries
//! dict-browse entries
//! dict-browse entries --region 43
//!
//! # Keyword search, printed as JSON
//! dict-browse --json search "river stone"
//!
//! # Connection diagnostics against a custom server
//! dict-browse --base-url https://dict.example.org/api ping
//! ```

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use regional_dict_core::{ClientConfig, DictionaryEntry, EntryRepository, Region, RegionRepository};

/// Regional dictionary browser - query the dictionary API from a terminal
#[derive(Parser, Debug)]
#[command(name = "dict-browse")]
#[command(author, version, about = "Browse regional dictionary entries and regions")]
#[command(long_about = "
Queries the regional dictionary API through the cached repositories.

Settings come from DICT_* environment variables (a .env file is read if
present); --base-url and --timeout override them.

Example usage:
  dict-browse regions
  dict-browse entries --region 43
  dict-browse --json search chimarrao
")]
struct Args {
    /// API base address, e.g. https://dict.example.org/api
    #[arg(long)]
    base_url: Option<String>,

    /// HTTP timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Print results as JSON instead of text
    #[arg(long, default_value = "false")]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List entries, optionally limited to one region
    Entries {
        #[arg(short, long)]
        region: Option<String>,
    },
    /// Show one entry
    Entry { id: String },
    /// Search entries by keyword
    Search { keyword: String },
    /// List regions
    Regions,
    /// Show one region
    Region { id: String },
    /// Check that the API is reachable
    Ping,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = ClientConfig::from_env().context("Invalid DICT_* environment settings")?;
    if let Some(base_url) = args.base_url {
        config = config.with_base_url(base_url);
    }
    if let Some(secs) = args.timeout {
        config = config.with_timeout(Duration::from_secs(secs));
    }
    config.validate().context("Invalid --base-url")?;

    let handle = regional_dict_core::init(&config).context("Failed to create dictionary client")?;
    log::info!("Using API at {}", handle.gateway().base_url());

    match args.command {
        Command::Entries { region } => {
            let entries = match region {
                Some(region_id) => handle.entries.get_by_region(&region_id).await,
                None => handle.entries.get_all().await,
            }
            .context("Failed to load entries")?;
            print_entries(&entries, args.json)?;
        }
        Command::Entry { id } => {
            let entry = handle
                .entries
                .get_by_id(&id)
                .await
                .with_context(|| format!("Failed to load entry {id}"))?;
            match entry {
                Some(entry) if args.json => println!("{}", serde_json::to_string_pretty(&entry)?),
                Some(entry) => print_entry_detail(&entry),
                None => anyhow::bail!("No entry with id {id}"),
            }
        }
        Command::Search { keyword } => {
            let started = Instant::now();
            let results = handle
                .entries
                .search(&keyword)
                .await
                .context("Search failed")?;
            log::info!("Search for '{}' took {:?}", keyword, started.elapsed());

            if results.is_empty() && !args.json {
                println!("No entries match '{keyword}'");
            } else {
                print_entries(&results, args.json)?;
            }
        }
        Command::Regions => {
            let regions = handle
                .regions
                .get_all()
                .await
                .context("Failed to load regions")?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(regions.as_slice())?);
            } else {
                for region in regions.iter() {
                    println!("{:>6}  {}", region.id, region.name);
                }
                println!();
                println!("{} regions", regions.len());
            }
        }
        Command::Region { id } => {
            let region = handle
                .regions
                .get_by_id(&id)
                .await
                .with_context(|| format!("Failed to load region {id}"))?;
            match region {
                Some(region) if args.json => println!("{}", serde_json::to_string_pretty(&region)?),
                Some(region) => print_region_detail(&region),
                None => anyhow::bail!("No region with id {id}"),
            }
        }
        Command::Ping => {
            let report = handle.gateway().diagnose().await;
            println!("API:       {}", report.base_url);
            println!("Reachable: {}", if report.reachable { "yes" } else { "no" });
            println!("Latency:   {:?}", report.latency);
            if let Some(error) = report.error {
                println!("Error:     {error}");
                anyhow::bail!("API at {} is not reachable", report.base_url);
            }
        }
    }

    Ok(())
}

fn print_entries(entries: &[DictionaryEntry], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
        return Ok(());
    }

    for entry in entries {
        println!("{:>6}  {:<24} {}", entry.id, entry.word, entry.region_label());
    }
    println!();
    println!("{} entries", entries.len());
    Ok(())
}

fn print_entry_detail(entry: &DictionaryEntry) {
    println!("{}", entry.word);
    println!("  {}", entry.meaning);
    if let Some(example) = &entry.example {
        println!("  e.g. \"{example}\"");
    }
    println!("  Region: {} ({})", entry.region_label(), entry.region_id);
    if let Some(notes) = &entry.notes {
        println!("  Notes: {notes}");
    }
    if !entry.tags.is_empty() {
        let tags: Vec<&str> = entry.tags.iter().map(String::as_str).collect();
        println!("  Tags: {}", tags.join(", "));
    }
}

fn print_region_detail(region: &Region) {
    println!("{} ({})", region.name, region.id);
    if let Some(capital) = &region.capital {
        println!("  Capital: {capital}");
    }
    if let Some(description) = &region.description {
        println!("  {description}");
    }
}
