//! taxii-client - TAXII 1.0/1.1 command line client
//!
//! Reads connection settings from a TOML file and runs one operation against the
//! configured server:
//!
//! - `discover`: list the services the server offers
//! - `collections`: list collections (1.1) or feeds (1.0)
//! - `poll`: fetch content blocks from a collection or feed
//!
//! # Quick Start
//!
//! ```bash
//! cat > taxii.toml <<EOF
//! [connection]
//! discovery_url = "http://hailataxii.com/taxii-discovery-service"
//! username = "guest"
//! password = "guest"
//! EOF
//!
//! taxii-client discover
//! taxii-client poll --collection guest.Abuse_ch --hours 6
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use taxii_client::configs::AppConfig;
use taxii_client::connection::TaxiiConnection;
use taxii_client::envelope::TaxiiVersion;
use taxii_client::messages::{ContentBlock, ServiceInstance, ServiceType};
use taxii_client::taxii10_template::Taxii10Template;
use taxii_client::taxii11_template::Taxii11Template;
use taxii_client::template::poll_window;
use tracing::info;

#[derive(Parser)]
#[command(name = "taxii-client")]
#[command(about = "Blocking TAXII 1.0/1.1 client")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "taxii.toml", env = "TAXII_CONFIG")]
    config: String,

    /// TAXII version (overrides config file)
    #[arg(long = "taxii-version")]
    taxii_version: Option<TaxiiVersion>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the services offered by the server
    Discover,
    /// List collections (1.1) or feeds (1.0)
    Collections,
    /// Poll a collection or feed
    Poll {
        /// Collection or feed name (overrides config file)
        #[arg(long)]
        collection: Option<String>,

        /// Subscription ID (overrides config file)
        #[arg(long)]
        subscription_id: Option<String>,

        /// Length of the poll window in hours (overrides config file)
        #[arg(long)]
        hours: Option<i64>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("taxii_client=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config))?;
    if let Some(version) = cli.taxii_version {
        config.version = version;
    }

    info!("TAXII version: {}", config.version);
    info!("Discovery URL: {}", config.connection.discovery_url);

    let connection = Arc::new(
        TaxiiConnection::new(config.connection.clone()).context("Failed to set up connection")?,
    );

    let command = match cli.command {
        Command::Discover => Operation::Discover,
        Command::Collections => Operation::Collections,
        Command::Poll {
            collection,
            subscription_id,
            hours,
        } => Operation::Poll {
            name: collection.unwrap_or_else(|| config.poll.collection.clone()),
            subscription_id: subscription_id.or_else(|| config.poll.subscription_id.clone()),
            hours: hours.unwrap_or(config.poll.window_hours),
        },
    };

    match config.version {
        TaxiiVersion::V11 => run_taxii11(&Taxii11Template::new(connection), command),
        TaxiiVersion::V10 => run_taxii10(&Taxii10Template::new(connection), command),
    }
}

enum Operation {
    Discover,
    Collections,
    Poll {
        name: String,
        subscription_id: Option<String>,
        hours: i64,
    },
}

fn run_taxii11(taxii: &Taxii11Template, operation: Operation) -> Result<()> {
    let discovery = taxii
        .discover()?
        .ok_or_else(|| anyhow!("Discovery request was refused"))?;

    if let Operation::Discover = operation {
        print_services(&discovery.service_instances);
        return Ok(());
    }

    let management = taxii
        .find_service(&discovery.service_instances, ServiceType::CollectionManagement)
        .ok_or_else(|| anyhow!("Server offers no collection management service"))?;
    let information = taxii
        .collection_information(management)?
        .ok_or_else(|| anyhow!("Collection information request was refused"))?;

    match operation {
        Operation::Discover => {}
        Operation::Collections => {
            println!("\n=== Collections ===");
            for collection in &information.collections {
                println!(
                    "{} ({}) - {} polling service(s)",
                    collection.collection_name,
                    collection.collection_type.as_deref().unwrap_or("DATA_FEED"),
                    collection.polling_services.len()
                );
            }
        }
        Operation::Poll {
            name,
            subscription_id,
            hours,
        } => {
            let collection = taxii
                .find_collection(&information.collections, &name)
                .ok_or_else(|| anyhow!("Collection {} not found", name))?;
            let (begin, end) = poll_window(hours);
            match taxii.poll_with(collection, subscription_id.as_deref(), Some(begin), Some(end))? {
                Some(poll) => print_content_blocks(&poll.content_blocks),
                None => println!("✗ Poll of {} returned no content", name),
            }
        }
    }

    Ok(())
}

fn run_taxii10(taxii: &Taxii10Template, operation: Operation) -> Result<()> {
    let discovery = taxii
        .discover()?
        .ok_or_else(|| anyhow!("Discovery request was refused"))?;

    if let Operation::Discover = operation {
        print_services(&discovery.service_instances);
        return Ok(());
    }

    let management = taxii
        .find_service(&discovery.service_instances, ServiceType::FeedManagement)
        .ok_or_else(|| anyhow!("Server offers no feed management service"))?;
    let information = taxii
        .feed_information(management)?
        .ok_or_else(|| anyhow!("Feed information request was refused"))?;

    match operation {
        Operation::Discover => {}
        Operation::Collections => {
            println!("\n=== Feeds ===");
            for feed in &information.feeds {
                println!(
                    "{} - {} polling service(s)",
                    feed.feed_name,
                    feed.polling_services.len()
                );
            }
        }
        Operation::Poll {
            name,
            subscription_id,
            hours,
        } => {
            let feed = taxii
                .find_feed(&information.feeds, &name)
                .ok_or_else(|| anyhow!("Feed {} not found", name))?;
            let (begin, end) = poll_window(hours);
            match taxii.poll_with(feed, subscription_id.as_deref(), Some(begin), Some(end))? {
                Some(poll) => print_content_blocks(&poll.content_blocks),
                None => println!("✗ Poll of {} returned no content", name),
            }
        }
    }

    Ok(())
}

fn print_services(services: &[ServiceInstance]) {
    println!("\n=== Services ===");
    for service in services {
        println!("{:<24} {}", service.service_type.as_str(), service.address);
    }
}

fn print_content_blocks(blocks: &[ContentBlock]) {
    println!("\n=== Content Blocks ({}) ===", blocks.len());
    for block in blocks {
        let label = block
            .timestamp_label
            .map(|timestamp| timestamp.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!("{} {} ({} bytes)", label, block.binding, block.content.len());
    }
}
