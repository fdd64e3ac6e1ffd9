mod cli;

use crate::cli::{Command, CLI};
use anyhow::Context;
use clap::Parser;
use shortlink_core::{OwnerId, SaveOutcome, ShortLinkError};
use shortlink_storage::ShortLinkStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CLI::parse();
    init_tracing(config.json_logs);

    let storage_config = config.storage.to_config();
    info!(backend = %storage_config.backend_kind(), owner = %config.owner, "starting shortlink");

    let store = ShortLinkStore::open(&storage_config)
        .await
        .context("failed to open short link storage")?;

    let result = run(&store, &config).await;
    if let Err(err) = store.close().await {
        warn!(error = %err, "failed to close short link storage");
    }
    result
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(store: &ShortLinkStore, config: &CLI) -> anyhow::Result<()> {
    let owner: OwnerId = config.owner();

    match &config.command {
        Command::Shorten { urls } => {
            if let [url] = urls.as_slice() {
                let outcome = store.save_url(url, &owner).await?;
                let note = match outcome {
                    SaveOutcome::Created(_) => "created",
                    SaveOutcome::Existing(_) => "existing",
                };
                println!("{}\t{}\t{}", outcome.code().to_url(&config.base_url), note, url);
            } else {
                let saved = store.save_batch_urls(urls, &owner).await?;
                for url in urls {
                    if let Some(code) = saved.get(url) {
                        println!("{}\t{}", code.to_url(&config.base_url), url);
                    }
                }
            }
        }
        Command::Resolve { code } => {
            let resolved = store.get_url(code).await?;
            if resolved.deleted {
                println!("{}\t(deleted)", resolved.original_url);
            } else {
                println!("{}", resolved.original_url);
            }
        }
        Command::List => match store.list_owner_urls(&owner).await {
            Ok(links) => {
                for link in links {
                    println!("{}\t{}", link.code.to_url(&config.base_url), link.original_url);
                }
            }
            Err(ShortLinkError::NoRecordsForOwner(owner)) => {
                info!(owner = %owner, "owner has no short links");
            }
            Err(err) => return Err(err.into()),
        },
        Command::Delete { codes } => {
            let deleted = store.delete_urls(codes, &owner).await?;
            println!("deleted {} of {}", deleted, codes.len());
        }
        Command::Ping => {
            store.ping().await?;
            println!("ok");
        }
    }

    Ok(())
}
