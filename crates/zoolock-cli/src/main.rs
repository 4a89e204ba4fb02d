//! zoolock - drive lock contention scenarios against the embedded store

use std::sync::Arc;

use clap::Parser;
use zoolock_client::{CoordinationStore, LockDirectory, MemoryStore, TracingLogger};

mod config;
mod logging;
mod scenario;

use config::{Cli, Configuration};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let configuration = Configuration::new(Cli::parse())?;
    let _logging_guard = logging::init_logging(&configuration.logging_config())?;

    let store = MemoryStore::new();
    let client = LockDirectory::new(Arc::new(store.clone()))
        .with_logger(Arc::new(TracingLogger))
        .with_config(configuration.client_config())
        .client()?;

    let scenario = configuration.scenario_config();
    let target = client.resolve(&scenario.resource)?;
    tracing::info!(
        root = client.root(),
        resource = %scenario.resource,
        workers = scenario.workers,
        "starting contention scenario"
    );

    let reports = scenario::run(&client, &scenario).await?;
    for report in &reports {
        println!("{}", report);
    }

    let leftover = match store.list_children(&target.parent).await {
        Ok(children) => children.len(),
        Err(e) if e.is_no_node() => 0,
        Err(e) => return Err(e.into()),
    };
    if leftover > 0 {
        anyhow::bail!("{} contender nodes left under {}", leftover, target.parent);
    }
    tracing::info!("scenario finished, no contender nodes left");

    Ok(())
}
