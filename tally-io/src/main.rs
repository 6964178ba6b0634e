use tally::builder::Builder;
use tally::server::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Build a platform and enable all features...
    let platform = Builder::new().enable_all().build().await;

    // Open the ledger (and import the seed data if present)...
    tally::ledger::install(&platform).await?;

    // Setup the counter cache and warm it up using the ledger...
    tally::counters::install(&platform).await?;

    // Setup the rankings on top of the selected source...
    tally::ranking::install(&platform).await?;

    tally::ballot::install(&platform)?;
    tally::pages::install(&platform)?;

    platform.require::<Server>().event_loop().await;

    log::info!("Shutdown complete.");
    Ok(())
}
