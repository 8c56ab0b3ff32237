//! Projection service binary

use projection_core::feed::{decode_batch, VecSource};
use projection_core::{Config, Projection};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting Agora projection server");

    // Load configuration
    let config = Config::from_env()?;

    // Open projection
    let projection = Projection::open(config).await?;
    match projection.checkpoint().await? {
        Some(key) => tracing::info!(checkpoint = %key, "Resuming after checkpoint"),
        None => tracing::info!("No checkpoint, starting from genesis"),
    }

    // Replay a newline-delimited JSON feed file when configured
    if let Ok(path) = std::env::var("PROJECTION_FEED_FILE") {
        let records = std::fs::read_to_string(&path)?;
        let mut source = VecSource::new(decode_batch(&records)?);
        let consumed = projection.catch_up(&mut source).await?;
        let stats = projection.stats()?;
        tracing::info!(
            path,
            consumed,
            users = stats.total_users,
            listings = stats.total_listings,
            purchases = stats.total_purchases,
            "Feed file replayed"
        );
    }

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down projection server");
    projection.shutdown().await?;
    Ok(())
}
