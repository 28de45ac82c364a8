use anyhow::Context;
use serde_json::json;
use std::sync::Arc;
use tradeforge::{config::Config, db::init_db, Reconstructor, Repository, TradeFinalizer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("loading configuration")?;

    let pool = init_db(&config.database_path)
        .await
        .with_context(|| format!("initializing database at {}", config.database_path))?;

    let repo = Repository::new(pool).with_link_chunk_size(config.link_chunk_size);
    let reconstructor = Reconstructor::new(
        Arc::new(repo),
        TradeFinalizer::new(config.market_timezone),
    );

    if config.users.is_empty() {
        tracing::warn!("No users configured; set RECONSTRUCT_USERS or RECONSTRUCT_USERS_FILE");
        return Ok(());
    }

    tracing::info!(
        users = config.users.len(),
        timezone = %config.market_timezone,
        "Reconstructing trades"
    );

    for user in &config.users {
        let (run, summary) = reconstructor
            .run(user)
            .await
            .with_context(|| format!("reconstructing trades for {}", user))?;

        // One JSON line per user on stdout for downstream tooling.
        println!(
            "{}",
            json!({
                "run_id": run.run_id,
                "user": user.as_str(),
                "orders": run.orders_processed,
                "skipped": run.skipped.len(),
                "splits": run.splits,
                "closed": run.closed_trades(),
                "open": run.open_trades(),
                "persisted": summary,
            })
        );
    }

    Ok(())
}
