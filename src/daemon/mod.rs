mod app;

use anyhow::Result;

pub async fn run() -> Result<()> {
    tracing::info!("Starting wayfarer daemon");
    app::run().await
}
