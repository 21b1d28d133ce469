//! Fetches the world ids and then every world through a rate limiter, printing them as they arrive.
//!
//! `JOKOAPI_LOG=debug cargo run -p jokoapi --example worlds`
use jokoapi::{ApiClient, ApiConfig, ApiRequest};
use joko_ratelimit::{CancellationToken, RateLimiterConfig};
use miette::{IntoDiagnostic, Result, WrapErr};

fn install_tracing() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};
    let filter_layer = EnvFilter::try_from_env("JOKOAPI_LOG")
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_default();
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_target(true))
        .init();
}

fn main() -> Result<()> {
    install_tracing();
    let rt = tokio::runtime::Runtime::new()
        .into_diagnostic()
        .wrap_err("failed to create tokio runtime")?;
    let client = ApiClient::new(ApiConfig::default()).wrap_err("failed to create api client")?;
    rt.block_on(async move {
        let limiter = client
            .rate_limiter(tokio::runtime::Handle::current(), RateLimiterConfig::default())
            .wrap_err("failed to create rate limiter")?;
        let outcomes = limiter.outcomes();
        limiter.start();

        limiter
            .push(CancellationToken::new(), ApiRequest::collection_ids("/worlds"))
            .await;
        let ids: Vec<u32> = outcomes
            .recv_async()
            .await
            .into_diagnostic()?
            .into_result()
            .wrap_err("failed to get world ids")
            .and_then(|ids| serde_json::from_value(ids).into_diagnostic())?;
        tracing::info!(count = ids.len(), "got world ids");

        for id in &ids {
            limiter
                .push(CancellationToken::new(), ApiRequest::singleton("/worlds", id))
                .await;
        }
        let mut remaining = ids.len();
        while remaining > 0 {
            let (item, result) = outcomes.recv_async().await.into_diagnostic()?.into_parts();
            match result {
                Ok(world) => {
                    println!("{} ({})", world["name"], world["population"]);
                    remaining -= 1;
                }
                // failed items come back with their request, so they can simply be queued again
                Err(error) if error.is_transient() && !item.token.is_cancelled() => {
                    tracing::warn!(%error, request = ?item.payload, "retrying");
                    limiter.push(item.token, item.payload).await;
                }
                Err(error) => {
                    tracing::error!(?error, request = ?item.payload, "failed to get world");
                    remaining -= 1;
                }
            }
        }
        limiter.stop().await?;
        Ok(())
    })
}
