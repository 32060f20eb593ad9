//! RoomLedger worker
//!
//! Schedules the three reconciliation sweeps (deposit expiry, monthly
//! billing, room occupancy) against the shared database. All time decisions
//! flow through the engine clock, so a pinned `APP_DATE_MODE` drives the
//! sweeps the same way it drives the lifecycle services.

mod config;
mod deposit_expiry;
mod monthly_billing;
mod room_occupancy;
#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod testsupport;

use anyhow::Context;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use roomledger_engine::Notifier;
use roomledger_shared::{db, Clock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("loading worker configuration")?;
    let pool = db::create_pool(&config.database_url)
        .await
        .context("connecting to database")?;
    db::run_migrations(&pool).await.context("running migrations")?;

    let clock = Clock::from_env();
    let notifier = Notifier::from_env();
    info!(
        mode = ?clock.mode(),
        today = %clock.today(),
        notifier_enabled = notifier.is_enabled(),
        "starting roomledger worker"
    );

    let mut scheduler = JobScheduler::new().await?;

    {
        let pool = pool.clone();
        let clock = clock.clone();
        let ttl = config.deposit_ttl_minutes;
        scheduler
            .add(Job::new_async(
                config.deposit_expiry_cron.as_str(),
                move |_id, _lock| {
                    let pool = pool.clone();
                    let clock = clock.clone();
                    Box::pin(async move {
                        if let Err(e) = deposit_expiry::run(&pool, &clock, ttl).await {
                            error!(error = %e, "deposit expiry sweep failed");
                        }
                    })
                },
            )?)
            .await?;
    }

    {
        let pool = pool.clone();
        let clock = clock.clone();
        let notifier = notifier.clone();
        scheduler
            .add(Job::new_async(
                config.monthly_billing_cron.as_str(),
                move |_id, _lock| {
                    let pool = pool.clone();
                    let clock = clock.clone();
                    let notifier = notifier.clone();
                    Box::pin(async move {
                        if let Err(e) = monthly_billing::run(&pool, &clock, &notifier).await {
                            error!(error = %e, "monthly billing sweep failed");
                        }
                    })
                },
            )?)
            .await?;
    }

    {
        let pool = pool.clone();
        let clock = clock.clone();
        scheduler
            .add(Job::new_async(
                config.room_occupancy_cron.as_str(),
                move |_id, _lock| {
                    let pool = pool.clone();
                    let clock = clock.clone();
                    Box::pin(async move {
                        if let Err(e) = room_occupancy::run(&pool, &clock).await {
                            error!(error = %e, "room occupancy sweep failed");
                        }
                    })
                },
            )?)
            .await?;
    }

    {
        let pool = pool.clone();
        let clock = clock.clone();
        scheduler
            .add(Job::new_async(
                config.room_release_cron.as_str(),
                move |_id, _lock| {
                    let pool = pool.clone();
                    let clock = clock.clone();
                    Box::pin(async move {
                        if let Err(e) =
                            room_occupancy::release_rooms_past_end(&pool, &clock).await
                        {
                            error!(error = %e, "room release sweep failed");
                        }
                    })
                },
            )?)
            .await?;
    }

    scheduler.start().await?;
    info!("sweeps scheduled");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    scheduler.shutdown().await?;
    Ok(())
}
