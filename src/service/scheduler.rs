use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::service::refresher::RateRefresher;

/**
 * Default interval between background refreshes.
 */
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/**
 * Starts the background rate refresh.
 *
 * # Arguments
 * `rate_refresher`: The refresher to run.
 * `refresh_interval`: Time between refreshes.
 * `refresh_on_startup`: Runs a refresh immediately when set, otherwise the first refresh happens after one interval.
 */
pub fn start_rate_refresh(rate_refresher: Arc<RateRefresher>, refresh_interval: Duration, refresh_on_startup: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(refresh_interval);
        if !refresh_on_startup {
            interval.tick().await;
        }
        loop {
            interval.tick().await;
            match rate_refresher.refresh(None).await {
                Ok(summary) => info!("Scheduled rate refresh: {} inserted, {} updated, {} failed dates", summary.inserted, summary.updated, summary.failed_dates.len()),
                Err(err) => error!("Scheduled rate refresh failed: {}", err),
            }
        }
    })
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::*;
    use crate::{
        model::{apperror::ApplicationError, models::ExchangeRateInputType},
        service::{
            feed::{BaseRates, RateFeed, RetryPolicy},
            refresher::RateStore,
        },
    };

    struct CountingStore {
        coverage_checks: Arc<AtomicU32>,
    }

    #[async_trait]
    impl RateStore for CountingStore {
        async fn dates_missing_coverage(&self, _currencies: &[String], _required_pairs: i64) -> Result<Vec<NaiveDate>, ApplicationError> {
            self.coverage_checks.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn existing_pairs(&self, _rate_date: NaiveDate, _currencies: &[String]) -> Result<Vec<(String, String)>, ApplicationError> {
            Ok(Vec::new())
        }

        async fn find_rate(&self, _from_currency: &str, _to_currency: &str, _rate_date: NaiveDate) -> Result<Option<Decimal>, ApplicationError> {
            Ok(None)
        }

        async fn insert_rate(&self, _exchange_rate_input: ExchangeRateInputType) -> Result<(), ApplicationError> {
            Ok(())
        }

        async fn update_rate(&self, _from_currency: &str, _to_currency: &str, _rate_date: NaiveDate, _rate: Decimal) -> Result<(), ApplicationError> {
            Ok(())
        }
    }

    struct UnusedFeed {}

    #[async_trait]
    impl RateFeed for UnusedFeed {
        async fn fetch_base_rates(&self, _date: NaiveDate) -> Result<BaseRates, ApplicationError> {
            Ok(BaseRates::default())
        }
    }

    fn rate_refresher(coverage_checks: Arc<AtomicU32>) -> Arc<RateRefresher> {
        Arc::new(RateRefresher::new(Arc::new(UnusedFeed {}), Arc::new(CountingStore { coverage_checks }), RetryPolicy::new(1, Duration::ZERO)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_on_startup() {
        let coverage_checks = Arc::new(AtomicU32::new(0));
        let handle = start_rate_refresh(rate_refresher(coverage_checks.clone()), Duration::from_secs(60), true);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(coverage_checks.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(coverage_checks.load(Ordering::SeqCst), 2);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_refresh_waits_one_interval() {
        let coverage_checks = Arc::new(AtomicU32::new(0));
        let handle = start_rate_refresh(rate_refresher(coverage_checks.clone()), Duration::from_secs(60), false);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(coverage_checks.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(coverage_checks.load(Ordering::SeqCst), 1);
        handle.abort();
    }
}
