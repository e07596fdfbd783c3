use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{Pool, Postgres, pool::PoolConnection};
use tracing::{Instrument, debug, info, instrument, warn};

use crate::{
    dao::exchange_rate::ExchangeRateDao,
    model::{
        apperror::{ApplicationError, ErrorType},
        models::{ExchangeRateInputType, RefreshSummaryType},
    },
    service::{
        conversion::round_rate,
        feed::{BaseRates, RateFeed, RetryOutcome, RetryPolicy},
    },
};

/**
 * Currency every feed rate is quoted against.
 */
pub const BASE_CURRENCY: &str = "RUB";

/**
 * Currencies fetched from the feed. Cross rates are derived between each of them.
 */
pub const QUOTED_CURRENCIES: [&str; 2] = ["USD", "EUR"];

/**
 * Stored rates closer than this to a fetched rate are left untouched.
 */
pub fn update_tolerance() -> Decimal {
    Decimal::new(1, 4)
}

/**
 * What to do with a fetched rate given the stored one.
 */
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpsertDecision {
    Insert,
    Update,
    Unchanged,
}

pub fn decide_upsert(stored_rate: Option<Decimal>, fetched_rate: Decimal) -> UpsertDecision {
    match stored_rate {
        None => UpsertDecision::Insert,
        Some(stored_rate) if (fetched_rate - stored_rate).abs() > update_tolerance() => UpsertDecision::Update,
        Some(_) => UpsertDecision::Unchanged,
    }
}

/**
 * A directional rate to store.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct RatePair {
    pub from_currency: String,
    pub to_currency: String,
    pub rate: Decimal,
}

impl RatePair {
    fn new(from_currency: &str, to_currency: &str, rate: Decimal) -> Self {
        RatePair { from_currency: from_currency.to_string(), to_currency: to_currency.to_string(), rate: round_rate(rate) }
    }
}

/**
 * Every currency whose pairwise rates make a date fully covered.
 */
pub fn covered_currencies() -> Vec<String> {
    std::iter::once(BASE_CURRENCY).chain(QUOTED_CURRENCIES).map(str::to_string).collect()
}

/**
 * Number of directional pairs among the covered currencies.
 */
pub fn required_pair_count() -> i64 {
    let currencies = covered_currencies().len() as i64;
    currencies * (currencies - 1)
}

/**
 * Derives every directional pair obtainable from the fetched base rates, rounded to 6 decimals.
 *
 * Each base rate gives the base to quoted pair and its reciprocal. Each pair of quoted currencies that are both
 * present gives a cross rate in both directions. A cross rate with a missing leg is skipped.
 */
pub fn derive_rate_pairs(base_rates: &BaseRates) -> Vec<RatePair> {
    let mut pairs = Vec::new();
    for currency in QUOTED_CURRENCIES {
        if let Some(rate) = base_rates.get(currency) {
            pairs.push(RatePair::new(BASE_CURRENCY, currency, rate));
            pairs.push(RatePair::new(currency, BASE_CURRENCY, Decimal::ONE / rate));
        }
    }
    for (index, from_currency) in QUOTED_CURRENCIES.iter().enumerate() {
        for to_currency in &QUOTED_CURRENCIES[index + 1..] {
            match (base_rates.get(from_currency), base_rates.get(to_currency)) {
                (Some(from_rate), Some(to_rate)) => {
                    pairs.push(RatePair::new(from_currency, to_currency, to_rate / from_rate));
                    pairs.push(RatePair::new(to_currency, from_currency, from_rate / to_rate));
                }
                _ => warn!("Cross rate {}/{} skipped, base rate missing from feed", from_currency, to_currency),
            }
        }
    }
    pairs
}

/**
 * Storage used by the refresher.
 */
#[async_trait]
pub trait RateStore: Send + Sync {
    /**
     * Indicator value dates lacking some of the `required_pairs` pairs among `currencies`.
     */
    async fn dates_missing_coverage(&self, currencies: &[String], required_pairs: i64) -> Result<Vec<NaiveDate>, ApplicationError>;

    /**
     * Directional pairs stored on `rate_date` among `currencies`.
     */
    async fn existing_pairs(&self, rate_date: NaiveDate, currencies: &[String]) -> Result<Vec<(String, String)>, ApplicationError>;

    async fn find_rate(&self, from_currency: &str, to_currency: &str, rate_date: NaiveDate) -> Result<Option<Decimal>, ApplicationError>;

    async fn insert_rate(&self, exchange_rate_input: ExchangeRateInputType) -> Result<(), ApplicationError>;

    async fn update_rate(&self, from_currency: &str, to_currency: &str, rate_date: NaiveDate, rate: Decimal) -> Result<(), ApplicationError>;
}

/**
 * Rate store backed by the exchange rate table.
 */
pub struct PgRateStore {
    exchange_rate_dao: ExchangeRateDao,
    connection_pool: Pool<Postgres>,
}

impl PgRateStore {
    pub fn new(exchange_rate_dao: ExchangeRateDao, connection_pool: Pool<Postgres>) -> Self {
        PgRateStore { exchange_rate_dao, connection_pool }
    }

    async fn acquire(&self) -> Result<PoolConnection<Postgres>, ApplicationError> {
        self.connection_pool.acquire().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to acquire connection: {err}")))
    }
}

#[async_trait]
impl RateStore for PgRateStore {
    async fn dates_missing_coverage(&self, currencies: &[String], required_pairs: i64) -> Result<Vec<NaiveDate>, ApplicationError> {
        let mut connection = self.acquire().await?;
        self.exchange_rate_dao.get_dates_missing_coverage(&mut connection, currencies, required_pairs).await
    }

    async fn existing_pairs(&self, rate_date: NaiveDate, currencies: &[String]) -> Result<Vec<(String, String)>, ApplicationError> {
        let mut connection = self.acquire().await?;
        self.exchange_rate_dao.get_pairs_for_date(&mut connection, rate_date, currencies).await
    }

    async fn find_rate(&self, from_currency: &str, to_currency: &str, rate_date: NaiveDate) -> Result<Option<Decimal>, ApplicationError> {
        let mut connection = self.acquire().await?;
        self.exchange_rate_dao.get_rate_for_pair(&mut connection, from_currency, to_currency, rate_date).await
    }

    async fn insert_rate(&self, exchange_rate_input: ExchangeRateInputType) -> Result<(), ApplicationError> {
        let mut connection = self.acquire().await?;
        self.exchange_rate_dao.add_exchange_rate(&mut connection, exchange_rate_input).await.map(|_| ())
    }

    async fn update_rate(&self, from_currency: &str, to_currency: &str, rate_date: NaiveDate, rate: Decimal) -> Result<(), ApplicationError> {
        let mut connection = self.acquire().await?;
        self.exchange_rate_dao.update_rate_for_pair(&mut connection, from_currency, to_currency, rate_date, rate).await
    }
}

/**
 * Reconciles stored exchange rates with the feed.
 */
pub struct RateRefresher {
    feed: Arc<dyn RateFeed>,
    store: Arc<dyn RateStore>,
    retry_policy: RetryPolicy,
}

impl RateRefresher {
    pub fn new(feed: Arc<dyn RateFeed>, store: Arc<dyn RateStore>, retry_policy: RetryPolicy) -> Self {
        RateRefresher { feed, store, retry_policy }
    }

    /**
     * Refreshes the rates of one date, or of every indicator value date lacking full coverage.
     *
     * # Arguments
     * `target_date`: The date to refresh. `None` selects the dates lacking coverage.
     *
     * # Returns
     * Counts of inserted and updated rates with the processed, skipped and failed dates. A date whose
     * fetch exhausted the retries is recorded as failed and does not fail the refresh.
     */
    #[instrument(skip(self), fields(result))]
    pub async fn refresh(&self, target_date: Option<NaiveDate>) -> Result<RefreshSummaryType, ApplicationError> {
        let span = tracing::Span::current();
        let currencies = covered_currencies();
        let dates = match target_date {
            Some(target_date) => vec![target_date],
            None => self.store.dates_missing_coverage(&currencies, required_pair_count()).instrument(span.clone()).await?,
        };
        let mut summary = RefreshSummaryType::default();
        for date in dates {
            let existing_pairs = self.store.existing_pairs(date, &currencies).instrument(span.clone()).await?;
            if existing_pairs.len() as i64 >= required_pair_count() {
                debug!("All rates present for {}", date);
                summary.skipped_dates.push(date);
                continue;
            }
            let base_rates = match self.retry_policy.run(|| self.feed.fetch_base_rates(date)).instrument(span.clone()).await {
                RetryOutcome::Success(base_rates) => base_rates,
                RetryOutcome::Exhausted { attempts, last_error } => {
                    warn!("Failed to fetch rates for {} after {} attempts: {}", date, attempts, last_error);
                    summary.failed_dates.push(date);
                    continue;
                }
            };
            for rate_pair in derive_rate_pairs(&base_rates) {
                self.upsert(date, rate_pair, &mut summary).instrument(span.clone()).await?;
            }
            summary.processed_dates.push(date);
        }
        info!(
            "Rate refresh done: {} inserted, {} updated, {} processed, {} skipped, {} failed",
            summary.inserted,
            summary.updated,
            summary.processed_dates.len(),
            summary.skipped_dates.len(),
            summary.failed_dates.len()
        );
        span.record("result", "ok");
        Ok(summary)
    }

    async fn upsert(&self, rate_date: NaiveDate, rate_pair: RatePair, summary: &mut RefreshSummaryType) -> Result<(), ApplicationError> {
        let stored_rate = self.store.find_rate(&rate_pair.from_currency, &rate_pair.to_currency, rate_date).await?;
        match decide_upsert(stored_rate, rate_pair.rate) {
            UpsertDecision::Insert => {
                let exchange_rate_input = ExchangeRateInputType { from_currency: rate_pair.from_currency, to_currency: rate_pair.to_currency, rate: rate_pair.rate, rate_date };
                match self.store.insert_rate(exchange_rate_input).await {
                    Ok(()) => summary.inserted += 1,
                    Err(err) if err.error_type == ErrorType::ConstraintViolation => debug!("Rate for {} inserted concurrently: {}", rate_date, err),
                    Err(err) => return Err(err),
                }
            }
            UpsertDecision::Update => {
                self.store.update_rate(&rate_pair.from_currency, &rate_pair.to_currency, rate_date, rate_pair.rate).await?;
                summary.updated += 1;
            }
            UpsertDecision::Unchanged => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use rust_decimal_macros::dec;

    use super::*;

    type RateKey = (String, String, NaiveDate);

    #[derive(Default)]
    struct InMemoryRateStore {
        rates: Mutex<HashMap<RateKey, Decimal>>,
        value_dates: Vec<NaiveDate>,
    }

    impl InMemoryRateStore {
        fn with_value_dates(value_dates: Vec<NaiveDate>) -> Self {
            InMemoryRateStore { value_dates, ..Default::default() }
        }

        fn stored(&self, from_currency: &str, to_currency: &str, rate_date: NaiveDate) -> Option<Decimal> {
            self.rates.lock().unwrap().get(&(from_currency.to_string(), to_currency.to_string(), rate_date)).copied()
        }

        fn put(&self, from_currency: &str, to_currency: &str, rate_date: NaiveDate, rate: Decimal) {
            self.rates.lock().unwrap().insert((from_currency.to_string(), to_currency.to_string(), rate_date), rate);
        }

        fn count_for(&self, rate_date: NaiveDate) -> usize {
            self.rates.lock().unwrap().keys().filter(|key| key.2 == rate_date).count()
        }
    }

    #[async_trait]
    impl RateStore for InMemoryRateStore {
        async fn dates_missing_coverage(&self, _currencies: &[String], required_pairs: i64) -> Result<Vec<NaiveDate>, ApplicationError> {
            Ok(self.value_dates.iter().copied().filter(|date| (self.count_for(*date) as i64) < required_pairs).collect())
        }

        async fn existing_pairs(&self, rate_date: NaiveDate, _currencies: &[String]) -> Result<Vec<(String, String)>, ApplicationError> {
            Ok(self.rates.lock().unwrap().keys().filter(|key| key.2 == rate_date).map(|key| (key.0.clone(), key.1.clone())).collect())
        }

        async fn find_rate(&self, from_currency: &str, to_currency: &str, rate_date: NaiveDate) -> Result<Option<Decimal>, ApplicationError> {
            Ok(self.stored(from_currency, to_currency, rate_date))
        }

        async fn insert_rate(&self, exchange_rate_input: ExchangeRateInputType) -> Result<(), ApplicationError> {
            self.put(&exchange_rate_input.from_currency, &exchange_rate_input.to_currency, exchange_rate_input.rate_date, exchange_rate_input.rate);
            Ok(())
        }

        async fn update_rate(&self, from_currency: &str, to_currency: &str, rate_date: NaiveDate, rate: Decimal) -> Result<(), ApplicationError> {
            self.put(from_currency, to_currency, rate_date, rate);
            Ok(())
        }
    }

    struct StubRateFeed {
        rates: Option<BaseRates>,
        calls: AtomicU32,
    }

    impl StubRateFeed {
        fn returning(rates: &[(&str, Decimal)]) -> Self {
            let rates = rates.iter().map(|(currency, rate)| (currency.to_string(), *rate)).collect::<BTreeMap<_, _>>();
            StubRateFeed { rates: Some(BaseRates { rates }), calls: AtomicU32::new(0) }
        }

        fn failing() -> Self {
            StubRateFeed { rates: None, calls: AtomicU32::new(0) }
        }
    }

    #[async_trait]
    impl RateFeed for StubRateFeed {
        async fn fetch_base_rates(&self, _date: NaiveDate) -> Result<BaseRates, ApplicationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.rates.clone().ok_or_else(|| ApplicationError::new(ErrorType::ExternalService, "Rate feed responded with 503".to_string()))
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()
    }

    fn refresher(feed: Arc<StubRateFeed>, store: Arc<InMemoryRateStore>) -> RateRefresher {
        RateRefresher::new(feed, store, RetryPolicy::new(3, Duration::from_millis(1)))
    }

    #[test]
    fn test_decide_upsert() {
        assert_eq!(decide_upsert(None, dec!(1.5)), UpsertDecision::Insert);
        assert_eq!(decide_upsert(Some(dec!(1.000000)), dec!(1.000050)), UpsertDecision::Unchanged);
        assert_eq!(decide_upsert(Some(dec!(1.000000)), dec!(1.000100)), UpsertDecision::Unchanged);
        assert_eq!(decide_upsert(Some(dec!(1.000000)), dec!(1.000101)), UpsertDecision::Update);
        assert_eq!(decide_upsert(Some(dec!(1.000200)), dec!(1.000000)), UpsertDecision::Update);
    }

    #[test]
    fn test_required_pair_count() {
        assert_eq!(required_pair_count(), 6);
    }

    #[test]
    fn test_derive_rate_pairs() {
        let base_rates = BaseRates { rates: BTreeMap::from([("USD".to_string(), dec!(0.01)), ("EUR".to_string(), dec!(0.008))]) };
        let pairs = derive_rate_pairs(&base_rates);
        assert_eq!(pairs.len(), 6);
        let rate_of = |from_currency: &str, to_currency: &str| pairs.iter().find(|pair| pair.from_currency == from_currency && pair.to_currency == to_currency).map(|pair| pair.rate);
        assert_eq!(rate_of("RUB", "USD"), Some(dec!(0.01)));
        assert_eq!(rate_of("USD", "RUB"), Some(dec!(100)));
        assert_eq!(rate_of("RUB", "EUR"), Some(dec!(0.008)));
        assert_eq!(rate_of("EUR", "RUB"), Some(dec!(125)));
        assert_eq!(rate_of("USD", "EUR"), Some(dec!(0.8)));
        assert_eq!(rate_of("EUR", "USD"), Some(dec!(1.25)));
    }

    #[test]
    fn test_derive_rate_pairs_rounds_to_six_decimals() {
        let base_rates = BaseRates { rates: BTreeMap::from([("USD".to_string(), Decimal::ONE / dec!(90))]) };
        let pairs = derive_rate_pairs(&base_rates);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].rate, dec!(0.011111));
        assert_eq!(pairs[1].rate, dec!(90));
    }

    #[tokio::test]
    async fn test_refresh_inserts_all_pairs() {
        let feed = Arc::new(StubRateFeed::returning(&[("USD", dec!(0.01)), ("EUR", dec!(0.008))]));
        let store = Arc::new(InMemoryRateStore::default());
        let summary = refresher(feed.clone(), store.clone()).refresh(Some(date())).await.unwrap();
        assert_eq!(summary.inserted, 6);
        assert_eq!(summary.updated, 0);
        assert_eq!(summary.processed_dates, vec![date()]);
        assert_eq!(store.stored("EUR", "USD", date()), Some(dec!(1.25)));
        assert_eq!(feed.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let feed = Arc::new(StubRateFeed::returning(&[("USD", dec!(0.01)), ("EUR", dec!(0.008))]));
        let store = Arc::new(InMemoryRateStore::default());
        let refresher = refresher(feed.clone(), store.clone());
        refresher.refresh(Some(date())).await.unwrap();
        let second = refresher.refresh(Some(date())).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(second.skipped_dates, vec![date()]);
        assert_eq!(feed.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_updates_only_outside_tolerance() {
        let feed = Arc::new(StubRateFeed::returning(&[("USD", dec!(0.01)), ("EUR", dec!(0.008))]));
        let store = Arc::new(InMemoryRateStore::default());
        store.put("USD", "RUB", date(), dec!(99.5));
        store.put("RUB", "USD", date(), dec!(0.010050));
        let summary = refresher(feed, store.clone()).refresh(Some(date())).await.unwrap();
        assert_eq!(summary.inserted, 4);
        assert_eq!(summary.updated, 1);
        assert_eq!(store.stored("USD", "RUB", date()), Some(dec!(100)));
        assert_eq!(store.stored("RUB", "USD", date()), Some(dec!(0.010050)));
    }

    #[tokio::test]
    async fn test_refresh_records_exhausted_date() {
        let feed = Arc::new(StubRateFeed::failing());
        let store = Arc::new(InMemoryRateStore::default());
        let summary = refresher(feed.clone(), store.clone()).refresh(Some(date())).await.unwrap();
        assert_eq!(summary.failed_dates, vec![date()]);
        assert!(summary.processed_dates.is_empty());
        assert_eq!(summary.inserted, 0);
        assert_eq!(feed.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_refresh_partial_feed_skips_cross_rate() {
        let feed = Arc::new(StubRateFeed::returning(&[("USD", dec!(0.01))]));
        let store = Arc::new(InMemoryRateStore::default());
        let summary = refresher(feed, store.clone()).refresh(Some(date())).await.unwrap();
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.processed_dates, vec![date()]);
        assert!(summary.failed_dates.is_empty());
        assert!(store.stored("USD", "EUR", date()).is_none());
    }

    #[tokio::test]
    async fn test_refresh_without_date_uses_uncovered_dates() {
        let covered = NaiveDate::from_ymd_opt(2025, 1, 9).unwrap();
        let feed = Arc::new(StubRateFeed::returning(&[("USD", dec!(0.01)), ("EUR", dec!(0.008))]));
        let store = Arc::new(InMemoryRateStore::with_value_dates(vec![covered, date()]));
        for pair in derive_rate_pairs(&BaseRates { rates: BTreeMap::from([("USD".to_string(), dec!(0.01)), ("EUR".to_string(), dec!(0.008))]) }) {
            store.put(&pair.from_currency, &pair.to_currency, covered, pair.rate);
        }
        let summary = refresher(feed.clone(), store).refresh(None).await.unwrap();
        assert_eq!(summary.processed_dates, vec![date()]);
        assert!(summary.skipped_dates.is_empty());
        assert_eq!(summary.inserted, 6);
        assert_eq!(feed.calls.load(Ordering::SeqCst), 1);
    }
}
