use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::{Decimal, prelude::FromPrimitive};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::model::apperror::{ApplicationError, ErrorType};

/**
 * Rates from the base currency into quoted currencies for one date, keyed by quoted currency code.
 */
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaseRates {
    pub rates: BTreeMap<String, Decimal>,
}

impl BaseRates {
    pub fn get(&self, currency: &str) -> Option<Decimal> {
        self.rates.get(currency).copied()
    }
}

/**
 * Source of base exchange rates.
 */
#[async_trait]
pub trait RateFeed: Send + Sync {
    /**
     * Fetches the rates from the base currency into each quoted currency on `date`.
     */
    async fn fetch_base_rates(&self, date: NaiveDate) -> Result<BaseRates, ApplicationError>;
}

/***************** Central bank feed *********************/

#[derive(Debug, Deserialize)]
struct DailyResponse {
    #[serde(rename = "Valute")]
    valute: HashMap<String, DailyValute>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DailyValute {
    nominal: u32,
    value: f64,
}

/**
 * Client of the Central Bank of Russia daily archive. Rates are quoted in roubles.
 */
pub struct CbrRateFeed {
    client: reqwest::Client,
    base_url: String,
    quoted_currencies: Vec<String>,
}

impl CbrRateFeed {
    /**
     * Creates a new feed client.
     *
     * # Arguments
     * `base_url`: Base url of the archive.
     * `timeout`: Timeout of a single request.
     * `quoted_currencies`: Currency codes to read from the daily document.
     */
    pub fn new(base_url: &str, timeout: Duration, quoted_currencies: Vec<String>) -> Result<Self, ApplicationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ApplicationError::new(ErrorType::Initialization, format!("Failed to create rate feed client: {err}")))?;
        Ok(CbrRateFeed { client, base_url: base_url.trim_end_matches('/').to_string(), quoted_currencies })
    }

    fn daily_url(&self, date: NaiveDate) -> String {
        format!("{}/archive/{}/daily_json.js", self.base_url, date.format("%Y/%m/%d"))
    }

    /**
     * Converts a daily document into rouble based rates. A quote of `value` roubles per `nominal` units
     * becomes a rate of `nominal / value` from roubles into the quoted currency.
     */
    fn to_base_rates(&self, response: DailyResponse) -> Result<BaseRates, ApplicationError> {
        let mut rates = BTreeMap::new();
        for currency in &self.quoted_currencies {
            let Some(valute) = response.valute.get(currency) else {
                debug!("Currency {} missing from daily document", currency);
                continue;
            };
            let value = Decimal::from_f64(valute.value)
                .filter(|value| *value > Decimal::ZERO)
                .ok_or_else(|| ApplicationError::new(ErrorType::ExternalService, format!("Invalid rate {} for {currency}", valute.value)))?;
            rates.insert(currency.clone(), Decimal::from(valute.nominal) / value);
        }
        if rates.is_empty() {
            return Err(ApplicationError::new(ErrorType::ExternalService, "Daily document contains none of the requested currencies".to_string()));
        }
        Ok(BaseRates { rates })
    }
}

#[async_trait]
impl RateFeed for CbrRateFeed {
    #[instrument(skip(self), fields(result))]
    async fn fetch_base_rates(&self, date: NaiveDate) -> Result<BaseRates, ApplicationError> {
        let url = self.daily_url(date);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| ApplicationError::new(ErrorType::ExternalService, format!("Rate feed request failed: {err}")))?;
        if !response.status().is_success() {
            return Err(ApplicationError::new(ErrorType::ExternalService, format!("Rate feed responded with {} for {date}", response.status())));
        }
        let response_text = response.text().await.map_err(|err| ApplicationError::new(ErrorType::ExternalService, format!("Failed to read rate feed response: {err}")))?;
        let daily: DailyResponse = serde_json::from_str(&response_text).map_err(|err| {
            tracing::error!(error = ?err, response = %response_text, "Failed to parse rate feed response");
            ApplicationError::new(ErrorType::ExternalService, format!("Failed to parse rate feed response: {err}"))
        })?;
        self.to_base_rates(daily)
    }
}

/***************** Retry *********************/

/**
 * Bounded retry with a fixed delay between attempts.
 */
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /**
     * Total number of attempts, including the first.
     */
    pub max_attempts: u32,
    pub delay: Duration,
}

/**
 * Result of running an operation under a `RetryPolicy`.
 */
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Success(T),
    Exhausted { attempts: u32, last_error: ApplicationError },
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        RetryPolicy { max_attempts: max_attempts.max(1), delay }
    }

    /**
     * Runs the operation until it succeeds or the attempts are used up.
     */
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApplicationError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return RetryOutcome::Success(value),
                Err(err) => {
                    if attempt >= self.max_attempts {
                        return RetryOutcome::Exhausted { attempts: attempt, last_error: err };
                    }
                    debug!("Attempt {}/{} failed: {}. Retrying...", attempt, self.max_attempts, err);
                    attempt += 1;
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicU32, Ordering};

    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const DAILY_JSON: &str = r#"{
        "Date": "2025-01-01T11:30:00+03:00",
        "Valute": {
            "USD": { "ID": "R01235", "NumCode": "840", "CharCode": "USD", "Nominal": 1, "Name": "Доллар США", "Value": 100.0, "Previous": 99.5 },
            "EUR": { "ID": "R01239", "NumCode": "978", "CharCode": "EUR", "Nominal": 1, "Name": "Евро", "Value": 125.0, "Previous": 124.1 },
            "JPY": { "ID": "R01820", "NumCode": "392", "CharCode": "JPY", "Nominal": 100, "Name": "Японских иен", "Value": 64.0, "Previous": 63.9 }
        }
    }"#;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    async fn create_mock_server(status: u16, body: &str) -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/archive/2025/01/01/daily_json.js")).respond_with(ResponseTemplate::new(status).set_body_string(body)).mount(&mock_server).await;
        mock_server
    }

    fn feed(mock_server: &MockServer, currencies: &[&str]) -> CbrRateFeed {
        CbrRateFeed::new(&mock_server.uri(), Duration::from_secs(5), currencies.iter().map(|currency| currency.to_string()).collect()).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_base_rates() {
        let mock_server = create_mock_server(200, DAILY_JSON).await;
        let rates = feed(&mock_server, &["USD", "EUR"]).fetch_base_rates(date()).await.unwrap();
        assert_eq!(rates.get("USD"), Some(dec!(0.01)));
        assert_eq!(rates.get("EUR"), Some(dec!(0.008)));
        assert!(rates.get("JPY").is_none());
    }

    #[tokio::test]
    async fn test_fetch_base_rates_uses_nominal() {
        let mock_server = create_mock_server(200, DAILY_JSON).await;
        let rates = feed(&mock_server, &["JPY"]).fetch_base_rates(date()).await.unwrap();
        assert_eq!(rates.get("JPY"), Some(dec!(1.5625)));
    }

    #[tokio::test]
    async fn test_fetch_partial_document() {
        let mock_server = create_mock_server(200, DAILY_JSON).await;
        let rates = feed(&mock_server, &["USD", "GBP"]).fetch_base_rates(date()).await.unwrap();
        assert_eq!(rates.rates.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_not_found_is_error() {
        let mock_server = create_mock_server(404, "").await;
        let result = feed(&mock_server, &["USD"]).fetch_base_rates(date()).await;
        assert_eq!(result.unwrap_err().error_type, ErrorType::ExternalService);
    }

    #[tokio::test]
    async fn test_fetch_malformed_document_is_error() {
        let mock_server = create_mock_server(200, "<html>maintenance</html>").await;
        let result = feed(&mock_server, &["USD"]).fetch_base_rates(date()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let outcome = policy
            .run(|| async {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if call < 3 { Err(ApplicationError::new(ErrorType::ExternalService, "down".to_string())) } else { Ok(call) }
            })
            .await;
        assert!(matches!(outcome, RetryOutcome::Success(3)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let outcome: RetryOutcome<()> = policy
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApplicationError::new(ErrorType::ExternalService, "down".to_string()))
            })
            .await;
        match outcome {
            RetryOutcome::Exhausted { attempts, last_error } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error.message, "down");
            }
            RetryOutcome::Success(()) => panic!("expected exhausted outcome"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_policy_needs_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
