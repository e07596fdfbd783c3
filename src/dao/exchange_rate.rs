use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::PgConnection;
use tracing::{Instrument, instrument};

use crate::{
    dao::common::{expect_single_row, handle_database_error},
    model::{
        apperror::ApplicationError,
        models::{ExchangeRateInputType, ExchangeRateType, PaginationInput},
    },
    service::conversion::{RateTable, RateTableRequest},
};

/**
 * Database response type for exchange rate queries.
 */
pub type QueryExchangeRateDbResp = (i64, String, String, Decimal, NaiveDate);

/**
 * Database response type for the rate table query.
 */
pub type QueryRateTableDbResp = (String, NaiveDate, Decimal);

const QUERY_EXCHANGE_RATE_LIST: &str = "SELECT id, from_currency, to_currency, rate, rate_date FROM exchange_rates ORDER BY rate_date, from_currency, to_currency LIMIT $1 OFFSET $2";

const QUERY_EXCHANGE_RATE: &str = "SELECT id, from_currency, to_currency, rate, rate_date FROM exchange_rates WHERE id = $1";

const ADD_EXCHANGE_RATE: &str = "INSERT INTO exchange_rates (from_currency, to_currency, rate, rate_date) VALUES ($1, $2, $3, $4) RETURNING id, from_currency, to_currency, rate, rate_date";

const UPDATE_EXCHANGE_RATE: &str = "UPDATE exchange_rates SET from_currency = $1, to_currency = $2, rate = $3, rate_date = $4 WHERE id = $5";

const DELETE_EXCHANGE_RATE: &str = "DELETE FROM exchange_rates WHERE id = $1";

/**
 * All rates into one target currency for the cross product of source currencies and dates.
 */
const QUERY_RATE_TABLE: &str = "SELECT from_currency, rate_date, rate FROM exchange_rates WHERE from_currency = ANY($1) AND to_currency = $2 AND rate_date = ANY($3)";

const QUERY_RATE_FOR_PAIR: &str = "SELECT rate FROM exchange_rates WHERE from_currency = $1 AND to_currency = $2 AND rate_date = $3";

const UPDATE_RATE_FOR_PAIR: &str = "UPDATE exchange_rates SET rate = $1 WHERE from_currency = $2 AND to_currency = $3 AND rate_date = $4";

const QUERY_PAIRS_FOR_DATE: &str = "SELECT from_currency, to_currency FROM exchange_rates WHERE rate_date = $1 AND from_currency = ANY($2) AND to_currency = ANY($2) AND from_currency <> to_currency";

/**
 * Distinct indicator value dates that have fewer than `$2` directional pairs among the currencies in `$1`.
 */
const QUERY_DATES_MISSING_COVERAGE: &str = "SELECT DISTINCT v.value_date FROM indicator_values v
                                            WHERE (SELECT COUNT(*) FROM exchange_rates r
                                                   WHERE r.rate_date = v.value_date AND
                                                   r.from_currency = ANY($1) AND r.to_currency = ANY($1) AND r.from_currency <> r.to_currency) < $2
                                            ORDER BY v.value_date";

/**
 * DAO for exchange rates.
 */
pub struct ExchangeRateDao {}

impl ExchangeRateDao {
    pub fn new() -> Self {
        ExchangeRateDao {}
    }

    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_exchange_rate_list(&self, connection: &mut PgConnection, pagination_input: PaginationInput) -> Result<Vec<ExchangeRateType>, ApplicationError> {
        let span = tracing::Span::current();
        let results: Vec<QueryExchangeRateDbResp> = sqlx::query_as(QUERY_EXCHANGE_RATE_LIST)
            .bind(pagination_input.limit)
            .bind(pagination_input.skip)
            .fetch_all(connection)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        Ok(results.into_iter().map(ExchangeRateType::from).collect())
    }

    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_exchange_rate(&self, connection: &mut PgConnection, exchange_rate_id: i64) -> Result<Option<ExchangeRateType>, ApplicationError> {
        let span = tracing::Span::current();
        let result: Option<QueryExchangeRateDbResp> = sqlx::query_as(QUERY_EXCHANGE_RATE)
            .bind(exchange_rate_id)
            .fetch_optional(connection)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        Ok(result.map(ExchangeRateType::from))
    }

    #[instrument(skip(self, transaction), fields(result))]
    pub async fn add_exchange_rate(&self, transaction: &mut PgConnection, exchange_rate_input: ExchangeRateInputType) -> Result<ExchangeRateType, ApplicationError> {
        let span = tracing::Span::current();
        let result: QueryExchangeRateDbResp = sqlx::query_as(ADD_EXCHANGE_RATE)
            .bind(exchange_rate_input.from_currency)
            .bind(exchange_rate_input.to_currency)
            .bind(exchange_rate_input.rate)
            .bind(exchange_rate_input.rate_date)
            .fetch_one(transaction)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        Ok(ExchangeRateType::from(result))
    }

    #[instrument(skip(self, transaction), fields(result))]
    pub async fn update_exchange_rate(&self, transaction: &mut PgConnection, exchange_rate: &ExchangeRateType) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        let result = sqlx::query(UPDATE_EXCHANGE_RATE)
            .bind(&exchange_rate.from_currency)
            .bind(&exchange_rate.to_currency)
            .bind(exchange_rate.rate)
            .bind(exchange_rate.rate_date)
            .bind(exchange_rate.id)
            .execute(transaction)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        expect_single_row(&result, "Exchange rate", "updated")
    }

    #[instrument(skip(self, transaction), fields(result))]
    pub async fn delete_exchange_rate(&self, transaction: &mut PgConnection, exchange_rate_id: i64) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        let result = sqlx::query(DELETE_EXCHANGE_RATE)
            .bind(exchange_rate_id)
            .execute(transaction)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        expect_single_row(&result, "Exchange rate", "deleted")
    }

    /**
     * Loads the rates needed to convert the requested currencies and dates in one query.
     *
     * # Arguments
     * `connection`: The database connection.
     * `request`: Source currencies, dates and the target currency.
     *
     * # Returns
     * The rate table. An empty request returns an empty table without querying.
     */
    #[instrument(skip(self, connection, request), fields(target_currency = request.target_currency(), result))]
    pub async fn get_rate_table(&self, connection: &mut PgConnection, request: &RateTableRequest) -> Result<RateTable, ApplicationError> {
        if request.is_empty() {
            return Ok(RateTable::empty());
        }
        let span = tracing::Span::current();
        let results: Vec<QueryRateTableDbResp> = sqlx::query_as(QUERY_RATE_TABLE)
            .bind(request.currencies())
            .bind(request.target_currency())
            .bind(request.dates())
            .fetch_all(connection)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        tracing::debug!("Loaded {} rates into {}", results.len(), request.target_currency());
        Ok(RateTable::from_rows(results))
    }

    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_rate_for_pair(&self, connection: &mut PgConnection, from_currency: &str, to_currency: &str, rate_date: NaiveDate) -> Result<Option<Decimal>, ApplicationError> {
        let span = tracing::Span::current();
        let result: Option<(Decimal,)> = sqlx::query_as(QUERY_RATE_FOR_PAIR)
            .bind(from_currency)
            .bind(to_currency)
            .bind(rate_date)
            .fetch_optional(connection)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        Ok(result.map(|row| row.0))
    }

    #[instrument(skip(self, connection), fields(result))]
    pub async fn update_rate_for_pair(&self, connection: &mut PgConnection, from_currency: &str, to_currency: &str, rate_date: NaiveDate, rate: Decimal) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        let result = sqlx::query(UPDATE_RATE_FOR_PAIR)
            .bind(rate)
            .bind(from_currency)
            .bind(to_currency)
            .bind(rate_date)
            .execute(connection)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        expect_single_row(&result, "Exchange rate", "updated")
    }

    /**
     * Directional pairs stored for a date among the given currencies.
     */
    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_pairs_for_date(&self, connection: &mut PgConnection, rate_date: NaiveDate, currencies: &[String]) -> Result<Vec<(String, String)>, ApplicationError> {
        let span = tracing::Span::current();
        let results: Vec<(String, String)> = sqlx::query_as(QUERY_PAIRS_FOR_DATE)
            .bind(rate_date)
            .bind(currencies)
            .fetch_all(connection)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        Ok(results)
    }

    /**
     * Indicator value dates lacking some of the `required_pairs` directional pairs among `currencies`.
     */
    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_dates_missing_coverage(&self, connection: &mut PgConnection, currencies: &[String], required_pairs: i64) -> Result<Vec<NaiveDate>, ApplicationError> {
        let span = tracing::Span::current();
        let results: Vec<(NaiveDate,)> = sqlx::query_as(QUERY_DATES_MISSING_COVERAGE)
            .bind(currencies)
            .bind(required_pairs)
            .fetch_all(connection)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        Ok(results.into_iter().map(|row| row.0).collect())
    }
}

#[cfg(feature = "integration-test")]
#[cfg(test)]
mod integration_test {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::dao::test_db::init_db;

    #[sqlx::test]
    async fn test_rate_table_only_contains_target_rates() {
        let pool = init_db().await;
        let mut transaction = pool.begin().await.unwrap();
        let exchange_rate_dao = ExchangeRateDao::new();
        let rate_date = NaiveDate::from_ymd_opt(1999, 1, 4).unwrap();
        for (from_currency, to_currency, rate) in [("USD", "RUB", dec!(90)), ("EUR", "RUB", dec!(100)), ("RUB", "USD", dec!(0.011111))] {
            let input = ExchangeRateInputType { from_currency: from_currency.to_string(), to_currency: to_currency.to_string(), rate, rate_date };
            exchange_rate_dao.add_exchange_rate(&mut transaction, input).await.unwrap();
        }
        let mut request = RateTableRequest::new("RUB");
        request.add("USD", rate_date);
        request.add("EUR", rate_date);
        let table = exchange_rate_dao.get_rate_table(&mut transaction, &request).await.unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("USD", rate_date), Some(dec!(90)));
        assert_eq!(table.get("EUR", rate_date), Some(dec!(100)));
        transaction.rollback().await.unwrap();
    }

    #[sqlx::test]
    async fn test_duplicate_rate_rejected() {
        let pool = init_db().await;
        let mut transaction = pool.begin().await.unwrap();
        let exchange_rate_dao = ExchangeRateDao::new();
        let input = ExchangeRateInputType { from_currency: "USD".to_string(), to_currency: "RUB".to_string(), rate: dec!(90), rate_date: NaiveDate::from_ymd_opt(1999, 1, 5).unwrap() };
        exchange_rate_dao.add_exchange_rate(&mut transaction, input.clone()).await.unwrap();
        let duplicate = exchange_rate_dao.add_exchange_rate(&mut transaction, input).await;
        assert_eq!(duplicate.unwrap_err().error_type, crate::model::apperror::ErrorType::ConstraintViolation);
        transaction.rollback().await.unwrap();
    }
}
