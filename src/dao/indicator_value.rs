use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::PgConnection;
use tracing::{Instrument, instrument};

use crate::{
    dao::common::{expect_single_row, handle_database_error},
    model::{
        apperror::ApplicationError,
        models::{IndicatorValueInputType, IndicatorValueType, IndicatorValuesFilter, PaginationInput, WeightedSourceType},
    },
};

/**
 * Database response type for indicator value queries.
 */
pub type QueryIndicatorValueDbResp = (i64, i64, i64, NaiveDate, Decimal, String);

/**
 * Database response type for indicator values joined with their indicator.
 */
pub type QueryWeightedSourceDbResp = (i64, String, NaiveDate, Decimal, String, Decimal);

/**
 * SQL query to retrieve indicator values with optional enterprise, indicator and date range filters.
 */
const QUERY_INDICATOR_VALUE_LIST: &str = "SELECT id, enterprise_id, indicator_id, value_date, value, currency_code FROM indicator_values
                                          WHERE ($1::bigint IS NULL OR enterprise_id = $1) AND
                                          ($2::bigint IS NULL OR indicator_id = $2) AND
                                          ($3::date IS NULL OR value_date >= $3) AND
                                          ($4::date IS NULL OR value_date <= $4)
                                          ORDER BY id
                                          LIMIT $5 OFFSET $6";

const QUERY_INDICATOR_VALUE: &str = "SELECT id, enterprise_id, indicator_id, value_date, value, currency_code FROM indicator_values WHERE id = $1";

const QUERY_INDICATOR_VALUE_EXISTS: &str = "SELECT EXISTS (SELECT 1 FROM indicator_values WHERE enterprise_id = $1 AND indicator_id = $2 AND value_date = $3 AND value = $4 AND currency_code = $5)";

const ADD_INDICATOR_VALUE: &str = "INSERT INTO indicator_values (enterprise_id, indicator_id, value_date, value, currency_code) VALUES ($1, $2, $3, $4, $5)
                                   RETURNING id, enterprise_id, indicator_id, value_date, value, currency_code";

const UPDATE_INDICATOR_VALUE: &str = "UPDATE indicator_values SET enterprise_id = $1, indicator_id = $2, value_date = $3, value = $4, currency_code = $5 WHERE id = $6";

const DELETE_INDICATOR_VALUE: &str = "DELETE FROM indicator_values WHERE id = $1";

/**
 * SQL query joining the values of one enterprise with indicator name and importance. A null limit returns all rows.
 */
const QUERY_WEIGHTED_SOURCES: &str = "SELECT a.indicator_id, b.name, a.value_date, a.value, a.currency_code, b.importance
                                      FROM indicator_values a, indicators b
                                      WHERE a.indicator_id = b.id AND a.enterprise_id = $1 AND
                                      ($2::bigint IS NULL OR a.indicator_id = $2) AND
                                      ($3::date IS NULL OR a.value_date >= $3) AND
                                      ($4::date IS NULL OR a.value_date <= $4)
                                      ORDER BY a.value_date, a.id
                                      LIMIT $5 OFFSET $6";

/**
 * DAO for indicator values.
 */
pub struct IndicatorValueDao {}

impl IndicatorValueDao {
    pub fn new() -> Self {
        IndicatorValueDao {}
    }

    /**
     * Retrieves a page of indicator values matching the filter.
     *
     * # Arguments
     * `connection`: The database connection.
     * `pagination_input`: Skip and limit.
     * `filter`: Optional enterprise, indicator and inclusive date range.
     */
    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_indicator_value_list(&self, connection: &mut PgConnection, pagination_input: PaginationInput, filter: &IndicatorValuesFilter) -> Result<Vec<IndicatorValueType>, ApplicationError> {
        let span = tracing::Span::current();
        let results: Vec<QueryIndicatorValueDbResp> = sqlx::query_as(QUERY_INDICATOR_VALUE_LIST)
            .bind(filter.enterprise_id)
            .bind(filter.indicator_id)
            .bind(filter.from_date)
            .bind(filter.to_date)
            .bind(pagination_input.limit)
            .bind(pagination_input.skip)
            .fetch_all(connection)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        Ok(results.into_iter().map(IndicatorValueType::from).collect())
    }

    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_indicator_value(&self, connection: &mut PgConnection, indicator_value_id: i64) -> Result<Option<IndicatorValueType>, ApplicationError> {
        let span = tracing::Span::current();
        let result: Option<QueryIndicatorValueDbResp> = sqlx::query_as(QUERY_INDICATOR_VALUE)
            .bind(indicator_value_id)
            .fetch_optional(connection)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        Ok(result.map(IndicatorValueType::from))
    }

    /**
     * Checks whether a value with exactly the same enterprise, indicator, date, value and currency is stored.
     */
    #[instrument(skip(self, connection), fields(result))]
    pub async fn indicator_value_exists(&self, connection: &mut PgConnection, input: &IndicatorValueInputType) -> Result<bool, ApplicationError> {
        let span = tracing::Span::current();
        let result: (bool,) = sqlx::query_as(QUERY_INDICATOR_VALUE_EXISTS)
            .bind(input.enterprise_id)
            .bind(input.indicator_id)
            .bind(input.value_date)
            .bind(input.value)
            .bind(&input.currency_code)
            .fetch_one(connection)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        Ok(result.0)
    }

    #[instrument(skip(self, transaction), fields(result))]
    pub async fn add_indicator_value(&self, transaction: &mut PgConnection, input: IndicatorValueInputType) -> Result<IndicatorValueType, ApplicationError> {
        let span = tracing::Span::current();
        let result: QueryIndicatorValueDbResp = sqlx::query_as(ADD_INDICATOR_VALUE)
            .bind(input.enterprise_id)
            .bind(input.indicator_id)
            .bind(input.value_date)
            .bind(input.value)
            .bind(input.currency_code)
            .fetch_one(transaction)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        Ok(IndicatorValueType::from(result))
    }

    #[instrument(skip(self, transaction), fields(result))]
    pub async fn update_indicator_value(&self, transaction: &mut PgConnection, indicator_value: &IndicatorValueType) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        let result = sqlx::query(UPDATE_INDICATOR_VALUE)
            .bind(indicator_value.enterprise_id)
            .bind(indicator_value.indicator_id)
            .bind(indicator_value.value_date)
            .bind(indicator_value.value)
            .bind(&indicator_value.currency_code)
            .bind(indicator_value.id)
            .execute(transaction)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        expect_single_row(&result, "Indicator value", "updated")
    }

    #[instrument(skip(self, transaction), fields(result))]
    pub async fn delete_indicator_value(&self, transaction: &mut PgConnection, indicator_value_id: i64) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        let result = sqlx::query(DELETE_INDICATOR_VALUE)
            .bind(indicator_value_id)
            .execute(transaction)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        expect_single_row(&result, "Indicator value", "deleted")
    }

    /**
     * Retrieves the values of one enterprise joined with indicator name and importance.
     *
     * # Arguments
     * `connection`: The database connection.
     * `enterprise_id`: The enterprise the values belong to.
     * `filter`: Optional indicator and inclusive date range.
     * `pagination_input`: Skip and limit, or `None` to return every matching row.
     */
    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_weighted_sources(
        &self,
        connection: &mut PgConnection,
        enterprise_id: i64,
        filter: &IndicatorValuesFilter,
        pagination_input: Option<PaginationInput>,
    ) -> Result<Vec<WeightedSourceType>, ApplicationError> {
        let span = tracing::Span::current();
        let results: Vec<QueryWeightedSourceDbResp> = sqlx::query_as(QUERY_WEIGHTED_SOURCES)
            .bind(enterprise_id)
            .bind(filter.indicator_id)
            .bind(filter.from_date)
            .bind(filter.to_date)
            .bind(pagination_input.map(|pagination| pagination.limit))
            .bind(pagination_input.map(|pagination| pagination.skip))
            .fetch_all(connection)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        Ok(results.into_iter().map(WeightedSourceType::from).collect())
    }
}
