use rust_decimal::Decimal;
use sqlx::PgConnection;
use tracing::{Instrument, instrument};

use crate::{
    dao::common::{expect_single_row, handle_database_error},
    model::{
        apperror::ApplicationError,
        models::{IndicatorInputType, IndicatorType, PaginationInput},
    },
};

/**
 * Database response type for indicator queries.
 */
pub type QueryIndicatorDbResp = (i64, String, Decimal, String);

const QUERY_INDICATOR_LIST: &str = "SELECT id, name, importance, unit FROM indicators ORDER BY id LIMIT $1 OFFSET $2";

const QUERY_INDICATOR: &str = "SELECT id, name, importance, unit FROM indicators WHERE id = $1";

const ADD_INDICATOR: &str = "INSERT INTO indicators (name, importance, unit) VALUES ($1, $2, $3) RETURNING id, name, importance, unit";

const UPDATE_INDICATOR: &str = "UPDATE indicators SET name = $1, importance = $2, unit = $3 WHERE id = $4";

const DELETE_INDICATOR: &str = "DELETE FROM indicators WHERE id = $1";

/**
 * DAO for indicators.
 */
pub struct IndicatorDao {}

impl IndicatorDao {
    pub fn new() -> Self {
        IndicatorDao {}
    }

    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_indicator_list(&self, connection: &mut PgConnection, pagination_input: PaginationInput) -> Result<Vec<IndicatorType>, ApplicationError> {
        let span = tracing::Span::current();
        let results: Vec<QueryIndicatorDbResp> = sqlx::query_as(QUERY_INDICATOR_LIST)
            .bind(pagination_input.limit)
            .bind(pagination_input.skip)
            .fetch_all(connection)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        Ok(results.into_iter().map(IndicatorType::from).collect())
    }

    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_indicator(&self, connection: &mut PgConnection, indicator_id: i64) -> Result<Option<IndicatorType>, ApplicationError> {
        let span = tracing::Span::current();
        let result: Option<QueryIndicatorDbResp> = sqlx::query_as(QUERY_INDICATOR)
            .bind(indicator_id)
            .fetch_optional(connection)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        Ok(result.map(IndicatorType::from))
    }

    /**
     * Adds a new indicator.
     *
     * # Returns
     * The stored indicator including its generated id.
     */
    #[instrument(skip(self, transaction), fields(result))]
    pub async fn add_indicator(&self, transaction: &mut PgConnection, indicator_input: IndicatorInputType) -> Result<IndicatorType, ApplicationError> {
        let span = tracing::Span::current();
        let result: QueryIndicatorDbResp = sqlx::query_as(ADD_INDICATOR)
            .bind(indicator_input.name)
            .bind(indicator_input.importance)
            .bind(indicator_input.unit)
            .fetch_one(transaction)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        Ok(IndicatorType::from(result))
    }

    #[instrument(skip(self, transaction), fields(result))]
    pub async fn update_indicator(&self, transaction: &mut PgConnection, indicator: &IndicatorType) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        let result = sqlx::query(UPDATE_INDICATOR)
            .bind(&indicator.name)
            .bind(indicator.importance)
            .bind(&indicator.unit)
            .bind(indicator.id)
            .execute(transaction)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        expect_single_row(&result, "Indicator", "updated")
    }

    #[instrument(skip(self, transaction), fields(result))]
    pub async fn delete_indicator(&self, transaction: &mut PgConnection, indicator_id: i64) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        let result = sqlx::query(DELETE_INDICATOR)
            .bind(indicator_id)
            .execute(transaction)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        expect_single_row(&result, "Indicator", "deleted")
    }
}

#[cfg(feature = "integration-test")]
#[cfg(test)]
mod integration_test {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::dao::test_db::init_db;

    #[sqlx::test]
    async fn test_add_update_then_delete_indicator() {
        let pool = init_db().await;
        let mut transaction = pool.begin().await.unwrap();
        let indicator_dao = IndicatorDao::new();
        let stored = indicator_dao.add_indicator(&mut transaction, IndicatorInputType { name: "Revenue".to_string(), importance: dec!(0.5), unit: "money".to_string() }).await.unwrap();
        assert_eq!(stored.importance, dec!(0.5));

        let heavier = IndicatorType { importance: dec!(0.75), ..stored.clone() };
        assert!(indicator_dao.update_indicator(&mut transaction, &heavier).await.is_ok());
        assert_eq!(indicator_dao.get_indicator(&mut transaction, stored.id).await.unwrap().unwrap().importance, dec!(0.75));

        assert!(indicator_dao.delete_indicator(&mut transaction, stored.id).await.is_ok());
        transaction.rollback().await.unwrap();
    }
}
