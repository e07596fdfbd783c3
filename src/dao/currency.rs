use sqlx::PgConnection;
use tracing::{Instrument, instrument};

use crate::{
    dao::common::{expect_single_row, handle_database_error},
    model::{
        apperror::ApplicationError,
        models::{CurrencyType, PaginationInput},
    },
};

/**
 * Database response type for currency queries.
 */
pub type QueryCurrencyDbResp = (String, String);

const QUERY_CURRENCY_LIST: &str = "SELECT code, name FROM currencies ORDER BY code LIMIT $1 OFFSET $2";

const QUERY_CURRENCY: &str = "SELECT code, name FROM currencies WHERE code = $1";

const ADD_CURRENCY: &str = "INSERT INTO currencies (code, name) VALUES ($1, $2) RETURNING code, name";

const UPDATE_CURRENCY: &str = "UPDATE currencies SET code = $1, name = $2 WHERE code = $3";

const DELETE_CURRENCY: &str = "DELETE FROM currencies WHERE code = $1";

/**
 * DAO for currencies. Currencies are keyed by their code.
 */
pub struct CurrencyDao {}

impl CurrencyDao {
    pub fn new() -> Self {
        CurrencyDao {}
    }

    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_currency_list(&self, connection: &mut PgConnection, pagination_input: PaginationInput) -> Result<Vec<CurrencyType>, ApplicationError> {
        let span = tracing::Span::current();
        let results: Vec<QueryCurrencyDbResp> = sqlx::query_as(QUERY_CURRENCY_LIST)
            .bind(pagination_input.limit)
            .bind(pagination_input.skip)
            .fetch_all(connection)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        Ok(results.into_iter().map(CurrencyType::from).collect())
    }

    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_currency(&self, connection: &mut PgConnection, code: &str) -> Result<Option<CurrencyType>, ApplicationError> {
        let span = tracing::Span::current();
        let result: Option<QueryCurrencyDbResp> = sqlx::query_as(QUERY_CURRENCY)
            .bind(code)
            .fetch_optional(connection)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        Ok(result.map(CurrencyType::from))
    }

    #[instrument(skip(self, transaction), fields(result))]
    pub async fn add_currency(&self, transaction: &mut PgConnection, currency: CurrencyType) -> Result<CurrencyType, ApplicationError> {
        let span = tracing::Span::current();
        let result: QueryCurrencyDbResp = sqlx::query_as(ADD_CURRENCY)
            .bind(currency.code)
            .bind(currency.name)
            .fetch_one(transaction)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        Ok(CurrencyType::from(result))
    }

    /**
     * Replaces the currency stored under `code`. The code itself may change.
     */
    #[instrument(skip(self, transaction), fields(result))]
    pub async fn update_currency(&self, transaction: &mut PgConnection, code: &str, currency: &CurrencyType) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        let result = sqlx::query(UPDATE_CURRENCY)
            .bind(&currency.code)
            .bind(&currency.name)
            .bind(code)
            .execute(transaction)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        expect_single_row(&result, "Currency", "updated")
    }

    #[instrument(skip(self, transaction), fields(result))]
    pub async fn delete_currency(&self, transaction: &mut PgConnection, code: &str) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        let result = sqlx::query(DELETE_CURRENCY)
            .bind(code)
            .execute(transaction)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        expect_single_row(&result, "Currency", "deleted")
    }
}

#[cfg(feature = "integration-test")]
#[cfg(test)]
mod integration_test {
    use super::*;
    use crate::dao::test_db::init_db;

    #[sqlx::test]
    async fn test_seeded_currencies_exist() {
        let pool = init_db().await;
        let mut connection = pool.acquire().await.unwrap();
        let currency_dao = CurrencyDao::new();
        for code in ["RUB", "USD", "EUR"] {
            assert!(currency_dao.get_currency(&mut connection, code).await.unwrap().is_some());
        }
    }

    #[sqlx::test]
    async fn test_add_duplicate_currency() {
        let pool = init_db().await;
        let mut transaction = pool.begin().await.unwrap();
        let result = CurrencyDao::new().add_currency(&mut transaction, CurrencyType { code: "USD".to_string(), name: "US Dollar".to_string() }).await;
        assert_eq!(result.unwrap_err().error_type, crate::model::apperror::ErrorType::ConstraintViolation);
        transaction.rollback().await.unwrap();
    }
}
