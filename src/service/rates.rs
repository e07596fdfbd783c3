use sqlx::{Pool, Postgres};
use tracing::instrument;

use crate::{
    dao::{common::not_found, exchange_rate::ExchangeRateDao},
    model::{
        apperror::ApplicationError,
        models::{ExchangeRateInputType, ExchangeRateType, PaginationInput},
    },
    service::common::{acquire, begin, finish, require_pool},
};

/**
 * Service for manually maintained exchange rates.
 */
pub struct ExchangeRateService {
    exchange_rate_dao: ExchangeRateDao,
    /**
     * Optional for test purposes until we have a better way to mock the database.
     */
    connection_pool: Option<Pool<Postgres>>,
}

impl ExchangeRateService {
    pub fn new(exchange_rate_dao: ExchangeRateDao, connection_pool: Option<Pool<Postgres>>) -> Self {
        ExchangeRateService { exchange_rate_dao, connection_pool }
    }

    #[instrument(skip(self), fields(result))]
    pub async fn get_exchange_rate_list(&self, pagination_input: PaginationInput) -> Result<Vec<ExchangeRateType>, ApplicationError> {
        let connection_pool = require_pool(&self.connection_pool)?;
        let mut connection = acquire(connection_pool).await?;
        self.exchange_rate_dao.get_exchange_rate_list(&mut connection, pagination_input).await
    }

    /**
     * Stores a rate. A second rate for the same pair and date is rejected by the unique constraint.
     */
    #[instrument(skip(self), fields(result))]
    pub async fn add_exchange_rate(&self, exchange_rate_input: ExchangeRateInputType) -> Result<ExchangeRateType, ApplicationError> {
        let connection_pool = require_pool(&self.connection_pool)?;
        let mut transaction = begin(connection_pool).await?;
        let result = self.exchange_rate_dao.add_exchange_rate(&mut transaction, exchange_rate_input).await;
        finish(transaction, result).await
    }

    #[instrument(skip(self), fields(result))]
    pub async fn update_exchange_rate(&self, exchange_rate_id: i64, exchange_rate_input: ExchangeRateInputType) -> Result<ExchangeRateType, ApplicationError> {
        let connection_pool = require_pool(&self.connection_pool)?;
        let mut transaction = begin(connection_pool).await?;
        let result: Result<ExchangeRateType, ApplicationError> = async {
            let Some(stored) = self.exchange_rate_dao.get_exchange_rate(&mut transaction, exchange_rate_id).await? else {
                return Err(not_found("Exchange rate"));
            };
            let exchange_rate = stored.merge(exchange_rate_input);
            self.exchange_rate_dao.update_exchange_rate(&mut transaction, &exchange_rate).await?;
            Ok(exchange_rate)
        }
        .await;
        finish(transaction, result).await
    }

    #[instrument(skip(self), fields(result))]
    pub async fn delete_exchange_rate(&self, exchange_rate_id: i64) -> Result<(), ApplicationError> {
        let connection_pool = require_pool(&self.connection_pool)?;
        let mut transaction = begin(connection_pool).await?;
        let result = self.exchange_rate_dao.delete_exchange_rate(&mut transaction, exchange_rate_id).await;
        finish(transaction, result).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::apperror::ErrorType;

    #[tokio::test]
    async fn test_without_database() {
        let service = ExchangeRateService::new(ExchangeRateDao::new(), None);
        let result = service.delete_exchange_rate(1).await;
        assert_eq!(result.unwrap_err().error_type, ErrorType::DatabaseError);
    }
}
