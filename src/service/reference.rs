use sqlx::{Pool, Postgres};
use tracing::instrument;

use crate::{
    dao::{common::not_found, currency::CurrencyDao, enterprise::EnterpriseDao, indicator::IndicatorDao},
    model::{
        apperror::ApplicationError,
        models::{CurrencyType, EnterpriseInputType, EnterpriseType, IndicatorInputType, IndicatorType, PaginationInput},
    },
    service::common::{acquire, begin, finish, require_pool},
};

/**
 * Service managing enterprises, indicators and currencies.
 */
pub struct ReferenceDataService {
    enterprise_dao: EnterpriseDao,
    indicator_dao: IndicatorDao,
    currency_dao: CurrencyDao,
    /**
     * Optional for test purposes until we have a better way to mock the database.
     */
    connection_pool: Option<Pool<Postgres>>,
}

impl ReferenceDataService {
    pub fn new(enterprise_dao: EnterpriseDao, indicator_dao: IndicatorDao, currency_dao: CurrencyDao, connection_pool: Option<Pool<Postgres>>) -> Self {
        ReferenceDataService { enterprise_dao, indicator_dao, currency_dao, connection_pool }
    }

    /***************** Enterprises *********************/

    #[instrument(skip(self), fields(result))]
    pub async fn get_enterprise_list(&self, pagination_input: PaginationInput) -> Result<Vec<EnterpriseType>, ApplicationError> {
        let connection_pool = require_pool(&self.connection_pool)?;
        let mut connection = acquire(connection_pool).await?;
        self.enterprise_dao.get_enterprise_list(&mut connection, pagination_input).await
    }

    #[instrument(skip(self), fields(result))]
    pub async fn add_enterprise(&self, enterprise_input: EnterpriseInputType) -> Result<EnterpriseType, ApplicationError> {
        let connection_pool = require_pool(&self.connection_pool)?;
        let mut transaction = begin(connection_pool).await?;
        let result = self.enterprise_dao.add_enterprise(&mut transaction, enterprise_input).await;
        finish(transaction, result).await
    }

    /**
     * Replaces the fields of a stored enterprise.
     *
     * # Arguments
     * `enterprise_id`: Id of the enterprise.
     * `enterprise_input`: New field values.
     *
     * # Returns
     * The updated enterprise, or `NotFound` if it does not exist.
     */
    #[instrument(skip(self), fields(result))]
    pub async fn update_enterprise(&self, enterprise_id: i64, enterprise_input: EnterpriseInputType) -> Result<EnterpriseType, ApplicationError> {
        let connection_pool = require_pool(&self.connection_pool)?;
        let mut transaction = begin(connection_pool).await?;
        let result: Result<EnterpriseType, ApplicationError> = async {
            let Some(stored) = self.enterprise_dao.get_enterprise(&mut transaction, enterprise_id).await? else {
                return Err(not_found("Enterprise"));
            };
            let enterprise = stored.merge(enterprise_input);
            self.enterprise_dao.update_enterprise(&mut transaction, &enterprise).await?;
            Ok(enterprise)
        }
        .await;
        finish(transaction, result).await
    }

    #[instrument(skip(self), fields(result))]
    pub async fn delete_enterprise(&self, enterprise_id: i64) -> Result<(), ApplicationError> {
        let connection_pool = require_pool(&self.connection_pool)?;
        let mut transaction = begin(connection_pool).await?;
        let result = self.enterprise_dao.delete_enterprise(&mut transaction, enterprise_id).await;
        finish(transaction, result).await
    }

    /***************** Indicators *********************/

    #[instrument(skip(self), fields(result))]
    pub async fn get_indicator_list(&self, pagination_input: PaginationInput) -> Result<Vec<IndicatorType>, ApplicationError> {
        let connection_pool = require_pool(&self.connection_pool)?;
        let mut connection = acquire(connection_pool).await?;
        self.indicator_dao.get_indicator_list(&mut connection, pagination_input).await
    }

    #[instrument(skip(self), fields(result))]
    pub async fn add_indicator(&self, indicator_input: IndicatorInputType) -> Result<IndicatorType, ApplicationError> {
        let connection_pool = require_pool(&self.connection_pool)?;
        let mut transaction = begin(connection_pool).await?;
        let result = self.indicator_dao.add_indicator(&mut transaction, indicator_input).await;
        finish(transaction, result).await
    }

    #[instrument(skip(self), fields(result))]
    pub async fn update_indicator(&self, indicator_id: i64, indicator_input: IndicatorInputType) -> Result<IndicatorType, ApplicationError> {
        let connection_pool = require_pool(&self.connection_pool)?;
        let mut transaction = begin(connection_pool).await?;
        let result: Result<IndicatorType, ApplicationError> = async {
            let Some(stored) = self.indicator_dao.get_indicator(&mut transaction, indicator_id).await? else {
                return Err(not_found("Indicator"));
            };
            let indicator = stored.merge(indicator_input);
            self.indicator_dao.update_indicator(&mut transaction, &indicator).await?;
            Ok(indicator)
        }
        .await;
        finish(transaction, result).await
    }

    #[instrument(skip(self), fields(result))]
    pub async fn delete_indicator(&self, indicator_id: i64) -> Result<(), ApplicationError> {
        let connection_pool = require_pool(&self.connection_pool)?;
        let mut transaction = begin(connection_pool).await?;
        let result = self.indicator_dao.delete_indicator(&mut transaction, indicator_id).await;
        finish(transaction, result).await
    }

    /***************** Currencies *********************/

    #[instrument(skip(self), fields(result))]
    pub async fn get_currency_list(&self, pagination_input: PaginationInput) -> Result<Vec<CurrencyType>, ApplicationError> {
        let connection_pool = require_pool(&self.connection_pool)?;
        let mut connection = acquire(connection_pool).await?;
        self.currency_dao.get_currency_list(&mut connection, pagination_input).await
    }

    #[instrument(skip(self), fields(result))]
    pub async fn add_currency(&self, currency: CurrencyType) -> Result<CurrencyType, ApplicationError> {
        let connection_pool = require_pool(&self.connection_pool)?;
        let mut transaction = begin(connection_pool).await?;
        let result = self.currency_dao.add_currency(&mut transaction, currency).await;
        finish(transaction, result).await
    }

    /**
     * Replaces a currency. Changing the code cascades to the rates and values referencing it.
     */
    #[instrument(skip(self), fields(result))]
    pub async fn update_currency(&self, code: &str, currency: CurrencyType) -> Result<CurrencyType, ApplicationError> {
        let connection_pool = require_pool(&self.connection_pool)?;
        let mut transaction = begin(connection_pool).await?;
        let result: Result<CurrencyType, ApplicationError> = async {
            if self.currency_dao.get_currency(&mut transaction, code).await?.is_none() {
                return Err(not_found("Currency"));
            }
            self.currency_dao.update_currency(&mut transaction, code, &currency).await?;
            Ok(currency)
        }
        .await;
        finish(transaction, result).await
    }

    #[instrument(skip(self), fields(result))]
    pub async fn delete_currency(&self, code: &str) -> Result<(), ApplicationError> {
        let connection_pool = require_pool(&self.connection_pool)?;
        let mut transaction = begin(connection_pool).await?;
        let result = self.currency_dao.delete_currency(&mut transaction, code).await;
        finish(transaction, result).await
    }
}

#[cfg(test)]
mod test {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::model::apperror::ErrorType;

    fn service() -> ReferenceDataService {
        ReferenceDataService::new(EnterpriseDao::new(), IndicatorDao::new(), CurrencyDao::new(), None)
    }

    #[tokio::test]
    async fn test_without_database() {
        let service = service();
        let result = service.get_enterprise_list(PaginationInput::new(None, None)).await;
        assert_eq!(result.unwrap_err().error_type, ErrorType::DatabaseError);
        let result = service.add_indicator(IndicatorInputType { name: "Revenue".to_string(), importance: dec!(0.5), unit: "money".to_string() }).await;
        assert_eq!(result.unwrap_err().error_type, ErrorType::DatabaseError);
        let result = service.delete_currency("USD").await;
        assert_eq!(result.unwrap_err().error_type, ErrorType::DatabaseError);
    }
}

#[cfg(feature = "integration-test")]
#[cfg(test)]
mod integration_test {
    use super::*;
    use crate::{dao::test_db::init_db, model::apperror::ErrorType};

    #[sqlx::test]
    async fn test_update_missing_enterprise() {
        let pool = init_db().await;
        let service = ReferenceDataService::new(EnterpriseDao::new(), IndicatorDao::new(), CurrencyDao::new(), Some(pool));
        let input = EnterpriseInputType { name: "Nobody".to_string(), requisites: "".to_string(), phone: "".to_string(), contact_person: "".to_string() };
        let err = service.update_enterprise(i64::MAX, input).await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::NotFound);
        assert_eq!(err.message, "Enterprise not found");
    }
}
