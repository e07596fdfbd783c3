use sqlx::{PgConnection, Pool, Postgres};
use tracing::{Instrument, instrument};

use crate::{
    dao::{common::not_found, currency::CurrencyDao, enterprise::EnterpriseDao, exchange_rate::ExchangeRateDao, indicator::IndicatorDao, indicator_value::IndicatorValueDao},
    model::{
        apperror::{ApplicationError, ErrorType},
        models::{ConvertedIndicatorValueType, IndicatorValueInputType, IndicatorValueType, IndicatorValuesFilter, PaginationInput},
    },
    service::{
        common::{acquire, begin, finish, require_pool},
        conversion::{RateTable, RateTableRequest, convert},
    },
};

/**
 * Service for indicator values.
 */
pub struct IndicatorValueService {
    indicator_value_dao: IndicatorValueDao,
    exchange_rate_dao: ExchangeRateDao,
    enterprise_dao: EnterpriseDao,
    indicator_dao: IndicatorDao,
    currency_dao: CurrencyDao,
    /**
     * Optional for test purposes until we have a better way to mock the database.
     */
    connection_pool: Option<Pool<Postgres>>,
}

impl IndicatorValueService {
    pub fn new(
        indicator_value_dao: IndicatorValueDao,
        exchange_rate_dao: ExchangeRateDao,
        enterprise_dao: EnterpriseDao,
        indicator_dao: IndicatorDao,
        currency_dao: CurrencyDao,
        connection_pool: Option<Pool<Postgres>>,
    ) -> Self {
        IndicatorValueService { indicator_value_dao, exchange_rate_dao, enterprise_dao, indicator_dao, currency_dao, connection_pool }
    }

    /**
     * Lists indicator values, each converted into the target currency.
     *
     * # Arguments
     * `pagination_input`: Skip and limit.
     * `filter`: Optional enterprise, indicator and inclusive date range.
     * `target_currency`: Currency to convert into.
     *
     * # Returns
     * The values with their converted amount, or a warning where no rate exists.
     */
    #[instrument(skip(self), fields(result))]
    pub async fn get_indicator_value_list(&self, pagination_input: PaginationInput, filter: IndicatorValuesFilter, target_currency: &str) -> Result<Vec<ConvertedIndicatorValueType>, ApplicationError> {
        let span = tracing::Span::current();
        let connection_pool = require_pool(&self.connection_pool)?;
        let mut connection = acquire(connection_pool).await?;
        let indicator_values = self.indicator_value_dao.get_indicator_value_list(&mut connection, pagination_input, &filter).instrument(span.clone()).await?;
        let mut rate_table_request = RateTableRequest::new(target_currency);
        for indicator_value in &indicator_values {
            rate_table_request.add(&indicator_value.currency_code, indicator_value.value_date);
        }
        let rate_table = self.exchange_rate_dao.get_rate_table(&mut connection, &rate_table_request).instrument(span).await?;
        Ok(convert_values(indicator_values, target_currency, &rate_table))
    }

    /**
     * Stores a value after checking its enterprise, indicator and currency exist and that an identical value is not stored.
     */
    #[instrument(skip(self), fields(result))]
    pub async fn add_indicator_value(&self, indicator_value_input: IndicatorValueInputType) -> Result<IndicatorValueType, ApplicationError> {
        let connection_pool = require_pool(&self.connection_pool)?;
        let mut transaction = begin(connection_pool).await?;
        let result: Result<IndicatorValueType, ApplicationError> = async {
            self.check_references(&mut transaction, &indicator_value_input).await?;
            if self.indicator_value_dao.indicator_value_exists(&mut transaction, &indicator_value_input).await? {
                return Err(ApplicationError::new(ErrorType::Validation, "Indicator value already exists".to_string()));
            }
            self.indicator_value_dao.add_indicator_value(&mut transaction, indicator_value_input).await
        }
        .await;
        finish(transaction, result).await
    }

    #[instrument(skip(self), fields(result))]
    pub async fn update_indicator_value(&self, indicator_value_id: i64, indicator_value_input: IndicatorValueInputType) -> Result<IndicatorValueType, ApplicationError> {
        let connection_pool = require_pool(&self.connection_pool)?;
        let mut transaction = begin(connection_pool).await?;
        let result: Result<IndicatorValueType, ApplicationError> = async {
            let Some(stored) = self.indicator_value_dao.get_indicator_value(&mut transaction, indicator_value_id).await? else {
                return Err(not_found("Indicator value"));
            };
            self.check_references(&mut transaction, &indicator_value_input).await?;
            let indicator_value = stored.merge(indicator_value_input);
            self.indicator_value_dao.update_indicator_value(&mut transaction, &indicator_value).await?;
            Ok(indicator_value)
        }
        .await;
        finish(transaction, result).await
    }

    #[instrument(skip(self), fields(result))]
    pub async fn delete_indicator_value(&self, indicator_value_id: i64) -> Result<(), ApplicationError> {
        let connection_pool = require_pool(&self.connection_pool)?;
        let mut transaction = begin(connection_pool).await?;
        let result = self.indicator_value_dao.delete_indicator_value(&mut transaction, indicator_value_id).await;
        finish(transaction, result).await
    }

    async fn check_references(&self, connection: &mut PgConnection, indicator_value_input: &IndicatorValueInputType) -> Result<(), ApplicationError> {
        if self.enterprise_dao.get_enterprise(connection, indicator_value_input.enterprise_id).await?.is_none() {
            return Err(ApplicationError::new(ErrorType::Validation, "Enterprise not found".to_string()));
        }
        if self.indicator_dao.get_indicator(connection, indicator_value_input.indicator_id).await?.is_none() {
            return Err(ApplicationError::new(ErrorType::Validation, "Indicator not found".to_string()));
        }
        if self.currency_dao.get_currency(connection, &indicator_value_input.currency_code).await?.is_none() {
            return Err(ApplicationError::new(ErrorType::Validation, "Currency not found".to_string()));
        }
        Ok(())
    }
}

/**
 * Converts each value into the target currency.
 */
pub fn convert_values(indicator_values: Vec<IndicatorValueType>, target_currency: &str, rate_table: &RateTable) -> Vec<ConvertedIndicatorValueType> {
    indicator_values
        .into_iter()
        .map(|indicator_value| {
            let conversion = convert(indicator_value.value, &indicator_value.currency_code, indicator_value.value_date, target_currency, rate_table);
            ConvertedIndicatorValueType { indicator_value, converted_value: conversion.value, warning: conversion.warning }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use super::*;

    fn indicator_value(id: i64, value_date: NaiveDate, currency_code: &str) -> IndicatorValueType {
        IndicatorValueType { id, enterprise_id: 1, indicator_id: 1, value_date, value: dec!(12.345), currency_code: currency_code.to_string() }
    }

    #[test]
    fn test_convert_values() {
        let value_date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let rate_table = RateTable::from_rows(vec![("USD".to_string(), value_date, dec!(90))]);
        let converted = convert_values(vec![indicator_value(1, value_date, "USD"), indicator_value(2, value_date, "RUB"), indicator_value(3, value_date, "EUR")], "RUB", &rate_table);
        assert_eq!(converted[0].converted_value, Some(dec!(1111.05)));
        assert_eq!(converted[1].converted_value, Some(dec!(12.345)));
        assert!(converted[1].warning.is_none());
        assert!(converted[2].converted_value.is_none());
        assert_eq!(converted[2].warning.as_deref(), Some("No exchange rate found for EUR to RUB on 2025-03-01"));
    }

    #[tokio::test]
    async fn test_without_database() {
        let service = IndicatorValueService::new(IndicatorValueDao::new(), ExchangeRateDao::new(), EnterpriseDao::new(), IndicatorDao::new(), CurrencyDao::new(), None);
        let result = service.get_indicator_value_list(PaginationInput::new(None, None), IndicatorValuesFilter::default(), "RUB").await;
        assert_eq!(result.unwrap_err().error_type, ErrorType::DatabaseError);
    }
}

#[cfg(feature = "integration-test")]
#[cfg(test)]
mod integration_test {
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::dao::test_db::init_db;

    #[sqlx::test]
    async fn test_add_value_for_missing_enterprise() {
        let pool = init_db().await;
        let service = IndicatorValueService::new(IndicatorValueDao::new(), ExchangeRateDao::new(), EnterpriseDao::new(), IndicatorDao::new(), CurrencyDao::new(), Some(pool));
        let input = IndicatorValueInputType { enterprise_id: i64::MAX, indicator_id: 1, value_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(), value: dec!(1), currency_code: "RUB".to_string() };
        let err = service.add_indicator_value(input).await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::Validation);
        assert_eq!(err.message, "Enterprise not found");
    }
}
