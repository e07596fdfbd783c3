use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use sqlx::{Pool, Postgres};
use tracing::{Instrument, instrument};

use crate::{
    dao::{exchange_rate::ExchangeRateDao, indicator_value::IndicatorValueDao},
    model::{
        apperror::{ApplicationError, ErrorType},
        models::{PeriodGrouping, ReportMode, WeightedAggregateType, WeightedGroupType, WeightedIndicatorType, WeightedReportInputType, WeightedReportOutputType, WeightedSourceType},
    },
    service::conversion::{RateTable, RateTableRequest, convert, round_money, weighted_value},
};

/**
 * Warning attached to totals that lack at least one rate.
 */
pub const MISSING_RATES_WARNING: &str = "No exchange rate found for some values";

/**
 * Service producing the weighted indicator report.
 */
pub struct ReportService {
    indicator_value_dao: IndicatorValueDao,
    exchange_rate_dao: ExchangeRateDao,
    /**
     * Optional for test purposes until we have a better way to mock the database.
     */
    connection_pool: Option<Pool<Postgres>>,
}

impl ReportService {
    pub fn new(indicator_value_dao: IndicatorValueDao, exchange_rate_dao: ExchangeRateDao, connection_pool: Option<Pool<Postgres>>) -> Self {
        ReportService { indicator_value_dao, exchange_rate_dao, connection_pool }
    }

    /**
     * Builds the weighted report for one enterprise.
     *
     * # Arguments
     * `enterprise_id`: The enterprise to report on.
     * `report_input`: Filters, target currency and report mode.
     *
     * # Returns
     * One record per value, a single aggregate, or one total per period depending on the mode.
     */
    #[instrument(skip(self), fields(result))]
    pub async fn get_weighted_report(&self, enterprise_id: i64, report_input: WeightedReportInputType) -> Result<WeightedReportOutputType, ApplicationError> {
        let span = tracing::Span::current();
        let Some(connection_pool) = &self.connection_pool else {
            return Err(ApplicationError::new(ErrorType::DatabaseError, "No database connection available".to_string()));
        };
        let mut connection = connection_pool.acquire().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to acquire connection: {err}")))?;
        let pagination_input = match report_input.mode {
            ReportMode::List(pagination_input) => Some(pagination_input),
            ReportMode::Aggregate | ReportMode::GroupBy(_) => None,
        };
        let sources = self
            .indicator_value_dao
            .get_weighted_sources(&mut connection, enterprise_id, &report_input.filter, pagination_input)
            .instrument(span.clone())
            .await?;
        let mut rate_table_request = RateTableRequest::new(&report_input.target_currency);
        for source in &sources {
            rate_table_request.add(&source.currency_code, source.value_date);
        }
        let rate_table = self.exchange_rate_dao.get_rate_table(&mut connection, &rate_table_request).instrument(span).await?;
        Ok(build_report(&sources, &report_input.target_currency, &rate_table, report_input.mode))
    }
}

/**
 * Applies the report mode to already loaded values.
 */
pub fn build_report(sources: &[WeightedSourceType], target_currency: &str, rate_table: &RateTable, mode: ReportMode) -> WeightedReportOutputType {
    match mode {
        ReportMode::GroupBy(grouping) => WeightedReportOutputType::Groups(group_by_period(sources, grouping, target_currency, rate_table)),
        ReportMode::Aggregate => WeightedReportOutputType::Aggregate(aggregate(sources, target_currency, rate_table)),
        ReportMode::List(_) => WeightedReportOutputType::List(weighted_list(sources, target_currency, rate_table)),
    }
}

/**
 * Weighs and converts every value independently.
 */
pub fn weighted_list(sources: &[WeightedSourceType], target_currency: &str, rate_table: &RateTable) -> Vec<WeightedIndicatorType> {
    sources
        .iter()
        .map(|source| {
            let weighted = weighted_value(source.value, source.importance);
            let conversion = convert(weighted, &source.currency_code, source.value_date, target_currency, rate_table);
            WeightedIndicatorType {
                indicator_id: source.indicator_id,
                indicator_name: source.indicator_name.clone(),
                value_date: source.value_date,
                original_value: source.value,
                currency_code: source.currency_code.clone(),
                importance: source.importance,
                weighted_value: weighted,
                converted_weighted_value: conversion.value.map(round_money),
                warning: conversion.warning,
            }
        })
        .collect()
}

/**
 * Sums the converted weighted values. Each converted value is rounded before it is added.
 *
 * The first value without a rate discards the total and stops the summation.
 */
pub fn aggregate(sources: &[WeightedSourceType], target_currency: &str, rate_table: &RateTable) -> WeightedAggregateType {
    let mut total = Decimal::ZERO;
    for source in sources {
        let weighted = weighted_value(source.value, source.importance);
        match convert(weighted, &source.currency_code, source.value_date, target_currency, rate_table).value {
            Some(converted) => total += converted,
            None => {
                tracing::debug!("Aggregate discarded, no rate for {} on {}", source.currency_code, source.value_date);
                return WeightedAggregateType { total_weighted_value: None, warning: Some(MISSING_RATES_WARNING.to_string()) };
            }
        }
    }
    WeightedAggregateType { total_weighted_value: Some(total), warning: None }
}

/**
 * Sums converted weighted values per period, sorted by period key.
 *
 * A period with at least one value lacking a rate has no total and carries a warning. Other periods are not affected.
 */
pub fn group_by_period(sources: &[WeightedSourceType], grouping: PeriodGrouping, target_currency: &str, rate_table: &RateTable) -> Vec<WeightedGroupType> {
    let mut totals: BTreeMap<String, Option<Decimal>> = BTreeMap::new();
    for source in sources {
        let weighted = weighted_value(source.value, source.importance);
        let converted = convert(weighted, &source.currency_code, source.value_date, target_currency, rate_table).value;
        let total = totals.entry(period_key(source.value_date, grouping)).or_insert(Some(Decimal::ZERO));
        *total = match (*total, converted) {
            (Some(sum), Some(converted)) => Some(sum + converted),
            _ => None,
        };
    }
    totals
        .into_iter()
        .map(|(period, total)| match total {
            Some(total) => WeightedGroupType { period, total_weighted_value: Some(round_money(total)), warning: None },
            None => WeightedGroupType { period, total_weighted_value: None, warning: Some(MISSING_RATES_WARNING.to_string()) },
        })
        .collect()
}

/**
 * Period key of a date, `YYYY-MM` for months and `YYYY-Qn` for quarters.
 */
pub fn period_key(date: NaiveDate, grouping: PeriodGrouping) -> String {
    match grouping {
        PeriodGrouping::Month => date.format("%Y-%m").to_string(),
        PeriodGrouping::Quarter => format!("{}-Q{}", date.year(), date.month0() / 3 + 1),
    }
}
