use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::model::apperror::{ApplicationError, ErrorType};

/**
 * Default number of elements returned by list operations.
 */
pub const DEFAULT_LIMIT: i64 = 100;

/**
 * Maximum number of elements a caller may request.
 */
pub const MAX_LIMIT: i64 = 1000;

/***************** Pagination *********************/

/**
 * Offset based pagination input.
 */
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaginationInput {
    /**
     * Number of elements to skip.
     */
    pub skip: i64,
    /**
     * Maximum number of elements to return.
     */
    pub limit: i64,
}

impl PaginationInput {
    pub fn new(skip: Option<i64>, limit: Option<i64>) -> Self {
        PaginationInput { skip: skip.unwrap_or(0), limit: limit.unwrap_or(DEFAULT_LIMIT) }
    }

    /**
     * Validates the pagination input.
     *
     * # Returns
     * The input if skip is not negative and limit is between 1 and `MAX_LIMIT`.
     */
    pub fn validate(self) -> Result<Self, ApplicationError> {
        if self.skip < 0 {
            return Err(ApplicationError::new(ErrorType::Validation, "skip must be greater than or equal to 0".to_string()));
        }
        if self.limit < 1 || self.limit > MAX_LIMIT {
            return Err(ApplicationError::new(ErrorType::Validation, format!("limit must be between 1 and {MAX_LIMIT}")));
        }
        Ok(self)
    }
}

/***************** Enterprises *********************/

/**
 * A stored enterprise.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct EnterpriseType {
    pub id: i64,
    pub name: String,
    pub requisites: String,
    pub phone: String,
    pub contact_person: String,
}

impl From<(i64, String, String, String, String)> for EnterpriseType {
    fn from(row: (i64, String, String, String, String)) -> Self {
        EnterpriseType { id: row.0, name: row.1, requisites: row.2, phone: row.3, contact_person: row.4 }
    }
}

/**
 * Input for creating or replacing an enterprise.
 */
#[derive(Debug, Clone)]
pub struct EnterpriseInputType {
    pub name: String,
    pub requisites: String,
    pub phone: String,
    pub contact_person: String,
}

impl EnterpriseInputType {
    pub fn validate(self) -> Result<Self, ApplicationError> {
        if self.name.trim().is_empty() {
            return Err(ApplicationError::new(ErrorType::Validation, "Enterprise name must not be empty".to_string()));
        }
        Ok(self)
    }
}

impl EnterpriseType {
    /**
     * Applies the input onto the stored enterprise field by field.
     */
    pub fn merge(self, input: EnterpriseInputType) -> Self {
        EnterpriseType { id: self.id, name: input.name, requisites: input.requisites, phone: input.phone, contact_person: input.contact_person }
    }
}

/***************** Indicators *********************/

/**
 * A stored indicator with its importance weight.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorType {
    pub id: i64,
    pub name: String,
    pub importance: Decimal,
    pub unit: String,
}

impl From<(i64, String, Decimal, String)> for IndicatorType {
    fn from(row: (i64, String, Decimal, String)) -> Self {
        IndicatorType { id: row.0, name: row.1, importance: row.2, unit: row.3 }
    }
}

impl IndicatorType {
    /**
     * Applies the input onto the stored indicator field by field.
     */
    pub fn merge(self, input: IndicatorInputType) -> Self {
        IndicatorType { id: self.id, name: input.name, importance: input.importance, unit: input.unit }
    }
}

/**
 * Input for creating or replacing an indicator.
 */
#[derive(Debug, Clone)]
pub struct IndicatorInputType {
    pub name: String,
    pub importance: Decimal,
    pub unit: String,
}

impl IndicatorInputType {
    /**
     * Validates the indicator input. Importance must be in the range (0, 1].
     */
    pub fn validate(self) -> Result<Self, ApplicationError> {
        if self.name.trim().is_empty() {
            return Err(ApplicationError::new(ErrorType::Validation, "Indicator name must not be empty".to_string()));
        }
        if self.importance <= Decimal::ZERO || self.importance > Decimal::ONE {
            return Err(ApplicationError::new(ErrorType::Validation, "importance must be greater than 0 and less than or equal to 1".to_string()));
        }
        Ok(self)
    }
}

/***************** Currencies *********************/

/**
 * A stored currency. The code is the primary key.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct CurrencyType {
    pub code: String,
    pub name: String,
}

impl From<(String, String)> for CurrencyType {
    fn from(row: (String, String)) -> Self {
        CurrencyType { code: row.0, name: row.1 }
    }
}

impl CurrencyType {
    pub fn validate(self) -> Result<Self, ApplicationError> {
        if self.code.is_empty() || self.code.chars().any(char::is_whitespace) {
            return Err(ApplicationError::new(ErrorType::Validation, "Currency code must be non-empty and contain no whitespace".to_string()));
        }
        Ok(self)
    }
}

/***************** Exchange rates *********************/

/**
 * A stored exchange rate. `amount_in_to = amount_in_from * rate`.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeRateType {
    pub id: i64,
    pub from_currency: String,
    pub to_currency: String,
    pub rate: Decimal,
    pub rate_date: NaiveDate,
}

impl From<(i64, String, String, Decimal, NaiveDate)> for ExchangeRateType {
    fn from(row: (i64, String, String, Decimal, NaiveDate)) -> Self {
        ExchangeRateType { id: row.0, from_currency: row.1, to_currency: row.2, rate: row.3, rate_date: row.4 }
    }
}

impl ExchangeRateType {
    /**
     * Applies the input onto the stored rate field by field.
     */
    pub fn merge(self, input: ExchangeRateInputType) -> Self {
        ExchangeRateType { id: self.id, from_currency: input.from_currency, to_currency: input.to_currency, rate: input.rate, rate_date: input.rate_date }
    }
}

/**
 * Input for creating or replacing an exchange rate.
 */
#[derive(Debug, Clone)]
pub struct ExchangeRateInputType {
    pub from_currency: String,
    pub to_currency: String,
    pub rate: Decimal,
    pub rate_date: NaiveDate,
}

impl ExchangeRateInputType {
    pub fn validate(self) -> Result<Self, ApplicationError> {
        if self.rate <= Decimal::ZERO {
            return Err(ApplicationError::new(ErrorType::Validation, "rate must be greater than 0".to_string()));
        }
        if self.from_currency == self.to_currency {
            return Err(ApplicationError::new(ErrorType::Validation, "from_currency and to_currency must be different".to_string()));
        }
        Ok(self)
    }
}

/***************** Indicator values *********************/

/**
 * One observed measurement of an indicator for an enterprise.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorValueType {
    pub id: i64,
    pub enterprise_id: i64,
    pub indicator_id: i64,
    pub value_date: NaiveDate,
    pub value: Decimal,
    pub currency_code: String,
}

impl From<(i64, i64, i64, NaiveDate, Decimal, String)> for IndicatorValueType {
    fn from(row: (i64, i64, i64, NaiveDate, Decimal, String)) -> Self {
        IndicatorValueType { id: row.0, enterprise_id: row.1, indicator_id: row.2, value_date: row.3, value: row.4, currency_code: row.5 }
    }
}

impl IndicatorValueType {
    /**
     * Applies the input onto the stored value field by field.
     */
    pub fn merge(self, input: IndicatorValueInputType) -> Self {
        IndicatorValueType {
            id: self.id,
            enterprise_id: input.enterprise_id,
            indicator_id: input.indicator_id,
            value_date: input.value_date,
            value: input.value,
            currency_code: input.currency_code,
        }
    }
}

/**
 * Input for creating or replacing an indicator value.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorValueInputType {
    pub enterprise_id: i64,
    pub indicator_id: i64,
    pub value_date: NaiveDate,
    pub value: Decimal,
    pub currency_code: String,
}

/**
 * An indicator value converted into a target currency.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedIndicatorValueType {
    pub indicator_value: IndicatorValueType,
    pub converted_value: Option<Decimal>,
    pub warning: Option<String>,
}

/**
 * Filters shared by the indicator value listing and the weighted report.
 */
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorValuesFilter {
    pub enterprise_id: Option<i64>,
    pub indicator_id: Option<i64>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
}

/***************** Weighted report *********************/

/**
 * An indicator value joined with its indicator name and importance.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedSourceType {
    pub indicator_id: i64,
    pub indicator_name: String,
    pub value_date: NaiveDate,
    pub value: Decimal,
    pub currency_code: String,
    pub importance: Decimal,
}

impl From<(i64, String, NaiveDate, Decimal, String, Decimal)> for WeightedSourceType {
    fn from(row: (i64, String, NaiveDate, Decimal, String, Decimal)) -> Self {
        WeightedSourceType { indicator_id: row.0, indicator_name: row.1, value_date: row.2, value: row.3, currency_code: row.4, importance: row.5 }
    }
}

/**
 * Calendar period the grouped report collapses values into.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodGrouping {
    Month,
    Quarter,
}

impl std::str::FromStr for PeriodGrouping {
    type Err = ApplicationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "month" => Ok(PeriodGrouping::Month),
            "quarter" => Ok(PeriodGrouping::Quarter),
            other => Err(ApplicationError::new(ErrorType::Validation, format!("group_by must be one of month, quarter but was {other}"))),
        }
    }
}

/**
 * The shape of the weighted report.
 */
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReportMode {
    List(PaginationInput),
    Aggregate,
    GroupBy(PeriodGrouping),
}

impl ReportMode {
    /**
     * Selects the report mode. Grouping takes precedence over aggregation.
     */
    pub fn select(aggregate: bool, group_by: Option<PeriodGrouping>, pagination: PaginationInput) -> Self {
        match (group_by, aggregate) {
            (Some(grouping), _) => ReportMode::GroupBy(grouping),
            (None, true) => ReportMode::Aggregate,
            (None, false) => ReportMode::List(pagination),
        }
    }
}

/**
 * Weighted report input.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedReportInputType {
    pub filter: IndicatorValuesFilter,
    pub target_currency: String,
    pub mode: ReportMode,
}

/**
 * One weighted and converted indicator value.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedIndicatorType {
    pub indicator_id: i64,
    pub indicator_name: String,
    pub value_date: NaiveDate,
    pub original_value: Decimal,
    pub currency_code: String,
    pub importance: Decimal,
    pub weighted_value: Decimal,
    pub converted_weighted_value: Option<Decimal>,
    pub warning: Option<String>,
}

/**
 * Sum of all converted weighted values.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedAggregateType {
    pub total_weighted_value: Option<Decimal>,
    pub warning: Option<String>,
}

/**
 * Sum of converted weighted values in one period.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedGroupType {
    pub period: String,
    pub total_weighted_value: Option<Decimal>,
    pub warning: Option<String>,
}

/**
 * Output of the weighted report, one variant per report mode.
 */
#[derive(Debug, Clone, PartialEq)]
pub enum WeightedReportOutputType {
    List(Vec<WeightedIndicatorType>),
    Aggregate(WeightedAggregateType),
    Groups(Vec<WeightedGroupType>),
}

/***************** Exchange rate refresh *********************/

/**
 * Result of a refresh run.
 */
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshSummaryType {
    pub inserted: u32,
    pub updated: u32,
    pub processed_dates: Vec<NaiveDate>,
    pub skipped_dates: Vec<NaiveDate>,
    pub failed_dates: Vec<NaiveDate>,
}

/***************** Users *********************/

/**
 * A stored user.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct UserType {
    pub id: i64,
    pub username: String,
    pub hashed_password: String,
    pub avatar_url: Option<String>,
}

impl From<(i64, String, String, Option<String>)> for UserType {
    fn from(row: (i64, String, String, Option<String>)) -> Self {
        UserType { id: row.0, username: row.1, hashed_password: row.2, avatar_url: row.3 }
    }
}

/**
 * Username and plain text password supplied on registration and login.
 */
#[derive(Debug, Clone)]
pub struct CredentialsInputType {
    pub username: String,
    pub password: String,
}

impl CredentialsInputType {
    pub fn validate(self) -> Result<Self, ApplicationError> {
        if self.username.trim().is_empty() {
            return Err(ApplicationError::new(ErrorType::Validation, "username must not be empty".to_string()));
        }
        if self.password.is_empty() {
            return Err(ApplicationError::new(ErrorType::Validation, "password must not be empty".to_string()));
        }
        Ok(self)
    }
}

/**
 * Profile changes. Absent fields are left untouched.
 */
#[derive(Debug, Clone, Default)]
pub struct UserUpdateInputType {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl UserUpdateInputType {
    pub fn validate(self) -> Result<Self, ApplicationError> {
        if self.username.as_ref().is_some_and(|username| username.trim().is_empty()) {
            return Err(ApplicationError::new(ErrorType::Validation, "username must not be empty".to_string()));
        }
        if self.password.as_ref().is_some_and(String::is_empty) {
            return Err(ApplicationError::new(ErrorType::Validation, "password must not be empty".to_string()));
        }
        Ok(self)
    }
}

/**
 * Issued access and refresh tokens.
 */
#[derive(Debug, Clone)]
pub struct TokenPairType {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_pagination_defaults() {
        let pagination = PaginationInput::new(None, None).validate().unwrap();
        assert_eq!(pagination.skip, 0);
        assert_eq!(pagination.limit, 100);
    }

    #[test]
    fn test_pagination_bounds() {
        assert!(PaginationInput::new(Some(-1), None).validate().is_err());
        assert!(PaginationInput::new(None, Some(0)).validate().is_err());
        assert!(PaginationInput::new(None, Some(1001)).validate().is_err());
        assert!(PaginationInput::new(Some(5), Some(1000)).validate().is_ok());
    }

    #[test]
    fn test_indicator_importance_range() {
        let indicator = |importance| IndicatorInputType { name: "Revenue".to_string(), importance, unit: "RUB".to_string() };
        assert!(indicator(dec!(0)).validate().is_err());
        assert!(indicator(dec!(-0.5)).validate().is_err());
        assert!(indicator(dec!(1.01)).validate().is_err());
        assert!(indicator(dec!(1)).validate().is_ok());
        assert!(indicator(dec!(0.01)).validate().is_ok());
    }

    #[test]
    fn test_exchange_rate_validation() {
        let rate = |from: &str, to: &str, rate| ExchangeRateInputType { from_currency: from.to_string(), to_currency: to.to_string(), rate, rate_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap() };
        assert!(rate("USD", "USD", dec!(1)).validate().is_err());
        assert!(rate("USD", "RUB", dec!(0)).validate().is_err());
        assert!(rate("USD", "RUB", dec!(90)).validate().is_ok());
    }

    #[test]
    fn test_currency_validation() {
        assert!(CurrencyType { code: "".to_string(), name: "Empty".to_string() }.validate().is_err());
        assert!(CurrencyType { code: "U SD".to_string(), name: "Broken".to_string() }.validate().is_err());
        assert!(CurrencyType { code: "USD".to_string(), name: "US Dollar".to_string() }.validate().is_ok());
    }

    #[test]
    fn test_period_grouping_parse() {
        assert_eq!(PeriodGrouping::from_str("month").unwrap(), PeriodGrouping::Month);
        assert_eq!(PeriodGrouping::from_str("quarter").unwrap(), PeriodGrouping::Quarter);
        assert_eq!(PeriodGrouping::from_str("year").unwrap_err().error_type, ErrorType::Validation);
    }

    #[test]
    fn test_report_mode_group_by_wins() {
        let pagination = PaginationInput::new(None, None);
        assert_eq!(ReportMode::select(true, Some(PeriodGrouping::Month), pagination), ReportMode::GroupBy(PeriodGrouping::Month));
        assert_eq!(ReportMode::select(true, None, pagination), ReportMode::Aggregate);
        assert_eq!(ReportMode::select(false, None, pagination), ReportMode::List(pagination));
    }

    #[test]
    fn test_merge_replaces_fields() {
        let stored = EnterpriseType { id: 7, name: "Old".to_string(), requisites: "r".to_string(), phone: "p".to_string(), contact_person: "c".to_string() };
        let merged = stored.merge(EnterpriseInputType { name: "New".to_string(), requisites: "r2".to_string(), phone: "p2".to_string(), contact_person: "c2".to_string() });
        assert_eq!(merged.id, 7);
        assert_eq!(merged.name, "New");
        assert_eq!(merged.contact_person, "c2");
    }

    #[test]
    fn test_user_update_validation() {
        assert!(UserUpdateInputType { username: Some(" ".to_string()), password: None }.validate().is_err());
        assert!(UserUpdateInputType { username: None, password: Some(String::new()) }.validate().is_err());
        assert!(UserUpdateInputType::default().validate().is_ok());
    }
}
