use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};

/**
 * Collects the source currencies and dates a rate table has to cover for one target currency.
 *
 * The rate table is loaded for the cross product of the collected currencies and dates.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct RateTableRequest {
    currencies: BTreeSet<String>,
    dates: BTreeSet<NaiveDate>,
    target_currency: String,
}

impl RateTableRequest {
    pub fn new(target_currency: &str) -> Self {
        RateTableRequest { currencies: BTreeSet::new(), dates: BTreeSet::new(), target_currency: target_currency.to_string() }
    }

    /**
     * Adds a currency and date that must be convertible into the target currency.
     */
    pub fn add(&mut self, currency: &str, date: NaiveDate) {
        if !self.currencies.contains(currency) {
            self.currencies.insert(currency.to_string());
        }
        self.dates.insert(date);
    }

    /**
     * Nothing to look up when either set is empty.
     */
    pub fn is_empty(&self) -> bool {
        self.currencies.is_empty() || self.dates.is_empty()
    }

    pub fn currencies(&self) -> Vec<String> {
        self.currencies.iter().cloned().collect()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.dates.iter().copied().collect()
    }

    pub fn target_currency(&self) -> &str {
        &self.target_currency
    }
}

/**
 * Request scoped lookup of rates from (source currency, date) into a fixed target currency.
 */
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateTable {
    rates: HashMap<(String, NaiveDate), Decimal>,
}

impl RateTable {
    pub fn empty() -> Self {
        RateTable::default()
    }

    /**
     * Builds the table from (source currency, date, rate) rows.
     */
    pub fn from_rows(rows: impl IntoIterator<Item = (String, NaiveDate, Decimal)>) -> Self {
        RateTable { rates: rows.into_iter().map(|(currency, date, rate)| ((currency, date), rate)).collect() }
    }

    pub fn get(&self, currency: &str, date: NaiveDate) -> Option<Decimal> {
        self.rates.get(&(currency.to_string(), date)).copied()
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

/**
 * Outcome of converting an amount. A missing rate yields no value and a warning.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub value: Option<Decimal>,
    pub warning: Option<String>,
}

/**
 * Rounds a monetary amount to 2 decimal places, ties to even.
 */
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

/**
 * Rounds a rate to 6 decimal places, ties to even.
 */
pub fn round_rate(rate: Decimal) -> Decimal {
    rate.round_dp_with_strategy(6, RoundingStrategy::MidpointNearestEven)
}

/**
 * Warning attached to a single value that could not be converted.
 */
pub fn missing_rate_warning(currency: &str, target_currency: &str, date: NaiveDate) -> String {
    format!("No exchange rate found for {currency} to {target_currency} on {date}")
}

/**
 * Converts an amount recorded in `currency` on `date` into `target_currency`.
 *
 * # Arguments
 * `amount`: The amount to convert.
 * `currency`: The currency the amount is recorded in.
 * `date`: The date the amount is recorded on.
 * `target_currency`: The currency to convert into.
 * `rate_table`: Rates into `target_currency`.
 *
 * # Returns
 * The amount unchanged when the currencies match, the amount multiplied by the rate and rounded to
 * 2 decimals when a rate exists, otherwise no value and a warning.
 */
pub fn convert(amount: Decimal, currency: &str, date: NaiveDate, target_currency: &str, rate_table: &RateTable) -> Conversion {
    if currency == target_currency {
        return Conversion { value: Some(amount), warning: None };
    }
    match rate_table.get(currency, date) {
        Some(rate) => Conversion { value: Some(round_money(amount * rate)), warning: None },
        None => Conversion { value: None, warning: Some(missing_rate_warning(currency, target_currency, date)) },
    }
}

/**
 * Multiplies a recorded value by the importance of its indicator.
 */
pub fn weighted_value(value: Decimal, importance: Decimal) -> Decimal {
    value * importance
}

#[cfg(test)]
mod test {
    use rust_decimal_macros::dec;

    use super::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn test_identity_conversion_keeps_amount() {
        let conversion = convert(dec!(123.456), "RUB", date(2025, 1, 1), "RUB", &RateTable::empty());
        assert_eq!(conversion.value, Some(dec!(123.456)));
        assert!(conversion.warning.is_none());
    }

    #[test]
    fn test_conversion_rounds_to_two_decimals() {
        let table = RateTable::from_rows(vec![("USD".to_string(), date(2025, 1, 1), dec!(90.1234))]);
        let conversion = convert(dec!(10.5), "USD", date(2025, 1, 1), "RUB", &table);
        assert_eq!(conversion.value, Some(dec!(946.30)));
        assert!(conversion.warning.is_none());
    }

    #[test]
    fn test_missing_rate_produces_warning() {
        let table = RateTable::from_rows(vec![("USD".to_string(), date(2025, 1, 2), dec!(90))]);
        let conversion = convert(dec!(100), "USD", date(2025, 1, 1), "RUB", &table);
        assert!(conversion.value.is_none());
        assert_eq!(conversion.warning.as_deref(), Some("No exchange rate found for USD to RUB on 2025-01-01"));
    }

    #[test]
    fn test_weighted_value_then_conversion() {
        let table = RateTable::from_rows(vec![("USD".to_string(), date(2025, 1, 1), dec!(90))]);
        let weighted = weighted_value(dec!(100), dec!(0.5));
        assert_eq!(weighted, dec!(50));
        let conversion = convert(weighted, "USD", date(2025, 1, 1), "RUB", &table);
        assert_eq!(conversion.value, Some(dec!(4500.00)));
    }

    #[test]
    fn test_round_money_ties_to_even() {
        assert_eq!(round_money(dec!(0.125)), dec!(0.12));
        assert_eq!(round_money(dec!(0.135)), dec!(0.14));
        assert_eq!(round_money(dec!(-1.005)), dec!(-1.00));
    }

    #[test]
    fn test_round_rate() {
        assert_eq!(round_rate(dec!(1) / dec!(90)), dec!(0.011111));
    }

    #[test]
    fn test_rate_table_request_collects_cross_product_inputs() {
        let mut request = RateTableRequest::new("RUB");
        assert!(request.is_empty());
        request.add("USD", date(2025, 1, 1));
        request.add("USD", date(2025, 1, 2));
        request.add("EUR", date(2025, 1, 1));
        assert!(!request.is_empty());
        assert_eq!(request.currencies(), vec!["EUR".to_string(), "USD".to_string()]);
        assert_eq!(request.dates(), vec![date(2025, 1, 1), date(2025, 1, 2)]);
        assert_eq!(request.target_currency(), "RUB");
    }

    #[test]
    fn test_rate_table_lookup() {
        let table = RateTable::from_rows(vec![("USD".to_string(), date(2025, 1, 1), dec!(90)), ("EUR".to_string(), date(2025, 1, 1), dec!(100))]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("EUR", date(2025, 1, 1)), Some(dec!(100)));
        assert!(table.get("EUR", date(2025, 1, 2)).is_none());
        assert!(RateTable::empty().is_empty());
    }
}
