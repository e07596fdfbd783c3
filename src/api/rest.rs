use actix_web::{HttpResponse, ResponseError, http::StatusCode, web};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::model::{
    apperror::{ApplicationError, ErrorType},
    models::{
        ConvertedIndicatorValueType, CredentialsInputType, CurrencyType, EnterpriseInputType, EnterpriseType, ExchangeRateInputType, ExchangeRateType, IndicatorInputType, IndicatorType,
        IndicatorValueInputType, IndicatorValueType, IndicatorValuesFilter, PaginationInput, PeriodGrouping, RefreshSummaryType, ReportMode, TokenPairType, UserType, UserUpdateInputType,
        WeightedAggregateType, WeightedGroupType, WeightedIndicatorType, WeightedReportInputType, WeightedReportOutputType,
    },
};

/**
 * Currency used when a request does not name one.
 */
pub const DEFAULT_TARGET_CURRENCY: &str = "RUB";

fn default_target_currency() -> String {
    DEFAULT_TARGET_CURRENCY.to_string()
}

/***************** Auth models *********************/

/**
 * Registration request body.
 */
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

impl From<web::Json<RegisterRequest>> for CredentialsInputType {
    fn from(request: web::Json<RegisterRequest>) -> Self {
        let request = request.into_inner();
        CredentialsInputType { username: request.username, password: request.password }
    }
}

/**
 * Login form.
 */
#[derive(Debug, Deserialize)]
pub struct TokenForm {
    pub username: String,
    pub password: String,
}

impl From<web::Form<TokenForm>> for CredentialsInputType {
    fn from(form: web::Form<TokenForm>) -> Self {
        let form = form.into_inner();
        CredentialsInputType { username: form.username, password: form.password }
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

/**
 * Issued tokens. The refresh token is only present on registration and login.
 */
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub token_type: String,
}

impl From<TokenPairType> for TokenResponse {
    fn from(token_pair: TokenPairType) -> Self {
        TokenResponse { access_token: token_pair.access_token, refresh_token: token_pair.refresh_token, token_type: "bearer".to_string() }
    }
}

/***************** User models *********************/

#[derive(Debug, Deserialize)]
pub struct UserUpdateRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl From<web::Json<UserUpdateRequest>> for UserUpdateInputType {
    fn from(request: web::Json<UserUpdateRequest>) -> Self {
        let request = request.into_inner();
        UserUpdateInputType { username: request.username, password: request.password }
    }
}

/**
 * A user as returned by the API. The password hash is never exposed.
 */
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub avatar_url: Option<String>,
}

impl From<UserType> for UserResponse {
    fn from(user: UserType) -> Self {
        UserResponse { id: user.id, username: user.username, avatar_url: user.avatar_url }
    }
}

/***************** Enterprise models *********************/

#[derive(Debug, Deserialize)]
pub struct EnterpriseRequest {
    pub name: String,
    #[serde(default)]
    pub requisites: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub contact_person: String,
}

impl From<web::Json<EnterpriseRequest>> for EnterpriseInputType {
    fn from(request: web::Json<EnterpriseRequest>) -> Self {
        let request = request.into_inner();
        EnterpriseInputType { name: request.name, requisites: request.requisites, phone: request.phone, contact_person: request.contact_person }
    }
}

#[derive(Debug, Serialize)]
pub struct EnterpriseResponse {
    pub id: i64,
    pub name: String,
    pub requisites: String,
    pub phone: String,
    pub contact_person: String,
}

impl From<EnterpriseType> for EnterpriseResponse {
    fn from(enterprise: EnterpriseType) -> Self {
        EnterpriseResponse { id: enterprise.id, name: enterprise.name, requisites: enterprise.requisites, phone: enterprise.phone, contact_person: enterprise.contact_person }
    }
}

/***************** Indicator models *********************/

#[derive(Debug, Deserialize)]
pub struct IndicatorRequest {
    pub name: String,
    pub importance: Decimal,
    #[serde(default)]
    pub unit: String,
}

impl From<web::Json<IndicatorRequest>> for IndicatorInputType {
    fn from(request: web::Json<IndicatorRequest>) -> Self {
        let request = request.into_inner();
        IndicatorInputType { name: request.name, importance: request.importance, unit: request.unit }
    }
}

#[derive(Debug, Serialize)]
pub struct IndicatorResponse {
    pub id: i64,
    pub name: String,
    pub importance: Decimal,
    pub unit: String,
}

impl From<IndicatorType> for IndicatorResponse {
    fn from(indicator: IndicatorType) -> Self {
        IndicatorResponse { id: indicator.id, name: indicator.name, importance: indicator.importance, unit: indicator.unit }
    }
}

/***************** Currency models *********************/

/**
 * Currency request and response body.
 */
#[derive(Debug, Serialize, Deserialize)]
pub struct CurrencyBody {
    pub code: String,
    pub name: String,
}

impl From<web::Json<CurrencyBody>> for CurrencyType {
    fn from(request: web::Json<CurrencyBody>) -> Self {
        let request = request.into_inner();
        CurrencyType { code: request.code, name: request.name }
    }
}

impl From<CurrencyType> for CurrencyBody {
    fn from(currency: CurrencyType) -> Self {
        CurrencyBody { code: currency.code, name: currency.name }
    }
}

/***************** Exchange rate models *********************/

#[derive(Debug, Deserialize)]
pub struct ExchangeRateRequest {
    pub from_currency: String,
    pub to_currency: String,
    pub rate: Decimal,
    pub rate_date: NaiveDate,
}

impl From<web::Json<ExchangeRateRequest>> for ExchangeRateInputType {
    fn from(request: web::Json<ExchangeRateRequest>) -> Self {
        let request = request.into_inner();
        ExchangeRateInputType { from_currency: request.from_currency, to_currency: request.to_currency, rate: request.rate, rate_date: request.rate_date }
    }
}

#[derive(Debug, Serialize)]
pub struct ExchangeRateResponse {
    pub id: i64,
    pub from_currency: String,
    pub to_currency: String,
    pub rate: Decimal,
    pub rate_date: NaiveDate,
}

impl From<ExchangeRateType> for ExchangeRateResponse {
    fn from(exchange_rate: ExchangeRateType) -> Self {
        ExchangeRateResponse {
            id: exchange_rate.id,
            from_currency: exchange_rate.from_currency,
            to_currency: exchange_rate.to_currency,
            rate: exchange_rate.rate,
            rate_date: exchange_rate.rate_date,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshQuery {
    pub target_date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct RefreshSummaryResponse {
    pub inserted: u32,
    pub updated: u32,
    pub processed_dates: Vec<NaiveDate>,
    pub skipped_dates: Vec<NaiveDate>,
    pub failed_dates: Vec<NaiveDate>,
}

impl From<RefreshSummaryType> for RefreshSummaryResponse {
    fn from(summary: RefreshSummaryType) -> Self {
        RefreshSummaryResponse {
            inserted: summary.inserted,
            updated: summary.updated,
            processed_dates: summary.processed_dates,
            skipped_dates: summary.skipped_dates,
            failed_dates: summary.failed_dates,
        }
    }
}

/***************** Indicator value models *********************/

#[derive(Debug, Deserialize)]
pub struct IndicatorValueRequest {
    pub enterprise_id: i64,
    pub indicator_id: i64,
    pub value_date: NaiveDate,
    pub value: Decimal,
    pub currency_code: String,
}

impl From<web::Json<IndicatorValueRequest>> for IndicatorValueInputType {
    fn from(request: web::Json<IndicatorValueRequest>) -> Self {
        let request = request.into_inner();
        IndicatorValueInputType { enterprise_id: request.enterprise_id, indicator_id: request.indicator_id, value_date: request.value_date, value: request.value, currency_code: request.currency_code }
    }
}

#[derive(Debug, Serialize)]
pub struct IndicatorValueResponse {
    pub id: i64,
    pub enterprise_id: i64,
    pub indicator_id: i64,
    pub value_date: NaiveDate,
    pub value: Decimal,
    pub currency_code: String,
}

impl From<IndicatorValueType> for IndicatorValueResponse {
    fn from(indicator_value: IndicatorValueType) -> Self {
        IndicatorValueResponse {
            id: indicator_value.id,
            enterprise_id: indicator_value.enterprise_id,
            indicator_id: indicator_value.indicator_id,
            value_date: indicator_value.value_date,
            value: indicator_value.value,
            currency_code: indicator_value.currency_code,
        }
    }
}

/**
 * An indicator value with its amount in the requested currency.
 */
#[derive(Debug, Serialize)]
pub struct ConvertedIndicatorValueResponse {
    #[serde(flatten)]
    pub indicator_value: IndicatorValueResponse,
    pub converted_value: Option<Decimal>,
    pub target_currency: String,
    pub warning: Option<String>,
}

impl From<(ConvertedIndicatorValueType, &str)> for ConvertedIndicatorValueResponse {
    fn from((converted, target_currency): (ConvertedIndicatorValueType, &str)) -> Self {
        ConvertedIndicatorValueResponse {
            indicator_value: IndicatorValueResponse::from(converted.indicator_value),
            converted_value: converted.converted_value,
            target_currency: target_currency.to_string(),
            warning: converted.warning,
        }
    }
}

/**
 * Query parameters of the indicator value listing.
 */
#[derive(Debug, Deserialize)]
pub struct IndicatorValuesQuery {
    pub enterprise_id: Option<i64>,
    pub indicator_id: Option<i64>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    #[serde(default = "default_target_currency")]
    pub target_currency: String,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

impl IndicatorValuesQuery {
    pub fn filter(&self) -> IndicatorValuesFilter {
        IndicatorValuesFilter { enterprise_id: self.enterprise_id, indicator_id: self.indicator_id, from_date: self.from_date, to_date: self.to_date }
    }

    pub fn pagination(&self) -> PaginationInput {
        PaginationInput::new(self.skip, self.limit)
    }
}

/***************** Weighted report models *********************/

/**
 * Query parameters of the weighted report.
 */
#[derive(Debug, Deserialize)]
pub struct WeightedIndicatorsQuery {
    pub enterprise_id: i64,
    pub indicator_id: Option<i64>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    #[serde(default = "default_target_currency")]
    pub target_currency: String,
    #[serde(default)]
    pub aggregate: bool,
    pub group_by: Option<String>,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

impl TryFrom<web::Query<WeightedIndicatorsQuery>> for WeightedReportInputType {
    type Error = ApplicationError;

    fn try_from(query: web::Query<WeightedIndicatorsQuery>) -> Result<Self, Self::Error> {
        let query = query.into_inner();
        let group_by = query.group_by.as_deref().filter(|group_by| !group_by.is_empty()).map(str::parse::<PeriodGrouping>).transpose()?;
        let pagination_input = PaginationInput::new(query.skip, query.limit).validate()?;
        let filter = IndicatorValuesFilter { enterprise_id: Some(query.enterprise_id), indicator_id: query.indicator_id, from_date: query.from_date, to_date: query.to_date };
        Ok(WeightedReportInputType { filter, target_currency: query.target_currency, mode: ReportMode::select(query.aggregate, group_by, pagination_input) })
    }
}

#[derive(Debug, Serialize)]
pub struct WeightedIndicatorResponse {
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

impl From<WeightedIndicatorType> for WeightedIndicatorResponse {
    fn from(weighted: WeightedIndicatorType) -> Self {
        WeightedIndicatorResponse {
            indicator_id: weighted.indicator_id,
            indicator_name: weighted.indicator_name,
            value_date: weighted.value_date,
            original_value: weighted.original_value,
            currency_code: weighted.currency_code,
            importance: weighted.importance,
            weighted_value: weighted.weighted_value,
            converted_weighted_value: weighted.converted_weighted_value,
            warning: weighted.warning,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WeightedAggregateResponse {
    pub total_weighted_value: Option<Decimal>,
    pub warning: Option<String>,
}

impl From<WeightedAggregateType> for WeightedAggregateResponse {
    fn from(aggregate: WeightedAggregateType) -> Self {
        WeightedAggregateResponse { total_weighted_value: aggregate.total_weighted_value, warning: aggregate.warning }
    }
}

#[derive(Debug, Serialize)]
pub struct WeightedGroupResponse {
    pub period: String,
    pub total_weighted_value: Option<Decimal>,
    pub warning: Option<String>,
}

impl From<WeightedGroupType> for WeightedGroupResponse {
    fn from(group: WeightedGroupType) -> Self {
        WeightedGroupResponse { period: group.period, total_weighted_value: group.total_weighted_value, warning: group.warning }
    }
}

/**
 * The weighted report. A list and the grouped report serialize as arrays, the aggregate as an object.
 */
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum WeightedReportResponse {
    List(Vec<WeightedIndicatorResponse>),
    Aggregate(WeightedAggregateResponse),
    Groups(Vec<WeightedGroupResponse>),
}

impl From<WeightedReportOutputType> for WeightedReportResponse {
    fn from(output: WeightedReportOutputType) -> Self {
        match output {
            WeightedReportOutputType::List(list) => WeightedReportResponse::List(list.into_iter().map(WeightedIndicatorResponse::from).collect()),
            WeightedReportOutputType::Aggregate(aggregate) => WeightedReportResponse::Aggregate(WeightedAggregateResponse::from(aggregate)),
            WeightedReportOutputType::Groups(groups) => WeightedReportResponse::Groups(groups.into_iter().map(WeightedGroupResponse::from).collect()),
        }
    }
}

/***************** Error models *********************/

/**
 * Custom error response for the application.
 */
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /**
     * The error code associated with the error type.
     */
    pub code: u16,
    /**
     * A human-readable message describing the error.
     */
    pub message: String,
}

impl ResponseError for ApplicationError {
    fn status_code(&self) -> StatusCode {
        get_statuscode(&self.error_type)
    }

    /**
     * Generates an error response for the application error.
     */
    fn error_response(&self) -> HttpResponse {
        let error_response = ErrorResponse { code: get_error_code(&self.error_type), message: self.message.clone() };
        HttpResponse::build(get_statuscode(&self.error_type)).json(&error_response)
    }
}

/**
* Maps application errors to HTTP status codes.
*
* # Arguments
* `application_error`: The type of error that occurred.
*
* # Returns
* The corresponding HTTP status code.
*/
fn get_statuscode(application_error: &ErrorType) -> StatusCode {
    match application_error {
        ErrorType::JwtAuthorization => StatusCode::UNAUTHORIZED,
        ErrorType::Initialization => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorType::DatabaseError => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorType::Validation => StatusCode::BAD_REQUEST,
        ErrorType::NotFound => StatusCode::NOT_FOUND,
        ErrorType::ConstraintViolation => StatusCode::BAD_REQUEST,
        ErrorType::ExternalService => StatusCode::BAD_GATEWAY,
        ErrorType::Application => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/**
 * Maps application errors to error codes.
 *
 * # Arguments
 * `application_error`: The type of error that occurred.
 *
 * # Returns
 * The corresponding error code.
 */
fn get_error_code(application_error: &ErrorType) -> u16 {
    match application_error {
        ErrorType::JwtAuthorization => 1000,
        ErrorType::Initialization => 1001,
        ErrorType::DatabaseError => 1003,
        ErrorType::Validation => 1004,
        ErrorType::NotFound => 1005,
        ErrorType::ConstraintViolation => 1006,
        ErrorType::ExternalService => 1007,
        ErrorType::Application => 1008,
    }
}

/**
 * Renders malformed query strings, forms and bodies as validation errors.
 */
pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _| ApplicationError::new(ErrorType::Validation, err.to_string()).into())
}

pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _| ApplicationError::new(ErrorType::Validation, err.to_string()).into())
}

pub fn form_config() -> web::FormConfig {
    web::FormConfig::default().error_handler(|err, _| ApplicationError::new(ErrorType::Validation, err.to_string()).into())
}

pub fn path_config() -> web::PathConfig {
    web::PathConfig::default().error_handler(|err, _| ApplicationError::new(ErrorType::Validation, err.to_string()).into())
}

/***************** Common models *********************/

/**
 * Pagination query parameters for API requests.
 */
#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    /**
     * Number of elements to skip.
     */
    pub skip: Option<i64>,
    /**
     * Maximum number of elements to return.
     */
    pub limit: Option<i64>,
}

impl From<web::Query<PaginationQuery>> for PaginationInput {
    fn from(query: web::Query<PaginationQuery>) -> Self {
        PaginationInput::new(query.skip, query.limit)
    }
}

/**
 * Confirmation returned by delete operations.
 */
#[derive(Debug, Serialize)]
pub struct DetailResponse {
    pub detail: String,
}

impl DetailResponse {
    pub fn deleted(entity: &str) -> Self {
        DetailResponse { detail: format!("{entity} deleted") }
    }
}
