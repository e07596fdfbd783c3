use actix_multipart::Multipart;
use actix_web::{
    HttpRequest, HttpResponse, delete, get, post, put,
    web::{self, Path},
};
use futures_util::TryStreamExt;
use tracing::{Instrument, instrument};

use crate::{
    api::{
        rest::{
            ConvertedIndicatorValueResponse, CurrencyBody, DetailResponse, EnterpriseRequest, EnterpriseResponse, ExchangeRateRequest, ExchangeRateResponse, IndicatorRequest, IndicatorResponse,
            IndicatorValueRequest, IndicatorValueResponse, IndicatorValuesQuery, PaginationQuery, RefreshQuery, RefreshSummaryResponse, RefreshTokenRequest, RegisterRequest, TokenForm,
            TokenResponse, UserResponse, UserUpdateRequest, WeightedIndicatorsQuery, WeightedReportResponse,
        },
        state::AppState,
    },
    model::{
        apperror::{ApplicationError, ErrorType},
        models::{
            CredentialsInputType, CurrencyType, EnterpriseInputType, ExchangeRateInputType, IndicatorInputType, IndicatorValueInputType, PaginationInput, TokenPairType, UserType,
            UserUpdateInputType, WeightedReportInputType,
        },
    },
};

/**
 * Registers every endpoint.
 */
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(register)
        .service(token)
        .service(token_refresh)
        .service(users_me)
        .service(users_me_update)
        .service(users_me_avatar)
        .service(enterprises_list)
        .service(enterprises_add)
        .service(enterprises_update)
        .service(enterprises_delete)
        .service(indicators_list)
        .service(indicators_add)
        .service(indicators_update)
        .service(indicators_delete)
        .service(currencies_list)
        .service(currencies_add)
        .service(currencies_update)
        .service(currencies_delete)
        .service(exchange_rates_refresh)
        .service(exchange_rates_list)
        .service(exchange_rates_add)
        .service(exchange_rates_update)
        .service(exchange_rates_delete)
        .service(indicator_values_list)
        .service(indicator_values_add)
        .service(indicator_values_update)
        .service(indicator_values_delete)
        .service(weighted_indicators);
}

/***************** Auth *********************/

/**
 * Registers a user and returns its tokens.
 */
#[instrument(skip(http_request, request_body, app_state), fields(service = "register", trace_id = get_trace_id(&http_request), result))]
#[post("/register")]
pub async fn register(http_request: HttpRequest, request_body: web::Json<RegisterRequest>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let credentials = CredentialsInputType::from(request_body).validate()?;
    let user = app_state.user_service.register(credentials).instrument(span).await?;
    let token_pair = app_state.jwt_service.issue_token_pair(user.id)?;
    Ok(HttpResponse::Ok().json(TokenResponse::from(token_pair)))
}

/**
 * Login with a username and password form.
 */
#[instrument(skip(http_request, form, app_state), fields(service = "token", trace_id = get_trace_id(&http_request), result))]
#[post("/token")]
pub async fn token(http_request: HttpRequest, form: web::Form<TokenForm>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let user = app_state.user_service.authenticate(CredentialsInputType::from(form)).instrument(span).await?;
    let token_pair = app_state.jwt_service.issue_token_pair(user.id)?;
    Ok(HttpResponse::Ok().json(TokenResponse::from(token_pair)))
}

/**
 * Exchanges a refresh token for a new access token.
 */
#[instrument(skip(http_request, request_body, app_state), fields(service = "tokenRefresh", trace_id = get_trace_id(&http_request), result))]
#[post("/token/refresh")]
pub async fn token_refresh(http_request: HttpRequest, request_body: web::Json<RefreshTokenRequest>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let user_id = app_state.jwt_service.validate_refresh_token(&request_body.refresh_token)?;
    app_state
        .user_service
        .get_current_user(user_id)
        .instrument(span)
        .await
        .map_err(|_| ApplicationError::new(ErrorType::JwtAuthorization, "Could not validate refresh token".to_string()))?;
    let access_token = app_state.jwt_service.issue_access_token(user_id)?;
    Ok(HttpResponse::Ok().json(TokenResponse::from(TokenPairType { access_token, refresh_token: None })))
}

/***************** Users *********************/

#[instrument(skip(http_request, app_state), fields(service = "getCurrentUser", trace_id = get_trace_id(&http_request), result))]
#[get("/users/me")]
pub async fn users_me(http_request: HttpRequest, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let user = current_user(&http_request, &app_state).instrument(span).await?;
    Ok(HttpResponse::Ok().json(UserResponse::from(user)))
}

#[instrument(skip(http_request, request_body, app_state), fields(service = "updateCurrentUser", trace_id = get_trace_id(&http_request), result))]
#[put("/users/me")]
pub async fn users_me_update(http_request: HttpRequest, request_body: web::Json<UserUpdateRequest>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let user = current_user(&http_request, &app_state).instrument(span.clone()).await?;
    let user_update_input = UserUpdateInputType::from(request_body).validate()?;
    let user = app_state.user_service.update_user(user.id, user_update_input).instrument(span).await?;
    Ok(HttpResponse::Ok().json(UserResponse::from(user)))
}

/**
 * Uploads an avatar image from the `file` field of a multipart form.
 */
#[instrument(skip(http_request, payload, app_state), fields(service = "uploadAvatar", trace_id = get_trace_id(&http_request), result))]
#[post("/users/me/avatar")]
pub async fn users_me_avatar(http_request: HttpRequest, mut payload: Multipart, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let user = current_user(&http_request, &app_state).instrument(span.clone()).await?;
    let max_avatar_bytes = app_state.user_service.max_avatar_bytes();
    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(mut field) = payload.try_next().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field.content_type().map(|mime| mime.essence_str().to_string()).unwrap_or_else(|| "application/octet-stream".to_string());
        let mut content = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(multipart_error)? {
            content.extend_from_slice(&chunk);
            if content.len() > max_avatar_bytes {
                break;
            }
        }
        upload = Some((content_type, content));
        break;
    }
    let Some((content_type, content)) = upload else {
        return Err(ApplicationError::new(ErrorType::Validation, "Missing file field".to_string()));
    };
    let user = app_state.user_service.update_avatar(user.id, &content_type, &content).instrument(span).await?;
    Ok(HttpResponse::Ok().json(UserResponse::from(user)))
}

/***************** Enterprises *********************/

#[instrument(skip(http_request, app_state), fields(service = "listEnterprises", trace_id = get_trace_id(&http_request), result))]
#[get("/enterprises/")]
pub async fn enterprises_list(http_request: HttpRequest, pagination: web::Query<PaginationQuery>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    current_user(&http_request, &app_state).instrument(span.clone()).await?;
    let pagination_input = PaginationInput::from(pagination).validate()?;
    let enterprises = app_state.reference_data_service.get_enterprise_list(pagination_input).instrument(span).await?;
    Ok(HttpResponse::Ok().json(enterprises.into_iter().map(EnterpriseResponse::from).collect::<Vec<_>>()))
}

#[instrument(skip(http_request, request_body, app_state), fields(service = "addEnterprise", trace_id = get_trace_id(&http_request), result))]
#[post("/enterprises/")]
pub async fn enterprises_add(http_request: HttpRequest, request_body: web::Json<EnterpriseRequest>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    current_user(&http_request, &app_state).instrument(span.clone()).await?;
    let enterprise_input = EnterpriseInputType::from(request_body).validate()?;
    let enterprise = app_state.reference_data_service.add_enterprise(enterprise_input).instrument(span).await?;
    Ok(HttpResponse::Ok().json(EnterpriseResponse::from(enterprise)))
}

#[instrument(skip(http_request, request_body, app_state), fields(service = "updateEnterprise", trace_id = get_trace_id(&http_request), result))]
#[put("/enterprises/{enterpriseId}")]
pub async fn enterprises_update(path: Path<i64>, http_request: HttpRequest, request_body: web::Json<EnterpriseRequest>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    current_user(&http_request, &app_state).instrument(span.clone()).await?;
    let enterprise_input = EnterpriseInputType::from(request_body).validate()?;
    let enterprise = app_state.reference_data_service.update_enterprise(path.into_inner(), enterprise_input).instrument(span).await?;
    Ok(HttpResponse::Ok().json(EnterpriseResponse::from(enterprise)))
}

#[instrument(skip(http_request, app_state), fields(service = "deleteEnterprise", trace_id = get_trace_id(&http_request), result))]
#[delete("/enterprises/{enterpriseId}")]
pub async fn enterprises_delete(path: Path<i64>, http_request: HttpRequest, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    current_user(&http_request, &app_state).instrument(span.clone()).await?;
    app_state.reference_data_service.delete_enterprise(path.into_inner()).instrument(span).await?;
    Ok(HttpResponse::Ok().json(DetailResponse::deleted("Enterprise")))
}

/***************** Indicators *********************/

#[instrument(skip(http_request, app_state), fields(service = "listIndicators", trace_id = get_trace_id(&http_request), result))]
#[get("/indicators/")]
pub async fn indicators_list(http_request: HttpRequest, pagination: web::Query<PaginationQuery>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    current_user(&http_request, &app_state).instrument(span.clone()).await?;
    let pagination_input = PaginationInput::from(pagination).validate()?;
    let indicators = app_state.reference_data_service.get_indicator_list(pagination_input).instrument(span).await?;
    Ok(HttpResponse::Ok().json(indicators.into_iter().map(IndicatorResponse::from).collect::<Vec<_>>()))
}

#[instrument(skip(http_request, request_body, app_state), fields(service = "addIndicator", trace_id = get_trace_id(&http_request), result))]
#[post("/indicators/")]
pub async fn indicators_add(http_request: HttpRequest, request_body: web::Json<IndicatorRequest>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    current_user(&http_request, &app_state).instrument(span.clone()).await?;
    let indicator_input = IndicatorInputType::from(request_body).validate()?;
    let indicator = app_state.reference_data_service.add_indicator(indicator_input).instrument(span).await?;
    Ok(HttpResponse::Ok().json(IndicatorResponse::from(indicator)))
}

#[instrument(skip(http_request, request_body, app_state), fields(service = "updateIndicator", trace_id = get_trace_id(&http_request), result))]
#[put("/indicators/{indicatorId}")]
pub async fn indicators_update(path: Path<i64>, http_request: HttpRequest, request_body: web::Json<IndicatorRequest>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    current_user(&http_request, &app_state).instrument(span.clone()).await?;
    let indicator_input = IndicatorInputType::from(request_body).validate()?;
    let indicator = app_state.reference_data_service.update_indicator(path.into_inner(), indicator_input).instrument(span).await?;
    Ok(HttpResponse::Ok().json(IndicatorResponse::from(indicator)))
}

#[instrument(skip(http_request, app_state), fields(service = "deleteIndicator", trace_id = get_trace_id(&http_request), result))]
#[delete("/indicators/{indicatorId}")]
pub async fn indicators_delete(path: Path<i64>, http_request: HttpRequest, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    current_user(&http_request, &app_state).instrument(span.clone()).await?;
    app_state.reference_data_service.delete_indicator(path.into_inner()).instrument(span).await?;
    Ok(HttpResponse::Ok().json(DetailResponse::deleted("Indicator")))
}

/***************** Currencies *********************/

#[instrument(skip(http_request, app_state), fields(service = "listCurrencies", trace_id = get_trace_id(&http_request), result))]
#[get("/currencies/")]
pub async fn currencies_list(http_request: HttpRequest, pagination: web::Query<PaginationQuery>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    current_user(&http_request, &app_state).instrument(span.clone()).await?;
    let pagination_input = PaginationInput::from(pagination).validate()?;
    let currencies = app_state.reference_data_service.get_currency_list(pagination_input).instrument(span).await?;
    Ok(HttpResponse::Ok().json(currencies.into_iter().map(CurrencyBody::from).collect::<Vec<_>>()))
}

#[instrument(skip(http_request, request_body, app_state), fields(service = "addCurrency", trace_id = get_trace_id(&http_request), result))]
#[post("/currencies/")]
pub async fn currencies_add(http_request: HttpRequest, request_body: web::Json<CurrencyBody>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    current_user(&http_request, &app_state).instrument(span.clone()).await?;
    let currency = CurrencyType::from(request_body).validate()?;
    let currency = app_state.reference_data_service.add_currency(currency).instrument(span).await?;
    Ok(HttpResponse::Ok().json(CurrencyBody::from(currency)))
}

#[instrument(skip(http_request, request_body, app_state), fields(service = "updateCurrency", trace_id = get_trace_id(&http_request), result))]
#[put("/currencies/{code}")]
pub async fn currencies_update(path: Path<String>, http_request: HttpRequest, request_body: web::Json<CurrencyBody>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    current_user(&http_request, &app_state).instrument(span.clone()).await?;
    let currency = CurrencyType::from(request_body).validate()?;
    let currency = app_state.reference_data_service.update_currency(&path.into_inner(), currency).instrument(span).await?;
    Ok(HttpResponse::Ok().json(CurrencyBody::from(currency)))
}

#[instrument(skip(http_request, app_state), fields(service = "deleteCurrency", trace_id = get_trace_id(&http_request), result))]
#[delete("/currencies/{code}")]
pub async fn currencies_delete(path: Path<String>, http_request: HttpRequest, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    current_user(&http_request, &app_state).instrument(span.clone()).await?;
    app_state.reference_data_service.delete_currency(&path.into_inner()).instrument(span).await?;
    Ok(HttpResponse::Ok().json(DetailResponse::deleted("Currency")))
}

/***************** Exchange rates *********************/

/**
 * Refreshes rates from the feed for one date, or for every value date lacking rates.
 */
#[instrument(skip(http_request, app_state), fields(service = "refreshExchangeRates", trace_id = get_trace_id(&http_request), result))]
#[post("/exchange-rates/refresh")]
pub async fn exchange_rates_refresh(http_request: HttpRequest, query: web::Query<RefreshQuery>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    current_user(&http_request, &app_state).instrument(span.clone()).await?;
    let summary = app_state.rate_refresher.refresh(query.target_date).instrument(span).await?;
    Ok(HttpResponse::Ok().json(RefreshSummaryResponse::from(summary)))
}

#[instrument(skip(http_request, app_state), fields(service = "listExchangeRates", trace_id = get_trace_id(&http_request), result))]
#[get("/exchange-rates/")]
pub async fn exchange_rates_list(http_request: HttpRequest, pagination: web::Query<PaginationQuery>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    current_user(&http_request, &app_state).instrument(span.clone()).await?;
    let pagination_input = PaginationInput::from(pagination).validate()?;
    let exchange_rates = app_state.exchange_rate_service.get_exchange_rate_list(pagination_input).instrument(span).await?;
    Ok(HttpResponse::Ok().json(exchange_rates.into_iter().map(ExchangeRateResponse::from).collect::<Vec<_>>()))
}

#[instrument(skip(http_request, request_body, app_state), fields(service = "addExchangeRate", trace_id = get_trace_id(&http_request), result))]
#[post("/exchange-rates/")]
pub async fn exchange_rates_add(http_request: HttpRequest, request_body: web::Json<ExchangeRateRequest>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    current_user(&http_request, &app_state).instrument(span.clone()).await?;
    let exchange_rate_input = ExchangeRateInputType::from(request_body).validate()?;
    let exchange_rate = app_state.exchange_rate_service.add_exchange_rate(exchange_rate_input).instrument(span).await?;
    Ok(HttpResponse::Ok().json(ExchangeRateResponse::from(exchange_rate)))
}

#[instrument(skip(http_request, request_body, app_state), fields(service = "updateExchangeRate", trace_id = get_trace_id(&http_request), result))]
#[put("/exchange-rates/{exchangeRateId}")]
pub async fn exchange_rates_update(path: Path<i64>, http_request: HttpRequest, request_body: web::Json<ExchangeRateRequest>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    current_user(&http_request, &app_state).instrument(span.clone()).await?;
    let exchange_rate_input = ExchangeRateInputType::from(request_body).validate()?;
    let exchange_rate = app_state.exchange_rate_service.update_exchange_rate(path.into_inner(), exchange_rate_input).instrument(span).await?;
    Ok(HttpResponse::Ok().json(ExchangeRateResponse::from(exchange_rate)))
}

#[instrument(skip(http_request, app_state), fields(service = "deleteExchangeRate", trace_id = get_trace_id(&http_request), result))]
#[delete("/exchange-rates/{exchangeRateId}")]
pub async fn exchange_rates_delete(path: Path<i64>, http_request: HttpRequest, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    current_user(&http_request, &app_state).instrument(span.clone()).await?;
    app_state.exchange_rate_service.delete_exchange_rate(path.into_inner()).instrument(span).await?;
    Ok(HttpResponse::Ok().json(DetailResponse::deleted("Exchange rate")))
}

/***************** Indicator values *********************/

/**
 * Lists indicator values with their amounts converted into the target currency.
 */
#[instrument(skip(http_request, app_state), fields(service = "listIndicatorValues", trace_id = get_trace_id(&http_request), result))]
#[get("/indicator-values/")]
pub async fn indicator_values_list(http_request: HttpRequest, query: web::Query<IndicatorValuesQuery>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    current_user(&http_request, &app_state).instrument(span.clone()).await?;
    let pagination_input = query.pagination().validate()?;
    let filter = query.filter();
    let indicator_values = app_state.indicator_value_service.get_indicator_value_list(pagination_input, filter, &query.target_currency).instrument(span).await?;
    let response: Vec<ConvertedIndicatorValueResponse> = indicator_values.into_iter().map(|converted| ConvertedIndicatorValueResponse::from((converted, query.target_currency.as_str()))).collect();
    Ok(HttpResponse::Ok().json(response))
}

#[instrument(skip(http_request, request_body, app_state), fields(service = "addIndicatorValue", trace_id = get_trace_id(&http_request), result))]
#[post("/indicator-values/")]
pub async fn indicator_values_add(http_request: HttpRequest, request_body: web::Json<IndicatorValueRequest>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    current_user(&http_request, &app_state).instrument(span.clone()).await?;
    let indicator_value = app_state.indicator_value_service.add_indicator_value(IndicatorValueInputType::from(request_body)).instrument(span).await?;
    Ok(HttpResponse::Created().json(IndicatorValueResponse::from(indicator_value)))
}

#[instrument(skip(http_request, request_body, app_state), fields(service = "updateIndicatorValue", trace_id = get_trace_id(&http_request), result))]
#[put("/indicator-values/{indicatorValueId}")]
pub async fn indicator_values_update(path: Path<i64>, http_request: HttpRequest, request_body: web::Json<IndicatorValueRequest>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    current_user(&http_request, &app_state).instrument(span.clone()).await?;
    let indicator_value = app_state.indicator_value_service.update_indicator_value(path.into_inner(), IndicatorValueInputType::from(request_body)).instrument(span).await?;
    Ok(HttpResponse::Ok().json(IndicatorValueResponse::from(indicator_value)))
}

#[instrument(skip(http_request, app_state), fields(service = "deleteIndicatorValue", trace_id = get_trace_id(&http_request), result))]
#[delete("/indicator-values/{indicatorValueId}")]
pub async fn indicator_values_delete(path: Path<i64>, http_request: HttpRequest, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    current_user(&http_request, &app_state).instrument(span.clone()).await?;
    app_state.indicator_value_service.delete_indicator_value(path.into_inner()).instrument(span).await?;
    Ok(HttpResponse::Ok().json(DetailResponse::deleted("Indicator value")))
}

/***************** Weighted report *********************/

/**
 * Weighted indicators of an enterprise as a list, an aggregate or grouped by period.
 */
#[instrument(skip(http_request, app_state), fields(service = "weightedIndicators", trace_id = get_trace_id(&http_request), result))]
#[get("/weighted-indicators/")]
pub async fn weighted_indicators(http_request: HttpRequest, query: web::Query<WeightedIndicatorsQuery>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    current_user(&http_request, &app_state).instrument(span.clone()).await?;
    let enterprise_id = query.enterprise_id;
    let report_input = WeightedReportInputType::try_from(query)?;
    let report = app_state.report_service.get_weighted_report(enterprise_id, report_input).instrument(span).await?;
    Ok(HttpResponse::Ok().json(WeightedReportResponse::from(report)))
}

/**
 * Validates the bearer token and resolves the user it was issued to.
 */
async fn current_user(http_request: &HttpRequest, app_state: &AppState) -> Result<UserType, ApplicationError> {
    let user_id = app_state.jwt_service.validate(http_request)?;
    app_state.user_service.get_current_user(user_id).await
}

fn multipart_error(err: actix_multipart::MultipartError) -> ApplicationError {
    ApplicationError::new(ErrorType::Validation, format!("Invalid multipart payload: {err}"))
}

/**
 * Retrieves the trace ID from the HTTP request headers.
 * If the trace ID is not present, a new UUID is generated.
 */
fn get_trace_id(http_request: &HttpRequest) -> String {
    http_request.headers().get("X-Trace-ID").and_then(|v| v.to_str().ok().map(std::string::ToString::to_string)).unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::time::Duration;

    use actix_web::{App, http::StatusCode, test::TestRequest};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::*;
    use crate::{
        api::{rest::{json_config, query_config}, security::JwtSecurityService},
        dao::{currency::CurrencyDao, enterprise::EnterpriseDao, exchange_rate::ExchangeRateDao, indicator::IndicatorDao, indicator_value::IndicatorValueDao, user::UserDao},
        model::config::AppSecurity,
        service::{
            feed::{BaseRates, RateFeed, RetryPolicy},
            rates::ExchangeRateService,
            reference::ReferenceDataService,
            refresher::{RateRefresher, RateStore},
            reporting::ReportService,
            storage::LocalAvatarStorage,
            users::UserService,
            values::IndicatorValueService,
        },
    };

    struct NoFeed {}

    #[async_trait]
    impl RateFeed for NoFeed {
        async fn fetch_base_rates(&self, _date: NaiveDate) -> Result<BaseRates, ApplicationError> {
            Err(ApplicationError::new(ErrorType::ExternalService, "offline".to_string()))
        }
    }

    struct NoStore {}

    #[async_trait]
    impl RateStore for NoStore {
        async fn dates_missing_coverage(&self, _currencies: &[String], _required_pairs: i64) -> Result<Vec<NaiveDate>, ApplicationError> {
            Ok(Vec::new())
        }

        async fn existing_pairs(&self, _rate_date: NaiveDate, _currencies: &[String]) -> Result<Vec<(String, String)>, ApplicationError> {
            Ok(Vec::new())
        }

        async fn find_rate(&self, _from_currency: &str, _to_currency: &str, _rate_date: NaiveDate) -> Result<Option<Decimal>, ApplicationError> {
            Ok(None)
        }

        async fn insert_rate(&self, _exchange_rate_input: ExchangeRateInputType) -> Result<(), ApplicationError> {
            Ok(())
        }

        async fn update_rate(&self, _from_currency: &str, _to_currency: &str, _rate_date: NaiveDate, _rate: Decimal) -> Result<(), ApplicationError> {
            Ok(())
        }
    }

    fn security_config() -> AppSecurity {
        AppSecurity { access_secret: "access".to_string(), refresh_secret: "refresh".to_string(), access_token_minutes: 30, refresh_token_days: 30 }
    }

    fn app_state() -> web::Data<AppState> {
        web::Data::new(AppState::new(
            JwtSecurityService::new(&security_config()).unwrap(),
            UserService::new(UserDao::new(), Arc::new(LocalAvatarStorage::new(std::env::temp_dir(), "/uploads")), 1024, None),
            ReferenceDataService::new(EnterpriseDao::new(), IndicatorDao::new(), CurrencyDao::new(), None),
            ExchangeRateService::new(ExchangeRateDao::new(), None),
            IndicatorValueService::new(IndicatorValueDao::new(), ExchangeRateDao::new(), EnterpriseDao::new(), IndicatorDao::new(), CurrencyDao::new(), None),
            ReportService::new(IndicatorValueDao::new(), ExchangeRateDao::new(), None),
            Arc::new(RateRefresher::new(Arc::new(NoFeed {}), Arc::new(NoStore {}), RetryPolicy::new(1, Duration::ZERO))),
        ))
    }

    #[actix_web::test]
    async fn test_get_trace_id_exists() {
        let request = TestRequest::default().insert_header(("X-Trace-ID", "test")).to_http_request();
        let trace_id = get_trace_id(&request);
        assert_eq!(trace_id, "test");
    }

    #[actix_web::test]
    async fn test_get_trace_id_not_exists() {
        let request = TestRequest::default().to_http_request();
        let trace_id = get_trace_id(&request);
        assert!(!trace_id.is_empty());
    }

    #[actix_web::test]
    async fn test_requires_bearer_token() {
        let app = actix_web::test::init_service(App::new().app_data(app_state()).app_data(query_config()).configure(configure)).await;
        for uri in ["/enterprises/", "/indicators/", "/currencies/", "/exchange-rates/", "/indicator-values/", "/users/me", "/weighted-indicators/?enterprise_id=1"] {
            let response = actix_web::test::call_service(&app, TestRequest::get().uri(uri).to_request()).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }
        let response = actix_web::test::call_service(&app, TestRequest::post().uri("/exchange-rates/refresh").to_request()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_unauthorized_body() {
        let app = actix_web::test::init_service(App::new().app_data(app_state()).configure(configure)).await;
        let request = TestRequest::get().uri("/users/me").insert_header(("Authorization", "Bearer not-a-token")).to_request();
        let body: serde_json::Value = actix_web::test::call_and_read_body_json(&app, request).await;
        assert_eq!(body, serde_json::json!({"code": 1000, "message": "Could not validate credentials"}));
    }

    #[actix_web::test]
    async fn test_refresh_with_invalid_token() {
        let app = actix_web::test::init_service(App::new().app_data(app_state()).app_data(json_config()).configure(configure)).await;
        let request = TestRequest::post().uri("/token/refresh").set_json(serde_json::json!({"refresh_token": "garbage"})).to_request();
        let response = actix_web::test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = actix_web::test::read_body_json(response).await;
        assert_eq!(body["message"], "Could not validate refresh token");
    }

    #[actix_web::test]
    async fn test_refresh_for_missing_user() {
        let state = app_state();
        let refresh_token = state.jwt_service.issue_token_pair(99).unwrap().refresh_token.unwrap();
        let app = actix_web::test::init_service(App::new().app_data(state).configure(configure)).await;
        let request = TestRequest::post().uri("/token/refresh").set_json(serde_json::json!({ "refresh_token": refresh_token })).to_request();
        let response = actix_web::test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_register_rejects_empty_username() {
        let app = actix_web::test::init_service(App::new().app_data(app_state()).app_data(json_config()).configure(configure)).await;
        let request = TestRequest::post().uri("/register").set_json(serde_json::json!({"username": " ", "password": "secret"})).to_request();
        let response = actix_web::test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_malformed_body_is_validation_error() {
        let app = actix_web::test::init_service(App::new().app_data(app_state()).app_data(json_config()).configure(configure)).await;
        let request = TestRequest::post().uri("/register").set_json(serde_json::json!({"username": "user"})).to_request();
        let body: serde_json::Value = actix_web::test::call_and_read_body_json(&app, request).await;
        assert_eq!(body["code"], 1004);
    }
}
