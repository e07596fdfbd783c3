use std::sync::Arc;

use crate::{
    api::security::JwtSecurityService,
    service::{rates::ExchangeRateService, reference::ReferenceDataService, refresher::RateRefresher, reporting::ReportService, users::UserService, values::IndicatorValueService},
};

/**
* Represents the application state shared across the Actix web application.
*/
pub struct AppState {
    /**
     * The JWT security service for handling authentication and authorization.
     */
    pub jwt_service: JwtSecurityService,
    pub user_service: UserService,
    /**
     * Enterprises, indicators and currencies.
     */
    pub reference_data_service: ReferenceDataService,
    pub exchange_rate_service: ExchangeRateService,
    pub indicator_value_service: IndicatorValueService,
    pub report_service: ReportService,
    /**
     * Shared with the background refresh task.
     */
    pub rate_refresher: Arc<RateRefresher>,
}

impl AppState {
    pub fn new(
        jwt_service: JwtSecurityService,
        user_service: UserService,
        reference_data_service: ReferenceDataService,
        exchange_rate_service: ExchangeRateService,
        indicator_value_service: IndicatorValueService,
        report_service: ReportService,
        rate_refresher: Arc<RateRefresher>,
    ) -> Self {
        AppState { jwt_service, user_service, reference_data_service, exchange_rate_service, indicator_value_service, report_service, rate_refresher }
    }
}
