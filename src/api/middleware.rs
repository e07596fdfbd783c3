use actix_web::{
    Error,
    body::MessageBody,
    dev::{ServiceRequest, ServiceResponse},
    http::header::HeaderName,
    middleware::Next,
};
use tracing::debug;

const TRACE_ID_HEADER: &str = "x-trace-id";

/**
 * Logs the duration of each request and echoes the trace id of the request on the response.
 */
pub async fn timing_middleware(request: ServiceRequest, next: Next<impl MessageBody>) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let start_time = std::time::Instant::now();
    let path = request.match_pattern().unwrap_or_else(|| request.path().to_owned());
    let method = request.method().to_owned();
    let trace_id = request.headers().get(TRACE_ID_HEADER).cloned();
    let response = next.call(request).await;
    let duration = start_time.elapsed();
    match response {
        Ok(mut service_response) => {
            debug!(target: "performance", "Request for {} {} with status {} processed in {}ms", method, path, service_response.status().as_u16(), duration.as_millis());
            if let Some(trace_id) = trace_id {
                service_response.headers_mut().insert(HeaderName::from_static(TRACE_ID_HEADER), trace_id);
            }
            Ok(service_response)
        }
        Err(err) => {
            debug!(target: "performance", "Request for {} {} failed after {}ms: {}", method, path, duration.as_millis(), err);
            Err(err)
        }
    }
}
