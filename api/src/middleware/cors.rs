use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::CorsLayer;

/// Build a CORS layer for the configured browser origins.
///
/// - Origins: `TUTOR_CORS_ORIGINS` (default: `http://localhost:3000`); unparsable entries are skipped
/// - Methods: GET, POST, PATCH, OPTIONS
/// - Headers: Content-Type
/// - Max age: 3600s
pub fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([HeaderName::from_static("content-type")])
        .max_age(std::time::Duration::from_secs(3600))
}
