use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use prometheus::{Encoder, Histogram, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::env;
use tracing::{error, info};

lazy_static::lazy_static! {
    pub static ref METRIC_NAMESPACE: String =
        env::var("METRIC_NAMESPACE").unwrap_or_else(|_| "form_manager".to_string());

    // === Form Manager Metrics ===

    pub static ref FORM_EVALUATIONS_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("form_evaluations_total", "Number of form evaluations by outcome")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["outcome"]  // skipped, no_match, ambiguous, merged, aborted
        ).unwrap();

    pub static ref FORM_FIELDS_MERGED_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("form_fields_merged_total", "Number of form fields appended to requests")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref FORM_RESPONSES_TRACKED_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("form_responses_tracked_total", "Number of responses stored as form source")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    // === Request Metrics ===

    pub static ref REQUEST_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("requests_total", "Total number of HTTP requests made")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref REQUEST_STATUS_CODES: IntCounterVec =
        IntCounterVec::new(
            Opts::new("requests_status_codes_total", "Number of HTTP requests by status code")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["status_code"]
        ).unwrap();

    pub static ref REQUEST_DURATION_SECONDS: Histogram =
        Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "request_duration_seconds",
                "HTTP request latencies in seconds."
            ).namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();
}

/// Registers all metrics with the default Prometheus registry.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    let registry = prometheus::default_registry();

    registry.register(Box::new(FORM_EVALUATIONS_TOTAL.clone()))?;
    registry.register(Box::new(FORM_FIELDS_MERGED_TOTAL.clone()))?;
    registry.register(Box::new(FORM_RESPONSES_TRACKED_TOTAL.clone()))?;

    registry.register(Box::new(REQUEST_TOTAL.clone()))?;
    registry.register(Box::new(REQUEST_STATUS_CODES.clone()))?;
    registry.register(Box::new(REQUEST_DURATION_SECONDS.clone()))?;

    Ok(())
}

/// Encodes every metric of `registry` in the Prometheus text format.
pub fn gather_metrics_string(registry: &Registry) -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::from("# ERROR ENCODING METRICS");
    }
    String::from_utf8(buffer).unwrap_or_else(|e| {
        error!(error = %e, "Metrics output is not valid UTF-8");
        String::from("# ERROR ENCODING METRICS TO UTF-8")
    })
}

/// Serves `/metrics`; every other path gets a 404.
async fn metrics_handler(
    req: Request<Body>,
    registry: Registry,
) -> Result<Response<Body>, hyper::Error> {
    let builder = Response::builder();
    let response = match req.uri().path() {
        "/metrics" | "/" => builder
            .status(200)
            .header("Content-Type", TextEncoder::new().format_type())
            .body(Body::from(gather_metrics_string(&registry))),
        _ => builder.status(404).body(Body::empty()),
    };

    Ok(response.unwrap_or_else(|_| Response::new(Body::empty())))
}

/// Starts the Prometheus metrics HTTP server.
pub async fn start_metrics_server(port: u16, registry: Registry) {
    let addr = ([0, 0, 0, 0], port).into();

    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let registry = registry.clone();
                async move { metrics_handler(req, registry).await }
            }))
        }
    });

    let server = Server::bind(&addr).serve(make_svc);
    info!(port = port, addr = %addr, "Metrics server listening");

    if let Err(e) = server.await {
        error!(error = %e, "Metrics server error");
    }
}
