use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
static DOCUMENT_SAVES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static UPLOADS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static CONTACT_DELIVERIES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static LOGINS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static ACTIVE_SESSIONS: OnceLock<IntGauge> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

fn register_collector<T>(collector: T) -> T
where
    T: prometheus::core::Collector + Clone + 'static,
{
    let _ = registry().register(Box::new(collector.clone()));
    collector
}

fn counter_vec(
    cell: &'static OnceLock<IntCounterVec>,
    name: &str,
    help: &str,
    labels: &[&str],
) -> &'static IntCounterVec {
    cell.get_or_init(|| {
        register_collector(
            IntCounterVec::new(Opts::new(name, help), labels)
                .unwrap_or_else(|err| panic!("create {}: {}", name, err)),
        )
    })
}

fn http_requests_total() -> &'static IntCounterVec {
    counter_vec(
        &HTTP_REQUESTS_TOTAL,
        "folio_http_requests_total",
        "HTTP request count.",
        &["route", "method", "status"],
    )
}

fn http_request_duration_seconds() -> &'static HistogramVec {
    HTTP_REQUEST_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            HistogramVec::new(
                HistogramOpts::new(
                    "folio_http_request_duration_seconds",
                    "HTTP request duration in seconds.",
                )
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
                &["route", "method", "outcome"],
            )
            .expect("create folio_http_request_duration_seconds"),
        )
    })
}

fn document_saves_total() -> &'static IntCounterVec {
    counter_vec(
        &DOCUMENT_SAVES_TOTAL,
        "folio_document_saves_total",
        "Profile document saves by outcome.",
        &["outcome"],
    )
}

fn uploads_total() -> &'static IntCounterVec {
    counter_vec(
        &UPLOADS_TOTAL,
        "folio_uploads_total",
        "Profile image uploads by outcome.",
        &["outcome"],
    )
}

fn contact_deliveries_total() -> &'static IntCounterVec {
    counter_vec(
        &CONTACT_DELIVERIES_TOTAL,
        "folio_contact_deliveries_total",
        "Contact form messages by delivery outcome.",
        &["outcome"],
    )
}

fn logins_total() -> &'static IntCounterVec {
    counter_vec(
        &LOGINS_TOTAL,
        "folio_logins_total",
        "Admin login attempts by outcome.",
        &["outcome"],
    )
}

fn active_sessions() -> &'static IntGauge {
    ACTIVE_SESSIONS.get_or_init(|| {
        register_collector(
            IntGauge::new("folio_active_sessions", "Admin sessions currently valid.")
                .expect("create folio_active_sessions"),
        )
    })
}

pub fn observe_http_request(route: &str, method: &str, status: u16, duration: Duration) {
    let status_str = status.to_string();
    http_requests_total()
        .with_label_values(&[route, method, status_str.as_str()])
        .inc();

    let outcome = if (200..400).contains(&status) {
        "success"
    } else {
        "error"
    };
    http_request_duration_seconds()
        .with_label_values(&[route, method, outcome])
        .observe(duration.as_secs_f64());
}

pub fn observe_document_save(outcome: &str) {
    document_saves_total().with_label_values(&[outcome]).inc();
}

pub fn observe_upload(outcome: &str) {
    uploads_total().with_label_values(&[outcome]).inc();
}

pub fn observe_contact_delivery(outcome: &str) {
    contact_deliveries_total()
        .with_label_values(&[outcome])
        .inc();
}

pub fn observe_login(outcome: &str) {
    logins_total().with_label_values(&[outcome]).inc();
}

pub fn set_active_sessions(count: usize) {
    active_sessions().set(count as i64);
}

pub fn render() -> Result<(Vec<u8>, String), prometheus::Error> {
    let _ = document_saves_total();
    let _ = contact_deliveries_total();
    let _ = active_sessions();

    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_text_names_observed_series() {
        observe_contact_delivery("not_configured");
        observe_http_request("/", "GET", 200, Duration::from_millis(3));

        let (body, content_type) = render().unwrap();
        let body = String::from_utf8(body).unwrap();
        assert!(content_type.starts_with("text/plain"));
        assert!(body.contains("folio_contact_deliveries_total{outcome=\"not_configured\"}"));
        assert!(body.contains("folio_http_requests_total"));
    }
}
