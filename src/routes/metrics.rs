use axum::extract::State;
use metrics_exporter_prometheus::PrometheusHandle;

/// GET /metrics: Prometheus text exposition.
pub async fn render(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
