//! Probe and metrics endpoints.

use actix_web::{web, HttpResponse};
use keymirror_observability::{HealthRegistry, Metrics};
use std::sync::Arc;

/// Liveness: the process is up.
pub async fn healthz() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

/// Readiness: unhealthy only while a critical component's most recent
/// attempt failed.
pub async fn readyz(health: web::Data<Arc<HealthRegistry>>) -> HttpResponse {
    let snapshot = health.snapshot();
    if snapshot.ready {
        HttpResponse::Ok().json(snapshot)
    } else {
        HttpResponse::ServiceUnavailable().json(snapshot)
    }
}

/// JSON snapshot of every metric.
pub async fn metrics(
    metrics: web::Data<Arc<Metrics>>,
    health: web::Data<Arc<HealthRegistry>>,
) -> HttpResponse {
    HttpResponse::Ok().json(metrics.snapshot(health.status_map()))
}

/// Route table for the probe server.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/healthz", web::get().to(healthz))
        .route("/readyz", web::get().to(readyz))
        .route("/metrics", web::get().to(metrics));
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    fn shared() -> (Arc<Metrics>, Arc<HealthRegistry>) {
        (Arc::new(Metrics::new()), Arc::new(HealthRegistry::new()))
    }

    #[actix_web::test]
    async fn test_healthz_is_always_ok() {
        let (metrics, health) = shared();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(metrics))
                .app_data(web::Data::new(health))
                .configure(configure),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/healthz").to_request()).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn test_readyz_reflects_component_failures() {
        let (metrics, health) = shared();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(metrics))
                .app_data(web::Data::new(health.clone()))
                .configure(configure),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/readyz").to_request()).await;
        assert!(resp.status().is_success());

        health.record_failure("publisher", "bucket unreachable");
        let resp = test::call_service(&app, test::TestRequest::get().uri("/readyz").to_request()).await;
        assert_eq!(resp.status().as_u16(), 503);

        health.record_success("publisher");
        let resp = test::call_service(&app, test::TestRequest::get().uri("/readyz").to_request()).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn test_metrics_endpoint_serves_snapshot() {
        let (metrics, health) = shared();
        metrics.record_sync(true);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(metrics))
                .app_data(web::Data::new(health))
                .configure(configure),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
        assert!(resp.status().is_success());
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["sync_success_total"], 1);
    }
}
