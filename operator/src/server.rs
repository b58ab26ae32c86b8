use crate::Manager;
use actix_web::{
    HttpRequest, HttpResponse, Responder, get, post,
    web::{self, Bytes, Data},
};
use common::{
    Notification,
    notification::{ChangeMessage, EventMessage},
    router::Disposition,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::warn;

#[get("/metrics")]
async fn metrics(c: Data<Manager>, _req: HttpRequest) -> impl Responder {
    HttpResponse::Ok()
        .content_type(prometheus::TEXT_FORMAT)
        .body(c.metrics())
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/version")]
async fn version(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json(json!({"version": env!("CARGO_PKG_VERSION")}))
}

#[get("/readyz")]
async fn readyz(c: Data<Manager>) -> impl Responder {
    if c.is_ready() {
        HttpResponse::Ok().json("ready")
    } else {
        HttpResponse::ServiceUnavailable().json("shutting down")
    }
}

#[get("/")]
async fn index(c: Data<Manager>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

async fn ingest<T>(c: &Manager, body: &Bytes, family: &str) -> HttpResponse
where
    T: DeserializeOwned + Into<Notification>,
{
    let msg: T = match serde_json::from_slice(body) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(family, error = %e, "rejecting unparseable notification");
            return HttpResponse::BadRequest().json(json!({"error": e.to_string()}));
        }
    };
    match c.ingest(msg.into()).await {
        Disposition::Closed => HttpResponse::ServiceUnavailable().json(json!({"disposition": "closed"})),
        d => HttpResponse::Accepted().json(json!({"disposition": d.as_str()})),
    }
}

#[post("/api/v1/changes")]
async fn changes(c: Data<Manager>, body: Bytes) -> impl Responder {
    ingest::<ChangeMessage>(&c, &body, "change").await
}

#[post("/api/v1/events")]
async fn events(c: Data<Manager>, body: Bytes) -> impl Responder {
    ingest::<EventMessage>(&c, &body, "event").await
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(index)
        .service(health)
        .service(readyz)
        .service(version)
        .service(metrics)
        .service(changes)
        .service(events);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Parameters;
    use actix_web::{App, http::StatusCode, test};
    use clap::Parser;
    use common::mock::{MetadataMock, ReleaseMock};
    use std::{sync::Arc, time::Duration};

    fn manager(name: &str) -> (Manager, Arc<ReleaseMock>, Arc<MetadataMock>) {
        let values = std::env::temp_dir().join(format!("server-{}-{name}.yaml", std::process::id()));
        std::fs::write(&values, "replicas: 1\n").unwrap();
        let params = Parameters::try_parse_from([
            "operator",
            "--chart-path",
            "/charts/haproxy",
            "--chart-values-path",
            values.to_str().unwrap(),
            "--api-endpoint",
            "http://lb-api/query",
            "--backoff-min-interval",
            "1",
            "--backoff-max-interval",
            "5",
            "--backoff-max-retries",
            "2",
        ])
        .unwrap();
        let release = Arc::new(ReleaseMock::new());
        let metadata = Arc::new(MetadataMock::new());
        let manager = Manager::with_backends(&params, release.clone(), metadata.clone()).unwrap();
        (manager, release, metadata)
    }

    #[actix_web::test]
    async fn test_change_is_acknowledged_and_reconciled() {
        let (m, release, metadata) = manager("change");
        metadata.insert("loadbal-a", &[80], &["192.0.2.3"]);
        let app = test::init_service(App::new().app_data(Data::new(m.clone())).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/changes")
            .set_payload(r#"{"subjectID": "loadbal-a", "eventType": "create"}"#)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["disposition"], "routed");

        for _ in 0..200 {
            if release.count("upgrade") == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(release.count("upgrade"), 1);

        let req = test::TestRequest::get().uri("/").to_request();
        let diag: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(diag["notifications"], 1);
        assert_eq!(diag["last_subject"], "loadbal-a");
        m.shutdown().await;
    }

    #[actix_web::test]
    async fn test_ignored_event_is_still_acknowledged() {
        let (m, release, _metadata) = manager("ignored");
        let app = test::init_service(App::new().app_data(Data::new(m)).configure(configure)).await;
        let req = test::TestRequest::post()
            .uri("/api/v1/events")
            .set_payload(r#"{"subjectID": "ipamipa-1", "additionalSubjectIDs": ["lctnloc-x"], "eventType": "ip-address.assigned"}"#)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["disposition"], "not_tracked");
        assert!(release.calls().is_empty());
    }

    #[actix_web::test]
    async fn test_garbage_is_rejected() {
        let (m, _release, _metadata) = manager("garbage");
        let app = test::init_service(App::new().app_data(Data::new(m)).configure(configure)).await;
        for payload in ["not json", r#"{"subjectID": "nodash", "eventType": "create"}"#] {
            let req = test::TestRequest::post()
                .uri("/api/v1/changes")
                .set_payload(payload)
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[actix_web::test]
    async fn test_probes_and_metrics() {
        let (m, _release, _metadata) = manager("probes");
        let app = test::init_service(App::new().app_data(Data::new(m.clone())).configure(configure)).await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = test::call_service(&app, test::TestRequest::get().uri("/readyz").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let req = test::TestRequest::get().uri("/version").to_request();
        let v: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(v["version"], env!("CARGO_PKG_VERSION"));

        let req = test::TestRequest::post()
            .uri("/api/v1/changes")
            .set_payload(r#"{"subjectID": "loadprt-1", "eventType": "update"}"#)
            .to_request();
        test::call_service(&app, req).await;
        let body = test::call_and_read_body(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("disposition=\"not_tracked\""));

        m.shutdown().await;
        let resp = test::call_service(&app, test::TestRequest::get().uri("/readyz").to_request()).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let req = test::TestRequest::post()
            .uri("/api/v1/changes")
            .set_payload(r#"{"subjectID": "loadbal-a", "eventType": "update"}"#)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
