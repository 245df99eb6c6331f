//! HTTP surface
//!
//! - `POST /collect` starts a run (`{"request_id": ".."}` or a form field)
//! - `GET /progress/{request_id}` reports completion percentage
//! - `GET /metrics` Prometheus text
//! - `GET /health` liveness

use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;

use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::IngestionError;
use crate::metrics::gather_metrics;
use crate::service::IngestionService;

type HttpResponse = Response<Full<Bytes>>;

#[derive(Debug, Default, Deserialize)]
struct CollectBody {
    request_id: Option<String>,
    /// Field name used by older clients
    user_defined_id: Option<String>,
}

impl CollectBody {
    fn into_request_id(self) -> Option<String> {
        self.request_id
            .or(self.user_defined_id)
            .filter(|id| !id.trim().is_empty())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> HttpResponse {
    let payload = serde_json::to_vec(body).unwrap_or_default();
    let mut response = Response::new(Full::new(Bytes::from(payload)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn error_response(status: StatusCode, message: &str) -> HttpResponse {
    json_response(status, &ErrorBody { error: message })
}

fn text_response(status: StatusCode, body: String) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; version=0.0.4"));
    response
}

fn status_for(err: &IngestionError) -> StatusCode {
    match err {
        IngestionError::InvalidRequestId(_) => StatusCode::BAD_REQUEST,
        IngestionError::NotFound(_) => StatusCode::NOT_FOUND,
        IngestionError::DuplicateRequest(_) => StatusCode::CONFLICT,
        IngestionError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn is_json(req_headers: &hyper::HeaderMap) -> bool {
    req_headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v.starts_with("application/json"))
}

fn parse_collect_body(json: bool, bytes: &[u8]) -> Option<String> {
    let body = if json {
        serde_json::from_slice::<CollectBody>(bytes).ok()?
    } else {
        let mut body = CollectBody::default();
        for (key, value) in url::form_urlencoded::parse(bytes) {
            match key.as_ref() {
                "request_id" => body.request_id = Some(value.into_owned()),
                "user_defined_id" => body.user_defined_id = Some(value.into_owned()),
                _ => {}
            }
        }
        body
    };

    body.into_request_id()
}

async fn collect<B>(service: &IngestionService, req: Request<B>) -> HttpResponse
where
    B: Body<Data = Bytes>,
    B::Error: fmt::Display,
{
    let json = is_json(req.headers());
    let bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!(error = %e, "Failed to read request body");
            return error_response(StatusCode::BAD_REQUEST, "unreadable request body");
        }
    };

    let Some(request_id) = parse_collect_body(json, &bytes) else {
        return error_response(StatusCode::BAD_REQUEST, "request_id not provided");
    };

    match service.start_ingestion(&request_id) {
        Ok(ack) => json_response(StatusCode::ACCEPTED, &ack),
        Err(e) => error_response(status_for(&e), &e.to_string()),
    }
}

async fn progress(service: &IngestionService, raw_id: &str) -> HttpResponse {
    let request_id = percent_decode_str(raw_id).decode_utf8_lossy();

    match service.get_progress(&request_id).await {
        Ok(progress) => json_response(StatusCode::OK, &progress),
        Err(IngestionError::NotFound(_)) => {
            error_response(StatusCode::NOT_FOUND, "request id not found")
        }
        Err(e) => {
            error!(request_id = %request_id, error = %e, "Progress query failed");
            error_response(status_for(&e), &e.to_string())
        }
    }
}

/// Routes one request
pub async fn handle<B>(service: &IngestionService, req: Request<B>) -> HttpResponse
where
    B: Body<Data = Bytes>,
    B::Error: fmt::Display,
{
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    debug!(method = %method, path = %path, "HTTP request");

    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match (method, segments.as_slice()) {
        (Method::POST, ["collect"]) => collect(service, req).await,
        (Method::GET, ["progress", id]) if !id.is_empty() => progress(service, id).await,
        (Method::GET, ["metrics"]) => text_response(StatusCode::OK, gather_metrics()),
        (Method::GET, ["health"]) => text_response(StatusCode::OK, "ok".to_string()),
        (_, ["collect"]) | (_, ["progress", _]) | (_, ["metrics"]) | (_, ["health"]) => {
            error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
        }
        _ => error_response(StatusCode::NOT_FOUND, "not found"),
    }
}

/// Serves the API until `shutdown` is cancelled
pub async fn serve(
    addr: SocketAddr,
    service: IngestionService,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(address = %addr, "HTTP API listening");

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted?,
        };
        let io = TokioIo::new(stream);
        let service = service.clone();

        tokio::spawn(async move {
            let handler = service_fn(move |req: Request<Incoming>| {
                let service = service.clone();
                async move { Ok::<_, Infallible>(handle(&service, req).await) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, handler).await {
                error!(peer = %peer, error = %e, "Error serving HTTP connection");
            }
        });
    }

    info!("HTTP API stopped accepting connections");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CityCatalog;
    use crate::error::Result;
    use crate::pipeline::{IngestionPipeline, PipelineConfig};
    use crate::sources::{CurrentConditions, WeatherSource};
    use crate::storage::{MeasurementStore, MemoryStore};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct SunnySource;

    #[async_trait]
    impl WeatherSource for SunnySource {
        async fn current_conditions(&self, _city_id: i64) -> Result<CurrentConditions> {
            Ok(CurrentConditions {
                temperature_celsius: 25.0,
                humidity: 60.0,
            })
        }

        fn name(&self) -> &str {
            "sunny"
        }
    }

    fn service(store: Arc<MemoryStore>) -> IngestionService {
        let pipeline = IngestionPipeline::new(
            CityCatalog::new(vec![100, 200, 300]).unwrap(),
            Arc::new(SunnySource),
            store,
            PipelineConfig::default(),
        );
        IngestionService::new(Arc::new(pipeline))
    }

    fn request(method: Method, uri: &str, content_type: &str, body: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, content_type)
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap()
    }

    async fn body_json(response: HttpResponse) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_collect_json_accepted() {
        let service = service(Arc::new(MemoryStore::new()));
        let req = request(Method::POST, "/collect/", "application/json", r#"{"request_id": "run-1"}"#);

        let response = handle(&service, req).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = body_json(response).await;
        assert_eq!(body["request_id"], "run-1");
        assert_eq!(body["message"], "ingestion started");
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_collect_form_legacy_field() {
        let service = service(Arc::new(MemoryStore::new()));
        let req = request(
            Method::POST,
            "/collect",
            "application/x-www-form-urlencoded",
            "user_defined_id=legacy+run",
        );

        let response = handle(&service, req).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(response).await["request_id"], "legacy run");
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_collect_missing_id() {
        let service = service(Arc::new(MemoryStore::new()));

        for body in [r#"{}"#, r#"{"request_id": ""}"#, "not json"] {
            let req = request(Method::POST, "/collect", "application/json", body);
            let response = handle(&service, req).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
        assert_eq!(service.active_runs(), 0);
    }

    #[tokio::test]
    async fn test_progress_found_and_missing() {
        let store = Arc::new(MemoryStore::new());
        store.create_request("run 1").await.unwrap();
        let service = service(store);

        let req = request(Method::GET, "/progress/run%201/", "text/plain", "");
        let response = handle(&service, req).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({"progress_percent": 0.0}));

        let req = request(Method::GET, "/progress/nonexistent", "text/plain", "");
        let response = handle(&service, req).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "request id not found");
    }

    #[tokio::test]
    async fn test_routing_errors() {
        let service = service(Arc::new(MemoryStore::new()));

        let response = handle(&service, request(Method::GET, "/collect", "text/plain", "")).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let response = handle(&service, request(Method::GET, "/nowhere", "text/plain", "")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = handle(&service, request(Method::GET, "/health", "text/plain", "")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
