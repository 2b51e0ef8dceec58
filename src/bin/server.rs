//! HTTP Server for the insight pipeline
//! Simple JSON API over tokio and basic HTTP handling

use insight_engine::config::Config;
use insight_engine::ingestion::{ingest_upload, DatasetKind, SourceFormat};
use insight_engine::llm::build_generator;
use insight_engine::pipeline::{InsightPipeline, EXAMPLE_QUESTIONS};
use insight_engine::store::StoreGateway;
use insight_engine::PipelineError;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const MAX_REQUEST_BYTES: usize = 10_000_000;

struct AppState {
    store: StoreGateway,
    /// Absent when no backend credential is configured; store routes still work.
    pipeline: Result<InsightPipeline, String>,
}

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
}

#[derive(Deserialize)]
struct IngestRequest {
    dataset: String,
    /// csv, json or xlsx
    #[serde(default = "default_format")]
    format: String,
    /// Document text; base64 for workbooks
    content: String,
}

fn default_format() -> String {
    "csv".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let store = StoreGateway::open(&config.db_path)?;

    let pipeline = config
        .llm()
        .and_then(|llm| build_generator(&llm))
        .map(|generator| InsightPipeline::new(store.clone(), generator))
        .map_err(|e| e.to_string());
    match &pipeline {
        Ok(_) => info!("Text backend configured ({:?})", config.provider),
        Err(e) => warn!("Question answering disabled: {}", e),
    }

    let state = Arc::new(AppState { store, pipeline });

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("Server listening on http://{}", config.bind_addr);

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("New connection from: {}", addr);
        tokio::spawn(handle_connection(state.clone(), stream));
    }
}

async fn handle_connection(state: Arc<AppState>, mut stream: TcpStream) {
    let mut buffer = Vec::new();
    let mut temp_buf = [0; 8192];

    let read_result = timeout(Duration::from_secs(5), async {
        loop {
            match stream.read(&mut temp_buf).await {
                Ok(0) => break,
                Ok(n) => {
                    buffer.extend_from_slice(&temp_buf[..n]);
                    if let Some(headers_end) = find_headers_end(&buffer) {
                        let content_length =
                            extract_content_length(&String::from_utf8_lossy(&buffer[..headers_end]))
                                .unwrap_or(0);
                        if buffer.len() >= headers_end + content_length {
                            break;
                        }
                    }
                    if buffer.len() > MAX_REQUEST_BYTES {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to read from stream: {}", e);
                    break;
                }
            }
        }
    })
    .await;

    if read_result.is_err() {
        warn!("Request read timeout");
        return;
    }
    if buffer.is_empty() {
        return;
    }

    let response = match String::from_utf8(buffer) {
        Ok(request) => handle_request(&state, &request).await,
        Err(_) => create_response(400, "Bad Request", r#"{"error":"request is not valid UTF-8"}"#),
    };
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        error!("Failed to write response: {}", e);
    }
}

fn find_headers_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn extract_content_length(headers: &str) -> Option<usize> {
    for line in headers.lines() {
        if line.to_lowercase().starts_with("content-length:") {
            if let Some(value) = line.split(':').nth(1) {
                return value.trim().parse().ok();
            }
        }
    }
    None
}

async fn handle_request(state: &AppState, request: &str) -> String {
    let request_line = request.lines().next().unwrap_or("");
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return create_response(400, "Bad Request", "{}");
    }

    let method = parts[0];
    let path = parts[1].split('?').next().unwrap_or("/").trim_end_matches('/');
    let body = request
        .find("\r\n\r\n")
        .map(|i| &request[i + 4..])
        .unwrap_or("")
        .trim();

    info!("Request: {} {}", method, path);

    match (method, path) {
        ("OPTIONS", _) => create_response(204, "No Content", ""),
        ("GET", "/api/health") => {
            let db = state.store.ping().is_ok();
            let body = json!({
                "status": if db { "ok" } else { "degraded" },
                "service": "insight-engine-api",
                "database": db,
                "questions_enabled": state.pipeline.is_ok(),
            });
            create_response(200, "OK", &body.to_string())
        }
        ("GET", "/api/schema") => match state.store.describe_schema() {
            Ok(schema) => json_response(200, "OK", &schema),
            Err(e) => error_response(&e),
        },
        ("GET", "/api/examples") => {
            create_response(200, "OK", &json!({ "examples": EXAMPLE_QUESTIONS }).to_string())
        }
        ("POST", "/api/query") => {
            let req: QueryRequest = match serde_json::from_str(body) {
                Ok(r) => r,
                Err(e) => return bad_request(&format!("Invalid query body: {}", e)),
            };
            if req.question.trim().is_empty() {
                return bad_request("question must not be empty");
            }
            let pipeline = match &state.pipeline {
                Ok(p) => p,
                Err(e) => {
                    return create_response(
                        503,
                        "Service Unavailable",
                        &json!({ "error": e }).to_string(),
                    )
                }
            };
            match pipeline.ask(&req.question).await {
                Ok(response) => json_response(200, "OK", &response),
                Err(e) => error_response(&e),
            }
        }
        ("POST", "/api/ingest") => {
            let req: IngestRequest = match serde_json::from_str(body) {
                Ok(r) => r,
                Err(e) => return bad_request(&format!("Invalid ingest body: {}", e)),
            };
            let parsed = req
                .dataset
                .parse::<DatasetKind>()
                .and_then(|kind| Ok((kind, req.format.parse::<SourceFormat>()?)));
            let (kind, format) = match parsed {
                Ok(v) => v,
                Err(e) => return bad_request(&e.to_string()),
            };
            match ingest_upload(&state.store, kind, format, &req.content) {
                Ok(report) => json_response(200, "OK", &report),
                Err(e) => error_response(&e),
            }
        }
        _ => create_response(404, "Not Found", r#"{"error":"Not Found"}"#),
    }
}

fn json_response<T: serde::Serialize>(status: u16, status_text: &str, value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(body) => create_response(status, status_text, &body),
        Err(e) => create_response(
            500,
            "Internal Server Error",
            &json!({ "error": e.to_string() }).to_string(),
        ),
    }
}

fn bad_request(message: &str) -> String {
    create_response(400, "Bad Request", &json!({ "error": message }).to_string())
}

fn error_response(e: &PipelineError) -> String {
    let (status, text) = match e {
        PipelineError::QueryExecution { .. } | PipelineError::Ingestion { .. } => (422, "Unprocessable Entity"),
        PipelineError::Synthesis(_) => (502, "Bad Gateway"),
        PipelineError::Config(_) => (503, "Service Unavailable"),
        _ => (500, "Internal Server Error"),
    };
    let body = json!({
        "error": e.to_string(),
        "sql": e.sql(),
    });
    create_response(status, text, &body.to_string())
}

fn create_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {}",
        status,
        status_text,
        body.len(),
        body
    )
}
