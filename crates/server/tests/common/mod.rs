//! Common test utilities for in-process API testing.
//!
//! This module provides a test fixture that builds the full router over a
//! seeded SQLite helpdesk, with mock interpreters injected so tests control
//! what the pipeline sees.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use ticketdesk_core::{
    config::{DatabaseConfig, ServerConfig},
    testing::{MockChangeProposer, MockQueryInterpreter},
    ChangeProposer, CommandOrchestrator, Config, EventHub, QueryInterpreter, SqliteTelemetryStore,
    SqliteTicketStore, TelemetryStore, TicketStore,
};
use ticketdesk_server::state::AppState;

/// Re-export fixtures for test convenience
pub use ticketdesk_core::testing::fixtures;

/// Test fixture for API testing with mock interpreters.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_submit_command() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture
///         .post("/api/v1/commands", json!({ "text": "close all waiting tickets" }))
///         .await;
///
///     assert_eq!(response.status, 200);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Shared state behind the router
    pub state: Arc<AppState>,
    /// Mock query interpreter - falls back to the keyword grammar
    pub interpreter: Arc<MockQueryInterpreter>,
    /// Mock change proposer - falls back to the keyword grammar
    pub proposer: Arc<MockChangeProposer>,
    /// Ids of the seeded helpdesk tickets, in seeding order
    pub ticket_ids: Vec<String>,
    /// Temporary directory for the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a new test fixture over the seeded helpdesk.
    pub async fn new() -> Self {
        Self::with_config(Config::default()).await
    }

    /// Create a test fixture with custom configuration. The database path is
    /// always replaced with a temporary one.
    pub async fn with_config(mut config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        config.server = ServerConfig {
            host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            port: 0, // Not used for in-process testing
        };
        config.database = DatabaseConfig {
            path: db_path.clone(),
        };

        // Create stores
        let ticket_store: Arc<dyn TicketStore> = Arc::new(
            SqliteTicketStore::new(&db_path).expect("Failed to create ticket store"),
        );
        let telemetry_store: Arc<dyn TelemetryStore> = Arc::new(
            SqliteTelemetryStore::new(&db_path).expect("Failed to create telemetry store"),
        );
        let ticket_ids = fixtures::seed_helpdesk(ticket_store.as_ref());

        // Create mocks
        let interpreter = Arc::new(MockQueryInterpreter::new());
        let proposer = Arc::new(MockChangeProposer::new());

        let hub = EventHub::new(config.events.clone());
        let orchestrator = Arc::new(CommandOrchestrator::new(
            config.pipeline.clone(),
            Arc::clone(&ticket_store),
            Arc::clone(&telemetry_store),
            Arc::clone(&interpreter) as Arc<dyn QueryInterpreter>,
            Arc::clone(&proposer) as Arc<dyn ChangeProposer>,
            hub.clone(),
        ));

        let state = Arc::new(AppState::new(
            config,
            ticket_store,
            telemetry_store,
            hub,
            orchestrator,
        ));
        let router = ticketdesk_server::api::create_router(Arc::clone(&state));

        Self {
            router,
            state,
            interpreter,
            proposer,
            ticket_ids,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Open an event stream and hand back its still-open response body.
    pub async fn open_stream(&self, client_id: &str) -> (StatusCode, EventStream) {
        let request = Request::builder()
            .method("GET")
            .uri(format!("/api/v1/events?client_id={}", client_id))
            .body(Body::empty())
            .unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        (
            response.status(),
            EventStream {
                body: response.into_body(),
                buffer: String::new(),
            },
        )
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(request_builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// One parsed server-sent event.
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event: String,
    pub data: Value,
}

/// Reader over an open `text/event-stream` response body.
pub struct EventStream {
    body: Body,
    buffer: String,
}

impl EventStream {
    /// Next complete event, or `None` if nothing arrives within `wait`.
    pub async fn next_event(&mut self, wait: Duration) -> Option<SseEvent> {
        loop {
            if let Some(event) = self.take_buffered() {
                return Some(event);
            }
            let frame = tokio::time::timeout(wait, self.body.frame())
                .await
                .ok()??
                .ok()?;
            if let Ok(data) = frame.into_data() {
                self.buffer.push_str(&String::from_utf8_lossy(&data));
            }
        }
    }

    /// Read events until one named `name` arrives.
    pub async fn wait_for(&mut self, name: &str, wait: Duration) -> Option<SseEvent> {
        while let Some(event) = self.next_event(wait).await {
            if event.event == name {
                return Some(event);
            }
        }
        None
    }

    fn take_buffered(&mut self) -> Option<SseEvent> {
        let end = self.buffer.find("\n\n")?;
        let block: String = self.buffer.drain(..end + 2).collect();

        let mut event = String::from("message");
        let mut data = String::new();
        for line in block.lines() {
            if let Some(name) = line.strip_prefix("event:") {
                event = name.trim().to_string();
            } else if let Some(chunk) = line.strip_prefix("data:") {
                data.push_str(chunk.trim_start());
            }
        }
        if data.is_empty() {
            // Comment or keep-alive block
            return self.take_buffered();
        }

        Some(SseEvent {
            event,
            data: serde_json::from_str(&data).unwrap_or(Value::String(data)),
        })
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
