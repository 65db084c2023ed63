use crate::dispatch::Dispatcher;
use crate::protocol::{StreamEvent, ToolCallResponse, ToolListResponse};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use futures::StreamExt;
use std::convert::Infallible;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

pub struct ServerConfig {
    pub listen: String,
    pub auth_token: Option<String>,
}

struct ServerState {
    dispatcher: Arc<Dispatcher>,
    events: broadcast::Sender<StreamEvent>,
    auth_token: Option<String>,
}

type ServerResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

pub async fn run(config: ServerConfig, dispatcher: Dispatcher) -> ServerResult<()> {
    let server_name = dispatcher.server_name();
    let app = router(dispatcher, config.auth_token.clone());

    let listener = TcpListener::bind(&config.listen).await?;
    tracing::info!(
        server = server_name,
        auth = config.auth_token.is_some(),
        "listening on http://{}",
        listener.local_addr()?
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!(server = server_name, "server stopped");
    Ok(())
}

fn router(dispatcher: Dispatcher, auth_token: Option<String>) -> axum::Router {
    let (events, _) = broadcast::channel(200);
    let state = Arc::new(ServerState {
        dispatcher: Arc::new(dispatcher),
        events,
        auth_token,
    });

    axum::Router::new()
        .route("/tools", get(list_tools))
        .route("/tools/:name", post(call_tool))
        .route("/events", get(stream_events))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("ctrl-c received, shutting down");
}

async fn list_tools(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<Json<ToolListResponse>, StatusCode> {
    authorize(&headers, state.auth_token.as_deref())?;

    Ok(Json(ToolListResponse {
        server: state.dispatcher.server_name().to_string(),
        tools: state.dispatcher.tool_infos(),
    }))
}

async fn call_tool(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(input): Json<serde_json::Value>,
) -> Result<Json<ToolCallResponse>, StatusCode> {
    authorize(&headers, state.auth_token.as_deref())?;

    if !state.dispatcher.has_tool(&name) {
        return Err(StatusCode::NOT_FOUND);
    }

    let call_id = Uuid::new_v4().to_string();
    tracing::info!(tool = %name, %call_id, "tool call");

    let _ = state.events.send(StreamEvent::ToolCall {
        call_id: call_id.clone(),
        name: name.clone(),
        input: input.clone(),
    });

    let outcome = state.dispatcher.execute_tool(&name, input).await;

    let _ = state.events.send(StreamEvent::ToolResult {
        call_id: call_id.clone(),
        content: outcome.content.clone(),
        is_error: outcome.is_error,
    });

    Ok(Json(ToolCallResponse {
        call_id,
        content: outcome.content,
        is_error: outcome.is_error,
    }))
}

async fn stream_events(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    authorize(&headers, state.auth_token.as_deref())?;

    let greeting = StreamEvent::Info {
        message: format!("connected to {}", state.dispatcher.server_name()),
    };

    let events = BroadcastStream::new(state.events.subscribe()).filter_map(|item| async move {
        // Lagged subscribers skip what they missed.
        item.ok()
    });

    let stream = futures::stream::once(async move { greeting })
        .chain(events)
        .map(|event| {
            let data = serde_json::to_string(&event).unwrap_or_default();
            Ok::<Event, Infallible>(Event::default().data(data))
        });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

fn authorize(headers: &HeaderMap, token: Option<&str>) -> Result<(), StatusCode> {
    let Some(token) = token else {
        return Ok(());
    };

    let header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match header {
        Some(value) if value == format!("Bearer {}", token) => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientConfig, ToolClient};
    use crate::history::StorageConfig;
    use crate::tools::Endpoint;
    use crate::weather::{SAMPLE_REPORT, WeatherConfig};
    use axum::http::header::CONTENT_TYPE;
    use serde_json::json;
    use std::path::Path as FsPath;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    async fn fake_report(Path(location): Path<String>) -> impl IntoResponse {
        if location == "Nowhere" {
            return (StatusCode::NOT_FOUND, "Unknown location").into_response();
        }
        ([(CONTENT_TYPE, "application/json")], SAMPLE_REPORT).into_response()
    }

    async fn spawn(app: axum::Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn spawn_weather_server(history_dir: &FsPath, token: Option<&str>) -> String {
        let upstream = spawn(axum::Router::new().route("/:location", get(fake_report))).await;
        let dispatcher = Dispatcher::new(
            Endpoint::Weather,
            StorageConfig {
                base_path: history_dir.to_path_buf(),
            },
            WeatherConfig {
                base_url: upstream,
                timeout: Duration::from_secs(5),
            },
        )
        .unwrap();
        spawn(router(dispatcher, token.map(str::to_string))).await
    }

    fn client(base_url: &str, token: Option<&str>) -> ToolClient {
        ToolClient::new(ClientConfig {
            base_url: base_url.to_string(),
            token: token.map(str::to_string),
        })
    }

    fn body(response: &ToolCallResponse) -> serde_json::Value {
        serde_json::from_str(&response.content).unwrap()
    }

    #[tokio::test]
    async fn test_list_tools() {
        let dir = TempDir::new().unwrap();
        let url = spawn_weather_server(dir.path(), None).await;

        let list = client(&url, None).list_tools().await.unwrap();
        assert_eq!(list.server, "weather");
        let names: Vec<_> = list.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "ping",
                "get_current_weather",
                "get_weather_forecast",
                "get_weather_history",
                "list_weather_locations"
            ]
        );
    }

    #[tokio::test]
    async fn test_current_weather_records_history() {
        let dir = TempDir::new().unwrap();
        let url = spawn_weather_server(dir.path(), None).await;
        let client = client(&url, None);

        for _ in 0..2 {
            let response = client
                .call_tool("get_current_weather", json!({ "location": "Berlin" }))
                .await
                .unwrap();
            assert!(!response.is_error);
            let current = body(&response);
            assert_eq!(current["location"], "Berlin");
            assert_eq!(current["temperature_c"], "5");
            assert_eq!(current["condition"], "Light rain");
        }

        let response = client
            .call_tool("get_weather_history", json!({ "location": "BERLIN" }))
            .await
            .unwrap();
        assert!(!response.is_error);
        let history = body(&response);
        assert_eq!(history["location"], "Berlin");
        let entries = history["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1]["temperature_c"], "5");
        assert!(entries[1]["timestamp"].is_string());

        let response = client
            .call_tool("list_weather_locations", json!({}))
            .await
            .unwrap();
        assert_eq!(body(&response)["locations"], json!(["Berlin"]));
    }

    #[tokio::test]
    async fn test_forecast() {
        let dir = TempDir::new().unwrap();
        let url = spawn_weather_server(dir.path(), None).await;

        let response = client(&url, None)
            .call_tool("get_weather_forecast", json!({ "location": "Berlin", "days": 2 }))
            .await
            .unwrap();
        assert!(!response.is_error);
        let forecast = body(&response);
        assert_eq!(forecast["days"].as_array().unwrap().len(), 2);
        assert_eq!(forecast["days"][0]["condition"], "Overcast");

        // Forecasts are not recorded.
        assert!(!dir.path().join("berlin_history.json").exists());
    }

    #[tokio::test]
    async fn test_upstream_error_is_distinct() {
        let dir = TempDir::new().unwrap();
        let url = spawn_weather_server(dir.path(), None).await;

        let response = client(&url, None)
            .call_tool("get_current_weather", json!({ "location": "Nowhere" }))
            .await
            .unwrap();
        assert!(response.is_error);
        let message = body(&response)["error"].as_str().unwrap().to_string();
        assert!(message.starts_with("Failed to fetch weather data: 404"), "{message}");
    }

    #[tokio::test]
    async fn test_history_failure_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, "not a directory").unwrap();
        let url = spawn_weather_server(&blocked, None).await;

        let response = client(&url, None)
            .call_tool("get_current_weather", json!({ "location": "Berlin" }))
            .await
            .unwrap();
        assert!(!response.is_error);
        assert_eq!(body(&response)["temperature_c"], "5");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let dir = TempDir::new().unwrap();
        let url = spawn_weather_server(dir.path(), None).await;

        let err = client(&url, None)
            .call_tool("read_file", json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"), "{err}");
    }

    #[tokio::test]
    async fn test_auth_token() {
        let dir = TempDir::new().unwrap();
        let url = spawn_weather_server(dir.path(), Some("secret")).await;

        let err = client(&url, None).list_tools().await.unwrap_err();
        assert!(err.to_string().contains("401"), "{err}");

        let err = client(&url, Some("wrong"))
            .call_tool("ping", json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("401"), "{err}");

        let response = client(&url, Some("secret"))
            .call_tool("ping", json!({}))
            .await
            .unwrap();
        assert_eq!(body(&response)["status"], "ok");
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<StreamEvent>) -> StreamEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_event_stream() {
        let dir = TempDir::new().unwrap();
        let url = spawn_weather_server(dir.path(), None).await;
        let client = client(&url, None);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let watcher = client.clone();
        tokio::spawn(async move {
            let _ = watcher
                .stream_events(|event| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send(event);
                    }
                })
                .await;
        });

        assert!(matches!(next_event(&mut rx).await, StreamEvent::Info { .. }));

        let response = client.call_tool("ping", json!({})).await.unwrap();

        match next_event(&mut rx).await {
            StreamEvent::ToolCall { call_id, name, .. } => {
                assert_eq!(call_id, response.call_id);
                assert_eq!(name, "ping");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match next_event(&mut rx).await {
            StreamEvent::ToolResult {
                call_id, is_error, ..
            } => {
                assert_eq!(call_id, response.call_id);
                assert!(!is_error);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
