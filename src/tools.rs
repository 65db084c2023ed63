use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use clap::ValueEnum;
use schemars::{JsonSchema, schema_for};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ToolError;
use crate::history::HistoryStore;
use crate::weather::WeatherClient;

mod current_weather;
mod forecast;
mod locations;
mod ping;
mod weather_history;

/// Shared state handed to every tool handler.
pub(crate) struct ToolContext {
    pub(crate) server_name: &'static str,
    pub(crate) history: HistoryStore,
    pub(crate) weather: WeatherClient,
}

type ToolHandler = fn(
    Arc<ToolContext>,
    serde_json::Value,
) -> Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send>>;

pub(crate) struct ToolDefinition {
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
    pub(crate) input_schema: serde_json::Value,
    pub(crate) handler: ToolHandler,
}

/// Which tool set a server instance exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Endpoint {
    /// Health check only
    Generic,
    /// Weather lookup, forecast and history tools
    Weather,
}

impl Endpoint {
    pub fn server_name(self) -> &'static str {
        match self {
            Self::Generic => "generic-mcp",
            Self::Weather => "weather",
        }
    }
}

pub(crate) fn get_all_tools(endpoint: Endpoint) -> Vec<ToolDefinition> {
    match endpoint {
        Endpoint::Generic => vec![ping::definition()],
        Endpoint::Weather => vec![
            ping::definition(),
            current_weather::definition(),
            forecast::definition(),
            weather_history::definition(),
            locations::definition(),
        ],
    }
}

fn input_schema<T: JsonSchema>() -> serde_json::Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_default()
}

fn parse_input<T: DeserializeOwned>(input: serde_json::Value) -> Result<T, ToolError> {
    // Tools without arguments may be called with `null`.
    let input = if input.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        input
    };
    serde_json::from_value(input).map_err(|e| ToolError::InvalidInput(e.to_string()))
}

fn require_location(location: &str) -> Result<&str, ToolError> {
    let location = location.trim();
    if location.is_empty() {
        return Err(ToolError::InvalidInput("location must not be empty".to_string()));
    }
    Ok(location)
}

fn to_pretty<T: Serialize>(value: &T) -> Result<String, ToolError> {
    serde_json::to_string_pretty(value).map_err(ToolError::from)
}
