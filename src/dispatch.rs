use std::sync::Arc;

use serde_json::json;

use crate::error::{ToolError, WeatherError};
use crate::history::{HistoryStore, StorageConfig};
use crate::protocol::ToolInfo;
use crate::tools::{Endpoint, ToolContext, ToolDefinition, get_all_tools};
use crate::weather::{WeatherClient, WeatherConfig};

/// Result of running one tool: the text handed back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
}

pub struct Dispatcher {
    endpoint: Endpoint,
    context: Arc<ToolContext>,
    tools: Vec<ToolDefinition>,
}

impl Dispatcher {
    pub fn new(
        endpoint: Endpoint,
        storage: StorageConfig,
        weather: WeatherConfig,
    ) -> Result<Self, WeatherError> {
        let context = Arc::new(ToolContext {
            server_name: endpoint.server_name(),
            history: HistoryStore::new(storage),
            weather: WeatherClient::new(weather)?,
        });

        Ok(Self {
            endpoint,
            context,
            tools: get_all_tools(endpoint),
        })
    }

    pub fn server_name(&self) -> &'static str {
        self.endpoint.server_name()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    pub fn tool_infos(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|t| ToolInfo {
                name: t.name.to_string(),
                description: t.description.to_string(),
                input_schema: t.input_schema.clone(),
            })
            .collect()
    }

    pub async fn execute_tool(&self, name: &str, input: serde_json::Value) -> ToolOutcome {
        let tool_def = self.tools.iter().find(|t| t.name == name);

        match tool_def {
            Some(tool) => match (tool.handler)(Arc::clone(&self.context), input).await {
                Ok(content) => ToolOutcome {
                    content,
                    is_error: false,
                },
                Err(e) => {
                    log_tool_error(name, &e);
                    error_outcome(e.to_string())
                }
            },
            None => error_outcome(format!("Unknown tool: {}", name)),
        }
    }
}

fn log_tool_error(name: &str, err: &ToolError) {
    if is_rejection(err) {
        tracing::debug!(tool = name, error = %err, "tool call rejected");
    } else {
        tracing::warn!(tool = name, error = %err, "tool call failed");
    }
}

/// Failures caused by the caller's request rather than by the server.
fn is_rejection(err: &ToolError) -> bool {
    match err {
        ToolError::InvalidInput(_) => true,
        ToolError::Store(e) => e.is_not_found(),
        _ => false,
    }
}

fn error_outcome(message: String) -> ToolOutcome {
    let content = serde_json::to_string_pretty(&json!({ "error": message }))
        .unwrap_or_else(|_| message.clone());
    ToolOutcome {
        content,
        is_error: true,
    }
}
