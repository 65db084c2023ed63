use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ToolContext, ToolDefinition, input_schema, parse_input, require_location, to_pretty};
use crate::error::ToolError;

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct HistoryInput {
    #[schemars(description = "The city name or location to get recorded history for")]
    location: String,
    #[schemars(description = "Only return this many of the most recent entries")]
    #[serde(default)]
    limit: Option<usize>,
}

async fn history_impl(ctx: Arc<ToolContext>, input: serde_json::Value) -> Result<String, ToolError> {
    let input: HistoryInput = parse_input(input)?;
    let location = require_location(&input.location)?;

    let mut log = ctx.history.fetch(location).await?;
    if let Some(limit) = input.limit {
        log.truncate_to_latest(limit);
    }
    to_pretty(&log)
}

pub(crate) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "get_weather_history",
        description: "Get previously recorded weather lookups for a location, oldest first. At most the last 100 lookups are kept.",
        input_schema: input_schema::<HistoryInput>(),
        handler: |ctx, input| Box::pin(history_impl(ctx, input)),
    }
}
