use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ToolContext, ToolDefinition, input_schema, parse_input, require_location, to_pretty};
use crate::error::ToolError;

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct CurrentWeatherInput {
    #[schemars(description = "The city name or location to get weather for")]
    location: String,
}

async fn current_weather_impl(
    ctx: Arc<ToolContext>,
    input: serde_json::Value,
) -> Result<String, ToolError> {
    let input: CurrentWeatherInput = parse_input(input)?;
    let location = require_location(&input.location)?;

    let current = ctx.weather.current(location).await?;

    // History is best effort; the lookup result is returned either way.
    if let Err(err) = ctx.history.record(location, current.to_fields()).await {
        tracing::warn!(location, error = %err, "failed to save weather history");
    }

    to_pretty(&current)
}

pub(crate) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "get_current_weather",
        description: "Get current weather information for a specific location. Each lookup is added to the location's history.",
        input_schema: input_schema::<CurrentWeatherInput>(),
        handler: |ctx, input| Box::pin(current_weather_impl(ctx, input)),
    }
}
