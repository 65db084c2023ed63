use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ToolContext, ToolDefinition, input_schema, parse_input, require_location, to_pretty};
use crate::error::ToolError;
use crate::weather::MAX_FORECAST_DAYS;

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct ForecastInput {
    #[schemars(description = "The city name or location to get the forecast for")]
    location: String,
    #[schemars(description = "Number of days to include, between 1 and 3. Defaults to 3.")]
    #[serde(default)]
    days: Option<usize>,
}

async fn forecast_impl(ctx: Arc<ToolContext>, input: serde_json::Value) -> Result<String, ToolError> {
    let input: ForecastInput = parse_input(input)?;
    let location = require_location(&input.location)?;

    let days = input.days.unwrap_or(MAX_FORECAST_DAYS);
    let forecast = ctx.weather.forecast(location, days).await?;
    to_pretty(&forecast)
}

pub(crate) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "get_weather_forecast",
        description: "Get the daily weather forecast (up to 3 days) for a specific location.",
        input_schema: input_schema::<ForecastInput>(),
        handler: |ctx, input| Box::pin(forecast_impl(ctx, input)),
    }
}
