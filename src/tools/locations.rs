use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ToolContext, ToolDefinition, input_schema, parse_input, to_pretty};
use crate::error::ToolError;

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct LocationsInput {}

#[derive(Debug, Serialize)]
struct LocationsResponse {
    locations: Vec<String>,
}

async fn locations_impl(ctx: Arc<ToolContext>, input: serde_json::Value) -> Result<String, ToolError> {
    let _: LocationsInput = parse_input(input)?;
    let locations = ctx.history.list_known_locations().await?;
    to_pretty(&LocationsResponse { locations })
}

pub(crate) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "list_weather_locations",
        description: "List every location that has recorded weather history.",
        input_schema: input_schema::<LocationsInput>(),
        handler: |ctx, input| Box::pin(locations_impl(ctx, input)),
    }
}
