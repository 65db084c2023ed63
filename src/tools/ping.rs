use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ToolContext, ToolDefinition, input_schema, parse_input, to_pretty};
use crate::error::ToolError;
use crate::history::timestamp_now;

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct PingInput {}

#[derive(Debug, Serialize)]
struct PingResponse<'a> {
    status: &'a str,
    message: &'a str,
    timestamp: String,
    server: &'a str,
}

async fn ping_impl(ctx: Arc<ToolContext>, input: serde_json::Value) -> Result<String, ToolError> {
    let _: PingInput = parse_input(input)?;
    to_pretty(&PingResponse {
        status: "ok",
        message: "Server is running",
        timestamp: timestamp_now(),
        server: ctx.server_name,
    })
}

pub(crate) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "ping",
        description: "Simple ping to check that the server is running.",
        input_schema: input_schema::<PingInput>(),
        handler: |ctx, input| Box::pin(ping_impl(ctx, input)),
    }
}
