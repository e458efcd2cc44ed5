use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::GraphError;
use crate::types::{Message, ToolSpec};

/// Name of the tool the reasoning node offers.
pub const UPDATE_TOOL: &str = "UpdateMemory";

/// Which kind of memory the model asked to update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    User,
    Todo,
    Instructions,
}

impl UpdateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateType::User => "user",
            UpdateType::Todo => "todo",
            UpdateType::Instructions => "instructions",
        }
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateType {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(UpdateType::User),
            "todo" => Ok(UpdateType::Todo),
            "instructions" => Ok(UpdateType::Instructions),
            other => Err(GraphError::UnknownUpdateType(other.to_string())),
        }
    }
}

/// Where control goes after the reasoning node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    End,
    Update { update_type: UpdateType, call_id: String },
}

/// Decide the next step from the last message of the conversation.
pub fn route(last: &Message) -> Result<Route, GraphError> {
    let Some(call) = last.tool_call() else {
        return Ok(Route::End);
    };

    if call.name != UPDATE_TOOL {
        return Err(GraphError::UnexpectedTool(call.name));
    }

    let update_type = call
        .input
        .get("update_type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| GraphError::UnknownUpdateType(call.input.to_string()))?
        .parse()?;

    Ok(Route::Update {
        update_type,
        call_id: call.id,
    })
}

/// Arguments of the [`UPDATE_TOOL`] call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub struct UpdateMemory {
    #[schemars(description = "Type of memory to update")]
    pub update_type: UpdateType,
}

/// The decision tool offered to the reasoning node.
pub fn update_tool_spec() -> ToolSpec {
    ToolSpec::for_args::<UpdateMemory>(UPDATE_TOOL, "Decision on what memory type to update")
}
