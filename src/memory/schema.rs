//! Typed shapes of the documents kept in long-term memory, and the JSON
//! schemas the model fills them in from.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::types::ToolSpec;

/// Key of the single instructions document per user.
pub const INSTRUCTIONS_KEY: &str = "user_instructions";

/// Profile of a user. One per user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Profile {
    #[schemars(description = "The user's name")]
    pub name: Option<String>,
    #[schemars(description = "The user's location")]
    pub location: Option<String>,
    #[schemars(description = "The user's job")]
    pub job: Option<String>,
    #[schemars(
        description = "Personal connections of the user, such as family members, friends, or coworkers"
    )]
    pub connections: Vec<String>,
    #[schemars(description = "Interests that the user has")]
    pub interests: Vec<String>,
}

impl Profile {
    pub const TOOL_NAME: &'static str = "Profile";

    pub fn tool_spec() -> ToolSpec {
        ToolSpec::for_args::<Self>(
            Self::TOOL_NAME,
            "This is the profile of the user you are chatting with",
        )
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self, String> {
        serde_json::from_value(value.clone()).map_err(|e| e.to_string())
    }

    /// Prompt rendering; unknown fields show as `Unknown`.
    pub fn render(&self) -> String {
        fn or_unknown(field: &Option<String>) -> &str {
            field.as_deref().filter(|s| !s.is_empty()).unwrap_or("Unknown")
        }
        fn list(items: &[String]) -> String {
            if items.is_empty() {
                "Unknown".into()
            } else {
                items.join(", ")
            }
        }

        format!(
            "Name: {}\nLocation: {}\nJob: {}\nConnections: {}\nInterests: {}",
            or_unknown(&self.name),
            or_unknown(&self.location),
            or_unknown(&self.job),
            list(&self.connections),
            list(&self.interests),
        )
    }
}

/// Lifecycle of a todo item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum TodoStatus {
    #[default]
    #[serde(rename = "not started")]
    NotStarted,
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "archived")]
    Archived,
}

impl fmt::Display for TodoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TodoStatus::NotStarted => "not started",
            TodoStatus::InProgress => "in progress",
            TodoStatus::Done => "done",
            TodoStatus::Archived => "archived",
        })
    }
}

/// A single entry of the user's todo list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Todo {
    #[schemars(description = "The task to be completed.")]
    pub task: String,
    /// Estimated minutes to complete.
    #[serde(default, deserialize_with = "deserialize_minutes")]
    #[schemars(
        with = "Option<u32>",
        description = "Estimated time to complete the task (minutes)."
    )]
    pub time_to_complete: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_deadline")]
    #[schemars(
        with = "Option<String>",
        description = "When the task needs to be completed by (if applicable), as an ISO 8601 date-time"
    )]
    pub deadline: Option<DateTime<Utc>>,
    #[schemars(
        length(min = 1),
        description = "List of specific, actionable solutions (e.g., specific ideas, service providers, or concrete options relevant to completing the task)"
    )]
    pub solutions: Vec<String>,
    #[serde(default)]
    #[schemars(description = "Current status of the task")]
    pub status: TodoStatus,
}

impl Todo {
    pub const TOOL_NAME: &'static str = "ToDo";

    pub fn tool_spec() -> ToolSpec {
        ToolSpec::for_args::<Self>(Self::TOOL_NAME, "A task on the user's todo list")
    }

    /// Deserialize and check the at-least-one-solution rule.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, String> {
        let todo: Todo = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
        if todo.solutions.is_empty() {
            return Err(format!("todo '{}' has no solutions", todo.task));
        }
        Ok(todo)
    }
}

/// Free-text preferences for how the todo list is managed. One per user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instructions {
    pub memory: String,
}

/// Accept whole numbers given as integers, floats (`30.0`) or strings (`"30"`).
fn deserialize_minutes<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    match raw {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(value) => parse_minutes(&value)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid time_to_complete: {value}"))),
    }
}

pub fn parse_minutes(value: &serde_json::Value) -> Option<u32> {
    let minutes = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    let whole = minutes.is_finite() && minutes.fract() == 0.0;
    (whole && (0.0..=f64::from(u32::MAX)).contains(&minutes)).then_some(minutes as u32)
}

/// Accept RFC 3339, naive `YYYY-MM-DDTHH:MM:SS` (as UTC) or a bare date.
fn deserialize_deadline<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => parse_deadline(s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid deadline: {s}"))),
    }
}

pub fn parse_deadline(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
