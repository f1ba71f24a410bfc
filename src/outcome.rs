//! Execution outcomes and their wire shape.

use crate::classifier::{ClassifiedError, ErrorCategory};
use serde::{Deserialize, Serialize, Serializer};

/// One result row: column name → value, in column order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// A result column and the database's name for its type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

impl Column {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Column {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// How many rows the query produced, as far as the engine knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalCount {
    Exact(usize),
    /// More rows existed than were returned; serialized as `"{n}+"`
    AtLeast(usize),
}

impl Serialize for TotalCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TotalCount::Exact(n) => serializer.serialize_u64(*n as u64),
            TotalCount::AtLeast(n) => serializer.serialize_str(&format!("{n}+")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuerySuccess {
    pub rows: Vec<Row>,
    pub columns: Vec<Column>,
    pub row_count: usize,
    pub total_count: TotalCount,
    pub execution_time_ms: u64,
    pub truncated: bool,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFailure {
    pub category: ErrorCategory,
    pub message: String,
    pub execution_time_ms: u64,
}

/// Result of one sandboxed execution
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Success(QuerySuccess),
    Failure(QueryFailure),
}

impl ExecutionOutcome {
    pub fn failure(error: ClassifiedError, execution_time_ms: u64) -> Self {
        ExecutionOutcome::Failure(QueryFailure {
            category: error.category,
            message: error.message,
            execution_time_ms,
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success(_))
    }

    pub fn row_count(&self) -> usize {
        match self {
            ExecutionOutcome::Success(s) => s.row_count,
            ExecutionOutcome::Failure(_) => 0,
        }
    }

    pub fn execution_time_ms(&self) -> u64 {
        match self {
            ExecutionOutcome::Success(s) => s.execution_time_ms,
            ExecutionOutcome::Failure(f) => f.execution_time_ms,
        }
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            ExecutionOutcome::Success(_) => None,
            ExecutionOutcome::Failure(f) => Some(f.category),
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Success(_) => None,
            ExecutionOutcome::Failure(f) => Some(&f.message),
        }
    }

    pub fn as_success(&self) -> Option<&QuerySuccess> {
        match self {
            ExecutionOutcome::Success(s) => Some(s),
            ExecutionOutcome::Failure(_) => None,
        }
    }

    pub fn to_response(&self) -> ExecutionResponse {
        ExecutionResponse::from(self)
    }
}

/// Flat JSON shape handed to the request layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResponse {
    pub success: bool,
    pub rows: Vec<Row>,
    pub columns: Vec<Column>,
    pub row_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<TotalCount>,
    pub execution_time_ms: u64,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
}

impl From<&ExecutionOutcome> for ExecutionResponse {
    fn from(outcome: &ExecutionOutcome) -> Self {
        match outcome {
            ExecutionOutcome::Success(s) => ExecutionResponse {
                success: true,
                rows: s.rows.clone(),
                columns: s.columns.clone(),
                row_count: s.row_count,
                total_count: Some(s.total_count),
                execution_time_ms: s.execution_time_ms,
                truncated: s.truncated,
                note: s.note.clone(),
                error: None,
                category: None,
            },
            ExecutionOutcome::Failure(f) => ExecutionResponse {
                success: false,
                rows: Vec::new(),
                columns: Vec::new(),
                row_count: 0,
                total_count: None,
                execution_time_ms: f.execution_time_ms,
                truncated: false,
                note: None,
                error: Some(f.message.clone()),
                category: Some(f.category),
            },
        }
    }
}
