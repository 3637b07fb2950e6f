//! Hrana JSON shapes shared by the HTTP pipeline and message-channel transports.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct PipelineRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baton: Option<String>,
    pub requests: Vec<StreamRequest>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamRequest {
    Execute { stmt: Stmt },
    Batch { batch: Batch },
    StoreSql { sql: String, sql_id: i32 },
    CloseSql { sql_id: i32 },
    Close,
}

impl StreamRequest {
    pub(crate) fn expected_response(&self) -> &'static str {
        match self {
            Self::Execute { .. } => "execute",
            Self::Batch { .. } => "batch",
            Self::StoreSql { .. } => "store_sql",
            Self::CloseSql { .. } => "close_sql",
            Self::Close => "close",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Stmt {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_id: Option<i32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub named_args: Vec<NamedArg>,
    pub want_rows: bool,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "replication_index::serialize"
    )]
    pub replication_index: Option<u64>,
}

/// How a statement names its SQL: inline text or a `store_sql` id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum SqlRef {
    Text(String),
    Stored(i32),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NamedArg {
    pub name: String,
    pub value: Value,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Batch {
    pub steps: Vec<BatchStep>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "replication_index::serialize"
    )]
    pub replication_index: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BatchStep {
    pub stmt: Stmt,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<BatchCondition>,
}

/// Server-evaluated guard on a batch step; `step` indexes earlier steps of
/// the same batch.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchCondition {
    Ok { step: u32 },
    Not { cond: Box<BatchCondition> },
    And { conds: Vec<BatchCondition> },
    Or { conds: Vec<BatchCondition> },
}

impl BatchCondition {
    pub fn ok(step: u32) -> Self {
        Self::Ok { step }
    }

    pub fn not(cond: BatchCondition) -> Self {
        Self::Not {
            cond: Box::new(cond),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Value {
    Null,
    Integer {
        value: String,
    },
    Float {
        value: f64,
    },
    Text {
        value: String,
    },
    Blob {
        #[serde(default)]
        base64: String,
    },
}

#[derive(Debug, Deserialize)]
pub struct PipelineResponse {
    #[serde(default)]
    pub baton: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub results: Vec<StreamResult>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamResult {
    Ok {
        #[serde(default)]
        response: Option<StreamResponse>,
    },
    Error {
        #[serde(default)]
        error: Option<WireError>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamResponse {
    Execute { result: StmtResult },
    Batch { result: BatchResult },
    StoreSql,
    CloseSql,
    Close,
    #[serde(other)]
    Unknown,
}

impl StreamResponse {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Execute { .. } => "execute",
            Self::Batch { .. } => "batch",
            Self::StoreSql => "store_sql",
            Self::CloseSql => "close_sql",
            Self::Close => "close",
            Self::Unknown => "unknown",
        }
    }

    /// Highest replication index reported anywhere in this response.
    pub(crate) fn max_replication_index(&self) -> Option<u64> {
        match self {
            Self::Execute { result } => result.replication_index,
            Self::Batch { result } => result
                .step_results
                .iter()
                .flatten()
                .filter_map(|step| step.replication_index)
                .chain(result.replication_index)
                .max(),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct StmtResult {
    #[serde(default)]
    pub cols: Vec<Col>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
    #[serde(default)]
    pub affected_row_count: u64,
    #[serde(default)]
    pub last_insert_rowid: Option<String>,
    #[serde(default, deserialize_with = "replication_index::deserialize")]
    pub replication_index: Option<u64>,
    #[serde(default)]
    pub rows_read: Option<u64>,
    #[serde(default)]
    pub rows_written: Option<u64>,
    #[serde(default)]
    pub query_duration_ms: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct BatchResult {
    #[serde(default)]
    pub step_results: Vec<Option<StmtResult>>,
    #[serde(default)]
    pub step_errors: Vec<Option<WireError>>,
    #[serde(default, deserialize_with = "replication_index::deserialize")]
    pub replication_index: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Col {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub decltype: Option<String>,
}

/// Replication indexes travel as strings but older servers send numbers.
pub(crate) mod replication_index {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(index) => serializer.collect_str(index),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Raw::Number(index)) => Ok(Some(index)),
            Some(Raw::Text(text)) if text.is_empty() => Ok(None),
            Some(Raw::Text(text)) => text
                .parse::<u64>()
                .map(Some)
                .map_err(|err| de::Error::custom(format!("invalid replication index '{text}': {err}"))),
        }
    }
}
