use crate::{codec::decode_value, wire, HranaError, Result, Value};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: Option<String>,
    pub decltype: Option<String>,
}

/// Decoded result of one executed statement.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
    pub affected_row_count: u64,
    pub last_insert_rowid: Option<i64>,
    pub replication_index: Option<u64>,
    pub rows_read: Option<u64>,
    pub rows_written: Option<u64>,
    pub query_duration_ms: Option<f64>,
}

impl ResultSet {
    pub(crate) fn decode(result: wire::StmtResult) -> Result<Self> {
        let columns: Vec<Column> = result
            .cols
            .into_iter()
            .map(|col| Column {
                name: col.name,
                decltype: col.decltype,
            })
            .collect();

        let rows = result
            .rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .enumerate()
                    .map(|(index, value)| {
                        let decltype = columns.get(index).and_then(|col| col.decltype.as_deref());
                        decode_value(value, decltype)
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        let last_insert_rowid = result
            .last_insert_rowid
            .map(|value| {
                value.parse::<i64>().map_err(|err| {
                    HranaError::Decode(format!("invalid last_insert_rowid '{value}': {err}"))
                })
            })
            .transpose()?;

        Ok(Self {
            columns,
            rows,
            affected_row_count: result.affected_row_count,
            last_insert_rowid,
            replication_index: result.replication_index,
            rows_read: result.rows_read,
            rows_written: result.rows_written,
            query_duration_ms: result.query_duration_ms,
        })
    }

    pub fn row(&self, index: usize) -> Option<RowRef<'_>> {
        self.rows.get(index).map(|values| RowRef {
            cols: &self.columns,
            values,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = RowRef<'_>> {
        self.rows.iter().map(|values| RowRef {
            cols: &self.columns,
            values,
        })
    }
}

/// Lightweight row view for name-based access.
#[derive(Clone, Copy, Debug)]
pub struct RowRef<'a> {
    cols: &'a [Column],
    values: &'a [Value],
}

impl<'a> RowRef<'a> {
    pub fn values(&self) -> &'a [Value] {
        self.values
    }

    pub fn get_index(&self, index: usize) -> Option<&'a Value> {
        self.values.get(index)
    }

    /// Returns a value by case-insensitive column name.
    pub fn get(&self, name: &str) -> Option<&'a Value> {
        let idx = self.cols.iter().position(|col| {
            col.name
                .as_deref()
                .is_some_and(|col_name| col_name.eq_ignore_ascii_case(name))
        })?;
        self.values.get(idx)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn get_text(&self, name: &str) -> Option<&'a str> {
        match self.get(name)? {
            Value::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

/// Cursor over the result sets of one call, one set per executed statement.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Rows {
    sets: Vec<ResultSet>,
    current: usize,
    cursor: usize,
}

impl Rows {
    pub(crate) fn new(sets: Vec<ResultSet>) -> Self {
        Self {
            sets,
            current: 0,
            cursor: 0,
        }
    }

    /// Columns of the current result set.
    pub fn columns(&self) -> &[Column] {
        self.sets
            .get(self.current)
            .map(|set| set.columns.as_slice())
            .unwrap_or_default()
    }

    /// Advances within the current result set.
    pub fn next_row(&mut self) -> Option<RowRef<'_>> {
        let row = self.sets.get(self.current)?.row(self.cursor)?;
        self.cursor += 1;
        Some(row)
    }

    pub fn has_next_result_set(&self) -> bool {
        self.current + 1 < self.sets.len()
    }

    /// Moves to the next result set; returns `false` when there is none.
    pub fn next_result_set(&mut self) -> bool {
        if !self.has_next_result_set() {
            return false;
        }
        self.current += 1;
        self.cursor = 0;
        true
    }

    pub fn result_sets(&self) -> &[ResultSet] {
        &self.sets
    }

    pub fn into_result_sets(self) -> Vec<ResultSet> {
        self.sets
    }

    pub fn exec_result(&self) -> ExecResult {
        ExecResult::aggregate(&self.sets)
    }
}

/// Execution summary across one or more statements.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Sum over all statements.
    pub affected_row_count: u64,
    /// Last positive rowid reported, in statement order.
    pub last_insert_rowid: Option<i64>,
    pub replication_index: Option<u64>,
}

impl ExecResult {
    pub fn aggregate<'a>(sets: impl IntoIterator<Item = &'a ResultSet>) -> Self {
        sets.into_iter().fold(Self::default(), |mut acc, set| {
            acc.merge(set);
            acc
        })
    }

    pub(crate) fn merge(&mut self, set: &ResultSet) {
        self.affected_row_count += set.affected_row_count;
        if let Some(rowid) = set.last_insert_rowid.filter(|rowid| *rowid > 0) {
            self.last_insert_rowid = Some(rowid);
        }
        self.replication_index = self.replication_index.max(set.replication_index);
    }
}

/// Caller-visible outcome of one batch step.
#[derive(Clone, Debug, PartialEq)]
pub enum StepOutcome {
    Executed(ResultSet),
    Failed {
        message: String,
        code: Option<String>,
    },
    /// The step's condition evaluated false.
    Skipped,
}

impl StepOutcome {
    pub fn result_set(&self) -> Option<&ResultSet> {
        match self {
            Self::Executed(set) => Some(set),
            _ => None,
        }
    }
}
