use crate::{codec::encode_value, wire, HranaError, Result, Value};

/// SQL parameter container.
///
/// One set covers a whole script; the binder slices it per statement.
#[derive(Clone, Debug, PartialEq)]
pub enum Params {
    /// Positional values mapped to `?` / `?N` placeholders.
    Positional(Vec<Value>),
    /// Named values mapped to `:name`, `@name` or `$name` placeholders.
    Named(Vec<(String, Value)>),
}

impl Params {
    /// Builds positional parameters.
    pub fn positional(values: impl Into<Vec<Value>>) -> Self {
        Self::Positional(values.into())
    }

    /// Builds named parameters.
    ///
    /// Names can be provided with or without prefix (`:`, `@`, `$`).
    pub fn named<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::Named(
            pairs
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        )
    }

    /// Builds parameters from loosely ordered arguments, where `None` marks a
    /// positional argument. Mixing positional and named arguments is an error.
    pub fn try_from_args<I, K>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Option<K>, Value)>,
        K: Into<String>,
    {
        let mut positional = Vec::new();
        let mut named = Vec::new();
        for (name, value) in args {
            match name {
                Some(name) => named.push((name.into(), value)),
                None => positional.push(value),
            }
        }

        match (positional.is_empty(), named.is_empty()) {
            (false, false) => Err(HranaError::MalformedParameter(
                "positional and named arguments cannot be mixed".to_owned(),
            )),
            (true, false) => Ok(Self::Named(named)),
            _ => Ok(Self::Positional(positional)),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Positional(values) => values.is_empty(),
            Self::Named(pairs) => pairs.is_empty(),
        }
    }
}

impl Default for Params {
    fn default() -> Self {
        Self::Positional(Vec::new())
    }
}

impl From<()> for Params {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Self::Positional(values)
    }
}

impl<const N: usize> From<[Value; N]> for Params {
    fn from(values: [Value; N]) -> Self {
        Self::Positional(values.into())
    }
}

impl From<Vec<(String, Value)>> for Params {
    fn from(values: Vec<(String, Value)>) -> Self {
        Self::Named(values)
    }
}

/// Single statement inside an explicit batch.
#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    /// SQL text.
    pub sql: String,
    /// Statement parameters.
    pub params: Params,
    /// Whether the statement should return rows.
    pub want_rows: bool,
}

impl Statement {
    /// Creates a row-returning statement.
    pub fn query<P: Into<Params>>(sql: impl Into<String>, params: P) -> Self {
        Self {
            sql: sql.into(),
            params: params.into(),
            want_rows: true,
        }
    }

    /// Creates an execution-only statement.
    pub fn execute<P: Into<Params>>(sql: impl Into<String>, params: P) -> Self {
        Self {
            sql: sql.into(),
            params: params.into(),
            want_rows: false,
        }
    }
}

/// Removes one leading `:`, `@` or `$` from a caller-supplied name.
pub(crate) fn strip_param_prefix(name: &str) -> Result<&str> {
    let stripped = name
        .strip_prefix([':', '@', '$'])
        .unwrap_or(name);
    if stripped.is_empty() {
        return Err(HranaError::MalformedParameter(
            "named parameter name cannot be empty".to_owned(),
        ));
    }
    Ok(stripped)
}

/// Encodes a statement addressed either by text or by stored SQL id.
pub(crate) fn build_stmt(sql: wire::SqlRef, params: &Params, want_rows: bool) -> Result<wire::Stmt> {
    let (sql, sql_id) = match sql {
        wire::SqlRef::Text(text) => (Some(text), None),
        wire::SqlRef::Stored(id) => (None, Some(id)),
    };
    let mut stmt = wire::Stmt {
        sql,
        sql_id,
        want_rows,
        ..wire::Stmt::default()
    };

    match params {
        Params::Positional(values) => {
            stmt.args = values.iter().map(encode_value).collect::<Result<_>>()?;
        }
        Params::Named(pairs) => {
            stmt.named_args = pairs
                .iter()
                .map(|(name, value)| {
                    Ok(wire::NamedArg {
                        name: strip_param_prefix(name)?.to_owned(),
                        value: encode_value(value)?,
                    })
                })
                .collect::<Result<_>>()?;
        }
    }

    Ok(stmt)
}
