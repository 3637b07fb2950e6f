//! Maps one caller argument set onto the statements of a script.

use std::collections::BTreeSet;

use crate::{
    params::strip_param_prefix,
    split::{is_explain, split_statements, Lexer, TokenKind},
    HranaError, Params, Result,
};

/// Parameter slots referenced by one statement.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParamShape {
    positional: BTreeSet<u32>,
    named: Vec<String>,
}

impl ParamShape {
    /// Scans `sql` for placeholders.
    ///
    /// `?` takes one more than the largest index seen so far and `?N` takes
    /// `N`, as SQLite numbers them; the positional count is the number of
    /// distinct indices. Named placeholders are recorded without prefix.
    pub fn parse(sql: &str) -> Result<Self> {
        let mut shape = Self::default();
        let mut highest = 0u32;

        for token in Lexer::new(sql).filter(|token| token.kind == TokenKind::Parameter) {
            let text = token.text(sql);
            let (prefix, rest) = text.split_at(1);
            match prefix {
                "?" if rest.is_empty() => {
                    highest = highest.checked_add(1).ok_or_else(|| {
                        HranaError::MalformedParameter("too many positional parameters".to_owned())
                    })?;
                    shape.positional.insert(highest);
                }
                "?" => {
                    let index = rest
                        .parse::<u32>()
                        .ok()
                        .filter(|index| *index > 0)
                        .ok_or_else(|| HranaError::MalformedParameter(text.to_owned()))?;
                    highest = highest.max(index);
                    shape.positional.insert(index);
                }
                ":" | "@" | "$" => {
                    if !shape.named.iter().any(|name| name == rest) {
                        shape.named.push(rest.to_owned());
                    }
                }
                _ => return Err(HranaError::MalformedParameter(text.to_owned())),
            }
        }

        Ok(shape)
    }

    pub fn positional_count(&self) -> usize {
        self.positional.len()
    }

    /// Distinct positional indices in ascending order.
    pub fn positional_indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.positional.iter().copied()
    }

    /// Named parameters without prefix, in order of first use.
    pub fn named(&self) -> &[String] {
        &self.named
    }

    pub fn has_named(&self) -> bool {
        !self.named.is_empty()
    }

    fn references(&self, name: &str) -> bool {
        self.named.iter().any(|candidate| candidate == name)
    }
}

/// One statement of a script together with the arguments it receives.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundStatement<'a> {
    pub sql: &'a str,
    pub params: Params,
}

/// Splits `sql` and distributes `params` across the resulting statements.
///
/// Positional values are consumed left to right; named values go to every
/// statement that references them and nowhere else.
pub fn bind_script<'a>(sql: &'a str, params: &Params) -> Result<Vec<BoundStatement<'a>>> {
    let (statements, _) = split_statements(sql);
    let shapes = statements
        .iter()
        .map(|statement| ParamShape::parse(statement))
        .collect::<Result<Vec<_>>>()?;
    let bound = bind(&statements, &shapes, params)?;

    Ok(statements
        .into_iter()
        .zip(bound)
        .map(|(sql, params)| BoundStatement { sql, params })
        .collect())
}

fn bind(statements: &[&str], shapes: &[ParamShape], params: &Params) -> Result<Vec<Params>> {
    match params {
        Params::Positional(values) => {
            let mut offset = 0;
            statements
                .iter()
                .zip(shapes)
                .map(|(statement, shape)| {
                    let needed = shape.positional_count();
                    let available = values.len() - offset;
                    let take = if needed <= available {
                        needed
                    } else if is_explain(statement) {
                        available
                    } else {
                        return Err(HranaError::MissingParameters { needed, available });
                    };
                    let slice = values[offset..offset + take].to_vec();
                    offset += take;
                    Ok(Params::Positional(slice))
                })
                .collect()
        }
        Params::Named(pairs) => {
            let mut normalized: Vec<(&str, &crate::Value)> = Vec::with_capacity(pairs.len());
            for (name, value) in pairs {
                let name = strip_param_prefix(name)?;
                if normalized.iter().any(|(seen, _)| *seen == name) {
                    return Err(HranaError::MalformedParameter(format!(
                        "duplicate named parameter '{name}'"
                    )));
                }
                normalized.push((name, value));
            }

            Ok(shapes
                .iter()
                .map(|shape| {
                    Params::Named(
                        normalized
                            .iter()
                            .filter(|(name, _)| shape.references(name))
                            .map(|(name, value)| ((*name).to_owned(), (*value).clone()))
                            .collect(),
                    )
                })
                .collect())
        }
    }
}
