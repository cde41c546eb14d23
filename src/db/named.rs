//! Named parameter compilation.
//!
//! `:name` placeholders are rewritten into the driver's positional form (`?` for MySQL
//! and SQLite, `$n` for PostgreSQL). The statement is tokenized with the backend's
//! sqlparser dialect, so placeholders inside string literals, quoted identifiers and
//! comments are left alone, and `::` casts pass through verbatim.

use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::tokenizer::{Location, Token, TokenWithSpan, Tokenizer};

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, NamedArgs, Value};

fn get_dialect(db_type: DatabaseType) -> Box<dyn Dialect> {
    match db_type {
        DatabaseType::PostgreSQL => Box::new(PostgreSqlDialect {}),
        DatabaseType::MySQL => Box::new(MySqlDialect {}),
        DatabaseType::SQLite => Box::new(SQLiteDialect {}),
    }
}

/// A statement with its named placeholders replaced by positional ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedQuery {
    pub sql: String,
    /// Argument names in bind order.
    pub names: Vec<String>,
}

impl NamedQuery {
    /// Compile `query` for the given backend.
    pub fn compile(query: &str, db_type: DatabaseType) -> DbResult<Self> {
        let dialect = get_dialect(db_type);
        let tokens = Tokenizer::new(dialect.as_ref(), query)
            .tokenize_with_location()
            .map_err(|e| DbError::invalid_input(format!("Failed to tokenize statement: {}", e)))?;

        let line_starts = line_starts(query);
        let mut sql = String::with_capacity(query.len());
        let mut names: Vec<String> = Vec::new();
        let mut copied = 0;

        for (start, name) in placeholders(&tokens) {
            let Some(offset) = byte_offset(query, &line_starts, start) else {
                return Err(DbError::internal(format!(
                    "Placeholder :{} has no position in the statement",
                    name
                )));
            };

            sql.push_str(&query[copied..offset]);
            copied = offset + 1 + name.len();

            match db_type {
                DatabaseType::PostgreSQL => {
                    // Repeated names reuse their parameter number
                    let position = match names.iter().position(|n| n == name) {
                        Some(idx) => idx + 1,
                        None => {
                            names.push(name.to_string());
                            names.len()
                        }
                    };
                    sql.push('$');
                    sql.push_str(&position.to_string());
                }
                DatabaseType::MySQL | DatabaseType::SQLite => {
                    names.push(name.to_string());
                    sql.push('?');
                }
            }
        }
        sql.push_str(&query[copied..]);

        Ok(Self { sql, names })
    }

    /// Resolve the positional arguments from `args`.
    pub fn bind(&self, args: &NamedArgs) -> DbResult<Vec<Value>> {
        self.names
            .iter()
            .map(|name| {
                args.get(name).cloned().ok_or_else(|| {
                    DbError::invalid_input(format!("Missing named argument: {}", name))
                })
            })
            .collect()
    }
}

/// `:name` placeholders with the location of their colon.
fn placeholders(tokens: &[TokenWithSpan]) -> Vec<(Location, &str)> {
    let mut found = Vec::new();
    let mut iter = tokens.iter().peekable();

    while let Some(current) = iter.next() {
        match &current.token {
            Token::Colon => {
                if let Some(TokenWithSpan {
                    token: Token::Word(word),
                    span,
                }) = iter.peek()
                {
                    let adjacent = span.start.line == current.span.start.line
                        && span.start.column == current.span.start.column + 1;
                    if adjacent && word.quote_style.is_none() {
                        found.push((current.span.start, word.value.as_str()));
                        iter.next();
                    }
                }
            }
            Token::Placeholder(text) => {
                if let Some(name) = text.strip_prefix(':').filter(|n| is_identifier(n)) {
                    found.push((current.span.start, name));
                }
            }
            _ => {}
        }
    }

    found
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

fn line_starts(query: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(query.match_indices('\n').map(|(idx, _)| idx + 1))
        .collect()
}

/// Tokenizer locations are 1-based lines and character columns.
fn byte_offset(query: &str, line_starts: &[usize], location: Location) -> Option<usize> {
    let line = usize::try_from(location.line).ok()?.checked_sub(1)?;
    let column = usize::try_from(location.column).ok()?.checked_sub(1)?;
    let start = *line_starts.get(line)?;
    query[start..]
        .char_indices()
        .nth(column)
        .map(|(idx, _)| start + idx)
}
