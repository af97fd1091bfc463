pub mod meter_catalog_queries;
pub mod pipeline_queries;

use std::fmt;

#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// A possibly qualified catalog object name (`DB.SCHEMA.NAME`).
///
/// Names end up inlined into statements, so every part is restricted to
/// `[A-Za-z0-9_$]` and must not start with a digit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectName {
    pub database: Option<String>,
    pub schema: Option<String>,
    pub name: String,
}

fn valid_part(part: &str) -> bool {
    let mut chars = part.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

impl ObjectName {
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        let trimmed = raw.trim().trim_start_matches('@');
        let parts: Vec<&str> = trimmed.split('.').collect();
        if parts.is_empty() || parts.len() > 3 || !parts.iter().all(|p| valid_part(p)) {
            return Err(QueryError::InvalidIdentifier(raw.to_string()));
        }

        let mut parts = parts.into_iter().rev().map(str::to_string);
        let name = parts.next().unwrap_or_default();
        let schema = parts.next();
        let database = parts.next();
        Ok(Self {
            database,
            schema,
            name,
        })
    }

    /// The `DB.SCHEMA` qualifier, when the name carries one.
    pub fn scope(&self) -> Option<String> {
        match (&self.database, &self.schema) {
            (Some(db), Some(schema)) => Some(format!("{db}.{schema}")),
            (None, Some(schema)) => Some(schema.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(db) = &self.database {
            write!(f, "{db}.")?;
        }
        if let Some(schema) = &self.schema {
            write!(f, "{schema}.")?;
        }
        f.write_str(&self.name)
    }
}
