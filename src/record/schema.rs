use std::fmt;
use std::str::FromStr;

use super::error::{RecordError, RecordResult};
use super::value::{SqlValueType, Value};

/// Column constraint flags, written as short tokens in `.def` files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnConstraint {
    PrimaryKey,
    Unique,
    NotNull,
    AutoIncrement,
}

impl ColumnConstraint {
    pub const fn token(&self) -> &'static str {
        match self {
            ColumnConstraint::PrimaryKey => "PK",
            ColumnConstraint::Unique => "UN",
            ColumnConstraint::NotNull => "NN",
            ColumnConstraint::AutoIncrement => "AI",
        }
    }
}

impl FromStr for ColumnConstraint {
    type Err = RecordError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token.to_ascii_uppercase().as_str() {
            "PK" => Ok(ColumnConstraint::PrimaryKey),
            "UN" => Ok(ColumnConstraint::Unique),
            "NN" => Ok(ColumnConstraint::NotNull),
            "AI" => Ok(ColumnConstraint::AutoIncrement),
            _ => Err(RecordError::InvalidValue(format!(
                "Unknown constraint token '{}'",
                token
            ))),
        }
    }
}

/// Column definition with metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnScheme {
    pub name: String,
    pub value_type: SqlValueType,
    constraints: Vec<ColumnConstraint>,
}

impl ColumnScheme {
    /// Create a new column definition; duplicate constraints collapse
    pub fn new(name: impl Into<String>, value_type: SqlValueType, constraints: &[ColumnConstraint]) -> Self {
        let mut unique = Vec::with_capacity(constraints.len());
        for constraint in constraints {
            if !unique.contains(constraint) {
                unique.push(*constraint);
            }
        }
        Self {
            name: name.into(),
            value_type,
            constraints: unique,
        }
    }

    /// Parse one `.def` line: `<name> <VALUETYPE> [constraint]*`
    pub fn from_definition(line: &str) -> RecordResult<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 2 {
            return Err(RecordError::InvalidValue(format!(
                "expected at least 2 tokens, got {}",
                tokens.len()
            )));
        }

        let value_type: SqlValueType = tokens[1].parse()?;
        let constraints = tokens[2..]
            .iter()
            .map(|token| token.parse())
            .collect::<RecordResult<Vec<ColumnConstraint>>>()?;

        Ok(Self::new(tokens[0], value_type, &constraints))
    }

    pub fn constraints(&self) -> &[ColumnConstraint] {
        &self.constraints
    }

    pub fn has_constraint(&self, constraint: ColumnConstraint) -> bool {
        self.constraints.contains(&constraint)
    }

    /// NULL is rejected for NOT NULL and PRIMARY KEY columns
    pub fn is_nullable(&self) -> bool {
        !self.has_constraint(ColumnConstraint::NotNull)
            && !self.has_constraint(ColumnConstraint::PrimaryKey)
    }

    /// Values must be distinct across the table
    pub fn is_unique(&self) -> bool {
        self.has_constraint(ColumnConstraint::Unique)
            || self.has_constraint(ColumnConstraint::PrimaryKey)
    }
}

impl fmt::Display for ColumnScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.value_type)?;
        for constraint in &self.constraints {
            write!(f, " {}", constraint.token())?;
        }
        Ok(())
    }
}

/// Table layout: column order is the on-disk value order
#[derive(Debug, Clone, PartialEq)]
pub struct TableScheme {
    table_name: String,
    columns: Vec<ColumnScheme>,
}

impl TableScheme {
    pub fn new(table_name: impl Into<String>, columns: Vec<ColumnScheme>) -> Self {
        Self {
            table_name: table_name.into(),
            columns,
        }
    }

    /// Get table name
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Get all columns
    pub fn columns(&self) -> &[ColumnScheme] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Find column index by name
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn primary_key(&self) -> Option<&ColumnScheme> {
        self.columns
            .iter()
            .find(|c| c.has_constraint(ColumnConstraint::PrimaryKey))
    }

    /// Structural checks: at least one column, distinct names, at most one primary key
    pub fn check(&self) -> RecordResult<()> {
        if self.columns.is_empty() {
            return Err(RecordError::SchemaMismatch(format!(
                "Table '{}' has no columns",
                self.table_name
            )));
        }

        for (i, column) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(RecordError::SchemaMismatch(format!(
                    "Duplicate column '{}'",
                    column.name
                )));
            }
        }

        let primary_keys = self
            .columns
            .iter()
            .filter(|c| c.has_constraint(ColumnConstraint::PrimaryKey))
            .count();
        if primary_keys > 1 {
            return Err(RecordError::SchemaMismatch(format!(
                "Table '{}' declares {} primary keys",
                self.table_name, primary_keys
            )));
        }

        Ok(())
    }

    /// Validate a row's values against this scheme
    pub fn validate_row(&self, values: &[Option<Value>]) -> RecordResult<()> {
        if values.len() != self.columns.len() {
            return Err(RecordError::SchemaMismatch(format!(
                "Expected {} columns, got {}",
                self.columns.len(),
                values.len()
            )));
        }

        for (value, col) in values.iter().zip(&self.columns) {
            match value {
                None if !col.is_nullable() => {
                    return Err(RecordError::NullConstraintViolation(format!(
                        "Column '{}' cannot be NULL",
                        col.name
                    )));
                }
                Some(v) if !v.matches_type(col.value_type) => {
                    return Err(RecordError::TypeMismatch {
                        expected: col.value_type.to_string(),
                        actual: format!("{:?}", v),
                    });
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Render the `.def` file contents, one column per line
    pub fn to_definition(&self) -> String {
        self.columns
            .iter()
            .map(|c| format!("{}\n", c))
            .collect()
    }
}
