use std::fmt;
use std::str::FromStr;

use super::{ScanError, ScanResult};
use crate::record::{PageRow, TableScheme, Value};

/// Tolerance for equality when both sides are numeric
const FLOAT_EPSILON: f64 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEquals,
    GreaterThan,
    GreaterThanOrEquals,
}

impl ComparisonOperator {
    pub const fn symbol(&self) -> &'static str {
        match self {
            ComparisonOperator::Equals => "=",
            ComparisonOperator::NotEquals => "!=",
            ComparisonOperator::LessThan => "<",
            ComparisonOperator::LessThanOrEquals => "<=",
            ComparisonOperator::GreaterThan => ">",
            ComparisonOperator::GreaterThanOrEquals => ">=",
        }
    }

    pub const fn is_ordering(&self) -> bool {
        !matches!(self, ComparisonOperator::Equals | ComparisonOperator::NotEquals)
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for ComparisonOperator {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "=" | "==" => Ok(ComparisonOperator::Equals),
            "!=" | "<>" => Ok(ComparisonOperator::NotEquals),
            "<" => Ok(ComparisonOperator::LessThan),
            "<=" => Ok(ComparisonOperator::LessThanOrEquals),
            ">" => Ok(ComparisonOperator::GreaterThan),
            ">=" => Ok(ComparisonOperator::GreaterThanOrEquals),
            _ => Err(ScanError::InvalidCondition(format!(
                "Unknown comparison operator '{}'",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
}

impl LogicalOperator {
    fn apply(&self, left: bool, right: bool) -> bool {
        match self {
            LogicalOperator::And => left && right,
            LogicalOperator::Or => left || right,
        }
    }
}

impl FromStr for LogicalOperator {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AND" => Ok(LogicalOperator::And),
            "OR" => Ok(LogicalOperator::Or),
            _ => Err(ScanError::InvalidCondition(format!(
                "Unknown logical operator '{}'",
                s
            ))),
        }
    }
}

/// One side of a comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(String),
    Literal(String),
}

impl Operand {
    pub fn column(name: impl Into<String>) -> Self {
        Operand::Column(name.into())
    }

    pub fn literal(text: impl Into<String>) -> Self {
        Operand::Literal(text.into())
    }
}

/// `left operator right`
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub left: Operand,
    pub operator: ComparisonOperator,
    pub right: Operand,
}

impl Condition {
    pub fn new(left: Operand, operator: ComparisonOperator, right: Operand) -> Self {
        Self {
            left,
            operator,
            right,
        }
    }
}

/// Flat predicate: `c0 op0 c1 op1 c2 ...`.
///
/// There is no precedence: the result is folded strictly left to right, so
/// `A OR B AND C` means `(A OR B) AND C`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionGroup {
    subconditions: Vec<Condition>,
    logical_operators: Vec<LogicalOperator>,
}

impl ConditionGroup {
    /// Build a group as handed over by a parser. Shape is checked when the
    /// group is prepared against a table.
    pub fn new(subconditions: Vec<Condition>, logical_operators: Vec<LogicalOperator>) -> Self {
        Self {
            subconditions,
            logical_operators,
        }
    }

    pub fn single(condition: Condition) -> Self {
        Self::new(vec![condition], Vec::new())
    }

    pub fn and(mut self, condition: Condition) -> Self {
        self.logical_operators.push(LogicalOperator::And);
        self.subconditions.push(condition);
        self
    }

    pub fn or(mut self, condition: Condition) -> Self {
        self.logical_operators.push(LogicalOperator::Or);
        self.subconditions.push(condition);
        self
    }

    pub fn subconditions(&self) -> &[Condition] {
        &self.subconditions
    }

    pub fn logical_operators(&self) -> &[LogicalOperator] {
        &self.logical_operators
    }

    /// Resolve column operands to positions in `scheme`
    pub fn prepare(&self, scheme: &TableScheme) -> ScanResult<PreparedCondition> {
        if self.subconditions.is_empty() {
            return Err(ScanError::InvalidCondition("empty condition".to_string()));
        }
        if self.logical_operators.len() != self.subconditions.len() - 1 {
            return Err(ScanError::InvalidCondition(format!(
                "{} subconditions joined by {} logical operators",
                self.subconditions.len(),
                self.logical_operators.len()
            )));
        }

        let resolve = |operand: &Operand| match operand {
            Operand::Column(name) => scheme
                .find_column(name)
                .map(PreparedOperand::Column)
                .ok_or_else(|| ScanError::ColumnNotFound(name.clone())),
            Operand::Literal(text) => Ok(PreparedOperand::Literal(text.clone())),
        };

        let comparisons = self
            .subconditions
            .iter()
            .map(|c| -> ScanResult<_> { Ok((resolve(&c.left)?, c.operator, resolve(&c.right)?)) })
            .collect::<ScanResult<Vec<_>>>()?;

        Ok(PreparedCondition {
            comparisons,
            logical_operators: self.logical_operators.clone(),
        })
    }

    /// Evaluate against a single decoded row
    pub fn evaluate(&self, row: &PageRow, scheme: &TableScheme) -> ScanResult<bool> {
        self.prepare(scheme)?.evaluate(row)
    }
}

/// Parses the whitespace-separated form `a = 1 AND b > 2`. Single or double
/// quotes make a literal and may contain spaces; bare numbers are literals;
/// any other bare word names a column.
impl FromStr for ConditionGroup {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens = tokenize(s)?;
        let mut subconditions = Vec::new();
        let mut logical_operators = Vec::new();

        let mut iter = tokens.into_iter();
        loop {
            let (Some(left), Some(op), Some(right)) = (iter.next(), iter.next(), iter.next()) else {
                return Err(ScanError::InvalidCondition(format!(
                    "expected `operand operator operand` in '{}'",
                    s
                )));
            };
            subconditions.push(Condition::new(left.into_operand(), op.text.parse()?, right.into_operand()));

            match iter.next() {
                Some(token) => logical_operators.push(token.text.parse()?),
                None => break,
            }
        }

        Ok(Self::new(subconditions, logical_operators))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum PreparedOperand {
    Column(usize),
    Literal(String),
}

/// A condition group bound to one table's column positions
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCondition {
    comparisons: Vec<(PreparedOperand, ComparisonOperator, PreparedOperand)>,
    logical_operators: Vec<LogicalOperator>,
}

impl PreparedCondition {
    pub fn evaluate(&self, row: &PageRow) -> ScanResult<bool> {
        let mut results = Vec::with_capacity(self.comparisons.len());
        for (left, operator, right) in &self.comparisons {
            results.push(compare(row, left, *operator, right)?);
        }

        let mut result = results[0];
        for (op, next) in self.logical_operators.iter().zip(&results[1..]) {
            result = op.apply(result, *next);
        }
        Ok(result)
    }
}

enum Resolved<'a> {
    Value(&'a Value),
    Text(&'a str),
}

impl Resolved<'_> {
    fn as_number(&self) -> Option<f64> {
        match self {
            Resolved::Value(value) => value.as_f64(),
            Resolved::Text(text) => text.trim().parse().ok(),
        }
    }

    fn render(&self) -> String {
        match self {
            Resolved::Value(value) => value.to_string(),
            Resolved::Text(text) => text.to_string(),
        }
    }
}

fn resolve<'a>(row: &'a PageRow, operand: &'a PreparedOperand) -> Option<Resolved<'a>> {
    match operand {
        PreparedOperand::Column(idx) => row.get(*idx).map(Resolved::Value),
        PreparedOperand::Literal(text) => Some(Resolved::Text(text)),
    }
}

fn compare(
    row: &PageRow,
    left: &PreparedOperand,
    operator: ComparisonOperator,
    right: &PreparedOperand,
) -> ScanResult<bool> {
    // NULL never compares
    let (Some(left), Some(right)) = (resolve(row, left), resolve(row, right)) else {
        return Ok(false);
    };

    if !operator.is_ordering() {
        let equal = match (left.as_number(), right.as_number()) {
            (Some(l), Some(r)) => (l - r).abs() < FLOAT_EPSILON,
            _ => left.render() == right.render(),
        };
        return Ok(match operator {
            ComparisonOperator::Equals => equal,
            _ => !equal,
        });
    }

    let l = ordering_operand(&left, operator)?;
    let r = ordering_operand(&right, operator)?;
    Ok(match operator {
        ComparisonOperator::LessThan => l < r,
        ComparisonOperator::LessThanOrEquals => l <= r,
        ComparisonOperator::GreaterThan => l > r,
        _ => l >= r,
    })
}

fn ordering_operand(operand: &Resolved<'_>, operator: ComparisonOperator) -> ScanResult<f64> {
    operand
        .as_number()
        .ok_or_else(|| ScanError::InvalidOperandType {
            operand: operand.render(),
            operator,
        })
}

struct Token {
    text: String,
    quoted: bool,
}

impl Token {
    fn into_operand(self) -> Operand {
        if self.quoted || self.text.parse::<f64>().is_ok() {
            Operand::Literal(self.text)
        } else {
            Operand::Column(self.text)
        }
    }
}

fn tokenize(s: &str) -> ScanResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = s.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c == '\'' || c == '"' {
            chars.next();
            let mut text = String::new();
            loop {
                match chars.next() {
                    Some(ch) if ch == c => break,
                    Some(ch) => text.push(ch),
                    None => {
                        return Err(ScanError::InvalidCondition(
                            "unterminated quoted literal".to_string(),
                        ));
                    }
                }
            }
            tokens.push(Token { text, quoted: true });
            continue;
        }

        let mut text = String::new();
        while let Some(&ch) = chars.peek() {
            if ch.is_whitespace() {
                break;
            }
            text.push(ch);
            chars.next();
        }
        tokens.push(Token {
            text,
            quoted: false,
        });
    }

    Ok(tokens)
}
