//! Caller-built filters over drugs, rendered into the `WHERE` clause of
//! [`DrugRepository::find_all_matching`](super::repository::DrugRepository::find_all_matching).
//!
//! A [`Specification`] is a tree of field conditions combined with
//! AND / OR / NOT. Every value is sent as a bind parameter; only column
//! names and operators are written into the SQL text.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};

use super::DatabaseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Text,
    Timestamp,
    Bool,
}

/// Filterable and sortable drug columns. Queries alias `drug` as `d` and
/// `drug_form` as `f`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrugField {
    DrugId,
    OwnerUserId,
    DrugName,
    DrugDescription,
    ExpirationDate,
    DrugFormId,
    FormName,
    AlertSent,
    AlertSentAt,
}

impl DrugField {
    pub fn column(self) -> &'static str {
        match self {
            DrugField::DrugId => "d.drug_id",
            DrugField::OwnerUserId => "d.owner_user_id",
            DrugField::DrugName => "d.drug_name",
            DrugField::DrugDescription => "d.drug_description",
            DrugField::ExpirationDate => "d.expiration_date",
            DrugField::DrugFormId => "d.drug_form_id",
            DrugField::FormName => "f.name",
            DrugField::AlertSent => "d.alert_sent",
            DrugField::AlertSentAt => "d.alert_sent_at",
        }
    }

    pub fn kind(self) -> ValueKind {
        match self {
            DrugField::DrugId | DrugField::OwnerUserId | DrugField::DrugFormId => ValueKind::Int,
            DrugField::DrugName | DrugField::DrugDescription | DrugField::FormName => {
                ValueKind::Text
            }
            DrugField::ExpirationDate | DrugField::AlertSentAt => ValueKind::Timestamp,
            DrugField::AlertSent => ValueKind::Bool,
        }
    }

    pub fn is_nullable(self) -> bool {
        matches!(self, DrugField::DrugDescription | DrugField::AlertSentAt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Case-insensitive substring match.
    Contains,
    In,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Text(String),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    IntList(Vec<i32>),
    TextList(Vec<String>),
    /// Placeholder for operators that take no operand.
    None,
}

impl Value {
    fn scalar_kind(&self) -> Option<ValueKind> {
        match self {
            Value::Int(_) => Some(ValueKind::Int),
            Value::Text(_) => Some(ValueKind::Text),
            Value::Bool(_) => Some(ValueKind::Bool),
            Value::Timestamp(_) => Some(ValueKind::Timestamp),
            _ => None,
        }
    }

    fn list_kind(&self) -> Option<ValueKind> {
        match self {
            Value::IntList(_) => Some(ValueKind::Int),
            Value::TextList(_) => Some(ValueKind::Text),
            _ => None,
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<Vec<i32>> for Value {
    fn from(v: Vec<i32>) -> Self {
        Value::IntList(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::TextList(v)
    }
}

/// Predicate over drugs, rendered as a parameterized `WHERE` clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Specification {
    /// Matches every row.
    All,
    Condition {
        field: DrugField,
        op: Operator,
        value: Value,
    },
    And(Vec<Specification>),
    Or(Vec<Specification>),
    Not(Box<Specification>),
}

impl Specification {
    /// Builds a single `field op value` condition.
    ///
    /// Parameters:
    /// - `field`: The column to test.
    /// - `op`: The comparison to apply.
    /// - `value`: The bound right-hand side; `Value::None` for the null
    ///   checks.
    ///
    /// Returns:
    /// - An unvalidated `Specification::Condition`. Mismatched kinds are
    ///   reported by [`Specification::validate`].
    pub fn condition(field: DrugField, op: Operator, value: impl Into<Value>) -> Self {
        Specification::Condition {
            field,
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: DrugField, value: impl Into<Value>) -> Self {
        Self::condition(field, Operator::Eq, value)
    }

    pub fn ne(field: DrugField, value: impl Into<Value>) -> Self {
        Self::condition(field, Operator::Ne, value)
    }

    pub fn lt(field: DrugField, value: impl Into<Value>) -> Self {
        Self::condition(field, Operator::Lt, value)
    }

    pub fn le(field: DrugField, value: impl Into<Value>) -> Self {
        Self::condition(field, Operator::Le, value)
    }

    pub fn gt(field: DrugField, value: impl Into<Value>) -> Self {
        Self::condition(field, Operator::Gt, value)
    }

    pub fn ge(field: DrugField, value: impl Into<Value>) -> Self {
        Self::condition(field, Operator::Ge, value)
    }

    /// Case-insensitive substring match. `%` and `_` in `needle` match
    /// literally.
    pub fn contains(field: DrugField, needle: impl Into<String>) -> Self {
        Self::condition(field, Operator::Contains, Value::Text(needle.into()))
    }

    pub fn is_in(field: DrugField, values: impl Into<Value>) -> Self {
        Self::condition(field, Operator::In, values)
    }

    pub fn is_null(field: DrugField) -> Self {
        Self::condition(field, Operator::IsNull, Value::None)
    }

    pub fn is_not_null(field: DrugField) -> Self {
        Self::condition(field, Operator::IsNotNull, Value::None)
    }

    /// Conjunction that flattens nested `And`s and drops `All`.
    pub fn and(self, other: Specification) -> Self {
        match (self, other) {
            (Specification::All, s) | (s, Specification::All) => s,
            (Specification::And(mut left), Specification::And(right)) => {
                left.extend(right);
                Specification::And(left)
            }
            (Specification::And(mut left), s) => {
                left.push(s);
                Specification::And(left)
            }
            (s, Specification::And(mut right)) => {
                right.insert(0, s);
                Specification::And(right)
            }
            (left, right) => Specification::And(vec![left, right]),
        }
    }

    /// Disjunction that flattens nested `Or`s.
    pub fn or(self, other: Specification) -> Self {
        match (self, other) {
            (Specification::Or(mut left), Specification::Or(right)) => {
                left.extend(right);
                Specification::Or(left)
            }
            (Specification::Or(mut left), s) => {
                left.push(s);
                Specification::Or(left)
            }
            (left, right) => Specification::Or(vec![left, right]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        match self {
            Specification::Not(inner) => *inner,
            s => Specification::Not(Box::new(s)),
        }
    }

    /// Checks every condition's operator and value against its field.
    pub fn validate(&self) -> Result<(), DatabaseError> {
        match self {
            Specification::All => Ok(()),
            Specification::Condition { field, op, value } => validate_condition(*field, *op, value),
            Specification::And(parts) | Specification::Or(parts) => {
                parts.iter().try_for_each(Specification::validate)
            }
            Specification::Not(inner) => inner.validate(),
        }
    }

    /// Appends this predicate to `qb`. Call [`Specification::validate`] first.
    pub fn push_sql(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        match self {
            Specification::All => {
                qb.push("TRUE");
            }
            Specification::Condition { field, op, value } => push_condition(qb, *field, *op, value),
            Specification::And(parts) => push_joined(qb, parts, " AND ", "TRUE"),
            Specification::Or(parts) => push_joined(qb, parts, " OR ", "FALSE"),
            Specification::Not(inner) => {
                qb.push("NOT (");
                inner.push_sql(qb);
                qb.push(")");
            }
        }
    }
}

fn validate_condition(field: DrugField, op: Operator, value: &Value) -> Result<(), DatabaseError> {
    let kind = field.kind();
    let invalid = |reason: &str| {
        Err(DatabaseError::InvalidQuery(format!(
            "{:?} {:?}: {}",
            field, op, reason
        )))
    };

    match op {
        Operator::IsNull | Operator::IsNotNull => {
            if !field.is_nullable() {
                return invalid("column is not nullable");
            }
            if *value != Value::None {
                return invalid("operator takes no value");
            }
        }
        Operator::In => match value.list_kind() {
            Some(k) if k == kind => {}
            _ => return invalid("expected a list matching the column type"),
        },
        Operator::Contains => {
            if kind != ValueKind::Text || value.scalar_kind() != Some(ValueKind::Text) {
                return invalid("substring match needs a text column and a text value");
            }
        }
        Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge if kind == ValueKind::Bool => {
            return invalid("booleans are not ordered");
        }
        _ => {
            if value.scalar_kind() != Some(kind) {
                return invalid("value type does not match the column type");
            }
        }
    }

    Ok(())
}

fn push_joined(
    qb: &mut QueryBuilder<'_, Postgres>,
    parts: &[Specification],
    separator: &str,
    empty: &str,
) {
    if parts.is_empty() {
        qb.push(empty);
        return;
    }

    qb.push("(");
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            qb.push(separator);
        }
        part.push_sql(qb);
    }
    qb.push(")");
}

fn push_condition(qb: &mut QueryBuilder<'_, Postgres>, field: DrugField, op: Operator, value: &Value) {
    let column = field.column();

    match op {
        Operator::IsNull => {
            qb.push(column).push(" IS NULL");
            return;
        }
        Operator::IsNotNull => {
            qb.push(column).push(" IS NOT NULL");
            return;
        }
        Operator::Contains => {
            let needle = match value {
                Value::Text(s) => s.as_str(),
                _ => "",
            };
            qb.push("LOWER(")
                .push(column)
                .push(") LIKE LOWER(")
                .push_bind(format!("%{}%", escape_like(needle)))
                .push(")");
            return;
        }
        Operator::In => {
            qb.push(column).push(" = ANY(");
            push_value(qb, value);
            qb.push(")");
            return;
        }
        _ => {}
    }

    let symbol = match op {
        Operator::Eq => " = ",
        Operator::Ne => " <> ",
        Operator::Lt => " < ",
        Operator::Le => " <= ",
        Operator::Gt => " > ",
        _ => " >= ",
    };
    qb.push(column).push(symbol);
    push_value(qb, value);
}

fn push_value(qb: &mut QueryBuilder<'_, Postgres>, value: &Value) {
    match value {
        Value::Int(v) => qb.push_bind(*v),
        Value::Text(v) => qb.push_bind(v.clone()),
        Value::Bool(v) => qb.push_bind(*v),
        Value::Timestamp(v) => qb.push_bind(*v),
        Value::IntList(v) => qb.push_bind(v.clone()),
        Value::TextList(v) => qb.push_bind(v.clone()),
        Value::None => qb.push("NULL"),
    };
}

fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
