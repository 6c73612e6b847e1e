//! Evaluating predicates against column statistics
//!
//! Statistics only bound the values in a scope, so the evaluator answers with
//! the set of outcomes the predicate could have for some row in that scope.
//! An outcome is one of true, false or null (SQL's unknown), which gives
//! seven non-empty sets; [`TruthValue`] is that set. Compound predicates
//! combine the sets with Kleene logic, so `not` applied to a scope that may
//! hold nulls never claims more than it knows.
//!
//! A scan only cares whether any row can satisfy the predicate, which is
//! what [`Verdict`] reports.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{Result, StripeFileError};
use crate::footer::WriterVersion;
use crate::predicate::{Literal, Operator, Predicate};
use crate::statistics::{ColumnStatistics, TypeStatistics};
use crate::types::TypeTree;
use crate::value::{Row, Value};

const TRUE: u8 = 0b001;
const FALSE: u8 = 0b010;
const NULL: u8 = 0b100;

/// The set of outcomes a predicate may take over a scope
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TruthValue(u8);

impl TruthValue {
    pub const YES: TruthValue = TruthValue(TRUE);
    pub const NO: TruthValue = TruthValue(FALSE);
    pub const NULL: TruthValue = TruthValue(NULL);
    pub const YES_NULL: TruthValue = TruthValue(TRUE | NULL);
    pub const NO_NULL: TruthValue = TruthValue(FALSE | NULL);
    pub const YES_NO: TruthValue = TruthValue(TRUE | FALSE);
    pub const YES_NO_NULL: TruthValue = TruthValue(TRUE | FALSE | NULL);

    /// Whether some row may satisfy the predicate
    pub fn may_be_true(self) -> bool {
        self.0 & TRUE != 0
    }

    /// Whether some row may fail the predicate
    pub fn may_be_false(self) -> bool {
        self.0 & FALSE != 0
    }

    /// Whether the predicate may be null for some row
    pub fn may_be_null(self) -> bool {
        self.0 & NULL != 0
    }

    pub fn and(self, other: TruthValue) -> TruthValue {
        self.combine(other, |a, b| {
            if a == FALSE || b == FALSE {
                FALSE
            } else if a == NULL || b == NULL {
                NULL
            } else {
                TRUE
            }
        })
    }

    pub fn or(self, other: TruthValue) -> TruthValue {
        self.combine(other, |a, b| {
            if a == TRUE || b == TRUE {
                TRUE
            } else if a == NULL || b == NULL {
                NULL
            } else {
                FALSE
            }
        })
    }

    pub fn not(self) -> TruthValue {
        let mut out = self.0 & NULL;
        if self.may_be_true() {
            out |= FALSE;
        }
        if self.may_be_false() {
            out |= TRUE;
        }
        TruthValue(out)
    }

    /// Add null as a possible outcome
    fn with_null(self) -> TruthValue {
        TruthValue(self.0 | NULL)
    }

    fn with_false(self) -> TruthValue {
        TruthValue(self.0 | FALSE)
    }

    fn combine(self, other: TruthValue, op: impl Fn(u8, u8) -> u8) -> TruthValue {
        let mut out = 0;
        for a in [TRUE, FALSE, NULL] {
            if self.0 & a == 0 {
                continue;
            }
            for b in [TRUE, FALSE, NULL] {
                if other.0 & b != 0 {
                    out |= op(a, b);
                }
            }
        }
        TruthValue(out)
    }

    /// Collapse to what a scan needs to know
    pub fn verdict(self) -> Verdict {
        if self == TruthValue::YES {
            Verdict::True
        } else if !self.may_be_true() {
            Verdict::False
        } else {
            Verdict::Unknown
        }
    }
}

impl fmt::Debug for TruthValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            TruthValue::YES => "YES",
            TruthValue::NO => "NO",
            TruthValue::NULL => "NULL",
            TruthValue::YES_NULL => "YES_NULL",
            TruthValue::NO_NULL => "NO_NULL",
            TruthValue::YES_NO => "YES_NO",
            _ => "YES_NO_NULL",
        };
        f.write_str(name)
    }
}

/// Whether rows in a scope can satisfy a predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Every row satisfies it
    True,
    /// No row satisfies it; the scope can be skipped
    False,
    /// Some rows might
    Unknown,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::True => write!(f, "TRUE"),
            Verdict::False => write!(f, "FALSE"),
            Verdict::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Statistics for each type id of one scope
pub trait StatisticsScope {
    fn column_statistics(&self, column: usize) -> Option<&ColumnStatistics>;
}

impl StatisticsScope for [ColumnStatistics] {
    fn column_statistics(&self, column: usize) -> Option<&ColumnStatistics> {
        self.get(column)
    }
}

impl StatisticsScope for Vec<ColumnStatistics> {
    fn column_statistics(&self, column: usize) -> Option<&ColumnStatistics> {
        self.get(column)
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        column: usize,
        /// Compound columns above `column`, below the root
        ancestors: Vec<usize>,
        operator: Operator,
    },
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
}

/// A predicate whose column names are resolved to type ids of one file
#[derive(Debug, Clone)]
pub struct BoundPredicate {
    root: Node,
    columns: Vec<usize>,
    trust_string_ranges: bool,
}

impl BoundPredicate {
    /// Resolve the predicate's column names against `types`
    ///
    /// When `column_names` is non-empty it names the root fields by position,
    /// overriding the names stored in the file. Otherwise names are looked up
    /// as (possibly dotted) field paths of the file's schema.
    pub fn bind(
        predicate: &Predicate,
        column_names: &[String],
        types: &TypeTree,
        writer_version: WriterVersion,
    ) -> Result<Self> {
        let mut columns = Vec::new();
        let root = bind_node(predicate, column_names, types, &mut columns)?;
        Ok(Self {
            root,
            columns,
            // strings were truncated inconsistently by the earliest writers
            trust_string_ranges: writer_version != WriterVersion::Original,
        })
    }

    /// Type ids the predicate reads, in order of first use
    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    /// Possible outcomes over the scope described by `statistics`
    pub fn truth_value<S: StatisticsScope + ?Sized>(&self, statistics: &S) -> TruthValue {
        self.eval(&self.root, &|column: usize, ancestors: &[usize]| {
            let Some(stats) = statistics.column_statistics(column) else {
                return Facts::unknown();
            };
            let mut facts = Facts::of_statistics(stats, self.trust_string_ranges);
            // a null parent makes the column null without the column's own
            // statistics necessarily saying so
            let parent_may_be_null = ancestors.iter().any(|&ancestor| {
                statistics
                    .column_statistics(ancestor)
                    .is_none_or(ColumnStatistics::has_null)
            });
            if parent_may_be_null {
                facts.has_null = true;
            }
            facts
        })
    }

    pub fn evaluate<S: StatisticsScope + ?Sized>(&self, statistics: &S) -> Verdict {
        self.truth_value(statistics).verdict()
    }

    /// Outcome of the predicate for a single decoded row
    ///
    /// Columns the row does not carry (nested below a list or map, or not
    /// read) are treated as unknown.
    pub fn test_row(&self, row: &Row, types: &TypeTree) -> TruthValue {
        self.eval(&self.root, &|column: usize, _: &[usize]| match value_at(row, types, column) {
            Some(value) => Facts::of_value(value),
            None => Facts::unknown(),
        })
    }

    fn eval<'a>(&self, node: &Node, facts: &dyn Fn(usize, &[usize]) -> Facts<'a>) -> TruthValue {
        match node {
            Node::Leaf {
                column,
                ancestors,
                operator,
            } => evaluate_operator(operator, &facts(*column, ancestors)),
            Node::And(children) => children
                .iter()
                .fold(TruthValue::YES, |acc, child| acc.and(self.eval(child, facts))),
            Node::Or(children) => children
                .iter()
                .fold(TruthValue::NO, |acc, child| acc.or(self.eval(child, facts))),
            Node::Not(child) => self.eval(child, facts).not(),
        }
    }
}

/// Evaluate a predicate against one scope's statistics, resolving names by field path
pub fn evaluate(predicate: &Predicate, statistics: &[ColumnStatistics], types: &TypeTree) -> Result<Verdict> {
    let bound = BoundPredicate::bind(predicate, &[], types, WriterVersion::CURRENT)?;
    Ok(bound.evaluate(statistics))
}

fn bind_node(
    predicate: &Predicate,
    column_names: &[String],
    types: &TypeTree,
    columns: &mut Vec<usize>,
) -> Result<Node> {
    Ok(match predicate {
        Predicate::Leaf(leaf) => {
            let column = resolve_column(leaf.column(), column_names, types)?;
            if !columns.contains(&column) {
                columns.push(column);
            }
            Node::Leaf {
                column,
                ancestors: ancestors_below_root(types, column),
                operator: leaf.operator().clone(),
            }
        }
        Predicate::And(children) => Node::And(
            children
                .iter()
                .map(|child| bind_node(child, column_names, types, columns))
                .collect::<Result<_>>()?,
        ),
        Predicate::Or(children) => Node::Or(
            children
                .iter()
                .map(|child| bind_node(child, column_names, types, columns))
                .collect::<Result<_>>()?,
        ),
        Predicate::Not(child) => Node::Not(Box::new(bind_node(child, column_names, types, columns)?)),
    })
}

fn resolve_column(name: &str, column_names: &[String], types: &TypeTree) -> Result<usize> {
    let resolved = if column_names.is_empty() {
        types.find_column(name)
    } else {
        column_names
            .iter()
            .position(|candidate| candidate == name)
            .and_then(|position| types.top_level_columns().get(position).copied())
    };
    resolved.ok_or_else(|| {
        StripeFileError::invalid_options(format!("predicate column '{}' is not in the file", name))
    })
}

fn ancestors_below_root(types: &TypeTree, column: usize) -> Vec<usize> {
    let mut ancestors = Vec::new();
    let mut current = types.get(column).and_then(|node| node.parent());
    while let Some(id) = current {
        let parent = types.get(id).and_then(|node| node.parent());
        if parent.is_some() {
            ancestors.push(id);
        }
        current = parent;
    }
    ancestors
}

/// Walk struct fields from the root down to `column`
fn value_at<'a>(row: &'a Row, types: &TypeTree, column: usize) -> Option<&'a Value> {
    let mut path = Vec::new();
    let mut current = column;
    while let Some(parent) = types.get(current)?.parent() {
        let position = types.get(parent)?.children().iter().position(|&c| c == current)?;
        path.push((parent, position));
        current = parent;
    }

    let mut steps = path.into_iter().rev();
    let (_, first) = steps.next()?;
    let mut value = row.get(first)?;
    for (parent, position) in steps {
        if types.get(parent)?.kind() != crate::types::TypeKind::Struct {
            return None;
        }
        value = match value {
            Value::Struct(fields) => fields.get(position)?,
            // a null struct makes every field below it null
            Value::Null => return Some(value),
            _ => return None,
        };
    }
    Some(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Numeric,
    String,
    Boolean,
    Date,
    Timestamp,
}

#[derive(Debug, Clone, Copy)]
enum Scalar<'a> {
    Int(i64),
    Float(f64),
    Str(&'a str),
    Bool(bool),
}

impl Scalar<'_> {
    fn compare(&self, other: &Scalar<'_>) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Int(a), Scalar::Int(b)) => Some(a.cmp(b)),
            (Scalar::Float(a), Scalar::Float(b)) => a.partial_cmp(b),
            (Scalar::Int(a), Scalar::Float(b)) => compare_int_float(*a, *b),
            (Scalar::Float(a), Scalar::Int(b)) => compare_int_float(*b, *a).map(Ordering::reverse),
            (Scalar::Str(a), Scalar::Str(b)) => Some(a.cmp(b)),
            (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// Exact ordering of an integer against a double; `as f64` would round
/// integers beyond 2^53
fn compare_int_float(int: i64, float: f64) -> Option<Ordering> {
    // 2^63, the first double above every i64
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if float.is_nan() {
        return None;
    }
    if float >= LIMIT {
        return Some(Ordering::Less);
    }
    if float < -LIMIT {
        return Some(Ordering::Greater);
    }
    let whole = float.trunc();
    // integral and within i64, so the cast is exact
    match int.cmp(&(whole as i64)) {
        Ordering::Equal => whole.partial_cmp(&float),
        other => Some(other),
    }
}

fn literal_scalar(literal: &Literal) -> (Family, Scalar<'_>) {
    match literal {
        Literal::Boolean(v) => (Family::Boolean, Scalar::Bool(*v)),
        Literal::Long(v) => (Family::Numeric, Scalar::Int(*v)),
        Literal::Double(v) => (Family::Numeric, Scalar::Float(*v)),
        Literal::String(v) => (Family::String, Scalar::Str(v)),
        Literal::Date(v) => (Family::Date, Scalar::Int(*v as i64)),
        Literal::Timestamp(v) => (Family::Timestamp, Scalar::Int(*v)),
    }
}

/// What is known about a column over a scope
struct Facts<'a> {
    /// `None` when nothing is known at all
    values: Option<u64>,
    has_null: bool,
    range: Option<(Family, Scalar<'a>, Scalar<'a>)>,
}

impl<'a> Facts<'a> {
    fn unknown() -> Self {
        Self {
            values: None,
            has_null: true,
            range: None,
        }
    }

    fn of_statistics(stats: &'a ColumnStatistics, trust_strings: bool) -> Self {
        let Some(values) = stats.known_number_of_values() else {
            return Self::unknown();
        };
        let range = match stats.type_statistics() {
            TypeStatistics::Integer {
                min: Some(min),
                max: Some(max),
                ..
            } => Some((Family::Numeric, Scalar::Int(*min), Scalar::Int(*max))),
            TypeStatistics::Double {
                min: Some(min),
                max: Some(max),
                ..
            } => Some((Family::Numeric, Scalar::Float(*min), Scalar::Float(*max))),
            TypeStatistics::String {
                min: Some(min),
                max: Some(max),
                ..
            } if trust_strings => Some((Family::String, Scalar::Str(min), Scalar::Str(max))),
            TypeStatistics::Boolean { true_count } if values > 0 => {
                let all_true = *true_count >= values;
                Some((
                    Family::Boolean,
                    Scalar::Bool(all_true),
                    Scalar::Bool(*true_count > 0),
                ))
            }
            TypeStatistics::Date {
                min: Some(min),
                max: Some(max),
            } => Some((Family::Date, Scalar::Int(*min as i64), Scalar::Int(*max as i64))),
            TypeStatistics::Timestamp {
                min: Some(min),
                max: Some(max),
            } => Some((Family::Timestamp, Scalar::Int(*min), Scalar::Int(*max))),
            _ => None,
        };
        Self {
            values: Some(values),
            has_null: stats.has_null(),
            range,
        }
    }

    fn of_value(value: &'a Value) -> Self {
        let point = match value {
            Value::Null => {
                return Self {
                    values: Some(0),
                    has_null: true,
                    range: None,
                }
            }
            Value::Boolean(v) => Some((Family::Boolean, Scalar::Bool(*v))),
            Value::Byte(_) | Value::Short(_) | Value::Int(_) | Value::Long(_) => {
                value.as_i64().map(|v| (Family::Numeric, Scalar::Int(v)))
            }
            Value::Float(_) | Value::Double(_) => {
                value.as_f64().map(|v| (Family::Numeric, Scalar::Float(v)))
            }
            Value::String(v) => Some((Family::String, Scalar::Str(v))),
            Value::Date(v) => Some((Family::Date, Scalar::Int(*v as i64))),
            Value::Timestamp(v) => Some((Family::Timestamp, Scalar::Int(*v))),
            Value::Binary(_) | Value::List(_) | Value::Map(_) | Value::Struct(_) => None,
        };
        Self {
            values: Some(1),
            has_null: false,
            range: point.map(|(family, v)| (family, v, v)),
        }
    }
}

fn evaluate_operator(operator: &Operator, facts: &Facts<'_>) -> TruthValue {
    let Some(values) = facts.values else {
        return TruthValue::YES_NO_NULL;
    };

    if values == 0 {
        return match (operator, facts.has_null) {
            // an empty scope has no rows to keep
            (_, false) => TruthValue::NO,
            (Operator::IsNull, true) => TruthValue::YES,
            (Operator::NullSafeEquals(_), true) => TruthValue::NO,
            (_, true) => TruthValue::NULL,
        };
    }

    let outcome = match operator {
        Operator::IsNull => {
            return if facts.has_null {
                TruthValue::YES_NO
            } else {
                TruthValue::NO
            };
        }
        Operator::Equals(k) | Operator::NullSafeEquals(k) => {
            compare_range(facts, k, |min, max| match (min, max) {
                (Ordering::Greater, _) | (_, Ordering::Less) => TruthValue::NO,
                (Ordering::Equal, Ordering::Equal) => TruthValue::YES,
                _ => TruthValue::YES_NO,
            })
        }
        Operator::LessThan(k) => compare_range(facts, k, |min, max| {
            if min != Ordering::Less {
                TruthValue::NO
            } else if max == Ordering::Less {
                TruthValue::YES
            } else {
                TruthValue::YES_NO
            }
        }),
        Operator::LessThanEquals(k) => compare_range(facts, k, |min, max| {
            if min == Ordering::Greater {
                TruthValue::NO
            } else if max != Ordering::Greater {
                TruthValue::YES
            } else {
                TruthValue::YES_NO
            }
        }),
        Operator::GreaterThan(k) => compare_range(facts, k, |min, max| {
            if max != Ordering::Greater {
                TruthValue::NO
            } else if min == Ordering::Greater {
                TruthValue::YES
            } else {
                TruthValue::YES_NO
            }
        }),
        Operator::GreaterThanEquals(k) => compare_range(facts, k, |min, max| {
            if max == Ordering::Less {
                TruthValue::NO
            } else if min != Ordering::Less {
                TruthValue::YES
            } else {
                TruthValue::YES_NO
            }
        }),
        Operator::In(literals) => {
            let mut outcome = TruthValue::NO;
            for k in literals {
                let one = compare_range(facts, k, |min, max| match (min, max) {
                    (Ordering::Greater, _) | (_, Ordering::Less) => TruthValue::NO,
                    (Ordering::Equal, Ordering::Equal) => TruthValue::YES,
                    _ => TruthValue::YES_NO,
                });
                outcome = outcome.or(one);
            }
            outcome
        }
        Operator::Between(lower, upper) => {
            let above_lower = compare_range(facts, lower, |min, max| {
                if max == Ordering::Less {
                    TruthValue::NO
                } else if min != Ordering::Less {
                    TruthValue::YES
                } else {
                    TruthValue::YES_NO
                }
            });
            let below_upper = compare_range(facts, upper, |min, max| {
                if min == Ordering::Greater {
                    TruthValue::NO
                } else if max != Ordering::Greater {
                    TruthValue::YES
                } else {
                    TruthValue::YES_NO
                }
            });
            above_lower.and(below_upper)
        }
    };

    match (operator, facts.has_null) {
        (Operator::NullSafeEquals(_), true) => outcome.with_false(),
        (_, true) => outcome.with_null(),
        (_, false) => outcome,
    }
}

/// Compare the scope's range to `literal`; `decide` receives the ordering of
/// min and max relative to the literal
fn compare_range(
    facts: &Facts<'_>,
    literal: &Literal,
    decide: impl Fn(Ordering, Ordering) -> TruthValue,
) -> TruthValue {
    let Some((family, min, max)) = &facts.range else {
        return TruthValue::YES_NO;
    };
    let (literal_family, k) = literal_scalar(literal);
    if *family != literal_family {
        return TruthValue::YES_NO;
    }
    match (min.compare(&k), max.compare(&k)) {
        (Some(min), Some(max)) => decide(min, max),
        _ => TruthValue::YES_NO,
    }
}
