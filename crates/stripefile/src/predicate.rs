//! Predicates over named columns
//!
//! A predicate is a tree of comparisons against literals joined by `and`,
//! `or` and `not`. Predicates name columns rather than type ids; they are
//! bound to a file's type tree when a scan is planned (see
//! [`crate::evaluate::BoundPredicate`]).

use std::fmt;

/// A constant a column is compared against
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Boolean(bool),
    Long(i64),
    Double(f64),
    String(String),
    /// Days since the Unix epoch
    Date(i32),
    /// Milliseconds since the Unix epoch
    Timestamp(i64),
}

impl From<bool> for Literal {
    fn from(v: bool) -> Self {
        Literal::Boolean(v)
    }
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Literal::Long(v)
    }
}

impl From<i32> for Literal {
    fn from(v: i32) -> Self {
        Literal::Long(v as i64)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Literal::Double(v)
    }
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Literal::String(v.to_string())
    }
}

impl From<String> for Literal {
    fn from(v: String) -> Self {
        Literal::String(v)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Boolean(v) => write!(f, "{}", v),
            Literal::Long(v) => write!(f, "{}", v),
            Literal::Double(v) => write!(f, "{}", v),
            Literal::String(v) => write!(f, "'{}'", v.replace('\'', "''")),
            Literal::Date(v) => write!(f, "date({})", v),
            Literal::Timestamp(v) => write!(f, "timestamp({})", v),
        }
    }
}

/// The test a leaf applies to its column
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Equals(Literal),
    /// Like `Equals`, but a null column value is simply unequal
    NullSafeEquals(Literal),
    LessThan(Literal),
    LessThanEquals(Literal),
    GreaterThan(Literal),
    GreaterThanEquals(Literal),
    In(Vec<Literal>),
    /// Inclusive on both ends
    Between(Literal, Literal),
    IsNull,
}

/// A single comparison of one column
#[derive(Debug, Clone, PartialEq)]
pub struct PredicateLeaf {
    column: String,
    operator: Operator,
}

impl PredicateLeaf {
    pub fn new(column: impl Into<String>, operator: Operator) -> Self {
        Self {
            column: column.into(),
            operator,
        }
    }

    /// Column name, possibly a dotted path into nested structs
    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }
}

impl fmt::Display for PredicateLeaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let column = &self.column;
        match &self.operator {
            Operator::Equals(v) => write!(f, "{} = {}", column, v),
            Operator::NullSafeEquals(v) => write!(f, "{} <=> {}", column, v),
            Operator::LessThan(v) => write!(f, "{} < {}", column, v),
            Operator::LessThanEquals(v) => write!(f, "{} <= {}", column, v),
            Operator::GreaterThan(v) => write!(f, "{} > {}", column, v),
            Operator::GreaterThanEquals(v) => write!(f, "{} >= {}", column, v),
            Operator::In(values) => {
                write!(f, "{} in (", column)?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, ")")
            }
            Operator::Between(lower, upper) => {
                write!(f, "{} between {} and {}", column, lower, upper)
            }
            Operator::IsNull => write!(f, "{} is null", column),
        }
    }
}

/// A predicate tree
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Leaf(PredicateLeaf),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn equals(column: impl Into<String>, literal: impl Into<Literal>) -> Self {
        Self::leaf(column, Operator::Equals(literal.into()))
    }

    pub fn null_safe_equals(column: impl Into<String>, literal: impl Into<Literal>) -> Self {
        Self::leaf(column, Operator::NullSafeEquals(literal.into()))
    }

    pub fn less_than(column: impl Into<String>, literal: impl Into<Literal>) -> Self {
        Self::leaf(column, Operator::LessThan(literal.into()))
    }

    pub fn less_than_equals(column: impl Into<String>, literal: impl Into<Literal>) -> Self {
        Self::leaf(column, Operator::LessThanEquals(literal.into()))
    }

    pub fn greater_than(column: impl Into<String>, literal: impl Into<Literal>) -> Self {
        Self::leaf(column, Operator::GreaterThan(literal.into()))
    }

    pub fn greater_than_equals(column: impl Into<String>, literal: impl Into<Literal>) -> Self {
        Self::leaf(column, Operator::GreaterThanEquals(literal.into()))
    }

    pub fn is_in<L: Into<Literal>>(
        column: impl Into<String>,
        literals: impl IntoIterator<Item = L>,
    ) -> Self {
        let literals = literals.into_iter().map(Into::into).collect();
        Self::leaf(column, Operator::In(literals))
    }

    pub fn between(
        column: impl Into<String>,
        lower: impl Into<Literal>,
        upper: impl Into<Literal>,
    ) -> Self {
        Self::leaf(column, Operator::Between(lower.into(), upper.into()))
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::leaf(column, Operator::IsNull)
    }

    pub fn and(children: Vec<Predicate>) -> Self {
        Predicate::And(children)
    }

    pub fn or(children: Vec<Predicate>) -> Self {
        Predicate::Or(children)
    }

    pub fn not(child: Predicate) -> Self {
        Predicate::Not(Box::new(child))
    }

    fn leaf(column: impl Into<String>, operator: Operator) -> Self {
        Predicate::Leaf(PredicateLeaf::new(column, operator))
    }

    /// Leaves in depth-first order
    pub fn leaves(&self) -> Vec<&PredicateLeaf> {
        fn collect<'a>(predicate: &'a Predicate, out: &mut Vec<&'a PredicateLeaf>) {
            match predicate {
                Predicate::Leaf(leaf) => out.push(leaf),
                Predicate::And(children) | Predicate::Or(children) => {
                    for child in children {
                        collect(child, out);
                    }
                }
                Predicate::Not(child) => collect(child, out),
            }
        }
        let mut out = Vec::new();
        collect(self, &mut out);
        out
    }

    /// Distinct column names referenced by the predicate, in order of first use
    pub fn columns(&self) -> Vec<&str> {
        let mut columns: Vec<&str> = Vec::new();
        for leaf in self.leaves() {
            if !columns.contains(&leaf.column()) {
                columns.push(leaf.column());
            }
        }
        columns
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, children: &[Predicate], op: &str) -> fmt::Result {
            write!(f, "(")?;
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    write!(f, " {} ", op)?;
                }
                write!(f, "{}", child)?;
            }
            write!(f, ")")
        }
        match self {
            Predicate::Leaf(leaf) => write!(f, "{}", leaf),
            Predicate::And(children) => join(f, children, "and"),
            Predicate::Or(children) => join(f, children, "or"),
            Predicate::Not(child) => write!(f, "not {}", child),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let predicate = Predicate::and(vec![
            Predicate::greater_than("age", 60),
            Predicate::or(vec![
                Predicate::is_null("name"),
                Predicate::not(Predicate::is_in("city", ["Oslo", "O'Hare"])),
            ]),
            Predicate::between("score", 1.5, 2.5),
        ]);
        assert_eq!(
            predicate.to_string(),
            "(age > 60 and (name is null or not city in ('Oslo', 'O''Hare')) and score between 1.5 and 2.5)"
        );
    }

    #[test]
    fn test_columns_are_distinct_in_order() {
        let predicate = Predicate::or(vec![
            Predicate::equals("b", 1),
            Predicate::less_than("a", 2),
            Predicate::not(Predicate::greater_than_equals("b", 3)),
        ]);
        assert_eq!(predicate.columns(), vec!["b", "a"]);
        assert_eq!(predicate.leaves().len(), 3);
    }

    #[test]
    fn test_literal_conversions() {
        assert_eq!(Literal::from(7i32), Literal::Long(7));
        assert_eq!(Literal::from("x"), Literal::String("x".to_string()));
        assert_eq!(Literal::Date(19000).to_string(), "date(19000)");
    }
}
