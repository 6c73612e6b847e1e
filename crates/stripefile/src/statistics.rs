//! Column statistics
//!
//! Statistics summarize one column over a scope: the whole file, one stripe,
//! or one row group. Merging is a union, so the statistics of a stripe equal
//! the merge of its row groups' statistics and the file's equal the merge of
//! its stripes'.

use crate::proto;
use crate::types::TypeKind;
use crate::value::Value;

/// Type-specific part of [`ColumnStatistics`]
#[derive(Debug, Clone, PartialEq)]
pub enum TypeStatistics {
    /// No type-specific facts (compound columns, or not recorded)
    None,
    Integer {
        min: Option<i64>,
        max: Option<i64>,
        /// `None` once the sum overflowed
        sum: Option<i64>,
    },
    Double {
        min: Option<f64>,
        max: Option<f64>,
        sum: Option<f64>,
    },
    String {
        min: Option<String>,
        max: Option<String>,
        /// Total length in bytes of all values
        sum: i64,
    },
    Boolean {
        true_count: u64,
    },
    Date {
        min: Option<i32>,
        max: Option<i32>,
    },
    Timestamp {
        min: Option<i64>,
        max: Option<i64>,
    },
    Binary {
        /// Total length in bytes of all values
        sum: i64,
    },
}

/// Summary of one column over one scope
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStatistics {
    /// `None` when the writer did not record a count
    number_of_values: Option<u64>,
    has_null: bool,
    type_statistics: TypeStatistics,
}

impl ColumnStatistics {
    /// Empty statistics for a column of `kind`, ready to be updated
    pub fn new(kind: TypeKind) -> Self {
        let type_statistics = match kind {
            TypeKind::Byte | TypeKind::Short | TypeKind::Int | TypeKind::Long => {
                TypeStatistics::Integer {
                    min: None,
                    max: None,
                    sum: Some(0),
                }
            }
            TypeKind::Float | TypeKind::Double => TypeStatistics::Double {
                min: None,
                max: None,
                sum: Some(0.0),
            },
            TypeKind::String => TypeStatistics::String {
                min: None,
                max: None,
                sum: 0,
            },
            TypeKind::Boolean => TypeStatistics::Boolean { true_count: 0 },
            TypeKind::Date => TypeStatistics::Date { min: None, max: None },
            TypeKind::Timestamp => TypeStatistics::Timestamp { min: None, max: None },
            TypeKind::Binary => TypeStatistics::Binary { sum: 0 },
            TypeKind::List | TypeKind::Map | TypeKind::Struct => TypeStatistics::None,
        };
        Self {
            number_of_values: Some(0),
            has_null: false,
            type_statistics,
        }
    }

    /// Build statistics from explicit facts
    pub fn with_values(number_of_values: u64, has_null: bool, type_statistics: TypeStatistics) -> Self {
        Self {
            number_of_values: Some(number_of_values),
            has_null,
            type_statistics,
        }
    }

    /// Number of non-null values in scope, 0 when not recorded
    pub fn number_of_values(&self) -> u64 {
        self.number_of_values.unwrap_or(0)
    }

    /// Number of non-null values in scope, if the writer recorded it
    pub fn known_number_of_values(&self) -> Option<u64> {
        self.number_of_values
    }

    /// Whether any value in scope is null
    pub fn has_null(&self) -> bool {
        self.has_null
    }

    pub fn type_statistics(&self) -> &TypeStatistics {
        &self.type_statistics
    }

    /// Account for one more value (which may be null)
    ///
    /// Only the scalar facts of this column are updated; children of compound
    /// values are tracked by their own statistics.
    pub fn update(&mut self, value: &Value) {
        if value.is_null() {
            self.has_null = true;
            return;
        }
        self.number_of_values = self.number_of_values.map(|n| n + 1);

        let mut saw_nan = false;
        match (&mut self.type_statistics, value) {
            (TypeStatistics::Integer { min, max, sum }, value) => {
                if let Some(v) = value.as_i64() {
                    *min = Some(min.map_or(v, |m| m.min(v)));
                    *max = Some(max.map_or(v, |m| m.max(v)));
                    *sum = sum.and_then(|s| s.checked_add(v));
                }
            }
            (TypeStatistics::Double { min, max, sum }, value) => {
                if let Some(v) = value.as_f64() {
                    if v.is_nan() {
                        saw_nan = true;
                    } else {
                        *min = Some(min.map_or(v, |m| m.min(v)));
                        *max = Some(max.map_or(v, |m| m.max(v)));
                        *sum = sum.map(|s| s + v);
                    }
                }
            }
            (TypeStatistics::String { min, max, sum }, Value::String(s)) => {
                if min.as_deref().map_or(true, |m| s.as_str() < m) {
                    *min = Some(s.clone());
                }
                if max.as_deref().map_or(true, |m| s.as_str() > m) {
                    *max = Some(s.clone());
                }
                *sum += s.len() as i64;
            }
            (TypeStatistics::Boolean { true_count }, Value::Boolean(b)) => {
                if *b {
                    *true_count += 1;
                }
            }
            (TypeStatistics::Date { min, max }, Value::Date(d)) => {
                *min = Some(min.map_or(*d, |m| m.min(*d)));
                *max = Some(max.map_or(*d, |m| m.max(*d)));
            }
            (TypeStatistics::Timestamp { min, max }, Value::Timestamp(t)) => {
                *min = Some(min.map_or(*t, |m| m.min(*t)));
                *max = Some(max.map_or(*t, |m| m.max(*t)));
            }
            (TypeStatistics::Binary { sum }, Value::Binary(b)) => {
                *sum += b.len() as i64;
            }
            _ => {}
        }

        // A NaN is neither above nor below anything, so no range may be claimed
        if saw_nan {
            self.type_statistics = TypeStatistics::None;
        }
    }

    /// Union with the statistics of another scope of the same column
    pub fn merge(&mut self, other: &ColumnStatistics) {
        self.number_of_values = self.number_of_values.zip(other.number_of_values).map(|(a, b)| a + b);
        self.has_null |= other.has_null;

        let merged = match (&self.type_statistics, &other.type_statistics) {
            (
                TypeStatistics::Integer { min, max, sum },
                TypeStatistics::Integer {
                    min: other_min,
                    max: other_max,
                    sum: other_sum,
                },
            ) => TypeStatistics::Integer {
                min: merge_option(*min, *other_min, i64::min),
                max: merge_option(*max, *other_max, i64::max),
                sum: match (sum, other_sum) {
                    (Some(a), Some(b)) => a.checked_add(*b),
                    _ => None,
                },
            },
            (
                TypeStatistics::Double { min, max, sum },
                TypeStatistics::Double {
                    min: other_min,
                    max: other_max,
                    sum: other_sum,
                },
            ) => TypeStatistics::Double {
                min: merge_option(*min, *other_min, f64::min),
                max: merge_option(*max, *other_max, f64::max),
                sum: match (sum, other_sum) {
                    (Some(a), Some(b)) => Some(a + b),
                    _ => None,
                },
            },
            (
                TypeStatistics::String { min, max, sum },
                TypeStatistics::String {
                    min: other_min,
                    max: other_max,
                    sum: other_sum,
                },
            ) => TypeStatistics::String {
                min: merge_option(min.clone(), other_min.clone(), std::cmp::min),
                max: merge_option(max.clone(), other_max.clone(), std::cmp::max),
                sum: sum + other_sum,
            },
            (
                TypeStatistics::Boolean { true_count },
                TypeStatistics::Boolean {
                    true_count: other_true,
                },
            ) => TypeStatistics::Boolean {
                true_count: true_count + other_true,
            },
            (
                TypeStatistics::Date { min, max },
                TypeStatistics::Date {
                    min: other_min,
                    max: other_max,
                },
            ) => TypeStatistics::Date {
                min: merge_option(*min, *other_min, i32::min),
                max: merge_option(*max, *other_max, i32::max),
            },
            (
                TypeStatistics::Timestamp { min, max },
                TypeStatistics::Timestamp {
                    min: other_min,
                    max: other_max,
                },
            ) => TypeStatistics::Timestamp {
                min: merge_option(*min, *other_min, i64::min),
                max: merge_option(*max, *other_max, i64::max),
            },
            (TypeStatistics::Binary { sum }, TypeStatistics::Binary { sum: other_sum }) => {
                TypeStatistics::Binary {
                    sum: sum + other_sum,
                }
            }
            // A scope with no values contributes nothing to the range
            (_, _) if other.number_of_values == Some(0) => self.type_statistics.clone(),
            (_, _) => TypeStatistics::None,
        };
        self.type_statistics = merged;
    }

    pub(crate) fn from_proto(stats: &proto::ColumnStatistics) -> Self {
        let type_statistics = if let Some(s) = &stats.int_statistics {
            TypeStatistics::Integer {
                min: s.minimum,
                max: s.maximum,
                sum: s.sum,
            }
        } else if let Some(s) = &stats.double_statistics {
            TypeStatistics::Double {
                min: s.minimum,
                max: s.maximum,
                sum: s.sum,
            }
        } else if let Some(s) = &stats.string_statistics {
            TypeStatistics::String {
                min: s.minimum.clone(),
                max: s.maximum.clone(),
                sum: s.sum.unwrap_or(0),
            }
        } else if let Some(s) = &stats.bucket_statistics {
            match s.count.first() {
                Some(&true_count) => TypeStatistics::Boolean { true_count },
                None => TypeStatistics::None,
            }
        } else if let Some(s) = &stats.date_statistics {
            TypeStatistics::Date {
                min: s.minimum,
                max: s.maximum,
            }
        } else if let Some(s) = &stats.timestamp_statistics {
            TypeStatistics::Timestamp {
                min: s.minimum,
                max: s.maximum,
            }
        } else if let Some(s) = &stats.binary_statistics {
            TypeStatistics::Binary {
                sum: s.sum.unwrap_or(0),
            }
        } else {
            TypeStatistics::None
        };

        Self {
            number_of_values: stats.number_of_values,
            // a writer that did not say may have written nulls
            has_null: stats.has_null.unwrap_or(true),
            type_statistics,
        }
    }

    pub(crate) fn to_proto(&self) -> proto::ColumnStatistics {
        let mut stats = proto::ColumnStatistics {
            number_of_values: self.number_of_values,
            has_null: Some(self.has_null),
            ..Default::default()
        };
        match &self.type_statistics {
            TypeStatistics::None => {}
            TypeStatistics::Integer { min, max, sum } => {
                stats.int_statistics = Some(proto::IntegerStatistics {
                    minimum: *min,
                    maximum: *max,
                    sum: *sum,
                });
            }
            TypeStatistics::Double { min, max, sum } => {
                stats.double_statistics = Some(proto::DoubleStatistics {
                    minimum: *min,
                    maximum: *max,
                    sum: *sum,
                });
            }
            TypeStatistics::String { min, max, sum } => {
                stats.string_statistics = Some(proto::StringStatistics {
                    minimum: min.clone(),
                    maximum: max.clone(),
                    sum: Some(*sum),
                });
            }
            TypeStatistics::Boolean { true_count } => {
                stats.bucket_statistics = Some(proto::BucketStatistics {
                    count: vec![*true_count],
                });
            }
            TypeStatistics::Date { min, max } => {
                stats.date_statistics = Some(proto::DateStatistics {
                    minimum: *min,
                    maximum: *max,
                });
            }
            TypeStatistics::Timestamp { min, max } => {
                stats.timestamp_statistics = Some(proto::TimestampStatistics {
                    minimum: *min,
                    maximum: *max,
                });
            }
            TypeStatistics::Binary { sum } => {
                stats.binary_statistics = Some(proto::BinaryStatistics { sum: Some(*sum) });
            }
        }
        stats
    }
}

fn merge_option<T>(a: Option<T>, b: Option<T>, pick: impl Fn(T, T) -> T) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(pick(a, b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}
