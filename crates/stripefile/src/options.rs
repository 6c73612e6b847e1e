//! Per-request read options

use std::fmt;

use config::ReaderConfig;

use crate::error::{Result, StripeFileError};
use crate::evaluate::BoundPredicate;
use crate::footer::Footer;
use crate::predicate::Predicate;

/// A predicate plus the names it should resolve its columns against
///
/// When `column_names` is non-empty, entry `i` names the root's `i`-th field,
/// which lets callers use their own schema's names for a file written with
/// different ones.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchArgument {
    pub predicate: Predicate,
    pub column_names: Vec<String>,
}

/// How a record reader should scan a file
///
/// Options are immutable once built. Flags left unset fall back to the
/// [`ReaderConfig`] the file was opened with.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    include: Option<Vec<bool>>,
    offset: u64,
    length: u64,
    search_argument: Option<SearchArgument>,
    zero_copy: Option<bool>,
    skip_corrupt_records: Option<bool>,
    batch_size: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            include: None,
            offset: 0,
            length: u64::MAX,
            search_argument: None,
            zero_copy: None,
            skip_corrupt_records: None,
            batch_size: None,
        }
    }
}

impl Options {
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }

    /// A builder starting from these options
    pub fn to_builder(&self) -> OptionsBuilder {
        OptionsBuilder {
            options: self.clone(),
        }
    }

    /// Columns to read, one flag per type id; `None` reads all of them
    pub fn include(&self) -> Option<&[bool]> {
        self.include.as_deref()
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// End of the byte range; saturates instead of wrapping
    pub fn max_offset(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }

    pub fn search_argument(&self) -> Option<&SearchArgument> {
        self.search_argument.as_ref()
    }

    pub fn zero_copy(&self) -> Option<bool> {
        self.zero_copy
    }

    pub fn skip_corrupt_records(&self) -> Option<bool> {
        self.skip_corrupt_records
    }

    pub fn batch_size(&self) -> Option<usize> {
        self.batch_size
    }

    /// Check these options against a file and fill in defaults
    pub(crate) fn resolve(&self, footer: &Footer, config: &ReaderConfig) -> Result<ResolvedOptions> {
        let types = footer.types();

        let include = match &self.include {
            None => vec![true; types.len()],
            Some(mask) if mask.len() != types.len() => {
                return Err(StripeFileError::invalid_options(format!(
                    "include mask has {} entries, file has {} types",
                    mask.len(),
                    types.len()
                )));
            }
            Some(mask) => normalize_include(mask, footer),
        };

        let predicate = match &self.search_argument {
            None => None,
            Some(sarg) => {
                let bound = BoundPredicate::bind(
                    &sarg.predicate,
                    &sarg.column_names,
                    types,
                    footer.writer_version(),
                )?;
                if let Some(&excluded) = bound.columns().iter().find(|&&column| !include[column]) {
                    return Err(StripeFileError::invalid_options(format!(
                        "predicate reads column {} which is not included",
                        excluded
                    )));
                }
                Some(bound)
            }
        };

        let batch_size = self.batch_size.unwrap_or(config.batch_size);
        if batch_size == 0 {
            return Err(StripeFileError::invalid_options("batch size must be positive"));
        }

        let columns = types
            .top_level_columns()
            .iter()
            .copied()
            .filter(|&column| include[column])
            .collect();

        Ok(ResolvedOptions {
            include,
            columns,
            offset: self.offset,
            max_offset: self.max_offset(),
            predicate,
            zero_copy: self.zero_copy.unwrap_or(config.zero_copy),
            skip_corrupt_records: self
                .skip_corrupt_records
                .unwrap_or(config.skip_corrupt_records),
            batch_size,
        })
    }
}

/// Widen a mask to whole top-level subtrees: a root field is read if any
/// type inside it is asked for, and then all of it is read
fn normalize_include(mask: &[bool], footer: &Footer) -> Vec<bool> {
    let types = footer.types();
    let mut include = vec![false; types.len()];
    include[0] = true;
    for &column in types.top_level_columns() {
        let Some(node) = types.get(column) else {
            continue;
        };
        let range = column..=node.maximum_id();
        if mask[range.clone()].iter().any(|&flag| flag) {
            include[range].iter_mut().for_each(|flag| *flag = true);
        }
    }
    include
}

impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{include: ")?;
        match &self.include {
            None => write!(f, "all")?,
            Some(mask) => {
                write!(f, "[")?;
                for (i, flag) in mask.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", flag)?;
                }
                write!(f, "]")?;
            }
        }
        write!(f, ", offset: {}, length: {}", self.offset, self.length)?;
        if let Some(sarg) = &self.search_argument {
            write!(f, ", sarg: {}, columns: [", sarg.predicate)?;
            for (i, name) in sarg.column_names.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "'{}'", name)?;
            }
            write!(f, "]")?;
        }
        write!(f, "}}")
    }
}

/// Builder for [`Options`]
#[derive(Debug, Clone, Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Read only the columns whose flag is set, one flag per type id
    pub fn include(mut self, include: Vec<bool>) -> Self {
        self.options.include = Some(include);
        self
    }

    /// Read the stripes that start inside `[offset, offset + length)`
    pub fn range(mut self, offset: u64, length: u64) -> Self {
        self.options.offset = offset;
        self.options.length = length;
        self
    }

    pub fn search_argument(mut self, predicate: Predicate, column_names: Vec<String>) -> Self {
        self.options.search_argument = Some(SearchArgument {
            predicate,
            column_names,
        });
        self
    }

    pub fn zero_copy(mut self, value: bool) -> Self {
        self.options.zero_copy = Some(value);
        self
    }

    pub fn skip_corrupt_records(mut self, value: bool) -> Self {
        self.options.skip_corrupt_records = Some(value);
        self
    }

    /// Default row count for [`crate::RecordReader::next_batch`]
    pub fn batch_size(mut self, rows: usize) -> Self {
        self.options.batch_size = Some(rows);
        self
    }

    pub fn build(self) -> Options {
        self.options
    }
}

/// Options checked against one file with every default filled in
#[derive(Debug, Clone)]
pub(crate) struct ResolvedOptions {
    /// One flag per type id, widened to whole root fields
    pub include: Vec<bool>,
    /// Included root fields, in field order
    pub columns: Vec<usize>,
    pub offset: u64,
    pub max_offset: u64,
    pub predicate: Option<BoundPredicate>,
    pub zero_copy: bool,
    pub skip_corrupt_records: bool,
    pub batch_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::types::DataType;
    use crate::value::Value;
    use crate::writer::{FileWriter, WriterOptions};
    use crate::ErrorKind;

    fn footer() -> Footer {
        let schema = DataType::Struct(vec![
            ("id".to_string(), DataType::Long),
            (
                "home".to_string(),
                DataType::Struct(vec![
                    ("city".to_string(), DataType::String),
                    ("zip".to_string(), DataType::Int),
                ]),
            ),
            ("score".to_string(), DataType::Double),
        ]);
        let mut writer = FileWriter::new(&schema, WriterOptions::default().codec(Codec::None)).unwrap();
        writer
            .add_row(vec![
                Value::Long(1),
                Value::Struct(vec![Value::String("Oslo".to_string()), Value::Int(150)]),
                Value::Double(0.5),
            ])
            .unwrap();
        let bytes = writer.finish().unwrap();
        Footer::parse("o.strp", &bytes, bytes.len() as u64).unwrap()
    }

    #[test]
    fn test_defaults_come_from_config() {
        let footer = footer();
        let config = ReaderConfig {
            zero_copy: true,
            skip_corrupt_records: true,
            batch_size: 7,
            ..Default::default()
        };
        let resolved = Options::default().resolve(&footer, &config).unwrap();
        assert!(resolved.zero_copy);
        assert!(resolved.skip_corrupt_records);
        assert_eq!(resolved.batch_size, 7);
        assert_eq!(resolved.columns, vec![1, 2, 5]);
        assert_eq!(resolved.max_offset, u64::MAX);

        let explicit = Options::builder()
            .zero_copy(false)
            .skip_corrupt_records(false)
            .batch_size(3)
            .build();
        let resolved = explicit.resolve(&footer, &config).unwrap();
        assert!(!resolved.zero_copy);
        assert!(!resolved.skip_corrupt_records);
        assert_eq!(resolved.batch_size, 3);
    }

    #[test]
    fn test_include_is_widened_to_root_fields() {
        let footer = footer();
        // only home.zip asked for
        let options = Options::builder()
            .include(vec![false, false, false, false, true, false])
            .build();
        let resolved = options.resolve(&footer, &ReaderConfig::default()).unwrap();
        assert_eq!(resolved.include, vec![true, false, true, true, true, false]);
        assert_eq!(resolved.columns, vec![2]);

        let short = Options::builder().include(vec![true]).build();
        let err = short.resolve(&footer, &ReaderConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOptions);
    }

    #[test]
    fn test_predicate_on_excluded_column_is_rejected() {
        let footer = footer();
        let options = Options::builder()
            .include(vec![true, true, false, false, false, false])
            .search_argument(Predicate::equals("home.city", "Oslo"), Vec::new())
            .build();
        let err = options.resolve(&footer, &ReaderConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOptions);

        let unknown = Options::builder()
            .search_argument(Predicate::equals("nope", 1), Vec::new())
            .build();
        assert_eq!(
            unknown.resolve(&footer, &ReaderConfig::default()).unwrap_err().kind(),
            ErrorKind::InvalidOptions
        );

        let zero_batch = Options::builder().batch_size(0).build();
        assert!(zero_batch.resolve(&footer, &ReaderConfig::default()).is_err());
    }

    #[test]
    fn test_max_offset_saturates() {
        let options = Options::builder().range(10, u64::MAX - 5).build();
        assert_eq!(options.max_offset(), u64::MAX);
        let options = Options::builder().range(10, 20).build();
        assert_eq!(options.max_offset(), 30);
    }

    #[test]
    fn test_display() {
        let options = Options::builder()
            .include(vec![true, false])
            .range(3, 100)
            .search_argument(Predicate::greater_than("age", 60), vec!["id".to_string(), "age".to_string()])
            .build();
        assert_eq!(
            options.to_string(),
            "{include: [true, false], offset: 3, length: 100, sarg: age > 60, columns: ['id', 'age']}"
        );
        assert_eq!(
            Options::default().to_string(),
            format!("{{include: all, offset: 0, length: {}}}", u64::MAX)
        );
    }

    #[test]
    fn test_to_builder_keeps_fields() {
        let options = Options::builder().range(5, 6).zero_copy(true).build();
        let changed = options.to_builder().skip_corrupt_records(true).build();
        assert_eq!(changed.offset(), 5);
        assert_eq!(changed.zero_copy(), Some(true));
        assert_eq!(changed.skip_corrupt_records(), Some(true));
        assert_eq!(options.skip_corrupt_records(), None);
    }
}
