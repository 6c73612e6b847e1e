//! Choosing which stripes and row groups a scan reads
//!
//! A stripe belongs to a byte range when its first byte lies inside the
//! range. Splitting a file into contiguous, disjoint ranges that cover it
//! therefore hands every stripe to exactly one split, however the split
//! boundaries fall relative to stripe boundaries.
//!
//! With a predicate, stripes and then row groups whose statistics prove that
//! no row can match are dropped. Planning reads stripe footers only, never
//! column data.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Result, StripeFileError};
use crate::evaluate::Verdict;
use crate::footer::{Footer, StripeInformation};
use crate::metadata::{MetadataReader, StripeMetadata};
use crate::options::ResolvedOptions;

/// One stripe selected for scanning
#[derive(Debug, Clone)]
pub struct PlannedStripe {
    stripe: StripeInformation,
    row_groups: Vec<usize>,
    stride: u64,
    metadata: Option<Arc<StripeMetadata>>,
}

impl PlannedStripe {
    pub fn stripe_index(&self) -> usize {
        self.stripe.index()
    }

    pub fn stripe(&self) -> &StripeInformation {
        &self.stripe
    }

    /// Row groups to read, ascending
    pub fn row_groups(&self) -> &[usize] {
        &self.row_groups
    }

    /// Absolute row number of the first row of `row_group`
    pub fn first_row_of(&self, row_group: usize) -> u64 {
        self.stripe.first_row() + row_group as u64 * self.stride
    }

    /// Rows held by `row_group`
    pub fn rows_in(&self, row_group: usize) -> u64 {
        let start = row_group as u64 * self.stride;
        self.stride
            .min(self.stripe.number_of_rows().saturating_sub(start))
    }

    /// Rows this stripe contributes to the scan
    pub fn planned_rows(&self) -> u64 {
        self.row_groups.iter().map(|&group| self.rows_in(group)).sum()
    }

    /// Stripe footer, when planning already had to read it
    pub(crate) fn metadata(&self) -> Option<&Arc<StripeMetadata>> {
        self.metadata.as_ref()
    }
}

/// Ordered selection of stripes and row groups for one scan
#[derive(Debug, Clone, Default)]
pub struct ScanPlan {
    stripes: Vec<PlannedStripe>,
}

impl ScanPlan {
    /// Selected stripes, in file order
    pub fn stripes(&self) -> &[PlannedStripe] {
        &self.stripes
    }

    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }

    /// Rows the scan will visit, before skipping corrupt ones
    pub fn planned_rows(&self) -> u64 {
        self.stripes.iter().map(PlannedStripe::planned_rows).sum()
    }

    /// Planned stripe and row group holding absolute row `row`
    pub fn locate(&self, row: u64) -> Option<(usize, usize)> {
        self.stripes.iter().enumerate().find_map(|(plan_index, planned)| {
            let stripe = planned.stripe();
            if row < stripe.first_row() || row >= stripe.first_row() + stripe.number_of_rows() {
                return None;
            }
            planned
                .row_groups
                .iter()
                .position(|&group| {
                    let first = planned.first_row_of(group);
                    row >= first && row < first + planned.rows_in(group)
                })
                .map(|position| (plan_index, position))
        })
    }
}

fn stripe_in_range(stripe: &StripeInformation, offset: u64, max_offset: u64) -> bool {
    offset <= stripe.offset() && stripe.offset() < max_offset
}

/// Select stripes and row groups for `options`
pub(crate) fn plan(footer: &Footer, metadata: &MetadataReader, options: &ResolvedOptions) -> ScanPlan {
    let stride = match footer.row_index_stride() {
        0 => u64::MAX,
        stride => stride as u64,
    };

    let mut stripes = Vec::new();
    let mut pruned = 0;
    for stripe in footer.stripes() {
        if !stripe_in_range(stripe, options.offset, options.max_offset) {
            continue;
        }
        let all_groups: Vec<usize> = (0..footer.row_groups_in(stripe.number_of_rows())).collect();

        let Some(predicate) = &options.predicate else {
            stripes.push(PlannedStripe {
                stripe: stripe.clone(),
                row_groups: all_groups,
                stride,
                metadata: None,
            });
            continue;
        };

        let stripe_metadata = match metadata.stripe_footer(stripe.index()) {
            Ok(stripe_metadata) => stripe_metadata,
            Err(e) => {
                // keep the stripe; reading it will report the problem
                warn!(
                    path = footer.path(),
                    stripe = stripe.index(),
                    error = %e,
                    "cannot read stripe statistics, keeping stripe"
                );
                stripes.push(PlannedStripe {
                    stripe: stripe.clone(),
                    row_groups: all_groups,
                    stride,
                    metadata: None,
                });
                continue;
            }
        };

        let verdict = predicate.evaluate(stripe_metadata.statistics());
        if verdict == Verdict::False {
            debug!(path = footer.path(), stripe = stripe.index(), "stripe pruned");
            pruned += 1;
            continue;
        }

        let row_groups: Vec<usize> = if footer.row_index_stride() > 0
            && verdict != Verdict::True
            && stripe_metadata.has_row_group_statistics()
        {
            all_groups
                .into_iter()
                .filter(|&group| {
                    stripe_metadata
                        .row_group_statistics(group)
                        .map_or(true, |stats| predicate.evaluate(stats) != Verdict::False)
                })
                .collect()
        } else {
            all_groups
        };
        if row_groups.is_empty() {
            debug!(path = footer.path(), stripe = stripe.index(), "all row groups pruned");
            pruned += 1;
            continue;
        }

        debug!(
            path = footer.path(),
            stripe = stripe.index(),
            %verdict,
            row_groups = row_groups.len(),
            "stripe kept"
        );
        stripes.push(PlannedStripe {
            stripe: stripe.clone(),
            row_groups,
            stride,
            metadata: Some(Arc::new(stripe_metadata)),
        });
    }

    debug!(
        path = footer.path(),
        kept = stripes.len(),
        pruned,
        offset = options.offset,
        max_offset = options.max_offset,
        "planned scan"
    );
    ScanPlan { stripes }
}

/// Check that byte ranges `(offset, length)` hand every stripe to exactly one range
pub fn check_coverage(footer: &Footer, ranges: &[(u64, u64)]) -> Result<()> {
    for stripe in footer.stripes() {
        let covering = ranges
            .iter()
            .filter(|(offset, length)| {
                stripe_in_range(stripe, *offset, offset.saturating_add(*length))
            })
            .count();
        if covering != 1 {
            return Err(StripeFileError::invalid_options(format!(
                "stripe {} at offset {} is covered by {} ranges",
                stripe.index(),
                stripe.offset(),
                covering
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::options::Options;
    use crate::predicate::Predicate;
    use crate::types::DataType;
    use crate::value::Value;
    use crate::writer::{FileWriter, WriterOptions};
    use crate::ErrorKind;
    use config::ReaderConfig;
    use storage::MemoryStorage;

    struct Fixture {
        footer: Arc<Footer>,
        metadata: MetadataReader,
    }

    // 3 stripes of 1000 rows, stride 100; age spans (0,30), (10,40), (50,90)
    fn fixture() -> Fixture {
        let schema = DataType::Struct(vec![
            ("id".to_string(), DataType::Long),
            ("age".to_string(), DataType::Long),
        ]);
        let options = WriterOptions::default()
            .codec(Codec::Lz4)
            .row_index_stride(100)
            .stripe_rows(1000);
        let mut writer = FileWriter::new(&schema, options).unwrap();
        let spans = [(0, 30), (10, 40), (50, 90)];
        for (stripe, (low, high)) in spans.iter().enumerate() {
            for i in 0..1000i64 {
                let age = low + (i * (high - low)) / 999;
                writer
                    .add_row(vec![Value::Long(stripe as i64 * 1000 + i), Value::Long(age)])
                    .unwrap();
            }
        }
        let bytes = writer.finish().unwrap();
        let footer = Arc::new(Footer::parse("p.strp", &bytes, bytes.len() as u64).unwrap());
        let storage = MemoryStorage::new();
        storage.put("p.strp", bytes);
        let metadata = MetadataReader::new(Arc::new(storage), footer.clone());
        Fixture { footer, metadata }
    }

    fn plan_for(fixture: &Fixture, options: Options) -> ScanPlan {
        let resolved = options
            .resolve(&fixture.footer, &ReaderConfig::default())
            .unwrap();
        plan(&fixture.footer, &fixture.metadata, &resolved)
    }

    #[test]
    fn test_no_predicate_reads_everything() {
        let fixture = fixture();
        let plan = plan_for(&fixture, Options::default());
        assert_eq!(plan.stripes().len(), 3);
        assert_eq!(plan.planned_rows(), 3000);
        assert_eq!(plan.stripes()[1].row_groups().len(), 10);
        assert!(plan.stripes().iter().all(|s| s.metadata().is_none()));
    }

    #[test]
    fn test_stripe_pruning() {
        let fixture = fixture();
        let options = Options::builder()
            .search_argument(Predicate::greater_than("age", 60), Vec::new())
            .build();
        let plan = plan_for(&fixture, options);
        assert_eq!(plan.stripes().len(), 1);
        assert_eq!(plan.stripes()[0].stripe_index(), 2);
    }

    #[test]
    fn test_row_group_pruning() {
        let fixture = fixture();
        // ages in the third stripe rise from 50 to 90 across its 10 row groups
        let options = Options::builder()
            .search_argument(Predicate::greater_than_equals("age", 86), Vec::new())
            .build();
        let plan = plan_for(&fixture, options);
        assert_eq!(plan.stripes().len(), 1);
        let groups = plan.stripes()[0].row_groups();
        assert!(!groups.is_empty() && groups.len() < 10);
        assert_eq!(*groups.last().unwrap(), 9);
    }

    #[test]
    fn test_range_selects_by_start_offset() {
        let fixture = fixture();
        let second = fixture.footer.stripes()[1].offset();

        // a range starting one byte into stripe 0 skips it
        let plan = plan_for(&fixture, Options::builder().range(1 + 4, second).build());
        let indexes: Vec<usize> = plan.stripes().iter().map(|s| s.stripe_index()).collect();
        assert_eq!(indexes, vec![1]);

        // a range ending exactly at a stripe start excludes that stripe
        let plan = plan_for(&fixture, Options::builder().range(0, second).build());
        let indexes: Vec<usize> = plan.stripes().iter().map(|s| s.stripe_index()).collect();
        assert_eq!(indexes, vec![0]);

        // huge lengths saturate
        let plan = plan_for(&fixture, Options::builder().range(second, u64::MAX).build());
        assert_eq!(plan.stripes().len(), 2);
    }

    #[test]
    fn test_locate() {
        let fixture = fixture();
        let plan = plan_for(&fixture, Options::default());
        assert_eq!(plan.locate(0), Some((0, 0)));
        assert_eq!(plan.locate(1250), Some((1, 2)));
        assert_eq!(plan.locate(3000), None);

        let stripe = &plan.stripes()[2];
        assert_eq!(stripe.first_row_of(3), 2300);
        assert_eq!(stripe.rows_in(9), 100);
    }

    #[test]
    fn test_check_coverage() {
        let fixture = fixture();
        let footer = &fixture.footer;
        let end = footer.content_length();

        assert!(check_coverage(footer, &[(0, 100), (100, end)]).is_ok());
        assert!(check_coverage(footer, &[(0, u64::MAX)]).is_ok());

        let gap = check_coverage(footer, &[(0, 2)]).unwrap_err();
        assert_eq!(gap.kind(), ErrorKind::InvalidOptions);

        let overlap = check_coverage(footer, &[(0, end), (0, end)]).unwrap_err();
        assert_eq!(overlap.kind(), ErrorKind::InvalidOptions);
    }

    #[test]
    fn test_unreadable_stripe_footer_is_kept() {
        let fixture = fixture();
        // storage without the file: every footer read fails
        let metadata = MetadataReader::new(Arc::new(MemoryStorage::new()), fixture.footer.clone());
        let options = Options::builder()
            .search_argument(Predicate::greater_than("age", 60), Vec::new())
            .build()
            .resolve(&fixture.footer, &ReaderConfig::default())
            .unwrap();
        let plan = plan(&fixture.footer, &metadata, &options);
        assert_eq!(plan.stripes().len(), 3);
    }
}
