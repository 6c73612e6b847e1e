mod common;

use common::{collect_ids, open, people_file, sequential_file};
use stripefile::{check_coverage, Codec, ErrorKind, Options, Predicate};

#[test]
fn test_contiguous_ranges_partition_rows() {
    let reader = open(sequential_file(Codec::Lz4, 5000, 700, 100));
    let stripes = reader.stripes().len();
    assert_eq!(stripes, 8);

    let content = reader.content_length();
    for splits in [1u64, 2, 3, 5, 8, 13] {
        let size = content.div_ceil(splits);
        let ranges: Vec<(u64, u64)> = (0..splits).map(|i| (i * size, size)).collect();
        check_coverage(reader.footer(), &ranges).unwrap();

        let mut ids = Vec::new();
        for &(offset, length) in &ranges {
            let mut rows = reader.rows_in_range(offset, length, None).unwrap();
            ids.extend(collect_ids(&mut rows));
        }
        assert_eq!(ids, (0..5000).collect::<Vec<i64>>(), "{} splits", splits);
    }
}

#[test]
fn test_last_range_may_overflow() {
    let reader = open(sequential_file(Codec::None, 1000, 300, 0));
    let middle = reader.stripes()[2].offset();
    let ranges = [(0, middle), (middle, u64::MAX)];
    check_coverage(reader.footer(), &ranges).unwrap();

    let mut tail = reader.rows_in_range(middle, u64::MAX, None).unwrap();
    assert_eq!(collect_ids(&mut tail), (600..1000).collect::<Vec<i64>>());
}

#[test]
fn test_coverage_reports_gaps_and_overlaps() {
    let reader = open(sequential_file(Codec::Zstd, 1000, 250, 50));
    let second = reader.stripes()[1].offset();
    let third = reader.stripes()[2].offset();

    // stripe 1 starts in no range
    let gap = [(0, second), (third, u64::MAX)];
    assert_eq!(
        check_coverage(reader.footer(), &gap).unwrap_err().kind(),
        ErrorKind::InvalidOptions
    );

    // stripe 1 starts in both
    let overlap = [(0, second + 1), (second, u64::MAX)];
    assert!(check_coverage(reader.footer(), &overlap).is_err());
}

#[test]
fn test_seek_within_plan() {
    let reader = open(sequential_file(Codec::Zlib, 3000, 1000, 100));
    let mut rows = reader.rows().unwrap();

    for target in [0u64, 1234, 999, 1000, 2999, 57, 1234] {
        rows.seek_to_row(target).unwrap();
        assert_eq!(rows.row_number(), target);
        let row = rows.next_row().unwrap().unwrap();
        assert_eq!(row.row_number(), target);
        assert_eq!(row.values()[0].as_i64(), Some(target as i64));
    }

    rows.seek_to_row(2998).unwrap();
    assert_eq!(collect_ids(&mut rows), vec![2998, 2999]);
    assert_eq!(rows.progress(), 1.0);

    let err = rows.seek_to_row(3000).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOptions);
    // a rejected seek does not poison the reader
    rows.seek_to_row(5).unwrap();
    assert_eq!(rows.next_row().unwrap().unwrap().row_number(), 5);
}

#[test]
fn test_seek_outside_planned_row_groups() {
    let reader = open(people_file(Codec::Zstd));
    let options = Options::builder()
        .search_argument(Predicate::greater_than("age", 60), Vec::new())
        .build();
    let mut rows = reader.rows_with_options(&options).unwrap();

    // first stripe was pruned
    assert_eq!(rows.seek_to_row(10).unwrap_err().kind(), ErrorKind::InvalidOptions);
    // so were the first two row groups of the last one
    assert!(rows.seek_to_row(2150).is_err());

    rows.seek_to_row(2950).unwrap();
    let row = rows.next_row().unwrap().unwrap();
    assert_eq!(row.row_number(), 2950);
    assert_eq!(row.values()[0].as_i64(), Some(2950));
}

#[test]
fn test_progress_counts_planned_rows() {
    let reader = open(sequential_file(Codec::None, 400, 200, 100));
    let mut rows = reader.rows().unwrap();
    assert_eq!(rows.progress(), 0.0);
    assert_eq!(rows.row_number(), 0);
    for _ in 0..100 {
        rows.next_row().unwrap();
    }
    assert_eq!(rows.progress(), 0.25);
    assert_eq!(rows.row_number(), 100);
    let batch = rows.next_batch(1000).unwrap();
    assert_eq!(batch.len(), 300);
    assert!(rows.next_batch(10).unwrap().is_empty());
    assert_eq!(rows.progress(), 1.0);
}
