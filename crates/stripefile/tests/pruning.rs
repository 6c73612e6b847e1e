mod common;

use common::{collect_ids, household_file, open, people_file, BALANCE_BASE};
use stripefile::{BoundPredicate, Codec, Literal, Options, Predicate, Reader, TruthValue, Verdict};

#[test]
fn test_age_over_sixty_scans_only_last_stripe() {
    let reader = open(people_file(Codec::Zstd));
    let metadata = reader.metadata();
    let predicate = Predicate::greater_than("age", 60);
    let bound = BoundPredicate::bind(&predicate, &[], reader.types(), reader.writer_version()).unwrap();

    let verdicts: Vec<Verdict> = (0..3)
        .map(|stripe| bound.evaluate(&metadata.stripe_statistics(stripe).unwrap()))
        .collect();
    assert_eq!(verdicts, vec![Verdict::False, Verdict::False, Verdict::Unknown]);

    let options = Options::builder().search_argument(predicate, Vec::new()).build();
    let plan = reader.plan(&options).unwrap();
    assert_eq!(plan.stripes().len(), 1);
    assert_eq!(plan.stripes()[0].stripe_index(), 2);
    // ages 50..90 climb through the stripe, so the early row groups are pruned too
    assert!(plan.stripes()[0].row_groups().len() < 10);
    assert_eq!(plan.stripes()[0].row_groups().last(), Some(&9));

    let mut rows = reader.rows_with_options(&options).unwrap();
    let mut matched = 0;
    while let Some(row) = rows.next_row().unwrap() {
        assert!(row.row_number() >= 2000);
        if row.values()[1].as_i64().unwrap() > 60 {
            matched += 1;
        }
    }

    let mut all = reader.rows().unwrap();
    let mut expected = 0;
    while let Some(row) = all.next_row().unwrap() {
        if row.values()[1].as_i64().unwrap() > 60 {
            expected += 1;
        }
    }
    assert!(expected > 0);
    assert_eq!(matched, expected);
}

#[test]
fn test_true_verdict_keeps_every_row_group() {
    let reader = open(people_file(Codec::Lz4));
    let options = Options::builder()
        .search_argument(Predicate::greater_than_equals("age", 50), Vec::new())
        .build();
    let plan = reader.plan(&options).unwrap();
    assert_eq!(plan.stripes().len(), 1);
    assert_eq!(plan.stripes()[0].row_groups(), &(0..10).collect::<Vec<_>>()[..]);
    assert_eq!(plan.planned_rows(), 1000);
}

#[test]
fn test_positional_column_names() {
    let reader = open(people_file(Codec::None));
    // the caller knows the second field as "years"
    let names = vec![
        "key".to_string(),
        "years".to_string(),
        "label".to_string(),
        "town".to_string(),
    ];
    let options = Options::builder()
        .search_argument(Predicate::less_than("years", 3), names)
        .build();
    let plan = reader.plan(&options).unwrap();
    assert_eq!(plan.stripes().len(), 1);
    assert_eq!(plan.stripes()[0].stripe_index(), 0);
    assert_eq!(plan.stripes()[0].row_groups(), &[0]);
}

fn predicates() -> Vec<Predicate> {
    vec![
        Predicate::greater_than("age", 60),
        Predicate::less_than_equals("age", 12),
        Predicate::equals("age", 35),
        Predicate::between("age", 20, 25),
        Predicate::is_in("age", [3i64, 77, 88]),
        Predicate::not(Predicate::less_than("age", 85)),
        Predicate::equals("name", "name-1234"),
        Predicate::less_than("name", "name-0042"),
        Predicate::is_null("city"),
        Predicate::not(Predicate::is_null("city")),
        Predicate::null_safe_equals("city", "Oslo"),
        Predicate::not(Predicate::equals("city", "Oslo")),
        Predicate::and(vec![
            Predicate::greater_than("id", 2500),
            Predicate::not(Predicate::between("age", 60, 80)),
        ]),
        Predicate::or(vec![
            Predicate::equals("id", 7),
            Predicate::greater_than_equals("age", 89),
        ]),
        Predicate::not(Predicate::or(vec![
            Predicate::less_than("age", 40),
            Predicate::is_null("city"),
        ])),
        Predicate::equals("age", Literal::Double(30.0)),
    ]
}

fn household_predicates() -> Vec<Predicate> {
    let balance = |offset: i64| Literal::Double((BALANCE_BASE + offset) as f64);
    vec![
        Predicate::is_null("home.zip"),
        Predicate::not(Predicate::is_null("home.zip")),
        Predicate::is_null("home.street"),
        Predicate::is_null("home"),
        Predicate::equals("home.zip", 1005),
        Predicate::less_than("home.zip", 1003),
        Predicate::not(Predicate::less_than("home.zip", 1039)),
        Predicate::null_safe_equals("home.zip", 1001),
        Predicate::not(Predicate::null_safe_equals("home.zip", 1001)),
        Predicate::equals("home.street", "street-4"),
        Predicate::greater_than("home.zip", 2000),
        Predicate::less_than("balance", balance(4)),
        Predicate::less_than("balance", balance(504)),
        Predicate::greater_than_equals("balance", balance(1002)),
        Predicate::equals("balance", balance(100)),
        Predicate::between("balance", balance(250), balance(260)),
        Predicate::or(vec![
            Predicate::is_null("home.zip"),
            Predicate::equals("balance", BALANCE_BASE + 3),
        ]),
    ]
}

/// Every row kept by a pruned scan that the predicate selects must equal the
/// rows the predicate selects from a full scan
fn assert_pruning_keeps_matches(reader: &Reader, predicates: Vec<Predicate>) {
    let types = reader.types().clone();

    let mut everything = Vec::new();
    let mut all = reader.rows().unwrap();
    while let Some(row) = all.next_row().unwrap() {
        everything.push(row);
    }
    assert_eq!(everything.len() as u64, reader.number_of_rows());

    for predicate in predicates {
        let bound = BoundPredicate::bind(&predicate, &[], &types, reader.writer_version()).unwrap();
        let expected: Vec<u64> = everything
            .iter()
            .filter(|row| bound.test_row(row, &types) == TruthValue::YES)
            .map(|row| row.row_number())
            .collect();

        let options = Options::builder()
            .search_argument(predicate.clone(), Vec::new())
            .build();
        let mut rows = reader.rows_with_options(&options).unwrap();
        let mut kept = Vec::new();
        while let Some(row) = rows.next_row().unwrap() {
            if bound.test_row(&row, &types) == TruthValue::YES {
                kept.push(row.row_number());
            }
        }
        assert_eq!(kept, expected, "rows lost for {}", predicate);
    }
}

#[test]
fn test_pruning_never_drops_matching_rows() {
    assert_pruning_keeps_matches(&open(people_file(Codec::Zlib)), predicates());
}

#[test]
fn test_pruning_under_nullable_struct_and_large_integers() {
    assert_pruning_keeps_matches(&open(household_file(Codec::Lz4)), household_predicates());
}

#[test]
fn test_fields_of_null_struct_are_null_in_statistics() {
    let reader = open(household_file(Codec::None));
    let zip = reader.types().find_column("home.zip").unwrap();
    let row_groups = reader.metadata().row_group_statistics(0).unwrap();
    // every home in row group 0 is null
    assert_eq!(row_groups[0][zip].number_of_values(), 0);
    assert!(row_groups[0][zip].has_null());

    let options = Options::builder()
        .search_argument(Predicate::is_null("home.zip"), Vec::new())
        .build();
    let plan = reader.plan(&options).unwrap();
    assert_eq!(plan.stripes()[0].row_groups()[0], 0);
    let mut rows = reader.rows_with_options(&options).unwrap();
    let ids = collect_ids(&mut rows);
    assert!((0..50).all(|id| ids.contains(&id)));
}

#[test]
fn test_integer_against_double_beyond_two_to_the_53() {
    let reader = open(household_file(Codec::Zstd));
    // 2^53 + 3 rounds to 2^53 + 4 as a double, yet it is below it
    let literal = Literal::Double((BALANCE_BASE + 4) as f64);
    let options = Options::builder()
        .search_argument(Predicate::less_than("balance", literal), Vec::new())
        .build();
    let mut rows = reader.rows_with_options(&options).unwrap();
    let ids = collect_ids(&mut rows);
    assert!(ids.contains(&0));
    assert_eq!(reader.plan(&options).unwrap().stripes().len(), 1);
}

#[test]
fn test_pruned_scan_reads_fewer_rows() {
    let reader = open(people_file(Codec::Zstd));
    let options = Options::builder()
        .search_argument(Predicate::equals("name", "name-1234"), Vec::new())
        .build();
    let mut rows = reader.rows_with_options(&options).unwrap();
    let ids = collect_ids(&mut rows);
    assert_eq!(ids.len(), 100);
    assert!(ids.contains(&1234));
}
