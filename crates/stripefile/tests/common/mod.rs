//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use storage::{BufferPool, MemoryStorage};
use stripefile::{Codec, DataType, FileWriter, Reader, Value, WriterOptions};

pub const PEOPLE: &str = "people.strp";

/// id, age, name, city (nullable)
pub fn people_schema() -> DataType {
    DataType::Struct(vec![
        ("id".to_string(), DataType::Long),
        ("age".to_string(), DataType::Long),
        ("name".to_string(), DataType::String),
        ("city".to_string(), DataType::String),
    ])
}

pub fn city_of(id: i64) -> Value {
    match id % 5 {
        0 => Value::Null,
        1 => Value::String("Bergen".to_string()),
        2 => Value::String("Oslo".to_string()),
        3 => Value::String("Tromsø".to_string()),
        _ => Value::String("Trondheim".to_string()),
    }
}

pub fn name_of(id: i64) -> String {
    format!("name-{:04}", id)
}

/// Three stripes of 1000 rows with stride 100; ages within stripe `s`
/// climb from `spans[s].0` to `spans[s].1`
pub fn people_file(codec: Codec) -> Vec<u8> {
    let options = WriterOptions::default()
        .codec(codec)
        .row_index_stride(100)
        .stripe_rows(1000);
    let mut writer = FileWriter::new(&people_schema(), options).unwrap();
    writer.add_metadata("created_by", "integration tests");
    let spans = [(0i64, 30i64), (10, 40), (50, 90)];
    for (stripe, (low, high)) in spans.iter().enumerate() {
        for i in 0..1000i64 {
            let id = stripe as i64 * 1000 + i;
            let age = low + (i * (high - low)) / 999;
            writer
                .add_row(vec![
                    Value::Long(id),
                    Value::Long(age),
                    Value::String(name_of(id)),
                    city_of(id),
                ])
                .unwrap();
        }
    }
    writer.finish().unwrap()
}

/// `rows` rows split into stripes of `stripe_rows`, ids counting up from 0
pub fn sequential_file(codec: Codec, rows: i64, stripe_rows: usize, stride: u32) -> Vec<u8> {
    let options = WriterOptions::default()
        .codec(codec)
        .row_index_stride(stride)
        .stripe_rows(stripe_rows);
    let mut writer = FileWriter::new(&people_schema(), options).unwrap();
    for id in 0..rows {
        writer
            .add_row(vec![
                Value::Long(id),
                Value::Long(id % 97),
                Value::String(name_of(id)),
                city_of(id),
            ])
            .unwrap();
    }
    writer.finish().unwrap()
}

/// 2^53, where doubles stop representing every integer
pub const BALANCE_BASE: i64 = 1 << 53;

/// id, home {zip, street} (nullable struct), balance
pub fn household_schema() -> DataType {
    DataType::Struct(vec![
        ("id".to_string(), DataType::Long),
        (
            "home".to_string(),
            DataType::Struct(vec![
                ("zip".to_string(), DataType::Int),
                ("street".to_string(), DataType::String),
            ]),
        ),
        ("balance".to_string(), DataType::Long),
    ])
}

/// `home` is null for every row of each third row group and for every
/// seventh id; `street` is null for every eleventh id
pub fn home_of(id: i64) -> Value {
    let row_group = (id % 500) / 50;
    if row_group % 3 == 0 || id % 7 == 0 {
        return Value::Null;
    }
    let street = if id % 11 == 0 {
        Value::Null
    } else {
        Value::String(format!("street-{}", id % 13))
    };
    Value::Struct(vec![Value::Int(1000 + (id % 40) as i32), street])
}

/// Two stripes of 500 rows with stride 50; balances start at 2^53 + 3
pub fn household_file(codec: Codec) -> Vec<u8> {
    let options = WriterOptions::default()
        .codec(codec)
        .row_index_stride(50)
        .stripe_rows(500);
    let mut writer = FileWriter::new(&household_schema(), options).unwrap();
    for id in 0..1000i64 {
        writer
            .add_row(vec![Value::Long(id), home_of(id), Value::Long(BALANCE_BASE + 3 + id)])
            .unwrap();
    }
    writer.finish().unwrap()
}

pub fn memory_storage(path: &str, bytes: Vec<u8>) -> Arc<MemoryStorage> {
    let storage = MemoryStorage::new();
    storage.put(path, bytes);
    Arc::new(storage)
}

pub fn pooled_storage(path: &str, bytes: Vec<u8>, pool: Arc<dyn BufferPool>) -> Arc<MemoryStorage> {
    let storage = MemoryStorage::new().with_buffer_pool(pool);
    storage.put(path, bytes);
    Arc::new(storage)
}

pub fn open(bytes: Vec<u8>) -> Reader {
    Reader::open(memory_storage(PEOPLE, bytes), PEOPLE, Default::default()).unwrap()
}

/// Position of the only occurrence of `needle` in `haystack`
pub fn find_unique(haystack: &[u8], needle: &[u8]) -> usize {
    let positions: Vec<usize> = haystack
        .windows(needle.len())
        .enumerate()
        .filter(|(_, window)| *window == needle)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(positions.len(), 1, "expected exactly one occurrence");
    positions[0]
}

/// Ids of every row a record reader returns
pub fn collect_ids(rows: &mut stripefile::RecordReader) -> Vec<i64> {
    let mut ids = Vec::new();
    while let Some(row) = rows.next_row().unwrap() {
        ids.push(row.values()[0].as_i64().unwrap());
    }
    ids
}
