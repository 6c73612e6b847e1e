//! Protobuf messages for the file tail and stripe footers
//!
//! Field numbers follow the layout written by [`crate::writer::FileWriter`].
//! These are plain `prost` messages; nothing outside the footer and metadata
//! modules should need them directly.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IntegerStatistics {
    #[prost(sint64, optional, tag = "1")]
    pub minimum: ::core::option::Option<i64>,
    #[prost(sint64, optional, tag = "2")]
    pub maximum: ::core::option::Option<i64>,
    #[prost(sint64, optional, tag = "3")]
    pub sum: ::core::option::Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DoubleStatistics {
    #[prost(double, optional, tag = "1")]
    pub minimum: ::core::option::Option<f64>,
    #[prost(double, optional, tag = "2")]
    pub maximum: ::core::option::Option<f64>,
    #[prost(double, optional, tag = "3")]
    pub sum: ::core::option::Option<f64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StringStatistics {
    #[prost(string, optional, tag = "1")]
    pub minimum: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "2")]
    pub maximum: ::core::option::Option<::prost::alloc::string::String>,
    /// total length of all strings in scope
    #[prost(sint64, optional, tag = "3")]
    pub sum: ::core::option::Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BucketStatistics {
    /// for booleans, a single bucket holding the number of true values
    #[prost(uint64, repeated, tag = "1")]
    pub count: ::prost::alloc::vec::Vec<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DateStatistics {
    /// days since epoch
    #[prost(sint32, optional, tag = "1")]
    pub minimum: ::core::option::Option<i32>,
    #[prost(sint32, optional, tag = "2")]
    pub maximum: ::core::option::Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TimestampStatistics {
    /// milliseconds since epoch
    #[prost(sint64, optional, tag = "1")]
    pub minimum: ::core::option::Option<i64>,
    #[prost(sint64, optional, tag = "2")]
    pub maximum: ::core::option::Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BinaryStatistics {
    /// total length of all blobs in scope
    #[prost(sint64, optional, tag = "1")]
    pub sum: ::core::option::Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ColumnStatistics {
    #[prost(uint64, optional, tag = "1")]
    pub number_of_values: ::core::option::Option<u64>,
    #[prost(message, optional, tag = "2")]
    pub int_statistics: ::core::option::Option<IntegerStatistics>,
    #[prost(message, optional, tag = "3")]
    pub double_statistics: ::core::option::Option<DoubleStatistics>,
    #[prost(message, optional, tag = "4")]
    pub string_statistics: ::core::option::Option<StringStatistics>,
    #[prost(message, optional, tag = "5")]
    pub bucket_statistics: ::core::option::Option<BucketStatistics>,
    #[prost(message, optional, tag = "7")]
    pub date_statistics: ::core::option::Option<DateStatistics>,
    #[prost(message, optional, tag = "8")]
    pub binary_statistics: ::core::option::Option<BinaryStatistics>,
    #[prost(message, optional, tag = "9")]
    pub timestamp_statistics: ::core::option::Option<TimestampStatistics>,
    #[prost(bool, optional, tag = "10")]
    pub has_null: ::core::option::Option<bool>,
}

/// Statistics of one column for every row group of a stripe
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RowIndex {
    #[prost(uint32, tag = "1")]
    pub column: u32,
    #[prost(message, repeated, tag = "2")]
    pub entry: ::prost::alloc::vec::Vec<ColumnStatistics>,
}

/// One chunk of column data: a single column's rows for a single row group
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Stream {
    #[prost(uint32, tag = "1")]
    pub column: u32,
    #[prost(uint32, tag = "2")]
    pub row_group: u32,
    #[prost(uint64, tag = "3")]
    pub length: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StripeFooter {
    /// in physical order; offsets are implied by the running sum of lengths
    #[prost(message, repeated, tag = "1")]
    pub streams: ::prost::alloc::vec::Vec<Stream>,
    #[prost(uint64, tag = "2")]
    pub number_of_rows: u64,
    #[prost(message, repeated, tag = "3")]
    pub statistics: ::prost::alloc::vec::Vec<ColumnStatistics>,
    #[prost(message, repeated, tag = "4")]
    pub row_index: ::prost::alloc::vec::Vec<RowIndex>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StripeInformation {
    #[prost(uint64, tag = "1")]
    pub offset: u64,
    #[prost(uint64, tag = "2")]
    pub index_length: u64,
    #[prost(uint64, tag = "3")]
    pub data_length: u64,
    #[prost(uint64, tag = "4")]
    pub footer_length: u64,
    #[prost(uint64, tag = "5")]
    pub number_of_rows: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Type {
    #[prost(enumeration = "TypeKind", tag = "1")]
    pub kind: i32,
    #[prost(uint32, repeated, packed = "true", tag = "2")]
    pub subtypes: ::prost::alloc::vec::Vec<u32>,
    #[prost(string, repeated, tag = "3")]
    pub field_names: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TypeKind {
    Boolean = 0,
    Byte = 1,
    Short = 2,
    Int = 3,
    Long = 4,
    Float = 5,
    Double = 6,
    String = 7,
    Binary = 8,
    Timestamp = 9,
    List = 10,
    Map = 11,
    Struct = 12,
    Date = 15,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UserMetadataItem {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Footer {
    #[prost(uint64, tag = "1")]
    pub header_length: u64,
    #[prost(uint64, tag = "2")]
    pub content_length: u64,
    #[prost(message, repeated, tag = "3")]
    pub stripes: ::prost::alloc::vec::Vec<StripeInformation>,
    #[prost(message, repeated, tag = "4")]
    pub types: ::prost::alloc::vec::Vec<Type>,
    #[prost(message, repeated, tag = "5")]
    pub metadata: ::prost::alloc::vec::Vec<UserMetadataItem>,
    #[prost(uint64, tag = "6")]
    pub number_of_rows: u64,
    #[prost(message, repeated, tag = "7")]
    pub statistics: ::prost::alloc::vec::Vec<ColumnStatistics>,
    #[prost(uint32, tag = "8")]
    pub row_index_stride: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum CompressionKind {
    None = 0,
    Zlib = 1,
    Snappy = 2,
    Lzo = 3,
    Lz4 = 4,
    Zstd = 5,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PostScript {
    #[prost(uint64, tag = "1")]
    pub footer_length: u64,
    #[prost(enumeration = "CompressionKind", tag = "2")]
    pub compression: i32,
    #[prost(uint64, tag = "3")]
    pub compression_block_size: u64,
    #[prost(uint32, repeated, packed = "true", tag = "4")]
    pub version: ::prost::alloc::vec::Vec<u32>,
    #[prost(uint32, tag = "6")]
    pub writer_version: u32,
    #[prost(string, tag = "8000")]
    pub magic: ::prost::alloc::string::String,
}
