use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use config::Config;
use humansize::{format_size, BINARY};
use std::sync::Arc;
use storage::{LocalStorage, ObjectStoreStorage, Storage};
use stripefile::{ColumnStatistics, Options, Reader, TypeStatistics};
use tracing::debug;

/// Inspect stripe files
#[derive(Parser, Debug)]
#[command(name = "stripefile-dump")]
#[command(about = "Inspect the footer, stripes and rows of stripe files", long_about = None)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Read files from the configured S3 bucket instead of the local disk
    #[arg(long, global = true)]
    s3: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// File-level facts: version, compression, schema, statistics, user metadata
    Meta { file: String },

    /// One line per stripe
    Stripes { file: String },

    /// Print rows
    Scan {
        file: String,

        /// Start of the byte range selecting stripes
        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Length of the byte range selecting stripes
        #[arg(long)]
        length: Option<u64>,

        /// Comma-separated field names to read
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,

        /// Stop after this many rows
        #[arg(long)]
        limit: Option<usize>,

        /// Print one JSON object per row instead of a table
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    // RUST_LOG controls the level, e.g. RUST_LOG=stripefile=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;
    config.validate()?;

    let storage: Arc<dyn Storage> = if args.s3 {
        Arc::new(ObjectStoreStorage::from_config(&config.s3).context("Failed to create S3 storage")?)
    } else {
        Arc::new(LocalStorage::new())
    };

    let file = match &args.command {
        Command::Meta { file } | Command::Stripes { file } | Command::Scan { file, .. } => file,
    };
    let reader = Reader::open(storage, file, config.reader.clone())
        .with_context(|| format!("Failed to open {}", file))?;

    match &args.command {
        Command::Meta { .. } => print_meta(&reader),
        Command::Stripes { .. } => print_stripes(&reader),
        Command::Scan {
            offset,
            length,
            columns,
            limit,
            json,
            ..
        } => scan(&reader, *offset, *length, columns, *limit, *json),
    }
}

fn print_meta(reader: &Reader) -> Result<()> {
    println!("File:            {}", reader.path());
    println!("Version:         {}", reader.version());
    println!("Writer version:  {:?}", reader.writer_version());
    println!(
        "Compression:     {:?} ({} blocks)",
        reader.compression(),
        format_size(reader.compression_block_size(), BINARY)
    );
    println!("Rows:            {}", reader.number_of_rows());
    println!("Stripes:         {}", reader.stripes().len());
    println!("Row index stride: {}", reader.row_index_stride());
    println!("Content length:  {}", format_size(reader.content_length(), BINARY));
    println!("Raw data size:   {}", format_size(reader.raw_data_size(), BINARY));
    println!("Schema:          {}", reader.types());

    let keys: Vec<&str> = reader.metadata_keys().collect();
    if !keys.is_empty() {
        println!("\nUser metadata:");
        for key in keys {
            let value = reader.metadata_value(key).map(|v| v.to_vec()).unwrap_or_default();
            match String::from_utf8(value) {
                Ok(text) => println!("  {} = {}", key, text),
                Err(e) => println!("  {} = 0x{}", key, hex::encode(e.as_bytes())),
            }
        }
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["id", "type", "values", "nulls", "min", "max", "sum"]);
    for node in reader.types().iter() {
        let Some(stats) = reader.statistics().get(node.id()) else {
            continue;
        };
        let (min, max, sum) = describe(stats);
        table.add_row(vec![
            Cell::new(node.id()),
            Cell::new(node.kind().name()),
            Cell::new(stats.number_of_values()),
            Cell::new(stats.has_null()),
            Cell::new(min),
            Cell::new(max),
            Cell::new(sum),
        ]);
    }
    println!("\nColumn statistics:\n{}", table);
    Ok(())
}

fn print_stripes(reader: &Reader) -> Result<()> {
    let metadata = reader.metadata();
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        "stripe", "offset", "rows", "first row", "data", "footer", "row groups",
    ]);
    for stripe in reader.stripes() {
        let groups = reader.footer().row_groups_in(stripe.number_of_rows());
        let row_groups = match metadata.stripe_footer(stripe.index()) {
            Ok(footer) if footer.has_row_group_statistics() => format!("{} (indexed)", groups),
            Ok(_) => groups.to_string(),
            Err(e) => format!("unreadable: {}", e),
        };
        table.add_row(vec![
            Cell::new(stripe.index()),
            Cell::new(stripe.offset()),
            Cell::new(stripe.number_of_rows()),
            Cell::new(stripe.first_row()),
            Cell::new(format_size(stripe.data_length(), BINARY)),
            Cell::new(format_size(stripe.footer_length(), BINARY)),
            Cell::new(row_groups),
        ]);
    }
    println!("{}", table);
    Ok(())
}

fn scan(
    reader: &Reader,
    offset: u64,
    length: Option<u64>,
    columns: &[String],
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let mut builder = Options::builder().range(offset, length.unwrap_or(u64::MAX));
    if !columns.is_empty() {
        let mut include = vec![false; reader.types().len()];
        for name in columns {
            let id = reader
                .types()
                .find_column(name)
                .with_context(|| format!("Unknown column '{}'", name))?;
            include[id] = true;
        }
        builder = builder.include(include);
    }
    let options = builder.build();
    debug!(options = %options, "scanning");

    let mut rows = reader.rows_with_options(&options)?;
    let limit = limit.unwrap_or(usize::MAX);
    let names = reader.types().top_level_names();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    let mut header = vec!["row".to_string()];
    header.extend(names.iter().cloned());
    table.set_header(header);

    let mut printed = 0;
    while printed < limit {
        let Some(row) = rows.next_row()? else {
            break;
        };
        if json {
            let mut object = serde_json::Map::new();
            object.insert("_row".to_string(), serde_json::json!(row.row_number()));
            for (name, value) in names.iter().zip(row.values()) {
                object.insert(name.clone(), serde_json::to_value(value)?);
            }
            println!("{}", serde_json::Value::Object(object));
        } else {
            let mut cells = vec![Cell::new(row.row_number())];
            for value in row.values() {
                cells.push(Cell::new(serde_json::to_string(value)?));
            }
            table.add_row(cells);
        }
        printed += 1;
    }
    if !json {
        println!("{}", table);
    }
    if rows.skipped_records() > 0 {
        eprintln!("Skipped {} corrupt records", rows.skipped_records());
    }
    Ok(())
}

fn describe(stats: &ColumnStatistics) -> (String, String, String) {
    fn show<T: ToString>(value: &Option<T>) -> String {
        value.as_ref().map(ToString::to_string).unwrap_or_default()
    }
    match stats.type_statistics() {
        TypeStatistics::None => Default::default(),
        TypeStatistics::Integer { min, max, sum } => (show(min), show(max), show(sum)),
        TypeStatistics::Double { min, max, sum } => (show(min), show(max), show(sum)),
        TypeStatistics::String { min, max, sum } => (show(min), show(max), sum.to_string()),
        TypeStatistics::Boolean { true_count } => (String::new(), String::new(), true_count.to_string()),
        TypeStatistics::Date { min, max } => (show(min), show(max), String::new()),
        TypeStatistics::Timestamp { min, max } => (show(min), show(max), String::new()),
        TypeStatistics::Binary { sum } => (String::new(), String::new(), sum.to_string()),
    }
}
