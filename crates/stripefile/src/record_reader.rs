//! Sequential row cursor over a scan plan
//!
//! A [`RecordReader`] walks its plan stripe by stripe and row group by row
//! group. Stripes are loaded on first use and released as soon as the reader
//! moves past them. The reader moves through these states:
//!
//! ```text
//! Unstarted -> Positioned(stripe, row group, row) -> Exhausted
//!                   |
//!                   +-> Failed
//! ```
//!
//! `Failed` is terminal: every later call reports the failure again.

use std::sync::Arc;

use storage::Storage;
use tracing::{debug, warn};

use crate::error::{ErrorKind, Result, StripeFileError};
use crate::footer::Footer;
use crate::loader::{LoadedStripe, StripeLoader};
use crate::metadata::{MetadataReader, StripeMetadata};
use crate::options::ResolvedOptions;
use crate::plan::ScanPlan;
use crate::value::{decode_frame, read_chunk_header, read_frame, Row, Value};

#[derive(Debug, Clone, PartialEq)]
enum State {
    Unstarted,
    Positioned {
        /// Index into the plan's stripes
        stripe: usize,
        /// Index into that stripe's planned row groups
        row_group: usize,
        /// Row within the row group
        row: u64,
    },
    Exhausted,
    Failed {
        kind: ErrorKind,
        message: String,
    },
}

/// Read position inside one column chunk
#[derive(Debug)]
struct ColumnCursor {
    column: usize,
    field: usize,
    position: usize,
}

/// The stripe currently held in memory
#[derive(Debug)]
struct Current {
    stripe: usize,
    loaded: LoadedStripe,
    /// Open row group, as (planned row-group index, per-column cursors)
    row_group: Option<(usize, Vec<ColumnCursor>)>,
}

enum RowError {
    Stripe(String),
    Record(String),
}

/// Reads rows of one file according to one set of options
#[derive(Debug)]
pub struct RecordReader {
    footer: Arc<Footer>,
    metadata: MetadataReader,
    loader: StripeLoader,
    plan: ScanPlan,
    options: ResolvedOptions,
    /// Position of each included column among the root's fields
    fields: Vec<(usize, usize)>,
    state: State,
    current: Option<Current>,
    deferred: Option<StripeFileError>,
    skipped: u64,
}

impl RecordReader {
    pub(crate) fn new(
        storage: Arc<dyn Storage>,
        footer: Arc<Footer>,
        plan: ScanPlan,
        options: ResolvedOptions,
    ) -> Self {
        let metadata = MetadataReader::new(storage.clone(), footer.clone());
        let loader = StripeLoader::new(storage, footer.clone(), options.zero_copy);
        let root_fields = footer.types().top_level_columns();
        let fields = options
            .columns
            .iter()
            .filter_map(|&column| {
                let field = root_fields.iter().position(|&c| c == column)?;
                Some((column, field))
            })
            .collect();
        debug!(
            path = footer.path(),
            stripes = plan.stripes().len(),
            rows = plan.planned_rows(),
            "record reader created"
        );
        Self {
            footer,
            metadata,
            loader,
            plan,
            options,
            fields,
            state: State::Unstarted,
            current: None,
            deferred: None,
            skipped: 0,
        }
    }

    pub fn plan(&self) -> &ScanPlan {
        &self.plan
    }

    /// Rows dropped because they failed to decode
    pub fn skipped_records(&self) -> u64 {
        self.skipped
    }

    /// Default row count for [`RecordReader::next_batch`]
    pub fn batch_size(&self) -> usize {
        self.options.batch_size
    }

    /// Whether stripe data is read into pooled buffers
    pub fn is_zero_copy(&self) -> bool {
        self.loader.is_zero_copy()
    }

    /// Absolute row number of the row the next call to [`RecordReader::next_row`] considers
    pub fn row_number(&self) -> u64 {
        match &self.state {
            State::Positioned {
                stripe,
                row_group,
                row,
            } => {
                let planned = &self.plan.stripes()[*stripe];
                match planned.row_groups().get(*row_group) {
                    Some(&group) => planned.first_row_of(group) + row,
                    None => planned.stripe().first_row() + planned.stripe().number_of_rows(),
                }
            }
            State::Unstarted => self
                .plan
                .stripes()
                .first()
                .and_then(|planned| {
                    planned
                        .row_groups()
                        .first()
                        .map(|&group| planned.first_row_of(group))
                })
                .unwrap_or(0),
            State::Exhausted | State::Failed { .. } => self
                .plan
                .stripes()
                .last()
                .map(|planned| planned.stripe().first_row() + planned.stripe().number_of_rows())
                .unwrap_or(0),
        }
    }

    /// Fraction of planned rows already consumed, between 0 and 1
    pub fn progress(&self) -> f64 {
        let total = self.plan.planned_rows();
        if total == 0 {
            return 1.0;
        }
        let consumed = match &self.state {
            State::Unstarted => 0,
            State::Exhausted => total,
            State::Failed { .. } => return 1.0,
            State::Positioned {
                stripe,
                row_group,
                row,
            } => {
                let stripes = self.plan.stripes();
                let before: u64 = stripes[..*stripe].iter().map(|s| s.planned_rows()).sum();
                let planned = &stripes[*stripe];
                let in_stripe: u64 = planned.row_groups()[..(*row_group).min(planned.row_groups().len())]
                    .iter()
                    .map(|&group| planned.rows_in(group))
                    .sum();
                before + in_stripe + row
            }
        };
        consumed as f64 / total as f64
    }

    /// The next row, or `None` once the plan is exhausted
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        if let Some(e) = self.deferred.take() {
            return Err(e);
        }

        loop {
            let (stripe, row_group, row) = match &self.state {
                State::Failed { kind, message } => {
                    return Err(StripeFileError::ReaderFailed {
                        kind: *kind,
                        message: message.clone(),
                    });
                }
                State::Exhausted => return Ok(None),
                State::Unstarted => {
                    self.state = if self.plan.is_empty() {
                        State::Exhausted
                    } else {
                        State::Positioned {
                            stripe: 0,
                            row_group: 0,
                            row: 0,
                        }
                    };
                    continue;
                }
                State::Positioned {
                    stripe,
                    row_group,
                    row,
                } => (*stripe, *row_group, *row),
            };

            let planned = &self.plan.stripes()[stripe];
            let Some(&group) = planned.row_groups().get(row_group) else {
                // stripe finished; release it before moving on
                self.current = None;
                self.state = if stripe + 1 < self.plan.stripes().len() {
                    State::Positioned {
                        stripe: stripe + 1,
                        row_group: 0,
                        row: 0,
                    }
                } else {
                    State::Exhausted
                };
                continue;
            };
            let rows_in_group = planned.rows_in(group);
            if row >= rows_in_group {
                if let Some(current) = &mut self.current {
                    current.row_group = None;
                }
                self.state = State::Positioned {
                    stripe,
                    row_group: row_group + 1,
                    row: 0,
                };
                continue;
            }
            let row_number = planned.first_row_of(group) + row;

            if let Err(e) = self.open_row_group(stripe, row_group, row) {
                return Err(self.fail(e));
            }

            self.state = State::Positioned {
                stripe,
                row_group,
                row: row + 1,
            };
            match self.decode_row() {
                Ok(values) => return Ok(Some(Row::new(row_number, values))),
                Err(RowError::Record(reason)) if self.options.skip_corrupt_records => {
                    self.skipped += 1;
                    warn!(
                        path = self.footer.path(),
                        row = row_number,
                        reason = %reason,
                        "skipping corrupt record"
                    );
                }
                Err(RowError::Record(reason)) => {
                    let e = StripeFileError::CorruptRecord {
                        path: self.footer.path().to_string(),
                        row: row_number,
                        reason,
                    };
                    return Err(self.fail(e));
                }
                Err(RowError::Stripe(reason)) => {
                    let e = StripeFileError::corrupt_stripe(
                        self.footer.path(),
                        planned_stripe_index(&self.plan, stripe),
                        reason,
                    );
                    return Err(self.fail(e));
                }
            }
        }
    }

    /// Up to `max_rows` rows; an empty batch means the plan is exhausted
    ///
    /// If a failure interrupts a partly filled batch, the rows read so far
    /// are returned and the failure is reported by the next call.
    pub fn next_batch(&mut self, max_rows: usize) -> Result<Vec<Row>> {
        let mut batch = Vec::with_capacity(max_rows.min(self.options.batch_size));
        while batch.len() < max_rows {
            match self.next_row() {
                Ok(Some(row)) => batch.push(row),
                Ok(None) => break,
                Err(e) if batch.is_empty() => return Err(e),
                Err(e) => {
                    self.deferred = Some(e);
                    break;
                }
            }
        }
        Ok(batch)
    }

    /// Move to absolute row `row_number`, which must lie in a planned row group
    pub fn seek_to_row(&mut self, row_number: u64) -> Result<()> {
        if let State::Failed { kind, message } = &self.state {
            return Err(StripeFileError::ReaderFailed {
                kind: *kind,
                message: message.clone(),
            });
        }
        let (stripe, row_group) = self.plan.locate(row_number).ok_or_else(|| {
            StripeFileError::invalid_options(format!(
                "row {} is not in the planned row groups",
                row_number
            ))
        })?;
        let planned = &self.plan.stripes()[stripe];
        let group = planned.row_groups()[row_group];
        let row = row_number - planned.first_row_of(group);

        // keep the loaded stripe when seeking within it; cursors are rebuilt
        match &mut self.current {
            Some(current) if current.stripe == stripe => current.row_group = None,
            _ => self.current = None,
        }
        self.deferred = None;
        self.state = State::Positioned {
            stripe,
            row_group,
            row,
        };
        debug!(path = self.footer.path(), row = row_number, "seek");
        Ok(())
    }

    fn fail(&mut self, e: StripeFileError) -> StripeFileError {
        warn!(path = self.footer.path(), error = %e, "record reader failed");
        self.state = State::Failed {
            kind: e.kind(),
            message: e.to_string(),
        };
        // releases pooled buffers
        self.current = None;
        e
    }

    /// Make sure the stripe is loaded and the row group's cursors point at `row`
    fn open_row_group(&mut self, stripe: usize, row_group: usize, row: u64) -> Result<()> {
        let loaded_here = matches!(&self.current, Some(current) if current.stripe == stripe);
        if !loaded_here {
            self.current = None;
            let planned = &self.plan.stripes()[stripe];
            let metadata: Arc<StripeMetadata> = match planned.metadata() {
                Some(metadata) => metadata.clone(),
                None => Arc::new(self.metadata.stripe_footer(planned.stripe_index())?),
            };
            let columns: Vec<usize> = self.fields.iter().map(|(column, _)| *column).collect();
            let loaded = self.loader.load(&metadata, &columns, planned.row_groups())?;
            self.current = Some(Current {
                stripe,
                loaded,
                row_group: None,
            });
        }

        let Some(current) = &mut self.current else {
            return Ok(());
        };
        if matches!(&current.row_group, Some((open, _)) if *open == row_group) {
            return Ok(());
        }

        let planned = &self.plan.stripes()[stripe];
        let group = planned.row_groups()[row_group];
        let expected_rows = planned.rows_in(group);
        let path = self.footer.path();
        let stripe_index = planned.stripe_index();
        let corrupt = |reason: String| StripeFileError::corrupt_stripe(path, stripe_index, reason);

        let mut cursors = Vec::with_capacity(self.fields.len());
        for &(column, field) in &self.fields {
            let chunk = current.loaded.chunk(column, group).ok_or_else(|| {
                corrupt(format!("column {} row group {} was not loaded", column, group))
            })?;
            let (rows, header) = read_chunk_header(chunk).map_err(&corrupt)?;
            if rows != expected_rows {
                return Err(corrupt(format!(
                    "column {} row group {} holds {} rows, expected {}",
                    column, group, rows, expected_rows
                )));
            }
            let mut position = header;
            for _ in 0..row {
                position = read_frame(chunk, position)
                    .map_err(|reason| corrupt(format!("column {}: {}", column, reason)))?
                    .end;
            }
            cursors.push(ColumnCursor {
                column,
                field,
                position,
            });
        }
        current.row_group = Some((row_group, cursors));
        Ok(())
    }

    /// Decode the row under the cursors and advance them
    ///
    /// Every column's frame is consumed even when an earlier one fails to
    /// decode, so a skipped row leaves the cursors on the next row.
    fn decode_row(&mut self) -> std::result::Result<Vec<Value>, RowError> {
        let types = self.footer.types();
        let mut values = vec![Value::Null; types.top_level_columns().len()];
        let Some(current) = &mut self.current else {
            return Err(RowError::Stripe("no stripe loaded".to_string()));
        };
        let Some((row_group, cursors)) = &mut current.row_group else {
            return Err(RowError::Stripe("no row group open".to_string()));
        };
        let group = self.plan.stripes()[current.stripe].row_groups()[*row_group];

        let mut record_error = None;
        for cursor in cursors.iter_mut() {
            let Some(chunk) = current.loaded.chunk(cursor.column, group) else {
                return Err(RowError::Stripe(format!(
                    "column {} row group {} was not loaded",
                    cursor.column, group
                )));
            };
            let frame = read_frame(chunk, cursor.position)
                .map_err(|reason| RowError::Stripe(format!("column {}: {}", cursor.column, reason)))?;
            cursor.position = frame.end;
            match decode_frame(types, cursor.column, &chunk[frame]) {
                Ok(value) => values[cursor.field] = value,
                Err(reason) => {
                    record_error.get_or_insert_with(|| format!("column {}: {}", cursor.column, reason));
                }
            }
        }

        match record_error {
            Some(reason) => Err(RowError::Record(reason)),
            None => Ok(values),
        }
    }
}

fn planned_stripe_index(plan: &ScanPlan, stripe: usize) -> usize {
    plan.stripes()[stripe].stripe_index()
}
