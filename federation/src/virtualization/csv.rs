//! CSV sources, streamed record by record.

use std::path::Path;

use csv_async::{AsyncReader, AsyncReaderBuilder, StringRecord};
use tokio::fs::File;

use common::errors::{AppError, AppResult};
use common::models::{QueryResult, VirtualQuery};

use super::{empty_result, open_error, unique_names, EphemeralStore, Window};

fn format_error(err: csv_async::Error) -> AppError {
    AppError::Format(format!("Invalid CSV: {err}"))
}

/// Column names from a header row: blanks become `column_N`, repeats get a
/// numeric suffix.
pub(super) fn normalize_headers<'a, I>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    unique_names(raw.into_iter().enumerate().map(|(idx, name)| match name.trim() {
        "" => format!("column_{}", idx + 1),
        trimmed => trimmed.to_string(),
    }))
}

fn cells(record: &StringRecord, width: usize) -> Vec<Option<String>> {
    (0..width)
        .map(|idx| record.get(idx).map(str::to_string))
        .collect()
}

async fn next_record(
    reader: &mut AsyncReader<File>,
    record: &mut StringRecord,
) -> AppResult<bool> {
    reader.read_record(record).await.map_err(format_error)
}

pub(super) async fn execute(path: &Path, query: &VirtualQuery) -> AppResult<QueryResult> {
    let file = File::open(path).await.map_err(|e| open_error(path, e))?;
    let mut reader = AsyncReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .create_reader(file);

    let header = reader.headers().await.map_err(format_error)?.clone();
    let blank_header = header.iter().all(|h| h.trim().is_empty());

    let mut record = StringRecord::new();
    let mut pending = next_record(&mut reader, &mut record).await?;
    if header.is_empty() || (blank_header && !pending) {
        return Ok(empty_result(0));
    }

    let columns = match &query.columns {
        Some(columns) => unique_names(columns.iter().cloned()),
        None => normalize_headers(header.iter()),
    };
    let width = columns.len();

    let mut store = EphemeralStore::create(&query.table, &columns).await?;
    let mut window = Window::new(query.offset, query.limit);
    let loaded: AppResult<()> = async {
        while pending {
            if window.admit() {
                store.insert(&cells(&record, width)).await?;
            }
            pending = next_record(&mut reader, &mut record).await?;
        }
        Ok(())
    }
    .await;

    let total = window.total();
    store.finish(loaded, &query.sql, total).await
}
