//! Record access for a single table.

use std::sync::Arc;

use bytes::Bytes;

use crate::compression::Compressor;
use crate::config::{TableOptions, TablesConfig};
use crate::error::{TableError, TableResult};
use crate::layout::TableLayout;
use crate::location::Location;
use crate::metadata::dtype::Dtype;
use crate::metadata::table::TableMetadata;
use crate::metadata::{self, Attributes};
use crate::store::StorageBackend;
use crate::types::{FieldValue, decode_value, encode_value};

/// One decoded row: field names paired with values, in layout order.
pub type Record = Vec<(String, FieldValue)>;

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

pub struct Table<S: StorageBackend> {
    store: Arc<S>,
    path: String,
    metadata: TableMetadata,
    layout: TableLayout,
    compressor: Compressor,
    config: TablesConfig,
}

impl<S: StorageBackend> std::fmt::Debug for Table<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("path", &self.path)
            .field("nrows", &self.nrows())
            .field("format", &self.layout.format)
            .finish()
    }
}

impl<S: StorageBackend> Table<S> {
    /// Read `<path>/.zarray` and open the table it describes.
    pub async fn load(store: Arc<S>, path: &str, config: TablesConfig) -> TableResult<Self> {
        let zarray_path = store.join(path, metadata::ZARRAY);
        let bytes = store
            .get(&zarray_path)
            .await?
            .ok_or_else(|| TableError::NotFound(format!("No table at {path}")))?;
        let md = TableMetadata::parse(&bytes)?;
        Self::from_metadata(store, path, md, config)
    }

    /// Open a table from already-parsed metadata.
    pub fn from_metadata(
        store: Arc<S>,
        path: &str,
        metadata: TableMetadata,
        config: TablesConfig,
    ) -> TableResult<Self> {
        let layout = table_layout(path, &metadata)?;
        let compressor =
            Compressor::from_config(metadata.compressor.as_ref())?.with_typesize(layout.row_size);

        tracing::debug!(
            "Opened table {path}: {} rows, format {}",
            metadata.nrows(),
            layout.format
        );

        Ok(Self {
            store,
            path: path.to_string(),
            metadata,
            layout,
            compressor,
            config,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn metadata(&self) -> &TableMetadata {
        &self.metadata
    }

    pub fn layout(&self) -> &TableLayout {
        &self.layout
    }

    pub fn nrows(&self) -> usize {
        self.metadata.nrows()
    }

    pub fn chunk_rows(&self) -> usize {
        self.metadata.chunk_rows()
    }

    /// Rows moved per I/O buffer: `chunk_times` chunks.
    pub fn buffer_rows(&self) -> usize {
        self.chunk_rows() * self.config.chunk_times.max(1)
    }

    /// The table's `.zattrs`, empty when absent.
    pub async fn attributes(&self) -> TableResult<Attributes> {
        let zattrs = self.store.join(&self.path, metadata::ZATTRS);
        match self.store.get(&zattrs).await? {
            Some(bytes) => metadata::parse_attributes(&bytes),
            None => Ok(Attributes::new()),
        }
    }

    // -----------------------------------------------------------------------
    // Reading
    // -----------------------------------------------------------------------

    /// Decode rows `[start, stop)`, clamped to the table length.
    pub async fn read_records(&self, start: usize, stop: usize) -> TableResult<Vec<Record>> {
        self.read_records_step(start, stop, 1).await
    }

    /// Decode every `step`-th row of `[start, stop)`, clamped to the table
    /// length.
    pub async fn read_records_step(
        &self,
        start: usize,
        stop: usize,
        step: usize,
    ) -> TableResult<Vec<Record>> {
        let packed = self.read_packed(start, stop, step).await?;
        if self.layout.row_size == 0 {
            let rows = (start..stop.min(self.nrows())).step_by(step).count();
            return (0..rows).map(|_| decode_record(&self.layout, &[])).collect();
        }
        packed
            .chunks_exact(self.layout.row_size)
            .map(|row| decode_record(&self.layout, row))
            .collect()
    }

    /// Packed bytes of every `step`-th row of `[start, stop)`.
    ///
    /// Chunks are fetched `chunk_times` at a time; chunks the selection skips
    /// entirely are never read.
    pub async fn read_packed(&self, start: usize, stop: usize, step: usize) -> TableResult<Vec<u8>> {
        if step == 0 {
            return Err(TableError::InvalidArgument("step must be greater than 0".into()));
        }
        let stop = stop.min(self.nrows());
        if start >= stop {
            return Ok(Vec::new());
        }

        let chunk_rows = self.chunk_rows();
        let row_size = self.layout.row_size;
        let rows: Vec<usize> = (start..stop).step_by(step).collect();
        let mut indices: Vec<usize> = rows.iter().map(|row| row / chunk_rows).collect();
        indices.dedup();

        let mut out = Vec::with_capacity(rows.len() * row_size);
        let mut pending = rows.iter().copied().peekable();
        for batch in indices.chunks(self.config.chunk_times.max(1)) {
            let chunks =
                futures::future::try_join_all(batch.iter().map(|&i| self.read_chunk(i))).await?;
            for (&index, data) in batch.iter().zip(chunks) {
                let chunk_end = (index + 1) * chunk_rows;
                while let Some(row) = pending.next_if(|&row| row < chunk_end) {
                    let at = (row - index * chunk_rows) * row_size;
                    out.extend_from_slice(&data[at..at + row_size]);
                }
            }
        }
        Ok(out)
    }

    /// Fetch and decompress one chunk. Missing chunks read as zero rows.
    async fn read_chunk(&self, index: usize) -> TableResult<Vec<u8>> {
        let chunk_bytes = self.chunk_bytes()?;
        let key = self.store.join(&self.path, &index.to_string());
        tracing::debug!("Fetching chunk {key}");

        let Some(raw) = self.store.get(&key).await? else {
            return Ok(vec![0; chunk_bytes]);
        };
        let data = self.compressor.decode(&raw)?;
        if data.len() < chunk_bytes {
            return Err(TableError::Decode(format!(
                "Chunk {key} holds {} bytes, expected {chunk_bytes}",
                data.len()
            )));
        }
        Ok(data)
    }

    fn chunk_bytes(&self) -> TableResult<usize> {
        self.chunk_rows()
            .checked_mul(self.layout.row_size)
            .ok_or_else(|| {
                TableError::Metadata(format!(
                    "{}: {} rows of {} bytes do not fit in one chunk",
                    self.path,
                    self.chunk_rows(),
                    self.layout.row_size
                ))
            })
    }

    /// Copy every `step`-th row of `[start, stop)` into a new table `name`
    /// under `dest`.
    ///
    /// The new table is sized for the number of copied rows and keeps this
    /// table's compressor and title unless `options` says otherwise. Rows
    /// move through one I/O buffer (`buffer_rows`) at a time.
    pub async fn copy_to(
        &self,
        dest: &mut Location<S>,
        name: &str,
        start: usize,
        stop: usize,
        step: usize,
        options: TableOptions,
    ) -> TableResult<Table<S>> {
        if step == 0 {
            return Err(TableError::InvalidArgument("step must be greater than 0".into()));
        }
        let Dtype::Structured(fields) = &self.metadata.dtype else {
            return Err(TableError::NotATable(self.path.clone()));
        };

        let stop = stop.min(self.nrows());
        let selected = if start < stop { (stop - start).div_ceil(step) } else { 0 };

        let title = if options.title.is_empty() {
            self.attributes()
                .await?
                .get("TITLE")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string()
        } else {
            options.title
        };
        let options = TableOptions {
            title,
            expected_rows: options.expected_rows.or(Some(selected.max(1))),
            compressor: options.compressor.or_else(|| self.metadata.compressor.clone()),
        };
        let mut copy = dest.create_table(name, fields.clone(), options).await?;

        let span = self.buffer_rows().saturating_mul(step);
        let mut lo = start;
        while lo < stop {
            let hi = lo.saturating_add(span).min(stop);
            let packed = self.read_packed(lo, hi, step).await?;
            copy.append_packed(&packed).await?;
            lo = hi;
        }

        tracing::debug!("Copied {selected} rows of {} to {}", self.path, copy.path);
        Ok(copy)
    }

    // -----------------------------------------------------------------------
    // Writing
    // -----------------------------------------------------------------------

    /// Append records to the end of the table.
    pub async fn append(&mut self, records: &[Record]) -> TableResult<()> {
        let mut packed = Vec::with_capacity(records.len() * self.layout.row_size);
        for record in records {
            packed.extend(encode_record(&self.layout, record)?);
        }
        self.append_packed(&packed).await
    }

    /// Append rows already packed according to the table layout.
    pub async fn append_packed(&mut self, rows: &[u8]) -> TableResult<()> {
        let row_size = self.layout.row_size;
        if row_size == 0 {
            return Err(TableError::Unsupported(format!(
                "appending to {} whose records are zero bytes wide",
                self.path
            )));
        }
        if rows.len() % row_size != 0 {
            return Err(TableError::Encode(format!(
                "{} bytes is not a whole number of {row_size}-byte rows",
                rows.len()
            )));
        }
        if rows.is_empty() {
            return Ok(());
        }

        let chunk_rows = self.chunk_rows();
        let mut row = self.nrows();
        let mut pending = rows;
        while !pending.is_empty() {
            let index = row / chunk_rows;
            let within = row % chunk_rows;
            let take = ((chunk_rows - within) * row_size).min(pending.len());

            let mut chunk = if within > 0 {
                self.read_chunk(index).await?
            } else {
                vec![0; self.chunk_bytes()?]
            };
            let at = within * row_size;
            chunk[at..at + take].copy_from_slice(&pending[..take]);
            self.write_chunk(index, &chunk).await?;

            pending = &pending[take..];
            row += take / row_size;
        }

        tracing::debug!("Appended {} rows to {}", rows.len() / row_size, self.path);
        self.resize(row).await
    }

    /// Shrink the table to `nrows` rows.
    pub async fn truncate(&mut self, nrows: usize) -> TableResult<()> {
        if nrows == 0 {
            return Err(TableError::InvalidArgument(
                "truncate size must be greater than 0".into(),
            ));
        }
        if nrows > self.nrows() {
            return Err(TableError::InvalidArgument(format!(
                "cannot truncate {} rows up to {nrows}",
                self.nrows()
            )));
        }
        self.resize(nrows).await
    }

    async fn write_chunk(&self, index: usize, data: &[u8]) -> TableResult<()> {
        let key = self.store.join(&self.path, &index.to_string());
        let packed = self.compressor.encode(data)?;
        self.store.put(&key, Bytes::from(packed)).await
    }

    /// Rewrite `.zarray` with the new row count; the in-memory metadata
    /// only changes once the write succeeded.
    async fn resize(&mut self, nrows: usize) -> TableResult<()> {
        let mut resized = self.metadata.clone();
        resized.shape[0] = nrows;
        let zarray_path = self.store.join(&self.path, metadata::ZARRAY);
        self.store
            .put(&zarray_path, Bytes::from(resized.to_json_bytes()?))
            .await?;
        self.metadata = resized;
        tracing::debug!("Table {} now has {nrows} rows", self.path);
        Ok(())
    }
}

/// Field layout of the table stored at `path`; fails unless the metadata
/// describes a one-dimensional array of records.
pub(crate) fn table_layout(path: &str, metadata: &TableMetadata) -> TableResult<TableLayout> {
    if metadata.shape.len() != 1 {
        return Err(TableError::NotATable(format!(
            "{path} has rank {}, tables are one-dimensional",
            metadata.shape.len()
        )));
    }
    TableLayout::from_dtype(&metadata.dtype).map_err(|e| match e {
        TableError::NotATable(msg) => TableError::NotATable(format!("{path}: {msg}")),
        other => other,
    })
}

// ---------------------------------------------------------------------------
// Record <-> packed bytes
// ---------------------------------------------------------------------------

/// Decode one packed row.
pub fn decode_record(layout: &TableLayout, row: &[u8]) -> TableResult<Record> {
    if row.len() < layout.row_size {
        return Err(TableError::Decode(format!(
            "Row holds {} bytes, layout needs {}",
            row.len(),
            layout.row_size
        )));
    }
    layout
        .fields
        .iter()
        .map(|field| -> TableResult<(String, FieldValue)> {
            let bytes = &row[field.offset..field.offset + field.nbytes()];
            let value = if field.shape.is_empty() {
                FieldValue::Scalar(decode_value(&field.dtype, bytes)?)
            } else {
                let values = bytes
                    .chunks_exact(field.size.max(1))
                    .take(field.count())
                    .map(|elem| decode_value(&field.dtype, elem))
                    .collect::<TableResult<Vec<_>>>()?;
                FieldValue::Array {
                    shape: field.shape.clone(),
                    values,
                }
            };
            Ok((field.name.clone(), value))
        })
        .collect()
}

/// Pack one record; fields must appear in layout order.
pub fn encode_record(layout: &TableLayout, record: &[(String, FieldValue)]) -> TableResult<Vec<u8>> {
    if record.len() != layout.fields.len() {
        return Err(TableError::Encode(format!(
            "Record has {} fields, layout has {}",
            record.len(),
            layout.fields.len()
        )));
    }

    let mut out = Vec::with_capacity(layout.row_size);
    for (field, (name, value)) in layout.fields.iter().zip(record) {
        if &field.name != name {
            return Err(TableError::Encode(format!(
                "Expected field {}, found {name}",
                field.name
            )));
        }
        match value {
            FieldValue::Scalar(v) if field.shape.is_empty() => {
                encode_value(&field.dtype, v, &mut out)?;
            }
            FieldValue::Array { shape, values }
                if *shape == field.shape && values.len() == field.count() =>
            {
                for v in values {
                    encode_value(&field.dtype, v, &mut out)?;
                }
            }
            _ => {
                return Err(TableError::Encode(format!(
                    "Value for {} does not match shape {:?}",
                    field.name, field.shape
                )));
            }
        }
    }
    Ok(out)
}
