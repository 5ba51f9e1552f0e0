use std::sync::Arc;

use bytes::Bytes;

use crate::chunking;
use crate::compression::Compressor;
use crate::config::{TableOptions, TablesConfig};
use crate::error::{TableError, TableResult};
use crate::layout::TableLayout;
use crate::metadata::dtype::{Dtype, FieldSpec};
use crate::metadata::table::TableMetadata;
use crate::metadata::{self, Attributes, ConsolidatedMetadata, GroupMetadata};
use crate::store::StorageBackend;
use crate::table::{Table, table_layout};

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// Handle to an open group of a hierarchical store.
///
/// Tables are addressed by names relative to the group. When the group
/// carries consolidated metadata, table listing and field-format lookups
/// are answered from it without touching the per-table documents.
pub struct Location<S: StorageBackend> {
    store: Arc<S>,
    path: String,
    consolidated: Option<ConsolidatedMetadata>,
    config: TablesConfig,
}

impl<S: StorageBackend> std::fmt::Debug for Location<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Location")
            .field("path", &self.path)
            .field("consolidated", &self.consolidated.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl<S: StorageBackend> Location<S> {
    /// Open an existing group at `path` (`""` for the store root).
    pub async fn open(store: Arc<S>, path: &str) -> TableResult<Self> {
        let path = path.trim_matches('/').to_string();

        let zgroup = store.join(&path, metadata::ZGROUP);
        let bytes = store
            .get(&zgroup)
            .await?
            .ok_or_else(|| TableError::NotFound(format!("No group at '{path}'")))?;
        GroupMetadata::parse(&bytes)?;

        let zmetadata = store.join(&path, metadata::ZMETADATA);
        let consolidated = match store.get(&zmetadata).await? {
            Some(bytes) => {
                let md = ConsolidatedMetadata::parse(&bytes)?;
                tracing::debug!(
                    "Group '{path}' has consolidated metadata for {} tables",
                    md.tables.len()
                );
                Some(md)
            }
            None => None,
        };

        Ok(Self {
            store,
            path,
            consolidated,
            config: TablesConfig::default(),
        })
    }

    /// Create the group at `path` if needed and open it.
    pub async fn create(store: Arc<S>, path: &str) -> TableResult<Self> {
        let trimmed = path.trim_matches('/');
        let zgroup = store.join(trimmed, metadata::ZGROUP);
        if store.get(&zgroup).await?.is_none() {
            let bytes = serde_json::to_vec(&GroupMetadata::default())?;
            store.put(&zgroup, Bytes::from(bytes)).await?;
            tracing::debug!("Created group '{trimmed}'");
        }
        Self::open(store, trimmed).await
    }

    pub fn with_config(mut self, config: TablesConfig) -> Self {
        self.config = config;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn config(&self) -> &TablesConfig {
        &self.config
    }

    pub fn is_consolidated(&self) -> bool {
        self.consolidated.is_some()
    }

    /// The group's `.zattrs`, empty when absent.
    pub async fn attributes(&self) -> TableResult<Attributes> {
        let zattrs = self.store.join(&self.path, metadata::ZATTRS);
        match self.store.get(&zattrs).await? {
            Some(bytes) => metadata::parse_attributes(&bytes),
            None => Ok(Attributes::new()),
        }
    }

    /// Names of the tables directly under this group, sorted.
    pub async fn list_tables(&self) -> TableResult<Vec<String>> {
        if let Some(consolidated) = &self.consolidated {
            let mut names: Vec<String> = consolidated
                .tables
                .keys()
                .filter(|name| !name.contains('/'))
                .cloned()
                .collect();
            names.sort();
            return Ok(names);
        }

        let children = self.store.list(&self.path).await?;
        let probes = children
            .into_iter()
            .filter(|name| !name.starts_with('.'))
            .map(|name| async move {
                let md = self.read_table_metadata(&name).await;
                (name, md)
            });

        let mut names = Vec::new();
        for (name, md) in futures::future::join_all(probes).await {
            match md {
                Ok(Some(md)) if md.is_table() => names.push(name),
                Ok(_) => {}
                Err(e) => tracing::debug!("Skipping child '{name}': {e}"),
            }
        }
        names.sort();
        Ok(names)
    }

    /// Open the table `name` for record access.
    pub async fn open_table(&self, name: &str) -> TableResult<Table<S>> {
        validate_name(name)?;
        let path = self.table_path(name);
        Table::load(self.store.clone(), &path, self.config.clone()).await
    }

    /// Describe every field of table `name` and derive its packed format
    /// string.
    pub async fn get_field_format(&self, name: &str) -> TableResult<TableLayout> {
        validate_name(name)?;
        let path = self.table_path(name);

        if let Some(md) = self.consolidated.as_ref().and_then(|c| c.tables.get(name)) {
            tracing::debug!("Using consolidated metadata for {path}");
            return table_layout(&path, md);
        }

        let md = self
            .read_table_metadata(name)
            .await?
            .ok_or_else(|| TableError::NotFound(format!("No table at {path}")))?;
        table_layout(&path, &md)
    }

    /// Create an empty table `name` directly under this group.
    ///
    /// A consolidated group also gets the new table's documents added to
    /// its `.zmetadata`.
    pub async fn create_table(
        &mut self,
        name: &str,
        fields: Vec<FieldSpec>,
        options: TableOptions,
    ) -> TableResult<Table<S>> {
        validate_name(name)?;
        if name.contains('/') {
            return Err(TableError::InvalidName(format!(
                "'{name}': new tables are created directly under the group"
            )));
        }

        let path = self.table_path(name);
        let zarray = self.store.join(&path, metadata::ZARRAY);
        if self.store.get(&zarray).await?.is_some() {
            return Err(TableError::AlreadyExists(path));
        }

        let dtype = Dtype::Structured(fields);
        let layout = TableLayout::from_dtype(&dtype)?;
        let compressor = options
            .compressor
            .or_else(|| self.config.default_compressor.clone());
        Compressor::from_config(compressor.as_ref())?;

        let expected_rows = options.expected_rows.unwrap_or(self.config.expected_rows);
        let chunk_rows = chunking::chunk_rows(layout.row_size, expected_rows, &self.config);
        let md = TableMetadata::new(dtype, chunk_rows, compressor);

        self.store
            .put(&zarray, Bytes::from(md.to_json_bytes()?))
            .await?;

        let attrs = serde_json::json!({
            "CLASS": "TABLE",
            "VERSION": "1.0",
            "TITLE": options.title,
        });
        let zattrs = self.store.join(&path, metadata::ZATTRS);
        self.store
            .put(&zattrs, Bytes::from(serde_json::to_vec_pretty(&attrs)?))
            .await?;

        if self.consolidated.is_some() {
            self.consolidate_table(name, &md, attrs).await?;
        }

        tracing::debug!(
            "Created table {path} with {chunk_rows} rows per chunk, format {}",
            layout.format
        );
        Table::from_metadata(self.store.clone(), &path, md, self.config.clone())
    }

    async fn consolidate_table(
        &mut self,
        name: &str,
        md: &TableMetadata,
        attrs: serde_json::Value,
    ) -> TableResult<()> {
        let zmetadata = self.store.join(&self.path, metadata::ZMETADATA);
        let raw = self.store.get(&zmetadata).await?.ok_or_else(|| {
            TableError::NotFound(format!("Consolidated metadata {zmetadata} disappeared"))
        })?;
        let entries = [
            (format!("{name}/{}", metadata::ZARRAY), serde_json::to_value(md)?),
            (format!("{name}/{}", metadata::ZATTRS), attrs),
        ];
        let updated = ConsolidatedMetadata::insert_entries(&raw, &entries)?;
        self.store.put(&zmetadata, Bytes::from(updated)).await?;

        if let Some(consolidated) = self.consolidated.as_mut() {
            consolidated.tables.insert(name.to_string(), md.clone());
        }
        tracing::debug!("Added {name} to consolidated metadata of '{}'", self.path);
        Ok(())
    }

    async fn read_table_metadata(&self, name: &str) -> TableResult<Option<TableMetadata>> {
        let path = self.table_path(name);
        let zarray = self.store.join(&path, metadata::ZARRAY);
        match self.store.get(&zarray).await? {
            Some(bytes) => TableMetadata::parse(&bytes).map(Some),
            None => Ok(None),
        }
    }

    fn table_path(&self, name: &str) -> String {
        self.store.join(&self.path, name)
    }
}

/// Table names are relative `/`-separated paths without empty, `.` or `..`
/// segments.
fn validate_name(name: &str) -> TableResult<()> {
    if name.is_empty() {
        return Err(TableError::InvalidName("table name is empty".into()));
    }
    if name.starts_with('/') {
        return Err(TableError::InvalidName(format!(
            "'{name}' must be relative to the location"
        )));
    }
    if name
        .split('/')
        .any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(TableError::InvalidName(format!("'{name}' has an invalid segment")));
    }
    Ok(())
}
