pub mod blosc;
pub mod chunking;
pub mod compression;
pub mod config;
pub mod error;
pub mod layout;
pub mod location;
pub mod metadata;
pub mod store;
pub mod table;
pub mod types;

// Re-export key types at crate root for convenience.
pub use blosc::{BloscCname, BloscCodec, BloscShuffle};
pub use compression::Compressor;
pub use config::{TableOptions, TablesConfig};
pub use error::{TableError, TableResult};
pub use layout::{FieldDescriptor, TableLayout};
pub use location::Location;
pub use metadata::dtype::{Dtype, FieldSpec};
pub use metadata::table::{CompressorConfig, TableMetadata};
pub use store::{LocalBackend, ObjectStoreBackend, StorageBackend};
pub use table::{Record, Table};
pub use types::{ArrayOrder, DataType, Endian, FieldValue, ScalarType, Value};
