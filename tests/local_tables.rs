use std::sync::Arc;

use serde_json::json;
use simpletables::{
    CompressorConfig, DataType, Endian, FieldSpec, FieldValue, LocalBackend, Location, Record,
    ScalarType, TableError, TableOptions, TablesConfig, Value,
};

fn reading_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::scalar("id", ScalarType::new(DataType::UInt32, Endian::Little)),
        FieldSpec::scalar("val", ScalarType::new(DataType::Float64, Endian::Little)),
    ]
}

fn reading(id: u32) -> Record {
    vec![
        ("id".into(), FieldValue::Scalar(Value::UInt32(id))),
        ("val".into(), FieldValue::Scalar(Value::Float64(id as f64 * 0.5))),
    ]
}

/// 12-byte rows in chunks of 5 rows.
fn small_chunks() -> TablesConfig {
    TablesConfig {
        buffer_unit: 12,
        chunk_times: 1,
        ..TablesConfig::default()
    }
}

fn ids(records: &[Record]) -> Vec<u32> {
    records
        .iter()
        .map(|r| match &r[0].1 {
            FieldValue::Scalar(Value::UInt32(id)) => *id,
            other => panic!("unexpected id value {other:?}"),
        })
        .collect()
}

#[tokio::test]
async fn field_format_of_created_table() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalBackend::new(dir.path()));
    let mut root = Location::create(store.clone(), "").await.unwrap();

    let fields = vec![
        FieldSpec::scalar("name", ScalarType::new(DataType::String(16), Endian::NotApplicable)),
        FieldSpec::array(
            "pos",
            ScalarType::new(DataType::Float32, Endian::Little),
            vec![3],
        ),
        FieldSpec::nested(
            "info",
            vec![
                FieldSpec::scalar("flag", ScalarType::new(DataType::Bool, Endian::NotApplicable)),
                FieldSpec::array(
                    "grid",
                    ScalarType::new(DataType::Int16, Endian::Little),
                    vec![2, 2],
                ),
            ],
        ),
    ];
    root.create_table(
        "particles",
        fields,
        TableOptions {
            title: "particle data".into(),
            ..TableOptions::default()
        },
    )
    .await
    .unwrap();

    let layout = root.get_field_format("particles").await.unwrap();
    assert_eq!(layout.format, "<16s(3)f?(2,2)h");
    assert_eq!(layout.row_size, 16 + 12 + 1 + 8);

    let shapes: Vec<_> = layout.fields.iter().map(|f| f.shape.clone()).collect();
    let sizes: Vec<_> = layout.fields.iter().map(|f| f.size).collect();
    let names: Vec<_> = layout.names().collect();
    assert_eq!(shapes, vec![vec![], vec![3], vec![], vec![2, 2]]);
    assert_eq!(sizes, vec![16, 4, 1, 2]);
    assert_eq!(names, vec!["name", "pos", "info/flag", "info/grid"]);

    let table = root.open_table("particles").await.unwrap();
    let attrs = table.attributes().await.unwrap();
    assert_eq!(attrs["CLASS"], "TABLE");
    assert_eq!(attrs["TITLE"], "particle data");
    assert_eq!(table.nrows(), 0);

    assert_eq!(root.list_tables().await.unwrap(), vec!["particles"]);
}

#[tokio::test]
async fn append_and_read_across_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalBackend::new(dir.path()));
    let mut root = Location::create(store.clone(), "run1")
        .await
        .unwrap()
        .with_config(small_chunks());

    let options = TableOptions {
        compressor: Some(CompressorConfig::new("zlib").with_level(3)),
        expected_rows: Some(100),
        ..TableOptions::default()
    };
    let mut table = root
        .create_table("readings", reading_fields(), options)
        .await
        .unwrap();
    assert_eq!(table.chunk_rows(), 5);
    assert_eq!(table.buffer_rows(), 5);

    let first: Vec<Record> = (0..12).map(reading).collect();
    table.append(&first).await.unwrap();
    assert_eq!(table.nrows(), 12);

    let middle = table.read_records(3, 11).await.unwrap();
    assert_eq!(ids(&middle), (3..11).collect::<Vec<_>>());
    assert_eq!(middle[0], reading(3));

    // Partially filled last chunk gets extended in place.
    let second: Vec<Record> = (12..14).map(reading).collect();
    table.append(&second).await.unwrap();

    let reopened = root.open_table("readings").await.unwrap();
    assert_eq!(reopened.nrows(), 14);
    let all = reopened.read_records(0, usize::MAX).await.unwrap();
    assert_eq!(ids(&all), (0..14).collect::<Vec<_>>());
    assert_eq!(all[13], reading(13));

    assert!(reopened.read_records(20, 30).await.unwrap().is_empty());
    assert!(reopened.read_records(5, 2).await.unwrap().is_empty());
}

#[tokio::test]
async fn truncate_shrinks_the_table() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalBackend::new(dir.path()));
    let mut root = Location::create(store, "")
        .await
        .unwrap()
        .with_config(small_chunks());
    let mut table = root
        .create_table("t", reading_fields(), TableOptions::default())
        .await
        .unwrap();
    table.append(&(0..8).map(reading).collect::<Vec<_>>()).await.unwrap();

    assert!(matches!(
        table.truncate(0).await,
        Err(TableError::InvalidArgument(_))
    ));
    assert!(matches!(
        table.truncate(9).await,
        Err(TableError::InvalidArgument(_))
    ));
    table.truncate(6).await.unwrap();

    let reopened = root.open_table("t").await.unwrap();
    assert_eq!(reopened.nrows(), 6);

    // Appending after a truncate overwrites the dropped rows.
    table.append(&[reading(100)]).await.unwrap();
    let all = table.read_records(0, 10).await.unwrap();
    assert_eq!(ids(&all), vec![0, 1, 2, 3, 4, 5, 100]);
}

#[tokio::test]
async fn failed_resize_keeps_the_row_count() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalBackend::new(dir.path()));
    let mut root = Location::create(store, "").await.unwrap();
    let mut table = root
        .create_table("t", reading_fields(), TableOptions::default())
        .await
        .unwrap();
    table.append(&(0..8).map(reading).collect::<Vec<_>>()).await.unwrap();

    // A directory where `.zarray` should be makes the rewrite fail.
    let zarray = dir.path().join("t").join(".zarray");
    std::fs::remove_file(&zarray).unwrap();
    std::fs::create_dir(&zarray).unwrap();

    assert!(table.truncate(6).await.is_err());
    assert_eq!(table.nrows(), 8);
    assert_eq!(table.read_records(0, 10).await.unwrap().len(), 8);
}

#[tokio::test]
async fn strided_reads_and_copies() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalBackend::new(dir.path()));
    let mut root = Location::create(store.clone(), "")
        .await
        .unwrap()
        .with_config(small_chunks());
    let mut blosc = CompressorConfig::new("blosc");
    blosc.config.insert("cname".into(), json!("zstd"));
    blosc.config.insert("clevel".into(), json!(5));
    blosc.config.insert("shuffle".into(), json!(1));
    let options = TableOptions {
        title: "source".into(),
        expected_rows: Some(100),
        compressor: Some(blosc),
    };
    let mut source = root.create_table("src", reading_fields(), options).await.unwrap();
    source.append(&(0..23).map(reading).collect::<Vec<_>>()).await.unwrap();

    let every_third = source.read_records_step(1, 20, 3).await.unwrap();
    assert_eq!(ids(&every_third), vec![1, 4, 7, 10, 13, 16, 19]);
    assert!(matches!(
        source.read_records_step(0, 5, 0).await,
        Err(TableError::InvalidArgument(_))
    ));

    let mut dest = Location::create(store, "copies")
        .await
        .unwrap()
        .with_config(small_chunks());
    let copy = source
        .copy_to(&mut dest, "odd", 1, usize::MAX, 2, TableOptions::default())
        .await
        .unwrap();
    assert_eq!(copy.nrows(), 11);
    assert_eq!(copy.metadata().compressor, source.metadata().compressor);
    assert_eq!(copy.attributes().await.unwrap()["TITLE"], "source");

    let reopened = dest.open_table("odd").await.unwrap();
    let rows = reopened.read_records(0, usize::MAX).await.unwrap();
    assert_eq!(ids(&rows), (1..23).step_by(2).collect::<Vec<_>>());
    assert_eq!(rows[10], reading(21));
    assert_eq!(dest.list_tables().await.unwrap(), vec!["odd"]);
}

#[tokio::test]
async fn oversized_field_is_a_metadata_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".zgroup"), br#"{"zarr_format": 2}"#).unwrap();
    std::fs::create_dir(dir.path().join("t")).unwrap();
    let zarray = json!({
        "shape": [1],
        "chunks": [1],
        "dtype": [["a", "<f8", [4294967296u64, 4294967296u64]]]
    });
    std::fs::write(
        dir.path().join("t/.zarray"),
        serde_json::to_vec(&zarray).unwrap(),
    )
    .unwrap();

    let store = Arc::new(LocalBackend::new(dir.path()));
    let root = Location::open(store, "").await.unwrap();
    assert!(matches!(
        root.get_field_format("t").await,
        Err(TableError::Metadata(_))
    ));
    assert!(matches!(
        root.open_table("t").await,
        Err(TableError::Metadata(_))
    ));
}

#[tokio::test]
async fn missing_chunk_reads_as_zero_rows() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalBackend::new(dir.path()));
    let mut root = Location::create(store, "")
        .await
        .unwrap()
        .with_config(small_chunks());
    let options = TableOptions {
        expected_rows: Some(100),
        ..TableOptions::default()
    };
    let mut table = root.create_table("t", reading_fields(), options).await.unwrap();
    assert_eq!(table.chunk_rows(), 5);
    table.append(&(1..11).map(reading).collect::<Vec<_>>()).await.unwrap();

    std::fs::remove_file(dir.path().join("t").join("0")).unwrap();
    let all = table.read_records(0, 10).await.unwrap();
    assert_eq!(ids(&all), vec![0, 0, 0, 0, 0, 6, 7, 8, 9, 10]);
}

#[tokio::test]
async fn hand_written_big_endian_table() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".zgroup"), br#"{"zarr_format": 2}"#).unwrap();
    std::fs::create_dir(dir.path().join("events")).unwrap();
    let zarray = json!({
        "zarr_format": 2,
        "shape": [2],
        "chunks": [2],
        "dtype": [["n", ">i2"], ["hit", [["t", ">M8[ns]"], ["e", ">f4"]]]],
        "fill_value": null,
        "order": "C",
        "compressor": null,
        "filters": null
    });
    std::fs::write(
        dir.path().join("events/.zarray"),
        serde_json::to_vec(&zarray).unwrap(),
    )
    .unwrap();

    let mut chunk = Vec::new();
    for (n, t, e) in [(1i16, 1_000i64, 0.25f32), (-2, 2_000, 4.0)] {
        chunk.extend_from_slice(&n.to_be_bytes());
        chunk.extend_from_slice(&t.to_be_bytes());
        chunk.extend_from_slice(&e.to_be_bytes());
    }
    std::fs::write(dir.path().join("events/0"), &chunk).unwrap();

    let store = Arc::new(LocalBackend::new(dir.path()));
    let root = Location::open(store, "").await.unwrap();

    let layout = root.get_field_format("events").await.unwrap();
    assert_eq!(layout.format, ">hqf");
    let t = layout.field("hit/t").unwrap();
    assert_eq!(t.offset, 2);
    assert_eq!(t.dtype.time_unit.as_deref(), Some("ns"));

    let table = root.open_table("events").await.unwrap();
    let rows = table.read_records(0, 2).await.unwrap();
    assert_eq!(rows[1][0].1, FieldValue::Scalar(Value::Int16(-2)));
    assert_eq!(rows[1][1].1, FieldValue::Scalar(Value::DateTime64(2_000)));
    assert_eq!(rows[0][2].1, FieldValue::Scalar(Value::Float32(0.25)));
}

#[tokio::test]
async fn lookup_failures() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalBackend::new(dir.path()));

    assert!(matches!(
        Location::open(store.clone(), "nowhere").await,
        Err(TableError::NotFound(_))
    ));

    let mut root = Location::create(store.clone(), "").await.unwrap();
    assert!(matches!(
        root.get_field_format("absent").await,
        Err(TableError::NotFound(_))
    ));
    assert!(matches!(
        root.get_field_format("../escape").await,
        Err(TableError::InvalidName(_))
    ));

    std::fs::create_dir(dir.path().join("image")).unwrap();
    std::fs::write(
        dir.path().join("image/.zarray"),
        br#"{"shape": [4, 4], "chunks": [2, 2], "dtype": "<f4", "fill_value": 0}"#,
    )
    .unwrap();
    assert!(matches!(
        root.get_field_format("image").await,
        Err(TableError::NotATable(_))
    ));
    assert!(root.list_tables().await.unwrap().is_empty());

    root.create_table("t", reading_fields(), TableOptions::default())
        .await
        .unwrap();
    assert!(matches!(
        root.create_table("t", reading_fields(), TableOptions::default())
            .await,
        Err(TableError::AlreadyExists(_))
    ));
    assert!(matches!(
        root.create_table("a/b", reading_fields(), TableOptions::default())
            .await,
        Err(TableError::InvalidName(_))
    ));
    assert!(matches!(
        root.create_table(
            "c",
            reading_fields(),
            TableOptions {
                compressor: Some(CompressorConfig::new("bz2")),
                ..TableOptions::default()
            }
        )
        .await,
        Err(TableError::Unsupported(_))
    ));
}

#[tokio::test]
async fn consolidated_metadata_answers_lookups() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".zgroup"), br#"{"zarr_format": 2}"#).unwrap();
    let zmetadata = json!({
        "zarr_consolidated_format": 1,
        "metadata": {
            ".zgroup": {"zarr_format": 2},
            "beta/.zarray": {
                "shape": [0], "chunks": [16],
                "dtype": [["a", "<i8"], ["b", "<U4"]]
            },
            "alpha/.zarray": {
                "shape": [0], "chunks": [16],
                "dtype": [["x", "<f2", [4]]]
            },
            "deep/gamma/.zarray": {
                "shape": [0], "chunks": [16],
                "dtype": [["y", "<u8"]]
            }
        }
    });
    std::fs::write(
        dir.path().join(".zmetadata"),
        serde_json::to_vec(&zmetadata).unwrap(),
    )
    .unwrap();

    let store = Arc::new(LocalBackend::new(dir.path()));
    let root = Location::open(store, "").await.unwrap();
    assert!(root.is_consolidated());
    assert_eq!(root.list_tables().await.unwrap(), vec!["alpha", "beta"]);

    // No per-table documents exist on disk.
    assert_eq!(root.get_field_format("beta").await.unwrap().format, "<q4w");
    assert_eq!(root.get_field_format("alpha").await.unwrap().format, "<(4)e");
    assert_eq!(root.get_field_format("deep/gamma").await.unwrap().format, "<Q");
}

#[tokio::test]
async fn tables_created_in_a_consolidated_group_are_listed() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".zgroup"), br#"{"zarr_format": 2}"#).unwrap();
    let zmetadata = json!({
        "zarr_consolidated_format": 1,
        "metadata": {".zattrs": {"owner": "lab"}}
    });
    std::fs::write(
        dir.path().join(".zmetadata"),
        serde_json::to_vec(&zmetadata).unwrap(),
    )
    .unwrap();

    let store = Arc::new(LocalBackend::new(dir.path()));
    let mut root = Location::open(store.clone(), "").await.unwrap();
    assert!(root.list_tables().await.unwrap().is_empty());

    let fields = vec![FieldSpec::scalar(
        "x",
        ScalarType::new(DataType::Int32, Endian::Little),
    )];
    root.create_table("fresh", fields, TableOptions::default())
        .await
        .unwrap();
    assert_eq!(root.get_field_format("fresh").await.unwrap().format, "<i");
    assert_eq!(root.list_tables().await.unwrap(), vec!["fresh"]);

    let reopened = Location::open(store, "").await.unwrap();
    assert!(reopened.is_consolidated());
    assert_eq!(reopened.list_tables().await.unwrap(), vec!["fresh"]);

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join(".zmetadata")).unwrap()).unwrap();
    assert_eq!(raw["metadata"][".zattrs"]["owner"], "lab");
    assert_eq!(raw["metadata"]["fresh/.zattrs"]["CLASS"], "TABLE");
}
