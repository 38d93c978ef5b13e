//! End-to-end exercises over in-memory chunked transports: insert
//! serialization feeding the block reader, dictionary wire checks, and
//! mid-stream server exception extraction.

use bytes::Bytes;
use clickhouse_client::native::{NativeReader, ReadContext};
use clickhouse_client::{Error, InsertContext, Value, get_type, typed_variant};
use ch_driver::bridge::BridgeReader;
use ch_driver::compression::{ContentEncoding, StreamDecompressor};
use ch_types::ByteSource;

fn decode_chunks(chunks: Vec<Bytes>) -> Vec<clickhouse_client::Block> {
    let mut reader = NativeReader::new(ByteSource::from_chunks(chunks), ReadContext::default());
    let mut blocks = Vec::new();
    while let Some(block) = reader.next_block().unwrap() {
        blocks.push(block);
    }
    blocks
}

#[test]
fn string_and_nullable_int_round_trip() {
    let rows = vec![
        vec![Value::UInt32(1), Value::Int8(1), Value::String("a".to_owned())],
        vec![Value::UInt32(2), Value::Null, Value::String("—".to_owned())],
        vec![Value::UInt32(3), Value::Int8(3), Value::String("ω".to_owned())],
    ];
    let ctx = InsertContext::new(
        "t",
        vec!["id".to_owned(), "val".to_owned(), "note".to_owned()],
        vec![
            get_type("UInt32").unwrap(),
            get_type("Nullable(Int8)").unwrap(),
            get_type("String").unwrap(),
        ],
    )
    .rows(rows.clone());
    let (chunks, error_slot) = ctx.into_chunks();
    let blocks = decode_chunks(chunks.collect());
    assert!(error_slot.lock().is_none());

    let decoded: Vec<Vec<Value>> = blocks.iter().flat_map(|b| b.rows()).collect();
    assert_eq!(decoded, rows);
    // The null landed exactly where it was inserted.
    assert_eq!(decoded[1][1], Value::Null);
    assert_eq!(decoded[0][1], Value::Int8(1));
}

#[test]
fn variant_disambiguation_end_to_end() {
    let rows = vec![
        vec![typed_variant(
            Value::Array(vec![Value::UInt32(1), Value::UInt32(2), Value::UInt32(3)]),
            "Array(UInt32)",
        )],
        vec![typed_variant(
            Value::Array(vec![Value::String("x".to_owned()), Value::String("y".to_owned())]),
            "Array(String)",
        )],
    ];
    let ctx = InsertContext::new(
        "t",
        vec!["v".to_owned()],
        vec![get_type("Variant(Array(UInt32), Array(String))").unwrap()],
    )
    .rows(rows);
    let (chunks, error_slot) = ctx.into_chunks();
    let blocks = decode_chunks(chunks.collect());
    assert!(error_slot.lock().is_none());

    let decoded: Vec<Value> = blocks
        .iter()
        .flat_map(|b| b.columns[0].iter().cloned())
        .collect();
    assert_eq!(
        decoded[0],
        Value::Array(vec![Value::UInt32(1), Value::UInt32(2), Value::UInt32(3)])
    );
    assert_eq!(
        decoded[1],
        Value::Array(vec![
            Value::String("x".to_owned()),
            Value::String("y".to_owned())
        ])
    );
    // Element types survive exactly: unsigned ints on one side, strings
    // on the other.
    match (&decoded[0], &decoded[1]) {
        (Value::Array(nums), Value::Array(strs)) => {
            assert!(nums.iter().all(|v| matches!(v, Value::UInt32(_))));
            assert!(strs.iter().all(|v| matches!(v, Value::String(_))));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn low_cardinality_thirty_thousand_keys() {
    let rows: Vec<Vec<Value>> = (0..30_000)
        .map(|i| vec![Value::String(format!("key-{i:05}"))])
        .collect();
    let mut ctx = InsertContext::new(
        "t",
        vec!["k".to_owned()],
        vec![get_type("LowCardinality(Nullable(String))").unwrap()],
    )
    .rows(rows);
    ctx.block_row_count = 40_000;
    ctx.block_max_bytes = usize::MAX >> 1;
    let (chunks, _slot) = ctx.into_chunks();
    let encoded: Vec<Bytes> = chunks.collect();

    // Wire check: skip the block header (counts, name, type name) and
    // the dictionary version, then the flags word's low byte must select
    // 2-byte indices.
    let mut src = ByteSource::from_bytes(encoded[0].clone());
    src.read_leb128().unwrap();
    src.read_leb128().unwrap();
    src.read_leb128_str().unwrap();
    src.read_leb128_str().unwrap();
    assert_eq!(src.read_u64().unwrap(), 1);
    let key_flags = src.read_u64().unwrap();
    assert_eq!(key_flags & 0xff, 1, "expected 2-byte dictionary indices");

    let blocks = decode_chunks(encoded);
    let mut distinct: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut total = 0usize;
    for block in &blocks {
        for v in &block.columns[0] {
            total += 1;
            distinct.insert(v.as_str().unwrap().to_owned());
        }
    }
    assert_eq!(total, 30_000);
    assert_eq!(distinct.len(), 30_000);
}

#[test]
fn mid_stream_exception_surfaces_stream_failure() {
    // A healthy first block, then the server aborts and embeds a tagged
    // exception in the body.
    let ctx = InsertContext::new(
        "t",
        vec!["n".to_owned()],
        vec![get_type("UInt64").unwrap()],
    )
    .rows((0..100u64).map(|i| vec![Value::UInt64(i)]).collect());
    let (chunks, _slot) = ctx.into_chunks();
    let mut body: Vec<u8> = Vec::new();
    for chunk in chunks {
        body.extend_from_slice(&chunk);
    }
    let tag = "a1b2c3d4e5f67890";
    let message = "Code: 395. DB::Exception: Value passed to 'throwIf' function is non-zero";
    body.extend_from_slice(
        format!("__exception__{tag}\r\n{message}\r\n{} {tag}__exception__\r\n", message.len())
            .as_bytes(),
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let (tx, rx) = tokio::sync::mpsc::channel(4);
    let chunks: Vec<Bytes> = body.chunks(97).map(Bytes::copy_from_slice).collect();
    rt.spawn(async move {
        for chunk in chunks {
            if tx.send(Ok(chunk)).await.is_err() {
                break;
            }
        }
    });
    let reader = BridgeReader::new(
        rx,
        StreamDecompressor::new(ContentEncoding::Identity).unwrap(),
        Some(tag.to_owned()),
    );
    let mut native = NativeReader::new(ByteSource::new(Box::new(reader)), ReadContext::default());

    let mut rows = 0usize;
    let err = loop {
        match native.next_block() {
            Ok(Some(block)) => rows += block.num_rows,
            Ok(None) => panic!("expected a stream failure"),
            Err(err) => break err,
        }
    };
    assert_eq!(rows, 100);
    match err {
        Error::StreamFailure(text) => {
            assert!(text.contains("throwIf"), "{text}");
            assert!(text.contains("395"), "{text}");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn map_of_tuples_with_zoned_datetime() {
    let tz = clickhouse_client::Tz::named("UTC").unwrap();
    let dt = tz.datetime_from_parts(1_700_000_000, 123_456_000);
    let rows = vec![vec![Value::Map(vec![(
        Value::String("a".to_owned()),
        Value::Tuple(vec![Value::UInt32(1), Value::DateTimeTz(dt)]),
    )])]];
    let ctx = InsertContext::new(
        "t",
        vec!["m".to_owned()],
        vec![get_type("Map(String, Tuple(UInt32, Nullable(DateTime64(6, 'UTC'))))").unwrap()],
    )
    .rows(rows);
    let (chunks, error_slot) = ctx.into_chunks();
    let blocks = decode_chunks(chunks.collect());
    assert!(error_slot.lock().is_none());
    // UTC is a UTC-equivalent zone: default policy decodes it naive.
    match &blocks[0].columns[0][0] {
        Value::Map(entries) => match &entries[0].1 {
            Value::Tuple(items) => match &items[1] {
                Value::DateTime(naive) => {
                    assert_eq!(naive.and_utc().timestamp(), 1_700_000_000);
                }
                other => panic!("expected naive datetime, got {other:?}"),
            },
            other => panic!("expected tuple, got {other:?}"),
        },
        other => panic!("expected map, got {other:?}"),
    }
}
