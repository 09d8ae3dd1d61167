//! Tests for reading data files back
//!
//! These tests verify:
//! - Prefix lookups through the hash tables, including wrapped entries
//! - Exact lookups and lower bounds over the sorted key range
//! - History records hang off their current key, newest first
//! - Update buckets in ascending sequence order with absolute pointers
//! - Notes shared by many entries are stored once, and only identical ones merge
//! - Corrupt counts on disk are rejected instead of trusted

use bytes::Bytes;
use sabot::disk::{CachePolicy, CompletionTrigger, Engine, MemoryEngine, Priority, VolumeManager};
use sabot::sabot::get_hash;
use sabot::{Config, DataFile, DataFileReader, IndexId, MemoryLayer, SabotError, Type, Update, Value};

const BLOCK_SIZE: usize = 512;

// =============================================================================
// Helper Functions
// =============================================================================

fn config() -> Config {
    Config::builder().block_size(BLOCK_SIZE).build()
}

fn index() -> IndexId {
    IndexId::from_u128(1)
}

fn key(n: i32, s: &str) -> Value {
    Value::tuple([Value::Int32(n), Value::str(s)])
}

fn update(seq: u64, entries: &[(Value, Value)]) -> Update {
    let mut update = Update::new(seq, &Value::str(format!("meta-{}", seq)), &Value::UInt64(seq)).unwrap();
    for (k, v) in entries {
        update.add_entry(index(), k, v).unwrap();
    }
    update
}

fn build(engine: &MemoryEngine, mut layer: MemoryLayer) -> DataFile {
    DataFile::write(engine, &mut layer, 1, 1, &config()).unwrap()
}

fn open<'a>(engine: &'a MemoryEngine, file: &DataFile) -> DataFileReader<'a> {
    DataFileReader::for_file(engine.volume(), file.info(), &config()).unwrap()
}

/// (1,"a") at seq 1 and 5, (2,"b") at seq 3
fn example_layer() -> MemoryLayer {
    let mut layer = MemoryLayer::new();
    layer.push(update(1, &[(key(1, "a"), Value::str("v1"))]));
    layer.push(update(5, &[(key(1, "a"), Value::str("v2"))]));
    layer.push(update(3, &[(key(2, "b"), Value::str("v3"))]));
    layer
}

fn single(i: i64) -> Value {
    Value::tuple([Value::Int64(i)])
}

/// First `count` single-field keys landing in `bucket` of a 97-slot table
fn keys_in_bucket(bucket: u64, count: usize, skip: usize) -> Vec<i64> {
    (0i64..)
        .filter(|&i| get_hash(&single(i)) % 97 == bucket)
        .skip(skip)
        .take(count)
        .collect()
}

// =============================================================================
// Hash Lookup Tests
// =============================================================================

#[test]
fn test_prefix_lookup_returns_newest_revision() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let file = build(&engine, example_layer());
    let reader = open(&engine, &file);
    let index = reader.index(&index()).unwrap();

    let item = index
        .find_in_hash(&Value::tuple([Value::Int32(1), Value::free(Type::Str)]))
        .unwrap()
        .unwrap();

    assert_eq!(item.seq, 5);
    assert_eq!(item.key, key(1, "a"));
    assert_eq!(item.value, Value::str("v2"));
}

#[test]
fn test_full_key_lookup() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let file = build(&engine, example_layer());
    let reader = open(&engine, &file);
    let index = reader.index(&index()).unwrap();

    let item = index.find_in_hash(&key(2, "b")).unwrap().unwrap();
    assert_eq!(item.seq, 3);
    assert_eq!(item.value, Value::str("v3"));

    // A short tuple is the same as a Free-padded one
    let short = index.find_in_hash(&Value::tuple([Value::Int32(2)])).unwrap().unwrap();
    assert_eq!(short.offset, item.offset);
}

#[test]
fn test_missing_keys() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let file = build(&engine, example_layer());
    let reader = open(&engine, &file);
    let index = reader.index(&index()).unwrap();

    assert!(index.find_in_hash(&key(1, "b")).unwrap().is_none());
    assert!(index
        .find_in_hash(&Value::tuple([Value::Int32(3), Value::free(Type::Str)]))
        .unwrap()
        .is_none());
}

#[test]
fn test_no_defined_fields_returns_first_key() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let file = build(&engine, example_layer());
    let reader = open(&engine, &file);
    let index = reader.index(&index()).unwrap();

    let item = index
        .find_in_hash(&Value::tuple([Value::free(Type::Int32), Value::free(Type::Str)]))
        .unwrap()
        .unwrap();

    assert_eq!(item.key, key(1, "a"));
}

#[test]
fn test_more_fields_than_tables() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let file = build(&engine, example_layer());
    let reader = open(&engine, &file);
    let index = reader.index(&index()).unwrap();
    let long = Value::tuple([Value::Int32(1), Value::str("a"), Value::Bool(true)]);

    assert_eq!(index.hash_tables().len(), 2);
    assert!(index.find_in_hash(&long).unwrap().is_none());
}

#[test]
fn test_non_tuple_lookup_unsupported() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let file = build(&engine, example_layer());
    let reader = open(&engine, &file);
    let index = reader.index(&index()).unwrap();

    assert!(matches!(
        index.find_in_hash(&Value::Int32(1)),
        Err(SabotError::Unsupported(_))
    ));
}

#[test]
fn test_one_slot_per_distinct_prefix() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let mut layer = MemoryLayer::new();
    layer.push(update(
        1,
        &[
            (key(1, "a"), Value::Void),
            (key(1, "b"), Value::Void),
            (key(1, "c"), Value::Void),
            (key(2, "a"), Value::Void),
        ],
    ));
    let file = build(&engine, layer);
    let reader = open(&engine, &file);
    let index = reader.index(&index()).unwrap();

    let short = index.hash_slots(1).unwrap();
    assert_eq!(short.len(), 2);
    let long = index.hash_slots(2).unwrap();
    assert_eq!(long.len(), 4);

    // The prefix (1) points at the first key that has it
    let (_, prefix, offset) = short
        .iter()
        .find(|(_, p, _)| *p == Value::tuple([Value::Int32(1)]))
        .unwrap()
        .clone();
    assert_eq!(prefix, Value::tuple([Value::Int32(1)]));
    assert_eq!(offset, index.key_index_offset());

    assert!(matches!(index.hash_slots(0), Err(SabotError::NotFound(_))));
    assert!(matches!(index.hash_slots(3), Err(SabotError::NotFound(_))));
}

#[test]
fn test_wrapped_entries_fill_table_start() {
    let late = keys_in_bucket(96, 12, 0);
    let early = keys_in_bucket(0, 3, 0);
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let mut layer = MemoryLayer::new();
    let entries: Vec<(Value, Value)> = late
        .iter()
        .chain(&early)
        .map(|&i| (single(i), Value::Int64(i * 10)))
        .collect();
    layer.push(update(1, &entries));

    let file = build(&engine, layer);
    let reader = open(&engine, &file);
    let index = reader.index(&index()).unwrap();

    assert_eq!(index.hash_tables()[0].1, 97);
    let slots: Vec<u64> = index.hash_slots(1).unwrap().into_iter().map(|(s, _, _)| s).collect();
    let mut expected: Vec<u64> = (0..=13).collect();
    expected.push(96);
    assert_eq!(slots, expected);

    for &i in late.iter().chain(&early) {
        let item = index.find_in_hash(&single(i)).unwrap().unwrap();
        assert_eq!(item.value, Value::Int64(i * 10), "key {}", i);
    }

    // Absent keys stop at a larger bucket or at an empty slot
    let absent_early = keys_in_bucket(0, 1, 3)[0];
    let absent_late = keys_in_bucket(96, 1, 12)[0];
    assert!(index.find_in_hash(&single(absent_early)).unwrap().is_none());
    assert!(index.find_in_hash(&single(absent_late)).unwrap().is_none());
}

// =============================================================================
// Key Range Tests
// =============================================================================

#[test]
fn test_current_keys_in_key_order() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let file = build(&engine, example_layer());
    let reader = open(&engine, &file);
    let index = reader.index(&index()).unwrap();

    let keys: Vec<Value> = index.current_keys().unwrap().into_iter().map(|k| k.key).collect();
    assert_eq!(keys, vec![key(1, "a"), key(2, "b")]);
    assert_eq!(index.num_cur_keys(), 2);
    assert_eq!(index.num_hist_keys(), 1);
}

#[test]
fn test_history_of_key() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let file = build(&engine, example_layer());
    let reader = open(&engine, &file);
    let index = reader.index(&index()).unwrap();

    let first = index.nth_key(0).unwrap();
    assert_eq!(first.num_hist, 1);
    assert_eq!(first.hist_offset, 0);
    let history = index.history_of(&first).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].seq, 1);
    assert_eq!(history[0].key, key(1, "a"));
    assert_eq!(history[0].value, Value::str("v1"));
    assert_eq!(history[0].offset, index.history_offset());

    let second = index.nth_key(1).unwrap();
    assert_eq!(second.num_hist, 0);
    assert!(index.history_of(&second).unwrap().is_empty());
}

#[test]
fn test_history_is_newest_first() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let mut layer = MemoryLayer::new();
    for seq in [4, 2, 9, 6] {
        layer.push(update(seq, &[(key(1, "a"), Value::UInt64(seq))]));
    }
    let file = build(&engine, layer);
    let reader = open(&engine, &file);
    let index = reader.index(&index()).unwrap();

    let current = index.nth_key(0).unwrap();
    assert_eq!(current.seq, 9);
    let seqs: Vec<u64> = index.history_of(&current).unwrap().iter().map(|h| h.seq).collect();
    assert_eq!(seqs, vec![6, 4, 2]);
}

#[test]
fn test_lower_bound_and_find() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let file = build(&engine, example_layer());
    let reader = open(&engine, &file);
    let index = reader.index(&index()).unwrap();

    assert_eq!(index.binary_lower_bound(&key(0, "z")).unwrap(), 0);
    assert_eq!(index.binary_lower_bound(&key(1, "a")).unwrap(), 0);
    assert_eq!(index.binary_lower_bound(&key(2, "a")).unwrap(), 1);
    assert_eq!(index.binary_lower_bound(&key(9, "x")).unwrap(), 2);

    assert_eq!(index.find(&key(2, "b")).unwrap().unwrap().value, Value::str("v3"));
    assert!(index.find(&key(2, "c")).unwrap().is_none());
    assert!(index.find(&key(9, "x")).unwrap().is_none());
}

#[test]
fn test_key_at_rejects_bad_offsets() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let file = build(&engine, example_layer());
    let reader = open(&engine, &file);
    let index = reader.index(&index()).unwrap();

    assert!(matches!(
        index.key_at(index.key_index_offset() + 1),
        Err(SabotError::NotFound(_))
    ));
    assert!(matches!(
        index.key_at(index.history_offset()),
        Err(SabotError::NotFound(_))
    ));
    assert!(index.key_at(index.key_index_offset()).is_ok());
}

#[test]
fn test_unknown_index() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let file = build(&engine, example_layer());
    let reader = open(&engine, &file);

    assert!(reader.index(&IndexId::from_u128(99)).is_none());
    assert_eq!(reader.index_ids(), vec![index()]);
}

// =============================================================================
// Update Index Tests
// =============================================================================

#[test]
fn test_update_buckets_ascend_by_seq() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let file = build(&engine, example_layer());
    let reader = open(&engine, &file);
    let index = reader.index(&index()).unwrap();
    let kio = index.key_index_offset();

    let buckets = reader.updates().unwrap();
    let seqs: Vec<u64> = buckets.iter().map(|b| b.seq).collect();
    assert_eq!(seqs, vec![1, 3, 5]);

    // seq 1 only survives as history, seq 3 and 5 as current keys
    assert_eq!(buckets[0].pointers, vec![index.history_offset()]);
    assert_eq!(buckets[1].pointers, vec![kio + sabot::data_file::KEY_ENTRY_SIZE]);
    assert_eq!(buckets[2].pointers, vec![kio]);

    assert_eq!(buckets[1].meta, Value::str("meta-3"));
    assert_eq!(buckets[1].id, Value::UInt64(3));
    assert_eq!(reader.lowest_seq().unwrap(), 1);
    assert_eq!(reader.highest_seq().unwrap(), 5);
}

#[test]
fn test_shared_seq_merges_buckets() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let mut layer = MemoryLayer::new();
    layer.push(update(4, &[(key(1, "a"), Value::Void)]));
    layer.push(update(4, &[(key(2, "a"), Value::Void)]));
    let file = build(&engine, layer);
    let reader = open(&engine, &file);

    assert_eq!(reader.num_updates(), 2);
    let buckets = reader.updates().unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].pointers.len(), 2);
    assert!(buckets[0].pointers[0] < buckets[0].pointers[1]);
}

#[test]
fn test_bucket_pointers_follow_index_order() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let mut layer = MemoryLayer::new();
    let mut update = Update::new(1, &Value::Void, &Value::UInt64(1)).unwrap();
    update
        .add_entry(IndexId::from_u128(2), &Value::tuple([Value::str("x")]), &Value::Bool(true))
        .unwrap();
    update.add_entry(index(), &key(1, "a"), &Value::Bool(false)).unwrap();
    layer.push(update);
    let file = build(&engine, layer);
    let reader = open(&engine, &file);

    let first = reader.index(&index()).unwrap();
    let second = reader.index(&IndexId::from_u128(2)).unwrap();
    let buckets = reader.updates().unwrap();

    assert_eq!(reader.index_ids(), vec![index(), IndexId::from_u128(2)]);
    assert_eq!(
        buckets[0].pointers,
        vec![first.key_index_offset(), second.key_index_offset()]
    );
    assert_eq!(
        second.find_in_hash(&Value::tuple([Value::str("x")])).unwrap().unwrap().value,
        Value::Bool(true)
    );
}

// =============================================================================
// Arena Dedup Tests
// =============================================================================

#[test]
fn test_shared_values_stored_once() {
    let colors = ["red", "green", "blue"];
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let mut layer = MemoryLayer::new();
    for seq in 0..10u64 {
        let mut update = Update::new(seq + 1, &Value::Void, &Value::UInt64(seq)).unwrap();
        for j in 0..10 {
            let n = (seq * 10 + j) as i32;
            update
                .add_entry(index(), &Value::tuple([Value::Int32(n)]), &Value::str(colors[n as usize % 3]))
                .unwrap();
        }
        layer.push(update);
    }

    let file = build(&engine, layer);
    let reader = open(&engine, &file);
    let index = reader.index(&index()).unwrap();

    assert_eq!(reader.main_arena().note_count, 3);
    assert_eq!(reader.main_arena().boundaries, vec![0]);
    assert_eq!(index.arena().note_count, 100);
    assert_eq!(reader.updates().unwrap().len(), 10);
    for n in [0, 1, 2, 50, 99] {
        let item = index.find(&Value::tuple([Value::Int32(n)])).unwrap().unwrap();
        assert_eq!(item.value, Value::str(colors[n as usize % 3]));
    }
}

#[test]
fn test_equal_comparing_values_with_distinct_encodings_stay_apart() {
    let doubles = |d: f64| Value::vector(Type::Double, vec![Value::Double(d)]).unwrap();
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let mut layer = MemoryLayer::new();
    let mut update = Update::new(1, &Value::Void, &Value::UInt64(1)).unwrap();
    for (n, d) in [(0, 0.0), (1, -0.0), (2, 0.0)] {
        update.add_entry(index(), &Value::tuple([Value::Int32(n)]), &doubles(d)).unwrap();
    }
    layer.push(update);

    let file = build(&engine, layer);
    let reader = open(&engine, &file);
    let index = reader.index(&index()).unwrap();

    assert_eq!(reader.main_arena().note_count, 2);
    for (n, negative) in [(0, false), (1, true), (2, false)] {
        let item = index.find(&Value::tuple([Value::Int32(n)])).unwrap().unwrap();
        match item.value {
            Value::Vector(_, elems) => match elems[..] {
                [Value::Double(d)] => assert_eq!(d.is_sign_negative(), negative),
                _ => panic!("expected one double, got {:?}", elems),
            },
            other => panic!("expected a vector, got {:?}", other),
        }
    }
}

// =============================================================================
// Corrupt File Tests
// =============================================================================

/// Overwrite the u64 at `within` of block `block_id`
fn patch_u64(engine: &MemoryEngine, block_id: u64, within: usize, value: u64) {
    let volume = engine.volume();
    let mut block = volume.read_block(block_id).unwrap().to_vec();
    block[within..within + 8].copy_from_slice(&value.to_le_bytes());
    let trigger = CompletionTrigger::new();
    volume
        .write_block(Bytes::from(block), block_id, Priority::High, CachePolicy::KeepInCache, &trigger)
        .unwrap();
    trigger.wait().unwrap();
}

fn read_u64(engine: &MemoryEngine, block_id: u64, within: usize) -> u64 {
    let block = engine.volume().read_block(block_id).unwrap();
    u64::from_le_bytes(block[within..within + 8].try_into().unwrap())
}

/// Data blocks of a file whose trailer fits in one block
fn data_blocks(engine: &MemoryEngine, file: &DataFile) -> Vec<u64> {
    let meta = file.starting_block_id();
    assert_eq!(read_u64(engine, meta, 8), 1);
    let pairings = read_u64(engine, meta, 16) as usize;
    let mut blocks = Vec::new();
    for p in 0..pairings {
        let first = read_u64(engine, meta, 88 + p * 16);
        let count = read_u64(engine, meta, 96 + p * 16);
        blocks.extend(first..first + count);
    }
    blocks
}

fn assert_rejected(engine: &MemoryEngine, file: &DataFile) {
    let result = DataFileReader::for_file(engine.volume(), file.info(), &config());
    assert!(matches!(result, Err(SabotError::Serialization(_))));
}

#[test]
fn test_oversized_block_pairing_is_rejected() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let file = build(&engine, example_layer());
    patch_u64(&engine, file.starting_block_id(), 96, u64::MAX);

    assert_rejected(&engine, &file);
}

#[test]
fn test_overflowing_block_pairing_is_rejected() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let file = build(&engine, example_layer());
    patch_u64(&engine, file.starting_block_id(), 88, u64::MAX);

    assert_rejected(&engine, &file);
}

#[test]
fn test_huge_index_count_is_rejected() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let file = build(&engine, example_layer());
    patch_u64(&engine, file.starting_block_id(), 32, u64::MAX / 2);

    assert_rejected(&engine, &file);
}

#[test]
fn test_huge_meta_block_count_is_rejected() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let file = build(&engine, example_layer());
    patch_u64(&engine, file.starting_block_id(), 8, u64::MAX);

    assert_rejected(&engine, &file);
}

#[test]
fn test_huge_update_pointer_count_is_rejected() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let file = build(&engine, example_layer());
    let blocks = data_blocks(&engine, &file);
    let update_index_offset = read_u64(&engine, file.starting_block_id(), 72) as usize;
    let count_at = update_index_offset + 80;
    patch_u64(&engine, blocks[count_at / BLOCK_SIZE], count_at % BLOCK_SIZE, u64::MAX / 2);

    let reader = open(&engine, &file);
    assert!(matches!(reader.updates(), Err(SabotError::Serialization(_))));
}

#[test]
fn test_huge_hash_table_count_is_rejected() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let file = build(&engine, example_layer());
    let blocks = data_blocks(&engine, &file);
    let meta = file.starting_block_id();
    let pairings = read_u64(&engine, meta, 16) as usize;
    let index_meta_offset = read_u64(&engine, meta, 88 + pairings * 16 + 16) as usize;
    let tables_at = index_meta_offset + 56;
    patch_u64(&engine, blocks[tables_at / BLOCK_SIZE], tables_at % BLOCK_SIZE, u64::MAX / 2);

    assert_rejected(&engine, &file);
}
