//! Tests for building data files from a memory layer
//!
//! These tests verify:
//! - Current and history key counts and the sequence range of a build
//! - Every update's notifier hears exactly one outcome
//! - Failed builds leave the catalog untouched
//! - Key shape and configuration checks
//! - Block accounting: every block of the file is allocated and written
//! - Meta trailers spanning several blocks

use sabot::disk::{Engine, MemoryEngine};
use sabot::layer::notification_channel;
use sabot::{
    Config, DataFile, DataFileReader, IndexId, MemoryLayer, Outcome, SabotError, Update, Value,
};

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

/// (1,"a") at seq 1 and 5, (2,"b") at seq 3
fn example_layer() -> MemoryLayer {
    let mut layer = MemoryLayer::new();
    layer.push(update(1, &[(key(1, "a"), Value::str("v1"))]));
    layer.push(update(5, &[(key(1, "a"), Value::str("v2"))]));
    layer.push(update(3, &[(key(2, "b"), Value::str("v3"))]));
    layer
}

/// Every block below the allocator's high water mark is either free or was
/// written to the volume
fn assert_blocks_written(engine: &MemoryEngine) {
    let free = engine.allocator().free_list();
    for id in 0..engine.allocator().high_water() {
        if !free.contains(&id) {
            assert!(engine.memory_volume().contains(id), "block {} was never written", id);
        }
    }
}

// =============================================================================
// Build Tests
// =============================================================================

#[test]
fn test_example_layer_counts() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let mut layer = example_layer();

    let file = DataFile::write(&engine, &mut layer, 7, 3, &config()).unwrap();

    assert_eq!(file.file_id(), 7);
    assert_eq!(file.num_keys(), 2);
    assert_eq!(file.num_hist_keys(), 1);
    assert_eq!(file.num_updates(), 3);
    assert_eq!(file.num_indexes(), 1);
    assert_eq!(file.lowest_seq(), 1);
    assert_eq!(file.highest_seq(), 5);
    assert_eq!(file.info().gen_id, 3);
    assert_eq!(engine.files(), vec![file.info().clone()]);
}

#[test]
fn test_file_length_matches_allocated_blocks() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let mut layer = example_layer();

    let file = DataFile::write(&engine, &mut layer, 1, 1, &config()).unwrap();

    assert_eq!(file.len() % BLOCK_SIZE as u64, 0);
    assert_eq!(engine.allocator().in_use(), file.len() / BLOCK_SIZE as u64);
    assert_blocks_written(&engine);
}

#[test]
fn test_starting_block_follows_data_blocks() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let mut layer = example_layer();
    let config = config();

    let file = DataFile::write(&engine, &mut layer, 1, 1, &config).unwrap();
    let reader = DataFileReader::for_file(engine.volume(), file.info(), &config).unwrap();

    assert_eq!(reader.block_count(), file.len() / BLOCK_SIZE as u64);
    assert_eq!(reader.starting_block_offset(), file.starting_block_offset());
    assert!(file.starting_block_offset() < reader.block_count());
}

#[test]
fn test_empty_layer_writes_only_a_trailer() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let mut layer = MemoryLayer::new();
    let config = config();

    let file = DataFile::write(&engine, &mut layer, 1, 1, &config).unwrap();

    assert_eq!(file.num_keys(), 0);
    assert_eq!(file.num_updates(), 0);
    assert_eq!(file.num_indexes(), 0);
    assert_eq!(file.lowest_seq(), 0);
    assert_eq!(file.highest_seq(), 0);
    assert_eq!(file.len(), BLOCK_SIZE as u64);
    assert_eq!(file.starting_block_offset(), 0);

    let reader = DataFileReader::for_file(engine.volume(), file.info(), &config).unwrap();
    assert_eq!(reader.num_indexes(), 0);
    assert!(reader.updates().unwrap().is_empty());
    assert_eq!(reader.main_arena().note_count, 0);
}

#[test]
fn test_update_without_entries_leaves_empty_header() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let mut layer = MemoryLayer::new();
    layer.push(update(9, &[]));
    let config = config();

    let file = DataFile::write(&engine, &mut layer, 1, 1, &config).unwrap();

    assert_eq!(file.num_updates(), 1);
    assert_eq!(file.lowest_seq(), 0);
    let reader = DataFileReader::for_file(engine.volume(), file.info(), &config).unwrap();
    assert!(reader.updates().unwrap().is_empty());
    assert_eq!(reader.highest_seq().unwrap(), 0);
    assert_blocks_written(&engine);
}

#[test]
fn test_single_key() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let mut layer = MemoryLayer::new();
    layer.push(update(42, &[(key(0, "only"), Value::Int64(-1))]));

    let file = DataFile::write(&engine, &mut layer, 1, 1, &config()).unwrap();

    assert_eq!(file.num_keys(), 1);
    assert_eq!(file.num_hist_keys(), 0);
    assert_eq!(file.lowest_seq(), 42);
    assert_eq!(file.highest_seq(), 42);
    assert_blocks_written(&engine);
}

#[test]
fn test_multiple_indexes() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let mut layer = MemoryLayer::new();
    let mut first = Update::new(1, &Value::Void, &Value::UInt64(1)).unwrap();
    first
        .add_entry(IndexId::from_u128(2), &Value::tuple([Value::str("x")]), &Value::Bool(true))
        .unwrap();
    first.add_entry(index(), &key(1, "a"), &Value::str("one")).unwrap();
    layer.push(first);
    let mut second = Update::new(2, &Value::Void, &Value::UInt64(2)).unwrap();
    second.add_entry(index(), &key(2, "b"), &Value::str("two")).unwrap();
    layer.push(second);

    let file = DataFile::write(&engine, &mut layer, 1, 1, &config()).unwrap();

    assert_eq!(file.num_indexes(), 2);
    assert_eq!(file.num_keys(), 3);
    assert_eq!(file.num_hist_keys(), 0);
    assert_blocks_written(&engine);
}

#[test]
fn test_spilling_sorts_produce_same_file_contents() {
    let small = Config::builder()
        .block_size(BLOCK_SIZE)
        .sort_buf_size(16)
        .temp_file_consol_thresh(3)
        .merge_batch_size(5)
        .build();
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let mut layer = MemoryLayer::new();
    for seq in 1..=3u64 {
        let entries: Vec<(Value, Value)> = (0..200)
            .map(|i| (key(i, &format!("k{}", i % 7)), Value::str(format!("v{}-{}", i, seq))))
            .collect();
        layer.push(update(seq, &entries));
    }

    let file = DataFile::write(&engine, &mut layer, 1, 1, &small).unwrap();

    assert_eq!(file.num_keys(), 200);
    assert_eq!(file.num_hist_keys(), 400);
    assert_eq!(engine.allocator().in_use(), file.len() / BLOCK_SIZE as u64);

    let reader = DataFileReader::for_file(engine.volume(), file.info(), &small).unwrap();
    let index = reader.index(&index()).unwrap();
    for i in [0, 57, 199] {
        let item = index.find_in_hash(&key(i, &format!("k{}", i % 7))).unwrap().unwrap();
        assert_eq!(item.seq, 3);
        assert_eq!(item.value, Value::str(format!("v{}-3", i)));
        assert_eq!(item.num_hist, 2);
    }
    assert_blocks_written(&engine);
}

#[test]
fn test_meta_trailer_spans_several_blocks() {
    let block_size = 256;
    let config = Config::builder().block_size(block_size).build();
    let engine = MemoryEngine::new(block_size);
    let mut layer = MemoryLayer::new();
    let mut update = Update::new(1, &Value::Void, &Value::UInt64(1)).unwrap();
    // Each record type opens a new boundary in the main arena
    for i in 0..40 {
        let value = Value::record([(format!("field{}", i), Value::str("x"))]);
        update
            .add_entry(index(), &Value::tuple([Value::Int32(i)]), &value)
            .unwrap();
    }
    layer.push(update);

    let file = DataFile::write(&engine, &mut layer, 1, 1, &config).unwrap();
    let reader = DataFileReader::for_file(engine.volume(), file.info(), &config).unwrap();

    assert!(reader.main_arena().boundaries.len() >= 40);
    assert!(reader.block_count() - reader.starting_block_offset() > 1);
    let item = reader
        .index(&index())
        .unwrap()
        .find(&Value::tuple([Value::Int32(17)]))
        .unwrap()
        .unwrap();
    assert_eq!(item.value, Value::record([("field17", Value::str("x"))]));
    assert_blocks_written(&engine);
}

// =============================================================================
// Notification Tests
// =============================================================================

#[test]
fn test_notifiers_hear_completed() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let mut layer = MemoryLayer::new();
    let (notify_a, rx_a) = notification_channel();
    let (notify_b, rx_b) = notification_channel();
    layer.push(update(1, &[(key(1, "a"), Value::Void)]).with_notifier(notify_a));
    layer.push(update(2, &[(key(2, "a"), Value::Void)]).with_notifier(notify_b));

    DataFile::write(&engine, &mut layer, 1, 1, &config()).unwrap();

    assert_eq!(rx_a.recv().unwrap(), Outcome::Completed);
    assert_eq!(rx_b.recv().unwrap(), Outcome::Completed);
    assert!(rx_a.try_recv().is_err());
}

#[test]
fn test_failed_write_notifies_and_skips_catalog() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    engine.memory_volume().set_write_budget(Some(0));
    let mut layer = MemoryLayer::new();
    let (notifier, rx) = notification_channel();
    layer.push(update(1, &[(key(1, "a"), Value::str("v"))]).with_notifier(notifier));

    let result = DataFile::write(&engine, &mut layer, 1, 1, &config());

    assert!(matches!(result, Err(SabotError::Storage(_))));
    assert_eq!(rx.recv().unwrap(), Outcome::Failed);
    assert!(engine.files().is_empty());
}

#[test]
fn test_failure_part_way_through() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    engine.memory_volume().set_write_budget(Some(3));
    let mut layer = example_layer();
    let (notifier, rx) = notification_channel();
    layer.push(update(8, &[(key(3, "c"), Value::str("v"))]).with_notifier(notifier));

    assert!(DataFile::write(&engine, &mut layer, 1, 1, &config()).is_err());
    assert_eq!(rx.recv().unwrap(), Outcome::Failed);
    assert!(engine.files().is_empty());
}

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_key_shape_mismatch_rejected() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let mut layer = MemoryLayer::new();
    let (notifier, rx) = notification_channel();
    layer.push(update(1, &[(key(1, "a"), Value::Void)]).with_notifier(notifier));
    layer.push(update(2, &[(Value::tuple([Value::Int32(1), Value::Int64(2)]), Value::Void)]));

    let result = DataFile::write(&engine, &mut layer, 1, 1, &config());

    assert!(matches!(result, Err(SabotError::Invariant(_))));
    assert_eq!(rx.recv().unwrap(), Outcome::Failed);
}

#[test]
fn test_keys_must_be_tuples() {
    let mut update = Update::new(1, &Value::Void, &Value::Void).unwrap();

    let result = update.add_entry(index(), &Value::Int32(1), &Value::Void);

    assert!(matches!(result, Err(SabotError::Invariant(_))));
    assert!(update.is_empty());
}

#[test]
fn test_block_size_mismatch_rejected() {
    let engine = MemoryEngine::new(BLOCK_SIZE);
    let mut layer = example_layer();
    let config = Config::builder().block_size(BLOCK_SIZE * 2).build();

    let result = DataFile::write(&engine, &mut layer, 1, 1, &config);

    assert!(matches!(result, Err(SabotError::Config(_))));
    assert_eq!(engine.allocator().in_use(), 0);
}

#[test]
fn test_invalid_config_rejected() {
    let engine = MemoryEngine::new(100);
    let mut layer = example_layer();
    let config = Config::builder().block_size(100).build();

    let result = DataFile::write(&engine, &mut layer, 1, 1, &config);

    assert!(matches!(result, Err(SabotError::Config(_))));
}
