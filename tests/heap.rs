use std::fs::File;
use std::io::Cursor;

use guestmem::{Heap, HeapError, MemoryRegion, StateReader, StateWriter, DIGEST_LEN};

fn heap(base: u64, capacity: usize, name: &str) -> Heap {
    Heap::new(MemoryRegion::reserve(base, capacity), name)
}

#[test]
fn bump_allocation_scenario() {
    let mut h = heap(0x1000, 0x100, "H");

    assert_eq!(h.allocate(10, 4).expect("10 bytes, align 4"), 0x1000);
    assert_eq!(h.used(), 10);

    assert_eq!(h.allocate(5, 1).expect("5 bytes, unaligned"), 0x100A);
    assert_eq!(h.used(), 15);

    // rounds used from 15 up to 16
    assert_eq!(h.allocate(5, 8).expect("5 bytes, align 8"), 0x1010);
    assert_eq!(h.used(), 21);

    // 21 + 240 = 261 > 256
    assert!(matches!(
        h.allocate(240, 1),
        Err(HeapError::CapacityExceeded { .. })
    ));
    assert_eq!(h.used(), 21);
}

#[test]
fn seal_covers_alignment_padding() {
    let mut h = heap(0x1000, 0x100, "H");
    h.allocate(10, 4).expect("10 bytes, align 4");
    h.allocate(5, 1).expect("5 bytes, unaligned");
    // rounds used from 15 to 16, leaving a one-byte padding gap
    h.allocate(5, 8).expect("5 bytes, align 8");
    assert_eq!(h.used(), 21);

    h.seal().expect("seal digests the whole allocated prefix");
    assert!(h.digest().is_some());
    assert!(h.view(0x1000, 21).is_ok());
}

#[test]
fn save_and_restore_cover_alignment_padding() {
    let mut saved = heap(0x1000, 0x100, "H");
    let a = saved.allocate(10, 4).expect("10 bytes, align 4");
    saved.view_mut(a, 10).expect("writable").fill(0x11);
    saved.allocate(5, 1).expect("5 bytes, unaligned");
    let b = saved.allocate(5, 8).expect("5 bytes, align 8");
    saved.view_mut(b, 5).expect("writable").fill(0x22);

    let mut writer = StateWriter::new(Vec::new());
    saved
        .save_state(&mut writer)
        .expect("save reads the whole allocated prefix");

    let mut restored = heap(0x1000, 0x100, "H");
    let mut reader = StateReader::new(Cursor::new(writer.into_inner()));
    restored.load_state(&mut reader).expect("load");
    assert_eq!(restored.used(), 21);
    assert_eq!(
        restored.view(0x1000, 21).expect("readable"),
        saved.view(0x1000, 21).expect("readable")
    );
}

#[test]
fn used_is_monotone_and_bounded() {
    let mut h = heap(0, 128, "mono");
    let mut previous = 0;
    for (size, align) in [(3, 0), (9, 8), (1, 1), (40, 16), (2, 2)] {
        h.allocate(size, align).expect("fits");
        assert!(h.used() >= previous);
        assert!(h.used() <= h.capacity());
        previous = h.used();
    }
}

#[test]
fn addresses_are_aligned_and_disjoint() {
    let mut h = heap(0x8000, 4096, "align");
    let mut ranges: Vec<(u64, u64)> = Vec::new();
    for (size, align) in [(7u64, 1u64), (16, 16), (3, 4), (1, 64), (31, 2)] {
        let addr = h.allocate(size, align).expect("fits");
        if align > 1 {
            assert_eq!((addr - h.base()) % align, 0);
        }
        for (start, end) in &ranges {
            assert!(addr + size <= *start || addr >= *end, "ranges overlap");
        }
        ranges.push((addr, addr + size));
    }
}

#[test]
fn sealed_heap_rejects_mutation() {
    let mut h = heap(0x1000, 0x100, "H");
    h.allocate(21, 1).expect("allocate");
    h.seal().expect("seal");
    assert!(matches!(
        h.allocate(1, 1),
        Err(HeapError::SealedHeapMutation { .. })
    ));
    assert!(matches!(h.seal(), Err(HeapError::ReSeal { .. })));
    assert_eq!(h.used(), 21);
}

#[test]
fn growing_round_trip_restores_content() {
    let mut saved = heap(0x2000, 256, "scratch");
    let addr = saved.allocate(32, 8).expect("allocate");
    saved
        .view_mut(addr, 32)
        .expect("writable")
        .copy_from_slice(&[0xAB; 32]);

    let mut writer = StateWriter::new(Vec::new());
    saved.save_state(&mut writer).expect("save");
    let record = writer.into_inner();

    let mut restored = heap(0x2000, 256, "scratch");
    let mut reader = StateReader::new(Cursor::new(record));
    restored.load_state(&mut reader).expect("load");

    assert_eq!(restored.used(), saved.used());
    assert_eq!(
        restored.view(addr, 32).expect("readable"),
        saved.view(addr, 32).expect("readable")
    );
}

#[test]
fn growing_load_replaces_earlier_content() {
    let mut small = heap(0, 64, "swap");
    small.allocate(4, 0).expect("allocate");
    let mut writer = StateWriter::new(Vec::new());
    small.save_state(&mut writer).expect("save");

    let mut target = heap(0, 64, "swap");
    let addr = target.allocate(32, 0).expect("allocate");
    target.view_mut(addr, 32).expect("writable").fill(0xFF);

    let mut reader = StateReader::new(Cursor::new(writer.into_inner()));
    target.load_state(&mut reader).expect("load");
    assert_eq!(target.used(), 4);
    // bytes beyond the restored prefix are inaccessible again
    assert!(target.view(4, 1).is_err());
}

#[test]
fn sealed_round_trip_verifies_without_touching_memory() {
    let mut h = heap(0x3000, 128, "rom");
    let addr = h.allocate(16, 0).expect("allocate");
    h.view_mut(addr, 16)
        .expect("writable")
        .copy_from_slice(b"deterministic!!!");
    h.seal().expect("seal");

    let mut writer = StateWriter::new(Vec::new());
    h.save_state(&mut writer).expect("save");
    let record = writer.into_inner();
    // name + u64 + digest only, never the content
    assert_eq!(record.len(), 4 + 3 + 8 + DIGEST_LEN);

    let mut reader = StateReader::new(Cursor::new(record));
    h.load_state(&mut reader).expect("verify");
    assert_eq!(h.view(addr, 16).expect("readable"), b"deterministic!!!");
}

#[test]
fn flipped_digest_bit_is_a_hash_mismatch() {
    let mut h = heap(0, 64, "rom");
    let addr = h.allocate(8, 0).expect("allocate");
    h.view_mut(addr, 8)
        .expect("writable")
        .copy_from_slice(b"8 bytes!");
    h.seal().expect("seal");

    let mut writer = StateWriter::new(Vec::new());
    h.save_state(&mut writer).expect("save");
    let mut record = writer.into_inner();
    let last = record.len() - 1;
    record[last] ^= 0x01;

    let mut reader = StateReader::new(Cursor::new(record));
    assert!(matches!(
        h.load_state(&mut reader),
        Err(HeapError::HashMismatch { .. })
    ));
}

#[test]
fn name_mismatch_rejects_the_record() {
    let mut other = heap(0, 64, "other");
    other.allocate(4, 0).expect("allocate");
    let mut writer = StateWriter::new(Vec::new());
    other.save_state(&mut writer).expect("save");

    let mut h = heap(0, 64, "mine");
    let mut reader = StateReader::new(Cursor::new(writer.into_inner()));
    assert!(matches!(
        h.load_state(&mut reader),
        Err(HeapError::NameMismatch { found, .. }) if found == "other"
    ));
    assert_eq!(h.used(), 0);
}

#[test]
fn oversized_record_is_rejected_before_any_copy() {
    let mut big = heap(0, 256, "sized");
    big.allocate(200, 0).expect("allocate");
    let mut writer = StateWriter::new(Vec::new());
    big.save_state(&mut writer).expect("save");

    let mut small = heap(0, 64, "sized");
    let mut reader = StateReader::new(Cursor::new(writer.into_inner()));
    assert!(matches!(
        small.load_state(&mut reader),
        Err(HeapError::OversizedState { used: 200, .. })
    ));
    assert_eq!(small.used(), 0);
}

#[test]
fn truncated_growing_record_leaves_heap_unchanged() {
    let mut saved = heap(0, 64, "trunc");
    let addr = saved.allocate(16, 0).expect("allocate");
    saved.view_mut(addr, 16).expect("writable").fill(0x55);
    let mut writer = StateWriter::new(Vec::new());
    saved.save_state(&mut writer).expect("save");
    let mut record = writer.into_inner();
    record.truncate(record.len() - 4);

    let mut target = heap(0, 64, "trunc");
    let kept = target.allocate(8, 0).expect("allocate");
    target.view_mut(kept, 8).expect("writable").fill(0x77);
    let mut reader = StateReader::new(Cursor::new(record));
    assert!(matches!(
        target.load_state(&mut reader),
        Err(HeapError::State { .. })
    ));
    assert_eq!(target.used(), 8);
    assert_eq!(target.view(kept, 8).expect("readable"), &[0x77; 8]);
}

#[test]
fn state_record_round_trips_through_a_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("heap.state");

    let mut saved = heap(0x1000, 128, "disk");
    let addr = saved.allocate(24, 4).expect("allocate");
    saved
        .view_mut(addr, 24)
        .expect("writable")
        .copy_from_slice(&[7u8; 24]);
    let mut writer = StateWriter::new(File::create(&path).expect("create"));
    saved.save_state(&mut writer).expect("save");
    writer.flush().expect("flush");

    let mut restored = heap(0x1000, 128, "disk");
    let mut reader = StateReader::new(File::open(&path).expect("open"));
    restored.load_state(&mut reader).expect("load");
    assert_eq!(restored.used(), 24);
    assert_eq!(restored.view(addr, 24).expect("readable"), &[7u8; 24]);
}
