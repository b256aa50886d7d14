use std::io::Cursor;

use guestmem::{Heap, MemoryRegion, StateReader, StateWriter};

fn main() -> anyhow::Result<()> {
    let mut heap = Heap::new(MemoryRegion::reserve(0x1000, 0x100), "demo");

    let addr = heap.allocate(16, 8)?;
    heap.view_mut(addr, 16)?.copy_from_slice(b"replayable bytes");
    println!("allocated 16 bytes at {addr:#x}, used = {}", heap.used());

    let mut writer = StateWriter::new(Vec::new());
    heap.save_state(&mut writer)?;
    println!("growing snapshot: {} bytes", writer.into_inner().len());

    heap.seal()?;
    println!("sealed, digest = {:02x?}", heap.digest().unwrap());

    let mut writer = StateWriter::new(Vec::new());
    heap.save_state(&mut writer)?;
    let record = writer.into_inner();
    println!("sealed record: {} bytes (digest only)", record.len());

    let mut reader = StateReader::new(Cursor::new(record));
    heap.load_state(&mut reader)?;
    println!("sealed content verified");
    Ok(())
}
