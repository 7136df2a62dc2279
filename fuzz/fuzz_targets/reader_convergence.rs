#![no_main]

use arbitrary::Arbitrary;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;

use shoal_core::{is_reserved, FieldMap};
use shoal_store::InMemoryStore;
use shoal_stream::{ReconcilingWriter, StreamConfig, StreamContext};

#[derive(Arbitrary, Debug)]
enum Op {
    /// Write one field; an empty value is a tombstone
    Write { field: u8, value: Vec<u8> },
    Tick,
    OpenReader,
}

fuzz_target!(|ops: Vec<Op>| {
    let store = InMemoryStore::new();
    let mut writer = ReconcilingWriter::new(Box::new(store.connect()));
    let mut ctx = StreamContext::new(
        Box::new(store.connect()),
        Box::new(store.connect()),
        StreamConfig::local(),
    )
    .expect("valid config");
    let mut readers = Vec::new();

    for op in ops.into_iter().take(256) {
        match op {
            Op::Write { field, value } => {
                let mut diff = FieldMap::new();
                diff.insert(format!("f{}", field % 8), Bytes::from(value));
                writer.send("e1", &diff, &[]).expect("write accepted");
            }
            Op::Tick => {
                ctx.begin_tick();
                for id in &readers {
                    ctx.poll_reader(*id).expect("reader exists");
                }
            }
            Op::OpenReader if readers.len() < 4 => {
                readers.push(ctx.open_reader("e1").expect("reader opens"));
            }
            Op::OpenReader => {}
        }
    }

    // Once the traffic stops every reader matches the store
    for _ in 0..4 {
        ctx.begin_tick();
        for id in &readers {
            ctx.poll_reader(*id).expect("reader exists");
        }
    }
    let expected: FieldMap = store
        .hash("e1")
        .unwrap_or_default()
        .into_iter()
        .filter(|(field, _)| !is_reserved(field))
        .collect();
    for id in &readers {
        assert_eq!(ctx.data(*id), Some(&expected));
    }
});
