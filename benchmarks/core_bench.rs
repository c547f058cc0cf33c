use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kestrel_core::probe::edbg::{AvrCommandFrame, AvrEvent, ProtocolHandler};
use kestrel_core::probe::Command;

fn bench_command_frame_encoding(c: &mut Criterion) {
    // A 256 byte flash page write, the largest frame a debug session sends.
    let frame = AvrCommandFrame::new(ProtocolHandler::Avr8Generic, 0x1234, vec![0xA5; 256]);

    c.bench_function("avr_command_frame_to_bytes", |b| {
        b.iter(|| black_box(frame.to_bytes()));
    });
    c.bench_function("avr_command_frame_fragments", |b| {
        b.iter(|| black_box(frame.to_fragments(60)));
    });
}

fn bench_event_decoding(c: &mut Criterion) {
    let data = AvrEvent::new(vec![0x40, 0x00, 0x01, 0x00, 0x00, 0x01])
        .to_response_data(ProtocolHandler::Avr8Generic);

    c.bench_function("avr_event_decode", |b| {
        b.iter(|| black_box(AvrEvent::from_response_data(black_box(&data))));
    });
}

fn bench_cmsis_command(c: &mut Criterion) {
    let command = Command::new(0x80, vec![0x11, 0x00, 0x00, 0x40]);

    c.bench_function("cmsis_dap_command_to_bytes", |b| {
        b.iter(|| black_box(command.to_bytes()));
    });
}

criterion_group!(
    benches,
    bench_command_frame_encoding,
    bench_event_decoding,
    bench_cmsis_command
);
criterion_main!(benches);
