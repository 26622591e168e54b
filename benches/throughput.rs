//! Throughput benchmarks

use chisflash_link::core::protocol::{crc16_modbus, crc16_modbus_table, GbaCommand, Packet, PacketBuilder};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

fn checksum_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc16_modbus");

    for size in [16usize, 1024, 0x1000] {
        let data: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("bitwise", size), &data, |b, data| {
            b.iter(|| black_box(crc16_modbus(black_box(data))))
        });

        group.bench_with_input(BenchmarkId::new("table", size), &data, |b, data| {
            b.iter(|| black_box(crc16_modbus_table(black_box(data))))
        });
    }

    group.finish();
}

fn packet_benchmark(c: &mut Criterion) {
    let page: Vec<u8> = (0..0x1000).map(|i| (i % 251) as u8).collect();

    let mut group = c.benchmark_group("packet");
    group.throughput(Throughput::Bytes(page.len() as u64));

    group.bench_function("build_program_page", |b| {
        let mut builder = PacketBuilder::with_capacity(page.len() + 16);
        b.iter(|| {
            builder
                .reset()
                .add_command(GbaCommand::Program)
                .add_address(black_box(0x0800_0000))
                .add_length(0x200)
                .add_bytes(black_box(&page));
            black_box(builder.build(true).map(<[u8]>::len).unwrap_or_default())
        })
    });

    group.bench_function("decode_program_page", |b| {
        let mut builder = PacketBuilder::command(GbaCommand::Program);
        builder.add_address(0).add_length(0x200).add_bytes(&page);
        let frame = builder.build(true).unwrap().to_vec();
        b.iter(|| black_box(Packet::decode(black_box(&frame), true).map(<[u8]>::len)))
    });

    group.finish();
}

criterion_group!(benches, checksum_benchmark, packet_benchmark);
criterion_main!(benches);
