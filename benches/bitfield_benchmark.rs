use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sbc_hal::i2c::{MockTransport, RegisterChannel, SubAddressWidth};
use sbc_hal::util::{extract_bits, get_uint, merge_bits, BitField, ByteOrder};

fn benchmark_bit_codec(c: &mut Criterion) {
    let field = BitField::new(4, 3).unwrap();

    c.bench_function("extract_bits", |b| {
        b.iter(|| {
            for byte in 0..=u8::MAX {
                black_box(extract_bits(black_box(byte), field));
            }
        })
    });

    c.bench_function("merge_bits", |b| {
        b.iter(|| {
            for byte in 0..=u8::MAX {
                black_box(merge_bits(black_box(byte), field, 0b010));
            }
        })
    });
}

fn benchmark_get_uint(c: &mut Criterion) {
    let data = [0x12, 0x34, 0x56, 0x78];

    c.bench_function("get_uint_be_4", |b| {
        b.iter(|| get_uint(black_box(&data), ByteOrder::BigEndian))
    });
    c.bench_function("get_uint_le_4", |b| {
        b.iter(|| get_uint(black_box(&data), ByteOrder::LittleEndian))
    });
}

fn benchmark_mock_register_rmw(c: &mut Criterion) {
    let mock = MockTransport::new();
    mock.set_register(0x20, 0b1010_1111);
    let mut channel = RegisterChannel::open(mock.clone(), 1, 0x29).unwrap();
    let field = BitField::new(4, 3).unwrap();

    c.bench_function("write_bits_mock", |b| {
        b.iter(|| {
            channel.write_bits(0x20, field, black_box(0b010)).unwrap();
            mock.clear_transactions();
        })
    });

    c.bench_function("read_uint_mock", |b| {
        b.iter(|| {
            let value = channel.read_uint(0x20, SubAddressWidth::One, 2, ByteOrder::BigEndian);
            mock.clear_transactions();
            black_box(value)
        })
    });
}

criterion_group!(benches, benchmark_bit_codec, benchmark_get_uint, benchmark_mock_register_rmw);
criterion_main!(benches);
