//! 事件格式化与行准备的基准测试

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;

use quantum_pg_sink::sinks::database::{QualifiedTableName, RowWriter};
use quantum_pg_sink::{
    AdditionalDataColumn, ColumnOptions, ColumnType, EventJsonFormatter, InvariantFormatProvider,
    LogEvent, LogEventLevel, StructureValue,
};

fn sample_event(i: usize) -> LogEvent {
    LogEvent::new(
        LogEventLevel::Information,
        "Order {OrderId} shipped to {@Address} in {Elapsed:0.00} ms",
    )
    .with_property("OrderId", i as i64)
    .with_property("Elapsed", 12.5_f64 + i as f64)
    .with_property("UserId", 1000 + i as i64)
    .with_property(
        "Address",
        StructureValue::new(Some("Address"))
            .with_field("City", "Berlin")
            .with_field("Zip", "10115"),
    )
}

fn bench_json_formatting(c: &mut Criterion) {
    let mut group = c.benchmark_group("json_formatting");
    let event = sample_event(1);

    group.throughput(Throughput::Elements(1));
    group.bench_function("format_event", |b| {
        b.iter(|| black_box(EventJsonFormatter.format_event(black_box(&event))))
    });
    group.bench_function("format_properties", |b| {
        b.iter(|| black_box(EventJsonFormatter.format_properties(black_box(event.properties()))))
    });

    group.finish();
}

fn bench_row_preparation(c: &mut Criterion) {
    let mut group = c.benchmark_group("row_preparation");

    let options = ColumnOptions::builder()
        .properties_exclude_additional(true)
        .additional_column(
            AdditionalDataColumn::new("user_id", ColumnType::BigInt).with_property("UserId"),
        )
        .build()
        .unwrap();
    let writer = RowWriter::new(
        Arc::new(options),
        Arc::new(InvariantFormatProvider),
        QualifiedTableName::new("public", "logs"),
    );

    for size in [50, 500] {
        let events: Vec<LogEvent> = (0..size).map(sample_event).collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(format!("prepare_{}_events", size), |b| {
            b.iter(|| black_box(writer.prepare(black_box(&events))))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_json_formatting, bench_row_preparation);
criterion_main!(benches);
