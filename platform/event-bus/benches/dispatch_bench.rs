use criterion::{black_box, criterion_group, criterion_main, Criterion};
use event_bus::{handler_fn, matches_pattern, Event, EventBus, EventMetadata, HandlerError, Payload};
use serde_json::json;

fn sample_event() -> Event {
    let payload: Payload = json!({
        "invoice_id": "inv_123",
        "amount": 12_500,
        "currency": "usd",
        "lines": [{"sku": "A-1", "qty": 2}, {"sku": "B-7", "qty": 1}]
    })
    .as_object()
    .cloned()
    .unwrap_or_default();

    Event::new("billing.invoice.created", payload)
        .expect("valid event type")
        .with_metadata(
            EventMetadata::default()
                .with_tenant_id("tenant-123")
                .with_correlation_id("corr-456"),
        )
}

fn bench_pattern_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("pattern_matching");

    group.bench_function("exact", |b| {
        b.iter(|| matches_pattern(black_box("billing.invoice.created"), black_box("billing.invoice.created")))
    });
    group.bench_function("namespace_wildcard", |b| {
        b.iter(|| matches_pattern(black_box("billing.*"), black_box("billing.invoice.created")))
    });
    group.bench_function("miss", |b| {
        b.iter(|| matches_pattern(black_box("customer.*"), black_box("billing.invoice.created")))
    });

    group.finish();
}

fn bench_event_serialization(c: &mut Criterion) {
    let event = sample_event();
    let bytes = event.to_json_bytes().expect("serializable");

    c.bench_function("event_to_json", |b| b.iter(|| black_box(&event).to_json_bytes()));
    c.bench_function("event_from_json", |b| {
        b.iter(|| Event::from_json_bytes(black_box(&bytes)))
    });
}

fn bench_publish(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let bus = EventBus::in_memory();
    runtime.block_on(async {
        for pattern in ["billing.invoice.created", "billing.*", "*"] {
            bus.subscribe(
                pattern,
                handler_fn(pattern.to_string(), |_event| async { Ok::<(), HandlerError>(()) }),
            )
            .await;
        }
    });

    c.bench_function("publish_three_handlers", |b| {
        b.iter(|| {
            runtime.block_on(bus.publish("billing.invoice.created", Payload::new()))
        })
    });
}

criterion_group!(
    benches,
    bench_pattern_matching,
    bench_event_serialization,
    bench_publish
);
criterion_main!(benches);
