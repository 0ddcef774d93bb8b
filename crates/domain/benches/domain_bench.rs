use std::collections::HashMap;

use chrono::Utc;
use common::{CabinTypeId, VoyageId};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use domain::{
    CabinInventorySlot, Fare, HoldChange, ItemRequest, Money, Occupancy, PricingSnapshot, SlotKey,
};

fn fares(count: usize) -> (Vec<ItemRequest>, HashMap<SlotKey, Fare>) {
    let voyage_id = VoyageId::new();
    let mut requests = Vec::with_capacity(count);
    let mut fares = HashMap::with_capacity(count);
    for _ in 0..count {
        let slot = SlotKey::new(voyage_id, CabinTypeId::new());
        fares.insert(
            slot,
            Fare {
                slot,
                cabin_type_name: "Suite".into(),
                max_occupancy: 4,
                adult_price: Money::from_major(1800),
                child_price: Money::from_major(900),
                infant_price: Money::from_major(50),
                port_fee: Money::from_major(80),
                service_fee: Money::from_major(25),
            },
        );
        requests.push(ItemRequest {
            voyage_id,
            cabin_type_id: slot.cabin_type_id,
            quantity: 2,
            occupancy: Occupancy::new(2, 1, 1),
        });
    }
    (requests, fares)
}

fn bench_pricing(c: &mut Criterion) {
    let mut group = c.benchmark_group("domain/pricing_snapshot");
    for count in [1, 8, 64] {
        let (requests, fares) = fares(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| PricingSnapshot::price(&requests, &fares, Utc::now()).unwrap());
        });
    }
    group.finish();
}

fn bench_slot_cycle(c: &mut Criterion) {
    let key = SlotKey::new(VoyageId::new(), CabinTypeId::new());

    c.bench_function("domain/slot_reserve_confirm_release", |b| {
        b.iter(|| {
            let mut slot = CabinInventorySlot::new(key, 100);
            for _ in 0..50 {
                slot.reserve(2).unwrap();
                slot.apply(HoldChange::Confirmed, 2);
            }
            for _ in 0..50 {
                slot.apply(HoldChange::ReleasedConfirmed, 2);
            }
            slot
        });
    });
}

criterion_group!(benches, bench_pricing, bench_slot_cycle);
criterion_main!(benches);
