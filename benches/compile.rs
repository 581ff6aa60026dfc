#![forbid(unsafe_code)]

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use odata_query::config::CompilerConfig;
use odata_query::query::{
    group_aggregate, group_count, Expr, InMemoryMetadata, QueryBuilder, QueryCompiler, Ty,
};

fn model() -> InMemoryMetadata {
    InMemoryMetadata::new()
        .with_entity_type("Customer", ["Id"])
        .with_property("Customer", "Id", Ty::Int32)
        .with_property("Customer", "Name", Ty::String)
        .with_navigation("Customer", "Orders", "Order", true)
        .with_entity_type("Order", ["Id"])
        .with_property("Order", "Id", Ty::Int32)
        .with_property("Order", "Region", Ty::String)
        .with_property("Order", "Total", Ty::Decimal)
        .with_entity_set("Customers", "Customer")
        .with_entity_set("Orders", "Order")
}

fn filtered_page() -> Expr {
    QueryBuilder::entity_set("Customers", "Customer")
        .filter(|c| c.member("Name", Ty::String).greater_than(Expr::constant("M")))
        .order_by(|c| c.member("Name", Ty::String))
        .skip(40)
        .take(20)
        .build()
        .expect("filtered page")
}

fn navigation() -> Expr {
    QueryBuilder::entity_set("Customers", "Customer")
        .filter(|c| c.member("Id", Ty::Int32).equal(Expr::constant(7)))
        .select_many(|c| c.member("Orders", Ty::collection(Ty::entity("Order"))))
        .filter(|o| o.member("Total", Ty::Decimal).greater_than(Expr::constant(100)))
        .build()
        .expect("navigation")
}

fn grouped() -> Expr {
    QueryBuilder::entity_set("Orders", "Order")
        .group_by_with_result(
            |o| o.member("Region", Ty::String),
            |key, group| {
                Expr::new_record([
                    ("Region", key),
                    (
                        "Total",
                        group_aggregate("Sum", group.clone(), |e| e.member("Total", Ty::Decimal)),
                    ),
                    ("Orders", group_count(group)),
                ])
            },
        )
        .build()
        .expect("grouped")
}

fn compile(c: &mut Criterion) {
    let compiler = QueryCompiler::new(CompilerConfig::default(), Arc::new(model()));
    let mut group = c.benchmark_group("compile");
    group.throughput(Throughput::Elements(1));

    for (name, query) in [
        ("filtered_page", filtered_page()),
        ("navigation", navigation()),
        ("grouped", grouped()),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| black_box(compiler.compile(black_box(&query))))
        });
    }

    group.finish();
}

criterion_group!(benches, compile);
criterion_main!(benches);
