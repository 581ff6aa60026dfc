#![allow(missing_docs)]

use std::sync::{Arc, Once};

use odata_query::{
    config::CompilerConfig,
    query::{
        group_aggregate, group_count, group_key, CompileError, Expr, InMemoryMetadata,
        QueryBuilder, QueryCompiler, Ty,
    },
};
use tracing_subscriber::EnvFilter;

fn model() -> InMemoryMetadata {
    InMemoryMetadata::new()
        .with_entity_type("Sale", ["Id"])
        .with_property("Sale", "Id", Ty::Int32)
        .with_property("Sale", "Region", Ty::String)
        .with_property("Sale", "Year", Ty::Int32)
        .with_property("Sale", "Amount", Ty::Decimal)
        .with_property("Sale", "Units", Ty::Int32)
        .with_navigation("Sale", "Store", "Store", false)
        .with_entity_type("Store", ["Id"])
        .with_property("Store", "Id", Ty::Int32)
        .with_property("Store", "City", Ty::String)
        .with_entity_set("Sales", "Sale")
}

fn compiler() -> QueryCompiler {
    init_tracing();
    QueryCompiler::new(CompilerConfig::default(), Arc::new(model()))
}

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("odata_query=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_ansi(false)
            .try_init();
    });
}

fn sales() -> QueryBuilder {
    QueryBuilder::entity_set("Sales", "Sale")
}

fn region(s: Expr) -> Expr {
    s.member("Region", Ty::String)
}

fn amount(s: Expr) -> Expr {
    s.member("Amount", Ty::Decimal)
}

#[test]
fn grouped_totals_with_count() {
    let components = sales()
        .group_by_with_result(region, |key, group| {
            Expr::new_record([
                ("Region", key),
                ("Total", group_aggregate("Sum", group.clone(), amount)),
                ("Sales", group_count(group)),
            ])
        })
        .compile(&compiler())
        .unwrap();
    assert_eq!(
        components.uri(),
        "Sales?$apply=groupby((Region),aggregate(Amount with sum as Total,$count as Sales))"
    );
    assert!(components.projector().is_some());
}

#[test]
fn filter_before_grouping_moves_into_apply() {
    let components = sales()
        .filter(|s| s.member("Year", Ty::Int32).greater_or_equal(Expr::constant(2020)))
        .group_by_with_result(region, |key, group| {
            Expr::new_record([
                ("Region", key),
                ("Total", group_aggregate("Sum", group, amount)),
            ])
        })
        .compile(&compiler())
        .unwrap();
    assert_eq!(
        components.uri(),
        "Sales?$apply=filter(Year ge 2020)/groupby((Region),aggregate(Amount with sum as Total))"
    );
}

#[test]
fn record_keys_group_by_every_member() {
    let components = sales()
        .group_by_with_result(
            |s| {
                Expr::new_record([
                    ("R", region(s.clone())),
                    ("Y", s.member("Year", Ty::Int32)),
                ])
            },
            |key, group| {
                Expr::new_record([
                    ("Region", key.member("R", Ty::String)),
                    (
                        "Avg",
                        group_aggregate("Average", group, |e| e.member("Units", Ty::Int32)),
                    ),
                ])
            },
        )
        .compile(&compiler())
        .unwrap();
    assert_eq!(
        components.uri(),
        "Sales?$apply=groupby((Region,Year),aggregate(Units with average as Avg))"
    );
}

#[test]
fn select_after_group_by_supplies_aggregations() {
    let components = sales()
        .group_by(region)
        .select(|g| {
            Expr::new_record([
                ("Region", group_key(g.clone())),
                ("Largest", group_aggregate("Max", g, amount)),
            ])
        })
        .compile(&compiler())
        .unwrap();
    assert_eq!(
        components.uri(),
        "Sales?$apply=groupby((Region),aggregate(Amount with max as Largest))"
    );
}

#[test]
fn grouping_without_aggregates() {
    let components = sales().group_by(region).compile(&compiler()).unwrap();
    assert_eq!(components.uri(), "Sales?$apply=groupby((Region))");
}

#[test]
fn element_selector_members_feed_aggregations() {
    let components = sales()
        .group_by_with_selector(
            region,
            |s| Expr::new_record([("A", amount(s))]),
            |key, group| {
                Expr::new_record([
                    ("Region", key),
                    (
                        "Total",
                        group_aggregate("Sum", group, |e| e.member("A", Ty::Decimal)),
                    ),
                ])
            },
        )
        .compile(&compiler())
        .unwrap();
    assert_eq!(
        components.uri(),
        "Sales?$apply=groupby((Region),aggregate(Amount with sum as Total))"
    );
}

#[test]
fn unnamed_aggregations_get_a_derived_alias() {
    let components = sales()
        .group_by_with_result(region, |key, group| {
            Expr::new_record([
                ("Region", key),
                (
                    "Scaled",
                    Expr::binary(
                        odata_query::query::ast::BinaryOp::Multiply,
                        group_aggregate("Sum", group, amount),
                        Expr::constant(2),
                    ),
                ),
            ])
        })
        .compile(&compiler())
        .unwrap();
    assert_eq!(
        components.uri(),
        "Sales?$apply=groupby((Region),aggregate(Amount with sum as SumOfAmount))"
    );
}

#[test]
fn terminal_aggregates_fold_the_filter() {
    let query = sales()
        .filter(|s| region(s).equal(Expr::constant("West")))
        .sum(amount)
        .unwrap();
    let components = compiler().compile(&query).unwrap();
    assert_eq!(
        components.uri(),
        "Sales?$apply=filter(Region eq 'West')/aggregate(Amount with sum as SumOfAmount)"
    );
    assert_eq!(components.single_result(), Some(true));
    assert_eq!(components.element_type(), &Ty::Decimal);

    let average = sales()
        .average(|s| s.member("Units", Ty::Int32))
        .unwrap();
    let components = compiler().compile(&average).unwrap();
    assert_eq!(
        components.uri(),
        "Sales?$apply=aggregate(Units with average as AverageOfUnits)"
    );
    assert_eq!(components.element_type(), &Ty::Double);

    let distinct = sales().count_distinct(region).unwrap();
    let components = compiler().compile(&distinct).unwrap();
    assert_eq!(
        components.uri(),
        "Sales?$apply=aggregate(Region with countdistinct as CountDistinctOfRegion)"
    );
    assert_eq!(components.element_type(), &Ty::Int32);

    let min = sales().min(|s| s.member("Year", Ty::Int32)).unwrap();
    assert_eq!(
        compiler().compile(&min).unwrap().uri(),
        "Sales?$apply=aggregate(Year with min as MinOfYear)"
    );
}

#[test]
fn numeric_aggregates_reject_text_selectors() {
    let query = sales().sum(region).unwrap();
    let err = compiler().compile(&query).unwrap_err();
    assert_eq!(err.code(), "MethodNotSupported");
}

#[test]
fn terminal_aggregate_reads_through_to_one_navigation() {
    let query = sales()
        .max(|s| s.member("Store", Ty::entity("Store")).member("Id", Ty::Int32))
        .unwrap();
    let components = compiler().compile(&query).unwrap();
    assert_eq!(
        components.uri(),
        "Sales?$apply=aggregate(Store/Id with max as MaxOfId)"
    );
}

#[test]
fn grouping_keys_must_be_plain_members() {
    let err = sales()
        .group_by(|s| region(s).method("ToUpper", vec![], Ty::String))
        .compile(&compiler())
        .unwrap_err();
    assert!(matches!(err, CompileError::InvalidGroupingExpression { .. }));

    let err = sales()
        .group_by(|s| s.member("Store", Ty::entity("Store")))
        .compile(&compiler())
        .unwrap_err();
    assert!(matches!(err, CompileError::InvalidGroupingExpression { .. }));
}

#[test]
fn grouping_position_rules() {
    let err = sales()
        .take(5)
        .group_by(region)
        .compile(&compiler())
        .unwrap_err();
    assert_eq!(err, CompileError::unsupported_after("GroupBy", "Take"));

    let err = sales()
        .group_by_with_result(region, |key, group| {
            Expr::new_record([("Region", key), ("Sales", group_count(group))])
        })
        .select(|r| r.member("Region", Ty::String))
        .compile(&compiler())
        .unwrap_err();
    assert_eq!(err, CompileError::unsupported_after("Select", "GroupBy"));
}

#[test]
fn result_reads_only_declared_key_members() {
    let err = sales()
        .group_by_with_result(
            |s| Expr::new_record([("R", region(s))]),
            |key, group| {
                Expr::new_record([
                    ("Year", key.member("Y", Ty::Int32)),
                    ("Sales", group_count(group)),
                ])
            },
        )
        .compile(&compiler())
        .unwrap_err();
    assert_eq!(
        err,
        CompileError::UnknownMember {
            ty: "group key".into(),
            member: "Y".into(),
        }
    );
}
