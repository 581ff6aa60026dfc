#![allow(missing_docs)]

use std::sync::{Arc, Once};

use odata_query::{
    config::CompilerConfig,
    query::{
        ast::Param, CompileError, Expr, HttpMethod, InMemoryMetadata, ProtocolVersion,
        QueryBuilder, QueryCompiler, Ty, Value,
    },
};
use tracing_subscriber::EnvFilter;

fn customer() -> Ty {
    Ty::entity("Customer")
}

fn order() -> Ty {
    Ty::entity("Order")
}

fn item() -> Ty {
    Ty::entity("Item")
}

fn model() -> InMemoryMetadata {
    InMemoryMetadata::new()
        .with_entity_type("Customer", ["Id"])
        .with_property("Customer", "Id", Ty::Int32)
        .with_property("Customer", "Name", Ty::String)
        .with_property("Customer", "City", Ty::nullable(Ty::String))
        .with_navigation("Customer", "Orders", "Order", true)
        .with_entity_type("Order", ["Id"])
        .with_property("Order", "Id", Ty::Int32)
        .with_property("Order", "Total", Ty::Double)
        .with_navigation("Order", "Customer", "Customer", false)
        .with_navigation("Order", "Items", "Item", true)
        .with_entity_type("Item", ["OrderId", "Line"])
        .with_property("Item", "OrderId", Ty::Int32)
        .with_property("Item", "Line", Ty::Int32)
        .with_property("Item", "Quantity", Ty::Int32)
        .with_navigation("Item", "Product", "Product", false)
        .with_entity_type("Product", ["Id"])
        .with_property("Product", "Id", Ty::Int32)
        .with_property("Product", "Name", Ty::String)
        .with_property("Product", "Price", Ty::Double)
        .with_property("Product", "Color", Ty::String)
        .with_navigation("Product", "Category", "Category", false)
        .with_entity_type("Category", ["Id"])
        .with_property("Category", "Id", Ty::Int32)
        .with_property("Category", "Name", Ty::String)
        .with_entity_set("Customers", "Customer")
        .with_entity_set("Orders", "Order")
        .with_entity_set("Items", "Item")
        .with_entity_set("Products", "Product")
        .with_singleton("Me", "Customer")
}

fn compiler() -> QueryCompiler {
    compiler_with(CompilerConfig::default())
}

fn compiler_with(config: CompilerConfig) -> QueryCompiler {
    init_tracing();
    QueryCompiler::new(config, Arc::new(model()))
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

fn products() -> QueryBuilder {
    QueryBuilder::entity_set("Products", "Product")
}

fn customers() -> QueryBuilder {
    QueryBuilder::entity_set("Customers", "Customer")
}

fn price(p: Expr) -> Expr {
    p.member("Price", Ty::Double)
}

#[test]
fn sequence_options_keep_call_order() {
    let components = products()
        .filter(|p| price(p).greater_than(Expr::constant(5.0)))
        .order_by(|p| p.member("Name", Ty::String))
        .skip(20)
        .take(10)
        .compile(&compiler())
        .unwrap();
    assert_eq!(
        components.uri(),
        "Products?$filter=Price gt 5&$orderby=Name&$skip=20&$top=10"
    );
    assert_eq!(components.http_method(), HttpMethod::Get);
    assert_eq!(components.version(), ProtocolVersion::V4_0);
    assert_eq!(components.single_result(), None);
    assert_eq!(components.element_type(), &Ty::entity("Product"));
}

#[test]
fn consecutive_filters_join_with_and() {
    let components = products()
        .filter(|p| price(p).greater_than(Expr::constant(5.0)))
        .filter(|p| {
            p.clone()
                .member("Color", Ty::String)
                .equal(Expr::constant("Red"))
                .or_else(p.member("Color", Ty::String).equal(Expr::constant("Blue")))
        })
        .compile(&compiler())
        .unwrap();
    assert_eq!(
        components.uri(),
        "Products?$filter=Price gt 5 and (Color eq 'Red' or Color eq 'Blue')"
    );
}

#[test]
fn then_by_extends_the_order() {
    let components = products()
        .order_by_descending(price)
        .then_by(|p| p.member("Name", Ty::String))
        .compile(&compiler())
        .unwrap();
    assert_eq!(components.uri(), "Products?$orderby=Price desc,Name");
}

#[test]
fn key_equality_addresses_the_entity() {
    let components = products()
        .filter(|p| p.member("Id", Ty::Int32).equal(Expr::constant(5)))
        .compile(&compiler())
        .unwrap();
    assert_eq!(components.uri(), "Products(5)");
}

#[test]
fn composite_keys_render_named_values() {
    let components = QueryBuilder::entity_set("Items", "Item")
        .filter(|i| {
            i.clone()
                .member("Line", Ty::Int32)
                .equal(Expr::constant(2))
                .and_also(i.member("OrderId", Ty::Int32).equal(Expr::constant(7)))
        })
        .compile(&compiler())
        .unwrap();
    assert_eq!(components.uri(), "Items(OrderId=7,Line=2)");
}

#[test]
fn partial_key_stays_a_filter() {
    let components = QueryBuilder::entity_set("Items", "Item")
        .filter(|i| i.member("OrderId", Ty::Int32).equal(Expr::constant(7)))
        .compile(&compiler())
        .unwrap();
    assert_eq!(components.uri(), "Items?$filter=OrderId eq 7");
}

#[test]
fn key_as_segment_and_service_root() {
    let config = CompilerConfig {
        base_uri: "https://example.org/odata/".into(),
        key_as_segment: true,
        ..CompilerConfig::default()
    };
    let components = products()
        .filter(|p| p.member("Id", Ty::Int32).equal(Expr::constant(5)))
        .compile(&compiler_with(config))
        .unwrap();
    assert_eq!(components.uri(), "https://example.org/odata/Products/5");
}

#[test]
fn first_and_single_limit_the_result() {
    let compiler = compiler();
    let first = products()
        .filter(|p| p.member("Color", Ty::String).equal(Expr::constant("Red")))
        .first()
        .unwrap();
    let components = compiler.compile(&first).unwrap();
    assert_eq!(components.uri(), "Products?$filter=Color eq 'Red'&$top=1");
    assert_eq!(components.single_result(), Some(true));

    let single = products().single_or_default().unwrap();
    assert_eq!(compiler.compile(&single).unwrap().uri(), "Products?$top=2");

    let keyed = products()
        .first_where(|p| p.member("Id", Ty::Int32).equal(Expr::constant(3)))
        .unwrap();
    let components = compiler.compile(&keyed).unwrap();
    assert_eq!(components.uri(), "Products(3)");
    assert_eq!(components.single_result(), Some(true));
}

#[test]
fn count_addresses_the_count_segment() {
    let query = products()
        .filter(|p| price(p).greater_than(Expr::constant(5.0)))
        .count()
        .unwrap();
    let components = compiler().compile(&query).unwrap();
    assert_eq!(components.uri(), "Products/$count?$filter=Price gt 5");
    assert_eq!(components.element_type(), &Ty::Int32);
    assert_eq!(components.single_result(), Some(true));

    let long = products().long_count().unwrap();
    let components = compiler().compile(&long).unwrap();
    assert_eq!(components.uri(), "Products/$count");
    assert_eq!(components.element_type(), &Ty::Int64);
}

#[test]
fn count_after_take_is_rejected() {
    let query = products().take(3).count().unwrap();
    assert_eq!(
        compiler().compile(&query).unwrap_err(),
        CompileError::unsupported_after("Count", "Take")
    );
}

fn id_is(value: i32) -> impl FnOnce(Expr) -> Expr {
    move |p| p.member("Id", Ty::Int32).equal(Expr::constant(value))
}

#[test]
fn count_predicate_stays_a_filter() {
    let query = products().count_where(id_is(5)).unwrap();
    let components = compiler().compile(&query).unwrap();
    assert_eq!(components.uri(), "Products/$count?$filter=Id eq 5");
    assert_eq!(components.single_result(), Some(true));

    let query = products().filter(id_is(5)).count().unwrap();
    assert_eq!(
        compiler().compile(&query).unwrap().uri(),
        "Products/$count?$filter=Id eq 5"
    );
}

#[test]
fn collection_operators_after_a_key_filter_keep_it_as_a_filter() {
    let components = products()
        .filter(id_is(5))
        .filter(|p| price(p).greater_than(Expr::constant(3.0)))
        .compile(&compiler())
        .unwrap();
    assert_eq!(components.uri(), "Products?$filter=Id eq 5 and Price gt 3");

    let components = products()
        .filter(id_is(5))
        .order_by(|p| p.member("Name", Ty::String))
        .take(1)
        .compile(&compiler())
        .unwrap();
    assert_eq!(components.uri(), "Products?$filter=Id eq 5&$orderby=Name&$top=1");
}

#[test]
fn projection_selects_and_expands() {
    let components = products()
        .select(|p| {
            Expr::new_record([
                ("Name", p.clone().member("Name", Ty::String)),
                (
                    "Category",
                    p.member("Category", Ty::entity("Category"))
                        .member("Name", Ty::String),
                ),
            ])
        })
        .compile(&compiler())
        .unwrap();
    assert_eq!(
        components.uri(),
        "Products?$expand=Category($select=Name)&$select=Name"
    );
    assert!(components.has_select_query_option());
    assert!(components.projector().is_some());
}

#[test]
fn select_of_the_whole_element_keeps_every_property() {
    let components = products()
        .select(|p| Expr::new_record([("Product", p.clone()), ("Name", p.member("Name", Ty::String))]))
        .compile(&compiler())
        .unwrap();
    assert_eq!(components.uri(), "Products");
    assert!(!components.has_select_query_option());
}

#[test]
fn consecutive_selects_compose() {
    let components = products()
        .select(|p| {
            Expr::new_record([
                ("N", p.clone().member("Name", Ty::String)),
                ("P", price(p)),
            ])
        })
        .select(|r| r.member("N", Ty::String))
        .compile(&compiler())
        .unwrap();
    assert_eq!(components.uri(), "Products?$select=Name");
}

#[test]
fn select_on_to_one_navigation_walks_the_path() {
    let components = QueryBuilder::entity_set("Orders", "Order")
        .filter(|o| o.member("Id", Ty::Int32).equal(Expr::constant(7)))
        .select(|o| o.member("Customer", customer()))
        .compile(&compiler())
        .unwrap();
    assert_eq!(components.uri(), "Orders(7)/Customer");
    assert_eq!(components.element_type(), &customer());
}

#[test]
fn select_many_navigates_to_the_collection() {
    let components = customers()
        .filter(|c| c.member("Id", Ty::Int32).equal(Expr::constant(1)))
        .select_many(|c| c.member("Orders", Ty::collection(order())))
        .filter(|o| o.member("Total", Ty::Double).greater_than(Expr::constant(100.0)))
        .compile(&compiler())
        .unwrap();
    assert_eq!(components.uri(), "Customers(1)/Orders?$filter=Total gt 100");
    assert_eq!(components.element_type(), &order());
}

#[test]
fn scoped_select_many_rewrites_later_lambdas() {
    let components = customers()
        .filter(|c| c.member("Id", Ty::Int32).equal(Expr::constant(1)))
        .select_many_scoped(|c| c.member("Orders", Ty::collection(order())), "c", "o")
        .filter(|x| {
            x.member("o", order())
                .member("Total", Ty::Double)
                .greater_than(Expr::constant(100.0))
        })
        .select(|x| x.member("o", order()).member("Total", Ty::Double))
        .compile(&compiler())
        .unwrap();
    assert_eq!(
        components.uri(),
        "Customers(1)/Orders?$filter=Total gt 100&$select=Total"
    );
}

#[test]
fn scoped_filter_reading_the_outer_resource_is_rejected() {
    let err = customers()
        .filter(|c| c.member("Id", Ty::Int32).equal(Expr::constant(1)))
        .select_many_scoped(|c| c.member("Orders", Ty::collection(order())), "c", "o")
        .filter(|x| {
            x.member("c", customer())
                .member("Name", Ty::String)
                .equal(Expr::constant("Ann"))
        })
        .compile(&compiler())
        .unwrap_err();
    assert!(matches!(
        err,
        CompileError::CrossResourceReference {
            clause: "filter",
            ..
        }
    ));
}

#[test]
fn select_many_over_a_set_needs_a_key() {
    let err = customers()
        .select_many(|c| c.member("Orders", Ty::collection(order())))
        .compile(&compiler())
        .unwrap_err();
    assert_eq!(
        err,
        CompileError::NavigationRequiresSingleSource {
            member: "Orders".into()
        }
    );
}

#[test]
fn expand_paths_by_string_and_lambda() {
    let by_string = customers()
        .expand("Orders/Items")
        .compile(&compiler())
        .unwrap();
    assert_eq!(by_string.uri(), "Customers?$expand=Orders(($expand=Items))");

    let by_lambda = customers()
        .expand_with(|c| {
            let o = Param::new("o", order());
            Expr::call(
                "Select",
                vec![
                    c.member("Orders", Ty::collection(order())),
                    Expr::lambda(
                        vec![o.clone()],
                        o.to_expr().member("Items", Ty::collection(item())),
                    ),
                ],
                Ty::collection(Ty::collection(item())),
            )
        })
        .compile(&compiler())
        .unwrap();
    assert_eq!(by_lambda.uri(), by_string.uri());

    let structural = customers()
        .expand("Orders/Total")
        .compile(&compiler())
        .unwrap();
    assert_eq!(structural.uri(), "Customers?$expand=Orders($select=Total)");
    assert!(structural.has_select_query_option());
}

#[test]
fn expand_wildcard_and_reserved_segments() {
    let components = customers().expand("*").compile(&compiler()).unwrap();
    assert_eq!(components.uri(), "Customers?$expand=*");

    let err = customers()
        .expand("Orders/$ref")
        .compile(&compiler())
        .unwrap_err();
    assert_eq!(
        err,
        CompileError::IllegalSystemToken {
            token: "$ref".into()
        }
    );
}

#[test]
fn count_flag_and_custom_options() {
    let components = products()
        .include_count()
        .add_query_option("debug", "a b")
        .add_query_option("depth", 2)
        .compile(&compiler())
        .unwrap();
    assert_eq!(
        components.uri(),
        "Products?$count=true&debug=a%20b&depth=2"
    );

    let err = products()
        .add_query_option("$top", "1")
        .compile(&compiler())
        .unwrap_err();
    assert_eq!(err.code(), "ReservedQueryOption");
}

#[test]
fn any_over_collection_navigation() {
    let components = customers()
        .filter(|c| {
            let o = Param::new("o", order());
            Expr::call(
                "Any",
                vec![
                    c.member("Orders", Ty::collection(order())),
                    Expr::lambda(
                        vec![o.clone()],
                        o.to_expr()
                            .member("Total", Ty::Double)
                            .greater_than(Expr::constant(100.0)),
                    ),
                ],
                Ty::Bool,
            )
        })
        .compile(&compiler())
        .unwrap();
    assert_eq!(
        components.uri(),
        "Customers?$filter=Orders/any(o:o/Total gt 100)"
    );
}

#[test]
fn membership_requires_newer_protocol() {
    let colors = || {
        Expr::constant(Value::Array {
            element: Ty::String,
            items: vec!["Red".into(), "Blue".into()],
        })
    };
    let query = |builder: QueryBuilder| {
        builder
            .filter(|p| {
                Expr::call(
                    "Contains",
                    vec![colors(), p.member("Color", Ty::String)],
                    Ty::Bool,
                )
            })
            .build()
            .unwrap()
    };
    let components = compiler().compile(&query(products())).unwrap();
    assert_eq!(components.uri(), "Products?$filter=Color in ('Red','Blue')");
    assert_eq!(components.version(), ProtocolVersion::V4_01);

    let strict = compiler_with(CompilerConfig {
        max_protocol_version: ProtocolVersion::V4_0,
        ..CompilerConfig::default()
    });
    assert_eq!(
        strict.compile(&query(products())).unwrap_err(),
        CompileError::ProtocolVersionTooLow {
            required: ProtocolVersion::V4_01,
            max: ProtocolVersion::V4_0,
        }
    );
}

#[test]
fn closed_subtrees_are_folded_before_binding() {
    let components = products()
        .filter(|p| {
            price(p).greater_than(Expr::binary(
                odata_query::query::ast::BinaryOp::Add,
                Expr::constant(2.0),
                Expr::constant(3.0),
            ))
        })
        .compile(&compiler())
        .unwrap();
    assert_eq!(components.uri(), "Products?$filter=Price gt 5");
}

#[test]
fn compare_idioms_are_normalized_and_recorded() {
    let components = products()
        .filter(|p| {
            Expr::call(
                "Compare",
                vec![p.member("Name", Ty::String), Expr::constant("M")],
                Ty::Int32,
            )
            .greater_than(Expr::constant(0))
        })
        .compile(&compiler())
        .unwrap();
    assert_eq!(components.uri(), "Products?$filter=Name gt 'M'");
    assert_eq!(components.rewrites().len(), 1);
}

#[test]
fn functions_render_parameters_inline() {
    let components = QueryBuilder::function(
        "TopProducts",
        Ty::entity("Product"),
        [("count", Value::Int32(3)), ("label", Value::from("best"))],
        true,
    )
    .take(2)
    .compile(&compiler())
    .unwrap();
    assert_eq!(components.uri(), "TopProducts(count=3,label='best')?$top=2");
    assert_eq!(components.http_method(), HttpMethod::Get);
    assert_eq!(components.uri_parameters().len(), 2);
    assert!(components.body_parameters().is_empty());
}

#[test]
fn actions_post_their_parameters_and_do_not_compose() {
    let components = QueryBuilder::action("ResetRatings", Ty::Bool, [("force", Value::Bool(true))])
        .compile(&compiler())
        .unwrap();
    assert_eq!(components.uri(), "ResetRatings");
    assert_eq!(components.http_method(), HttpMethod::Post);
    assert_eq!(components.body_parameters().len(), 1);
    assert_eq!(components.body_parameters()[0].name, "force");

    let err = QueryBuilder::action("ResetRatings", Ty::collection(Ty::Bool), [("force", Value::Bool(true))])
        .take(1)
        .compile(&compiler())
        .unwrap_err();
    assert_eq!(
        err,
        CompileError::NotComposable {
            name: "ResetRatings".into(),
            method: "Take".into(),
        }
    );
}

#[test]
fn singleton_projection() {
    let components = QueryBuilder::singleton("Me", "Customer")
        .select(|c| c.member("Name", Ty::String))
        .compile(&compiler())
        .unwrap();
    assert_eq!(components.uri(), "Me?$select=Name");
}

#[test]
fn operators_in_unsupported_positions_fail() {
    let err = products()
        .take(3)
        .filter(|p| price(p).greater_than(Expr::constant(1.0)))
        .compile(&compiler())
        .unwrap_err();
    assert_eq!(err, CompileError::unsupported_after("Where", "Take"));

    let err = products()
        .take(3)
        .skip(1)
        .compile(&compiler())
        .unwrap_err();
    assert_eq!(err, CompileError::unsupported_after("Skip", "Take"));

    let err = QueryBuilder::entity_set("Suppliers", "Supplier")
        .compile(&compiler())
        .unwrap_err();
    assert_eq!(
        err,
        CompileError::UnknownResource {
            name: "Suppliers".into()
        }
    );
}

#[test]
fn projection_of_unknown_member_names_the_member() {
    let err = products()
        .select(|p| p.member("Weight", Ty::Double))
        .compile(&compiler())
        .unwrap_err();
    assert_eq!(
        err,
        CompileError::UnknownMember {
            ty: "Product".into(),
            member: "Weight".into(),
        }
    );
}
