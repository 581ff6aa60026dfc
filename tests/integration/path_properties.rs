#![allow(missing_docs)]

use std::sync::Arc;

use odata_query::{
    config::CompilerConfig,
    query::{
        ast::BinaryOp,
        partial_eval::partially_evaluate,
        path::{append_at_tail, deep_clone, remove_wildcard, PathSegmentToken, WILDCARD},
        writer::literal,
        Expr, InMemoryMetadata, QueryBuilder, QueryCompiler, Ty, Value,
    },
};
use proptest::prelude::*;

fn compiler() -> QueryCompiler {
    let model = InMemoryMetadata::new()
        .with_entity_type("Product", ["Id"])
        .with_property("Product", "Id", Ty::Int32)
        .with_property("Product", "Price", Ty::Int32)
        .with_entity_set("Products", "Product");
    QueryCompiler::new(CompilerConfig::default(), Arc::new(model))
}

fn segment_names() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[A-Z][a-z]{0,6}", 1..6)
}

fn chain(names: &[String]) -> PathSegmentToken {
    PathSegmentToken::from_segments(names.iter().map(|name| (name.clone(), false)))
        .expect("non-empty chain")
}

fn arithmetic() -> impl Strategy<Value = Expr> {
    let leaf = (0i32..100).prop_map(Expr::constant);
    leaf.prop_recursive(3, 16, 2, |inner| {
        (inner.clone(), inner, prop_oneof![Just(BinaryOp::Add), Just(BinaryOp::Subtract)])
            .prop_map(|(l, r, op)| Expr::binary(op, l, r))
    })
}

proptest! {
    #[test]
    fn consecutive_skips_add_up(a in 0i32..10_000, b in 0i32..10_000) {
        let components = QueryBuilder::entity_set("Products", "Product")
            .skip(a)
            .skip(b)
            .compile(&compiler())
            .unwrap();
        prop_assert_eq!(components.uri(), format!("Products?$skip={}", a + b));
    }

    #[test]
    fn consecutive_takes_keep_the_smaller(a in 0i32..10_000, b in 0i32..10_000) {
        let components = QueryBuilder::entity_set("Products", "Product")
            .take(a)
            .take(b)
            .compile(&compiler())
            .unwrap();
        prop_assert_eq!(components.uri(), format!("Products?$top={}", a.min(b)));
    }

    #[test]
    fn wildcard_truncates_before_itself(names in segment_names(), tail in segment_names()) {
        let mut all = names.clone();
        all.push(WILDCARD.to_string());
        all.extend(tail);
        let trimmed = remove_wildcard(chain(&all)).unwrap().expect("head is not a wildcard");
        let expected: Vec<&str> = names.iter().map(String::as_str).collect();
        prop_assert_eq!(trimmed.identifiers(), expected);
    }

    #[test]
    fn chains_without_wildcards_are_unchanged(names in segment_names()) {
        let head = chain(&names);
        prop_assert_eq!(remove_wildcard(head.clone()).unwrap(), Some(head));
    }

    #[test]
    fn deep_clone_is_equal_and_independent(names in segment_names(), extra in "[A-Z][a-z]{0,6}") {
        let original = chain(&names);
        let mut copy = deep_clone(&original).unwrap();
        prop_assert_eq!(&copy, &original);
        append_at_tail(&mut copy, Some(PathSegmentToken::segment(extra.clone(), true))).unwrap();
        prop_assert_eq!(original.identifiers().len(), names.len());
        prop_assert_eq!(copy.identifiers().len(), names.len() + 1);
        prop_assert_eq!(copy.identifiers().last().copied(), Some(extra.as_str()));
    }

    #[test]
    fn partial_evaluation_is_idempotent(rhs in arithmetic()) {
        let predicate = Expr::param("p", Ty::entity("Product"))
            .member("Price", Ty::Int32)
            .greater_than(rhs);
        let once = partially_evaluate(&predicate).unwrap();
        let twice = partially_evaluate(&once).unwrap();
        prop_assert_eq!(&once, &twice);
        let Expr::Binary { right, .. } = &once else {
            panic!("comparison expected, got {once}");
        };
        prop_assert!(right.as_constant().is_some());
    }

    #[test]
    fn string_literals_round_trip_through_escaping(text in ".{0,24}") {
        let rendered = literal(&Value::String(text.clone())).unwrap();
        prop_assert!(rendered.starts_with('\'') && rendered.ends_with('\''));
        let inner = &rendered[1..rendered.len() - 1];
        let decoded = urlencoding::decode(inner).unwrap();
        prop_assert_eq!(decoded.into_owned(), text.replace('\'', "''"));
    }
}
