//! The reference order transform, run through a real script stage.

use crate::common::{fixed_clock, order, order_script_path, order_stage, script_stage, FIXED_NOW};
use rf_error::ErrorKind;
use rf_script::{ResourceLimits, ScriptSource, ScriptStageConfig, SystemClock};
use rf_traits::{Stage, StageOutcome};
use rf_types::{round_currency, Record};
use std::sync::Arc;

async fn transform(record: Record) -> Record {
    match order_stage().apply(record).await {
        StageOutcome::Emit(out) => out,
        other => panic!("expected emitted record, got {other:?}"),
    }
}

#[tokio::test]
async fn test_bulk_order() {
    let out = transform(order("O1", 20.0, 12, Some("Alice"))).await;

    assert_eq!(out.str("orderId"), Ok("O1"));
    assert_eq!(out.str("customerName"), Ok("Alice"));
    assert_eq!(out.number("items"), Ok(12.0));
    assert_eq!(out.number("unitPrice"), Ok(20.0));
    assert_eq!(out.number("subtotal"), Ok(240.0));
    assert_eq!(out.number("discountPercent"), Ok(15.0));
    assert_eq!(out.number("discountAmount"), Ok(36.0));
    assert_eq!(out.number("tax"), Ok(16.32));
    assert_eq!(out.number("total"), Ok(220.32));
    assert_eq!(out.str("processedAt"), Ok(FIXED_NOW));

    // the output replaces the input
    assert!(!out.contains("price"));
    assert!(!out.contains("customer"));
}

#[tokio::test]
async fn test_missing_customer_uses_placeholder() {
    let out = transform(order("O2", 9.99, 3, None)).await;

    assert_eq!(out.str("customerName"), Ok("Unknown"));
    assert_eq!(out.number("discountPercent"), Ok(5.0));
    assert_eq!(out.number("subtotal"), Ok(9.99 * 3.0));
}

#[tokio::test]
async fn test_customer_without_name_uses_placeholder() {
    let record = order("O3", 1.0, 1, None).with_field("customer", Record::new());
    let out = transform(record).await;
    assert_eq!(out.str("customerName"), Ok("Unknown"));
}

#[tokio::test]
async fn test_discount_tiers() {
    let stage = order_stage();

    for (quantity, expected) in [
        (1, 5.0),
        (4, 5.0),
        (5, 10.0),
        (9, 10.0),
        (10, 15.0),
        (250, 15.0),
    ] {
        let out = match stage.apply(order("T", 3.5, quantity, Some("Bo"))).await {
            StageOutcome::Emit(out) => out,
            other => panic!("quantity {quantity}: {other:?}"),
        };
        assert_eq!(out.number("discountPercent"), Ok(expected), "quantity {quantity}");
    }
}

#[tokio::test]
async fn test_totals_follow_rounding_rule() {
    let stage = order_stage();

    for (price, quantity) in [(9.99, 3), (0.333, 7), (19.95, 11), (1234.567, 5), (0.01, 1)] {
        let out = match stage.apply(order("P", price, quantity, None)).await {
            StageOutcome::Emit(out) => out,
            other => panic!("{price} x {quantity}: {other:?}"),
        };

        let subtotal = price * quantity as f64;
        let rate = out.number("discountPercent").unwrap() / 100.0;
        let discount = round_currency(subtotal * rate);
        let tax = round_currency((subtotal - discount) * 0.08);
        let total = round_currency(subtotal - discount + tax);

        assert_eq!(out.number("subtotal"), Ok(subtotal));
        assert_eq!(out.number("discountAmount"), Ok(discount));
        assert_eq!(out.number("tax"), Ok(tax));
        assert_eq!(out.number("total"), Ok(total));

        // rounding an already-rounded value is a no-op
        assert_eq!(round_currency(total), total);
    }
}

#[tokio::test]
async fn test_processed_at_from_system_clock() {
    let stage = script_stage(
        ScriptSource::File(order_script_path()),
        ResourceLimits::default(),
        1,
        ScriptStageConfig::default(),
        Arc::new(SystemClock),
    );

    let out = match stage.apply(order("O1", 20.0, 12, Some("Alice"))).await {
        StageOutcome::Emit(out) => out,
        other => panic!("{other:?}"),
    };
    let processed_at = out.str("processedAt").unwrap();
    assert!(processed_at.ends_with('Z'), "{processed_at}");
    assert!(chrono::DateTime::parse_from_rfc3339(processed_at).is_ok());
}

#[tokio::test]
async fn test_non_numeric_price_fails_record() {
    let stage = script_stage(
        ScriptSource::File(order_script_path()),
        ResourceLimits::default(),
        1,
        ScriptStageConfig::default(),
        fixed_clock(),
    );

    let bad = order("B1", 1.0, 2, None).with_field("price", "twenty");
    match stage.apply(bad).await {
        StageOutcome::Fail(error) => assert_eq!(error.kind, ErrorKind::ScriptError),
        other => panic!("expected failure, got {other:?}"),
    }

    // the evaluator that faulted is gone, the next record still works
    assert!(stage
        .apply(order("B2", 1.0, 2, None))
        .await
        .is_emit());
    assert_eq!(stage.pool_stats().destroyed, 1);
}
