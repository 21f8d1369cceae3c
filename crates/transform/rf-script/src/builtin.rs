//! Built-in Rhai functions for transforms.

use crate::clock::Clock;
use chrono::SecondsFormat;
use rhai::{Dynamic, Engine, Map, FLOAT, INT};
use std::sync::Arc;

/// Registers all built-in functions in the Rhai engine.
pub fn register_builtin_functions(engine: &mut Engine, clock: Arc<dyn Clock>) {
    register_uuid_functions(engine);
    register_time_functions(engine, clock);
    register_parsing_functions(engine);
    register_numeric_functions(engine);
    register_field_functions(engine);
}

fn register_uuid_functions(engine: &mut Engine) {
    engine.register_fn("uuid", || uuid::Uuid::new_v4().to_string());
}

fn register_time_functions(engine: &mut Engine, clock: Arc<dyn Clock>) {
    // ISO 8601, UTC, millisecond precision: 2024-03-01T12:00:00.000Z
    let c = clock.clone();
    engine.register_fn("timestamp", move || {
        c.now().to_rfc3339_opts(SecondsFormat::Millis, true)
    });

    let c = clock.clone();
    engine.register_fn("unix_timestamp", move || -> INT { c.now().timestamp() });

    engine.register_fn("unix_timestamp_ms", move || -> INT {
        clock.now().timestamp_millis()
    });
}

fn register_parsing_functions(engine: &mut Engine) {
    engine.register_fn("parse_int", |s: &str| -> Dynamic {
        s.trim()
            .parse::<INT>()
            .map(Dynamic::from)
            .unwrap_or(Dynamic::UNIT)
    });

    engine.register_fn("parse_float", |s: &str| -> Dynamic {
        s.trim()
            .parse::<FLOAT>()
            .map(Dynamic::from)
            .unwrap_or(Dynamic::UNIT)
    });

    engine.register_fn("parse_bool", |s: &str| -> Dynamic {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Dynamic::from(true),
            "false" | "0" | "no" | "off" => Dynamic::from(false),
            _ => Dynamic::UNIT,
        }
    });
}

fn register_numeric_functions(engine: &mut Engine) {
    engine.register_fn("round_currency", |x: FLOAT| -> FLOAT {
        rf_types::round_currency(x)
    });
    engine.register_fn("round_currency", |x: INT| -> FLOAT { x as FLOAT });

    engine.register_fn("round_to", |x: FLOAT, places: INT| -> FLOAT {
        rf_types::round_to(x, clamp_places(places))
    });
    engine.register_fn("round_to", |x: INT, places: INT| -> FLOAT {
        rf_types::round_to(x as FLOAT, clamp_places(places))
    });
}

fn clamp_places(places: INT) -> i32 {
    places.clamp(-15, 15) as i32
}

fn register_field_functions(engine: &mut Engine) {
    // field_or(record, "customer.name", "Unknown")
    engine.register_fn(
        "field_or",
        |value: Dynamic, path: &str, default: Dynamic| -> Dynamic {
            lookup_path(value, path).unwrap_or(default)
        },
    );
}

/// Walks a dotted path; `None` when a segment is missing, not a map, or unit.
fn lookup_path(value: Dynamic, path: &str) -> Option<Dynamic> {
    let mut current = value;
    for segment in path.split('.') {
        let next = current.read_lock::<Map>()?.get(segment)?.clone();
        current = next;
    }
    if current.is_unit() {
        None
    } else {
        Some(current)
    }
}
