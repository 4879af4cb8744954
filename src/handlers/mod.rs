pub mod collection_handlers;
pub mod database_handlers;
pub mod document_handlers;
pub mod file_handlers;
pub mod health_handlers;

use serde_json::{Value, json};

/// Body returned by operations that only report success.
pub(crate) fn ok_body() -> Value {
    json!({ "ok": true })
}

/// Lenient boolean flag parsing for query and form values: `true`, `on` and
/// `1` (any case) are true, everything else is false.
pub(crate) fn flag(raw: Option<&str>) -> bool {
    raw.map(str::trim).is_some_and(|v| {
        v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("on") || v == "1"
    })
}
