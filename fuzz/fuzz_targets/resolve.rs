//! Fuzz target for placeholder resolution.
//!
//! Arbitrary template text and parameter values must never panic the
//! resolver, and a text parameter must never reach the SQL verbatim through
//! a bound placeholder.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use finops_query::{ParameterSet, QueryError, QueryResolver, TemplateRegistry, Value};

#[derive(Arbitrary, Debug)]
struct ResolveInput {
    template: String,
    text: String,
    number: i64,
    use_text_for_dates: bool,
}

fuzz_target!(|input: ResolveInput| {
    let mut registry = TemplateRegistry::new();
    if registry.register("fuzz", [("q", input.template.as_str())]).is_err() {
        return;
    }

    let date = |offset: i64| {
        chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.checked_add_signed(chrono::Duration::days(offset.rem_euclid(3650))))
            .map(Value::Date)
            .unwrap_or(Value::Null)
    };
    let mut params = ParameterSet::new()
        .with("user_name", input.text.as_str())
        .with("limit", input.number);
    if input.use_text_for_dates {
        params.insert("start_date", input.text.as_str());
    } else {
        params.insert("start_date", date(input.number));
    }
    params.insert("end_date", date(input.number.wrapping_add(30)));

    match QueryResolver::default().resolve(&registry, "fuzz.q", &params) {
        Ok(resolved) => {
            let markers = resolved.sql.matches('?').count();
            let template_markers = input.template.matches('?').count();
            assert_eq!(markers, template_markers + resolved.binds.len());
        }
        Err(QueryError::UnsafeLiteral { name, .. }) => {
            assert!(name == "user_name" || (name == "start_date" && input.use_text_for_dates));
        }
        Err(_) => {}
    }
});
