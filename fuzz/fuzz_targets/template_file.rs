//! Fuzz target for TOML template files.
//!
//! Malformed files must surface as `SourceParse` or `InvalidTemplate`, never
//! as a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;

use finops_query::TemplateRegistry;

fuzz_target!(|data: &[u8]| {
    let Ok(content) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(table) = content.parse::<toml::Table>() else {
        return;
    };
    let mut registry = TemplateRegistry::new();
    if registry.register_toml("fuzz", &table).is_ok() {
        for template in registry.templates() {
            let _ = template.placeholders();
        }
    }
});
