//! Purpose: Catalog of officially distributed extensions and the builtin (statically linked) set.
//! Exports: `OFFICIAL_EXTENSIONS`, `is_official_extension`, `canonical_name`, `builtin_extensions`.
//! Role: Lets the load path decide whether a static-link short-circuit can apply.
//! Invariants: Official-name matching is ASCII case-insensitive.
//! Invariants: The builtin set is fixed at compile time by `builtin-*` Cargo features.

pub const OFFICIAL_EXTENSIONS: &[&str] = &[
    "algo",
    "azure",
    "delta",
    "duckdb",
    "fts",
    "httpfs",
    "iceberg",
    "json",
    "llm",
    "neo4j",
    "postgres",
    "sqlite",
    "unity_catalog",
    "vector",
];

pub fn is_official_extension(name: &str) -> bool {
    OFFICIAL_EXTENSIONS
        .iter()
        .any(|official| official.eq_ignore_ascii_case(name))
}

/// Canonical (lowercase) spelling for an official extension name.
pub fn canonical_name(name: &str) -> Option<&'static str> {
    OFFICIAL_EXTENSIONS
        .iter()
        .copied()
        .find(|official| official.eq_ignore_ascii_case(name))
}

/// Extensions compiled into this binary.
pub fn builtin_extensions() -> Vec<&'static str> {
    let mut builtin = Vec::new();
    if cfg!(feature = "builtin-fts") {
        builtin.push("fts");
    }
    if cfg!(feature = "builtin-json") {
        builtin.push("json");
    }
    if cfg!(feature = "builtin-vector") {
        builtin.push("vector");
    }
    builtin
}
