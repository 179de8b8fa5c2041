pub mod usage_queries;

/// Quote a SQL identifier for Postgres: wrap in double quotes and double any
/// embedded quote. Identifier names come from trusted configuration, but they
/// are never interpolated bare into statement text.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
