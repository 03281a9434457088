//! Identifier and literal quoting for generated SQL

/// Quote an identifier with double quotes (DuckDB / ANSI)
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a dotted name part by part (`schema.table`)
pub fn quote_qualified(name: &str) -> String {
    name.split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(".")
}

/// Quote a string literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Render a watermark for a predicate; numeric watermarks stay unquoted
pub fn watermark_literal(value: &str, numeric: bool) -> String {
    if numeric && value.parse::<f64>().is_ok() {
        value.to_string()
    } else {
        quote_literal(value)
    }
}
