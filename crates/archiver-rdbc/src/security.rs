//! Guards for SQL text built from configuration
//!
//! Table and column names are spliced into `DESC`, `SELECT` and `DELETE`
//! statements, and the optional row filter is spliced into `SELECT`. None of
//! these can be bound as parameters, so they are checked here first.

use crate::error::{Error, Result};

/// Longest identifier accepted. MySQL itself stops at 64.
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Longest row filter accepted
pub const MAX_WHERE_LEN: usize = 4096;

/// Fragments that would let a filter end the statement or hide the rest of it
const FORBIDDEN_IN_WHERE: &[(&str, &str)] = &[
    (";", "statement separator"),
    ("--", "line comment"),
    ("#", "line comment"),
    ("/*", "block comment"),
    ("*/", "block comment"),
];

/// Check a bare identifier: ASCII letter or `_` first, then letters, digits
/// or `_`, at most [`MAX_IDENTIFIER_LEN`] characters.
///
/// ```
/// use archiver_rdbc::security::validate_sql_identifier;
///
/// assert!(validate_sql_identifier("orders_2023").is_ok());
/// assert!(validate_sql_identifier("_tmp").is_ok());
///
/// assert!(validate_sql_identifier("").is_err());
/// assert!(validate_sql_identifier("2023_orders").is_err());
/// assert!(validate_sql_identifier("x; DROP TABLE users--").is_err());
/// ```
pub fn validate_sql_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::config("identifier must not be empty"));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::config(format!(
            "identifier '{}' is {} characters long (max {})",
            name,
            name.len(),
            MAX_IDENTIFIER_LEN
        )));
    }

    let starts_ok = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !starts_ok {
        return Err(Error::config(format!(
            "identifier '{}' must start with a letter or underscore",
            name
        )));
    }
    if let Some(bad) = name.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(Error::config(format!(
            "identifier '{}' contains '{}'",
            name, bad
        )));
    }
    Ok(())
}

/// Check `table` or `schema.table`.
///
/// ```
/// use archiver_rdbc::security::validate_table_reference;
///
/// assert!(validate_table_reference("orders").is_ok());
/// assert!(validate_table_reference("shop.orders").is_ok());
/// assert!(validate_table_reference("a.b.c").is_err());
/// assert!(validate_table_reference("shop.").is_err());
/// ```
pub fn validate_table_reference(name: &str) -> Result<()> {
    match name.split_once('.') {
        None => validate_sql_identifier(name),
        Some((schema, table)) if !table.contains('.') => {
            validate_sql_identifier(schema)?;
            validate_sql_identifier(table)
        }
        Some(_) => Err(Error::config(format!(
            "'{}' is not a table or schema.table reference",
            name
        ))),
    }
}

/// Backtick-quote an identifier or dotted reference, doubling embedded
/// backticks.
///
/// ```
/// use archiver_rdbc::security::quote_identifier;
///
/// assert_eq!(quote_identifier("id"), "`id`");
/// assert_eq!(quote_identifier("shop.orders"), "`shop`.`orders`");
/// assert_eq!(quote_identifier("we`ird"), "`we``ird`");
/// ```
pub fn quote_identifier(name: &str) -> String {
    let mut quoted = String::with_capacity(name.len() + 4);
    for (i, part) in name.split('.').enumerate() {
        if i > 0 {
            quoted.push('.');
        }
        quoted.push('`');
        quoted.push_str(&part.replace('`', "``"));
        quoted.push('`');
    }
    quoted
}

/// Screen an operator-supplied row filter.
///
/// The filter is trusted SQL from whoever runs the archiver, so only
/// statement stacking and comment tricks are refused. Quoted literals and
/// quoted identifiers are skipped, so `note LIKE '%--%'` passes while a
/// bare `-- rest` does not.
///
/// ```
/// use archiver_rdbc::security::validate_where_clause;
///
/// assert!(validate_where_clause("created_at < '2024-01-01'").is_ok());
/// assert!(validate_where_clause("status IN ('done', 'void')").is_ok());
/// assert!(validate_where_clause("note LIKE '%--%'").is_ok());
/// assert!(validate_where_clause("sku = 'A#1'").is_ok());
///
/// assert!(validate_where_clause("1=1; DROP TABLE orders").is_err());
/// assert!(validate_where_clause("1=1 -- rest").is_err());
/// assert!(validate_where_clause("1=1 /* x */").is_err());
/// assert!(validate_where_clause("sku = 'A#1").is_err());
/// ```
pub fn validate_where_clause(clause: &str) -> Result<()> {
    if clause.trim().is_empty() {
        return Err(Error::config("WHERE clause must not be blank"));
    }
    if clause.len() > MAX_WHERE_LEN {
        return Err(Error::config(format!(
            "WHERE clause is {} characters long (max {})",
            clause.len(),
            MAX_WHERE_LEN
        )));
    }
    let bytes = clause.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' && q != b'`' {
                    i += 1;
                } else if b == q {
                    // A doubled quote stays inside the literal.
                    if bytes.get(i + 1) == Some(&q) {
                        i += 1;
                    } else {
                        quote = None;
                    }
                }
            }
            None if matches!(b, b'\'' | b'"' | b'`') => quote = Some(b),
            None => {
                let rest = &bytes[i..];
                if let Some((pattern, what)) = FORBIDDEN_IN_WHERE
                    .iter()
                    .find(|(pattern, _)| rest.starts_with(pattern.as_bytes()))
                {
                    return Err(Error::config(format!(
                        "WHERE clause contains {} '{}': {}",
                        what, pattern, clause
                    )));
                }
            }
        }
        i += 1;
    }
    if quote.is_some() {
        return Err(Error::config(format!(
            "WHERE clause has an unterminated quote: {}",
            clause
        )));
    }
    Ok(())
}
