// ABOUTME: Utility functions for identifier handling and numeric text normalization
// ABOUTME: Provides identifier validation/quoting, header-to-column naming and number parsing

use crate::error::{EtlError, Result};

/// Validate a table or column name before it is interpolated into SQL
///
/// Accepts ASCII letters, digits and underscores, not starting with a digit,
/// at most 63 characters long.
///
/// # Examples
///
/// ```
/// # use tabular_etl::utils::validate_identifier;
/// assert!(validate_identifier("wiki_item").is_ok());
/// assert!(validate_identifier("").is_err());
/// assert!(validate_identifier("items; DROP TABLE x").is_err());
/// ```
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(EtlError::InvalidArgument(
            "identifier cannot be empty".to_string(),
        ));
    }
    if name.len() > 63 {
        return Err(EtlError::InvalidArgument(format!(
            "identifier '{}...' is longer than 63 characters",
            sanitize_identifier(&name.chars().take(20).collect::<String>())
        )));
    }
    let mut chars = name.chars();
    let starts_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !starts_ok || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(EtlError::InvalidArgument(format!(
            "invalid identifier '{}': use letters, digits and underscores only",
            sanitize_identifier(name)
        )));
    }
    Ok(())
}

/// Double-quote an identifier for SQL, escaping embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Sanitize an identifier (table name, field name, etc.) for display
///
/// Removes control characters and limits length to prevent log injection
/// and keep error messages readable.
///
/// **Note**: This is for display purposes only. For SQL safety, use
/// [`validate_identifier`] and parameterized queries.
///
/// # Examples
///
/// ```
/// # use tabular_etl::utils::sanitize_identifier;
/// assert_eq!(sanitize_identifier("normal_table"), "normal_table");
/// assert_eq!(sanitize_identifier("table\x00name"), "tablename");
/// assert_eq!(sanitize_identifier("table\nname"), "tablename");
///
/// // Length limit
/// let long_name = "a".repeat(200);
/// assert_eq!(sanitize_identifier(&long_name).len(), 100);
/// ```
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Turn a free-form header ("Birth Date (UTC)") into a valid column name ("birth_date_utc")
///
/// # Examples
///
/// ```
/// # use tabular_etl::utils::column_name;
/// assert_eq!(column_name("Birth Date (UTC)"), "birth_date_utc");
/// assert_eq!(column_name("2nd value"), "_2nd_value");
/// assert_eq!(column_name("%%"), "column");
/// ```
pub fn column_name(header: &str) -> String {
    let mut name = String::new();
    for c in header.trim().chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_lowercase());
        } else if !name.is_empty() && !name.ends_with('_') {
            name.push('_');
        }
    }
    let name = name.trim_end_matches('_');
    if name.is_empty() {
        return "column".to_string();
    }
    let mut name = if name.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{}", name)
    } else {
        name.to_string()
    };
    name.truncate(63);
    name
}

/// Rewrite the spellings of scientific notation people type into a form
/// `f64::from_str` accepts
///
/// Handles `1.2x10^3`, `1.2*10^3`, `1.2×10^3`, `1.2 E+03`, fortran-style `1.2D3`
/// and thousands separators.
///
/// # Examples
///
/// ```
/// # use tabular_etl::utils::normalize_scientific_notation;
/// assert_eq!(normalize_scientific_notation("1.2x10^3"), "1.2e3");
/// assert_eq!(normalize_scientific_notation(" 1,234.5 "), "1234.5");
/// assert_eq!(normalize_scientific_notation("6.02 E+23"), "6.02e+23");
/// ```
pub fn normalize_scientific_notation(text: &str) -> String {
    let mut s: String = text
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && *c != '_')
        .collect();
    for marker in ["x10^", "X10^", "*10^", "×10^", "x10**", "*10**"] {
        if s.contains(marker) {
            s = s.replace(marker, "e");
        }
    }
    // fortran exponents and upper-case E
    if let Some(pos) = s.find(['D', 'd', 'E']) {
        let (mantissa, rest) = s.split_at(pos);
        let exponent = &rest[1..];
        let looks_numeric = !mantissa.is_empty()
            && mantissa.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '-' || c == '+')
            && !exponent.is_empty()
            && exponent
                .chars()
                .all(|c| c.is_ascii_digit() || c == '-' || c == '+');
        if looks_numeric {
            s = format!("{}e{}", mantissa, exponent);
        }
    }
    s
}

/// Parse a float accepting the spellings handled by [`normalize_scientific_notation`]
pub fn parse_float(text: &str) -> Option<f64> {
    normalize_scientific_notation(text).parse::<f64>().ok()
}
