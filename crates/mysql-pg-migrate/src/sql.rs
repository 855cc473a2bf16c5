//! Identifier and literal quoting for generated SQL.

/// Quote a PostgreSQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Schema-qualified, quoted PostgreSQL name.
pub fn qualify(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

/// Quote a string literal for either engine (standard SQL single quotes).
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Longest identifier PostgreSQL stores without truncation (NAMEDATALEN - 1).
pub const MAX_IDENT_LEN: usize = 63;

/// Truncate a generated name the way PostgreSQL would, on a char boundary.
pub fn pg_name(name: &str) -> String {
    if name.len() <= MAX_IDENT_LEN {
        return name.to_string();
    }
    let mut end = MAX_IDENT_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

/// Quote a MySQL identifier.
pub fn quote_mysql_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoting() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(qualify("shop", "orders"), "\"shop\".\"orders\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_mysql_ident("order"), "`order`");
    }

    #[test]
    fn test_pg_name_truncates_long_names() {
        assert_eq!(pg_name("state_logs_shopshop"), "state_logs_shopshop");
        let long = "x".repeat(70);
        assert_eq!(pg_name(&long).len(), MAX_IDENT_LEN);
        let multibyte = format!("{}é", "a".repeat(62));
        assert_eq!(pg_name(&multibyte), "a".repeat(62));
    }
}
