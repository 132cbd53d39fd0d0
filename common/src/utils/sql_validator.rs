//! SQL statement helpers.

/// Classifies SQL statements and quotes identifiers.
pub struct SqlValidator;

impl SqlValidator {
    /// Checks if the SQL is a modification query (INSERT/UPDATE/DELETE).
    pub fn is_modification(sql: &str) -> bool {
        let sql_upper = sql.trim_start().to_uppercase();
        sql_upper.starts_with("INSERT")
            || sql_upper.starts_with("UPDATE")
            || sql_upper.starts_with("DELETE")
    }

    /// Checks whether `keyword` appears in `sql` as a whole word, ignoring case.
    pub fn has_keyword(sql: &str, keyword: &str) -> bool {
        sql.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .any(|word| word.eq_ignore_ascii_case(keyword))
    }

    /// Quotes an identifier with double quotes (ANSI / SQLite / PostgreSQL).
    pub fn quote_ident(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Quotes an identifier with backticks (Cypher labels and relationship types).
    pub fn quote_backtick(name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }
}
