use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Row;

/// Classification of a statement by its leading keyword.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    Alter,
    #[default]
    Other,
}

impl QueryType {
    /// Classify a statement by uppercasing its first token.
    pub fn of(sql: &str) -> QueryType {
        let token = sql.split_whitespace().next().unwrap_or("");

        match token.to_ascii_uppercase().as_str() {
            "SELECT" => QueryType::Select,
            "INSERT" => QueryType::Insert,
            "UPDATE" => QueryType::Update,
            "DELETE" => QueryType::Delete,
            "CREATE" => QueryType::Create,
            "DROP" => QueryType::Drop,
            "ALTER" => QueryType::Alter,
            _ => QueryType::Other,
        }
    }

    /// Whether statements of this type produce a result set.
    pub fn returns_rows(self) -> bool {
        matches!(self, QueryType::Select)
    }
}

/// The outcome of one executed statement.
#[derive(Debug, Default)]
pub struct QueryResult {
    /// For SELECT statements, every produced row, materialised eagerly.
    /// Empty otherwise.
    pub rows: Vec<Row>,

    /// Rows changed by the statement; for a SELECT, the number of rows
    /// materialised.
    pub rows_affected: u64,

    /// The rowid of the most recent successful INSERT on this connection.
    pub last_insert_id: i64,

    /// Wall-clock time measured around the driver call, including row
    /// materialisation.
    pub execution_time: Duration,

    pub query_type: QueryType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_first_token() {
        assert_eq!(QueryType::of("SELECT 1"), QueryType::Select);
        assert_eq!(QueryType::of("  \n\tselect 1"), QueryType::Select);
        assert_eq!(QueryType::of("insert into t values (1)"), QueryType::Insert);
        assert_eq!(QueryType::of("Update t set a = 1"), QueryType::Update);
        assert_eq!(QueryType::of("DELETE FROM t"), QueryType::Delete);
        assert_eq!(QueryType::of("create table t (a)"), QueryType::Create);
        assert_eq!(QueryType::of("DROP TABLE t"), QueryType::Drop);
        assert_eq!(QueryType::of("alter table t add b"), QueryType::Alter);
    }

    #[test]
    fn unknown_keywords_are_other() {
        assert_eq!(QueryType::of("PRAGMA user_version"), QueryType::Other);
        assert_eq!(QueryType::of("WITH x AS (SELECT 1) SELECT * FROM x"), QueryType::Other);
        assert_eq!(QueryType::of(""), QueryType::Other);
        assert_eq!(QueryType::of("   "), QueryType::Other);
    }

    #[test]
    fn only_select_returns_rows() {
        assert!(QueryType::Select.returns_rows());
        assert!(!QueryType::Insert.returns_rows());
        assert!(!QueryType::Other.returns_rows());
    }
}
