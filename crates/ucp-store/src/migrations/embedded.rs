//! Embedded SQL migrations
//!
//! Migrations are embedded at compile time using include_str!

/// Migration metadata
pub struct Migration {
    pub id: &'static str,
    pub sql: &'static str,
}

/// Get all embedded migrations in order
pub fn get_migrations() -> Vec<Migration> {
    vec![
        Migration {
            id: "001_templates",
            sql: include_str!("../../migrations/001_templates.sql"),
        },
        Migration {
            id: "002_kv_entries",
            sql: include_str!("../../migrations/002_kv_entries.sql"),
        },
        Migration {
            id: "003_receipts",
            sql: include_str!("../../migrations/003_receipts.sql"),
        },
    ]
}
