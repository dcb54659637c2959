use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS key_slot (
    id             INTEGER PRIMARY KEY CHECK (id = 1),  -- one slot per installation
    format_version INTEGER NOT NULL,
    key_material   BLOB NOT NULL,                       -- raw 32-byte symmetric key
    created_at     TEXT NOT NULL                        -- RFC 3339
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
