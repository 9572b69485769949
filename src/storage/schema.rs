//! Table, index and search-table DDL at the current schema version.

use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

use super::search;

/// Logical schema version, stored in `PRAGMA user_version`.
pub const DATABASE_VERSION: i32 = 59;

pub(crate) const SMS_COLUMNS: &str = "(
    _id INTEGER PRIMARY KEY,
    thread_id INTEGER,
    address TEXT,
    person INTEGER,
    date INTEGER,
    date_sent INTEGER DEFAULT 0,
    protocol INTEGER,
    read INTEGER DEFAULT 0,
    status INTEGER DEFAULT -1,
    type INTEGER,
    reply_path_present INTEGER,
    subject TEXT,
    body TEXT,
    service_center TEXT,
    locked INTEGER DEFAULT 0,
    error_code INTEGER DEFAULT 0,
    seen INTEGER DEFAULT 0
)";

pub(crate) const PDU_COLUMNS: &str = "(
    _id INTEGER PRIMARY KEY AUTOINCREMENT,
    thread_id INTEGER,
    date INTEGER,
    date_sent INTEGER DEFAULT 0,
    msg_box INTEGER,
    read INTEGER DEFAULT 0,
    m_id TEXT,
    sub TEXT,
    sub_cs INTEGER,
    ct_t TEXT,
    ct_l TEXT,
    exp INTEGER,
    m_cls TEXT,
    m_type INTEGER,
    v INTEGER,
    m_size INTEGER,
    pri INTEGER,
    rr INTEGER,
    rpt_a INTEGER,
    resp_st INTEGER,
    st INTEGER,
    tr_id TEXT,
    retr_st INTEGER,
    retr_txt TEXT,
    retr_txt_cs INTEGER,
    read_status INTEGER,
    ct_cls INTEGER,
    resp_txt TEXT,
    d_tm INTEGER,
    d_rpt INTEGER,
    locked INTEGER DEFAULT 0,
    seen INTEGER DEFAULT 0,
    text_only INTEGER DEFAULT 0
)";

pub(crate) const PART_COLUMNS: &str = "(
    _id INTEGER PRIMARY KEY AUTOINCREMENT,
    mid INTEGER,
    seq INTEGER DEFAULT 0,
    ct TEXT,
    name TEXT,
    chset INTEGER,
    cd TEXT,
    fn TEXT,
    cid TEXT,
    cl TEXT,
    ctt_s INTEGER,
    ctt_t TEXT,
    _data TEXT,
    text TEXT
)";

pub(crate) const ADDR_COLUMNS: &str = "(
    _id INTEGER PRIMARY KEY,
    msg_id INTEGER,
    contact_id INTEGER,
    address TEXT,
    type INTEGER,
    charset INTEGER
)";

pub(crate) const CANONICAL_ADDRESSES_COLUMNS: &str = "(
    _id INTEGER PRIMARY KEY AUTOINCREMENT,
    address TEXT
)";

pub(crate) const THREADS_COLUMNS: &str = "(
    _id INTEGER PRIMARY KEY AUTOINCREMENT,
    date INTEGER DEFAULT 0,
    message_count INTEGER DEFAULT 0,
    recipient_ids TEXT,
    snippet TEXT,
    snippet_cs INTEGER DEFAULT 0,
    read INTEGER DEFAULT 1,
    type INTEGER DEFAULT 0,
    error INTEGER DEFAULT 0,
    has_attachment INTEGER DEFAULT 0
)";

pub(crate) const PENDING_COLUMNS: &str = "(
    _id INTEGER PRIMARY KEY,
    proto_type INTEGER,
    msg_id INTEGER,
    msg_type INTEGER,
    err_type INTEGER,
    err_code INTEGER,
    retry_index INTEGER NOT NULL DEFAULT 0,
    due_time INTEGER,
    last_try INTEGER
)";

/// Every table this store owns, with its column definitions.
pub(crate) const TABLES: &[(&str, &str)] = &[
    ("sms", SMS_COLUMNS),
    ("pdu", PDU_COLUMNS),
    ("part", PART_COLUMNS),
    ("addr", ADDR_COLUMNS),
    ("canonical_addresses", CANONICAL_ADDRESSES_COLUMNS),
    ("threads", THREADS_COLUMNS),
    ("pending_msgs", PENDING_COLUMNS),
];

/// Tables left behind by older releases that a reset also removes.
const LEGACY_TABLES: &[&str] = &["raw", "attachments", "sr_pending", "rate", "drm"];

pub(crate) fn columns_for(table: &str) -> Option<&'static str> {
    TABLES
        .iter()
        .find(|(name, _)| *name == table)
        .map(|(_, columns)| *columns)
}

/// Indexes are idempotent and re-run after a table is rebuilt.
pub(crate) fn create_indexes(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE INDEX IF NOT EXISTS typeThreadIdIndex ON sms (type, thread_id);
        CREATE INDEX IF NOT EXISTS smsThreadIdIndex ON sms (thread_id);
        CREATE INDEX IF NOT EXISTS pduThreadIdIndex ON pdu (thread_id);
        CREATE INDEX IF NOT EXISTS pduMidIndex ON pdu (m_id);
        CREATE INDEX IF NOT EXISTS partMidIndex ON part (mid);
        CREATE INDEX IF NOT EXISTS addrMsgIdIndex ON addr (msg_id);
        CREATE INDEX IF NOT EXISTS pendingMsgIdIndex ON pending_msgs (proto_type, msg_id);
        CREATE INDEX IF NOT EXISTS threadsRecipientIdsIndex ON threads (recipient_ids);
        "#,
    )?;
    Ok(())
}

/// Create the full schema in one pass and seed the search index.
pub(crate) fn create_all(conn: &Connection) -> Result<()> {
    for (table, columns) in TABLES {
        conn.execute_batch(&format!("CREATE TABLE IF NOT EXISTS {table} {columns};"))?;
    }
    create_indexes(conn)?;
    search::create_table(conn)?;
    search::populate(conn)?;
    conn.pragma_update(None, "user_version", DATABASE_VERSION)?;
    info!("Created message store schema at version {}", DATABASE_VERSION);
    Ok(())
}

/// Drop every table, view and trigger.
pub(crate) fn drop_all(conn: &Connection) -> Result<()> {
    let triggers: Vec<String> = {
        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'trigger'")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        names
    };
    for trigger in triggers {
        conn.execute_batch(&format!("DROP TRIGGER IF EXISTS \"{}\";", trigger.replace('"', "\"\"")))?;
    }

    conn.execute_batch("DROP TABLE IF EXISTS words;")?;
    for (table, _) in TABLES {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {table};"))?;
    }
    for table in LEGACY_TABLES {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {table};"))?;
    }
    Ok(())
}

pub(crate) fn user_version(conn: &Connection) -> Result<i32> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub(crate) fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        [table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Column names of an existing table in declaration order.
pub(crate) fn column_names(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
    let names = stmt
        .query_map([table], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}

/// `CREATE` statement of a table as SQLite stored it.
pub(crate) fn table_sql(conn: &Connection, table: &str) -> Result<Option<String>> {
    use rusqlite::OptionalExtension;

    let sql = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(sql)
}
