//! Versioned schema upgrades.
//!
//! Each step runs in its own transaction together with the `user_version`
//! bump, and checks whether its change is already present before acting,
//! so a step interrupted by a full disk can simply run again later.

use std::collections::BTreeSet;
use std::path::PathBuf;

use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};

use super::consistency::recompute_all_attachments;
use super::schema::{
    column_names, columns_for, create_all, create_indexes, drop_all, has_column, table_sql,
    user_version, DATABASE_VERSION,
};
use super::search;

/// Oldest version the upgrade chain starts from; anything older is recreated.
pub const OLDEST_UPGRADABLE_VERSION: i32 = 40;

/// Tables rebuilt with non-reusable AUTOINCREMENT keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AutoIncrementTable {
    Threads,
    CanonicalAddresses,
    Part,
    Pdu,
}

impl AutoIncrementTable {
    pub const ALL: [AutoIncrementTable; 4] = [
        AutoIncrementTable::Threads,
        AutoIncrementTable::CanonicalAddresses,
        AutoIncrementTable::Part,
        AutoIncrementTable::Pdu,
    ];

    pub fn table(self) -> &'static str {
        match self {
            AutoIncrementTable::Threads => "threads",
            AutoIncrementTable::CanonicalAddresses => "canonical_addresses",
            AutoIncrementTable::Part => "part",
            AutoIncrementTable::Pdu => "pdu",
        }
    }
}

/// Upgrade work postponed until storage recovers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeferredUpgrades {
    /// Version the step chain stopped at
    pub chain_at: Option<i32>,
    pub tables: BTreeSet<AutoIncrementTable>,
}

impl DeferredUpgrades {
    pub fn is_empty(&self) -> bool {
        self.chain_at.is_none() && self.tables.is_empty()
    }
}

/// Bring an opened database to [`DATABASE_VERSION`].
///
/// Returns whatever could not be applied because storage ran out.
pub(crate) fn prepare(conn: &mut Connection) -> Result<DeferredUpgrades> {
    let version = user_version(conn)?;
    let mut deferred = DeferredUpgrades::default();

    if version > DATABASE_VERSION {
        return Err(StoreError::UnsupportedVersion {
            found: version,
            supported: DATABASE_VERSION,
        });
    }

    if version == 0 {
        info!("Creating message store schema");
        reset(conn)?;
        return Ok(deferred);
    }

    if version < OLDEST_UPGRADABLE_VERSION {
        warn!(
            "Database version {} predates the upgrade chain; recreating, existing messages are lost",
            version
        );
        reset(conn)?;
        return Ok(deferred);
    }

    if version < DATABASE_VERSION {
        info!("Upgrading message store from version {} to {}", version, DATABASE_VERSION);
        run_chain(conn, &mut deferred)?;
    }

    if deferred.chain_at.is_some() {
        deferred.tables.extend(AutoIncrementTable::ALL);
    } else {
        convert_tables(conn, AutoIncrementTable::ALL, &mut deferred);
    }
    Ok(deferred)
}

/// Re-run exactly the deferred items.
pub(crate) fn retry_deferred(conn: &mut Connection, deferred: &mut DeferredUpgrades) -> Result<()> {
    if deferred.chain_at.is_some() {
        run_chain(conn, deferred)?;
        if deferred.chain_at.is_some() {
            return Ok(());
        }
    }
    let tables: Vec<_> = deferred.tables.iter().copied().collect();
    convert_tables(conn, tables, deferred);
    Ok(())
}

/// Drop everything and create the current schema.
pub(crate) fn reset(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    drop_all(&tx)?;
    create_all(&tx)?;
    tx.commit()?;
    Ok(())
}

fn run_chain(conn: &mut Connection, deferred: &mut DeferredUpgrades) -> Result<()> {
    match upgrade(conn) {
        Ok(()) => {
            deferred.chain_at = None;
            Ok(())
        }
        Err(err) if err.is_low_storage() => {
            let at = user_version(conn)?;
            warn!("Upgrade stopped at version {} for lack of storage, deferring: {}", at, err);
            deferred.chain_at = Some(at);
            Ok(())
        }
        Err(err) => {
            warn!("Upgrade failed, recreating database; existing messages are lost: {}", err);
            reset(conn)?;
            deferred.chain_at = None;
            deferred.tables.clear();
            Ok(())
        }
    }
}

fn upgrade(conn: &mut Connection) -> Result<()> {
    let from = user_version(conn)?;
    for version in (from + 1)..=DATABASE_VERSION {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inlined = apply_step(&tx, version)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;

        // Inlined files are only removed once their text is durable
        for path in inlined {
            if let Err(err) = std::fs::remove_file(&path) {
                warn!("Could not remove inlined part file {:?}: {}", path, err);
            }
        }
        debug!("Upgraded message store to version {}", version);
    }
    Ok(())
}

fn add_column_if_missing(conn: &Connection, table: &str, column: &str, decl: &str) -> Result<()> {
    if !has_column(conn, table, column)? {
        conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl};"))?;
    }
    Ok(())
}

fn drop_triggers(conn: &Connection, names: &[&str]) -> Result<()> {
    for name in names {
        conn.execute_batch(&format!("DROP TRIGGER IF EXISTS {name};"))?;
    }
    Ok(())
}

/// Apply one upgrade step. Returns files to delete after commit.
pub(crate) fn apply_step(conn: &Connection, version: i32) -> Result<Vec<PathBuf>> {
    match version {
        41 => drop_triggers(conn, &["update_threads_error_on_move_mms"])?,
        42 => drop_triggers(
            conn,
            &[
                "sms_update_thread_on_delete",
                "delete_obsolete_threads_sms",
                "update_threads_error_on_delete_sms",
            ],
        )?,
        43 => {
            add_column_if_missing(conn, "threads", "has_attachment", "INTEGER DEFAULT 0")?;
            recompute_all_attachments(conn)?;
        }
        44 | 47 => recompute_all_attachments(conn)?,
        45 => {
            add_column_if_missing(conn, "sms", "locked", "INTEGER DEFAULT 0")?;
            add_column_if_missing(conn, "pdu", "locked", "INTEGER DEFAULT 0")?;
        }
        46 => return inline_text_parts(conn),
        48 => add_column_if_missing(conn, "sms", "error_code", "INTEGER DEFAULT 0")?,
        49 => {
            search::create_table(conn)?;
            search::populate(conn)?;
        }
        50 => conn.execute_batch("CREATE INDEX IF NOT EXISTS typeThreadIdIndex ON sms (type, thread_id);")?,
        51 => {
            add_column_if_missing(conn, "sms", "seen", "INTEGER DEFAULT 0")?;
            add_column_if_missing(conn, "pdu", "seen", "INTEGER DEFAULT 0")?;
            conn.execute_batch(
                "UPDATE sms SET seen = 1 WHERE read = 1;
                 UPDATE pdu SET seen = 1 WHERE read = 1;",
            )?;
        }
        53 => drop_triggers(conn, &["pdu_update_thread_read_on_update"])?,
        54 => {
            add_column_if_missing(conn, "sms", "date_sent", "INTEGER DEFAULT 0")?;
            add_column_if_missing(conn, "pdu", "date_sent", "INTEGER DEFAULT 0")?;
        }
        55 => drop_triggers(
            conn,
            &["delete_obsolete_threads_pdu", "delete_obsolete_threads_when_update_pdu"],
        )?,
        56 => add_column_if_missing(conn, "pdu", "text_only", "INTEGER DEFAULT 0")?,
        57 => delete_threadless_pdus(conn)?,
        58 => drop_all_triggers(conn)?,
        59 => convert_search_table(conn)?,
        _ => {}
    }
    Ok(Vec::new())
}

/// Move text and SMIL part bodies from files into `part.text`.
fn inline_text_parts(conn: &Connection) -> Result<Vec<PathBuf>> {
    add_column_if_missing(conn, "part", "text", "TEXT")?;

    let candidates: Vec<(i64, String)> = {
        let mut stmt = conn.prepare(
            "SELECT _id, _data FROM part
             WHERE (ct = 'text/plain' OR ct = 'application/smil') AND _data IS NOT NULL",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };

    let mut inlined = Vec::new();
    for (id, data) in candidates {
        let path = PathBuf::from(data);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("Skipping part {}: cannot read {:?}: {}", id, path, err);
                continue;
            }
        };
        let text = String::from_utf8_lossy(&bytes);
        conn.execute(
            "UPDATE part SET text = ?2, _data = NULL WHERE _id = ?1",
            rusqlite::params![id, text],
        )?;
        inlined.push(path);
    }
    Ok(inlined)
}

fn delete_threadless_pdus(conn: &Connection) -> Result<()> {
    if super::schema::table_exists(conn, "words")? {
        conn.execute_batch(
            "DELETE FROM words WHERE table_to_use = 2 AND source_id IN (
                 SELECT part._id FROM part JOIN pdu ON part.mid = pdu._id
                 WHERE pdu.thread_id IS NULL);",
        )?;
    }
    conn.execute_batch(
        "DELETE FROM part WHERE mid IN (SELECT _id FROM pdu WHERE thread_id IS NULL);
         DELETE FROM addr WHERE msg_id IN (SELECT _id FROM pdu WHERE thread_id IS NULL);
         DELETE FROM pending_msgs WHERE proto_type = 1
             AND msg_id IN (SELECT _id FROM pdu WHERE thread_id IS NULL);
         DELETE FROM pdu WHERE thread_id IS NULL;",
    )?;
    Ok(())
}

/// Derived state is maintained by the write path now; any trigger left
/// over from an older release would apply it twice.
fn drop_all_triggers(conn: &Connection) -> Result<()> {
    let names: Vec<String> = {
        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'trigger'")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        names
    };
    for name in names {
        conn.execute_batch(&format!("DROP TRIGGER IF EXISTS \"{}\";", name.replace('"', "\"\"")))?;
    }
    Ok(())
}

fn convert_search_table(conn: &Connection) -> Result<()> {
    let is_fts5 = table_sql(conn, "words")?
        .map(|sql| sql.to_ascii_lowercase().contains("fts5"))
        .unwrap_or(false);
    if !is_fts5 {
        conn.execute_batch("DROP TABLE IF EXISTS words;")?;
        search::create_table(conn)?;
    }
    search::populate(conn)
}

fn convert_tables(
    conn: &mut Connection,
    tables: impl IntoIterator<Item = AutoIncrementTable>,
    deferred: &mut DeferredUpgrades,
) {
    for table in tables {
        match convert_to_autoincrement(conn, table) {
            Ok(_) => {
                deferred.tables.remove(&table);
            }
            Err(err) => {
                warn!("Deferring AUTOINCREMENT conversion of {}: {}", table.table(), err);
                deferred.tables.insert(table);
            }
        }
    }
}

/// Rebuild a table so deleted ids are never reused. Returns false when the
/// table already had AUTOINCREMENT.
pub(crate) fn convert_to_autoincrement(conn: &mut Connection, table: AutoIncrementTable) -> Result<bool> {
    let name = table.table();
    let Some(sql) = table_sql(conn, name)? else {
        return Ok(false);
    };
    if sql.to_ascii_uppercase().contains("AUTOINCREMENT") {
        return Ok(false);
    }
    let columns = columns_for(name).ok_or(StoreError::NotFound)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let temp = format!("{name}_temp");
    tx.execute_batch(&format!("DROP TABLE IF EXISTS {temp}; CREATE TABLE {temp} {columns};"))?;

    let existing = column_names(&tx, name)?;
    let shared = column_names(&tx, &temp)?
        .into_iter()
        .filter(|column| existing.contains(column))
        .map(|column| format!("\"{column}\""))
        .collect::<Vec<_>>()
        .join(", ");

    tx.execute_batch(&format!(
        "INSERT INTO {temp} ({shared}) SELECT {shared} FROM {name};
         DROP TABLE {name};
         ALTER TABLE {temp} RENAME TO {name};"
    ))?;
    create_indexes(&tx)?;
    tx.commit()?;

    info!("Converted {} to AUTOINCREMENT keys", name);
    Ok(true)
}
