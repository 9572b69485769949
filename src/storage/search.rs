//! Full-text index over SMS bodies and MMS text parts.
//!
//! `words` holds one row per (source id, table tag). The write path keeps it
//! in sync through the post-write hooks; nothing else writes to it.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::Result;
use crate::models::{SEARCH_TABLE_MMS_PART, SEARCH_TABLE_SMS};

use super::query::Source;
use super::MessageStore;

/// Maximum rows returned by [`MessageStore::search_suggestions`].
const SUGGESTION_LIMIT: i64 = 50;

/// One search result: the most recent match inside a thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub thread_id: i64,
    pub kind: Source,
    /// `sms._id` for SMS hits, `pdu._id` for MMS hits
    pub message_id: i64,
    pub text: String,
    pub normalized_date: i64,
}

pub(crate) fn create_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS words USING fts5(
            index_text, source_id UNINDEXED, table_to_use UNINDEXED
        );",
    )?;
    Ok(())
}

/// Rebuild the index from the current message tables.
pub(crate) fn populate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DELETE FROM words;
        INSERT INTO words (index_text, source_id, table_to_use)
            SELECT COALESCE(body, ''), _id, 1 FROM sms;
        INSERT INTO words (index_text, source_id, table_to_use)
            SELECT COALESCE(text, ''), _id, 2 FROM part WHERE ct = 'text/plain';
        "#,
    )?;
    Ok(())
}

pub(crate) fn index_insert(conn: &Connection, source_id: i64, table: i32, text: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO words (index_text, source_id, table_to_use) VALUES (?1, ?2, ?3)",
        params![text, source_id, table],
    )?;
    Ok(())
}

/// Replace the indexed text of a row, inserting it when missing.
pub(crate) fn index_update(conn: &Connection, source_id: i64, table: i32, text: &str) -> Result<()> {
    let updated = conn.execute(
        "UPDATE words SET index_text = ?1 WHERE source_id = ?2 AND table_to_use = ?3",
        params![text, source_id, table],
    )?;
    if updated == 0 {
        index_insert(conn, source_id, table, text)?;
    }
    Ok(())
}

pub(crate) fn index_delete(conn: &Connection, source_id: i64, table: i32) -> Result<()> {
    conn.execute(
        "DELETE FROM words WHERE source_id = ?1 AND table_to_use = ?2",
        params![source_id, table],
    )?;
    Ok(())
}

/// Prefix-match expression for a user pattern. Quotes keep FTS syntax
/// characters in the pattern literal.
fn match_expression(pattern: &str) -> Option<String> {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return None;
    }
    Some(format!("\"{}\"*", pattern.replace('"', "\"\"")))
}

fn thread_for_source(conn: &Connection, source_id: i64, table: i32) -> Result<Option<i64>> {
    let sql = match table {
        SEARCH_TABLE_SMS => "SELECT thread_id FROM sms WHERE _id = ?1",
        SEARCH_TABLE_MMS_PART => {
            "SELECT pdu.thread_id FROM part JOIN pdu ON pdu._id = part.mid WHERE part._id = ?1"
        }
        _ => return Ok(None),
    };
    let thread = conn
        .query_row(sql, [source_id], |row| row.get::<_, Option<i64>>(0))
        .optional()?;
    Ok(thread.flatten())
}

impl MessageStore {
    /// Search message text; one hit per thread, most recently active thread first.
    pub fn search(&self, pattern: &str) -> Result<Vec<SearchHit>> {
        let Some(expression) = match_expression(pattern) else {
            return Ok(Vec::new());
        };

        self.read(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT hits.thread_id, hits.table_to_use, hits.message_id, hits.index_text,
                       hits.normalized_date, MAX(hits.normalized_date)
                FROM (
                    SELECT words.table_to_use AS table_to_use,
                           words.index_text AS index_text,
                           CASE words.table_to_use WHEN 1 THEN sms._id ELSE pdu._id END AS message_id,
                           CASE words.table_to_use WHEN 1 THEN sms.thread_id ELSE pdu.thread_id END AS thread_id,
                           CASE words.table_to_use WHEN 1 THEN sms.date ELSE pdu.date * 1000 END AS normalized_date
                    FROM words
                    LEFT JOIN sms ON words.table_to_use = 1 AND sms._id = words.source_id
                    LEFT JOIN part ON words.table_to_use = 2 AND part._id = words.source_id
                    LEFT JOIN pdu ON pdu._id = part.mid
                    WHERE words MATCH ?1
                ) AS hits
                JOIN threads ON threads._id = hits.thread_id
                GROUP BY hits.thread_id
                ORDER BY threads.date DESC, hits.thread_id DESC
                "#,
            )?;

            let hits = stmt
                .query_map([expression], |row| {
                    let table: i32 = row.get(1)?;
                    Ok(SearchHit {
                        thread_id: row.get(0)?,
                        kind: if table == SEARCH_TABLE_SMS { Source::Sms } else { Source::Mms },
                        message_id: row.get(2)?,
                        text: row.get(3)?,
                        normalized_date: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(hits)
        })
    }

    /// Highlighted fragments of matching text, for type-ahead.
    pub fn search_suggestions(&self, pattern: &str) -> Result<Vec<String>> {
        let Some(expression) = match_expression(pattern) else {
            return Ok(Vec::new());
        };

        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT snippet(words, 0, '[', ']', '...', 8)
                 FROM words WHERE words MATCH ?1 LIMIT ?2",
            )?;
            let suggestions = stmt
                .query_map(params![expression, SUGGESTION_LIMIT], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(suggestions)
        })
    }

    /// Thread owning an indexed row, given its source id and table tag.
    pub fn message_id_to_thread(&self, source_id: i64, table: i32) -> Result<Option<i64>> {
        self.read(|conn| thread_for_source(conn, source_id, table))
    }
}
