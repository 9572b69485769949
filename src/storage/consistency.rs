//! Derived thread state.
//!
//! Every row-level write records a [`Change`] through the unit of work, and
//! [`apply`] runs the matching post-write hook inside the same transaction.
//! The hooks are the only code that writes the derived `threads` columns
//! (`date`, `message_count`, `snippet`, `snippet_cs`, `read`, `error`,
//! `has_attachment`).

use std::collections::HashSet;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::models::{
    parse_recipient_ids, MessageBox, MmsMessageType, NewPending, Part, PendingMessage, Pdu,
    Protocol, Sms, SmsType, SEARCH_TABLE_MMS_PART, SEARCH_TABLE_SMS,
};

use super::{search, writes, MessageStore};

/// Counted SMS rows.
const SMS_COUNTED: &str = "type != 3";
/// Counted PDU rows: displayed message types outside the drafts box.
const PDU_COUNTED: &str = "m_type IN (128, 130, 132) AND msg_box != 3";

/// Engine settings shared by every hook.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EngineOptions {
    pub failure_threshold: i32,
    pub strict_phone: bool,
}

impl From<&StoreConfig> for EngineOptions {
    fn from(config: &StoreConfig) -> Self {
        Self {
            failure_threshold: config.permanent_failure_threshold,
            strict_phone: config.strict_phone_compare,
        }
    }
}

/// A committed-in-this-transaction row change awaiting its hook.
#[derive(Debug, Clone)]
pub(crate) enum Change {
    SmsInserted(Sms),
    SmsUpdated { old: Sms, new: Sms },
    SmsDeleted(Sms),
    PduInserted(Pdu),
    PduUpdated { old: Pdu, new: Pdu },
    PduDeleted(Pdu),
    PartInserted(Part),
    PartUpdated { old: Part, new: Part },
    PartDeleted(Part),
    PendingInserted(PendingMessage),
    PendingUpdated { old: PendingMessage, new: PendingMessage },
    PendingDeleted(PendingMessage),
    /// Bulk read/seen update of every message in a thread
    ThreadMarkedRead(i64),
}

pub(crate) fn apply(conn: &Connection, options: &EngineOptions, change: Change) -> Result<()> {
    match change {
        Change::SmsInserted(sms) => on_sms_inserted(conn, options, &sms),
        Change::SmsUpdated { old, new } => on_sms_updated(conn, options, &old, &new),
        Change::SmsDeleted(sms) => on_sms_deleted(conn, options, &sms),
        Change::PduInserted(pdu) => on_pdu_inserted(conn, options, &pdu),
        Change::PduUpdated { old, new } => on_pdu_updated(conn, options, &old, &new),
        Change::PduDeleted(pdu) => on_pdu_deleted(conn, options, &pdu),
        Change::PartInserted(part) => on_part_inserted(conn, &part),
        Change::PartUpdated { old, new } => on_part_updated(conn, &old, &new),
        Change::PartDeleted(part) => on_part_deleted(conn, &part),
        Change::PendingInserted(pending) => pending_edge(conn, options, None, Some(&pending)),
        Change::PendingUpdated { old, new } => pending_edge(conn, options, Some(&old), Some(&new)),
        Change::PendingDeleted(pending) => pending_edge(conn, options, Some(&pending), None),
        Change::ThreadMarkedRead(thread_id) => recompute_read(conn, thread_id),
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn edge_delta(before: bool, after: bool) -> i64 {
    i64::from(after) - i64::from(before)
}

// SMS

fn on_sms_inserted(conn: &Connection, options: &EngineOptions, sms: &Sms) -> Result<()> {
    search::index_insert(conn, sms.id, SEARCH_TABLE_SMS, sms.body.as_deref().unwrap_or(""))?;

    let Some(thread_id) = sms.thread_id else {
        return Ok(());
    };
    if sms.is_counted() {
        recompute_on_new_message(conn, thread_id)?;
    }
    if sms_failed(conn, options, sms)? {
        adjust_error(conn, thread_id, 1)?;
    }
    Ok(())
}

fn on_sms_updated(conn: &Connection, options: &EngineOptions, old: &Sms, new: &Sms) -> Result<()> {
    if old.body != new.body {
        search::index_update(conn, new.id, SEARCH_TABLE_SMS, new.body.as_deref().unwrap_or(""))?;
    }

    if old.thread_id != new.thread_id {
        // Pending rows go first so neither side counts a dropped send failure
        if old.sms_type == SmsType::Outbox && new.sms_type != SmsType::Outbox {
            delete_pending_rows(conn, Protocol::Sms, new.id)?;
        }
        for thread_id in [old.thread_id, new.thread_id].into_iter().flatten() {
            update_thread(conn, options, thread_id)?;
        }
        return Ok(());
    }

    let Some(thread_id) = new.thread_id else {
        return Ok(());
    };

    let content_changed =
        old.date != new.date || old.body != new.body || old.sms_type != new.sms_type;
    if content_changed && (old.is_counted() || new.is_counted()) {
        recompute_on_new_message(conn, thread_id)?;
    } else if old.read != new.read {
        recompute_read(conn, thread_id)?;
    }

    let failed_before = old.sms_type == SmsType::Failed || pending_failed(conn, options, Protocol::Sms, old.id)?;
    if old.sms_type == SmsType::Outbox && new.sms_type != SmsType::Outbox {
        delete_pending_rows(conn, Protocol::Sms, new.id)?;
    }
    let failed_after = sms_failed(conn, options, new)?;
    adjust_error(conn, thread_id, edge_delta(failed_before, failed_after))
}

fn on_sms_deleted(conn: &Connection, options: &EngineOptions, sms: &Sms) -> Result<()> {
    search::index_delete(conn, sms.id, SEARCH_TABLE_SMS)?;
    delete_pending_rows(conn, Protocol::Sms, sms.id)?;
    match sms.thread_id {
        Some(thread_id) => update_thread(conn, options, thread_id),
        None => Ok(()),
    }
}

// PDU

fn on_pdu_inserted(conn: &Connection, options: &EngineOptions, pdu: &Pdu) -> Result<()> {
    if let Some(thread_id) = pdu.thread_id {
        if pdu.is_counted() {
            recompute_on_new_message(conn, thread_id)?;
        }
    }

    if matches!(pdu.m_type, MmsMessageType::NotificationInd | MmsMessageType::ReadRecInd) {
        insert_pending_row(conn, options, Protocol::Mms, pdu)?;
    }
    Ok(())
}

fn on_pdu_updated(conn: &Connection, options: &EngineOptions, old: &Pdu, new: &Pdu) -> Result<()> {
    let entered_outbox = new.m_type == MmsMessageType::SendReq
        && new.msg_box == MessageBox::Outbox
        && old.msg_box != MessageBox::Outbox;
    let left_outbox = old.msg_box == MessageBox::Outbox && new.msg_box != MessageBox::Outbox;

    if left_outbox {
        let failed_before = pending_failed(conn, options, Protocol::Mms, old.id)?;
        delete_pending_rows(conn, Protocol::Mms, old.id)?;
        if let Some(thread_id) = old.thread_id {
            adjust_error(conn, thread_id, edge_delta(failed_before, false))?;
        }
    }
    if entered_outbox {
        insert_pending_row(conn, options, Protocol::Mms, new)?;
    }

    if old.thread_id != new.thread_id {
        if let Some(previous) = old.thread_id {
            update_thread(conn, options, previous)?;
        }
        if let Some(thread_id) = new.thread_id {
            recompute_on_new_message(conn, thread_id)?;
            recompute_error(conn, options, thread_id)?;
            recompute_attachment(conn, thread_id)?;
        }
        return Ok(());
    }

    let Some(thread_id) = new.thread_id else {
        return Ok(());
    };

    let content_changed = old.date != new.date
        || old.sub != new.sub
        || old.sub_cs != new.sub_cs
        || old.msg_box != new.msg_box
        || old.m_type != new.m_type;
    if content_changed && (old.is_counted() || new.is_counted()) {
        recompute_on_new_message(conn, thread_id)?;
    } else if old.read != new.read {
        recompute_read(conn, thread_id)?;
    }
    Ok(())
}

fn on_pdu_deleted(conn: &Connection, options: &EngineOptions, pdu: &Pdu) -> Result<()> {
    for part in writes::parts_of(conn, pdu.id)? {
        conn.execute("DELETE FROM part WHERE _id = ?1", [part.id])?;
        on_part_deleted(conn, &part)?;
    }
    conn.execute("DELETE FROM addr WHERE msg_id = ?1", [pdu.id])?;
    delete_pending_rows(conn, Protocol::Mms, pdu.id)?;

    // Delivery and read reports die with the message they report on
    if pdu.m_type == MmsMessageType::SendReq {
        if let Some(m_id) = pdu.m_id.as_deref() {
            for report in writes::reports_for(conn, m_id)? {
                conn.execute("DELETE FROM pdu WHERE _id = ?1", [report.id])?;
                on_pdu_deleted(conn, options, &report)?;
            }
        }
    }

    match pdu.thread_id {
        Some(thread_id) => update_thread(conn, options, thread_id),
        None => Ok(()),
    }
}

// Parts

fn parent_thread(conn: &Connection, mid: i64) -> Result<Option<i64>> {
    let thread = conn
        .query_row("SELECT thread_id FROM pdu WHERE _id = ?1", [mid], |row| {
            row.get::<_, Option<i64>>(0)
        })
        .optional()?;
    Ok(thread.flatten())
}

fn on_part_inserted(conn: &Connection, part: &Part) -> Result<()> {
    if part.is_attachment() {
        conn.execute(
            "UPDATE threads SET has_attachment = 1
             WHERE _id IN (SELECT thread_id FROM pdu WHERE _id = ?1)",
            [part.mid],
        )?;
    }
    if part.is_plain_text() {
        search::index_insert(conn, part.id, SEARCH_TABLE_MMS_PART, part.text.as_deref().unwrap_or(""))?;
    }
    Ok(())
}

fn on_part_updated(conn: &Connection, old: &Part, new: &Part) -> Result<()> {
    if new.is_plain_text() {
        if old.text != new.text || !old.is_plain_text() {
            search::index_update(conn, new.id, SEARCH_TABLE_MMS_PART, new.text.as_deref().unwrap_or(""))?;
        }
    } else if old.is_plain_text() {
        search::index_delete(conn, old.id, SEARCH_TABLE_MMS_PART)?;
    }

    let attachment_moved = old.mid != new.mid || old.ct != new.ct;
    if attachment_moved && (old.is_attachment() || new.is_attachment()) {
        let mut threads = vec![parent_thread(conn, old.mid)?, parent_thread(conn, new.mid)?];
        threads.dedup();
        for thread_id in threads.into_iter().flatten() {
            recompute_attachment(conn, thread_id)?;
        }
    }
    Ok(())
}

fn on_part_deleted(conn: &Connection, part: &Part) -> Result<()> {
    if part.is_plain_text() {
        search::index_delete(conn, part.id, SEARCH_TABLE_MMS_PART)?;
    }
    if part.is_attachment() {
        // The parent PDU may already be gone, so rescan every thread
        recompute_all_attachments(conn)?;
    }
    Ok(())
}

// Pending queue and failure state

fn owning_thread(conn: &Connection, protocol: Protocol, msg_id: i64) -> Result<Option<i64>> {
    let sql = format!("SELECT thread_id FROM {} WHERE _id = ?1", protocol.table());
    let thread = conn
        .query_row(&sql, [msg_id], |row| row.get::<_, Option<i64>>(0))
        .optional()?;
    Ok(thread.flatten())
}

fn pending_failed(conn: &Connection, options: &EngineOptions, protocol: Protocol, msg_id: i64) -> Result<bool> {
    let failed: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM pending_msgs
                        WHERE proto_type = ?1 AND msg_id = ?2 AND err_type >= ?3)",
        params![protocol, msg_id, options.failure_threshold],
        |row| row.get(0),
    )?;
    Ok(failed)
}

fn sms_failed(conn: &Connection, options: &EngineOptions, sms: &Sms) -> Result<bool> {
    Ok(sms.sms_type == SmsType::Failed || pending_failed(conn, options, Protocol::Sms, sms.id)?)
}

/// Adjust `error` when a pending row's `err_type` crosses the threshold.
///
/// Other pending rows of the same message, and an SMS `type` of failed,
/// already count the message as failed; only a change of the message's
/// overall state moves the counter.
fn pending_edge(
    conn: &Connection,
    options: &EngineOptions,
    old: Option<&PendingMessage>,
    new: Option<&PendingMessage>,
) -> Result<()> {
    let Some(row) = new.or(old) else {
        return Ok(());
    };
    let Some(thread_id) = owning_thread(conn, row.proto_type, row.msg_id)? else {
        return Ok(());
    };

    let sms_type_failed = match row.proto_type {
        Protocol::Sms => {
            let sms_type: Option<i32> = conn
                .query_row("SELECT type FROM sms WHERE _id = ?1", [row.msg_id], |r| r.get(0))
                .optional()?
                .flatten();
            sms_type == Some(SmsType::Failed.code())
        }
        Protocol::Mms => false,
    };
    let others_failed: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM pending_msgs
                        WHERE proto_type = ?1 AND msg_id = ?2 AND _id != ?3 AND err_type >= ?4)",
        params![row.proto_type, row.msg_id, row.id, options.failure_threshold],
        |r| r.get(0),
    )?;

    let base = sms_type_failed || others_failed;
    let threshold = options.failure_threshold;
    let before = base || old.is_some_and(|p| p.err_type >= threshold);
    let after = base || new.is_some_and(|p| p.err_type >= threshold);
    adjust_error(conn, thread_id, edge_delta(before, after))
}

fn insert_pending_row(conn: &Connection, options: &EngineOptions, protocol: Protocol, pdu: &Pdu) -> Result<()> {
    let pending = NewPending::new(protocol, pdu.id, pdu.m_type.code());
    let id = writes::insert_pending_row(conn, &pending)?;
    if let Some(row) = writes::load_pending(conn, id)? {
        pending_edge(conn, options, None, Some(&row))?;
    }
    Ok(())
}

fn delete_pending_rows(conn: &Connection, protocol: Protocol, msg_id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM pending_msgs WHERE proto_type = ?1 AND msg_id = ?2",
        params![protocol, msg_id],
    )?;
    Ok(())
}

fn adjust_error(conn: &Connection, thread_id: i64, delta: i64) -> Result<()> {
    if delta != 0 {
        conn.execute(
            "UPDATE threads SET error = error + ?2 WHERE _id = ?1",
            params![thread_id, delta],
        )?;
    }
    Ok(())
}

// Thread recomputation

/// Latest counted message of a thread: (snippet, snippet_cs, normalized date).
fn latest_counted(conn: &Connection, thread_id: i64) -> Result<Option<(Option<String>, i32, i64)>> {
    let sql = format!(
        "SELECT snippet, snippet_cs, normalized_date FROM (
             SELECT body AS snippet, 0 AS snippet_cs, COALESCE(date, 0) AS normalized_date,
                    0 AS source, _id
             FROM sms WHERE thread_id = ?1 AND {SMS_COUNTED}
             UNION ALL
             SELECT sub, COALESCE(sub_cs, 0), COALESCE(date, 0) * 1000, 1, _id
             FROM pdu WHERE thread_id = ?1 AND {PDU_COUNTED}
         )
         ORDER BY normalized_date DESC, source ASC, _id DESC
         LIMIT 1"
    );
    let latest = conn
        .query_row(&sql, [thread_id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .optional()?;
    Ok(latest)
}

fn recompute_count(conn: &Connection, thread_id: i64) -> Result<()> {
    conn.execute(
        &format!(
            "UPDATE threads SET message_count =
                 (SELECT COUNT(*) FROM sms WHERE thread_id = ?1 AND {SMS_COUNTED})
               + (SELECT COUNT(*) FROM pdu WHERE thread_id = ?1 AND {PDU_COUNTED})
             WHERE _id = ?1"
        ),
        [thread_id],
    )?;
    Ok(())
}

/// Write snippet, and optionally date, from the latest counted message.
fn recompute_snippet(conn: &Connection, thread_id: i64, with_date: bool) -> Result<()> {
    match latest_counted(conn, thread_id)? {
        Some((snippet, snippet_cs, date)) => {
            if with_date {
                conn.execute(
                    "UPDATE threads SET snippet = ?2, snippet_cs = ?3, date = ?4 WHERE _id = ?1",
                    params![thread_id, snippet, snippet_cs, date],
                )?;
            } else {
                conn.execute(
                    "UPDATE threads SET snippet = ?2, snippet_cs = ?3 WHERE _id = ?1",
                    params![thread_id, snippet, snippet_cs],
                )?;
            }
        }
        None => {
            conn.execute(
                "UPDATE threads SET snippet = NULL, snippet_cs = 0 WHERE _id = ?1",
                [thread_id],
            )?;
        }
    }
    Ok(())
}

pub(crate) fn recompute_read(conn: &Connection, thread_id: i64) -> Result<()> {
    conn.execute(
        &format!(
            "UPDATE threads SET read = CASE
                 (SELECT COUNT(*) FROM sms WHERE thread_id = ?1 AND read = 0 AND {SMS_COUNTED})
               + (SELECT COUNT(*) FROM pdu WHERE thread_id = ?1 AND read = 0 AND {PDU_COUNTED})
               WHEN 0 THEN 1 ELSE 0 END
             WHERE _id = ?1"
        ),
        [thread_id],
    )?;
    Ok(())
}

fn recompute_error(conn: &Connection, options: &EngineOptions, thread_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE threads SET error =
             (SELECT COUNT(*) FROM sms WHERE thread_id = ?1 AND (type = 5 OR _id IN
                 (SELECT msg_id FROM pending_msgs WHERE proto_type = 0 AND err_type >= ?2)))
           + (SELECT COUNT(*) FROM pdu WHERE thread_id = ?1 AND _id IN
                 (SELECT msg_id FROM pending_msgs WHERE proto_type = 1 AND err_type >= ?2))
         WHERE _id = ?1",
        params![thread_id, options.failure_threshold],
    )?;
    Ok(())
}

pub(crate) fn recompute_attachment(conn: &Connection, thread_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE threads SET has_attachment = EXISTS (
             SELECT 1 FROM part JOIN pdu ON part.mid = pdu._id
             WHERE pdu.thread_id = ?1
               AND part.ct NOT IN ('text/plain', 'application/smil'))
         WHERE _id = ?1",
        [thread_id],
    )?;
    Ok(())
}

/// Recompute `has_attachment` for every thread.
pub(crate) fn recompute_all_attachments(conn: &Connection) -> Result<()> {
    conn.execute(
        "UPDATE threads SET has_attachment = EXISTS (
             SELECT 1 FROM part JOIN pdu ON part.mid = pdu._id
             WHERE pdu.thread_id = threads._id
               AND part.ct NOT IN ('text/plain', 'application/smil'))",
        [],
    )?;
    Ok(())
}

/// A counted message arrived or changed: date becomes now, then count,
/// snippet and read are rebuilt.
fn recompute_on_new_message(conn: &Connection, thread_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE threads SET date = ?2 WHERE _id = ?1",
        params![thread_id, now_millis()],
    )?;
    recompute_count(conn, thread_id)?;
    recompute_snippet(conn, thread_id, false)?;
    recompute_read(conn, thread_id)?;
    debug!("Recomputed thread {} after message change", thread_id);
    Ok(())
}

fn thread_has_messages(conn: &Connection, thread_id: i64) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sms WHERE thread_id = ?1)
             OR EXISTS (SELECT 1 FROM pdu WHERE thread_id = ?1)",
        [thread_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Full recompute of one thread, or deletion when no message references it.
/// A negative id recomputes every thread.
pub(crate) fn update_thread(conn: &Connection, options: &EngineOptions, thread_id: i64) -> Result<()> {
    if thread_id < 0 {
        return update_all_threads(conn, options);
    }

    if !thread_has_messages(conn, thread_id)? {
        let deleted = conn.execute("DELETE FROM threads WHERE _id = ?1", [thread_id])?;
        if deleted > 0 {
            debug!("Deleted empty thread {}", thread_id);
            gc_canonical_addresses(conn)?;
        }
        return Ok(());
    }

    recompute_count(conn, thread_id)?;
    recompute_snippet(conn, thread_id, true)?;
    recompute_read(conn, thread_id)?;
    recompute_error(conn, options, thread_id)?;
    recompute_attachment(conn, thread_id)?;
    Ok(())
}

pub(crate) fn update_all_threads(conn: &Connection, options: &EngineOptions) -> Result<()> {
    let thread_ids: Vec<i64> = {
        let mut stmt = conn.prepare(
            "SELECT _id FROM threads WHERE _id IN (
                 SELECT thread_id FROM sms WHERE thread_id IS NOT NULL
                 UNION SELECT thread_id FROM pdu WHERE thread_id IS NOT NULL)",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        ids
    };

    for thread_id in &thread_ids {
        update_thread(conn, options, *thread_id)?;
    }
    let removed = delete_obsolete_threads(conn)?;
    debug!("Recomputed {} threads, removed {} obsolete", thread_ids.len(), removed);
    Ok(())
}

/// Delete threads no message references; returns how many were removed.
pub(crate) fn delete_obsolete_threads(conn: &Connection) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM threads WHERE _id NOT IN (
             SELECT thread_id FROM sms WHERE thread_id IS NOT NULL
             UNION SELECT thread_id FROM pdu WHERE thread_id IS NOT NULL)",
        [],
    )?;
    if removed > 0 {
        gc_canonical_addresses(conn)?;
    }
    Ok(removed)
}

/// Delete canonical addresses no thread refers to; returns how many were removed.
pub(crate) fn gc_canonical_addresses(conn: &Connection) -> Result<usize> {
    let referenced: HashSet<i64> = {
        let mut stmt = conn.prepare("SELECT recipient_ids FROM threads")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, Option<String>>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        keys.iter()
            .flatten()
            .flat_map(|ids| parse_recipient_ids(ids))
            .collect()
    };

    let orphans: Vec<i64> = {
        let mut stmt = conn.prepare("SELECT _id FROM canonical_addresses")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        ids.into_iter().filter(|id| !referenced.contains(id)).collect()
    };

    for id in &orphans {
        conn.execute("DELETE FROM canonical_addresses WHERE _id = ?1", [id])?;
    }
    if !orphans.is_empty() {
        debug!("Removed {} orphaned canonical addresses", orphans.len());
    }
    Ok(orphans.len())
}

impl MessageStore {
    /// Recompute a thread's derived columns; a negative id recomputes all.
    pub fn update_thread(&self, thread_id: i64) -> Result<()> {
        self.write(|uow| update_thread(uow.conn(), uow.options(), thread_id))
    }

    pub fn update_all_threads(&self) -> Result<()> {
        self.write(|uow| update_all_threads(uow.conn(), uow.options()))
    }

    pub fn delete_obsolete_threads(&self) -> Result<usize> {
        self.write(|uow| delete_obsolete_threads(uow.conn()))
    }

    pub fn gc_canonical_addresses(&self) -> Result<usize> {
        self.write(|uow| gc_canonical_addresses(uow.conn()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        NewPart, NewPdu, NewPending, NewSms, PartUpdate, PduUpdate, PendingUpdate, SmsUpdate,
        Thread,
    };

    fn store() -> MessageStore {
        MessageStore::open_in_memory().unwrap()
    }

    fn thread(store: &MessageStore, id: i64) -> Thread {
        store.thread(id).unwrap().expect("thread exists")
    }

    fn inbox_sms(address: &str, body: &str, date: i64) -> NewSms {
        NewSms {
            address: Some(address.into()),
            body: Some(body.into()),
            date: Some(date),
            ..Default::default()
        }
    }

    #[test]
    fn test_first_sms_creates_thread() {
        let store = store();
        let id = store.insert_sms(&inbox_sms("555-1234", "hi", 1_000)).unwrap();
        let sms = store.sms(id).unwrap().unwrap();
        let thread_id = sms.thread_id.unwrap();

        let t = thread(&store, thread_id);
        assert_eq!(t.message_count, 1);
        assert!(!t.read);
        assert_eq!(t.snippet.as_deref(), Some("hi"));
        assert_eq!(store.canonical_addresses().unwrap().len(), 1);
    }

    #[test]
    fn test_second_sms_then_delete_restores_snippet() {
        let store = store();
        let first = store.insert_sms(&inbox_sms("555-1234", "hi", 1_000)).unwrap();
        let thread_id = store.sms(first).unwrap().unwrap().thread_id.unwrap();
        let date_after_first = thread(&store, thread_id).date;

        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = store.insert_sms(&inbox_sms("555-1234", "are you there", 2_000)).unwrap();
        assert_eq!(store.sms(second).unwrap().unwrap().thread_id, Some(thread_id));

        let t = thread(&store, thread_id);
        assert_eq!(t.message_count, 2);
        assert_eq!(t.snippet.as_deref(), Some("are you there"));
        assert!(t.date > date_after_first);

        store.delete_sms(second).unwrap();
        let t = thread(&store, thread_id);
        assert_eq!(t.message_count, 1);
        assert_eq!(t.snippet.as_deref(), Some("hi"));
    }

    #[test]
    fn test_read_flag_tracks_unread_messages() {
        let store = store();
        let a = store.insert_sms(&inbox_sms("5551234", "one", 1)).unwrap();
        let b = store.insert_sms(&inbox_sms("5551234", "two", 2)).unwrap();
        let thread_id = store.sms(a).unwrap().unwrap().thread_id.unwrap();

        store.update_sms(a, &SmsUpdate { read: Some(true), ..Default::default() }).unwrap();
        assert!(!thread(&store, thread_id).read);

        store.update_sms(b, &SmsUpdate { read: Some(true), ..Default::default() }).unwrap();
        assert!(thread(&store, thread_id).read);
    }

    #[test]
    fn test_drafts_are_not_counted_and_keep_thread_alive() {
        let store = store();
        let id = store
            .insert_sms(&NewSms { sms_type: SmsType::Draft, ..inbox_sms("5551234", "draft", 5) })
            .unwrap();
        let thread_id = store.sms(id).unwrap().unwrap().thread_id.unwrap();

        let t = thread(&store, thread_id);
        assert_eq!(t.message_count, 0);
        assert_eq!(t.snippet, None);

        // Zero counted messages is not an empty thread
        store.update_thread(thread_id).unwrap();
        assert!(store.thread(thread_id).unwrap().is_some());

        store.delete_sms(id).unwrap();
        assert!(store.thread(thread_id).unwrap().is_none());
        assert!(store.canonical_addresses().unwrap().is_empty());
    }

    #[test]
    fn test_snippet_compares_mms_dates_in_milliseconds() {
        let store = store();
        let sms = store.insert_sms(&inbox_sms("6505551234", "sms text", 1_500_000)).unwrap();
        let thread_id = store.sms(sms).unwrap().unwrap().thread_id.unwrap();

        // 2_000 seconds is later than 1_500_000 milliseconds
        store
            .insert_pdu(&NewPdu {
                thread_id: Some(thread_id),
                date: Some(2_000),
                sub: Some("mms subject".into()),
                sub_cs: Some(106),
                m_type: MmsMessageType::RetrieveConf,
                ..Default::default()
            })
            .unwrap();

        let t = thread(&store, thread_id);
        assert_eq!(t.message_count, 2);
        assert_eq!(t.snippet.as_deref(), Some("mms subject"));
        assert_eq!(t.snippet_cs, 106);
    }

    #[test]
    fn test_attachment_set_and_globally_cleared() {
        let store = store();
        let pdu = store
            .insert_pdu(&NewPdu {
                recipients: vec!["6505550000".into()],
                m_type: MmsMessageType::RetrieveConf,
                ..Default::default()
            })
            .unwrap();
        let thread_id = store.pdu(pdu).unwrap().unwrap().thread_id.unwrap();
        assert!(!thread(&store, thread_id).has_attachment);

        store
            .insert_part(pdu, &NewPart { ct: Some("text/plain".into()), text: Some("caption".into()), ..Default::default() })
            .unwrap();
        assert!(!thread(&store, thread_id).has_attachment);

        let image = store
            .insert_part(pdu, &NewPart { ct: Some("image/jpeg".into()), ..Default::default() })
            .unwrap();
        assert!(thread(&store, thread_id).has_attachment);

        // A stale flag on another thread is fixed by the global rescan
        let other = store.get_or_create_thread_id(&["alice@example.com"]).unwrap();
        store
            .read(|conn| {
                conn.execute("UPDATE threads SET has_attachment = 1 WHERE _id = ?1", [other])?;
                Ok(())
            })
            .unwrap();

        store.delete_part(image).unwrap();
        assert!(!thread(&store, thread_id).has_attachment);
        assert!(!thread(&store, other).has_attachment);
    }

    #[test]
    fn test_part_moved_between_pdus_moves_attachment_flag() {
        let store = store();
        let a = store
            .insert_pdu(&NewPdu { recipients: vec!["6505550000".into()], ..Default::default() })
            .unwrap();
        let b = store
            .insert_pdu(&NewPdu { recipients: vec!["alice@example.com".into()], ..Default::default() })
            .unwrap();
        let thread_a = store.pdu(a).unwrap().unwrap().thread_id.unwrap();
        let thread_b = store.pdu(b).unwrap().unwrap().thread_id.unwrap();

        let part = store
            .insert_part(a, &NewPart { ct: Some("video/mp4".into()), ..Default::default() })
            .unwrap();
        store.update_part(part, &PartUpdate { mid: Some(b), ..Default::default() }).unwrap();

        assert!(!thread(&store, thread_a).has_attachment);
        assert!(thread(&store, thread_b).has_attachment);
    }

    fn pending_for_sms(store: &MessageStore) -> (i64, i64) {
        let sms = store
            .insert_sms(&NewSms { sms_type: SmsType::Outbox, ..inbox_sms("5551234", "sending", 10) })
            .unwrap();
        let thread_id = store.sms(sms).unwrap().unwrap().thread_id.unwrap();
        let pending = store
            .insert_pending(&NewPending { err_type: 5, ..NewPending::new(Protocol::Sms, sms, 0) })
            .unwrap();
        (thread_id, pending)
    }

    #[test]
    fn test_pending_error_crossing_is_edge_triggered() {
        let store = store();
        let (thread_id, pending) = pending_for_sms(&store);
        assert_eq!(thread(&store, thread_id).error, 0);

        let set = |err_type| PendingUpdate { err_type: Some(err_type), ..Default::default() };

        store.update_pending(pending, &set(12)).unwrap();
        assert_eq!(thread(&store, thread_id).error, 1);

        store.update_pending(pending, &set(12)).unwrap();
        assert_eq!(thread(&store, thread_id).error, 1);

        store.update_pending(pending, &set(3)).unwrap();
        assert_eq!(thread(&store, thread_id).error, 0);
    }

    #[test]
    fn test_sms_failed_type_transitions() {
        let store = store();
        let id = store.insert_sms(&inbox_sms("5551234", "x", 1)).unwrap();
        let thread_id = store.sms(id).unwrap().unwrap().thread_id.unwrap();

        let set = |t| SmsUpdate { sms_type: Some(t), ..Default::default() };
        store.update_sms(id, &set(SmsType::Failed)).unwrap();
        assert_eq!(thread(&store, thread_id).error, 1);
        store.update_sms(id, &set(SmsType::Failed)).unwrap();
        assert_eq!(thread(&store, thread_id).error, 1);
        store.update_sms(id, &set(SmsType::Sent)).unwrap();
        assert_eq!(thread(&store, thread_id).error, 0);
    }

    #[test]
    fn test_failed_pending_and_failed_type_count_once() {
        let store = store();
        let (thread_id, pending) = pending_for_sms(&store);
        let sms = store.pending(pending).unwrap().unwrap().msg_id;

        store.update_pending(pending, &PendingUpdate { err_type: Some(20), ..Default::default() }).unwrap();
        store.update_sms(sms, &SmsUpdate { sms_type: Some(SmsType::Failed), ..Default::default() }).unwrap();

        // Leaving the outbox dropped the pending row; the type still fails it
        assert!(store.pending(pending).unwrap().is_none());
        assert_eq!(thread(&store, thread_id).error, 1);

        store.update_thread(thread_id).unwrap();
        assert_eq!(thread(&store, thread_id).error, 1);
    }

    #[test]
    fn test_sms_leaving_outbox_for_another_thread_drops_its_failure() {
        let store = store();
        let (thread_a, pending) = pending_for_sms(&store);
        let sms = store.pending(pending).unwrap().unwrap().msg_id;
        store.update_pending(pending, &PendingUpdate { err_type: Some(12), ..Default::default() }).unwrap();
        assert_eq!(thread(&store, thread_a).error, 1);

        let thread_b = store.get_or_create_thread_id(&["5559876"]).unwrap();
        store
            .update_sms(
                sms,
                &SmsUpdate { thread_id: Some(thread_b), sms_type: Some(SmsType::Sent), ..Default::default() },
            )
            .unwrap();

        assert!(store.pending(pending).unwrap().is_none());
        assert!(store.thread(thread_a).unwrap().is_none());
        assert_eq!(thread(&store, thread_b).error, 0);
        assert_eq!(thread(&store, thread_b).message_count, 1);

        store.update_thread(thread_b).unwrap();
        assert_eq!(thread(&store, thread_b).error, 0);
    }

    #[test]
    fn test_notification_ind_queues_pending_download() {
        let store = store();
        let pdu = store
            .insert_pdu(&NewPdu {
                recipients: vec!["6505550000".into()],
                m_type: MmsMessageType::NotificationInd,
                ..Default::default()
            })
            .unwrap();

        let pending = store.pending_messages(&Default::default()).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].msg_id, pdu);
        assert_eq!(pending[0].proto_type, Protocol::Mms);
        assert_eq!(pending[0].msg_type, 130);

        store.delete_pdu(pdu).unwrap();
        assert!(store.pending_messages(&Default::default()).unwrap().is_empty());
    }

    #[test]
    fn test_mms_outbox_moves_queue_and_unqueue() {
        let store = store();
        let pdu = store
            .insert_pdu(&NewPdu {
                recipients: vec!["6505550000".into()],
                m_type: MmsMessageType::SendReq,
                msg_box: MessageBox::Drafts,
                ..Default::default()
            })
            .unwrap();
        let thread_id = store.pdu(pdu).unwrap().unwrap().thread_id.unwrap();
        assert!(store.pending_messages(&Default::default()).unwrap().is_empty());

        store.update_pdu(pdu, &PduUpdate { msg_box: Some(MessageBox::Outbox), ..Default::default() }).unwrap();
        let queued = store.pending_messages(&Default::default()).unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(thread(&store, thread_id).message_count, 1);

        store.update_pending(queued[0].id, &PendingUpdate { err_type: Some(10), ..Default::default() }).unwrap();
        assert_eq!(thread(&store, thread_id).error, 1);

        store.update_pdu(pdu, &PduUpdate { msg_box: Some(MessageBox::Sent), ..Default::default() }).unwrap();
        assert!(store.pending_messages(&Default::default()).unwrap().is_empty());
        assert_eq!(thread(&store, thread_id).error, 0);
    }

    #[test]
    fn test_deleting_send_req_removes_its_reports() {
        let store = store();
        let sent = store
            .insert_pdu(&NewPdu {
                recipients: vec!["6505550000".into()],
                m_type: MmsMessageType::SendReq,
                msg_box: MessageBox::Sent,
                m_id: Some("abc@mms".into()),
                ..Default::default()
            })
            .unwrap();
        let thread_id = store.pdu(sent).unwrap().unwrap().thread_id.unwrap();
        let report = store
            .insert_pdu(&NewPdu {
                thread_id: Some(thread_id),
                m_type: MmsMessageType::DeliveryInd,
                m_id: Some("abc@mms".into()),
                ..Default::default()
            })
            .unwrap();
        let part = store
            .insert_part(sent, &NewPart { ct: Some("image/png".into()), ..Default::default() })
            .unwrap();

        store.delete_pdu(sent).unwrap();

        assert!(store.pdu(report).unwrap().is_none());
        assert!(store.part(part).unwrap().is_none());
        assert!(store.thread(thread_id).unwrap().is_none());
    }

    #[test]
    fn test_moving_pdu_between_threads_recomputes_both() {
        let store = store();
        let first = store.insert_sms(&inbox_sms("5551234", "stay", 1)).unwrap();
        let thread_a = store.sms(first).unwrap().unwrap().thread_id.unwrap();
        let pdu = store
            .insert_pdu(&NewPdu { thread_id: Some(thread_a), sub: Some("moving".into()), date: Some(9), ..Default::default() })
            .unwrap();
        store
            .insert_part(pdu, &NewPart { ct: Some("image/gif".into()), ..Default::default() })
            .unwrap();
        assert_eq!(thread(&store, thread_a).message_count, 2);

        let thread_b = store.get_or_create_thread_id(&["bob@example.com"]).unwrap();
        store.update_pdu(pdu, &PduUpdate { thread_id: Some(thread_b), ..Default::default() }).unwrap();

        let a = thread(&store, thread_a);
        assert_eq!(a.message_count, 1);
        assert_eq!(a.snippet.as_deref(), Some("stay"));
        assert!(!a.has_attachment);

        let b = thread(&store, thread_b);
        assert_eq!(b.message_count, 1);
        assert_eq!(b.snippet.as_deref(), Some("moving"));
        assert!(b.has_attachment);
    }

    #[test]
    fn test_update_all_threads_repairs_drift() {
        let store = store();
        let id = store.insert_sms(&inbox_sms("5551234", "real", 1)).unwrap();
        let thread_id = store.sms(id).unwrap().unwrap().thread_id.unwrap();
        let orphan = store.get_or_create_thread_id(&["nobody@example.com"]).unwrap();

        store
            .read(|conn| {
                conn.execute(
                    "UPDATE threads SET message_count = 40, snippet = 'stale', error = 3 WHERE _id = ?1",
                    [thread_id],
                )?;
                Ok(())
            })
            .unwrap();

        store.update_thread(-1).unwrap();

        let t = thread(&store, thread_id);
        assert_eq!(t.message_count, 1);
        assert_eq!(t.snippet.as_deref(), Some("real"));
        assert_eq!(t.error, 0);
        assert!(store.thread(orphan).unwrap().is_none());
        assert_eq!(store.canonical_addresses().unwrap().len(), 1);
    }

    #[test]
    fn test_gc_keeps_referenced_addresses() {
        let store = store();
        store.get_or_create_thread_id(&["5551234", "alice@example.com"]).unwrap();
        store
            .read(|conn| {
                conn.execute("INSERT INTO canonical_addresses (address) VALUES ('stray')", [])?;
                Ok(())
            })
            .unwrap();

        assert_eq!(store.gc_canonical_addresses().unwrap(), 1);
        assert_eq!(store.canonical_addresses().unwrap().len(), 2);
    }
}
