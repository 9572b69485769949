//! Row-level writes. Each one performs the base write and records the
//! resulting [`Change`] so the thread hooks run in the same transaction.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Result, StoreError};
use crate::models::{
    Addr, MessageBox, MmsMessageType, NewAddr, NewPart, NewPdu, NewPending, NewSms, Part,
    PartUpdate, Pdu, PduUpdate, PendingMessage, PendingUpdate, Sms, SmsType, SmsUpdate,
};

use super::consistency::Change;
use super::threads::get_or_create_thread_id;
use super::{MessageStore, UnitOfWork};

const SMS_COLUMNS: &str = "_id, thread_id, address, person, date, date_sent, protocol, read, \
     status, type, reply_path_present, subject, body, service_center, locked, error_code, seen";

const PDU_COLUMNS: &str = "_id, thread_id, date, date_sent, msg_box, read, m_id, sub, sub_cs, \
     ct_t, ct_l, exp, m_cls, m_type, v, m_size, pri, rr, rpt_a, resp_st, st, tr_id, retr_st, \
     retr_txt, retr_txt_cs, read_status, ct_cls, resp_txt, d_tm, d_rpt, locked, seen, text_only";

const PART_COLUMNS: &str =
    "_id, mid, seq, ct, name, chset, cd, fn, cid, cl, ctt_s, ctt_t, _data, text";

const PENDING_COLUMNS: &str =
    "_id, proto_type, msg_id, msg_type, err_type, err_code, retry_index, due_time, last_try";

/// Decode a message code column, falling back for NULL or unknown codes
/// left behind by older writers.
fn code_or<T>(row: &Row<'_>, idx: usize, decode: fn(i32) -> Option<T>, fallback: T) -> rusqlite::Result<T> {
    Ok(row.get::<_, Option<i32>>(idx)?.and_then(decode).unwrap_or(fallback))
}

pub(crate) fn sms_from_row(row: &Row<'_>) -> rusqlite::Result<Sms> {
    Ok(Sms {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        address: row.get(2)?,
        person: row.get(3)?,
        date: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
        date_sent: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
        protocol: row.get(6)?,
        read: row.get::<_, Option<bool>>(7)?.unwrap_or(false),
        status: row.get::<_, Option<i32>>(8)?.unwrap_or(-1),
        sms_type: code_or(row, 9, SmsType::from_code, SmsType::All)?,
        reply_path_present: row.get(10)?,
        subject: row.get(11)?,
        body: row.get(12)?,
        service_center: row.get(13)?,
        locked: row.get::<_, Option<bool>>(14)?.unwrap_or(false),
        error_code: row.get::<_, Option<i32>>(15)?.unwrap_or(0),
        seen: row.get::<_, Option<bool>>(16)?.unwrap_or(false),
    })
}

pub(crate) fn pdu_from_row(row: &Row<'_>) -> rusqlite::Result<Pdu> {
    Ok(Pdu {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        date: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
        date_sent: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
        msg_box: code_or(row, 4, MessageBox::from_code, MessageBox::All)?,
        read: row.get::<_, Option<bool>>(5)?.unwrap_or(false),
        m_id: row.get(6)?,
        sub: row.get(7)?,
        sub_cs: row.get(8)?,
        ct_t: row.get(9)?,
        ct_l: row.get(10)?,
        exp: row.get(11)?,
        m_cls: row.get(12)?,
        m_type: code_or(row, 13, MmsMessageType::from_code, MmsMessageType::Other(0))?,
        v: row.get(14)?,
        m_size: row.get(15)?,
        pri: row.get(16)?,
        rr: row.get(17)?,
        rpt_a: row.get(18)?,
        resp_st: row.get(19)?,
        st: row.get(20)?,
        tr_id: row.get(21)?,
        retr_st: row.get(22)?,
        retr_txt: row.get(23)?,
        retr_txt_cs: row.get(24)?,
        read_status: row.get(25)?,
        ct_cls: row.get(26)?,
        resp_txt: row.get(27)?,
        d_tm: row.get(28)?,
        d_rpt: row.get(29)?,
        locked: row.get::<_, Option<bool>>(30)?.unwrap_or(false),
        seen: row.get::<_, Option<bool>>(31)?.unwrap_or(false),
        text_only: row.get::<_, Option<bool>>(32)?.unwrap_or(false),
    })
}

pub(crate) fn part_from_row(row: &Row<'_>) -> rusqlite::Result<Part> {
    Ok(Part {
        id: row.get(0)?,
        mid: row.get(1)?,
        seq: row.get::<_, Option<i32>>(2)?.unwrap_or(0),
        ct: row.get(3)?,
        name: row.get(4)?,
        chset: row.get(5)?,
        cd: row.get(6)?,
        file_name: row.get(7)?,
        cid: row.get(8)?,
        cl: row.get(9)?,
        ctt_s: row.get(10)?,
        ctt_t: row.get(11)?,
        data: row.get(12)?,
        text: row.get(13)?,
    })
}

pub(crate) fn pending_from_row(row: &Row<'_>) -> rusqlite::Result<PendingMessage> {
    Ok(PendingMessage {
        id: row.get(0)?,
        proto_type: row.get(1)?,
        msg_id: row.get(2)?,
        msg_type: row.get::<_, Option<i32>>(3)?.unwrap_or(0),
        err_type: row.get::<_, Option<i32>>(4)?.unwrap_or(0),
        err_code: row.get::<_, Option<i32>>(5)?.unwrap_or(0),
        retry_index: row.get(6)?,
        due_time: row.get::<_, Option<i64>>(7)?.unwrap_or(0),
        last_try: row.get(8)?,
    })
}

fn addr_from_row(row: &Row<'_>) -> rusqlite::Result<Addr> {
    Ok(Addr {
        id: row.get(0)?,
        msg_id: row.get(1)?,
        contact_id: row.get(2)?,
        address: row.get(3)?,
        addr_type: row.get(4)?,
        charset: row.get(5)?,
    })
}

pub(crate) fn load_sms(conn: &Connection, id: i64) -> Result<Option<Sms>> {
    let sql = format!("SELECT {SMS_COLUMNS} FROM sms WHERE _id = ?1");
    Ok(conn.query_row(&sql, [id], sms_from_row).optional()?)
}

pub(crate) fn load_pdu(conn: &Connection, id: i64) -> Result<Option<Pdu>> {
    let sql = format!("SELECT {PDU_COLUMNS} FROM pdu WHERE _id = ?1");
    Ok(conn.query_row(&sql, [id], pdu_from_row).optional()?)
}

pub(crate) fn load_part(conn: &Connection, id: i64) -> Result<Option<Part>> {
    let sql = format!("SELECT {PART_COLUMNS} FROM part WHERE _id = ?1");
    Ok(conn.query_row(&sql, [id], part_from_row).optional()?)
}

pub(crate) fn load_pending(conn: &Connection, id: i64) -> Result<Option<PendingMessage>> {
    let sql = format!("SELECT {PENDING_COLUMNS} FROM pending_msgs WHERE _id = ?1");
    Ok(conn.query_row(&sql, [id], pending_from_row).optional()?)
}

/// Parts of a PDU in presentation order.
pub(crate) fn parts_of(conn: &Connection, mid: i64) -> Result<Vec<Part>> {
    let sql = format!("SELECT {PART_COLUMNS} FROM part WHERE mid = ?1 ORDER BY seq, _id");
    let mut stmt = conn.prepare(&sql)?;
    let parts = stmt
        .query_map([mid], part_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(parts)
}

/// Delivery and read-orig reports referring to a sent message id.
pub(crate) fn reports_for(conn: &Connection, m_id: &str) -> Result<Vec<Pdu>> {
    let sql = format!("SELECT {PDU_COLUMNS} FROM pdu WHERE m_type IN (134, 136) AND m_id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let reports = stmt
        .query_map([m_id], pdu_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(reports)
}

fn ids_where(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map(params, |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// SMS

pub(crate) fn insert_sms(uow: &UnitOfWork<'_>, sms: &NewSms) -> Result<i64> {
    let conn = uow.conn();
    let thread_id = match (sms.thread_id, sms.address.as_deref()) {
        (Some(thread_id), _) => thread_id,
        (None, Some(address)) => get_or_create_thread_id(conn, uow.options(), &[address])?,
        (None, None) => {
            return Err(StoreError::InvalidInput(
                "an SMS needs a thread_id or an address".into(),
            ))
        }
    };

    conn.execute(
        "INSERT INTO sms (thread_id, address, person, date, date_sent, protocol, read, status,
                          type, reply_path_present, subject, body, service_center, locked,
                          error_code, seen)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            thread_id,
            sms.address,
            sms.person,
            sms.date.unwrap_or_else(now_millis),
            sms.date_sent,
            sms.protocol,
            sms.read,
            sms.status.unwrap_or(-1),
            sms.sms_type,
            sms.reply_path_present,
            sms.subject,
            sms.body,
            sms.service_center,
            sms.locked,
            sms.error_code,
            sms.seen,
        ],
    )?;
    let id = conn.last_insert_rowid();

    let row = load_sms(conn, id)?.ok_or(StoreError::NotFound)?;
    uow.record(Change::SmsInserted(row))?;
    Ok(id)
}

pub(crate) fn update_sms(uow: &UnitOfWork<'_>, id: i64, update: &SmsUpdate) -> Result<()> {
    let conn = uow.conn();
    let old = load_sms(conn, id)?.ok_or(StoreError::NotFound)?;

    conn.execute(
        "UPDATE sms SET
             thread_id = COALESCE(?2, thread_id),
             date = COALESCE(?3, date),
             read = COALESCE(?4, read),
             seen = COALESCE(?5, seen),
             status = COALESCE(?6, status),
             type = COALESCE(?7, type),
             body = COALESCE(?8, body),
             locked = COALESCE(?9, locked),
             error_code = COALESCE(?10, error_code)
         WHERE _id = ?1",
        params![
            id,
            update.thread_id,
            update.date,
            update.read,
            update.seen,
            update.status,
            update.sms_type,
            update.body,
            update.locked,
            update.error_code,
        ],
    )?;

    let new = load_sms(conn, id)?.ok_or(StoreError::NotFound)?;
    uow.record(Change::SmsUpdated { old, new })
}

pub(crate) fn delete_sms(uow: &UnitOfWork<'_>, id: i64) -> Result<bool> {
    let conn = uow.conn();
    let Some(old) = load_sms(conn, id)? else {
        return Ok(false);
    };
    conn.execute("DELETE FROM sms WHERE _id = ?1", [id])?;
    uow.record(Change::SmsDeleted(old))?;
    Ok(true)
}

// PDU

pub(crate) fn insert_pdu(uow: &UnitOfWork<'_>, pdu: &NewPdu) -> Result<i64> {
    let conn = uow.conn();
    let thread_id = match pdu.thread_id {
        Some(thread_id) => thread_id,
        None => get_or_create_thread_id(conn, uow.options(), &pdu.recipients)?,
    };

    conn.execute(
        "INSERT INTO pdu (thread_id, date, date_sent, msg_box, read, m_id, sub, sub_cs, ct_t,
                          ct_l, exp, m_cls, m_type, v, m_size, pri, rr, rpt_a, resp_st, st,
                          tr_id, retr_st, retr_txt, retr_txt_cs, read_status, ct_cls, resp_txt,
                          d_tm, d_rpt, locked, seen, text_only)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                 ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32)",
        params![
            thread_id,
            pdu.date.unwrap_or_else(|| chrono::Utc::now().timestamp()),
            pdu.date_sent,
            pdu.msg_box,
            pdu.read,
            pdu.m_id,
            pdu.sub,
            pdu.sub_cs,
            pdu.ct_t,
            pdu.ct_l,
            pdu.exp,
            pdu.m_cls,
            pdu.m_type,
            pdu.v,
            pdu.m_size,
            pdu.pri,
            pdu.rr,
            pdu.rpt_a,
            pdu.resp_st,
            pdu.st,
            pdu.tr_id,
            pdu.retr_st,
            pdu.retr_txt,
            pdu.retr_txt_cs,
            pdu.read_status,
            pdu.ct_cls,
            pdu.resp_txt,
            pdu.d_tm,
            pdu.d_rpt,
            pdu.locked,
            pdu.seen,
            pdu.text_only,
        ],
    )?;
    let id = conn.last_insert_rowid();

    let row = load_pdu(conn, id)?.ok_or(StoreError::NotFound)?;
    uow.record(Change::PduInserted(row))?;
    Ok(id)
}

pub(crate) fn update_pdu(uow: &UnitOfWork<'_>, id: i64, update: &PduUpdate) -> Result<()> {
    let conn = uow.conn();
    let old = load_pdu(conn, id)?.ok_or(StoreError::NotFound)?;

    conn.execute(
        "UPDATE pdu SET
             thread_id = COALESCE(?2, thread_id),
             date = COALESCE(?3, date),
             msg_box = COALESCE(?4, msg_box),
             read = COALESCE(?5, read),
             seen = COALESCE(?6, seen),
             sub = COALESCE(?7, sub),
             sub_cs = COALESCE(?8, sub_cs),
             m_size = COALESCE(?9, m_size),
             resp_st = COALESCE(?10, resp_st),
             st = COALESCE(?11, st),
             locked = COALESCE(?12, locked),
             text_only = COALESCE(?13, text_only)
         WHERE _id = ?1",
        params![
            id,
            update.thread_id,
            update.date,
            update.msg_box,
            update.read,
            update.seen,
            update.sub,
            update.sub_cs,
            update.m_size,
            update.resp_st,
            update.st,
            update.locked,
            update.text_only,
        ],
    )?;

    let new = load_pdu(conn, id)?.ok_or(StoreError::NotFound)?;
    uow.record(Change::PduUpdated { old, new })
}

/// Delete a PDU; its parts, addresses, queue entries and reports go with it.
pub(crate) fn delete_pdu(uow: &UnitOfWork<'_>, id: i64) -> Result<bool> {
    let conn = uow.conn();
    let Some(old) = load_pdu(conn, id)? else {
        return Ok(false);
    };
    conn.execute("DELETE FROM pdu WHERE _id = ?1", [id])?;
    uow.record(Change::PduDeleted(old))?;
    Ok(true)
}

// Parts and addresses

pub(crate) fn insert_part(uow: &UnitOfWork<'_>, mid: i64, part: &NewPart) -> Result<i64> {
    let conn = uow.conn();
    conn.execute(
        "INSERT INTO part (mid, seq, ct, name, chset, cd, fn, cid, cl, ctt_s, ctt_t, _data, text)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            mid,
            part.seq,
            part.ct,
            part.name,
            part.chset,
            part.cd,
            part.file_name,
            part.cid,
            part.cl,
            part.ctt_s,
            part.ctt_t,
            part.data,
            part.text,
        ],
    )?;
    let id = conn.last_insert_rowid();

    let row = load_part(conn, id)?.ok_or(StoreError::NotFound)?;
    uow.record(Change::PartInserted(row))?;
    Ok(id)
}

pub(crate) fn update_part(uow: &UnitOfWork<'_>, id: i64, update: &PartUpdate) -> Result<()> {
    let conn = uow.conn();
    let old = load_part(conn, id)?.ok_or(StoreError::NotFound)?;

    conn.execute(
        "UPDATE part SET
             mid = COALESCE(?2, mid),
             ct = COALESCE(?3, ct),
             text = COALESCE(?4, text),
             _data = COALESCE(?5, _data)
         WHERE _id = ?1",
        params![id, update.mid, update.ct, update.text, update.data],
    )?;

    let new = load_part(conn, id)?.ok_or(StoreError::NotFound)?;
    uow.record(Change::PartUpdated { old, new })
}

pub(crate) fn delete_part(uow: &UnitOfWork<'_>, id: i64) -> Result<bool> {
    let conn = uow.conn();
    let Some(old) = load_part(conn, id)? else {
        return Ok(false);
    };
    conn.execute("DELETE FROM part WHERE _id = ?1", [id])?;
    uow.record(Change::PartDeleted(old))?;
    Ok(true)
}

pub(crate) fn insert_addr(conn: &Connection, msg_id: i64, addr: &NewAddr) -> Result<i64> {
    conn.execute(
        "INSERT INTO addr (msg_id, contact_id, address, type, charset) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![msg_id, addr.contact_id, addr.address, addr.addr_type, addr.charset],
    )?;
    Ok(conn.last_insert_rowid())
}

// Pending queue

/// Insert a queue row without running hooks; callers apply the edge.
pub(crate) fn insert_pending_row(conn: &Connection, pending: &NewPending) -> Result<i64> {
    conn.execute(
        "INSERT INTO pending_msgs (proto_type, msg_id, msg_type, err_type, err_code,
                                   retry_index, due_time, last_try)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            pending.proto_type,
            pending.msg_id,
            pending.msg_type,
            pending.err_type,
            pending.err_code,
            pending.retry_index,
            pending.due_time,
            pending.last_try,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn insert_pending(uow: &UnitOfWork<'_>, pending: &NewPending) -> Result<i64> {
    let id = insert_pending_row(uow.conn(), pending)?;
    let row = load_pending(uow.conn(), id)?.ok_or(StoreError::NotFound)?;
    uow.record(Change::PendingInserted(row))?;
    Ok(id)
}

pub(crate) fn update_pending(uow: &UnitOfWork<'_>, id: i64, update: &PendingUpdate) -> Result<()> {
    let conn = uow.conn();
    let old = load_pending(conn, id)?.ok_or(StoreError::NotFound)?;

    conn.execute(
        "UPDATE pending_msgs SET
             err_type = COALESCE(?2, err_type),
             err_code = COALESCE(?3, err_code),
             retry_index = COALESCE(?4, retry_index),
             due_time = COALESCE(?5, due_time),
             last_try = COALESCE(?6, last_try)
         WHERE _id = ?1",
        params![
            id,
            update.err_type,
            update.err_code,
            update.retry_index,
            update.due_time,
            update.last_try,
        ],
    )?;

    let new = load_pending(conn, id)?.ok_or(StoreError::NotFound)?;
    uow.record(Change::PendingUpdated { old, new })
}

pub(crate) fn delete_pending(uow: &UnitOfWork<'_>, id: i64) -> Result<bool> {
    let conn = uow.conn();
    let Some(old) = load_pending(conn, id)? else {
        return Ok(false);
    };
    conn.execute("DELETE FROM pending_msgs WHERE _id = ?1", [id])?;
    uow.record(Change::PendingDeleted(old))?;
    Ok(true)
}

impl MessageStore {
    /// Insert an SMS, resolving its thread from the address when needed.
    pub fn insert_sms(&self, sms: &NewSms) -> Result<i64> {
        self.write(|uow| insert_sms(uow, sms))
    }

    pub fn update_sms(&self, id: i64, update: &SmsUpdate) -> Result<()> {
        self.write(|uow| update_sms(uow, id, update))
    }

    /// Returns false when no such row existed.
    pub fn delete_sms(&self, id: i64) -> Result<bool> {
        self.write(|uow| delete_sms(uow, id))
    }

    /// Insert an MMS PDU, resolving its thread from the recipients when needed.
    pub fn insert_pdu(&self, pdu: &NewPdu) -> Result<i64> {
        self.write(|uow| insert_pdu(uow, pdu))
    }

    pub fn update_pdu(&self, id: i64, update: &PduUpdate) -> Result<()> {
        self.write(|uow| update_pdu(uow, id, update))
    }

    pub fn delete_pdu(&self, id: i64) -> Result<bool> {
        self.write(|uow| delete_pdu(uow, id))
    }

    pub fn insert_part(&self, mid: i64, part: &NewPart) -> Result<i64> {
        self.write(|uow| insert_part(uow, mid, part))
    }

    pub fn update_part(&self, id: i64, update: &PartUpdate) -> Result<()> {
        self.write(|uow| update_part(uow, id, update))
    }

    pub fn delete_part(&self, id: i64) -> Result<bool> {
        self.write(|uow| delete_part(uow, id))
    }

    pub fn insert_addr(&self, msg_id: i64, addr: &NewAddr) -> Result<i64> {
        self.write(|uow| insert_addr(uow.conn(), msg_id, addr))
    }

    pub fn insert_pending(&self, pending: &NewPending) -> Result<i64> {
        self.write(|uow| insert_pending(uow, pending))
    }

    pub fn update_pending(&self, id: i64, update: &PendingUpdate) -> Result<()> {
        self.write(|uow| update_pending(uow, id, update))
    }

    pub fn delete_pending(&self, id: i64) -> Result<bool> {
        self.write(|uow| delete_pending(uow, id))
    }

    /// Mark every message of a thread read and seen.
    pub fn mark_thread_read(&self, thread_id: i64) -> Result<usize> {
        self.write(|uow| {
            let conn = uow.conn();
            let sms = conn.execute(
                "UPDATE sms SET read = 1, seen = 1 WHERE thread_id = ?1 AND (read = 0 OR seen = 0)",
                [thread_id],
            )?;
            let pdu = conn.execute(
                "UPDATE pdu SET read = 1, seen = 1 WHERE thread_id = ?1 AND (read = 0 OR seen = 0)",
                [thread_id],
            )?;
            uow.record(Change::ThreadMarkedRead(thread_id))?;
            Ok(sms + pdu)
        })
    }

    /// Delete every message of a thread, then the thread itself.
    pub fn delete_thread(&self, thread_id: i64) -> Result<usize> {
        self.write(|uow| {
            let conn = uow.conn();
            let sms = ids_where(conn, "SELECT _id FROM sms WHERE thread_id = ?1", [thread_id])?;
            let pdus = ids_where(conn, "SELECT _id FROM pdu WHERE thread_id = ?1", [thread_id])?;

            let mut deleted = 0;
            for id in sms {
                deleted += usize::from(delete_sms(uow, id)?);
            }
            for id in pdus {
                deleted += usize::from(delete_pdu(uow, id)?);
            }
            super::consistency::update_thread(conn, uow.options(), thread_id)?;
            Ok(deleted)
        })
    }

    /// Delete all messages, optionally sparing locked ones.
    pub fn delete_all_messages(&self, include_locked: bool) -> Result<usize> {
        self.write(|uow| {
            let conn = uow.conn();
            let (sms_sql, pdu_sql) = if include_locked {
                ("SELECT _id FROM sms", "SELECT _id FROM pdu")
            } else {
                (
                    "SELECT _id FROM sms WHERE COALESCE(locked, 0) = 0",
                    "SELECT _id FROM pdu WHERE COALESCE(locked, 0) = 0",
                )
            };
            let sms = ids_where(conn, sms_sql, [])?;
            let pdus = ids_where(conn, pdu_sql, [])?;

            let mut deleted = 0;
            for id in sms {
                deleted += usize::from(delete_sms(uow, id)?);
            }
            for id in pdus {
                deleted += usize::from(delete_pdu(uow, id)?);
            }
            super::consistency::update_all_threads(conn, uow.options())?;
            Ok(deleted)
        })
    }

    pub fn sms(&self, id: i64) -> Result<Option<Sms>> {
        self.read(|conn| load_sms(conn, id))
    }

    pub fn pdu(&self, id: i64) -> Result<Option<Pdu>> {
        self.read(|conn| load_pdu(conn, id))
    }

    pub fn part(&self, id: i64) -> Result<Option<Part>> {
        self.read(|conn| load_part(conn, id))
    }

    pub fn parts(&self, mid: i64) -> Result<Vec<Part>> {
        self.read(|conn| parts_of(conn, mid))
    }

    pub fn addrs(&self, msg_id: i64) -> Result<Vec<Addr>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT _id, msg_id, contact_id, address, type, charset FROM addr
                 WHERE msg_id = ?1 ORDER BY _id",
            )?;
            let addrs = stmt
                .query_map([msg_id], addr_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(addrs)
        })
    }

    pub fn pending(&self, id: i64) -> Result<Option<PendingMessage>> {
        self.read(|conn| load_pending(conn, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AddrType;

    #[test]
    fn test_sms_without_thread_or_address_rejected() {
        let store = MessageStore::open_in_memory().unwrap();
        let result = store.insert_sms(&NewSms { body: Some("orphan".into()), ..Default::default() });
        assert!(matches!(result, Err(StoreError::InvalidInput(_))));
        assert!(store.list_threads(&Default::default()).unwrap().is_empty());
    }

    #[test]
    fn test_missing_rows_and_recipients_are_errors() {
        let store = MessageStore::open_in_memory().unwrap();
        let result = store.insert_pdu(&NewPdu { recipients: vec![], ..Default::default() });
        assert!(matches!(result, Err(StoreError::NoRecipients)));

        let missing = store.update_sms(77, &SmsUpdate::default());
        assert!(matches!(missing, Err(StoreError::NotFound)));
        assert!(!store.delete_sms(77).unwrap());
    }

    #[test]
    fn test_update_keeps_unspecified_columns() {
        let store = MessageStore::open_in_memory().unwrap();
        let id = store
            .insert_sms(&NewSms {
                address: Some("5551234".into()),
                body: Some("original".into()),
                date: Some(123),
                sms_type: SmsType::Sent,
                ..Default::default()
            })
            .unwrap();

        store.update_sms(id, &SmsUpdate { locked: Some(true), ..Default::default() }).unwrap();
        let sms = store.sms(id).unwrap().unwrap();
        assert!(sms.locked);
        assert_eq!(sms.body.as_deref(), Some("original"));
        assert_eq!(sms.date, 123);
        assert_eq!(sms.sms_type, SmsType::Sent);
    }

    #[test]
    fn test_rows_with_unknown_codes_stay_writable() {
        let store = MessageStore::open_in_memory().unwrap();
        let thread_id = store.get_or_create_thread_id(&["5551234"]).unwrap();
        store
            .read(|conn| {
                conn.execute(
                    "INSERT INTO sms (_id, thread_id, address, date, type, body)
                     VALUES (10, ?1, '5551234', 1, NULL, 'no type'), (11, ?1, '5551234', 2, 42, 'odd type')",
                    [thread_id],
                )?;
                conn.execute(
                    "INSERT INTO pdu (_id, thread_id, date, msg_box, m_type) VALUES (20, ?1, 3, NULL, NULL)",
                    [thread_id],
                )?;
                Ok(())
            })
            .unwrap();

        assert_eq!(store.sms(10).unwrap().unwrap().sms_type, SmsType::All);
        assert_eq!(store.pdu(20).unwrap().unwrap().m_type, MmsMessageType::Other(0));

        store.update_sms(11, &SmsUpdate { read: Some(true), ..Default::default() }).unwrap();
        assert!(store.sms(11).unwrap().unwrap().read);
        assert!(store.delete_sms(10).unwrap());
        assert!(store.delete_pdu(20).unwrap());
        assert!(store.delete_sms(11).unwrap());
        assert!(store.thread(thread_id).unwrap().is_none());
    }

    #[test]
    fn test_pdu_delete_cascades_to_addrs_and_parts() {
        let store = MessageStore::open_in_memory().unwrap();
        let pdu = store
            .insert_pdu(&NewPdu { recipients: vec!["6505550000".into()], ..Default::default() })
            .unwrap();
        store
            .insert_addr(pdu, &NewAddr { address: "6505550000".into(), addr_type: AddrType::From, ..Default::default() })
            .unwrap();
        store
            .insert_part(pdu, &NewPart { ct: Some("text/plain".into()), text: Some("hey".into()), ..Default::default() })
            .unwrap();
        assert_eq!(store.addrs(pdu).unwrap().len(), 1);
        assert_eq!(store.parts(pdu).unwrap().len(), 1);

        assert!(store.delete_pdu(pdu).unwrap());
        assert!(store.addrs(pdu).unwrap().is_empty());
        assert!(store.parts(pdu).unwrap().is_empty());
        assert!(store.search("hey").unwrap().is_empty());
    }

    #[test]
    fn test_mark_thread_read_updates_both_tables() {
        let store = MessageStore::open_in_memory().unwrap();
        let sms = store
            .insert_sms(&NewSms { address: Some("5551234".into()), body: Some("a".into()), ..Default::default() })
            .unwrap();
        let thread_id = store.sms(sms).unwrap().unwrap().thread_id.unwrap();
        store
            .insert_pdu(&NewPdu { thread_id: Some(thread_id), ..Default::default() })
            .unwrap();
        assert!(!store.thread(thread_id).unwrap().unwrap().read);

        assert_eq!(store.mark_thread_read(thread_id).unwrap(), 2);
        let thread = store.thread(thread_id).unwrap().unwrap();
        assert!(thread.read);
        assert!(store.sms(sms).unwrap().unwrap().seen);
    }

    #[test]
    fn test_delete_thread_removes_messages_and_thread() {
        let store = MessageStore::open_in_memory().unwrap();
        let sms = store
            .insert_sms(&NewSms { address: Some("5551234".into()), ..Default::default() })
            .unwrap();
        let thread_id = store.sms(sms).unwrap().unwrap().thread_id.unwrap();
        store
            .insert_pdu(&NewPdu { thread_id: Some(thread_id), ..Default::default() })
            .unwrap();

        assert_eq!(store.delete_thread(thread_id).unwrap(), 2);
        assert!(store.thread(thread_id).unwrap().is_none());
        assert!(store.canonical_addresses().unwrap().is_empty());
    }

    #[test]
    fn test_delete_all_messages_spares_locked() {
        let store = MessageStore::open_in_memory().unwrap();
        let keep = store
            .insert_sms(&NewSms { address: Some("5551234".into()), locked: true, ..Default::default() })
            .unwrap();
        store
            .insert_sms(&NewSms { address: Some("alice@example.com".into()), ..Default::default() })
            .unwrap();

        assert_eq!(store.delete_all_messages(false).unwrap(), 1);
        assert!(store.sms(keep).unwrap().is_some());
        assert_eq!(store.list_threads(&Default::default()).unwrap().len(), 1);

        assert_eq!(store.delete_all_messages(true).unwrap(), 1);
        assert!(store.list_threads(&Default::default()).unwrap().is_empty());
    }
}
