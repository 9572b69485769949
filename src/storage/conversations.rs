//! Read-side operations: thread lists and the unified message stream.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::error::Result;
use crate::models::{CanonicalAddress, PendingMessage, Protocol, Thread, ThreadType};

use super::query::{Column, Condition, Order, UnionQuery, UnifiedMessage};
use super::writes::pending_from_row;
use super::MessageStore;

const THREAD_COLUMNS: &str = "_id, date, message_count, recipient_ids, snippet, snippet_cs, \
     read, type, error, has_attachment";

/// Which threads [`MessageStore::list_threads`] returns, and in what order.
#[derive(Debug, Clone, Default)]
pub struct ThreadFilter {
    pub thread_type: Option<ThreadType>,
    pub unread_only: bool,
    /// Defaults to most recently active first
    pub sort: Option<(ThreadSort, Order)>,
}

/// Thread columns a listing may be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadSort {
    Date,
    MessageCount,
    Error,
    Id,
}

impl ThreadSort {
    fn column(self) -> &'static str {
        match self {
            ThreadSort::Date => "date",
            ThreadSort::MessageCount => "message_count",
            ThreadSort::Error => "error",
            ThreadSort::Id => "_id",
        }
    }
}

/// Subject line of a conversation: the cached snippet and its charset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadSubject {
    pub thread_id: i64,
    pub subject: Option<String>,
    pub charset: i32,
}

/// Which queue entries [`MessageStore::pending_messages`] returns.
#[derive(Debug, Clone, Default)]
pub struct PendingFilter {
    pub protocol: Option<Protocol>,
    /// Only entries due at or before this time (ms)
    pub due_before: Option<i64>,
}

/// A thread with its participants resolved.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadRecipients {
    pub thread: Thread,
    pub recipients: Vec<CanonicalAddress>,
}

pub(crate) fn thread_from_row(row: &Row<'_>) -> rusqlite::Result<Thread> {
    Ok(Thread {
        id: row.get(0)?,
        date: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
        message_count: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
        recipient_ids: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        snippet: row.get(4)?,
        snippet_cs: row.get::<_, Option<i32>>(5)?.unwrap_or(0),
        read: row.get::<_, Option<bool>>(6)?.unwrap_or(true),
        thread_type: row.get::<_, Option<ThreadType>>(7)?.unwrap_or_default(),
        error: row.get::<_, Option<i64>>(8)?.unwrap_or(0),
        has_attachment: row.get::<_, Option<bool>>(9)?.unwrap_or(false),
    })
}

fn run_union(conn: &Connection, query: &UnionQuery) -> Result<Vec<UnifiedMessage>> {
    let (sql, params) = query.build();
    let mut stmt = conn.prepare(&sql)?;
    let messages = stmt
        .query_map(params_from_iter(params), UnifiedMessage::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(messages)
}

impl MessageStore {
    pub fn thread(&self, thread_id: i64) -> Result<Option<Thread>> {
        self.read(|conn| {
            let sql = format!("SELECT {THREAD_COLUMNS} FROM threads WHERE _id = ?1");
            Ok(conn.query_row(&sql, [thread_id], thread_from_row).optional()?)
        })
    }

    /// Conversations, most recently active first.
    pub fn list_threads(&self, filter: &ThreadFilter) -> Result<Vec<Thread>> {
        self.read(|conn| {
            let mut clauses = Vec::new();
            let mut params = Vec::new();
            if let Some(thread_type) = filter.thread_type {
                clauses.push("type = ?");
                params.push(Value::Integer(i64::from(thread_type.code())));
            }
            if filter.unread_only {
                clauses.push("read = 0");
            }

            let mut sql = format!("SELECT {THREAD_COLUMNS} FROM threads");
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
            match filter.sort {
                Some((sort, order)) => {
                    let direction = match order {
                        Order::Asc => "ASC",
                        Order::Desc => "DESC",
                    };
                    sql.push_str(&format!(" ORDER BY {} {direction}, _id DESC", sort.column()));
                }
                None => sql.push_str(" ORDER BY date DESC, _id DESC"),
            }

            let mut stmt = conn.prepare(&sql)?;
            let threads = stmt
                .query_map(params_from_iter(params), thread_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(threads)
        })
    }

    /// A thread and its resolved participant addresses.
    pub fn thread_by_id(&self, thread_id: i64) -> Result<Option<ThreadRecipients>> {
        let Some(thread) = self.thread(thread_id)? else {
            return Ok(None);
        };
        let mut recipients = Vec::new();
        for id in thread.recipient_id_list() {
            if let Some(address) = self.canonical_address(id)? {
                recipients.push(address);
            }
        }
        Ok(Some(ThreadRecipients { thread, recipients }))
    }

    pub fn thread_subject(&self, thread_id: i64) -> Result<Option<ThreadSubject>> {
        Ok(self.thread(thread_id)?.map(|thread| ThreadSubject {
            thread_id: thread.id,
            subject: thread.snippet,
            charset: thread.snippet_cs,
        }))
    }

    /// The latest visible message of every thread, newest first.
    pub fn conversation_heads(&self) -> Result<Vec<UnifiedMessage>> {
        let query = UnionQuery::both(&[Condition::Visible])
            .latest_per_thread()
            .order_by(Column::NormalizedDate, Order::Desc);
        self.read(|conn| run_union(conn, &query))
    }

    /// Visible messages of one thread in chronological order, with any
    /// pending error state.
    pub fn thread_messages(&self, thread_id: i64) -> Result<Vec<UnifiedMessage>> {
        let query = UnionQuery::both(&[Condition::ThreadIs(thread_id), Condition::Visible])
            .with_pending()
            .order_by(Column::NormalizedDate, Order::Asc)
            .order_by(Column::Id, Order::Asc);
        self.read(|conn| run_union(conn, &query))
    }

    /// Every visible message grouped by thread, with pending error state.
    pub fn complete_conversations(&self) -> Result<Vec<UnifiedMessage>> {
        let query = UnionQuery::both(&[Condition::Visible])
            .with_pending()
            .order_by(Column::ThreadId, Order::Asc)
            .order_by(Column::NormalizedDate, Order::Asc);
        self.read(|conn| run_union(conn, &query))
    }

    /// Messages exchanged with a phone number, under the configured comparison.
    pub fn messages_by_phone(&self, number: &str) -> Result<Vec<UnifiedMessage>> {
        let condition = Condition::PhoneIs {
            number: number.to_string(),
            strict: self.options.strict_phone,
        };
        let query = UnionQuery::both(&[condition])
            .order_by(Column::NormalizedDate, Order::Asc);
        self.read(|conn| run_union(conn, &query))
    }

    /// Outgoing messages not yet delivered.
    pub fn undelivered(&self) -> Result<Vec<UnifiedMessage>> {
        let query = UnionQuery::both(&[Condition::Undelivered])
            .with_pending()
            .order_by(Column::NormalizedDate, Order::Asc);
        self.read(|conn| run_union(conn, &query))
    }

    pub fn draft_messages(&self) -> Result<Vec<UnifiedMessage>> {
        let query = UnionQuery::both(&[Condition::Drafts])
            .distinct()
            .order_by(Column::NormalizedDate, Order::Desc);
        self.read(|conn| run_union(conn, &query))
    }

    /// The first locked message, globally or within a thread.
    pub fn first_locked(&self, thread_id: Option<i64>) -> Result<Option<UnifiedMessage>> {
        let mut conditions = vec![Condition::Locked];
        if let Some(thread_id) = thread_id {
            conditions.push(Condition::ThreadIs(thread_id));
        }
        let query = UnionQuery::both(&conditions)
            .order_by(Column::NormalizedDate, Order::Asc)
            .limit(1);
        let mut messages = self.read(|conn| run_union(conn, &query))?;
        Ok(messages.pop())
    }

    /// Queue entries ordered by due time.
    pub fn pending_messages(&self, filter: &PendingFilter) -> Result<Vec<PendingMessage>> {
        self.read(|conn| {
            let mut clauses = Vec::new();
            let mut params = Vec::new();
            if let Some(protocol) = filter.protocol {
                clauses.push("proto_type = ?");
                params.push(Value::Integer(i64::from(protocol.code())));
            }
            if let Some(due_before) = filter.due_before {
                clauses.push("due_time <= ?");
                params.push(Value::Integer(due_before));
            }

            let mut sql = String::from(
                "SELECT _id, proto_type, msg_id, msg_type, err_type, err_code, retry_index, \
                 due_time, last_try FROM pending_msgs",
            );
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
            sql.push_str(" ORDER BY due_time ASC, _id ASC");

            let mut stmt = conn.prepare(&sql)?;
            let pending = stmt
                .query_map(params_from_iter(params), pending_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(pending)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AddrType, MessageBox, MmsMessageType, NewAddr, NewPart, NewPdu, NewPending, NewSms, SmsType,
    };
    use crate::storage::query::Source;

    fn sms(store: &MessageStore, address: &str, body: &str, date: i64, sms_type: SmsType) -> i64 {
        store
            .insert_sms(&NewSms {
                address: Some(address.into()),
                body: Some(body.into()),
                date: Some(date),
                sms_type,
                ..Default::default()
            })
            .unwrap()
    }

    #[test]
    fn test_thread_messages_interleave_sms_and_mms() {
        let store = MessageStore::open_in_memory().unwrap();
        let first = sms(&store, "6505551234", "first", 1_000_000, SmsType::Inbox);
        let thread_id = store.sms(first).unwrap().unwrap().thread_id.unwrap();
        let pdu = store
            .insert_pdu(&NewPdu {
                thread_id: Some(thread_id),
                date: Some(2_000),
                sub: Some("second".into()),
                ..Default::default()
            })
            .unwrap();
        store
            .insert_part(pdu, &NewPart { ct: Some("text/plain".into()), text: Some("mms body".into()), ..Default::default() })
            .unwrap();
        sms(&store, "6505551234", "third", 3_000_000, SmsType::Sent);
        sms(&store, "6505551234", "unsent draft", 4_000_000, SmsType::Draft);

        let messages = store.thread_messages(thread_id).unwrap();
        let kinds: Vec<Source> = messages.iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![Source::Sms, Source::Mms, Source::Sms]);
        assert_eq!(messages[1].normalized_date, 2_000_000);
        assert_eq!(messages[1].preview(), "mms body");
        assert_eq!(messages[1].subject.as_deref(), Some("second"));
        assert!(messages.iter().all(|m| m.preview() != "unsent draft"));
    }

    #[test]
    fn test_drafts_listed_separately() {
        let store = MessageStore::open_in_memory().unwrap();
        sms(&store, "5551234", "visible", 1, SmsType::Inbox);
        sms(&store, "5551234", "draft text", 2, SmsType::Draft);
        store
            .insert_pdu(&NewPdu {
                recipients: vec!["alice@example.com".into()],
                msg_box: MessageBox::Drafts,
                m_type: MmsMessageType::SendReq,
                ..Default::default()
            })
            .unwrap();

        let drafts = store.draft_messages().unwrap();
        assert_eq!(drafts.len(), 2);
        assert!(drafts.iter().any(|m| m.kind == Source::Mms && m.msg_box == Some(3)));
        assert!(drafts.iter().any(|m| m.body.as_deref() == Some("draft text")));
    }

    #[test]
    fn test_undelivered_exposes_pending_error() {
        let store = MessageStore::open_in_memory().unwrap();
        let outbox = sms(&store, "5551234", "waiting", 5, SmsType::Outbox);
        sms(&store, "5551234", "delivered", 6, SmsType::Sent);
        store
            .insert_pending(&NewPending { err_type: 4, ..NewPending::new(Protocol::Sms, outbox, 0) })
            .unwrap();

        let undelivered = store.undelivered().unwrap();
        assert_eq!(undelivered.len(), 1);
        assert_eq!(undelivered[0].id, outbox);
        assert_eq!(undelivered[0].err_type, Some(4));
    }

    #[test]
    fn test_conversation_heads_pick_latest_per_thread() {
        let store = MessageStore::open_in_memory().unwrap();
        sms(&store, "5551234", "old", 10, SmsType::Inbox);
        sms(&store, "5551234", "new", 20, SmsType::Inbox);
        sms(&store, "alice@example.com", "other", 15, SmsType::Inbox);

        let heads = store.conversation_heads().unwrap();
        let bodies: Vec<&str> = heads.iter().map(|m| m.preview()).collect();
        assert_eq!(bodies, vec!["new", "other"]);
    }

    #[test]
    fn test_list_threads_filters() {
        let store = MessageStore::open_in_memory().unwrap();
        let single = store.get_or_create_thread_id(&["5551234"]).unwrap();
        let group = store.get_or_create_thread_id(&["5551234", "bob@example.com"]).unwrap();
        sms(&store, "5551234", "unread", 1, SmsType::Inbox);

        let broadcast = store
            .list_threads(&ThreadFilter { thread_type: Some(ThreadType::Broadcast), ..Default::default() })
            .unwrap();
        assert_eq!(broadcast.iter().map(|t| t.id).collect::<Vec<_>>(), vec![group]);

        let unread = store
            .list_threads(&ThreadFilter { unread_only: true, ..Default::default() })
            .unwrap();
        assert_eq!(unread.iter().map(|t| t.id).collect::<Vec<_>>(), vec![single]);

        let by_count = store
            .list_threads(&ThreadFilter {
                sort: Some((ThreadSort::MessageCount, Order::Asc)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_count.iter().map(|t| t.id).collect::<Vec<_>>(), vec![group, single]);

        let by_id = store
            .list_threads(&ThreadFilter { sort: Some((ThreadSort::Id, Order::Desc)), ..Default::default() })
            .unwrap();
        assert_eq!(by_id.iter().map(|t| t.id).collect::<Vec<_>>(), vec![group, single]);

        let with_recipients = store.thread_by_id(group).unwrap().unwrap();
        assert_eq!(with_recipients.recipients.len(), 2);
        assert!(store.thread_by_id(9999).unwrap().is_none());
    }

    #[test]
    fn test_thread_subject_follows_latest_message() {
        let store = MessageStore::open_in_memory().unwrap();
        let thread_id = store.get_or_create_thread_id(&["5551234"]).unwrap();
        assert_eq!(store.thread_subject(thread_id).unwrap().unwrap().subject, None);

        store
            .insert_pdu(&NewPdu {
                thread_id: Some(thread_id),
                date: Some(5),
                sub: Some("Photos".into()),
                sub_cs: Some(106),
                ..Default::default()
            })
            .unwrap();

        let subject = store.thread_subject(thread_id).unwrap().unwrap();
        assert_eq!(subject.subject.as_deref(), Some("Photos"));
        assert_eq!(subject.charset, 106);
        assert!(store.thread_subject(9999).unwrap().is_none());
    }

    #[test]
    fn test_first_locked_scoped_to_thread() {
        let store = MessageStore::open_in_memory().unwrap();
        let a = sms(&store, "5551234", "a", 1, SmsType::Inbox);
        let thread_a = store.sms(a).unwrap().unwrap().thread_id.unwrap();
        let b = store
            .insert_sms(&NewSms { address: Some("alice@example.com".into()), locked: true, date: Some(2), ..Default::default() })
            .unwrap();

        assert_eq!(store.first_locked(None).unwrap().map(|m| m.id), Some(b));
        assert!(store.first_locked(Some(thread_a)).unwrap().is_none());
    }

    #[test]
    fn test_messages_by_phone_matches_mms_addresses() {
        let store = MessageStore::open_in_memory().unwrap();
        sms(&store, "650-555-1234", "sms", 1, SmsType::Inbox);
        let pdu = store
            .insert_pdu(&NewPdu { recipients: vec!["+16505551234".into()], date: Some(5), ..Default::default() })
            .unwrap();
        store
            .insert_addr(pdu, &NewAddr { address: "+16505551234".into(), addr_type: AddrType::From, ..Default::default() })
            .unwrap();
        sms(&store, "4155550000", "unrelated", 2, SmsType::Inbox);

        let messages = store.messages_by_phone("6505551234").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].kind, Source::Mms);
        assert_eq!(messages[1].address.as_deref(), Some("+16505551234"));
    }

    #[test]
    fn test_pending_messages_ordered_by_due_time() {
        let store = MessageStore::open_in_memory().unwrap();
        let a = sms(&store, "5551234", "a", 1, SmsType::Outbox);
        let b = sms(&store, "5551234", "b", 2, SmsType::Outbox);
        store.insert_pending(&NewPending { due_time: 300, ..NewPending::new(Protocol::Sms, a, 0) }).unwrap();
        store.insert_pending(&NewPending { due_time: 100, ..NewPending::new(Protocol::Sms, b, 0) }).unwrap();

        let pending = store.pending_messages(&PendingFilter::default()).unwrap();
        assert_eq!(pending.iter().map(|p| p.msg_id).collect::<Vec<_>>(), vec![b, a]);

        let due = store
            .pending_messages(&PendingFilter { due_before: Some(200), ..Default::default() })
            .unwrap();
        assert_eq!(due.len(), 1);

        let mms = store
            .pending_messages(&PendingFilter { protocol: Some(Protocol::Mms), ..Default::default() })
            .unwrap();
        assert!(mms.is_empty());
    }
}
