//! Typed builder for the SMS ∪ MMS queries.
//!
//! Every unified query projects the same [`Column`] set from each
//! [`Source`], padding columns a source lacks with NULL, so both halves of
//! the UNION always line up. Callers describe filters with [`Condition`]
//! values; parameters travel next to the SQL, never spliced into it.

use rusqlite::types::Value;
use rusqlite::Row;
use serde::Serialize;

/// Which message table a row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Sms,
    Mms,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Sms => "sms",
            Source::Mms => "mms",
        }
    }

    fn table(self) -> &'static str {
        match self {
            Source::Sms => "sms",
            Source::Mms => "pdu",
        }
    }

    fn protocol_code(self) -> i32 {
        match self {
            Source::Sms => 0,
            Source::Mms => 1,
        }
    }
}

/// Columns of the unified message row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Kind,
    Id,
    ThreadId,
    Address,
    Body,
    Subject,
    SubjectCharset,
    Date,
    NormalizedDate,
    DateSent,
    Read,
    Seen,
    Locked,
    SmsType,
    MsgBox,
    MessageType,
    Status,
    ErrorCode,
    ErrType,
}

impl Column {
    pub const ALL: [Column; 19] = [
        Column::Kind,
        Column::Id,
        Column::ThreadId,
        Column::Address,
        Column::Body,
        Column::Subject,
        Column::SubjectCharset,
        Column::Date,
        Column::NormalizedDate,
        Column::DateSent,
        Column::Read,
        Column::Seen,
        Column::Locked,
        Column::SmsType,
        Column::MsgBox,
        Column::MessageType,
        Column::Status,
        Column::ErrorCode,
        Column::ErrType,
    ];

    /// Result column name.
    pub fn name(self) -> &'static str {
        match self {
            Column::Kind => "kind",
            Column::Id => "_id",
            Column::ThreadId => "thread_id",
            Column::Address => "address",
            Column::Body => "body",
            Column::Subject => "subject",
            Column::SubjectCharset => "subject_cs",
            Column::Date => "date",
            Column::NormalizedDate => "normalized_date",
            Column::DateSent => "date_sent",
            Column::Read => "read",
            Column::Seen => "seen",
            Column::Locked => "locked",
            Column::SmsType => "type",
            Column::MsgBox => "msg_box",
            Column::MessageType => "m_type",
            Column::Status => "status",
            Column::ErrorCode => "error_code",
            Column::ErrType => "err_type",
        }
    }

    /// SQL expression producing this column from a source table.
    fn expr(self, source: Source, pending_joined: bool) -> &'static str {
        match (self, source) {
            (Column::Kind, Source::Sms) => "'sms'",
            (Column::Kind, Source::Mms) => "'mms'",
            (Column::Id, Source::Sms) => "sms._id",
            (Column::Id, Source::Mms) => "pdu._id",
            (Column::ThreadId, Source::Sms) => "sms.thread_id",
            (Column::ThreadId, Source::Mms) => "pdu.thread_id",
            (Column::Address, Source::Sms) => "sms.address",
            // Sender for received messages, first recipient otherwise
            (Column::Address, Source::Mms) => {
                "(SELECT addr.address FROM addr WHERE addr.msg_id = pdu._id \
                 AND addr.type = CASE WHEN pdu.msg_box = 1 THEN 137 ELSE 151 END \
                 ORDER BY addr._id LIMIT 1)"
            }
            (Column::Body, Source::Sms) => "sms.body",
            (Column::Body, Source::Mms) => {
                "(SELECT part.text FROM part WHERE part.mid = pdu._id \
                 AND part.ct = 'text/plain' ORDER BY part.seq, part._id LIMIT 1)"
            }
            (Column::Subject, Source::Sms) => "sms.subject",
            (Column::Subject, Source::Mms) => "pdu.sub",
            (Column::SubjectCharset, Source::Sms) => "NULL",
            (Column::SubjectCharset, Source::Mms) => "pdu.sub_cs",
            (Column::Date, Source::Sms) => "COALESCE(sms.date, 0)",
            (Column::Date, Source::Mms) => "COALESCE(pdu.date, 0)",
            (Column::NormalizedDate, Source::Sms) => "COALESCE(sms.date, 0)",
            (Column::NormalizedDate, Source::Mms) => "COALESCE(pdu.date, 0) * 1000",
            (Column::DateSent, Source::Sms) => "COALESCE(sms.date_sent, 0)",
            (Column::DateSent, Source::Mms) => "COALESCE(pdu.date_sent, 0)",
            (Column::Read, Source::Sms) => "COALESCE(sms.read, 0)",
            (Column::Read, Source::Mms) => "COALESCE(pdu.read, 0)",
            (Column::Seen, Source::Sms) => "COALESCE(sms.seen, 0)",
            (Column::Seen, Source::Mms) => "COALESCE(pdu.seen, 0)",
            (Column::Locked, Source::Sms) => "COALESCE(sms.locked, 0)",
            (Column::Locked, Source::Mms) => "COALESCE(pdu.locked, 0)",
            (Column::SmsType, Source::Sms) => "sms.type",
            (Column::SmsType, Source::Mms) => "NULL",
            (Column::MsgBox, Source::Sms) => "NULL",
            (Column::MsgBox, Source::Mms) => "pdu.msg_box",
            (Column::MessageType, Source::Sms) => "NULL",
            (Column::MessageType, Source::Mms) => "pdu.m_type",
            (Column::Status, Source::Sms) => "sms.status",
            (Column::Status, Source::Mms) => "pdu.st",
            (Column::ErrorCode, Source::Sms) => "sms.error_code",
            (Column::ErrorCode, Source::Mms) => "NULL",
            (Column::ErrType, _) if pending_joined => "pending_msgs.err_type",
            (Column::ErrType, _) => "NULL",
        }
    }
}

/// A filter applied to one side of a unified query.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    ThreadIs(i64),
    /// Messages shown in a conversation: not drafts, displayed MMS types only
    Visible,
    Drafts,
    /// Outbox, failed and queued SMS plus outbox MMS
    Undelivered,
    Locked,
    Unread,
    /// SMS address or any MMS address header equal under phone comparison
    PhoneIs { number: String, strict: bool },
}

impl Condition {
    fn render(&self, source: Source, params: &mut Vec<Value>) -> String {
        let table = source.table();
        match self {
            Condition::ThreadIs(thread_id) => {
                params.push(Value::Integer(*thread_id));
                format!("{table}.thread_id = ?")
            }
            Condition::Visible => match source {
                Source::Sms => "sms.type != 3".to_string(),
                Source::Mms => "pdu.msg_box != 3 AND pdu.m_type IN (128, 130, 132)".to_string(),
            },
            Condition::Drafts => match source {
                Source::Sms => "sms.type = 3".to_string(),
                Source::Mms => "pdu.msg_box = 3".to_string(),
            },
            Condition::Undelivered => match source {
                Source::Sms => "sms.type IN (4, 5, 6)".to_string(),
                Source::Mms => "pdu.msg_box = 4".to_string(),
            },
            Condition::Locked => format!("{table}.locked = 1"),
            Condition::Unread => format!("{table}.read = 0"),
            Condition::PhoneIs { number, strict } => {
                params.push(Value::Text(number.clone()));
                let strict = i32::from(*strict);
                match source {
                    Source::Sms => format!("PHONE_NUMBERS_EQUAL(sms.address, ?, {strict})"),
                    Source::Mms => format!(
                        "EXISTS (SELECT 1 FROM addr WHERE addr.msg_id = pdu._id \
                         AND PHONE_NUMBERS_EQUAL(addr.address, ?, {strict}))"
                    ),
                }
            }
        }
    }
}

/// One side of the UNION.
#[derive(Debug, Clone)]
pub struct SubQuery {
    source: Source,
    conditions: Vec<Condition>,
    join_pending: bool,
}

impl SubQuery {
    pub fn new(source: Source) -> Self {
        Self { source, conditions: Vec::new(), join_pending: false }
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Left join the pending queue so `err_type` is populated.
    pub fn with_pending(mut self) -> Self {
        self.join_pending = true;
        self
    }

    fn render(&self, params: &mut Vec<Value>) -> String {
        let projection = Column::ALL
            .iter()
            .map(|column| format!("{} AS {}", column.expr(self.source, self.join_pending), column.name()))
            .collect::<Vec<_>>()
            .join(", ");

        let table = self.source.table();
        let mut sql = format!("SELECT {projection} FROM {table}");
        if self.join_pending {
            sql.push_str(&format!(
                " LEFT JOIN pending_msgs ON pending_msgs.msg_id = {table}._id \
                 AND pending_msgs.proto_type = {}",
                self.source.protocol_code()
            ));
        }

        if !self.conditions.is_empty() {
            let clauses = self
                .conditions
                .iter()
                .map(|condition| format!("({})", condition.render(self.source, params)))
                .collect::<Vec<_>>()
                .join(" AND ");
            sql.push_str(" WHERE ");
            sql.push_str(&clauses);
        }
        sql
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// A compound query over both message tables.
#[derive(Debug, Clone)]
pub struct UnionQuery {
    parts: Vec<SubQuery>,
    distinct: bool,
    latest_per_thread: bool,
    order: Vec<(Column, Order)>,
    limit: Option<i64>,
}

impl UnionQuery {
    pub fn new() -> Self {
        Self {
            parts: Vec::new(),
            distinct: false,
            latest_per_thread: false,
            order: Vec::new(),
            limit: None,
        }
    }

    /// SMS and MMS sides sharing the same conditions.
    pub fn both(conditions: &[Condition]) -> Self {
        let side = |source| {
            conditions
                .iter()
                .cloned()
                .fold(SubQuery::new(source), SubQuery::filter)
        };
        Self::new().union(side(Source::Sms)).union(side(Source::Mms))
    }

    pub fn union(mut self, part: SubQuery) -> Self {
        self.parts.push(part);
        self
    }

    /// Join pending state on every side.
    pub fn with_pending(mut self) -> Self {
        self.parts = self.parts.into_iter().map(SubQuery::with_pending).collect();
        self
    }

    /// Use `UNION` instead of `UNION ALL`.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Keep only the row with the greatest normalized date in each thread.
    pub fn latest_per_thread(mut self) -> Self {
        self.latest_per_thread = true;
        self
    }

    pub fn order_by(mut self, column: Column, order: Order) -> Self {
        self.order.push((column, order));
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Render SQL and its positional parameters.
    pub fn build(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let operator = if self.distinct { " UNION " } else { " UNION ALL " };
        let union = self
            .parts
            .iter()
            .map(|part| part.render(&mut params))
            .collect::<Vec<_>>()
            .join(operator);

        let names = Column::ALL.iter().map(|c| c.name()).collect::<Vec<_>>().join(", ");
        let mut sql = if self.latest_per_thread {
            format!(
                "SELECT {names}, MAX(normalized_date) AS latest FROM ({union}) \
                 WHERE thread_id IS NOT NULL GROUP BY thread_id"
            )
        } else {
            format!("SELECT {names} FROM ({union})")
        };

        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|(column, order)| {
                    let direction = match order {
                        Order::Asc => "ASC",
                        Order::Desc => "DESC",
                    };
                    format!("{} {direction}", column.name())
                })
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(" ORDER BY ");
            sql.push_str(&order);
        }
        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            params.push(Value::Integer(limit));
        }
        (sql, params)
    }
}

impl Default for UnionQuery {
    fn default() -> Self {
        Self::new()
    }
}

/// A message from either table in the unified row shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnifiedMessage {
    pub kind: Source,
    pub id: i64,
    pub thread_id: Option<i64>,
    pub address: Option<String>,
    pub body: Option<String>,
    pub subject: Option<String>,
    pub subject_cs: Option<i32>,
    /// Stored date: milliseconds for SMS, seconds for MMS
    pub date: i64,
    /// Milliseconds for both kinds
    pub normalized_date: i64,
    pub date_sent: i64,
    pub read: bool,
    pub seen: bool,
    pub locked: bool,
    #[serde(rename = "type")]
    pub sms_type: Option<i32>,
    pub msg_box: Option<i32>,
    pub m_type: Option<i32>,
    pub status: Option<i32>,
    pub error_code: Option<i32>,
    pub err_type: Option<i32>,
}

impl UnifiedMessage {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let kind: String = row.get("kind")?;
        Ok(Self {
            kind: if kind == "mms" { Source::Mms } else { Source::Sms },
            id: row.get("_id")?,
            thread_id: row.get("thread_id")?,
            address: row.get("address")?,
            body: row.get("body")?,
            subject: row.get("subject")?,
            subject_cs: row.get("subject_cs")?,
            date: row.get("date")?,
            normalized_date: row.get("normalized_date")?,
            date_sent: row.get("date_sent")?,
            read: row.get("read")?,
            seen: row.get("seen")?,
            locked: row.get("locked")?,
            sms_type: row.get("type")?,
            msg_box: row.get("msg_box")?,
            m_type: row.get("m_type")?,
            status: row.get("status")?,
            error_code: row.get("error_code")?,
            err_type: row.get("err_type")?,
        })
    }

    /// Preview text: the body, or the subject for MMS without text.
    pub fn preview(&self) -> &str {
        self.body
            .as_deref()
            .or(self.subject.as_deref())
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_sides_project_same_columns() {
        let (sql, params) = UnionQuery::both(&[Condition::ThreadIs(7), Condition::Visible]).build();

        assert_eq!(sql.matches(" AS normalized_date").count(), 2);
        assert!(sql.contains("COALESCE(pdu.date, 0) * 1000 AS normalized_date"));
        assert!(sql.contains(" UNION ALL "));
        assert_eq!(params, vec![Value::Integer(7), Value::Integer(7)]);
    }

    #[test]
    fn test_pending_join_only_when_requested() {
        let (plain, _) = UnionQuery::both(&[Condition::Undelivered]).build();
        assert!(!plain.contains("pending_msgs"));

        let (joined, _) = UnionQuery::both(&[Condition::Undelivered]).with_pending().build();
        assert!(joined.contains("LEFT JOIN pending_msgs ON pending_msgs.msg_id = sms._id AND pending_msgs.proto_type = 0"));
        assert!(joined.contains("pending_msgs.err_type AS err_type"));
    }

    #[test]
    fn test_drafts_use_distinct_union_and_limit_param() {
        let (sql, params) = UnionQuery::both(&[Condition::Drafts])
            .distinct()
            .order_by(Column::NormalizedDate, Order::Desc)
            .limit(5)
            .build();

        assert!(sql.contains(" UNION "));
        assert!(!sql.contains("UNION ALL"));
        assert!(sql.ends_with("ORDER BY normalized_date DESC LIMIT ?"));
        assert_eq!(params, vec![Value::Integer(5)]);
    }

    #[test]
    fn test_phone_condition_binds_number() {
        let condition = Condition::PhoneIs { number: "5551234".into(), strict: true };
        let mut params = Vec::new();
        let sql = condition.render(Source::Mms, &mut params);

        assert!(sql.contains("PHONE_NUMBERS_EQUAL(addr.address, ?, 1)"));
        assert_eq!(params, vec![Value::Text("5551234".into())]);
    }
}
