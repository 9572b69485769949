//! Row types, message codes and mutation inputs for the message tables.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::Serialize;

/// Address token a sender uses for "myself"; never part of a thread key.
pub const INSERT_ADDRESS_TOKEN: &str = "insert-address-token";

/// Content types that never make a part an attachment.
pub const TEXT_PLAIN: &str = "text/plain";
pub const APPLICATION_SMIL: &str = "application/smil";

/// `table_to_use` tag of search rows mirroring `sms.body`
pub const SEARCH_TABLE_SMS: i32 = 1;
/// `table_to_use` tag of search rows mirroring `part.text`
pub const SEARCH_TABLE_MMS_PART: i32 = 2;

macro_rules! sql_code {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.code()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let code = i64::column_result(value)?;
                i32::try_from(code)
                    .ok()
                    .and_then(<$ty>::from_code)
                    .ok_or(FromSqlError::OutOfRange(code))
            }
        }
    };
}

/// `sms.type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SmsType {
    All,
    #[default]
    Inbox,
    Sent,
    Draft,
    Outbox,
    Failed,
    Queued,
}

impl SmsType {
    pub fn code(self) -> i32 {
        match self {
            SmsType::All => 0,
            SmsType::Inbox => 1,
            SmsType::Sent => 2,
            SmsType::Draft => 3,
            SmsType::Outbox => 4,
            SmsType::Failed => 5,
            SmsType::Queued => 6,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => SmsType::All,
            1 => SmsType::Inbox,
            2 => SmsType::Sent,
            3 => SmsType::Draft,
            4 => SmsType::Outbox,
            5 => SmsType::Failed,
            6 => SmsType::Queued,
            _ => return None,
        })
    }

    /// Parse the names accepted on the command line.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "inbox" => SmsType::Inbox,
            "sent" => SmsType::Sent,
            "draft" | "drafts" => SmsType::Draft,
            "outbox" => SmsType::Outbox,
            "failed" => SmsType::Failed,
            "queued" => SmsType::Queued,
            _ => return None,
        })
    }
}

sql_code!(SmsType);

/// `pdu.msg_box`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageBox {
    All,
    #[default]
    Inbox,
    Sent,
    Drafts,
    Outbox,
    Failed,
}

impl MessageBox {
    pub fn code(self) -> i32 {
        match self {
            MessageBox::All => 0,
            MessageBox::Inbox => 1,
            MessageBox::Sent => 2,
            MessageBox::Drafts => 3,
            MessageBox::Outbox => 4,
            MessageBox::Failed => 5,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => MessageBox::All,
            1 => MessageBox::Inbox,
            2 => MessageBox::Sent,
            3 => MessageBox::Drafts,
            4 => MessageBox::Outbox,
            5 => MessageBox::Failed,
            _ => return None,
        })
    }
}

sql_code!(MessageBox);

/// `pdu.m_type`, the MMS PDU message type header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MmsMessageType {
    SendReq,
    SendConf,
    NotificationInd,
    NotifyRespInd,
    RetrieveConf,
    AcknowledgeInd,
    DeliveryInd,
    ReadRecInd,
    ReadOrigInd,
    Other(i32),
}

impl MmsMessageType {
    pub fn code(self) -> i32 {
        match self {
            MmsMessageType::SendReq => 128,
            MmsMessageType::SendConf => 129,
            MmsMessageType::NotificationInd => 130,
            MmsMessageType::NotifyRespInd => 131,
            MmsMessageType::RetrieveConf => 132,
            MmsMessageType::AcknowledgeInd => 133,
            MmsMessageType::DeliveryInd => 134,
            MmsMessageType::ReadRecInd => 135,
            MmsMessageType::ReadOrigInd => 136,
            MmsMessageType::Other(code) => code,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            128 => MmsMessageType::SendReq,
            129 => MmsMessageType::SendConf,
            130 => MmsMessageType::NotificationInd,
            131 => MmsMessageType::NotifyRespInd,
            132 => MmsMessageType::RetrieveConf,
            133 => MmsMessageType::AcknowledgeInd,
            134 => MmsMessageType::DeliveryInd,
            135 => MmsMessageType::ReadRecInd,
            136 => MmsMessageType::ReadOrigInd,
            other => MmsMessageType::Other(other),
        })
    }

    /// Types shown to the user in a conversation.
    pub fn is_displayed(self) -> bool {
        matches!(
            self,
            MmsMessageType::SendReq | MmsMessageType::NotificationInd | MmsMessageType::RetrieveConf
        )
    }
}

impl Default for MmsMessageType {
    fn default() -> Self {
        MmsMessageType::RetrieveConf
    }
}

sql_code!(MmsMessageType);

/// `pending_msgs.proto_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Sms,
    Mms,
}

impl Protocol {
    pub fn code(self) -> i32 {
        match self {
            Protocol::Sms => 0,
            Protocol::Mms => 1,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Protocol::Sms),
            1 => Some(Protocol::Mms),
            _ => None,
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            Protocol::Sms => "sms",
            Protocol::Mms => "pdu",
        }
    }
}

sql_code!(Protocol);

/// `threads.type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadType {
    #[default]
    Default,
    Broadcast,
}

impl ThreadType {
    pub fn code(self) -> i32 {
        match self {
            ThreadType::Default => 0,
            ThreadType::Broadcast => 1,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ThreadType::Default),
            1 => Some(ThreadType::Broadcast),
            _ => None,
        }
    }
}

sql_code!(ThreadType);

/// `addr.type`, which header of the PDU the address came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddrType {
    Bcc,
    Cc,
    From,
    #[default]
    To,
}

impl AddrType {
    pub fn code(self) -> i32 {
        match self {
            AddrType::Bcc => 129,
            AddrType::Cc => 130,
            AddrType::From => 137,
            AddrType::To => 151,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            129 => Some(AddrType::Bcc),
            130 => Some(AddrType::Cc),
            137 => Some(AddrType::From),
            151 => Some(AddrType::To),
            _ => None,
        }
    }
}

sql_code!(AddrType);

/// A row of `sms`. Dates are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sms {
    pub id: i64,
    pub thread_id: Option<i64>,
    pub address: Option<String>,
    pub person: Option<i64>,
    pub date: i64,
    pub date_sent: i64,
    pub protocol: Option<i32>,
    pub read: bool,
    pub status: i32,
    #[serde(rename = "type")]
    pub sms_type: SmsType,
    pub reply_path_present: Option<i32>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub service_center: Option<String>,
    pub locked: bool,
    pub error_code: i32,
    pub seen: bool,
}

impl Sms {
    /// Counted toward `message_count`, snippet and read state.
    pub fn is_counted(&self) -> bool {
        self.sms_type != SmsType::Draft
    }
}

/// A row of `pdu`. `date` is seconds; multiply by 1000 before comparing with SMS.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pdu {
    pub id: i64,
    pub thread_id: Option<i64>,
    pub date: i64,
    pub date_sent: i64,
    pub msg_box: MessageBox,
    pub read: bool,
    pub m_id: Option<String>,
    pub sub: Option<String>,
    pub sub_cs: Option<i32>,
    pub ct_t: Option<String>,
    pub ct_l: Option<String>,
    pub exp: Option<i64>,
    pub m_cls: Option<String>,
    pub m_type: MmsMessageType,
    pub v: Option<i32>,
    pub m_size: Option<i64>,
    pub pri: Option<i32>,
    pub rr: Option<i32>,
    pub rpt_a: Option<i32>,
    pub resp_st: Option<i32>,
    pub st: Option<i32>,
    pub tr_id: Option<String>,
    pub retr_st: Option<i32>,
    pub retr_txt: Option<String>,
    pub retr_txt_cs: Option<i32>,
    pub read_status: Option<i32>,
    pub ct_cls: Option<i32>,
    pub resp_txt: Option<String>,
    pub d_tm: Option<i64>,
    pub d_rpt: Option<i32>,
    pub locked: bool,
    pub seen: bool,
    pub text_only: bool,
}

impl Pdu {
    /// Counted toward `message_count`, snippet and read state.
    pub fn is_counted(&self) -> bool {
        self.m_type.is_displayed() && self.msg_box != MessageBox::Drafts
    }
}

/// A row of `part`, one body part of an MMS.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Part {
    pub id: i64,
    pub mid: i64,
    pub seq: i32,
    pub ct: Option<String>,
    pub name: Option<String>,
    pub chset: Option<i32>,
    pub cd: Option<String>,
    #[serde(rename = "fn")]
    pub file_name: Option<String>,
    pub cid: Option<String>,
    pub cl: Option<String>,
    pub ctt_s: Option<i32>,
    pub ctt_t: Option<String>,
    #[serde(rename = "_data")]
    pub data: Option<String>,
    pub text: Option<String>,
}

impl Part {
    pub fn is_attachment(&self) -> bool {
        is_attachment_type(self.ct.as_deref())
    }

    pub fn is_plain_text(&self) -> bool {
        self.ct.as_deref() == Some(TEXT_PLAIN)
    }
}

/// Whether a part content type counts as an attachment for `has_attachment`.
pub fn is_attachment_type(ct: Option<&str>) -> bool {
    match ct {
        Some(ct) => ct != TEXT_PLAIN && ct != APPLICATION_SMIL,
        None => false,
    }
}

/// A row of `addr`, one address header of an MMS.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Addr {
    pub id: i64,
    pub msg_id: i64,
    pub contact_id: Option<i64>,
    pub address: Option<String>,
    #[serde(rename = "type")]
    pub addr_type: AddrType,
    pub charset: Option<i32>,
}

/// A row of `pending_msgs`, a queued send or download.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingMessage {
    pub id: i64,
    pub proto_type: Protocol,
    pub msg_id: i64,
    pub msg_type: i32,
    pub err_type: i32,
    pub err_code: i32,
    pub retry_index: i32,
    pub due_time: i64,
    pub last_try: Option<i64>,
}

/// A row of `threads`. Every field but `recipient_ids` and `type` is derived.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Thread {
    pub id: i64,
    pub date: i64,
    pub message_count: i64,
    pub recipient_ids: String,
    pub snippet: Option<String>,
    pub snippet_cs: i32,
    pub read: bool,
    #[serde(rename = "type")]
    pub thread_type: ThreadType,
    pub error: i64,
    pub has_attachment: bool,
}

impl Thread {
    /// Canonical address ids of the participants.
    pub fn recipient_id_list(&self) -> Vec<i64> {
        parse_recipient_ids(&self.recipient_ids)
    }
}

/// Split a space-separated `recipient_ids` key, skipping garbage entries.
pub fn parse_recipient_ids(ids: &str) -> Vec<i64> {
    ids.split(' ')
        .filter_map(|id| id.trim().parse::<i64>().ok())
        .collect()
}

/// A row of `canonical_addresses`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalAddress {
    pub id: i64,
    pub address: String,
}

/// Input for inserting an SMS.
///
/// When `thread_id` is absent the thread is resolved from `address`.
#[derive(Debug, Clone, Default)]
pub struct NewSms {
    pub thread_id: Option<i64>,
    pub address: Option<String>,
    pub person: Option<i64>,
    /// Milliseconds; defaults to now
    pub date: Option<i64>,
    pub date_sent: i64,
    pub protocol: Option<i32>,
    pub read: bool,
    pub seen: bool,
    pub status: Option<i32>,
    pub sms_type: SmsType,
    pub reply_path_present: Option<i32>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub service_center: Option<String>,
    pub locked: bool,
    pub error_code: i32,
}

/// Partial update of an SMS row. `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct SmsUpdate {
    pub thread_id: Option<i64>,
    pub date: Option<i64>,
    pub read: Option<bool>,
    pub seen: Option<bool>,
    pub status: Option<i32>,
    pub sms_type: Option<SmsType>,
    pub body: Option<String>,
    pub locked: Option<bool>,
    pub error_code: Option<i32>,
}

/// Input for inserting an MMS PDU.
///
/// When `thread_id` is absent the thread is resolved from `recipients`.
#[derive(Debug, Clone, Default)]
pub struct NewPdu {
    pub thread_id: Option<i64>,
    pub recipients: Vec<String>,
    /// Seconds; defaults to now
    pub date: Option<i64>,
    pub date_sent: i64,
    pub msg_box: MessageBox,
    pub read: bool,
    pub seen: bool,
    pub m_id: Option<String>,
    pub sub: Option<String>,
    pub sub_cs: Option<i32>,
    pub ct_t: Option<String>,
    pub ct_l: Option<String>,
    pub exp: Option<i64>,
    pub m_cls: Option<String>,
    pub m_type: MmsMessageType,
    pub v: Option<i32>,
    pub m_size: Option<i64>,
    pub pri: Option<i32>,
    pub rr: Option<i32>,
    pub rpt_a: Option<i32>,
    pub resp_st: Option<i32>,
    pub st: Option<i32>,
    pub tr_id: Option<String>,
    pub retr_st: Option<i32>,
    pub retr_txt: Option<String>,
    pub retr_txt_cs: Option<i32>,
    pub read_status: Option<i32>,
    pub ct_cls: Option<i32>,
    pub resp_txt: Option<String>,
    pub d_tm: Option<i64>,
    pub d_rpt: Option<i32>,
    pub locked: bool,
    pub text_only: bool,
}

/// Partial update of a PDU row. `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct PduUpdate {
    pub thread_id: Option<i64>,
    pub date: Option<i64>,
    pub msg_box: Option<MessageBox>,
    pub read: Option<bool>,
    pub seen: Option<bool>,
    pub sub: Option<String>,
    pub sub_cs: Option<i32>,
    pub m_size: Option<i64>,
    pub resp_st: Option<i32>,
    pub st: Option<i32>,
    pub locked: Option<bool>,
    pub text_only: Option<bool>,
}

/// Input for inserting a part under a PDU.
#[derive(Debug, Clone, Default)]
pub struct NewPart {
    pub seq: i32,
    pub ct: Option<String>,
    pub name: Option<String>,
    pub chset: Option<i32>,
    pub cd: Option<String>,
    pub file_name: Option<String>,
    pub cid: Option<String>,
    pub cl: Option<String>,
    pub ctt_s: Option<i32>,
    pub ctt_t: Option<String>,
    pub data: Option<String>,
    pub text: Option<String>,
}

/// Partial update of a part row.
#[derive(Debug, Clone, Default)]
pub struct PartUpdate {
    pub mid: Option<i64>,
    pub ct: Option<String>,
    pub text: Option<String>,
    pub data: Option<String>,
}

/// Input for inserting an address header under a PDU.
#[derive(Debug, Clone, Default)]
pub struct NewAddr {
    pub contact_id: Option<i64>,
    pub address: String,
    pub addr_type: AddrType,
    pub charset: Option<i32>,
}

/// Input for queueing a pending send/download.
#[derive(Debug, Clone)]
pub struct NewPending {
    pub proto_type: Protocol,
    pub msg_id: i64,
    pub msg_type: i32,
    pub err_type: i32,
    pub err_code: i32,
    pub retry_index: i32,
    pub due_time: i64,
    pub last_try: Option<i64>,
}

impl NewPending {
    pub fn new(proto_type: Protocol, msg_id: i64, msg_type: i32) -> Self {
        Self {
            proto_type,
            msg_id,
            msg_type,
            err_type: 0,
            err_code: 0,
            retry_index: 0,
            due_time: 0,
            last_try: None,
        }
    }
}

/// Partial update of a pending row.
#[derive(Debug, Clone, Default)]
pub struct PendingUpdate {
    pub err_type: Option<i32>,
    pub err_code: Option<i32>,
    pub retry_index: Option<i32>,
    pub due_time: Option<i64>,
    pub last_try: Option<i64>,
}
