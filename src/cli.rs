//! CLI argument parsing using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use mmssms_store::config::{default_data_dir, StoreConfig, DEFAULT_FAILURE_THRESHOLD};
use mmssms_store::models::{Protocol, SmsType};
use mmssms_store::storage::{parse_thread_id, ThreadSort};

/// mmssms - inspect and maintain an SMS/MMS message store
#[derive(Parser, Debug, Clone)]
#[command(name = "mmssms")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose/debug logging
    #[arg(short, long, global = true, env = "MMSSMS_VERBOSE")]
    pub verbose: bool,

    /// Output rows as JSON lines (useful for piping to other tools)
    #[arg(long, global = true, env = "MMSSMS_JSON")]
    pub json: bool,

    /// Custom data directory holding the database
    #[arg(long, value_name = "DIR", global = true, env = "MMSSMS_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Database file (overrides --data-dir)
    #[arg(long, value_name = "PATH", global = true, env = "MMSSMS_DB")]
    pub db: Option<PathBuf>,

    /// Compare phone numbers on the full national number
    #[arg(long, global = true, env = "MMSSMS_STRICT_PHONE")]
    pub strict_phone: bool,

    /// Pending err_type at which a message counts as permanently failed
    #[arg(long, global = true, default_value_t = DEFAULT_FAILURE_THRESHOLD, env = "MMSSMS_FAILURE_THRESHOLD")]
    pub failure_threshold: i32,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create or upgrade the database and report its version
    Init,

    /// Resolve (or create) the thread for a set of recipients
    ThreadId {
        #[arg(required = true)]
        recipients: Vec<String>,
    },

    /// List conversation threads, newest first
    Threads {
        /// Only broadcast (multi-recipient) threads
        #[arg(long)]
        broadcast: bool,

        /// Only threads with unread messages
        #[arg(long)]
        unread: bool,

        /// Order by date, count, error or id (descending unless --asc)
        #[arg(long, value_parser = thread_sort_arg)]
        sort: Option<ThreadSort>,

        #[arg(long, requires = "sort")]
        asc: bool,
    },

    /// Show the subject line of a thread
    Subject {
        #[arg(value_parser = thread_id_arg)]
        thread: i64,
    },

    /// Show every message of a thread, oldest first
    Messages {
        #[arg(value_parser = thread_id_arg)]
        thread: i64,
    },

    /// Store an SMS addressed to a recipient
    SendSms {
        #[arg(long)]
        to: String,

        #[arg(long)]
        body: String,

        /// Box to file the message in (inbox, sent, draft, outbox, failed, queued)
        #[arg(long = "box", default_value = "sent", value_parser = sms_box_arg)]
        sms_box: SmsType,
    },

    /// Mark every message in a thread read and seen
    MarkRead {
        #[arg(value_parser = thread_id_arg)]
        thread: i64,
    },

    /// Delete one SMS by row id
    DeleteSms { id: i64 },

    /// Delete a thread and all its messages
    DeleteThread {
        #[arg(value_parser = thread_id_arg)]
        thread: i64,
    },

    /// Messages that failed or are still waiting to go out
    Undelivered,

    /// Draft messages
    Drafts,

    /// Full-text search; one hit per thread
    Search { pattern: String },

    /// First locked message, optionally within one thread
    Locked {
        #[arg(value_parser = thread_id_arg)]
        thread: Option<i64>,
    },

    /// Queued send/download work, by due time
    Pending {
        /// Only entries of one protocol (sms or mms)
        #[arg(long, value_parser = protocol_arg)]
        protocol: Option<Protocol>,
    },

    /// Recompute derived thread state (all threads when omitted)
    Recompute {
        #[arg(value_parser = thread_id_arg)]
        thread: Option<i64>,
    },

    /// Remove empty threads and unreferenced addresses
    Gc,
}

fn thread_id_arg(raw: &str) -> Result<i64, String> {
    parse_thread_id(raw).map_err(|e| e.to_string())
}

fn protocol_arg(raw: &str) -> Result<Protocol, String> {
    match raw.to_ascii_lowercase().as_str() {
        "sms" => Ok(Protocol::Sms),
        "mms" => Ok(Protocol::Mms),
        _ => Err(format!("unknown protocol {:?}, expected sms or mms", raw)),
    }
}

fn thread_sort_arg(raw: &str) -> Result<ThreadSort, String> {
    match raw.to_ascii_lowercase().as_str() {
        "date" => Ok(ThreadSort::Date),
        "count" | "message_count" => Ok(ThreadSort::MessageCount),
        "error" => Ok(ThreadSort::Error),
        "id" => Ok(ThreadSort::Id),
        _ => Err(format!("unknown sort column {:?}, expected date, count, error or id", raw)),
    }
}

fn sms_box_arg(raw: &str) -> Result<SmsType, String> {
    SmsType::from_name(raw).ok_or_else(|| format!("unknown message box {:?}", raw))
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Store settings from flags, falling back to the platform data dir.
    pub fn store_config(&self) -> Option<StoreConfig> {
        let mut config = match (&self.db, &self.data_dir) {
            (Some(db), _) => StoreConfig {
                db_path: db.clone(),
                ..StoreConfig::default()
            },
            (None, Some(dir)) => StoreConfig::with_data_dir(dir),
            (None, None) => StoreConfig::with_data_dir(default_data_dir()?),
        };
        config.strict_phone_compare = self.strict_phone;
        config.permanent_failure_threshold = self.failure_threshold;
        Some(config)
    }
}
