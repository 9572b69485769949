//! Thread identity: recipient sets to canonical address ids to thread ids.

use std::collections::BTreeSet;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::address::{classify, AddressKind};
use crate::error::{Result, StoreError};
use crate::models::{CanonicalAddress, ThreadType, INSERT_ADDRESS_TOKEN};

use super::consistency::EngineOptions;
use super::MessageStore;

/// Parse a caller-supplied thread id.
pub fn parse_thread_id(raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| StoreError::InvalidThreadId(raw.to_string()))
}

/// Canonical address id for one recipient, inserting it when unseen.
pub(crate) fn canonical_address_id(conn: &Connection, options: &EngineOptions, address: &str) -> Result<i64> {
    let kind = classify(address);
    let refined = match kind {
        AddressKind::Email => address.to_lowercase(),
        _ => address.to_string(),
    };

    let existing: Option<i64> = match kind {
        AddressKind::Phone => conn
            .query_row(
                "SELECT _id FROM canonical_addresses
                 WHERE address = ?1 OR PHONE_NUMBERS_EQUAL(address, ?1, ?2)
                 ORDER BY _id LIMIT 1",
                params![refined, options.strict_phone],
                |row| row.get(0),
            )
            .optional()?,
        _ => conn
            .query_row(
                "SELECT _id FROM canonical_addresses WHERE address = ?1 ORDER BY _id LIMIT 1",
                [&refined],
                |row| row.get(0),
            )
            .optional()?,
    };

    if let Some(id) = existing {
        return Ok(id);
    }

    conn.execute("INSERT INTO canonical_addresses (address) VALUES (?1)", [&refined])?;
    Ok(conn.last_insert_rowid())
}

/// Space-separated, ascending canonical ids; the thread identity key.
fn recipient_key(ids: &BTreeSet<i64>) -> String {
    ids.iter().map(i64::to_string).collect::<Vec<_>>().join(" ")
}

/// Look up or create the thread for a recipient set.
///
/// Must run inside an IMMEDIATE transaction so two writers resolving the
/// same set serialize on the lookup.
pub(crate) fn get_or_create_thread_id<S: AsRef<str>>(
    conn: &Connection,
    options: &EngineOptions,
    recipients: &[S],
) -> Result<i64> {
    let mut ids = BTreeSet::new();
    for recipient in recipients {
        let recipient = recipient.as_ref().trim();
        if recipient.is_empty() || recipient == INSERT_ADDRESS_TOKEN {
            continue;
        }
        ids.insert(canonical_address_id(conn, options, recipient)?);
    }
    if ids.is_empty() {
        return Err(StoreError::NoRecipients);
    }

    let key = recipient_key(&ids);
    let existing: Option<i64> = conn
        .query_row(
            "SELECT _id FROM threads WHERE recipient_ids = ?1",
            [&key],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(thread_id) = existing {
        return Ok(thread_id);
    }

    let thread_type = if ids.len() > 1 { ThreadType::Broadcast } else { ThreadType::Default };
    let date = chrono::Utc::now().timestamp() * 1000;
    conn.execute(
        "INSERT INTO threads (date, recipient_ids, message_count, type) VALUES (?1, ?2, 0, ?3)",
        params![date, key, thread_type],
    )?;
    let thread_id = conn.last_insert_rowid();
    debug!("Created thread {} for {} recipient(s)", thread_id, ids.len());
    Ok(thread_id)
}

fn canonical_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CanonicalAddress> {
    Ok(CanonicalAddress {
        id: row.get(0)?,
        address: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
    })
}

impl MessageStore {
    /// Thread id for a recipient set, creating the thread on first use.
    ///
    /// The self-reference token and blank entries are ignored; a set with
    /// nothing left fails with [`StoreError::NoRecipients`].
    pub fn get_or_create_thread_id<S: AsRef<str>>(&self, recipients: &[S]) -> Result<i64> {
        self.write(|uow| get_or_create_thread_id(uow.conn(), uow.options(), recipients))
    }

    pub fn canonical_address(&self, id: i64) -> Result<Option<CanonicalAddress>> {
        self.read(|conn| {
            let address = conn
                .query_row(
                    "SELECT _id, address FROM canonical_addresses WHERE _id = ?1",
                    [id],
                    canonical_from_row,
                )
                .optional()?;
            Ok(address)
        })
    }

    pub fn canonical_addresses(&self) -> Result<Vec<CanonicalAddress>> {
        self.read(|conn| {
            let mut stmt = conn.prepare("SELECT _id, address FROM canonical_addresses ORDER BY _id")?;
            let addresses = stmt
                .query_map([], canonical_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(addresses)
        })
    }

    /// Repair tooling: rewrite the stored form of a canonical address.
    pub fn update_canonical_address(&self, id: i64, address: &str) -> Result<bool> {
        if address.trim().is_empty() {
            return Err(StoreError::InvalidInput("canonical address must not be empty".into()));
        }
        self.write(|uow| {
            let updated = uow.conn().execute(
                "UPDATE canonical_addresses SET address = ?2 WHERE _id = ?1",
                params![id, address],
            )?;
            Ok(updated > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;

    #[test]
    fn test_parse_thread_id() {
        assert_eq!(parse_thread_id(" 42 ").unwrap(), 42);
        assert!(matches!(parse_thread_id("abc"), Err(StoreError::InvalidThreadId(_))));
    }

    #[test]
    fn test_same_recipients_any_order_same_thread() {
        let store = MessageStore::open_in_memory().unwrap();
        let ab = store.get_or_create_thread_id(&["5551234", "bob@example.com"]).unwrap();
        let ba = store.get_or_create_thread_id(&["bob@example.com", "5551234"]).unwrap();
        assert_eq!(ab, ba);

        let thread = store.thread(ab).unwrap().unwrap();
        assert_eq!(thread.thread_type, ThreadType::Broadcast);
        assert_eq!(thread.message_count, 0);
        assert_eq!(thread.date % 1000, 0);
        assert_eq!(thread.recipient_id_list().len(), 2);
    }

    #[test]
    fn test_equivalent_addresses_share_canonical_id() {
        let store = MessageStore::open_in_memory().unwrap();
        let a = store.get_or_create_thread_id(&["+1 650-555-1234"]).unwrap();
        let b = store.get_or_create_thread_id(&["6505551234"]).unwrap();
        let c = store.get_or_create_thread_id(&["Bob@Example.COM"]).unwrap();
        let d = store.get_or_create_thread_id(&["bob@example.com"]).unwrap();

        assert_eq!(a, b);
        assert_eq!(c, d);
        assert_eq!(store.thread(a).unwrap().unwrap().thread_type, ThreadType::Default);

        let addresses = store.canonical_addresses().unwrap();
        assert_eq!(addresses.len(), 2);
        assert_eq!(addresses[1].address, "bob@example.com");
    }

    #[test]
    fn test_duplicate_recipient_is_not_broadcast() {
        let store = MessageStore::open_in_memory().unwrap();
        let id = store.get_or_create_thread_id(&["5551234", "555-1234"]).unwrap();
        assert_eq!(store.thread(id).unwrap().unwrap().thread_type, ThreadType::Default);
    }

    #[test]
    fn test_self_token_and_empty_sets_rejected() {
        let store = MessageStore::open_in_memory().unwrap();
        let empty: [&str; 0] = [];
        assert!(matches!(store.get_or_create_thread_id(&empty), Err(StoreError::NoRecipients)));
        assert!(matches!(
            store.get_or_create_thread_id(&[INSERT_ADDRESS_TOKEN, "  "]),
            Err(StoreError::NoRecipients)
        ));
        assert!(store.canonical_addresses().unwrap().is_empty());
        assert!(store.list_threads(&Default::default()).unwrap().is_empty());
    }

    #[test]
    fn test_strict_comparison_keeps_short_number_apart() {
        let config = StoreConfig { strict_phone_compare: true, ..StoreConfig::default() };
        let store = MessageStore::open_in_memory_with(&config).unwrap();
        let long = store.get_or_create_thread_id(&["6505551234"]).unwrap();
        let short = store.get_or_create_thread_id(&["5551234"]).unwrap();
        assert_ne!(long, short);

        let loose = MessageStore::open_in_memory().unwrap();
        let long = loose.get_or_create_thread_id(&["6505551234"]).unwrap();
        let short = loose.get_or_create_thread_id(&["5551234"]).unwrap();
        assert_eq!(long, short);
    }

    #[test]
    fn test_concurrent_writers_create_one_thread() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::with_data_dir(dir.path());
        let first = MessageStore::open(&config).unwrap();
        let second = MessageStore::open(&config).unwrap();

        let handles: Vec<_> = [(first, ["5551234", "alice@example.com"]), (second, ["alice@example.com", "5551234"])]
            .into_iter()
            .map(|(store, recipients)| {
                std::thread::spawn(move || {
                    (0..20)
                        .map(|_| store.get_or_create_thread_id(&recipients).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let ids: BTreeSet<i64> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        assert_eq!(ids.len(), 1);

        let reopened = MessageStore::open(&config).unwrap();
        assert_eq!(reopened.list_threads(&Default::default()).unwrap().len(), 1);
        assert_eq!(reopened.canonical_addresses().unwrap().len(), 2);
    }

    #[test]
    fn test_update_canonical_address() {
        let store = MessageStore::open_in_memory().unwrap();
        store.get_or_create_thread_id(&["VERIZON"]).unwrap();
        let id = store.canonical_addresses().unwrap()[0].id;

        assert!(store.update_canonical_address(id, "Verizon").unwrap());
        assert_eq!(store.canonical_address(id).unwrap().unwrap().address, "Verizon");
        assert!(!store.update_canonical_address(999, "x").unwrap());
        assert!(store.update_canonical_address(id, " ").is_err());
    }
}
