//! mmssms - command-line front end for the SMS/MMS message store.
//!
//! Opens (creating or upgrading) the database, runs one subcommand and
//! prints the result either as colored terminal output or as JSON lines.

mod cli;
mod display;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use cli::{Args, Command};
use display::{print_error, print_info, print_success, print_warning, ConversationDisplay};
use mmssms_store::models::{NewSms, ThreadType};
use mmssms_store::storage::{Order, PendingFilter, ThreadFilter};
use mmssms_store::MessageStore;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    // Initialize logging
    init_logging(args.verbose);

    let config = args
        .store_config()
        .context("Could not determine data directory")?;
    info!("Using database: {:?}", config.db_path);

    let store = {
        let open_config = config.clone();
        tokio::task::spawn_blocking(move || MessageStore::open(&open_config))
            .await
            .context("Store open task failed")?
            .with_context(|| format!("Failed to open message store at {:?}", config.db_path))?
    };

    if let Err(e) = store.require_current_schema() {
        print_warning(&e.to_string());
    } else if store.is_upgrade_pending() {
        print_warning("Storage is low; table key conversions are deferred until space is freed.");
    }

    let json = args.json;
    let command = args.command.clone();
    let result = tokio::task::spawn_blocking(move || run(&store, command, json))
        .await
        .context("Command task failed")?;
    if let Err(e) = &result {
        if !json {
            print_error(&format!("{:#}", e));
            std::process::exit(1);
        }
    }
    result
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

/// Print rows as JSON lines
fn print_json<T: Serialize>(rows: &[T]) -> Result<()> {
    for row in rows {
        println!("{}", serde_json::to_string(row)?);
    }
    Ok(())
}

fn run(store: &MessageStore, command: Command, json: bool) -> Result<()> {
    let display = ConversationDisplay::new();
    debug!("Running {:?}", command);

    match command {
        Command::Init => {
            let version = store.version()?;
            if json {
                print_json(&[serde_json::json!({
                    "version": version,
                    "upgrade_pending": store.is_upgrade_pending(),
                })])?;
            } else {
                print_success(&format!("Message store ready (schema version {})", version));
            }
        }

        Command::ThreadId { recipients } => {
            let thread_id = store
                .get_or_create_thread_id(&recipients)
                .context("Failed to resolve thread")?;
            if json {
                print_json(&[serde_json::json!({ "thread_id": thread_id })])?;
            } else {
                println!("{}", thread_id);
            }
        }

        Command::Threads { broadcast, unread, sort, asc } => {
            let order = if asc { Order::Asc } else { Order::Desc };
            let filter = ThreadFilter {
                thread_type: broadcast.then_some(ThreadType::Broadcast),
                unread_only: unread,
                sort: sort.map(|sort| (sort, order)),
            };
            let threads = store.list_threads(&filter)?;
            if json {
                print_json(&threads)?;
            } else {
                display.threads(&threads)?;
            }
        }

        Command::Subject { thread } => {
            let subject = store
                .thread_subject(thread)?
                .with_context(|| format!("No thread #{}", thread))?;
            if json {
                print_json(&[subject])?;
            } else {
                println!("{}", subject.subject.as_deref().unwrap_or(""));
            }
        }

        Command::Messages { thread } => {
            let messages = store.thread_messages(thread)?;
            if json {
                print_json(&messages)?;
            } else {
                display.messages(&messages)?;
            }
        }

        Command::SendSms { to, body, sms_box } => {
            let id = store
                .insert_sms(&NewSms {
                    address: Some(to),
                    body: Some(body),
                    sms_type: sms_box,
                    read: true,
                    seen: true,
                    ..Default::default()
                })
                .context("Failed to store SMS")?;
            let sms = store.sms(id)?;
            if json {
                print_json(&[sms])?;
            } else {
                let thread = sms.and_then(|sms| sms.thread_id).unwrap_or_default();
                print_success(&format!("Stored SMS {} in thread #{}", id, thread));
            }
        }

        Command::MarkRead { thread } => {
            let updated = store.mark_thread_read(thread)?;
            report_count(json, "marked_read", updated, "message(s) marked read")?;
        }

        Command::DeleteSms { id } => {
            let deleted = store.delete_sms(id)?;
            if json {
                print_json(&[serde_json::json!({ "deleted": deleted })])?;
            } else if deleted {
                print_success(&format!("Deleted SMS {}", id));
            } else {
                print_warning(&format!("No SMS with id {}", id));
            }
        }

        Command::DeleteThread { thread } => {
            let deleted = store.delete_thread(thread)?;
            report_count(json, "deleted", deleted, "message(s) deleted")?;
        }

        Command::Undelivered => {
            let messages = store.undelivered()?;
            if json {
                print_json(&messages)?;
            } else {
                display.messages(&messages)?;
            }
        }

        Command::Drafts => {
            let messages = store.draft_messages()?;
            if json {
                print_json(&messages)?;
            } else {
                display.messages(&messages)?;
            }
        }

        Command::Search { pattern } => {
            let hits = store.search(&pattern)?;
            if json {
                print_json(&hits)?;
            } else {
                display.search_hits(&hits)?;
            }
        }

        Command::Locked { thread } => {
            let locked: Vec<_> = store.first_locked(thread)?.into_iter().collect();
            if json {
                print_json(&locked)?;
            } else if locked.is_empty() {
                print_info("No locked messages.");
            } else {
                display.messages(&locked)?;
            }
        }

        Command::Pending { protocol } => {
            let filter = PendingFilter {
                protocol,
                due_before: None,
            };
            let entries = store.pending_messages(&filter)?;
            if json {
                print_json(&entries)?;
            } else {
                display.pending(&entries)?;
            }
        }

        Command::Recompute { thread } => {
            match thread {
                Some(thread) => store.update_thread(thread)?,
                None => store.update_all_threads()?,
            }
            if json {
                print_json(&[serde_json::json!({ "recomputed": thread })])?;
            } else {
                print_success("Thread state recomputed");
            }
        }

        Command::Gc => {
            let threads = store.delete_obsolete_threads()?;
            let addresses = store.gc_canonical_addresses()?;
            if json {
                print_json(&[serde_json::json!({
                    "threads_deleted": threads,
                    "addresses_deleted": addresses,
                })])?;
            } else {
                print_success(&format!(
                    "Removed {} empty thread(s) and {} unused address(es)",
                    threads, addresses
                ));
            }
        }
    }

    Ok(())
}

fn report_count(json: bool, key: &str, count: usize, label: &str) -> Result<()> {
    if json {
        let mut row = serde_json::Map::new();
        row.insert(key.to_string(), count.into());
        print_json(&[row])?;
    } else {
        print_success(&format!("{} {}", count, label));
    }
    Ok(())
}
