//! Terminal rendering of threads, messages and queue entries.

use chrono::{DateTime, Local, Utc};
use crossterm::execute;
use crossterm::style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor};
use std::io::{stdout, Stdout, Write};

use mmssms_store::models::{PendingMessage, Thread, ThreadType};
use mmssms_store::storage::{SearchHit, Source, UnifiedMessage};

/// Color scheme for different output elements
pub struct ColorScheme {
    pub timestamp: Color,
    pub thread: Color,
    pub address: Color,
    pub kind: Color,
    pub body: Color,
    pub unread: Color,
    pub failed: Color,
    pub meta: Color,
    pub separator: Color,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self {
            timestamp: Color::DarkGrey,
            thread: Color::Magenta,
            address: Color::Cyan,
            kind: Color::Yellow,
            body: Color::White,
            unread: Color::Green,
            failed: Color::Red,
            meta: Color::DarkGrey,
            separator: Color::DarkGrey,
        }
    }
}

/// Formats store rows for the terminal
pub struct ConversationDisplay {
    colors: ColorScheme,
}

impl ConversationDisplay {
    pub fn new() -> Self {
        Self {
            colors: ColorScheme::default(),
        }
    }

    /// One line per thread: date, id, flags, count and snippet.
    pub fn threads(&self, threads: &[Thread]) -> std::io::Result<()> {
        let mut stdout = stdout();
        if threads.is_empty() {
            print_info("No threads.");
            return Ok(());
        }

        for thread in threads {
            execute!(
                stdout,
                SetForegroundColor(self.colors.timestamp),
                Print(format!("[{}] ", format_timestamp(thread.date))),
                SetForegroundColor(self.colors.thread),
                SetAttribute(Attribute::Bold),
                Print(format!("#{:<5}", thread.id)),
                SetAttribute(Attribute::Reset),
                ResetColor
            )?;

            if thread.thread_type == ThreadType::Broadcast {
                self.print_tag(&mut stdout, "broadcast", self.colors.kind)?;
            }
            if !thread.read {
                self.print_tag(&mut stdout, "unread", self.colors.unread)?;
            }
            if thread.error > 0 {
                self.print_tag(&mut stdout, &format!("{} failed", thread.error), self.colors.failed)?;
            }
            if thread.has_attachment {
                self.print_tag(&mut stdout, "attachment", self.colors.meta)?;
            }

            execute!(
                stdout,
                SetForegroundColor(self.colors.meta),
                Print(format!(" ({} msg) ", thread.message_count)),
                SetForegroundColor(self.colors.body),
                Print(truncate(thread.snippet.as_deref().unwrap_or(""), 60)),
                ResetColor
            )?;
            println!();
        }
        stdout.flush()
    }

    /// Full message blocks separated by rules.
    pub fn messages(&self, messages: &[UnifiedMessage]) -> std::io::Result<()> {
        if messages.is_empty() {
            print_info("No messages.");
            return Ok(());
        }
        let mut stdout = stdout();
        for message in messages {
            self.print_separator(&mut stdout)?;
            self.message(&mut stdout, message)?;
        }
        stdout.flush()
    }

    fn message(&self, stdout: &mut Stdout, msg: &UnifiedMessage) -> std::io::Result<()> {
        let kind = match msg.kind {
            Source::Sms => "SMS",
            Source::Mms => "MMS",
        };
        execute!(
            stdout,
            SetForegroundColor(self.colors.timestamp),
            Print(format!("[{}] ", format_timestamp(msg.normalized_date))),
            SetForegroundColor(self.colors.kind),
            Print(format!("{} {}", kind, msg.id)),
            ResetColor
        )?;
        if let Some(thread_id) = msg.thread_id {
            execute!(
                stdout,
                SetForegroundColor(self.colors.thread),
                Print(format!(" in #{}", thread_id)),
                ResetColor
            )?;
        }
        if msg.locked {
            self.print_tag(stdout, "locked", self.colors.meta)?;
        }
        if !msg.read {
            self.print_tag(stdout, "unread", self.colors.unread)?;
        }
        if let Some(err_type) = msg.err_type {
            self.print_tag(stdout, &format!("err {}", err_type), self.colors.failed)?;
        }
        println!();

        let direction = if msg.sms_type == Some(1) || msg.msg_box == Some(1) {
            "From"
        } else {
            "To"
        };
        execute!(
            stdout,
            Print(format!("{}: ", direction)),
            SetForegroundColor(self.colors.address),
            SetAttribute(Attribute::Bold),
            Print(msg.address.as_deref().unwrap_or("(unknown)")),
            SetAttribute(Attribute::Reset),
            ResetColor
        )?;
        println!();

        if let (Source::Mms, Some(subject)) = (msg.kind, msg.subject.as_deref()) {
            execute!(
                stdout,
                Print("Subject: "),
                SetForegroundColor(self.colors.body),
                Print(subject),
                ResetColor
            )?;
            println!();
        }

        println!();
        execute!(
            stdout,
            SetForegroundColor(self.colors.body),
            Print(msg.body.as_deref().unwrap_or("")),
            ResetColor
        )?;
        println!();
        Ok(())
    }

    pub fn search_hits(&self, hits: &[SearchHit]) -> std::io::Result<()> {
        if hits.is_empty() {
            print_info("No matches.");
            return Ok(());
        }
        let mut stdout = stdout();
        for hit in hits {
            execute!(
                stdout,
                SetForegroundColor(self.colors.timestamp),
                Print(format!("[{}] ", format_timestamp(hit.normalized_date))),
                SetForegroundColor(self.colors.thread),
                Print(format!("#{:<5} ", hit.thread_id)),
                SetForegroundColor(self.colors.kind),
                Print(format!("{} {} ", hit.kind.as_str(), hit.message_id)),
                SetForegroundColor(self.colors.body),
                Print(truncate(&hit.text, 60)),
                ResetColor
            )?;
            println!();
        }
        stdout.flush()
    }

    pub fn pending(&self, entries: &[PendingMessage]) -> std::io::Result<()> {
        if entries.is_empty() {
            print_info("Nothing pending.");
            return Ok(());
        }
        let mut stdout = stdout();
        for entry in entries {
            let color = if entry.err_type > 0 {
                self.colors.failed
            } else {
                self.colors.body
            };
            execute!(
                stdout,
                SetForegroundColor(self.colors.timestamp),
                Print(format!("[due {}] ", format_timestamp(entry.due_time))),
                SetForegroundColor(self.colors.kind),
                Print(format!("{:?} {} ", entry.proto_type, entry.msg_id)),
                SetForegroundColor(color),
                Print(format!(
                    "type {} err {}/{} retry {}",
                    entry.msg_type, entry.err_type, entry.err_code, entry.retry_index
                )),
                ResetColor
            )?;
            println!();
        }
        stdout.flush()
    }

    fn print_tag(&self, stdout: &mut Stdout, label: &str, color: Color) -> std::io::Result<()> {
        execute!(
            stdout,
            SetForegroundColor(color),
            Print(format!(" [{}]", label)),
            ResetColor
        )
    }

    fn print_separator(&self, stdout: &mut Stdout) -> std::io::Result<()> {
        execute!(
            stdout,
            SetForegroundColor(self.colors.separator),
            Print("━".repeat(70)),
            ResetColor
        )?;
        println!();
        Ok(())
    }
}

impl Default for ConversationDisplay {
    fn default() -> Self {
        Self::new()
    }
}

/// Local time for a millisecond timestamp; `-` for zero or out of range.
fn format_timestamp(millis: i64) -> String {
    if millis <= 0 {
        return "-".to_string();
    }
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|utc| utc.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// First `max` characters on one line, with an ellipsis when cut.
fn truncate(text: &str, max: usize) -> String {
    let line = text.replace(['\n', '\r'], " ");
    if line.chars().count() <= max {
        return line;
    }
    let mut cut: String = line.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

/// Print a success message
pub fn print_success(message: &str) {
    let mut stdout = stdout();
    let _ = execute!(
        stdout,
        SetForegroundColor(Color::Green),
        SetAttribute(Attribute::Bold),
        Print("✓ "),
        SetAttribute(Attribute::Reset),
        SetForegroundColor(Color::Green),
        Print(message),
        ResetColor
    );
    println!();
}

/// Print an error message
pub fn print_error(message: &str) {
    let mut stdout = stdout();
    let _ = execute!(
        stdout,
        SetForegroundColor(Color::Red),
        SetAttribute(Attribute::Bold),
        Print("✗ Error: "),
        SetAttribute(Attribute::Reset),
        SetForegroundColor(Color::Red),
        Print(message),
        ResetColor
    );
    println!();
}

/// Print a warning message
pub fn print_warning(message: &str) {
    let mut stdout = stdout();
    let _ = execute!(
        stdout,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        Print(message),
        ResetColor
    );
    println!();
}

/// Print an info message
pub fn print_info(message: &str) {
    let mut stdout = stdout();
    let _ = execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        Print(message),
        ResetColor
    );
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_single_line() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("line one\nline two", 40), "line one line two");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }

    #[test]
    fn test_format_timestamp_handles_unset() {
        assert_eq!(format_timestamp(0), "-");
        assert_eq!(format_timestamp(1_700_000_000_000).len(), 19);
    }
}
