//! Address classification and phone number equality.
//!
//! Thread identity depends on deciding when two recipient strings name the
//! same party. Emails compare case-insensitively, phone numbers compare with
//! [`phone_numbers_equal`], anything else compares byte for byte.

use std::sync::OnceLock;

use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::Connection;

/// Minimum trailing digits two numbers must share under loose comparison.
const MIN_MATCH: usize = 7;

const PAUSE: char = ',';
const WAIT: char = ';';
const WILD: char = 'N';

/// What kind of recipient a string is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Email,
    Phone,
    Other,
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^[a-zA-Z0-9+._%\-]{1,256}@[a-zA-Z0-9][a-zA-Z0-9\-]{0,64}(\.[a-zA-Z0-9][a-zA-Z0-9\-]{0,25})+$",
        )
        .expect("valid email regex")
    })
}

fn name_addr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(.*?)\s*<\s*([^>]*?)\s*>\s*$").expect("valid name-addr regex"))
}

fn phone_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\+[0-9]+[\- \.]*)?(\([0-9]+\)[\- \.]*)?([0-9][0-9\- \.]+[0-9])$")
            .expect("valid phone regex")
    })
}

/// Strip a `Display Name <addr-spec>` wrapper, returning the addr-spec.
pub fn extract_addr_spec(address: &str) -> &str {
    match name_addr_regex().captures(address).and_then(|c| c.get(2)) {
        Some(spec) => spec.as_str(),
        None => address,
    }
}

pub fn is_email_address(address: &str) -> bool {
    if address.is_empty() {
        return false;
    }
    email_regex().is_match(extract_addr_spec(address))
}

pub fn is_phone_number(address: &str) -> bool {
    !address.is_empty() && phone_regex().is_match(address)
}

pub fn classify(address: &str) -> AddressKind {
    if is_email_address(address) {
        AddressKind::Email
    } else if is_phone_number(address) {
        AddressKind::Phone
    } else {
        AddressKind::Other
    }
}

/// Compare two phone numbers, loosely or strictly.
pub fn phone_numbers_equal(a: &str, b: &str, strict: bool) -> bool {
    if strict {
        compare_strictly(a, b)
    } else {
        compare_loosely(a, b)
    }
}

fn is_dialable(c: char) -> bool {
    c.is_ascii_digit() || c == '*' || c == '#' || c == '+' || c == WILD
}

fn is_non_separator(c: char) -> bool {
    is_dialable(c) || c == PAUSE || c == WAIT
}

/// Index of the last character before any pause or wait, or -1.
fn last_network_char(a: &[char]) -> isize {
    match a.iter().position(|&c| c == PAUSE || c == WAIT) {
        Some(idx) => idx as isize - 1,
        None => a.len() as isize - 1,
    }
}

/// Trailing-digit comparison. Numbers match when at least [`MIN_MATCH`]
/// dialable digits agree from the end and whatever remains is an
/// international or trunk prefix.
pub fn compare_loosely(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let mut ia = last_network_char(&a);
    let mut ib = last_network_char(&b);
    let mut matched = 0usize;
    let mut skipped_a = 0usize;
    let mut skipped_b = 0usize;

    while ia >= 0 && ib >= 0 {
        let ca = a[ia as usize];
        let cb = b[ib as usize];
        let mut skip = false;

        if !is_dialable(ca) {
            ia -= 1;
            skip = true;
            skipped_a += 1;
        }
        if !is_dialable(cb) {
            ib -= 1;
            skip = true;
            skipped_b += 1;
        }

        if !skip {
            if ca != cb && ca != WILD && cb != WILD {
                break;
            }
            ia -= 1;
            ib -= 1;
            matched += 1;
        }
    }

    if matched < MIN_MATCH {
        // Short numbers match only when every dialable digit matched
        let effective_a = a.len() - skipped_a;
        let effective_b = b.len() - skipped_b;
        return effective_a == effective_b && effective_a == matched;
    }

    if ia < 0 || ib < 0 {
        return true;
    }

    let rest_a = &a[..(ia + 1) as usize];
    let rest_b = &b[..(ib + 1) as usize];

    (match_intl_prefix(rest_a) && match_intl_prefix(rest_b))
        || (match_trunk_prefix(rest_a) && match_intl_prefix_and_cc(rest_b))
        || (match_trunk_prefix(rest_b) && match_intl_prefix_and_cc(rest_a))
}

/// The whole slice is `+`, `00` or `011` plus separators.
fn match_intl_prefix(a: &[char]) -> bool {
    let mut state = 0;
    for &c in a {
        match state {
            0 => {
                if c == '+' {
                    state = 1;
                } else if c == '0' {
                    state = 2;
                } else if is_non_separator(c) {
                    return false;
                }
            }
            2 => {
                if c == '0' {
                    state = 3;
                } else if c == '1' {
                    state = 4;
                } else if is_non_separator(c) {
                    return false;
                }
            }
            4 => {
                if c == '1' {
                    state = 5;
                } else if is_non_separator(c) {
                    return false;
                }
            }
            _ => {
                if is_non_separator(c) {
                    return false;
                }
            }
        }
    }
    matches!(state, 1 | 3 | 5)
}

/// The whole slice is a single trunk `0` plus separators.
fn match_trunk_prefix(a: &[char]) -> bool {
    let mut found = false;
    for &c in a {
        if c == '0' && !found {
            found = true;
        } else if is_non_separator(c) {
            return false;
        }
    }
    found
}

/// The whole slice is an international prefix followed by a 1-3 digit
/// country code.
fn match_intl_prefix_and_cc(a: &[char]) -> bool {
    let mut state = 0;
    for &c in a {
        match state {
            0 => {
                if c == '+' {
                    state = 1;
                } else if c == '0' {
                    state = 2;
                } else if is_non_separator(c) {
                    return false;
                }
            }
            2 => {
                if c == '0' {
                    state = 3;
                } else if c == '1' {
                    state = 4;
                } else if is_non_separator(c) {
                    return false;
                }
            }
            4 => {
                if c == '1' {
                    state = 5;
                } else if is_non_separator(c) {
                    return false;
                }
            }
            1 | 3 | 5 => {
                if c.is_ascii_digit() {
                    state = 6;
                } else if is_non_separator(c) {
                    return false;
                }
            }
            6 | 7 => {
                if c.is_ascii_digit() {
                    state += 1;
                } else if is_non_separator(c) {
                    return false;
                }
            }
            _ => {
                if is_non_separator(c) {
                    return false;
                }
            }
        }
    }
    matches!(state, 6 | 7 | 8)
}

/// A number split into whether it carried an international prefix and its
/// remaining digits.
struct ParsedNumber {
    international: bool,
    digits: String,
}

fn parse_number(raw: &str) -> Option<ParsedNumber> {
    let end = raw.find([PAUSE, WAIT]).unwrap_or(raw.len());
    let raw = &raw[..end];
    let plus = raw.trim_start().starts_with('+');
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }

    if plus {
        return Some(ParsedNumber { international: true, digits });
    }
    if let Some(rest) = digits.strip_prefix("011") {
        return Some(ParsedNumber { international: true, digits: rest.to_string() });
    }
    if let Some(rest) = digits.strip_prefix("00") {
        return Some(ParsedNumber { international: true, digits: rest.to_string() });
    }
    let national = digits.strip_prefix('0').unwrap_or(&digits).to_string();
    Some(ParsedNumber { international: false, digits: national })
}

/// Full national number comparison. An international number on one side
/// matches a national number on the other when it is that number behind a
/// one to three digit country code.
pub fn compare_strictly(a: &str, b: &str) -> bool {
    let (Some(a), Some(b)) = (parse_number(a), parse_number(b)) else {
        return false;
    };

    match (a.international, b.international) {
        (true, true) | (false, false) => a.digits == b.digits,
        (true, false) => matches_behind_country_code(&a.digits, &b.digits),
        (false, true) => matches_behind_country_code(&b.digits, &a.digits),
    }
}

fn matches_behind_country_code(international: &str, national: &str) -> bool {
    if national.is_empty() || !international.ends_with(national) {
        return false;
    }
    (1..=3).contains(&(international.len() - national.len()))
}

/// Register `PHONE_NUMBERS_EQUAL(a, b [, strict])` on a connection.
///
/// The two-argument form uses `default_strict`. NULL on either side is
/// never equal.
pub fn register_functions(conn: &Connection, default_strict: bool) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    conn.create_scalar_function("PHONE_NUMBERS_EQUAL", 3, flags, |ctx| {
        let strict = ctx.get::<Option<i64>>(2)?.unwrap_or(0) != 0;
        Ok(sql_phone_equal(ctx.get_raw(0), ctx.get_raw(1), strict))
    })?;
    conn.create_scalar_function("PHONE_NUMBERS_EQUAL", 2, flags, move |ctx| {
        Ok(sql_phone_equal(ctx.get_raw(0), ctx.get_raw(1), default_strict))
    })?;
    Ok(())
}

fn sql_phone_equal(a: ValueRef<'_>, b: ValueRef<'_>, strict: bool) -> bool {
    match (a.as_str(), b.as_str()) {
        (Ok(a), Ok(b)) => phone_numbers_equal(a, b, strict),
        _ => false,
    }
}
