//! CSV rendering of an event ledger.

use std::borrow::Cow;

use janus_gateway::LedgerEntry;

pub const CSV_HEADER: [&str; 3] = ["Timestamp (UTC)", "Recording User", "Value"];

/// One header row, then one row per entry. Timestamps are whole unix seconds;
/// the undetailed entry is stamped 0.
pub fn ledger_csv(entries: &[LedgerEntry]) -> String {
    let mut out = String::new();
    push_row(&mut out, &CSV_HEADER.map(Cow::Borrowed));
    for entry in entries {
        let secs = entry.time.map_or(0, |t| t.timestamp());
        push_row(
            &mut out,
            &[
                Cow::Owned(secs.to_string()),
                Cow::Borrowed(entry.label.as_str()),
                Cow::Owned(entry.value.to_string()),
            ],
        );
    }
    out
}

/// Download name for an event's export: spaces become underscores and
/// anything that is not ASCII alphanumeric or `_` is dropped.
pub fn export_filename(event_name: &str) -> String {
    let stem: String = format!("{}_LiveJanus", event_name)
        .replace(' ', "_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    format!("{}.csv", stem)
}

fn push_row(out: &mut String, fields: &[Cow<'_, str>]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&escape(field));
    }
    out.push_str("\r\n");
}

fn escape(field: &str) -> Cow<'_, str> {
    if !field.contains([',', '"', '\r', '\n']) {
        return Cow::Borrowed(field);
    }
    let mut quoted = String::with_capacity(field.len() + 2);
    quoted.push('"');
    for c in field.chars() {
        if c == '"' {
            quoted.push('"');
        }
        quoted.push(c);
    }
    quoted.push('"');
    Cow::Owned(quoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn undetailed_entry_leads_with_timestamp_zero() {
        let entries = vec![
            LedgerEntry {
                time: None,
                label: "Undetailed Records".into(),
                value: 4,
            },
            LedgerEntry {
                time: Some(Utc.timestamp_opt(1_700_000_000, 250_000_000).unwrap()),
                label: "alice".into(),
                value: -1,
            },
        ];
        assert_eq!(
            ledger_csv(&entries),
            "Timestamp (UTC),Recording User,Value\r\n\
             0,Undetailed Records,4\r\n\
             1700000000,alice,-1\r\n"
        );
    }

    #[test]
    fn awkward_usernames_are_quoted() {
        let entries = vec![LedgerEntry {
            time: Some(Utc.timestamp_opt(5, 0).unwrap()),
            label: "o\"neil, jr".into(),
            value: 1,
        }];
        assert!(ledger_csv(&entries).ends_with("5,\"o\"\"neil, jr\",1\r\n"));
    }

    #[test]
    fn filename_is_sanitised() {
        assert_eq!(export_filename("Board Game Night!"), "Board_Game_Night_LiveJanus.csv");
        assert_eq!(export_filename("../etc/passwd"), "etcpasswd_LiveJanus.csv");
    }
}
