use std::path::Path;

use crate::model::{ContactRecord, DispatchResult, SendTarget};

const BOM: char = '\u{feff}';

const RESULT_HEADER: &str = "Name,Company,Phone,Status,Message,Timestamp";
const CONTACT_HEADER: &str = "Name,Phone Number,About,Status";
const TARGET_HEADER: &str = "Name,Company,Phone";

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

fn document<I>(header: &str, rows: I) -> String
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut lines = vec![header.to_string()];
    lines.extend(rows.into_iter().map(|fields| fields.join(",")));
    format!("{}{}", BOM, lines.join("\r\n"))
}

pub fn results_csv(results: &[DispatchResult]) -> String {
    document(
        RESULT_HEADER,
        results.iter().map(|r| {
            vec![
                quote(&r.name),
                quote(&r.company),
                quote(&r.phone),
                quote(r.status.as_str()),
                quote(&r.message),
                quote(&r.timestamp),
            ]
        }),
    )
}

pub fn contacts_csv(contacts: &[ContactRecord]) -> String {
    document(
        CONTACT_HEADER,
        contacts.iter().map(|c| {
            vec![
                quote(&c.name),
                quote(c.phone.as_str()),
                quote(&c.about),
                quote(c.status_label()),
            ]
        }),
    )
}

pub fn targets_csv(targets: &[SendTarget]) -> String {
    document(
        TARGET_HEADER,
        targets.iter().map(|t| {
            vec![
                quote(&t.name),
                quote(&t.company_name),
                quote(&t.phone_number),
            ]
        }),
    )
}

/// Field separator for an import file, picked by extension.
pub fn delimiter_for(path: &Path) -> Option<char> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "csv" => Some(','),
        "tsv" | "txt" => Some('\t'),
        _ => None,
    }
}

/// Split one line, honouring double quotes and `""` escapes. Fields are trimmed.
fn split_line(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(ch);
            }
        } else if ch == '"' {
            in_quotes = true;
        } else if ch == delimiter {
            fields.push(current.trim().to_string());
            current.clear();
        } else {
            current.push(ch);
        }
    }
    fields.push(current.trim().to_string());
    fields
}

fn is_header(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.contains("name") || lower.contains("phone")
}

/// Parse `Name, Company, Phone` rows. A first line mentioning "name" or
/// "phone" is a header. Extra columns are ignored, missing ones are empty.
pub fn parse_targets(text: &str, delimiter: char) -> Vec<SendTarget> {
    let text = text.strip_prefix(BOM).unwrap_or(text);
    let mut lines = text.lines().peekable();

    if lines.peek().is_some_and(|first| is_header(first)) {
        lines.next();
    }

    lines
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            let mut fields = split_line(l, delimiter).into_iter();
            SendTarget {
                name: fields.next().unwrap_or_default(),
                company_name: fields.next().unwrap_or_default(),
                phone_number: fields.next().unwrap_or_default(),
            }
        })
        .collect()
}
