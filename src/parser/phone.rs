use std::sync::LazyLock;

use regex::Regex;

use super::{HintKind, RawRow};

static PHONE_DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{7,}$").unwrap());

/// Characters the page sprinkles into rendered numbers.
fn is_phone_noise(c: char) -> bool {
    c.is_whitespace() || matches!(c, '-' | '(' | ')' | '+' | '\u{00A0}' | '\u{200B}')
}

/// Drop separators, keeping whatever else the string carries.
pub fn strip_noise(raw: &str) -> String {
    raw.chars().filter(|c| !is_phone_noise(*c)).collect()
}

/// True when the string is a phone number once separators are removed.
pub fn looks_like_phone(raw: &str) -> bool {
    PHONE_DIGITS_RE.is_match(&strip_noise(raw))
}

/// `+`-prefixed digits.
pub fn normalize(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("+{}", digits)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub phone: String,
    pub is_saved: bool,
}

/// What a resolver gets to look at for one row.
pub struct RowView<'a> {
    pub name: &'a str,
    pub secondary: &'a [String],
    pub row: &'a RawRow,
}

pub type Resolver = fn(&RowView) -> Option<Resolution>;

/// Tried in order; the first hit wins.
pub const RESOLVERS: &[(&str, Resolver)] = &[
    ("title", from_title_hint),
    ("aria-label", from_aria_label_hint),
    ("display-name", from_display_name),
    ("secondary-line", from_secondary_lines),
];

pub fn resolve(view: &RowView) -> Option<(&'static str, Resolution)> {
    RESOLVERS
        .iter()
        .find_map(|(label, resolver)| resolver(view).map(|r| (*label, r)))
}

fn from_hint(view: &RowView, kind: HintKind) -> Option<Resolution> {
    let value = view
        .row
        .hints
        .iter()
        .filter(|h| h.kind == kind)
        .map(|h| h.value.as_str())
        .find(|v| looks_like_phone(v))?;

    // A display name identical to the number means nobody saved it.
    Some(Resolution {
        phone: normalize(value),
        is_saved: view.name != value.trim(),
    })
}

pub fn from_title_hint(view: &RowView) -> Option<Resolution> {
    from_hint(view, HintKind::Title)
}

pub fn from_aria_label_hint(view: &RowView) -> Option<Resolution> {
    from_hint(view, HintKind::AriaLabel)
}

pub fn from_display_name(view: &RowView) -> Option<Resolution> {
    if !looks_like_phone(view.name) {
        return None;
    }
    Some(Resolution {
        phone: normalize(view.name),
        is_saved: false,
    })
}

pub fn from_secondary_lines(view: &RowView) -> Option<Resolution> {
    view.secondary
        .iter()
        .filter(|l| !l.to_lowercase().contains("admin"))
        .find(|l| looks_like_phone(l))
        .map(|l| Resolution {
            phone: normalize(l),
            is_saved: true,
        })
}
