//! Picking the hardware ID a driver was matched against.
//!
//! Device enumeration reports the hardware ID the signed driver was installed
//! for, and separately the device's own hardware/compatible ID lists. These
//! rarely agree verbatim, so the matcher reconciles them in two passes: a
//! "raw" match against the device's list, then a "display" match that prefers
//! short, literal IDs for presentation.

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;

/// `ACPI\VEN_xxx&DEV_yyyy`, which has the shorter equivalent `ACPI\xxxyyyy`.
static ACPI_VEN_DEV: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^ACPI\\VEN_([A-Z0-9]{3})&DEV_([0-9A-F]{4})$").expect("static regex")
});

/// A device's hardware and compatible IDs, blank-free and deduplicated.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HardwareIdSet {
    /// Hardware IDs, most specific first.
    pub hardware_ids: Vec<String>,
    /// Compatible IDs, most specific first.
    pub compatible_ids: Vec<String>,
}

impl HardwareIdSet {
    /// Builds a set, dropping blank entries and exact duplicates while
    /// keeping first-seen order.
    pub fn new<H, C>(hardware_ids: H, compatible_ids: C) -> Self
    where
        H: IntoIterator,
        H::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        HardwareIdSet {
            hardware_ids: clean(hardware_ids),
            compatible_ids: clean(compatible_ids),
        }
    }
}

fn clean<I>(ids: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    ids.into_iter()
        .map(Into::into)
        .filter(|id| !id.trim().is_empty())
        .unique()
        .collect()
}

/// Uppercases one char, keeping it as-is when its uppercase form is not a
/// single char.
fn fold(c: char) -> char {
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(u), None) => u,
        _ => c,
    }
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.chars().map(fold).eq(b.chars().map(fold))
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    let mut s = s.chars().map(fold);
    prefix.chars().map(fold).all(|c| s.next() == Some(c))
}

fn first_non_blank(ids: &[String]) -> String {
    ids.iter()
        .find(|id| !id.trim().is_empty())
        .cloned()
        .unwrap_or_default()
}

/// Picks the entry of `hardware_ids` the signed driver's hardware ID refers to.
///
/// In order: an exact (case-insensitive) match; the first entry that starts
/// with the signed ID; the longest entry the signed ID starts with; and
/// finally the signed ID itself. With no signed ID, the first non-blank entry
/// wins.
pub fn pick_raw_matched_hardware_id(signed_hardware_id: &str, hardware_ids: &[String]) -> String {
    let signed = signed_hardware_id.trim();
    if signed.is_empty() {
        return first_non_blank(hardware_ids);
    }

    if let Some(exact) = hardware_ids
        .iter()
        .find(|h| eq_ignore_case(h.trim(), signed))
    {
        return exact.clone();
    }

    if let Some(longer) = hardware_ids
        .iter()
        .find(|h| !h.is_empty() && starts_with_ignore_case(h, signed))
    {
        return longer.clone();
    }

    // Longest first, so the most specific containing ID wins. The sort is
    // stable: equal lengths keep their original order.
    if let Some(shorter) = hardware_ids
        .iter()
        .sorted_by(|a, b| b.len().cmp(&a.len()))
        .find(|h| !h.is_empty() && starts_with_ignore_case(signed, h))
    {
        return shorter.clone();
    }

    signed.to_owned()
}

/// Refines a raw match into the ID best suited for display.
///
/// Prefers the short `ACPI\xxxyyyy` form of an `ACPI\VEN_xxx&DEV_yyyy` match,
/// then the first literal ID (no `&`, no leading `*`), then the raw match
/// itself.
pub fn pick_display_matched_hardware_id(raw_matched: &str, hardware_ids: &[String]) -> String {
    let raw = raw_matched.trim();
    if raw.is_empty() {
        return first_non_blank(hardware_ids);
    }

    if let Some(caps) = ACPI_VEN_DEV.captures(raw) {
        let preferred = format!(
            "ACPI\\{}{}",
            caps[1].to_ascii_uppercase(),
            caps[2].to_ascii_uppercase()
        );
        if let Some(short) = hardware_ids
            .iter()
            .find(|h| eq_ignore_case(h.trim(), &preferred))
        {
            return short.clone();
        }
    }

    if let Some(literal) = hardware_ids.iter().find(|h| {
        let t = h.trim();
        !t.is_empty() && !h.contains('&') && !t.starts_with('*')
    }) {
        return literal.clone();
    }

    if let Some(exact) = hardware_ids
        .iter()
        .find(|h| eq_ignore_case(h.trim(), raw))
    {
        return exact.clone();
    }

    raw.to_owned()
}

/// Whether `candidate` should be highlighted as the hit in a hardware ID list.
///
/// Compares against the display match, or against the raw match when there is
/// no display match.
pub fn is_matched_for_display(candidate: &str, display_matched: &str, raw_matched: &str) -> bool {
    let c = candidate.trim();
    let d = display_matched.trim();
    let r = raw_matched.trim();

    if !d.is_empty() {
        return eq_ignore_case(c, d);
    }
    !r.is_empty() && eq_ignore_case(c, r)
}
