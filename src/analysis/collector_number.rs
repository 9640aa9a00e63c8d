//! Collector number extraction from recognized text
//!
//! Only the printed `NN/TTT` pattern is accepted. A bare number is too
//! ambiguous against the other numerals printed on a card, so text without a
//! valid slash pattern yields no result.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// 1-3 digits, a forward or back slash, 2-3 digits, flexible whitespace
const NUMBER_PATTERN: &str = r"(\d{1,3})\s*[/\\]\s*(\d{2,3})";

/// Totals below this are OCR noise; every set in the catalog is larger
pub const MIN_PLAUSIBLE_TOTAL: u32 = 100;

/// How far past the slash pattern a set number may appear (chars)
const SET_NUMBER_WINDOW: usize = 16;

/// Plausible range of printed set numbers
const SET_NUMBER_RANGE: std::ops::RangeInclusive<u32> = 1..=30;

static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn pattern() -> Option<&'static Regex> {
    PATTERN
        .get_or_init(|| match Regex::new(NUMBER_PATTERN) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("Collector number pattern failed to compile: {}", e);
                None
            }
        })
        .as_ref()
}

/// Collector number read from a card
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedCollectorNumber {
    /// Collector number, no leading zeros, greater than zero
    pub cn: String,
    /// Printed set size, at least 100 and not below `cn`
    pub total: Option<u32>,
    /// Set number printed after the collector number, if one was found
    pub set_number: Option<String>,
    /// Recognized text this was parsed from
    pub raw: String,
}

/// Replace characters the recognizer commonly confuses with digits
pub fn normalize_confusables(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'l' | 'I' | '|' => '1',
            'o' | 'O' => '0',
            's' | 'S' => '5',
            'b' | 'B' => '8',
            other => other,
        })
        .collect()
}

/// Extract `(cn, total, set number)` from noisy recognized text
pub fn parse_collector_number(text: &str) -> Option<ParsedCollectorNumber> {
    let normalized = normalize_confusables(text);
    let re = pattern()?;

    for caps in re.captures_iter(&normalized) {
        let (Some(whole), Some(cn_match), Some(total_match)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let (Ok(cn), Ok(total)) = (cn_match.as_str().parse::<u32>(), total_match.as_str().parse::<u32>()) else {
            continue;
        };

        if total < MIN_PLAUSIBLE_TOTAL || cn == 0 || cn > total {
            debug!("Rejected collector number candidate {:?}", whole.as_str());
            continue;
        }

        let set_number = find_set_number(&normalized[whole.end()..], last_char(whole.as_str()));

        return Some(ParsedCollectorNumber {
            cn: cn.to_string(),
            total: Some(total),
            set_number,
            raw: text.to_string(),
        });
    }

    None
}

fn last_char(s: &str) -> Option<char> {
    s.chars().next_back()
}

/// First 1-2 digit token shortly after the pattern that is not glued to
/// letters or other digits and lies in the plausible set range
fn find_set_number(rest: &str, preceding: Option<char>) -> Option<String> {
    let window: Vec<char> = rest.chars().take(SET_NUMBER_WINDOW).collect();
    let is_glue = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());

    let mut i = 0;
    while i < window.len() {
        if !window[i].is_ascii_digit() {
            i += 1;
            continue;
        }

        let start = i;
        while i < window.len() && window[i].is_ascii_digit() {
            i += 1;
        }

        let before = if start == 0 { preceding } else { Some(window[start - 1]) };
        let after = window.get(i).copied();
        // A run cut off by the window end may continue past it
        let truncated = i == window.len() && rest.chars().count() > window.len();
        if i - start > 2 || is_glue(before) || is_glue(after) || truncated {
            continue;
        }

        let token: String = window[start..i].iter().collect();
        if let Ok(value) = token.parse::<u32>() {
            if SET_NUMBER_RANGE.contains(&value) {
                return Some(value.to_string());
            }
        }
    }

    None
}
