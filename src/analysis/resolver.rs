//! Card resolution
//!
//! Narrows the catalog to the card(s) matching a parsed collector number.
//! Each narrowing stage runs only while more than one candidate remains and
//! is skipped when it would leave none.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::storage::{Catalog, CatalogEntry};
use crate::vision::ink::InkDetection;

/// Default cap on disambiguation candidates
pub const DEFAULT_MAX_CANDIDATES: usize = 6;

/// Restriction of the search to one set
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetFilter {
    #[default]
    All,
    Set(String),
}

impl SetFilter {
    /// "all" (case-insensitive) or a concrete set code
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("all") {
            SetFilter::All
        } else {
            SetFilter::Set(value.to_string())
        }
    }
}

/// Everything the resolver knows about the card in frame
#[derive(Debug, Clone, Copy)]
pub struct ResolveQuery<'a> {
    pub cn: &'a str,
    pub total: Option<u32>,
    pub set_number: Option<&'a str>,
    pub ink: Option<&'a InkDetection>,
    pub set_filter: &'a SetFilter,
}

/// Result of resolving one query
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchOutcome {
    /// Exactly one candidate remained
    Accepted(CatalogEntry),
    /// The number matched several cards; the user has to pick one
    Ambiguous {
        candidates: Vec<CatalogEntry>,
        /// Candidates dropped by the cap
        suppressed: usize,
    },
    NoMatch,
}

impl MatchOutcome {
    /// 1 when the collector number matched at least one card, else 0
    pub fn confidence(&self) -> u8 {
        match self {
            MatchOutcome::NoMatch => 0,
            _ => 1,
        }
    }

    pub fn card(&self) -> Option<&CatalogEntry> {
        match self {
            MatchOutcome::Accepted(card) => Some(card),
            _ => None,
        }
    }

    pub fn candidates(&self) -> &[CatalogEntry] {
        match self {
            MatchOutcome::Ambiguous { candidates, .. } => candidates,
            _ => &[],
        }
    }
}

/// Catalog lookup with the fixed narrowing chain
#[derive(Debug, Clone)]
pub struct CardResolver {
    catalog: Catalog,
    /// Highest collector number seen per set code
    set_sizes: HashMap<String, u32>,
    max_candidates: usize,
    min_ink_confidence: f32,
}

impl CardResolver {
    pub fn new(catalog: Catalog, max_candidates: usize, min_ink_confidence: f32) -> Self {
        let mut set_sizes: HashMap<String, u32> = HashMap::new();
        for entry in catalog.iter() {
            if let Some(value) = entry.collector_value() {
                let size = set_sizes.entry(entry.set_code.clone()).or_insert(0);
                *size = (*size).max(value);
            }
        }

        Self {
            catalog,
            set_sizes,
            max_candidates: max_candidates.max(1),
            min_ink_confidence,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Largest collector number in a set
    pub fn set_size(&self, set_code: &str) -> Option<u32> {
        self.set_sizes.get(set_code).copied()
    }

    pub fn resolve(&self, query: &ResolveQuery<'_>) -> MatchOutcome {
        let in_set = |entry: &CatalogEntry| match query.set_filter {
            SetFilter::All => true,
            SetFilter::Set(code) => entry.set_code == *code,
        };

        let mut matches: Vec<&CatalogEntry> = self
            .catalog
            .iter()
            .filter(|e| in_set(e) && e.collector_number == query.cn)
            .collect();
        debug!("cn={} filter={:?}: {} exact matches", query.cn, query.set_filter, matches.len());

        if let (SetFilter::All, Some(total)) = (query.set_filter, query.total) {
            matches = narrow(matches, |e| self.set_size(&e.set_code) == Some(total));
        }

        if let Some(set_number) = query.set_number {
            matches = narrow(matches, |e| e.set_code == set_number);
        }

        if let Some(ink) = query.ink.filter(|ink| ink.confidence >= self.min_ink_confidence) {
            matches = narrow(matches, |e| e.inks().any(|label| ink.inks().any(|seen| seen == label)));
        }

        match matches.len() {
            0 => MatchOutcome::NoMatch,
            1 => MatchOutcome::Accepted(matches[0].clone()),
            n => {
                let suppressed = n.saturating_sub(self.max_candidates);
                if suppressed > 0 {
                    debug!("{} candidates over the cap of {}", suppressed, self.max_candidates);
                }
                MatchOutcome::Ambiguous {
                    candidates: matches.into_iter().take(self.max_candidates).cloned().collect(),
                    suppressed,
                }
            }
        }
    }
}

/// Apply a filter only when it helps: more than one match and at least one survivor
fn narrow<'c>(matches: Vec<&'c CatalogEntry>, keep: impl Fn(&CatalogEntry) -> bool) -> Vec<&'c CatalogEntry> {
    if matches.len() <= 1 {
        return matches;
    }
    let narrowed: Vec<&CatalogEntry> = matches.iter().copied().filter(|e| keep(e)).collect();
    if narrowed.is_empty() {
        matches
    } else {
        narrowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::catalog::tests::entry;

    /// Two sets sharing collector numbers: set 1 has 204 cards, set 2 has 210
    fn catalog() -> Catalog {
        vec![
            entry("1", "12", "First Twelve", "Amber"),
            entry("1", "204", "First Last", "Steel"),
            entry("2", "12", "Second Twelve", "Ruby"),
            entry("2", "210", "Second Last", "Steel"),
            entry("3", "12", "Third Twelve", "Amber/Steel"),
            entry("3", "204", "Third Last", "Emerald"),
            entry("1", "50", "Unique", "Sapphire"),
        ]
        .into()
    }

    fn resolver() -> CardResolver {
        CardResolver::new(catalog(), DEFAULT_MAX_CANDIDATES, 0.3)
    }

    fn query<'a>(cn: &'a str, filter: &'a SetFilter) -> ResolveQuery<'a> {
        ResolveQuery { cn, total: None, set_number: None, ink: None, set_filter: filter }
    }

    fn ink(primary: &str, secondary: Option<&str>, confidence: f32) -> InkDetection {
        InkDetection {
            primary: primary.to_string(),
            secondary: secondary.map(str::to_string),
            confidence,
            detected_inks: vec![primary.to_string()],
        }
    }

    #[test]
    fn test_unique_number_accepted() {
        let filter = SetFilter::All;
        let outcome = resolver().resolve(&query("50", &filter));
        assert_eq!(outcome.card().unwrap().name, "Unique");
        assert_eq!(outcome.confidence(), 1);
    }

    #[test]
    fn test_unknown_number_no_match() {
        let filter = SetFilter::All;
        let outcome = resolver().resolve(&query("99", &filter));
        assert_eq!(outcome, MatchOutcome::NoMatch);
        assert_eq!(outcome.confidence(), 0);
        assert!(outcome.candidates().is_empty());
    }

    #[test]
    fn test_set_filter_is_unique_key() {
        let filter = SetFilter::Set("2".to_string());
        let outcome = resolver().resolve(&query("12", &filter));
        assert_eq!(outcome.card().unwrap().name, "Second Twelve");

        let outcome = resolver().resolve(&query("50", &filter));
        assert_eq!(outcome, MatchOutcome::NoMatch);
    }

    #[test]
    fn test_total_selects_set_without_ink() {
        let filter = SetFilter::All;
        let q = ResolveQuery { total: Some(210), ..query("12", &filter) };
        let outcome = resolver().resolve(&q);
        assert_eq!(outcome.card().unwrap().name, "Second Twelve");
    }

    #[test]
    fn test_total_ignored_with_explicit_set_filter() {
        // Set 2's size is 210, but the explicit filter wins
        let filter = SetFilter::Set("1".to_string());
        let q = ResolveQuery { total: Some(210), ..query("12", &filter) };
        assert_eq!(resolver().resolve(&q).card().unwrap().name, "First Twelve");
    }

    #[test]
    fn test_set_number_disambiguates_same_total() {
        // Sets 1 and 3 both have 204 cards
        let filter = SetFilter::All;
        let q = ResolveQuery { total: Some(204), ..query("12", &filter) };
        let outcome = resolver().resolve(&q);
        assert_eq!(outcome.candidates().len(), 2);

        let q = ResolveQuery { total: Some(204), set_number: Some("3"), ..query("12", &filter) };
        assert_eq!(resolver().resolve(&q).card().unwrap().name, "Third Twelve");
    }

    #[test]
    fn test_unhelpful_stage_is_skipped() {
        let filter = SetFilter::All;
        let q = ResolveQuery { set_number: Some("9"), total: Some(999), ..query("12", &filter) };
        let outcome = resolver().resolve(&q);
        assert_eq!(outcome.candidates().len(), 3);
    }

    #[test]
    fn test_ink_narrowing_matches_dual_component() {
        let filter = SetFilter::All;
        let detected = ink("Steel", None, 0.8);
        let q = ResolveQuery { ink: Some(&detected), ..query("12", &filter) };
        assert_eq!(resolver().resolve(&q).card().unwrap().name, "Third Twelve");

        let detected = ink("Ruby", Some("Emerald"), 0.9);
        let q = ResolveQuery { ink: Some(&detected), ..query("12", &filter) };
        assert_eq!(resolver().resolve(&q).card().unwrap().name, "Second Twelve");
    }

    #[test]
    fn test_low_confidence_ink_ignored() {
        let filter = SetFilter::All;
        let detected = ink("Ruby", None, 0.1);
        let q = ResolveQuery { ink: Some(&detected), ..query("12", &filter) };
        assert_eq!(resolver().resolve(&q).candidates().len(), 3);
    }

    #[test]
    fn test_candidates_capped_with_suppressed_count() {
        let catalog: Catalog = (1..=8)
            .map(|set| entry(&set.to_string(), "7", &format!("Seven {}", set), "Amber"))
            .collect::<Vec<_>>()
            .into();
        let resolver = CardResolver::new(catalog, DEFAULT_MAX_CANDIDATES, 0.3);
        let filter = SetFilter::All;

        match resolver.resolve(&query("7", &filter)) {
            MatchOutcome::Ambiguous { candidates, suppressed } => {
                assert_eq!(candidates.len(), 6);
                assert_eq!(suppressed, 2);
                assert_eq!(candidates[0].name, "Seven 1");
            }
            other => panic!("expected ambiguity, got {:?}", other),
        }
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let resolver = resolver();
        let filter = SetFilter::All;
        let detected = ink("Amber", None, 0.6);
        let q = ResolveQuery { total: Some(204), ink: Some(&detected), ..query("12", &filter) };

        let first = resolver.resolve(&q);
        for _ in 0..20 {
            assert_eq!(resolver.resolve(&q), first);
        }
    }

    #[test]
    fn test_set_filter_parse() {
        assert_eq!(SetFilter::parse("all"), SetFilter::All);
        assert_eq!(SetFilter::parse(" ALL "), SetFilter::All);
        assert_eq!(SetFilter::parse("7"), SetFilter::Set("7".to_string()));
    }
}
