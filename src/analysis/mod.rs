//! Analysis Layer
//!
//! Interprets recognized text and decides which catalog card is in frame.

pub mod collector_number;
pub mod cooldown;
pub mod resolver;

pub use collector_number::{normalize_confusables, parse_collector_number, ParsedCollectorNumber};
pub use cooldown::CooldownMap;
pub use resolver::{CardResolver, MatchOutcome, ResolveQuery, SetFilter, DEFAULT_MAX_CANDIDATES};
