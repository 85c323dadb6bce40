//! Static, versioned mapping configuration (spec §4.A).
//!
//! Betpawa is the canonical taxonomy; competitor ids are translated into it.
//! Nothing here talks to the database or the network — the whole module is
//! data, so it can be constructed once at startup and shared behind an `Arc`.

use crate::model::{Bookmaker, CategoryTag};
use regex::Regex;
use std::collections::{HashMap, HashSet};

/// Where, in a competitor's raw payload, to look for a market's line value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSource {
    /// The payload's own `line` field.
    Line,
    /// Fall back to `handicap.home` when `line` is absent.
    HandicapHome,
}

pub struct MappingTables {
    /// (bookmaker, native market id) -> canonical market id. Betpawa is
    /// identity and is not present in this table (see `canonical_id_for`).
    market_id_map: HashMap<(Bookmaker, String), String>,
    /// Canonical market ids whose identity includes a numeric line, and the
    /// fallback chain used to resolve it.
    line_parameterised: HashMap<String, Vec<LineSource>>,
    /// Canonical market id -> category tags.
    categories: HashMap<String, HashSet<CategoryTag>>,
    /// Canonical market id -> outcome names in canonical order.
    canonical_outcomes: HashMap<String, Vec<String>>,
    /// (canonical market id, normalised native label) -> canonical outcome name.
    outcome_aliases: HashMap<(String, String), String>,
    separator_re: Regex,
}

impl MappingTables {
    pub fn bootstrap() -> Self {
        let mut market_id_map = HashMap::new();

        // SportyBet native ids -> canonical (Betpawa-shaped) ids.
        market_id_map.insert((Bookmaker::SportyBet, "1".to_string()), "1x2".to_string());
        market_id_map.insert((Bookmaker::SportyBet, "18".to_string()), "ou_goals".to_string());
        market_id_map.insert((Bookmaker::SportyBet, "16".to_string()), "ah".to_string());
        market_id_map.insert((Bookmaker::SportyBet, "10".to_string()), "btts".to_string());
        market_id_map.insert((Bookmaker::SportyBet, "29".to_string()), "corners_ou".to_string());
        market_id_map.insert((Bookmaker::SportyBet, "60".to_string()), "1x2_combo".to_string());

        // Bet9ja native ids -> canonical ids.
        market_id_map.insert((Bookmaker::Bet9ja, "1X2".to_string()), "1x2".to_string());
        market_id_map.insert((Bookmaker::Bet9ja, "OU".to_string()), "ou_goals".to_string());
        market_id_map.insert((Bookmaker::Bet9ja, "HND".to_string()), "ah".to_string());
        market_id_map.insert((Bookmaker::Bet9ja, "GG_NG".to_string()), "btts".to_string());
        market_id_map.insert((Bookmaker::Bet9ja, "COU".to_string()), "corners_ou".to_string());

        let mut line_parameterised = HashMap::new();
        line_parameterised.insert("ou_goals".to_string(), vec![LineSource::Line, LineSource::HandicapHome]);
        line_parameterised.insert("ah".to_string(), vec![LineSource::HandicapHome, LineSource::Line]);
        line_parameterised.insert("corners_ou".to_string(), vec![LineSource::Line]);

        let mut categories: HashMap<String, HashSet<CategoryTag>> = HashMap::new();
        categories.insert("1x2".into(), [CategoryTag::Popular].into_iter().collect());
        categories.insert(
            "ou_goals".into(),
            [CategoryTag::Popular, CategoryTag::Goals].into_iter().collect(),
        );
        categories.insert("ah".into(), [CategoryTag::Handicaps].into_iter().collect());
        categories.insert(
            "btts".into(),
            [CategoryTag::Popular, CategoryTag::Goals].into_iter().collect(),
        );
        categories.insert("corners_ou".into(), [CategoryTag::Corners].into_iter().collect());
        categories.insert(
            "1x2_combo".into(),
            [CategoryTag::Combos, CategoryTag::Popular].into_iter().collect(),
        );
        categories.insert("1h_1x2".into(), [CategoryTag::Halves].into_iter().collect());
        categories.insert("cards_ou".into(), [CategoryTag::Cards].into_iter().collect());

        let mut canonical_outcomes = HashMap::new();
        canonical_outcomes.insert("1x2".to_string(), vec!["1".to_string(), "X".to_string(), "2".to_string()]);
        canonical_outcomes.insert("ou_goals".to_string(), vec!["Over".to_string(), "Under".to_string()]);
        canonical_outcomes.insert("ah".to_string(), vec!["Home".to_string(), "Away".to_string()]);
        canonical_outcomes.insert("btts".to_string(), vec!["Yes".to_string(), "No".to_string()]);
        canonical_outcomes.insert("corners_ou".to_string(), vec!["Over".to_string(), "Under".to_string()]);
        canonical_outcomes.insert(
            "1x2_combo".to_string(),
            vec![
                "1X+Over".to_string(),
                "1X+Under".to_string(),
                "12+Over".to_string(),
                "12+Under".to_string(),
                "X2+Over".to_string(),
                "X2+Under".to_string(),
            ],
        );

        let mut outcome_aliases = HashMap::new();
        let mut alias = |market: &str, native: &str, canonical: &str| {
            outcome_aliases.insert((market.to_string(), native.to_string()), canonical.to_string());
        };
        // SportyBet/Bet9ja native labels that diverge from Betpawa's own.
        alias("1x2", "home", "1");
        alias("1x2", "draw", "X");
        alias("1x2", "away", "2");
        alias("ou_goals", "over", "Over");
        alias("ou_goals", "under", "Under");
        alias("corners_ou", "over", "Over");
        alias("corners_ou", "under", "Under");
        alias("btts", "yes", "Yes");
        alias("btts", "no", "No");
        alias("btts", "gg", "Yes");
        alias("btts", "ng", "No");
        alias("ah", "home", "Home");
        alias("ah", "team1", "Home");
        alias("ah", "away", "Away");
        alias("ah", "team2", "Away");

        Self {
            market_id_map,
            line_parameterised,
            categories,
            canonical_outcomes,
            outcome_aliases,
            // Collapse " - " and " & " (the two conventions bookmakers use to
            // join combo-outcome labels) down to a single separator before
            // any alias comparison happens.
            separator_re: Regex::new(r" - | & ").unwrap(),
        }
    }

    /// Resolve the canonical market id for a raw (bookmaker, native id) pair.
    /// Betpawa's native ids are already canonical.
    pub fn canonical_id_for(&self, bookmaker: Bookmaker, native_id: &str) -> Option<String> {
        if bookmaker == Bookmaker::Betpawa {
            return Some(native_id.to_string());
        }
        self.market_id_map.get(&(bookmaker, native_id.to_string())).cloned()
    }

    pub fn line_sources_for(&self, canonical_id: &str) -> Option<&[LineSource]> {
        self.line_parameterised.get(canonical_id).map(|v| v.as_slice())
    }

    pub fn requires_line(&self, canonical_id: &str) -> bool {
        self.line_parameterised.contains_key(canonical_id)
    }

    pub fn categories_for(&self, canonical_id: &str) -> HashSet<CategoryTag> {
        self.categories
            .get(canonical_id)
            .cloned()
            .unwrap_or_else(|| [CategoryTag::Other].into_iter().collect())
    }

    pub fn canonical_outcomes_for(&self, canonical_id: &str) -> Option<&[String]> {
        self.canonical_outcomes.get(canonical_id).map(|v| v.as_slice())
    }

    /// Resolve a bookmaker-native outcome label to its canonical name for the
    /// given canonical market. Falls back to treating the label as already
    /// canonical (covers Betpawa, whose outcome labels are canonical by
    /// definition) when no explicit alias is registered but the normalised
    /// label matches a canonical outcome name directly.
    pub fn resolve_outcome_alias(&self, canonical_market_id: &str, native_label: &str) -> Option<String> {
        let normalised = self.normalise_outcome_label(native_label);

        if let Some(canonical) = self
            .outcome_aliases
            .get(&(canonical_market_id.to_string(), normalised.clone()))
        {
            return Some(canonical.clone());
        }

        let candidates = self.canonical_outcomes_for(canonical_market_id)?;
        candidates
            .iter()
            .find(|c| self.normalise_outcome_label(c) == normalised)
            .cloned()
    }

    /// Normalise an outcome label to its canonical alias-comparison form:
    /// collapse combo separators and lowercase/trim. The mapping engine uses
    /// this to compare a bookmaker-native label against the canonical outcome
    /// set while preserving each outcome's own logical order.
    pub fn normalise_outcome_label(&self, label: &str) -> String {
        let collapsed = self.separator_re.replace_all(label, "+");
        collapsed.trim().to_lowercase()
    }
}

impl Default for MappingTables {
    fn default() -> Self {
        Self::bootstrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn betpawa_ids_are_identity() {
        let t = MappingTables::bootstrap();
        assert_eq!(t.canonical_id_for(Bookmaker::Betpawa, "1x2"), Some("1x2".to_string()));
    }

    #[test]
    fn separator_collapse_treats_dash_and_ampersand_the_same() {
        let t = MappingTables::bootstrap();
        assert_eq!(
            t.normalise_outcome_label("1X - Under"),
            t.normalise_outcome_label("1X & Under")
        );
    }

    #[test]
    fn unknown_market_defaults_to_other() {
        let t = MappingTables::bootstrap();
        let cats = t.categories_for("some_unheard_of_market");
        assert_eq!(cats, [CategoryTag::Other].into_iter().collect());
    }
}
