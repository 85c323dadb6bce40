//! Mapping Engine (spec §4.B): a pure function from one raw bookmaker market
//! document to either a `MappedMarket` or an `Unmappable` reason.

use crate::mapping::tables::{LineSource, MappingTables};
use crate::model::{Bookmaker, CanonicalMarketId, CategoryTag, LineKey, Market, MarketIdentity, Outcome};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
pub enum UnmappableReason {
    NoMappingTableEntry,
    UnknownParameterShape,
    OutcomesDoNotMatch,
    ActiveOutcomeCountBelowTwo,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unmappable {
    pub reason: UnmappableReason,
}

#[derive(Debug, Clone)]
pub struct RawOutcome {
    pub native_label: String,
    pub odds: f64,
    pub active: bool,
}

/// One raw market document from one bookmaker, already pulled out of that
/// bookmaker's response shape by the fetcher layer.
#[derive(Debug, Clone)]
pub struct RawMarket {
    pub bookmaker: Bookmaker,
    pub event: crate::model::ExternalMatchId,
    pub native_market_id: String,
    pub display_name: String,
    /// The payload's own `line` field, if present.
    pub line: Option<f64>,
    /// `handicap.home`, used as a fallback line source for some markets.
    pub handicap_home: Option<f64>,
    pub outcomes: Vec<RawOutcome>,
}

#[derive(Debug, Clone)]
pub struct MappedMarket {
    pub market: Market,
}

/// Run the full mapping algorithm (spec §4.B steps 1-5).
pub fn map_market(tables: &MappingTables, raw: &RawMarket) -> Result<MappedMarket, Unmappable> {
    let canonical_id = resolve_canonical_id(tables, raw)?;
    let line = resolve_line(tables, raw, &canonical_id)?;
    let outcomes = resolve_outcomes(tables, raw, &canonical_id)?;
    let margin = compute_margin(&outcomes)?;
    let categories = tables.categories_for(&canonical_id);

    let identity = MarketIdentity {
        event: raw.event,
        bookmaker: raw.bookmaker,
        canonical_market_id: CanonicalMarketId(canonical_id),
        line: LineKey(line),
    };

    Ok(MappedMarket {
        market: Market {
            identity,
            display_name: raw.display_name.clone(),
            categories: categories.into_iter().collect::<BTreeSet<CategoryTag>>(),
            margin,
            outcomes,
            unavailable_at: None,
        },
    })
}

fn resolve_canonical_id(tables: &MappingTables, raw: &RawMarket) -> Result<String, Unmappable> {
    tables
        .canonical_id_for(raw.bookmaker, &raw.native_market_id)
        .ok_or(Unmappable {
            reason: UnmappableReason::NoMappingTableEntry,
        })
}

fn resolve_line(tables: &MappingTables, raw: &RawMarket, canonical_id: &str) -> Result<Option<f64>, Unmappable> {
    if !tables.requires_line(canonical_id) {
        return Ok(None);
    }

    let sources = tables.line_sources_for(canonical_id).unwrap_or(&[LineSource::Line]);
    for source in sources {
        let value = match source {
            LineSource::Line => raw.line,
            LineSource::HandicapHome => raw.handicap_home,
        };
        if let Some(v) = value {
            return Ok(Some(v));
        }
    }

    Err(Unmappable {
        reason: UnmappableReason::UnknownParameterShape,
    })
}

fn resolve_outcomes(tables: &MappingTables, raw: &RawMarket, canonical_id: &str) -> Result<Vec<Outcome>, Unmappable> {
    let canonical_order = tables
        .canonical_outcomes_for(canonical_id)
        .ok_or(Unmappable {
            reason: UnmappableReason::OutcomesDoNotMatch,
        })?;

    // Map every raw outcome onto its canonical name first, rejecting any
    // label the tables can't place.
    let mut by_canonical_name = std::collections::HashMap::new();
    for raw_outcome in &raw.outcomes {
        let canonical_name = tables
            .resolve_outcome_alias(canonical_id, &raw_outcome.native_label)
            .ok_or(Unmappable {
                reason: UnmappableReason::OutcomesDoNotMatch,
            })?;
        by_canonical_name.insert(canonical_name, raw_outcome);
    }

    // Preserve canonical order; an outcome genuinely absent from the payload
    // (rather than mis-labelled) is dropped rather than rejecting the whole
    // market, since e.g. suspended alt-lines commonly omit one side.
    let mut outcomes = Vec::new();
    for canonical_name in canonical_order {
        if let Some(raw_outcome) = by_canonical_name.get(canonical_name) {
            outcomes.push(Outcome {
                name: canonical_name.clone(),
                odds: raw_outcome.odds,
                active: raw_outcome.active,
            });
        }
    }

    if outcomes.is_empty() {
        return Err(Unmappable {
            reason: UnmappableReason::OutcomesDoNotMatch,
        });
    }

    Ok(outcomes)
}

fn compute_margin(outcomes: &[Outcome]) -> Result<f64, Unmappable> {
    let active: Vec<&Outcome> = outcomes.iter().filter(|o| o.active).collect();
    if active.len() < 2 {
        return Err(Unmappable {
            reason: UnmappableReason::ActiveOutcomeCountBelowTwo,
        });
    }

    let sum_inverse: f64 = active.iter().map(|o| 1.0 / o.odds).sum();
    let margin = (sum_inverse - 1.0) * 100.0;
    Ok((margin * 100.0).round() / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExternalMatchId;

    fn raw_1x2(bookmaker: Bookmaker, labels: &[(&str, f64, bool)]) -> RawMarket {
        RawMarket {
            bookmaker,
            event: ExternalMatchId(12345678),
            native_market_id: match bookmaker {
                Bookmaker::Betpawa => "1x2".to_string(),
                Bookmaker::SportyBet => "1".to_string(),
                Bookmaker::Bet9ja => "1X2".to_string(),
            },
            display_name: "1X2".to_string(),
            line: None,
            handicap_home: None,
            outcomes: labels
                .iter()
                .map(|(l, o, a)| RawOutcome {
                    native_label: l.to_string(),
                    odds: *o,
                    active: *a,
                })
                .collect(),
        }
    }

    #[test]
    fn pure_function_same_input_same_output() {
        let tables = MappingTables::bootstrap();
        let raw = raw_1x2(Bookmaker::Betpawa, &[("1", 2.10, true), ("X", 3.30, true), ("2", 3.40, true)]);
        let a = map_market(&tables, &raw).unwrap();
        let b = map_market(&tables, &raw).unwrap();
        assert_eq!(a.market.canonical_digest(), b.market.canonical_digest());
    }

    #[test]
    fn unknown_bookmaker_market_id_is_unmappable() {
        let tables = MappingTables::bootstrap();
        let mut raw = raw_1x2(Bookmaker::SportyBet, &[("home", 2.0, true), ("draw", 3.0, true), ("away", 3.5, true)]);
        raw.native_market_id = "does-not-exist".to_string();
        let err = map_market(&tables, &raw).unwrap_err();
        assert_eq!(err.reason, UnmappableReason::NoMappingTableEntry);
    }

    #[test]
    fn margin_computation_matches_formula() {
        let tables = MappingTables::bootstrap();
        let raw = raw_1x2(Bookmaker::Betpawa, &[("1", 2.0, true), ("X", 4.0, true), ("2", 4.0, true)]);
        let mapped = map_market(&tables, &raw).unwrap();
        // (1/2 + 1/4 + 1/4 - 1) * 100 = 0.00
        assert_eq!(mapped.market.margin, 0.0);
    }

    #[test]
    fn fewer_than_two_active_outcomes_is_unmappable() {
        let tables = MappingTables::bootstrap();
        let raw = raw_1x2(Bookmaker::Betpawa, &[("1", 2.0, true), ("X", 3.0, false), ("2", 3.5, false)]);
        let err = map_market(&tables, &raw).unwrap_err();
        assert_eq!(err.reason, UnmappableReason::ActiveOutcomeCountBelowTwo);
    }

    #[test]
    fn missing_line_with_no_fallback_is_unmappable() {
        let tables = MappingTables::bootstrap();
        let raw = RawMarket {
            bookmaker: Bookmaker::SportyBet,
            event: ExternalMatchId(12345678),
            native_market_id: "18".to_string(), // ou_goals
            display_name: "Over/Under".to_string(),
            line: None,
            handicap_home: None,
            outcomes: vec![
                RawOutcome { native_label: "over".into(), odds: 1.9, active: true },
                RawOutcome { native_label: "under".into(), odds: 1.95, active: true },
            ],
        };
        let err = map_market(&tables, &raw).unwrap_err();
        assert_eq!(err.reason, UnmappableReason::UnknownParameterShape);
    }

    #[test]
    fn handicap_home_fallback_resolves_line_for_ah() {
        let tables = MappingTables::bootstrap();
        let raw = RawMarket {
            bookmaker: Bookmaker::SportyBet,
            event: ExternalMatchId(12345678),
            native_market_id: "16".to_string(), // ah
            display_name: "Handicap".to_string(),
            line: None,
            handicap_home: Some(-1.5),
            outcomes: vec![
                RawOutcome { native_label: "home".into(), odds: 1.9, active: true },
                RawOutcome { native_label: "away".into(), odds: 1.95, active: true },
            ],
        };
        let mapped = map_market(&tables, &raw).unwrap();
        assert_eq!(mapped.market.identity.line.0, Some(-1.5));
    }

    #[test]
    fn separator_normalised_combo_outcomes_match_across_bookmakers() {
        let tables = MappingTables::bootstrap();
        assert_eq!(
            tables.resolve_outcome_alias("1x2_combo", "1X - Under"),
            tables.resolve_outcome_alias("1x2_combo", "1X & Under")
        );
    }
}
