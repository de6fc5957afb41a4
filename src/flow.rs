//! Flow patterns: named selection-flow templates a pipeline instance can be
//! pinned to.
//!
//! A pattern maps each phase to the evaluation criterion that applies there,
//! so a recorded evaluation can point at the criterion it was judged against.
//! The engine only reads patterns; authoring them is owned elsewhere, so the
//! seam is a trait plus a table-backed implementation for embedders that hold
//! the patterns in memory.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::phase::Phase;

/// Read-only access to flow patterns.
#[async_trait]
pub trait FlowPatternLookup: Send + Sync {
    /// The evaluation criterion the pattern prescribes for the phase, if the
    /// pattern exists and covers it.
    async fn criterion_for(&self, pattern_id: i64, phase: Phase) -> Option<i64>;
}

/// A flow pattern held in memory.
#[derive(Debug, Clone)]
pub struct FlowPattern {
    pub id: i64,
    pub name: String,
    /// Criterion per phase; phases absent from the map carry no criterion.
    pub criteria: HashMap<Phase, i64>,
}

/// Table-backed [`FlowPatternLookup`].
#[derive(Debug, Default)]
pub struct FlowPatternTable {
    patterns: HashMap<i64, FlowPattern>,
}

impl FlowPatternTable {
    pub fn new(patterns: Vec<FlowPattern>) -> Self {
        Self {
            patterns: patterns.into_iter().map(|p| (p.id, p)).collect(),
        }
    }

    pub fn get(&self, pattern_id: i64) -> Option<&FlowPattern> {
        self.patterns.get(&pattern_id)
    }
}

#[async_trait]
impl FlowPatternLookup for FlowPatternTable {
    async fn criterion_for(&self, pattern_id: i64, phase: Phase) -> Option<i64> {
        self.patterns
            .get(&pattern_id)
            .and_then(|p| p.criteria.get(&phase).copied())
    }
}

/// Lookup that knows no patterns. Evaluations recorded against it carry no
/// criterion.
#[derive(Debug, Default)]
pub struct NoPatterns;

#[async_trait]
impl FlowPatternLookup for NoPatterns {
    async fn criterion_for(&self, _pattern_id: i64, _phase: Phase) -> Option<i64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> FlowPatternTable {
        FlowPatternTable::new(vec![FlowPattern {
            id: 1,
            name: "standard".into(),
            criteria: HashMap::from([(Phase::Round1, 100), (Phase::Round2, 101)]),
        }])
    }

    #[tokio::test]
    async fn known_pattern_and_phase_resolves() {
        assert_eq!(table().criterion_for(1, Phase::Round1).await, Some(100));
    }

    #[tokio::test]
    async fn uncovered_phase_resolves_to_none() {
        assert_eq!(table().criterion_for(1, Phase::Round5).await, None);
    }

    #[tokio::test]
    async fn unknown_pattern_resolves_to_none() {
        assert_eq!(table().criterion_for(9, Phase::Round1).await, None);
    }
}
