//! Best-version selection over a phase's history.
//!
//! The structural score is a heuristic, not a quality guarantee. Callers with
//! stricter requirements supply their own [`VersionScorer`].

use std::collections::BTreeSet;

use super::assessment::Severity;
use super::types::{CritiqueRecord, Version};

/// Scores a candidate artifact; higher is better.
pub trait VersionScorer {
    fn score(&self, content: &str) -> u64;
}

/// Length plus weighted counts of headings and list items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructuralScorer {
    pub heading_weight: u64,
    pub list_item_weight: u64,
}

impl StructuralScorer {
    /// Default weights: a heading counts as 100 characters, a list item as 10.
    pub const DEFAULT: Self = Self {
        heading_weight: 100,
        list_item_weight: 10,
    };
}

impl Default for StructuralScorer {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl VersionScorer for StructuralScorer {
    fn score(&self, content: &str) -> u64 {
        let mut headings = 0u64;
        let mut list_items = 0u64;
        for line in content.lines() {
            let trimmed = line.trim_start();
            if trimmed.starts_with('#') {
                headings += 1;
            } else if is_list_item(trimmed) {
                list_items += 1;
            }
        }
        content.chars().count() as u64
            + headings * self.heading_weight
            + list_items * self.list_item_weight
    }
}

fn is_list_item(line: &str) -> bool {
    if line.starts_with("- ") || line.starts_with("* ") || line.starts_with("+ ") {
        return true;
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    digits > 0 && line[digits..].starts_with(". ")
}

/// Why a version was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionReason {
    /// Its critique reached the terminal set.
    Converged,
    /// Highest structural score among retained versions.
    Scored(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub index: usize,
    pub reason: SelectionReason,
}

/// Pick the version to carry forward.
///
/// Prefers the last version whose recognized critique is in `terminal`. Otherwise the
/// highest-scoring version wins, ties going to the latest.
pub fn select_version<S: VersionScorer + ?Sized>(
    history: &[Version],
    critiques: &[CritiqueRecord],
    terminal: &BTreeSet<Severity>,
    scorer: &S,
) -> Option<Selection> {
    if history.is_empty() {
        return None;
    }
    if let Some(index) = critiques
        .iter()
        .filter(|record| record.version < history.len())
        .filter(|record| {
            record.critique.assessment_recognized
                && terminal.contains(&record.critique.assessment)
        })
        .map(|record| record.version)
        .max()
    {
        return Some(Selection {
            index,
            reason: SelectionReason::Converged,
        });
    }

    let mut best: Option<(usize, u64)> = None;
    for (index, version) in history.iter().enumerate() {
        let score = scorer.score(&version.content);
        match best {
            Some((_, best_score)) if score < best_score => {}
            _ => best = Some((index, score)),
        }
    }
    best.map(|(index, score)| Selection {
        index,
        reason: SelectionReason::Scored(score),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Critique, WorkerRole};

    fn version(iteration: u32, content: &str) -> Version {
        Version {
            iteration,
            producer: if iteration == 0 {
                WorkerRole::Generator
            } else {
                WorkerRole::Refiner
            },
            content: content.to_string(),
        }
    }

    fn critique_of(index: usize, assessment: Severity) -> CritiqueRecord {
        CritiqueRecord {
            version: index,
            critique: Critique {
                raw_text: String::new(),
                assessment,
                assessment_recognized: true,
                recommendations: vec!["more".to_string()],
            },
        }
    }

    #[test]
    fn structural_score_weights_markers() {
        let scorer = StructuralScorer::default();
        let text = "# T\n- a\n1. b";
        assert_eq!(scorer.score(text), text.len() as u64 + 100 + 20);
    }

    #[test]
    fn converged_version_beats_higher_score() {
        let history = vec![version(0, "short"), version(1, "# much longer\n- with\n- lists")];
        let critiques = vec![critique_of(0, Severity::Excellent), critique_of(1, Severity::Good)];
        let selection = select_version(
            &history,
            &critiques,
            &Severity::default_terminal_set(),
            &StructuralScorer::default(),
        )
        .expect("selection");
        assert_eq!(selection.index, 0);
        assert_eq!(selection.reason, SelectionReason::Converged);
    }

    #[test]
    fn highest_score_wins_without_convergence() {
        let history = vec![
            version(0, "# a\n- x"),
            version(1, "# a\n- x\n- y"),
            version(2, "plain"),
        ];
        let critiques = vec![critique_of(0, Severity::Good), critique_of(1, Severity::Good)];
        let selection = select_version(
            &history,
            &critiques,
            &Severity::default_terminal_set(),
            &StructuralScorer::default(),
        )
        .expect("selection");
        assert_eq!(selection.index, 1);
    }

    #[test]
    fn ties_go_to_latest() {
        let history = vec![version(0, "same"), version(1, "same")];
        let selection = select_version(
            &history,
            &[],
            &Severity::default_terminal_set(),
            &StructuralScorer::default(),
        )
        .expect("selection");
        assert_eq!(selection.index, 1);
    }

    #[test]
    fn empty_history_selects_nothing() {
        assert_eq!(
            select_version(
                &[],
                &[],
                &Severity::default_terminal_set(),
                &StructuralScorer::default()
            ),
            None
        );
    }
}
