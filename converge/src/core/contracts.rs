//! Role contracts checked before a worker result counts as completed.
//!
//! Each check returns a list of human-readable violations; an empty list means
//! the output satisfies the contract.

use super::types::{ArtifactShape, Critique};

const INTRO_MARKERS: &[&str] = &["introduction", "intro", "overview", "opening"];
const CONCLUSION_MARKERS: &[&str] = &["conclusion", "concluding", "closing"];

/// Allowed section-count range for outline-shaped artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutlineRules {
    pub min_sections: usize,
    pub max_sections: usize,
}

impl Default for OutlineRules {
    fn default() -> Self {
        Self {
            min_sections: 3,
            max_sections: 8,
        }
    }
}

/// Section titles of an outline: every `## ` heading line.
pub fn outline_sections(body: &str) -> Vec<&str> {
    body.lines()
        .filter_map(|line| line.trim_start().strip_prefix("## "))
        .map(str::trim)
        .collect()
}

fn has_marker(sections: &[&str], markers: &[&str]) -> bool {
    sections.iter().any(|title| {
        let lowered = title.to_lowercase();
        markers.iter().any(|marker| lowered.contains(marker))
    })
}

/// Generator contract: non-empty body; outlines need an introduction-like and
/// a conclusion-like section and a section count within `rules`.
pub fn check_generated(body: &str, shape: ArtifactShape, rules: &OutlineRules) -> Vec<String> {
    let mut errors = Vec::new();
    if body.trim().is_empty() {
        errors.push("draft body is empty".to_string());
        return errors;
    }
    if shape == ArtifactShape::Prose {
        return errors;
    }

    let sections = outline_sections(body);
    if !has_marker(&sections, INTRO_MARKERS) {
        errors.push("outline has no introduction section".to_string());
    }
    if !has_marker(&sections, CONCLUSION_MARKERS) {
        errors.push("outline has no conclusion section".to_string());
    }
    if sections.len() < rules.min_sections || sections.len() > rules.max_sections {
        errors.push(format!(
            "outline has {} sections, expected {}..={}",
            sections.len(),
            rules.min_sections,
            rules.max_sections
        ));
    }
    errors
}

/// Critic contract: at least one recommendation.
///
/// The assessment itself always resolves (fail-safe), so it is not checked here.
pub fn check_critique(critique: &Critique) -> Vec<String> {
    if critique
        .recommendations
        .iter()
        .all(|item| item.trim().is_empty())
    {
        return vec!["critique has no recommendations".to_string()];
    }
    Vec::new()
}

/// Refiner contract: non-empty and materially different from `previous`.
pub fn check_refined(previous: &str, refined: &str) -> Vec<String> {
    if refined.trim().is_empty() {
        return vec!["refined draft is empty".to_string()];
    }
    if !differs_materially(previous, refined) {
        return vec!["refined draft only differs in whitespace".to_string()];
    }
    Vec::new()
}

/// True when the texts differ after collapsing all whitespace.
pub fn differs_materially(a: &str, b: &str) -> bool {
    !a.split_whitespace().eq(b.split_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::assessment::Severity;
    use crate::test_support::outline;

    #[test]
    fn valid_outline_passes() {
        let body = outline(&["Introduction", "Rawls", "Nozick", "Conclusion"]);
        let violations = check_generated(&body, ArtifactShape::Outline, &OutlineRules::default());
        assert!(violations.is_empty(), "{violations:?}");
    }

    #[test]
    fn single_section_outline_is_rejected() {
        let body = outline(&["Introduction and Conclusion"]);
        let errors = check_generated(&body, ArtifactShape::Outline, &OutlineRules::default());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("1 sections"));
    }

    #[test]
    fn outline_without_conclusion_is_rejected() {
        let body = outline(&["Introduction", "One", "Two", "Three"]);
        let errors = check_generated(&body, ArtifactShape::Outline, &OutlineRules::default());
        assert_eq!(errors, vec!["outline has no conclusion section".to_string()]);
    }

    #[test]
    fn too_many_sections_is_rejected() {
        let mut titles = vec!["Introduction"];
        titles.extend(["A", "B", "C", "D", "E", "F", "G"]);
        titles.push("Conclusion");
        let body = outline(&titles);
        let errors = check_generated(&body, ArtifactShape::Outline, &OutlineRules::default());
        assert!(errors.iter().any(|err| err.contains("9 sections")));
    }

    #[test]
    fn prose_only_needs_a_body() {
        let rules = OutlineRules::default();
        assert!(check_generated("A paragraph.", ArtifactShape::Prose, &rules).is_empty());
        assert_eq!(check_generated("  \n", ArtifactShape::Prose, &rules).len(), 1);
    }

    #[test]
    fn critique_without_recommendations_is_rejected() {
        let critique = Critique {
            raw_text: "GOOD".to_string(),
            assessment: Severity::Good,
            assessment_recognized: true,
            recommendations: Vec::new(),
        };
        assert_eq!(check_critique(&critique).len(), 1);
    }

    #[test]
    fn whitespace_only_refinement_is_rejected() {
        assert!(!check_refined("a  b\nc", "a b c\n").is_empty());
        assert!(!check_refined("a b", "   ").is_empty());
        assert!(check_refined("a b", "a b c").is_empty());
    }
}
