use std::collections::BTreeMap;

use crate::models::{CategoryTally, Outcome, QuizReport, QuizState};

/// `round(100 * correct / max(1, total), 2)`
pub fn percentage(correct: u32, total: u32) -> f64 {
    let raw = 100.0 * correct as f64 / total.max(1) as f64;
    (raw * 100.0).round() / 100.0
}

pub fn category_percentages(tally: &CategoryTally) -> BTreeMap<String, f64> {
    tally
        .iter()
        .map(|(label, counts)| (label.clone(), percentage(counts.correct, counts.total)))
        .collect()
}

/// Final report for an attempt that reached `outcome`.
pub fn aggregate(state: &QuizState, outcome: Outcome) -> QuizReport {
    QuizReport {
        correct_count: state.correct_count,
        total_count: state.total_count,
        overall_percentage: percentage(state.correct_count, state.total_count),
        category_scores: state.category_tally.clone(),
        percentages: category_percentages(&state.category_tally),
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CategoryCounts;

    #[test]
    fn test_percentage_rounding() {
        assert_eq!(percentage(2, 2), 100.0);
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(2, 3), 66.67);
        assert_eq!(percentage(0, 4), 0.0);
    }

    #[test]
    fn test_zero_total_does_not_divide_by_zero() {
        assert_eq!(percentage(0, 0), 0.0);
    }

    #[test]
    fn test_aggregate_report() {
        let mut state = QuizState::new(vec!["a".into(), "b".into(), "c".into()], 0, 60);
        state.cursor = 3;
        state.total_count = 3;
        state.correct_count = 2;
        state
            .category_tally
            .insert("1".into(), CategoryCounts { correct: 2, total: 2 });
        state
            .category_tally
            .insert("4".into(), CategoryCounts { correct: 0, total: 1 });
        state
            .category_tally
            .insert("6".into(), CategoryCounts { correct: 0, total: 0 });

        let report = aggregate(&state, Outcome::Completed);
        assert_eq!(report.correct_count, 2);
        assert_eq!(report.total_count, 3);
        assert_eq!(report.overall_percentage, 66.67);
        assert_eq!(report.percentages["1"], 100.0);
        assert_eq!(report.percentages["4"], 0.0);
        assert_eq!(report.percentages["6"], 0.0);
        assert_eq!(report.outcome, Outcome::Completed);
    }

    #[test]
    fn test_timed_out_report_with_nothing_answered() {
        let state = QuizState::new(vec!["a".into()], 0, 60);
        let report = aggregate(&state, Outcome::TimedOut);
        assert_eq!(report.total_count, 0);
        assert_eq!(report.overall_percentage, 0.0);
        assert!(report.percentages.is_empty());
        assert_eq!(report.outcome, Outcome::TimedOut);
    }
}
