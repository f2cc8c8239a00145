//! Chance-corrected inter-rater reliability for binary judgements
//!
//! Values are `Option<bool>`: `None` marks a line the rater did not judge
//! and is left out of the pairing.

use crate::model::AnnotationMatrix;
use crate::stats::resolve_code;

/// Read a spreadsheet cell as a judgement
pub fn parse_judgement(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" | "" => Some(false),
        _ => None,
    }
}

/// Cohen's kappa for two raters, rounded to 3 decimals.
///
/// `None` when no line was judged by both, or when chance agreement is
/// already total (one category used throughout).
pub fn cohens_kappa(a: &[Option<bool>], b: &[Option<bool>]) -> Option<f64> {
    let pairs: Vec<(bool, bool)> = a
        .iter()
        .zip(b)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .collect();
    if pairs.is_empty() {
        return None;
    }

    let n = pairs.len() as f64;
    let agreements = pairs.iter().filter(|(x, y)| x == y).count() as f64;
    let a_true = pairs.iter().filter(|(x, _)| *x).count() as f64;
    let b_true = pairs.iter().filter(|(_, y)| *y).count() as f64;
    let a_false = n - a_true;
    let b_false = n - b_true;

    let observed = agreements / n;
    let expected = (a_true * b_true + a_false * b_false) / (n * n);
    if expected == 1.0 {
        return None;
    }

    let kappa = (observed - expected) / (1.0 - expected);
    Some(round_to(kappa, 3))
}

/// Krippendorff's alpha (nominal, binary) over any number of raters,
/// rounded to 4 decimals.
///
/// Each inner slice is one rater's judgements by line. Lines judged by fewer
/// than two raters are skipped.
pub fn krippendorffs_alpha(raters: &[Vec<Option<bool>>]) -> Option<f64> {
    if raters.len() < 2 {
        return None;
    }

    let num_lines = raters.iter().map(Vec::len).max().unwrap_or(0);
    let mut disagreements = 0u64;
    let mut pair_count = 0u64;
    let mut true_count = 0u64;
    let mut value_count = 0u64;

    for line in 0..num_lines {
        let values: Vec<bool> = raters
            .iter()
            .filter_map(|rater| rater.get(line).copied().flatten())
            .collect();
        if values.len() < 2 {
            continue;
        }

        for (i, first) in values.iter().enumerate() {
            for second in &values[i + 1..] {
                if first != second {
                    disagreements += 1;
                }
                pair_count += 1;
            }
        }

        value_count += values.len() as u64;
        true_count += values.iter().filter(|&&v| v).count() as u64;
    }

    if pair_count == 0 || value_count < 2 {
        return None;
    }

    let false_count = value_count - true_count;
    let expected = (2 * true_count * false_count) as f64
        / (value_count * (value_count - 1)) as f64;
    if expected == 0.0 {
        return None;
    }

    let observed = disagreements as f64 / pair_count as f64;
    Some(round_to(1.0 - observed / expected, 4))
}

/// Cohen's kappa between two matrices for one code over 1-based line numbers
pub fn code_kappa(
    human: &AnnotationMatrix,
    machine: &AnnotationMatrix,
    code: &str,
    line_numbers: &[usize],
) -> Option<f64> {
    let column = |matrix: &AnnotationMatrix| -> Vec<Option<bool>> {
        let code = resolve_code(matrix, code);
        line_numbers
            .iter()
            .map(|&n| Some(n.checked_sub(1).is_some_and(|i| matrix.value(i, code))))
            .collect()
    };
    cohens_kappa(&column(human), &column(machine))
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn judged(values: &[u8]) -> Vec<Option<bool>> {
        values
            .iter()
            .map(|v| match v {
                0 => Some(false),
                1 => Some(true),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_parse_judgement() {
        assert_eq!(parse_judgement(" Yes "), Some(true));
        assert_eq!(parse_judgement("1"), Some(true));
        assert_eq!(parse_judgement("FALSE"), Some(false));
        assert_eq!(parse_judgement(""), Some(false));
        assert_eq!(parse_judgement("maybe"), None);
    }

    #[test]
    fn test_kappa_perfect_and_chance() {
        let a = judged(&[1, 0, 1, 0]);
        assert_eq!(cohens_kappa(&a, &a), Some(1.0));

        // observed 0.5, expected 0.5
        let b = judged(&[1, 1, 0, 0]);
        assert_eq!(cohens_kappa(&a, &b), Some(0.0));
    }

    #[test]
    fn test_kappa_worked_example() {
        // observed 3/5, expected (3*3 + 2*2) / 25 = 0.52 -> (0.6-0.52)/0.48
        let a = judged(&[1, 1, 1, 0, 0]);
        let b = judged(&[0, 1, 1, 1, 0]);
        assert_eq!(cohens_kappa(&a, &b), Some(0.167));
    }

    #[test]
    fn test_kappa_undefined_cases() {
        assert_eq!(cohens_kappa(&judged(&[2, 2]), &judged(&[1, 0])), None);

        let all_true = judged(&[1, 1, 1]);
        assert_eq!(cohens_kappa(&all_true, &all_true), None);
    }

    #[test]
    fn test_alpha_perfect_agreement() {
        let rater = judged(&[1, 0, 1, 0]);
        assert_eq!(krippendorffs_alpha(&[rater.clone(), rater.clone(), rater]), Some(1.0));
    }

    #[test]
    fn test_alpha_skips_sparse_lines() {
        // Line 2 has a single judgement and is ignored
        let a = judged(&[1, 0, 1]);
        let b = judged(&[1, 0, 2]);
        assert_eq!(krippendorffs_alpha(&[a, b]), Some(1.0));
    }

    #[test]
    fn test_alpha_undefined_cases() {
        assert_eq!(krippendorffs_alpha(&[judged(&[1, 0])]), None);
        assert_eq!(krippendorffs_alpha(&[judged(&[1, 1]), judged(&[1, 1])]), None);
        assert_eq!(krippendorffs_alpha(&[judged(&[2]), judged(&[1])]), None);
    }

    #[test]
    fn test_alpha_disagreement() {
        // Pairs: (1,0) (0,1) -> observed 1.0; values 2 true 2 false ->
        // expected 2*2*2/(4*3) = 0.6667; alpha = 1 - 1.5 = -0.5
        let a = judged(&[1, 0]);
        let b = judged(&[0, 1]);
        assert_eq!(krippendorffs_alpha(&[a, b]), Some(-0.5));
    }

    #[test]
    fn test_code_kappa_from_matrices() {
        let mut human = AnnotationMatrix::new(vec!["C.1".into()], BTreeMap::new(), 5);
        let mut machine = human.clone();
        for line in [0, 1, 2] {
            human.set(line, "C.1", true);
        }
        for line in [1, 2, 3] {
            machine.set(line, "C.1", true);
        }
        assert_eq!(code_kappa(&human, &machine, "C.1", &[1, 2, 3, 4, 5]), Some(0.167));
    }
}
