//! Agreement statistics between two annotation sources
//!
//! Compares a human matrix against a machine (LLM) matrix line by line and
//! reports agreement rate, precision, recall and F1, treating the human side
//! as ground truth:
//!
//! |              | machine yes | machine no |
//! |--------------|-------------|------------|
//! | human yes    | both_yes    |            |
//! | human no     |             |            |
//!
//! `precision = both_yes / llm_yes`, `recall = both_yes / human_yes`. Every
//! rate whose denominator is zero is `0.0`.
//!
//! Line numbers are 1-based transcript line numbers; line `n` reads matrix
//! index `n - 1`.

use crate::model::{AnnotationMatrix, AnnotationSet};
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

/// A percentage with one decimal, or "-" where agreement is not scored
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rate {
    Percent(f64),
    NotApplicable,
}

impl Rate {
    /// `numerator / denominator` as a percentage, `0.0` for a zero denominator
    pub fn ratio(numerator: u32, denominator: u32) -> Self {
        if denominator == 0 {
            return Rate::Percent(0.0);
        }
        Rate::percent(f64::from(numerator) / f64::from(denominator))
    }

    /// Fraction in `0..=1` to a rounded percentage
    fn percent(fraction: f64) -> Self {
        Rate::Percent(round_tenths(fraction * 100.0))
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Rate::Percent(value) => Some(*value),
            Rate::NotApplicable => None,
        }
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rate::Percent(value) => write!(f, "{:.1}", value),
            Rate::NotApplicable => write!(f, "-"),
        }
    }
}

impl Serialize for Rate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Agreement figures for one feature or code
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub agreement_rate: Rate,
    pub precision: Rate,
    pub recall: Rate,
    pub f1: Rate,
    pub total_comparisons: u32,
    pub agreements: u32,
    pub human_yes: u32,
    pub llm_yes: u32,
    pub both_yes: u32,
}

impl Stats {
    /// Result for continuous features, which are not scored
    pub fn not_applicable() -> Self {
        Self {
            agreement_rate: Rate::NotApplicable,
            ..Tally::default().into_stats()
        }
    }
}

/// 2×2 contingency counts
#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    total: u32,
    agreements: u32,
    human_yes: u32,
    llm_yes: u32,
    both_yes: u32,
}

impl Tally {
    fn add(&mut self, human: bool, machine: bool) {
        self.total += 1;
        if human == machine {
            self.agreements += 1;
        }
        if human {
            self.human_yes += 1;
        }
        if machine {
            self.llm_yes += 1;
        }
        if human && machine {
            self.both_yes += 1;
        }
    }

    fn into_stats(self) -> Stats {
        let precision = fraction(self.both_yes, self.llm_yes);
        let recall = fraction(self.both_yes, self.human_yes);

        // F1 from the unrounded fractions
        let f1 = if precision + recall > 0.0 {
            Rate::percent(2.0 * precision * recall / (precision + recall))
        } else {
            Rate::Percent(0.0)
        };

        Stats {
            agreement_rate: Rate::ratio(self.agreements, self.total),
            precision: Rate::ratio(self.both_yes, self.llm_yes),
            recall: Rate::ratio(self.both_yes, self.human_yes),
            f1,
            total_comparisons: self.total,
            agreements: self.agreements,
            human_yes: self.human_yes,
            llm_yes: self.llm_yes,
            both_yes: self.both_yes,
        }
    }
}

/// Round to one decimal on the exact binary value of `value`, ties upward.
///
/// `0.2875 * 100.0` is stored as 28.7499999..., so it rounds to 28.7 even
/// though scaling it by ten again would land on 287.5.
fn round_tenths(value: f64) -> f64 {
    if value < 0.0 {
        return -round_tenths(-value);
    }

    // value = mantissa * 2^-shift
    let bits = value.to_bits();
    let biased_exp = ((bits >> 52) & 0x7ff) as i32;
    let fraction_bits = bits & ((1u64 << 52) - 1);
    let (mantissa, exp) = if biased_exp == 0 {
        (fraction_bits, -1074)
    } else {
        (fraction_bits | (1u64 << 52), biased_exp - 1075)
    };

    if !value.is_finite() || exp >= 0 {
        return value;
    }
    let shift = (-exp) as u32;
    if shift >= 124 {
        return 0.0;
    }

    let tens = u128::from(mantissa) * 10;
    let mut tenths = tens >> shift;
    let remainder = tens - (tenths << shift);
    if remainder * 2 >= 1u128 << shift {
        tenths += 1;
    }
    tenths as f64 / 10.0
}

fn fraction(numerator: u32, denominator: u32) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        f64::from(numerator) / f64::from(denominator)
    }
}

/// Matrix index for a 1-based line number
fn line_index(line_number: usize) -> Option<usize> {
    line_number.checked_sub(1)
}

/// Feature-level comparison: a line counts as "yes" when any code is set
pub fn feature_agreement(
    human: &AnnotationMatrix,
    machine: &AnnotationMatrix,
    line_numbers: &[usize],
) -> Stats {
    let mut tally = Tally::default();
    for &line_number in line_numbers {
        let (h, m) = match line_index(line_number) {
            Some(index) => (human.line_has_any(index), machine.line_has_any(index)),
            None => (false, false),
        };
        tally.add(h, m);
    }
    tally.into_stats()
}

/// Code-level comparison of a single code
pub fn code_agreement(
    human: &AnnotationMatrix,
    machine: &AnnotationMatrix,
    code: &str,
    line_numbers: &[usize],
) -> Stats {
    let human_code = resolve_code(human, code);
    let machine_code = resolve_code(machine, code);

    let mut tally = Tally::default();
    for &line_number in line_numbers {
        let (h, m) = match line_index(line_number) {
            Some(index) => (
                human.value(index, human_code),
                machine.value(index, machine_code),
            ),
            None => (false, false),
        };
        tally.add(h, m);
    }
    tally.into_stats()
}

/// Name under which `matrix` stores `code`: exact match first, then a
/// case-insensitive one
pub(crate) fn resolve_code<'a>(matrix: &'a AnnotationMatrix, code: &'a str) -> &'a str {
    if matrix.codes.iter().any(|c| c == code) {
        return code;
    }
    let lowered = code.to_lowercase();
    matrix
        .codes
        .iter()
        .find(|c| c.to_lowercase() == lowered)
        .map_or(code, String::as_str)
}

/// Codes from both sides, case-insensitively deduplicated (the capitalized
/// spelling wins) and sorted
pub fn union_codes(human: &[String], machine: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();

    for code in human.iter().chain(machine) {
        let lowered = code.to_lowercase();
        match merged.iter_mut().find(|c| c.to_lowercase() == lowered) {
            None => merged.push(code.clone()),
            Some(existing) => {
                if starts_upper(code) && starts_lower(existing) {
                    *existing = code.clone();
                }
            }
        }
    }

    merged.sort();
    merged
}

fn starts_upper(code: &str) -> bool {
    code.chars().next().is_some_and(char::is_uppercase)
}

fn starts_lower(code: &str) -> bool {
    code.chars().next().is_some_and(char::is_lowercase)
}

/// Whether a feature gets agreement scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    Binary,
    /// Counts rather than judgements (lexical features); never scored
    Continuous,
}

/// Which categories are scored and which are skipped
#[derive(Debug, Clone)]
pub struct StatsConfig {
    pub continuous_features: Vec<String>,
    /// Left out of set comparisons entirely
    pub excluded_features: Vec<String>,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            continuous_features: vec!["Lexical".to_string()],
            excluded_features: vec!["Talk".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CodeComparison {
    pub code: String,
    pub stats: Stats,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureComparison {
    pub feature: String,
    pub kind: FeatureKind,
    pub stats: Stats,
    /// Empty for continuous features
    pub codes: Vec<CodeComparison>,
}

/// Set-level comparison driven by a [`StatsConfig`]
#[derive(Debug, Clone, Default)]
pub struct AgreementEngine {
    config: StatsConfig,
}

impl AgreementEngine {
    pub fn new(config: StatsConfig) -> Self {
        Self { config }
    }

    pub fn kind_of(&self, feature: &str) -> FeatureKind {
        if self.config.continuous_features.iter().any(|f| f == feature) {
            FeatureKind::Continuous
        } else {
            FeatureKind::Binary
        }
    }

    /// Feature-level stats, "-" for continuous features
    pub fn feature_stats(
        &self,
        feature: &str,
        human: &AnnotationMatrix,
        machine: &AnnotationMatrix,
        line_numbers: &[usize],
    ) -> Stats {
        match self.kind_of(feature) {
            FeatureKind::Continuous => Stats::not_applicable(),
            FeatureKind::Binary => feature_agreement(human, machine, line_numbers),
        }
    }

    /// One [`CodeComparison`] per code in the union of both sides
    pub fn code_stats(
        &self,
        human: &AnnotationMatrix,
        machine: &AnnotationMatrix,
        line_numbers: &[usize],
    ) -> Vec<CodeComparison> {
        union_codes(&human.codes, &machine.codes)
            .into_iter()
            .map(|code| {
                let stats = code_agreement(human, machine, &code, line_numbers);
                CodeComparison { code, stats }
            })
            .collect()
    }

    /// Cohen's kappa for one code; `None` when undefined
    pub fn code_kappa(
        &self,
        human: &AnnotationMatrix,
        machine: &AnnotationMatrix,
        code: &str,
        line_numbers: &[usize],
    ) -> Option<f64> {
        crate::reliability::code_kappa(human, machine, code, line_numbers)
    }

    /// Compare every category present on either side, sorted by name.
    ///
    /// A category missing on one side compares as all-false there.
    pub fn compare_sets(
        &self,
        human: &AnnotationSet,
        machine: &AnnotationSet,
        line_numbers: &[usize],
    ) -> Vec<FeatureComparison> {
        let empty = AnnotationMatrix::default();
        let features: BTreeSet<&String> = human
            .keys()
            .chain(machine.keys())
            .filter(|f| !self.config.excluded_features.iter().any(|e| e == *f))
            .collect();

        features
            .into_iter()
            .map(|feature| {
                let h = human.get(feature).unwrap_or(&empty);
                let m = machine.get(feature).unwrap_or(&empty);
                let kind = self.kind_of(feature);
                let codes = match kind {
                    FeatureKind::Binary => self.code_stats(h, m, line_numbers),
                    FeatureKind::Continuous => Vec::new(),
                };

                FeatureComparison {
                    feature: feature.clone(),
                    kind,
                    stats: self.feature_stats(feature, h, m, line_numbers),
                    codes,
                }
            })
            .collect()
    }
}
