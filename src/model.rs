//! Annotation data model
//!
//! An [`AnnotationMatrix`] is the dense line × code grid of boolean
//! judgements for one feature category ("Conceptual", "Discursive", ...).
//! A rater's whole workbook is an [`AnnotationSet`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Category name -> matrix
pub type AnnotationSet = BTreeMap<String, AnnotationMatrix>;

/// Codebook entry for one code. Carried through storage untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureDetails {
    #[serde(rename = "Definition", default)]
    pub definition: String,
    #[serde(default)]
    pub example1: String,
    #[serde(default)]
    pub example2: String,
    #[serde(default)]
    pub nonexample1: String,
    #[serde(default)]
    pub nonexample2: String,
}

/// Dense annotation grid.
///
/// Well-formed matrices hold an entry for every line in `0..num_lines` and,
/// on every line, a value for every code in `codes`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationMatrix {
    /// Unique codes in display order
    pub codes: Vec<String>,

    #[serde(default)]
    pub definitions: BTreeMap<String, FeatureDetails>,

    /// Zero-based line index -> code -> value
    #[serde(default)]
    pub annotations: BTreeMap<usize, BTreeMap<String, bool>>,
}

impl AnnotationMatrix {
    /// All-false matrix of `num_lines` lines
    pub fn new(
        codes: Vec<String>,
        definitions: BTreeMap<String, FeatureDetails>,
        num_lines: usize,
    ) -> Self {
        let blank: BTreeMap<String, bool> =
            codes.iter().map(|code| (code.clone(), false)).collect();
        let annotations = (0..num_lines).map(|line| (line, blank.clone())).collect();

        Self {
            codes,
            definitions,
            annotations,
        }
    }

    /// One past the highest line index present
    pub fn num_lines(&self) -> usize {
        self.annotations
            .keys()
            .next_back()
            .map_or(0, |&last| last + 1)
    }

    /// Value of `code` on `line`; absent entries read as false
    pub fn value(&self, line: usize, code: &str) -> bool {
        self.annotations
            .get(&line)
            .and_then(|codes| codes.get(code))
            .copied()
            .unwrap_or(false)
    }

    /// Set one cell. Returns false, leaving the matrix unchanged, when the
    /// line is out of range or the code is not in the codebook.
    pub fn set(&mut self, line: usize, code: &str, value: bool) -> bool {
        if !self.codes.iter().any(|c| c == code) {
            return false;
        }
        match self.annotations.get_mut(&line) {
            Some(codes) => {
                codes.insert(code.to_string(), value);
                true
            }
            None => false,
        }
    }

    /// True when any code on `line` is set
    pub fn line_has_any(&self, line: usize) -> bool {
        self.annotations
            .get(&line)
            .is_some_and(|codes| codes.values().any(|&v| v))
    }

    /// Codebook entry for `code`
    pub fn definition(&self, code: &str) -> Option<&FeatureDetails> {
        self.definitions.get(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes() -> Vec<String> {
        vec!["C.1".to_string(), "C.2".to_string()]
    }

    #[test]
    fn test_new_is_dense_and_false() {
        let matrix = AnnotationMatrix::new(codes(), BTreeMap::new(), 3);
        assert_eq!(matrix.num_lines(), 3);
        assert_eq!(matrix.annotations[&2].len(), 2);
        assert!(!matrix.line_has_any(0));
    }

    #[test]
    fn test_set_and_read() {
        let mut matrix = AnnotationMatrix::new(codes(), BTreeMap::new(), 3);
        assert!(matrix.set(1, "C.2", true));
        assert!(matrix.value(1, "C.2"));
        assert!(matrix.line_has_any(1));

        assert!(!matrix.set(3, "C.1", true));
        assert!(!matrix.set(0, "C.9", true));
        assert!(!matrix.value(0, "C.9"));
    }

    #[test]
    fn test_definition_field_names() {
        let json = r#"{"Definition":"Names a concept","example1":"x"}"#;
        let details: FeatureDetails = serde_json::from_str(json).unwrap();
        assert_eq!(details.definition, "Names a concept");
        assert_eq!(details.example1, "x");
        assert_eq!(details.nonexample2, "");
    }
}
