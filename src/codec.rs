//! Sparse encoding of annotation matrices
//!
//! The sparse form keeps only `true` cells and drops lines with none:
//!
//! ```json
//! { "numLines": 12,
//!   "codes": ["C.1", "C.2"],
//!   "definitions": { "C.1": { "Definition": "..." } },
//!   "annotations": { "3": { "C.1": true }, "7": { "C.2": true } } }
//! ```
//!
//! Absent lines and codes decode as false, so the sparse form is only
//! meaningful next to the line count it was encoded against. Writers always
//! record `numLines`; records without it (older files) need the caller to
//! supply one.

use crate::error::StorageError;
use crate::model::{AnnotationMatrix, AnnotationSet, FeatureDetails};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Compacted matrix: only true cells, only lines with at least one
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseMatrix {
    pub codes: Vec<String>,

    #[serde(default)]
    pub definitions: BTreeMap<String, FeatureDetails>,

    #[serde(default)]
    pub annotations: BTreeMap<usize, BTreeMap<String, bool>>,
}

/// Keep only the true cells of `matrix`
pub fn encode(matrix: &AnnotationMatrix) -> SparseMatrix {
    let annotations = matrix
        .annotations
        .iter()
        .filter_map(|(&line, codes)| {
            let set: BTreeMap<String, bool> = codes
                .iter()
                .filter(|&(_, &value)| value)
                .map(|(code, _)| (code.clone(), true))
                .collect();
            (!set.is_empty()).then_some((line, set))
        })
        .collect();

    SparseMatrix {
        codes: matrix.codes.clone(),
        definitions: matrix.definitions.clone(),
        annotations,
    }
}

/// Expand `sparse` to a dense grid of `num_lines` lines.
///
/// Never fails. Sparse lines at or beyond `num_lines` are dropped with a
/// warning, and codes outside `codes` are ignored.
pub fn decode(sparse: &SparseMatrix, num_lines: usize) -> AnnotationMatrix {
    if let Some((&last, _)) = sparse.annotations.iter().next_back() {
        if last >= num_lines {
            let dropped = sparse.annotations.range(num_lines..).count();
            warn!(
                num_lines,
                highest_line = last,
                dropped,
                "Sparse matrix has lines beyond the decode range; truncating"
            );
        }
    }

    let annotations = (0..num_lines)
        .map(|line| {
            let set = sparse.annotations.get(&line);
            let values = sparse
                .codes
                .iter()
                .map(|code| {
                    let value = set.and_then(|s| s.get(code)).copied().unwrap_or(false);
                    (code.clone(), value)
                })
                .collect();
            (line, values)
        })
        .collect();

    AnnotationMatrix {
        codes: sparse.codes.clone(),
        definitions: sparse.definitions.clone(),
        annotations,
    }
}

/// On-disk record: the sparse matrix plus the line count it needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMatrix {
    #[serde(rename = "numLines", default, skip_serializing_if = "Option::is_none")]
    pub num_lines: Option<usize>,

    pub codes: Vec<String>,

    #[serde(default)]
    pub definitions: BTreeMap<String, FeatureDetails>,

    #[serde(default)]
    pub annotations: BTreeMap<usize, BTreeMap<String, bool>>,
}

impl StoredMatrix {
    pub fn from_matrix(matrix: &AnnotationMatrix) -> Self {
        let sparse = encode(matrix);
        Self {
            num_lines: Some(matrix.num_lines()),
            codes: sparse.codes,
            definitions: sparse.definitions,
            annotations: sparse.annotations,
        }
    }

    /// Decode using the stored line count, or `fallback_num_lines` for
    /// records written without one.
    pub fn into_matrix(
        self,
        fallback_num_lines: Option<usize>,
    ) -> Result<AnnotationMatrix, StorageError> {
        let num_lines = self.num_lines.or(fallback_num_lines).ok_or_else(|| {
            StorageError::UnsupportedSchema(
                "sparse matrix has no numLines and none was supplied".to_string(),
            )
        })?;

        let sparse = SparseMatrix {
            codes: self.codes,
            definitions: self.definitions,
            annotations: self.annotations,
        };
        Ok(decode(&sparse, num_lines))
    }
}

/// First line of the line-oriented encoding
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct MatrixHeader {
    #[serde(rename = "numLines")]
    num_lines: usize,
    codes: Vec<String>,
    #[serde(default)]
    definitions: BTreeMap<String, FeatureDetails>,
}

/// Line-oriented encoding for the chunk coordinator.
///
/// Returns `(header, payload)`: the header line holds `numLines`, `codes`
/// and `definitions`; every following line is one sparse entry such as
/// `{"3":{"C.1":true}}`. Any prefix of body lines under the header is a
/// valid document, so chunks split on lines stay readable.
pub fn encode_lines(matrix: &AnnotationMatrix) -> Result<(String, Vec<u8>), StorageError> {
    let sparse = encode(matrix);
    let header = serde_json::to_string(&MatrixHeader {
        num_lines: matrix.num_lines(),
        codes: sparse.codes,
        definitions: sparse.definitions,
    })?;

    let mut payload = header.clone().into_bytes();
    for (line, codes) in &sparse.annotations {
        let mut entry = BTreeMap::new();
        entry.insert(*line, codes);
        payload.push(b'\n');
        serde_json::to_writer(&mut payload, &entry)?;
    }

    Ok((header, payload))
}

/// Inverse of [`encode_lines`]
pub fn decode_lines(payload: &[u8]) -> Result<AnnotationMatrix, StorageError> {
    let mut lines = payload
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line));

    let header: MatrixHeader = match lines.next() {
        Some(line) if !line.is_empty() => serde_json::from_slice(line)
            .map_err(|e| StorageError::UnsupportedSchema(format!("matrix header: {}", e)))?,
        _ => {
            return Err(StorageError::UnsupportedSchema(
                "matrix payload has no header line".to_string(),
            ))
        }
    };

    let mut annotations = BTreeMap::new();
    for line in lines.filter(|line| !line.is_empty()) {
        let entry: BTreeMap<usize, BTreeMap<String, bool>> = serde_json::from_slice(line)?;
        annotations.extend(entry);
    }

    let sparse = SparseMatrix {
        codes: header.codes,
        definitions: header.definitions,
        annotations,
    };
    Ok(decode(&sparse, header.num_lines))
}

/// Decode a stored matrix in either form: line-oriented, or a single
/// [`StoredMatrix`] document. `fallback_num_lines` only applies to the latter.
pub fn decode_record(
    payload: &[u8],
    fallback_num_lines: Option<usize>,
) -> Result<AnnotationMatrix, StorageError> {
    match decode_lines(payload) {
        Err(StorageError::UnsupportedSchema(reason)) => {
            let stored: StoredMatrix = serde_json::from_slice(payload).map_err(|e| {
                StorageError::UnsupportedSchema(format!("{}; as record: {}", reason, e))
            })?;
            stored.into_matrix(fallback_num_lines)
        }
        other => other,
    }
}

/// A whole workbook as one JSON object of [`StoredMatrix`] values
pub fn encode_set(set: &AnnotationSet) -> Result<Vec<u8>, StorageError> {
    let stored: BTreeMap<&String, StoredMatrix> = set
        .iter()
        .map(|(category, matrix)| (category, StoredMatrix::from_matrix(matrix)))
        .collect();
    Ok(serde_json::to_vec(&stored)?)
}

/// Inverse of [`encode_set`]
pub fn decode_set(
    json: &[u8],
    fallback_num_lines: Option<usize>,
) -> Result<AnnotationSet, StorageError> {
    let stored: BTreeMap<String, StoredMatrix> = serde_json::from_slice(json)?;
    stored
        .into_iter()
        .map(|(category, record)| {
            let matrix = record.into_matrix(fallback_num_lines)?;
            Ok::<_, StorageError>((category, matrix))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(num_lines: usize) -> AnnotationMatrix {
        let mut definitions = BTreeMap::new();
        definitions.insert(
            "C.1".to_string(),
            FeatureDetails {
                definition: "Names a concept".to_string(),
                ..Default::default()
            },
        );
        let mut matrix = AnnotationMatrix::new(
            vec!["C.1".to_string(), "C.2".to_string(), "C.3".to_string()],
            definitions,
            num_lines,
        );
        for line in (0..num_lines).step_by(3) {
            matrix.set(line, "C.1", true);
        }
        for line in (0..num_lines).step_by(7) {
            matrix.set(line, "C.3", true);
        }
        matrix
    }

    #[test]
    fn test_encode_drops_false() {
        let mut matrix = AnnotationMatrix::new(vec!["C.1".into(), "C.2".into()], BTreeMap::new(), 10);
        matrix.set(3, "C.1", true);
        matrix.set(7, "C.2", true);

        let sparse = encode(&matrix);
        assert_eq!(sparse.annotations.len(), 2);
        assert_eq!(sparse.annotations[&3].len(), 1);
        assert_eq!(sparse.annotations[&7]["C.2"], true);
        assert_eq!(sparse.codes, matrix.codes);
    }

    #[test]
    fn test_round_trip() {
        for num_lines in [0, 1, 5, 22, 100] {
            let matrix = sample(num_lines);
            assert_eq!(decode(&encode(&matrix), num_lines), matrix, "lines {}", num_lines);
        }
    }

    #[test]
    fn test_decode_pads_and_truncates() {
        let matrix = sample(10);
        let sparse = encode(&matrix);

        let padded = decode(&sparse, 15);
        assert_eq!(padded.num_lines(), 15);
        assert!(!padded.line_has_any(14));
        assert!(padded.value(9, "C.1"));

        let truncated = decode(&sparse, 4);
        assert_eq!(truncated.num_lines(), 4);
        assert!(truncated.value(3, "C.1"));
    }

    #[test]
    fn test_json_shape() {
        let mut matrix = AnnotationMatrix::new(vec!["C.1".into(), "C.2".into()], BTreeMap::new(), 8);
        matrix.set(3, "C.1", true);
        matrix.set(7, "C.2", true);

        let json = serde_json::to_value(StoredMatrix::from_matrix(&matrix)).unwrap();
        assert_eq!(json["numLines"], 8);
        assert_eq!(json["annotations"]["3"]["C.1"], true);
        assert_eq!(json["annotations"]["7"]["C.2"], true);
        assert!(json["annotations"].get("0").is_none());
    }

    #[test]
    fn test_legacy_record_needs_line_count() {
        let json = r#"{"codes":["C.1"],"definitions":{},"annotations":{"2":{"C.1":true}}}"#;
        let stored: StoredMatrix = serde_json::from_str(json).unwrap();
        assert_eq!(stored.num_lines, None);

        assert!(matches!(
            stored.clone().into_matrix(None),
            Err(StorageError::UnsupportedSchema(_))
        ));

        let matrix = stored.into_matrix(Some(4)).unwrap();
        assert_eq!(matrix.num_lines(), 4);
        assert!(matrix.value(2, "C.1"));
    }

    #[test]
    fn test_unknown_shapes_are_rejected() {
        let array_annotations = r#"{"codes":["C.1"],"annotations":[{"C.1":true}]}"#;
        assert!(serde_json::from_str::<StoredMatrix>(array_annotations).is_err());

        let string_values = r#"{"codes":["C.1"],"annotations":{"0":{"C.1":"yes"}}}"#;
        assert!(serde_json::from_str::<StoredMatrix>(string_values).is_err());
    }

    #[test]
    fn test_line_encoding_round_trip() {
        let matrix = sample(40);
        let (header, payload) = encode_lines(&matrix).unwrap();

        assert!(payload.starts_with(header.as_bytes()));
        assert!(!header.contains('\n'));
        assert_eq!(decode_lines(&payload).unwrap(), matrix);
    }

    #[test]
    fn test_line_encoding_of_empty_matrix() {
        let matrix = AnnotationMatrix::new(vec!["C.1".into()], BTreeMap::new(), 6);
        let (header, payload) = encode_lines(&matrix).unwrap();
        assert_eq!(payload, header.into_bytes());
        assert_eq!(decode_lines(&payload).unwrap(), matrix);
    }

    #[test]
    fn test_line_decoding_rejects_missing_header() {
        assert!(matches!(
            decode_lines(b""),
            Err(StorageError::UnsupportedSchema(_))
        ));
        assert!(matches!(
            decode_lines(b"[1,2,3]"),
            Err(StorageError::UnsupportedSchema(_))
        ));
    }

    #[test]
    fn test_decode_record_accepts_both_forms() {
        let matrix = sample(12);
        let (_, lines) = encode_lines(&matrix).unwrap();
        assert_eq!(decode_record(&lines, None).unwrap(), matrix);

        let whole = serde_json::to_vec(&StoredMatrix::from_matrix(&matrix)).unwrap();
        assert_eq!(decode_record(&whole, None).unwrap(), matrix);

        let legacy = br#"{"codes":["C.1"],"annotations":{"1":{"C.1":true}}}"#;
        assert!(matches!(
            decode_record(legacy, None),
            Err(StorageError::UnsupportedSchema(_))
        ));
        assert!(decode_record(legacy, Some(3)).unwrap().value(1, "C.1"));
    }

    #[test]
    fn test_set_document() {
        let mut set = AnnotationSet::new();
        set.insert("Conceptual".to_string(), sample(9));
        set.insert("Discursive".to_string(), AnnotationMatrix::new(vec!["D.1".into()], BTreeMap::new(), 9));

        let json = encode_set(&set).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["Conceptual"]["numLines"], 9);
        assert_eq!(value["Discursive"]["annotations"], serde_json::json!({}));

        assert_eq!(decode_set(&json, None).unwrap(), set);
    }
}
