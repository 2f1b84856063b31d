//! Submission status annotations and the rules for merging new ones in.
//!
//! The platform stores annotations in three typed buckets (string, long and
//! double), each entry carrying its own privacy flag. Here they are held as a
//! single map keyed by annotation name, so a key can only ever live in one
//! bucket and a type change simply replaces the entry.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// The value of a single annotation.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationValue {
    String(String),
    Long(i64),
    Double(f64),
}

impl AnnotationValue {
    /// Convert a JSON value into an annotation value. Nulls have no annotation form.
    pub fn from_json(value: &Value) -> Option<AnnotationValue> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(AnnotationValue::String(s.clone())),
            Value::Bool(b) => Some(AnnotationValue::String(b.to_string())),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(AnnotationValue::Long(i)),
                None => n.as_f64().map(AnnotationValue::Double),
            },
            other => Some(AnnotationValue::String(other.to_string())),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AnnotationValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for AnnotationValue {
    fn from(value: &str) -> Self {
        AnnotationValue::String(value.to_string())
    }
}

impl From<String> for AnnotationValue {
    fn from(value: String) -> Self {
        AnnotationValue::String(value)
    }
}

impl From<i64> for AnnotationValue {
    fn from(value: i64) -> Self {
        AnnotationValue::Long(value)
    }
}

impl From<f64> for AnnotationValue {
    fn from(value: f64) -> Self {
        AnnotationValue::Double(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub value: AnnotationValue,
    pub is_private: bool,
}

impl Annotation {
    pub fn new(value: impl Into<AnnotationValue>, is_private: bool) -> Self {
        Annotation {
            value: value.into(),
            is_private,
        }
    }
}

/// The annotation set of a submission status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "AnnotationsWire", into = "AnnotationsWire")]
pub struct Annotations {
    pub object_id: Option<String>,
    pub scope_id: Option<String>,
    pub entries: BTreeMap<String, Annotation>,
}

impl Annotations {
    pub fn get(&self, key: &str) -> Option<&Annotation> {
        self.entries.get(key)
    }

    /// The value of a string annotation, if present.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(|a| a.value.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum AnnotationError {
    #[error(
        "You are trying to change the ACL of these annotation key(s): {keys}. \
         Either change the annotation key or specify force to change the annotation ACL"
    )]
    PrivacyConflict { keys: String },
}

/// Tag every non-null value in a JSON object with the same privacy flag.
pub fn to_submission_status_annotations(
    values: &Map<String, Value>,
    is_private: bool,
) -> BTreeMap<String, Annotation> {
    values
        .iter()
        .filter_map(|(key, value)| {
            AnnotationValue::from_json(value).map(|value| (key.clone(), Annotation { value, is_private }))
        })
        .collect()
}

/// Keys present in both sets whose privacy flag would change.
fn privacy_conflicts<'a>(
    existing: &BTreeMap<String, Annotation>,
    add: &'a BTreeMap<String, Annotation>,
) -> Vec<&'a str> {
    add.iter()
        .filter(|(key, new)| {
            existing
                .get(*key)
                .is_some_and(|old| old.is_private != new.is_private)
        })
        .map(|(key, _)| key.as_str())
        .collect()
}

/// Merge `add` into `existing`.
///
/// New keys are inserted as given and duplicate keys take the new value.
/// A duplicate key whose privacy flag differs from the existing one is an
/// error unless `force` is set, in which case the new flag wins.
///
/// # Errors
/// Returns [`AnnotationError::PrivacyConflict`] naming every conflicting key.
pub fn merge_annotations(
    existing: &Annotations,
    add: &BTreeMap<String, Annotation>,
    force: bool,
) -> Result<Annotations, AnnotationError> {
    let conflicts = privacy_conflicts(&existing.entries, add);
    if !conflicts.is_empty() && !force {
        return Err(AnnotationError::PrivacyConflict {
            keys: conflicts.join(", "),
        });
    }

    let mut merged = existing.clone();
    for (key, annotation) in add {
        merged.entries.insert(key.clone(), annotation.clone());
    }
    Ok(merged)
}

/// Return `status` with `add` merged into its annotations.
///
/// # Errors
/// Fails on privacy conflicts, see [`merge_annotations`].
pub fn update_single_submission_status(
    mut status: crate::SubmissionStatus,
    add: &BTreeMap<String, Annotation>,
    force: bool,
) -> Result<crate::SubmissionStatus, AnnotationError> {
    status.annotations = merge_annotations(&status.annotations, add, force)?;
    Ok(status)
}

// wire format

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEntry<T> {
    key: String,
    value: Option<T>,
    #[serde(default)]
    is_private: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotationsWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    object_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scope_id: Option<String>,
    #[serde(default)]
    string_annos: Vec<WireEntry<String>>,
    #[serde(default)]
    long_annos: Vec<WireEntry<i64>>,
    #[serde(default)]
    double_annos: Vec<WireEntry<f64>>,
}

impl From<AnnotationsWire> for Annotations {
    fn from(wire: AnnotationsWire) -> Self {
        let mut entries = BTreeMap::new();
        for e in wire.string_annos {
            if let Some(v) = e.value {
                entries.insert(e.key, Annotation::new(v, e.is_private));
            }
        }
        for e in wire.long_annos {
            if let Some(v) = e.value {
                entries.insert(e.key, Annotation::new(v, e.is_private));
            }
        }
        for e in wire.double_annos {
            if let Some(v) = e.value {
                entries.insert(e.key, Annotation::new(v, e.is_private));
            }
        }
        Annotations {
            object_id: wire.object_id,
            scope_id: wire.scope_id,
            entries,
        }
    }
}

impl From<Annotations> for AnnotationsWire {
    fn from(annotations: Annotations) -> Self {
        let mut wire = AnnotationsWire {
            object_id: annotations.object_id,
            scope_id: annotations.scope_id,
            ..Default::default()
        };
        for (key, annotation) in annotations.entries {
            let is_private = annotation.is_private;
            match annotation.value {
                AnnotationValue::String(v) => wire.string_annos.push(WireEntry {
                    key,
                    value: Some(v),
                    is_private,
                }),
                AnnotationValue::Long(v) => wire.long_annos.push(WireEntry {
                    key,
                    value: Some(v),
                    is_private,
                }),
                AnnotationValue::Double(v) => wire.double_annos.push(WireEntry {
                    key,
                    value: Some(v),
                    is_private,
                }),
            }
        }
        wire
    }
}
