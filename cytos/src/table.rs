//! Columnar feature table assembled from per-sample records.
//!
//! Feature columns are always `f64`; `idx`, `group` and loader meta columns
//! keep their native type. Assembly fails on any record that does not carry
//! every declared feature column.

use std::collections::BTreeMap;
use std::path::Path;

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::features::FeatureSchema;
use crate::math::statistics::{mean, variance};
use crate::sample::{Meta, MetaValue};

pub const IDX_COLUMN: &str = "idx";
pub const GROUP_COLUMN: &str = "group";

/// Extraction output for one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub idx: String,
    pub group: String,
    pub meta: Meta,
    pub features: HashMap<String, f64>,
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("Sample {idx} is missing declared feature column `{column}`")]
    MissingColumn { idx: String, column: String },
    #[error("Sample {idx} carries undeclared feature column `{column}`")]
    UndeclaredColumn { idx: String, column: String },
    #[error("Duplicate sample idx {idx}")]
    DuplicateIdx { idx: String },
    #[error("Sample {idx} is missing meta key `{key}`")]
    MissingMeta { idx: String, key: String },
    #[error("Meta key `{key}` of sample {idx} has a different type than earlier rows")]
    MetaType { idx: String, key: String },
    #[error("Failed to save feature table")]
    Save(#[from] common::SerdeError),
}

pub type Result<T> = std::result::Result<T, TableError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum Column {
    Float(#[serde(with = "float_values")] Vec<f64>),
    Int(Vec<i64>),
    Str(Vec<String>),
    Bool(Vec<bool>),
}

/// File stems for per-group tables, one per group and all distinct.
///
/// Characters outside `[A-Za-z0-9._-]` become `_`; a group with nothing left
/// but dots is named `ungrouped`. Stems that collide get a `_2`, `_3`... suffix.
pub fn group_file_stems<'a>(groups: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    groups
        .into_iter()
        .map(|group| {
            let base: String = group
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                        c
                    } else {
                        '_'
                    }
                })
                .collect();
            let base = if base.trim_matches('.').is_empty() {
                "ungrouped".to_string()
            } else {
                base
            };

            let mut stem = base.clone();
            let mut n = 2;
            while !used.insert(stem.clone()) {
                stem = format!("{base}_{n}");
                n += 1;
            }
            stem
        })
        .collect()
}

/// Float values that survive formats without NaN or infinity.
///
/// Finite values are plain numbers. NaN and the infinities are written as
/// `"NaN"`, `"inf"` and `"-inf"`; `null` reads back as NaN.
mod float_values {
    use serde::de::{Deserializer, Error, Unexpected};
    use serde::ser::{SerializeSeq, Serializer};
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Value {
        Number(f64),
        Text(String),
        Null,
    }

    fn text(value: f64) -> &'static str {
        if value.is_nan() {
            "NaN"
        } else if value > 0.0 {
            "inf"
        } else {
            "-inf"
        }
    }

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for &value in values {
            if value.is_finite() {
                seq.serialize_element(&value)?;
            } else {
                seq.serialize_element(text(value))?;
            }
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        Vec::<Value>::deserialize(deserializer)?
            .into_iter()
            .map(|value| match value {
                Value::Number(v) => Ok(v),
                Value::Null => Ok(f64::NAN),
                Value::Text(t) => match t.as_str() {
                    "NaN" | "nan" => Ok(f64::NAN),
                    "inf" => Ok(f64::INFINITY),
                    "-inf" => Ok(f64::NEG_INFINITY),
                    other => Err(D::Error::invalid_value(
                        Unexpected::Str(other),
                        &"a number, NaN or an infinity",
                    )),
                },
            })
            .collect()
    }
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::Int(v) => v.len(),
            Column::Str(v) => v.len(),
            Column::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn empty_like(value: &MetaValue) -> Self {
        match value {
            MetaValue::Bool(_) => Column::Bool(Vec::new()),
            MetaValue::Int(_) => Column::Int(Vec::new()),
            MetaValue::Float(_) => Column::Float(Vec::new()),
            MetaValue::Str(_) => Column::Str(Vec::new()),
        }
    }

    /// Append `value`; `false` when its type does not match the column.
    fn push_meta(&mut self, value: &MetaValue) -> bool {
        match (self, value) {
            (Column::Bool(c), MetaValue::Bool(v)) => c.push(*v),
            (Column::Int(c), MetaValue::Int(v)) => c.push(*v),
            (Column::Float(c), MetaValue::Float(v)) => c.push(*v),
            (Column::Str(c), MetaValue::Str(v)) => c.push(v.clone()),
            _ => return false,
        }
        true
    }

    fn select(&self, rows: &[usize]) -> Self {
        match self {
            Column::Float(v) => Column::Float(rows.iter().map(|&r| v[r]).collect()),
            Column::Int(v) => Column::Int(rows.iter().map(|&r| v[r]).collect()),
            Column::Str(v) => Column::Str(rows.iter().map(|&r| v[r].clone()).collect()),
            Column::Bool(v) => Column::Bool(rows.iter().map(|&r| v[r]).collect()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedColumn {
    pub name: String,
    pub column: Column,
}

/// Mean and variance of one feature column, NaN values skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSummary {
    pub name: String,
    pub mean: f64,
    pub variance: f64,
    pub nan_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSummary {
    pub columns: Vec<ColumnSummary>,
    /// Feature columns whose non-NaN values are all equal.
    pub zero_variance: Vec<String>,
    /// Feature columns with no non-NaN value.
    pub all_nan: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    n_rows: usize,
    feature_columns: Vec<String>,
    columns: Vec<NamedColumn>,
}

impl FeatureTable {
    /// Assemble records into columns: `idx`, `group`, `meta_keys`, then the schema.
    pub fn assemble(
        schema: &FeatureSchema,
        meta_keys: &[String],
        records: Vec<FeatureRecord>,
    ) -> Result<Self> {
        let mut seen: HashSet<&str> = HashSet::with_capacity(records.len());
        for record in &records {
            if !seen.insert(record.idx.as_str()) {
                return Err(TableError::DuplicateIdx {
                    idx: record.idx.clone(),
                });
            }
            if let Some(column) = schema.columns().iter().find(|c| !record.features.contains_key(*c)) {
                return Err(TableError::MissingColumn {
                    idx: record.idx.clone(),
                    column: column.clone(),
                });
            }
            // all declared columns are present, so any surplus key is undeclared
            if record.features.len() != schema.len() {
                let declared: HashSet<&str> = schema.columns().iter().map(String::as_str).collect();
                if let Some(column) = record.features.keys().find(|c| !declared.contains(c.as_str())) {
                    return Err(TableError::UndeclaredColumn {
                        idx: record.idx.clone(),
                        column: column.clone(),
                    });
                }
            }
        }

        let n_rows = records.len();
        let mut columns = Vec::with_capacity(2 + meta_keys.len() + schema.len());
        columns.push(NamedColumn {
            name: IDX_COLUMN.to_string(),
            column: Column::Str(records.iter().map(|r| r.idx.clone()).collect()),
        });
        columns.push(NamedColumn {
            name: GROUP_COLUMN.to_string(),
            column: Column::Str(records.iter().map(|r| r.group.clone()).collect()),
        });

        for key in meta_keys {
            let mut column: Option<Column> = None;
            for record in &records {
                let value = record.meta.get(key).ok_or_else(|| TableError::MissingMeta {
                    idx: record.idx.clone(),
                    key: key.clone(),
                })?;
                let target = column.get_or_insert_with(|| Column::empty_like(value));
                if !target.push_meta(value) {
                    return Err(TableError::MetaType {
                        idx: record.idx.clone(),
                        key: key.clone(),
                    });
                }
            }
            columns.push(NamedColumn {
                name: key.clone(),
                column: column.unwrap_or(Column::Str(Vec::new())),
            });
        }

        for name in schema.columns() {
            let values = records
                .iter()
                .map(|r| r.features.get(name).copied().unwrap_or(f64::NAN))
                .collect();
            columns.push(NamedColumn {
                name: name.clone(),
                column: Column::Float(values),
            });
        }

        debug!(rows = n_rows, columns = columns.len(), "Assembled feature table");

        Ok(Self {
            n_rows,
            feature_columns: schema.columns().to_vec(),
            columns,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn feature_columns(&self) -> &[String] {
        &self.feature_columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name).map(|c| &c.column)
    }

    pub fn float_column(&self, name: &str) -> Option<&[f64]> {
        match self.column(name)? {
            Column::Float(values) => Some(values),
            _ => None,
        }
    }

    fn str_column(&self, name: &str) -> &[String] {
        match self.column(name) {
            Some(Column::Str(values)) => values,
            _ => &[],
        }
    }

    pub fn idx(&self) -> &[String] {
        self.str_column(IDX_COLUMN)
    }

    pub fn groups(&self) -> &[String] {
        self.str_column(GROUP_COLUMN)
    }

    /// One table per distinct `group` value, keyed by group.
    pub fn split_by_group(&self) -> BTreeMap<String, FeatureTable> {
        let mut rows_by_group: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (row, group) in self.groups().iter().enumerate() {
            rows_by_group.entry(group.as_str()).or_default().push(row);
        }

        rows_by_group
            .into_iter()
            .map(|(group, rows)| {
                let columns = self
                    .columns
                    .iter()
                    .map(|c| NamedColumn {
                        name: c.name.clone(),
                        column: c.column.select(&rows),
                    })
                    .collect();
                let table = FeatureTable {
                    n_rows: rows.len(),
                    feature_columns: self.feature_columns.clone(),
                    columns,
                };
                (group.to_string(), table)
            })
            .collect()
    }

    /// Per-feature-column mean and variance, flagging degenerate columns.
    pub fn summary(&self) -> TableSummary {
        let mut summary = TableSummary::default();
        if self.n_rows == 0 {
            return summary;
        }

        for name in &self.feature_columns {
            let Some(values) = self.float_column(name) else {
                continue;
            };
            let finite: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
            let nan_count = values.len() - finite.len();
            let (m, var) = if finite.is_empty() {
                (f64::NAN, f64::NAN)
            } else {
                (mean(&finite), variance(&finite))
            };

            if finite.is_empty() {
                summary.all_nan.push(name.clone());
            } else if var == 0.0 {
                summary.zero_variance.push(name.clone());
            }
            summary.columns.push(ColumnSummary {
                name: name.clone(),
                mean: m,
                variance: var,
                nan_count,
            });
        }
        summary
    }

    /// Log degenerate columns; they stay in the table.
    pub fn log_summary(&self) -> TableSummary {
        let summary = self.summary();
        if !summary.zero_variance.is_empty() {
            warn!(
                count = summary.zero_variance.len(),
                columns = ?summary.zero_variance,
                "Feature columns with zero variance"
            );
        }
        if !summary.all_nan.is_empty() {
            warn!(
                count = summary.all_nan.len(),
                columns = ?summary.all_nan,
                "Feature columns with only NaN values"
            );
        }
        summary
    }

    /// Write the table as YAML or JSON, picked from the file extension.
    pub fn save(&self, path: &Path) -> Result<()> {
        common::save_file(self, path)?;
        debug!(path = %path.display(), rows = self.n_rows, "Saved feature table");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(common::load_file(path)?)
    }
}
