//! Prediction tensor serialisation.
//!
//! A `(galaxies, answers, samples)` tensor is stored with its subject ids and
//! answer labels. The format follows the destination suffix: `.csv` or
//! `.hdf5`; anything else is written as CSV after an `OutputFallback` event.
//!
//! CSV layout: an `id_str` column, then one `<answer>_pred` column per answer.
//! With a single sample a cell is a plain float, otherwise a bracketed list
//! of the samples (`[0.71, 0.69]`). Non-finite values are written as `NaN`,
//! `inf` and `-inf` so a misbehaving model still leaves a readable file.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, StringArray};
use arrow::csv::reader::Format;
use arrow::csv::{ReaderBuilder, WriterBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use bajor_core::{Event, Observer};
use ndarray::{Array3, ArrayView3, Axis};

use crate::StoreError;
use crate::catalog::extension;

pub const ID_COLUMN: &str = "id_str";
pub const PRED_SUFFIX: &str = "_pred";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Hdf5,
}

impl OutputFormat {
    /// Recognised suffixes only.
    pub fn from_path(path: &Path) -> Option<Self> {
        match extension(path).as_deref() {
            Some("csv") => Some(Self::Csv),
            Some("hdf5") | Some("h5") => Some(Self::Hdf5),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Hdf5 => "hdf5",
        }
    }
}

/// What a prediction file holds.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionSet {
    pub ids: Vec<String>,
    pub label_cols: Vec<String>,
    pub predictions: Array3<f32>,
}

/// Write `predictions` keyed by `ids` (rows) and `label_cols` (answers).
///
/// Returns the format actually used.
pub fn write_predictions(
    predictions: ArrayView3<'_, f32>,
    ids: &[String],
    label_cols: &[String],
    path: &Path,
    observer: &dyn Observer,
) -> Result<OutputFormat, StoreError> {
    let (n_galaxies, n_answers, n_samples) = predictions.dim();
    if n_galaxies != ids.len() || n_answers != label_cols.len() || n_samples == 0 {
        return Err(StoreError::ShapeMismatch {
            shape: [n_galaxies, n_answers, n_samples],
            n_ids: ids.len(),
            n_labels: label_cols.len(),
        });
    }

    let format = OutputFormat::from_path(path).unwrap_or_else(|| {
        observer.event(&Event::OutputFallback {
            path: path.display().to_string(),
            format: OutputFormat::Csv.as_str().into(),
        });
        OutputFormat::Csv
    });

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    match format {
        OutputFormat::Csv => write_csv(predictions, ids, label_cols, path)?,
        OutputFormat::Hdf5 => write_hdf5(predictions, ids, label_cols, path)?,
    }

    observer.event(&Event::OutputWritten {
        path: path.display().to_string(),
        format: format.as_str().into(),
    });
    Ok(format)
}

/// Read back a file written by [`write_predictions`].
pub fn read_predictions(path: &Path) -> Result<PredictionSet, StoreError> {
    if !path.exists() {
        return Err(StoreError::NotFound(path.to_path_buf()));
    }
    match OutputFormat::from_path(path).unwrap_or(OutputFormat::Csv) {
        OutputFormat::Csv => read_csv(path),
        OutputFormat::Hdf5 => read_hdf5(path),
    }
}

#[cfg(feature = "hdf5")]
fn write_hdf5(
    predictions: ArrayView3<'_, f32>,
    ids: &[String],
    label_cols: &[String],
    path: &Path,
) -> Result<(), StoreError> {
    crate::hdf::write(predictions, ids, label_cols, path)
}

#[cfg(not(feature = "hdf5"))]
fn write_hdf5(
    _predictions: ArrayView3<'_, f32>,
    _ids: &[String],
    _label_cols: &[String],
    path: &Path,
) -> Result<(), StoreError> {
    Err(StoreError::Hdf5Disabled(path.to_path_buf()))
}

#[cfg(feature = "hdf5")]
fn read_hdf5(path: &Path) -> Result<PredictionSet, StoreError> {
    crate::hdf::read(path)
}

#[cfg(not(feature = "hdf5"))]
fn read_hdf5(path: &Path) -> Result<PredictionSet, StoreError> {
    Err(StoreError::Hdf5Disabled(path.to_path_buf()))
}

fn write_csv(
    predictions: ArrayView3<'_, f32>,
    ids: &[String],
    label_cols: &[String],
    path: &Path,
) -> Result<(), StoreError> {
    let single = predictions.len_of(Axis(2)) == 1;

    let mut fields = vec![Field::new(ID_COLUMN, DataType::Utf8, false)];
    let mut columns: Vec<ArrayRef> = vec![Arc::new(StringArray::from_iter_values(ids))];
    for (a, label) in label_cols.iter().enumerate() {
        fields.push(Field::new(format!("{label}{PRED_SUFFIX}"), DataType::Utf8, false));
        let answer = predictions.index_axis(Axis(1), a);
        let cells = answer
            .outer_iter()
            .map(|samples| {
                if single {
                    samples[0].to_string()
                } else {
                    let values: Vec<String> = samples.iter().map(f32::to_string).collect();
                    format!("[{}]", values.join(", "))
                }
            })
            .collect::<Vec<String>>();
        columns.push(Arc::new(StringArray::from(cells)));
    }

    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
    let mut writer = WriterBuilder::new()
        .with_header(true)
        .build(File::create(path)?);
    writer.write(&batch)?;
    Ok(())
}

fn read_csv(path: &Path) -> Result<PredictionSet, StoreError> {
    let mut file = File::open(path)?;
    let format = Format::default().with_header(true);
    let (inferred, _) = format.infer_schema(&mut file, Some(1))?;
    std::io::Seek::rewind(&mut file)?;

    // Every column is read as text; cells are parsed below.
    let names: Vec<String> = inferred.fields().iter().map(|f| f.name().clone()).collect();
    if names.first().map(String::as_str) != Some(ID_COLUMN) {
        return Err(StoreError::Malformed(format!(
            "first column must be '{ID_COLUMN}', found {:?}",
            names.first()
        )));
    }
    let label_cols = names[1..]
        .iter()
        .map(|n| {
            n.strip_suffix(PRED_SUFFIX)
                .map(str::to_string)
                .ok_or_else(|| StoreError::Malformed(format!("column '{n}' lacks '{PRED_SUFFIX}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let schema = Schema::new(
        names
            .iter()
            .map(|n| Field::new(n, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    );
    let reader = ReaderBuilder::new(Arc::new(schema))
        .with_format(format)
        .build(file)?;

    let mut ids = Vec::new();
    let mut rows: Vec<Vec<Vec<f32>>> = Vec::new();
    for batch in reader {
        let batch = batch?;
        let columns = batch
            .columns()
            .iter()
            .map(|c| {
                c.as_any()
                    .downcast_ref::<StringArray>()
                    .ok_or_else(|| StoreError::Malformed("non-text column".into()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        for r in 0..batch.num_rows() {
            ids.push(cell(columns[0], r)?.to_string());
            let answers = columns[1..]
                .iter()
                .map(|col| parse_samples(cell(col, r)?))
                .collect::<Result<Vec<_>, _>>()?;
            rows.push(answers);
        }
    }

    let n_samples = rows
        .first()
        .and_then(|answers| answers.first())
        .map_or(1, Vec::len);
    let mut predictions = Array3::zeros((rows.len(), label_cols.len(), n_samples));
    for (g, answers) in rows.iter().enumerate() {
        for (a, samples) in answers.iter().enumerate() {
            if samples.len() != n_samples {
                return Err(StoreError::Malformed(format!(
                    "row {g} column {a} has {} samples, expected {n_samples}",
                    samples.len()
                )));
            }
            for (k, v) in samples.iter().enumerate() {
                predictions[[g, a, k]] = *v;
            }
        }
    }

    Ok(PredictionSet {
        ids,
        label_cols,
        predictions,
    })
}

fn cell(column: &StringArray, row: usize) -> Result<&str, StoreError> {
    if column.is_null(row) {
        return Err(StoreError::Malformed(format!("empty cell in row {row}")));
    }
    Ok(column.value(row))
}

fn parse_samples(raw: &str) -> Result<Vec<f32>, StoreError> {
    let raw = raw.trim();
    let parse = |v: &str| {
        v.trim()
            .parse::<f32>()
            .map_err(|e| StoreError::Malformed(format!("'{raw}': {e}")))
    };
    match raw.strip_prefix('[') {
        Some(list) => {
            let list = list
                .strip_suffix(']')
                .ok_or_else(|| StoreError::Malformed(format!("unclosed list '{raw}'")))?;
            if list.trim().is_empty() {
                return Ok(Vec::new());
            }
            list.split(',').map(parse).collect()
        }
        None => parse(raw).map(|v| vec![v]),
    }
}
