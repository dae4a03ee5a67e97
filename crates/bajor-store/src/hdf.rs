//! HDF5 layout: datasets `predictions` (f32, galaxies × answers × samples),
//! `id_str` and `label_cols` (variable-length UTF-8).

use std::path::Path;

use hdf5::types::VarLenUnicode;
use ndarray::{ArrayView3, Ix3};

use crate::StoreError;
use crate::predictions::PredictionSet;

const PREDICTIONS: &str = "predictions";
const IDS: &str = "id_str";
const LABELS: &str = "label_cols";

pub(crate) fn write(
    predictions: ArrayView3<'_, f32>,
    ids: &[String],
    label_cols: &[String],
    path: &Path,
) -> Result<(), StoreError> {
    let file = hdf5::File::create(path)?;
    file.new_dataset_builder()
        .with_data(&predictions.as_standard_layout())
        .create(PREDICTIONS)?;
    file.new_dataset_builder()
        .with_data(unicode(ids)?.as_slice())
        .create(IDS)?;
    file.new_dataset_builder()
        .with_data(unicode(label_cols)?.as_slice())
        .create(LABELS)?;
    Ok(())
}

pub(crate) fn read(path: &Path) -> Result<PredictionSet, StoreError> {
    let file = hdf5::File::open(path)?;
    let predictions = file.dataset(PREDICTIONS)?.read::<f32, Ix3>()?;
    let strings = |name: &str| -> Result<Vec<String>, StoreError> {
        Ok(file
            .dataset(name)?
            .read_1d::<VarLenUnicode>()?
            .iter()
            .map(|s| s.as_str().to_string())
            .collect())
    };
    let ids = strings(IDS)?;
    let label_cols = strings(LABELS)?;

    let (g, a, _) = predictions.dim();
    if g != ids.len() || a != label_cols.len() {
        return Err(StoreError::Malformed(format!(
            "predictions {:?} vs {} ids and {} labels",
            predictions.shape(),
            ids.len(),
            label_cols.len()
        )));
    }
    Ok(PredictionSet {
        ids,
        label_cols,
        predictions,
    })
}

fn unicode(values: &[String]) -> Result<Vec<VarLenUnicode>, StoreError> {
    values
        .iter()
        .map(|v| {
            v.parse::<VarLenUnicode>()
                .map_err(|e| StoreError::Malformed(format!("'{v}': {e}")))
        })
        .collect()
}
