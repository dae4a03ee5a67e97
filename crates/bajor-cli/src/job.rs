//! Running a submitted job: check credentials, load its manifest, predict.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use bajor_ai::ConcentrationModel;
use bajor_core::{BasicAuth, Credentials, Job};
use tracing::info;

use crate::predict::{Pipeline, PredictStats};

/// Where a job's predictions land: `<output_dir>/<job_id or "predictions">.csv`.
pub fn output_path(job: &Job, output_dir: &Path) -> PathBuf {
    output_dir.join(format!("{}.csv", job.output_stem()))
}

pub fn run_job(
    job_file: &Path,
    auth: &BasicAuth,
    presented: &Credentials,
    pipeline: &Pipeline,
    model: &dyn ConcentrationModel,
    label_cols: &[String],
    output_dir: &Path,
) -> anyhow::Result<PredictStats> {
    let text = std::fs::read_to_string(job_file)
        .with_context(|| format!("reading job {}", job_file.display()))?;
    let job = Job::from_json(&text)?;
    let job = auth.accept(job, presented).map_err(|e| {
        anyhow::anyhow!("{e} (status {}, challenge '{}')", e.status(), e.challenge())
    })?;
    info!(
        job_id = job.job_id.as_deref().unwrap_or("-"),
        manifest = %job.manifest_path,
        scheduled = job.scheduled.as_deref().unwrap_or("-"),
        "job accepted"
    );

    let catalog = bajor_store::read_catalog(Path::new(&job.manifest_path))
        .with_context(|| format!("loading manifest {}", job.manifest_path))?;
    let output = output_path(&job, output_dir);
    pipeline.predict(Arc::new(catalog), model, label_cols, &output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predict::tests::{MeanPixel, fixture, labels, pipeline};
    use bajor_ai::SampleMode;
    use tempfile::TempDir;

    fn write_manifest(dir: &Path, n: usize) -> PathBuf {
        let (catalog, _) = fixture(n);
        let mut csv = String::from("subject_id,image_url\n");
        for row in catalog.rows() {
            csv.push_str(&format!("{},{}\n", row.subject_id, row.image_url));
        }
        let path = dir.join("manifest.csv");
        std::fs::write(&path, csv).unwrap();
        path
    }

    fn write_job(dir: &Path, json: &str) -> PathBuf {
        let path = dir.join("job.json");
        std::fs::write(&path, json).unwrap();
        path
    }

    fn auth() -> BasicAuth {
        BasicAuth::new(Credentials::new("bajor", "hunter2"))
    }

    #[test]
    fn job_writes_named_output() {
        let dir = TempDir::new().unwrap();
        let manifest = write_manifest(dir.path(), 3);
        let job = write_job(
            dir.path(),
            &format!(
                r#"{{"manifest_path": "{}", "job_id": "batch-42"}}"#,
                manifest.display()
            ),
        );
        let (_, transport) = fixture(3);
        let (pipeline, _) = pipeline(Arc::new(transport), 1, SampleMode::Independent);

        let stats = run_job(
            &job,
            &auth(),
            &Credentials::new("bajor", "hunter2"),
            &pipeline,
            &MeanPixel::new(),
            &labels(),
            &dir.path().join("out"),
        )
        .unwrap();

        assert_eq!(stats.output, dir.path().join("out").join("batch-42.csv"));
        let saved = bajor_store::read_predictions(&stats.output).unwrap();
        assert_eq!(saved.ids, vec!["s0", "s1", "s2"]);
    }

    #[test]
    fn wrong_credentials_run_nothing() {
        let dir = TempDir::new().unwrap();
        let manifest = write_manifest(dir.path(), 1);
        let job = write_job(
            dir.path(),
            &format!(r#"{{"manifest_path": "{}"}}"#, manifest.display()),
        );
        let (_, transport) = fixture(1);
        let transport = Arc::new(transport);
        let (pipeline, _) = pipeline(transport.clone(), 1, SampleMode::Independent);

        let err = run_job(
            &job,
            &auth(),
            &Credentials::new("bajor", "wrong"),
            &pipeline,
            &MeanPixel::new(),
            &labels(),
            dir.path(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("401"));
        assert_eq!(transport.calls(&crate::predict::tests::url(0)), 0);
        assert!(!dir.path().join("predictions.csv").exists());
    }

    #[test]
    fn default_output_stem() {
        let job = Job::from_json(r#"{"manifest_path": "m.csv"}"#).unwrap();
        assert_eq!(
            output_path(&job, Path::new("/tmp/out")),
            Path::new("/tmp/out/predictions.csv")
        );
    }
}
