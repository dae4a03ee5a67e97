//! Prediction job descriptions and the basic-auth check guarding job submission.
//!
//! A job names a manifest (the subject catalog) to predict on. Accepting a
//! job and running it are separate steps: [`BasicAuth::accept`] only checks
//! credentials and echoes the job back.

use ring::constant_time::verify_slices_are_equal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_USERNAME: &str = "bajor";
const DEFAULT_PASSWORD: &str = "bajor";

/// A prediction job submitted by an upstream scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Location of the subject catalog (manifest) to predict on.
    pub manifest_path: String,
    #[serde(default)]
    pub job_id: Option<String>,
    /// Opaque scheduling hint, echoed back unchanged.
    #[serde(default)]
    pub scheduled: Option<String>,
}

impl Job {
    pub fn from_json(json: &str) -> Result<Self, JobError> {
        let job: Job = serde_json::from_str(json)?;
        if job.manifest_path.trim().is_empty() {
            return Err(JobError::EmptyManifest);
        }
        Ok(job)
    }

    /// File stem for this job's output artifact.
    pub fn output_stem(&self) -> &str {
        self.job_id.as_deref().unwrap_or("predictions")
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid job description: {0}")]
    Json(#[from] serde_json::Error),
    #[error("job manifest_path is empty")]
    EmptyManifest,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("incorrect username or password")]
    Unauthorized,
}

impl AuthError {
    /// HTTP status to report for this failure.
    pub fn status(&self) -> u16 {
        401
    }

    /// Value for the `WWW-Authenticate` challenge header.
    pub fn challenge(&self) -> &'static str {
        "Basic"
    }
}

/// Credentials presented by a caller.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Expected basic-auth credentials.
#[derive(Clone)]
pub struct BasicAuth {
    expected: Credentials,
}

impl BasicAuth {
    pub fn new(expected: Credentials) -> Self {
        Self { expected }
    }

    /// Read `BASIC_AUTH_USERNAME` / `BASIC_AUTH_PASSWORD`, defaulting both to `bajor`.
    pub fn from_env() -> Self {
        let username =
            std::env::var("BASIC_AUTH_USERNAME").unwrap_or_else(|_| DEFAULT_USERNAME.into());
        let password =
            std::env::var("BASIC_AUTH_PASSWORD").unwrap_or_else(|_| DEFAULT_PASSWORD.into());
        Self::new(Credentials::new(username, password))
    }

    /// Compare credentials in constant time.
    ///
    /// Both fields are always compared so a wrong username takes as long to
    /// reject as a wrong password.
    pub fn verify(&self, presented: &Credentials) -> Result<(), AuthError> {
        let user_ok = verify_slices_are_equal(
            presented.username.as_bytes(),
            self.expected.username.as_bytes(),
        )
        .is_ok();
        let pass_ok = verify_slices_are_equal(
            presented.password.as_bytes(),
            self.expected.password.as_bytes(),
        )
        .is_ok();
        if user_ok & pass_ok {
            Ok(())
        } else {
            Err(AuthError::Unauthorized)
        }
    }

    /// Accept a job for scheduling, returning it unchanged on success.
    pub fn accept(&self, job: Job, presented: &Credentials) -> Result<Job, AuthError> {
        self.verify(presented)?;
        Ok(job)
    }
}
