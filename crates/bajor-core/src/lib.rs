pub mod catalog;
pub mod job;
pub mod observe;
pub mod question;
pub mod schema;

pub use catalog::{Catalog, CatalogError, CatalogRow};
pub use job::{AuthError, BasicAuth, Credentials, Job, JobError};
pub use observe::{Event, MemoryObserver, Observer, TracingObserver};
pub use question::{Question, QuestionError, QuestionSet};
