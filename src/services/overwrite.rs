//! Overwrite policy: before a new revision of a logical file is committed,
//! every earlier revision is deleted.
//!
//! The policy is best-effort and two-phase: [`OverwritePolicy::plan`] picks
//! the victims from a listing, [`OverwritePolicy::apply`] deletes them and
//! records failures in an [`OverwriteReport`] instead of failing the commit.
//! There is no rollback if the following put fails.

use crate::{
    models::object::{LogicalName, StoredObject},
    services::object_store::ObjectStore,
};
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, Default)]
pub struct OverwritePolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverwriteFailure {
    /// URL of the object that could not be deleted, or `list` when the
    /// listing itself failed.
    pub target: String,
    pub error: String,
}

#[derive(Debug, Default, Clone)]
pub struct OverwriteReport {
    pub deleted: Vec<String>,
    pub failures: Vec<OverwriteFailure>,
}

impl OverwriteReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl OverwritePolicy {
    /// Objects that are earlier revisions of `name`.
    pub fn plan<'a>(
        &self,
        objects: &'a [StoredObject],
        name: &LogicalName,
    ) -> Vec<&'a StoredObject> {
        objects.iter().filter(|obj| obj.matches_name(name)).collect()
    }

    /// List the store and delete every earlier revision of `name`.
    pub async fn apply(&self, store: &dyn ObjectStore, name: &LogicalName) -> OverwriteReport {
        let mut report = OverwriteReport::default();

        let objects = match store.list().await {
            Ok(objects) => objects,
            Err(err) => {
                warn!(name = %name, "overwrite policy could not list store: {}", err);
                report.failures.push(OverwriteFailure {
                    target: "list".into(),
                    error: err.to_string(),
                });
                return report;
            }
        };

        for victim in self.plan(&objects, name) {
            match store.delete(&victim.url).await {
                Ok(()) => {
                    debug!(pathname = %victim.pathname, "deleted superseded revision");
                    report.deleted.push(victim.url.clone());
                }
                Err(err) => {
                    warn!(
                        pathname = %victim.pathname,
                        "failed to delete superseded revision: {}", err
                    );
                    report.failures.push(OverwriteFailure {
                        target: victim.url.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        report
    }
}
