//! Deletion Watcher
//!
//! Undeploying a module is asynchronous: the Application delete is issued
//! immediately, but the GitOps controller finalizes it in its own time, and
//! the module namespaces must only go away after the Application is really
//! gone. A single worker task owns a queue of [`PollTask`]s and runs one
//! tick at a time; a task that finds its Application still present re-arms
//! itself with one pending timer rather than holding the worker, so memory
//! stays bounded at one timer per in-flight undeploy.
//!
//! A task ends in one of two ways: the Application disappears (namespaces
//! are then deleted) or the deadline passes. On timeout the namespaces are
//! deliberately left intact - after an ambiguous partial failure, removing
//! user namespaces could destroy state the controller still references, so
//! cleanup becomes an operator task. There is no cancel API.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::catalog::ModuleCatalog;
use crate::client::ResourceClient;
use crate::config::Settings;
use crate::status::{ApplicationState, ChangeSummary};
use crate::template::{substitute, UserIdentity};
use crate::Result;

/// One in-flight deletion confirmation
///
/// Owned by the watcher worker; carries only what a tick needs, not a call
/// stack, so the polling loop is a plain state machine.
#[derive(Clone, Debug)]
pub struct PollTask {
    /// Application resource name being confirmed gone
    pub application: String,
    /// The user's GitOps namespace holding the Application
    pub namespace: String,
    /// Identity the module was deployed for
    pub user: UserIdentity,
    /// Wall-clock point after which the task gives up
    pub deadline: Instant,
    /// Pause between checks
    pub interval: Duration,
}

/// What one tick observed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Resource still present, or the check failed transiently; poll again
    Pending,
    /// Resource confirmed gone; module namespaces have been deleted
    Deleted,
    /// Deadline passed before the resource disappeared
    TimedOut,
}

/// Run one tick of a poll task
///
/// The deadline is checked first, against the wall clock, so a slow or
/// failing API burns wait budget rather than extending it.
pub async fn tick(
    client: &dyn ResourceClient,
    catalog: &ModuleCatalog,
    task: &PollTask,
) -> TickOutcome {
    if Instant::now() > task.deadline {
        warn!(
            application = %task.application,
            namespace = %task.namespace,
            "Application was not deleted before the deadline; leaving namespaces in place"
        );
        return TickOutcome::TimedOut;
    }

    match client
        .get_application(&task.namespace, &task.application)
        .await
    {
        Ok(Some(_)) => TickOutcome::Pending,
        Ok(None) => {
            info!(
                application = %task.application,
                namespace = %task.namespace,
                "Application deleted"
            );
            delete_module_namespaces(client, catalog, &task.application, &task.user).await;
            TickOutcome::Deleted
        }
        Err(e) => {
            // transient by assumption: the next tick retries, the deadline
            // still bounds the whole task
            warn!(
                application = %task.application,
                error = %e,
                "Deletion check failed, retrying next tick"
            );
            TickOutcome::Pending
        }
    }
}

/// Best-effort removal of every namespace belonging to the module
async fn delete_module_namespaces(
    client: &dyn ResourceClient,
    catalog: &ModuleCatalog,
    application_name: &str,
    user: &UserIdentity,
) {
    let Some(module) = catalog.by_application(application_name) else {
        warn!(application = %application_name, "Module for application not found");
        return;
    };
    for template in &module.namespace_templates {
        let namespace = substitute(template, user);
        match client.delete_namespace(&namespace).await {
            Ok(()) => info!(namespace = %namespace, "Namespace deleted"),
            Err(e) => warn!(namespace = %namespace, error = %e, "Namespace deletion failed"),
        }
    }
}

/// Confirms Application deletions and cleans up module namespaces
pub struct DeletionWatcher {
    client: Arc<dyn ResourceClient>,
    settings: Arc<Settings>,
    queue: mpsc::UnboundedSender<PollTask>,
}

impl DeletionWatcher {
    /// Start the watcher worker and return a handle for scheduling
    pub fn spawn(
        client: Arc<dyn ResourceClient>,
        catalog: Arc<ModuleCatalog>,
        settings: Arc<Settings>,
    ) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(client.clone(), catalog, queue.clone(), rx));
        Self {
            client,
            settings,
            queue,
        }
    }

    /// Undeploy entry point: issue the delete and start polling
    ///
    /// Answers immediately; teardown completion is only observable through
    /// a later status query. An Application that is already absent answers
    /// `notchanged` and schedules nothing.
    pub async fn confirm_and_poll(
        &self,
        application_name: &str,
        user: &UserIdentity,
    ) -> Result<ChangeSummary> {
        let namespace = self.settings.gitops_namespace(user);
        if self
            .client
            .get_application(&namespace, application_name)
            .await?
            .is_none()
        {
            warn!(
                application = %application_name,
                user = %user,
                "Application not found, nothing to undeploy"
            );
            return Ok(ChangeSummary::not_changed());
        }

        info!(application = %application_name, user = %user, "Undeploying application");
        self.client
            .delete_application(&namespace, application_name)
            .await?;

        let task = PollTask {
            application: application_name.to_string(),
            namespace,
            user: user.clone(),
            deadline: Instant::now() + self.settings.delete_max_wait(),
            interval: self.settings.poll_interval(),
        };
        if self.queue.send(task).is_err() {
            warn!(
                application = %application_name,
                "Watch worker is gone; module namespaces will need manual cleanup"
            );
        }

        Ok(ChangeSummary::ok(ApplicationState::deleting()))
    }
}

/// The single watch worker: ticks run strictly one at a time
async fn run_worker(
    client: Arc<dyn ResourceClient>,
    catalog: Arc<ModuleCatalog>,
    queue: mpsc::UnboundedSender<PollTask>,
    mut rx: mpsc::UnboundedReceiver<PollTask>,
) {
    while let Some(task) = rx.recv().await {
        match tick(&*client, &catalog, &task).await {
            TickOutcome::Pending => {
                // re-arm off-worker: the timer waits, the worker doesn't
                let queue = queue.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(task.interval).await;
                    let _ = queue.send(task);
                });
            }
            TickOutcome::Deleted | TickOutcome::TimedOut => {}
        }
    }
}
