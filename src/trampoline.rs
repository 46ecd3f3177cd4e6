//! Local retry trampoline.
//!
//! Loads runtime properties, invokes one operation, persists the properties
//! and folds the result. With `follow`, re-invokes after every retry request
//! until the operation settles; running out of attempts is reported as a
//! recoverable failure.

use serde::Serialize;
use std::time::Duration;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::NodeDocument;
use crate::context::{PropertyStore, RuntimeProperties};
use crate::error::Result;
use crate::operations::{self, Operation};
use crate::outcome::OperationResult;
use crate::provider::Cloud;

/// Default attempt budget when following retries.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Drives one operation of one node through the property store.
pub struct Trampoline<'a, S: PropertyStore> {
    /// Provider facade.
    cloud: &'a Cloud,
    /// Runtime-property store.
    store: &'a S,
    /// Re-invoke after retry requests.
    follow: bool,
    /// Maximum invocations when following.
    max_attempts: u32,
}

/// What a trampoline run concluded.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationReport {
    /// Operation name.
    pub operation: String,
    /// Node instance id.
    pub instance_id: String,
    /// Number of invocations made.
    pub attempts: u32,
    /// Result of the last invocation.
    #[serde(flatten)]
    pub result: OperationResult,
}

impl<'a, S: PropertyStore> Trampoline<'a, S> {
    /// Creates a trampoline that invokes once.
    #[must_use]
    pub const fn new(cloud: &'a Cloud, store: &'a S) -> Self {
        Self {
            cloud,
            store,
            follow: false,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Follows retry requests for up to `max_attempts` invocations.
    #[must_use]
    pub const fn following(mut self, max_attempts: u32) -> Self {
        self.follow = true;
        self.max_attempts = max_attempts;
        self
    }

    /// Runs `operation` on the node; relationship operations use the edge at
    /// `relationship`.
    ///
    /// # Errors
    ///
    /// Returns store errors and relationship lookup errors. Operation
    /// failures are reported in the [`InvocationReport`].
    pub async fn run(
        &self,
        document: &NodeDocument,
        operation: Operation,
        relationship: usize,
    ) -> Result<InvocationReport> {
        let attempts_allowed = if self.follow { self.max_attempts.max(1) } else { 1 };
        let mut attempts = 0;

        loop {
            let retry_number = attempts;
            attempts += 1;
            let result = self
                .invoke(document, operation, relationship, retry_number)
                .await?;

            match &result {
                OperationResult::RetryAfter { secs, message } if attempts < attempts_allowed => {
                    info!("{operation} asked to retry in {secs}s: {message}");
                    tokio::time::sleep(Duration::from_secs(*secs)).await;
                }
                OperationResult::RetryAfter { message, .. } if self.follow => {
                    warn!("{operation} still pending after {attempts} attempt(s): {message}");
                    let result = OperationResult::Fail {
                        message: format!("still pending after {attempts} attempt(s): {message}"),
                        recoverable: true,
                    };
                    return Ok(Self::report(document, operation, attempts, result));
                }
                OperationResult::RetryAfter { .. } => {
                    return Ok(Self::report(document, operation, attempts, result));
                }
                OperationResult::Success => {
                    info!("{operation} succeeded after {attempts} attempt(s)");
                    return Ok(Self::report(document, operation, attempts, result));
                }
                OperationResult::Fail { message, .. } => {
                    error!("{operation} failed: {message}");
                    return Ok(Self::report(document, operation, attempts, result));
                }
            }
        }
    }

    fn report(
        document: &NodeDocument,
        operation: Operation,
        attempts: u32,
        result: OperationResult,
    ) -> InvocationReport {
        InvocationReport {
            operation: operation.to_string(),
            instance_id: document.instance_id.clone(),
            attempts,
            result,
        }
    }

    async fn load(&self, instance_id: &str) -> Result<RuntimeProperties> {
        Ok(self
            .store
            .load(instance_id)
            .await?
            .map(|stored| stored.properties)
            .unwrap_or_default())
    }

    /// One invocation: load, run, persist, fold.
    async fn invoke(
        &self,
        document: &NodeDocument,
        operation: Operation,
        relationship: usize,
        retry_number: u32,
    ) -> Result<OperationResult> {
        let instance_id = document.instance_id.as_str();
        let props = self.load(instance_id).await?;

        if operation.is_relationship() {
            let target_instance = document
                .relationships
                .get(relationship)
                .and_then(|entry| entry.target_instance.clone());
            let target_props = match &target_instance {
                Some(id) => Some(self.load(id).await?),
                None => None,
            };
            let mut ctx = document.relationship_context(
                relationship,
                props,
                target_props.as_ref(),
                retry_number,
            )?;

            let span = info_span!(
                "operation",
                op = %operation,
                node = %ctx.source.kind(),
                target = %ctx.target.kind(),
                instance = instance_id,
                retry = retry_number,
                invocation = %ctx.invocation_id,
            );
            let result = operations::run_relationship(self.cloud, operation, &mut ctx)
                .instrument(span)
                .await;

            self.store.save(instance_id, &ctx.source.props).await?;
            if let Some(id) = target_instance {
                self.store.save(&id, &ctx.target.props).await?;
            }
            return Ok(OperationResult::from_result(result));
        }

        let mut targets = Vec::with_capacity(document.relationships.len());
        for entry in &document.relationships {
            targets.push(match &entry.target_instance {
                Some(id) => Some(self.load(id).await?),
                None => None,
            });
        }
        let mut ctx = document.operation_context(props, &targets, retry_number);

        let span = info_span!(
            "operation",
            op = %operation,
            node = %ctx.node.kind,
            instance = instance_id,
            retry = retry_number,
            invocation = %ctx.invocation_id,
        );
        let result = operations::run_node(self.cloud, operation, &mut ctx)
            .instrument(span)
            .await;
        let result = OperationResult::from_result(result);

        let deleted = operation == Operation::Delete && result == OperationResult::Success;
        if deleted && ctx.props.is_empty() {
            debug!("Removing stored properties of {instance_id}");
            self.store.delete(instance_id).await?;
        } else {
            self.store.save(instance_id, &ctx.props).await?;
        }
        Ok(result)
    }
}
