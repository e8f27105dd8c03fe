//! Invocation strategies
//!
//! How a sealed batch reaches the store is decided once per job from the
//! options and never re-examined in the dispatch path.
//!
//! | Strategy | Option | Remote calls per batch |
//! |---|---|---|
//! | `DirectInsert` | none of the below | one document write set |
//! | `InvokeModule` | `invoke-module-path` | one per item, or one with `invoke-per-batch` |
//! | `EvalScript` | `eval-script-primary` / `eval-script-secondary` | same as `InvokeModule` |

use crate::error::{ConfigurationError, ErrorDetail, FailureKind, RemoteError};
use crate::options::{self, UriSource, WriteOptions};
use crate::store::{
    DocumentStore, DocumentWriteSet, ModuleInvocation, ScriptEvaluation, ScriptLanguage, Variables,
};
use crate::write::batch::SealedBatch;
use crate::write::item::{CodeInvocation, ConvertedItem, Document};
use crate::write::state::DispatchOutcome;

/// Variable binding rules shared by the custom-code strategies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBinding {
    pub external_variable_name: String,
    /// `variable-prefix.*` literals, bound beside per-batch values
    pub user_variables: Variables,
    pub per_batch: bool,
}

impl CodeBinding {
    fn from_options(options: &WriteOptions) -> Self {
        CodeBinding {
            external_variable_name: options.external_variable_name.clone(),
            user_variables: options
                .user_variables
                .iter()
                .map(|(name, value)| (name.clone(), serde_json::Value::String(value.clone())))
                .collect(),
            per_batch: options.invoke_per_batch,
        }
    }

    /// Variables for one call covering every item of a batch.
    ///
    /// String values are joined with `,`; anything else makes the external
    /// variable a JSON array.
    fn batch_variables(&self, invocations: &[&CodeInvocation]) -> Variables {
        let strings: Option<Vec<&str>> = invocations.iter().map(|inv| inv.primary.as_str()).collect();
        let value = match strings {
            Some(parts) => serde_json::Value::String(parts.join(",")),
            None => serde_json::Value::Array(invocations.iter().map(|inv| inv.primary.clone()).collect()),
        };
        let mut variables = self.user_variables.clone();
        variables.insert(self.external_variable_name.clone(), value);
        variables
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationStrategy {
    DirectInsert,
    InvokeModule {
        path: String,
        binding: CodeBinding,
    },
    EvalScript {
        language: ScriptLanguage,
        body: String,
        binding: CodeBinding,
    },
}

impl InvocationStrategy {
    /// Pick the strategy for a job.
    ///
    /// At most one custom-code option may be set, and custom code cannot be
    /// combined with options that only shape documents.
    pub fn resolve(options: &WriteOptions) -> Result<Self, ConfigurationError> {
        let found = options.custom_code_options();
        if found.len() > 1 {
            return Err(ConfigurationError::MutuallyExclusive {
                allowed: options::CUSTOM_CODE_OPTIONS.iter().map(|s| s.to_string()).collect(),
                found: found.iter().map(|s| s.to_string()).collect(),
            });
        }

        let binding = || CodeBinding::from_options(options);
        let strategy = if let Some(path) = &options.invoke_module_path {
            InvocationStrategy::InvokeModule {
                path: path.clone(),
                binding: binding(),
            }
        } else if let Some(body) = &options.eval_script_primary {
            InvocationStrategy::EvalScript {
                language: ScriptLanguage::JavaScript,
                body: body.clone(),
                binding: binding(),
            }
        } else if let Some(body) = &options.eval_script_secondary {
            InvocationStrategy::EvalScript {
                language: ScriptLanguage::XQuery,
                body: body.clone(),
                binding: binding(),
            }
        } else {
            return Ok(InvocationStrategy::DirectInsert);
        };

        let document_only: Vec<&str> = [
            (options::URI_COLUMN, matches!(options.uri, UriSource::Column(_))),
            (options::URI_TEMPLATE, matches!(options.uri, UriSource::Template(_))),
            (options::CONTENT_COLUMN, options.content_column.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
        .collect();
        if !document_only.is_empty() {
            return Err(ConfigurationError::Incompatible(format!(
                "{} cannot be combined with {}",
                document_only.join(", "),
                found.join(", ")
            )));
        }
        Ok(strategy)
    }

    pub fn is_custom_code(&self) -> bool {
        !matches!(self, InvocationStrategy::DirectInsert)
    }

    pub fn name(&self) -> &'static str {
        match self {
            InvocationStrategy::DirectInsert => "direct_insert",
            InvocationStrategy::InvokeModule { .. } => "invoke_module",
            InvocationStrategy::EvalScript { .. } => "eval_script",
        }
    }

    /// Send one batch to the store.
    ///
    /// With `abort_on_failure`, per-item calls stop at the first failure and
    /// the unsent items count as failed; otherwise every item is attempted
    /// and the failed ones counted.
    pub async fn execute<S: DocumentStore>(
        &self,
        batch: &SealedBatch,
        store: &S,
        abort_on_failure: bool,
    ) -> DispatchOutcome {
        match self {
            InvocationStrategy::DirectInsert => insert_documents(batch, store).await,
            InvocationStrategy::InvokeModule { binding, .. }
            | InvocationStrategy::EvalScript { binding, .. } => {
                let invocations = match code_invocations(batch) {
                    Ok(invocations) => invocations,
                    Err(failure) => return DispatchOutcome::failed(batch.id(), failure, 0, batch.len()),
                };
                if binding.per_batch {
                    let variables = binding.batch_variables(&invocations);
                    match self.call(store, variables).await {
                        Ok(()) => DispatchOutcome::succeeded(batch.id(), batch.len()),
                        Err(e) => DispatchOutcome::failed(
                            batch.id(),
                            ErrorDetail::remote(&e, batch.id(), None),
                            0,
                            batch.len(),
                        ),
                    }
                } else {
                    self.call_each(batch.id(), &invocations, store, abort_on_failure)
                        .await
                }
            }
        }
    }

    async fn call_each<S: DocumentStore>(
        &self,
        batch_id: u64,
        invocations: &[&CodeInvocation],
        store: &S,
        abort_on_failure: bool,
    ) -> DispatchOutcome {
        let mut affected = 0;
        let mut failed = 0;
        let mut first_failure = None;
        for invocation in invocations {
            match self.call(store, invocation.variables.clone()).await {
                Ok(()) => affected += 1,
                Err(e) => {
                    failed += 1;
                    tracing::debug!(batch_id, item = %invocation.label(), error = %e, "item_failed");
                    if first_failure.is_none() {
                        first_failure = Some(ErrorDetail::remote(&e, batch_id, Some(invocation.label())));
                    }
                    if abort_on_failure {
                        // Items after the failure are never sent
                        failed = invocations.len() - affected;
                        break;
                    }
                }
            }
        }
        match first_failure {
            None => DispatchOutcome::succeeded(batch_id, affected),
            Some(failure) => DispatchOutcome::failed(batch_id, failure, affected, failed),
        }
    }

    async fn call<S: DocumentStore>(&self, store: &S, variables: Variables) -> Result<(), RemoteError> {
        match self {
            InvocationStrategy::InvokeModule { path, .. } => {
                store
                    .invoke_module(ModuleInvocation {
                        module_path: path.clone(),
                        variables,
                    })
                    .await
            }
            InvocationStrategy::EvalScript {
                language,
                body,
                binding,
            } => {
                store
                    .eval_script(ScriptEvaluation {
                        language: *language,
                        script: body.clone(),
                        variables,
                        external_variable_name: binding.external_variable_name.clone(),
                    })
                    .await
            }
            InvocationStrategy::DirectInsert => Err(RemoteError::new(
                "direct insert strategy cannot run custom code",
            )),
        }
    }
}

async fn insert_documents<S: DocumentStore>(batch: &SealedBatch, store: &S) -> DispatchOutcome {
    let mut documents: Vec<Document> = Vec::with_capacity(batch.len());
    for item in batch.items() {
        match item {
            ConvertedItem::Document(document) => documents.push(document.clone()),
            ConvertedItem::Invocation(invocation) => {
                let failure = mismatched_item(batch.id(), invocation.label(), "code invocation", "direct insert");
                return DispatchOutcome::failed(batch.id(), failure, 0, batch.len());
            }
        }
    }
    let first_uri = documents.first().map(|d| d.uri.clone());
    match store.write_documents(DocumentWriteSet { documents }).await {
        Ok(written) => DispatchOutcome::succeeded(batch.id(), written),
        Err(e) => DispatchOutcome::failed(
            batch.id(),
            ErrorDetail::remote(&e, batch.id(), first_uri),
            0,
            batch.len(),
        ),
    }
}

fn code_invocations(batch: &SealedBatch) -> Result<Vec<&CodeInvocation>, ErrorDetail> {
    batch
        .items()
        .iter()
        .map(|item| match item {
            ConvertedItem::Invocation(invocation) => Ok(invocation),
            ConvertedItem::Document(document) => Err(mismatched_item(
                batch.id(),
                document.uri.clone(),
                "document",
                "custom code",
            )),
        })
        .collect()
}

fn mismatched_item(batch_id: u64, label: String, item: &str, strategy: &str) -> ErrorDetail {
    ErrorDetail {
        kind: FailureKind::Conversion,
        message: format!("{item} items cannot be sent with the {strategy} strategy"),
        batch_id: Some(batch_id),
        item: Some(label),
    }
}
