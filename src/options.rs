//! Connector Options
//!
//! Per-job options arrive from the host engine as a flat string map. This
//! module recognizes the keys the connector understands, validates them and
//! falls back to the process-level [`Config`](crate::config::Config)
//! defaults. Unknown keys are ignored: host engines pass their own options
//! through the same map.

use crate::config::{ReadDefaults, WriteDefaults};
use crate::error::ConfigurationError;
use crate::write::convert::UriTemplate;
use crate::write::item::{DocumentFormat, Permission};
use std::collections::{BTreeMap, BTreeSet};

/// Raw option map as handed over by the host engine
pub type OptionMap = BTreeMap<String, String>;

// Custom code (mutually exclusive)
pub const INVOKE_MODULE_PATH: &str = "invoke-module-path";
pub const EVAL_SCRIPT_PRIMARY: &str = "eval-script-primary";
pub const EVAL_SCRIPT_SECONDARY: &str = "eval-script-secondary";
pub const EXTERNAL_VARIABLE_NAME: &str = "external-variable-name";
pub const VARIABLE_PREFIX: &str = "variable-prefix.";
pub const INVOKE_PER_BATCH: &str = "invoke-per-batch";

// Dispatch
pub const ABORT_ON_FAILURE: &str = "abort-on-failure";
pub const BATCH_SIZE: &str = "batch-size";
pub const THREAD_COUNT: &str = "thread-count";

// Documents
pub const URI_COLUMN: &str = "uri-column";
pub const URI_TEMPLATE: &str = "uri-template";
pub const URI_PREFIX: &str = "uri-prefix";
pub const URI_SUFFIX: &str = "uri-suffix";
pub const CONTENT_COLUMN: &str = "content-column";
pub const DOCUMENT_FORMAT: &str = "document-format";
pub const COLLECTIONS: &str = "collections";
pub const PERMISSIONS: &str = "permissions";

// Reads
pub const OPTIC_QUERY: &str = "optic-query";
pub const PUSH_DOWN_FILTERS: &str = "push-down-filters";

/// Options that select custom-code mode; at most one may be set
pub const CUSTOM_CODE_OPTIONS: [&str; 3] =
    [INVOKE_MODULE_PATH, EVAL_SCRIPT_PRIMARY, EVAL_SCRIPT_SECONDARY];

/// How a document URI is obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UriSource {
    /// Read from a string column
    Column(String),
    /// Substitute `{column}` placeholders
    Template(UriTemplate),
    /// Random UUID
    Generated,
}

/// Validated write-job options
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub invoke_module_path: Option<String>,
    pub eval_script_primary: Option<String>,
    pub eval_script_secondary: Option<String>,
    pub external_variable_name: String,
    /// Literal variables from `variable-prefix.*`, prefix stripped
    pub user_variables: BTreeMap<String, String>,
    pub invoke_per_batch: bool,

    pub abort_on_failure: bool,
    pub batch_size: usize,
    /// Effective dispatcher width (never 0)
    pub thread_count: usize,

    pub uri: UriSource,
    pub uri_prefix: Option<String>,
    pub uri_suffix: Option<String>,
    pub content_column: Option<String>,
    pub format: DocumentFormat,
    pub collections: BTreeSet<String>,
    pub permissions: BTreeSet<Permission>,
}

impl WriteOptions {
    /// Parse and validate options against process defaults
    pub fn parse(options: &OptionMap, defaults: &WriteDefaults) -> Result<Self, ConfigurationError> {
        let non_empty = |key: &str| {
            options
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let user_variables = options
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(VARIABLE_PREFIX)
                    .filter(|name| !name.is_empty())
                    .map(|name| (name.to_string(), value.clone()))
            })
            .collect();

        let batch_size = match options.get(BATCH_SIZE) {
            Some(raw) => parse_positive(BATCH_SIZE, raw)?,
            None => defaults.batch_size,
        };
        if batch_size == 0 {
            return Err(invalid(BATCH_SIZE, "0", "must be at least 1"));
        }

        let thread_count = match options.get(THREAD_COUNT) {
            Some(raw) => parse_positive(THREAD_COUNT, raw)?,
            None => defaults.effective_thread_count(),
        };

        let uri_column = non_empty(URI_COLUMN);
        let uri_template = non_empty(URI_TEMPLATE);
        let uri = match (uri_column, uri_template) {
            (Some(_), Some(_)) => {
                return Err(ConfigurationError::MutuallyExclusive {
                    allowed: vec![URI_COLUMN.to_string(), URI_TEMPLATE.to_string()],
                    found: vec![URI_COLUMN.to_string(), URI_TEMPLATE.to_string()],
                })
            }
            (Some(column), None) => UriSource::Column(column),
            (None, Some(template)) => UriSource::Template(
                UriTemplate::parse(&template)
                    .map_err(|reason| invalid(URI_TEMPLATE, &template, &reason))?,
            ),
            (None, None) => UriSource::Generated,
        };

        let format = match non_empty(DOCUMENT_FORMAT) {
            Some(raw) => raw
                .parse::<DocumentFormat>()
                .map_err(|reason| invalid(DOCUMENT_FORMAT, &raw, &reason))?,
            None => DocumentFormat::Json,
        };
        let content_column = non_empty(CONTENT_COLUMN);
        if content_column.is_none() && format != DocumentFormat::Json {
            return Err(ConfigurationError::Incompatible(format!(
                "{DOCUMENT_FORMAT}={format} requires {CONTENT_COLUMN}; rows without a content column are serialized as JSON"
            )));
        }

        let collections = non_empty(COLLECTIONS)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let permissions = match non_empty(PERMISSIONS) {
            Some(raw) => {
                Permission::parse_list(&raw).map_err(|reason| invalid(PERMISSIONS, &raw, &reason))?
            }
            None => BTreeSet::new(),
        };

        Ok(WriteOptions {
            invoke_module_path: non_empty(INVOKE_MODULE_PATH),
            eval_script_primary: non_empty(EVAL_SCRIPT_PRIMARY),
            eval_script_secondary: non_empty(EVAL_SCRIPT_SECONDARY),
            external_variable_name: non_empty(EXTERNAL_VARIABLE_NAME)
                .unwrap_or_else(|| defaults.external_variable_name.clone()),
            user_variables,
            invoke_per_batch: parse_bool(options, INVOKE_PER_BATCH, false)?,
            abort_on_failure: parse_bool(options, ABORT_ON_FAILURE, defaults.abort_on_failure)?,
            batch_size,
            thread_count,
            uri,
            uri_prefix: options.get(URI_PREFIX).cloned(),
            uri_suffix: options.get(URI_SUFFIX).cloned(),
            content_column,
            format,
            collections,
            permissions,
        })
    }

    /// Names of the custom-code options that are set
    pub fn custom_code_options(&self) -> Vec<&'static str> {
        let set = [
            self.invoke_module_path.is_some(),
            self.eval_script_primary.is_some(),
            self.eval_script_secondary.is_some(),
        ];
        CUSTOM_CODE_OPTIONS
            .iter()
            .zip(set)
            .filter_map(|(name, present)| present.then_some(*name))
            .collect()
    }

    /// Whether rows become custom-code invocations rather than documents
    pub fn is_custom_code(&self) -> bool {
        !self.custom_code_options().is_empty()
    }
}

/// Validated read-job options
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Base query the translated filters are appended to
    pub optic_query: String,
    pub push_down_filters: bool,
}

impl ReadOptions {
    pub fn parse(options: &OptionMap, defaults: &ReadDefaults) -> Result<Self, ConfigurationError> {
        let optic_query = options
            .get(OPTIC_QUERY)
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ConfigurationError::MissingOption(OPTIC_QUERY.to_string()))?;
        Ok(ReadOptions {
            optic_query,
            push_down_filters: parse_bool(options, PUSH_DOWN_FILTERS, defaults.push_down_filters)?,
        })
    }
}

fn parse_bool(options: &OptionMap, key: &str, default: bool) -> Result<bool, ConfigurationError> {
    match options.get(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(invalid(key, raw, "expected true or false")),
        },
    }
}

fn parse_positive(key: &str, raw: &str) -> Result<usize, ConfigurationError> {
    match raw.trim().parse::<usize>() {
        Ok(0) => Err(invalid(key, raw, "must be at least 1")),
        Ok(n) => Ok(n),
        Err(e) => Err(invalid(key, raw, &e.to_string())),
    }
}

fn invalid(option: &str, value: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        option: option.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
