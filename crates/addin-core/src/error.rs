//! Error taxonomy for the add-in tree.
//!
//! Every variant except [`AddInError::Other`] is a configuration error the
//! host is expected to treat as unrecoverable. Recoverable conditions (an
//! unknown `insertbefore`/`insertafter` reference, a failing autostart command)
//! are logged and never surface here.

/// Errors produced while loading or building the add-in tree.
#[derive(Debug, thiserror::Error)]
pub enum AddInError {
    #[error("doozer {name} not found for codon {codon}")]
    DoozerNotFound { name: String, codon: String },

    #[error("condition evaluator {name} not found")]
    EvaluatorNotFound { name: String },

    #[error("condition evaluator {name} failed: {source}")]
    EvaluatorFailed {
        name: String,
        #[source]
        source: Box<AddInError>,
    },

    #[error("add-in '{from}' referenced by runtime {runtime} does not exist")]
    AddInNotFound { from: String, runtime: String },

    #[error("runtime {runtime} does not exist in add-in {add_in}")]
    RuntimeNotFound { runtime: String, add_in: String },

    #[error("runtime references form a cycle: {chain:?}")]
    RuntimeReferenceCycle { chain: Vec<String> },

    #[error("<{element}> requires attribute '{attribute}'")]
    MissingAttribute { element: String, attribute: String },

    #[error("<{element}> attribute '{attribute}' is invalid: {reason}")]
    InvalidAttribute {
        element: String,
        attribute: String,
        reason: String,
    },

    #[error("invalid element <{element}> inside <{parent}>; expected {expected}")]
    InvalidConditionElement {
        element: String,
        parent: String,
        expected: String,
    },

    #[error("invalid condition: {reason}")]
    InvalidCondition { reason: String },

    #[error("invalid node path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("there is no codon in node [{path}]")]
    NoCodons { path: String },

    #[error("node not found: {path}")]
    NodeNotFound { path: String },

    #[error("insertbefore/insertafter references form a cycle in [{path}]: {codons:?}")]
    OrderingCycle { path: String, codons: Vec<String> },

    #[error("failed to load module {locator}: {reason}")]
    ModuleLoad { locator: String, reason: String },

    #[error("cannot load {kind} {name} from export '{point}' of runtime {runtime}")]
    ExportNotFound {
        kind: String,
        name: String,
        point: String,
        runtime: String,
    },

    #[error("declaration document has no <AddIn> element")]
    MissingAddInElement,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AddInError {
    pub(crate) fn missing_attribute(element: &str, attribute: &str) -> Self {
        Self::MissingAttribute {
            element: element.to_string(),
            attribute: attribute.to_string(),
        }
    }
}

/// Result type for add-in tree operations.
pub type Result<T> = std::result::Result<T, AddInError>;
