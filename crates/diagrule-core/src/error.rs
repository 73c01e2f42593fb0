use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("action {action_index} failed: {message}")]
    ActionFailed { action_index: usize, message: String },

    #[error("operation was cancelled")]
    Cancelled,

    #[error("duplicate action name '{name}' in rule '{rule}'")]
    DuplicateActionName { rule: String, name: String },

    #[error("unknown action type: {0}")]
    UnknownActionType(String),

    #[error("unknown trigger type: {0}")]
    UnknownTriggerType(String),

    #[error("action type '{action_type}' does not accept {settings} settings")]
    UnsupportedSettings {
        action_type: String,
        settings: String,
    },

    #[error("invalid settings for '{type_name}': {reason}")]
    InvalidSettings { type_name: String, reason: String },

    #[error("invalid limits for rule '{rule}': {reason}")]
    InvalidLimits { rule: String, reason: String },

    #[error("rule '{0}' is already running")]
    AlreadyRunning(String),

    #[error("rule not found: {0}")]
    RuleNotFound(String),

    #[error("trigger error: {0}")]
    Trigger(String),

    #[error("action error: {0}")]
    Action(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl RuleError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RuleError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
