use thiserror::Error;

/// Everything that can make a configuration unusable.
///
/// These are raised while loading and compiling, before a rule set is
/// evaluated or a resource graph is emitted. Messages name the offending
/// rule or field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),

    #[error("{field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("rule '{rule}': priority {priority} is outside 1..=50000")]
    PriorityOutOfRange { rule: String, priority: i64 },

    #[error("rule '{rule}': priority must be a positive integer or \"default\", got \"{value}\"")]
    BadPriority { rule: String, value: String },

    #[error("rules '{first}' and '{second}' share priority {priority}")]
    DuplicatePriority {
        priority: u32,
        first: String,
        second: String,
    },

    #[error("rule id '{0}' is used more than once")]
    DuplicateRuleId(String),

    #[error("rule set has no default rule (priority: default)")]
    MissingDefault,

    #[error("rule set has more than one default rule: '{first}' and '{second}'")]
    MultipleDefaults { first: String, second: String },

    #[error("default rule '{0}' must not have conditions")]
    DefaultWithConditions(String),

    #[error("rule '{0}' has no conditions; only the default rule may be unconditional")]
    MissingConditions(String),

    #[error("rule '{rule}': {field} must list between 1 and {max} values")]
    ConditionValues {
        rule: String,
        field: &'static str,
        max: usize,
    },

    #[error("rule '{rule}': invalid {field} '{pattern}': {reason}")]
    InvalidPattern {
        rule: String,
        field: &'static str,
        pattern: String,
        reason: String,
    },

    #[error("rule '{rule}': unknown target '{target}'")]
    UnknownTarget { rule: String, target: String },

    #[error("rule '{rule}': unknown identity provider '{provider}'")]
    UnknownProvider { rule: String, provider: String },

    #[error("rule '{0}': authenticate cannot wrap another authenticate action")]
    NestedAuthenticate(String),

    #[error("rule '{0}': authenticate actions require stack.enable_auth")]
    AuthDisabled(String),

    #[error("rule '{rule}': {action}.{field}: {reason}")]
    BadAction {
        rule: String,
        action: &'static str,
        field: &'static str,
        reason: String,
    },

    #[error("resource '{resource}' references unknown resource '{target}'")]
    DanglingReference { resource: String, target: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
