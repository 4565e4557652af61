use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    // ---------- configuration ----------
    #[error("unsupported effect: {0}")]
    #[diagnostic(
        code(castellan::model::unsupported_effect),
        help("Use one of: some(where (p_eft == allow)), !some(where (p_eft == deny)), some(where (p_eft == allow)) && !some(where (p_eft == deny)), priority(p_eft) || deny, subjectPriority(p_eft) || deny, rate_limit(max, unit, countType, bucket)")
    )]
    UnsupportedEffect(String),

    #[error("invalid rate_limit expression: {0}")]
    #[diagnostic(
        code(castellan::effect::invalid_rate_limit),
        help("Syntax: rate_limit(max, unit, countType, bucket) with unit in second|minute|hour|day, countType in allow|all, bucket in all|sub|obj|act")
    )]
    InvalidRateLimit(String),

    #[error("error: domain should be 1 parameter")]
    #[diagnostic(
        code(castellan::rbac::domain_arity),
        help("Role links accept at most one domain argument")
    )]
    DomainArity,

    #[error("missing required sections: {0}")]
    #[diagnostic(
        code(castellan::model::missing_sections),
        help("A model needs [request_definition], [policy_definition], [policy_effect] and [matchers]")
    )]
    MissingSections(String),

    #[error("the number of \"_\" in role definition `{0}` should be at least 2")]
    #[diagnostic(
        code(castellan::model::role_definition_arity),
        help("Role definitions look like: g = _, _ or g = _, _, _ for domains")
    )]
    RoleDefinitionArity(String),

    #[error("grouping policy elements do not meet role definition: {0}")]
    #[diagnostic(code(castellan::model::grouping_rule_arity))]
    GroupingRuleArity(String),

    #[error("invalid model: {0}")]
    #[diagnostic(
        code(castellan::model::invalid),
        help("Check section headers and `key = value` lines in the model text")
    )]
    InvalidModel(String),

    #[error("unknown token `{0}`")]
    #[diagnostic(
        code(castellan::model::unknown_token),
        help("Tokens are formed from the definitions, e.g. r.sub or p_obj")
    )]
    UnknownToken(String),

    #[error("invalid request size: expected {expected}, got {got} (rvals: {rvals})")]
    #[diagnostic(code(castellan::enforce::request_size))]
    InvalidRequestSize {
        expected: usize,
        got: usize,
        rvals: String,
    },

    #[error("field index {index} out of range for `{ptype}` with {width} fields")]
    #[diagnostic(
        code(castellan::store::field_index),
        help("Filter values must fit within the policy definition starting at the field index")
    )]
    FieldIndexOutOfRange {
        ptype: String,
        index: usize,
        width: usize,
    },

    #[error("constraint parsing error: {0}")]
    #[diagnostic(
        code(castellan::constraint::parse),
        help("Supported constraints: sod(\"a\", \"b\"), sodMax([\"a\", \"b\"], n), roleMax(\"a\", n), rolePre(\"a\", \"b\")")
    )]
    ConstraintParse(String),

    #[error("constraints require a role definition (g) in the model")]
    #[diagnostic(code(castellan::constraint::requires_rbac))]
    ConstraintRequiresRbac,

    // ---------- state ----------
    #[error("role manager cannot be nil")]
    #[diagnostic(
        code(castellan::rbac::missing_role_manager),
        help("Detectors need the role manager of a defined grouping type (g, g2, ...)")
    )]
    RoleManagerMissing,

    #[error("role manager cannot enumerate its links")]
    #[diagnostic(
        code(castellan::rbac::cannot_enumerate),
        help("Cycle detectors need a role manager that implements `Enumerable`")
    )]
    CannotEnumerate,

    #[error("error: name does not exist")]
    #[diagnostic(code(castellan::rbac::name_not_found))]
    NameNotFound,

    #[error("cycle detected: {0}")]
    #[diagnostic(
        code(castellan::rbac::cycle),
        help("Role inheritance must form a DAG; remove one of the links in the reported path")
    )]
    CycleDetected(String),

    #[error("effect conflict detected: {0}")]
    #[diagnostic(code(castellan::detector::effect_conflict))]
    EffectConflict(String),

    #[error("policy not found: {0}")]
    #[diagnostic(code(castellan::store::policy_not_found))]
    PolicyNotFound(String),

    #[error("policy type `{sec}.{ptype}` is not defined in the model")]
    #[diagnostic(code(castellan::model::undefined_ptype))]
    UndefinedPolicyType { sec: String, ptype: String },

    // ---------- evaluation ----------
    #[error("invalid matcher expression: {0}")]
    #[diagnostic(
        code(castellan::matcher::invalid),
        help("Supported operators: ==, !=, >, <, >=, <=, &&, ||, !, in, + - * / %. Calls use name(args)")
    )]
    InvalidMatcher(String),

    #[error("evaluation error: {0}")]
    #[diagnostic(code(castellan::matcher::evaluation))]
    Evaluation(String),

    // ---------- constraint ----------
    #[error("constraint violation [{key}]: {message}")]
    #[diagnostic(code(castellan::constraint::violation))]
    ConstraintViolation { key: String, message: String },

    // ---------- boundary ----------
    #[error("adapter error: {0}")]
    #[diagnostic(code(castellan::persist::adapter))]
    Adapter(String),

    #[error("not implemented")]
    #[diagnostic(code(castellan::persist::not_implemented))]
    AdapterNotImplemented,

    #[error("watcher error: {0}")]
    #[diagnostic(code(castellan::persist::watcher))]
    Watcher(String),

    #[error("Failed to load model file `{path}`")]
    #[diagnostic(
        code(castellan::model::load),
        help("Check that the model file exists and is readable")
    )]
    ModelLoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load policy file `{path}`")]
    #[diagnostic(
        code(castellan::persist::policy_load),
        help("Check that the file exists and contains valid KDL syntax")
    )]
    PolicyLoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("KDL parse error: {0}")]
    #[diagnostic(
        code(castellan::persist::kdl_parse),
        help("Policy files hold one rule per node, e.g. p \"alice\" \"data1\" \"read\"")
    )]
    KdlParse(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(castellan::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(castellan::config))]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, AuthzError>;
