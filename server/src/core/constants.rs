//! App-wide constants and environment variable names.

pub const APP_NAME: &str = "tracewatch";
pub const APP_NAME_LOWER: &str = "tracewatch";

// Ambient config (SPEC_FULL.md "Ambient configuration")
pub const ENV_LOG: &str = "LOG_LEVEL";
pub const ENV_BIND_ADDRESS: &str = "BIND_ADDRESS";
pub const ENV_SHUTDOWN_TIMEOUT_SECS: &str = "SHUTDOWN_TIMEOUT_SECS";
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
/// Request body size cap for the triage API (§6); the chat callback's form
/// body is the largest payload this service accepts.
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

// Cache (C13)
pub const ENV_CACHE_BACKEND: &str = "CACHE_BACKEND";
pub const ENV_USE_DOGPILE_CACHE: &str = "USE_DOGPILE_CACHE";
pub const DEFAULT_CACHE_MAX_ENTRIES: u64 = 100_000;
/// Cache key schema version, bumped on key-shape changes so a deploy can
/// invalidate everything at once just by changing this constant.
pub const CACHE_KEY_VERSION: &str = "v1";

// Store / search index (C7)
pub const ENV_ES_ADDRESS: &str = "ES_ADDRESS";
pub const ENV_REDIS_ADDRESS: &str = "REDIS_ADDRESS";

// Object storage (C5)
pub const ENV_S3_BUCKET: &str = "S3_BUCKET";
pub const ENV_S3_KEY_PREFIX: &str = "S3_KEY_PREFIX";
pub const ENV_AWS_REGION: &str = "AWS_REGION";
pub const ENV_AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const ENV_AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";

// Ticket tracker (C10)
pub const ENV_JIRA_SERVER: &str = "JIRA_SERVER";
pub const ENV_JIRA_BASIC_AUTH_USERNAME: &str = "JIRA_BASIC_AUTH_USERNAME";
pub const ENV_JIRA_BASIC_AUTH_PASSWORD: &str = "JIRA_BASIC_AUTH_PASSWORD";
pub const ENV_JIRA_PROJECT_KEY: &str = "JIRA_PROJECT_KEY";
pub const ENV_JIRA_ASSIGNEE_ADWORDS: &str = "JIRA_ASSIGNEE_ADWORDS";
pub const ENV_JIRA_ASSIGNEE_BING: &str = "JIRA_ASSIGNEE_BING";
pub const ENV_JIRA_ASSIGNEE_SOCIAL: &str = "JIRA_ASSIGNEE_SOCIAL";
pub const ENV_JIRA_ASSIGNEE_GRADER: &str = "JIRA_ASSIGNEE_GRADER";

// Chat (C12)
pub const ENV_SLACK_WEBHOOK_TRACEBACKS: &str = "SLACK_WEBHOOK_TRACEBACKS";
pub const ENV_SLACK_WEBHOOK_TRACEBACKS_ADWORDS: &str = "SLACK_WEBHOOK_TRACEBACKS_ADWORDS";
pub const ENV_SLACK_WEBHOOK_TRACEBACKS_SOCIAL: &str = "SLACK_WEBHOOK_TRACEBACKS_SOCIAL";
pub const ENV_SLACK_REAL_USER_TOKEN: &str = "SLACK_REAL_USER_TOKEN";

// Realtime ingestor (C6)
pub const ENV_PAPERTRAIL_API_TOKEN: &str = "PAPERTRAIL_API_TOKEN";

// Misc / UI links, passed through untouched by the core
pub const ENV_KIBANA_REDIRECT_URL: &str = "KIBANA_REDIRECT_URL";
pub const ENV_PRODUCT_URL: &str = "PRODUCT_URL";

pub const ENV_DEBUG_LOGGING: &str = "DEBUG_LOGGING";

/// `SeenTracebackFlag` TTL (§3), two days.
pub const SEEN_TRACEBACK_TTL_SECS: u64 = 60 * 60 * 24 * 2;

/// Cache region entry TTL / safety TTL (§4.13): 15 minutes soft, 20 minutes hard.
pub const CACHE_SOFT_TTL_SECS: u64 = 15 * 60;
pub const CACHE_HARD_TTL_SECS: u64 = 20 * 60;

/// Ring buffer capacity for TracebackAssembler (§4.2).
pub const RING_CAPACITY: usize = 10_000;
/// Max context lines walked backward per origin (§4.2).
pub const MAX_CONTEXT_LINES: usize = 50;

/// Display timezone all timestamps are normalized to (§1, Glossary).
pub const DISPLAY_ZONE: chrono_tz::Tz = chrono_tz::America::New_York;
