/// Path appended to a peer endpoint for envelope delivery.
pub const EXCHANGE_PATH: &str = "/agent_exchange";

/// Error code returned when an envelope names a kind this node does not speak.
pub const UNSUPPORTED_KIND: &str = "unsupported_kind";

/// Error code returned when the request body is not valid JSON.
pub const INVALID_JSON: &str = "invalid_json";

/// Prefix marking a vote produced by a failed local execution.
pub const EXECUTOR_ERROR_MARKER: &str = "⚠️ executor error:";

/// Prefix of the default consensus header line.
pub const CONSENSUS_HEADER_MARKER: &str = "🤝";

/// Header used when neither a title nor a task description is known.
pub const DEFAULT_CONSENSUS_HEADER: &str = "Consensus result";

/// Body used when a consensus is rendered without any responses.
pub const EMPTY_CONSENSUS_BODY: &str = "(no responses)";
