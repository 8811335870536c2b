//! Standard metric names following OpenTelemetry semantic conventions
//! See: https://opentelemetry.io/docs/specs/semconv/http/http-metrics/

/// HTTP server request duration in milliseconds
/// Note: Histograms automatically provide count and sum, so a separate counter is not needed
pub const HTTP_SERVER_REQUEST_DURATION: &str = "http.server.request.duration";

/// LLM operation duration in milliseconds
/// Tracks the total duration of LLM chat completion operations
/// Follows OpenTelemetry GenAI semantic conventions
pub const GEN_AI_CLIENT_OPERATION_DURATION: &str = "gen_ai.client.operation.duration";

pub const GEN_AI_CLIENT_TOKEN_USAGE: &str = "gen_ai.client.token.usage";

/// LLM input token usage counter
/// Tracks cumulative input token consumption for LLM operations
pub const GEN_AI_CLIENT_INPUT_TOKEN_USAGE: &str = "gen_ai.client.input.token.usage";

/// LLM output token usage counter
/// Tracks cumulative output token consumption for LLM operations
pub const GEN_AI_CLIENT_OUTPUT_TOKEN_USAGE: &str = "gen_ai.client.output.token.usage";

/// LLM total token usage counter
/// Tracks cumulative total token consumption for LLM operations (input + output)
pub const GEN_AI_CLIENT_TOTAL_TOKEN_USAGE: &str = "gen_ai.client.total.token.usage";

/// Time to first token
/// Tracks the duration until the first token is received in a streaming response
pub const GEN_AI_CLIENT_TIME_TO_FIRST_TOKEN: &str = "gen_ai.client.time_to_first_token";

/// Upstream accounts currently marked rate-limited
/// Gauge tracking accounts excluded from selection by the rate-limit collaborator
pub const LLM_RATE_LIMITED_ACCOUNTS: &str = "gen_ai.rate_limited_accounts";
