pub mod extraction;
pub mod prompt_loader;
pub mod rate_limiter;
pub mod result_sink;
pub mod rule_judge;

pub use extraction::{JudgementExtractor, ResponseExtractor, TagExtractor};
pub use prompt_loader::PromptLoader;
pub use rate_limiter::RateLimiter;
pub use result_sink::ResultSink;
pub use rule_judge::{IntoScore, Rule, RuleJudge, RuleSet};
