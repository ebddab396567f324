pub mod loaders;
pub mod record;
pub mod task;

pub use loaders::load_tasks_from_jsonl;
pub use record::{ModelJudgement, ResultRecord, RuleScores};
pub use task::Task;
