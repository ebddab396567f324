pub mod jsonl_loader;

pub use jsonl_loader::{load_tasks_from_jsonl, parse_jsonl};
