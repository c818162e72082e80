pub mod complexity;
pub mod engine;
pub mod prompts;

pub use engine::Optimizer;
