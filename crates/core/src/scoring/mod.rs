pub mod batch;
pub mod engine;

pub use batch::{BatchOutcome, BatchScorer, MarketSnapshot, ScoreFailure, UserScoreOutcome};
pub use engine::{score_assets, ScoringInputs};
