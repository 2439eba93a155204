pub mod engine;
pub mod plurality;
pub mod rate_limit;

pub use engine::VoteEngine;
pub use rate_limit::AccessGate;
