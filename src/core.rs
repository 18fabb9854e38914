pub mod engine;
pub mod optimizer;
pub mod rate;
pub mod schedule;
pub mod windchill;
