pub mod affinity;
pub mod strategy;
