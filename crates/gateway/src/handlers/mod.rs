//! API handlers module

pub mod applications;
pub mod commissions;
pub mod forms;
pub mod health;
pub mod insertions;
