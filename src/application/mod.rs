pub mod body;
pub mod builders;
pub mod eval;
pub mod runner;
pub mod services;
