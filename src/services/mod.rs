pub mod cache;
pub mod inventory;
pub mod lookup;
pub mod merger;
pub mod optimizer;
pub mod providers;
pub mod queue;
pub mod scan;
pub mod validation;
