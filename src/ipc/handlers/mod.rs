pub mod attendance;
pub mod backup_exchange;
pub mod classes;
pub mod core;
pub mod results;
pub mod roster;
pub mod scores;
