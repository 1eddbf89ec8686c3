mod power_monitor;

pub use power_monitor::*;
