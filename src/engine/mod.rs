pub mod debt_monitor;
pub mod directory;
pub mod dispatch;
pub mod lifecycle;
pub mod locks;
pub mod scoring;
pub mod settlement;
