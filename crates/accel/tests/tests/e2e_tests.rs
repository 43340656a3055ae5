#[path = "e2e/allocation.rs"]
mod allocation;

#[path = "e2e/monitoring.rs"]
mod monitoring;

#[path = "e2e/recovery.rs"]
mod recovery;
