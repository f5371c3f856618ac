// Agent definitions
pub mod agent;

// Agent discovery and catalog
pub mod discovery;

// Virtual-clock timer queue
pub mod scheduler;

// Per-stage state
pub mod stage;

// Approval checkpoint
pub mod approval;

// Run state machine
pub mod controller;

// Finished-run records and agent metrics
pub mod history;

// Tokio service driving a controller in real time
pub mod runtime;

// Environment configuration
pub mod config;

// Ask-AI assistant
pub mod chat;

// Command-line arguments
pub mod cli;
