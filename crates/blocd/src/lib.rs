pub mod cli;
pub mod commands;
pub mod harness;
pub mod logging;
pub mod notify;
pub mod pipeline;
pub mod report;
