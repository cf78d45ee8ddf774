pub mod command;
pub mod reader;
pub mod runner;
