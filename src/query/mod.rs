pub mod ast;
pub mod cache;
pub mod parser;
pub mod planner;
