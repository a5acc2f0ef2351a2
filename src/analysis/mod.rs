pub mod analyzer;
pub mod filter;
pub mod filters;
pub mod structural;
pub mod token;
pub mod tokenizer;
