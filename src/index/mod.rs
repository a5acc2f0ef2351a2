pub mod doc_table;
pub mod persistent_map;
pub mod posting;
pub mod posting_store;
