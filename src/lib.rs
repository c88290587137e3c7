pub mod about;
pub mod annotate;
pub mod color;
pub mod engine;
pub mod engine_shell;
pub mod error;
pub mod export;
pub mod heatmap;
pub mod label_codec;
pub mod newick;
pub mod query;
pub mod range;
pub mod subset;
pub mod table;
