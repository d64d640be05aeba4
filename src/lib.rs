//! Genome hierarchy model for gene-regulatory network diagrams.
//!
//! A [`source::GenomeSource`] owns one root genome (the canonical genes,
//! nodes and links), a tree of instance models that place subsets of those
//! items into regions, and dynamic proxies whose per-hour models are derived
//! lazily from expression data.

pub mod change;
pub mod config;
pub mod csv_build;
pub mod db_genome;
pub mod domain;
pub mod dynamic;
pub mod error;
pub mod expression;
pub mod graph;
pub mod group;
pub mod images;
pub mod instance;
pub mod items;
pub mod labeller;
pub mod legacy;
pub mod navigation;
pub mod oracle;
pub mod overlay;
pub mod proxy;
pub mod region;
pub mod report;
pub mod source;
pub mod store;
pub mod xml;
