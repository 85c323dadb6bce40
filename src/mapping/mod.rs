pub mod engine;
pub mod tables;

pub use engine::{map_market, MappedMarket, RawMarket, RawOutcome, Unmappable, UnmappableReason};
pub use tables::MappingTables;
