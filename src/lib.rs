pub mod ids;
pub mod graph;
pub mod builder;
pub mod logging;
