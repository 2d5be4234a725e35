mod drop;

pub use drop::*;
