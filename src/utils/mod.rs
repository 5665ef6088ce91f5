//! Small serde helpers shared across the wire types.

pub mod time;
