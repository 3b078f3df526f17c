pub mod schedule;
pub mod simulate;
pub mod variants;
