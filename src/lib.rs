//! DCA Risk Engine
//!
//! Position averaging and dynamic risk sizing for host-driven trading bots.
//! The host owns exchange access and order execution; this crate answers its
//! callbacks (leverage, stake, averaging, exits) and keeps per-trade state.

pub mod config;
pub mod data;
pub mod error;
pub mod frame;
pub mod host;
pub mod indicators;
pub mod risk;
pub mod simulation;
pub mod state;
pub mod state_manager;
pub mod strategies;
pub mod types;

pub use config::Config;
pub use error::{EngineError, EngineResult};
pub use strategies::{daily_buy, Strategy};
pub use types::*;
