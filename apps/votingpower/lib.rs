pub mod aggregator;
pub mod config;
pub mod errors;
pub mod fetchers;
pub mod models;
pub mod renderer;
pub mod report;
pub mod telegram;

/// Decimals of the governance token; every amount on the wire is scaled by 10^18.
pub const TOKEN_DECIMALS: u32 = 18;
pub const BASE_UNITS_PER_TOKEN: u128 = 10u128.pow(TOKEN_DECIMALS);
