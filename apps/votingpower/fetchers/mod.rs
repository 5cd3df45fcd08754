pub mod activity;
pub mod ens;

pub use activity::{ActivityFeed, VotingPowerApi};
pub use ens::{EnsResolver, IdentityResolver};
