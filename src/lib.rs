pub use crate::{
    error::IssuerError,
    issuer::{ensure_active_invite_link, IssueOutcome, IssuedInvite},
};

pub mod config;
pub mod error;
pub mod issuer;
pub mod link;
pub mod model;
pub mod report;
pub mod store;
pub mod token;
