//! Override requests: validation, lifecycle and authority.

mod error;
mod justification;
mod manager;
mod principal;

pub use error::{OverrideError, OverrideResult};
pub use justification::{JustificationPolicy, DEFAULT_MIN_DISTINCT_WORDS, DEFAULT_MIN_LENGTH};
pub use manager::{
    EmergencyPolicy, OverrideManager, OverrideSettings, OverrideSnapshot, OverrideTicket,
};
pub use principal::{Grant, Principal, PrincipalDirectory};
pub(crate) use manager::latest_per_check;
