//! Data transfer objects received from external collaborators.

pub mod deal;
