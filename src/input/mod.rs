//! Event sources for the beat

pub mod okta;
