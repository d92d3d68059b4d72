//! Subcommand implementations for the recaptcha-challenger binary.

pub mod challenge_cmd;
pub mod info_cmd;
pub mod install_cmd;
