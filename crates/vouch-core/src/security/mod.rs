//! Pre-publish gate: nothing leaves the engine into public records while it
//! still carries a credential.

pub mod secrets;

pub use secrets::{PublishGate, SecretScanner, REDACTED_PLACEHOLDER};
