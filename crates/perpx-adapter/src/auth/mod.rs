/*
[INPUT]:  Authentication configuration and credentials
[OUTPUT]: Signed requests and session validation
[POS]:    Auth layer - handles Perpx API authentication
[UPDATE]: When auth flow or signature methods change
*/

pub mod signer;

pub use signer::Ed25519Signer;
