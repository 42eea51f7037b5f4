pub mod verification;

pub use verification::{CREDENTIAL_FIELD, VerificationResult, VerifyCredentialRequest};
