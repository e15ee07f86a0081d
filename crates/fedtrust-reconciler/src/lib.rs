pub mod error;
pub mod provision;
pub mod report;

pub use error::ProvisionError;
pub use provision::{consent_url, provision, verify};
pub use report::{Change, CredentialOutcome, ProvisionReport, ProvisionRequest, Verification};
