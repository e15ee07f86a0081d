pub mod azure;
pub mod driver;
pub mod error;
pub mod local;

pub use azure::{AzureDriver, AzureDriverConfig};
pub use driver::{
    same_role_definition, Application, AssignOutcome, Driver, GraphPermission, IssuedSecret,
    RoleAssignment, RoleDefinition, SecretMetadata, SecretValue, ServicePrincipal, Subscription,
};
pub use error::DriverError;
pub use local::LocalDriver;
