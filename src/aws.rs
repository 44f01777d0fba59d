//! AWS access: per-account credential sessions and the RDS metadata API.

mod error;
pub mod rds;
pub mod session;

pub use error::ApiError;
pub use rds::{
    ClusterPage, ClusterScaling, InstancePage, Paged, RdsApi, RdsClient, RdsClientFactory,
    SdkRdsClientFactory,
};
pub use session::{AuthStrategy, AwsSessionManager, Session, SessionProvider};
