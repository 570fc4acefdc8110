//! gRPC surface for sharing one tracker between many application instances.

mod client;
mod server;
mod service;

pub use client::RemoteRateLimiter;
pub use server::GrpcServer;
pub use service::RateKeeperService;

// Include the generated protobuf code
pub mod proto {
    pub mod ratekeeper {
        pub mod v1 {
            tonic::include_proto!("ratekeeper.v1");
        }
    }
}

// Re-export commonly used types
pub use proto::ratekeeper::v1::{
    rate_keeper_client::RateKeeperClient, rate_keeper_server::RateKeeperServer, CheckRequest,
    CheckResponse, ResetRequest, ResetResponse, StatusRequest, StatusResponse,
};

use std::time::Duration;
use tonic::metadata::MetadataValue;
use tonic::Status;

use crate::error::RateKeeperError;

/// Metadata key carrying the error kind across the wire.
pub(crate) const ERROR_KIND_HEADER: &str = "ratekeeper-error";

const KIND_UNKNOWN_OPERATION: &str = "unknown-operation";
const KIND_CONFIGURATION: &str = "configuration";
const KIND_STORE_UNAVAILABLE: &str = "store-unavailable";

pub(crate) fn to_proto_duration(duration: Duration) -> prost_types::Duration {
    prost_types::Duration {
        seconds: duration.as_secs() as i64,
        nanos: duration.subsec_nanos() as i32,
    }
}

pub(crate) fn from_proto_duration(duration: Option<prost_types::Duration>) -> Duration {
    match duration {
        Some(d) if d.seconds >= 0 && d.nanos >= 0 => {
            Duration::new(d.seconds as u64, d.nanos as u32)
        }
        _ => Duration::ZERO,
    }
}

fn tagged(mut status: Status, kind: &'static str) -> Status {
    status
        .metadata_mut()
        .insert(ERROR_KIND_HEADER, MetadataValue::from_static(kind));
    status
}

/// Map a tracker error onto a gRPC status.
///
/// Over-limit rejections are reported in-band and never reach this function in
/// the service, but they are mapped to `resource_exhausted` for completeness.
pub(crate) fn status_from_error(err: RateKeeperError) -> Status {
    match err {
        RateKeeperError::UnknownOperation(ref op) => tagged(
            Status::failed_precondition(op.clone()),
            KIND_UNKNOWN_OPERATION,
        ),
        RateKeeperError::Config(_) | RateKeeperError::Yaml(_) => tagged(
            Status::failed_precondition(err.to_string()),
            KIND_CONFIGURATION,
        ),
        RateKeeperError::StoreUnavailable => tagged(
            Status::unavailable(err.to_string()),
            KIND_STORE_UNAVAILABLE,
        ),
        RateKeeperError::RateLimited { .. } => Status::resource_exhausted(err.to_string()),
        RateKeeperError::Remote(status) => status,
        other => Status::internal(other.to_string()),
    }
}

/// Map a gRPC status from a remote tracker back onto the local error kinds.
pub(crate) fn error_from_status(status: Status) -> RateKeeperError {
    let kind = status
        .metadata()
        .get(ERROR_KIND_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    match kind.as_deref() {
        Some(KIND_UNKNOWN_OPERATION) => RateKeeperError::UnknownOperation(status.message().to_string()),
        Some(KIND_CONFIGURATION) => RateKeeperError::Config(status.message().to_string()),
        Some(KIND_STORE_UNAVAILABLE) => RateKeeperError::StoreUnavailable,
        _ => RateKeeperError::Remote(status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_conversion() {
        let d = Duration::from_millis(41_250);
        let proto = to_proto_duration(d);
        assert_eq!(proto.seconds, 41);
        assert_eq!(proto.nanos, 250_000_000);
        assert_eq!(from_proto_duration(Some(proto)), d);
        assert_eq!(from_proto_duration(None), Duration::ZERO);
        assert_eq!(
            from_proto_duration(Some(prost_types::Duration { seconds: -1, nanos: 0 })),
            Duration::ZERO
        );
    }

    #[test]
    fn test_error_kinds_survive_the_wire() {
        let status = status_from_error(RateKeeperError::UnknownOperation("NOPE".to_string()));
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
        assert!(matches!(
            error_from_status(status),
            RateKeeperError::UnknownOperation(ref op) if op == "NOPE"
        ));

        let status = status_from_error(RateKeeperError::Config("empty key".to_string()));
        assert!(error_from_status(status).is_configuration_error());

        let status = status_from_error(RateKeeperError::StoreUnavailable);
        assert_eq!(status.code(), tonic::Code::Unavailable);
        assert!(matches!(error_from_status(status), RateKeeperError::StoreUnavailable));
    }

    #[test]
    fn test_untagged_status_stays_remote() {
        let err = error_from_status(Status::unavailable("connection refused"));
        assert!(matches!(err, RateKeeperError::Remote(ref s) if s.code() == tonic::Code::Unavailable));
    }
}
