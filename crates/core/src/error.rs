use crate::{MetaTag, ResourceType};

/// Failure taxonomy shared by the store, manager, collectors and lookup surface.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MetaError {
    /// Client construction or cache sync failed; retried by the caller.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    /// Primary-key or indexer failure on a single event; the event is dropped.
    #[error("invalid object ({resource}): {reason}")]
    InvalidObject { resource: MetaTag, reason: String },
    #[error("stale reference: {0}")]
    StaleReference(String),
    #[error("subscriber fault: {0}")]
    SubscriberFault(String),
    #[error("invalid input: {0}")]
    UserInput(String),
    #[error("resource type not enabled: {0}")]
    NotEnabled(ResourceType),
    /// The store consumer is gone (manager stopped).
    #[error("store closed: {0}")]
    Closed(MetaTag),
}

pub type MetaResult<T> = Result<T, MetaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_messages_name_the_offender() {
        assert_eq!(MetaError::StaleReference("10.0.0.1 -> default/p1".into()).to_string(), "stale reference: 10.0.0.1 -> default/p1");
        assert_eq!(MetaError::SubscriberFault("c1 panicked".into()).to_string(), "subscriber fault: c1 panicked");
        assert_eq!(MetaError::NotEnabled(ResourceType::Pod).to_string(), "resource type not enabled: Pod");
    }
}
