//! Queue and group names of the tick protocol.
//!
//! | Queue | Groups | Carries |
//! |-------|--------|---------|
//! | `world_queue` | `coordinator` | controller reports |
//! | `world_{domain}_queue` | one per controller | tick starts |
//! | `{domain}_job_queue` | `workers` | per-entity jobs |
//! | `{domain}_job_outcome_queue` | one per controller | job outcomes |

use daws_types::{ControllerId, Domain};

use crate::bus::MessageBus;
use crate::error::BusError;

/// Queue carrying controller reports to the coordinator.
pub const CONTROL_QUEUE: &str = "world_queue";

/// Group the coordinator consumes reports with.
pub const COORDINATOR_GROUP: &str = "coordinator";

/// Shared group of every worker of a domain.
pub const WORKER_GROUP: &str = "workers";

/// Queue carrying tick starts for `domain`.
pub const fn tick_queue(domain: Domain) -> &'static str {
    match domain {
        Domain::City => "world_city_queue",
        Domain::Traffic => "world_traffic_queue",
    }
}

/// Queue carrying per-entity jobs for `domain`.
pub const fn job_queue(domain: Domain) -> &'static str {
    match domain {
        Domain::City => "city_job_queue",
        Domain::Traffic => "traffic_job_queue",
    }
}

/// Queue carrying job outcomes for `domain`.
pub const fn outcome_queue(domain: Domain) -> &'static str {
    match domain {
        Domain::City => "city_job_outcome_queue",
        Domain::Traffic => "traffic_job_outcome_queue",
    }
}

/// Private group of one controller on its tick and outcome queues.
pub fn controller_group(controller: ControllerId) -> String {
    format!("controller-{controller}")
}

/// Every queue used by the protocol.
pub fn all_queues() -> Vec<&'static str> {
    let mut queues = vec![CONTROL_QUEUE];
    for domain in Domain::ALL {
        queues.push(tick_queue(domain));
        queues.push(job_queue(domain));
        queues.push(outcome_queue(domain));
    }
    queues
}

/// Declare every queue plus the shared groups.
///
/// Declaring the shared groups up front means reports and jobs published
/// before their consumers start are retained rather than dropped.
///
/// # Errors
///
/// Returns the first declaration failure.
pub async fn declare_topology(bus: &dyn MessageBus) -> Result<(), BusError> {
    for queue in all_queues() {
        bus.declare_queue(queue).await?;
    }
    bus.declare_group(CONTROL_QUEUE, COORDINATOR_GROUP).await?;
    for domain in Domain::ALL {
        bus.declare_group(job_queue(domain), WORKER_GROUP).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_distinct() {
        let queues = all_queues();
        let mut unique = queues.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), queues.len());
        assert_eq!(queues.len(), 7);
    }

    #[test]
    fn controller_group_has_no_subject_tokens() {
        let group = controller_group(ControllerId::new());
        assert!(!group.contains('.'));
        assert!(!group.contains('*'));
        assert!(group.starts_with("controller-"));
    }
}
