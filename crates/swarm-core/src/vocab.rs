//! IRIs and literal encodings for facts in the graph store.

use chrono::{DateTime, SecondsFormat, Utc};

macro_rules! swarm {
    ($local:literal) => {
        concat!("http://swarm.os/ontology/", $local)
    };
}

macro_rules! nist {
    ($local:literal) => {
        concat!("http://nist.gov/caisi/", $local)
    };
}

macro_rules! prov {
    ($local:literal) => {
        concat!("http://www.w3.org/ns/prov#", $local)
    };
}

pub const SWARM: &str = swarm!("");
pub const NIST: &str = nist!("");
pub const PROV: &str = prov!("");

pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
pub const SKOS_HISTORY_NOTE: &str = "http://www.w3.org/2004/02/skos/core#historyNote";

// Classes
pub const AGENT: &str = swarm!("Agent");
pub const TASK_TYPE: &str = swarm!("TaskType");
pub const EXECUTION_RECORD: &str = swarm!("ExecutionRecord");
pub const AGENT_STATUS_EVENT: &str = swarm!("AgentStatusEvent");
pub const COMMAND_REQUEST: &str = nist!("CommandRequest");
pub const STATUS_CHANGE_EVENT: &str = nist!("StatusChangeEvent");

// Catalog
pub const HAS_ROLE: &str = swarm!("hasRole");
pub const HAS_PERMISSION: &str = nist!("hasPermission");
pub const REQUIRES_PERMISSION: &str = nist!("requiresPermission");
pub const HANDLER: &str = swarm!("handler");
pub const SEAT: &str = swarm!("seat");
pub const ON_SUCCESS: &str = swarm!("onSuccess");
pub const ON_FAILURE: &str = swarm!("onFailure");
pub const SPECIALTY: &str = swarm!("specialty");
pub const HARD_CONSTRAINT: &str = nist!("HardConstraint");

// Agent status events
pub const STATUS_OF: &str = swarm!("statusOf");
pub const AGENT_STATUS: &str = swarm!("status");

// Execution history
pub const WAS_ASSOCIATED_WITH: &str = prov!("wasAssociatedWith");
pub const RELATED_TASK: &str = swarm!("relatedTask");
pub const RESULT_STATE: &str = nist!("resultState");
pub const HAS_STACK: &str = swarm!("hasStack");
pub const IS_CONSOLIDATED: &str = swarm!("isConsolidated");
pub const LEARNED_FROM: &str = swarm!("learnedFrom");
pub const GENERATED_AT_TIME: &str = prov!("generatedAtTime");

// Turn token
pub const SWARM_SYSTEM: &str = swarm!("swarm");
pub const CURRENT_TURN: &str = swarm!("currentTurn");

// Approvals
pub const COMMAND_CONTENT: &str = nist!("commandContent");
pub const REQUEST_REASON: &str = nist!("requestReason");
pub const REQUESTED_BY: &str = nist!("requestedBy");
pub const APPROVAL_STATUS: &str = nist!("approvalStatus");
pub const WAS_ATTRIBUTED_TO: &str = prov!("wasAttributedTo");
pub const EXECUTED_AT: &str = nist!("executedAt");

// Kill switch
pub const SYSTEM_CONTROL: &str = nist!("SystemControl");
pub const HAS_STATUS_HISTORY: &str = nist!("hasStatusHistory");
pub const NEW_STATUS: &str = nist!("newStatus");

pub fn agent_iri(name: &str) -> String {
    format!("http://swarm.os/agent/{name}")
}

pub fn role_iri(role: &str) -> String {
    format!("http://swarm.os/role/{role}")
}

pub fn task_iri(task_type: &str) -> String {
    format!("http://swarm.os/task/{task_type}")
}

pub fn stack_iri(stack: &str) -> String {
    format!("http://swarm.os/stack/{}", stack.to_lowercase())
}

pub fn permission_iri(permission: &str) -> String {
    format!("{NIST}permission/{permission}")
}

pub fn execution_iri(id: &str) -> String {
    format!("http://swarm.os/execution/{id}")
}

pub fn request_iri(id: &str) -> String {
    format!("{NIST}request/{id}")
}

pub fn event_iri(id: &str) -> String {
    format!("{NIST}event/{id}")
}

/// Strip a known IRI prefix, returning the local name.
pub fn local_name(iri: &str) -> &str {
    iri.rsplit(&['/', '#'][..]).next().unwrap_or(iri)
}

/// Timestamp literal whose lexicographic order matches chronological order.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn prefixes_expand_at_compile_time() {
        assert_eq!(CURRENT_TURN, "http://swarm.os/ontology/currentTurn");
        assert_eq!(HARD_CONSTRAINT, "http://nist.gov/caisi/HardConstraint");
        assert!(GENERATED_AT_TIME.starts_with(PROV));
    }

    #[test]
    fn timestamps_sort_chronologically() {
        let early = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let late = early + chrono::Duration::milliseconds(1);
        let (a, b) = (timestamp(early), timestamp(late));
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert_eq!(parse_timestamp(&a), Some(early));
    }

    #[test]
    fn local_name_strips_prefix() {
        assert_eq!(local_name(&agent_iri("PythonCoder")), "PythonCoder");
        assert_eq!(local_name(&stack_iri("Rust")), "rust");
        assert_eq!(local_name(RDF_TYPE), "type");
    }
}
