use serde::{Deserialize, Serialize};

use crate::pipeline::ImpactAssessment;
use crate::ticket::{TicketQuery, TicketUpdates};

/// Output of a [`QueryInterpreter`](super::QueryInterpreter).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryInterpretation {
    pub query: TicketQuery,
    /// Human-readable reading of the query.
    pub explanation: String,
    /// The interpreter's own guess at how many tickets will match.
    pub estimated_matches: usize,
}

/// Updates proposed for one matched ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedChange {
    pub ticket_id: String,
    pub updates: TicketUpdates,
    pub rationale: String,
}

/// Output of a [`ChangeProposer`](super::ChangeProposer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeProposal {
    pub changes: Vec<ProposedChange>,
    pub rationale: String,
    pub impact: ImpactAssessment,
}
