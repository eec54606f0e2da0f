//! Ticket repository: the read side used by the command pipeline and the
//! transactional bulk apply with its audit history.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteTicketStore;
pub use store::{CreateTicketRequest, TicketError, TicketFilter, TicketStore};
pub use types::{
    AppliedChanges, ApprovedChange, AssigneeFilter, HistoryEntry, Priority, Ticket, TicketQuery,
    TicketStatus, TicketUpdates,
};
