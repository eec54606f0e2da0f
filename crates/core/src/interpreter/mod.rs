//! Natural-language collaborators of the command pipeline.
//!
//! The pipeline only sees the [`QueryInterpreter`] and [`ChangeProposer`]
//! traits. The keyword implementations here cover a fixed command grammar so
//! the service works end to end without an external language backend.

mod keyword;
mod traits;
mod types;

pub use keyword::{KeywordChangeProposer, KeywordQueryInterpreter};
pub use traits::{ChangeProposer, InterpreterError, QueryInterpreter};
pub use types::{ChangeProposal, ProposedChange, QueryInterpretation};
