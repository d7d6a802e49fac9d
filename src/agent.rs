//! Agent dispatch: single-agent chat and the multi-stage collaborate path.

pub mod collaborate;
pub mod dispatcher;

pub use collaborate::{CollaborationRun, CollaborationStore};
pub use dispatcher::AgentDispatcher;
