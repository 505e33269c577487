mod agent_loop;
mod context_manager;
mod events;
mod message_log;
mod session_journal;

pub use agent_loop::{AgentLoop, EventCallback};
pub use context_manager::{CompactionReport, ContextManager, ContextManagerConfig};
pub use events::AgentLoopEvent;
pub use message_log::MessageLog;
pub use session_journal::{JournalRecord, SessionJournal};
