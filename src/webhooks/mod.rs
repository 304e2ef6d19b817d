pub mod adapter;
pub mod events;

pub use adapter::{IngestOutcome, WebhookAdapter};
pub use events::{AiCompletionEvent, AiOutcome, FormEvent};
