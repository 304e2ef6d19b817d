pub mod ai_processing;
pub mod notifications;
pub mod pdf_generation;
pub mod proposal_generation;
pub mod sop_generation;

pub use ai_processing::AiProcessingProcessor;
pub use notifications::NotificationProcessor;
pub use pdf_generation::PdfGenerationProcessor;
pub use proposal_generation::ProposalGenerationProcessor;
pub use sop_generation::SopGenerationProcessor;

use log::warn;

use crate::error::{AppError, AppResult};
use crate::jobs::processor_trait::ProcessorContext;
use crate::models::{Actor, ClientStatus};

/// Advance a client one canonical step if it is still at `from`. A client
/// that already moved past `from` (another worker or a webhook won the race)
/// is left alone; losing the compare-and-swap itself is also not an error.
pub(crate) async fn advance_once(
    ctx: &ProcessorContext,
    client_id: &str,
    from: ClientStatus,
    trigger_event: &str,
) -> AppResult<()> {
    let current = ctx.workflow.current_status(client_id).await?;
    if current != from {
        if current.ordinal() < from.ordinal() {
            warn!(
                "Client {client_id} is at {current}, behind expected {from}; not advancing"
            );
        }
        return Ok(());
    }

    let to = from.canonical_next().ok_or_else(|| {
        AppError::BusinessRuleError(format!("{from} has no next step to advance to"))
    })?;

    match ctx
        .workflow
        .request_transition(client_id, from, to, trigger_event, &Actor::System, None)
        .await
    {
        Ok(_) => Ok(()),
        Err(AppError::StaleStateError(_)) => Ok(()),
        Err(e) => Err(e),
    }
}
