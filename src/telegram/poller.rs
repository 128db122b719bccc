// Long-poll update loop.
//
// Each decoded event is handled on its own task, so slow handlers in one
// group never hold back the rest of the fleet. Poll failures back off and
// retry; the loop itself never exits.

use super::update_decoder;
use crate::core::assistant::AssistantClient;
use crate::core::orchestrator::{ModerationOrchestrator, ModerationStore};
use crate::core::scam::ScamClassifier;
use crate::infra::chat::TelegramApiClient;
use std::sync::Arc;
use std::time::Duration;

const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

pub async fn run<S, C, A>(
    client: Arc<TelegramApiClient>,
    orchestrator: Arc<ModerationOrchestrator<S, C, A>>,
    bot_username: String,
) where
    S: ModerationStore,
    C: ScamClassifier + 'static,
    A: AssistantClient + 'static,
{
    let mut offset: i64 = 0;
    loop {
        let updates = match client.get_updates(offset).await {
            Ok(updates) => updates,
            Err(err) => {
                tracing::warn!(%err, "getUpdates failed, retrying");
                tokio::time::sleep(POLL_RETRY_DELAY).await;
                continue;
            }
        };

        for update in updates {
            if let Some(update_id) = update_decoder::update_id(&update) {
                offset = offset.max(update_id + 1);
            }
            let Some(event) = update_decoder::decode(update, &bot_username) else {
                continue;
            };

            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                orchestrator.handle_event(event).await;
            });
        }
    }
}
