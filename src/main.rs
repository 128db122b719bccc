// This is the entry point of the Guardy moderation bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (stores, HTTP collaborators)
// - `telegram/` = Telegram-specific adapters (wire decoding, update loop)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Start the update loop

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;
#[path = "telegram/telegram_layer.rs"]
mod telegram;

use crate::core::assistant::AssistantService;
use crate::core::chat::ChatApi;
use crate::core::orchestrator::{BotIdentity, ModerationOrchestrator};
use crate::core::scam::ScamAnalyzer;
use crate::core::scheduler::Scheduler;
use crate::core::verification::VerificationService;
use crate::core::voting::VotingService;
use crate::infra::assistant::OpenAiClient;
use crate::infra::captcha::CaptchaApiClient;
use crate::infra::chat::TelegramApiClient;
use crate::infra::classifier::OtisClient;
use crate::infra::store::SqliteStore;
use std::collections::HashSet;
use std::sync::Arc;

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are Guardy, a Telegram community assistant focused on group security.";
const DEFAULT_CLASSIFIER_ENDPOINT: &str =
    "https://api-inference.huggingface.co/models/Titeiiko/OTIS-Official-Spam-Model";

#[tokio::main]
async fn main() {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let token = std::env::var("GUARDY_BOT_TOKEN").expect(
        "Missing GUARDY_BOT_TOKEN environment variable! Create a .env file with your bot token.",
    );

    // Keep the runtime database in a dedicated folder so the repo root stays tidy.
    let data_dir = "data";
    std::fs::create_dir_all(data_dir).expect("Failed to create data directory for SQLite files");
    let db_path = format!("{}/guardy.db", data_dir);

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // Create our services with their dependencies.
    // This is the "composition root" where we wire everything together.

    let telegram =
        Arc::new(TelegramApiClient::new(&token).expect("Failed to create Telegram client"));
    let (bot_id, bot_username) = telegram
        .identity()
        .await
        .expect("Failed to resolve the bot's identity");
    tracing::info!(bot_id, bot_username, "authenticated against the Bot API");

    let chat: Arc<dyn ChatApi> = Arc::clone(&telegram) as Arc<dyn ChatApi>;
    let store = Arc::new(
        SqliteStore::new(&db_path)
            .await
            .expect("Failed to initialize SQLite store"),
    );
    let scheduler = Arc::new(Scheduler::new());

    let verify_link = std::env::var("GUARDY_URL")
        .unwrap_or_else(|_| format!("https://t.me/{}", bot_username));
    let web_app_url = std::env::var("GUARDY_WEB_APP_URL")
        .unwrap_or_else(|_| "https://verify.guardy.app".to_string());
    let captcha_endpoint = std::env::var("GUARDY_CAPTCHA_ENDPOINT")
        .unwrap_or_else(|_| "https://captcha.guardy.app/generate".to_string());

    let verification = VerificationService::new(
        Arc::clone(&store),
        Arc::clone(&chat),
        Arc::new(CaptchaApiClient::new(captcha_endpoint)),
        Arc::clone(&scheduler),
        verify_link,
        web_app_url,
    );
    let voting = Arc::new(VotingService::new(
        Arc::clone(&store),
        Arc::clone(&chat),
        Arc::clone(&scheduler),
    ));

    let classifier_endpoint = std::env::var("OTIS_ENDPOINT")
        .unwrap_or_else(|_| DEFAULT_CLASSIFIER_ENDPOINT.to_string());
    let classifier_token = std::env::var("OTIS_API_TOKEN").ok();
    let scam = ScamAnalyzer::new(OtisClient::new(classifier_endpoint, classifier_token));

    let assistant_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
    let assistant_model =
        std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
    let system_prompt = std::env::var("GUARDY_SYSTEM_PROMPT")
        .unwrap_or_else(|_| DEFAULT_SYSTEM_PROMPT.to_string());
    let assistant =
        AssistantService::new(OpenAiClient::new(assistant_key, assistant_model, system_prompt));

    // Premium-only features (scam voting, assistant) run in these groups.
    let premium_groups: HashSet<i64> = std::env::var("GUARDY_PREMIUM_GROUPS")
        .unwrap_or_default()
        .split(',')
        .filter_map(|id| id.trim().parse().ok())
        .collect();

    let orchestrator = Arc::new(ModerationOrchestrator::new(
        Arc::clone(&store),
        chat,
        scheduler,
        verification,
        voting,
        scam,
        assistant,
        BotIdentity {
            user_id: bot_id,
            username: bot_username.clone(),
        },
        premium_groups,
    ));

    tracing::info!("guardy is ready, entering the update loop");
    telegram::poller::run(telegram, orchestrator, bot_username).await;
}
