use std::time::Duration;

use anyhow::Context;
use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, info};

use huddle_db::BOT_USER_ID;
use huddle_gateway::auth::Identity;
use huddle_gateway::store::validate_new_message;
use huddle_types::api::{AnswerRequest, AnswerResponse, BotExchange, BotRequest};
use huddle_types::events::NewMessage;

use crate::AppState;
use crate::error::reject;

const ANSWER_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the external answer generator.
#[derive(Clone)]
pub struct AnswerClient {
    http: reqwest::Client,
    url: String,
}

impl AnswerClient {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(ANSWER_TIMEOUT)
            .build()
            .context("build answer client")?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub async fn answer(&self, prompt: &str) -> anyhow::Result<String> {
        let response = self
            .http
            .post(&self.url)
            .json(&AnswerRequest {
                prompt: prompt.to_string(),
            })
            .send()
            .await
            .context("answer generator unreachable")?
            .error_for_status()
            .context("answer generator failed")?;

        let body: AnswerResponse = response
            .json()
            .await
            .context("answer generator returned an unexpected body")?;
        Ok(body.answer)
    }
}

/// POST /bot: ask the answer generator in a conversation.
///
/// The caller's prompt and the bot's answer are stored as two messages in
/// the same conversation and both go out through the dispatcher. The answer
/// is written on the asker's behalf, so in a direct conversation it stays
/// between the asker and the recipient.
pub async fn ask_bot(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<BotRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let answers = state.answers.as_ref().ok_or(StatusCode::SERVICE_UNAVAILABLE)?;

    let prompt = req.prompt.trim().to_string();
    let question = NewMessage {
        content: prompt.clone(),
        user_id: None,
        channel_id: req.channel_id.clone(),
        to_user_id: req.to_user_id.clone(),
        thread_id: req.thread_id.clone(),
        attachments: vec![],
    };
    validate_new_message(&question).map_err(reject)?;

    let store = state.gateway.store();
    let dispatcher = state.gateway.dispatcher();

    let prompt_message = store
        .persist_message(&identity.user_id, question)
        .await
        .map_err(reject)?;
    dispatcher.dispatch_message(prompt_message.clone());

    let answer = answers.answer(&prompt).await.map_err(|e| {
        error!("bot answer for {} failed: {:#}", identity.user_id, e);
        StatusCode::BAD_GATEWAY
    })?;

    let reply = NewMessage {
        content: answer,
        user_id: None,
        channel_id: req.channel_id,
        to_user_id: req.to_user_id,
        thread_id: req.thread_id,
        attachments: vec![],
    };
    let answer_message = store
        .persist_message_for(BOT_USER_ID, &identity.user_id, reply)
        .await
        .map_err(reject)?;
    dispatcher.dispatch_message(answer_message.clone());

    info!("bot answered {} ({})", identity.user_id, prompt_message.id);
    Ok(Json(BotExchange {
        prompt: prompt_message,
        answer: answer_message,
    }))
}
