//! Event dispatcher: runs the handler chosen by the transition table and
//! applies its outcome to the session

use super::replies::{self, Button, Outbound};
use super::session::{PendingEdit, Session, SessionSnapshot, SessionStore, DEFAULT_LANGUAGE};
use super::state::{resolve, Action, Event, MenuAction, State};
use super::uploads::UploadStore;
use crate::config::BotConfig;
use crate::context::{DialogueWindow, Message};
use crate::error::{BotError, Result};
use crate::gateways::translation::ENGLISH;
use crate::gateways::{
    CompletionGateway, DialogueReply, GatewayError, ImageGateway, ResponseFormat, Translator,
};
use crate::metrics::METRICS;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A reply before localization
#[derive(Debug)]
enum Reply {
    /// Fixed English text, translated into the session language
    Say(&'static str),
    /// Text sent as is
    Verbatim(String),
    Menu {
        text: &'static str,
        buttons: Vec<(&'static str, MenuAction)>,
    },
    Images(Vec<String>),
}

/// Where the session goes after a handler ran
#[derive(Debug)]
enum Outcome {
    /// To the transition's target
    Advance(Vec<Reply>),
    Stay(Vec<Reply>),
    MoveTo(State, Vec<Reply>),
}

fn mode_menu() -> Reply {
    Reply::Menu {
        text: replies::CHOOSE_IMAGE_MODE,
        buttons: vec![
            (replies::LABEL_GENERATION, MenuAction::Generate),
            (replies::LABEL_EDITING, MenuAction::Edit),
            (replies::LABEL_VARIATION, MenuAction::Variation),
            (replies::LABEL_CANCEL, MenuAction::Cancel),
        ],
    }
}

fn generation_menu(text: &'static str) -> Reply {
    Reply::Menu {
        text,
        buttons: vec![
            (replies::LABEL_CANCEL, MenuAction::Cancel),
            (replies::LABEL_PROMPT_FROM, MenuAction::BotPrompt),
        ],
    }
}

fn with_cancel(text: &'static str) -> Reply {
    Reply::Menu {
        text,
        buttons: vec![(replies::LABEL_CANCEL, MenuAction::Cancel)],
    }
}

/// Routes inbound events of all sessions
pub struct Dispatcher {
    sessions: SessionStore,
    window: DialogueWindow,
    completion: Arc<dyn CompletionGateway>,
    images: Arc<dyn ImageGateway>,
    translator: Arc<Translator>,
    uploads: UploadStore,
    bot: BotConfig,
}

impl Dispatcher {
    pub fn new(
        window: DialogueWindow,
        completion: Arc<dyn CompletionGateway>,
        images: Arc<dyn ImageGateway>,
        translator: Arc<Translator>,
        uploads: UploadStore,
        bot: BotConfig,
    ) -> Self {
        Self {
            sessions: SessionStore::default(),
            window,
            completion,
            images,
            translator,
            uploads,
            bot,
        }
    }

    /// Replace the default session store
    pub fn with_sessions(mut self, sessions: SessionStore) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn snapshot(&self, session_id: &str) -> Option<SessionSnapshot> {
        let session = self.sessions.get(session_id).await?;
        let session = session.lock().await;
        Some(session.snapshot())
    }

    /// Handle one event and return what to send back
    ///
    /// Events of the same session are handled one at a time. Gateway and
    /// upload failures become user-facing replies; they never escape.
    pub async fn handle(
        &self,
        session_id: &str,
        username: Option<&str>,
        event: Event,
    ) -> Vec<Outbound> {
        let handle = self.sessions.get_or_create(session_id).await;
        let mut session = handle.lock().await;
        if let Some(name) = username {
            session.username = Some(name.to_string());
        }
        session.touch();

        let from = session.state;
        let Some(transition) = resolve(from, &event) else {
            debug!(
                "Ignoring {} event from {} in state {}",
                event.kind(),
                session.display_name(),
                from
            );
            let hint = replies::unexpected_input(from).map(Reply::Say);
            let language = session.language.clone();
            return self.localize(&language, hint.into_iter().collect()).await;
        };

        let outcome = match self.run(&mut session, transition.action, event).await {
            Ok(outcome) => outcome,
            Err(e) => self.failure(&session, transition.action, e),
        };

        let (next, pending) = match outcome {
            Outcome::Advance(pending) => (transition.target, pending),
            Outcome::Stay(pending) => (from, pending),
            Outcome::MoveTo(state, pending) => (state, pending),
        };

        if next != from {
            info!("Session {}: {} -> {}", session.display_name(), from, next);
            METRICS.record_transition(from.as_str(), next.as_str());
        }
        session.state = next;

        let language = session.language.clone();
        self.localize(&language, pending).await
    }

    async fn run(&self, session: &mut Session, action: Action, event: Event) -> Result<Outcome> {
        match action {
            Action::Greet => Ok(self.greet(session)),
            Action::Converse => self.converse(session, text_of(event)).await,
            Action::OpenImageMenu => Ok(Outcome::Advance(vec![mode_menu()])),
            Action::AskGenerationPrompt => Ok(Outcome::Advance(vec![generation_menu(
                replies::ASK_GENERATION_PROMPT,
            )])),
            Action::GenerateFromText => {
                let prompt = self.translator.translate(&text_of(event), ENGLISH).await;
                self.generate(session, prompt).await
            }
            Action::GenerateFromBotPrompt => {
                let prompt = self.bot_prompt().await?;
                self.generate(session, prompt).await
            }
            Action::AskImageToEdit => {
                Ok(Outcome::Advance(vec![with_cancel(replies::ASK_IMAGE_TO_EDIT)]))
            }
            Action::StoreImageToEdit => {
                let Event::Upload(upload) = event else {
                    return Err(BotError::Internal("expected an upload".to_string()));
                };
                let stored = self.uploads.save(&upload).await?;
                info!("Session {} sent an image to edit", session.display_name());
                session.pending = PendingEdit {
                    image: Some(stored),
                    mask: None,
                };
                Ok(Outcome::Advance(vec![with_cancel(replies::ASK_MASK)]))
            }
            Action::StoreMask => {
                let Event::Upload(upload) = event else {
                    return Err(BotError::Internal("expected an upload".to_string()));
                };
                let stored = self.uploads.save(&upload).await?;
                info!("Session {} sent the mask to edit", session.display_name());
                session.pending.mask = Some(stored);
                Ok(Outcome::Advance(vec![with_cancel(replies::ASK_EDIT_PROMPT)]))
            }
            Action::EditImage => self.edit(session, text_of(event)).await,
            Action::AskImageForVariation => Ok(Outcome::Advance(vec![with_cancel(
                replies::ASK_IMAGE_FOR_VARIATION,
            )])),
            Action::VaryImage => {
                let Event::Upload(upload) = event else {
                    return Err(BotError::Internal("expected an upload".to_string()));
                };
                self.vary(session, &upload).await
            }
            Action::ReturnToDialogue => {
                session.pending = PendingEdit::default();
                Ok(Outcome::Advance(vec![Reply::Say(replies::RETURNED_TO_DIALOGUE)]))
            }
            Action::Farewell => {
                info!("Session {} ended the conversation", session.display_name());
                session.clear();
                Ok(Outcome::Advance(vec![Reply::Say(replies::FAREWELL)]))
            }
        }
    }

    fn greet(&self, session: &mut Session) -> Outcome {
        let had_dialogue = !session.dialogue.is_empty();
        session.dialogue.clear();
        session.pending = PendingEdit::default();

        if had_dialogue {
            info!("Session {} reset the dialogue", session.display_name());
            Outcome::Advance(vec![Reply::Say(replies::DIALOGUE_RESET)])
        } else {
            info!("Session {} started", session.display_name());
            Outcome::Advance(vec![Reply::Say(replies::GREETING)])
        }
    }

    async fn converse(&self, session: &mut Session, request: String) -> Result<Outcome> {
        let prepared = self.window.prepare(&request, &session.dialogue)?;
        debug!(
            "Session {}: {} prompt tokens, {} left, {} messages trimmed",
            session.display_name(),
            prepared.usage.used,
            prepared.usage.remaining,
            prepared.trimmed
        );

        let raw = self
            .completion
            .complete(&prepared.candidate, ResponseFormat::Json)
            .await?;
        let reply = DialogueReply::parse(&raw)?;

        if let Some(language) = reply.language {
            session.language = language;
        }
        session.dialogue = self
            .window
            .commit_turn(prepared.history, &request, &reply.reply);

        info!(
            "Session {} received a reply, {} messages in history",
            session.display_name(),
            session.dialogue.len()
        );
        Ok(Outcome::Advance(vec![Reply::Verbatim(reply.reply)]))
    }

    /// Ask the completion model for an image prompt
    async fn bot_prompt(&self) -> Result<String> {
        let messages = [
            Message::system(self.bot.image_prompt_instruction.clone()),
            Message::user("Write a prompt for a new image."),
        ];
        let prompt = self
            .completion
            .complete(&messages, ResponseFormat::Text)
            .await?;
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(GatewayError::InvalidResponse("empty image prompt".to_string()).into());
        }
        Ok(prompt.to_string())
    }

    async fn generate(&self, session: &Session, prompt: String) -> Result<Outcome> {
        let urls = self.images.generate(&prompt).await?;
        info!("Session {} received a generated image", session.display_name());
        Ok(Outcome::Advance(vec![
            Reply::Images(urls),
            Reply::Verbatim(format!("Prompt: {}", prompt)),
            generation_menu(replies::GENERATE_AGAIN),
        ]))
    }

    async fn edit(&self, session: &mut Session, request: String) -> Result<Outcome> {
        // Owned here so the files go away on every exit path
        let PendingEdit { image, mask } = std::mem::take(&mut session.pending);
        let (Some(image), Some(mask)) = (image, mask) else {
            warn!("Session {} asked for an edit without uploads", session.display_name());
            return Ok(Outcome::MoveTo(
                State::ChoosingImageMode,
                vec![Reply::Say(replies::GENERIC_FAILURE), mode_menu()],
            ));
        };

        let prompt = self.translator.translate(&request, ENGLISH).await;
        let urls = self.images.edit(image.path(), mask.path(), &prompt).await?;
        info!("Session {} received an edited image", session.display_name());

        Ok(Outcome::Advance(vec![
            Reply::Say(replies::EDIT_IN_PROGRESS),
            Reply::Images(urls),
            mode_menu(),
        ]))
    }

    async fn vary(&self, session: &Session, upload: &super::state::Upload) -> Result<Outcome> {
        let image = self.uploads.save(upload).await?;
        let urls = self.images.vary(image.path()).await?;
        drop(image);
        info!("Session {} received an image variation", session.display_name());

        Ok(Outcome::Advance(vec![
            Reply::Say(replies::VARIATION_IN_PROGRESS),
            Reply::Images(urls),
            mode_menu(),
        ]))
    }

    /// Replies for a handler that failed
    fn failure(&self, session: &Session, action: Action, err: BotError) -> Outcome {
        let consumes_uploads = matches!(action, Action::EditImage | Action::VaryImage);

        match err {
            BotError::InvalidUpload(reason) => {
                warn!("Session {} sent an unusable file: {}", session.display_name(), reason);
                Outcome::Stay(vec![Reply::Say(replies::INVALID_UPLOAD)])
            }
            BotError::RequestTooLarge { tokens, budget } => {
                warn!(
                    "Session {} sent a request of {} tokens, budget is {}",
                    session.display_name(),
                    tokens,
                    budget
                );
                Outcome::Stay(vec![Reply::Say(replies::REQUEST_TOO_LARGE)])
            }
            BotError::Gateway(GatewayError::RateLimited(_)) if !consumes_uploads => {
                Outcome::Stay(vec![Reply::Say(replies::RATE_LIMITED)])
            }
            BotError::Gateway(GatewayError::Unsupported(operation)) => {
                warn!("Image provider does not support {}", operation);
                Outcome::MoveTo(
                    State::ChoosingImageMode,
                    vec![Reply::Say(replies::UNSUPPORTED_OPERATION), mode_menu()],
                )
            }
            err => {
                error!(
                    "Session {}: {:?} failed: {}",
                    session.display_name(),
                    action,
                    err
                );
                let text = if err.is_retryable() {
                    replies::RATE_LIMITED
                } else {
                    replies::GENERIC_FAILURE
                };
                if consumes_uploads {
                    Outcome::MoveTo(State::ChoosingImageMode, vec![Reply::Say(text), mode_menu()])
                } else {
                    Outcome::Stay(vec![Reply::Say(text)])
                }
            }
        }
    }

    async fn say(&self, language: &str, text: &str) -> String {
        if language == DEFAULT_LANGUAGE {
            return text.to_string();
        }
        self.translator.translate(text, language).await
    }

    async fn localize(&self, language: &str, pending: Vec<Reply>) -> Vec<Outbound> {
        let mut out = Vec::with_capacity(pending.len());
        for reply in pending {
            let outbound = match reply {
                Reply::Say(text) => Outbound::text(self.say(language, text).await),
                Reply::Verbatim(text) => Outbound::text(text),
                Reply::Images(urls) => Outbound::Images { urls },
                Reply::Menu { text, buttons } => {
                    let labels =
                        join_all(buttons.iter().map(|(label, _)| self.say(language, label))).await;
                    let buttons = buttons
                        .iter()
                        .zip(labels)
                        .map(|((_, action), label)| Button {
                            label: match action {
                                MenuAction::BotPrompt => format!("{} {}", label, self.bot.name),
                                _ => label,
                            },
                            action: *action,
                        })
                        .collect();
                    Outbound::Menu {
                        text: self.say(language, text).await,
                        buttons,
                    }
                }
            };
            out.push(outbound);
        }
        out
    }
}

fn text_of(event: Event) -> String {
    match event {
        Event::Text(text) => text,
        _ => String::new(),
    }
}
