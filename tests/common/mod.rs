//! Fake gateways and a dispatcher wired to them

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use xen_bot::config::{BotConfig, TranslationConfig};
use xen_bot::context::{DialogueWindow, Message, TokenBudget, TrimPolicy, WordBasedEstimator};
use xen_bot::conversation::{Dispatcher, Event, Upload, UploadStore};
use xen_bot::gateways::{
    CompletionGateway, GatewayError, ImageGateway, ResponseFormat, TranslationGateway, Translator,
};

pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

/// Completion gateway answering from a script
#[derive(Default)]
pub struct FakeCompletion {
    script: Mutex<VecDeque<Result<String, GatewayError>>>,
    pub calls: AtomicUsize,
    pub last_messages: Mutex<Vec<Message>>,
}

impl FakeCompletion {
    pub fn push(&self, answer: Result<String, GatewayError>) {
        self.script.lock().unwrap().push_back(answer);
    }

    pub fn push_reply(&self, reply: &str, language: &str) {
        self.push(Ok(serde_json::json!({ "reply": reply, "language": language }).to_string()));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionGateway for FakeCompletion {
    async fn complete(
        &self,
        messages: &[Message],
        _format: ResponseFormat,
    ) -> Result<String, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_messages.lock().unwrap() = messages.to_vec();
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::InvalidResponse("script exhausted".into())))
    }
}

/// Image gateway that records calls and whether its inputs existed
#[derive(Default)]
pub struct FakeImages {
    pub generations: AtomicUsize,
    pub edits: AtomicUsize,
    pub variations: AtomicUsize,
    pub fail_with: Mutex<Option<GatewayError>>,
    pub seen_paths: Mutex<Vec<PathBuf>>,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeImages {
    pub fn fail_with(&self, err: GatewayError) {
        *self.fail_with.lock().unwrap() = Some(err);
    }

    fn answer(&self, label: &str) -> Result<Vec<String>, GatewayError> {
        match self.fail_with.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(vec![format!("https://images.test/{}.png", label)]),
        }
    }

    fn record(&self, path: &Path) {
        assert!(path.exists(), "gateway called with missing file {}", path.display());
        self.seen_paths.lock().unwrap().push(path.to_path_buf());
    }
}

#[async_trait]
impl ImageGateway for FakeImages {
    async fn generate(&self, prompt: &str) -> Result<Vec<String>, GatewayError> {
        self.generations.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.answer("generated")
    }

    async fn edit(
        &self,
        image: &Path,
        mask: &Path,
        prompt: &str,
    ) -> Result<Vec<String>, GatewayError> {
        self.edits.fetch_add(1, Ordering::SeqCst);
        self.record(image);
        self.record(mask);
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.answer("edited")
    }

    async fn vary(&self, image: &Path) -> Result<Vec<String>, GatewayError> {
        self.variations.fetch_add(1, Ordering::SeqCst);
        self.record(image);
        self.answer("variation")
    }
}

/// Translation gateway tagging text with the target language
pub struct TaggingTranslation;

#[async_trait]
impl TranslationGateway for TaggingTranslation {
    async fn translate(&self, text: &str, target: &str) -> Result<String, GatewayError> {
        Ok(format!("[{}] {}", target, text))
    }
}

pub struct Harness {
    pub dispatcher: Dispatcher,
    pub completion: Arc<FakeCompletion>,
    pub images: Arc<FakeImages>,
    pub upload_dir: PathBuf,
}

impl Harness {
    pub fn new(budget: usize) -> Self {
        Self::build(budget, Translator::passthrough())
    }

    /// Harness whose translator tags every text with its target language
    pub fn translating(budget: usize) -> Self {
        let config = TranslationConfig {
            max_attempts: 1,
            ..TranslationConfig::default()
        };
        Self::build(budget, Translator::new(Arc::new(TaggingTranslation), &config))
    }

    fn build(budget: usize, translator: Translator) -> Self {
        let completion = Arc::new(FakeCompletion::default());
        let images = Arc::new(FakeImages::default());
        let upload_dir = std::env::temp_dir().join(format!("xen-test-{}", Uuid::new_v4()));

        let window = DialogueWindow::new(
            "system",
            Arc::new(WordBasedEstimator::new(1.0)),
            TokenBudget::new(budget),
            TrimPolicy::Pair,
        );
        let dispatcher = Dispatcher::new(
            window,
            completion.clone(),
            images.clone(),
            Arc::new(translator),
            UploadStore::new(upload_dir.clone(), 4 * 1024 * 1024),
            BotConfig::default(),
        );

        Self {
            dispatcher,
            completion,
            images,
            upload_dir,
        }
    }

    /// Files currently in the upload directory
    pub fn stored_uploads(&self) -> usize {
        std::fs::read_dir(&self.upload_dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.upload_dir).ok();
    }
}

pub fn text(s: &str) -> Event {
    Event::Text(s.to_string())
}

pub fn png_upload(name: &str) -> Event {
    Event::Upload(Upload {
        file_name: name.to_string(),
        bytes: Bytes::from_static(PNG),
    })
}
