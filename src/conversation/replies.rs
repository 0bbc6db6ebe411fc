//! Outbound messages and the bot's fixed English texts
//!
//! Texts are written in English and localized per session before sending.

use super::state::{MenuAction, State};
use serde::Serialize;

/// A button under a menu message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Button {
    pub label: String,
    pub action: MenuAction,
}

/// Something for the transport to send back to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Text { text: String },
    Menu { text: String, buttons: Vec<Button> },
    Images { urls: Vec<String> },
}

impl Outbound {
    pub fn text(text: impl Into<String>) -> Self {
        Outbound::Text { text: text.into() }
    }
}

pub const GREETING: &str = "Hi! Write me to start a conversation.";
pub const DIALOGUE_RESET: &str =
    "The dialogue was reset, now I don't remember anything we discussed.";
pub const FAREWELL: &str = "Bye! I hope we can talk again some day.";
pub const RETURNED_TO_DIALOGUE: &str =
    "You have returned to the dialogue mode and we can continue the conversation.";
pub const RATE_LIMITED: &str =
    "That model is currently overloaded with other requests. You can retry your request.";
pub const REQUEST_TOO_LARGE: &str =
    "Your message is too long for me to process. Please shorten it and try again.";
pub const GENERIC_FAILURE: &str =
    "Something went wrong while processing your request. Please try again later.";

pub const CHOOSE_IMAGE_MODE: &str = "Select image processing method";
pub const ASK_GENERATION_PROMPT: &str = "Provide text to generate image";
pub const ASK_IMAGE_TO_EDIT: &str =
    "Please send an image to edit. It must be a png file no larger than 4 mb with equal width and height.";
pub const ASK_MASK: &str = "Please send the mask. It must be a png file no larger than 4 mb the same size \
     as the original image. The mask must have a transparent area.";
pub const ASK_EDIT_PROMPT: &str = "Please provide a prompt to edit image.";
pub const ASK_IMAGE_FOR_VARIATION: &str = "Please send an image to create variations. It must be a png \
     file no larger than 4 mb with equal width and height.";
pub const EDIT_IN_PROGRESS: &str = "The image is being edited. Please wait for the result.";
pub const VARIATION_IN_PROGRESS: &str =
    "The variation of the image is being created. Please wait for the result.";
pub const GENERATE_AGAIN: &str =
    "You can send another text to generate a new image or return to the dialogue by pressing \"Cancel\"";
pub const INVALID_UPLOAD: &str =
    "I could not use that file. It must be a png file no larger than 4 mb.";
pub const UNSUPPORTED_OPERATION: &str =
    "This image operation is not available right now. Please choose another one.";

pub const LABEL_GENERATION: &str = "Image Generation";
pub const LABEL_EDITING: &str = "Image Editing";
pub const LABEL_VARIATION: &str = "Image Variation";
pub const LABEL_CANCEL: &str = "Cancel";
pub const LABEL_PROMPT_FROM: &str = "Prompt from";

/// Reminder for an event the current state does not accept
pub fn unexpected_input(state: State) -> Option<&'static str> {
    match state {
        State::Dialogue => Some("Please send me a text message."),
        State::ChoosingImageMode => Some("Please choose one of the options above."),
        State::AwaitingGenerationPrompt | State::ReturnedFromGeneration | State::AwaitingEditPrompt => {
            Some("Please send a text prompt.")
        }
        State::AwaitingImageToEdit | State::AwaitingMaskToEdit | State::AwaitingImageForVariation => {
            Some("Please send a png image as a file.")
        }
        State::Terminal => None,
    }
}
