//! Conversation states, inbound events and the transition table

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a session is in the conversation flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum State {
    #[default]
    Dialogue,
    ChoosingImageMode,
    AwaitingGenerationPrompt,
    AwaitingImageToEdit,
    AwaitingMaskToEdit,
    AwaitingEditPrompt,
    AwaitingImageForVariation,
    ReturnedFromGeneration,
    Terminal,
}

impl State {
    pub const ALL: [State; 9] = [
        State::Dialogue,
        State::ChoosingImageMode,
        State::AwaitingGenerationPrompt,
        State::AwaitingImageToEdit,
        State::AwaitingMaskToEdit,
        State::AwaitingEditPrompt,
        State::AwaitingImageForVariation,
        State::ReturnedFromGeneration,
        State::Terminal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Dialogue => "dialogue",
            State::ChoosingImageMode => "choosing_image_mode",
            State::AwaitingGenerationPrompt => "awaiting_generation_prompt",
            State::AwaitingImageToEdit => "awaiting_image_to_edit",
            State::AwaitingMaskToEdit => "awaiting_mask_to_edit",
            State::AwaitingEditPrompt => "awaiting_edit_prompt",
            State::AwaitingImageForVariation => "awaiting_image_for_variation",
            State::ReturnedFromGeneration => "returned_from_generation",
            State::Terminal => "terminal",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Terminal)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Slash commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Greet, or reset the dialogue
    Start,
    /// Cancel everything and end the conversation
    Stop,
    /// Open the image menu
    Images,
}

/// Inline menu buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MenuAction {
    Generate,
    Edit,
    Variation,
    /// Let the bot write the image prompt
    BotPrompt,
    /// Leave the image flow and go back to the dialogue
    Cancel,
}

/// A file sent by the user
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Bytes,
}

/// Inbound event for one session
#[derive(Debug, Clone)]
pub enum Event {
    Text(String),
    Command(Command),
    Callback(MenuAction),
    Upload(Upload),
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Text(_) => "text",
            Event::Command(_) => "command",
            Event::Callback(_) => "callback",
            Event::Upload(_) => "upload",
        }
    }
}

/// What a handler does for an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Greet,
    Converse,
    OpenImageMenu,
    AskGenerationPrompt,
    GenerateFromText,
    GenerateFromBotPrompt,
    AskImageToEdit,
    StoreImageToEdit,
    StoreMask,
    EditImage,
    AskImageForVariation,
    VaryImage,
    ReturnToDialogue,
    Farewell,
}

/// Table entry: the handler to run and the state it leads to on success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub action: Action,
    pub target: State,
}

const fn to(action: Action, target: State) -> Option<Transition> {
    Some(Transition { action, target })
}

/// Resolve `(state, event)` to a transition; `None` means the event is not
/// accepted in this state
pub fn resolve(state: State, event: &Event) -> Option<Transition> {
    use Action::*;
    use State::*;

    // Fallbacks available from every state
    match (state, event) {
        (Terminal, Event::Command(Command::Start))
        | (Terminal, Event::Callback(MenuAction::Cancel)) => return to(ReturnToDialogue, Dialogue),
        (Terminal, _) => return None,
        (_, Event::Command(Command::Stop)) => return to(Farewell, Terminal),
        (_, Event::Command(Command::Start)) => return to(Greet, Dialogue),
        (_, Event::Callback(MenuAction::Cancel)) => return to(ReturnToDialogue, Dialogue),
        _ => {}
    }

    match (state, event) {
        (Dialogue, Event::Text(_)) => to(Converse, Dialogue),
        (Dialogue, Event::Command(Command::Images)) => to(OpenImageMenu, ChoosingImageMode),

        (ChoosingImageMode, Event::Callback(MenuAction::Generate)) => {
            to(AskGenerationPrompt, AwaitingGenerationPrompt)
        }
        (ChoosingImageMode, Event::Callback(MenuAction::Edit)) => {
            to(AskImageToEdit, AwaitingImageToEdit)
        }
        (ChoosingImageMode, Event::Callback(MenuAction::Variation)) => {
            to(AskImageForVariation, AwaitingImageForVariation)
        }

        (AwaitingGenerationPrompt | ReturnedFromGeneration, Event::Text(_)) => {
            to(GenerateFromText, ReturnedFromGeneration)
        }
        (AwaitingGenerationPrompt | ReturnedFromGeneration, Event::Callback(MenuAction::BotPrompt)) => {
            to(GenerateFromBotPrompt, ReturnedFromGeneration)
        }

        (AwaitingImageToEdit, Event::Upload(_)) => to(StoreImageToEdit, AwaitingMaskToEdit),
        (AwaitingMaskToEdit, Event::Upload(_)) => to(StoreMask, AwaitingEditPrompt),
        (AwaitingEditPrompt, Event::Text(_)) => to(EditImage, ChoosingImageMode),

        (AwaitingImageForVariation, Event::Upload(_)) => to(VaryImage, ChoosingImageMode),

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload() -> Event {
        Event::Upload(Upload {
            file_name: "a.png".to_string(),
            bytes: Bytes::from_static(b"png"),
        })
    }

    fn text() -> Event {
        Event::Text("hello".to_string())
    }

    #[test]
    fn test_stop_reaches_terminal_from_any_non_terminal_state() {
        for state in State::ALL.into_iter().filter(|s| !s.is_terminal()) {
            let transition = resolve(state, &Event::Command(Command::Stop)).unwrap();
            assert_eq!(transition.target, State::Terminal, "from {}", state);
            assert_eq!(transition.action, Action::Farewell);
        }
    }

    #[test]
    fn test_terminal_resumes_to_dialogue() {
        for event in [Event::Command(Command::Start), Event::Callback(MenuAction::Cancel)] {
            let transition = resolve(State::Terminal, &event).unwrap();
            assert_eq!(transition.target, State::Dialogue);
        }
        assert!(resolve(State::Terminal, &text()).is_none());
        assert!(resolve(State::Terminal, &Event::Command(Command::Stop)).is_none());
    }

    #[test]
    fn test_generation_path() {
        let menu = resolve(State::Dialogue, &Event::Command(Command::Images)).unwrap();
        assert_eq!(menu.target, State::ChoosingImageMode);

        let ask = resolve(menu.target, &Event::Callback(MenuAction::Generate)).unwrap();
        assert_eq!(ask.target, State::AwaitingGenerationPrompt);

        let generated = resolve(ask.target, &text()).unwrap();
        assert_eq!(generated.action, Action::GenerateFromText);
        assert_eq!(generated.target, State::ReturnedFromGeneration);

        let again = resolve(generated.target, &Event::Callback(MenuAction::BotPrompt)).unwrap();
        assert_eq!(again.action, Action::GenerateFromBotPrompt);
        assert_eq!(again.target, State::ReturnedFromGeneration);
    }

    #[test]
    fn test_edit_path() {
        let ask = resolve(State::ChoosingImageMode, &Event::Callback(MenuAction::Edit)).unwrap();
        let image = resolve(ask.target, &upload()).unwrap();
        assert_eq!(image.target, State::AwaitingMaskToEdit);
        let mask = resolve(image.target, &upload()).unwrap();
        assert_eq!(mask.target, State::AwaitingEditPrompt);
        let edit = resolve(mask.target, &text()).unwrap();
        assert_eq!(edit.action, Action::EditImage);
        assert_eq!(edit.target, State::ChoosingImageMode);
    }

    #[test]
    fn test_variation_path() {
        let ask = resolve(State::ChoosingImageMode, &Event::Callback(MenuAction::Variation)).unwrap();
        assert_eq!(ask.target, State::AwaitingImageForVariation);
        let vary = resolve(ask.target, &upload()).unwrap();
        assert_eq!(vary.action, Action::VaryImage);
        assert_eq!(vary.target, State::ChoosingImageMode);
    }

    #[test]
    fn test_unaccepted_events() {
        assert!(resolve(State::AwaitingImageToEdit, &text()).is_none());
        assert!(resolve(State::Dialogue, &upload()).is_none());
        assert!(resolve(State::ChoosingImageMode, &text()).is_none());
        assert!(resolve(State::AwaitingEditPrompt, &Event::Callback(MenuAction::BotPrompt)).is_none());
    }

    #[test]
    fn test_cancel_button_returns_to_dialogue() {
        let transition =
            resolve(State::AwaitingMaskToEdit, &Event::Callback(MenuAction::Cancel)).unwrap();
        assert_eq!(transition.action, Action::ReturnToDialogue);
        assert_eq!(transition.target, State::Dialogue);
    }
}
