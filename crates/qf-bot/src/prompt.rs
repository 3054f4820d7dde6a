//! Interactive phone-number prompt

use std::borrow::Cow;

use nu_ansi_term::{Color, Style};
use reedline::{Prompt, PromptEditMode, PromptHistorySearch, Reedline, Signal};

use qf_core::OperatorIdentity;

pub const PHONE_QUESTION: &str = "Enter your WhatsApp phone number (digits only, no leading +)";

struct PhonePrompt {
    style: Style,
}

impl PhonePrompt {
    fn new() -> Self {
        Self {
            style: Color::Cyan.bold(),
        }
    }
}

impl Prompt for PhonePrompt {
    fn render_prompt_left(&self) -> Cow<'_, str> {
        Cow::Owned(self.style.paint("📞 ").to_string())
    }

    fn render_prompt_right(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _prompt_mode: PromptEditMode) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_history_search_indicator(&self, _history_search: PromptHistorySearch) -> Cow<'_, str> {
        Cow::Borrowed("")
    }
}

/// Ask for the operator's number; `None` if the prompt was cancelled
pub fn read_phone_number() -> anyhow::Result<Option<String>> {
    println!("{}", PHONE_QUESTION);

    let mut line_editor = Reedline::create();
    match line_editor.read_line(&PhonePrompt::new())? {
        Signal::Success(line) => Ok(Some(line)),
        Signal::CtrlC | Signal::CtrlD => Ok(None),
    }
}

/// Validate the entered number; the error is the message shown to the user
pub fn parse_operator(input: &str) -> Result<OperatorIdentity, String> {
    OperatorIdentity::from_input(input).map_err(|_| {
        "Invalid number. It must contain only digits and be between 8 and 15 characters long."
            .to_string()
    })
}
