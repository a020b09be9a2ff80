use super::command_registry::{NoArgAction, NO_ARG_COMMANDS, RAW_ARG_COMMANDS, SINGLE_PATH_COMMANDS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    Noop,
    Message(String),
    Help,
    AttachImage(String),
    ClearImage,
    SetModel(Option<String>),
    Reset,
    Quit,
    Unknown { command: String, arg: String },
}

fn find_no_arg_action(command: &str) -> Option<NoArgAction> {
    NO_ARG_COMMANDS
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

fn no_arg_input(action: NoArgAction) -> ChatInput {
    match action {
        NoArgAction::Help => ChatInput::Help,
        NoArgAction::ClearImage => ChatInput::ClearImage,
        NoArgAction::Reset => ChatInput::Reset,
        NoArgAction::Quit => ChatInput::Quit,
    }
}

/// Classifies one line of chat input. Lines starting with `/name` are
/// commands; anything else is sent to the agent as a user message.
pub fn parse_input(text: &str) -> ChatInput {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return ChatInput::Noop;
    }

    let Some(slash_tail) = raw_trimmed.strip_prefix('/') else {
        return ChatInput::Message(raw_trimmed.to_string());
    };
    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    if command_len == 0 {
        return ChatInput::Message(raw_trimmed.to_string());
    }

    let command = slash_tail[..command_len].to_ascii_lowercase();
    let arg = slash_tail[command_len..].trim();

    if let Some(action) = find_no_arg_action(&command) {
        return no_arg_input(action);
    }

    if SINGLE_PATH_COMMANDS.contains(&command.as_str()) {
        return ChatInput::AttachImage(parse_single_path_arg(arg));
    }

    if RAW_ARG_COMMANDS.contains(&command.as_str()) {
        return ChatInput::SetModel(if arg.is_empty() {
            None
        } else {
            Some(arg.to_string())
        });
    }

    ChatInput::Unknown {
        command,
        arg: arg.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_input, ChatInput};

    #[test]
    fn plain_text_is_a_message() {
        assert_eq!(
            parse_input("  What's AAPL trading at?  "),
            ChatInput::Message("What's AAPL trading at?".to_string())
        );
        assert_eq!(parse_input("   "), ChatInput::Noop);
    }

    #[test]
    fn slash_without_command_name_is_a_message() {
        assert_eq!(
            parse_input("/ shrug"),
            ChatInput::Message("/ shrug".to_string())
        );
    }

    #[test]
    fn parse_image_quoted_path() {
        assert_eq!(
            parse_input("/image \"/tmp/my chart.png\""),
            ChatInput::AttachImage("/tmp/my chart.png".to_string())
        );
        assert_eq!(
            parse_input("/attach chart.png"),
            ChatInput::AttachImage("chart.png".to_string())
        );
        assert_eq!(parse_input("/image"), ChatInput::AttachImage(String::new()));
    }

    #[test]
    fn parse_model_command() {
        assert_eq!(
            parse_input("/model gpt-4o"),
            ChatInput::SetModel(Some("gpt-4o".to_string()))
        );
        assert_eq!(parse_input("/MODEL"), ChatInput::SetModel(None));
    }

    #[test]
    fn parse_no_arg_commands() {
        assert_eq!(parse_input("/help"), ChatInput::Help);
        assert_eq!(parse_input("/clear_image"), ChatInput::ClearImage);
        assert_eq!(parse_input("/reset"), ChatInput::Reset);
        assert_eq!(parse_input("/quit"), ChatInput::Quit);
        assert_eq!(parse_input("/exit"), ChatInput::Quit);
        assert_eq!(parse_input("/help me please"), ChatInput::Help);
    }

    #[test]
    fn parse_unknown_command() {
        assert_eq!(
            parse_input("/buy AAPL 10"),
            ChatInput::Unknown {
                command: "buy".to_string(),
                arg: "AAPL 10".to_string()
            }
        );
    }
}
