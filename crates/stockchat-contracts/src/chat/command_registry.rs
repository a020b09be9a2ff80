/// Commands that take no argument; anything after the name is ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NoArgAction {
    Help,
    ClearImage,
    Reset,
    Quit,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: NoArgAction,
}

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "help",
        action: NoArgAction::Help,
    },
    CommandSpec {
        command: "clear_image",
        action: NoArgAction::ClearImage,
    },
    CommandSpec {
        command: "reset",
        action: NoArgAction::Reset,
    },
    CommandSpec {
        command: "quit",
        action: NoArgAction::Quit,
    },
    CommandSpec {
        command: "exit",
        action: NoArgAction::Quit,
    },
];

/// Commands whose argument is one (possibly quoted) image path.
pub(crate) const SINGLE_PATH_COMMANDS: &[&str] = &["image", "attach"];

/// Commands whose argument is taken verbatim.
pub(crate) const RAW_ARG_COMMANDS: &[&str] = &["model"];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/help",
    "/image <path>",
    "/clear_image",
    "/model <name>",
    "/reset",
    "/quit",
];
