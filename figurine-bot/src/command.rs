//! Command parsing for figurine invocations.
//!
//! Recognized forms:
//! - `figurine`, `/figurine`
//! - `figurine style=2`, `figurine -s 2`, `figurine --style 2`, `figurine 2`
//! - `手办化`, `手办化2`
//! - `figurine reset`, `手办化重置`
//!
//! Anything after the command that is not a style option is kept as the
//! inline argument, where the image locator looks first.

const COMMAND_NAMES: &[&str] = &["figurine", "/figurine"];
const CJK_COMMAND: &str = "手办化";
const RESET_WORDS: &[&str] = &["reset", "cancel", "重置"];

/// Style requested by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StyleArg {
    /// No style given; the configured default applies.
    Default,
    /// An explicit numeric style.
    Value(u32),
    /// A style option whose value is not a number.
    Invalid(String),
}

impl StyleArg {
    fn parse(value: &str) -> Self {
        value
            .trim()
            .parse::<u32>()
            .map_or_else(|_| Self::Invalid(value.to_string()), Self::Value)
    }
}

/// A parsed figurine command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FigurineCommand {
    /// Start a transformation.
    Transform {
        style: StyleArg,
        argument: Option<String>,
    },
    /// Clear any pending wait or in-flight marker for the sender.
    Reset,
}

/// Parse a message text into a figurine command.
///
/// Returns `None` for text that is not a figurine command.
pub fn parse_command(text: &str) -> Option<FigurineCommand> {
    let text = text.trim();
    let mut tokens = text.split_whitespace();
    let head = tokens.next()?;
    let rest: Vec<&str> = tokens.collect();

    if COMMAND_NAMES.iter().any(|name| head.eq_ignore_ascii_case(name)) {
        return Some(parse_arguments(StyleArg::Default, &rest));
    }

    let suffix = head.strip_prefix(CJK_COMMAND)?;
    if RESET_WORDS.contains(&suffix) {
        return Some(FigurineCommand::Reset);
    }
    let style = if suffix.is_empty() {
        StyleArg::Default
    } else {
        StyleArg::parse(suffix)
    };
    Some(parse_arguments(style, &rest))
}

fn parse_arguments(mut style: StyleArg, rest: &[&str]) -> FigurineCommand {
    if let Some(first) = rest.first() {
        if RESET_WORDS.iter().any(|w| first.eq_ignore_ascii_case(w)) {
            return FigurineCommand::Reset;
        }
    }

    let mut argument = Vec::new();
    let mut i = 0;
    while i < rest.len() {
        let token = rest[i];
        if let Some(value) = token.strip_prefix("style=") {
            style = StyleArg::parse(value);
        } else if token == "-s" || token == "--style" {
            match rest.get(i + 1) {
                Some(value) => {
                    style = StyleArg::parse(value);
                    i += 1;
                }
                None => style = StyleArg::Invalid(String::new()),
            }
        } else if style == StyleArg::Default && argument.is_empty() && token.parse::<u32>().is_ok() {
            style = StyleArg::parse(token);
        } else {
            argument.push(token);
        }
        i += 1;
    }

    FigurineCommand::Transform {
        style,
        argument: (!argument.is_empty()).then(|| argument.join(" ")),
    }
}
