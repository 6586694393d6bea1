use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Error,
    Warning,
    Info,
}

impl Level {
    fn label(&self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Warning => "warning",
            Level::Info => "info",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub level: Level,
    pub message: String,
    pub actor: Option<String>,
    pub line: Option<usize>,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.level.label(), self.message)?;
        if let Some(actor) = &self.actor {
            write!(f, " [actor: {}]", actor)?;
        }
        if let Some(line) = self.line {
            write!(f, " [line: {}]", line)?;
        }
        Ok(())
    }
}

/// Batched, non-fatal findings from one compile or decompile pass. Fatal
/// conditions travel as `Err` values instead; this collector exists so a
/// whole project can be reported in one go rather than stopping at the
/// first problem script.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, message: impl Into<String>, actor: Option<&str>, line: Option<usize>) {
        self.push(Level::Error, message, actor, line);
    }

    pub fn warning(&mut self, message: impl Into<String>, actor: Option<&str>, line: Option<usize>) {
        self.push(Level::Warning, message, actor, line);
    }

    pub fn info(&mut self, message: impl Into<String>, actor: Option<&str>, line: Option<usize>) {
        self.push(Level::Info, message, actor, line);
    }

    fn push(
        &mut self,
        level: Level,
        message: impl Into<String>,
        actor: Option<&str>,
        line: Option<usize>,
    ) {
        self.items.push(Diagnostic {
            level,
            message: message.into(),
            actor: actor.map(str::to_string),
            line,
        });
    }

    pub fn items(&self) -> &[Diagnostic] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|item| item.level == Level::Error)
    }

    pub fn count(&self, level: Level) -> usize {
        self.items.iter().filter(|item| item.level == level).count()
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    pub fn summary(&self) -> String {
        format!(
            "{} error(s), {} warning(s), {} info",
            self.count(Level::Error),
            self.count(Level::Warning),
            self.count(Level::Info)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_counted_independently() {
        let mut diags = Diagnostics::new();
        diags.warning("auto-created variable 'score'", Some("Sprite1"), Some(3));
        diags.error("script 2 failed to parse", Some("Sprite1"), None);
        diags.info("1 orphaned chain recovered", None, None);
        assert!(diags.has_errors());
        assert_eq!(diags.count(Level::Warning), 1);
        assert_eq!(diags.summary(), "1 error(s), 1 warning(s), 1 info");
    }

    #[test]
    fn diagnostic_display_includes_tags() {
        let mut diags = Diagnostics::new();
        diags.warning("unknown dropdown value", Some("Stage"), Some(7));
        let rendered = diags.items()[0].to_string();
        assert!(rendered.contains("warning: unknown dropdown value"));
        assert!(rendered.contains("[actor: Stage]"));
        assert!(rendered.contains("[line: 7]"));
    }
}
