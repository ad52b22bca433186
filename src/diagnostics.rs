//! Accumulated diagnostic text shown to the user.

/// Ordered list of message texts received since the last clear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageLog {
    entries: Vec<String>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<S: Into<String>>(&mut self, text: S) {
        self.entries.push(text.into());
    }

    /// Appends `text` unless an identical entry is already present.
    pub fn push_unique(&mut self, text: &str) -> bool {
        if self.contains(text) {
            return false;
        }
        self.entries.push(text.to_string());
        true
    }

    pub fn contains(&self, text: &str) -> bool {
        self.entries.iter().any(|e| e == text)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// All entries joined by newlines.
    pub fn joined(&self) -> String {
        self.entries.join("\n")
    }
}
