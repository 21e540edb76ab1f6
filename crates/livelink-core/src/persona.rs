//! Persona assembly: the system instruction sent with each connect.
//!
//! The instruction text itself is caller-supplied; this module only handles
//! the memory injection contract: a `{{USER_MEMORY}}` placeholder replaced
//! with the persisted record (or a friendly default when memory is empty) at
//! connect time, so the model wakes up already knowing the user.

/// Placeholder token replaced with the stored memory record.
pub const MEMORY_PLACEHOLDER: &str = "{{USER_MEMORY}}";

/// Injected when no memory record exists yet.
pub const DEFAULT_EMPTY_MEMORY: &str = "No long-term memory yet. This is a first meeting.";

/// A system-instruction template with a memory placeholder.
#[derive(Debug, Clone)]
pub struct PersonaTemplate {
    template: String,
}

impl PersonaTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Render the instruction, substituting the memory record. A template
    /// without the placeholder renders unchanged.
    pub fn render(&self, memory: Option<&str>) -> String {
        let record = match memory {
            Some(m) if !m.trim().is_empty() => m,
            _ => DEFAULT_EMPTY_MEMORY,
        };
        self.template.replace(MEMORY_PLACEHOLDER, record)
    }
}

impl Default for PersonaTemplate {
    fn default() -> Self {
        Self::new(concat!(
            "You are a warm, loyal voice companion. Keep replies short and\n",
            "conversational. If the user is silent for a while, gently check in.\n",
            "\n",
            "What you remember about the user:\n",
            "{{USER_MEMORY}}\n",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_memory_into_placeholder() {
        let persona = PersonaTemplate::new("Archive:\n{{USER_MEMORY}}");
        let out = persona.render(Some("favorite samosa stall is in Katra"));
        assert_eq!(out, "Archive:\nfavorite samosa stall is in Katra");
    }

    #[test]
    fn empty_memory_uses_default_text() {
        let persona = PersonaTemplate::new("{{USER_MEMORY}}");
        assert_eq!(persona.render(None), DEFAULT_EMPTY_MEMORY);
        assert_eq!(persona.render(Some("   ")), DEFAULT_EMPTY_MEMORY);
    }

    #[test]
    fn template_without_placeholder_is_unchanged() {
        let persona = PersonaTemplate::new("static instruction");
        assert_eq!(persona.render(Some("ignored")), "static instruction");
    }
}
