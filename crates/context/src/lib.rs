//! Request-scoped context types shared between the server's auth layer and
//! the LLM dispatch pipeline, kept in their own crate so neither has to
//! depend on the other.

use config::Permission;

/// The downstream API key that authenticated an incoming request, carrying
/// the grants the dispatch pipeline's permission and model-restriction gates
/// check against (spec.md §4.4 steps 1-2).
#[derive(Debug, Clone)]
pub struct ApiKeyContext {
    /// Identifier of the matched `[llm.api_keys.*]` entry, used in logs and
    /// usage records.
    pub key_id: String,
    pub permissions: Vec<Permission>,
    pub model_restrictions: Vec<String>,
}

impl ApiKeyContext {
    /// Whether this key may reach the OpenAI-backed dispatch path.
    pub fn has_openai_permission(&self) -> bool {
        self.permissions
            .iter()
            .any(|p| matches!(p, Permission::Openai | Permission::All))
    }

    /// Whether `model` is allowed under this key's restriction list. An
    /// empty list means no restriction.
    pub fn allows_model(&self, model: &str) -> bool {
        self.model_restrictions.is_empty() || self.model_restrictions.iter().any(|allowed| allowed == model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restriction_list_gates_model_access() {
        let ctx = ApiKeyContext {
            key_id: "key_1".to_string(),
            permissions: vec![Permission::Openai],
            model_restrictions: vec!["gpt-4o".to_string()],
        };
        assert!(ctx.allows_model("gpt-4o"));
        assert!(!ctx.allows_model("gpt-4o-mini"));
        assert!(ctx.has_openai_permission());
    }
}
