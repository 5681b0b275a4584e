//! Template lookup and the built-in default template.

use doctrans_shared::{DocTransError, Result, Template};
use doctrans_storage::Storage;
use doctrans_template::RenderOptions;

/// ID the built-in template is installed under.
pub const DEFAULT_TEMPLATE_ID: &str = "default";

const DEFAULT_TEMPLATE_BODY: &str = r#"{{! doctrans built-in translation template }}
<|im_start|>SYSTEM
You are a professional literary and technical translator.
Translate the user's text into {{template.targetLanguage}}.{{#if template.sourceLanguage}} The source text is written in {{template.sourceLanguage}}.{{/if}}
Preserve paragraph breaks, lists, and inline formatting. Reply with the translation only, without commentary.
{{#if session.memo}}

Notes from the requester:
{{session.memo}}
{{/if}}
{{#if session.customDict}}

Glossary (always use these renderings):
{{session.customDict}}
{{/if}}
<|im_end|>
{{#if (hasPrevious)}}
<|im_start|>USER
{{previous.sourceText}}
<|im_end|>
<|im_start|>ASSISTANT
{{previous.translatedText}}
<|im_end|>
{{/if}}
<|im_start|>USER
{{current.sourceText}}
<|im_end|>
"#;

/// The built-in template for a language pair.
///
/// `source_language` may be `"auto"` to let the model detect it. The
/// languages are read from `template.*` at render time.
pub fn default_template(source_language: &str, target_language: &str) -> Template {
    Template {
        id: DEFAULT_TEMPLATE_ID.to_string(),
        title: format!("Default ({source_language} → {target_language})"),
        source_language: source_language.to_string(),
        target_language: target_language.to_string(),
        description: Some("Built-in template with one chunk of lookback context".into()),
        content: DEFAULT_TEMPLATE_BODY.to_string(),
    }
}

/// Store a template after checking that it compiles.
pub async fn save_template(storage: &Storage, template: &Template) -> Result<()> {
    if template.id.trim().is_empty() {
        return Err(DocTransError::validation("a template id is required"));
    }
    if template.content.trim().is_empty() {
        return Err(DocTransError::validation("template content must not be empty"));
    }
    doctrans_template::compile(&template.content, RenderOptions::default())?;
    storage.save_template(template).await?;
    tracing::info!(template_id = %template.id, title = %template.title, "saved template");
    Ok(())
}

/// Load a template by ID.
pub async fn resolve_template(storage: &Storage, template_id: &str) -> Result<Template> {
    let template_id = template_id.trim();
    if template_id.is_empty() {
        return Err(DocTransError::validation("a template id is required"));
    }
    storage
        .get_template(template_id)
        .await?
        .ok_or_else(|| DocTransError::not_found("template", template_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use doctrans_shared::{Chunk, ChunkStatus, Session, TurnRole, new_id};
    use doctrans_template::TranslationContext;

    use crate::prompt::build_prompt;

    #[tokio::test]
    async fn save_rejects_broken_templates() {
        let tmp = std::env::temp_dir().join(format!("dt_tpl_{}.db", new_id()));
        let storage = Storage::open(&tmp).await.unwrap();

        let mut template = default_template("auto", "German");
        save_template(&storage, &template).await.unwrap();
        assert_eq!(
            resolve_template(&storage, " default ").await.unwrap().target_language,
            "German"
        );

        template.id = "broken".into();
        template.content = "{{#each items}}".into();
        assert!(save_template(&storage, &template).await.is_err());
        assert!(matches!(
            resolve_template(&storage, "broken").await,
            Err(DocTransError::NotFound { .. })
        ));
    }

    #[test]
    fn default_template_builds_a_prompt() {
        let template = default_template("Japanese", "English");
        assert_eq!(template.content, DEFAULT_TEMPLATE_BODY);

        let mut session = Session::new("Novel");
        session.custom_dict = Some("先輩 = senpai".into());
        let mut chunks = vec![
            Chunk::new(&session.id, 0, "第一章"),
            Chunk::new(&session.id, 1, "第二章"),
        ];
        chunks[0].status = ChunkStatus::Completed;
        chunks[0].translated_text = Some("Chapter one".into());

        let ctx = TranslationContext::new(&session, &chunks, &chunks[1]);
        let prompt = build_prompt(&template, &ctx).unwrap();

        let system = prompt.system_instruction.unwrap();
        assert!(system.contains("into English."));
        assert!(system.contains("written in Japanese."));
        assert!(system.contains("Glossary"));
        assert!(system.contains("先輩 = senpai"));
        assert!(!system.contains("Notes from the requester"));

        let turns: Vec<_> = prompt.turns.iter().map(|t| (t.role, t.text.as_str())).collect();
        assert_eq!(
            turns,
            [
                (TurnRole::User, "第一章"),
                (TurnRole::Model, "Chapter one"),
                (TurnRole::User, "第二章"),
            ]
        );
    }

    #[test]
    fn first_chunk_has_single_turn() {
        let template = default_template("auto", "French");

        let session = Session::new("Doc");
        let chunks = vec![Chunk::new(&session.id, 0, "Hello")];
        let ctx = TranslationContext::new(&session, &chunks, &chunks[0]);

        let prompt = build_prompt(&template, &ctx).unwrap();
        let system = prompt.system_instruction.unwrap();
        assert!(system.contains("into French."));
        assert!(!system.contains("written in"));
        let roles: Vec<_> = prompt.turns.iter().map(|t| t.role).collect();
        assert_eq!(roles, [TurnRole::User]);
    }

    #[test]
    fn language_labels_render_literally() {
        let template = default_template("{{current.sourceText}}", "Eng{{#if x}}lish");

        let session = Session::new("Doc");
        let chunks = vec![Chunk::new(&session.id, 0, "Hello")];
        let ctx = TranslationContext::new(&session, &chunks, &chunks[0]);

        let system = build_prompt(&template, &ctx)
            .unwrap()
            .system_instruction
            .unwrap();
        assert!(system.contains("into Eng{{#if x}}lish."));
        assert!(system.contains("written in {{current.sourceText}}."));
    }
}
