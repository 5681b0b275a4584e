//! Template → ChatML → prompt pipeline for one chunk.

use doctrans_shared::{DocTransError, Prompt, Result, Template};
use doctrans_template::{CompiledTemplate, RenderOptions, TranslationContext};
use serde_json::{Value, json};

/// Compiles a template once and builds a prompt per chunk.
///
/// A template that fails to compile is not fatal: every prompt built from it
/// fails with the same prompt-build error, so each chunk is marked failed.
pub struct PromptBuilder {
    template: std::result::Result<CompiledTemplate, String>,
    /// Rendered as `template.*`.
    template_data: Value,
}

impl PromptBuilder {
    pub fn new(template: &Template) -> Self {
        Self::with_options(template, RenderOptions::default())
    }

    pub fn with_options(template: &Template, options: RenderOptions) -> Self {
        let compiled =
            doctrans_template::compile(&template.content, options).map_err(|e| match e {
                DocTransError::PromptBuild { message } => message,
                other => other.to_string(),
            });
        if let Err(message) = &compiled {
            tracing::warn!(template_id = %template.id, error = %message, "template does not compile");
        }

        Self {
            template: compiled,
            template_data: template_data(template),
        }
    }

    pub fn build(&self, ctx: &TranslationContext) -> Result<Prompt> {
        let template = self
            .template
            .as_ref()
            .map_err(|message| DocTransError::prompt_build(message.clone()))?;

        let mut root = ctx.to_value();
        if let Value::Object(map) = &mut root {
            map.insert("template".to_string(), self.template_data.clone());
        }

        let document = template.render_data(&root)?;
        let messages = doctrans_chatml::parse(&document).into_messages()?;
        Ok(doctrans_chatml::to_prompt(&messages))
    }
}

/// One-shot form of [`PromptBuilder::build`].
pub fn build_prompt(template: &Template, ctx: &TranslationContext) -> Result<Prompt> {
    PromptBuilder::new(template).build(ctx)
}

/// Template metadata visible to the template itself. An `auto` or blank
/// source language is `null`.
fn template_data(template: &Template) -> Value {
    let source = template.source_language.trim();
    let source_language = if source.is_empty() || source.eq_ignore_ascii_case("auto") {
        Value::Null
    } else {
        Value::String(source.to_string())
    };

    json!({
        "id": template.id,
        "title": template.title,
        "sourceLanguage": source_language,
        "targetLanguage": template.target_language.trim(),
    })
}
