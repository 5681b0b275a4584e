//! Prompt template renderer for doctrans.
//!
//! Templates are Handlebars, rendered with the `handlebars` crate, and
//! produce a ChatML document for one chunk. Rendering is pure: no I/O, and
//! the same template and context always produce the same output.
//!
//! ```text
//! <|im_start|>SYSTEM
//! Translate {{session.title}} into French.
//! <|im_end|>
//! {{#if (hasPrevious)}}
//! <|im_start|>USER
//! {{previous.sourceText}}
//! <|im_end|>
//! <|im_start|>ASSISTANT
//! {{chunk -1 "translated"}}
//! <|im_end|>
//! {{/if}}
//! <|im_start|>USER
//! {{current.sourceText}}
//! <|im_end|>
//! ```

mod context;
mod helpers;

use doctrans_shared::{DocTransError, Result};
use handlebars::{
    Context, Handlebars, HelperDef, HelperResult, Output, RenderContext, RenderError,
    RenderErrorReason, Renderable, ScopedJson,
};
use serde_json::Value;

pub use context::{ChunkView, CurrentChunk, PreviousChunk, SessionSummary, TranslationContext};

use helpers::Helper;

const TEMPLATE_NAME: &str = "chunk";

/// Rendering switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOptions {
    /// Fail on unknown variables and helpers instead of rendering nothing.
    pub strict: bool,
}

impl RenderOptions {
    pub fn strict() -> Self {
        Self { strict: true }
    }
}

/// A parsed template, reusable across chunks.
pub struct CompiledTemplate {
    registry: Handlebars<'static>,
    options: RenderOptions,
}

impl std::fmt::Debug for CompiledTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledTemplate")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl CompiledTemplate {
    pub fn options(&self) -> RenderOptions {
        self.options
    }

    /// Render for one chunk.
    pub fn render(&self, ctx: &TranslationContext) -> Result<String> {
        self.render_data(&ctx.to_value())
    }

    /// Render against arbitrary data. Chunk helpers only see the chunk
    /// entries the data carries.
    pub fn render_data(&self, data: &Value) -> Result<String> {
        self.registry
            .render(TEMPLATE_NAME, data)
            .map_err(|e| DocTransError::prompt_build(render_message(&e)))
    }
}

/// Parse template source. Syntax errors are reported as prompt-build errors.
pub fn compile(source: &str, options: RenderOptions) -> Result<CompiledTemplate> {
    let mut registry = Handlebars::new();
    registry.register_escape_fn(handlebars::no_escape);
    registry.set_strict_mode(options.strict);
    for helper in Helper::ALL {
        registry.register_helper(helper.name(), Box::new(HelperCall(helper)));
    }
    registry.register_helper(
        "helperMissing",
        Box::new(MissingHelper {
            strict: options.strict,
        }),
    );
    registry
        .register_template_string(TEMPLATE_NAME, source)
        .map_err(|e| DocTransError::prompt_build(e.to_string()))?;
    tracing::debug!(strict = options.strict, bytes = source.len(), "compiled template");

    Ok(CompiledTemplate { registry, options })
}

/// Compile and render in one step.
pub fn render(source: &str, ctx: &TranslationContext, options: RenderOptions) -> Result<String> {
    compile(source, options)?.render(ctx)
}

fn render_message(err: &RenderError) -> String {
    match err.reason() {
        RenderErrorReason::Other(message) => message.clone(),
        RenderErrorReason::MissingVariable(Some(path)) => {
            format!("\"{path}\" not defined in context")
        }
        _ => err.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Engine glue
// ---------------------------------------------------------------------------

/// Registers one [`Helper`] with the engine.
///
/// Inline and subexpression calls produce the helper's value. Block calls
/// render the body when the value is truthy and the inverse otherwise.
struct HelperCall(Helper);

impl HelperCall {
    fn value(&self, h: &handlebars::Helper<'_>, ctx: &Context) -> Value {
        let args: Vec<Value> = h.params().iter().map(|p| p.value().clone()).collect();
        self.0.call(&args, ctx.data())
    }
}

impl HelperDef for HelperCall {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &handlebars::Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> std::result::Result<ScopedJson<'rc>, RenderError> {
        Ok(ScopedJson::Derived(self.value(h, ctx)))
    }

    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &handlebars::Helper<'rc>,
        r: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let value = self.value(h, ctx);
        if !h.is_block() {
            out.write(&helpers::to_display(&value))?;
            return Ok(());
        }

        let branch = if helpers::is_truthy(&value) {
            h.template()
        } else {
            h.inverse()
        };
        match branch {
            Some(template) => template.render(r, ctx, rc, out),
            None => Ok(()),
        }
    }
}

/// `helperMissing` hook: unknown helpers are `null`, or an error in strict mode.
struct MissingHelper {
    strict: bool,
}

impl HelperDef for MissingHelper {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &handlebars::Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> std::result::Result<ScopedJson<'rc>, RenderError> {
        if self.strict {
            return Err(RenderErrorReason::Other(format!("Missing helper: \"{}\"", h.name())).into());
        }
        Ok(ScopedJson::Derived(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doctrans_shared::{Chunk, ChunkStatus, Session};
    use serde_json::json;

    fn data(src: &str, value: Value) -> String {
        compile(src, RenderOptions::default())
            .and_then(|t| t.render_data(&value))
            .unwrap()
    }

    fn two_chunk_context(current: usize) -> TranslationContext {
        let mut session = Session::new("Manual");
        session.memo = Some("keep terms".into());
        session.total_chunks = 2;
        let mut chunks = vec![
            Chunk::new(&session.id, 0, "Hello"),
            Chunk::new(&session.id, 1, "World"),
        ];
        chunks[0].status = ChunkStatus::Completed;
        chunks[0].translated_text = Some("Bonjour".into());
        TranslationContext::new(&session, &chunks, &chunks[current])
    }

    #[test]
    fn interpolates_without_escaping() {
        let out = data("{{a.b}} {{{a.c}}} {{a.c}} {{list.[1]}}", json!({
            "a": {"b": 1, "c": "<x & y>"},
            "list": ["p", "q"]
        }));
        assert_eq!(out, "1 <x & y> <x & y> q");
    }

    #[test]
    fn if_else_chains() {
        let src = "{{#if a}}A{{else if b}}B{{else}}C{{/if}}";
        assert_eq!(data(src, json!({"a": 1})), "A");
        assert_eq!(data(src, json!({"b": true})), "B");
        assert_eq!(data(src, json!({"a": 0, "b": []})), "C");
        assert_eq!(data("{{#unless x}}none{{else}}some{{/unless}}", json!({})), "none");
    }

    #[test]
    fn each_and_with_blocks() {
        let src = "{{#each items}}{{@index}}:{{this}};{{/each}}";
        assert_eq!(data(src, json!({"items": ["a", "b"]})), "0:a;1:b;");

        let src = "{{#with user}}{{name}} of {{@root.team}}{{/with}}";
        assert_eq!(data(src, json!({"user": {"name": "Ann"}, "team": "T"})), "Ann of T");
    }

    #[test]
    fn helpers_as_blocks() {
        let t = compile(
            "{{#hasPrevious}}prev{{else}}first{{/hasPrevious}}",
            RenderOptions::default(),
        )
        .unwrap();
        assert_eq!(t.render(&two_chunk_context(1)).unwrap(), "prev");
        assert_eq!(t.render(&two_chunk_context(0)).unwrap(), "first");
    }

    #[test]
    fn translation_helpers_in_templates() {
        let src = "{{#if (hasPrevious)}}{{chunk -1 \"translated\"}}|{{/if}}{{current.sourceText}} {{currentOrder}}/{{chunkCount}}{{#if (isLastChunk)}} last{{/if}}";
        let ctx = two_chunk_context(1);
        assert_eq!(
            render(src, &ctx, RenderOptions::default()).unwrap(),
            "Bonjour|World 1/2 last"
        );

        let ctx = two_chunk_context(0);
        assert_eq!(
            render(src, &ctx, RenderOptions::default()).unwrap(),
            "Hello 0/2"
        );
    }

    #[test]
    fn helper_values_nest_in_subexpressions() {
        let src = "{{#if (and (gt chunkCount 1) (not (isFirstChunk)))}}later{{else}}early{{/if}}";
        let t = compile(src, RenderOptions::default()).unwrap();
        assert_eq!(t.render(&two_chunk_context(1)).unwrap(), "later");
        assert_eq!(t.render(&two_chunk_context(0)).unwrap(), "early");
    }

    #[test]
    fn huge_offsets_render_empty() {
        let src = "[{{hasChunk 9300000000000000000}}][{{chunk -9300000000000000000}}][{{chunk 0.5}}][{{chunk \"x\"}}]";
        let out = render(src, &two_chunk_context(1), RenderOptions::default()).unwrap();
        assert_eq!(out, "[false][][][]");
    }

    #[test]
    fn previous_is_null_on_first_chunk() {
        let ctx = two_chunk_context(0);
        let out = render(
            "{{#if previous}}has{{else}}none{{/if}}:{{previous.translatedText}}",
            &ctx,
            RenderOptions::default(),
        )
        .unwrap();
        assert_eq!(out, "none:");
    }

    #[test]
    fn non_strict_ignores_unknowns() {
        assert_eq!(
            data("[{{missing.deep}}][{{nope 1 2}}][{{#if (nope)}}x{{/if}}]", json!({})),
            "[][][]"
        );
    }

    #[test]
    fn strict_mode_names_missing_things() {
        let t = compile("{{nope 1}}", RenderOptions::strict()).unwrap();
        assert!(t.options().strict);
        let err = t.render_data(&json!({})).unwrap_err();
        assert!(matches!(err, DocTransError::PromptBuild { .. }));
        assert!(err.to_string().contains("nope"), "{err}");

        let t = compile("{{session.nickname}}", RenderOptions::strict()).unwrap();
        let err = t.render(&two_chunk_context(0)).unwrap_err();
        assert!(matches!(err, DocTransError::PromptBuild { .. }));
        assert!(err.to_string().contains("nickname"), "{err}");

        let t = compile("{{session.memo}}", RenderOptions::strict()).unwrap();
        assert_eq!(t.render(&two_chunk_context(0)).unwrap(), "keep terms");
    }

    #[test]
    fn template_text_is_not_reinterpreted() {
        let out = data("{{label}}", json!({"label": "{{current.sourceText}}"}));
        assert_eq!(out, "{{current.sourceText}}");
    }

    #[test]
    fn syntax_errors_surface_at_compile() {
        let err = compile("{{#if x}}", RenderOptions::default()).unwrap_err();
        assert!(matches!(err, DocTransError::PromptBuild { .. }));
        assert!(compile("{{#each items}}{{/with}}", RenderOptions::default()).is_err());
    }
}
