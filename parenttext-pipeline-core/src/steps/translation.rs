use std::fs;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{path_arg, StepContext, StepHandler, StepOutcome};
use crate::config::{Language, SourceConfig, StepParams};
use crate::contract::{run_checked, ToolInvocation};
use crate::error::StepError;
use crate::tools::{TRANSLATION_CHATBOT, TRANSLATION_COMMON};

pub const MERGED_TRANSLATIONS: &str = "merged_translations.json";

/// Localises the cached translations of each language back into the flows.
pub struct Translation;

#[async_trait]
impl StepHandler for Translation {
    async fn apply(&self, ctx: &StepContext<'_>) -> Result<StepOutcome, StepError> {
        let StepParams::Translation(params) = &ctx.step.params else {
            return Err(ctx.mismatch("translation"));
        };
        let mut current = ctx.require_input()?.to_path_buf();
        let source_name = ctx
            .require_sources()?
            .first()
            .ok_or_else(|| StepError::MissingSources {
                step: ctx.step.id.clone(),
            })?;
        let SourceConfig::TranslationRepo(repo) = ctx.source(source_name)? else {
            return Err(ctx.wrong_format(source_name, "translation_repo"));
        };

        let languages: &[Language] = if params.languages.is_empty() {
            &repo.languages
        } else {
            &params.languages
        };
        if languages.is_empty() {
            warn!(step = %ctx.step.id, "[STEP] No languages configured, skipping translation");
            return Ok(StepOutcome::Unchanged);
        }

        let output = ctx.output_path();
        for lang in languages {
            let cached = ctx.config.source_input_dir(source_name).join(&lang.code);
            let merged_dir = ctx.config.source_temp_dir(source_name).join(&lang.code);
            fs::create_dir_all(&merged_dir).map_err(|e| StepError::Io {
                path: merged_dir.clone(),
                source: e,
            })?;

            run_checked(
                ctx.tool,
                ToolInvocation::new(
                    TRANSLATION_COMMON,
                    [
                        "concatenate_json".to_owned(),
                        path_arg(&cached),
                        path_arg(&merged_dir),
                        MERGED_TRANSLATIONS.to_owned(),
                    ],
                ),
            )
            .await?;

            run_checked(
                ctx.tool,
                ToolInvocation::new(
                    TRANSLATION_CHATBOT,
                    [
                        "localize".to_owned(),
                        path_arg(&current),
                        path_arg(&merged_dir.join(MERGED_TRANSLATIONS)),
                        lang.language.clone(),
                        ctx.output_name(),
                        path_arg(ctx.temp_dir()),
                    ],
                ),
            )
            .await?;

            info!(language = %lang.language, code = %lang.code, "[STEP] Localised translations");
            current = output.clone();
        }

        Ok(StepOutcome::Produced(output))
    }
}

/// Extracts texts for translators into `send_to_translators/{basename}_crowdin.pot`.
/// The flows themselves are not changed.
pub struct ExtractTextsForTranslators;

#[async_trait]
impl StepHandler for ExtractTextsForTranslators {
    async fn apply(&self, ctx: &StepContext<'_>) -> Result<StepOutcome, StepError> {
        let input = ctx.require_input()?;
        let name = ctx.output_name();

        run_checked(
            ctx.tool,
            ToolInvocation::new(
                TRANSLATION_CHATBOT,
                [
                    "extract_simple".to_owned(),
                    path_arg(input),
                    path_arg(ctx.temp_dir()),
                    name,
                ],
            ),
        )
        .await?;

        let translator_dir = ctx.config.translator_output_dir();
        fs::create_dir_all(&translator_dir).map_err(|e| StepError::Io {
            path: translator_dir.clone(),
            source: e,
        })?;
        let pot = translator_dir.join(format!("{}_crowdin.pot", ctx.config.flows_outputbasename));

        run_checked(
            ctx.tool,
            ToolInvocation::new(
                TRANSLATION_COMMON,
                ["convert".to_owned(), path_arg(&ctx.output_path()), path_arg(&pot)],
            ),
        )
        .await?;

        info!(pot = ?pot, "[STEP] Extracted texts for translators");
        Ok(StepOutcome::Unchanged)
    }
}

/// Repairs argument/quick-reply mismatches introduced by translation.
pub struct FixArgQrTranslation;

#[async_trait]
impl StepHandler for FixArgQrTranslation {
    async fn apply(&self, ctx: &StepContext<'_>) -> Result<StepOutcome, StepError> {
        let input = ctx.require_input()?;
        run_checked(
            ctx.tool,
            ToolInvocation::new(
                TRANSLATION_CHATBOT,
                [
                    "fix_arg_qr_translation".to_owned(),
                    path_arg(input),
                    path_arg(ctx.temp_dir()),
                    ctx.output_name(),
                    ctx.log_name("arg_qr_log"),
                ],
            ),
        )
        .await?;
        Ok(StepOutcome::Produced(ctx.output_path()))
    }
}

pub struct HasAnyWordCheck;

#[async_trait]
impl StepHandler for HasAnyWordCheck {
    async fn apply(&self, ctx: &StepContext<'_>) -> Result<StepOutcome, StepError> {
        let input = ctx.require_input()?;
        run_checked(
            ctx.tool,
            ToolInvocation::new(
                TRANSLATION_CHATBOT,
                [
                    "has_any_words_check".to_owned(),
                    path_arg(input),
                    path_arg(ctx.temp_dir()),
                    ctx.output_name(),
                    ctx.log_name("has_any_words_check"),
                ],
            ),
        )
        .await?;
        Ok(StepOutcome::Produced(ctx.output_path()))
    }
}

/// Writes integrity logs only.
pub struct OverallIntegrityCheck;

#[async_trait]
impl StepHandler for OverallIntegrityCheck {
    async fn apply(&self, ctx: &StepContext<'_>) -> Result<StepOutcome, StepError> {
        let input = ctx.require_input()?;
        let excel_log = ctx.temp_dir().join(ctx.log_name("excel_log.xlsx"));
        run_checked(
            ctx.tool,
            ToolInvocation::new(
                TRANSLATION_CHATBOT,
                [
                    "overall_integrity_check".to_owned(),
                    path_arg(input),
                    path_arg(ctx.temp_dir()),
                    ctx.log_name("integrity_log"),
                    path_arg(&excel_log),
                ],
            ),
        )
        .await?;
        Ok(StepOutcome::Unchanged)
    }
}
