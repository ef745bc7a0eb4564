use async_trait::async_trait;
use tracing::info;

use super::{path_arg, scalar_arg, StepContext, StepHandler, StepOutcome};
use crate::config::{QrTreatment, SourceConfig, StepParams};
use crate::contract::{run_checked, ToolInvocation};
use crate::error::StepError;
use crate::pull_data::SAFEGUARDING_WORDS_FILE;
use crate::tools::{SAFEGUARDING_ADD, SAFEGUARDING_REDIRECT, TRANSLATION_CHATBOT};

pub const SELECT_PHRASES_KEY: &str = "select_phrases_file";
pub const SPECIAL_WORDS_KEY: &str = "special_words_file";

/// Reshapes quick replies for the target channel.
pub struct QrTreatmentStep;

#[async_trait]
impl StepHandler for QrTreatmentStep {
    async fn apply(&self, ctx: &StepContext<'_>) -> Result<StepOutcome, StepError> {
        let StepParams::QrTreatment(params) = &ctx.step.params else {
            return Err(ctx.mismatch("qr_treatment"));
        };
        if params.qr_treatment == QrTreatment::Skip {
            info!(step = %ctx.step.id, "[STEP] No quick reply treatment specified");
            return Ok(StepOutcome::Unchanged);
        }
        let input = path_arg(ctx.require_input()?);
        let outname = ctx.output_name();
        let outdir = path_arg(ctx.temp_dir());

        let select_phrases = ctx
            .json_source_file(SELECT_PHRASES_KEY)
            .map(|p| path_arg(&p))
            .unwrap_or_default();
        let special_words = ctx
            .json_source_file(SPECIAL_WORDS_KEY)
            .map(|p| path_arg(&p))
            .unwrap_or_default();
        let qr_limit = params.qr_limit.to_string();
        let add_selectors = scalar_arg(params.add_selectors.as_ref());
        let count_threshold = scalar_arg(params.count_threshold.as_ref());
        let length_threshold = scalar_arg(params.length_threshold.as_ref());

        let args: Vec<String> = match params.qr_treatment {
            QrTreatment::Move => vec![
                "move_quick_replies".to_owned(),
                input,
                select_phrases,
                outname,
                outdir,
                add_selectors,
                qr_limit,
                special_words,
            ],
            QrTreatment::MoveAndMod => vec![
                "move_and_mod_quick_replies".to_owned(),
                input,
                select_phrases,
                params.replace_phrases.clone(),
                outname,
                outdir,
                add_selectors,
                qr_limit,
                special_words,
            ],
            QrTreatment::Reformat => vec![
                "reformat_quick_replies".to_owned(),
                input,
                select_phrases,
                outname,
                outdir,
                count_threshold,
                length_threshold,
                qr_limit,
                special_words,
            ],
            QrTreatment::ReformatChina => vec![
                "reformat_quick_replies_china".to_owned(),
                input,
                select_phrases,
                outname,
                outdir,
                count_threshold,
                length_threshold,
                qr_limit,
                special_words,
            ],
            QrTreatment::Wechat => vec!["convert_qr_to_html".to_owned(), input, outname, outdir],
            QrTreatment::Skip => return Ok(StepOutcome::Unchanged),
        };

        run_checked(ctx.tool, ToolInvocation::new(TRANSLATION_CHATBOT, args)).await?;
        Ok(StepOutcome::Produced(ctx.output_path()))
    }
}

/// Adds safeguarding flows and rewires redirect flows to the safeguarding keywords.
pub struct Safeguarding;

#[async_trait]
impl StepHandler for Safeguarding {
    async fn apply(&self, ctx: &StepContext<'_>) -> Result<StepOutcome, StepError> {
        let StepParams::Safeguarding(params) = &ctx.step.params else {
            return Err(ctx.mismatch("safeguarding"));
        };
        let input = ctx.require_input()?;
        let source_name = ctx
            .require_sources()?
            .first()
            .ok_or_else(|| StepError::MissingSources {
                step: ctx.step.id.clone(),
            })?;
        if !matches!(ctx.source(source_name)?, SourceConfig::Safeguarding(_)) {
            return Err(ctx.wrong_format(source_name, "safeguarding"));
        }
        let words = path_arg(&ctx.config.source_input_dir(source_name).join(SAFEGUARDING_WORDS_FILE));
        let output = path_arg(&ctx.output_path());
        let mut current = path_arg(input);

        if let (Some(flow_uuid), Some(flow_name)) = (&params.flow_uuid, &params.flow_name) {
            run_checked(
                ctx.tool,
                ToolInvocation::new(
                    SAFEGUARDING_ADD,
                    [
                        current.clone(),
                        words.clone(),
                        output.clone(),
                        flow_uuid.clone(),
                        flow_name.clone(),
                    ],
                ),
            )
            .await?;
            info!(flow_name = %flow_name, "[STEP] Added safeguarding flows");
            current = output.clone();
        }

        if let Some(redirect_flow_names) = &params.redirect_flow_names {
            run_checked(
                ctx.tool,
                ToolInvocation::new(
                    SAFEGUARDING_REDIRECT,
                    [current, words, output.clone(), redirect_flow_names.clone()],
                ),
            )
            .await?;
            info!("[STEP] Edited safeguarding redirect flows");
        }

        Ok(StepOutcome::Produced(ctx.output_path()))
    }
}
