//! `entrypoint-config`: metadata only, no filesystem changes.

use async_trait::async_trait;

use super::StepAction;
use crate::cache::Entrypoint;
use crate::execute::types::{ActionContext, ActionError, ActionOutput};
use crate::plan::StepParams;

#[derive(Debug, Clone, Copy, Default)]
pub struct EntrypointAction;

#[async_trait]
impl StepAction for EntrypointAction {
  async fn run(&self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ActionError> {
    let StepParams::Entrypoint(spec) = &ctx.step.params else {
      return Err(ActionError::InvalidParams { kind: ctx.step.kind });
    };

    Ok(ActionOutput {
      entrypoint: Some(Entrypoint {
        command: spec.command.clone(),
        workdir: spec.workdir.clone(),
        env: spec.env.clone(),
      }),
      ..Default::default()
    })
  }
}
