//! Captioning and tagging: the two external-service stages. Both send the
//! medium thumbnail to the shared rate-limited vision client and are
//! entirely optional — a disabled or unreachable endpoint marks the ledger
//! row `skipped`, never `failed`.

use async_trait::async_trait;
use lumen_model::{PhotoFile, Stage};
use tracing::debug;

use super::{StageContext, StageOp};
use crate::error::{IndexError, Result};

async fn thumbnail_bytes(cx: &StageContext, file: &PhotoFile) -> Result<Vec<u8>> {
    let Some(thumb) = cx.catalog.thumbnail_path(&file.id, 600).await? else {
        return Err(IndexError::NotFound("no medium thumbnail".into()));
    };
    cx.artifacts.read(&thumb).await
}

#[derive(Debug)]
pub struct CaptionStage;

#[async_trait]
impl StageOp for CaptionStage {
    fn stage(&self) -> Stage {
        Stage::Caption
    }

    async fn run(&self, cx: &StageContext, file: &PhotoFile, attempts: i64) -> Result<()> {
        let jpeg = thumbnail_bytes(cx, file).await?;
        let caption = cx.vision.caption(&jpeg).await?;
        debug!(target: "stage::caption", path = %file.path, caption = %caption);
        cx.catalog.write_caption(&file.id, &caption, attempts).await
    }
}

#[derive(Debug)]
pub struct TaggingStage;

#[async_trait]
impl StageOp for TaggingStage {
    fn stage(&self) -> Stage {
        Stage::Tagging
    }

    async fn run(&self, cx: &StageContext, file: &PhotoFile, attempts: i64) -> Result<()> {
        let jpeg = thumbnail_bytes(cx, file).await?;
        let labels = cx.vision.tags(&jpeg).await?;
        debug!(target: "stage::tagging", path = %file.path, tags = labels.len());
        cx.catalog.write_tags(&file.id, &labels, attempts).await
    }
}
