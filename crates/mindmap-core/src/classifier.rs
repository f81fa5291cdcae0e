//! Two-stage intent-shift classification.
//!
//! Stage one compares the new message's embedding with the block's intent
//! embedding and settles the clear on-topic cases without a model call. Every
//! other score goes to the external structured classifier, which is also the
//! only path that can produce `new_child` seeds or a `tangent`.

use tracing::{debug, warn};

use crate::block::Block;
use crate::classification::{BlockAction, BlockClassification, ClassificationReply};
use crate::config::{EngineConfig, OnFailure, SimilarityBand, Thresholds};
use crate::embedder::Embedder;
use crate::error::MindmapResult;
use crate::generator::Generator;
use crate::message::{Message, Role};
use crate::prompts;
use crate::similarity::similarity;

pub struct IntentClassifier<'a> {
    generator: &'a dyn Generator,
    embedder: &'a dyn Embedder,
    thresholds: Thresholds,
    on_failure: OnFailure,
}

impl<'a> IntentClassifier<'a> {
    pub fn new(
        generator: &'a dyn Generator,
        embedder: &'a dyn Embedder,
        config: &EngineConfig,
    ) -> Self {
        Self {
            generator,
            embedder,
            thresholds: config.thresholds,
            on_failure: config.classification_failure,
        }
    }

    /// Classify `new_message` against `current_block`.
    ///
    /// With [`OnFailure::ContinueWithDefault`] this never returns an error:
    /// embedding or classifier failures become a `continue` at 0.5.
    pub fn classify(
        &self,
        current_block: &Block,
        new_message: &str,
        recent_messages: &[&Message],
    ) -> MindmapResult<BlockClassification> {
        let embedding = match self.embedder.embed(new_message) {
            Ok(v) => v,
            Err(e) => return self.fail(e),
        };
        let score = similarity(&embedding, &current_block.intent_embedding);
        let band = self.thresholds.band(score);
        debug!(block = %current_block.id, score, ?band, "intent similarity");

        match band {
            SimilarityBand::Continue => Ok(BlockClassification::new(
                BlockAction::Continue,
                score,
                format!("Message aligns strongly with block intent (similarity: {score:.2})"),
            )),
            SimilarityBand::Deepen => Ok(BlockClassification::new(
                BlockAction::Deepen,
                score,
                format!("Message deepens the current topic (similarity: {score:.2})"),
            )),
            SimilarityBand::Ambiguous | SimilarityBand::Unrelated => {
                match self.classify_external(current_block, new_message, recent_messages) {
                    Ok(c) => Ok(c),
                    Err(e) => self.fail(e),
                }
            }
        }
    }

    fn classify_external(
        &self,
        block: &Block,
        new_message: &str,
        recent_messages: &[&Message],
    ) -> MindmapResult<BlockClassification> {
        let (last_user, last_assistant) = last_exchange(recent_messages);
        let summary = if block.summary.is_empty() {
            "(block just started)"
        } else {
            block.summary.as_str()
        };
        let prompt = prompts::classify_intent_shift(
            &block.title,
            &block.intent,
            summary,
            last_user,
            last_assistant,
            new_message,
        );

        let obj = self.generator.generate_structured(&prompt)?;
        let classification = ClassificationReply::from_object(&obj).into_classification();
        debug!(
            action = %classification.action,
            confidence = classification.confidence,
            seeds = classification.seeds.len(),
            "external classification"
        );
        Ok(classification)
    }

    fn fail(&self, err: crate::error::MindmapError) -> MindmapResult<BlockClassification> {
        match self.on_failure {
            OnFailure::Propagate => Err(err),
            OnFailure::ContinueWithDefault => {
                warn!("classification failed, continuing in current block: {err}");
                Ok(BlockClassification::fallback(&err.to_string()))
            }
        }
    }
}

/// Most recent user and assistant turns, with sentinels when absent.
fn last_exchange<'m>(messages: &[&'m Message]) -> (&'m str, &'m str) {
    let last_user = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("(first message)");
    let last_assistant = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .map(|m| m.content.as_str())
        .unwrap_or("(no response yet)");
    (last_user, last_assistant)
}
