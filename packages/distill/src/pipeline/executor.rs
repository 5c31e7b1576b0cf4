//! The stage-ordered pipeline executor.
//!
//! Drives an episode from raw transcript to stored knowledge, writing a
//! checkpoint at every stage boundary before advancing. A crashed or
//! cancelled run resumes from the last checkpoint: completed stages are
//! skipped, and a partially extracted batch only recomputes the units
//! that have no recorded result.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::pipeline::cancel::ShutdownSignal;
use crate::resolver::EntityResolver;
use crate::traits::checkpoint::CheckpointStore;
use crate::traits::completion::CompletionService;
use crate::traits::extractor::UnitExtractor;
use crate::traits::graph::GraphStore;
use crate::traits::segmenter::Segmenter;
use crate::types::checkpoint::{CheckpointRecord, StagePayload};
use crate::types::episode::{Episode, RunOutcome, Stage};
use crate::types::knowledge::{KnowledgeBundle, RawEntity};
use crate::types::unit::Unit;
use crate::workers::ExtractionWorkerPool;

/// Checkpoint-driven executor over pluggable collaborators.
pub struct Pipeline<T, S, X, K, G>
where
    T: Segmenter,
    S: CompletionService + 'static,
    X: UnitExtractor + 'static,
    K: CheckpointStore,
    G: GraphStore,
{
    segmenter: Arc<T>,
    workers: ExtractionWorkerPool<S, X>,
    resolver: EntityResolver,
    checkpoints: Arc<K>,
    graph: Arc<G>,
    shutdown: ShutdownSignal,
}

impl<T, S, X, K, G> Pipeline<T, S, X, K, G>
where
    T: Segmenter,
    S: CompletionService + 'static,
    X: UnitExtractor + 'static,
    K: CheckpointStore,
    G: GraphStore,
{
    /// Assemble a pipeline from its collaborators.
    pub fn new(
        segmenter: Arc<T>,
        workers: ExtractionWorkerPool<S, X>,
        checkpoints: Arc<K>,
        graph: Arc<G>,
    ) -> Self {
        Self {
            segmenter,
            workers,
            resolver: EntityResolver::new(),
            checkpoints,
            graph,
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Replace the default entity resolver.
    pub fn with_resolver(mut self, resolver: EntityResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Install a shared shutdown signal.
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// A handle that can request graceful shutdown of in-flight runs.
    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Run (or resume) the episode for this transcript to completion.
    ///
    /// Never panics the caller on failure: fatal errors are recorded in
    /// the episode's checkpoint and reported as `RunOutcome::Failed`.
    pub async fn run(&self, transcript: &str) -> RunOutcome {
        let mut episode = Episode::from_transcript(transcript);
        let mut payload = StagePayload::default();

        match self.checkpoints.load(&episode.id).await {
            Ok(Some(record)) => {
                if record.stage == Stage::Completed {
                    info!(episode_id = %episode.id, "episode already completed");
                    return RunOutcome::Completed;
                }
                match StagePayload::from_value(record.payload) {
                    Ok(restored) if record.stage != Stage::Failed => {
                        info!(
                            episode_id = %episode.id,
                            resume_from = ?record.stage,
                            "resuming from checkpoint"
                        );
                        payload = restored;
                        episode.advance(record.stage);
                    }
                    Ok(_) => {
                        warn!(episode_id = %episode.id, "checkpoint recorded a terminal failure stage, restarting");
                    }
                    Err(error) => {
                        warn!(episode_id = %episode.id, %error, "undecodable checkpoint payload, restarting");
                    }
                }
            }
            Ok(None) => {
                debug!(episode_id = %episode.id, "no checkpoint, fresh run");
            }
            Err(error) => {
                return RunOutcome::Failed {
                    reason: format!("checkpoint store error: {error}"),
                };
            }
        }

        match self.drive(&mut episode, &mut payload, transcript).await {
            Ok(outcome) => outcome,
            Err(error) => {
                let boundary = episode.stage;
                let reason = error.to_string();
                warn!(episode_id = %episode.id, stage = ?boundary, %reason, "episode failed");
                episode.fail(&reason);
                self.record_failure(&episode.id, boundary, &payload, &reason)
                    .await;
                RunOutcome::Failed { reason }
            }
        }
    }

    /// The furthest stage recorded for an episode.
    ///
    /// Reports `Failed` when the last run ended in error; the underlying
    /// checkpoint still holds the last good boundary, so a subsequent
    /// `run` resumes from there.
    pub async fn status(&self, episode_id: &str) -> Result<Stage> {
        let record = self
            .checkpoints
            .load(episode_id)
            .await
            .map_err(PipelineError::Checkpoint)?;
        Ok(match record {
            Some(record) if record.failure_reason.is_some() => Stage::Failed,
            Some(record) => record.stage,
            None => Stage::Pending,
        })
    }

    /// Discard an episode's checkpoint so the next run starts fresh.
    pub async fn clear(&self, episode_id: &str) -> Result<()> {
        self.checkpoints
            .clear(episode_id)
            .await
            .map_err(PipelineError::Checkpoint)
    }

    async fn drive(
        &self,
        episode: &mut Episode,
        payload: &mut StagePayload,
        transcript: &str,
    ) -> Result<RunOutcome> {
        if episode.stage < Stage::Parsed {
            if self.shutdown.is_stopping() {
                return Ok(RunOutcome::Cancelled);
            }
            let segments = self
                .segmenter
                .parse(transcript)
                .await
                .map_err(PipelineError::Segmenter)?;
            debug!(episode_id = %episode.id, segments = segments.len(), "transcript parsed");
            payload.segments = Some(segments);
            self.checkpoint(episode, Stage::Parsed, payload).await?;
        }

        if episode.stage < Stage::SpeakersIdentified {
            if self.shutdown.is_stopping() {
                return Ok(RunOutcome::Cancelled);
            }
            let segments = require(payload.segments.as_deref(), "segments")?;
            let speakers = self
                .segmenter
                .identify_speakers(segments)
                .await
                .map_err(PipelineError::Segmenter)?;
            payload.speakers = Some(speakers);
            self.checkpoint(episode, Stage::SpeakersIdentified, payload)
                .await?;
        }

        if episode.stage < Stage::StructureAnalyzed {
            if self.shutdown.is_stopping() {
                return Ok(RunOutcome::Cancelled);
            }
            let segments = require(payload.segments.as_deref(), "segments")?;
            let speakers = require(payload.speakers.as_deref(), "speakers")?;
            let outline = self
                .segmenter
                .analyze_structure(segments, speakers)
                .await
                .map_err(PipelineError::Segmenter)?;
            payload.outline = Some(outline);
            self.checkpoint(episode, Stage::StructureAnalyzed, payload)
                .await?;
        }

        if episode.stage < Stage::UnitsCreated {
            if self.shutdown.is_stopping() {
                return Ok(RunOutcome::Cancelled);
            }
            let segments = require(payload.segments.as_deref(), "segments")?;
            let outline = require(payload.outline.as_ref(), "outline")?;
            let units = self
                .segmenter
                .create_units(segments, outline)
                .await
                .map_err(PipelineError::Segmenter)?;
            info!(episode_id = %episode.id, units = units.len(), "units created");
            payload.units = Some(units);
            self.checkpoint(episode, Stage::UnitsCreated, payload).await?;
        }

        if episode.stage < Stage::Extracted {
            if self.shutdown.is_stopping() {
                return Ok(RunOutcome::Cancelled);
            }
            let units = require(payload.units.as_deref(), "units")?.to_vec();
            let pending: Vec<Unit> = units
                .iter()
                .filter(|u| !payload.unit_results.contains_key(&u.unit_id))
                .cloned()
                .collect();
            debug!(
                episode_id = %episode.id,
                pending = pending.len(),
                cached = units.len() - pending.len(),
                "extraction starting"
            );

            let mut outcome = self.workers.process_units(pending, &self.shutdown).await?;
            for result in std::mem::take(&mut outcome.results) {
                payload.unit_results.insert(result.unit_id.clone(), result);
            }

            if self.shutdown.is_stopping() {
                // Preserve partial progress at the last completed boundary
                // so a resumed run only recomputes the missing units.
                let record = CheckpointRecord::new(
                    &episode.id,
                    Stage::UnitsCreated,
                    payload.to_value()?,
                );
                self.checkpoints
                    .save(&record)
                    .await
                    .map_err(PipelineError::Checkpoint)?;
                info!(episode_id = %episode.id, "run cancelled during extraction");
                return Ok(RunOutcome::Cancelled);
            }

            payload.failed_unit_ids = outcome.failed_unit_ids();
            let failed = payload.failed_unit_ids.len();
            let ratio = if units.is_empty() {
                0.0
            } else {
                failed as f32 / units.len() as f32
            };
            payload.failure_ratio = Some(ratio);

            let config = self.workers.config();
            if ratio > config.failure_ratio_threshold {
                if config.fail_episode_on_partial {
                    return Err(PipelineError::fatal(format!(
                        "extraction failure ratio {ratio:.2} exceeded threshold {:.2}",
                        config.failure_ratio_threshold
                    )));
                }
                warn!(
                    episode_id = %episode.id,
                    failure_ratio = ratio,
                    "extraction finished with a high failure ratio"
                );
            }
            self.checkpoint(episode, Stage::Extracted, payload).await?;
        }

        if episode.stage < Stage::Resolved {
            if self.shutdown.is_stopping() {
                return Ok(RunOutcome::Cancelled);
            }
            let mut units = require(payload.units.as_deref(), "units")?.to_vec();
            units.sort_by_key(|u| u.ordinal);

            let mut mentions: Vec<RawEntity> = Vec::new();
            let mut bundle = KnowledgeBundle::default();
            for unit in &units {
                let Some(result) = payload.unit_results.get(&unit.unit_id) else {
                    continue;
                };
                mentions.extend(result.entities.iter().cloned());
                bundle.relationships.extend(result.relationships.iter().cloned());
                bundle.quotes.extend(result.quotes.iter().cloned());
                bundle.insights.extend(result.insights.iter().cloned());
            }
            bundle.entities = self.resolver.resolve(&mentions);
            payload.resolved = Some(bundle);
            self.checkpoint(episode, Stage::Resolved, payload).await?;
        }

        if episode.stage < Stage::Stored {
            if self.shutdown.is_stopping() {
                return Ok(RunOutcome::Cancelled);
            }
            let bundle = require(payload.resolved.as_ref(), "resolved knowledge")?;
            self.graph
                .upsert(&episode.id, bundle)
                .await
                .map_err(PipelineError::Storage)?;
            self.checkpoint(episode, Stage::Stored, payload).await?;
        }

        if episode.stage < Stage::Completed {
            self.checkpoint(episode, Stage::Completed, payload).await?;
        }

        info!(episode_id = %episode.id, "episode completed");
        Ok(RunOutcome::Completed)
    }

    /// Persist a stage boundary, then advance the in-memory state.
    ///
    /// The ordering matters: a crash between save and advance replays the
    /// stage, which every stage tolerates; the reverse order could record
    /// progress that never happened.
    async fn checkpoint(
        &self,
        episode: &mut Episode,
        stage: Stage,
        payload: &StagePayload,
    ) -> Result<()> {
        let record = CheckpointRecord::new(&episode.id, stage, payload.to_value()?);
        self.checkpoints
            .save(&record)
            .await
            .map_err(PipelineError::Checkpoint)?;
        episode.advance(stage);
        debug!(episode_id = %episode.id, stage = ?stage, "checkpoint saved");
        Ok(())
    }

    /// Annotate the last good boundary with the failure reason.
    ///
    /// Best-effort: if the store itself is unreachable the failure is
    /// still reported to the caller, just not persisted.
    async fn record_failure(
        &self,
        episode_id: &str,
        boundary: Stage,
        payload: &StagePayload,
        reason: &str,
    ) {
        let value = match payload.to_value() {
            Ok(value) => value,
            Err(error) => {
                warn!(%episode_id, %error, "failed to serialize payload for failure record");
                serde_json::Value::Null
            }
        };
        let record = CheckpointRecord::new(episode_id, boundary, value).with_failure(reason);
        if let Err(error) = self.checkpoints.save(&record).await {
            warn!(%episode_id, %error, "failed to persist failure record");
        }
    }
}

/// Resume contract check: a stage's required artifact must be present in
/// the payload once the checkpoint claims its producing stage completed.
fn require<'a, V: ?Sized>(artifact: Option<&'a V>, name: &str) -> Result<&'a V> {
    artifact.ok_or_else(|| PipelineError::fatal(format!("checkpoint missing artifact: {name}")))
}
