//! Service modules for batch ingestion
//!
//! - Entity resolution: [`entity_resolver`], driven across a batch by
//!   [`ingest_orchestrator`]
//! - Waveform signal processing: [`waveform_decoder`], [`steady_state`],
//!   [`downsampler`], combined by [`waveform_processor`]
//! - Post-ingestion maintenance: [`waveform_recomputer`]

pub mod downsampler;
pub mod entity_resolver;
pub mod ingest_orchestrator;
pub mod steady_state;
pub mod waveform_decoder;
pub mod waveform_processor;
pub mod waveform_recomputer;

pub use downsampler::min_max_downsample;
pub use entity_resolver::{EntityResolver, Resolution, ResolutionOutcome};
pub use ingest_orchestrator::IngestOrchestrator;
pub use steady_state::SteadyStateStats;
pub use waveform_processor::{SignalSettings, WaveformProcessor};
pub use waveform_recomputer::{RecomputeOutcome, WaveformRecomputer};
