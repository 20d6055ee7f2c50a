pub mod errors;
pub mod output;
pub mod providers;
pub mod types;

use std::time::Instant;

use log::info;
use panofish_backend::FeatherBackend;
use panofish_core::contracts::VisionBackend;
use panofish_engine::{FrameOutput, PanoramaEngine, StitchPolicy};

use crate::errors::{ProcessingError, Result};
use crate::output::{AnalysisCollector, FrameWriter, PngSequenceWriter, ProcessingOutput};
use crate::providers::{FrameSource, ImageSequenceSource};
use crate::types::{ProcessingConfig, SessionData};

/// Runs the panorama engine over recorded rig sessions
pub struct PanoramaProcessor {
    config: ProcessingConfig,
}

impl PanoramaProcessor {
    pub fn new(config: ProcessingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    /// Reads the configured camera directories, writes PNG frames and the JSON report.
    pub fn process_session(&self) -> Result<ProcessingOutput> {
        let session = SessionData::new(self.config.inputs.clone());
        info!(
            "Processing session {} ({} cameras)",
            session.name,
            session.camera_count()
        );

        let mut source = ImageSequenceSource::open(&session.camera_dirs)?
            .with_range(self.config.start_frame, self.config.skip_frames);
        let mut writer = PngSequenceWriter::new(&self.config.output_dir)?;
        let backend = Box::new(FeatherBackend::new(self.config.backend_config()));

        let output = self.process(session, &mut source, &mut writer, backend)?;
        if self.config.write_report {
            let path = self.config.output_dir.join("report.json");
            output.save(&path)?;
            info!("Report written to {}", path.display());
        }
        Ok(output)
    }

    /// Drives any source and writer; only source and writer failures abort the run.
    pub fn process(
        &self,
        session: SessionData,
        source: &mut dyn FrameSource,
        writer: &mut dyn FrameWriter,
        backend: Box<dyn VisionBackend>,
    ) -> Result<ProcessingOutput> {
        let mut engine = PanoramaEngine::new(self.config.engine_config(), backend);
        let mut analysis = AnalysisCollector::new(session);
        let started = Instant::now();
        let mut ingested = 0usize;

        if let Some(remaining) = source.remaining() {
            info!("{remaining} frames queued");
        }
        loop {
            if let Some(max) = self.config.max_frames
                && ingested >= max
            {
                break;
            }
            let Some(frames) = source.next_frames()? else {
                break;
            };
            if frames.len() != source.camera_count() {
                return Err(ProcessingError::InvalidConfig(format!(
                    "source returned {} frames for {} cameras",
                    frames.len(),
                    source.camera_count()
                )));
            }
            if engine.corrector().is_none()
                && let Some(first) = frames.first()
            {
                engine.calibrate(first.dimensions())?;
            }
            ingested += 1;
            let outputs = engine.ingest(frames);
            deliver(outputs, writer, &mut analysis)?;
        }
        if ingested == 0 {
            return Err(ProcessingError::NoFrames);
        }
        deliver(engine.finish(), writer, &mut analysis)?;

        info!(
            "Processing complete: {} frames in {:.1}s, {} dropped",
            analysis.frame_count(),
            started.elapsed().as_secs_f64(),
            engine.log().dropped_count()
        );
        Ok(analysis.finalize(
            self.config.output_dir.display().to_string(),
            policy_name(self.config.policy).to_string(),
        ))
    }
}

fn deliver(
    outputs: Vec<FrameOutput>,
    writer: &mut dyn FrameWriter,
    analysis: &mut AnalysisCollector,
) -> Result<()> {
    for output in outputs {
        let file = match &output.image {
            Some(image) => Some(writer.write(output.frame_index, image)?),
            None => None,
        };
        analysis.add_frame(
            &output.report,
            file.map(|p| p.display().to_string()),
        );
    }
    Ok(())
}

fn policy_name(policy: StitchPolicy) -> &'static str {
    match policy {
        StitchPolicy::OneSided => "one_sided",
        StitchPolicy::DoubleSided => "double_sided",
    }
}
