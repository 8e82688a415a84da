//! The fixed catalog of preprocessing strategies.
//!
//! Each strategy pairs a transform recipe with the recognizer hints to use on
//! its output. The orchestrator walks the catalog in order; nothing here runs
//! the recognizer.

use std::time::Duration;

use super::engine::{EngineMode, RecognitionHints, SegmentationMode};
use super::preprocess::{
    adaptive_binarize, brightness_gamma, contrast_stretch, edge_detect, grayscale, invert,
    minimal, sharpen, upscale_to_target, BinarizeMode, PixelBuffer, UpscaleTargets,
};
use crate::config::ReaderConfig;

/// Tone curve exponent that lifts highlights.
const BRIGHTEN_GAMMA: f32 = 0.7;
/// Tone curve exponent that deepens shadows.
const DARKEN_GAMMA: f32 = 1.5;

/// Transform recipe applied to the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preprocessing {
    Binarize(BinarizeMode),
    /// Aggressive binarization followed by a second sharpen pass
    DoubleSharpen,
    Grayscale,
    /// Grayscale stretched with gain 3.0
    GrayscaleContrast,
    Minimal,
    /// Stretched with gain 2.0 at the smaller contrast target
    ContrastOnly,
    /// The source image untouched
    Raw,
    Invert,
    Brighten,
    Darken,
    EdgeDetect,
    GrayscaleInvert,
    GrayscaleBrighten,
    GrayscaleDarken,
}

impl Preprocessing {
    /// Produces a new buffer from `source`. The source is never modified.
    pub fn apply(self, source: &PixelBuffer, targets: &UpscaleTargets) -> PixelBuffer {
        let standard = || upscale_to_target(source, targets.standard);
        match self {
            Preprocessing::Binarize(mode) => adaptive_binarize(&standard(), mode),
            Preprocessing::DoubleSharpen => {
                sharpen(&adaptive_binarize(&standard(), BinarizeMode::Aggressive))
            }
            Preprocessing::Grayscale => grayscale(&standard()),
            Preprocessing::GrayscaleContrast => contrast_stretch(&standard(), 3.0),
            Preprocessing::Minimal => minimal(source, targets.minimal),
            Preprocessing::ContrastOnly => {
                contrast_stretch(&upscale_to_target(source, targets.contrast), 2.0)
            }
            Preprocessing::Raw => source.clone(),
            Preprocessing::Invert => invert(&standard()),
            Preprocessing::Brighten => brightness_gamma(&standard(), BRIGHTEN_GAMMA),
            Preprocessing::Darken => brightness_gamma(&standard(), DARKEN_GAMMA),
            Preprocessing::EdgeDetect => edge_detect(&standard()),
            Preprocessing::GrayscaleInvert => invert(&grayscale(&standard())),
            Preprocessing::GrayscaleBrighten => {
                brightness_gamma(&grayscale(&standard()), BRIGHTEN_GAMMA)
            }
            Preprocessing::GrayscaleDarken => {
                brightness_gamma(&grayscale(&standard()), DARKEN_GAMMA)
            }
        }
    }
}

/// Recognizer parameters for a strategy. The whitelist itself comes from
/// configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintProfile {
    /// Whitelist, single block, LSTM engine
    Block,
    /// Whitelist and a specific segmentation mode
    Segmentation(SegmentationMode),
}

impl HintProfile {
    pub fn hints(self, whitelist: &str) -> RecognitionHints {
        match self {
            HintProfile::Block => RecognitionHints {
                character_whitelist: Some(whitelist.to_string()),
                segmentation_mode: Some(SegmentationMode::SingleBlock),
                engine_mode: Some(EngineMode::LstmOnly),
            },
            HintProfile::Segmentation(mode) => RecognitionHints {
                character_whitelist: Some(whitelist.to_string()),
                segmentation_mode: Some(mode),
                engine_mode: None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Always run; the best score wins
    Baseline,
    /// Run only when no baseline produced a reading; first reading wins
    Fallback,
    /// Segmentation-mode sweep at the end of the fallbacks, with its own timeout
    Sweep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyDescriptor {
    pub id: &'static str,
    pub preprocessing: Preprocessing,
    pub hints: HintProfile,
    pub phase: Phase,
}

impl StrategyDescriptor {
    const fn new(
        id: &'static str,
        preprocessing: Preprocessing,
        hints: HintProfile,
        phase: Phase,
    ) -> Self {
        Self {
            id,
            preprocessing,
            hints,
            phase,
        }
    }

    pub fn recognition_hints(&self, config: &ReaderConfig) -> RecognitionHints {
        self.hints.hints(&config.character_whitelist)
    }

    pub fn timeout(&self, config: &ReaderConfig) -> Duration {
        match self.phase {
            Phase::Sweep => config.sweep_timeout(),
            Phase::Baseline | Phase::Fallback => config.recognition_timeout(),
        }
    }
}

use HintProfile::{Block, Segmentation};
use Phase::{Baseline, Fallback, Sweep};

/// Every strategy, in the order they are tried.
pub const CATALOG: &[StrategyDescriptor] = &[
    StrategyDescriptor::new("aggressive", Preprocessing::Binarize(BinarizeMode::Aggressive), Block, Baseline),
    StrategyDescriptor::new("standard", Preprocessing::Binarize(BinarizeMode::Standard), Block, Baseline),
    StrategyDescriptor::new("conservative", Preprocessing::Binarize(BinarizeMode::Conservative), Block, Baseline),
    StrategyDescriptor::new("double-sharpen", Preprocessing::DoubleSharpen, Block, Fallback),
    StrategyDescriptor::new("grayscale", Preprocessing::Grayscale, Block, Fallback),
    StrategyDescriptor::new("grayscale-contrast", Preprocessing::GrayscaleContrast, Block, Fallback),
    StrategyDescriptor::new("minimal", Preprocessing::Minimal, Block, Fallback),
    StrategyDescriptor::new("contrast-only", Preprocessing::ContrastOnly, Block, Fallback),
    StrategyDescriptor::new("raw", Preprocessing::Raw, Block, Fallback),
    StrategyDescriptor::new("grayscale-single-word", Preprocessing::Grayscale, Segmentation(SegmentationMode::SingleWord), Fallback),
    StrategyDescriptor::new("invert", Preprocessing::Invert, Block, Fallback),
    StrategyDescriptor::new("brighten", Preprocessing::Brighten, Block, Fallback),
    StrategyDescriptor::new("darken", Preprocessing::Darken, Block, Fallback),
    StrategyDescriptor::new("edge-detect", Preprocessing::EdgeDetect, Block, Fallback),
    StrategyDescriptor::new("grayscale-invert", Preprocessing::GrayscaleInvert, Block, Fallback),
    StrategyDescriptor::new("grayscale-brighten", Preprocessing::GrayscaleBrighten, Block, Fallback),
    StrategyDescriptor::new("grayscale-darken", Preprocessing::GrayscaleDarken, Block, Fallback),
    StrategyDescriptor::new("grayscale-psm-6", Preprocessing::Grayscale, Segmentation(SegmentationMode::SingleBlock), Sweep),
    StrategyDescriptor::new("grayscale-psm-7", Preprocessing::Grayscale, Segmentation(SegmentationMode::SingleLine), Sweep),
    StrategyDescriptor::new("grayscale-psm-8", Preprocessing::Grayscale, Segmentation(SegmentationMode::SingleWord), Sweep),
    StrategyDescriptor::new("grayscale-psm-11", Preprocessing::Grayscale, Segmentation(SegmentationMode::SparseText), Sweep),
    StrategyDescriptor::new("grayscale-psm-12", Preprocessing::Grayscale, Segmentation(SegmentationMode::SparseTextOsd), Sweep),
];

/// Strategies whose texts are pooled when everything else has failed.
pub const SALVAGE_IDS: &[&str] = &[
    "aggressive",
    "standard",
    "conservative",
    "minimal",
    "contrast-only",
    "raw",
];

pub fn strategies_in(phase: Phase) -> impl Iterator<Item = &'static StrategyDescriptor> {
    CATALOG.iter().filter(move |s| s.phase == phase)
}

/// Fallbacks followed by the sweep, in catalog order.
pub fn fallback_strategies() -> impl Iterator<Item = &'static StrategyDescriptor> {
    CATALOG.iter().filter(|s| s.phase != Phase::Baseline)
}

pub fn salvage_strategies() -> impl Iterator<Item = &'static StrategyDescriptor> {
    CATALOG.iter().filter(|s| SALVAGE_IDS.contains(&s.id))
}
