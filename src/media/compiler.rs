//! Job compiler: turns one item's settings into a complete engine command.

use crate::error::{KilobyeError, Result};
use crate::media::bitrate::{self, BitrateTarget};
use crate::media::filter_graph::{self, FilterGraph, GraphPlan, GraphRequest, OverlayRequest};
use crate::media::pipeline::{
    ImageFormat, ImageOutput, ImageSettings, OutputContainer, PolicyWarning, VideoSettings,
};
use crate::media::policy::{self, ScaleTarget};
use crate::media::watermark::WatermarkSpec;
use serde::Serialize;
use tracing::debug;

pub const WATERMARK_INPUT_STEM: &str = "watermark";
pub const OUTPUT_STEM: &str = "output";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum RateMode {
    ConstantQuality { crf: u8 },
    TargetBitrate(BitrateTarget),
    /// Audio-only and animated outputs have no video rate control.
    NotApplicable,
}

/// Fully specified engine command for one item. Never mutated after compilation.
#[derive(Debug, Clone)]
pub struct CompiledJob {
    args: Vec<String>,
    input_names: Vec<String>,
    output_name: String,
    container: OutputContainer,
    graph: Option<FilterGraph>,
    rate: RateMode,
    keeps_audio: bool,
    warnings: Vec<PolicyWarning>,
}

impl CompiledJob {
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Virtual files the engine expects, in `-i` order.
    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    pub fn container(&self) -> OutputContainer {
        self.container
    }

    pub fn mime(&self) -> &'static str {
        self.container.mime()
    }

    pub fn extension(&self) -> &'static str {
        self.container.extension()
    }

    pub fn graph(&self) -> Option<&FilterGraph> {
        self.graph.as_ref()
    }

    pub fn rate(&self) -> RateMode {
        self.rate
    }

    pub fn keeps_audio(&self) -> bool {
        self.keeps_audio
    }

    pub fn warnings(&self) -> &[PolicyWarning] {
        &self.warnings
    }

    pub fn command_line(&self) -> String {
        self.args.join(" ")
    }
}

/// What the compiler needs to know about the item itself.
#[derive(Debug, Clone)]
pub struct JobInput<'a> {
    pub extension: Option<&'a str>,
    pub duration_secs: Option<f64>,
}

fn input_name(extension: Option<&str>) -> String {
    let ext = extension
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "mp4".to_string());
    format!("input.{}", ext)
}

/// Extension for the overlay artifact, from its content.
pub fn watermark_input_name(watermark: &WatermarkSpec) -> String {
    let ext = match image::guess_format(&watermark.image) {
        Ok(image::ImageFormat::Jpeg) => "jpg",
        Ok(image::ImageFormat::WebP) => "webp",
        Ok(image::ImageFormat::Gif) => "gif",
        Ok(image::ImageFormat::Bmp) => "bmp",
        _ => "png",
    };
    format!("{}.{}", WATERMARK_INPUT_STEM, ext)
}

fn push_all(args: &mut Vec<String>, items: &[&str]) {
    args.extend(items.iter().map(|s| s.to_string()));
}

/// Settings-level conflicts that no input can resolve. Checked once per batch,
/// before the engine is touched.
pub fn validate_video_settings(settings: &VideoSettings) -> Result<()> {
    if settings.container == OutputContainer::AudioOnly && settings.remove_audio {
        return Err(KilobyeError::Policy(
            "audio-only output cannot also remove the audio stream".to_string(),
        ));
    }
    Ok(())
}

pub fn compile_video(settings: &VideoSettings, input: &JobInput<'_>) -> Result<CompiledJob> {
    validate_video_settings(settings)?;
    let container = settings.container;
    let mut warnings = Vec::new();
    let main_input = input_name(input.extension);
    let output_name = format!("{}.{}", OUTPUT_STEM, container.extension());

    if container == OutputContainer::AudioOnly {
        return compile_audio_only(settings, main_input, output_name);
    }

    let mut input_names = vec![main_input];
    let mut args = vec!["-i".to_string(), input_names[0].clone()];

    let overlay = settings.watermark.as_ref().map(|wm| {
        let name = watermark_input_name(wm);
        args.push("-i".to_string());
        args.push(name.clone());
        input_names.push(name);
        OverlayRequest {
            scale: wm.scale,
            opacity: wm.opacity,
            anchor: wm.anchor,
            margin: wm.margin,
        }
    });

    let animated = container == OutputContainer::AnimatedImage;
    let plan = filter_graph::build(&GraphRequest {
        scale: settings.resolution.and_then(ScaleTarget::new),
        overlay,
        container,
        animated_fps: settings
            .frame_rate
            .filter(|fps| *fps > 0)
            .unwrap_or(policy::ANIMATED_DEFAULT_FPS),
    });

    let keeps_audio = !animated && !settings.remove_audio;
    if animated && !settings.remove_audio {
        warnings.push(PolicyWarning::AudioForcedOffForAnimation);
    }

    let graph = match plan {
        GraphPlan::Graph(graph) => {
            args.push("-filter_complex".to_string());
            args.push(graph.to_filter_complex());
            args.push("-map".to_string());
            args.push(graph.terminal().map_arg());
            if keeps_audio {
                push_all(&mut args, &["-map", "0:a?"]);
            }
            Some(graph)
        }
        GraphPlan::Defaults => None,
    };

    let rate = if animated {
        if settings.target_size.is_some() {
            warnings.push(PolicyWarning::SizeTargetIgnoredForAnimation);
        }
        push_all(&mut args, &["-an", "-loop", "0"]);
        RateMode::NotApplicable
    } else {
        if let Some(fps) = settings.frame_rate.filter(|fps| *fps > 0) {
            args.push("-r".to_string());
            args.push(fps.to_string());
        }
        push_all(
            &mut args,
            &[
                "-c:v",
                policy::VIDEO_CODEC,
                "-preset",
                policy::VIDEO_PRESET,
                "-pix_fmt",
                policy::VIDEO_PIXEL_FORMAT,
            ],
        );

        let rate = select_rate(settings, input.duration_secs, keeps_audio, &mut warnings);
        match rate {
            RateMode::TargetBitrate(target) => args.extend(target.args()),
            RateMode::ConstantQuality { crf } => {
                args.push("-crf".to_string());
                args.push(crf.to_string());
            }
            RateMode::NotApplicable => {}
        }

        if keeps_audio {
            push_all(&mut args, &["-c:a", policy::AUDIO_CODEC, "-b:a"]);
            args.push(format!("{}k", bitrate::AUDIO_KBPS));
        } else {
            args.push("-an".to_string());
        }
        push_all(&mut args, &["-movflags", "+faststart"]);
        rate
    };

    args.push(output_name.clone());

    debug!("Compiled {:?} job: {}", container, args.join(" "));

    Ok(CompiledJob {
        args,
        input_names,
        output_name,
        container,
        graph,
        rate,
        keeps_audio,
        warnings,
    })
}

fn select_rate(
    settings: &VideoSettings,
    duration_secs: Option<f64>,
    keeps_audio: bool,
    warnings: &mut Vec<PolicyWarning>,
) -> RateMode {
    let constant = RateMode::ConstantQuality {
        crf: policy::crf(settings.quality),
    };
    let Some(preset) = settings.target_size else {
        return constant;
    };
    match duration_secs.and_then(|d| BitrateTarget::for_budget(preset.budget_mb(), d, keeps_audio)) {
        Some(target) => RateMode::TargetBitrate(target),
        None => {
            warnings.push(PolicyWarning::SizeTargetDowngraded);
            constant
        }
    }
}

fn compile_audio_only(
    settings: &VideoSettings,
    main_input: String,
    output_name: String,
) -> Result<CompiledJob> {
    let mut warnings = Vec::new();
    if settings.target_size.is_some() {
        warnings.push(PolicyWarning::SizeTargetIgnoredForAudio);
    }
    if settings.watermark.is_some() {
        debug!("Watermark has no effect on audio-only output");
    }

    let mut args = vec!["-i".to_string(), main_input.clone()];
    push_all(&mut args, &["-vn", "-c:a", policy::AUDIO_ONLY_CODEC, "-q:a"]);
    args.push(policy::AUDIO_ONLY_QUALITY.to_string());
    args.push(output_name.clone());

    Ok(CompiledJob {
        args,
        input_names: vec![main_input],
        output_name,
        container: OutputContainer::AudioOnly,
        graph: None,
        rate: RateMode::NotApplicable,
        keeps_audio: true,
        warnings,
    })
}

/// Request handed to the resizer for the first image pass.
#[derive(Debug, Clone)]
pub struct ResizeRequest {
    pub max_dimension: u32,
    pub max_size_bytes: u64,
    /// `None` keeps the input format.
    pub format: Option<ImageFormat>,
    pub quality: f32,
    pub watermark: Option<WatermarkSpec>,
}

#[derive(Debug, Clone)]
pub struct ImagePlan {
    pub resize: ResizeRequest,
    pub target: ImageOutput,
    pub needs_second_pass: bool,
}

impl ImagePlan {
    /// Conversion still required after the resizer produced `produced`.
    pub fn conversion_after(&self, produced: ImageFormat) -> Option<(ImageFormat, f32)> {
        match self.target {
            ImageOutput::Format(format) if format != produced => {
                Some((format, policy::image_quality(format)))
            }
            _ => None,
        }
    }
}

pub fn compile_image(settings: &ImageSettings) -> ImagePlan {
    let bridge = policy::bridge_format(settings.output);
    let (max_dimension, max_size_bytes) = policy::image_limits(settings.max_width);
    ImagePlan {
        resize: ResizeRequest {
            max_dimension,
            max_size_bytes,
            format: bridge.resizer_format,
            quality: bridge.resizer_quality,
            watermark: settings.watermark.clone(),
        },
        target: settings.output,
        needs_second_pass: bridge.needs_second_pass,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::bitrate::SizePreset;
    use crate::media::pipeline::QualityTier;
    use crate::media::watermark::Anchor;
    use bytes::Bytes;

    fn input(duration: Option<f64>) -> JobInput<'static> {
        JobInput {
            extension: Some("MOV"),
            duration_secs: duration,
        }
    }

    fn compile(settings: &VideoSettings, duration: Option<f64>) -> CompiledJob {
        match compile_video(settings, &input(duration)) {
            Ok(job) => job,
            Err(e) => panic!("Expected job to compile: {}", e),
        }
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    fn watermark() -> WatermarkSpec {
        WatermarkSpec::new(Bytes::from_static(b"\x89PNG\r\n\x1a\n"), 0.6, 0.2, Anchor::TopLeft, 20)
    }

    #[test]
    fn test_plain_video_uses_defaults_and_crf() {
        let job = compile(&VideoSettings::default(), Some(10.0));
        assert!(job.graph().is_none());
        assert_eq!(job.input_names(), ["input.mov".to_string()]);
        assert!(has_pair(job.args(), "-crf", "28"));
        assert!(has_pair(job.args(), "-c:a", "aac"));
        assert!(has_pair(job.args(), "-b:a", "128k"));
        assert!(!job.args().iter().any(|a| a == "-map"));
        assert_eq!(job.args().last().map(String::as_str), Some("output.mp4"));
        assert_eq!(job.mime(), "video/mp4");
        assert!(job.warnings().is_empty());
    }

    #[test]
    fn test_graph_terminal_is_always_mapped() {
        let settings = VideoSettings {
            resolution: Some(720),
            watermark: Some(watermark()),
            ..Default::default()
        };
        let job = compile(&settings, Some(10.0));
        let graph = match job.graph() {
            Some(graph) => graph,
            None => panic!("Expected graph"),
        };
        assert!(has_pair(job.args(), "-map", &graph.terminal().map_arg()));
        assert!(has_pair(job.args(), "-map", "0:a?"));
        assert_eq!(job.input_names().len(), 2);
        assert_eq!(job.input_names()[1], "watermark.png");
        assert!(has_pair(job.args(), "-i", "watermark.png"));
    }

    #[test]
    fn test_size_target_with_duration() {
        let settings = VideoSettings {
            target_size: Some(SizePreset::Mb8),
            ..Default::default()
        };
        let job = compile(&settings, Some(60.0));
        assert_eq!(
            job.rate(),
            RateMode::TargetBitrate(BitrateTarget::from_video_kbps(896))
        );
        assert!(has_pair(job.args(), "-b:v", "896k"));
        assert!(has_pair(job.args(), "-maxrate", "896k"));
        assert!(has_pair(job.args(), "-bufsize", "1792k"));
        assert!(!job.args().iter().any(|a| a == "-crf"));
    }

    #[test]
    fn test_size_target_without_duration_downgrades() {
        let settings = VideoSettings {
            target_size: Some(SizePreset::Mb25),
            quality: QualityTier::High,
            ..Default::default()
        };
        for duration in [None, Some(0.0), Some(-1.0)] {
            let job = compile(&settings, duration);
            assert_eq!(job.rate(), RateMode::ConstantQuality { crf: 23 });
            assert_eq!(job.warnings(), [PolicyWarning::SizeTargetDowngraded]);
            assert!(!job.args().iter().any(|a| a == "-b:v" || a == "-maxrate"));
        }
    }

    #[test]
    fn test_animated_never_has_audio() {
        for remove_audio in [true, false] {
            let settings = VideoSettings {
                container: OutputContainer::AnimatedImage,
                remove_audio,
                target_size: Some(SizePreset::Mb8),
                ..Default::default()
            };
            let job = compile(&settings, Some(5.0));
            assert!(!job.keeps_audio());
            assert!(job.args().iter().any(|a| a == "-an"));
            assert!(!job.args().iter().any(|a| a.contains("0:a") || a == "-c:a"));
            assert!(job.warnings().contains(&PolicyWarning::SizeTargetIgnoredForAnimation));
            assert_eq!(job.rate(), RateMode::NotApplicable);
            assert_eq!(job.output_name(), "output.gif");
            assert!(has_pair(job.args(), "-map", "[vout]"));
        }
    }

    #[test]
    fn test_animated_uses_frame_rate_in_graph() {
        let settings = VideoSettings {
            container: OutputContainer::AnimatedImage,
            frame_rate: Some(10),
            remove_audio: true,
            ..Default::default()
        };
        let job = compile(&settings, None);
        assert!(job.warnings().is_empty());
        assert!(!job.args().iter().any(|a| a == "-r"));
        let graph_text = match job.graph() {
            Some(graph) => graph.to_filter_complex(),
            None => panic!("Expected graph"),
        };
        assert!(graph_text.starts_with("[0:v]fps=10[base]"));
    }

    #[test]
    fn test_audio_only_short_circuits() {
        let settings = VideoSettings {
            container: OutputContainer::AudioOnly,
            resolution: Some(480),
            watermark: Some(watermark()),
            target_size: Some(SizePreset::Mb10),
            ..Default::default()
        };
        let job = compile(&settings, Some(30.0));
        assert_eq!(
            job.args(),
            ["-i", "input.mov", "-vn", "-c:a", "libmp3lame", "-q:a", "2", "output.mp3"]
        );
        assert!(job.graph().is_none());
        assert_eq!(job.input_names().len(), 1);
        assert_eq!(job.warnings(), [PolicyWarning::SizeTargetIgnoredForAudio]);
        assert_eq!(job.mime(), "audio/mpeg");
    }

    #[test]
    fn test_audio_only_without_audio_is_rejected() {
        let settings = VideoSettings {
            container: OutputContainer::AudioOnly,
            remove_audio: true,
            ..Default::default()
        };
        match compile_video(&settings, &input(Some(3.0))) {
            Err(KilobyeError::Policy(_)) => {}
            other => panic!("Expected policy error, got {:?}", other),
        }
        assert!(matches!(
            validate_video_settings(&settings),
            Err(KilobyeError::Policy(_))
        ));
        assert!(validate_video_settings(&VideoSettings {
            remove_audio: true,
            ..Default::default()
        })
        .is_ok());
    }

    #[test]
    fn test_frame_rate_and_strip_audio() {
        let settings = VideoSettings {
            frame_rate: Some(30),
            remove_audio: true,
            target_size: Some(SizePreset::Mb8),
            ..Default::default()
        };
        let job = compile(&settings, Some(60.0));
        assert!(has_pair(job.args(), "-r", "30"));
        assert!(job.args().iter().any(|a| a == "-an"));
        assert!(has_pair(job.args(), "-b:v", "1024k"));
    }

    #[test]
    fn test_input_name_sanitized() {
        let job = match compile_video(
            &VideoSettings::default(),
            &JobInput {
                extension: Some("../x"),
                duration_secs: None,
            },
        ) {
            Ok(job) => job,
            Err(e) => panic!("Expected job: {}", e),
        };
        assert_eq!(job.input_names()[0], "input.mp4");
    }

    #[test]
    fn test_image_plan() {
        let plan = compile_image(&ImageSettings {
            output: ImageOutput::Format(ImageFormat::Avif),
            max_width: 0,
            watermark: None,
        });
        assert_eq!(plan.resize.format, Some(ImageFormat::Webp));
        assert_eq!(plan.resize.max_dimension, 1920);
        assert!(plan.needs_second_pass);
        assert_eq!(plan.conversion_after(ImageFormat::Webp), Some((ImageFormat::Avif, 0.5)));

        let plan = compile_image(&ImageSettings::default());
        assert_eq!(plan.resize.format, None);
        assert_eq!(plan.conversion_after(ImageFormat::Png), None);
    }
}
