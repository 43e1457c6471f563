//! Filter graph model for video and animated-image jobs.
//!
//! The graph is a list of chains between named streams. [`build`] assembles it
//! from the job's scale / watermark / container requirements, and
//! [`FilterGraph::to_filter_complex`] serializes it into the text form the
//! codec engine accepts. A built graph always ends in one named terminal
//! stream which the compiler must map.

use crate::media::pipeline::OutputContainer;
use crate::media::policy::ScaleTarget;
use crate::media::watermark::Anchor;
use std::fmt;

/// Label of the stream every built graph ends in.
pub const TERMINAL_LABEL: &str = "vout";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamLabel(String);

impl StreamLabel {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// Argument form for `-map`.
    pub fn map_arg(&self) -> String {
        format!("[{}]", self.0)
    }
}

impl fmt::Display for StreamLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRef {
    /// Video stream of the n-th `-i` input.
    Input(usize),
    Label(StreamLabel),
}

impl fmt::Display for StreamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamRef::Input(index) => write!(f, "[{}:v]", index),
            StreamRef::Label(label) => write!(f, "{}", label),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Fps(u32),
    /// Even-width, aspect-preserving scale under a height ceiling.
    Scale(ScaleTarget),
    /// Scales the first input to a fraction of the second input's width; passes the second through.
    ScaleToReference { width_fraction: f32 },
    Format(&'static str),
    Opacity(f32),
    Overlay { x: String, y: String },
    Split(usize),
    PaletteGen,
    PaletteUse,
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Fps(fps) => write!(f, "fps={}", fps),
            Filter::Scale(target) => write!(f, "scale=w=-2:h={}", target.height_expr()),
            Filter::ScaleToReference { width_fraction } => write!(
                f,
                "scale2ref=w='main_w*{}':h='ow/a'",
                width_fraction
            ),
            Filter::Format(pix_fmt) => write!(f, "format={}", pix_fmt),
            Filter::Opacity(alpha) => write!(f, "colorchannelmixer=aa={}", alpha),
            Filter::Overlay { x, y } => write!(f, "overlay=x={}:y={}", x, y),
            Filter::Split(n) => write!(f, "split={}", n),
            Filter::PaletteGen => write!(f, "palettegen=stats_mode=diff"),
            Filter::PaletteUse => write!(f, "paletteuse=dither=bayer:bayer_scale=5"),
        }
    }
}

/// One linear chain: `[in]...filter,filter[out]...`.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterNode {
    pub inputs: Vec<StreamRef>,
    pub filters: Vec<Filter>,
    pub outputs: Vec<StreamLabel>,
}

impl fmt::Display for FilterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for input in &self.inputs {
            write!(f, "{}", input)?;
        }
        let filters: Vec<String> = self.filters.iter().map(ToString::to_string).collect();
        write!(f, "{}", filters.join(","))?;
        for output in &self.outputs {
            write!(f, "{}", output)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterGraph {
    nodes: Vec<FilterNode>,
    terminal: StreamLabel,
}

impl FilterGraph {
    pub fn nodes(&self) -> &[FilterNode] {
        &self.nodes
    }

    /// The stream the encoder must select.
    pub fn terminal(&self) -> &StreamLabel {
        &self.terminal
    }

    /// Number of `-i` inputs the graph reads from.
    pub fn input_count(&self) -> usize {
        self.nodes
            .iter()
            .flat_map(|node| node.inputs.iter())
            .filter_map(|input| match input {
                StreamRef::Input(index) => Some(index + 1),
                StreamRef::Label(_) => None,
            })
            .max()
            .unwrap_or(0)
    }

    pub fn contains(&self, predicate: impl Fn(&Filter) -> bool) -> bool {
        self.nodes
            .iter()
            .any(|node| node.filters.iter().any(&predicate))
    }

    pub fn to_filter_complex(&self) -> String {
        let chains: Vec<String> = self.nodes.iter().map(ToString::to_string).collect();
        chains.join(";")
    }

    /// Every label is produced once before use and consumed once, except the terminal.
    pub fn is_fully_linked(&self) -> bool {
        let mut open: Vec<&StreamLabel> = Vec::new();
        for node in &self.nodes {
            for input in &node.inputs {
                if let StreamRef::Label(label) = input {
                    match open.iter().position(|l| *l == label) {
                        Some(pos) => {
                            open.remove(pos);
                        }
                        None => return false,
                    }
                }
            }
            for output in &node.outputs {
                if open.contains(&output) {
                    return false;
                }
                open.push(output);
            }
        }
        open.len() == 1 && open[0] == &self.terminal
    }
}

/// Either engine defaults (nothing to filter) or a linked graph.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphPlan {
    Defaults,
    Graph(FilterGraph),
}

impl GraphPlan {
    pub fn graph(&self) -> Option<&FilterGraph> {
        match self {
            GraphPlan::Defaults => None,
            GraphPlan::Graph(graph) => Some(graph),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayRequest {
    pub scale: f32,
    pub opacity: f32,
    pub anchor: Anchor,
    pub margin: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphRequest {
    pub scale: Option<ScaleTarget>,
    pub overlay: Option<OverlayRequest>,
    pub container: OutputContainer,
    /// Only used for animated output; video frame rate is an output option.
    pub animated_fps: u32,
}

#[derive(Default)]
struct GraphBuilder {
    nodes: Vec<FilterNode>,
}

impl GraphBuilder {
    fn push(
        &mut self,
        inputs: Vec<StreamRef>,
        filters: Vec<Filter>,
        outputs: &[&str],
    ) -> Vec<StreamRef> {
        let outputs: Vec<StreamLabel> = outputs.iter().map(|name| StreamLabel::new(*name)).collect();
        let refs = outputs.iter().cloned().map(StreamRef::Label).collect();
        self.nodes.push(FilterNode {
            inputs,
            filters,
            outputs,
        });
        refs
    }

    fn finish(mut self, last: StreamRef) -> Option<FilterGraph> {
        let StreamRef::Label(label) = last else {
            return None;
        };
        let terminal = StreamLabel::new(TERMINAL_LABEL);
        let node = self.nodes.iter_mut().rev().find(|n| n.outputs.contains(&label))?;
        for output in node.outputs.iter_mut() {
            if *output == label {
                *output = terminal.clone();
            }
        }
        Some(FilterGraph {
            nodes: self.nodes,
            terminal,
        })
    }
}

fn single(mut refs: Vec<StreamRef>) -> StreamRef {
    refs.pop().unwrap_or(StreamRef::Input(0))
}

pub fn build(request: &GraphRequest) -> GraphPlan {
    let animated = request.container == OutputContainer::AnimatedImage;
    let mut builder = GraphBuilder::default();
    let mut current = StreamRef::Input(0);

    let mut base_filters = Vec::new();
    if animated {
        base_filters.push(Filter::Fps(request.animated_fps));
    }
    if let Some(target) = request.scale {
        base_filters.push(Filter::Scale(target));
    }
    if !base_filters.is_empty() {
        current = single(builder.push(vec![current], base_filters, &["base"]));
    }

    if let Some(overlay) = request.overlay {
        let mut refs = builder.push(
            vec![StreamRef::Input(1), current],
            vec![Filter::ScaleToReference {
                width_fraction: overlay.scale,
            }],
            &["wm", "ref"],
        );
        let reference = single(refs.split_off(1));
        let mark = single(refs);
        let mark = single(builder.push(
            vec![mark],
            vec![Filter::Format("rgba"), Filter::Opacity(overlay.opacity)],
            &["wma"],
        ));
        let (x, y) = overlay.anchor.overlay_exprs(overlay.margin);
        current = single(builder.push(
            vec![reference, mark],
            vec![Filter::Overlay { x, y }],
            &["composited"],
        ));
    }

    if animated {
        let mut refs = builder.push(vec![current], vec![Filter::Split(2)], &["pa", "pb"]);
        let frames = single(refs.split_off(1));
        let palette_src = single(refs);
        let palette = single(builder.push(vec![palette_src], vec![Filter::PaletteGen], &["pal"]));
        current = single(builder.push(vec![frames, palette], vec![Filter::PaletteUse], &["quant"]));
    }

    match builder.finish(current) {
        Some(graph) => GraphPlan::Graph(graph),
        None => GraphPlan::Defaults,
    }
}
