//! Animation requests: raw config tuples, validation and output naming.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::config::OutputFormat;
use super::variable::{DisplayComponent, Field, Variable};

/// Maximum number of offsets a structure-function plot can lay out.
pub const MAX_STRUCTURE_PANELS: usize = 9;

/// One requested animation exactly as written in the config:
/// `[kind, variable, component, params]` (params may be omitted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawForm", into = "RawForm")]
pub struct RawRequest {
    pub kind: String,
    pub variable: String,
    pub component: String,
    pub params: Value,
}

impl RawRequest {
    pub fn new(kind: &str, variable: &str, component: &str, params: Value) -> Self {
        Self {
            kind: kind.to_string(),
            variable: variable.to_string(),
            component: component.to_string(),
            params,
        }
    }
}

impl fmt::Display for RawRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(\"{}\", \"{}\", \"{}\", {})",
            self.kind, self.variable, self.component, self.params
        )
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawForm {
    Full(String, String, String, Value),
    Short(String, String, String),
}

impl From<RawForm> for RawRequest {
    fn from(form: RawForm) -> Self {
        match form {
            RawForm::Full(kind, variable, component, params) => Self {
                kind,
                variable,
                component,
                params,
            },
            RawForm::Short(kind, variable, component) => Self {
                kind,
                variable,
                component,
                params: Value::Null,
            },
        }
    }
}

impl From<RawRequest> for RawForm {
    fn from(raw: RawRequest) -> Self {
        RawForm::Full(raw.kind, raw.variable, raw.component, raw.params)
    }
}

/// Supported animation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnimationKind {
    Heatmap2D,
    HeatmapTriple,
    FourierSpectrum,
    StructureFunction,
    Kurtosis,
    Rms,
}

impl AnimationKind {
    /// Parse either the short config tag or the long kind name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "2D" | "heatmap2D" => Some(AnimationKind::Heatmap2D),
            "triple" | "heatmapTriple" => Some(AnimationKind::HeatmapTriple),
            "fourier" | "fourierSpectrum" => Some(AnimationKind::FourierSpectrum),
            "sf" | "structureFunction" => Some(AnimationKind::StructureFunction),
            "kurtosis" => Some(AnimationKind::Kurtosis),
            "rms" => Some(AnimationKind::Rms),
            _ => None,
        }
    }

    /// Short tag used in output names.
    pub fn tag(self) -> &'static str {
        match self {
            AnimationKind::Heatmap2D => "2D",
            AnimationKind::HeatmapTriple => "triple",
            AnimationKind::FourierSpectrum => "fourier",
            AnimationKind::StructureFunction => "sf",
            AnimationKind::Kurtosis => "kurtosis",
            AnimationKind::Rms => "rms",
        }
    }
}

impl fmt::Display for AnimationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Heatmap normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Normalization {
    /// Divide by the variable's fixed physical unit.
    Unit,
    /// Divide each frame by that frame's mean field magnitude.
    Unitless,
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Normalization::Unit => f.write_str("unit"),
            Normalization::Unitless => f.write_str("unitless"),
        }
    }
}

/// Slice direction for principal-axis spectra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceAxis {
    X,
    Y,
}

impl fmt::Display for SliceAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SliceAxis::X => f.write_str("x"),
            SliceAxis::Y => f.write_str("y"),
        }
    }
}

/// Grid diagonal used by diagonal spectra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Diagonal {
    /// South-west to north-east (config value 1).
    Rising,
    /// North-west to south-east (config value 2).
    Falling,
}

impl Diagonal {
    fn number(self) -> u8 {
        match self {
            Diagonal::Rising => 1,
            Diagonal::Falling => 2,
        }
    }
}

/// Fourier spectrum sub-modes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FourierMode {
    /// Slice along `axis` at relative position `location` of the other axis.
    Principal { axis: SliceAxis, location: f64 },
    /// Slice along one grid diagonal.
    Diagonal { direction: Diagonal },
    /// Sum of an x slice (at `x_location`) and a y slice (at `y_location`).
    Trace { x_location: f64, y_location: f64 },
    /// Sum of both diagonals.
    TraceDiagonal,
    /// Full 2D power radially binned into a 1D spectrum.
    Radial1D,
    /// Full 2D power map.
    Full2D,
}

impl FourierMode {
    /// Parse the kind params: `["x", 0.5]`, `["diag", 1]`, `["trace", 0.3, 0.7]`,
    /// `["trace_diag"]`, `["1D"]` or `["2D"]`.
    pub fn parse(params: &Value) -> Result<Self, String> {
        let items = params
            .as_array()
            .ok_or_else(|| format!("expected a list, got {params}"))?;
        let tag = items
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| "first element must be a mode name".to_string())?;

        let location = |i: usize| -> Result<f64, String> {
            let value = items
                .get(i)
                .and_then(Value::as_f64)
                .ok_or_else(|| format!("mode \"{tag}\" needs a numeric location at position {i}"))?;
            if (0.0..1.0).contains(&value) {
                Ok(value)
            } else {
                Err(format!("location {value} outside [0, 1)"))
            }
        };
        let expect_len = |n: usize| -> Result<(), String> {
            if items.len() == n {
                Ok(())
            } else {
                Err(format!(
                    "mode \"{tag}\" takes {} parameter(s), got {}",
                    n - 1,
                    items.len() - 1
                ))
            }
        };

        match tag {
            "x" | "y" => {
                expect_len(2)?;
                let axis = if tag == "x" { SliceAxis::X } else { SliceAxis::Y };
                Ok(FourierMode::Principal {
                    axis,
                    location: location(1)?,
                })
            }
            "diag" => {
                expect_len(2)?;
                let direction = match items[1].as_u64() {
                    Some(1) => Diagonal::Rising,
                    Some(2) => Diagonal::Falling,
                    _ => return Err(format!("diagonal must be 1 or 2, got {}", items[1])),
                };
                Ok(FourierMode::Diagonal { direction })
            }
            "trace" => {
                expect_len(3)?;
                Ok(FourierMode::Trace {
                    x_location: location(1)?,
                    y_location: location(2)?,
                })
            }
            "trace_diag" => {
                expect_len(1)?;
                Ok(FourierMode::TraceDiagonal)
            }
            "1D" => {
                expect_len(1)?;
                Ok(FourierMode::Radial1D)
            }
            "2D" => {
                expect_len(1)?;
                Ok(FourierMode::Full2D)
            }
            other => Err(format!("unknown fourier mode \"{other}\"")),
        }
    }

    /// True for the modes that transform the whole grid.
    pub fn is_full_grid(&self) -> bool {
        matches!(self, FourierMode::Radial1D | FourierMode::Full2D)
    }

    fn name_suffix(&self) -> String {
        match self {
            FourierMode::Principal { axis, location } => format!("{axis}_{location}"),
            FourierMode::Diagonal { direction } => format!("diag{}", direction.number()),
            FourierMode::Trace { .. } => "trace".to_string(),
            FourierMode::TraceDiagonal => "trace_diag".to_string(),
            FourierMode::Radial1D => "1D".to_string(),
            FourierMode::Full2D => "2D".to_string(),
        }
    }
}

/// RMS output mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RmsMode {
    /// Growing time series, one frame per snapshot.
    Animated,
    /// One static multi-panel image of the whole run.
    Summary,
}

/// A validated animation request. Each variant carries only what its kind uses.
#[derive(Debug, Clone, PartialEq)]
pub enum AnimationRequest {
    Heatmap2D {
        variable: Field,
        component: DisplayComponent,
        normalization: Normalization,
    },
    HeatmapTriple {
        variable: Field,
        normalization: Normalization,
    },
    FourierSpectrum {
        variable: Field,
        component: DisplayComponent,
        mode: FourierMode,
    },
    StructureFunction {
        variable: Field,
        component: DisplayComponent,
        offsets: Vec<usize>,
    },
    Kurtosis {
        variable: Field,
        component: DisplayComponent,
        offsets: Vec<usize>,
    },
    Rms {
        variable: Variable,
        component: DisplayComponent,
        mode: RmsMode,
    },
}

/// Request validation errors.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("unsupported animation kind \"{0}\"")]
    InvalidKind(String),
    #[error("unsupported variable \"{0}\"")]
    InvalidVariable(String),
    #[error("component \"{component}\" is not valid for {kind} of {variable}")]
    InvalidComponent {
        kind: AnimationKind,
        variable: String,
        component: String,
    },
    #[error("invalid parameters for {kind}: {reason}")]
    InvalidKindParams { kind: AnimationKind, reason: String },
    #[error("unsupported output extension \"{0}\"")]
    InvalidOutputExtension(String),
    #[error("output {0} is produced by more than one request")]
    DuplicateOutput(PathBuf),
}

/// A request that failed validation, with its position in the config list.
#[derive(Debug, thiserror::Error)]
#[error("animation #{index} {raw}: {source}")]
pub struct InvalidRequest {
    pub index: usize,
    pub raw: String,
    #[source]
    pub source: RequestError,
}

impl AnimationRequest {
    /// Validate a raw config tuple.
    pub fn from_raw(raw: &RawRequest) -> Result<Self, RequestError> {
        let kind = AnimationKind::parse(&raw.kind)
            .ok_or_else(|| RequestError::InvalidKind(raw.kind.clone()))?;
        let variable = Variable::parse(&raw.variable)
            .ok_or_else(|| RequestError::InvalidVariable(raw.variable.clone()))?;

        let invalid_component = || RequestError::InvalidComponent {
            kind,
            variable: raw.variable.clone(),
            component: raw.component.clone(),
        };
        let bad_params = |reason: String| RequestError::InvalidKindParams { kind, reason };

        // The composite variable only has an RMS rendering.
        let field = match (variable, kind) {
            (Variable::Field(field), _) => Some(field),
            (Variable::Residual, AnimationKind::Rms) => None,
            (Variable::Residual, _) => return Err(invalid_component()),
        };

        let request = match (kind, field) {
            (AnimationKind::HeatmapTriple, Some(field)) => {
                if !field.is_vector() {
                    return Err(invalid_component());
                }
                AnimationRequest::HeatmapTriple {
                    variable: field,
                    normalization: parse_normalization(&raw.params, field).map_err(bad_params)?,
                }
            }
            (AnimationKind::Heatmap2D, Some(field)) => {
                let component = parse_component(&raw.component, field, kind)
                    .ok_or_else(invalid_component)?;
                AnimationRequest::Heatmap2D {
                    variable: field,
                    component,
                    normalization: parse_normalization(&raw.params, field).map_err(bad_params)?,
                }
            }
            (AnimationKind::FourierSpectrum, Some(field)) => {
                let component = parse_component(&raw.component, field, kind)
                    .ok_or_else(invalid_component)?;
                let mode = FourierMode::parse(&raw.params).map_err(bad_params)?;
                if component == DisplayComponent::Perpendicular && !mode.is_full_grid() {
                    return Err(invalid_component());
                }
                AnimationRequest::FourierSpectrum {
                    variable: field,
                    component,
                    mode,
                }
            }
            (AnimationKind::StructureFunction, Some(field)) => {
                let component = parse_component(&raw.component, field, kind)
                    .ok_or_else(invalid_component)?;
                let offsets = parse_offsets(&raw.params).map_err(bad_params)?;
                if offsets.len() > MAX_STRUCTURE_PANELS {
                    return Err(bad_params(format!(
                        "at most {MAX_STRUCTURE_PANELS} offsets fit one figure, got {}",
                        offsets.len()
                    )));
                }
                AnimationRequest::StructureFunction {
                    variable: field,
                    component,
                    offsets,
                }
            }
            (AnimationKind::Kurtosis, Some(field)) => {
                let component = parse_component(&raw.component, field, kind)
                    .ok_or_else(invalid_component)?;
                AnimationRequest::Kurtosis {
                    variable: field,
                    component,
                    offsets: parse_offsets(&raw.params).map_err(bad_params)?,
                }
            }
            (AnimationKind::Rms, field) => {
                let component = match field {
                    Some(field) => parse_component(&raw.component, field, kind),
                    None => (raw.component == "pass").then_some(DisplayComponent::Pass),
                }
                .ok_or_else(invalid_component)?;
                AnimationRequest::Rms {
                    variable,
                    component,
                    mode: parse_rms_mode(&raw.params).map_err(bad_params)?,
                }
            }
            (_, None) => return Err(invalid_component()),
        };

        Ok(request)
    }

    pub fn kind(&self) -> AnimationKind {
        match self {
            AnimationRequest::Heatmap2D { .. } => AnimationKind::Heatmap2D,
            AnimationRequest::HeatmapTriple { .. } => AnimationKind::HeatmapTriple,
            AnimationRequest::FourierSpectrum { .. } => AnimationKind::FourierSpectrum,
            AnimationRequest::StructureFunction { .. } => AnimationKind::StructureFunction,
            AnimationRequest::Kurtosis { .. } => AnimationKind::Kurtosis,
            AnimationRequest::Rms { .. } => AnimationKind::Rms,
        }
    }

    /// The request-level variable.
    pub fn variable(&self) -> Variable {
        match self {
            AnimationRequest::Heatmap2D { variable, .. }
            | AnimationRequest::HeatmapTriple { variable, .. }
            | AnimationRequest::FourierSpectrum { variable, .. }
            | AnimationRequest::StructureFunction { variable, .. }
            | AnimationRequest::Kurtosis { variable, .. } => Variable::Field(*variable),
            AnimationRequest::Rms { variable, .. } => *variable,
        }
    }

    /// True if the request writes one static image instead of an animation.
    pub fn is_still(&self) -> bool {
        matches!(
            self,
            AnimationRequest::Rms {
                mode: RmsMode::Summary,
                ..
            }
        )
    }

    /// Output format this request writes given the run's configured format.
    pub fn output_format(&self, configured: OutputFormat) -> OutputFormat {
        if self.is_still() {
            OutputFormat::Png
        } else {
            configured
        }
    }

    /// Deterministic output file stem (no extension).
    pub fn output_stem(&self, prefix: &str) -> String {
        let tag = self.kind().tag();
        match self {
            AnimationRequest::Heatmap2D {
                variable: Field::Rho,
                ..
            } => format!("{prefix}_{tag}_rho"),
            AnimationRequest::Heatmap2D {
                variable,
                component,
                normalization,
            } => format!("{prefix}_{tag}_{variable}_{component}_{normalization}"),
            AnimationRequest::HeatmapTriple {
                variable,
                normalization,
            } => format!("{prefix}_{tag}_{variable}_{normalization}"),
            AnimationRequest::FourierSpectrum {
                variable,
                component,
                mode,
            } => format!("{prefix}_{tag}_{variable}_{component}_{}", mode.name_suffix()),
            AnimationRequest::StructureFunction {
                variable,
                component,
                offsets,
            } => {
                let first = offsets.first().copied().unwrap_or_default();
                let last = offsets.last().copied().unwrap_or_default();
                format!("{prefix}_{tag}_{variable}_{component}_{first}-{last}")
            }
            AnimationRequest::Kurtosis {
                variable,
                component,
                ..
            } => format!("{prefix}_{tag}_{variable}_{component}"),
            AnimationRequest::Rms {
                variable,
                component,
                mode,
            } => match mode {
                RmsMode::Animated => format!("{prefix}_{tag}_{variable}_{component}"),
                RmsMode::Summary => format!("{prefix}_{tag}_{variable}_{component}_summary"),
            },
        }
    }
}

/// A validated request paired with its output file.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedRequest {
    pub request: AnimationRequest,
    pub output: PathBuf,
}

impl NamedRequest {
    /// Validate one raw request and derive its output path.
    pub fn build(
        raw: &RawRequest,
        prefix: &str,
        file_type: &str,
    ) -> Result<Self, RequestError> {
        let request = AnimationRequest::from_raw(raw)?;
        let configured = OutputFormat::parse(file_type)
            .ok_or_else(|| RequestError::InvalidOutputExtension(file_type.to_string()))?;
        // Still images only make sense for the one-shot summary.
        if !configured.is_animated() && !request.is_still() {
            return Err(RequestError::InvalidOutputExtension(file_type.to_string()));
        }
        let format = request.output_format(configured);
        let output = PathBuf::from(format!(
            "{}.{}",
            request.output_stem(prefix),
            format.extension()
        ));
        Ok(Self { request, output })
    }
}

/// Validate every request of a run. Fails on the first invalid entry.
pub fn build_requests(
    raws: &[RawRequest],
    prefix: &str,
    file_type: &str,
) -> Result<Vec<NamedRequest>, InvalidRequest> {
    let mut seen = HashSet::new();
    let mut requests = Vec::with_capacity(raws.len());

    for (index, raw) in raws.iter().enumerate() {
        let invalid = |source| InvalidRequest {
            index,
            raw: raw.to_string(),
            source,
        };
        let named = NamedRequest::build(raw, prefix, file_type).map_err(invalid)?;
        if !seen.insert(named.output.clone()) {
            return Err(invalid(RequestError::DuplicateOutput(named.output)));
        }
        requests.push(named);
    }

    Ok(requests)
}

fn parse_component(s: &str, field: Field, kind: AnimationKind) -> Option<DisplayComponent> {
    let component = DisplayComponent::parse(s)?;
    let legal = if !field.is_vector() {
        component == DisplayComponent::Pass
    } else {
        match component {
            DisplayComponent::Pass => false,
            DisplayComponent::X | DisplayComponent::Y | DisplayComponent::Z => true,
            DisplayComponent::Magnitude => kind != AnimationKind::FourierSpectrum,
            DisplayComponent::Perpendicular => {
                matches!(kind, AnimationKind::FourierSpectrum | AnimationKind::Rms)
            }
        }
    };
    legal.then_some(component)
}

fn parse_normalization(params: &Value, field: Field) -> Result<Normalization, String> {
    let normalization = match params {
        Value::Null => Normalization::Unit,
        Value::String(s) if s == "unit" => Normalization::Unit,
        Value::String(s) if s == "unitless" => Normalization::Unitless,
        other => return Err(format!("expected \"unit\" or \"unitless\", got {other}")),
    };
    if normalization == Normalization::Unitless && !field.is_vector() {
        return Err(format!(
            "unitless normalization needs a vector variable, {field} is scalar"
        ));
    }
    Ok(normalization)
}

fn parse_offsets(params: &Value) -> Result<Vec<usize>, String> {
    let items = params
        .as_array()
        .ok_or_else(|| format!("expected a list of offsets, got {params}"))?;
    if items.is_empty() {
        return Err("offset list is empty".to_string());
    }
    items
        .iter()
        .map(|item| match item.as_u64() {
            Some(offset) if offset > 0 => usize::try_from(offset)
                .map_err(|_| format!("offset {offset} does not fit this platform")),
            _ => Err(format!("offsets must be positive integers, got {item}")),
        })
        .collect()
}

fn parse_rms_mode(params: &Value) -> Result<RmsMode, String> {
    match params {
        Value::Null => Ok(RmsMode::Animated),
        Value::String(s) if s == "unit" || s == "animated" => Ok(RmsMode::Animated),
        Value::String(s) if s == "summary" => Ok(RmsMode::Summary),
        other => Err(format!("expected \"animated\" or \"summary\", got {other}")),
    }
}
