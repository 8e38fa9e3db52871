//! Binding requests to live buffers and running them on workers.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info};

use super::fetch::GridInfo;
use super::registry::{BufferRegistry, BufferView};
use super::resolve::required_keys;
use crate::animation::{EncodeError, EncodedOutput, EncoderFactory};
use crate::render::{FrameSequence, RenderError, build_renderer};
use crate::schema::{NamedRequest, RenderSettings, Variable, VariableKey};

/// Dispatch errors. Each one names the output it was producing.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{output}: no live buffer for {key}")]
    UnresolvedVariable { output: PathBuf, key: VariableKey },
    #[error("{output}: {source}")]
    Render {
        output: PathBuf,
        #[source]
        source: RenderError,
    },
    #[error("{output}: {source}")]
    Encode {
        output: PathBuf,
        #[source]
        source: EncodeError,
    },
}

/// A request together with read-only views of every buffer it needs.
#[derive(Debug, Clone)]
pub struct BoundRequest {
    pub named: NamedRequest,
    pub buffers: BTreeMap<VariableKey, BufferView>,
    pub time: BufferView,
    pub grid: Arc<GridInfo>,
    pub settings: RenderSettings,
}

/// Turns named requests into self-contained worker jobs.
#[derive(Clone)]
pub struct Dispatcher {
    grid: Arc<GridInfo>,
    settings: RenderSettings,
    encoders: Arc<dyn EncoderFactory>,
}

impl Dispatcher {
    pub fn new(grid: Arc<GridInfo>, settings: RenderSettings, encoders: Arc<dyn EncoderFactory>) -> Self {
        Self {
            grid,
            settings,
            encoders,
        }
    }

    /// Resolve every key of `named` (time included) against the registry.
    pub fn bind(&self, named: &NamedRequest, registry: &BufferRegistry) -> Result<BoundRequest, DispatchError> {
        let unresolved = |key| DispatchError::UnresolvedVariable {
            output: named.output.clone(),
            key,
        };

        let buffers = required_keys(&named.request)
            .into_iter()
            .map(|key| {
                registry
                    .lookup(key)
                    .map(|view| (key, view))
                    .map_err(|_| unresolved(key))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        let time = registry
            .lookup(VariableKey::TIME)
            .map_err(|_| unresolved(VariableKey::TIME))?;

        Ok(BoundRequest {
            named: named.clone(),
            buffers,
            time,
            grid: Arc::clone(&self.grid),
            settings: self.settings.clone(),
        })
    }

    /// A job rendering and encoding one bound request.
    pub fn job(&self, bound: BoundRequest) -> impl FnOnce() -> Result<EncodedOutput, DispatchError> + Send + 'static {
        let encoders = Arc::clone(&self.encoders);
        move || execute(&bound, encoders.as_ref())
    }
}

fn execute(bound: &BoundRequest, encoders: &dyn EncoderFactory) -> Result<EncodedOutput, DispatchError> {
    let output = &bound.named.output;
    let render_error = |source| DispatchError::Render {
        output: output.clone(),
        source,
    };
    let encode_error = |source| DispatchError::Encode {
        output: output.clone(),
        source,
    };

    debug!("Rendering {} ({})", output.display(), bound.named.request.kind());
    let renderer = build_renderer(bound).map_err(render_error)?;
    let mut encoder = encoders
        .open(output, &bound.settings)
        .map_err(encode_error)?;

    for plot in FrameSequence::new(renderer) {
        let plot = plot.map_err(render_error)?;
        encoder.push(&plot).map_err(encode_error)?;
    }
    let encoded = encoder.finish().map_err(encode_error)?;
    info!("Wrote {}", encoded);
    Ok(encoded)
}

/// Requests sharing one request variable, dispatched together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestGroup {
    /// `None` when grouping is disabled and the group holds every request.
    pub variable: Option<Variable>,
    /// Indices into the request list, in request order.
    pub requests: Vec<usize>,
    /// Keys the group reads, time excluded.
    pub keys: BTreeSet<VariableKey>,
}

/// Split requests into dispatch groups in order of first appearance.
pub fn schedule(requests: &[NamedRequest], group_by_variable: bool) -> Vec<RequestGroup> {
    let mut groups: Vec<RequestGroup> = Vec::new();

    for (index, named) in requests.iter().enumerate() {
        let variable = group_by_variable.then(|| named.request.variable());
        let position = match groups.iter().position(|g| g.variable == variable) {
            Some(position) => position,
            None => {
                groups.push(RequestGroup {
                    variable,
                    requests: Vec::new(),
                    keys: BTreeSet::new(),
                });
                groups.len() - 1
            }
        };
        let group = &mut groups[position];
        group.requests.push(index);
        group.keys.extend(required_keys(&named.request));
    }
    groups
}

/// Keys read by any group after `index`.
pub fn keys_needed_after(groups: &[RequestGroup], index: usize) -> BTreeSet<VariableKey> {
    groups
        .iter()
        .skip(index + 1)
        .flat_map(|g| g.keys.iter().copied())
        .collect()
}
