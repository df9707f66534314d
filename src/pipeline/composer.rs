//! Pipeline composition.
//!
//! # Responsibilities
//! - Parse every layer directive and fold it into a `CompositionState`
//! - Keep content sources in declaration order
//! - Gather transforms into one stage applied front-to-back
//! - Wire the cache and decompression exactly once, before the first upstream
//! - Refuse configurations without any content source
//!
//! # Stage order
//! ```text
//! auth? → etag → head → json? → transform? → content sources...
//! ```
//! Content sources are interleaved with the one-time upstream setup:
//! ```text
//! local(cache)? → cache tee? → decompress? → upstream → ...
//! ```

use std::collections::HashMap;

use crate::config::OverlayConfig;
use crate::http::middleware::{BasicAuth, Decompress, EtagRevalidation, HeadAsGet};
use crate::layer::{ActionKind, Layer};
use crate::observability::SharedSink;
use crate::pipeline::{BoxedHandler, BuildError, Pipeline};
use crate::routing::Mounted;
use crate::sources::{
    build_client, normalize_cache_dir, CacheTee, GitSource, InlineMiddleware, Local, NamedMiddleware, StatusStub,
    Upstream,
};
use crate::transform::{FunctionTransform, PrettyJson, ScopedTransform, SedTransform, TransformFn, TransformStage};

/// Everything gathered while folding over the layers. Lives only for one
/// composition.
#[derive(Default)]
pub struct CompositionState {
    pub local_count: usize,
    pub remote_count: usize,
    pub transforms: Vec<ScopedTransform>,
    pub content: Vec<BoxedHandler>,
    pub cache_applied: bool,
    pub decompress_applied: bool,
    client: Option<reqwest::Client>,
}

impl CompositionState {
    /// Content sources registered so far.
    pub fn content_sources(&self) -> usize {
        self.local_count + self.remote_count
    }
}

/// Builds a [`Pipeline`] from configuration and registered collaborators.
pub struct Composer<'a> {
    config: &'a OverlayConfig,
    sink: SharedSink,
    functions: &'a HashMap<String, TransformFn>,
    middleware: &'a HashMap<String, NamedMiddleware>,
}

impl<'a> Composer<'a> {
    pub fn new(
        config: &'a OverlayConfig,
        sink: SharedSink,
        functions: &'a HashMap<String, TransformFn>,
        middleware: &'a HashMap<String, NamedMiddleware>,
    ) -> Self {
        Self {
            config,
            sink,
            functions,
            middleware,
        }
    }

    pub fn compose(&self) -> Result<Pipeline, BuildError> {
        let layers = self
            .config
            .layers
            .iter()
            .map(|directive| Layer::parse(directive))
            .collect::<Result<Vec<_>, _>>()?;

        let auth = BasicAuth::new(self.config.basic.as_slice());
        if !auth.is_empty() {
            self.sink.log("authentication: Basic");
        }
        if let Some(compress) = &self.config.compress {
            self.sink.log(&format!("compress: {compress}"));
        }

        let decompress = self.config.cache.is_some()
            || self.config.compress.is_some()
            || layers.iter().any(|layer| layer.action().is_transform());

        let mut state = CompositionState::default();
        for layer in &layers {
            self.apply(&mut state, layer, decompress)?;
        }

        if state.content_sources() == 0 {
            return Err(BuildError::NoContentSource);
        }

        let mut stages: Vec<BoxedHandler> = Vec::with_capacity(state.content.len() + 5);
        if !auth.is_empty() {
            stages.push(Box::new(auth));
        }
        stages.push(Box::new(EtagRevalidation));
        stages.push(Box::new(HeadAsGet));
        if let Some(json) = self.config.json.as_ref().and_then(PrettyJson::new) {
            stages.push(Box::new(json));
        }
        if !state.transforms.is_empty() {
            stages.push(Box::new(TransformStage::new(state.transforms)));
        }
        stages.extend(state.content);

        let pipeline = Pipeline::new(stages);
        tracing::debug!(stages = ?pipeline.stage_names(), "Pipeline composed");
        Ok(pipeline)
    }

    /// Fold one layer into the state.
    pub fn apply(&self, state: &mut CompositionState, layer: &Layer, decompress: bool) -> Result<(), BuildError> {
        let raw = layer.raw();
        match layer.action() {
            ActionKind::Empty => {}

            ActionKind::Comment => self.sink.log(raw),

            ActionKind::SedTransform => match SedTransform::parse(raw) {
                Ok(sed) => {
                    let label = escape_controls(&layer.to_string());
                    self.sink.log(&format!("transform: {label}"));
                    state.transforms.push(ScopedTransform::new(layer.scope(), label, Box::new(sed)));
                }
                Err(e) => {
                    tracing::warn!(directive = %raw, error = %e, "Skipping invalid substitution");
                    self.sink.log(&format!("transform: invalid {}: {e}", escape_controls(&layer.to_string())));
                }
            },

            ActionKind::FunctionTransform => {
                self.sink.log(&format!("function: {layer}"));
                let function =
                    FunctionTransform::compile(raw, self.functions).map_err(|e| BuildError::InvalidFunction {
                        directive: raw.to_owned(),
                        reason: e.to_string(),
                    })?;
                state
                    .transforms
                    .push(ScopedTransform::new(layer.scope(), layer.to_string(), Box::new(function)));
            }

            ActionKind::InlineMiddleware => {
                self.sink.log(&format!("middleware: {layer}"));
                let middleware =
                    InlineMiddleware::compile(raw, self.middleware).map_err(|e| BuildError::InvalidMiddleware {
                        directive: raw.to_owned(),
                        reason: e.to_string(),
                    })?;
                state.local_count += 1;
                state.content.push(Mounted::wrap(layer.scope(), Box::new(middleware)));
            }

            ActionKind::StatusStub => {
                self.sink.log(&format!("status: {layer}"));
                let stub = StatusStub::parse(raw).ok_or_else(|| BuildError::InvalidStatus(raw.to_owned()))?;
                state.local_count += 1;
                state.content.push(Mounted::wrap(layer.scope(), Box::new(stub)));
            }

            ActionKind::Remote => {
                if state.remote_count == 0 {
                    self.before_upstream(state, decompress);
                }
                self.sink.log(&format!("upstream: {layer}"));
                let client = match &state.client {
                    Some(client) => client.clone(),
                    None => {
                        let client = build_client(&self.config.upstream)?;
                        state.client = Some(client.clone());
                        client
                    }
                };
                let upstream =
                    Upstream::new(raw, client, self.sink.clone()).map_err(|source| BuildError::InvalidUpstream {
                        url: raw.to_owned(),
                        source,
                    })?;
                state.content.push(Mounted::wrap(layer.scope(), Box::new(upstream)));
                state.remote_count += 1;
            }

            ActionKind::VersionedSource => {
                self.sink.log(&format!("git: {layer}"));
                state.local_count += 1;
                state
                    .content
                    .push(Mounted::wrap(layer.scope(), Box::new(GitSource::parse(raw))));
            }

            ActionKind::Local => {
                self.sink.log(&format!("local: {layer}"));
                state.local_count += 1;
                state
                    .content
                    .push(Mounted::wrap(layer.scope(), Box::new(Local::new(raw, self.config.index))));
            }
        }
        Ok(())
    }

    /// Cache and decompression, wired once ahead of the first upstream.
    fn before_upstream(&self, state: &mut CompositionState, decompress: bool) {
        if let Some(cache) = &self.config.cache {
            if !state.cache_applied {
                let dir = normalize_cache_dir(cache);
                self.sink.log(&format!("cache: {dir}"));
                state.content.push(Box::new(Local::new(&dir, false)));
                state.content.push(Box::new(CacheTee::new(&dir, self.sink.clone())));
                state.cache_applied = true;
            }
        }

        if decompress && !state.decompress_applied {
            state.content.push(Box::new(Decompress));
            state.decompress_applied = true;
        }
    }
}

/// Make control characters in a directive visible on one log line.
fn escape_controls(text: &str) -> String {
    text.replace('\r', "\\r").replace('\n', "\\n").replace('\t', "\\t")
}
