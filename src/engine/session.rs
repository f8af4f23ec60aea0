// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Graph sessions
//!
//! The decode algorithm only needs "named tensors in, named tensors out", so
//! it talks to a [`GraphSession`]. [`OrtSession`] is the ONNX Runtime backend;
//! tests drive the same code with scripted sessions.

use ndarray::{ArrayD, ArrayViewD};
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{DynValue, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{EngineOptions, ExecutionProviderKind};
use crate::error::{OcrError, Result};

/// Owned tensor returned from a graph
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    F32(ArrayD<f32>),
    I64(ArrayD<i64>),
}

impl Tensor {
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::F32(a) => a.shape(),
            Self::I64(a) => a.shape(),
        }
    }

    pub fn dtype(&self) -> &'static str {
        match self {
            Self::F32(_) => "f32",
            Self::I64(_) => "i64",
        }
    }

    /// Take the f32 payload, failing on any other element type
    pub fn into_f32(self) -> Result<ArrayD<f32>> {
        match self {
            Self::F32(a) => Ok(a),
            other => Err(OcrError::InferenceFailure(format!(
                "expected f32 tensor, got {} {:?}",
                other.dtype(),
                other.shape()
            ))),
        }
    }

    pub fn view(&self) -> TensorView<'_> {
        match self {
            Self::F32(a) => TensorView::F32(a.view()),
            Self::I64(a) => TensorView::I64(a.view()),
        }
    }
}

impl From<ArrayD<f32>> for Tensor {
    fn from(array: ArrayD<f32>) -> Self {
        Self::F32(array)
    }
}

impl From<ArrayD<i64>> for Tensor {
    fn from(array: ArrayD<i64>) -> Self {
        Self::I64(array)
    }
}

/// Borrowed tensor passed into a graph
#[derive(Debug, Clone)]
pub enum TensorView<'a> {
    F32(ArrayViewD<'a, f32>),
    I64(ArrayViewD<'a, i64>),
}

impl TensorView<'_> {
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::F32(a) => a.shape(),
            Self::I64(a) => a.shape(),
        }
    }

    pub fn to_owned(&self) -> Tensor {
        match self {
            Self::F32(a) => Tensor::F32(a.to_owned()),
            Self::I64(a) => Tensor::I64(a.to_owned()),
        }
    }
}

/// Named outputs of one graph run, in graph order
#[derive(Debug, Clone, Default)]
pub struct GraphOutputs {
    entries: Vec<(String, Tensor)>,
}

impl GraphOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.entries.push((name.into(), tensor));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    /// Remove the output called `name`, or the first output if none matches
    pub fn take_or_first(mut self, name: &str) -> Option<Tensor> {
        let idx = self
            .entries
            .iter()
            .position(|(n, _)| n == name)
            .unwrap_or(0);
        if idx < self.entries.len() {
            Some(self.entries.swap_remove(idx).1)
        } else {
            None
        }
    }
}

impl FromIterator<(String, Tensor)> for GraphOutputs {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// A loaded, stateless numerical graph
///
/// `run` must be a pure function of its inputs. Implementations are shared
/// across threads; interior locking is the implementation's concern.
pub trait GraphSession: Send + Sync {
    /// Declared input names
    fn input_names(&self) -> Vec<String>;

    /// Declared output names, in output order
    fn output_names(&self) -> Vec<String>;

    fn run(&self, inputs: &[(&str, TensorView<'_>)]) -> Result<GraphOutputs>;
}

/// Check that every required input is declared by the graph
pub(crate) fn require_inputs(
    session: &dyn GraphSession,
    artifact: &Path,
    required: &[&str],
) -> Result<()> {
    let declared = session.input_names();
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|name| !declared.iter().any(|d| d == name))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(OcrError::invalid_artifact(
            artifact,
            format!(
                "graph is missing input(s) {:?}; declared inputs are {:?}",
                missing, declared
            ),
        ))
    }
}

/// Pick `preferred` if the graph declares it, else the first output
pub(crate) fn select_output(
    session: &dyn GraphSession,
    artifact: &Path,
    preferred: &str,
) -> Result<String> {
    let outputs = session.output_names();
    if outputs.iter().any(|o| o == preferred) {
        return Ok(preferred.to_string());
    }
    match outputs.into_iter().next() {
        Some(first) => {
            debug!(
                "{} has no '{}' output, using '{}'",
                artifact.display(),
                preferred,
                first
            );
            Ok(first)
        }
        None => Err(OcrError::invalid_artifact(artifact, "graph declares no outputs")),
    }
}

fn optimization_level(level: u8) -> GraphOptimizationLevel {
    match level {
        0 => GraphOptimizationLevel::Disable,
        1 => GraphOptimizationLevel::Level1,
        2 => GraphOptimizationLevel::Level2,
        _ => GraphOptimizationLevel::Level3,
    }
}

/// ONNX Runtime backed [`GraphSession`]
///
/// `ort` requires exclusive access per run, so concurrent callers serialize
/// on the mutex.
pub struct OrtSession {
    session: Mutex<Session>,
    path: PathBuf,
    inputs: Vec<String>,
    outputs: Vec<String>,
    provider: ExecutionProviderKind,
}

impl std::fmt::Debug for OrtSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrtSession")
            .field("path", &self.path)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

impl OrtSession {
    /// Load an ONNX graph
    ///
    /// When CUDA is requested but cannot be registered, the graph is loaded on
    /// CPU instead and a warning is logged.
    ///
    /// # Errors
    /// - `ArtifactMissing` if the file does not exist
    /// - `ArtifactInvalid` if ONNX Runtime rejects the graph
    pub fn load<P: AsRef<Path>>(model_path: P, options: &EngineOptions) -> Result<Self> {
        let path = model_path.as_ref();
        if !path.exists() {
            return Err(OcrError::ArtifactMissing {
                path: path.to_path_buf(),
            });
        }

        info!("Loading ONNX graph from {}", path.display());

        let (session, provider) = match options.execution_provider {
            ExecutionProviderKind::Cuda => match Self::build(path, options, ExecutionProviderKind::Cuda) {
                Ok(session) => {
                    info!("✅ CUDA execution provider initialized for {}", path.display());
                    (session, ExecutionProviderKind::Cuda)
                }
                Err(e) => {
                    warn!("⚠️  CUDA execution provider failed: {}", e);
                    warn!("   Falling back to CPU execution provider");
                    let session = Self::build(path, options, ExecutionProviderKind::Cpu)
                        .map_err(|reason| OcrError::invalid_artifact(path, reason))?;
                    (session, ExecutionProviderKind::Cpu)
                }
            },
            ExecutionProviderKind::Cpu => {
                let session = Self::build(path, options, ExecutionProviderKind::Cpu)
                    .map_err(|reason| OcrError::invalid_artifact(path, reason))?;
                (session, ExecutionProviderKind::Cpu)
            }
        };

        let inputs: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let outputs: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        debug!(
            "Graph {} - inputs: {:?}, outputs: {:?}",
            path.display(),
            inputs,
            outputs
        );

        Ok(Self {
            session: Mutex::new(session),
            path: path.to_path_buf(),
            inputs,
            outputs,
            provider,
        })
    }

    fn build(
        path: &Path,
        options: &EngineOptions,
        provider: ExecutionProviderKind,
    ) -> std::result::Result<Session, String> {
        let dispatch = match provider {
            ExecutionProviderKind::Cpu => CPUExecutionProvider::default().build(),
            ExecutionProviderKind::Cuda => CUDAExecutionProvider::default().build().error_on_failure(),
        };

        Session::builder()
            .map_err(|e| format!("Failed to create session builder: {}", e))?
            .with_execution_providers([dispatch])
            .map_err(|e| format!("Failed to set {:?} execution provider: {}", provider, e))?
            .with_optimization_level(optimization_level(options.optimization_level))
            .map_err(|e| format!("Failed to set optimization level: {}", e))?
            .with_intra_threads(options.intra_threads)
            .map_err(|e| format!("Failed to set intra threads: {}", e))?
            .commit_from_file(path)
            .map_err(|e| format!("Failed to load ONNX graph: {}", e))
    }

    /// Provider the graph actually runs on (after any fallback)
    pub fn provider(&self) -> ExecutionProviderKind {
        self.provider
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn to_value(name: &str, tensor: &TensorView<'_>) -> Result<DynValue> {
        let value = match tensor {
            TensorView::F32(a) => Value::from_array(a.to_owned()).map(|v| v.into_dyn()),
            TensorView::I64(a) => Value::from_array(a.to_owned()).map(|v| v.into_dyn()),
        };
        value.map_err(|e| OcrError::inference(&format!("Failed to create '{}' tensor", name), e))
    }
}

impl GraphSession for OrtSession {
    fn input_names(&self) -> Vec<String> {
        self.inputs.clone()
    }

    fn output_names(&self) -> Vec<String> {
        self.outputs.clone()
    }

    fn run(&self, inputs: &[(&str, TensorView<'_>)]) -> Result<GraphOutputs> {
        let values = inputs
            .iter()
            .map(|(name, tensor)| Ok((name.to_string(), Self::to_value(name, tensor)?)))
            .collect::<Result<Vec<(String, DynValue)>>>()?;

        let mut session = self.session.lock().map_err(|_| {
            OcrError::InferenceFailure(format!("session for {} is poisoned", self.path.display()))
        })?;

        let outputs = session
            .run(values)
            .map_err(|e| OcrError::inference(&format!("{} run failed", self.path.display()), e))?;

        // Outputs borrow the session, so copy them out before the lock is released
        let mut result = GraphOutputs::new();
        for name in &self.outputs {
            let Some(value) = outputs.get(name.as_str()) else {
                continue;
            };
            let tensor = if let Ok(array) = value.try_extract_array::<f32>() {
                Tensor::F32(array.to_owned())
            } else if let Ok(array) = value.try_extract_array::<i64>() {
                Tensor::I64(array.to_owned())
            } else {
                return Err(OcrError::InferenceFailure(format!(
                    "output '{}' of {} has an unsupported element type",
                    name,
                    self.path.display()
                )));
            };
            result.push(name.clone(), tensor);
        }

        Ok(result)
    }
}
