use std::collections::HashMap;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use ndarray::{ArrayD, CowArray, IxDyn};
use ort::tensor::OrtOwnedTensor;
use ort::{Environment, ExecutionProvider, GraphOptimizationLevel, Session, SessionBuilder, Value};
use tracing::{debug, info};

use crate::config::SwapperOptions;
use crate::error::{Error, Result};
use crate::inference::{InferenceEngine, ModelKind};
use crate::tensor::NamedTensors;

/// ONNX Runtime backed engine holding one session per model.
pub struct OnnxEngine {
    _environment: Arc<Environment>,
    sessions: HashMap<ModelKind, Session>,
}

impl OnnxEngine {
    /// Load every model that has a path configured.
    pub fn new(options: &SwapperOptions) -> Result<Self> {
        let provider = if options.use_gpu {
            ExecutionProvider::CUDA(Default::default())
        } else {
            ExecutionProvider::CPU(Default::default())
        };

        let environment = Environment::builder()
            .with_name("faceswap")
            .with_execution_providers([provider])
            .build()?
            .into_arc();

        let mut sessions = HashMap::new();
        for model in ModelKind::ALL {
            if let Some(path) = options.models.path(model) {
                let session = Self::load_session(&environment, path, options.intra_threads)?;
                info!(?model, path = %path.display(), "loaded onnx model");
                sessions.insert(model, session);
            }
        }

        let engine = OnnxEngine {
            _environment: environment,
            sessions,
        };

        if options.warmup_at_startup {
            engine.warmup(options.detection.input_size as usize)?;
        }

        Ok(engine)
    }

    fn load_session(environment: &Arc<Environment>, path: &Path, intra_threads: i16) -> Result<Session> {
        let session = SessionBuilder::new(environment)?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads)?
            .with_model_from_file(path)?;
        Ok(session)
    }

    fn session(&self, model: ModelKind) -> Result<&Session> {
        self.sessions
            .get(&model)
            .ok_or_else(|| Error::model(format!("no session loaded for {:?}", model)))
    }

    /// Run every loaded model once on zero inputs so the first real frame
    /// doesn't pay for graph initialisation.
    pub fn warmup(&self, dynamic_extent: usize) -> Result<()> {
        let started = Instant::now();

        for (model, session) in self.sessions.iter() {
            let mut inputs = NamedTensors::new();
            for input in session.inputs.iter() {
                // dynamic batch axis -> 1, dynamic spatial axes -> detector input size
                let shape: Vec<usize> = input
                    .dimensions
                    .iter()
                    .enumerate()
                    .map(|(i, d)| match d {
                        Some(d) => *d as usize,
                        None if i == 0 => 1,
                        None => dynamic_extent,
                    })
                    .collect();
                inputs.push(input.name.clone(), ArrayD::zeros(IxDyn(&shape)));
            }
            self.infer(*model, inputs)?;
            debug!(?model, "warmed up");
        }

        info!(elapsed = ?started.elapsed(), "warmup complete");
        Ok(())
    }
}

impl InferenceEngine for OnnxEngine {
    fn input_names(&self, model: ModelKind) -> Result<Vec<String>> {
        let session = self.session(model)?;
        Ok(session.inputs.iter().map(|i| i.name.clone()).collect())
    }

    fn infer(&self, model: ModelKind, inputs: NamedTensors) -> Result<NamedTensors> {
        let session = self.session(model)?;

        // session.run is positional, so line the tensors up with the declared inputs
        let mut by_name: HashMap<String, ArrayD<f32>> = inputs.into_entries().collect();
        let mut arrays: Vec<CowArray<f32, IxDyn>> = Vec::with_capacity(session.inputs.len());
        for input in session.inputs.iter() {
            let tensor = by_name.remove(&input.name).ok_or_else(|| {
                Error::model(format!("{:?}: missing input tensor '{}'", model, input.name))
            })?;
            arrays.push(CowArray::from(tensor));
        }

        let values = arrays
            .iter()
            .map(|a| Value::from_array(session.allocator(), a))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let outputs: Vec<Value> = session.run(values)?;

        let mut result = NamedTensors::new();
        for (meta, value) in session.outputs.iter().zip(outputs.iter()) {
            let tensor: OrtOwnedTensor<f32, _> = value.try_extract()?;
            let array = tensor.view().deref().to_owned();
            result.push(meta.name.clone(), array);
        }

        Ok(result)
    }
}
