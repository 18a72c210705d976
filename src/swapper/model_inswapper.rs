use std::sync::Arc;

use image::RgbImage;
use ndarray::{Array1, Array2};
use tracing::debug;

use super::{Face, FaceStage};
use crate::alignment::FaceAligner;
use crate::compositor::{Composite, SwapCompositor};
use crate::embedding::project_embedding;
use crate::error::{Error, Result};
use crate::inference::{InferenceEngine, ModelKind};
use crate::tensor::{blob_from_image, ChannelOrder, NamedTensors};

const INPUT_MEAN: f32 = 0.0;
const INPUT_STD: f32 = 255.0;

/// inswapper face swap network: aligned target crop plus source latent in,
/// swapped crop out.
pub struct InSwapper {
    engine: Arc<dyn InferenceEngine>,
    aligner: FaceAligner,
    input_size: u32,
    emap: Option<Arc<Array2<f32>>>,
    compositor: SwapCompositor,
}

impl InSwapper {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        aligner: FaceAligner,
        input_size: u32,
        emap: Option<Arc<Array2<f32>>>,
    ) -> Self {
        InSwapper {
            engine,
            aligner,
            input_size,
            emap,
            compositor: SwapCompositor::new(ChannelOrder::Rgb),
        }
    }

    /// Latent vector of `source` for the model's second input.
    pub fn latent(&self, source: &Face) -> Result<Array1<f32>> {
        let embedding = source
            .embedding
            .as_ref()
            .ok_or_else(|| Error::input("source face has no embedding"))?;
        project_embedding(embedding, self.emap.as_deref())
    }

    /// Swap the identity `latent` onto `target` in `image`.
    ///
    /// `stage` follows the target through alignment and inference so the
    /// caller can tell how far it got when an error comes back.
    pub fn swap(
        &self,
        image: &RgbImage,
        target: &Face,
        latent: &Array1<f32>,
        stage: &mut FaceStage,
    ) -> Result<Composite> {
        let aligned = self.aligner.align(
            image,
            target.detection.keypoints.as_slice(),
            self.input_size,
        )?;
        *stage = FaceStage::Aligned;

        let names = self.engine.input_names(ModelKind::InSwapper)?;
        if names.len() < 2 {
            return Err(Error::model(format!(
                "swap model needs a target and a source input, it declares {:?}",
                names
            )));
        }

        let blob = blob_from_image(&aligned.crop, INPUT_MEAN, INPUT_STD, false);
        let latent = latent.clone().insert_axis(ndarray::Axis(0));
        let inputs = NamedTensors::new()
            .with(names[0].clone(), blob.into_dyn())
            .with(names[1].clone(), latent.into_dyn());

        let outputs = self.engine.infer(ModelKind::InSwapper, inputs)?;
        let pred = outputs.first()?;
        let shape = pred.shape();
        if shape.len() != 4 || shape[0] != 1 || shape[1] != 3 {
            return Err(Error::model(format!(
                "swap model output must be [1, 3, H, W], got {:?}",
                shape
            )));
        }
        *stage = FaceStage::SwapTargetReady;

        debug!(output = ?shape, "swap model ran");
        self.compositor
            .composite(image, &aligned.transform, pred, &aligned.crop)
    }
}
