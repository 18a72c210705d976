use image::{Rgb, RgbImage};
use ndarray::prelude::*;

use crate::error::{Error, Result};

pub type Tensor = ArrayD<f32>;

/// Ordered list of named tensors exchanged with the inference engine.
///
/// Order is significant: detector outputs are addressed by position, the swap
/// model's inputs by name.
#[derive(Debug, Clone, Default)]
pub struct NamedTensors {
    entries: Vec<(String, Tensor)>,
}

impl NamedTensors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, tensor: Tensor) -> Self {
        self.push(name, tensor);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.entries.push((name.into(), tensor));
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    pub fn by_index(&self, index: usize) -> Result<&Tensor> {
        self.entries.get(index).map(|(_, t)| t).ok_or_else(|| {
            Error::model(format!(
                "expected at least {} outputs, got {}",
                index + 1,
                self.entries.len()
            ))
        })
    }

    /// First tensor in the list, the only one most models produce.
    pub fn first(&self) -> Result<&Tensor> {
        self.by_index(0)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> impl Iterator<Item = (String, Tensor)> {
        self.entries.into_iter()
    }
}

/// Channel convention of a pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// Build a `[1, 3, h, w]` blob: `(pixel - mean) / std` per channel.
///
/// `swap_rb` reverses the channel order of the source buffer, the way models
/// trained on the opposite convention expect it.
pub fn blob_from_image(image: &RgbImage, mean: f32, std: f32, swap_rb: bool) -> Array4<f32> {
    let (w, h) = image.dimensions();
    let mut blob = Array4::<f32>::zeros((1, 3, h as usize, w as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            let src = if swap_rb { 2 - c } else { c };
            blob[[0, c, y as usize, x as usize]] = (pixel.0[src] as f32 - mean) / std;
        }
    }

    blob
}

/// Convert a channel-first `[1, 3, h, w]` (or `[3, h, w]`) tensor with values in
/// roughly [0, 1] into an 8-bit image in the requested channel order.
pub fn tensor_to_image(tensor: &Tensor, order: ChannelOrder) -> Result<RgbImage> {
    let chw = match tensor.ndim() {
        4 => {
            if tensor.shape()[0] != 1 {
                return Err(Error::model(format!(
                    "expected batch size of 1, got {}",
                    tensor.shape()[0]
                )));
            }
            tensor.index_axis(Axis(0), 0)
        }
        3 => tensor.view(),
        n => {
            return Err(Error::model(format!(
                "expected a channel-first image tensor, got {} dimensions",
                n
            )))
        }
    };

    let chw = chw
        .into_dimensionality::<Ix3>()
        .map_err(|e| Error::model(e.to_string()))?;
    let shape = chw.shape();
    if shape[0] != 3 {
        return Err(Error::model(format!("expected 3 channels, got {}", shape[0])));
    }
    let (h, w) = (shape[1], shape[2]);

    let mut image = RgbImage::new(w as u32, h as u32);
    for y in 0..h {
        for x in 0..w {
            let mut px = [0u8; 3];
            for c in 0..3 {
                let dst = match order {
                    ChannelOrder::Rgb => c,
                    ChannelOrder::Bgr => 2 - c,
                };
                px[dst] = saturate_u8(chw[[c, y, x]] * 255.0);
            }
            image.put_pixel(x as u32, y as u32, Rgb(px));
        }
    }

    Ok(image)
}

/// Round-to-nearest and clamp into u8, matching the usual saturating cast.
pub fn saturate_u8(v: f32) -> u8 {
    if v.is_nan() {
        return 0;
    }
    v.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_normalises_and_swaps_channels() {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, Rgb([255, 0, 127]));
        image.put_pixel(1, 0, Rgb([0, 255, 0]));

        let blob = blob_from_image(&image, 127.5, 127.5, true);
        assert_eq!(blob.shape(), &[1, 3, 1, 2]);
        // channel 0 of the blob is the source's blue channel
        assert!((blob[[0, 0, 0, 0]] - (127.0 - 127.5) / 127.5).abs() < 1e-6);
        assert!((blob[[0, 2, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((blob[[0, 1, 0, 1]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn tensor_to_image_scales_and_clamps() {
        let mut t = Array4::<f32>::zeros((1, 3, 1, 1));
        t[[0, 0, 0, 0]] = 1.2;
        t[[0, 1, 0, 0]] = 0.5;
        t[[0, 2, 0, 0]] = -0.1;
        let t = t.into_dyn();

        let rgb = tensor_to_image(&t, ChannelOrder::Rgb).unwrap();
        assert_eq!(rgb.get_pixel(0, 0).0, [255, 128, 0]);

        let bgr = tensor_to_image(&t, ChannelOrder::Bgr).unwrap();
        assert_eq!(bgr.get_pixel(0, 0).0, [0, 128, 255]);
    }

    #[test]
    fn tensor_to_image_rejects_batches() {
        let t = Array4::<f32>::zeros((2, 3, 4, 4)).into_dyn();
        assert!(matches!(
            tensor_to_image(&t, ChannelOrder::Rgb),
            Err(Error::Model(_))
        ));
    }

    #[test]
    fn named_tensors_lookup() {
        let tensors = NamedTensors::new()
            .with("target", ArrayD::zeros(IxDyn(&[1, 3])))
            .with("source", ArrayD::ones(IxDyn(&[1, 512])));
        assert_eq!(tensors.len(), 2);
        assert_eq!(tensors.get("source").unwrap().shape(), &[1, 512]);
        assert!(tensors.get("missing").is_none());
        assert!(tensors.by_index(2).is_err());
    }
}
