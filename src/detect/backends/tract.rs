#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::result::{Detection, Keypoint, COCO_KEYPOINT_COUNT};
use crate::geometry::BoundingBox;

/// Box + person score + 17 × (x, y, visibility).
const POSE_ROW: usize = 4 + 1 + COCO_KEYPOINT_COUNT * 3;
const NMS_IOU: f32 = 0.45;
const KEYPOINT_MIN_VISIBILITY: f32 = 0.5;
const LETTERBOX_FILL: u8 = 114;

/// Tract backend for YOLOv8-pose style ONNX models.
///
/// Frames are letterboxed into a square input, and the `[1, 56, N]` output is
/// decoded into person boxes with COCO keypoints mapped back to frame pixels.
/// Keypoints below the visibility floor come back as (0, 0).
pub struct TractPoseBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
}

struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

impl TractPoseBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, f32::fact([1, 3, side, side]).into())
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "TractPoseBackend: loaded {} ({}x{} input)",
            model_path.display(),
            input_size,
            input_size
        );
        Ok(Self { model, input_size })
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<(Tensor, Letterbox)> {
        let expected_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected_len || width == 0 || height == 0 {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected_len,
                width,
                height,
                pixels.len()
            ));
        }

        let side = self.input_size as usize;
        let scale = (side as f32 / width as f32).min(side as f32 / height as f32);
        let scaled_w = ((width as f32 * scale) as usize).clamp(1, side);
        let scaled_h = ((height as f32 * scale) as usize).clamp(1, side);
        let pad_x = ((side - scaled_w) / 2) as f32;
        let pad_y = ((side - scaled_h) / 2) as f32;

        let (src_w, src_h) = (width as usize, height as usize);
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            let (Some(dx), Some(dy)) = (x.checked_sub(pad_x as usize), y.checked_sub(pad_y as usize))
            else {
                return LETTERBOX_FILL as f32 / 255.0;
            };
            if dx >= scaled_w || dy >= scaled_h {
                return LETTERBOX_FILL as f32 / 255.0;
            }
            // Nearest-neighbour sample from the source frame.
            let sx = ((dx as f32 / scale) as usize).min(src_w - 1);
            let sy = ((dy as f32 / scale) as usize).min(src_h - 1);
            pixels[(sy * src_w + sx) * 3 + c] as f32 / 255.0
        });

        Ok((
            input.into_tensor(),
            Letterbox {
                scale,
                pad_x,
                pad_y,
            },
        ))
    }

    fn decode(
        &self,
        outputs: TVec<TValue>,
        letterbox: &Letterbox,
        confidence: f32,
    ) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let shape = output.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 || shape[1] != POSE_ROW {
            return Err(anyhow!(
                "unexpected pose output shape {:?}, want [1, {}, N]",
                shape,
                POSE_ROW
            ));
        }
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output was not rank 3")?;

        let mut detections = Vec::new();
        for i in 0..shape[2] {
            let score = view[[0, 4, i]];
            if score < confidence {
                continue;
            }
            let (cx, cy) = letterbox.to_frame(view[[0, 0, i]], view[[0, 1, i]]);
            let bbox = BoundingBox::from_center(
                cx,
                cy,
                view[[0, 2, i]] / letterbox.scale,
                view[[0, 3, i]] / letterbox.scale,
            );

            let keypoints = (0..COCO_KEYPOINT_COUNT)
                .map(|k| {
                    let base = 5 + k * 3;
                    if view[[0, base + 2, i]] < KEYPOINT_MIN_VISIBILITY {
                        return Keypoint::missing();
                    }
                    let (kx, ky) = letterbox.to_frame(view[[0, base, i]], view[[0, base + 1, i]]);
                    Keypoint::new(kx, ky)
                })
                .collect();

            detections.push(
                Detection::new(bbox, score).with_keypoints(keypoints),
            );
        }

        Ok(nms(detections, NMS_IOU))
    }
}

impl DetectorBackend for TractPoseBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(
            capability,
            DetectionCapability::PersonBoxes | DetectionCapability::Pose
        )
    }

    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        confidence: f32,
    ) -> Result<Vec<Detection>> {
        let (input, letterbox) = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, &letterbox, confidence)
    }
}

/// Greedy non-maximum suppression, highest confidence first.
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| k.bbox.iou(&det.bbox) < iou_threshold) {
            keep.push(det);
        }
    }
    keep
}
