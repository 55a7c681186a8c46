use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};

use crate::data::{FrameGeometry, FrameSample};

/// A batch of frame sequences ready for the forward pass
#[derive(Debug, Clone)]
pub struct FrameBatch<B: Backend> {
    /// `[batch, in_steps, channels, height, width]`
    pub inputs: Tensor<B, 5>,
    /// `[batch, target_steps, height, width]`
    pub targets: Tensor<B, 4>,
    /// `[batch, in_steps, info_dim]`, present when every sample carries it
    pub ty_infos: Option<Tensor<B, 3>>,
    /// `[batch, map_channels, height, width]`
    pub radar_map: Option<Tensor<B, 4>>,
}

impl<B: Backend> FrameBatch<B> {
    pub fn batch_size(&self) -> usize {
        self.inputs.dims()[0]
    }

    /// Move every tensor of the batch to `device`
    pub fn to_device(self, device: &B::Device) -> Self {
        Self {
            inputs: self.inputs.to_device(device),
            targets: self.targets.to_device(device),
            ty_infos: self.ty_infos.map(|t| t.to_device(device)),
            radar_map: self.radar_map.map(|t| t.to_device(device)),
        }
    }
}

/// Stacks [`FrameSample`]s into a [`FrameBatch`] on a fixed device
#[derive(Clone, Debug)]
pub struct FrameBatcher<B: Backend> {
    device: B::Device,
    geometry: FrameGeometry,
}

impl<B: Backend> FrameBatcher<B> {
    pub fn new(device: B::Device, geometry: FrameGeometry) -> Self {
        Self { device, geometry }
    }
}

impl<B: Backend> Batcher<FrameSample, FrameBatch<B>> for FrameBatcher<B> {
    fn batch(&self, items: Vec<FrameSample>) -> FrameBatch<B> {
        let g = &self.geometry;
        let n = items.len();

        let inputs: Vec<f32> = items.iter().flat_map(|s| s.inputs.iter().copied()).collect();
        let targets: Vec<f32> = items.iter().flat_map(|s| s.targets.iter().copied()).collect();

        let inputs = Tensor::<B, 5>::from_data(
            TensorData::new(inputs, [n, g.in_steps, g.input_channels, g.height, g.width]),
            &self.device,
        );
        let targets = Tensor::<B, 4>::from_data(
            TensorData::new(targets, [n, g.target_steps, g.height, g.width]),
            &self.device,
        );

        // Auxiliaries only make it into the batch when no sample lacks them
        let (ty_infos, radar_map) = if n > 0 && items.iter().all(FrameSample::has_auxiliaries) {
            let infos: Vec<f32> = items
                .iter()
                .flat_map(|s| s.ty_infos.iter().flatten().copied())
                .collect();
            let maps: Vec<f32> = items
                .iter()
                .flat_map(|s| s.radar_map.iter().flatten().copied())
                .collect();
            (
                Some(Tensor::<B, 3>::from_data(
                    TensorData::new(infos, [n, g.in_steps, g.info_dim]),
                    &self.device,
                )),
                Some(Tensor::<B, 4>::from_data(
                    TensorData::new(maps, [n, g.map_channels, g.height, g.width]),
                    &self.device,
                )),
            )
        } else {
            (None, None)
        };

        FrameBatch {
            inputs,
            targets,
            ty_infos,
            radar_map,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn sample(g: &FrameGeometry, value: f32, with_aux: bool) -> FrameSample {
        FrameSample {
            inputs: vec![value; g.input_len()],
            targets: vec![value * 2.0; g.target_len()],
            ty_infos: with_aux.then(|| vec![value; g.info_len()]),
            radar_map: with_aux.then(|| vec![1.0; g.map_len()]),
        }
    }

    #[test]
    fn test_batch_shapes() {
        let g = FrameGeometry::tiny();
        let batcher = FrameBatcher::<TestBackend>::new(Default::default(), g);

        let batch = batcher.batch(vec![sample(&g, 1.0, true), sample(&g, 2.0, true)]);

        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.inputs.dims(), [2, 3, 1, 8, 8]);
        assert_eq!(batch.targets.dims(), [2, 2, 8, 8]);
        assert_eq!(batch.ty_infos.as_ref().map(|t| t.dims()), Some([2, 3, 4]));
        assert_eq!(batch.radar_map.as_ref().map(|t| t.dims()), Some([2, 1, 8, 8]));
    }

    #[test]
    fn test_batch_preserves_sample_order() {
        let g = FrameGeometry::tiny();
        let batcher = FrameBatcher::<TestBackend>::new(Default::default(), g);

        let batch = batcher.batch(vec![sample(&g, 1.0, false), sample(&g, 3.0, false)]);
        let second: f32 = batch
            .targets
            .slice([1..2, 0..1, 0..1, 0..1])
            .into_scalar()
            .elem();
        assert_eq!(second, 6.0);
    }

    #[test]
    fn test_mixed_auxiliaries_are_dropped() {
        let g = FrameGeometry::tiny();
        let batcher = FrameBatcher::<TestBackend>::new(Default::default(), g);

        let batch = batcher.batch(vec![sample(&g, 1.0, true), sample(&g, 1.0, false)]);
        assert!(batch.ty_infos.is_none());
        assert!(batch.radar_map.is_none());
    }
}
