use burn::nn::gru::{Gru, GruConfig};
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;

use crate::data::FrameGeometry;
use crate::error::Result as HarnessResult;
use crate::model::conv_gru::{ConvGruConfig, EncoderForecaster};
use crate::model::{Forecaster, InputConvention, ModelInput};

/// Hyperparameters of the storm-aware forecaster
#[derive(Config, Debug)]
pub struct TyCatcherConfig {
    /// Encoder-forecaster core, sized for the radar frames alone
    pub core: ConvGruConfig,
    /// Storm-track features per input step
    pub info_dim: usize,
    /// Channels of the static radar map
    pub map_channels: usize,
    /// Hidden size of the storm-track GRU
    #[config(default = "32")]
    pub tracker_hidden: usize,
}

impl TyCatcherConfig {
    pub fn from_geometry(geometry: &FrameGeometry) -> HarnessResult<Self> {
        let core = ConvGruConfig::from_geometry(geometry)?;
        Ok(Self::new(core, geometry.info_dim, geometry.map_channels))
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> TyCatcher<B> {
        // The radar map rides along as extra channels of every input frame
        let core = ConvGruConfig {
            input_channels: self.core.input_channels + self.map_channels,
            ..self.core.clone()
        };

        TyCatcher {
            core: core.init_core(device),
            tracker: GruConfig::new(self.info_dim, self.tracker_hidden, true).init(device),
            projection: LinearConfig::new(self.tracker_hidden, core.top_channels()).init(device),
            info_dim: self.info_dim,
            map_channels: self.map_channels,
        }
    }
}

/// ConvGRU forecaster conditioned on storm-track features and a radar map
#[derive(Module, Debug)]
pub struct TyCatcher<B: Backend> {
    core: EncoderForecaster<B>,
    tracker: Gru<B>,
    projection: Linear<B>,
    info_dim: usize,
    map_channels: usize,
}

impl<B: Backend> TyCatcher<B> {
    fn forward_with(
        &self,
        encoder_inputs: Tensor<B, 5>,
        ty_infos: Tensor<B, 3>,
        radar_map: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [b, steps, _, _, _] = encoder_inputs.dims();
        let [_, map_c, h, w] = radar_map.dims();

        let map = radar_map.reshape([b, 1, map_c, h, w]);
        let frames = Tensor::cat(vec![encoder_inputs, Tensor::cat(vec![map; steps], 1)], 2);

        let tracked = self.tracker.forward(ty_infos, None);
        let [_, info_steps, hidden] = tracked.dims();
        let last = tracked
            .slice([0..b, info_steps - 1..info_steps, 0..hidden])
            .reshape([b, hidden]);

        self.core.forward(frames, Some(self.projection.forward(last)))
    }
}

impl<B: Backend> Forecaster<B> for TyCatcher<B> {
    fn convention(&self) -> InputConvention {
        InputConvention::WithAuxiliaries
    }

    fn forward(&self, input: ModelInput<B>) -> Tensor<B, 4> {
        match input {
            ModelInput::WithAuxiliaries {
                encoder_inputs,
                ty_infos,
                radar_map,
            } => self.forward_with(encoder_inputs, ty_infos, radar_map),
            ModelInput::Frames(inputs) => {
                let [b, steps, _, h, w] = inputs.dims();
                let device = inputs.device();
                let ty_infos = Tensor::zeros([b, steps, self.info_dim], &device);
                let radar_map = Tensor::zeros([b, self.map_channels, h, w], &device);
                self.forward_with(inputs, ty_infos, radar_map)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_config_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ty_catcher.json");
        let config = TyCatcherConfig::from_geometry(&FrameGeometry::tiny())
            .unwrap()
            .with_tracker_hidden(16);

        config.save(&path).unwrap();
        let loaded = TyCatcherConfig::load(&path).unwrap();

        assert_eq!(loaded.to_string(), config.to_string());
        assert_eq!(loaded.core.levels, config.core.levels);
    }

    #[test]
    fn test_forward_with_auxiliaries() {
        let device = Default::default();
        let g = FrameGeometry::tiny();
        let model = TyCatcherConfig::from_geometry(&g)
            .unwrap()
            .init::<TestBackend>(&device);

        let input = ModelInput::WithAuxiliaries {
            encoder_inputs: Tensor::ones([2, g.in_steps, 1, g.height, g.width], &device),
            ty_infos: Tensor::ones([2, g.in_steps, g.info_dim], &device),
            radar_map: Tensor::ones([2, g.map_channels, g.height, g.width], &device),
        };
        let out = model.forward(input);

        assert_eq!(out.dims(), [2, g.target_steps, g.height, g.width]);
        assert_eq!(model.convention(), InputConvention::WithAuxiliaries);
    }

    #[test]
    fn test_frames_fall_back_to_zero_auxiliaries() {
        let device = Default::default();
        let g = FrameGeometry::tiny();
        let model = TyCatcherConfig::from_geometry(&g)
            .unwrap()
            .init::<TestBackend>(&device);

        let inputs = Tensor::<TestBackend, 5>::ones([1, g.in_steps, 1, g.height, g.width], &device);
        let explicit = model.forward(ModelInput::WithAuxiliaries {
            encoder_inputs: inputs.clone(),
            ty_infos: Tensor::zeros([1, g.in_steps, g.info_dim], &device),
            radar_map: Tensor::zeros([1, g.map_channels, g.height, g.width], &device),
        });
        let fallback = model.forward(ModelInput::Frames(inputs));

        fallback
            .into_data()
            .assert_approx_eq(&explicit.into_data(), 5);
    }
}
